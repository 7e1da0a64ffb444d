use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::channel::CdpChannel;
use crate::diff::{self, Consequence};
use crate::error::{CdpError, ErrorDetail, Result};
use crate::interact::{self, Interactable};
use crate::js;
use crate::keys::{self, KeyChord};
use crate::refs::RefRegistry;
use crate::resolver::{self, resolve_ref, ResolvedBy};
use crate::results::{snapshot_data_to_result, ActionResult, SnapshotResult, RESULT_VERSION};
use crate::snapshot::{take_snapshot, SnapshotData};
use crate::stability::{
    await_settled, MutationTracker, StabilityOutcome, StabilitySubscriptions, HARD_CAP_MS,
};

/// Upper bound on a navigation, load event included.
pub const NAVIGATION_TIMEOUT_MS: u64 = 30_000;
/// Default wait-for timeout when the caller supplies none.
pub const WAIT_FOR_DEFAULT_TIMEOUT_MS: u64 = 10_000;
const WAIT_FOR_POLL_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    fn as_str(self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScrollAmount {
    Pixels(f64),
    Named(NamedAmount),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamedAmount {
    Page,
    ToTop,
    ToBottom,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrollParams {
    #[serde(default)]
    pub r#ref: Option<String>,
    pub direction: ScrollDirection,
    #[serde(default)]
    pub amount: Option<ScrollAmount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WaitForParams {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub r#ref: Option<String>,
    /// Milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// One attached debugging target plus the ref registry scoped to it.
///
/// Every mutating action runs the same pipeline: resolve the target, take a
/// ref-preserving pre capture, fire the input primitives, wait for the page
/// to settle, take the post capture, and diff the two into consequences. No
/// error escapes; each public method always returns a populated envelope.
#[derive(Debug)]
pub struct PageSession {
    channel: CdpChannel,
    registry: RefRegistry,
}

enum ActionKind {
    Click { r: String },
    Fill { r: String, value: String },
    PressKey { key: String },
    Scroll(ScrollParams),
}

impl ActionKind {
    fn describe(&self) -> String {
        match self {
            ActionKind::Click { r } => format!("click {r}"),
            ActionKind::Fill { r, .. } => format!("fill {r}"),
            ActionKind::PressKey { key } => format!("press {key}"),
            ActionKind::Scroll(params) => match &params.r#ref {
                Some(r) => format!("scroll {} {r}", params.direction.as_str()),
                None => format!("scroll {}", params.direction.as_str()),
            },
        }
    }
}

struct ActionOutcome {
    data: SnapshotData,
    consequences: Vec<Consequence>,
    new_interactive_elements: Vec<String>,
    warnings: Vec<String>,
    resolved_by: Option<ResolvedBy>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrollInfo {
    #[serde(default)]
    scroll_top_before: f64,
    #[serde(default)]
    scroll_top_after: f64,
    #[serde(default)]
    scroll_height: f64,
    #[serde(default)]
    client_height: f64,
    #[serde(default)]
    container_tag: String,
    #[serde(default)]
    fallback: bool,
}

#[derive(Debug, Default, Deserialize)]
struct LayoutShiftTotals {
    #[serde(default)]
    cls: f64,
    #[serde(default)]
    count: u64,
}

impl PageSession {
    /// Attach to a connected channel and enable the domains the pipeline
    /// depends on.
    pub async fn attach(channel: CdpChannel) -> Result<Self> {
        channel.enable_domains().await?;
        Ok(Self {
            channel,
            registry: RefRegistry::new(),
        })
    }

    pub fn channel(&self) -> &CdpChannel {
        &self.channel
    }

    /// Navigate and return a fresh capture of the loaded page. All previous
    /// refs go stale.
    pub async fn navigate(&mut self, url: &str) -> SnapshotResult {
        let started = Instant::now();
        tracing::debug!(url, "navigate");
        match self.navigate_inner(url).await {
            Ok(data) => snapshot_data_to_result(&data, elapsed_ms(started)),
            Err(err) => SnapshotResult::failure(ErrorDetail::from(&err), elapsed_ms(started)),
        }
    }

    async fn navigate_inner(&mut self, url: &str) -> Result<SnapshotData> {
        self.channel.ensure_alive()?;
        let parsed = url::Url::parse(url)
            .map_err(|err| CdpError::ActionFailed(format!("invalid url {url:?}: {err}")))?;

        // subscribe before the command goes out so the load event cannot
        // slip between the response and the wait
        let mut load = self.channel.subscribe("Page.loadEventFired");
        let resp = self
            .channel
            .send("Page.navigate", json!({ "url": parsed.as_str() }))
            .await?;
        if let Some(error_text) = resp.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                return Err(CdpError::ActionFailed(format!(
                    "navigation failed: {error_text}"
                )));
            }
        }

        match tokio::time::timeout(
            Duration::from_millis(NAVIGATION_TIMEOUT_MS),
            load.next(),
        )
        .await
        {
            Ok(Some(_)) => {}
            Ok(None) => return Err(CdpError::Disconnected),
            Err(_) => {
                return Err(CdpError::ActionFailed(format!(
                    "no load event within {NAVIGATION_TIMEOUT_MS}ms"
                )))
            }
        }

        self.registry.mark_all_stale();
        take_snapshot(&self.channel, &mut self.registry, false).await
    }

    /// Capture the page as it is now. Non-preserving: earlier refs are
    /// dropped, the counter keeps running.
    pub async fn snapshot(&mut self) -> SnapshotResult {
        let started = Instant::now();
        match take_snapshot(&self.channel, &mut self.registry, false).await {
            Ok(data) => snapshot_data_to_result(&data, elapsed_ms(started)),
            Err(err) => SnapshotResult::failure(ErrorDetail::from(&err), elapsed_ms(started)),
        }
    }

    pub async fn click(&mut self, r: &str) -> ActionResult {
        self.perform(ActionKind::Click { r: r.to_string() }).await
    }

    pub async fn fill(&mut self, r: &str, value: &str) -> ActionResult {
        self.perform(ActionKind::Fill {
            r: r.to_string(),
            value: value.to_string(),
        })
        .await
    }

    pub async fn press_key(&mut self, key: &str) -> ActionResult {
        self.perform(ActionKind::PressKey {
            key: key.to_string(),
        })
        .await
    }

    pub async fn scroll(&mut self, params: ScrollParams) -> ActionResult {
        self.perform(ActionKind::Scroll(params)).await
    }

    /// Poll until the given text and/or ref conditions hold, then return the
    /// capture that satisfied them.
    pub async fn wait_for(&mut self, params: WaitForParams) -> SnapshotResult {
        let started = Instant::now();
        let timeout_ms = params.timeout.unwrap_or(WAIT_FOR_DEFAULT_TIMEOUT_MS);
        tracing::debug!(text = ?params.text, r = ?params.r#ref, timeout_ms, "wait for");
        match self.wait_for_inner(&params, timeout_ms).await {
            Ok(data) => snapshot_data_to_result(&data, elapsed_ms(started)),
            Err(err) => SnapshotResult::failure(ErrorDetail::from(&err), elapsed_ms(started)),
        }
    }

    async fn wait_for_inner(
        &mut self,
        params: &WaitForParams,
        timeout_ms: u64,
    ) -> Result<SnapshotData> {
        let deadline = Instant::now() + std::time::Duration::from_millis(timeout_ms);
        loop {
            self.channel.ensure_alive()?;
            let data = take_snapshot(&self.channel, &mut self.registry, true).await?;

            let mut satisfied = true;
            if let Some(text) = &params.text {
                satisfied &= text_matches(&data, text);
            }
            if let Some(r) = &params.r#ref {
                satisfied &= self.ref_visible(r).await;
            }
            if satisfied {
                return Ok(data);
            }

            if Instant::now() >= deadline {
                return Err(CdpError::WaitTimeout(format!(
                    "conditions not met within {timeout_ms}ms"
                )));
            }
            tokio::time::sleep(Duration::from_millis(WAIT_FOR_POLL_MS)).await;
        }
    }

    /// The ref resolves and has a box model. Deliberately never scrolls:
    /// waiting must not mutate page state.
    async fn ref_visible(&mut self, r: &str) -> bool {
        let Ok(resolved) = resolve_ref(&self.channel, &mut self.registry, r).await else {
            return false;
        };
        if let Some(object_id) = &resolved.object_id {
            self.channel.release_object(object_id).await;
        }
        matches!(
            interact::box_model(&self.channel, resolved.backend_node_id).await,
            Ok(Some(_))
        )
    }

    async fn perform(&mut self, kind: ActionKind) -> ActionResult {
        let started = Instant::now();
        let action = kind.describe();
        tracing::debug!(%action, "running action");
        match self.perform_inner(&kind).await {
            Ok(outcome) => ActionResult {
                version: RESULT_VERSION,
                action,
                ok: true,
                page: outcome.data.page,
                consequences: outcome.consequences,
                new_interactive_elements: outcome.new_interactive_elements,
                errors: Vec::new(),
                warnings: outcome.warnings,
                resolved_by: outcome.resolved_by.map(|r| r.as_str().to_string()),
                timing_ms: elapsed_ms(started),
            },
            Err(err) => {
                tracing::debug!(%action, %err, "action failed");
                ActionResult::failure(action, ErrorDetail::from(&err), elapsed_ms(started))
            }
        }
    }

    async fn perform_inner(&mut self, kind: &ActionKind) -> Result<ActionOutcome> {
        self.channel.ensure_alive()?;
        match kind {
            ActionKind::Click { r } => {
                let point =
                    interact::interactable_point(&self.channel, &mut self.registry, r).await?;
                let pre = self.pre_snapshot().await?;
                let action_start = unix_now_secs();
                let subs = StabilitySubscriptions::subscribe(&self.channel);

                let dispatched = self.dispatch_click(&point).await;
                self.channel.release_object(&point.object_id).await;
                dispatched?;

                let settled = await_settled(subs, action_start, false).await;
                self.finish(pre, settled, Vec::new(), Vec::new(), Some(point.resolved_by))
                    .await
            }
            ActionKind::Fill { r, value } => {
                let point =
                    interact::interactable_point(&self.channel, &mut self.registry, r).await?;
                let pre = self.pre_snapshot().await?;
                let action_start = unix_now_secs();
                let subs = StabilitySubscriptions::subscribe(&self.channel);

                let filled = self
                    .channel
                    .call_function_on(&point.object_id, js::FILL_VALUE, vec![json!(value)])
                    .await;
                self.channel.release_object(&point.object_id).await;
                if filled? != Value::Bool(true) {
                    return Err(CdpError::FillFailed(format!(
                        "value did not persist on {r}"
                    )));
                }

                let settled = await_settled(subs, action_start, false).await;
                self.finish(pre, settled, Vec::new(), Vec::new(), Some(point.resolved_by))
                    .await
            }
            ActionKind::PressKey { key } => {
                let chord = keys::parse_chord(key)?;
                let pre = self.pre_snapshot().await?;
                let action_start = unix_now_secs();
                let subs = StabilitySubscriptions::subscribe(&self.channel);

                self.dispatch_key(&chord).await?;

                let settled = await_settled(subs, action_start, false).await;
                self.finish(pre, settled, Vec::new(), Vec::new(), None).await
            }
            ActionKind::Scroll(params) => self.perform_scroll(params).await,
        }
    }

    async fn perform_scroll(&mut self, params: &ScrollParams) -> Result<ActionOutcome> {
        let mut resolved_by = None;
        let mut object_id = None;
        if let Some(r) = &params.r#ref {
            let resolved = resolve_ref(&self.channel, &mut self.registry, r)
                .await
                .map_err(|err| CdpError::NotInteractable(format!("{r}: {err}")))?;
            let id = match resolved.object_id {
                Some(id) => id,
                None => resolver::resolve_object(&self.channel, resolved.backend_node_id)
                    .await
                    .map_err(|err| CdpError::NotInteractable(format!("{r}: {err}")))?,
            };
            resolved_by = Some(resolved.resolved_by);
            object_id = Some(id);
        }

        let pre = self.pre_snapshot().await?;
        let action_start = unix_now_secs();

        // the observer is best effort, the page may not support layout-shift
        let observer_installed = self
            .channel
            .evaluate(js::INSTALL_LAYOUT_SHIFT_OBSERVER)
            .await
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        // expand the tree so mutation events cover dynamically created
        // subtrees the DOM domain has not walked yet
        self.channel
            .send("DOM.getDocument", json!({ "depth": -1 }))
            .await?;
        let tracker = MutationTracker::start(&self.channel);
        let subs = StabilitySubscriptions::subscribe(&self.channel);

        let info = match self.execute_scroll(params, object_id.as_deref()).await {
            Ok(info) => info,
            Err(err) => {
                tracker.stop();
                if let Some(id) = &object_id {
                    self.channel.release_object(id).await;
                }
                return Err(err);
            }
        };
        if let Some(id) = &object_id {
            self.channel.release_object(id).await;
        }
        tracing::debug!(
            container = %info.container_tag,
            from = info.scroll_top_before,
            to = info.scroll_top_after,
            scroll_height = info.scroll_height,
            client_height = info.client_height,
            "scrolled"
        );

        let settled = await_settled(subs, action_start, false).await;
        let mutations = tracker.stop();
        let shift = if observer_installed {
            self.collect_layout_shift().await
        } else {
            LayoutShiftTotals::default()
        };

        let mut warnings = Vec::new();
        let intent = resolved_intent(params);
        if info.scroll_top_before == info.scroll_top_after {
            warnings.push(match intent {
                ScrollDirection::Up => "SCROLL_AT_BOUNDARY: Already at top".to_string(),
                ScrollDirection::Down => "SCROLL_AT_BOUNDARY: Already at bottom".to_string(),
            });
        }
        if info.fallback {
            if let Some(r) = &params.r#ref {
                warnings.push(format!(
                    "SCROLL_FALLBACK: No scrollable ancestor found for {r}, scrolling viewport instead"
                ));
            }
        }

        let mut extras = Vec::new();
        if mutations.churn_count > 0 {
            extras.push(Consequence::DomChurn {
                desc: format!(
                    "subtree churn: {} inserted, {} removed",
                    mutations.insertions, mutations.removals
                ),
                churn_count: mutations.churn_count,
            });
        }
        if shift.cls > 0.0 {
            extras.push(Consequence::LayoutShift {
                desc: format!("layout shifted {:.4} over {} shift(s)", shift.cls, shift.count),
                cls: shift.cls,
                shift_count: shift.count,
            });
        }

        self.finish(pre, settled, extras, warnings, resolved_by).await
    }

    /// Steps 8..11 of the pipeline, shared by every mutating action.
    async fn finish(
        &mut self,
        pre: SnapshotData,
        settled: StabilityOutcome,
        extras: Vec<Consequence>,
        mut warnings: Vec<String>,
        resolved_by: Option<ResolvedBy>,
    ) -> Result<ActionOutcome> {
        let post = take_snapshot(&self.channel, &mut self.registry, true).await?;

        let mut consequences = diff::diff_snapshots(&pre, &post, &settled.network_events);
        consequences.extend(extras);

        let new_interactive_elements: Vec<String> = consequences
            .iter()
            .filter_map(Consequence::appeared_ref)
            .filter_map(|r| post.element(r))
            .map(|e| e.compact_line.clone())
            .collect();

        if settled.timed_out {
            warnings.push(format!(
                "STABILITY_TIMEOUT: page did not settle within {HARD_CAP_MS}ms"
            ));
        }

        Ok(ActionOutcome {
            consequences,
            new_interactive_elements,
            warnings,
            resolved_by,
            data: post,
        })
    }

    async fn pre_snapshot(&mut self) -> Result<SnapshotData> {
        take_snapshot(&self.channel, &mut self.registry, true).await
    }

    async fn dispatch_click(&self, point: &Interactable) -> Result<()> {
        self.channel
            .send(
                "Input.dispatchMouseEvent",
                json!({ "type": "mouseMoved", "x": point.x, "y": point.y }),
            )
            .await?;
        self.channel
            .send(
                "Input.dispatchMouseEvent",
                json!({
                    "type": "mousePressed",
                    "x": point.x,
                    "y": point.y,
                    "button": "left",
                    "clickCount": 1,
                }),
            )
            .await?;
        self.channel
            .send(
                "Input.dispatchMouseEvent",
                json!({
                    "type": "mouseReleased",
                    "x": point.x,
                    "y": point.y,
                    "button": "left",
                    "clickCount": 1,
                }),
            )
            .await?;
        Ok(())
    }

    async fn dispatch_key(&self, chord: &KeyChord) -> Result<()> {
        let def = &chord.definition;
        self.channel
            .send(
                "Input.dispatchKeyEvent",
                json!({
                    "type": "keyDown",
                    "key": def.key,
                    "code": def.code,
                    "windowsVirtualKeyCode": def.key_code,
                    "nativeVirtualKeyCode": def.key_code,
                    "modifiers": chord.modifiers,
                }),
            )
            .await?;
        if chord.is_printable() {
            self.channel
                .send(
                    "Input.dispatchKeyEvent",
                    json!({
                        "type": "char",
                        "text": def.key,
                        "key": def.key,
                        "modifiers": chord.modifiers,
                    }),
                )
                .await?;
        }
        self.channel
            .send(
                "Input.dispatchKeyEvent",
                json!({
                    "type": "keyUp",
                    "key": def.key,
                    "code": def.code,
                    "windowsVirtualKeyCode": def.key_code,
                    "nativeVirtualKeyCode": def.key_code,
                    "modifiers": chord.modifiers,
                }),
            )
            .await?;
        Ok(())
    }

    async fn execute_scroll(
        &self,
        params: &ScrollParams,
        object_id: Option<&str>,
    ) -> Result<ScrollInfo> {
        let direction = json!(params.direction.as_str());
        let amount = amount_json(params);
        let value = match object_id {
            Some(id) => {
                self.channel
                    .call_function_on(id, js::SCROLL_FROM_ELEMENT, vec![direction, amount])
                    .await?
            }
            None => {
                let expr = js::call_expression(js::SCROLL_VIEWPORT, &[direction, amount]);
                self.channel.evaluate(expr).await?
            }
        };
        Ok(serde_json::from_value(value)?)
    }

    async fn collect_layout_shift(&self) -> LayoutShiftTotals {
        self.channel
            .evaluate(js::COLLECT_LAYOUT_SHIFT)
            .await
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

fn amount_json(params: &ScrollParams) -> Value {
    match params.amount {
        None | Some(ScrollAmount::Named(NamedAmount::Page)) => json!("page"),
        Some(ScrollAmount::Named(NamedAmount::ToTop)) => json!("to-top"),
        Some(ScrollAmount::Named(NamedAmount::ToBottom)) => json!("to-bottom"),
        Some(ScrollAmount::Pixels(n)) => json!(n),
    }
}

/// The direction boundary warnings are judged against: `to-top` means the
/// caller wanted up, `to-bottom` down, anything else is their word.
fn resolved_intent(params: &ScrollParams) -> ScrollDirection {
    match params.amount {
        Some(ScrollAmount::Named(NamedAmount::ToTop)) => ScrollDirection::Up,
        Some(ScrollAmount::Named(NamedAmount::ToBottom)) => ScrollDirection::Down,
        _ => params.direction,
    }
}

fn text_matches(data: &SnapshotData, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    if data.page.title.to_lowercase().contains(&needle) {
        return true;
    }
    data.elements.iter().any(|element| {
        element.name.to_lowercase().contains(&needle)
            || element
                .properties
                .get("value")
                .is_some_and(|value| value.to_lowercase().contains(&needle))
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Wall-clock seconds, the clock family network event `wallTime`s use.
fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
