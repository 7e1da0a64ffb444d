use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::time::Instant;

use crate::channel::{CdpChannel, EventSubscription};

/// Quiet window that must elapse after the last tracked event.
pub const DEBOUNCE_MS: u64 = 200;
/// Upper bound on any stability wait.
pub const HARD_CAP_MS: u64 = 3000;

/// One Fetch/XHR request observed during a stability wait.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkEvent {
    pub request_id: String,
    pub method: String,
    pub url: String,
    /// Wall-clock seconds when the request started.
    pub started_at: f64,
    pub finished_at: Option<f64>,
    pub status: Option<i64>,
    pub duration_ms: Option<u64>,
}

/// Tracks the in-flight Fetch/XHR set for the duration of one wait.
///
/// Only requests whose wall timestamp is at or after the action start are
/// counted; everything the page had in flight beforehand is not this
/// action's doing.
#[derive(Debug)]
pub struct NetworkLedger {
    action_start: f64,
    events: Vec<NetworkEvent>,
    in_flight: HashMap<String, InFlight>,
}

#[derive(Debug)]
struct InFlight {
    index: usize,
    started_monotonic: f64,
}

impl NetworkLedger {
    pub fn new(action_start: f64) -> Self {
        Self {
            action_start,
            events: Vec::new(),
            in_flight: HashMap::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns whether the request entered tracking.
    pub fn on_request_will_be_sent(&mut self, params: &Value) -> bool {
        let resource_type = params.get("type").and_then(Value::as_str);
        if !matches!(resource_type, Some("Fetch") | Some("XHR")) {
            return false;
        }
        let wall_time = params
            .get("wallTime")
            .and_then(Value::as_f64)
            .unwrap_or(f64::MAX);
        if wall_time < self.action_start {
            return false;
        }
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return false;
        };
        let request = params.get("request");
        let url = request
            .and_then(|r| r.get("url"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let method = request
            .and_then(|r| r.get("method"))
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_string();
        let started_monotonic = params
            .get("timestamp")
            .and_then(Value::as_f64)
            .unwrap_or_default();

        self.in_flight.insert(
            request_id.to_string(),
            InFlight {
                index: self.events.len(),
                started_monotonic,
            },
        );
        self.events.push(NetworkEvent {
            request_id: request_id.to_string(),
            method,
            url,
            started_at: wall_time,
            finished_at: None,
            status: None,
            duration_ms: None,
        });
        true
    }

    /// Record the response status of a tracked request. Not a debounce
    /// trigger, only bookkeeping.
    pub fn on_response_received(&mut self, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let Some(entry) = self.in_flight.get(request_id) else {
            return;
        };
        let status = params
            .get("response")
            .and_then(|r| r.get("status"))
            .and_then(Value::as_i64);
        self.events[entry.index].status = status;
    }

    /// Returns whether this completion belonged to a tracked request.
    pub fn on_loading_finished(&mut self, params: &Value) -> bool {
        self.complete(params)
    }

    /// Returns whether this failure belonged to a tracked request.
    pub fn on_loading_failed(&mut self, params: &Value) -> bool {
        self.complete(params)
    }

    fn complete(&mut self, params: &Value) -> bool {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return false;
        };
        let Some(entry) = self.in_flight.remove(request_id) else {
            return false;
        };
        let finished_monotonic = params.get("timestamp").and_then(Value::as_f64);
        let event = &mut self.events[entry.index];
        if let Some(finished) = finished_monotonic {
            let duration = (finished - entry.started_monotonic).max(0.0);
            event.duration_ms = Some((duration * 1000.0).round() as u64);
            event.finished_at = Some(event.started_at + duration);
        }
        true
    }

    pub fn into_events(self) -> Vec<NetworkEvent> {
        self.events
    }
}

/// Per-parent insert/remove counts observed during a wait.
#[derive(Debug, Clone, Default)]
pub struct MutationCounts {
    inserted: HashMap<i64, u64>,
    removed: HashMap<i64, u64>,
}

impl MutationCounts {
    pub fn on_inserted(&mut self, parent_node_id: i64) {
        *self.inserted.entry(parent_node_id).or_default() += 1;
    }

    pub fn on_removed(&mut self, parent_node_id: i64) {
        *self.removed.entry(parent_node_id).or_default() += 1;
    }

    /// Aggregate the counts. Churn is the per-parent `min(ins, rem)` sum:
    /// a subtree that was torn down and rebuilt scores, a genuinely new
    /// element does not.
    pub fn summary(&self) -> MutationSummary {
        let insertions = self.inserted.values().sum();
        let removals = self.removed.values().sum();
        let churn_count = self
            .inserted
            .iter()
            .map(|(parent, ins)| (*ins).min(self.removed.get(parent).copied().unwrap_or(0)))
            .sum();
        MutationSummary {
            insertions,
            removals,
            churn_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationSummary {
    pub insertions: u64,
    pub removals: u64,
    pub churn_count: u64,
}

/// What a stability wait resolved to.
#[derive(Debug)]
pub struct StabilityOutcome {
    /// The hard cap fired before the page went quiet.
    pub timed_out: bool,
    pub network_events: Vec<NetworkEvent>,
    pub mutations: Option<MutationSummary>,
}

/// The event subscriptions one wait owns. Dropping them unsubscribes, which
/// happens on every exit path of [`await_settled`].
#[derive(Debug)]
pub struct StabilitySubscriptions {
    pub(crate) inserted: EventSubscription,
    pub(crate) removed: EventSubscription,
    pub(crate) request_will_be_sent: EventSubscription,
    pub(crate) response_received: EventSubscription,
    pub(crate) loading_finished: EventSubscription,
    pub(crate) loading_failed: EventSubscription,
}

impl StabilitySubscriptions {
    pub fn subscribe(channel: &CdpChannel) -> Self {
        Self {
            inserted: channel.subscribe("DOM.childNodeInserted"),
            removed: channel.subscribe("DOM.childNodeRemoved"),
            request_will_be_sent: channel.subscribe("Network.requestWillBeSent"),
            response_received: channel.subscribe("Network.responseReceived"),
            loading_finished: channel.subscribe("Network.loadingFinished"),
            loading_failed: channel.subscribe("Network.loadingFailed"),
        }
    }
}

/// Wait until the page settles: no tracked DOM mutation or network event for
/// [`DEBOUNCE_MS`], with no Fetch/XHR in flight. The hard cap at
/// [`HARD_CAP_MS`] always resolves, with `timed_out` set.
pub async fn await_settled(
    subs: StabilitySubscriptions,
    action_start: f64,
    track_mutations: bool,
) -> StabilityOutcome {
    let StabilitySubscriptions {
        mut inserted,
        mut removed,
        mut request_will_be_sent,
        mut response_received,
        mut loading_finished,
        mut loading_failed,
    } = subs;

    let mut ledger = NetworkLedger::new(action_start);
    let mut mutations = track_mutations.then(MutationCounts::default);
    let mut timed_out = false;

    let debounce = tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS));
    let hard_cap = tokio::time::sleep(Duration::from_millis(HARD_CAP_MS));
    tokio::pin!(debounce);
    tokio::pin!(hard_cap);

    loop {
        let mut reset = false;
        tokio::select! {
            _ = &mut hard_cap => {
                timed_out = true;
                break;
            }
            _ = &mut debounce => {
                if ledger.pending() == 0 {
                    break;
                }
                // still waiting on the network, keep debouncing
                reset = true;
            }
            Some(params) = inserted.next() => {
                if let (Some(counts), Some(parent)) =
                    (mutations.as_mut(), params.get("parentNodeId").and_then(Value::as_i64))
                {
                    counts.on_inserted(parent);
                }
                reset = true;
            }
            Some(params) = removed.next() => {
                if let (Some(counts), Some(parent)) =
                    (mutations.as_mut(), params.get("parentNodeId").and_then(Value::as_i64))
                {
                    counts.on_removed(parent);
                }
                reset = true;
            }
            Some(params) = request_will_be_sent.next() => {
                reset = ledger.on_request_will_be_sent(&params);
            }
            Some(params) = response_received.next() => {
                ledger.on_response_received(&params);
            }
            Some(params) = loading_finished.next() => {
                reset = ledger.on_loading_finished(&params);
            }
            Some(params) = loading_failed.next() => {
                reset = ledger.on_loading_failed(&params);
            }
        }
        if reset {
            debounce
                .as_mut()
                .reset(Instant::now() + Duration::from_millis(DEBOUNCE_MS));
        }
    }

    StabilityOutcome {
        timed_out,
        network_events: ledger.into_events(),
        mutations: mutations.map(|counts| counts.summary()),
    }
}

/// Standalone mutation tracker for scroll: subscribed before the scroll
/// command goes out so synchronous mutations fired during the `scrollTop`
/// assignment are counted, stopped after the stability wait.
#[derive(Debug)]
pub struct MutationTracker {
    counts: Arc<Mutex<MutationCounts>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MutationTracker {
    pub fn start(channel: &CdpChannel) -> Self {
        let mut inserted = channel.subscribe("DOM.childNodeInserted");
        let mut removed = channel.subscribe("DOM.childNodeRemoved");
        let counts = Arc::new(Mutex::new(MutationCounts::default()));
        let task_counts = Arc::clone(&counts);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = inserted.next() => match maybe {
                        Some(params) => {
                            if let Some(parent) = params.get("parentNodeId").and_then(Value::as_i64) {
                                if let Ok(mut counts) = task_counts.lock() {
                                    counts.on_inserted(parent);
                                }
                            }
                        }
                        None => break,
                    },
                    maybe = removed.next() => match maybe {
                        Some(params) => {
                            if let Some(parent) = params.get("parentNodeId").and_then(Value::as_i64) {
                                if let Ok(mut counts) = task_counts.lock() {
                                    counts.on_removed(parent);
                                }
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        Self { counts, handle }
    }

    /// Stop tracking and aggregate what was seen.
    pub fn stop(self) -> MutationSummary {
        self.handle.abort();
        self.counts
            .lock()
            .map(|counts| counts.summary())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use serde_json::json;

    fn test_subs() -> (
        StabilitySubscriptions,
        [mpsc::UnboundedSender<Value>; 6],
    ) {
        let (ins_tx, ins_rx) = mpsc::unbounded();
        let (rem_tx, rem_rx) = mpsc::unbounded();
        let (req_tx, req_rx) = mpsc::unbounded();
        let (resp_tx, resp_rx) = mpsc::unbounded();
        let (fin_tx, fin_rx) = mpsc::unbounded();
        let (fail_tx, fail_rx) = mpsc::unbounded();
        let subs = StabilitySubscriptions {
            inserted: EventSubscription::new(ins_rx),
            removed: EventSubscription::new(rem_rx),
            request_will_be_sent: EventSubscription::new(req_rx),
            response_received: EventSubscription::new(resp_rx),
            loading_finished: EventSubscription::new(fin_rx),
            loading_failed: EventSubscription::new(fail_rx),
        };
        (subs, [ins_tx, rem_tx, req_tx, resp_tx, fin_tx, fail_tx])
    }

    fn request(id: &str, url: &str, resource_type: &str, wall: f64, ts: f64) -> Value {
        json!({
            "requestId": id,
            "type": resource_type,
            "wallTime": wall,
            "timestamp": ts,
            "request": { "url": url, "method": "GET" },
        })
    }

    #[test]
    fn churn_is_min_pair_per_parent_and_reorder_invariant() {
        let mut counts = MutationCounts::default();
        // parent 1: 3 in / 2 out, parent 2: 1 in / 4 out, parent 3: 2 in only
        for _ in 0..3 {
            counts.on_inserted(1);
        }
        for _ in 0..2 {
            counts.on_removed(1);
        }
        counts.on_inserted(2);
        for _ in 0..4 {
            counts.on_removed(2);
        }
        counts.on_inserted(3);
        counts.on_inserted(3);

        let summary = counts.summary();
        assert_eq!(summary.insertions, 6);
        assert_eq!(summary.removals, 6);
        assert_eq!(summary.churn_count, 2 + 1);

        // same events, interleaved differently
        let mut shuffled = MutationCounts::default();
        shuffled.on_removed(2);
        shuffled.on_inserted(3);
        shuffled.on_removed(1);
        shuffled.on_inserted(1);
        shuffled.on_removed(2);
        shuffled.on_inserted(2);
        shuffled.on_inserted(1);
        shuffled.on_removed(2);
        shuffled.on_inserted(3);
        shuffled.on_removed(1);
        shuffled.on_inserted(1);
        shuffled.on_removed(2);
        assert_eq!(shuffled.summary(), summary);
    }

    #[test]
    fn ledger_ignores_other_resource_types_and_old_requests() {
        let mut ledger = NetworkLedger::new(100.0);
        assert!(!ledger.on_request_will_be_sent(&request("1", "https://x/a.css", "Stylesheet", 150.0, 5.0)));
        assert!(!ledger.on_request_will_be_sent(&request("2", "https://x/api", "XHR", 50.0, 5.0)));
        assert!(ledger.on_request_will_be_sent(&request("3", "https://x/api", "Fetch", 150.0, 5.0)));
        assert_eq!(ledger.pending(), 1);

        // completions of untracked requests are not activity
        assert!(!ledger.on_loading_finished(&json!({ "requestId": "2", "timestamp": 6.0 })));
        assert!(ledger.on_loading_finished(&json!({ "requestId": "3", "timestamp": 5.25 })));
        assert_eq!(ledger.pending(), 0);

        let events = ledger.into_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration_ms, Some(250));
        assert_eq!(events[0].finished_at, Some(150.25));
    }

    #[test]
    fn ledger_records_status_from_response() {
        let mut ledger = NetworkLedger::new(0.0);
        ledger.on_request_will_be_sent(&request("9", "https://x/api", "XHR", 1.0, 1.0));
        ledger.on_response_received(&json!({
            "requestId": "9",
            "response": { "status": 201 },
        }));
        ledger.on_loading_finished(&json!({ "requestId": "9", "timestamp": 1.5 }));
        let events = ledger.into_events();
        assert_eq!(events[0].status, Some(201));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_resolves_one_debounce_after_the_last_event() {
        let (subs, [ins_tx, ..]) = test_subs();
        for _ in 0..5 {
            ins_tx.unbounded_send(json!({ "parentNodeId": 1 })).unwrap();
        }
        let started = Instant::now();
        let outcome = await_settled(subs, 0.0, true).await;
        let elapsed = started.elapsed();

        assert!(!outcome.timed_out);
        assert!(elapsed >= Duration::from_millis(DEBOUNCE_MS));
        assert!(elapsed < Duration::from_millis(HARD_CAP_MS));
        let mutations = outcome.mutations.unwrap();
        assert_eq!(mutations.insertions, 5);
        assert_eq!(mutations.churn_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_network_holds_the_wait_open() {
        let (subs, [_ins, _rem, req_tx, _resp, fin_tx, _fail]) = test_subs();
        req_tx
            .unbounded_send(request("7", "https://x/api/items", "Fetch", 10.0, 2.0))
            .unwrap();

        let waiter = tokio::spawn(await_settled(subs, 0.0, false));
        let feeder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            fin_tx
                .unbounded_send(json!({ "requestId": "7", "timestamp": 2.6 }))
                .unwrap();
        });

        let started = Instant::now();
        let outcome = waiter.await.unwrap();
        feeder.await.unwrap();
        let elapsed = started.elapsed();

        assert!(!outcome.timed_out);
        // completion at ~500ms plus one quiet window
        assert!(elapsed >= Duration::from_millis(500 + DEBOUNCE_MS));
        assert_eq!(outcome.network_events.len(), 1);
        assert_eq!(outcome.network_events[0].duration_ms, Some(600));
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_activity_hits_the_hard_cap() {
        let (subs, [ins_tx, ..]) = test_subs();
        let feeder = tokio::spawn(async move {
            loop {
                if ins_tx.unbounded_send(json!({ "parentNodeId": 2 })).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });

        let started = Instant::now();
        let outcome = await_settled(subs, 0.0, false).await;
        feeder.abort();

        assert!(outcome.timed_out);
        assert!(started.elapsed() >= Duration::from_millis(HARD_CAP_MS));
    }
}
