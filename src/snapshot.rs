use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::channel::CdpChannel;
use crate::error::Result;
use crate::js;
use crate::refs::{NodeIdentity, RefRegistry};
use crate::resolver;

/// The roles that count as interactive. Nothing outside this set is ever
/// surfaced to the caller.
pub const INTERACTIVE_ROLES: [&str; 12] = [
    "button",
    "link",
    "textbox",
    "combobox",
    "checkbox",
    "radio",
    "menuitem",
    "tab",
    "switch",
    "slider",
    "spinbutton",
    "searchbox",
];

/// The state flags that may appear in a compact line, in render order.
const STATE_FLAGS: [&str; 6] = [
    "focused",
    "checked",
    "selected",
    "expanded",
    "disabled",
    "required",
];

/// One interactive element as captured by a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotElement {
    pub r#ref: String,
    pub ax_node_id: Option<String>,
    pub dom_path: String,
    pub role: String,
    pub name: String,
    /// The single-line rendering shown to the caller.
    pub compact_line: String,
    pub properties: BTreeMap<String, String>,
}

/// Url, title and viewport of the captured page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: i64,
    pub height: i64,
}

/// A full capture of the interactive element set, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotData {
    pub elements: Vec<SnapshotElement>,
    pub page: PageInfo,
}

impl SnapshotData {
    /// The element registered under a ref, if this capture saw it.
    pub fn element(&self, r: &str) -> Option<&SnapshotElement> {
        self.elements.iter().find(|e| e.r#ref == r)
    }
}

/// Render the sole user-visible serialization of an element:
/// `@eN role "name" [state1, state2] value:"…"`.
pub fn compact_line(
    r: &str,
    role: &str,
    name: &str,
    properties: &BTreeMap<String, String>,
) -> String {
    let mut line = format!("{r} {role}");
    if !name.is_empty() {
        line.push_str(&format!(" \"{name}\""));
    }
    let states: Vec<&str> = STATE_FLAGS
        .iter()
        .copied()
        .filter(|flag| properties.get(*flag).map(String::as_str) == Some("true"))
        .collect();
    if !states.is_empty() {
        line.push_str(&format!(" [{}]", states.join(", ")));
    }
    if let Some(value) = properties.get("value") {
        if value != name {
            line.push_str(&format!(" value:\"{value}\""));
        }
    }
    line
}

/// Raw accessibility node, the subset of fields the walk reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AxNode {
    node_id: String,
    #[serde(default)]
    ignored: bool,
    role: Option<AxValue>,
    name: Option<AxValue>,
    #[serde(default)]
    properties: Vec<AxProperty>,
    backend_dom_node_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AxValue {
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AxProperty {
    name: String,
    value: AxValue,
}

fn primitive_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn ax_value_string(value: &Option<AxValue>) -> String {
    value
        .as_ref()
        .and_then(|v| v.value.as_ref())
        .and_then(primitive_string)
        .unwrap_or_default()
}

/// Build a [`SnapshotData`] from the current page.
///
/// With `keep_existing_refs` unset the registry is cleared first; the ref
/// counter keeps running either way, so refs from the discarded capture
/// never come back. With it set, an element matching an already registered
/// identity keeps its ref, which is what lets a pre-action ref survive into
/// the post-action capture.
pub async fn take_snapshot(
    channel: &CdpChannel,
    registry: &mut RefRegistry,
    keep_existing_refs: bool,
) -> Result<SnapshotData> {
    if !keep_existing_refs {
        registry.clear();
    }

    let page = page_info(channel).await?;
    let mut elements = walk_ax_tree(channel, registry, keep_existing_refs).await?;

    if elements.is_empty() && body_has_elements(channel).await {
        tracing::debug!("accessibility tree yielded nothing, using the dom fallback");
        elements = dom_fallback(channel, registry, keep_existing_refs).await?;
    }

    Ok(SnapshotData { elements, page })
}

async fn page_info(channel: &CdpChannel) -> Result<PageInfo> {
    #[derive(Deserialize)]
    struct Raw {
        #[serde(default)]
        url: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        width: i64,
        #[serde(default)]
        height: i64,
    }

    let value = channel.evaluate(js::PAGE_INFO).await?;
    let raw: Raw = serde_json::from_value(value)?;
    Ok(PageInfo {
        url: raw.url,
        title: raw.title,
        viewport: Viewport {
            width: raw.width,
            height: raw.height,
        },
    })
}

async fn body_has_elements(channel: &CdpChannel) -> bool {
    channel
        .evaluate(js::BODY_HAS_ELEMENTS)
        .await
        .ok()
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Primary path: project the full accessibility tree onto the interactive
/// set.
async fn walk_ax_tree(
    channel: &CdpChannel,
    registry: &mut RefRegistry,
    keep_existing_refs: bool,
) -> Result<Vec<SnapshotElement>> {
    let tree = channel
        .send("Accessibility.getFullAXTree", json!({}))
        .await?;
    let nodes: Vec<AxNode> =
        serde_json::from_value(tree.get("nodes").cloned().unwrap_or_else(|| json!([])))?;

    let mut elements = Vec::new();
    for node in nodes {
        if node.ignored {
            continue;
        }
        let role = ax_value_string(&node.role);
        if !INTERACTIVE_ROLES.contains(&role.as_str()) {
            continue;
        }
        let Some(backend_node_id) = node.backend_dom_node_id else {
            continue;
        };

        // elements can vanish mid-walk on a live page; skip, don't abort
        let Ok(object_id) = resolver::resolve_object(channel, backend_node_id).await else {
            continue;
        };
        let dom_path = channel
            .call_function_on(&object_id, js::DOM_PATH, vec![])
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        channel.release_object(&object_id).await;

        let name = ax_value_string(&node.name);
        let properties: BTreeMap<String, String> = node
            .properties
            .iter()
            .filter_map(|p| {
                p.value
                    .value
                    .as_ref()
                    .and_then(primitive_string)
                    .map(|v| (p.name.clone(), v))
            })
            .collect();

        let r = assign_ref(
            registry,
            keep_existing_refs,
            Some(node.node_id.clone()),
            Some(backend_node_id),
            dom_path.clone(),
        );

        let line = compact_line(&r, &role, &name, &properties);
        elements.push(SnapshotElement {
            r#ref: r,
            ax_node_id: Some(node.node_id),
            dom_path,
            role,
            name,
            compact_line: line,
            properties,
        });
    }
    Ok(elements)
}

/// Fallback path: synthesize elements from a fixed selector union when the
/// accessibility tree reported nothing for a page that clearly has content.
async fn dom_fallback(
    channel: &CdpChannel,
    registry: &mut RefRegistry,
    keep_existing_refs: bool,
) -> Result<Vec<SnapshotElement>> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Described {
        #[serde(default)]
        tag: String,
        #[serde(default)]
        input_type: String,
        #[serde(default)]
        name: String,
    }

    let doc = channel.send("DOM.getDocument", json!({ "depth": 0 })).await?;
    let root_id = doc
        .get("root")
        .and_then(|n| n.get("nodeId"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let found = channel
        .send(
            "DOM.querySelectorAll",
            json!({ "nodeId": root_id, "selector": js::FALLBACK_SELECTOR }),
        )
        .await?;
    let node_ids: Vec<i64> = found
        .get("nodeIds")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default();

    let mut elements = Vec::new();
    for node_id in node_ids {
        let Ok(described) = channel
            .send("DOM.describeNode", json!({ "nodeId": node_id }))
            .await
        else {
            continue;
        };
        let Some(backend_node_id) = described
            .get("node")
            .and_then(|n| n.get("backendNodeId"))
            .and_then(Value::as_i64)
        else {
            continue;
        };
        let Ok(object_id) = resolver::resolve_object(channel, backend_node_id).await else {
            continue;
        };

        let info: Described = match channel
            .call_function_on(&object_id, js::FALLBACK_DESCRIBE, vec![])
            .await
            .and_then(|v| Ok(serde_json::from_value(v)?))
        {
            Ok(info) => info,
            Err(_) => {
                channel.release_object(&object_id).await;
                continue;
            }
        };
        let dom_path = channel
            .call_function_on(&object_id, js::DOM_PATH, vec![])
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        channel.release_object(&object_id).await;

        let role = infer_role(&info.tag, &info.input_type).to_string();
        let ax_node_id = resolver::fetch_ax_node_id(channel, backend_node_id).await;
        let properties = BTreeMap::new();

        let r = assign_ref(
            registry,
            keep_existing_refs,
            ax_node_id.clone(),
            Some(backend_node_id),
            dom_path.clone(),
        );

        let line = compact_line(&r, &role, &info.name, &properties);
        elements.push(SnapshotElement {
            r#ref: r,
            ax_node_id,
            dom_path,
            role,
            name: info.name,
            compact_line: line,
            properties,
        });
    }
    Ok(elements)
}

/// Tag-based role inference for fallback elements.
pub fn infer_role(tag: &str, input_type: &str) -> &'static str {
    match tag {
        "a" => "link",
        "input" => match input_type {
            "checkbox" => "checkbox",
            "radio" => "radio",
            _ => "textbox",
        },
        "textarea" => "textbox",
        "select" => "combobox",
        _ => "button",
    }
}

/// Mint a ref for an identity, or keep the one an earlier ref-preserving
/// capture assigned to the same node.
fn assign_ref(
    registry: &mut RefRegistry,
    keep_existing_refs: bool,
    ax_node_id: Option<String>,
    backend_node_id: Option<i64>,
    dom_path: String,
) -> String {
    if keep_existing_refs {
        if let Some(existing) =
            registry.find_existing(ax_node_id.as_deref(), backend_node_id, &dom_path)
        {
            if let Some(identity) = registry.get_mut(&existing) {
                identity.ax_node_id = ax_node_id;
                identity.backend_node_id = backend_node_id;
                identity.dom_path = dom_path;
                identity.stale = false;
            }
            return existing;
        }
    }
    registry.assign(NodeIdentity {
        ax_node_id,
        backend_node_id,
        dom_path,
        stale: false,
    })
}
