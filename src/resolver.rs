use serde_json::{json, Value};

use crate::channel::CdpChannel;
use crate::error::{CdpError, Result};
use crate::refs::RefRegistry;

/// Which tier of the lookup ladder produced the backend node id. Surfaced in
/// action results so callers can spot selector-fallback resolutions, which
/// tend to correlate with flaky pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    BackendNodeId,
    DomPath,
}

impl ResolvedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedBy::BackendNodeId => "backendNodeId",
            ResolvedBy::DomPath => "domPath",
        }
    }
}

/// A ref resolved to a live backend node.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub backend_node_id: i64,
    /// Remote object handle, present when the winning tier went through
    /// `DOM.resolveNode`.
    pub object_id: Option<String>,
    pub resolved_by: ResolvedBy,
}

/// Three-tier lookup from a ref to the current backend node id.
///
/// 1. unknown ref -> `NO_SUCH_REF`
/// 2. `DOM.resolveNode(backendNodeId)` -> done
/// 3. re-locate via the stored dom path, write the fresh backend node id
///    (and best-effort ax id) back into the registry
///
/// Anything else is `REF_STALE`.
pub async fn resolve_ref(
    channel: &CdpChannel,
    registry: &mut RefRegistry,
    r: &str,
) -> Result<Resolved> {
    let identity = registry
        .get(r)
        .cloned()
        .ok_or_else(|| CdpError::NoSuchRef(r.to_string()))?;

    if let Some(backend_node_id) = identity.backend_node_id {
        if !identity.stale {
            if let Ok(resp) = channel
                .send(
                    "DOM.resolveNode",
                    json!({ "backendNodeId": backend_node_id }),
                )
                .await
            {
                if let Some(object_id) = resp
                    .get("object")
                    .and_then(|o| o.get("objectId"))
                    .and_then(Value::as_str)
                {
                    return Ok(Resolved {
                        backend_node_id,
                        object_id: Some(object_id.to_string()),
                        resolved_by: ResolvedBy::BackendNodeId,
                    });
                }
            }
        }
    }

    if identity.dom_path.is_empty() {
        return Err(CdpError::RefStale(r.to_string()));
    }
    resolve_by_dom_path(channel, registry, r, &identity.dom_path).await
}

async fn resolve_by_dom_path(
    channel: &CdpChannel,
    registry: &mut RefRegistry,
    r: &str,
    dom_path: &str,
) -> Result<Resolved> {
    let stale = || CdpError::RefStale(r.to_string());

    let doc = channel
        .send("DOM.getDocument", json!({ "depth": 0 }))
        .await
        .map_err(|_| stale())?;
    let root_id = doc
        .get("root")
        .and_then(|n| n.get("nodeId"))
        .and_then(Value::as_i64)
        .ok_or_else(stale)?;

    let found = channel
        .send(
            "DOM.querySelector",
            json!({ "nodeId": root_id, "selector": dom_path }),
        )
        .await
        .map_err(|_| stale())?;
    let node_id = found
        .get("nodeId")
        .and_then(Value::as_i64)
        .filter(|id| *id != 0)
        .ok_or_else(stale)?;

    let described = channel
        .send("DOM.describeNode", json!({ "nodeId": node_id }))
        .await
        .map_err(|_| stale())?;
    let backend_node_id = described
        .get("node")
        .and_then(|n| n.get("backendNodeId"))
        .and_then(Value::as_i64)
        .ok_or_else(stale)?;

    // best effort: re-key the accessibility id to the relocated node. A
    // failed lookup clears it, a stale ax id must not survive the re-key.
    let ax_node_id = fetch_ax_node_id(channel, backend_node_id).await;

    if let Some(identity) = registry.get_mut(r) {
        identity.backend_node_id = Some(backend_node_id);
        identity.ax_node_id = ax_node_id;
        identity.stale = false;
    }

    Ok(Resolved {
        backend_node_id,
        object_id: None,
        resolved_by: ResolvedBy::DomPath,
    })
}

/// Obtain a remote object handle for a backend node. The caller releases it.
pub async fn resolve_object(channel: &CdpChannel, backend_node_id: i64) -> Result<String> {
    let resp = channel
        .send(
            "DOM.resolveNode",
            json!({ "backendNodeId": backend_node_id }),
        )
        .await?;
    resp.get("object")
        .and_then(|o| o.get("objectId"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CdpError::msg(format!("no object for backend node {backend_node_id}")))
}

/// Look up the ax node id of a backend node, if the accessibility tree has
/// one for it.
pub async fn fetch_ax_node_id(channel: &CdpChannel, backend_node_id: i64) -> Option<String> {
    let resp = channel
        .send(
            "Accessibility.getPartialAXTree",
            json!({ "backendNodeId": backend_node_id, "fetchRelatives": false }),
        )
        .await
        .ok()?;
    resp.get("nodes")
        .and_then(Value::as_array)
        .and_then(|nodes| nodes.first())
        .and_then(|n| n.get("nodeId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
