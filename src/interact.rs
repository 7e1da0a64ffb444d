use serde_json::{json, Value};

use crate::channel::CdpChannel;
use crate::error::{CdpError, Result};
use crate::layout::{ElementQuad, Point};
use crate::refs::RefRegistry;
use crate::resolver::{self, resolve_ref, ResolvedBy};

/// A ref resolved all the way to a clickable viewport coordinate.
#[derive(Debug, Clone)]
pub struct Interactable {
    pub object_id: String,
    pub x: f64,
    pub y: f64,
    pub resolved_by: ResolvedBy,
}

/// Fetch the box model of a backend node. `None` means the element is
/// hidden or has no size; the browser answers that case with an error
/// payload, not an empty model.
pub async fn box_model(channel: &CdpChannel, backend_node_id: i64) -> Result<Option<ElementQuad>> {
    match channel
        .send("DOM.getBoxModel", json!({ "backendNodeId": backend_node_id }))
        .await
    {
        Ok(resp) => {
            let content = resp
                .get("model")
                .and_then(|m| m.get("content"))
                .cloned()
                .unwrap_or(Value::Null);
            Ok(ElementQuad::from_json(&content).ok())
        }
        Err(CdpError::Chrome(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

async fn visual_viewport(channel: &CdpChannel) -> Result<(f64, f64)> {
    let metrics = channel.send("Page.getLayoutMetrics", json!({})).await?;
    let viewport = metrics.get("visualViewport").cloned().unwrap_or(Value::Null);
    let width = viewport
        .get("clientWidth")
        .and_then(Value::as_f64)
        .unwrap_or_default();
    let height = viewport
        .get("clientHeight")
        .and_then(Value::as_f64)
        .unwrap_or_default();
    Ok((width, height))
}

fn in_viewport(center: Point, width: f64, height: f64) -> bool {
    center.x >= 0.0 && center.x <= width && center.y >= 0.0 && center.y <= height
}

/// Resolve a ref to the viewport coordinate a pointer action should target.
///
/// A missing box model means hidden or zero-size. A centroid outside the
/// visual viewport triggers one `scrollIntoViewIfNeeded` and a re-measure;
/// if the element still has no box it is not interactable.
pub async fn interactable_point(
    channel: &CdpChannel,
    registry: &mut RefRegistry,
    r: &str,
) -> Result<Interactable> {
    let resolved = resolve_ref(channel, registry, r).await?;
    let object_id = match resolved.object_id {
        Some(id) => id,
        None => resolver::resolve_object(channel, resolved.backend_node_id)
            .await
            .map_err(|_| not_interactable(r, "element has no page object"))?,
    };

    let quad = box_model(channel, resolved.backend_node_id)
        .await?
        .ok_or_else(|| not_interactable(r, "element is hidden or has zero size"))?;
    let mut center = quad.quad_center();

    let (width, height) = visual_viewport(channel).await?;
    if !in_viewport(center, width, height) {
        let _ = channel
            .send(
                "DOM.scrollIntoViewIfNeeded",
                json!({ "backendNodeId": resolved.backend_node_id }),
            )
            .await;
        let quad = box_model(channel, resolved.backend_node_id)
            .await?
            .ok_or_else(|| not_interactable(r, "element stayed outside the viewport"))?;
        center = quad.quad_center();
    }

    Ok(Interactable {
        object_id,
        x: center.x,
        y: center.y,
        resolved_by: resolved.resolved_by,
    })
}

fn not_interactable(r: &str, reason: &str) -> CdpError {
    CdpError::NotInteractable(format!("{r}: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_containment() {
        assert!(in_viewport(Point::new(0.0, 0.0), 100.0, 100.0));
        assert!(in_viewport(Point::new(100.0, 100.0), 100.0, 100.0));
        assert!(!in_viewport(Point::new(-1.0, 50.0), 100.0, 100.0));
        assert!(!in_viewport(Point::new(50.0, 101.0), 100.0, 100.0));
    }
}
