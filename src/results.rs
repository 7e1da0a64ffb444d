use serde::Serialize;

use crate::diff::Consequence;
use crate::error::ErrorDetail;
use crate::snapshot::{PageInfo, SnapshotData};

/// Envelope schema version. Bumped only on breaking shape changes.
pub const RESULT_VERSION: u32 = 1;

/// What a mutating tool call returns.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub version: u32,
    pub action: String,
    pub ok: bool,
    pub page: PageInfo,
    pub consequences: Vec<Consequence>,
    pub new_interactive_elements: Vec<String>,
    pub errors: Vec<ErrorDetail>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    pub timing_ms: u64,
}

impl ActionResult {
    pub fn failure(action: impl Into<String>, error: ErrorDetail, timing_ms: u64) -> Self {
        Self {
            version: RESULT_VERSION,
            action: action.into(),
            ok: false,
            page: PageInfo::default(),
            consequences: Vec::new(),
            new_interactive_elements: Vec::new(),
            errors: vec![error],
            warnings: Vec::new(),
            resolved_by: None,
            timing_ms,
        }
    }
}

/// What an observation tool call returns.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResult {
    pub version: u32,
    pub ok: bool,
    pub page: PageInfo,
    /// Compact lines, one per interactive element, in document order.
    pub elements: Vec<String>,
    pub errors: Vec<ErrorDetail>,
    pub timing_ms: u64,
}

impl SnapshotResult {
    pub fn failure(error: ErrorDetail, timing_ms: u64) -> Self {
        Self {
            version: RESULT_VERSION,
            ok: false,
            page: PageInfo::default(),
            elements: Vec::new(),
            errors: vec![error],
            timing_ms,
        }
    }
}

/// Encode a capture into its result envelope. The element strings are
/// exactly the captured compact lines.
pub fn snapshot_data_to_result(data: &SnapshotData, timing_ms: u64) -> SnapshotResult {
    SnapshotResult {
        version: RESULT_VERSION,
        ok: true,
        page: data.page.clone(),
        elements: data.elements.iter().map(|e| e.compact_line.clone()).collect(),
        errors: Vec::new(),
        timing_ms,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::error::ErrorCode;
    use crate::snapshot::{compact_line, SnapshotElement};

    #[test]
    fn snapshot_encoding_is_the_compact_lines() {
        let properties = BTreeMap::new();
        let elements: Vec<SnapshotElement> = ["button", "link"]
            .iter()
            .enumerate()
            .map(|(i, role)| {
                let r = format!("@e{}", i + 1);
                SnapshotElement {
                    compact_line: compact_line(&r, role, "x", &properties),
                    r#ref: r,
                    ax_node_id: None,
                    dom_path: String::new(),
                    role: role.to_string(),
                    name: "x".into(),
                    properties: properties.clone(),
                }
            })
            .collect();
        let data = SnapshotData {
            elements,
            page: PageInfo::default(),
        };

        let result = snapshot_data_to_result(&data, 5);
        assert!(result.ok);
        assert_eq!(
            result.elements,
            data.elements
                .iter()
                .map(|e| e.compact_line.clone())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn envelopes_serialize_camel_case() {
        let result = ActionResult::failure(
            "click @e9",
            ErrorDetail::new(ErrorCode::NoSuchRef, "no element is registered under @e9"),
            12,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["ok"], false);
        assert_eq!(json["action"], "click @e9");
        assert_eq!(json["errors"][0]["code"], "NO_SUCH_REF");
        assert_eq!(json["timingMs"], 12);
        assert!(json["newInteractiveElements"].as_array().unwrap().is_empty());
        assert!(json.get("resolvedBy").is_none());
        assert_eq!(json["page"]["viewport"]["width"], 0);

        let snap = SnapshotResult::failure(
            ErrorDetail::new(ErrorCode::WaitTimeout, "conditions not met"),
            7,
        );
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["errors"][0]["code"], "WAIT_TIMEOUT");
        assert_eq!(json["timingMs"], 7);
    }
}
