use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use url::Url;

use crate::snapshot::{SnapshotData, SnapshotElement};
use crate::stability::NetworkEvent;

/// One observation about what an action changed on the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Consequence {
    Appeared {
        desc: String,
        r#ref: String,
    },
    Disappeared {
        desc: String,
        r#ref: String,
    },
    Changed {
        desc: String,
        r#ref: String,
    },
    Network {
        desc: String,
    },
    DomChurn {
        desc: String,
        #[serde(rename = "churnCount")]
        churn_count: u64,
    },
    LayoutShift {
        desc: String,
        cls: f64,
        #[serde(rename = "shiftCount")]
        shift_count: u64,
    },
}

impl Consequence {
    /// The ref of the element an appeared consequence points at, if any.
    pub fn appeared_ref(&self) -> Option<&str> {
        match self {
            Consequence::Appeared { r#ref, .. } => Some(r#ref),
            _ => None,
        }
    }
}

fn describe(element: &SnapshotElement) -> String {
    if element.name.is_empty() {
        element.role.clone()
    } else {
        format!("{} \"{}\"", element.role, element.name)
    }
}

/// Match the pre and post element sets and render the differences.
///
/// Matching is two-phase: by ax node id first, then by dom path among the
/// leftovers. Unmatched pre elements disappeared, unmatched post elements
/// appeared, matched pairs with differing name/role/properties changed.
/// Output order: appeared, disappeared, changed, network.
pub fn diff_snapshots(
    pre: &SnapshotData,
    post: &SnapshotData,
    network: &[NetworkEvent],
) -> Vec<Consequence> {
    let mut pre_matched = vec![false; pre.elements.len()];
    let mut post_matched = vec![false; post.elements.len()];
    let mut pairs: Vec<(usize, usize)> = Vec::new();

    // phase 1: by ax node id
    let mut pre_by_ax: HashMap<&str, usize> = HashMap::new();
    for (i, element) in pre.elements.iter().enumerate() {
        if let Some(ax) = element.ax_node_id.as_deref() {
            pre_by_ax.entry(ax).or_insert(i);
        }
    }
    for (j, element) in post.elements.iter().enumerate() {
        let Some(ax) = element.ax_node_id.as_deref() else {
            continue;
        };
        if let Some(&i) = pre_by_ax.get(ax) {
            if !pre_matched[i] {
                pre_matched[i] = true;
                post_matched[j] = true;
                pairs.push((i, j));
            }
        }
    }

    // phase 2: by dom path among the still-unmatched
    let mut pre_by_path: HashMap<&str, usize> = HashMap::new();
    for (i, element) in pre.elements.iter().enumerate() {
        if !pre_matched[i] && !element.dom_path.is_empty() {
            pre_by_path.entry(element.dom_path.as_str()).or_insert(i);
        }
    }
    let mut fallback_pairs = 0usize;
    for (j, element) in post.elements.iter().enumerate() {
        if post_matched[j] || element.dom_path.is_empty() {
            continue;
        }
        if let Some(&i) = pre_by_path.get(element.dom_path.as_str()) {
            if !pre_matched[i] {
                pre_matched[i] = true;
                post_matched[j] = true;
                pairs.push((i, j));
                fallback_pairs += 1;
            }
        }
    }
    if fallback_pairs > 0 {
        tracing::debug!(fallback_pairs, "matched elements through dom paths");
    }
    pairs.sort_by_key(|(_, j)| *j);

    let mut consequences = Vec::new();
    for (j, element) in post.elements.iter().enumerate() {
        if !post_matched[j] {
            consequences.push(Consequence::Appeared {
                desc: describe(element),
                r#ref: element.r#ref.clone(),
            });
        }
    }
    for (i, element) in pre.elements.iter().enumerate() {
        if !pre_matched[i] {
            consequences.push(Consequence::Disappeared {
                desc: describe(element),
                r#ref: element.r#ref.clone(),
            });
        }
    }
    for (i, j) in pairs {
        if let Some(changed) = changed_consequence(&pre.elements[i], &post.elements[j]) {
            consequences.push(changed);
        }
    }
    for event in network {
        consequences.push(network_consequence(event));
    }
    consequences
}

/// Render a matched pair's differences, if it has any.
fn changed_consequence(pre: &SnapshotElement, post: &SnapshotElement) -> Option<Consequence> {
    let mut segments = Vec::new();
    if pre.name != post.name {
        segments.push(format!("name: \"{}\" -> \"{}\"", pre.name, post.name));
    }
    if pre.role != post.role {
        segments.push(format!("role: \"{}\" -> \"{}\"", pre.role, post.role));
    }

    let keys: BTreeSet<&String> = pre.properties.keys().chain(post.properties.keys()).collect();
    for key in keys {
        let old = pre.properties.get(key).map(String::as_str).unwrap_or("");
        let new = post.properties.get(key).map(String::as_str).unwrap_or("");
        if old != new {
            segments.push(format!("{key}: \"{old}\" -> \"{new}\""));
        }
    }

    if segments.is_empty() {
        return None;
    }
    Some(Consequence::Changed {
        desc: segments.join(", "),
        r#ref: post.r#ref.clone(),
    })
}

/// `"{method} {pathname} -> {status|pending} ({duration}ms)"`, falling back
/// to the whole url when it does not parse.
pub fn network_consequence(event: &NetworkEvent) -> Consequence {
    let pathname = Url::parse(&event.url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| event.url.clone());
    let status = event
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "pending".to_string());
    Consequence::Network {
        desc: format!(
            "{} {} -> {} ({}ms)",
            event.method,
            pathname,
            status,
            event.duration_ms.unwrap_or(0)
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::snapshot::compact_line;

    fn element(
        r: &str,
        ax: Option<&str>,
        path: &str,
        role: &str,
        name: &str,
        properties: &[(&str, &str)],
    ) -> SnapshotElement {
        let properties: BTreeMap<String, String> = properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SnapshotElement {
            r#ref: r.to_string(),
            ax_node_id: ax.map(str::to_string),
            dom_path: path.to_string(),
            role: role.to_string(),
            name: name.to_string(),
            compact_line: compact_line(r, role, name, &properties),
            properties,
        }
    }

    fn snapshot(elements: Vec<SnapshotElement>) -> SnapshotData {
        SnapshotData {
            elements,
            page: Default::default(),
        }
    }

    #[test]
    fn appeared_disappeared_and_order() {
        let pre = snapshot(vec![
            element("@e1", Some("1"), "#a", "button", "Submit", &[]),
            element("@e2", Some("2"), "#b", "link", "Home", &[]),
        ]);
        let post = snapshot(vec![
            element("@e2", Some("2"), "#b", "link", "Home", &[]),
            element("@e3", Some("9"), "#c", "textbox", "Email", &[]),
        ]);

        let consequences = diff_snapshots(&pre, &post, &[]);
        assert_eq!(
            consequences,
            vec![
                Consequence::Appeared {
                    desc: "textbox \"Email\"".into(),
                    r#ref: "@e3".into()
                },
                Consequence::Disappeared {
                    desc: "button \"Submit\"".into(),
                    r#ref: "@e1".into()
                },
            ]
        );
    }

    #[test]
    fn dom_path_matches_when_ax_ids_rekeyed() {
        // same path, different ax id after a rerender: phase 2 pairs them
        let pre = snapshot(vec![element(
            "@e1",
            Some("10"),
            "#form > input:nth-of-type(1)",
            "textbox",
            "Name",
            &[],
        )]);
        let post = snapshot(vec![element(
            "@e1",
            Some("44"),
            "#form > input:nth-of-type(1)",
            "textbox",
            "Name",
            &[("value", "Alice")],
        )]);

        let consequences = diff_snapshots(&pre, &post, &[]);
        assert_eq!(
            consequences,
            vec![Consequence::Changed {
                desc: "value: \"\" -> \"Alice\"".into(),
                r#ref: "@e1".into()
            }]
        );
    }

    #[test]
    fn changed_lists_every_differing_segment() {
        let pre = snapshot(vec![element(
            "@e1",
            Some("1"),
            "#a",
            "button",
            "Show",
            &[("expanded", "false")],
        )]);
        let post = snapshot(vec![element(
            "@e1",
            Some("1"),
            "#a",
            "button",
            "Hide",
            &[("expanded", "true"), ("focused", "true")],
        )]);

        let consequences = diff_snapshots(&pre, &post, &[]);
        assert_eq!(consequences.len(), 1);
        match &consequences[0] {
            Consequence::Changed { desc, r#ref } => {
                assert_eq!(r#ref, "@e1");
                assert_eq!(
                    desc,
                    "name: \"Show\" -> \"Hide\", expanded: \"false\" -> \"true\", focused: \"\" -> \"true\""
                );
            }
            other => panic!("expected changed, got {other:?}"),
        }
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let pre = snapshot(vec![element("@e1", Some("1"), "#a", "button", "Go", &[])]);
        let post = snapshot(vec![element("@e1", Some("1"), "#a", "button", "Go", &[])]);
        assert!(diff_snapshots(&pre, &post, &[]).is_empty());
    }

    #[test]
    fn network_rendering_and_url_fallback() {
        let finished = NetworkEvent {
            request_id: "1".into(),
            method: "POST".into(),
            url: "https://api.example.com/v1/items?page=2".into(),
            started_at: 0.0,
            finished_at: Some(0.12),
            status: Some(200),
            duration_ms: Some(120),
        };
        assert_eq!(
            network_consequence(&finished),
            Consequence::Network {
                desc: "POST /v1/items -> 200 (120ms)".into()
            }
        );

        let pending = NetworkEvent {
            request_id: "2".into(),
            method: "GET".into(),
            url: "not a url".into(),
            started_at: 0.0,
            finished_at: None,
            status: None,
            duration_ms: None,
        };
        assert_eq!(
            network_consequence(&pending),
            Consequence::Network {
                desc: "GET not a url -> pending (0ms)".into()
            }
        );
    }

    #[test]
    fn consequence_order_is_fixed() {
        let pre = snapshot(vec![element("@e1", Some("1"), "#a", "button", "Old", &[])]);
        let post = snapshot(vec![
            element("@e1", Some("1"), "#a", "button", "New", &[]),
            element("@e9", Some("9"), "#b", "link", "Fresh", &[]),
        ]);
        let network = [NetworkEvent {
            request_id: "1".into(),
            method: "GET".into(),
            url: "https://x/api".into(),
            started_at: 0.0,
            finished_at: None,
            status: None,
            duration_ms: Some(10),
        }];

        let kinds: Vec<&'static str> = diff_snapshots(&pre, &post, &network)
            .iter()
            .map(|c| match c {
                Consequence::Appeared { .. } => "appeared",
                Consequence::Disappeared { .. } => "disappeared",
                Consequence::Changed { .. } => "changed",
                Consequence::Network { .. } => "network",
                Consequence::DomChurn { .. } => "dom-churn",
                Consequence::LayoutShift { .. } => "layout-shift",
            })
            .collect();
        assert_eq!(kinds, vec!["appeared", "changed", "network"]);
    }

    #[test]
    fn serializes_with_kind_tags() {
        let churn = Consequence::DomChurn {
            desc: "12 nodes removed and re-added".into(),
            churn_count: 12,
        };
        let json = serde_json::to_value(&churn).unwrap();
        assert_eq!(json["kind"], "dom-churn");
        assert_eq!(json["churnCount"], 12);

        let shift = Consequence::LayoutShift {
            desc: "layout shifted".into(),
            cls: 0.25,
            shift_count: 3,
        };
        let json = serde_json::to_value(&shift).unwrap();
        assert_eq!(json["kind"], "layout-shift");
        assert_eq!(json["cls"], 0.25);
        assert_eq!(json["shiftCount"], 3);

        let appeared = Consequence::Appeared {
            desc: "button \"Ok\"".into(),
            r#ref: "@e7".into(),
        };
        let json = serde_json::to_value(&appeared).unwrap();
        assert_eq!(json["kind"], "appeared");
        assert_eq!(json["ref"], "@e7");
    }
}
