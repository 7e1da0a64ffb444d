use std::collections::BTreeMap;

use browser_stream::diff::{diff_snapshots, Consequence};
use browser_stream::snapshot::{compact_line, PageInfo, SnapshotData, SnapshotElement};
use browser_stream::stability::NetworkEvent;

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
        compact_line: compact_line(r, role, name, &properties),
        r#ref: r.to_string(),
        ax_node_id: ax.map(str::to_string),
        dom_path: path.to_string(),
        role: role.to_string(),
        name: name.to_string(),
        properties,
    }
}

fn snapshot(elements: Vec<SnapshotElement>) -> SnapshotData {
    SnapshotData {
        elements,
        page: PageInfo::default(),
    }
}

fn xhr(method: &str, url: &str, status: Option<i64>, duration_ms: Option<u64>) -> NetworkEvent {
    NetworkEvent {
        request_id: "r".into(),
        method: method.to_string(),
        url: url.to_string(),
        started_at: 0.0,
        finished_at: duration_ms.map(|d| d as f64 / 1000.0),
        status,
        duration_ms,
    }
}

#[test]
fn submit_that_hides_the_form_reports_the_disappearance() {
    // scenario: a fixture hides its form on submit
    let pre = snapshot(vec![
        element("@e1", Some("4"), "#form > input:nth-of-type(1)", "textbox", "Name", &[]),
        element("@e2", Some("5"), "#form > button:nth-of-type(1)", "button", "Submit", &[]),
        element("@e3", Some("6"), "body > a:nth-of-type(1)", "link", "More info", &[]),
    ]);
    let post = snapshot(vec![element(
        "@e3",
        Some("6"),
        "body > a:nth-of-type(1)",
        "link",
        "More info",
        &[],
    )]);

    let consequences = diff_snapshots(&pre, &post, &[]);
    assert_eq!(consequences.len(), 2);
    let disappeared: Vec<&str> = consequences
        .iter()
        .filter_map(|c| match c {
            Consequence::Disappeared { desc, .. } => Some(desc.as_str()),
            _ => None,
        })
        .collect();
    assert!(disappeared.iter().any(|d| d.contains("Submit")));
    assert!(disappeared.iter().any(|d| d.contains("Name")));
}

#[test]
fn fill_shows_up_as_a_value_change() {
    let pre = snapshot(vec![element(
        "@e1",
        Some("4"),
        "#form > input:nth-of-type(1)",
        "textbox",
        "Name",
        &[],
    )]);
    let post = snapshot(vec![element(
        "@e1",
        Some("4"),
        "#form > input:nth-of-type(1)",
        "textbox",
        "Name",
        &[("value", "Alice"), ("focused", "true")],
    )]);

    let consequences = diff_snapshots(&pre, &post, &[]);
    assert_eq!(consequences.len(), 1);
    match &consequences[0] {
        Consequence::Changed { desc, r#ref } => {
            assert_eq!(r#ref, "@e1");
            assert!(desc.contains("value: \"\" -> \"Alice\""));
            assert!(desc.contains("focused: \"\" -> \"true\""));
        }
        other => panic!("expected a change, got {other:?}"),
    }
}

#[test]
fn matched_elements_keep_their_pre_action_refs() {
    // the post capture reuses @e1 for the ax-matched element; the differ
    // then has nothing to report for it
    let pre = snapshot(vec![element("@e1", Some("4"), "#a", "button", "Go", &[])]);
    let post = snapshot(vec![
        element("@e1", Some("4"), "#a", "button", "Go", &[]),
        element("@e7", Some("9"), "#b", "button", "Undo", &[]),
    ]);

    let consequences = diff_snapshots(&pre, &post, &[]);
    assert_eq!(
        consequences,
        vec![Consequence::Appeared {
            desc: "button \"Undo\"".into(),
            r#ref: "@e7".into(),
        }]
    );
}

#[test]
fn network_consequences_come_last_and_render_status() {
    let pre = snapshot(vec![]);
    let post = snapshot(vec![element("@e1", Some("1"), "#n", "link", "Next", &[])]);
    let network = vec![
        xhr("POST", "https://api.example.com/submit", Some(204), Some(88)),
        xhr("GET", "https://api.example.com/poll", None, None),
    ];

    let consequences = diff_snapshots(&pre, &post, &network);
    assert_eq!(consequences.len(), 3);
    assert!(matches!(consequences[0], Consequence::Appeared { .. }));
    assert_eq!(
        consequences[1],
        Consequence::Network {
            desc: "POST /submit -> 204 (88ms)".into()
        }
    );
    assert_eq!(
        consequences[2],
        Consequence::Network {
            desc: "GET /poll -> pending (0ms)".into()
        }
    );
}

#[test]
fn rekeyed_ax_ids_fall_back_to_dom_paths_without_phantom_pairs() {
    // two inputs swap ax ids after a framework re-render; dom paths keep
    // the pairing honest
    let pre = snapshot(vec![
        element("@e1", Some("10"), "#f > input:nth-of-type(1)", "textbox", "First", &[]),
        element("@e2", Some("11"), "#f > input:nth-of-type(2)", "textbox", "Last", &[]),
    ]);
    let post = snapshot(vec![
        element("@e1", Some("20"), "#f > input:nth-of-type(1)", "textbox", "First", &[]),
        element("@e2", Some("21"), "#f > input:nth-of-type(2)", "textbox", "Last", &[]),
    ]);

    assert!(diff_snapshots(&pre, &post, &[]).is_empty());
}

#[test]
fn an_unmatched_pre_element_is_not_paired_twice() {
    // two post elements share the pre element's dom path; only one pairs
    let pre = snapshot(vec![element("@e1", None, "#list > li:nth-of-type(1)", "button", "A", &[])]);
    let post = snapshot(vec![
        element("@e2", None, "#list > li:nth-of-type(1)", "button", "A", &[]),
        element("@e3", None, "#list > li:nth-of-type(1)", "button", "A", &[]),
    ]);

    let consequences = diff_snapshots(&pre, &post, &[]);
    let appeared = consequences
        .iter()
        .filter(|c| matches!(c, Consequence::Appeared { .. }))
        .count();
    let disappeared = consequences
        .iter()
        .filter(|c| matches!(c, Consequence::Disappeared { .. }))
        .count();
    assert_eq!(appeared, 1);
    assert_eq!(disappeared, 0);
}
