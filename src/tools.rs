use serde::Deserialize;
use serde_json::json;

use crate::session::{PageSession, ScrollAmount, ScrollDirection, WaitForParams};

/// The seven supported tool calls, tagged by tool name.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    BrowserNavigate {
        url: String,
    },
    BrowserSnapshot {},
    BrowserClick {
        r#ref: String,
    },
    BrowserFill {
        r#ref: String,
        value: String,
    },
    BrowserPressKey {
        key: String,
    },
    BrowserScroll {
        #[serde(default)]
        r#ref: Option<String>,
        direction: ScrollDirection,
        #[serde(default)]
        amount: Option<ScrollAmount>,
    },
    BrowserWaitFor {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        r#ref: Option<String>,
        #[serde(default)]
        timeout: Option<u64>,
    },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::BrowserNavigate { .. } => "browser_navigate",
            ToolCall::BrowserSnapshot {} => "browser_snapshot",
            ToolCall::BrowserClick { .. } => "browser_click",
            ToolCall::BrowserFill { .. } => "browser_fill",
            ToolCall::BrowserPressKey { .. } => "browser_press_key",
            ToolCall::BrowserScroll { .. } => "browser_scroll",
            ToolCall::BrowserWaitFor { .. } => "browser_wait_for",
        }
    }
}

/// Run one tool call against the session and encode its envelope. Always
/// yields a json payload; serialization of an envelope cannot fail, but the
/// fallback keeps that promise absolute.
pub async fn dispatch(session: &mut PageSession, call: ToolCall) -> String {
    match call {
        ToolCall::BrowserNavigate { url } => to_json(&session.navigate(&url).await),
        ToolCall::BrowserSnapshot {} => to_json(&session.snapshot().await),
        ToolCall::BrowserClick { r#ref } => to_json(&session.click(&r#ref).await),
        ToolCall::BrowserFill { r#ref, value } => to_json(&session.fill(&r#ref, &value).await),
        ToolCall::BrowserPressKey { key } => to_json(&session.press_key(&key).await),
        ToolCall::BrowserScroll {
            r#ref,
            direction,
            amount,
        } => to_json(
            &session
                .scroll(crate::session::ScrollParams {
                    r#ref,
                    direction,
                    amount,
                })
                .await,
        ),
        ToolCall::BrowserWaitFor {
            text,
            r#ref,
            timeout,
        } => to_json(
            &session
                .wait_for(WaitForParams {
                    text,
                    r#ref,
                    timeout,
                })
                .await,
        ),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| {
        json!({
            "ok": false,
            "errors": [{ "code": "ACTION_FAILED", "message": format!("encoding failed: {err}") }],
        })
        .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NamedAmount;

    #[test]
    fn parses_every_tool() {
        let call: ToolCall = serde_json::from_str(
            r#"{"tool":"browser_navigate","url":"http://localhost:8000/"}"#,
        )
        .unwrap();
        assert_eq!(call.name(), "browser_navigate");

        let call: ToolCall = serde_json::from_str(r#"{"tool":"browser_snapshot"}"#).unwrap();
        assert_eq!(call.name(), "browser_snapshot");

        let call: ToolCall =
            serde_json::from_str(r#"{"tool":"browser_click","ref":"@e3"}"#).unwrap();
        match &call {
            ToolCall::BrowserClick { r#ref } => assert_eq!(r#ref, "@e3"),
            other => panic!("unexpected parse: {other:?}"),
        }

        let call: ToolCall =
            serde_json::from_str(r#"{"tool":"browser_fill","ref":"@e3","value":"Alice"}"#).unwrap();
        assert_eq!(call.name(), "browser_fill");

        let call: ToolCall =
            serde_json::from_str(r#"{"tool":"browser_press_key","key":"Control+a"}"#).unwrap();
        assert_eq!(call.name(), "browser_press_key");

        let call: ToolCall = serde_json::from_str(
            r#"{"tool":"browser_scroll","ref":"@e8","direction":"down","amount":"to-bottom"}"#,
        )
        .unwrap();
        match &call {
            ToolCall::BrowserScroll { amount, .. } => {
                assert_eq!(*amount, Some(ScrollAmount::Named(NamedAmount::ToBottom)))
            }
            other => panic!("unexpected parse: {other:?}"),
        }

        let call: ToolCall = serde_json::from_str(
            r#"{"tool":"browser_scroll","direction":"up","amount":300}"#,
        )
        .unwrap();
        match &call {
            ToolCall::BrowserScroll { r#ref, amount, .. } => {
                assert!(r#ref.is_none());
                assert_eq!(*amount, Some(ScrollAmount::Pixels(300.0)));
            }
            other => panic!("unexpected parse: {other:?}"),
        }

        let call: ToolCall = serde_json::from_str(
            r#"{"tool":"browser_wait_for","text":"Continue","timeout":5000}"#,
        )
        .unwrap();
        assert_eq!(call.name(), "browser_wait_for");
    }

    #[test]
    fn rejects_unknown_tools_and_missing_fields() {
        assert!(serde_json::from_str::<ToolCall>(r#"{"tool":"browser_explode"}"#).is_err());
        assert!(serde_json::from_str::<ToolCall>(r#"{"tool":"browser_click"}"#).is_err());
        assert!(
            serde_json::from_str::<ToolCall>(r#"{"tool":"browser_scroll","direction":"left"}"#)
                .is_err()
        );
    }
}
