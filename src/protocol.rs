use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The whole string identifier of a protocol method like `DOM.resolveNode`.
pub type MethodId = Cow<'static, str>;

/// Identifier for a request sent to the browser.
///
/// All outgoing [`MethodCall`]s must carry a unique identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(usize);

impl CallId {
    /// Create a new id
    pub fn new(id: usize) -> Self {
        CallId(id)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({})", self.0)
    }
}

/// A request sent by the client, identified by the `id`
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct MethodCall {
    /// Identifier for this method call, unique per connection
    pub id: CallId,
    /// The method identifier
    pub method: MethodId,
    /// The payload of the request
    pub params: serde_json::Value,
}

/// A response to a [`MethodCall`] from the browser
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Response {
    /// Numeric identifier of the exact request this answers
    pub id: CallId,
    /// The response payload
    pub result: Option<serde_json::Value>,
    /// The reason why the [`MethodCall`] failed
    pub error: Option<RemoteError>,
}

/// An event emitted by the browser, with its `params` left as json
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EventMessage {
    /// Name of the method
    pub method: MethodId,
    /// Json payload of the event
    #[serde(default)]
    pub params: serde_json::Value,
}

/// An incoming message read from the websocket: either a response to a
/// previously submitted request, identified by `id`, or an event emitted by
/// the browser.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// A response for a request
    Response(Response),
    /// An emitted event
    Event(EventMessage),
}

/// The error type emitted by the browser for failed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_shapes() {
        let resp: Message =
            serde_json::from_str(r#"{"id":3,"result":{"ok":true}}"#).unwrap();
        assert!(matches!(resp, Message::Response(_)));

        let err: Message = serde_json::from_str(
            r#"{"id":4,"error":{"code":-32000,"message":"No node with given id found"}}"#,
        )
        .unwrap();
        match err {
            Message::Response(r) => {
                assert_eq!(r.error.unwrap().code, -32000);
                assert!(r.result.is_none());
            }
            Message::Event(_) => panic!("expected a response"),
        }

        let ev: Message = serde_json::from_str(
            r#"{"method":"DOM.childNodeInserted","params":{"parentNodeId":7}}"#,
        )
        .unwrap();
        match ev {
            Message::Event(e) => assert_eq!(e.method, "DOM.childNodeInserted"),
            Message::Response(_) => panic!("expected an event"),
        }
    }
}
