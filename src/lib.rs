//! Drive one Chromium tab over the [Chrome DevTools Protocol](https://chromedevtools.github.io/devtools-protocol/)
//! and report, for every action, what changed on the page as a consequence.
//!
//! Every interactive element is addressed by a session-stable `@eN` ref.
//! A mutating tool call (click, fill, press-key, scroll) captures the
//! interactive element set before acting, waits for the page to settle,
//! captures again, and diffs the two captures into a consequence list:
//! which elements appeared, disappeared or changed state, which Fetch/XHR
//! requests fired, whether the DOM churned or the layout shifted.
//!
//! # Example
//! ```no_run
//! use browser_stream::{browser, PageSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (_handle, channel) = browser::launch(Default::default()).await?;
//!     let mut session = PageSession::attach(channel).await?;
//!
//!     let snapshot = session.navigate("https://en.wikipedia.org").await;
//!     println!("{}", serde_json::to_string_pretty(&snapshot)?);
//!
//!     // refs come from the snapshot's compact lines, e.g. `@e3 searchbox`
//!     let result = session.fill("@e3", "Rust programming language").await;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod browser;
pub mod channel;
pub mod conn;
pub mod diff;
pub mod error;
pub mod interact;
pub mod js;
pub mod keys;
pub mod layout;
pub mod protocol;
pub mod refs;
pub mod resolver;
pub mod results;
pub mod session;
pub mod snapshot;
pub mod stability;
pub mod tools;

pub use crate::browser::{attach, launch, Browser, BrowserConfig};
pub use crate::channel::CdpChannel;
pub use crate::error::{CdpError, ErrorCode, Result};
pub use crate::results::{ActionResult, SnapshotResult};
pub use crate::session::PageSession;
pub use crate::tools::ToolCall;
