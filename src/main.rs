use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use browser_stream::session::PageSession;
use browser_stream::tools::{self, ToolCall};
use browser_stream::{browser, BrowserConfig};

/// Drive a Chromium tab over the DevTools protocol: one json tool call per
/// stdin line, one result envelope per stdout line.
#[derive(Debug, Parser)]
#[command(name = "browser-stream", version, about)]
struct Cli {
    /// Attach to an existing browser (ws:// target url or http devtools
    /// endpoint) instead of launching one.
    #[arg(long)]
    cdp_url: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!("fatal: {err}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> browser_stream::Result<()> {
    let (mut handle, channel) = match &cli.cdp_url {
        Some(url) => browser::attach(url).await?,
        None => browser::launch(BrowserConfig::default()).await?,
    };
    tracing::info!(page = handle.page_ws_url(), "attached to browser");

    let mut session = PageSession::attach(channel).await?;
    serve(&mut session).await;

    session.channel().close();
    handle.kill().await;
    Ok(())
}

/// Serialized tool loop: calls are answered one at a time, in order.
async fn serve(session: &mut PageSession) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let payload = match serde_json::from_str::<ToolCall>(line) {
                        Ok(call) => tools::dispatch(session, call).await,
                        Err(err) => serde_json::json!({
                            "ok": false,
                            "errors": [{
                                "code": "ACTION_FAILED",
                                "message": format!("unparseable tool call: {err}"),
                            }],
                        })
                        .to_string(),
                    };
                    if stdout.write_all(payload.as_bytes()).await.is_err()
                        || stdout.write_all(b"\n").await.is_err()
                    {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!("stdin read failed: {err}");
                    break;
                }
            }
        }
    }
}
