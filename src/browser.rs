use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::channel::CdpChannel;
use crate::error::{CdpError, Result};

/// These are passed to the browser binary by default.
static DEFAULT_ARGS: [&str; 24] = [
    "--disable-background-networking",
    "--enable-features=NetworkService,NetworkServiceInProcess",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-component-extensions-with-background-pages",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-features=TranslateUI",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-renderer-backgrounding",
    "--disable-sync",
    "--force-color-profile=srgb",
    "--metrics-recording-only",
    "--no-first-run",
    "--no-default-browser-check",
    "--enable-automation",
    "--password-store=basic",
    "--use-mock-keychain",
];

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);
const PAGE_DISCOVERY_ATTEMPTS: usize = 20;
const PAGE_DISCOVERY_DELAY: Duration = Duration::from_millis(250);

/// How the spawned browser is configured.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    executable: Option<PathBuf>,
    headless: bool,
    window_size: (u32, u32),
    user_data_dir: Option<PathBuf>,
    extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: false,
            window_size: (1280, 960),
            user_data_dir: None,
            extra_args: Vec::new(),
        }
    }
}

impl BrowserConfig {
    pub fn builder() -> BrowserConfigBuilder {
        BrowserConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct BrowserConfigBuilder {
    config: BrowserConfig,
}

impl BrowserConfigBuilder {
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.executable = Some(path.into());
        self
    }

    pub fn headless(mut self) -> Self {
        self.config.headless = true;
        self
    }

    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.config.window_size = (width, height);
        self
    }

    pub fn user_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.user_data_dir = Some(dir.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config.extra_args.push(arg.into());
        self
    }

    pub fn build(self) -> BrowserConfig {
        self.config
    }
}

/// A running browser this process is attached to, possibly one it spawned.
#[derive(Debug)]
pub struct Browser {
    child: Option<Child>,
    page_ws_url: String,
}

impl Browser {
    /// The websocket url of the driven page target.
    pub fn page_ws_url(&self) -> &str {
        &self.page_ws_url
    }

    /// Kill a launched browser and collect it. No-op when attached to an
    /// external browser.
    pub async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

/// Launch a browser, resolve its page target and connect the channel.
pub async fn launch(config: BrowserConfig) -> Result<(Browser, CdpChannel)> {
    let executable = match &config.executable {
        Some(path) => path.clone(),
        None => default_executable()?,
    };

    let mut cmd = Command::new(&executable);
    cmd.args(DEFAULT_ARGS)
        .arg("--remote-debugging-port=0")
        .arg(format!(
            "--window-size={},{}",
            config.window_size.0, config.window_size.1
        ));
    match &config.user_data_dir {
        Some(dir) => {
            cmd.arg(format!("--user-data-dir={}", dir.display()));
        }
        None => {
            // a fresh throwaway profile, not the operator's default one
            cmd.arg(format!(
                "--user-data-dir={}",
                std::env::temp_dir().join("browser-stream-profile").display()
            ));
        }
    }
    if config.headless {
        cmd.args(["--headless=new", "--hide-scrollbars", "--mute-audio"]);
    }
    cmd.args(&config.extra_args)
        .arg("about:blank")
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(executable = %executable.display(), "launching browser");
    let mut child = cmd.spawn()?;

    match init_with_child(&mut child).await {
        Ok((page_ws_url, channel)) => {
            let browser = Browser {
                child: Some(child),
                page_ws_url,
            };
            Ok((browser, channel))
        }
        Err(err) => {
            // clean the child up on every failed init path, no zombies
            if let Ok(Some(_)) = child.try_wait() {
                // already exited
            } else {
                let _ = child.kill().await;
            }
            Err(err)
        }
    }
}

async fn init_with_child(child: &mut Child) -> Result<(String, CdpChannel)> {
    let browser_ws_url = ws_url_from_output(child, LAUNCH_TIMEOUT).await?;
    let page_ws_url = page_ws_from_browser_ws(&browser_ws_url).await?;
    let channel = CdpChannel::connect(&page_ws_url).await?;
    Ok((page_ws_url, channel))
}

/// Attach to an already running browser.
///
/// Accepts the websocket url of a page target directly, the browser-level
/// websocket url, or an `http(s)` DevTools endpoint; the latter two go
/// through `/json/list` to find the first page target.
pub async fn attach(cdp_url: &str) -> Result<(Browser, CdpChannel)> {
    let page_ws_url = if cdp_url.starts_with("ws") {
        if cdp_url.contains("/devtools/page/") {
            cdp_url.to_string()
        } else {
            page_ws_from_browser_ws(cdp_url).await?
        }
    } else {
        let base = cdp_url.trim_end_matches('/');
        let base = base.strip_suffix("/json/version").unwrap_or(base);
        discover_page_ws(base).await?
    };

    let channel = CdpChannel::connect(&page_ws_url).await?;
    Ok((
        Browser {
            child: None,
            page_ws_url,
        },
        channel,
    ))
}

/// Resolve devtools websocket url from the browser process stderr.
///
/// Fails when the timeout elapses, the process exits, or its stderr ends
/// before a `DevTools listening on ws://…` line shows up.
async fn ws_url_from_output(child: &mut Child, timeout: Duration) -> Result<String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| CdpError::msg("browser stderr was not captured"))?;
    let mut lines = BufReader::new(stderr).lines();

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return Err(CdpError::LaunchTimeout),
            status = child.wait() => {
                return Err(match status {
                    Ok(status) => CdpError::LaunchExit(status),
                    Err(err) => CdpError::Io(err),
                });
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some((_, ws)) = line.rsplit_once("listening on ") {
                        if ws.starts_with("ws") {
                            return Ok(ws.trim().to_string());
                        }
                    }
                }
                Ok(None) => {
                    return Err(CdpError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "browser stderr ended before a websocket url appeared",
                    )))
                }
                Err(err) => return Err(CdpError::Io(err)),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TargetInfo {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    web_socket_debugger_url: String,
}

async fn page_ws_from_browser_ws(browser_ws_url: &str) -> Result<String> {
    let parsed = url::Url::parse(browser_ws_url)?;
    let host = parsed.host_str().unwrap_or("127.0.0.1");
    let port = parsed
        .port()
        .ok_or_else(|| CdpError::msg(format!("no port in websocket url {browser_ws_url:?}")))?;
    discover_page_ws(&format!("http://{host}:{port}")).await
}

/// Poll `/json/list` until a page target shows up. A freshly launched
/// browser can report its endpoint before the first tab is attachable.
async fn discover_page_ws(http_base: &str) -> Result<String> {
    let list_url = format!("{http_base}/json/list");
    let mut last_error = String::new();

    for _ in 0..PAGE_DISCOVERY_ATTEMPTS {
        match reqwest::get(&list_url).await {
            Ok(resp) => match resp.json::<Vec<TargetInfo>>().await {
                Ok(targets) => {
                    if let Some(page) = targets
                        .iter()
                        .find(|t| t.kind == "page" && !t.web_socket_debugger_url.is_empty())
                    {
                        return Ok(page.web_socket_debugger_url.clone());
                    }
                    last_error = "no page target listed".to_string();
                }
                Err(err) => last_error = format!("malformed target list: {err}"),
            },
            Err(err) => last_error = format!("devtools endpoint unreachable: {err}"),
        }
        tokio::time::sleep(PAGE_DISCOVERY_DELAY).await;
    }

    Err(CdpError::msg(format!(
        "could not find a page target at {list_url}: {last_error}"
    )))
}

/// Returns the path to the browser executable.
///
/// Checks the `CHROME` environment variable, then usual binary names on the
/// search path, then well-known installation paths.
pub fn default_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROME") {
        if Path::new(&path).exists() {
            return Ok(path.into());
        }
    }

    for name in [
        "chrome",
        "chrome-browser",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    let known_paths = [
        "/opt/chromium.org/chromium",
        "/opt/google/chrome/chrome",
        "/usr/bin/google-chrome",
    ];
    #[cfg(target_os = "macos")]
    let known_paths = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];
    #[cfg(windows)]
    let known_paths = [r"C:\Program Files\Google\Chrome\Application\chrome.exe"];

    for path in known_paths {
        if Path::new(path).exists() {
            return Ok(path.into());
        }
    }

    Err(CdpError::msg("could not auto detect a chrome executable"))
}
