//! Chrome DevTools Protocol backend (uses the `headless_chrome` crate)

use crate::acquire::{LocalLaunch, RemoteEndpoint, LOCAL_SANDBOX_ARGS};
use crate::{BrowserSession, Error, ImageSettle, Launcher, PageHandle, PdfLayout, Result, Viewport};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::types::Method;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use serde::Serialize;
use std::ffi::OsStr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How often `document.readyState` is polled while waiting for the DOM
const READY_STATE_POLL: Duration = Duration::from_millis(50);

/// How long a timed-out navigation is given to stop loading
const STOP_LOADING_GRACE: Duration = Duration::from_secs(2);

/// Resolves once every image in the document has loaded or failed, or when the
/// timeout fires first. Yields a JSON string describing the outcome.
const SETTLE_IMAGES_TEMPLATE: &str = r#"(async function(){
    const images = Array.from(document.images);
    const loading = images.filter(function(img){ return !img.complete; });
    const settled = Promise.all(loading.map(function(img){
        return new Promise(function(resolve){
            img.addEventListener('load', resolve, { once: true });
            img.addEventListener('error', resolve, { once: true });
        });
    }));
    const timedOut = await Promise.race([
        settled.then(function(){ return false; }),
        new Promise(function(resolve){ setTimeout(function(){ resolve(true); }, {{TIMEOUT_MS}}); })
    ]);
    const pending = images.filter(function(img){ return !img.complete; }).length;
    return JSON.stringify({ total: images.length, pending: pending, timedOut: timedOut });
})()"#;

/// `Emulation.setDeviceMetricsOverride` with only the required fields
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetDeviceMetricsOverride {
    width: u32,
    height: u32,
    device_scale_factor: f64,
    mobile: bool,
}

impl Method for SetDeviceMetricsOverride {
    const NAME: &'static str = "Emulation.setDeviceMetricsOverride";
    type ReturnObject = serde_json::Value;
}

impl From<Viewport> for SetDeviceMetricsOverride {
    fn from(viewport: Viewport) -> Self {
        Self {
            width: viewport.width,
            height: viewport.height,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

/// Run `call` on a helper thread and stop waiting for it at `deadline`.
///
/// Protocol calls only give up after the connection's idle timeout, which is
/// far longer than a navigation may take. On expiry the helper thread is left
/// to finish on its own.
fn call_before<T, F>(deadline: Instant, call: F) -> std::result::Result<T, RecvTimeoutError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(call());
    });
    rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
}

/// Launches or connects to Chrome
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeLauncher;

impl Launcher for ChromeLauncher {
    type Session = ChromeSession;

    fn connect_remote(
        &self,
        endpoint: &RemoteEndpoint,
        protocol_timeout: Duration,
    ) -> Result<ChromeSession> {
        // The transport cannot set handshake headers, so the credential rides in the URL
        let browser =
            Browser::connect_with_timeout(endpoint.ws_url().to_string(), protocol_timeout)
                .map_err(|e| Error::Cdp(format!("Failed to connect to {}: {}", endpoint, e)))?;

        Ok(ChromeSession { browser })
    }

    fn launch_local(&self, options: &LocalLaunch) -> Result<ChromeSession> {
        let args: Vec<&OsStr> = LOCAL_SANDBOX_ARGS
            .iter()
            .map(|arg| OsStr::new(*arg))
            .collect();

        let launch_options = LaunchOptions::default_builder()
            .headless(options.headless)
            .sandbox(options.sandbox)
            .window_size(Some((options.window.width, options.window.height)))
            .idle_browser_timeout(options.protocol_timeout)
            .path(options.chrome_path.clone())
            .args(args)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::Cdp(format!("Failed to launch browser: {}", e)))?;
        debug!("Local Chrome launched");

        Ok(ChromeSession { browser })
    }
}

/// A connected Chrome instance. Dropping the inner `Browser` ends the
/// connection and, for launched processes, kills the child.
pub struct ChromeSession {
    browser: Browser,
}

impl ChromeSession {
    /// PID of a locally launched Chrome; `None` for remote sessions
    pub fn process_id(&self) -> Option<u32> {
        self.browser.get_process_id()
    }
}

impl BrowserSession for ChromeSession {
    type Page = ChromePage;

    fn new_page(&mut self, viewport: Viewport) -> Result<ChromePage> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::Render(format!("Failed to create tab: {}", e)))?;

        tab.call_method(SetDeviceMetricsOverride::from(viewport))
            .map_err(|e| Error::Render(format!("Failed to set viewport: {}", e)))?;

        Ok(ChromePage { tab })
    }

    fn close(self) -> Result<()> {
        // Browser.Close goes out on drop with its result discarded; a dead
        // connection has to be detected beforehand
        let alive = self.browser.get_version().map(|_| ());
        drop(self.browser);
        alive.map_err(|e| Error::Cdp(format!("Browser connection lost before close: {}", e)))
    }
}

/// A single Chrome tab
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    fn ready_state(tab: &Tab) -> Result<String> {
        let eval = tab
            .evaluate("document.readyState", false)
            .map_err(|e| Error::Navigation(format!("Failed to read document state: {}", e)))?;

        Ok(eval
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .unwrap_or("loading")
            .to_string())
    }

    /// Stop the pending load and report the navigation as timed out
    fn abandon_navigation(&self, timeout: Duration) -> Error {
        let tab = Arc::clone(&self.tab);
        match call_before(Instant::now() + STOP_LOADING_GRACE, move || tab.stop_loading()) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("Failed to stop loading: {}", e),
            Err(_) => debug!("Page did not stop loading within {:?}", STOP_LOADING_GRACE),
        }
        Error::Navigation(format!(
            "Navigation timeout of {} ms exceeded",
            timeout.as_millis()
        ))
    }
}

impl PageHandle for ChromePage {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        // Fails on net errors (DNS, TLS, refused connections) reported by Page.navigate
        let tab = Arc::clone(&self.tab);
        let target = url.to_string();
        match call_before(deadline, move || tab.navigate_to(&target).map(|_| ())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::Navigation(e.to_string())),
            Err(RecvTimeoutError::Timeout) => return Err(self.abandon_navigation(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::Navigation("Navigation was aborted".into()));
            }
        }

        // DOMContentLoaded has fired once the state leaves "loading"
        loop {
            let tab = Arc::clone(&self.tab);
            let state = match call_before(deadline, move || Self::ready_state(&tab)) {
                Ok(state) => state?,
                Err(_) => return Err(self.abandon_navigation(timeout)),
            };
            match state.as_str() {
                "interactive" | "complete" => return Ok(()),
                _ if Instant::now() >= deadline => return Err(self.abandon_navigation(timeout)),
                _ => thread::sleep(READY_STATE_POLL),
            }
        }
    }

    fn settle_images(&mut self, timeout: Duration) -> Result<ImageSettle> {
        let script =
            SETTLE_IMAGES_TEMPLATE.replace("{{TIMEOUT_MS}}", &timeout.as_millis().to_string());

        let eval = self
            .tab
            .evaluate(&script, true)
            .map_err(|e| Error::Render(format!("Image wait failed: {}", e)))?;

        let raw = eval
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Render("No value returned from image wait".into()))?;

        match serde_json::from_str::<ImageSettle>(raw) {
            Ok(settle) => Ok(settle),
            Err(e) => {
                warn!("Unreadable image wait result {:?}: {}", raw, e);
                Ok(ImageSettle::default())
            }
        }
    }

    fn print_pdf(&mut self, layout: &PdfLayout) -> Result<Vec<u8>> {
        let (paper_width, paper_height) = layout.format.size_inches();
        let margin = layout.margin_inches();

        let options = PrintToPdfOptions {
            print_background: Some(layout.print_background),
            paper_width: Some(paper_width),
            paper_height: Some(paper_height),
            margin_top: Some(margin),
            margin_bottom: Some(margin),
            margin_left: Some(margin),
            margin_right: Some(margin),
            ..Default::default()
        };

        self.tab
            .print_to_pdf(Some(options))
            .map_err(|e| Error::Render(format!("PDF export failed: {}", e)))
    }

    fn close(self) -> Result<()> {
        self.tab
            .close(true)
            .map(|_| ())
            .map_err(|e| Error::Cdp(format!("Failed to close tab: {}", e)))
    }
}
