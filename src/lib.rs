//! Pagepress
//!
//! Renders a web page to PDF through a headless browser and serves the result
//! over HTTP.
//!
//! # Features
//!
//! - **CDP Backend** (default): drives Chrome through the DevTools Protocol,
//!   either on a remote browser endpoint or a locally launched process
//! - **Guaranteed teardown**: every browser session is owned by a worker that
//!   closes it on every exit path
//! - **Safe Defaults**: only `http`/`https` targets are navigated to
//!
//! # Example
//!
//! ```no_run
//! use pagepress::{Acquirer, AcquirerConfig, RenderConfig, Renderer};
//! use pagepress::cdp::ChromeLauncher;
//!
//! # async fn run() -> pagepress::Result<()> {
//! let acquirer = Acquirer::new(ChromeLauncher, AcquirerConfig::default());
//! let renderer = Renderer::new(acquirer, RenderConfig::default(), 4);
//!
//! let url = pagepress::validate::validate_url("https://example.com")?;
//! let pdf = renderer.render(&url).await?;
//! assert!(pdf.starts_with(b"%PDF-"));
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::Deserialize;

pub mod error;
pub use error::{Error, Result};

pub mod validate;
pub use validate::RenderRequest;

pub mod acquire;
pub use acquire::{Acquirer, AcquirerConfig, LocalLaunch, RemoteEndpoint, SessionOrigin};

// Async-friendly session API (worker-thread-backed abstraction)
pub mod async_api;

pub mod render;
pub use render::Renderer;

pub mod server;

#[cfg(feature = "cdp")]
pub mod cdp;

// Scripted backend used by the test suite
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

/// Configuration for a single render
///
/// The defaults produce reproducible output: a fixed 1280x1024 viewport, A4
/// pages with 20px margins, and bounded waits for navigation and images.
///
/// # Examples
///
/// ```
/// let cfg = pagepress::RenderConfig::default();
/// assert_eq!(cfg.navigation_timeout_ms, 30_000);
/// ```
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Viewport dimensions
    pub viewport: Viewport,
    /// Bound on navigation until the DOM has been parsed, in milliseconds
    pub navigation_timeout_ms: u64,
    /// Bound on waiting for in-flight images, in milliseconds. Rendering
    /// proceeds when it expires.
    pub image_settle_timeout_ms: u64,
    /// PDF page layout
    pub pdf: PdfLayout,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            navigation_timeout_ms: 30_000,
            image_settle_timeout_ms: 10_000,
            pdf: PdfLayout::default(),
        }
    }
}

impl RenderConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn image_settle_timeout(&self) -> Duration {
        Duration::from_millis(self.image_settle_timeout_ms)
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1024,
        }
    }
}

/// Paper sizes the exporter knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaperFormat {
    #[default]
    A4,
    Letter,
}

impl PaperFormat {
    /// Paper `(width, height)` in inches
    pub fn size_inches(self) -> (f64, f64) {
        match self {
            PaperFormat::A4 => (8.27, 11.69),
            PaperFormat::Letter => (8.5, 11.0),
        }
    }
}

/// How the page is laid out when exported
#[derive(Debug, Clone, PartialEq)]
pub struct PdfLayout {
    pub format: PaperFormat,
    /// Include background colors and images
    pub print_background: bool,
    /// Uniform margin on all four sides, in CSS pixels
    pub margin_px: f64,
}

impl Default for PdfLayout {
    fn default() -> Self {
        Self {
            format: PaperFormat::A4,
            print_background: true,
            margin_px: 20.0,
        }
    }
}

impl PdfLayout {
    /// Margin converted to inches (96 CSS pixels per inch)
    pub fn margin_inches(&self) -> f64 {
        self.margin_px / 96.0
    }
}

/// Outcome of waiting for the images in a page to load or fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSettle {
    /// Images in the document when the wait started
    pub total: u32,
    /// Images still loading when the wait ended
    pub pending: u32,
    /// Whether the wait gave up before every image settled
    pub timed_out: bool,
}

/// Backend able to produce browser sessions
///
/// Implementations block; the async layer calls them from a dedicated worker
/// thread per session.
pub trait Launcher: Send + Sync + 'static {
    type Session: BrowserSession;

    /// Connect to an already running browser behind a remote endpoint
    fn connect_remote(
        &self,
        endpoint: &RemoteEndpoint,
        protocol_timeout: Duration,
    ) -> Result<Self::Session>;

    /// Start a new local browser process
    fn launch_local(&self, options: &LocalLaunch) -> Result<Self::Session>;
}

/// An exclusively owned connection to a running browser
pub trait BrowserSession {
    type Page: PageHandle;

    /// Open a new tab sized to `viewport`
    fn new_page(&mut self, viewport: Viewport) -> Result<Self::Page>;

    /// Release the browser; the session cannot be used afterwards
    fn close(self) -> Result<()>;
}

/// A single tab inside a [`BrowserSession`]
pub trait PageHandle {
    /// Navigate and wait until the DOM has been parsed.
    ///
    /// Failures are reported as [`Error::Navigation`].
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait, at most `timeout`, for every image in the document to load or fail
    fn settle_images(&mut self, timeout: Duration) -> Result<ImageSettle>;

    /// Export the current document as PDF bytes
    fn print_pdf(&mut self, layout: &PdfLayout) -> Result<Vec<u8>>;

    /// Close the tab
    fn close(self) -> Result<()>;
}
