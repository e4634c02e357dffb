//! The render pipeline: acquire a session, load the page, export it, release
//! the session.

use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use tokio::sync::Semaphore;
use url::Url;

use crate::acquire::Acquirer;
use crate::async_api::Browser;
use crate::{Error, Launcher, RenderConfig, Result};

/// Renders URLs to PDF, one browser session per call.
///
/// Sessions are never shared between calls. `max_concurrent` bounds how many
/// exist at once; further calls wait for a slot before acquiring.
pub struct Renderer<L> {
    acquirer: Arc<Acquirer<L>>,
    config: RenderConfig,
    permits: Arc<Semaphore>,
}

impl<L: Launcher> Renderer<L> {
    pub fn new(acquirer: Acquirer<L>, config: RenderConfig, max_concurrent: usize) -> Self {
        Self {
            acquirer: Arc::new(acquirer),
            config,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn acquirer(&self) -> &Acquirer<L> {
        &self.acquirer
    }

    /// Render `url` (already validated) to PDF bytes.
    ///
    /// The session is closed before this returns, on success and on every
    /// failure after acquisition. A teardown failure never replaces an earlier
    /// error; on an otherwise successful render it is reported as
    /// [`Error::Render`].
    pub async fn render(&self, url: &Url) -> Result<Vec<u8>> {
        // Held by the session's worker until teardown, even if this future is dropped
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("Render queue closed: {}", e)))?;

        let started = Instant::now();
        let browser = Browser::acquire_with_permit(self.acquirer.clone(), permit).await?;
        let origin = browser.origin();

        let outcome = self.render_page(&browser, url).await;
        let teardown = browser.close().await;

        let pdf = settle(outcome, teardown)?;
        info!(
            "PDF generated successfully: {} bytes from {} via {} browser in {:?}",
            pdf.len(),
            url,
            origin,
            started.elapsed()
        );
        Ok(pdf)
    }

    async fn render_page(&self, browser: &Browser, url: &Url) -> Result<Vec<u8>> {
        let page = browser.new_page(self.config.viewport).await?;

        info!("Navigating to URL: {}", url);
        if let Err(e) = page.goto(url.as_str(), self.config.navigation_timeout()).await {
            error!("Navigation error: {}", e);
            return Err(e);
        }

        let settle = page.settle_images(self.config.image_settle_timeout()).await?;
        if settle.timed_out {
            warn!(
                "{} of {} images still loading after {}ms; rendering anyway",
                settle.pending, settle.total, self.config.image_settle_timeout_ms
            );
        }

        info!("Generating PDF...");
        page.print_pdf(&self.config.pdf).await
    }
}

/// Combine the render outcome with the teardown outcome.
fn settle(outcome: Result<Vec<u8>>, teardown: Result<()>) -> Result<Vec<u8>> {
    match (outcome, teardown) {
        (Ok(pdf), Ok(())) => Ok(pdf),
        (Ok(_), Err(e)) => {
            error!("Error closing browser: {}", e);
            Err(Error::Render(format!("Failed to close browser: {}", e)))
        }
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            error!("Error closing browser: {}", close_err);
            Err(e)
        }
    }
}
