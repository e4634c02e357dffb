use crate::acquire::{Acquirer, SessionOrigin};
use crate::{BrowserSession, Error, ImageSettle, Launcher, PageHandle, PdfLayout, Result, Viewport};
use log::{debug, error, warn};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{oneshot, OwnedSemaphorePermit};

enum Command {
    OpenPage(Viewport, oneshot::Sender<Result<()>>),
    Goto(String, Duration, oneshot::Sender<Result<()>>),
    SettleImages(Duration, oneshot::Sender<Result<ImageSettle>>),
    PrintPdf(PdfLayout, oneshot::Sender<Result<Vec<u8>>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly browser session backed by a dedicated worker thread.
///
/// The worker thread acquires and owns the session and executes commands sent
/// from async tasks, so the blocking protocol calls never run on the runtime.
///
/// Teardown happens on the worker when its command loop ends: either through
/// [`Browser::close`], or when the `Browser` is dropped and the channel
/// disconnects. Either way the page and then the session are closed exactly
/// once.
pub struct Browser {
    cmd_tx: Sender<Command>,
    origin: SessionOrigin,
}

/// A handle to the tab opened by [`Browser::new_page`].
///
/// Borrowing the browser keeps the page from outliving its session.
pub struct Page<'b> {
    browser: &'b Browser,
}

impl Browser {
    /// Acquire a session (spawns a background thread that owns it).
    pub async fn acquire<L: Launcher>(acquirer: Arc<Acquirer<L>>) -> Result<Self> {
        Self::spawn(acquirer, None).await
    }

    /// Like [`Browser::acquire`], but `permit` is held by the worker thread
    /// and released only after the session has been torn down.
    pub async fn acquire_with_permit<L: Launcher>(
        acquirer: Arc<Acquirer<L>>,
        permit: OwnedSemaphorePermit,
    ) -> Result<Self> {
        Self::spawn(acquirer, Some(permit)).await
    }

    async fn spawn<L: Launcher>(
        acquirer: Arc<Acquirer<L>>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<SessionOrigin>>();

        thread::spawn(move || {
            // Acquire on the worker thread; a failed acquisition leaves nothing to reap
            let (session, origin) = match acquirer.acquire() {
                Ok(acquired) => acquired,
                Err(err) => {
                    drop(permit);
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            // The caller may already be gone; the loop below then ends at once
            let _ = init_tx.send(Ok(origin));

            let mut worker = Worker::<L::Session> { session, page: None };
            let mut close_reply = None;

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::OpenPage(viewport, resp) => {
                        let _ = resp.send(worker.open_page(viewport));
                    }
                    Command::Goto(url, timeout, resp) => {
                        let res = worker.page_mut().and_then(|p| p.navigate(&url, timeout));
                        let _ = resp.send(res);
                    }
                    Command::SettleImages(timeout, resp) => {
                        let res = worker.page_mut().and_then(|p| p.settle_images(timeout));
                        let _ = resp.send(res);
                    }
                    Command::PrintPdf(layout, resp) => {
                        let res = worker.page_mut().and_then(|p| p.print_pdf(&layout));
                        let _ = resp.send(res);
                    }
                    Command::Close(resp) => {
                        close_reply = Some(resp);
                        break;
                    }
                }
            }

            let res = worker.teardown(origin);
            drop(permit);
            match close_reply {
                Some(resp) => {
                    let _ = resp.send(res);
                }
                None => {
                    debug!("{} browser session released after its owner went away", origin);
                    if let Err(e) = res {
                        error!("Error closing browser: {}", e);
                    }
                }
            }
        });

        let origin = init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))??;

        Ok(Self { cmd_tx, origin })
    }

    /// Where the session came from
    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    /// Open the session's page with a fixed viewport.
    pub async fn new_page(&self, viewport: Viewport) -> Result<Page<'_>> {
        self.call("OpenPage", |tx| Command::OpenPage(viewport, tx)).await?;
        Ok(Page { browser: self })
    }

    /// Close the page (if open) and then the session.
    pub async fn close(self) -> Result<()> {
        self.call("Close", Command::Close).await
    }

    async fn call<T>(
        &self,
        label: &str,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(command(tx))
            .map_err(|_| Error::Other(format!("{} failed: browser worker has exited", label)))?;
        rx.await
            .map_err(|e| Error::Other(format!("{} canceled: {}", label, e)))?
    }
}

impl Page<'_> {
    /// Navigate to a URL and wait for the DOM to be parsed
    pub async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        self.browser
            .call("Goto", |tx| Command::Goto(url.to_string(), timeout, tx))
            .await
    }

    /// Wait for images already in the document to load or fail
    pub async fn settle_images(&self, timeout: Duration) -> Result<ImageSettle> {
        self.browser
            .call("SettleImages", |tx| Command::SettleImages(timeout, tx))
            .await
    }

    /// Export the page as PDF bytes
    pub async fn print_pdf(&self, layout: &PdfLayout) -> Result<Vec<u8>> {
        self.browser
            .call("PrintPdf", |tx| Command::PrintPdf(layout.clone(), tx))
            .await
    }
}

struct Worker<S: BrowserSession> {
    session: S,
    page: Option<S::Page>,
}

impl<S: BrowserSession> Worker<S> {
    fn open_page(&mut self, viewport: Viewport) -> Result<()> {
        if self.page.is_some() {
            return Err(Error::Other("A page is already open in this session".into()));
        }
        self.page = Some(self.session.new_page(viewport)?);
        Ok(())
    }

    fn page_mut(&mut self) -> Result<&mut S::Page> {
        self.page
            .as_mut()
            .ok_or_else(|| Error::Other("No page is open in this session".into()))
    }

    /// Close the page, then the session. Both are attempted; the first failure
    /// is returned and any later one is logged.
    fn teardown(self, origin: SessionOrigin) -> Result<()> {
        let page_res = match self.page {
            Some(page) => page.close(),
            None => Ok(()),
        };
        let session_res = self.session.close();
        debug!("{} browser session closed", origin);

        match (page_res, session_res) {
            (Err(page_err), Err(session_err)) => {
                warn!("Error closing browser after page close failed: {}", session_err);
                Err(page_err)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}
