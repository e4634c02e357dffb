//! Scripted in-process browser backend.
//!
//! Records every lifecycle call so tests can assert on acquisition order and
//! on teardown without a Chrome binary.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::{
    BrowserSession, Error, ImageSettle, Launcher, LocalLaunch, PageHandle, PdfLayout,
    RemoteEndpoint, Result, SessionOrigin, Viewport,
};

/// Smallest byte sequence that passes for a PDF
pub const SAMPLE_PDF: &[u8] =
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF\n";

/// Which steps of the scripted browser fail
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub remote_fails: bool,
    pub local_fails: bool,
    pub new_page_fails: bool,
    pub navigation_fails: bool,
    pub images_time_out: bool,
    pub print_fails: bool,
    pub page_close_fails: bool,
    pub session_close_fails: bool,
    /// Delay applied to navigation, to keep a session busy
    pub navigation_delay: Option<Duration>,
}

/// Lifecycle calls observed by the scripted backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RemoteConnected,
    RemoteRefused,
    LocalLaunched,
    LocalFailed,
    PageOpened(Viewport),
    Navigated(String),
    ImagesSettled,
    PdfPrinted,
    PageClosed,
    SessionClosed(SessionOrigin),
}

#[derive(Default)]
struct Ledger {
    events: Mutex<Vec<Event>>,
    last_local_launch: Mutex<Option<LocalLaunch>>,
}

impl Ledger {
    fn events(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: Event) {
        self.events().push(event);
    }
}

/// A [`Launcher`] whose sessions follow a [`Script`]
#[derive(Clone)]
pub struct ScriptedLauncher {
    script: Arc<Script>,
    ledger: Arc<Ledger>,
}

impl ScriptedLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            ledger: Arc::new(Ledger::default()),
        }
    }

    /// Everything recorded so far, in call order
    pub fn events(&self) -> Vec<Event> {
        self.ledger.events().clone()
    }

    pub fn last_local_launch(&self) -> Option<LocalLaunch> {
        self.ledger
            .last_local_launch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of sessions created so far
    pub fn sessions_opened(&self) -> usize {
        self.count(|e| matches!(e, Event::RemoteConnected | Event::LocalLaunched))
    }

    /// Number of sessions torn down so far
    pub fn sessions_closed(&self) -> usize {
        self.count(|e| matches!(e, Event::SessionClosed(_)))
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.ledger.events().iter().filter(|e| pred(e)).count()
    }

    /// Block until `n` sessions have been torn down or `timeout` passes
    pub fn wait_for_sessions_closed(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.sessions_closed() >= n {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.sessions_closed() >= n
    }

    fn session(&self, origin: SessionOrigin) -> ScriptedSession {
        ScriptedSession {
            origin,
            script: self.script.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

impl Launcher for ScriptedLauncher {
    type Session = ScriptedSession;

    fn connect_remote(
        &self,
        endpoint: &RemoteEndpoint,
        _protocol_timeout: Duration,
    ) -> Result<ScriptedSession> {
        if self.script.remote_fails {
            self.ledger.record(Event::RemoteRefused);
            return Err(Error::Cdp(format!("Unexpected server response: 401 from {}", endpoint)));
        }
        self.ledger.record(Event::RemoteConnected);
        Ok(self.session(SessionOrigin::Remote))
    }

    fn launch_local(&self, options: &LocalLaunch) -> Result<ScriptedSession> {
        *self
            .ledger
            .last_local_launch
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(options.clone());
        if self.script.local_fails {
            self.ledger.record(Event::LocalFailed);
            return Err(Error::Cdp("Could not auto detect a chrome executable".into()));
        }
        self.ledger.record(Event::LocalLaunched);
        Ok(self.session(SessionOrigin::Local))
    }
}

pub struct ScriptedSession {
    origin: SessionOrigin,
    script: Arc<Script>,
    ledger: Arc<Ledger>,
}

impl BrowserSession for ScriptedSession {
    type Page = ScriptedPage;

    fn new_page(&mut self, viewport: Viewport) -> Result<ScriptedPage> {
        if self.script.new_page_fails {
            return Err(Error::Render("Failed to create tab: target crashed".into()));
        }
        self.ledger.record(Event::PageOpened(viewport));
        Ok(ScriptedPage {
            script: self.script.clone(),
            ledger: self.ledger.clone(),
        })
    }

    fn close(self) -> Result<()> {
        self.ledger.record(Event::SessionClosed(self.origin));
        if self.script.session_close_fails {
            return Err(Error::Cdp("connection is closed".into()));
        }
        Ok(())
    }
}

pub struct ScriptedPage {
    script: Arc<Script>,
    ledger: Arc<Ledger>,
}

impl PageHandle for ScriptedPage {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        if let Some(delay) = self.script.navigation_delay {
            std::thread::sleep(delay);
        }
        if self.script.navigation_fails {
            return Err(Error::Navigation(format!(
                "Navigation timeout of {} ms exceeded",
                timeout.as_millis()
            )));
        }
        self.ledger.record(Event::Navigated(url.to_string()));
        Ok(())
    }

    fn settle_images(&mut self, _timeout: Duration) -> Result<ImageSettle> {
        self.ledger.record(Event::ImagesSettled);
        Ok(ImageSettle {
            total: 2,
            pending: u32::from(self.script.images_time_out),
            timed_out: self.script.images_time_out,
        })
    }

    fn print_pdf(&mut self, _layout: &PdfLayout) -> Result<Vec<u8>> {
        if self.script.print_fails {
            return Err(Error::Render("Printing failed".into()));
        }
        self.ledger.record(Event::PdfPrinted);
        Ok(SAMPLE_PDF.to_vec())
    }

    fn close(self) -> Result<()> {
        self.ledger.record(Event::PageClosed);
        if self.script.page_close_fails {
            return Err(Error::Cdp("Target closed".into()));
        }
        Ok(())
    }
}
