//! Browser acquisition: remote endpoint first, local launch as the fallback.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use log::{error, info, warn};
use url::Url;

use crate::{Error, Launcher, Result, Viewport};

/// Managed browser endpoint used when a credential is configured
pub const DEFAULT_REMOTE_ENDPOINT: &str = "wss://production-sfo.browserless.io";

/// Extra arguments for local launches. Containers rarely allow Chrome's
/// setuid sandbox.
pub const LOCAL_SANDBOX_ARGS: [&str; 2] = ["--no-sandbox", "--disable-setuid-sandbox"];

/// A remote browser endpoint together with its credential
#[derive(Clone)]
pub struct RemoteEndpoint {
    endpoint: Url,
    token: String,
}

impl RemoteEndpoint {
    pub fn new(endpoint: Url, token: impl Into<String>) -> Self {
        Self {
            endpoint,
            token: token.into(),
        }
    }

    /// Endpoint without the credential, safe to log
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Value for an `Authorization` header on the WebSocket handshake
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// WebSocket URL carrying the credential as the `token` query parameter,
    /// for clients that cannot set handshake headers.
    pub fn ws_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", &self.token);
        url
    }
}

impl fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint.as_str())
    }
}

/// How acquisition is performed
#[derive(Debug, Clone)]
pub struct AcquirerConfig {
    /// Remote endpoint to try first; `None` means local only
    pub remote: Option<RemoteEndpoint>,
    /// Bound on individual protocol operations, in milliseconds
    pub protocol_timeout_ms: u64,
    /// Chrome executable for local launches; autodetected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Window size for local launches
    pub window: Viewport,
}

impl Default for AcquirerConfig {
    fn default() -> Self {
        Self {
            remote: None,
            protocol_timeout_ms: 120_000,
            chrome_path: None,
            window: Viewport::default(),
        }
    }
}

impl AcquirerConfig {
    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol_timeout_ms)
    }

    /// Build from an optional credential, as read from the environment at startup
    pub fn from_token(token: Option<String>, endpoint: Url) -> Self {
        let remote = token
            .filter(|t| !t.trim().is_empty())
            .map(|t| RemoteEndpoint::new(endpoint, t.trim()));
        Self {
            remote,
            ..Default::default()
        }
    }
}

/// Parameters for a local browser launch
#[derive(Debug, Clone)]
pub struct LocalLaunch {
    pub headless: bool,
    pub sandbox: bool,
    pub window: Viewport,
    pub protocol_timeout: Duration,
    pub chrome_path: Option<PathBuf>,
}

/// Where a session came from; logged, never reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Remote,
    Local,
}

impl fmt::Display for SessionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOrigin::Remote => f.write_str("remote"),
            SessionOrigin::Local => f.write_str("local"),
        }
    }
}

/// Produces browser sessions from a [`Launcher`]
pub struct Acquirer<L> {
    launcher: L,
    config: AcquirerConfig,
}

impl<L: Launcher> Acquirer<L> {
    pub fn new(launcher: L, config: AcquirerConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> &AcquirerConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Obtain a fresh session.
    ///
    /// A failing remote connection is logged and swallowed; only a failed
    /// local launch is an error ([`Error::BrowserUnavailable`]).
    pub fn acquire(&self) -> Result<(L::Session, SessionOrigin)> {
        if let Some(remote) = &self.config.remote {
            info!("Attempting to connect to remote browser at {}...", remote);
            match self.launcher.connect_remote(remote, self.config.protocol_timeout()) {
                Ok(session) => {
                    info!("Connected to remote browser at {}", remote);
                    return Ok((session, SessionOrigin::Remote));
                }
                Err(e) => warn!(
                    "Failed to connect to remote browser: {}. Falling back to local launch.",
                    e
                ),
            }
        }

        info!("Launching local headless browser");
        let options = self.local_launch();
        match self.launcher.launch_local(&options) {
            Ok(session) => Ok((session, SessionOrigin::Local)),
            Err(e) => {
                error!("Failed to launch local browser: {}", e);
                Err(Error::BrowserUnavailable(e.to_string()))
            }
        }
    }

    fn local_launch(&self) -> LocalLaunch {
        LocalLaunch {
            headless: true,
            sandbox: false,
            window: self.config.window,
            protocol_timeout: self.config.protocol_timeout(),
            chrome_path: self.config.chrome_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Script, ScriptedLauncher};

    fn endpoint() -> Url {
        Url::parse(DEFAULT_REMOTE_ENDPOINT).unwrap()
    }

    #[test]
    fn test_remote_credential_is_kept_out_of_logs() {
        let remote = RemoteEndpoint::new(endpoint(), "s3cret");
        assert_eq!(remote.authorization(), "Bearer s3cret");
        assert!(remote.ws_url().as_str().ends_with("?token=s3cret"));
        assert!(!format!("{remote:?}").contains("s3cret"));
        assert!(!remote.to_string().contains("s3cret"));
    }

    #[test]
    fn test_blank_token_means_local_only() {
        assert!(AcquirerConfig::from_token(None, endpoint()).remote.is_none());
        assert!(AcquirerConfig::from_token(Some("  ".into()), endpoint()).remote.is_none());
        assert!(AcquirerConfig::from_token(Some("t".into()), endpoint()).remote.is_some());
    }

    #[test]
    fn test_prefers_remote() {
        let launcher = ScriptedLauncher::new(Script::default());
        let config = AcquirerConfig::from_token(Some("t".into()), endpoint());
        let acquirer = Acquirer::new(launcher.clone(), config);

        let (_session, origin) = acquirer.acquire().unwrap();
        assert_eq!(origin, SessionOrigin::Remote);
        assert_eq!(launcher.events(), vec![Event::RemoteConnected]);
    }

    #[test]
    fn test_remote_failure_falls_back_to_local() {
        let launcher = ScriptedLauncher::new(Script {
            remote_fails: true,
            ..Default::default()
        });
        let config = AcquirerConfig::from_token(Some("t".into()), endpoint());
        let acquirer = Acquirer::new(launcher.clone(), config);

        let (_session, origin) = acquirer.acquire().unwrap();
        assert_eq!(origin, SessionOrigin::Local);
        assert_eq!(launcher.events(), vec![Event::RemoteRefused, Event::LocalLaunched]);
    }

    #[test]
    fn test_local_launch_disables_sandbox() {
        let launcher = ScriptedLauncher::new(Script::default());
        let acquirer = Acquirer::new(launcher.clone(), AcquirerConfig::default());

        let (_session, origin) = acquirer.acquire().unwrap();
        assert_eq!(origin, SessionOrigin::Local);
        let launch = launcher.last_local_launch().unwrap();
        assert!(launch.headless);
        assert!(!launch.sandbox);
        assert_eq!(launch.protocol_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_local_failure_is_browser_unavailable() {
        let launcher = ScriptedLauncher::new(Script {
            remote_fails: true,
            local_fails: true,
            ..Default::default()
        });
        let config = AcquirerConfig::from_token(Some("t".into()), endpoint());
        let acquirer = Acquirer::new(launcher, config);

        let err = acquirer.acquire().err().unwrap();
        assert!(matches!(err, Error::BrowserUnavailable(_)));
        assert_eq!(err.status_code(), 500);
    }
}
