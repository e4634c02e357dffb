//! Error types for the rendering pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while turning a URL into a PDF
#[derive(Error, Debug)]
pub enum Error {
    /// The request payload or its URL was rejected
    #[error("{0}")]
    Validation(String),

    /// Neither the remote endpoint nor a local launch produced a browser
    #[error("Failed to initialize browser: {0}")]
    BrowserUnavailable(String),

    /// The target page could not be loaded
    #[error("Failed to navigate to URL: {0}")]
    Navigation(String),

    /// Failed to export or tear down the page
    #[error("Rendering failed: {0}")]
    Render(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// CDP-specific error
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status code the error is reported with.
    ///
    /// Validation and navigation failures are the caller's to fix (400);
    /// everything else is on our side (500).
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::Navigation(_) => 400,
            _ => 500,
        }
    }

    /// Whether the caller's input is at fault.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Cdp(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::Navigation("x".into()).status_code(), 400);
        assert_eq!(Error::BrowserUnavailable("x".into()).status_code(), 500);
        assert_eq!(Error::Render("x".into()).status_code(), 500);
        assert_eq!(Error::Config("x".into()).status_code(), 500);
        assert!(!Error::Cdp("x".into()).is_client_error());
    }

    #[test]
    fn test_navigation_message() {
        let err = Error::Navigation("net::ERR_NAME_NOT_RESOLVED".into());
        assert_eq!(err.to_string(), "Failed to navigate to URL: net::ERR_NAME_NOT_RESOLVED");
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: Error = anyhow::anyhow!("socket closed").into();
        assert!(matches!(err, Error::Cdp(ref m) if m == "socket closed"));
    }
}
