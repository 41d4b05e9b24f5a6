use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("no usable Chromium executable found (set CHROME_EXECUTABLE)")]
    NoExecutable,

    #[error("browser session is not live")]
    NotLive,

    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("CDP error: {0}")]
    Cdp(String),
}

impl From<chromiumoxide::error::CdpError> for SessionError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        SessionError::Cdp(err.to_string())
    }
}

impl SessionError {
    /// Transient errors are worth a session recycle and another attempt;
    /// the rest abort the unit immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::Timeout { .. } | SessionError::NotLive | SessionError::Cdp(_)
        )
    }
}
