//! Error taxonomy for browser tool execution.
//!
//! Everything here is caught at the dispatch boundary and shaped into an
//! error-flagged tool result; nothing terminates the process except a
//! browser launch failure surfacing to the very first call.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("no active session. Use navigate or new_session to start one")]
    NoActiveSession,

    #[error("failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("no element matched {0:?}")]
    ElementNotFound(String),

    #[error("element matched {0:?} is not fillable")]
    NotFillable(String),

    #[error("frame {0} not found in the active page")]
    FrameNotFound(String),

    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("script threw: {0}")]
    ScriptException(String),

    #[error("missing or invalid argument '{argument}' for tool '{tool}'")]
    InvalidArgument {
        tool: &'static str,
        argument: &'static str,
    },

    #[error("invalid page index: {index}. Available pages: 0-{}", .count.saturating_sub(1))]
    IndexOutOfRange { index: usize, count: usize },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, &'static str),

    #[error("browser engine error: {0}")]
    Engine(#[from] chromiumoxide::error::CdpError),
}
