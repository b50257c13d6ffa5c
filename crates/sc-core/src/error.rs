//! Unified error type for the stillcast crates.
//!
//! Library code funnels its failures into [`Error`], which carries enough
//! context for the HTTP layer to derive a status code via [`Error::http_status`].

use std::time::Duration;

/// Unified error type covering all failure modes below the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description, usually the tool's stderr.
        message: String,
    },

    /// An external tool ran past its deadline and was killed.
    #[error("Tool error [{tool}]: timed out after {after:?}")]
    Timeout {
        /// Name of the tool that was killed.
        tool: String,
        /// The deadline that expired.
        after: Duration,
    },

    /// An external tool was killed because its cancellation token fired.
    #[error("Tool error [{tool}]: cancelled")]
    Cancelled {
        /// Name of the tool that was killed.
        tool: String,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Decoding, resizing or encoding a still image failed.
    #[error("Image error: {0}")]
    Image(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Timeout { .. } => 504,
            Error::Cancelled { .. } => 500,
            Error::Probe(_) => 500,
            Error::Image(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// True when the error came from a deadline rather than a tool failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display() {
        let err = Error::Validation("name is required".into());
        assert_eq!(err.to_string(), "Validation error: name is required");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn timeout_display() {
        let err = Error::Timeout {
            tool: "ffprobe".into(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Tool error [ffprobe]: timed out after 30s");
        assert!(err.is_timeout());
        assert_eq!(err.http_status(), 504);
    }

    #[test]
    fn probe_and_image_are_server_errors() {
        assert_eq!(Error::Probe("no duration".into()).http_status(), 500);
        assert_eq!(Error::Image("corrupt".into()).http_status(), 500);
    }
}
