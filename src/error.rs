//! Operation-boundary error taxonomy.
//!
//! Module errors convert into one of four kinds; the kind decides how the
//! failure is logged and whether the operation can simply be retried.

use crate::capture::CaptureError;
use crate::clipboard::ClipboardError;
use crate::export::ExportError;
use crate::session::SessionError;
use crate::settings::SettingsError;
use crate::typeset::TypesetError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Model or modality not supported; needs user action.
    #[error("{0}")]
    Unavailable(String),
    /// Session creation or prompt failed; the session was torn down.
    #[error("{0}")]
    Transient(String),
    /// Empty buffer, invalid LaTeX, empty extraction.
    #[error("{0}")]
    Validation(String),
    /// Clipboard, screenshot, microphone or filesystem failure.
    #[error("{0}")]
    Platform(String),
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unavailable(_) => "unavailable",
            AppError::Transient(_) => "transient",
            AppError::Validation(_) => "validation",
            AppError::Platform(_) => "platform",
        }
    }

    /// Emits the failure at the level its kind calls for.
    pub fn log(&self, operation: &str) {
        match self {
            AppError::Platform(msg) | AppError::Transient(msg) => {
                tracing::error!(operation, kind = self.kind(), "{}", msg)
            }
            AppError::Unavailable(msg) => tracing::warn!(operation, "{}", msg),
            AppError::Validation(msg) => tracing::debug!(operation, "{}", msg),
        }
    }
}

/// Renders an error with its full source chain.
fn chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::GloballyUnavailable | SessionError::ModalityUnavailable { .. } => {
                AppError::Unavailable(err.to_string())
            }
            _ => AppError::Transient(chain(&err)),
        }
    }
}

impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Platform(msg) => AppError::Platform(msg),
            CaptureError::InvalidImage(_) | CaptureError::Busy | CaptureError::NotRecording => {
                AppError::Validation(err.to_string())
            }
            _ => AppError::Platform(chain(&err)),
        }
    }
}

impl From<TypesetError> for AppError {
    fn from(err: TypesetError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<ExportError> for AppError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::NotReady(_) => AppError::Validation(err.to_string()),
            _ => AppError::Platform(chain(&err)),
        }
    }
}

impl From<ClipboardError> for AppError {
    fn from(err: ClipboardError) -> Self {
        AppError::Platform(chain(&err))
    }
}

impl From<SettingsError> for AppError {
    fn from(err: SettingsError) -> Self {
        AppError::Platform(chain(&err))
    }
}
