//! Capture → model → extraction, shared by all four sources.

use crate::api::Modality;
use crate::capture::crop::{crop_screenshot, CropData, ScreenCapturer};
use crate::capture::CaptureResult;
use crate::error::{AppError, AppResult};
use crate::extract::extract;
use crate::session::SessionManager;

pub const EMPTY_EXTRACTION_TEXT: &str = "AI returned empty content.";

/// Prompts the session for the capture's modality and extracts the LaTeX.
/// An empty extraction is a validation failure.
pub async fn process(sessions: &SessionManager, capture: CaptureResult) -> AppResult<String> {
    let modality = capture.modality();
    let raw = sessions.prompt(modality, capture.into_messages()).await?;
    tracing::debug!(%modality, "Model reply: `{}`", raw);

    let latex = extract(&raw);
    if latex.is_empty() {
        return Err(AppError::Validation(EMPTY_EXTRACTION_TEXT.to_string()));
    }
    tracing::debug!(%modality, "Extracted: `{}`", latex);
    Ok(latex)
}

/// Creates (or reuses) the audio session before the microphone opens.
pub async fn prepare_audio(sessions: &SessionManager) -> AppResult<()> {
    sessions.get_or_create(Modality::Audio).await?;
    Ok(())
}

/// Screenshots the visible screen and crops it to the selection. A
/// cancelled selection returns `Ok(None)` without touching the capturer.
pub fn capture_region(
    capturer: &dyn ScreenCapturer,
    crop: &CropData,
) -> AppResult<Option<CaptureResult>> {
    let Some(rect) = crop.physical() else {
        tracing::debug!("Crop cancelled or invalid dimensions");
        return Ok(None);
    };
    let screenshot = capturer.capture_visible()?;
    let png = crop_screenshot(&screenshot, rect)?;
    tracing::debug!(width = rect.width, height = rect.height, "Cropped screenshot");
    Ok(Some(CaptureResult::screenshot(png)))
}
