//! Single owner of the panel's application state.
//!
//! Every user action and every async completion goes through a method here.
//! The widgets never hold state of their own: after each call the front-end
//! re-reads `ui_state()` and projects it.

use crate::capture::audio::AudioRecorder;
use crate::capture::crop::{CropData, RegionSelector, SelectorEvent, SelectorRequest};
use crate::capture::drawing::DrawingCanvas;
use crate::capture::{CaptureKind, CaptureResult};
use crate::clipboard::ClipboardBackend;
use crate::constants::{
    MODEL_CHECKING_TEXT, MODEL_MISSING_TEXT, MODEL_READY_TEXT, STATUS_DISMISS_DELAY,
};
use crate::error::{AppError, AppResult};
use crate::export::{self, RenderArtifact};
use crate::preview::{Presentation, PreviewEngine, PreviewState, TypesetJob, TypesetOutcome};
use crate::session::SessionManager;
use crate::settings::{ImageSettings, SettingsStore};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Stays until replaced.
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub kind: StatusKind,
    expires_at: Option<Instant>,
}

impl StatusMessage {
    fn new(text: impl Into<String>, kind: StatusKind, now: Instant) -> Self {
        let expires_at = match kind {
            StatusKind::Info => None,
            StatusKind::Success | StatusKind::Error => Some(now + STATUS_DISMISS_DELAY),
        };
        Self {
            text: text.into(),
            kind,
            expires_at,
        }
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlay {
    Hidden,
    Loading,
    Recording,
}

/// Identifies one capture from trigger to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    id: u64,
    kind: CaptureKind,
}

impl Ticket {
    pub fn kind(&self) -> CaptureKind {
        self.kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Capture(Ticket),
    Recording,
}

/// Everything the panel shows, derived from `AppState`.
#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    pub capture_enabled: bool,
    pub export_enabled: bool,
    pub stop_enabled: bool,
    pub overlay: Overlay,
    pub placeholder_visible: bool,
    pub model_ready: bool,
    pub model_status: &'static str,
    pub status: Option<StatusMessage>,
    pub presentation: Presentation,
}

#[derive(Debug)]
pub struct AppState {
    pub buffer: String,
    /// Cursor selection as char offsets into `buffer`, `start <= end`.
    pub selection: (usize, usize),
    pub settings: ImageSettings,
    pub preview: PreviewEngine,
    pub artifact: Option<RenderArtifact>,
    pub in_flight: Option<Operation>,
    pub status: Option<StatusMessage>,
}

pub struct Controller {
    state: AppState,
    sessions: SessionManager,
    model_checked: bool,
    next_ticket: u64,
}

impl Controller {
    pub fn new(sessions: SessionManager, settings: ImageSettings) -> Self {
        Self {
            state: AppState {
                buffer: String::new(),
                selection: (0, 0),
                settings: settings.sanitized(),
                preview: PreviewEngine::new(),
                artifact: None,
                in_flight: None,
                status: None,
            },
            sessions,
            model_checked: false,
            next_ticket: 0,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn buffer(&self) -> &str {
        &self.state.buffer
    }

    pub fn settings(&self) -> &ImageSettings {
        &self.state.settings
    }

    pub fn preview(&self) -> &PreviewEngine {
        &self.state.preview
    }

    pub fn artifact(&self) -> Option<&RenderArtifact> {
        self.state.artifact.as_ref()
    }

    pub fn ui_state(&self) -> UiState {
        let s = &self.state;
        let model_ready = self.sessions.is_available();
        let overlay = match s.in_flight {
            None => Overlay::Hidden,
            Some(Operation::Recording) => Overlay::Recording,
            Some(Operation::Capture(_)) => Overlay::Loading,
        };
        UiState {
            capture_enabled: self.capture_allowed(),
            export_enabled: !s.buffer.trim().is_empty()
                && s.preview.is_valid()
                && s.in_flight.is_none(),
            stop_enabled: s.in_flight == Some(Operation::Recording),
            overlay,
            placeholder_visible: s.preview.state() == &PreviewState::Empty,
            model_ready,
            model_status: if !self.model_checked {
                MODEL_CHECKING_TEXT
            } else if model_ready {
                MODEL_READY_TEXT
            } else {
                MODEL_MISSING_TEXT
            },
            status: s.status.clone(),
            presentation: Presentation::from_settings(&s.settings),
        }
    }

    fn capture_allowed(&self) -> bool {
        self.sessions.is_available() && self.state.in_flight.is_none()
    }

    // ------------------------------------------------------------------
    // Status line
    // ------------------------------------------------------------------

    fn show(&mut self, text: impl Into<String>, kind: StatusKind) {
        self.state.status = Some(StatusMessage::new(text, kind, Instant::now()));
    }

    pub fn hide_status(&mut self) {
        self.state.status = None;
    }

    /// Drops an expired success/error message. Returns true if it did.
    pub fn tick(&mut self, now: Instant) -> bool {
        let expired = matches!(
            &self.state.status,
            Some(StatusMessage { expires_at: Some(at), .. }) if *at <= now
        );
        if expired {
            self.state.status = None;
        }
        expired
    }

    /// Records the outcome of the start-up availability probe.
    pub fn model_probed(&mut self) {
        self.model_checked = true;
    }

    // ------------------------------------------------------------------
    // Buffer and preview
    // ------------------------------------------------------------------

    /// Replaces the buffer and starts one preview recomputation. Returns the
    /// job to hand to the typeset queue; `None` when nothing needs typesetting.
    pub fn set_latex(&mut self, text: &str) -> Option<TypesetJob> {
        if text == self.state.buffer {
            return None;
        }
        self.state.buffer = text.to_string();
        let len = self.state.buffer.chars().count();
        let (start, end) = self.state.selection;
        self.state.selection = (start.min(len), end.min(len));
        self.refresh_preview()
    }

    fn refresh_preview(&mut self) -> Option<TypesetJob> {
        self.state.artifact = None;
        let job = self.state.preview.submit(&self.state.buffer);
        if job.is_none() {
            self.hide_status();
        }
        job
    }

    pub fn set_selection(&mut self, start: usize, end: usize) {
        let len = self.state.buffer.chars().count();
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        self.state.selection = (start.min(len), end.min(len));
    }

    /// Splices `latex` over the current selection and leaves the cursor
    /// after it.
    pub fn insert_latex(&mut self, latex: &str) -> Option<TypesetJob> {
        let (start, end) = self.state.selection;
        let buffer = &self.state.buffer;
        let mut spliced = String::with_capacity(buffer.len() + latex.len());
        spliced.push_str(&buffer[..byte_offset(buffer, start)]);
        spliced.push_str(latex);
        spliced.push_str(&buffer[byte_offset(buffer, end)..]);

        let cursor = start + latex.chars().count();
        let job = self.set_latex(&spliced);
        self.state.selection = (cursor, cursor);
        self.show("LaTeX inserted at cursor!", StatusKind::Success);
        job
    }

    /// Applies a typeset result. Stale generations change nothing.
    pub fn apply_typeset(&mut self, outcome: TypesetOutcome) -> bool {
        if !self.state.preview.complete(outcome) {
            return false;
        }
        match self.state.preview.state().clone() {
            PreviewState::Valid => {
                if matches!(&self.state.status, Some(m) if m.kind == StatusKind::Error) {
                    self.hide_status();
                }
            }
            PreviewState::Invalid(diagnostic) => {
                self.state.artifact = None;
                self.show(diagnostic, StatusKind::Error);
            }
            PreviewState::Empty | PreviewState::Pending => {}
        }
        true
    }

    // ------------------------------------------------------------------
    // Captures
    // ------------------------------------------------------------------

    /// Claims the capture slot. `None` while the model is unavailable or
    /// another capture or recording is running.
    pub fn begin_capture(&mut self, kind: CaptureKind) -> Option<Ticket> {
        if !self.capture_allowed() {
            tracing::debug!(?kind, "Capture rejected, controls are disabled");
            return None;
        }
        self.next_ticket += 1;
        let ticket = Ticket {
            id: self.next_ticket,
            kind,
        };
        self.state.in_flight = Some(Operation::Capture(ticket));
        Some(ticket)
    }

    fn release(&mut self, ticket: Ticket) {
        if self.state.in_flight == Some(Operation::Capture(ticket)) {
            self.state.in_flight = None;
        }
    }

    /// Applies the pipeline result of a capture. Writes into the buffer are
    /// last-write-wins.
    pub fn finish_capture(&mut self, ticket: Ticket, result: AppResult<String>) -> Option<TypesetJob> {
        self.release(ticket);
        match result {
            Ok(latex) => self.insert_latex(&latex),
            Err(err) => {
                self.report_failure(ticket.kind, err);
                None
            }
        }
    }

    /// Releases the slot without touching the buffer or the status line.
    pub fn cancel_capture(&mut self, ticket: Ticket) {
        self.release(ticket);
    }

    pub fn report_failure(&mut self, kind: CaptureKind, err: AppError) {
        err.log(kind.failure_prefix());
        let text = match &err {
            AppError::Validation(msg) => msg.clone(),
            other => format!("{}: {}", kind.failure_prefix(), other),
        };
        self.show(text, StatusKind::Error);
    }

    /// Snapshots the drawing for the model; the canvas is wiped either way.
    pub fn submit_drawing(&mut self, canvas: &mut DrawingCanvas) -> Option<(Ticket, CaptureResult)> {
        let ticket = self.begin_capture(CaptureKind::Drawing)?;
        match canvas.submit() {
            Ok(capture) => Some((ticket, capture)),
            Err(e) => {
                canvas.clear();
                self.release(ticket);
                self.report_failure(CaptureKind::Drawing, e.into());
                None
            }
        }
    }

    /// Blank questions are dropped without a message.
    pub fn ask(&mut self, question: &str) -> Option<(Ticket, CaptureResult)> {
        let capture = CaptureResult::question(question)?;
        let ticket = self.begin_capture(CaptureKind::Text)?;
        Some((ticket, capture))
    }

    /// Asks the region selector to show its overlay.
    pub fn start_crop(
        &mut self,
        selector: &dyn RegionSelector,
        events: UnboundedSender<SelectorEvent>,
    ) -> bool {
        if !self.capture_allowed() {
            return false;
        }
        match selector.start(SelectorRequest::StartCrop, events) {
            Ok(response) if response.is_started() => true,
            Ok(response) => {
                tracing::error!(status = %response.status, "Unexpected selector response");
                self.show(
                    "Failed to start crop: Could not connect to the region selector.",
                    StatusKind::Error,
                );
                false
            }
            Err(e) => {
                let err = AppError::from(e);
                err.log("start crop");
                self.show(format!("Failed to start crop: {}", err), StatusKind::Error);
                false
            }
        }
    }

    /// Handles the selector's completion event. Cancelled or empty
    /// selections are a silent no-op.
    pub fn crop_complete(&mut self, event: SelectorEvent) -> Option<(Ticket, CropData)> {
        let SelectorEvent::CropComplete { crop_data } = event;
        if crop_data.is_cancelled() {
            tracing::debug!("Crop cancelled or invalid dimensions");
            return None;
        }
        let ticket = self.begin_capture(CaptureKind::Screenshot)?;
        Some((ticket, crop_data))
    }

    /// Claims the slot while the audio session is prepared. The microphone
    /// stays off until `begin_recording` sees the session ready.
    pub fn request_recording(&mut self) -> Option<Ticket> {
        self.begin_capture(CaptureKind::Audio)
    }

    /// Opens the microphone once `ready` confirms the audio session. A
    /// ticket released in the meantime (e.g. by a clear) starts nothing.
    pub fn begin_recording(
        &mut self,
        ticket: Ticket,
        ready: AppResult<()>,
        recorder: &mut AudioRecorder,
    ) -> bool {
        if self.state.in_flight != Some(Operation::Capture(ticket)) {
            return false;
        }
        self.state.in_flight = None;
        if let Err(err) = ready {
            self.report_failure(CaptureKind::Audio, err);
            return false;
        }
        match recorder.start() {
            Ok(()) => {
                self.state.in_flight = Some(Operation::Recording);
                self.show("Recording audio...", StatusKind::Info);
                true
            }
            Err(e) => {
                let err = AppError::from(e);
                err.log("start recording");
                self.show(format!("Could not start recording: {}", err), StatusKind::Error);
                false
            }
        }
    }

    /// Stops the microphone and turns the recording into a pending audio
    /// capture.
    pub fn end_recording(&mut self, recorder: &mut AudioRecorder) -> Option<(Ticket, CaptureResult)> {
        if self.state.in_flight != Some(Operation::Recording) {
            return None;
        }
        self.state.in_flight = None;
        if matches!(&self.state.status, Some(m) if m.kind == StatusKind::Info) {
            self.hide_status();
        }
        match recorder.stop() {
            Ok(capture) => {
                let ticket = self.begin_capture(CaptureKind::Audio)?;
                Some((ticket, capture))
            }
            Err(e) => {
                self.report_failure(CaptureKind::Audio, e.into());
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    fn export_source(&self) -> AppResult<&str> {
        if self.state.buffer.trim().is_empty() {
            return Err(AppError::Validation("Nothing to export.".to_string()));
        }
        match self.state.preview.state() {
            PreviewState::Valid => self
                .state
                .preview
                .valid_svg()
                .ok_or_else(|| AppError::Validation("No rendered preview.".to_string())),
            PreviewState::Pending => Err(AppError::Validation(
                "Preview is still rendering.".to_string(),
            )),
            _ => Err(AppError::Validation(
                "Cannot copy/download: Invalid LaTeX.".to_string(),
            )),
        }
    }

    /// Re-rasterizes the current preview into a fresh artifact.
    pub fn render(&mut self) -> bool {
        self.state.artifact = None;
        let svg = match self.export_source() {
            Ok(svg) => svg.to_string(),
            Err(err) => {
                err.log("render");
                if !self.state.buffer.trim().is_empty() {
                    self.show(err.to_string(), StatusKind::Error);
                }
                return false;
            }
        };
        match export::render_svg(&svg, &self.state.settings) {
            Ok(artifact) => {
                self.state.artifact = Some(artifact);
                true
            }
            Err(e) => {
                let err = AppError::from(e);
                err.log("render");
                self.show(format!("Error generating image: {}", err), StatusKind::Error);
                false
            }
        }
    }

    pub fn copy(&mut self, clipboard: &dyn ClipboardBackend) -> bool {
        if !self.render() {
            self.show("Failed to copy. Check LaTeX for errors.", StatusKind::Error);
            return false;
        }
        let Some(artifact) = self.state.artifact.as_ref() else {
            return false;
        };
        match clipboard.copy_png(&artifact.png) {
            Ok(()) => {
                self.show("Image copied to clipboard!", StatusKind::Success);
                true
            }
            Err(e) => {
                let err = AppError::from(e);
                err.log("copy");
                self.show(format!("Failed to copy image: {}", err), StatusKind::Error);
                false
            }
        }
    }

    /// Writes `latex-equation-<millis>.png` into `dir`.
    pub fn download(&mut self, dir: &Path) -> Option<PathBuf> {
        if !self.render() {
            self.show("Failed to download. Check LaTeX for errors.", StatusKind::Error);
            return None;
        }
        let artifact = self.state.artifact.as_ref()?;
        let file_name = export::download_file_name(SystemTime::now());
        match export::save_png(dir, &file_name, artifact) {
            Ok(path) => {
                self.show("Image downloaded!", StatusKind::Success);
                Some(path)
            }
            Err(e) => {
                let err = AppError::from(e);
                err.log("download");
                self.show(format!("Failed to save image: {}", err), StatusKind::Error);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Settings and reset
    // ------------------------------------------------------------------

    /// Applies and persists new settings, then re-renders the preview.
    pub fn save_settings(
        &mut self,
        settings: ImageSettings,
        store: &mut dyn SettingsStore,
    ) -> Option<TypesetJob> {
        self.state.settings = settings.sanitized();
        match store.save_image_settings(&self.state.settings) {
            Ok(()) => self.show("Settings saved!", StatusKind::Success),
            Err(e) => {
                let err = AppError::from(e);
                err.log("save settings");
                self.show(format!("Failed to save settings: {}", err), StatusKind::Error);
            }
        }
        let status = self.state.status.clone();
        let job = self.refresh_preview();
        self.state.status = status;
        job
    }

    /// Empties the buffer, hides the status line and releases every model
    /// session.
    pub fn clear(&mut self) -> Option<TypesetJob> {
        self.state.buffer.clear();
        self.state.selection = (0, 0);
        let job = self.refresh_preview();
        self.hide_status();
        self.sessions.destroy_all();
        job
    }
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Availability, Modality};
    use crate::capture::crop::SelectorResponse;
    use crate::capture::CaptureError;
    use crate::fakes::{FakeClipboard, FakeMicrophone, FakeService, FRACTION_SVG, MERROR_SVG};
    use crate::pipeline;
    use crate::session::SlotState;
    use crate::settings::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn controller() -> (Arc<FakeService>, Controller) {
        let service = FakeService::available();
        let sessions = SessionManager::new(service.clone());
        sessions.initialize().await;
        let mut controller = Controller::new(sessions, ImageSettings::default());
        controller.model_probed();
        (service, controller)
    }

    fn typeset(controller: &mut Controller, job: Option<TypesetJob>, svg: &str) {
        let job = job.expect("a typeset job");
        assert!(controller.apply_typeset(TypesetOutcome {
            generation: job.generation,
            result: Ok(svg.to_string()),
        }));
    }

    #[tokio::test]
    async fn initial_state_shows_placeholder_and_enables_capture() {
        let (_, controller) = controller().await;
        let ui = controller.ui_state();
        assert!(ui.capture_enabled);
        assert!(!ui.export_enabled);
        assert!(ui.placeholder_visible);
        assert_eq!(ui.overlay, Overlay::Hidden);
        assert_eq!(ui.model_status, MODEL_READY_TEXT);
    }

    #[tokio::test]
    async fn unavailable_model_disables_capture() {
        let sessions = SessionManager::new(FakeService::with_base(Availability::Unavailable));
        let mut controller = Controller::new(sessions.clone(), ImageSettings::default());
        assert_eq!(controller.ui_state().model_status, MODEL_CHECKING_TEXT);
        sessions.initialize().await;
        controller.model_probed();

        let ui = controller.ui_state();
        assert!(!ui.capture_enabled);
        assert_eq!(ui.model_status, MODEL_MISSING_TEXT);
        assert!(controller.begin_capture(CaptureKind::Drawing).is_none());
        assert!(controller.ask("pythagoras").is_none());
    }

    #[tokio::test]
    async fn valid_typeset_enables_export() {
        let (_, mut controller) = controller().await;
        let job = controller.set_latex("\\frac{1}{2}");
        assert!(!controller.ui_state().export_enabled);
        assert!(!controller.ui_state().placeholder_visible);

        typeset(&mut controller, job, FRACTION_SVG);
        assert!(controller.ui_state().export_enabled);
    }

    #[tokio::test]
    async fn error_marker_keeps_export_disabled() {
        let (_, mut controller) = controller().await;
        let job = controller.set_latex("\\frac{");
        typeset(&mut controller, job, MERROR_SVG);

        let ui = controller.ui_state();
        assert!(!ui.export_enabled);
        let status = ui.status.unwrap();
        assert_eq!(status.kind, StatusKind::Error);
        assert_eq!(status.text, "Invalid LaTeX syntax. Preview shows details.");
    }

    #[tokio::test]
    async fn stale_typeset_results_are_ignored() {
        let (_, mut controller) = controller().await;
        let old = controller.set_latex("a").unwrap();
        let new = controller.set_latex("\\frac{").unwrap();
        assert!(controller.apply_typeset(TypesetOutcome {
            generation: new.generation,
            result: Ok(MERROR_SVG.to_string()),
        }));
        assert!(!controller.apply_typeset(TypesetOutcome {
            generation: old.generation,
            result: Ok(FRACTION_SVG.to_string()),
        }));
        assert!(!controller.ui_state().export_enabled);
    }

    #[tokio::test]
    async fn emptying_buffer_resets_preview_and_artifact() {
        let (_, mut controller) = controller().await;
        let job = controller.set_latex("x");
        typeset(&mut controller, job, FRACTION_SVG);
        assert!(controller.render());
        assert!(controller.artifact().is_some());

        assert!(controller.set_latex("").is_none());
        assert!(controller.artifact().is_none());
        assert!(controller.ui_state().placeholder_visible);
        assert!(!controller.ui_state().export_enabled);
    }

    #[tokio::test]
    async fn identical_text_does_not_retypeset() {
        let (_, mut controller) = controller().await;
        assert!(controller.set_latex("x").is_some());
        assert!(controller.set_latex("x").is_none());
    }

    #[tokio::test]
    async fn insert_splices_at_selection() {
        let (_, mut controller) = controller().await;
        controller.set_latex("a + ∂ + b");
        controller.set_selection(5, 4);
        controller.insert_latex("x^2");
        assert_eq!(controller.buffer(), "a + x^2 + b");
        assert_eq!(controller.state().selection, (7, 7));
        assert_eq!(
            controller.ui_state().status.unwrap().text,
            "LaTeX inserted at cursor!"
        );
    }

    #[tokio::test]
    async fn capture_brackets_controls_and_inserts_result() {
        let (service, mut controller) = controller().await;
        let (ticket, capture) = controller.ask("one half").unwrap();
        let ui = controller.ui_state();
        assert_eq!(ui.overlay, Overlay::Loading);
        assert!(!ui.capture_enabled);
        assert!(controller.begin_capture(CaptureKind::Drawing).is_none());

        service.push_reply(Ok("$$\\frac{1}{2}$$"));
        let result = pipeline::process(controller.sessions(), capture).await;
        let job = controller.finish_capture(ticket, result);
        assert_eq!(controller.buffer(), "\\frac{1}{2}");
        assert!(job.is_some());

        let ui = controller.ui_state();
        assert_eq!(ui.overlay, Overlay::Hidden);
        assert!(ui.capture_enabled);
    }

    #[tokio::test]
    async fn failed_capture_restores_controls_and_reports() {
        let (service, mut controller) = controller().await;
        controller.set_latex("keep");
        let (ticket, capture) = controller.ask("anything").unwrap();
        service.push_reply(Err("backend crashed"));
        let result = pipeline::process(controller.sessions(), capture).await;
        assert!(controller.finish_capture(ticket, result).is_none());

        assert_eq!(controller.buffer(), "keep");
        assert_eq!(controller.sessions().slot_state(Modality::Text), SlotState::Absent);
        let ui = controller.ui_state();
        assert!(ui.capture_enabled);
        assert_eq!(ui.overlay, Overlay::Hidden);
        let status = ui.status.unwrap();
        assert!(status.text.starts_with("Failed to get formula: "));
        assert_eq!(status.kind, StatusKind::Error);
    }

    #[tokio::test]
    async fn empty_extraction_reports_verbatim() {
        let (_, mut controller) = controller().await;
        let ticket = controller.begin_capture(CaptureKind::Drawing).unwrap();
        controller.finish_capture(
            ticket,
            Err(AppError::Validation("AI returned empty content.".to_string())),
        );
        assert_eq!(
            controller.ui_state().status.unwrap().text,
            "AI returned empty content."
        );
        assert_eq!(controller.buffer(), "");
    }

    #[tokio::test]
    async fn blank_question_is_silently_ignored() {
        let (_, mut controller) = controller().await;
        assert!(controller.ask("   ").is_none());
        let ui = controller.ui_state();
        assert!(ui.status.is_none());
        assert!(ui.capture_enabled);
    }

    #[tokio::test]
    async fn cancelled_crop_is_a_no_op() {
        let (service, mut controller) = controller().await;
        let event = SelectorEvent::CropComplete {
            crop_data: CropData::cancelled(),
        };
        assert!(controller.crop_complete(event).is_none());
        let ui = controller.ui_state();
        assert!(ui.status.is_none());
        assert!(ui.capture_enabled);
        assert_eq!(service.prompts(), 0);
    }

    #[tokio::test]
    async fn valid_crop_claims_a_screenshot_ticket() {
        let (_, mut controller) = controller().await;
        let crop_data = CropData {
            x: 0.0,
            y: 0.0,
            width: 40.0,
            height: 20.0,
            device_pixel_ratio: 1.0,
        };
        let (ticket, crop) = controller
            .crop_complete(SelectorEvent::CropComplete { crop_data })
            .unwrap();
        assert_eq!(ticket.kind(), CaptureKind::Screenshot);
        assert_eq!(crop, crop_data);
        assert_eq!(controller.ui_state().overlay, Overlay::Loading);

        controller.cancel_capture(ticket);
        assert_eq!(controller.ui_state().overlay, Overlay::Hidden);
    }

    struct StubSelector(Result<&'static str, &'static str>);

    impl RegionSelector for StubSelector {
        fn start(
            &self,
            _request: SelectorRequest,
            _events: UnboundedSender<SelectorEvent>,
        ) -> Result<SelectorResponse, CaptureError> {
            self.0
                .map(|status| SelectorResponse {
                    status: status.to_string(),
                })
                .map_err(|e| CaptureError::Platform(e.to_string()))
        }
    }

    #[tokio::test]
    async fn crop_start_failures_are_reported() {
        let (_, mut controller) = controller().await;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        assert!(controller.start_crop(&StubSelector(Ok("cropping_started")), tx.clone()));
        assert!(controller.ui_state().status.is_none());

        assert!(!controller.start_crop(&StubSelector(Ok("nope")), tx.clone()));
        assert!(!controller.start_crop(&StubSelector(Err("no overlay")), tx));
        assert_eq!(
            controller.ui_state().status.unwrap().text,
            "Failed to start crop: no overlay"
        );
    }

    async fn start_recording(controller: &mut Controller, recorder: &mut AudioRecorder) -> bool {
        let Some(ticket) = controller.request_recording() else {
            return false;
        };
        assert_eq!(controller.ui_state().overlay, Overlay::Loading);
        let sessions = controller.sessions().clone();
        let ready = pipeline::prepare_audio(&sessions).await;
        controller.begin_recording(ticket, ready, recorder)
    }

    #[tokio::test]
    async fn recording_has_its_own_overlay() {
        let (_, mut controller) = controller().await;
        let mut recorder = AudioRecorder::new(Box::new(FakeMicrophone {
            chunks: vec![vec![0, 0]],
            ..FakeMicrophone::default()
        }));
        assert!(start_recording(&mut controller, &mut recorder).await);
        let ui = controller.ui_state();
        assert_eq!(ui.overlay, Overlay::Recording);
        assert!(ui.stop_enabled);
        assert!(!ui.capture_enabled);
        assert_eq!(ui.status.unwrap().text, "Recording audio...");
        assert!(controller.request_recording().is_none());

        let (ticket, capture) = controller.end_recording(&mut recorder).unwrap();
        assert_eq!(ticket.kind(), CaptureKind::Audio);
        assert_eq!(capture.kind(), CaptureKind::Audio);
        let ui = controller.ui_state();
        assert_eq!(ui.overlay, Overlay::Loading);
        assert!(!ui.stop_enabled);
        assert!(ui.status.is_none());
    }

    #[tokio::test]
    async fn unsupported_audio_never_opens_the_microphone() {
        let (service, mut controller) = controller().await;
        service.set_modality(Modality::Audio, Availability::Unavailable);
        let mut recorder = AudioRecorder::new(Box::new(FakeMicrophone::default()));

        assert!(!start_recording(&mut controller, &mut recorder).await);
        assert!(!recorder.is_recording());
        assert_eq!(service.creations(), 0);
        let ui = controller.ui_state();
        assert!(ui.capture_enabled);
        assert!(!ui.stop_enabled);
        assert_eq!(ui.overlay, Overlay::Hidden);
        let status = ui.status.unwrap();
        assert_eq!(status.kind, StatusKind::Error);
        assert_eq!(
            status.text,
            "Audio processing failed: AI Model for 'audio' is not available. Status: unavailable"
        );
    }

    #[tokio::test]
    async fn released_recording_ticket_starts_nothing() {
        let (_, mut controller) = controller().await;
        let mut recorder = AudioRecorder::new(Box::new(FakeMicrophone::default()));
        let ticket = controller.request_recording().unwrap();
        controller.cancel_capture(ticket);

        assert!(!controller.begin_recording(ticket, Ok(()), &mut recorder));
        assert!(!recorder.is_recording());
        assert!(controller.ui_state().status.is_none());
    }

    #[tokio::test]
    async fn microphone_denial_restores_controls() {
        let (_, mut controller) = controller().await;
        let mut recorder = AudioRecorder::new(Box::new(FakeMicrophone {
            deny: true,
            ..FakeMicrophone::default()
        }));
        assert!(!start_recording(&mut controller, &mut recorder).await);
        let ui = controller.ui_state();
        assert!(ui.capture_enabled);
        assert_eq!(ui.overlay, Overlay::Hidden);
        assert_eq!(
            ui.status.unwrap().text,
            "Could not start recording: Permission denied"
        );
    }

    #[tokio::test]
    async fn drawing_submission_clears_canvas() {
        let (_, mut controller) = controller().await;
        let mut canvas = DrawingCanvas::with_size(20, 20).unwrap();
        canvas.pointer_down(2.0, 2.0);
        canvas.pointer_move(18.0, 18.0);
        canvas.pointer_up();

        let (ticket, capture) = controller.submit_drawing(&mut canvas).unwrap();
        assert_eq!(ticket.kind(), CaptureKind::Drawing);
        assert_eq!(capture.modality(), Modality::Image);
        assert!(canvas.data().iter().all(|&b| b == 255));
    }

    #[tokio::test]
    async fn render_rejects_invalid_preview() {
        let (_, mut controller) = controller().await;
        let job = controller.set_latex("\\frac{");
        typeset(&mut controller, job, MERROR_SVG);
        assert!(!controller.render());
        assert_eq!(
            controller.ui_state().status.unwrap().text,
            "Cannot copy/download: Invalid LaTeX."
        );
        assert!(controller.artifact().is_none());
    }

    #[tokio::test]
    async fn copy_puts_png_on_clipboard() {
        let (_, mut controller) = controller().await;
        let job = controller.set_latex("\\frac{1}{2}");
        typeset(&mut controller, job, FRACTION_SVG);

        let clipboard = FakeClipboard::default();
        assert!(controller.copy(&clipboard));
        let copied = clipboard.copied.lock().unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0], controller.artifact().unwrap().png);
        assert_eq!(
            controller.ui_state().status.unwrap().text,
            "Image copied to clipboard!"
        );
        assert!(controller.ui_state().export_enabled);
    }

    #[tokio::test]
    async fn clipboard_failure_is_reported_and_export_stays_enabled() {
        let (_, mut controller) = controller().await;
        let job = controller.set_latex("x");
        typeset(&mut controller, job, FRACTION_SVG);

        let clipboard = FakeClipboard {
            fail: true,
            ..FakeClipboard::default()
        };
        assert!(!controller.copy(&clipboard));
        let ui = controller.ui_state();
        assert!(ui.status.unwrap().text.starts_with("Failed to copy image: "));
        assert!(ui.export_enabled);
    }

    #[tokio::test]
    async fn copy_with_invalid_latex_hints_at_errors() {
        let (_, mut controller) = controller().await;
        let job = controller.set_latex("\\frac{");
        typeset(&mut controller, job, MERROR_SVG);
        assert!(!controller.copy(&FakeClipboard::default()));
        assert_eq!(
            controller.ui_state().status.unwrap().text,
            "Failed to copy. Check LaTeX for errors."
        );
    }

    #[tokio::test]
    async fn download_writes_timestamped_png() {
        let (_, mut controller) = controller().await;
        let job = controller.set_latex("x");
        typeset(&mut controller, job, FRACTION_SVG);

        let dir = tempdir().unwrap();
        let path = controller.download(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("latex-equation-") && name.ends_with(".png"));
        assert_eq!(std::fs::read(&path).unwrap(), controller.artifact().unwrap().png);
        assert_eq!(controller.ui_state().status.unwrap().text, "Image downloaded!");
    }

    #[tokio::test]
    async fn saving_settings_persists_and_retypesets() {
        let (_, mut controller) = controller().await;
        controller.set_latex("x");
        let mut store = MemoryStore::default();
        let settings = ImageSettings {
            scale: -3.0,
            transparent: true,
            ..ImageSettings::default()
        };
        let job = controller.save_settings(settings, &mut store);
        assert!(job.is_some());
        assert_eq!(controller.settings().scale, 1.0);
        assert_eq!(store.load_image_settings().unwrap().scale, 1.0);
        assert_eq!(controller.ui_state().status.unwrap().text, "Settings saved!");
        assert_eq!(
            controller.ui_state().presentation.background,
            crate::preview::Background::Checkerboard
        );
    }

    #[tokio::test]
    async fn clear_releases_sessions_and_resets() {
        let (service, mut controller) = controller().await;
        controller.sessions().get_or_create(Modality::Image).await.unwrap();
        controller.set_latex("x");
        controller.insert_latex("y");

        assert!(controller.clear().is_none());
        assert_eq!(controller.buffer(), "");
        let ui = controller.ui_state();
        assert!(ui.status.is_none());
        assert!(ui.placeholder_visible);
        assert_eq!(service.destroyed(), 1);
        assert_eq!(
            controller.sessions().slot_state(Modality::Image),
            SlotState::Absent
        );
    }

    #[tokio::test]
    async fn success_and_error_expire_but_info_persists() {
        let (_, mut controller) = controller().await;
        controller.show("done", StatusKind::Success);
        let now = Instant::now();
        assert!(!controller.tick(now));
        assert!(controller.tick(now + STATUS_DISMISS_DELAY + Duration::from_millis(10)));
        assert!(controller.ui_state().status.is_none());

        controller.show("working", StatusKind::Info);
        assert!(!controller.tick(now + Duration::from_secs(60)));
        assert!(controller.ui_state().status.is_some());
    }

    #[tokio::test]
    async fn new_message_supersedes_pending_dismissal() {
        let (_, mut controller) = controller().await;
        controller.show("first", StatusKind::Error);
        let first_deadline = controller.state().status.as_ref().unwrap().expires_at().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        controller.show("second", StatusKind::Info);
        assert!(!controller.tick(first_deadline + Duration::from_millis(1)));
        assert_eq!(controller.ui_state().status.unwrap().text, "second");
    }
}
