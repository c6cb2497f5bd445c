//! Application-wide constants for mathnano.
//!
//! Centralizes all magic numbers, prompts and defaults so the pipeline code
//! reads in terms of names instead of literals.

use std::time::Duration;

// ============================================================================
// Application Identity
// ============================================================================

/// GTK Application ID following reverse-DNS convention.
pub const APP_ID: &str = "com.github.mathnano";

/// Application name displayed in the panel title.
pub const APP_NAME: &str = "MathNano";

/// Directory name used under the platform config directory.
pub const CONFIG_DIR_NAME: &str = "mathnano";

// ============================================================================
// Panel Configuration
// ============================================================================

/// Default panel width in pixels.
pub const DEFAULT_PANEL_WIDTH: i32 = 420;

/// Default panel height in pixels.
pub const DEFAULT_PANEL_HEIGHT: i32 = 760;

/// How long success and error messages stay visible.
pub const STATUS_DISMISS_DELAY: Duration = Duration::from_millis(3000);

/// Status line shown when the global model probe succeeded.
pub const MODEL_READY_TEXT: &str = "Local model enabled";

/// Status line shown when the global model probe failed.
pub const MODEL_MISSING_TEXT: &str = "Unable to load local model";

/// Status line shown before the first probe finishes.
pub const MODEL_CHECKING_TEXT: &str = "Checking local model...";

// ============================================================================
// Image Settings Defaults
// ============================================================================

pub const DEFAULT_PADDING: u32 = 10;
pub const DEFAULT_SCALE: f64 = 2.0;
pub const DEFAULT_FONT_COLOR: &str = "#000000";
pub const DEFAULT_BG_COLOR: &str = "#FFFFFF";

/// Fixed key under which the image settings record is persisted.
pub const IMAGE_SETTINGS_KEY: &str = "imageSettings";

/// Storage file holding the persisted key-value records.
pub const STORAGE_FILE_NAME: &str = "storage.toml";

// ============================================================================
// Drawing Canvas
// ============================================================================

pub const DRAWING_CANVAS_WIDTH: u32 = 560;
pub const DRAWING_CANVAS_HEIGHT: u32 = 320;

/// Stroke width of the freehand pen, in canvas pixels.
pub const DRAWING_STROKE_WIDTH: f32 = 3.0;

// ============================================================================
// Screen Crop
// ============================================================================

/// Selections at or below this size (CSS pixels) count as a cancelled crop.
pub const MIN_SELECTION_PX: f64 = 10.0;

/// Upper bound on either side of a cropped bitmap, in physical pixels.
pub const MAX_CROP_SIDE_PX: u32 = 16_384;

/// Status reported by the region selector once the overlay is up.
pub const CROPPING_STARTED: &str = "cropping_started";

// ============================================================================
// Audio Capture
// ============================================================================

pub const AUDIO_SAMPLE_RATE: u32 = 16_000;
pub const AUDIO_CHANNELS: u16 = 1;
pub const AUDIO_BITS_PER_SAMPLE: u16 = 16;
pub const AUDIO_MIME: &str = "audio/wav";

/// Size of the reads pulled from the recorder process.
pub const AUDIO_CHUNK_BYTES: usize = 4096;

// ============================================================================
// Model Prompts
// ============================================================================

pub const DRAWING_PROMPT: &str = "Analyze the provided drawing and extract the mathematical equation as a LaTeX string. Only output the LaTeX code.";

pub const SCREENSHOT_PROMPT: &str = "Analyze the provided screenshot image and extract the mathematical equation as a LaTeX string. Only output the LaTeX code.";

pub const AUDIO_PROMPT: &str = "Transcribe the spoken mathematical equation into a LaTeX string. Only output the LaTeX code. Do not use \\boxed{}.";

pub const TEXT_SYSTEM_PROMPT: &str = "You are a mathematical assistant. The user will ask for a formula or equation in natural language. You must respond with ONLY the raw LaTeX code for that equation. Do not include any other text, explanations, or delimiters like $$, ```latex, or ```.";

// ============================================================================
// AI Client
// ============================================================================

/// Base URL for the local Ollama API.
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Base URL for a local OpenAI-compatible server (llama.cpp, vLLM, ...).
pub const OPENAI_COMPAT_BASE_URL: &str = "http://localhost:8080/v1";

/// Default multimodal model pulled into Ollama.
pub const DEFAULT_MODEL: &str = "gemma3:4b";

/// HTTP request timeout for AI operations.
pub const AI_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Low temperature keeps LaTeX output deterministic.
pub const AI_TEMPERATURE: f32 = 0.2;
pub const AI_TOP_P: f32 = 0.9;

/// Earlier prompt/reply messages a session re-sends after its system prompt.
pub const SESSION_HISTORY_MESSAGES: usize = 8;

// ============================================================================
// Typesetting
// ============================================================================

/// Maximum accepted LaTeX source, in bytes.
pub const MAX_LATEX_SIZE_BYTES: usize = 64 * 1024;

/// Timeout for pdflatex and pdftocairo commands in seconds.
pub const COMPILE_TIMEOUT_SECS: u64 = 20;

/// Polling interval for process timeout checking (milliseconds).
pub const PROCESS_POLL_INTERVAL_MS: u64 = 50;

// ============================================================================
// Export
// ============================================================================

/// Prefix of downloaded PNG file names, followed by a unix-millis timestamp.
pub const EXPORT_FILE_PREFIX: &str = "latex-equation-";

pub const PNG_MIME: &str = "image/png";

/// Upper bound on either side of an exported bitmap, in pixels.
pub const MAX_EXPORT_SIDE_PX: u32 = 16_384;
