//! Live preview state machine.
//!
//! Every buffer change bumps the generation; only the outcome carrying the
//! current generation is applied, so superseded typeset calls never need to
//! be cancelled.

use crate::settings::{ImageSettings, Rgba};
use crate::typeset::{has_error_marker, TypesetError};

/// Shown when the typeset output embeds an error node.
pub const INVALID_SYNTAX_TEXT: &str = "Invalid LaTeX syntax. Preview shows details.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewState {
    Empty,
    Pending,
    Valid,
    /// Carries the diagnostic shown to the user.
    Invalid(String),
}

/// One request for the typesetter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypesetJob {
    pub generation: u64,
    /// Buffer wrapped in display-math delimiters.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypesetOutcome {
    pub generation: u64,
    pub result: Result<String, TypesetError>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Background {
    Solid(Rgba),
    /// Drawn behind a transparent export so the alpha is visible.
    Checkerboard,
}

/// Transforms applied to the preview container independently of typeset
/// completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Presentation {
    pub font_color: Rgba,
    pub scale: f64,
    pub background: Background,
}

impl Presentation {
    pub fn from_settings(settings: &ImageSettings) -> Self {
        Self {
            font_color: settings.font_rgba(),
            scale: settings.scale,
            background: if settings.transparent {
                Background::Checkerboard
            } else {
                Background::Solid(settings.bg_rgba())
            },
        }
    }
}

#[derive(Debug)]
pub struct PreviewEngine {
    state: PreviewState,
    generation: u64,
    svg: Option<String>,
}

impl Default for PreviewEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewEngine {
    pub fn new() -> Self {
        Self {
            state: PreviewState::Empty,
            generation: 0,
            svg: None,
        }
    }

    pub fn state(&self) -> &PreviewState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_valid(&self) -> bool {
        self.state == PreviewState::Valid
    }

    /// Last rendered markup, including output that carries error nodes.
    pub fn svg(&self) -> Option<&str> {
        self.svg.as_deref()
    }

    /// Markup of the current buffer, only when it typeset cleanly.
    pub fn valid_svg(&self) -> Option<&str> {
        if self.is_valid() {
            self.svg.as_deref()
        } else {
            None
        }
    }

    /// Starts a recomputation for `latex`. A blank buffer resets to `Empty`
    /// and needs no typesetting.
    pub fn submit(&mut self, latex: &str) -> Option<TypesetJob> {
        self.generation += 1;
        self.svg = None;
        let latex = latex.trim();
        if latex.is_empty() {
            self.state = PreviewState::Empty;
            return None;
        }
        self.state = PreviewState::Pending;
        Some(TypesetJob {
            generation: self.generation,
            source: format!("$${}$$", latex),
        })
    }

    /// Applies a typeset result. Returns false for superseded generations.
    pub fn complete(&mut self, outcome: TypesetOutcome) -> bool {
        if outcome.generation != self.generation || self.state != PreviewState::Pending {
            tracing::debug!(
                generation = outcome.generation,
                current = self.generation,
                "Ignoring stale typeset result"
            );
            return false;
        }
        match outcome.result {
            Ok(svg) => {
                self.state = if has_error_marker(&svg) {
                    PreviewState::Invalid(INVALID_SYNTAX_TEXT.to_string())
                } else {
                    PreviewState::Valid
                };
                self.svg = Some(svg);
            }
            Err(e) => {
                tracing::debug!("Typesetting failed: {}", e);
                self.state = PreviewState::Invalid(format!("Typesetting error: {}", e));
                self.svg = None;
            }
        }
        true
    }
}
