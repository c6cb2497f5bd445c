//! MathNano: turn a sketch, a screen region, speech or a question into
//! LaTeX with a local model, preview it live and export it as PNG.

pub mod api;
pub mod capture;
pub mod clipboard;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod export;
pub mod extract;
pub mod logging;
pub mod pipeline;
pub mod preview;
pub mod queue;
pub mod session;
pub mod settings;
pub mod typeset;

#[cfg(feature = "gui")]
pub mod ui;

#[cfg(test)]
mod fakes;
