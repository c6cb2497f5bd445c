//! LaTeX to SVG typesetting.

use crate::constants::{COMPILE_TIMEOUT_SECS, MAX_LATEX_SIZE_BYTES, PROCESS_POLL_INTERVAL_MS};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fs;
use std::process::{Command, Output};
use std::time::{Duration, Instant};
use tempfile::tempdir;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesetError {
    #[error("Formula too large ({size} bytes). Maximum allowed size is {max} bytes.")]
    TooLarge { size: usize, max: usize },
    #[error("{0}")]
    Engine(String),
    #[error("LaTeX error: {0}")]
    Syntax(String),
    #[error("Typesetter produced no output: {0}")]
    NoOutput(String),
}

/// Renders a math source string (including its `$$` delimiters) to SVG.
pub trait Typesetter: Send + Sync {
    fn typeset(&self, source: &str) -> Result<String, TypesetError>;
}

/// Returns true when the SVG carries an embedded typeset error node, or is
/// not well-formed markup at all.
pub fn has_error_marker(svg: &str) -> bool {
    let mut reader = Reader::from_str(svg);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"merror" || name.as_ref() == b"mjx-merror" {
                    return true;
                }
                for attr in e.attributes().flatten() {
                    let key = attr.key.local_name();
                    let value = attr.value.as_ref();
                    let marked = match key.as_ref() {
                        b"data-mml-node" => value == b"merror",
                        b"class" => value
                            .split(|b| b.is_ascii_whitespace())
                            .any(|c| c == b"merror" || c == b"mjx-merror"),
                        _ => false,
                    };
                    if marked {
                        return true;
                    }
                }
            }
            Ok(Event::Eof) => return false,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Typeset output is not well-formed: {}", e);
                return true;
            }
        }
    }
}

/// Probes for the external programs `LatexTypesetter` shells out to.
pub fn missing_tools() -> Vec<String> {
    let mut missing = Vec::new();
    if Command::new("pdflatex").arg("--version").output().is_err() {
        missing.push("pdflatex (texlive-latex-base)".to_string());
    }
    if Command::new("pdftocairo").arg("-v").output().is_err() {
        missing.push("pdftocairo (poppler-utils)".to_string());
    }
    missing
}

/// Standalone document compiled with `pdflatex`, converted with
/// `pdftocairo -svg`. Glyph fills are rewritten to `currentColor` so the
/// configured font color applies.
#[derive(Clone, Debug)]
pub struct LatexTypesetter {
    timeout_secs: u64,
}

impl Default for LatexTypesetter {
    fn default() -> Self {
        Self::new()
    }
}

impl LatexTypesetter {
    pub fn new() -> Self {
        Self {
            timeout_secs: COMPILE_TIMEOUT_SECS,
        }
    }

    fn sanitize_paths(text: &str, temp_dir: &str, input_path: &str) -> String {
        text.replace(input_path, "[TEMP_DIR]/doc.tex")
            .replace(temp_dir, "[TEMP_DIR]")
    }

    fn run_command_with_timeout(cmd: &mut Command, timeout_secs: u64) -> Result<Output, String> {
        let mut child = cmd
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| format!("Failed to spawn command: {}", e))?;
        let start = Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        while start.elapsed() < timeout {
            match child.try_wait() {
                Ok(Some(_)) => {
                    return child
                        .wait_with_output()
                        .map_err(|e| format!("Failed to get output: {}", e));
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(PROCESS_POLL_INTERVAL_MS)),
                Err(e) => return Err(format!("Error waiting for child: {}", e)),
            }
        }
        let _ = child.kill();
        let _ = child.wait();
        Err(format!("Command timed out after {} seconds", timeout_secs))
    }

    /// `$$x$$` becomes `$\displaystyle x$`; anything else is used as is.
    fn document(source: &str) -> String {
        let trimmed = source.trim();
        let body = match trimmed
            .strip_prefix("$$")
            .and_then(|rest| rest.strip_suffix("$$"))
        {
            Some(inner) => format!("$\\displaystyle {}$", inner.trim()),
            None => trimmed.to_string(),
        };
        format!(
            "\\documentclass[preview,border=1pt]{{standalone}}\n\
             \\usepackage{{amsmath,amssymb}}\n\
             \\begin{{document}}\n{}\n\\end{{document}}\n",
            body
        )
    }

    /// First `! ...` line of a TeX log, with the line number that follows it.
    fn first_log_error(log: &str) -> Option<String> {
        let mut lines = log.lines();
        while let Some(line) = lines.next() {
            if let Some(msg) = line.strip_prefix("! ") {
                let location = lines
                    .find(|l| l.starts_with("l."))
                    .map(|l| format!(" ({})", l.split_whitespace().next().unwrap_or(l)))
                    .unwrap_or_default();
                return Some(format!("{}{}", msg.trim(), location));
            }
        }
        None
    }

    fn current_color(svg: String) -> String {
        svg.replace("rgb(0%, 0%, 0%)", "currentColor")
            .replace("rgb(0%,0%,0%)", "currentColor")
    }
}

impl Typesetter for LatexTypesetter {
    fn typeset(&self, source: &str) -> Result<String, TypesetError> {
        if source.len() > MAX_LATEX_SIZE_BYTES {
            return Err(TypesetError::TooLarge {
                size: source.len(),
                max: MAX_LATEX_SIZE_BYTES,
            });
        }

        let dir = tempdir().map_err(|e| TypesetError::Engine(format!("Failed to create temp dir: {}", e)))?;
        let input_path = dir.path().join("doc.tex");
        let temp_dir_path = dir.path().to_string_lossy().to_string();
        let input_path_str = input_path.to_string_lossy().to_string();
        let sanitize = |text: &str| Self::sanitize_paths(text, &temp_dir_path, &input_path_str);

        fs::write(&input_path, Self::document(source))
            .map_err(|e| TypesetError::Engine(sanitize(&format!("Failed to write tex file: {}", e))))?;

        let mut cmd = Command::new("pdflatex");
        cmd.arg("-no-shell-escape")
            .arg("-interaction=nonstopmode")
            .arg("-halt-on-error")
            .arg("-output-directory")
            .arg(dir.path())
            .arg(&input_path);
        let output = Self::run_command_with_timeout(&mut cmd, self.timeout_secs).map_err(|e| {
            TypesetError::Engine(sanitize(&format!("Failed to run pdflatex: {}. Is it installed?", e)))
        })?;

        let log = fs::read_to_string(dir.path().join("doc.log")).unwrap_or_default();
        if let Some(err) = Self::first_log_error(&log) {
            return Err(TypesetError::Syntax(sanitize(&err)));
        }
        let pdf_path = dir.path().join("doc.pdf");
        if !pdf_path.exists() {
            let stderr = sanitize(&String::from_utf8_lossy(&output.stderr));
            return Err(TypesetError::NoOutput(format!(
                "pdflatex did not produce a PDF. {}",
                stderr.trim()
            )));
        }

        let svg_path = dir.path().join("doc.svg");
        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-svg").arg(&pdf_path).arg(&svg_path);
        let cairo_output = Self::run_command_with_timeout(&mut cmd, self.timeout_secs).map_err(|e| {
            TypesetError::Engine(sanitize(&format!(
                "Failed to run pdftocairo: {}. Is poppler-utils installed?",
                e
            )))
        })?;
        if !cairo_output.status.success() {
            return Err(TypesetError::Engine(sanitize(&format!(
                "pdftocairo failed to convert PDF to SVG: {}",
                String::from_utf8_lossy(&cairo_output.stderr).trim()
            ))));
        }

        let svg = fs::read_to_string(&svg_path)
            .map_err(|e| TypesetError::NoOutput(sanitize(&e.to_string())))?;
        if !svg.contains("<svg") {
            return Err(TypesetError::NoOutput("output is not an SVG document".to_string()));
        }
        Ok(Self::current_color(svg))
    }
}
