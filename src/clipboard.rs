use crate::constants::PNG_MIME;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use thiserror::Error;

const WL_COPY_COMMAND: &str = "wl-copy";
const XCLIP_COMMAND: &str = "xclip";

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("failed to run {command}: {source}")]
    CommandIo {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("clipboard command exited with non-zero status: {status}")]
    CommandFailed { status: String },
}

pub type ClipboardResult<T> = std::result::Result<T, ClipboardError>;

/// Places an `image/png` payload on the system clipboard.
pub trait ClipboardBackend {
    fn copy_png(&self, png: &[u8]) -> ClipboardResult<()>;
}

/// Pipes the PNG into `wl-copy` on Wayland sessions, `xclip` elsewhere.
#[derive(Debug, Default)]
pub struct CommandClipboard;

impl CommandClipboard {
    fn command() -> (&'static str, Vec<&'static str>) {
        if std::env::var_os("WAYLAND_DISPLAY").is_some() {
            (WL_COPY_COMMAND, vec!["--type", PNG_MIME])
        } else {
            (XCLIP_COMMAND, vec!["-selection", "clipboard", "-t", PNG_MIME])
        }
    }
}

impl ClipboardBackend for CommandClipboard {
    fn copy_png(&self, png: &[u8]) -> ClipboardResult<()> {
        let (command, args) = Self::command();
        let io_err = |source| ClipboardError::CommandIo {
            command: command.to_string(),
            source,
        };
        let mut child = Command::new(command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(io_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(png) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io_err(err));
            }
        }

        let status = child.wait().map_err(io_err)?;
        if status.success() {
            tracing::debug!(command, bytes = png.len(), "Copied PNG to clipboard");
            Ok(())
        } else {
            Err(ClipboardError::CommandFailed {
                status: status.to_string(),
            })
        }
    }
}
