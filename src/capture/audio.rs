use super::{AudioClip, CaptureError, CaptureResult};
use crate::constants::{
    AUDIO_BITS_PER_SAMPLE, AUDIO_CHANNELS, AUDIO_CHUNK_BYTES, AUDIO_MIME, AUDIO_SAMPLE_RATE,
};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Raw PCM source (16-bit little endian, mono, `AUDIO_SAMPLE_RATE`).
pub trait Microphone: Send {
    fn start(&mut self) -> Result<(), CaptureError>;
    /// Stops capturing and hands back every chunk read since `start`.
    fn stop(&mut self) -> Result<Vec<Vec<u8>>, CaptureError>;
}

/// Enforces a single active recording and turns its chunks into one clip.
pub struct AudioRecorder {
    microphone: Box<dyn Microphone>,
    recording: bool,
}

impl AudioRecorder {
    pub fn new(microphone: Box<dyn Microphone>) -> Self {
        Self {
            microphone,
            recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.recording {
            return Err(CaptureError::Busy);
        }
        self.microphone.start()?;
        self.recording = true;
        tracing::info!("Recording started");
        Ok(())
    }

    /// Finalizes the buffered chunks as a WAV clip with the audio prompt.
    pub fn stop(&mut self) -> Result<CaptureResult, CaptureError> {
        if !self.recording {
            return Err(CaptureError::NotRecording);
        }
        self.recording = false;
        let chunks = self.microphone.stop()?;
        let pcm = chunks.concat();
        tracing::info!(bytes = pcm.len(), chunks = chunks.len(), "Recording stopped");
        Ok(CaptureResult::audio(AudioClip {
            bytes: wav_from_pcm(&pcm, AUDIO_SAMPLE_RATE, AUDIO_CHANNELS, AUDIO_BITS_PER_SAMPLE),
            mime: AUDIO_MIME.to_string(),
        }))
    }
}

/// Prepends the 44-byte RIFF/WAVE header to raw PCM.
pub fn wav_from_pcm(pcm: &[u8], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * block_align as u32;
    let data_len = pcm.len() as u32;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

/// ALSA capture through an `arecord` child writing raw PCM to stdout.
#[derive(Default)]
pub struct ArecordMicrophone {
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ArecordMicrophone {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Microphone for ArecordMicrophone {
    fn start(&mut self) -> Result<(), CaptureError> {
        let mut child = Command::new("arecord")
            .args(["-q", "-t", "raw", "-f", "S16_LE", "-c"])
            .arg(AUDIO_CHANNELS.to_string())
            .arg("-r")
            .arg(AUDIO_SAMPLE_RATE.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CaptureError::CommandIo {
                command: "arecord".to_string(),
                source,
            })?;

        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CaptureError::Platform(
                "microphone stream unavailable".to_string(),
            ));
        };

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&chunks);
        let reader = std::thread::spawn(move || {
            let mut buf = vec![0u8; AUDIO_CHUNK_BYTES];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Ok(mut chunks) = sink.lock() {
                            chunks.push(buf[..n].to_vec());
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Microphone read failed: {}", e);
                        break;
                    }
                }
            }
        });

        self.chunks = chunks;
        self.child = Some(child);
        self.reader = Some(reader);
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<Vec<u8>>, CaptureError> {
        let Some(mut child) = self.child.take() else {
            return Ok(Vec::new());
        };
        // An early exit means arecord never got the device.
        let exited_early = matches!(child.try_wait(), Ok(Some(status)) if !status.success());
        let _ = child.kill();
        let _ = child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }

        if exited_early {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                let _ = err.read_to_string(&mut stderr);
            }
            return Err(CaptureError::Platform(if stderr.trim().is_empty() {
                "microphone could not be opened".to_string()
            } else {
                stderr.trim().to_string()
            }));
        }

        let chunks = match self.chunks.lock() {
            Ok(mut chunks) => std::mem::take(&mut *chunks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        Ok(chunks)
    }
}

impl Drop for ArecordMicrophone {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
