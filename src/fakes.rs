//! Scripted collaborators shared by unit tests.

use crate::api::{
    ApiError, Availability, Message, Modality, ModelService, ModelSession, SessionOptions,
};
use crate::capture::audio::Microphone;
use crate::capture::crop::ScreenCapturer;
use crate::capture::CaptureError;
use crate::clipboard::{ClipboardBackend, ClipboardError};
use crate::typeset::{TypesetError, Typesetter};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Script {
    base: Option<Availability>,
    modalities: HashMap<Modality, Availability>,
    fail_creation: bool,
    replies: VecDeque<Result<String, String>>,
    options: Vec<SessionOptions>,
    received: Vec<Vec<Message>>,
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    creations: AtomicUsize,
    prompts: AtomicUsize,
    destroyed: AtomicUsize,
}

impl Shared {
    fn next_reply(&self, content: Vec<Message>) -> Result<String, ApiError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        script.received.push(content);
        match script.replies.pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(ApiError::Response(e)),
            None => Ok(String::new()),
        }
    }
}

/// Model backend whose probes and replies are scripted by the test.
#[derive(Default)]
pub struct FakeService {
    shared: Arc<Shared>,
}

impl FakeService {
    pub fn available() -> Arc<Self> {
        Self::with_base(Availability::Available)
    }

    pub fn with_base(base: Availability) -> Arc<Self> {
        let service = Self::default();
        service.shared.script.lock().unwrap().base = Some(base);
        Arc::new(service)
    }

    pub fn set_modality(&self, modality: Modality, availability: Availability) {
        self.shared
            .script
            .lock()
            .unwrap()
            .modalities
            .insert(modality, availability);
    }

    pub fn fail_creation(&self, fail: bool) {
        self.shared.script.lock().unwrap().fail_creation = fail;
    }

    pub fn push_reply(&self, reply: Result<&str, &str>) {
        self.shared
            .script
            .lock()
            .unwrap()
            .replies
            .push_back(reply.map(str::to_string).map_err(str::to_string));
    }

    pub fn creations(&self) -> usize {
        self.shared.creations.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> usize {
        self.shared.prompts.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    pub fn created_options(&self) -> Vec<SessionOptions> {
        self.shared.script.lock().unwrap().options.clone()
    }

    pub fn received(&self) -> Vec<Vec<Message>> {
        self.shared.script.lock().unwrap().received.clone()
    }
}

#[async_trait]
impl ModelService for FakeService {
    fn name(&self) -> &str {
        "Fake"
    }

    async fn availability(&self, modality: Option<Modality>) -> Result<Availability, ApiError> {
        let script = self.shared.script.lock().unwrap();
        let base = script.base.unwrap_or(Availability::Unavailable);
        Ok(match modality {
            None => base,
            Some(m) => script.modalities.get(&m).copied().unwrap_or(base),
        })
    }

    async fn create_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<dyn ModelSession>, ApiError> {
        let mut script = self.shared.script.lock().unwrap();
        if script.fail_creation {
            return Err(ApiError::Response("creation refused".to_string()));
        }
        script.options.push(options);
        self.shared.creations.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeSession {
            shared: Arc::clone(&self.shared),
            alive: AtomicBool::new(true),
        }))
    }
}

struct FakeSession {
    shared: Arc<Shared>,
    alive: AtomicBool,
}

#[async_trait]
impl ModelSession for FakeSession {
    async fn prompt(&self, content: Vec<Message>) -> Result<String, ApiError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ApiError::SessionDestroyed);
        }
        self.shared.next_reply(content)
    }

    fn destroy(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.shared.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A 20x30 glyph box drawn with `currentColor`.
pub const FRACTION_SVG: &str = r#"<svg width="20" height="30" viewBox="0 0 20 30"><rect x="2" y="2" width="16" height="26" fill="currentColor"/></svg>"#;

/// Output of an engine that embeds an error node instead of failing.
pub const MERROR_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="12"><g data-mml-node="merror"><rect width="40" height="12" fill="#ff0"/></g></svg>"##;

/// Typesetter that returns `FRACTION_SVG`, an error node for sources
/// containing `\error`, and an engine failure for sources containing `\crash`.
#[derive(Default)]
pub struct FakeTypesetter {
    pub calls: Mutex<Vec<String>>,
}

impl Typesetter for FakeTypesetter {
    fn typeset(&self, source: &str) -> Result<String, TypesetError> {
        self.calls.lock().unwrap().push(source.to_string());
        if source.contains("\\crash") {
            Err(TypesetError::Engine("engine exploded".to_string()))
        } else if source.contains("\\error") {
            Ok(MERROR_SVG.to_string())
        } else {
            Ok(FRACTION_SVG.to_string())
        }
    }
}

pub struct FakeCapturer {
    pub png: Result<Vec<u8>, String>,
    pub calls: AtomicUsize,
}

impl FakeCapturer {
    pub fn new(png: Vec<u8>) -> Self {
        Self {
            png: Ok(png),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            png: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl ScreenCapturer for FakeCapturer {
    fn capture_visible(&self) -> Result<Vec<u8>, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.png.clone().map_err(CaptureError::Platform)
    }
}

#[derive(Default)]
pub struct FakeMicrophone {
    pub chunks: Vec<Vec<u8>>,
    pub deny: bool,
    pub running: bool,
}

impl Microphone for FakeMicrophone {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.deny {
            return Err(CaptureError::Platform("Permission denied".to_string()));
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<Vec<u8>>, CaptureError> {
        self.running = false;
        Ok(std::mem::take(&mut self.chunks))
    }
}

#[derive(Default)]
pub struct FakeClipboard {
    pub copied: Mutex<Vec<Vec<u8>>>,
    pub fail: bool,
}

impl ClipboardBackend for FakeClipboard {
    fn copy_png(&self, png: &[u8]) -> Result<(), ClipboardError> {
        if self.fail {
            return Err(ClipboardError::CommandFailed {
                status: "exit status: 1".to_string(),
            });
        }
        self.copied.lock().unwrap().push(png.to_vec());
        Ok(())
    }
}
