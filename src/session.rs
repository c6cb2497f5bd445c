//! Lazily created, per-modality model sessions behind one availability gate.

use crate::api::{ApiError, Availability, Message, Modality, ModelService, ModelSession, SessionOptions};
use crate::constants::TEXT_SYSTEM_PROMPT;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Absent,
    Initializing,
    Ready,
}

enum Slot {
    Absent,
    Initializing,
    Ready(Arc<dyn ModelSession>),
}

impl Slot {
    fn state(&self) -> SlotState {
        match self {
            Slot::Absent => SlotState::Absent,
            Slot::Initializing => SlotState::Initializing,
            Slot::Ready(_) => SlotState::Ready,
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("AI Model is not available. Please check the model settings.")]
    GloballyUnavailable,
    #[error("AI Model for '{modality}' is not available. Status: {status}")]
    ModalityUnavailable {
        modality: Modality,
        status: Availability,
    },
    #[error("Could not check AI availability for '{modality}': {source}")]
    Probe {
        modality: Modality,
        #[source]
        source: ApiError,
    },
    #[error("Failed to create AI session: {0}")]
    Create(#[source] ApiError),
    #[error("{0} session is still initializing")]
    Busy(Modality),
    #[error("{0} session was released while it was being created")]
    Released(Modality),
    #[error("{0}")]
    Prompt(#[source] ApiError),
}

/// Owns up to one session per modality.
///
/// Cloning is cheap; clones share the same slots and availability flag.
#[derive(Clone)]
pub struct SessionManager {
    service: Arc<dyn ModelService>,
    available: Arc<AtomicBool>,
    slots: Arc<Mutex<HashMap<Modality, Slot>>>,
}

impl SessionManager {
    pub fn new(service: Arc<dyn ModelService>) -> Self {
        Self {
            service,
            available: Arc::new(AtomicBool::new(false)),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Modality, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Runs the global probe for the base model and records the gate.
    pub async fn initialize(&self) -> Availability {
        let status = match self.service.availability(None).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("Error checking model availability: {}", e);
                Availability::Unavailable
            }
        };
        self.available.store(status.is_available(), Ordering::SeqCst);
        if status.is_available() {
            tracing::info!(provider = self.service.name(), "Language model is available");
        } else {
            tracing::warn!(provider = self.service.name(), %status, "Language model not available");
        }
        status
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn slot_state(&self, modality: Modality) -> SlotState {
        self.slots()
            .get(&modality)
            .map(Slot::state)
            .unwrap_or(SlotState::Absent)
    }

    /// Returns the live session for `modality`, creating it on first use.
    ///
    /// Failures leave the slot `Absent`; nothing is retried automatically.
    pub async fn get_or_create(
        &self,
        modality: Modality,
    ) -> Result<Arc<dyn ModelSession>, SessionError> {
        if !self.is_available() {
            return Err(SessionError::GloballyUnavailable);
        }
        {
            let mut slots = self.slots();
            match slots.get(&modality) {
                Some(Slot::Ready(session)) => return Ok(session.clone()),
                Some(Slot::Initializing) => return Err(SessionError::Busy(modality)),
                _ => {}
            }
            slots.insert(modality, Slot::Initializing);
        }

        let result = self.create(modality).await;

        let mut slots = self.slots();
        match result {
            Ok(session) => {
                if matches!(slots.get(&modality), Some(Slot::Initializing)) {
                    slots.insert(modality, Slot::Ready(session.clone()));
                    Ok(session)
                } else {
                    drop(slots);
                    session.destroy();
                    Err(SessionError::Released(modality))
                }
            }
            Err(e) => {
                slots.insert(modality, Slot::Absent);
                Err(e)
            }
        }
    }

    async fn create(&self, modality: Modality) -> Result<Arc<dyn ModelSession>, SessionError> {
        let status = self
            .service
            .availability(Some(modality))
            .await
            .map_err(|source| SessionError::Probe { modality, source })?;
        if !status.is_available() {
            tracing::error!(%modality, %status, "Model not available for modality");
            return Err(SessionError::ModalityUnavailable { modality, status });
        }

        let options = SessionOptions {
            modality,
            system_prompt: (modality == Modality::Text).then(|| TEXT_SYSTEM_PROMPT.to_string()),
        };
        let session = self.service.create_session(options).await.map_err(|e| {
            tracing::error!(%modality, "Session creation error: {}", e);
            SessionError::Create(e)
        })?;
        tracing::info!(%modality, "AI session initialized");
        Ok(session)
    }

    /// Sends one prompt; any failure tears the session down so the next call
    /// starts from `Absent`.
    pub async fn prompt(
        &self,
        modality: Modality,
        content: Vec<Message>,
    ) -> Result<String, SessionError> {
        let session = self.get_or_create(modality).await?;
        match session.prompt(content).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::error!(%modality, "Prompt failed, discarding session: {}", e);
                self.discard(modality, &session);
                Err(SessionError::Prompt(e))
            }
        }
    }

    fn discard(&self, modality: Modality, session: &Arc<dyn ModelSession>) {
        {
            let mut slots = self.slots();
            if let Some(Slot::Ready(current)) = slots.get(&modality) {
                if Arc::ptr_eq(current, session) {
                    slots.insert(modality, Slot::Absent);
                }
            }
        }
        session.destroy();
    }

    pub fn destroy(&self, modality: Modality) {
        let previous = self.slots().insert(modality, Slot::Absent);
        if let Some(Slot::Ready(session)) = previous {
            session.destroy();
            tracing::info!(%modality, "Session destroyed");
        }
    }

    /// Releases every session regardless of its state.
    pub fn destroy_all(&self) {
        for modality in Modality::ALL {
            self.destroy(modality);
        }
    }
}
