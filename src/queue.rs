use crate::preview::{TypesetJob, TypesetOutcome};
use crate::typeset::{TypesetError, Typesetter};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A typeset queue that runs one job at a time on a dedicated worker.
///
/// Jobs that pile up while the worker is busy are coalesced: only the newest
/// is typeset, older generations are stale by the time they would run.
pub struct TypesetQueue {
    sender: mpsc::UnboundedSender<TypesetJob>,
    worker_handle: JoinHandle<()>,
}

impl TypesetQueue {
    /// Spawns the worker on the current tokio runtime. Outcomes are posted
    /// on the returned receiver in completion order.
    pub fn new(typesetter: Arc<dyn Typesetter>) -> (Self, mpsc::UnboundedReceiver<TypesetOutcome>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<TypesetJob>();
        let (outcome_sender, outcomes) = mpsc::unbounded_channel::<TypesetOutcome>();

        let worker_handle = tokio::spawn(async move {
            while let Some(mut job) = receiver.recv().await {
                while let Ok(newer) = receiver.try_recv() {
                    tracing::debug!(skipped = job.generation, "Coalescing typeset job");
                    job = newer;
                }

                let typesetter = Arc::clone(&typesetter);
                let source = job.source;
                let start = std::time::Instant::now();
                let result = tokio::task::spawn_blocking(move || typesetter.typeset(&source))
                    .await
                    .unwrap_or_else(|e| Err(TypesetError::Engine(format!("Typeset task error: {}", e))));
                tracing::info!(
                    generation = job.generation,
                    "Typesetting completed in {:.2}s",
                    start.elapsed().as_secs_f64()
                );

                let outcome = TypesetOutcome {
                    generation: job.generation,
                    result,
                };
                if outcome_sender.send(outcome).is_err() {
                    break;
                }
            }
            tracing::debug!("Typeset worker shutting down");
        });

        (
            Self {
                sender,
                worker_handle,
            },
            outcomes,
        )
    }

    /// Hands a job to the worker. Returns false once the worker is gone.
    pub fn enqueue(&self, job: TypesetJob) -> bool {
        if self.sender.send(job).is_err() {
            tracing::warn!("Typeset worker unavailable, dropping job");
            return false;
        }
        true
    }

    /// Closes the queue and waits for the in-flight job to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        match self.worker_handle.await {
            Ok(()) => tracing::debug!("Typeset worker shut down cleanly"),
            Err(e) => tracing::warn!("Typeset worker panicked: {}", e),
        }
    }
}
