use crate::apply::{Applier, ApplyOptions};
use crate::checkpoint::CheckpointStore;
use crate::event::parse_event;
use crate::position::PositionToken;
use crate::transform::{apply_transformations, TransformRule, TransformationService};
use adapter::{ChangeStream, DataOps, Error, ReplicationOps};
use exponential_backoff::Backoff;
use futures::FutureExt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use usm::DatabaseType;

/// Lifecycle of a replication source.
///
/// New -> Active -> Streaming -> Stopped -> Active (resume) -> ... -> Closed
///
/// Active and Streaming are equivalent for scheduling; Streaming only
/// records that the stream has yielded events. Stopped preserves the
/// position for resume. Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    New,
    Active,
    Streaming,
    Stopped,
    Closed,
}

#[derive(Clone)]
pub struct SourceConfig {
    pub source_id: String,
    pub database_id: String,
    /// Restrict the stream to one table; None captures the database.
    pub table_name: Option<String>,
    /// Resume position. Empty or None starts from the stream's beginning
    /// (or the stored checkpoint, when a checkpoint store is configured).
    pub position: Option<String>,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub apply_options: ApplyOptions,
    /// Retries for transient failures within one window before the
    /// source gives up and goes through a full backoff cycle again.
    pub max_transient_retries: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            source_id: String::new(),
            database_id: String::new(),
            table_name: None,
            position: None,
            poll_interval: Duration::from_secs(1),
            batch_size: 256,
            apply_options: ApplyOptions::default(),
            max_transient_retries: 5,
        }
    }
}

/// How long stop/close wait for the stream task to drain after
/// cancellation before abandoning the join.
const DRAIN_WINDOW: Duration = Duration::from_secs(5);

struct Shared {
    config: SourceConfig,
    source_db: DatabaseType,
    replication: Arc<dyn ReplicationOps>,
    applier: Applier,
    transforms: Vec<TransformRule>,
    transform_service: Option<Arc<dyn TransformationService>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    state: RwLock<SourceState>,
    position: RwLock<Option<String>>,
    is_active: RwLock<bool>,
}

impl Shared {
    fn set_state(&self, next: SourceState) {
        *self.state.write().expect("state lock is never poisoned") = next;
        *self.is_active.write().expect("state lock is never poisoned") =
            matches!(next, SourceState::Active | SourceState::Streaming);
    }

    fn state(&self) -> SourceState {
        *self.state.read().expect("state lock is never poisoned")
    }

    fn position(&self) -> Option<String> {
        self.position
            .read()
            .expect("position lock is never poisoned")
            .clone()
    }

    fn set_position(&self, position: String) {
        *self
            .position
            .write()
            .expect("position lock is never poisoned") = Some(position);
    }

    async fn save_checkpoint(&self, position: &str) {
        if let Some(store) = &self.checkpoints {
            if let Err(error) = store.save(&self.config.source_id, position).await {
                tracing::warn!(
                    source_id = %self.config.source_id,
                    %error,
                    "failed to persist checkpoint; position is retained in memory"
                );
            }
        }
    }
}

/// One long-lived replication source: a native change stream, the
/// normalizer, an optional transformation stage, and the applier against
/// the target, driven by a single owned task.
pub struct CdcSource {
    shared: Arc<Shared>,
    cancel: Mutex<Option<CancellationToken>>,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CdcSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SourceConfig,
        source_db: DatabaseType,
        target_db: DatabaseType,
        replication: Arc<dyn ReplicationOps>,
        target_data: Arc<dyn DataOps>,
        transforms: Vec<TransformRule>,
        transform_service: Option<Arc<dyn TransformationService>>,
        checkpoints: Option<Arc<dyn CheckpointStore>>,
    ) -> CdcSource {
        let applier = Applier::new(target_db, target_data, config.apply_options);
        let position = config.position.clone().filter(|p| !p.is_empty());
        CdcSource {
            shared: Arc::new(Shared {
                config,
                source_db,
                replication,
                applier,
                transforms,
                transform_service,
                checkpoints,
                state: RwLock::new(SourceState::New),
                position: RwLock::new(position),
                is_active: RwLock::new(false),
            }),
            cancel: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> SourceState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        *self
            .shared
            .is_active
            .read()
            .expect("state lock is never poisoned")
    }

    pub fn get_position(&self) -> Option<String> {
        self.shared.position()
    }

    /// Validate and install a resume position.
    pub fn set_position(&self, position: &str) -> Result<(), Error> {
        let token = PositionToken::parse(position)?;
        self.shared.set_position(token.as_str().to_string());
        Ok(())
    }

    pub async fn save_checkpoint(&self) -> Result<(), Error> {
        match self.shared.position() {
            Some(position) => {
                self.shared.save_checkpoint(&position).await;
                Ok(())
            }
            None => Err(Error::InvalidData(
                "source has no position to checkpoint".to_string(),
            )),
        }
    }

    /// Open the native stream and begin the poll loop. Resumes from the
    /// in-memory position, the stored checkpoint, or the beginning, in
    /// that order. Starting an active source is a no-op.
    pub async fn start(&self) -> Result<(), Error> {
        match self.state() {
            SourceState::Closed => {
                return Err(Error::InvalidData(format!(
                    "source '{}' is closed",
                    self.shared.config.source_id
                )))
            }
            SourceState::Active | SourceState::Streaming => return Ok(()),
            SourceState::New | SourceState::Stopped => (),
        }

        if self.shared.position().is_none() {
            if let Some(store) = &self.shared.checkpoints {
                if let Ok(Some(stored)) = store.load(&self.shared.config.source_id).await {
                    self.shared.set_position(stored);
                }
            }
        }

        let stream = self
            .shared
            .replication
            .open_change_stream(
                &self.shared.config.source_id,
                self.shared.config.table_name.as_deref(),
            )
            .await?;

        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock is never poisoned") = Some(cancel.clone());
        self.shared.set_state(SourceState::Active);

        let shared = self.shared.clone();
        let handle = tokio::spawn(stream_loop(shared, stream, cancel));
        *self.task.lock().await = Some(handle);

        tracing::info!(
            source_id = %self.shared.config.source_id,
            db = %self.shared.source_db,
            position = self.shared.position().as_deref().unwrap_or("<beginning>"),
            "started replication source"
        );
        Ok(())
    }

    /// Cancel the stream task and wait for it to drain, preserving the
    /// position for a later resume. Idempotent.
    pub async fn stop(&self) -> Result<(), Error> {
        match self.state() {
            SourceState::Closed | SourceState::Stopped | SourceState::New => return Ok(()),
            SourceState::Active | SourceState::Streaming => (),
        }
        self.halt_task().await;
        self.shared.set_state(SourceState::Stopped);
        tracing::info!(source_id = %self.shared.config.source_id, "stopped replication source");
        Ok(())
    }

    /// Stop if needed and transition to the terminal state. Idempotent;
    /// a closed source cannot be restarted.
    pub async fn close(&self) -> Result<(), Error> {
        if self.state() == SourceState::Closed {
            return Ok(());
        }
        self.halt_task().await;
        self.shared.set_state(SourceState::Closed);
        tracing::info!(source_id = %self.shared.config.source_id, "closed replication source");
        Ok(())
    }

    async fn halt_task(&self) {
        // Cancel the native cursor's context first, then join the task
        // within the drain window even if native I/O is wedged.
        if let Some(cancel) = self
            .cancel
            .lock()
            .expect("cancel lock is never poisoned")
            .take()
        {
            cancel.cancel();
        }
        if let Some(handle) = self.task.lock().await.take() {
            match tokio::time::timeout(DRAIN_WINDOW, handle).await {
                Ok(Ok(())) => (),
                Ok(Err(join_error)) => {
                    tracing::error!(
                        source_id = %self.shared.config.source_id,
                        %join_error,
                        "stream task ended abnormally"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        source_id = %self.shared.config.source_id,
                        "stream task did not drain within {DRAIN_WINDOW:?}; abandoning join"
                    );
                }
            }
        }
    }
}

/// The per-source task: poll one window per tick, retry transient
/// failures with bounded backoff, stop permanently on fatal errors. A
/// panic inside apply is caught and treated as a window failure, so the
/// position stays at the prior checkpoint and the events are retried.
async fn stream_loop(
    shared: Arc<Shared>,
    mut stream: Box<dyn ChangeStream>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(shared.config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let backoff = Backoff::new(
        shared.config.max_transient_retries,
        Duration::from_millis(100),
        Some(Duration::from_secs(30)),
    );
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => (),
        }

        match process_window(&shared, stream.as_mut()).await {
            Ok(applied) => {
                consecutive_failures = 0;
                if applied > 0 {
                    shared.set_state(SourceState::Streaming);
                }
            }
            Err(error) if error.is_transient() => {
                consecutive_failures += 1;
                let Some(delay) = backoff.next(consecutive_failures) else {
                    tracing::error!(
                        source_id = %shared.config.source_id,
                        %error,
                        "transient failures exhausted retries; stopping source"
                    );
                    shared.set_state(SourceState::Stopped);
                    break;
                };
                tracing::warn!(
                    source_id = %shared.config.source_id,
                    %error,
                    attempt = consecutive_failures,
                    "transient failure in change window; backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => (),
                }
            }
            Err(error) => {
                tracing::error!(
                    source_id = %shared.config.source_id,
                    %error,
                    "fatal failure in change window; stopping source"
                );
                shared.set_state(SourceState::Stopped);
                break;
            }
        }
    }

    if let Err(error) = stream.close().await {
        tracing::warn!(
            source_id = %shared.config.source_id,
            %error,
            "failed to release native change stream"
        );
    }
}

/// Fetch, normalize, transform, and apply one window of changes, then
/// advance the position, acknowledge the stream, and checkpoint.
async fn process_window(shared: &Shared, stream: &mut dyn ChangeStream) -> Result<usize, Error> {
    let from = shared.position();
    let batch = stream
        .fetch_changes(from.as_deref(), shared.config.batch_size)
        .await?;
    if batch.changes.is_empty() {
        return Ok(0);
    }

    let mut applied = 0usize;
    for raw in &batch.changes {
        let mut event = parse_event(raw)?;

        if !shared.transforms.is_empty() {
            if let Some(data) = &event.data {
                event.data = Some(
                    apply_transformations(
                        &shared.transforms,
                        data,
                        shared.transform_service.as_deref(),
                    )
                    .await,
                );
            }
        }

        // Isolate panics in the apply path: convert to an error so the
        // window fails without advancing, and the source stays up.
        let apply = std::panic::AssertUnwindSafe(shared.applier.apply(&event)).catch_unwind();
        match apply.await {
            Ok(result) => {
                result?;
            }
            Err(panic) => {
                let message = panic_message(panic);
                return Err(Error::transient(
                    shared.source_db,
                    "apply_change_event",
                    anyhow::anyhow!("apply panicked: {message}"),
                ));
            }
        }
        applied += 1;

        // Hand-off succeeded: advance the in-memory position.
        if let Some(lsn) = &event.lsn {
            shared.set_position(lsn.clone());
        }
    }

    if let Some(next) = &batch.next_position {
        shared.set_position(next.clone());
    }
    if let Some(position) = shared.position() {
        stream.ack(&position).await?;
        shared.save_checkpoint(&position).await;
    }
    Ok(applied)
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
