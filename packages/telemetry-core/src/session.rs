// Ingest session - owns one stream from source to channel store
//
// The session manages:
// - Line source lifecycle (connect, start, stop)
// - The receiver task that decodes lines into the channel store
// - Rate estimation and the optional fan-out pipeline on one tapped channel
// - State, counters and event emission
// - Task cancellation via CancellationToken for prompt shutdown

use crate::error::{TelemetryError, TelemetryResult};
use crate::pipeline::{Pipeline, PipelineStats, PlotUpdate};
use crate::rate::{RateConfig, RateController, RateEstimate};
use crate::reader::Ingestor;
use crate::series::Sample;
use crate::source::{LineSource, SourceMetadata};
use crate::store::ChannelBufferStore;
use crate::types::{ChannelKey, IngestCounters, IngestStats, SourceId, StreamState};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Channel whose samples are routed into the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapConfig {
    #[serde(default)]
    pub source_id: SourceId,
    pub channel: String,
    #[serde(default = "default_tap_batch")]
    pub batch_size: usize,
}

fn default_tap_batch() -> usize {
    32
}

impl TapConfig {
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.source_id.clone(), self.channel.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session_id: String,
    /// Samples kept per channel
    pub buffer_capacity: usize,
    /// Lines buffered between the source and the receiver task
    pub line_queue_capacity: usize,
    pub tap: Option<TapConfig>,
    /// Restrict rate estimation to one sensor
    pub rate_source: Option<SourceId>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            buffer_capacity: 6000,
            line_queue_capacity: 1024,
            tap: None,
            rate_source: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.buffer_capacity == 0 {
            return Err(TelemetryError::config("buffer_capacity must be > 0"));
        }
        if self.line_queue_capacity == 0 {
            return Err(TelemetryError::config("line_queue_capacity must be > 0"));
        }
        if let Some(tap) = &self.tap {
            if tap.channel.is_empty() {
                return Err(TelemetryError::config("tap channel name is empty"));
            }
            if tap.batch_size == 0 {
                return Err(TelemetryError::config("tap batch_size must be > 0"));
            }
        }
        Ok(())
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,
    pub state: StreamState,
    pub ingest: IngestStats,
    pub channels: usize,
    pub rate: RateEstimate,
    pub pipeline: Option<PipelineStats>,
    pub uptime_seconds: Option<f64>,
}

/// Events emitted by the session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        session_id: String,
        state: StreamState,
    },
    Error {
        session_id: String,
        error: String,
    },
}

type EventCallback = Arc<RwLock<Option<Box<dyn Fn(SessionEvent) + Send + Sync>>>>;

/// Why the receiver loop ended
enum ReceiverExit {
    Cancelled,
    Closed,
    Stalled(TelemetryError),
}

pub struct IngestSession {
    pub id: String,
    config: SessionConfig,

    store: Arc<ChannelBufferStore>,
    rate: Arc<Mutex<RateController>>,
    pipeline: Option<Arc<Mutex<Pipeline>>>,
    source: Option<Arc<TokioMutex<Box<dyn LineSource>>>>,

    state: Arc<RwLock<StreamState>>,
    is_running: Arc<AtomicBool>,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,

    counters: Arc<IngestCounters>,
    start_time: Arc<RwLock<Option<Instant>>>,
    event_callback: EventCallback,
}

impl IngestSession {
    /// Create an idle session; a pipeline is only fed when a tap is configured
    pub fn new(
        config: SessionConfig,
        rate: RateConfig,
        pipeline: Option<Pipeline>,
    ) -> TelemetryResult<Self> {
        config.validate()?;
        if pipeline.is_some() && config.tap.is_none() {
            log::warn!("Pipeline supplied without a tapped channel; it will receive no samples");
        }

        Ok(Self {
            id: config.session_id.clone(),
            store: Arc::new(ChannelBufferStore::new(config.buffer_capacity)?),
            rate: Arc::new(Mutex::new(RateController::new(rate)?)),
            pipeline: pipeline.map(|p| Arc::new(Mutex::new(p))),
            source: None,
            state: Arc::new(RwLock::new(StreamState::Idle)),
            is_running: Arc::new(AtomicBool::new(false)),
            cancel_token: CancellationToken::new(),
            tasks: Vec::new(),
            counters: Arc::new(IngestCounters::default()),
            start_time: Arc::new(RwLock::new(None)),
            event_callback: Arc::new(RwLock::new(None)),
            config,
        })
    }

    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        *self.event_callback.write() = Some(Box::new(callback));
    }

    fn set_state(&self, state: StreamState) {
        publish_state(&self.id, &self.state, &self.event_callback, state);
    }

    /// Connect `source` and start the producer and receiver tasks
    pub async fn start(&mut self, mut source: Box<dyn LineSource>) -> TelemetryResult<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Err(TelemetryError::AlreadyRunning);
        }

        log::info!("Starting ingest session {}", self.id);
        self.cancel_token = CancellationToken::new();
        self.tasks.clear();
        self.set_state(StreamState::Connecting);

        if let Err(e) = source.connect().await {
            self.set_state(StreamState::Error {
                message: e.to_string(),
            });
            return Err(e);
        }
        let metadata = source.metadata();
        log::info!("Source connected: {} {}", metadata.kind, metadata.origin);

        let mut ingestor = Ingestor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.rate),
            Arc::clone(&self.counters),
        )
        .with_rate_source(self.config.rate_source.clone());
        if let (Some(tap), Some(pipeline)) = (&self.config.tap, &self.pipeline) {
            ingestor = ingestor.with_tap(tap.key(), tap.batch_size, Arc::clone(pipeline))?;
        }

        let source = Arc::new(TokioMutex::new(source));
        self.source = Some(Arc::clone(&source));

        let (tx, rx) = mpsc::channel::<String>(self.config.line_queue_capacity);
        self.is_running.store(true, Ordering::Relaxed);
        *self.start_time.write() = Some(Instant::now());
        self.set_state(StreamState::Running {
            started_at: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        });

        let (done_tx, done_rx) = oneshot::channel();
        self.tasks.push(self.spawn_producer(source, tx, done_tx));
        self.tasks.push(self.spawn_receiver(ingestor, rx, done_rx));

        log::info!("Ingest session {} started", self.id);
        Ok(())
    }

    /// Stream lines into `tx`; the outcome goes to the receiver through `done`
    fn spawn_producer(
        &self,
        source: Arc<TokioMutex<Box<dyn LineSource>>>,
        tx: mpsc::Sender<String>,
        done: oneshot::Sender<TelemetryResult<()>>,
    ) -> JoinHandle<()> {
        let cancel_token = self.cancel_token.clone();
        let event_callback = Arc::clone(&self.event_callback);
        let session_id = self.id.clone();

        tokio::spawn(async move {
            let mut source = source.lock().await;
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    log::info!("Source streaming cancelled");
                }

                result = source.start(tx) => {
                    if let Err(e) = &result {
                        log::error!("Source streaming error: {}", e);
                        if let Some(callback) = event_callback.read().as_ref() {
                            callback(SessionEvent::Error {
                                session_id: session_id.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                    // Dropped only when the receiver ended the session first
                    let _ = done.send(result);
                }
            }
        })
    }

    /// Decode lines until the channel closes, then settle the final state
    ///
    /// The producer's result is awaited before `Finished` is published, so a
    /// source failure is never reported as a clean end of input.
    fn spawn_receiver(
        &self,
        mut ingestor: Ingestor,
        mut rx: mpsc::Receiver<String>,
        done: oneshot::Receiver<TelemetryResult<()>>,
    ) -> JoinHandle<()> {
        let cancel_token = self.cancel_token.clone();
        let state = Arc::clone(&self.state);
        let is_running = Arc::clone(&self.is_running);
        let event_callback = Arc::clone(&self.event_callback);
        let session_id = self.id.clone();

        tokio::spawn(async move {
            let exit = loop {
                tokio::select! {
                    biased;

                    _ = cancel_token.cancelled() => {
                        log::info!("Receiver task cancelled");
                        break ReceiverExit::Cancelled;
                    }

                    line = rx.recv() => match line {
                        Some(line) => match ingestor.ingest_line(&line) {
                            Ok(()) => {}
                            Err(e @ TelemetryError::PipelineStalled { .. }) => {
                                log::error!("Stopping session {}: {}", session_id, e);
                                break ReceiverExit::Stalled(e);
                            }
                            Err(e) => log::error!("Pipeline rejected tapped samples: {}", e),
                        },
                        None => {
                            log::info!("Line channel closed");
                            break ReceiverExit::Closed;
                        }
                    }
                }
            };
            drop(rx);

            let finished = ingestor.finish();
            if let Err(e) = &finished {
                log::error!("Failed to flush pipeline: {}", e);
            }

            // A cancelled session is settled by `stop`
            let final_state = match exit {
                ReceiverExit::Cancelled => None,
                ReceiverExit::Stalled(e) => {
                    cancel_token.cancel();
                    Some(StreamState::Error {
                        message: e.to_string(),
                    })
                }
                ReceiverExit::Closed => match (done.await, finished) {
                    (Ok(Err(e)), _) | (_, Err(e @ TelemetryError::PipelineStalled { .. })) => {
                        Some(StreamState::Error {
                            message: e.to_string(),
                        })
                    }
                    _ => Some(StreamState::Finished),
                },
            };
            if let Some(next) = final_state {
                publish_state(&session_id, &state, &event_callback, next);
            }
            is_running.store(false, Ordering::Relaxed);

            let stats = ingestor.stats();
            log::info!(
                "Session {} ingested {} samples from {} lines ({} malformed)",
                session_id,
                stats.samples_appended,
                stats.lines_read,
                stats.malformed_lines
            );
        })
    }

    /// Cancel the tasks, wait for them, and release the source
    pub async fn stop(&mut self) -> TelemetryResult<()> {
        if self.tasks.is_empty() {
            return Ok(());
        }

        log::info!("Stopping ingest session {}", self.id);
        self.cancel_token.cancel();
        self.join_tasks().await;

        if let Some(source) = &self.source {
            source.lock().await.stop().await?;
        }

        self.is_running.store(false, Ordering::Relaxed);
        if !matches!(*self.state.read(), StreamState::Finished | StreamState::Error { .. }) {
            self.set_state(StreamState::Stopped);
        }
        Ok(())
    }

    /// Wait until the input ends on its own
    pub async fn wait(&mut self) -> StreamState {
        self.join_tasks().await;
        self.state()
    }

    async fn join_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                log::error!("Session task failed: {}", e);
            }
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> StreamState {
        self.state.read().clone()
    }

    pub fn store(&self) -> &Arc<ChannelBufferStore> {
        &self.store
    }

    /// Trailing `seconds` of one channel as `(timestamps, values)`
    pub fn read_window(
        &self,
        source_id: impl Into<SourceId>,
        channel: &str,
        seconds: f64,
    ) -> (Vec<f64>, Vec<f64>) {
        self.store
            .read_window(&ChannelKey::new(source_id, channel), seconds)
    }

    /// Newest sample time, for liveness checks
    pub fn latest_timestamp(&self, source_id: Option<&SourceId>) -> Option<f64> {
        self.store.latest_timestamp(source_id)
    }

    pub fn latest(&self, source_id: impl Into<SourceId>, channel: &str) -> Option<Sample> {
        self.store.latest(&ChannelKey::new(source_id, channel))
    }

    pub fn effective_rate(&self) -> RateEstimate {
        self.rate.lock().estimate()
    }

    pub fn latest_update(&self) -> Option<PlotUpdate> {
        self.pipeline
            .as_ref()
            .and_then(|pipeline| pipeline.lock().latest_update())
    }

    pub fn pipeline(&self) -> Option<&Arc<Mutex<Pipeline>>> {
        self.pipeline.as_ref()
    }

    pub async fn source_metadata(&self) -> Option<SourceMetadata> {
        match &self.source {
            Some(source) => Some(source.lock().await.metadata()),
            None => None,
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            state: self.state(),
            ingest: self.counters.snapshot(),
            channels: self.store.len(),
            rate: self.effective_rate(),
            pipeline: self.pipeline.as_ref().map(|p| p.lock().stats()),
            uptime_seconds: self
                .start_time
                .read()
                .as_ref()
                .map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Drop buffered channels and counters; only allowed while idle
    pub fn clear(&mut self) -> TelemetryResult<()> {
        if self.is_running() {
            return Err(TelemetryError::AlreadyRunning);
        }
        self.store.clear();
        self.counters.reset();
        self.rate.lock().reset();
        if let Some(pipeline) = &self.pipeline {
            pipeline.lock().reset();
        }
        Ok(())
    }
}

fn publish_state(
    session_id: &str,
    state: &RwLock<StreamState>,
    event_callback: &EventCallback,
    next: StreamState,
) {
    *state.write() = next.clone();
    if let Some(callback) = event_callback.read().as_ref() {
        callback(SessionEvent::StateChanged {
            session_id: session_id.to_string(),
            state: next,
        });
    }
}
