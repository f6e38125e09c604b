//! Live telemetry over one websocket per job.
//!
//! Each channel runs in its own task:
//! `Disconnected -> Connecting -> Open -> Closed`, falling back to
//! `Disconnected` on transport failure. A lost channel reconnects a bounded
//! number of times while it is still wanted, then reports
//! [`StreamSignal::Dropped`] once and stops.

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{Instrument, debug, info, info_span, warn};
use trainsync_core::telemetry::decode;
use trainsync_core::{EventKind, JobId, ReconnectPolicy, SequenceClock, StreamSignal, TelemetryEvent};

const SIGNAL_BUFFER: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

struct Channel {
    task: JoinHandle<()>,
    shutdown: Option<oneshot::Sender<()>>,
    state: watch::Receiver<StreamState>,
}

/// Per-job telemetry channels multiplexed onto one signal queue.
pub struct TelemetryHub {
    ws_url: String,
    clock: SequenceClock,
    policy: ReconnectPolicy,
    signals: mpsc::Sender<StreamSignal>,
    channels: HashMap<JobId, Channel>,
}

impl TelemetryHub {
    /// Returns the hub and the receiver every channel reports into.
    pub fn new(
        ws_url: &str,
        clock: SequenceClock,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::Receiver<StreamSignal>) {
        let (signals, rx) = mpsc::channel(SIGNAL_BUFFER);
        let hub = Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            clock,
            policy,
            signals,
            channels: HashMap::new(),
        };
        (hub, rx)
    }

    /// Open the channel for `job_id`. Returns `false` if one is already running.
    pub fn open(&mut self, job_id: &JobId) -> bool {
        if let Some(existing) = self.channels.get(job_id) {
            if !existing.task.is_finished() {
                debug!(job_id = %job_id, "telemetry channel already open");
                return false;
            }
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(StreamState::Disconnected);
        let worker = ChannelWorker {
            job_id: job_id.clone(),
            url: format!("{}/ws/{}", self.ws_url, job_id.as_str()),
            clock: self.clock.clone(),
            policy: self.policy,
            signals: self.signals.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(
            worker
                .run(shutdown_rx)
                .instrument(info_span!("telemetry channel", job_id = %job_id)),
        );
        self.channels.insert(
            job_id.clone(),
            Channel { task, shutdown: Some(shutdown_tx), state: state_rx },
        );
        true
    }

    pub fn state(&self, job_id: &JobId) -> Option<StreamState> {
        self.channels.get(job_id).map(|c| *c.state.borrow())
    }

    pub fn is_open(&self, job_id: &JobId) -> bool {
        self.channels.get(job_id).is_some_and(|c| !c.task.is_finished())
    }

    /// Close the channel for `job_id` and wait for its task to finish.
    pub async fn close(&mut self, job_id: &JobId) -> bool {
        let Some(mut channel) = self.channels.remove(job_id) else {
            return false;
        };
        if let Some(shutdown) = channel.shutdown.take() {
            let _ = shutdown.send(());
        }
        if tokio::time::timeout(CLOSE_GRACE, &mut channel.task).await.is_err() {
            warn!(job_id = %job_id, "telemetry channel did not close in time, aborting");
            channel.task.abort();
        }
        true
    }

    pub async fn close_all(&mut self) {
        let ids: Vec<JobId> = self.channels.keys().cloned().collect();
        for id in ids {
            self.close(&id).await;
        }
    }
}

impl Drop for TelemetryHub {
    fn drop(&mut self) {
        for channel in self.channels.values() {
            channel.task.abort();
        }
    }
}

enum PumpEnd {
    /// Shutdown requested or nobody is listening any more.
    Shutdown,
    /// The server closed after the job reached a terminal state.
    Finished,
    Lost(String),
}

struct ChannelWorker {
    job_id: JobId,
    url: String,
    clock: SequenceClock,
    policy: ReconnectPolicy,
    signals: mpsc::Sender<StreamSignal>,
    state: watch::Sender<StreamState>,
}

impl ChannelWorker {
    fn set_state(&self, state: StreamState) {
        self.state.send_replace(state);
        debug!(?state, "telemetry channel state");
    }

    /// Stamp and forward. Returns `false` once the receiver is gone.
    async fn emit(&self, kind: EventKind) -> bool {
        let event = TelemetryEvent {
            job_id: self.job_id.clone(),
            seq: self.clock.tick(),
            received_at: chrono::Utc::now(),
            kind,
        };
        self.signals.send(StreamSignal::Event(event)).await.is_ok()
    }

    async fn finish(&self, signal: StreamSignal) {
        self.set_state(StreamState::Closed);
        let _ = self.signals.send(signal).await;
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut attempt = 0u32;
        loop {
            self.set_state(StreamState::Connecting);
            let connected = tokio::select! {
                _ = &mut shutdown => {
                    self.finish(StreamSignal::Closed { job_id: self.job_id.clone() }).await;
                    return;
                }
                result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
            };

            let reason = match connected {
                Ok((ws, _response)) => {
                    attempt = 0;
                    self.set_state(StreamState::Open);
                    info!(url = %self.url, "telemetry channel open");
                    if !self.emit(EventKind::Connected { message: None }).await {
                        self.set_state(StreamState::Closed);
                        return;
                    }
                    match self.pump(ws, &mut shutdown).await {
                        PumpEnd::Shutdown | PumpEnd::Finished => {
                            self.finish(StreamSignal::Closed { job_id: self.job_id.clone() }).await;
                            return;
                        }
                        PumpEnd::Lost(reason) => reason,
                    }
                }
                Err(e) => e.to_string(),
            };

            self.set_state(StreamState::Disconnected);
            attempt += 1;
            if attempt > self.policy.max_attempts || self.signals.is_closed() {
                warn!(%reason, attempts = attempt - 1, "telemetry channel dropped");
                self.finish(StreamSignal::Dropped { job_id: self.job_id.clone(), reason }).await;
                return;
            }

            let delay = self.policy.delay(attempt);
            warn!(%reason, attempt, delay_ms = delay.as_millis() as u64, "telemetry channel lost, reconnecting");
            tokio::select! {
                _ = &mut shutdown => {
                    self.finish(StreamSignal::Closed { job_id: self.job_id.clone() }).await;
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn pump<S>(&self, ws: S, shutdown: &mut oneshot::Receiver<()>) -> PumpEnd
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = ws.split();
        let mut terminal_seen = false;
        loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    return PumpEnd::Shutdown;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => match decode(&text) {
                        Ok(Some(kind)) => {
                            terminal_seen |= is_terminal_event(&kind);
                            if !self.emit(kind).await {
                                return PumpEnd::Shutdown;
                            }
                        }
                        Ok(None) => debug!("ping dropped"),
                        Err(e) => warn!(error = %e, "malformed telemetry message dropped"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "server closed telemetry channel");
                        return if terminal_seen {
                            PumpEnd::Finished
                        } else {
                            PumpEnd::Lost("closed by server".to_string())
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpEnd::Lost(e.to_string()),
                    None if terminal_seen => return PumpEnd::Finished,
                    None => return PumpEnd::Lost("stream ended".to_string()),
                },
            }
        }
    }
}

fn is_terminal_event(kind: &EventKind) -> bool {
    match kind {
        EventKind::Complete { .. } | EventKind::Error { .. } => true,
        EventKind::Status { status, .. } => status.is_terminal(),
        EventKind::Connected { .. } | EventKind::Progress { .. } => false,
    }
}
