//! Log Dispatcher Actor
//!
//! Information Hiding:
//! - In-flight logging work tracked inside the actor
//! - Channel back-pressure never reaches the agent's response path
//! - Sends parked by back-pressure are bounded, counted and awaited by flush
//! - Outcomes reported through tracing and pipeline diagnostics only

use super::{LogDiagnostics, LogOutcome, LoggingPipeline};
use crate::config::DispatcherConfig;
use crate::core::ConversationDraft;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{channel, error::TrySendError, Receiver, Sender};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};

#[derive(Debug)]
pub enum LogMessage {
    Record(ConversationDraft),
    /// Reply once everything dispatched before this message has finished
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Background sends waiting for channel capacity
struct Overflow {
    pending: AtomicUsize,
    limit: usize,
    drained: Notify,
    diagnostics: Arc<LogDiagnostics>,
}

impl Overflow {
    fn try_reserve(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn settled(&self) {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// Handle to the background logging actor. Cheap to clone.
#[derive(Clone)]
pub struct LogDispatcherHandle {
    sender: Sender<LogMessage>,
    overflow: Arc<Overflow>,
}

impl LogDispatcherHandle {
    pub fn new(pipeline: Arc<LoggingPipeline>, config: &DispatcherConfig) -> Self {
        let (sender, receiver) = channel(config.channel_buffer_size.max(1));
        let reap_interval = Duration::from_millis(config.reap_interval_ms.max(1));
        let overflow = Arc::new(Overflow {
            pending: AtomicUsize::new(0),
            limit: config.overflow_limit,
            drained: Notify::new(),
            diagnostics: pipeline.diagnostics(),
        });
        tokio::spawn(dispatcher_actor(receiver, pipeline, reap_interval));
        Self { sender, overflow }
    }

    /// Hand a draft to the actor without waiting for it to be logged
    pub fn dispatch(&self, draft: ConversationDraft) {
        match self.sender.try_send(LogMessage::Record(draft)) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) if self.overflow.try_reserve() => {
                // The caller stays non-blocking; the send completes in the background
                let sender = self.sender.clone();
                let overflow = self.overflow.clone();
                tokio::spawn(async move {
                    if let Err(e) = sender.send(message).await {
                        overflow.diagnostics.record_dropped();
                        tracing::error!("[LogDispatcher] Dropped conversation after back-pressure: {}", e);
                    }
                    overflow.release();
                });
            }
            Err(TrySendError::Full(LogMessage::Record(draft))) => {
                self.overflow.diagnostics.record_dropped();
                tracing::error!(
                    "[LogDispatcher] Overflow limit {} reached; conversation {} not logged",
                    self.overflow.limit,
                    draft.conversation_id
                );
            }
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(LogMessage::Record(draft))) => {
                tracing::error!(
                    "[LogDispatcher] Dispatcher stopped; conversation {} not logged",
                    draft.conversation_id
                );
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Wait until every draft dispatched so far has gone through the pipeline
    pub async fn flush(&self) -> anyhow::Result<()> {
        self.overflow.settled().await;
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LogMessage::Flush(tx))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send flush to log dispatcher: {}", e))?;
        rx.await
            .map_err(|e| anyhow::anyhow!("Log dispatcher dropped flush request: {}", e))
    }

    /// Drain in-flight work and stop the actor
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.overflow.settled().await;
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LogMessage::Shutdown(tx))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send shutdown to log dispatcher: {}", e))?;
        rx.await
            .map_err(|e| anyhow::anyhow!("Log dispatcher exited before acknowledging shutdown: {}", e))
    }
}

async fn dispatcher_actor(
    mut receiver: Receiver<LogMessage>,
    pipeline: Arc<LoggingPipeline>,
    reap_interval: Duration,
) {
    let mut in_flight: JoinSet<LogOutcome> = JoinSet::new();

    tracing::info!("Log dispatcher actor started");

    loop {
        match timeout(reap_interval, receiver.recv()).await {
            Ok(Some(LogMessage::Record(draft))) => admit(&mut in_flight, &pipeline, draft),
            Ok(Some(LogMessage::Flush(reply))) => {
                drain(&mut in_flight).await;
                let _ = reply.send(());
            }
            Ok(Some(LogMessage::Shutdown(reply))) => {
                tracing::info!("Log dispatcher received shutdown signal");
                drain(&mut in_flight).await;
                let _ = reply.send(());
                break;
            }
            Ok(None) => {
                tracing::info!("Log dispatcher channel closed, shutting down");
                drain(&mut in_flight).await;
                break;
            }
            Err(_) => reap(&mut in_flight),
        }
    }
}

/// Start logging a draft and collect whatever has finished meanwhile
fn admit(
    in_flight: &mut JoinSet<LogOutcome>,
    pipeline: &Arc<LoggingPipeline>,
    draft: ConversationDraft,
) {
    let pipeline = pipeline.clone();
    in_flight.spawn(async move { pipeline.log(draft).await });
    reap(in_flight);
}

/// Collect finished tasks without waiting
fn reap(in_flight: &mut JoinSet<LogOutcome>) {
    while let Some(joined) = in_flight.try_join_next() {
        report(joined);
    }
}

async fn drain(in_flight: &mut JoinSet<LogOutcome>) {
    while let Some(joined) = in_flight.join_next().await {
        report(joined);
    }
}

fn report(joined: Result<LogOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) if outcome.is_success() => {
            tracing::debug!(
                "[LogDispatcher] {} -> {:?}",
                outcome.conversation_id,
                outcome.status
            );
        }
        Ok(outcome) => {
            tracing::warn!(
                "[LogDispatcher] {} not logged: {}",
                outcome.conversation_id,
                outcome.diagnostic().unwrap_or("unknown error")
            );
        }
        Err(e) => tracing::error!("[LogDispatcher] Logging task panicked: {}", e),
    }
}
