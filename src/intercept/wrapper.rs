//! Logging wrapper around an agent executor
//!
//! The wrapper implements the same trait as the agent it wraps, so callers
//! swap it in without changes. It never alters the agent's result.

use super::{extract, AgentExecutor, AgentRequest, StreamingAgentExecutor};
use crate::core::{ConversationDraft, Metadata, ERROR_SKILL};
use crate::pipeline::LogDispatcherHandle;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Instant;
use tokio::sync::mpsc;

/// Decorator that logs every invocation of `E`, success or failure
pub struct LoggingExecutor<E> {
    inner: E,
    dispatcher: LogDispatcherHandle,
}

impl<E> LoggingExecutor<E> {
    pub fn new(inner: E, dispatcher: LogDispatcherHandle) -> Self {
        Self { inner, dispatcher }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

fn success_draft(
    request: &AgentRequest,
    executor: &str,
    output: &Value,
    elapsed: f64,
) -> ConversationDraft {
    let mut metadata = Metadata::new();
    metadata.insert("executor".into(), json!(executor));
    metadata.insert("processing_time".into(), json!(elapsed));
    metadata.insert("result_keys".into(), json!(extract::result_keys(output)));
    metadata.insert("params".into(), Value::Object(request.params.clone()));

    let mut draft = ConversationDraft::new(
        request.session_id.clone(),
        request.message.clone(),
        extract::response_text(output),
    )
    .with_processing_time(elapsed)
    .with_metadata(metadata);
    draft.skill_used = extract::skill_used(output);
    draft
}

fn error_draft(
    request: &AgentRequest,
    executor: &str,
    error: &anyhow::Error,
    elapsed: f64,
    partial: Option<String>,
) -> ConversationDraft {
    let mut metadata = Metadata::new();
    metadata.insert("error".into(), json!(error.to_string()));
    metadata.insert(
        "error_chain".into(),
        json!(error.chain().map(|e| e.to_string()).collect::<Vec<_>>()),
    );
    metadata.insert("executor".into(), json!(executor));
    if let Some(partial) = &partial {
        metadata.insert("partial_response".into(), json!(partial));
    }

    ConversationDraft::new(
        request.session_id.clone(),
        request.message.clone(),
        format!("Error: {}", error),
    )
    .with_skill(ERROR_SKILL)
    .with_processing_time(elapsed)
    .with_metadata(metadata)
}

#[async_trait]
impl<E: AgentExecutor> AgentExecutor for LoggingExecutor<E> {
    async fn execute(&self, request: AgentRequest) -> Result<Value> {
        let started = Instant::now();
        let result = self.inner.execute(request.clone()).await;
        let elapsed = started.elapsed().as_secs_f64();
        let executor = self.inner.executor_name();

        let draft = match &result {
            Ok(output) => {
                tracing::info!(
                    "Agent executed for session {} in {:.3}s",
                    request.session_id,
                    elapsed
                );
                success_draft(&request, executor, output, elapsed)
            }
            Err(e) => {
                tracing::error!(
                    "Agent execution failed for session {}: {}",
                    request.session_id,
                    e
                );
                error_draft(&request, executor, e, elapsed, None)
            }
        };
        self.dispatcher.dispatch(draft);

        result
    }

    fn executor_name(&self) -> &str {
        self.inner.executor_name()
    }
}

#[async_trait]
impl<E: StreamingAgentExecutor> StreamingAgentExecutor for LoggingExecutor<E> {
    async fn execute_stream(
        &self,
        request: AgentRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<()> {
        let started = Instant::now();
        let (tap_tx, mut tap_rx) = mpsc::channel::<String>(tokens.max_capacity().max(1));
        // The agent's sends must fail exactly when the caller is gone
        if tokens.is_closed() {
            tap_rx.close();
        }

        // Forward tokens to the caller as they arrive while keeping a copy
        let forwarder = tokio::spawn(async move {
            let mut full = String::new();
            let mut chunks = 0usize;
            loop {
                let token = tokio::select! {
                    token = tap_rx.recv() => token,
                    _ = tokens.closed() => None,
                };
                let Some(token) = token else { break };
                full.push_str(&token);
                chunks += 1;
                if tokens.send(token).await.is_err() {
                    break;
                }
            }
            tap_rx.close();
            (full, chunks)
        });

        let result = self.inner.execute_stream(request.clone(), tap_tx).await;
        let (full, chunks) = match forwarder.await {
            Ok(collected) => collected,
            Err(e) => {
                tracing::warn!("Token forwarder for session {} failed: {}", request.session_id, e);
                (String::new(), 0)
            }
        };
        let elapsed = started.elapsed().as_secs_f64();
        let executor = self.inner.executor_name();

        let draft = match &result {
            Ok(()) => {
                let mut draft =
                    success_draft(&request, executor, &Value::String(full), elapsed);
                if let Some(metadata) = draft.metadata.as_mut() {
                    metadata.remove("result_keys");
                    metadata.insert("streamed".into(), json!(true));
                    metadata.insert("chunks".into(), json!(chunks));
                }
                draft
            }
            Err(e) => {
                tracing::error!(
                    "Streaming agent execution failed for session {}: {}",
                    request.session_id,
                    e
                );
                let partial = (!full.is_empty()).then_some(full);
                error_draft(&request, executor, e, elapsed, partial)
            }
        };
        self.dispatcher.dispatch(draft);

        result
    }

    fn executor_name(&self) -> &str {
        StreamingAgentExecutor::executor_name(&self.inner)
    }
}
