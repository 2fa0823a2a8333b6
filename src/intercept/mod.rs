//! Execution Interception - transparent logging around agent execution
//!
//! Information Hiding:
//! - Timing and record packaging hidden inside the wrapper
//! - Logging dispatch detached from the agent's response path
//! - Agents implement a single-method trait and never see the pipeline

pub mod extract;
pub mod wrapper;

pub use wrapper::LoggingExecutor;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Last path segment of a type's name, without generic arguments
fn short_type_name<T: ?Sized>() -> &'static str {
    let name = std::any::type_name::<T>();
    name.split('<')
        .next()
        .unwrap_or(name)
        .rsplit("::")
        .next()
        .unwrap_or("agent")
}

/// One user turn handed to an agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRequest {
    pub session_id: String,
    pub message: String,
    /// Extra executor arguments, recorded in the turn's metadata
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl AgentRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Agent execution capability.
///
/// The output is free-form JSON; the response text and skill label are
/// extracted from well-known keys when logging.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: AgentRequest) -> Result<Value>;

    /// Name recorded in each turn's metadata
    fn executor_name(&self) -> &str {
        short_type_name::<Self>()
    }
}

/// Streaming agent execution: tokens go out through `tokens` as they are produced
#[async_trait]
pub trait StreamingAgentExecutor: Send + Sync {
    async fn execute_stream(&self, request: AgentRequest, tokens: mpsc::Sender<String>)
        -> Result<()>;

    fn executor_name(&self) -> &str {
        short_type_name::<Self>()
    }
}
