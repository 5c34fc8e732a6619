//! Driving an agent run through the stream.

use agent_stream_core::{AgentStreamEvent, ModelMessage, ModelRequest};
use agent_stream_reassembler::{Reassembler, ReassemblyError, StreamDeps};
use agent_stream_transport::{StreamError, StreamWriter};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use serde_json::json;
use thiserror::Error;

use crate::session::{Session, SessionError};

/// Agent failure.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Model error: {0}")]
    Model(String),
    #[error("Tool error: {0}")]
    Tool(String),
    #[error("Run cancelled")]
    Cancelled,
}

/// Run error.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
    #[error("Reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
}

/// One step of an agent run.
pub enum AgentNode {
    /// A model request whose response streams as generation events.
    ModelRequest {
        request: ModelRequest,
        events: BoxStream<'static, Result<AgentStreamEvent, AgentError>>,
    },
    /// Anything else (tool execution, end of run). Not streamed.
    Other,
}

/// An agent run in progress.
#[async_trait]
pub trait AgentRun: Send {
    /// Next step, or `None` once the run is complete.
    async fn next_node(&mut self) -> Option<Result<AgentNode, AgentError>>;

    /// Messages produced by this run, in order.
    fn new_messages(&self) -> Vec<ModelMessage>;
}

/// An agent that can be driven node by node.
#[async_trait]
pub trait Agent<D: ?Sized + Sync>: Send + Sync {
    /// Start a run on `prompt` following `history`.
    async fn iter(
        &self,
        prompt: &str,
        history: &[ModelMessage],
        deps: &D,
    ) -> Result<Box<dyn AgentRun>, AgentError>;
}

/// Run `agent` on `prompt` for the session described by `deps`.
///
/// Loads the session, starts the stream, feeds every model-request node
/// through a [`Reassembler`], then stops the stream and saves the session
/// whatever the outcome, including a failed start. A cancelled session is
/// noticed before each node and ends the run with [`AgentError::Cancelled`]. A failed run publishes an `error` envelope with
/// the failure message before stopping. On success the run's new messages
/// are appended to the session before saving.
///
/// # Errors
/// Returns the first failure among loading, streaming, the agent itself,
/// stopping the stream and saving the session.
pub async fn run<S, A, D>(
    session: &mut S,
    agent: &A,
    prompt: &str,
    deps: &D,
    writer: &StreamWriter,
) -> Result<Vec<ModelMessage>, RunError>
where
    S: Session + ?Sized,
    A: Agent<D> + ?Sized,
    D: StreamDeps + ?Sized,
{
    session.load().await?;

    let key = deps.session_key();
    let mut reassembler = Reassembler::new(writer.clone(), key.clone());
    let outcome = match writer.start(&key).await {
        Ok(()) => {
            tracing::info!(session = %key, "Run started");
            drive(
                agent,
                prompt,
                session.history().messages(),
                deps,
                &mut reassembler,
            )
            .await
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = &outcome {
        tracing::error!(session = %key, error = %e, "Run failed");
        if let Err(report) = reassembler
            .add_error(json!({ "message": e.to_string() }))
            .await
        {
            tracing::warn!(session = %key, error = %report, "Failed to publish run error");
        }
    }

    let stopped = writer.stop(&key).await;
    if let Ok(messages) = &outcome {
        session.add_messages(messages.clone());
    }
    let saved = session.save().await;

    let messages = outcome?;
    stopped?;
    saved?;
    tracing::info!(session = %key, new_messages = messages.len(), "Run finished");
    Ok(messages)
}

async fn drive<A, D>(
    agent: &A,
    prompt: &str,
    history: &[ModelMessage],
    deps: &D,
    reassembler: &mut Reassembler,
) -> Result<Vec<ModelMessage>, RunError>
where
    A: Agent<D> + ?Sized,
    D: StreamDeps + ?Sized,
{
    let mut agent_run = agent.iter(prompt, history, deps).await?;

    loop {
        if reassembler.is_cancelled().await? {
            return Err(AgentError::Cancelled.into());
        }
        let Some(node) = agent_run.next_node().await else {
            break;
        };
        if let AgentNode::ModelRequest {
            request,
            mut events,
        } = node?
        {
            reassembler.node_begin(&request).await?;
            while let Some(event) = events.next().await {
                reassembler.node_event(&event?).await?;
            }
            reassembler.node_end().await?;
        }
    }

    Ok(agent_run.new_messages())
}
