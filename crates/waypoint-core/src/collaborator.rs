//! Contract for the external services a node may call (models, tools,
//! retrievers). The engine never inspects these payloads.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CollaboratorError, Result};

/// An opaque request/response service invoked from inside a node body.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn invoke(&self, request: Value) -> Result<Value>;
}

type AsyncFn = dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync;

/// A `Collaborator` backed by an async closure, with an optional deadline.
pub struct FnCollaborator {
    func: Arc<AsyncFn>,
    timeout: Option<Duration>,
}

impl FnCollaborator {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |request| Box::pin(func(request))),
            timeout: None,
        }
    }

    /// Fail calls that take longer than `timeout` with `CollaboratorError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Collaborator for FnCollaborator {
    async fn invoke(&self, request: Value) -> Result<Value> {
        let call = (self.func)(request);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                CollaboratorError::Timeout {
                    after_ms: limit.as_millis() as u64,
                }
            })?,
            None => call.await,
        }
    }
}

/// A collaborator that replays preset responses in order (cycling) and
/// counts how often it was called. Handy for demos and tests.
pub struct ScriptedCollaborator {
    responses: Vec<Value>,
    call_count: AtomicUsize,
}

impl ScriptedCollaborator {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    async fn invoke(&self, _request: Value) -> Result<Value> {
        if self.responses.is_empty() {
            return Err(CollaboratorError::InvalidResponse("no scripted responses".into()).into());
        }
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(call = idx, "scripted collaborator invoked");
        Ok(self.responses[idx % self.responses.len()].clone())
    }
}
