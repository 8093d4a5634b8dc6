//! Mutations
//!
//! A mutation runs one gateway write and, only after it succeeds, applies
//! the post-commit policy of its kind to the cache. Failed writes leave the
//! cache untouched and are never retried here.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;

use super::client::QueryClient;
use super::invalidation::MutationKind;
use crate::error::QueryError;
use crate::metrics::MUTATIONS_TOTAL;

/// Gateway write
pub type MutationFn<I, O> =
    Arc<dyn Fn(I) -> BoxFuture<'static, crate::error::Result<O>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Idle,
    Pending,
    Success,
    Error,
}

/// Outcome of the latest `mutate` call
#[derive(Debug, Clone)]
pub struct MutationState<O> {
    pub status: MutationStatus,
    pub data: Option<O>,
    pub error: Option<QueryError>,
}

impl<O> Default for MutationState<O> {
    fn default() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
        }
    }
}

impl<O> MutationState<O> {
    pub fn is_idle(&self) -> bool {
        self.status == MutationStatus::Idle
    }

    pub fn is_pending(&self) -> bool {
        self.status == MutationStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status == MutationStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == MutationStatus::Error
    }
}

/// A write bound to its invalidation policy
pub struct Mutation<I, O> {
    client: QueryClient,
    kind: MutationKind,
    run: MutationFn<I, O>,
    /// Extracts the id of the written document for id-scoped keys
    affected_id: fn(&O) -> Option<String>,
    state: Arc<watch::Sender<MutationState<O>>>,
}

impl<I, O> Clone for Mutation<I, O> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            kind: self.kind,
            run: self.run.clone(),
            affected_id: self.affected_id,
            state: self.state.clone(),
        }
    }
}

impl<I, O> Mutation<I, O>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(client: QueryClient, kind: MutationKind, run: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::error::Result<O>> + Send + 'static,
    {
        let (state, _) = watch::channel(MutationState::default());
        Self {
            client,
            kind,
            run: Arc::new(move |input| run(input).boxed()),
            affected_id: |_| None,
            state: Arc::new(state),
        }
    }

    pub fn with_affected_id(mut self, affected_id: fn(&O) -> Option<String>) -> Self {
        self.affected_id = affected_id;
        self
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn state(&self) -> MutationState<O> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState<O>> {
        self.state.subscribe()
    }

    /// Back to idle, forgetting the last outcome
    pub fn reset(&self) {
        self.state.send_replace(MutationState::default());
    }

    /// Run the write, then the post-commit policy
    ///
    /// The policy runs strictly after the write resolves successfully and
    /// before this call returns.
    pub async fn mutate(&self, input: I) -> Result<O, QueryError> {
        self.state.send_replace(MutationState {
            status: MutationStatus::Pending,
            data: None,
            error: None,
        });
        tracing::debug!(mutation = %self.kind, "Running mutation");

        match (self.run)(input).await {
            Ok(output) => {
                let affected_id = (self.affected_id)(&output);
                let post_commit = self.kind.post_commit(affected_id.as_deref());
                post_commit.apply(&self.client).await;

                MUTATIONS_TOTAL
                    .with_label_values(&[self.kind.as_str(), "success"])
                    .inc();
                tracing::info!(
                    mutation = %self.kind,
                    affected_id = ?affected_id,
                    invalidated = post_commit.filters().len(),
                    "Mutation succeeded"
                );

                self.state.send_replace(MutationState {
                    status: MutationStatus::Success,
                    data: Some(output.clone()),
                    error: None,
                });
                Ok(output)
            }
            Err(error) => {
                let error = QueryError::from(error);
                MUTATIONS_TOTAL
                    .with_label_values(&[self.kind.as_str(), "error"])
                    .inc();
                tracing::warn!(mutation = %self.kind, %error, "Mutation failed");

                self.state.send_replace(MutationState {
                    status: MutationStatus::Error,
                    data: None,
                    error: Some(error.clone()),
                });
                Err(error)
            }
        }
    }
}
