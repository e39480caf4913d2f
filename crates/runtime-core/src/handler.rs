//! Handler registry (§4.I): the closed `flow_kind -> handler` mapping a
//! worker process binds to at startup.

use crate::pool::ErasedConnectionPool;
use crate::record::{FlowKind, ProcessingQueueRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Disposition a handler hands back to the runtime after processing a record.
///
/// Distinct from `failure::Disposition`: this is the handler's *opinion*,
/// the runtime still applies backoff/dead-letter policy on top of it.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Success(Option<Value>),
    Retryable(String),
    NonRetryable(String),
    Cancelled,
}

/// Per-invocation context passed to a handler: the claimed record, the
/// cancellation token the runtime signals on graceful shutdown or lease
/// loss, a span to log under, and a handle to request its own transactional
/// database connection from the Pool Supervisor (§4.G, §4.I).
pub struct HandlerContext {
    pub record: ProcessingQueueRecord,
    pub cancellation: CancellationToken,
    pub logger: Span,
    pub db: Arc<dyn ErasedConnectionPool>,
}

impl HandlerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A handler must be idempotent: the runtime may invoke it more than once
/// for the same record (redelivery after a lost lease, a crashed worker).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: HandlerContext) -> HandlerOutcome;
}

/// Closed mapping from `flow_kind` to handler. A worker process binds to
/// exactly one `flow_kind` at startup (§4.I); the registry exists so that
/// binding can be validated once, early, rather than discovered at claim time.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<FlowKind, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(mut self, flow_kind: impl Into<FlowKind>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(flow_kind.into(), handler);
        self
    }

    pub fn get(&self, flow_kind: &FlowKind) -> Option<Arc<dyn Handler>> {
        self.handlers.get(flow_kind).cloned()
    }

    pub fn contains(&self, flow_kind: &FlowKind) -> bool {
        self.handlers.contains_key(flow_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, ctx: HandlerContext) -> HandlerOutcome {
            HandlerOutcome::Success(Some(ctx.record.payload))
        }
    }

    #[test]
    fn registry_resolves_registered_flow_kind_only() {
        let registry = HandlerRegistry::new().register("emails", Arc::new(Echo));
        assert!(registry.contains(&FlowKind::new("emails")));
        assert!(!registry.contains(&FlowKind::new("invoices")));
    }
}
