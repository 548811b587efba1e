//! BoxTransport -- object-safe dynamic dispatch wrapper for Transport.
//!
//! 1. `TransportDyn` is an object-safe mirror of `Transport` with boxed futures
//! 2. Blanket-impl `TransportDyn` for all `T: Transport`
//! 3. `BoxTransport` wraps `Box<dyn TransportDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use agentflow_types::transport::{DispatchOptions, DispatchOutcome, TransportError};
use agentflow_types::workflow::TaskPayload;

use super::provider::Transport;

/// Object-safe version of [`Transport`] with boxed futures.
pub trait TransportDyn: Send + Sync {
    fn name(&self) -> &str;

    fn send_boxed<'a>(
        &'a self,
        agent_id: &'a str,
        intent: &'a str,
        payload: TaskPayload,
        opts: DispatchOptions,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchOutcome, TransportError>> + Send + 'a>>;
}

impl<T: Transport> TransportDyn for T {
    fn name(&self) -> &str {
        Transport::name(self)
    }

    fn send_boxed<'a>(
        &'a self,
        agent_id: &'a str,
        intent: &'a str,
        payload: TaskPayload,
        opts: DispatchOptions,
    ) -> Pin<Box<dyn Future<Output = Result<DispatchOutcome, TransportError>> + Send + 'a>> {
        Box::pin(self.send(agent_id, intent, payload, opts))
    }
}

/// Type-erased transport held by the orchestrator.
///
/// `Transport` uses RPITIT and cannot be a trait object directly, so this
/// wrapper exposes the same methods over an inner `TransportDyn`.
pub struct BoxTransport {
    inner: Box<dyn TransportDyn + Send + Sync>,
}

impl BoxTransport {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            inner: Box::new(transport),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn send(
        &self,
        agent_id: &str,
        intent: &str,
        payload: TaskPayload,
        opts: DispatchOptions,
    ) -> Result<DispatchOutcome, TransportError> {
        self.inner.send_boxed(agent_id, intent, payload, opts).await
    }
}

impl std::fmt::Debug for BoxTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTransport")
            .field("name", &self.inner.name())
            .finish()
    }
}
