//! Handler registry keyed by payload type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::envelope::EventEnvelope;
use crate::error::HandlerError;

type Handler =
    Arc<dyn Fn(EventEnvelope) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Routes envelopes to the handlers registered for their payload type.
///
/// Handlers for one payload type run in registration order.
#[derive(Clone, Default)]
pub struct EventHandlerRouter {
    routes: HashMap<TypeId, Vec<Handler>>,
}

impl EventHandlerRouter {
    /// Creates a router with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for payloads of type `T`.
    pub fn on<T, F, Fut>(mut self, handler: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>, EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |envelope: EventEnvelope| {
            match envelope.payload_arc::<T>() {
                Some(payload) => handler(payload, envelope).boxed(),
                None => {
                    let error = HandlerError::PayloadMismatch {
                        expected: std::any::type_name::<T>(),
                        event_type: envelope.event_type().to_string(),
                    };
                    futures_util::future::ready(Err(error)).boxed()
                }
            }
        });

        self.routes.entry(TypeId::of::<T>()).or_default().push(handler);
        self
    }

    /// Returns true if at least one handler accepts the envelope's payload.
    pub fn can_route(&self, envelope: &EventEnvelope) -> bool {
        self.routes
            .get(&envelope.payload_type_id())
            .is_some_and(|handlers| !handlers.is_empty())
    }

    /// Runs every handler for the envelope's payload type.
    ///
    /// Stops at the first failing handler and returns its error.
    pub async fn route(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let Some(handlers) = self.routes.get(&envelope.payload_type_id()) else {
            return Ok(());
        };

        for handler in handlers {
            handler(envelope.clone()).await?;
        }
        Ok(())
    }

    /// Total number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for EventHandlerRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlerRouter")
            .field("payload_types", &self.routes.len())
            .field("handlers", &self.handler_count())
            .finish()
    }
}
