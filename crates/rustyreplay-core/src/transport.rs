//! The online transport contract and a name-keyed factory registry.
//!
//! Concrete adapters to specific FIX engines are out of scope (§1); this
//! module defines the capability set the runner drives and the registry
//! concrete adapters register into, replacing the reflective class lookup
//! called out in the design notes (§9) with a stable string key.

use crate::error::TransportError;
use crate::model::FixMessage;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifies one side of a FIX session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// `SenderCompID` / `TargetCompID` value.
    pub comp_id: String,
}

/// Connection parameters for an online run.
#[derive(Debug, Clone)]
pub struct TransportSessionConfig {
    /// The "entry" leg identity (our side).
    pub sender_key: SessionKey,
    /// The "exit" leg identity (counterparty).
    pub target_key: SessionKey,
    /// Adapter-specific connection properties (host, port, timeouts, ...).
    pub properties: HashMap<String, String>,
}

/// The capability set an online transport adapter must provide.
///
/// `connect`/`send`/`close` are async because real adapters perform I/O;
/// `on_receive` registers a single consumer invoked synchronously from
/// whatever thread the adapter's own I/O loop runs on.
#[async_trait]
pub trait FixTransport: Send + Sync {
    /// Establishes a session. Blocks (awaits) until established or fails.
    async fn connect(&self, config: TransportSessionConfig) -> Result<(), TransportError>;

    /// Registers the single consumer of received messages. Replaces any
    /// previously registered callback.
    fn on_receive(&self, callback: Box<dyn Fn(FixMessage) + Send + Sync>);

    /// Enqueues `message` for transmission, awaiting transport acceptance.
    async fn send(&self, message: FixMessage) -> Result<(), TransportError>;

    /// Idempotent release of any held resources.
    async fn close(&self) -> Result<(), TransportError>;
}

/// A name-keyed registry of transport factories, resolved at run start
/// rather than via reflective class lookup.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: Arc<RwLock<HashMap<String, Arc<dyn Fn() -> Arc<dyn FixTransport> + Send + Sync>>>>,
}

impl TransportRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`, replacing any existing entry.
    pub fn register(&self, name: impl Into<String>, factory: impl Fn() -> Arc<dyn FixTransport> + Send + Sync + 'static) {
        self.factories.write().insert(name.into(), Arc::new(factory));
    }

    /// Builds a fresh transport instance from the factory registered under
    /// `name`, or `None` if no such factory is registered.
    pub fn build(&self, name: &str) -> Option<Arc<dyn FixTransport>> {
        let factories = self.factories.read();
        factories.get(name).map(|f| f())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedTransport {
        connect_calls: AtomicUsize,
        close_calls: AtomicUsize,
    }

    #[async_trait]
    impl FixTransport for ScriptedTransport {
        async fn connect(&self, _config: TransportSessionConfig) -> Result<(), TransportError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn on_receive(&self, _callback: Box<dyn Fn(FixMessage) + Send + Sync>) {}
        async fn send(&self, _message: FixMessage) -> Result<(), TransportError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), TransportError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn registry_resolves_factories_by_name() {
        let registry = TransportRegistry::new();
        registry.register("scripted", || {
            Arc::new(ScriptedTransport {
                connect_calls: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
            })
        });
        assert!(registry.build("scripted").is_some());
        assert!(registry.build("missing").is_none());
    }
}
