//! Client-side capability providers for engine-issued tool calls.
//!
//! The engine decides *when* to call a tool; this module owns *what* runs:
//! a registry of [`CapabilityProvider`]s looked up by name, and the
//! [`dispatcher`](crate::tools::dispatcher) that fans a call batch out to
//! them without stalling audio flow.

pub mod catalog;
pub mod dispatcher;

pub use dispatcher::ToolDispatcher;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool signature declared to the engine at session setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Tool name the engine will call back with.
    pub name: String,
    /// Human-readable description steering the engine's tool choice.
    pub description: String,
    /// JSON Schema of the argument object.
    pub parameters: serde_json::Value,
}

/// An engine-issued tool invocation, correlated by `id`.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Unique within the session; every call gets exactly one result with
    /// the same id.
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// An external capability invoked on the engine's behalf.
///
/// Providers are opaque async functions: given an argument object they
/// return a JSON-serializable result or an error. Execution happens on a
/// dedicated task per call; implementations may take as long as they need
/// without affecting audio.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// The signature declared to the engine at setup.
    fn declaration(&self) -> ToolDeclaration;

    /// Invoke the capability.
    ///
    /// # Errors
    ///
    /// Any error is stringified into an error tool result; it never
    /// propagates beyond the call it belongs to.
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value>;
}

/// Registry of capability providers, looked up by declared name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CapabilityProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Replaces any existing provider with the same name.
    pub fn register(&mut self, provider: Arc<dyn CapabilityProvider>) {
        self.providers
            .insert(provider.declaration().name, provider);
    }

    /// Get a provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.providers.get(name).cloned()
    }

    /// Export the declared signatures for the session setup message, sorted
    /// by name for a stable wire representation.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<ToolDeclaration> = self
            .providers
            .values()
            .map(|p| p.declaration())
            .collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    /// True when no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
