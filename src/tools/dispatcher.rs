//! Fan-out of engine tool-call batches to capability providers.
//!
//! Every call is answered exactly once, matched by id. Calls run on their
//! own tasks so a slow provider never delays frame transmission or buffer
//! playback; results may complete out of arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::wire::FunctionResponse;
use crate::tools::{ProviderRegistry, ToolCall};

/// Routes tool-call batches to registered providers and streams correlated
/// results back toward the transport.
pub struct ToolDispatcher {
    registry: Arc<ProviderRegistry>,
    /// Outbound results; the receiver side closes on session teardown,
    /// which silently discards late results from stale tasks.
    result_tx: mpsc::UnboundedSender<FunctionResponse>,
    cancel: CancellationToken,
}

impl ToolDispatcher {
    /// Create a dispatcher over the given registry.
    ///
    /// `result_tx` feeds the transport's outbound path; `cancel` is the
    /// session token guarding against results for a closed session.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        result_tx: mpsc::UnboundedSender<FunctionResponse>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            result_tx,
            cancel,
        }
    }

    /// Dispatch a batch of calls. Returns immediately; results flow back
    /// asynchronously through the result channel.
    pub fn dispatch(&self, calls: Vec<ToolCall>) {
        for call in calls {
            self.dispatch_one(call);
        }
    }

    fn dispatch_one(&self, call: ToolCall) {
        info!("tool call: {}({})", call.name, call.args);

        let Some(provider) = self.registry.get(&call.name) else {
            // Unrecognized names are answered immediately, never dropped.
            warn!("unknown tool: {}", call.name);
            let _ = self.result_tx.send(FunctionResponse::error(
                call.id,
                call.name.clone(),
                format!("unknown tool: {}", call.name),
            ));
            return;
        };

        let result_tx = self.result_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let response = match provider.invoke(call.args).await {
                Ok(value) => FunctionResponse::output(call.id, call.name, value),
                Err(e) => {
                    warn!("tool '{}' failed: {e}", call.name);
                    FunctionResponse::error(call.id, call.name, e.to_string())
                }
            };
            if cancel.is_cancelled() {
                debug!("discarding tool result for closed session");
                return;
            }
            let _ = result_tx.send(response);
        });
    }
}
