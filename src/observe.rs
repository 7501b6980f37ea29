//! Observability seam.
//!
//! [`TxTraceHook`] replaces the APM/function-counter integration and the
//! trace-text post-mortem hook of the original client with a single opaque
//! callback: when a confirmed transaction's receipt reports `status != 1`,
//! the active hook is asked for a human-readable trace and that text is
//! carried on [`crate::error::MultiRpcError::TransactionFailedStatus`].
//! Everything else (retries, sub-bracket escalation, broadcast/confirm
//! races) is observed through `tracing` spans and events, gated by the
//! crate's `telemetry` feature.

use alloy_primitives::TxHash;

/// Produces a post-mortem trace for a reverted transaction.
///
/// A production deployment implements this against whatever debug-trace
/// or simulation endpoint its chain exposes (`debug_traceTransaction`,
/// Tenderly, ...); the façade never inspects the returned string, it only
/// carries it for the caller to log or display.
pub trait TxTraceHook: Send + Sync {
    /// Returns a trace description for `tx_hash`, called from `function`.
    fn trace(&self, tx_hash: TxHash, function: &str) -> String;
}

/// The default hook: no trace integration configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceHook;

impl TxTraceHook for NoopTraceHook {
    fn trace(&self, tx_hash: TxHash, function: &str) -> String {
        format!("no trace hook configured for `{function}` ({tx_hash})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_hook_names_the_function_and_hash() {
        let hook = NoopTraceHook;
        let trace = hook.trace(TxHash::ZERO, "transfer");
        assert!(trace.contains("transfer"));
    }
}
