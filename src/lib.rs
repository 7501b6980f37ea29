#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Resilient multi-endpoint dispatch engine for EVM-compatible chains.
//!
//! This crate multiplexes read and transaction calls across redundant RPC
//! endpoints grouped into role-specific brackets (`view`, `transaction`),
//! reconciles the resulting responses under a configured policy, and
//! surfaces one authoritative result. Where the teacher crate dispatches
//! one payment scheme against one chain provider, this crate dispatches
//! one contract's calls against a bracketed set of providers — the same
//! alloy-based provider plumbing, generalized to racing and reconciling
//! instead of routing.
//!
//! # Architecture
//!
//! - [`registry`] — connects and probes the bracketed endpoint set
//! - [`gas`] — the gas-fee estimation cascade
//! - [`reconcile`] — the two fan-out primitives every other module shares
//! - [`read`] — view-call reconciliation
//! - [`transaction`] — the nonce/sign/broadcast/confirm pipeline
//! - [`facade`] — [`MultiRpcClient`], the crate's entry point
//!
//! # Feature Flags
//!
//! - `client` (default) — signing support via `alloy-signer-local`,
//!   required for [`MultiRpcClient::call`] against `transaction`
//!   functions
//! - `gas-api` — the HTTP gas-price API estimation method
//! - `telemetry` — `tracing` instrumentation
//! - `full` — all of the above
//!
//! # Usage
//!
//! ```ignore
//! use multirpc::{MultiRpcClient, MultiRpcConfig, CallOverrides};
//! use alloy_dyn_abi::DynSolValue;
//!
//! let config = MultiRpcConfig::load()?;
//! let client = MultiRpcClient::new(&config).await?;
//!
//! let balance = client
//!     .call("balanceOf", &[DynSolValue::Address(holder)], CallOverrides::default())
//!     .await?;
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod gas;
pub mod observe;
pub mod read;
pub mod reconcile;
pub mod registry;
pub mod transaction;

mod facade;
pub use facade::MultiRpcClient;

pub use config::MultiRpcConfig;
pub use data::{CallOutcome, CallOverrides, FunctionDescriptor, FunctionKind, GasParameters, PendingCall, Priority, ViewPolicy};
pub use error::MultiRpcError;
pub use gas::GasEstimationMethod;
pub use observe::{NoopTraceHook, TxTraceHook};
pub use transaction::TransactionOutcome;

/// Runs `fut` to completion from a synchronous call site.
///
/// Reuses the currently-driving `tokio` runtime if one is already active
/// on this thread (the common case — most callers are themselves async);
/// otherwise spins up a throwaway current-thread runtime for the
/// duration of the call. This is the minimal sync/async bridge the
/// façade needs; there is no secondary thread-pool behind it, since every
/// network call this crate makes is already non-blocking.
///
/// # Panics
///
/// Panics if called from inside a `current_thread`-flavored runtime —
/// escaping to a blocking thread via [`tokio::task::block_in_place`]
/// requires the multi-thread runtime.
pub fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => tokio::task::block_in_place(|| handle.block_on(fut)),
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to start a fallback current-thread runtime");
            runtime.block_on(fut)
        }
    }
}
