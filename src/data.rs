//! Core data types shared across the registry, reconcilers, and façade.

use std::time::Duration;

use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::{Function, StateMutability};
use alloy_primitives::{Address, Bytes, TxHash};

/// EVM chain id, cached process-wide once the registry has probed it.
pub type ChainId = u64;

/// Caller-stated urgency. Affects both the tier key used against a gas-API
/// quote and the numeric multiplier applied by every estimation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Lowest urgency; the façade default when a caller doesn't specify one.
    #[default]
    Low,
    /// Intermediate urgency.
    Medium,
    /// Highest urgency.
    High,
}

impl Priority {
    /// The numeric multiplier this priority applies to an RPC- or
    /// fixed-table-sourced gas quote.
    #[must_use]
    pub const fn multiplier(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 1.15,
            Self::High => 1.3,
        }
    }

    /// The tier key used to index a priority-keyed gas-API response
    /// (`"low"` / `"medium"` / `"high"`).
    #[must_use]
    pub const fn tier_key(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// The two supported read-reconciliation policies.
///
/// `MostUpdated` trades latency for freshness: it waits on every endpoint
/// in a sub-bracket and picks the one that saw the highest block.
/// `FirstSuccess` trades freshness for latency: it returns as soon as any
/// endpoint succeeds and cancels the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewPolicy {
    /// Wait for every endpoint, return the value from whichever reported
    /// the highest block number.
    #[default]
    MostUpdated,
    /// Return the first endpoint to respond successfully.
    FirstSuccess,
}

/// ABI-derived classification of a contract function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Read-only (`view` or `pure` state mutability).
    View,
    /// State-mutating; requires signing and broadcast.
    Transaction,
}

impl FunctionKind {
    /// Classifies an ABI function fragment per §3: `view`/`pure` state
    /// mutability reads, anything else that is still a `function` (not an
    /// event/error/constructor) is a transaction.
    #[must_use]
    pub fn classify(func: &Function) -> Self {
        match func.state_mutability {
            StateMutability::View | StateMutability::Pure => Self::View,
            StateMutability::NonPayable | StateMutability::Payable => Self::Transaction,
        }
    }
}

/// Name, ABI fragment, and read/transaction classification of one contract
/// function. Produced once per ABI entry when the façade is constructed.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    /// The function's name, as declared in the ABI.
    pub name: String,
    /// The full ABI fragment (used for calldata encoding and return
    /// decoding via `alloy-dyn-abi`).
    pub abi: Function,
    /// Whether this function is dispatched to the read reconciler or the
    /// transaction pipeline.
    pub kind: FunctionKind,
}

/// Caller-supplied overrides for a single logical call. Every field mirrors
/// a recognized per-call override in §6; unset fields fall back to the
/// façade's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CallOverrides {
    /// Sender address for a transaction call.
    pub address: Option<Address>,
    /// Signing key (raw 32-byte hex, `0x`-prefixed or not) for a
    /// transaction call.
    pub private_key: Option<String>,
    /// Gas limit to use instead of the façade default.
    pub gas_limit: Option<u64>,
    /// Fee ceiling in GWei to use instead of the façade default.
    pub gas_upper_bound_gwei: Option<u64>,
    /// Seconds to wait for a transaction receipt. `Some(0)` returns the tx
    /// hash immediately without waiting. Defaults to 90 when unset.
    pub wait_for_receipt_secs: Option<u64>,
    /// Urgency tier; defaults to [`Priority::Low`].
    pub priority: Option<Priority>,
    /// Pin a specific gas estimation method instead of the façade's
    /// selection cascade.
    pub gas_estimation_method: Option<crate::gas::GasEstimationMethod>,
    /// Block identifier for a view call; defaults to `"latest"`.
    pub block_identifier: Option<alloy_rpc_types_eth::BlockId>,
    /// Whether to make an observational `eth_estimateGas` call before
    /// signing. Defaults to the façade's `enable_gas_estimation` setting.
    pub enable_gas_estimation: Option<bool>,
}

impl CallOverrides {
    /// The receipt wait as a [`Duration`], or `None` if the caller asked
    /// for the tx hash without waiting (`wait_for_receipt_secs == Some(0)`).
    #[must_use]
    pub fn receipt_wait(&self) -> Option<Duration> {
        match self.wait_for_receipt_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(Duration::from_secs(90)),
        }
    }
}

/// An immutable record of one logical invocation: function name, encoded
/// positional arguments, and the resolved overrides. Created fresh for
/// every call — never mutated after issuance, and shares no state across
/// invocations of the same [`FunctionDescriptor`].
#[derive(Debug, Clone)]
pub struct PendingCall {
    /// Name of the function being invoked.
    pub function: String,
    /// Positional arguments, already normalized into `DynSolValue`s.
    pub args: Vec<DynSolValue>,
    /// Overrides resolved for this specific invocation (caller value, else
    /// façade default).
    pub overrides: CallOverrides,
}

/// The result of dispatching one [`PendingCall`] through the façade.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// A decoded return value from a view call.
    Value(DynSolValue),
    /// A confirmed transaction receipt.
    Receipt(alloy_rpc_types_eth::TransactionReceipt),
    /// The transaction hash, returned immediately because the caller
    /// passed `wait_for_receipt_secs = 0`.
    TxHash(TxHash),
}

/// A small mapping of fee parameters chosen by the gas estimator, carrying
/// either legacy `gasPrice` or EIP-1559 typed fees. All fields are wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasParameters {
    /// Pre-EIP-1559 flat gas price.
    Legacy {
        /// Gas price in wei.
        gas_price: u128,
    },
    /// EIP-1559 typed fee parameters.
    Eip1559 {
        /// Maximum total fee per gas in wei.
        max_fee_per_gas: u128,
        /// Maximum priority fee (tip) per gas in wei.
        max_priority_fee_per_gas: u128,
    },
}

impl GasParameters {
    /// The fee this quote represents, in GWei, for ceiling comparisons:
    /// `maxFeePerGas` for typed fees, `gasPrice` for legacy.
    #[must_use]
    pub fn fee_gwei(self) -> f64 {
        let wei = match self {
            Self::Legacy { gas_price } => gas_price,
            Self::Eip1559 { max_fee_per_gas, .. } => max_fee_per_gas,
        };
        wei as f64 / 1e9
    }
}

/// Signed transaction payload, built and signed exactly once per logical
/// call. Identity is the derived transaction hash; the raw bytes are what
/// every endpoint in the winning sub-bracket receives during the broadcast
/// race.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    /// RLP-encoded signed transaction bytes.
    pub raw: Bytes,
    /// Hash derived from the signed payload.
    pub tx_hash: TxHash,
}
