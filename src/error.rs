//! Error taxonomy for the multi-endpoint dispatch engine.
//!
//! Every variant corresponds to one of the error identities a caller of the
//! façade can observe. Soft/transient failures (connection resets, read
//! timeouts, benign `ValueError`-shaped RPC rejections) never surface on
//! their own — they are absorbed by the reconciler primitives in
//! [`crate::reconcile`] and only escalate here once every endpoint in every
//! sub-bracket has been exhausted.

use alloy_primitives::TxHash;

/// Unified error type returned by every public operation on
/// [`crate::facade::MultiRpcClient`].
#[derive(Debug, thiserror::Error)]
pub enum MultiRpcError {
    /// Every endpoint in a fan-out raised an exception; carries the first
    /// one observed for diagnostics.
    #[error("all RPCs failed: {0}")]
    FailedOnAllRpcs(String),

    /// A gas quote's `maxFeePerGas` (or `gasPrice`) exceeded the caller's
    /// ceiling.
    #[error("gas price exceeded ceiling: {0}")]
    OutOfRangeTransactionFee(String),

    /// A read reconciliation exhausted every sub-bracket in the `view`
    /// bracket.
    #[error("view call failed: {0}")]
    ViewCallFailed(String),

    /// A confirmed transaction's receipt reported `status != 1`.
    #[error("transaction {tx_hash} failed (function `{function}`): {trace}")]
    TransactionFailedStatus {
        /// Hash of the reverted transaction.
        tx_hash: TxHash,
        /// Name of the façade function that produced it.
        function: String,
        /// Post-mortem trace text, as returned by the configured
        /// [`crate::observe::TxTraceHook`].
        trace: String,
    },

    /// A broadcast attempt failed with an RPC-reported value error that is
    /// not on the known-benign list.
    #[error("transaction value error: {0}")]
    TransactionValueError(String),

    /// Every gas estimation method failed (or the explicitly-requested one
    /// did).
    #[error("failed to get gas price: {0}")]
    FailedToGetGasPrice(String),

    /// A bracket's sub-bracket listed more URLs than
    /// [`crate::registry::MAX_RPC_PER_BRACKET`].
    #[error("maximum RPCs per bracket exceeded ({0} > {max})", max = crate::registry::MAX_RPC_PER_BRACKET)]
    MaximumRpcInEachBracketReached(usize),

    /// A sub-bracket had zero live endpoints after connection probing.
    #[error("at least one valid RPC must be provided in each bracket")]
    AtLeastProvideOneValidRpcInEachBracket,

    /// No bracket in the configuration produced any live endpoint.
    #[error("no available rpc provided")]
    NoAvailableRpcProvided,

    /// `get_block` / `get_block_number` exhausted the `view` bracket.
    #[error("get block failed: {0}")]
    GetBlockFailed(String),

    /// The operation requires a bracket (`view` or `transaction`) that was
    /// not configured.
    #[error("façade does not have a `{0}` RPC bracket configured")]
    DontHaveThisRpcType(&'static str),

    /// `view_policy` deserialized to an unrecognized variant.
    #[error("not a valid view policy")]
    NotValidViewPolicy,

    /// A transaction call was made without a sender address or signing key,
    /// and no façade default was set via `set_account`.
    #[error("no signer configured: call set_account or pass an override")]
    MissingSigner,

    /// Underlying RPC transport failure (connection refused, DNS, TLS,
    /// read timeout, HTTP error status, ...).
    #[error(transparent)]
    Transport(#[from] alloy_transport::TransportError),

    /// Configuration file could not be parsed.
    #[error(transparent)]
    Config(#[from] toml::de::Error),

    /// A configured file (contract ABI, config) could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A contract ABI document could not be parsed as JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A configured RPC or gas-API URL was not a valid URL.
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    /// ABI-level encoding/decoding failure (delegated to `alloy-dyn-abi`).
    #[error(transparent)]
    Abi(#[from] alloy_dyn_abi::Error),

    /// The named function is not present on the configured contract ABI.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
}

impl MultiRpcError {
    /// Whether this error belongs to the "local transient" band and should
    /// be treated as soft inside a `first_success` fan-out: connection
    /// resets, read timeouts, HTTP-layer failures, and the known-benign
    /// `ValueError` substrings from the broadcast race (including the
    /// chain-97 BSC overdraft message).
    #[must_use]
    pub fn is_soft_broadcast_error(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::TransactionValueError(msg) => is_benign_value_error(msg) || is_bsc_overdraft_message(msg),
            _ => false,
        }
    }

    /// Soft-error predicate for the confirmation race (stage 5): transport
    /// failures are tolerated per sub-bracket attempt; anything else (in
    /// particular [`MultiRpcError::TransactionFailedStatus`]) is terminal.
    #[must_use]
    pub fn is_soft_confirmation_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Soft-error predicate for read reconciliation under
    /// [`crate::data::ViewPolicy::FirstSuccess`].
    #[must_use]
    pub fn is_soft_read_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Abi(_))
    }

    /// Whether a sub-bracket-wide failure should advance to the next
    /// sub-bracket rather than propagate (stage 6 escalation plus the
    /// read reconciler's per-sub-bracket retry).
    #[must_use]
    pub fn is_sub_bracket_escalatable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::FailedOnAllRpcs(_) | Self::ViewCallFailed(_)
        )
    }
}

/// Case-insensitive match against the benign `ValueError` substrings the
/// broadcast race treats as soft, per §4.E stage 4. `chain_id` disambiguates
/// the BSC-only (`97`) "would cause overdraft" special case.
#[must_use]
pub fn is_benign_value_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    const BENIGN: &[&str] = &[
        "nonce too low",
        "already known",
        "transaction underpriced",
        "account suspended",
        "exceeds the configured cap",
    ];
    BENIGN.iter().any(|needle| lower.contains(needle))
}

/// The chain-97 (BSC) special-cased benign substring, checked only when the
/// façade's chain id is `97`.
#[must_use]
pub fn is_bsc_overdraft_message(message: &str) -> bool {
    message
        .to_lowercase()
        .contains("transaction would cause overdraft")
}

/// Whether a transport error message indicates an HTTP 429 / rate-limit
/// response. The RPC-sourced gas scan treats this as a hard stop rather
/// than falling through to the next endpoint.
#[must_use]
pub fn is_rate_limited_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || lower.contains("too many requests")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_substrings_match_case_insensitively() {
        assert!(is_benign_value_error("Nonce Too Low for this account"));
        assert!(is_benign_value_error("ALREADY KNOWN"));
        assert!(is_benign_value_error("transaction underpriced: bump fee"));
        assert!(!is_benign_value_error("insufficient funds for gas"));
    }

    #[test]
    fn bsc_overdraft_is_its_own_predicate() {
        assert!(is_bsc_overdraft_message(
            "execution reverted: transaction would cause overdraft"
        ));
        assert!(!is_benign_value_error(
            "transaction would cause overdraft"
        ));
    }

    #[test]
    fn overdraft_message_is_also_a_soft_broadcast_error() {
        let err = MultiRpcError::TransactionValueError(
            "execution reverted: transaction would cause overdraft".to_owned(),
        );
        assert!(err.is_soft_broadcast_error());
    }

    #[test]
    fn rate_limited_message_matches_status_code_and_phrase() {
        assert!(is_rate_limited_message("429 Too Many Requests"));
        assert!(is_rate_limited_message("error: too many requests, slow down"));
        assert!(!is_rate_limited_message("insufficient funds for gas"));
    }
}
