//! The transaction pipeline: nonce, fee parameters, sign-once, a broadcast
//! race, a confirmation race, and sub-bracket escalation.
//!
//! Stages 4 and 5 (broadcast, confirmation) are re-entered from the top of
//! stage 4 when a sub-bracket fails outright — the nonce and the signed
//! payload from stages 1–3 are reused, never rederived.

use std::time::Duration;

use alloy_dyn_abi::JsonAbiExt;
use alloy_network::TransactionBuilder;
use alloy_primitives::{Address, TxHash};
use alloy_provider::Provider;
use alloy_rpc_types_eth::{TransactionReceipt, TransactionRequest};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;

use crate::data::{CallOverrides, FunctionDescriptor, GasParameters, PendingCall, TransactionDraft};
use crate::error::{self, MultiRpcError};
use crate::gas::GasEstimator;
use crate::observe::TxTraceHook;
use crate::reconcile::{all_then_pick, first_success};
use crate::registry::{Bracket, Endpoint, EndpointRegistry};

const MAX_CONNECTION_RETRIES: u32 = 5;
const CONNECTION_RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_TIMEOUT_RETRIES: u32 = 1;

/// Outcome of the transaction pipeline for one logical call.
#[derive(Debug, Clone)]
pub enum TransactionOutcome {
    /// The confirmed receipt.
    Receipt(TransactionReceipt),
    /// The caller asked for the tx hash without waiting for confirmation.
    Hash(TxHash),
}

/// Runs the full transaction pipeline for one [`PendingCall`] against a
/// `transaction` bracket.
pub struct TransactionPipeline<'a> {
    bracket: &'a Bracket,
    registry: &'a EndpointRegistry,
    gas: &'a GasEstimator,
    trace_hook: &'a dyn TxTraceHook,
    default_gas_limit: u64,
    default_gas_upper_bound_gwei: u64,
    default_enable_gas_estimation: bool,
}

impl<'a> TransactionPipeline<'a> {
    /// Builds a pipeline bound to the façade's `transaction` bracket and
    /// ambient defaults.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        bracket: &'a Bracket,
        registry: &'a EndpointRegistry,
        gas: &'a GasEstimator,
        trace_hook: &'a dyn TxTraceHook,
        default_gas_limit: u64,
        default_gas_upper_bound_gwei: u64,
        default_enable_gas_estimation: bool,
    ) -> Self {
        Self {
            bracket,
            registry,
            gas,
            trace_hook,
            default_gas_limit,
            default_gas_upper_bound_gwei,
            default_enable_gas_estimation,
        }
    }

    /// Runs the pipeline for `func(args)` under `overrides`.
    ///
    /// # Errors
    ///
    /// Returns [`MultiRpcError::MissingSigner`] if neither `overrides` nor
    /// the façade default supplied a sender and signing key; otherwise any
    /// of the fan-out / gas / transport errors documented on the
    /// individual stages.
    pub async fn send(
        &self,
        func: &FunctionDescriptor,
        call: &PendingCall,
        default_sender: Option<(Address, String)>,
    ) -> Result<TransactionOutcome, MultiRpcError> {
        let (address, private_key) = match (&call.overrides.address, &call.overrides.private_key) {
            (Some(addr), Some(key)) => (*addr, key.clone()),
            _ => default_sender.ok_or(MultiRpcError::MissingSigner)?,
        };

        let nonce = self.get_nonce(address).await?;
        let gas_params = self
            .gas
            .get_gas_price(
                self.registry,
                call.overrides
                    .gas_upper_bound_gwei
                    .unwrap_or(self.default_gas_upper_bound_gwei),
                call.overrides.priority.unwrap_or_default(),
                call.overrides.gas_estimation_method,
            )
            .await?;

        let gas_limit = call.overrides.gas_limit.unwrap_or(self.default_gas_limit);
        let enable_gas_estimation = call
            .overrides
            .enable_gas_estimation
            .unwrap_or(self.default_enable_gas_estimation);

        let first_endpoint = self
            .bracket
            .first()
            .and_then(|sub| sub.first())
            .ok_or(MultiRpcError::AtLeastProvideOneValidRpcInEachBracket)?;

        let draft = self
            .build_and_sign(
                first_endpoint,
                func,
                call,
                address,
                &private_key,
                nonce,
                gas_limit,
                gas_params,
                enable_gas_estimation,
            )
            .await?;

        let wait_for = call.overrides.receipt_wait();

        for sub_bracket in self.bracket {
            match self.broadcast_and_confirm(sub_bracket, &draft, func, wait_for).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_sub_bracket_escalatable() => {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(function = %func.name, error = %err, "sub-bracket exhausted, escalating");
                    #[cfg(not(feature = "telemetry"))]
                    let _ = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(MultiRpcError::FailedOnAllRpcs(
            "all transaction sub-brackets exhausted".to_owned(),
        ))
    }

    /// Stage 1: per sub-bracket, fan out `eth_getTransactionCount` and
    /// take the maximum. Prefers the `view` bracket; falls back to
    /// `transaction` when no `view` bracket is configured.
    async fn get_nonce(&self, address: Address) -> Result<u64, MultiRpcError> {
        let bracket = self.registry.view().unwrap_or(self.bracket);

        for sub_bracket in bracket {
            let tasks: Vec<_> = sub_bracket
                .iter()
                .map(|endpoint| async move {
                    endpoint
                        .provider
                        .get_transaction_count(address)
                        .await
                        .map_err(MultiRpcError::from)
                })
                .collect();

            match all_then_pick(tasks, |values| values.into_iter().max().unwrap_or(0)).await {
                Ok(nonce) => return Ok(nonce),
                Err(err) => {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(error = %err, "get_nonce sub-bracket failed, trying next");
                    let _ = err;
                }
            }
        }

        Err(MultiRpcError::ViewCallFailed(
            "all sub-brackets exhausted while fetching nonce".to_owned(),
        ))
    }

    /// Stage 2 (delegated) + stage 3: assemble and sign exactly once,
    /// against the first endpoint of the first `transaction` sub-bracket.
    #[allow(clippy::too_many_arguments)]
    async fn build_and_sign(
        &self,
        endpoint: &Endpoint,
        func: &FunctionDescriptor,
        call: &PendingCall,
        address: Address,
        private_key: &str,
        nonce: u64,
        gas_limit: u64,
        gas_params: GasParameters,
        enable_gas_estimation: bool,
    ) -> Result<TransactionDraft, MultiRpcError> {
        let calldata = func
            .abi
            .abi_encode_input(&call.args)
            .map_err(MultiRpcError::Abi)?;

        let mut request = TransactionRequest::default()
            .with_from(address)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_chain_id(self.registry.chain_id())
            .with_input(calldata);

        request = match gas_params {
            GasParameters::Legacy { gas_price } => request.with_gas_price(gas_price),
            GasParameters::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => request
                .with_max_fee_per_gas(max_fee_per_gas)
                .with_max_priority_fee_per_gas(max_priority_fee_per_gas),
        };

        if enable_gas_estimation {
            match endpoint.provider.estimate_gas(request.clone()).await {
                Ok(estimated) => {
                    #[cfg(feature = "telemetry")]
                    tracing::info!(function = %func.name, gas = estimated, "observational gas estimate");
                    let _ = estimated;
                }
                Err(err) => {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(function = %func.name, error = %err, "observational gas estimate failed");
                    let _ = err;
                }
            }
        }

        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| MultiRpcError::TransactionValueError(format!("invalid private key: {e}")))?;

        let envelope = request
            .build(&alloy_network::EthereumWallet::from(signer))
            .await
            .map_err(|e| MultiRpcError::TransactionValueError(format!("failed to sign transaction: {e}")))?;

        let raw = alloy_eips::eip2718::Encodable2718::encoded_2718(&envelope);
        let tx_hash = *envelope.tx_hash();

        Ok(TransactionDraft {
            raw: raw.into(),
            tx_hash,
        })
    }

    async fn broadcast_and_confirm(
        &self,
        sub_bracket: &[Endpoint],
        draft: &TransactionDraft,
        func: &FunctionDescriptor,
        wait_for: Option<Duration>,
    ) -> Result<TransactionOutcome, MultiRpcError> {
        let winner = self.broadcast(sub_bracket, draft).await?;

        let Some(timeout) = wait_for else {
            return Ok(TransactionOutcome::Hash(draft.tx_hash));
        };

        let receipt = self
            .confirm(sub_bracket, draft.tx_hash, timeout, func)
            .await?;
        Ok(TransactionOutcome::Receipt(receipt))
    }

    /// Stage 4: race the same raw bytes across every endpoint in the
    /// sub-bracket.
    async fn broadcast(
        &self,
        sub_bracket: &[Endpoint],
        draft: &TransactionDraft,
    ) -> Result<(), MultiRpcError> {
        let tasks: Vec<_> = sub_bracket
            .iter()
            .map(|endpoint| {
                let raw = draft.raw.clone();
                async move {
                    endpoint
                        .provider
                        .send_raw_transaction(&raw)
                        .await
                        .map(|_| ())
                        .map_err(classify_broadcast_error)
                }
            })
            .collect();

        first_success(tasks, MultiRpcError::is_soft_broadcast_error).await
    }

    /// Stage 5: race the confirmation wait across the same sub-bracket.
    /// Each worker retries per the exact counts mined from the original
    /// implementation: up to 5 connection-error retries with a 5s sleep
    /// between them, and a single timeout-doubling retry.
    async fn confirm(
        &self,
        sub_bracket: &[Endpoint],
        tx_hash: TxHash,
        timeout: Duration,
        func: &FunctionDescriptor,
    ) -> Result<TransactionReceipt, MultiRpcError> {
        let tasks: Vec<_> = sub_bracket
            .iter()
            .map(|endpoint| {
                let func_name = func.name.clone();
                async move { wait_for_receipt(endpoint, tx_hash, timeout, &func_name, self.trace_hook).await }
            })
            .collect();

        first_success(tasks, MultiRpcError::is_soft_confirmation_error).await
    }
}

fn classify_broadcast_error(err: alloy_transport::TransportError) -> MultiRpcError {
    let message = err.to_string();
    if error::is_bsc_overdraft_message(&message) || error::is_benign_value_error(&message) {
        return MultiRpcError::TransactionValueError(message);
    }
    if looks_like_value_error(&err) {
        #[cfg(feature = "telemetry")]
        tracing::warn!(error = %message, "unrecognized RPC value error, treating as soft");
        return MultiRpcError::TransactionValueError(message);
    }
    MultiRpcError::from(err)
}

fn looks_like_value_error(err: &alloy_transport::TransportError) -> bool {
    err.as_error_resp().is_some()
}

/// Interval between `eth_getTransactionReceipt` polls while a receipt
/// hasn't landed yet.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls `endpoint` for `tx_hash`'s receipt until it lands, the deadline
/// passes, or the retry budget is exhausted.
///
/// Mirrors the original two retry tracks exactly: an RPC-transport failure
/// is a connection error (up to [`MAX_CONNECTION_RETRIES`], sleeping
/// [`CONNECTION_RETRY_DELAY`] between attempts) while our own deadline
/// expiring with no receipt yet is a timeout (up to
/// [`MAX_TIMEOUT_RETRIES`], doubling the deadline each time).
async fn wait_for_receipt(
    endpoint: &Endpoint,
    tx_hash: TxHash,
    mut timeout: Duration,
    func_name: &str,
    trace_hook: &dyn TxTraceHook,
) -> Result<TransactionReceipt, MultiRpcError> {
    let mut connection_retries = 0u32;
    let mut timeout_retries = 0u32;

    loop {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match endpoint.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.status() => return Ok(receipt),
                Ok(Some(receipt)) => {
                    let trace = trace_hook.trace(tx_hash, func_name);
                    return Err(MultiRpcError::TransactionFailedStatus {
                        tx_hash,
                        function: func_name.to_owned(),
                        trace,
                    });
                }
                Ok(None) => {
                    if tokio::time::Instant::now() >= deadline {
                        break;
                    }
                    tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
                }
                Err(err) => {
                    if connection_retries >= MAX_CONNECTION_RETRIES {
                        return Err(MultiRpcError::from(err));
                    }
                    connection_retries += 1;
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(function = %func_name, error = %err, attempt = connection_retries, "connection error while waiting for receipt, retrying");
                    tokio::time::sleep(CONNECTION_RETRY_DELAY).await;
                }
            }
        }

        if timeout_retries >= MAX_TIMEOUT_RETRIES {
            return Err(MultiRpcError::Transport(alloy_transport::TransportErrorKind::custom_str(
                "timed out waiting for transaction receipt",
            )));
        }
        timeout_retries += 1;
        timeout *= 2;
        #[cfg(feature = "telemetry")]
        tracing::warn!(function = %func_name, attempt = timeout_retries, "timed out waiting for receipt, doubling deadline and retrying");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_counts_match_the_source_material() {
        assert_eq!(MAX_CONNECTION_RETRIES, 5);
        assert_eq!(MAX_TIMEOUT_RETRIES, 1);
        assert_eq!(CONNECTION_RETRY_DELAY, Duration::from_secs(5));
    }

    #[test]
    fn bsc_overdraft_classifies_as_benign_value_error() {
        let msg = "execution reverted: transaction would cause overdraft";
        assert!(error::is_bsc_overdraft_message(msg));
    }

    mod broadcast_race {
        use alloy_provider::RootProvider;
        use alloy_rpc_client::RpcClient;
        use alloy_transport_http::Http;
        use url::Url;
        use wiremock::matchers::{body_string_contains, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        use super::*;
        use crate::registry::EndpointRegistry;

        async fn endpoint_for(server: &MockServer) -> Endpoint {
            let url: Url = server.uri().parse().expect("mock server uri parses");
            let client = RpcClient::new(Http::new(url.clone()), false);
            Endpoint {
                url,
                provider: RootProvider::new(client),
            }
        }

        /// Scenario 4: 4 transaction endpoints, 3 reject with the benign
        /// "nonce too low" error and 1 accepts. The broadcast race must
        /// still resolve `Ok` — none of the 3 soft failures should abort it.
        #[tokio::test]
        async fn broadcast_absorbs_benign_nonce_errors_from_other_endpoints() {
            let bad_servers = [
                MockServer::start().await,
                MockServer::start().await,
                MockServer::start().await,
            ];
            for server in &bad_servers {
                Mock::given(method("POST"))
                    .and(body_string_contains("eth_sendRawTransaction"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "error": {"code": -32003, "message": "nonce too low"}
                    })))
                    .mount(server)
                    .await;
            }

            let good_server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(body_string_contains("eth_sendRawTransaction"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": format!("0x{}", "11".repeat(32))
                })))
                .mount(&good_server)
                .await;

            let mut sub_bracket = Vec::new();
            for server in bad_servers.iter().chain(std::iter::once(&good_server)) {
                sub_bracket.push(endpoint_for(server).await);
            }
            let bracket: Bracket = vec![sub_bracket];

            let registry = EndpointRegistry::for_test(None, None, 1);
            let gas = GasEstimator::new(1, crate::gas::GasEstimatorConfig::default());
            let hook = crate::observe::NoopTraceHook;
            let pipeline = TransactionPipeline::new(&bracket, &registry, &gas, &hook, 21_000, 1_000_000, false);

            let draft = TransactionDraft {
                raw: alloy_primitives::Bytes::from_static(&[0x01, 0x02, 0x03]),
                tx_hash: TxHash::ZERO,
            };

            let result = pipeline.broadcast(&bracket[0], &draft).await;
            assert!(result.is_ok(), "broadcast should absorb the benign nonce errors: {result:?}");
        }
    }
}
