//! The read reconciler: fans a view call out across the endpoints in one
//! `view` sub-bracket at a time, reconciling the responses under the
//! façade's configured [`ViewPolicy`].

use alloy_dyn_abi::{DynSolValue, JsonAbiExt};
use alloy_json_abi::Function;
use alloy_network::TransactionBuilder;
use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_rpc_types_eth::{BlockId, TransactionRequest};

use crate::data::{FunctionDescriptor, ViewPolicy};
use crate::error::MultiRpcError;
use crate::reconcile::{all_then_pick, first_success};
use crate::registry::{Bracket, Endpoint};

/// Encodes and decodes a view call against one endpoint, returning the
/// block the provider served it against alongside the decoded value — an
/// atomic `(block_number, value)` pair from a single round trip.
async fn call_one(
    endpoint: &Endpoint,
    contract: Address,
    func: &Function,
    args: &[DynSolValue],
    block: BlockId,
) -> Result<(u64, DynSolValue), MultiRpcError> {
    let calldata = func.abi_encode_input(args).map_err(MultiRpcError::Abi)?;
    let request = TransactionRequest::default()
        .to(contract)
        .input(calldata.into());

    let block_number_fut = endpoint.provider.get_block_number();
    let call_fut = endpoint.provider.call(request).block(block);
    let (block_number, raw_output) = tokio::try_join!(block_number_fut, call_fut)?;

    let decoded = func
        .abi_decode_output(&raw_output)
        .map_err(MultiRpcError::Abi)?;
    let value = decoded
        .into_iter()
        .next()
        .unwrap_or_else(|| DynSolValue::Tuple(Vec::new()));
    Ok((block_number, value))
}

/// Reconciles a view call across the `view` bracket.
pub struct ReadReconciler<'a> {
    bracket: &'a Bracket,
    contract: Address,
}

impl<'a> ReadReconciler<'a> {
    /// Builds a reconciler over `bracket`, targeting calls at `contract`.
    #[must_use]
    pub const fn new(bracket: &'a Bracket, contract: Address) -> Self {
        Self { bracket, contract }
    }

    /// Calls `func` with `args` at `block`, reconciled under `policy`.
    ///
    /// Tries each sub-bracket of the `view` bracket in registration order;
    /// a sub-bracket-wide failure (every endpoint in it failed) advances
    /// to the next one. If every sub-bracket is exhausted, returns
    /// [`MultiRpcError::ViewCallFailed`].
    pub async fn call_view(
        &self,
        func: &FunctionDescriptor,
        block: BlockId,
        args: &[DynSolValue],
        policy: ViewPolicy,
    ) -> Result<DynSolValue, MultiRpcError> {
        for sub_bracket in self.bracket {
            let result = match policy {
                ViewPolicy::MostUpdated => self.call_most_updated(sub_bracket, func, block, args).await,
                ViewPolicy::FirstSuccess => self.call_first_success(sub_bracket, func, block, args).await,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_sub_bracket_escalatable() => {
                    #[cfg(feature = "telemetry")]
                    tracing::info!(function = %func.name, error = %err, "sub-bracket exhausted for view call, trying next");
                    #[cfg(not(feature = "telemetry"))]
                    let _ = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(MultiRpcError::ViewCallFailed(
            "all sub-brackets exhausted".to_owned(),
        ))
    }

    async fn call_most_updated(
        &self,
        sub_bracket: &[Endpoint],
        func: &FunctionDescriptor,
        block: BlockId,
        args: &[DynSolValue],
    ) -> Result<DynSolValue, MultiRpcError> {
        let tasks: Vec<_> = sub_bracket
            .iter()
            .map(|endpoint| call_one(endpoint, self.contract, &func.abi, args, block))
            .collect();

        all_then_pick(tasks, pick_most_updated)
            .await
            .map(|(_, value)| value)
    }

    async fn call_first_success(
        &self,
        sub_bracket: &[Endpoint],
        func: &FunctionDescriptor,
        block: BlockId,
        args: &[DynSolValue],
    ) -> Result<DynSolValue, MultiRpcError> {
        let tasks: Vec<_> = sub_bracket
            .iter()
            .map(|endpoint| async move {
                let (_, value) = call_one(endpoint, self.contract, &func.abi, args, block).await?;
                Ok(value)
            })
            .collect();
        first_success(tasks, MultiRpcError::is_soft_read_error).await
    }
}

/// Picks the result served against the highest block number, ties broken
/// by whichever came first in the sub-bracket's registration order.
fn pick_most_updated(results: Vec<(u64, DynSolValue)>) -> (u64, DynSolValue) {
    let mut iter = results.into_iter();
    let mut best = iter.next().expect("all_then_pick never selects from an empty Vec");
    for candidate in iter {
        if candidate.0 > best.0 {
            best = candidate;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_most_updated_breaks_ties_by_registration_order() {
        let results = vec![
            (10, DynSolValue::Bool(true)),
            (12, DynSolValue::Bool(false)),
            (12, DynSolValue::Bool(true)),
        ];
        let (block, value) = pick_most_updated(results);
        assert_eq!(block, 12);
        assert_eq!(value, DynSolValue::Bool(false));
    }

    mod all_rpc_failure {
        use alloy_provider::RootProvider;
        use alloy_rpc_client::RpcClient;
        use alloy_transport_http::Http;
        use url::Url;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        use super::*;

        async fn endpoint_for(server: &MockServer) -> Endpoint {
            let url: Url = server.uri().parse().expect("mock server uri parses");
            let client = RpcClient::new(Http::new(url.clone()), false);
            Endpoint {
                url,
                provider: RootProvider::new(client),
            }
        }

        /// Scenario 6: every view endpoint in the sub-bracket raises a
        /// connection-level error. The race must surface
        /// `FailedOnAllRpcs` rather than hang or panic.
        #[tokio::test]
        async fn call_first_success_surfaces_failed_on_all_rpcs() {
            let servers = [MockServer::start().await, MockServer::start().await];
            for server in &servers {
                Mock::given(method("POST"))
                    .respond_with(ResponseTemplate::new(500))
                    .mount(server)
                    .await;
            }

            let mut sub_bracket = Vec::new();
            for server in &servers {
                sub_bracket.push(endpoint_for(server).await);
            }
            let bracket: Bracket = vec![sub_bracket];

            let abi_json = serde_json::json!([{
                "type": "function",
                "name": "totalSupply",
                "stateMutability": "view",
                "inputs": [],
                "outputs": [{"name": "", "type": "uint256"}]
            }]);
            let abi: alloy_json_abi::JsonAbi = serde_json::from_value(abi_json).unwrap();
            let func = FunctionDescriptor {
                name: "totalSupply".to_owned(),
                abi: abi.functions().next().unwrap().clone(),
                kind: crate::data::FunctionKind::View,
            };

            let reconciler = ReadReconciler::new(&bracket, Address::ZERO);
            let result = reconciler
                .call_first_success(&bracket[0], &func, BlockId::latest(), &[])
                .await;

            assert!(matches!(result, Err(MultiRpcError::FailedOnAllRpcs(_))));
        }
    }
}
