//! Public façade: the crate's single consumer-facing entry point.
//!
//! [`MultiRpcClient`] owns the connected [`EndpointRegistry`], the
//! [`GasEstimator`], and the [`FunctionDescriptor`]s derived from the
//! configured contract ABI. It dispatches [`Self::call`] to the read
//! reconciler or the transaction pipeline depending on the target
//! function's state mutability, and exposes a handful of raw queries that
//! skip policy reconciliation entirely.

use std::collections::HashMap;
use std::sync::RwLock;

use alloy_dyn_abi::DynSolValue;
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, BlockNumber};
use alloy_provider::Provider;
use alloy_rpc_types_eth::{Block, BlockId, TransactionReceipt};

use crate::config::{ContractAbiConfig, MultiRpcConfig};
use crate::data::{CallOutcome, CallOverrides, FunctionDescriptor, FunctionKind, PendingCall, ViewPolicy};
use crate::error::MultiRpcError;
use crate::gas::{GasEstimator, GasEstimatorConfig};
use crate::observe::{NoopTraceHook, TxTraceHook};
use crate::read::ReadReconciler;
use crate::reconcile::first_success;
use crate::registry::EndpointRegistry;
use crate::transaction::{TransactionOutcome, TransactionPipeline};

/// The façade's mutable default sender. Callers aren't expected to race
/// [`MultiRpcClient::set_account`] against in-flight calls, but `&self`
/// methods can't hand out a plain mutable field.
#[derive(Debug, Default)]
struct DefaultSender {
    address: Option<Address>,
    private_key: Option<String>,
}

/// A connected, resilient multi-endpoint client bound to one contract.
#[derive(Debug)]
pub struct MultiRpcClient {
    registry: EndpointRegistry,
    gas: GasEstimator,
    functions: HashMap<String, FunctionDescriptor>,
    contract_address: Address,
    view_policy: ViewPolicy,
    default_gas_estimation_method: Option<crate::gas::GasEstimationMethod>,
    default_gas_limit: u64,
    default_gas_upper_bound_gwei: u64,
    default_enable_gas_estimation: bool,
    trace_hook: Box<dyn TxTraceHook>,
    default_sender: RwLock<DefaultSender>,
}

impl MultiRpcClient {
    /// Connects every configured endpoint and derives the contract's
    /// function descriptors.
    ///
    /// # Errors
    ///
    /// Any [`EndpointRegistry::connect`] error, or an I/O/parse error
    /// reading `config.contract_abi` when it names a path.
    pub async fn new(config: &MultiRpcConfig) -> Result<Self, MultiRpcError> {
        Self::with_trace_hook(config, Box::new(NoopTraceHook)).await
    }

    /// As [`Self::new`], with a caller-supplied [`TxTraceHook`] in place of
    /// the default no-op.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub async fn with_trace_hook(
        config: &MultiRpcConfig,
        trace_hook: Box<dyn TxTraceHook>,
    ) -> Result<Self, MultiRpcError> {
        let brackets = config.brackets()?;
        let registry = EndpointRegistry::connect(&brackets, config.is_proof_authority).await?;

        let abi = load_abi(&config.contract_abi)?;
        let functions = derive_function_descriptors(&abi);

        let gas = GasEstimator::new(
            registry.chain_id(),
            GasEstimatorConfig {
                gas_api_url_template: config.gas_api_url_template.clone(),
                default_method: config.gas_estimation,
                ..GasEstimatorConfig::default()
            },
        );

        let default_sender = RwLock::new(DefaultSender {
            address: config.default_sender_address,
            private_key: config.default_sender_private_key.clone(),
        });

        Ok(Self {
            registry,
            gas,
            functions,
            contract_address: config.contract_address,
            view_policy: config.view_policy,
            default_gas_estimation_method: config.gas_estimation,
            default_gas_limit: config.gas_limit,
            default_gas_upper_bound_gwei: config.gas_upper_bound_gwei,
            default_enable_gas_estimation: config.enable_gas_estimation,
            trace_hook,
            default_sender,
        })
    }

    /// Looks up a function descriptor by name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.get(name)
    }

    /// Sets the façade's default sender, used by [`Self::call`] when a
    /// [`CallOverrides`] doesn't supply one. Not expected to be invoked
    /// concurrently with in-flight calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned by a prior panic on
    /// another thread.
    pub fn set_account(&self, address: Address, private_key: String) {
        let mut guard = self.default_sender.write().expect("default sender lock poisoned");
        guard.address = Some(address);
        guard.private_key = Some(private_key);
    }

    /// Dispatches a call to `name` with `args`, routing to the read
    /// reconciler or the transaction pipeline by the function's state
    /// mutability.
    ///
    /// # Errors
    ///
    /// [`MultiRpcError::UnknownFunction`] if `name` isn't on the
    /// configured ABI; [`MultiRpcError::DontHaveThisRpcType`] if the
    /// bracket the function needs wasn't configured; otherwise whatever
    /// the read reconciler or transaction pipeline returns.
    pub async fn call(
        &self,
        name: &str,
        args: &[DynSolValue],
        overrides: CallOverrides,
    ) -> Result<CallOutcome, MultiRpcError> {
        let func = self
            .functions
            .get(name)
            .ok_or_else(|| MultiRpcError::UnknownFunction(name.to_owned()))?;

        match func.kind {
            FunctionKind::View => {
                let bracket = self
                    .registry
                    .view()
                    .ok_or(MultiRpcError::DontHaveThisRpcType("view"))?;
                let block = overrides.block_identifier.unwrap_or_else(BlockId::latest);
                let reconciler = ReadReconciler::new(bracket, self.contract_address);
                let value = reconciler.call_view(func, block, args, self.view_policy).await?;
                Ok(CallOutcome::Value(value))
            }
            FunctionKind::Transaction => {
                let bracket = self
                    .registry
                    .transaction()
                    .ok_or(MultiRpcError::DontHaveThisRpcType("transaction"))?;
                let call = PendingCall {
                    function: name.to_owned(),
                    args: args.to_vec(),
                    overrides,
                };
                let default_sender = {
                    let guard = self.default_sender.read().expect("default sender lock poisoned");
                    match (guard.address, guard.private_key.clone()) {
                        (Some(addr), Some(key)) => Some((addr, key)),
                        _ => None,
                    }
                };
                let pipeline = TransactionPipeline::new(
                    bracket,
                    &self.registry,
                    &self.gas,
                    self.trace_hook.as_ref(),
                    self.default_gas_limit,
                    self.default_gas_upper_bound_gwei,
                    self.default_enable_gas_estimation,
                );
                match pipeline.send(func, &call, default_sender).await? {
                    TransactionOutcome::Receipt(receipt) => Ok(CallOutcome::Receipt(receipt)),
                    TransactionOutcome::Hash(hash) => Ok(CallOutcome::TxHash(hash)),
                }
            }
        }
    }

    /// Races `eth_blockNumber` across the `view` bracket.
    ///
    /// # Errors
    ///
    /// [`MultiRpcError::DontHaveThisRpcType`] if no `view` bracket is
    /// configured; [`MultiRpcError::GetBlockFailed`] if every endpoint
    /// failed.
    pub async fn get_block_number(&self) -> Result<BlockNumber, MultiRpcError> {
        let bracket = self
            .registry
            .view()
            .ok_or(MultiRpcError::DontHaveThisRpcType("view"))?;
        self.race_view_bracket(bracket, |endpoint| async move {
            endpoint.provider.get_block_number().await.map_err(MultiRpcError::from)
        })
        .await
        .map_err(|err| MultiRpcError::GetBlockFailed(err.to_string()))
    }

    /// Races `eth_getBlockByNumber`/`eth_getBlockByHash` across the `view`
    /// bracket.
    ///
    /// # Errors
    ///
    /// See [`Self::get_block_number`].
    pub async fn get_block(&self, block: BlockId) -> Result<Option<Block>, MultiRpcError> {
        let bracket = self
            .registry
            .view()
            .ok_or(MultiRpcError::DontHaveThisRpcType("view"))?;
        self.race_view_bracket(bracket, |endpoint| async move {
            endpoint.provider.get_block(block).await.map_err(MultiRpcError::from)
        })
        .await
        .map_err(|err| MultiRpcError::GetBlockFailed(err.to_string()))
    }

    /// Races `eth_getTransactionReceipt` across the `view` bracket.
    ///
    /// # Errors
    ///
    /// [`MultiRpcError::DontHaveThisRpcType`] if no `view` bracket is
    /// configured; [`MultiRpcError::FailedOnAllRpcs`] if every endpoint
    /// failed.
    pub async fn get_tx_receipt(
        &self,
        tx_hash: alloy_primitives::TxHash,
    ) -> Result<Option<TransactionReceipt>, MultiRpcError> {
        let bracket = self
            .registry
            .view()
            .ok_or(MultiRpcError::DontHaveThisRpcType("view"))?;
        self.race_view_bracket(bracket, |endpoint| async move {
            endpoint
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(MultiRpcError::from)
        })
        .await
    }

    async fn race_view_bracket<T, F, Fut>(&self, bracket: &crate::registry::Bracket, make_task: F) -> Result<T, MultiRpcError>
    where
        F: Fn(&crate::registry::Endpoint) -> Fut,
        Fut: std::future::Future<Output = Result<T, MultiRpcError>>,
    {
        for sub_bracket in bracket {
            let tasks: Vec<_> = sub_bracket.iter().map(&make_task).collect();
            match first_success(tasks, MultiRpcError::is_soft_read_error).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_sub_bracket_escalatable() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(MultiRpcError::FailedOnAllRpcs(
            "all sub-brackets exhausted".to_owned(),
        ))
    }
}

fn load_abi(config: &ContractAbiConfig) -> Result<JsonAbi, MultiRpcError> {
    let json = match config {
        ContractAbiConfig::Inline(value) => value.clone(),
        ContractAbiConfig::Path(path) => {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        }
    };
    Ok(serde_json::from_value(json)?)
}

fn derive_function_descriptors(abi: &JsonAbi) -> HashMap<String, FunctionDescriptor> {
    let mut functions = HashMap::new();
    for func in abi.functions() {
        let kind = FunctionKind::classify(func);
        functions.insert(
            func.name.clone(),
            FunctionDescriptor {
                name: func.name.clone(),
                abi: func.clone(),
                kind,
            },
        );
    }
    functions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_function_descriptors_classifies_by_mutability() {
        let abi_json = serde_json::json!([
            {
                "type": "function",
                "name": "balanceOf",
                "stateMutability": "view",
                "inputs": [{"name": "account", "type": "address"}],
                "outputs": [{"name": "", "type": "uint256"}]
            },
            {
                "type": "function",
                "name": "transfer",
                "stateMutability": "nonpayable",
                "inputs": [
                    {"name": "to", "type": "address"},
                    {"name": "amount", "type": "uint256"}
                ],
                "outputs": [{"name": "", "type": "bool"}]
            }
        ]);
        let abi: JsonAbi = serde_json::from_value(abi_json).unwrap();
        let functions = derive_function_descriptors(&abi);

        assert_eq!(functions["balanceOf"].kind, FunctionKind::View);
        assert_eq!(functions["transfer"].kind, FunctionKind::Transaction);
    }
}
