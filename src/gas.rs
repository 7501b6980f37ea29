//! Gas fee estimation cascade.
//!
//! Four methods, selectable explicitly or chosen by a cascade:
//! [`GasEstimationMethod::GasApi`] queries a priority-keyed HTTP gas-price
//! API, [`GasEstimationMethod::Rpc`] polls `eth_gasPrice` across the
//! `transaction` bracket, [`GasEstimationMethod::Fixed`] looks up a
//! per-chain constant, and [`GasEstimationMethod::Custom`] is an extension
//! seam callers can override.

use std::collections::HashMap;

use alloy_provider::Provider;

use crate::data::{ChainId, GasParameters, Priority};
use crate::error::{self, MultiRpcError};
use crate::registry::EndpointRegistry;

/// A gas estimation method, in the order the default cascade tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GasEstimationMethod {
    /// Query a priority-keyed HTTP gas-price API.
    GasApi,
    /// Poll `eth_gasPrice` across the `transaction` bracket.
    Rpc,
    /// Look up a fixed per-chain gwei constant.
    Fixed,
    /// Caller-supplied extension point.
    Custom,
}

const METHOD_CASCADE: [GasEstimationMethod; 4] = [
    GasEstimationMethod::GasApi,
    GasEstimationMethod::Rpc,
    GasEstimationMethod::Fixed,
    GasEstimationMethod::Custom,
];

/// Fallback gwei used by [`GasEstimationMethod::Fixed`] for a chain with no
/// entry in the configured table.
pub const DEFAULT_FIXED_GAS_GWEI: u64 = 30;

/// Configuration for [`GasEstimator`].
#[derive(Debug, Clone, Default)]
pub struct GasEstimatorConfig {
    /// URL template for the gas-price HTTP API, e.g.
    /// `"https://gas.example.com/{chain_id}/suggestedGasFees"`. Required
    /// only when [`GasEstimationMethod::GasApi`] is reachable (explicitly
    /// requested, or via the default cascade).
    pub gas_api_url_template: Option<String>,
    /// Per-chain fixed gwei table, consulted by
    /// [`GasEstimationMethod::Fixed`].
    pub fixed_gas_gwei: HashMap<ChainId, u64>,
    /// When set, the default cascade is skipped in favor of
    /// [`GasEstimationMethod::Rpc`] directly (mirrors the Python client's
    /// dev-environment shortcut).
    pub dev_env: bool,
    /// Chains for which `Rpc` is used directly rather than the full
    /// cascade, even outside `dev_env`.
    pub rpc_only_chains: Vec<ChainId>,
    /// Method used when the caller does not name one explicitly.
    pub default_method: Option<GasEstimationMethod>,
}

/// The gas-fee estimation cascade for one façade instance.
#[derive(Debug)]
pub struct GasEstimator {
    chain_id: ChainId,
    config: GasEstimatorConfig,
    #[cfg(feature = "gas-api")]
    http: reqwest::Client,
}

impl GasEstimator {
    /// Builds an estimator bound to `chain_id`.
    #[must_use]
    pub fn new(chain_id: ChainId, config: GasEstimatorConfig) -> Self {
        Self {
            chain_id,
            config,
            #[cfg(feature = "gas-api")]
            http: reqwest::Client::new(),
        }
    }

    /// Resolves a gas quote for `priority`, under `ceiling_gwei`.
    ///
    /// If `method` is `Some`, that method's result (or error) is returned
    /// directly. Otherwise: `dev_env` or a chain listed in
    /// `rpc_only_chains` shortcuts straight to [`GasEstimationMethod::Rpc`];
    /// else the full cascade (`GasApi → Rpc → Fixed → Custom`) is tried in
    /// order, stopping at the first success.
    ///
    /// # Errors
    ///
    /// Returns [`MultiRpcError::FailedToGetGasPrice`] if every applicable
    /// method failed, or [`MultiRpcError::OutOfRangeTransactionFee`] if a
    /// quote exceeded `ceiling_gwei`.
    pub async fn get_gas_price(
        &self,
        registry: &EndpointRegistry,
        ceiling_gwei: u64,
        priority: Priority,
        method: Option<GasEstimationMethod>,
    ) -> Result<GasParameters, MultiRpcError> {
        if let Some(method) = method.or(self.config.default_method) {
            return self.dispatch(registry, method, ceiling_gwei, priority).await;
        }

        if self.config.dev_env || self.config.rpc_only_chains.contains(&self.chain_id) {
            return self
                .dispatch(registry, GasEstimationMethod::Rpc, ceiling_gwei, priority)
                .await;
        }

        let mut last_err = None;
        for method in METHOD_CASCADE {
            match self.dispatch(registry, method, ceiling_gwei, priority).await {
                Ok(params) => return Ok(params),
                Err(err) => {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(?method, error = %err, "gas estimation method failed, trying next");
                    last_err = Some(err);
                }
            }
        }

        Err(match last_err {
            Some(MultiRpcError::FailedToGetGasPrice(msg)) => {
                MultiRpcError::FailedToGetGasPrice(msg)
            }
            Some(err) => MultiRpcError::FailedToGetGasPrice(err.to_string()),
            None => MultiRpcError::FailedToGetGasPrice("no estimation methods configured".to_owned()),
        })
    }

    async fn dispatch(
        &self,
        registry: &EndpointRegistry,
        method: GasEstimationMethod,
        ceiling_gwei: u64,
        priority: Priority,
    ) -> Result<GasParameters, MultiRpcError> {
        match method {
            GasEstimationMethod::GasApi => self.get_gas_from_api(ceiling_gwei, priority).await,
            GasEstimationMethod::Rpc => self.get_gas_from_rpc(registry, ceiling_gwei, priority).await,
            GasEstimationMethod::Fixed => self.get_fixed_value(ceiling_gwei, priority),
            GasEstimationMethod::Custom => self.custom_gas_estimation(ceiling_gwei, priority),
        }
    }

    #[cfg(feature = "gas-api")]
    async fn get_gas_from_api(
        &self,
        ceiling_gwei: u64,
        priority: Priority,
    ) -> Result<GasParameters, MultiRpcError> {
        let template = self.config.gas_api_url_template.as_ref().ok_or_else(|| {
            MultiRpcError::FailedToGetGasPrice("no gas API URL template configured".to_owned())
        })?;
        let url = template.replace("{chain_id}", &self.chain_id.to_string());

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MultiRpcError::FailedToGetGasPrice(format!("gas API request failed: {e}")))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MultiRpcError::FailedToGetGasPrice(format!("gas API response not JSON: {e}")))?;

        let tier = body.get(priority.tier_key()).ok_or_else(|| {
            MultiRpcError::FailedToGetGasPrice(format!("gas API response missing `{}` tier", priority.tier_key()))
        })?;
        let max_fee = parse_gwei_field(tier, "suggestedMaxFeePerGas")?;
        let max_priority_fee = parse_gwei_field(tier, "suggestedMaxPriorityFeePerGas")?;

        if max_fee > rust_decimal::Decimal::from(ceiling_gwei) {
            return Err(MultiRpcError::OutOfRangeTransactionFee(format!(
                "gas price exceeded ceiling={ceiling_gwei} but quote was {max_fee} GWei"
            )));
        }

        Ok(GasParameters::Eip1559 {
            max_fee_per_gas: gwei_to_wei(max_fee),
            max_priority_fee_per_gas: gwei_to_wei(max_priority_fee),
        })
    }

    #[cfg(not(feature = "gas-api"))]
    async fn get_gas_from_api(
        &self,
        _ceiling_gwei: u64,
        _priority: Priority,
    ) -> Result<GasParameters, MultiRpcError> {
        Err(MultiRpcError::FailedToGetGasPrice(
            "gas API method requires the `gas-api` crate feature".to_owned(),
        ))
    }

    async fn get_gas_from_rpc(
        &self,
        registry: &EndpointRegistry,
        ceiling_gwei: u64,
        priority: Priority,
    ) -> Result<GasParameters, MultiRpcError> {
        let endpoints = registry.transaction_endpoints_flat();
        let ceiling = ceiling_gwei as f64;

        let mut last_quote_gwei: Option<f64> = None;
        for endpoint in endpoints {
            match endpoint.provider.get_gas_price().await {
                Ok(gas_price) => {
                    let gwei = gas_price as f64 / 1e9;
                    last_quote_gwei = Some(gwei);
                    if gwei <= ceiling {
                        let multiplied = (gas_price as f64 * priority.multiplier()) as u128;
                        return Ok(GasParameters::Legacy {
                            gas_price: multiplied,
                        });
                    }
                }
                Err(err) => {
                    if error::is_rate_limited_message(&err.to_string()) {
                        return Err(MultiRpcError::from(err));
                    }
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(url = %endpoint.url, error = %err, "eth_gasPrice failed");
                    let _ = err;
                }
            }
        }

        match last_quote_gwei {
            None => Err(MultiRpcError::FailedToGetGasPrice(
                "none of the RPCs could provide a gas price".to_owned(),
            )),
            Some(gwei) => Err(MultiRpcError::OutOfRangeTransactionFee(format!(
                "gas price exceeded ceiling={ceiling_gwei} but it is {gwei}"
            ))),
        }
    }

    fn get_fixed_value(
        &self,
        ceiling_gwei: u64,
        priority: Priority,
    ) -> Result<GasParameters, MultiRpcError> {
        let gwei = self
            .config
            .fixed_gas_gwei
            .get(&self.chain_id)
            .copied()
            .unwrap_or(DEFAULT_FIXED_GAS_GWEI);

        if gwei > ceiling_gwei {
            return Err(MultiRpcError::OutOfRangeTransactionFee(format!(
                "gas price exceeded ceiling={ceiling_gwei} but it is {gwei}"
            )));
        }

        let wei = (gwei as f64 * priority.multiplier() * 1e9) as u128;
        Ok(GasParameters::Legacy { gas_price: wei })
    }

    /// Extension seam for a caller-supplied estimation strategy. The
    /// default implementation always fails; override by constructing a
    /// [`GasEstimator`] variant with custom dispatch in a wrapping type, or
    /// call one of the other methods directly.
    fn custom_gas_estimation(
        &self,
        _ceiling_gwei: u64,
        _priority: Priority,
    ) -> Result<GasParameters, MultiRpcError> {
        Err(MultiRpcError::FailedToGetGasPrice(
            "custom gas estimation method is not implemented".to_owned(),
        ))
    }
}

#[cfg(feature = "gas-api")]
fn parse_gwei_field(
    tier: &serde_json::Value,
    field: &str,
) -> Result<rust_decimal::Decimal, MultiRpcError> {
    let raw = tier
        .get(field)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| MultiRpcError::FailedToGetGasPrice(format!("gas API response missing `{field}`")))?;
    raw.parse()
        .map_err(|e| MultiRpcError::FailedToGetGasPrice(format!("gas API `{field}` not a decimal: {e}")))
}

#[cfg(feature = "gas-api")]
fn gwei_to_wei(value: rust_decimal::Decimal) -> u128 {
    use rust_decimal::prelude::ToPrimitive;
    (value * rust_decimal::Decimal::from(1_000_000_000u64))
        .to_u128()
        .unwrap_or(u128::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_value_falls_back_to_default_gwei() {
        let estimator = GasEstimator::new(1, GasEstimatorConfig::default());
        let params = estimator.get_fixed_value(100, Priority::Low).unwrap();
        assert_eq!(params, GasParameters::Legacy {
            gas_price: (DEFAULT_FIXED_GAS_GWEI as f64 * 1e9) as u128,
        });
    }

    #[test]
    fn fixed_value_rejects_over_ceiling() {
        let estimator = GasEstimator::new(1, GasEstimatorConfig::default());
        let result = estimator.get_fixed_value(1, Priority::Low);
        assert!(matches!(result, Err(MultiRpcError::OutOfRangeTransactionFee(_))));
    }

    #[test]
    fn fixed_value_uses_chain_specific_table_entry() {
        let mut fixed_gas_gwei = HashMap::new();
        fixed_gas_gwei.insert(137u64, 80u64);
        let estimator = GasEstimator::new(
            137,
            GasEstimatorConfig {
                fixed_gas_gwei,
                ..GasEstimatorConfig::default()
            },
        );
        let params = estimator.get_fixed_value(200, Priority::Low).unwrap();
        assert_eq!(params, GasParameters::Legacy {
            gas_price: (80.0 * 1e9) as u128,
        });
    }

    #[test]
    fn custom_method_is_an_unimplemented_extension_seam() {
        let estimator = GasEstimator::new(1, GasEstimatorConfig::default());
        let result = estimator.custom_gas_estimation(100, Priority::Low);
        assert!(matches!(result, Err(MultiRpcError::FailedToGetGasPrice(_))));
    }

    #[test]
    fn rate_limit_message_is_detected_as_a_hard_stop() {
        assert!(error::is_rate_limited_message("429 Too Many Requests"));
        assert!(!error::is_rate_limited_message("connection reset by peer"));
    }
}
