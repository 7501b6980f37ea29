//! Façade configuration.
//!
//! Loads configuration from a TOML file with support for environment
//! variable expansion in string values. Variables use `$VAR` or `${VAR}`
//! syntax — the same convention the teacher's facilitator config uses for
//! signer keys, applied here to RPC URLs and the sender's private key.
//!
//! # Example
//!
//! ```toml
//! contract_address = "0x0000000000000000000000000000000000dEaD"
//! contract_abi = "abi/MyContract.json"
//! view_policy = "mostUpdated"
//! gas_limit = 1000000
//! gas_upper_bound_gwei = 26000
//!
//! [rpc_urls.view]
//! sub_brackets = [["https://rpc-a.example.com"], ["https://rpc-b.example.com"]]
//!
//! [rpc_urls.transaction]
//! sub_brackets = [["$PRIMARY_RPC_URL"]]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::data::ViewPolicy;
use crate::gas::GasEstimationMethod;
use crate::registry::BracketsConfig;

fn default_gas_limit() -> u64 {
    1_000_000
}

fn default_gas_upper_bound_gwei() -> u64 {
    26_000
}

/// One named bracket's sub-bracket URL lists, as they appear in TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BracketUrlsConfig {
    /// Sub-brackets in registration order, each an ordered list of URLs.
    #[serde(default)]
    pub sub_brackets: Vec<Vec<String>>,
}

/// `rpc_urls` table: the `view` and `transaction` brackets, either
/// optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcUrlsConfig {
    /// `view` bracket sub-brackets.
    pub view: Option<BracketUrlsConfig>,
    /// `transaction` bracket sub-brackets.
    pub transaction: Option<BracketUrlsConfig>,
}

/// Either an inline ABI JSON document or a path to one on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContractAbiConfig {
    /// Path to a JSON ABI file, relative to the process's working
    /// directory.
    Path(String),
    /// The ABI JSON document, embedded directly in the TOML file.
    Inline(serde_json::Value),
}

/// The façade's full configuration, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiRpcConfig {
    /// RPC endpoints, grouped into the `view`/`transaction` brackets.
    #[serde(default)]
    pub rpc_urls: RpcUrlsConfig,

    /// The contract this façade dispatches calls against.
    pub contract_address: alloy_primitives::Address,

    /// The contract's ABI, inline or by path.
    pub contract_abi: ContractAbiConfig,

    /// Reconciliation policy for view calls.
    #[serde(default)]
    pub view_policy: ViewPolicy,

    /// Gas estimation method to use when a call doesn't override it.
    #[serde(default)]
    pub gas_estimation: Option<GasEstimationMethod>,

    /// Default gas limit for transactions.
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Default fee ceiling, in gwei.
    #[serde(default = "default_gas_upper_bound_gwei")]
    pub gas_upper_bound_gwei: u64,

    /// Whether to call `eth_estimateGas` observationally before signing.
    #[serde(default)]
    pub enable_gas_estimation: bool,

    /// Whether the configured endpoints are proof-of-authority chains,
    /// requiring the registry's PoA decoding layer.
    #[serde(default)]
    pub is_proof_authority: bool,

    /// Default sender address, used when a call doesn't override one.
    pub default_sender_address: Option<alloy_primitives::Address>,

    /// Default signing key, used when a call doesn't override one.
    /// Supports `$VAR` / `${VAR}` environment variable expansion.
    pub default_sender_private_key: Option<String>,

    /// Gas-price HTTP API URL template, e.g.
    /// `"https://gas.example.com/{chain_id}/suggestedGasFees"`.
    pub gas_api_url_template: Option<String>,
}

impl MultiRpcConfig {
    /// Loads configuration from the path given by the `MULTIRPC_CONFIG`
    /// environment variable, falling back to `multirpc.toml` in the
    /// current directory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::MultiRpcError::Config`] if the file exists
    /// but fails to parse, or [`crate::error::MultiRpcError::InvalidUrl`]
    /// if an RPC URL doesn't parse.
    pub fn load() -> Result<Self, crate::error::MultiRpcError> {
        let path = std::env::var("MULTIRPC_CONFIG").unwrap_or_else(|_| "multirpc.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::MultiRpcError::Io`] if the file exists but
    /// can't be read, or [`crate::error::MultiRpcError::Config`] if it
    /// fails to parse.
    pub fn load_from(path: &str) -> Result<Self, crate::error::MultiRpcError> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };
        let expanded = expand_env_vars(&content);
        toml::from_str(&expanded).map_err(crate::error::MultiRpcError::Config)
    }

    /// Converts [`Self::rpc_urls`] into the parsed [`BracketsConfig`] the
    /// registry consumes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::MultiRpcError::InvalidUrl`] if any URL
    /// string doesn't parse.
    pub fn brackets(&self) -> Result<BracketsConfig, crate::error::MultiRpcError> {
        Ok(BracketsConfig {
            view: self.rpc_urls.view.as_ref().map(parse_sub_brackets).transpose()?,
            transaction: self
                .rpc_urls
                .transaction
                .as_ref()
                .map(parse_sub_brackets)
                .transpose()?,
        })
    }
}

fn parse_sub_brackets(bracket: &BracketUrlsConfig) -> Result<Vec<Vec<Url>>, crate::error::MultiRpcError> {
    bracket
        .sub_brackets
        .iter()
        .map(|urls| urls.iter().map(|u| Url::parse(u)).collect())
        .collect::<Result<Vec<_>, _>>()
        .map_err(crate::error::MultiRpcError::InvalidUrl)
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment
/// variables. Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        if var_name.is_empty() {
            result.push('$');
            if braced {
                result.push('{');
            }
        } else if let Ok(val) = std::env::var(&var_name) {
            result.push_str(&val);
        } else {
            result.push('$');
            if braced {
                result.push('{');
            }
            result.push_str(&var_name);
            if braced {
                result.push('}');
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_vars_resolves_both_syntaxes() {
        // SAFETY: tests run single-threaded within this module's scope and
        // no other test reads this variable.
        unsafe {
            std::env::set_var("MULTIRPC_TEST_VAR", "resolved");
        }
        assert_eq!(expand_env_vars("$MULTIRPC_TEST_VAR"), "resolved");
        assert_eq!(expand_env_vars("${MULTIRPC_TEST_VAR}"), "resolved");
        assert_eq!(expand_env_vars("prefix-${MULTIRPC_TEST_VAR}-suffix"), "prefix-resolved-suffix");
        unsafe {
            std::env::remove_var("MULTIRPC_TEST_VAR");
        }
    }

    #[test]
    fn expand_env_vars_leaves_unresolved_variables_as_is() {
        assert_eq!(expand_env_vars("$MULTIRPC_DOES_NOT_EXIST"), "$MULTIRPC_DOES_NOT_EXIST");
    }
}
