//! Bracketed endpoint registry.
//!
//! An [`EndpointRegistry`] groups redundant RPC endpoints into role-specific
//! brackets (`view`, `transaction`), each itself a list of sub-brackets
//! tried in registration order. Endpoints are built and probed once at
//! [`EndpointRegistry::connect`] time; anything unreachable is dropped
//! before the registry is handed to the rest of the crate.

use std::time::Duration;

use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_transport_http::Http;
use tower::ServiceBuilder;
use url::Url;

use crate::data::ChainId;
use crate::error::MultiRpcError;

/// Ceiling on the number of RPC URLs accepted in a single sub-bracket.
pub const MAX_RPC_PER_BRACKET: usize = 50;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One connected, probed RPC endpoint.
#[derive(Debug)]
pub struct Endpoint {
    /// The endpoint's URL, kept for diagnostics and logging.
    pub url: Url,
    /// The connected alloy provider.
    pub provider: RootProvider,
}

/// An ordered list of endpoints, all considered equally authoritative.
/// Fanned out together by the reconciler primitives.
pub type SubBracket = Vec<Endpoint>;

/// An ordered list of sub-brackets, tried one at a time until one
/// succeeds.
pub type Bracket = Vec<SubBracket>;

/// Raw, unprobed sub-bracket URL lists, keyed by role. Produced by
/// [`crate::config`] and consumed by [`EndpointRegistry::connect`].
#[derive(Debug, Clone, Default)]
pub struct BracketsConfig {
    /// `view` bracket sub-brackets, in registration order.
    pub view: Option<Vec<Vec<Url>>>,
    /// `transaction` bracket sub-brackets, in registration order.
    pub transaction: Option<Vec<Vec<Url>>>,
}

/// Pass-through seam for a PoA header-decoding layer.
///
/// Geth-style proof-of-authority chains return an `extraData` field longer
/// than mainnet clients expect; a production deployment inserts a decoding
/// layer here. Left as a no-op until a concrete PoA chain is onboarded.
#[derive(Debug, Clone, Copy, Default)]
struct PoaLayer {
    enabled: bool,
}

impl<S> tower::Layer<S> for PoaLayer {
    type Service = S;

    fn layer(&self, inner: S) -> Self::Service {
        inner
    }
}

/// The connected, probed endpoint registry: up to two brackets (`view`,
/// `transaction`) plus the chain id derived during connection.
#[derive(Debug)]
pub struct EndpointRegistry {
    view: Option<Bracket>,
    transaction: Option<Bracket>,
    chain_id: ChainId,
}

impl EndpointRegistry {
    /// Builds, probes, and connects every endpoint named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`MultiRpcError::MaximumRpcInEachBracketReached`] if a
    /// sub-bracket lists more than [`MAX_RPC_PER_BRACKET`] URLs,
    /// [`MultiRpcError::AtLeastProvideOneValidRpcInEachBracket`] if a
    /// sub-bracket has no live endpoint after probing, and
    /// [`MultiRpcError::NoAvailableRpcProvided`] if every bracket ends up
    /// empty.
    pub async fn connect(config: &BracketsConfig, is_poa: bool) -> Result<Self, MultiRpcError> {
        let view = match &config.view {
            Some(subs) => Some(Self::connect_bracket(subs, is_poa).await?),
            None => None,
        };
        let transaction = match &config.transaction {
            Some(subs) => Some(Self::connect_bracket(subs, is_poa).await?),
            None => None,
        };

        if view.is_none() && transaction.is_none() {
            return Err(MultiRpcError::NoAvailableRpcProvided);
        }

        let mut registry = Self {
            view,
            transaction,
            chain_id: 0,
        };
        registry.chain_id = registry.probe_chain_id().await?;
        Ok(registry)
    }

    async fn connect_bracket(subs: &[Vec<Url>], is_poa: bool) -> Result<Bracket, MultiRpcError> {
        let mut bracket = Vec::with_capacity(subs.len());
        for urls in subs {
            if urls.len() > MAX_RPC_PER_BRACKET {
                return Err(MultiRpcError::MaximumRpcInEachBracketReached(urls.len()));
            }

            let mut sub_bracket = Vec::with_capacity(urls.len());
            for url in urls {
                match Self::connect_endpoint(url.clone(), is_poa).await {
                    Ok(endpoint) => sub_bracket.push(endpoint),
                    Err(err) => {
                        #[cfg(feature = "telemetry")]
                        tracing::warn!(url = %url, error = %err, "dropping unreachable RPC endpoint");
                        #[cfg(not(feature = "telemetry"))]
                        let _ = err;
                    }
                }
            }

            if sub_bracket.is_empty() {
                return Err(MultiRpcError::AtLeastProvideOneValidRpcInEachBracket);
            }
            bracket.push(sub_bracket);
        }
        Ok(bracket)
    }

    async fn connect_endpoint(url: Url, is_poa: bool) -> Result<Endpoint, MultiRpcError> {
        let provider = match url.scheme() {
            "http" | "https" => {
                let service = ServiceBuilder::new()
                    .layer(PoaLayer { enabled: is_poa })
                    .service(Http::new(url.clone()));
                let client = RpcClient::new(service, false);
                RootProvider::new(client)
            }
            "ws" | "wss" => {
                let connect = alloy_transport_ws::WsConnect::new(url.clone());
                alloy_provider::ProviderBuilder::new()
                    .connect_ws(connect)
                    .await?
            }
            _ => {
                return Err(MultiRpcError::Transport(
                    alloy_transport::TransportErrorKind::custom_str(
                        "unsupported RPC URL scheme: expected http, https, ws or wss",
                    ),
                ));
            }
        };

        tokio::time::timeout(PROBE_TIMEOUT, provider.get_block_number())
            .await
            .map_err(|_| MultiRpcError::Transport(alloy_transport::TransportErrorKind::custom_str(
                "endpoint probe timed out",
            )))??;

        Ok(Endpoint { url, provider })
    }

    async fn probe_chain_id(&self) -> Result<ChainId, MultiRpcError> {
        let mut last_err = None;
        for bracket in [self.view.as_ref(), self.transaction.as_ref()]
            .into_iter()
            .flatten()
        {
            for sub_bracket in bracket {
                for endpoint in sub_bracket {
                    match tokio::time::timeout(PROBE_TIMEOUT, endpoint.provider.get_chain_id())
                        .await
                    {
                        Ok(Ok(id)) => return Ok(id),
                        Ok(Err(err)) => last_err = Some(MultiRpcError::from(err)),
                        Err(_) => {
                            last_err = Some(MultiRpcError::Transport(
                                alloy_transport::TransportErrorKind::custom_str(
                                    "chain id probe timed out",
                                ),
                            ));
                        }
                    }
                }
            }
        }
        Err(last_err.unwrap_or(MultiRpcError::NoAvailableRpcProvided))
    }

    /// The chain id derived during [`Self::connect`].
    #[must_use]
    pub const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// The `view` bracket, if one was configured.
    #[must_use]
    pub const fn view(&self) -> Option<&Bracket> {
        self.view.as_ref()
    }

    /// The `transaction` bracket, if one was configured.
    #[must_use]
    pub const fn transaction(&self) -> Option<&Bracket> {
        self.transaction.as_ref()
    }

    /// Every endpoint in the `transaction` bracket, flattened across
    /// sub-brackets in registration order. Used by the RPC-sourced gas
    /// estimation method, which does not care about sub-bracket boundaries.
    #[must_use]
    pub fn transaction_endpoints_flat(&self) -> Vec<&Endpoint> {
        self.transaction
            .iter()
            .flatten()
            .flatten()
            .collect()
    }

    /// Builds a registry directly from already-connected brackets, skipping
    /// [`Self::connect`]'s probing step. Used by other modules' tests that
    /// need a registry bound to wiremock-backed endpoints.
    #[cfg(test)]
    pub(crate) const fn for_test(view: Option<Bracket>, transaction: Option<Bracket>, chain_id: ChainId) -> Self {
        Self {
            view,
            transaction,
            chain_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_rpc_per_bracket_is_generous_but_finite() {
        assert_eq!(MAX_RPC_PER_BRACKET, 50);
    }
}
