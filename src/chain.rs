//! Chain RPC client
//!
//! One `ChainClient` per configured chain. Contract calls are driven by the
//! parsed manifest ABI, so the client needs no compile-time knowledge of the
//! deployed contracts: callers name a contract and a function and pass
//! `DynSolValue` arguments.
//!
//! Every RPC round trip runs under a per-call timeout; a timed-out call
//! surfaces as an error whose text classifies as transient, so the retry
//! layer reschedules rather than dead-letters.

use alloy::{
    dyn_abi::{DynSolValue, EventExt, FunctionExt, JsonAbiExt},
    network::EthereumWallet,
    primitives::{Address, B256, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, TransactionRequest},
    signers::local::PrivateKeySigner,
    transports::http::{Client, Http},
};
use eyre::{eyre, Result, WrapErr};
use reqwest::Url;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::registry::ContractRegistry;

/// Outcome of a state-changing transaction after its receipt landed.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub block_number: u64,
    /// Receipt status flag; false means the transaction reverted
    pub success: bool,
}

/// One decoded contract event, values in ABI declaration order.
#[derive(Debug, Clone)]
pub struct DecodedEventLog {
    pub block_number: u64,
    pub tx_hash: Option<B256>,
    pub values: Vec<DynSolValue>,
}

/// JSON-RPC response wrapper for the raw calls alloy does not cover.
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlockHeader {
    timestamp: String,
}

fn hex_to_u64(hex: &str) -> Result<u64> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16)
        .wrap_err_with(|| format!("Invalid hex quantity '{hex}'"))
}

pub struct ChainClient {
    /// Logical chain name from the configuration
    pub name: String,
    url: Url,
    provider: RootProvider<Http<Client>>,
    http: reqwest::Client,
    registry: ContractRegistry,
    signer: Option<PrivateKeySigner>,
    call_timeout: Duration,
}

impl ChainClient {
    pub fn new(
        name: String,
        rpc_url: &str,
        registry: ContractRegistry,
        private_key: Option<&str>,
        call_timeout: Duration,
    ) -> Result<Self> {
        let url: Url = rpc_url
            .parse()
            .map_err(|e| eyre!("Invalid RPC URL for chain {name}: {e}"))?;
        let provider = ProviderBuilder::new().on_http(url.clone());
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .wrap_err("Failed to build HTTP client")?;
        let signer = private_key
            .map(|key| {
                key.parse::<PrivateKeySigner>()
                    .map_err(|e| eyre!("Invalid private key for chain {name}: {e}"))
            })
            .transpose()?;

        info!(
            chain = %name,
            rpc_url = %rpc_url,
            has_signer = signer.is_some(),
            contracts = registry.len(),
            "Created chain client"
        );

        Ok(Self {
            name,
            url,
            provider,
            http,
            registry,
            signer,
            call_timeout,
        })
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    async fn with_timeout<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(eyre!(
                "RPC call timeout after {:?} ({} on {})",
                self.call_timeout,
                what,
                self.name
            )),
        }
    }

    /// Read-only contract call, decoded per the manifest ABI.
    pub async fn call(
        &self,
        contract: &str,
        function: &str,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>> {
        let binding = self.registry.required(contract)?;
        let func = binding
            .abi
            .function(function)
            .and_then(|fns| fns.first())
            .ok_or_else(|| eyre!("Contract '{contract}' has no function '{function}'"))?;
        let data = func
            .abi_encode_input(args)
            .wrap_err_with(|| format!("Failed to encode {contract}.{function} arguments"))?;

        let tx = TransactionRequest::default()
            .to(binding.address)
            .input(data.into());

        let raw = self
            .with_timeout(function, async {
                self.provider
                    .call(&tx)
                    .await
                    .wrap_err_with(|| format!("{contract}.{function} call failed"))
            })
            .await?;

        func.abi_decode_output(&raw, true)
            .wrap_err_with(|| format!("Failed to decode {contract}.{function} output"))
    }

    /// Submit a state-changing transaction and wait for its receipt.
    pub async fn send(
        &self,
        contract: &str,
        function: &str,
        args: &[DynSolValue],
    ) -> Result<TxOutcome> {
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| eyre!("Chain {} has no signer configured", self.name))?;
        let binding = self.registry.required(contract)?;
        let func = binding
            .abi
            .function(function)
            .and_then(|fns| fns.first())
            .ok_or_else(|| eyre!("Contract '{contract}' has no function '{function}'"))?;
        let data = func
            .abi_encode_input(args)
            .wrap_err_with(|| format!("Failed to encode {contract}.{function} arguments"))?;

        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new().wallet(wallet).on_http(self.url.clone());
        let tx = TransactionRequest::default()
            .to(binding.address)
            .input(data.into());

        // Receipt polling can outlast a single call budget
        let receipt = match tokio::time::timeout(self.call_timeout.saturating_mul(4), async {
            let pending = provider
                .send_transaction(tx)
                .await
                .wrap_err_with(|| format!("{contract}.{function} submission failed"))?;
            pending
                .get_receipt()
                .await
                .wrap_err_with(|| format!("{contract}.{function} receipt fetch failed"))
        })
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(eyre!(
                    "RPC call timeout after {:?} ({}.{} on {})",
                    self.call_timeout.saturating_mul(4),
                    contract,
                    function,
                    self.name
                ))
            }
        };

        let outcome = TxOutcome {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.unwrap_or_default(),
            success: receipt.status(),
        };
        debug!(
            chain = %self.name,
            contract,
            function,
            tx_hash = %outcome.tx_hash,
            success = outcome.success,
            "Transaction mined"
        );
        Ok(outcome)
    }

    pub async fn latest_block_number(&self) -> Result<u64> {
        self.with_timeout("eth_blockNumber", async {
            Ok(self.provider.get_block_number().await?)
        })
        .await
    }

    /// Timestamp of the latest block, from raw JSON-RPC.
    pub async fn latest_block_timestamp(&self) -> Result<u64> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_getBlockByNumber",
            "params": ["latest", false],
            "id": 1
        });

        let response = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?
            .json::<RpcResponse<RpcBlockHeader>>()
            .await?;

        if let Some(error) = response.error {
            return Err(eyre!("RPC error: {} - {}", error.code, error.message));
        }
        let header = response
            .result
            .ok_or_else(|| eyre!("No latest block returned by {}", self.name))?;
        hex_to_u64(&header.timestamp)
    }

    pub async fn balance(&self, address: Address) -> Result<U256> {
        self.with_timeout("eth_getBalance", async {
            Ok(self.provider.get_balance(address).await?)
        })
        .await
    }

    /// Fetch and decode a contract's events over a block range.
    pub async fn query_events(
        &self,
        contract: &str,
        event_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<DecodedEventLog>> {
        let binding = self.registry.required(contract)?;
        let event = binding
            .abi
            .event(event_name)
            .and_then(|events| events.first())
            .ok_or_else(|| eyre!("Contract '{contract}' has no event '{event_name}'"))?;

        let filter = Filter::new()
            .address(binding.address)
            .event_signature(event.selector())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .with_timeout("eth_getLogs", async {
                self.provider
                    .get_logs(&filter)
                    .await
                    .wrap_err_with(|| format!("{contract} log query failed"))
            })
            .await?;

        let mut decoded_logs = Vec::with_capacity(logs.len());
        for log in logs {
            let decoded = event
                .decode_log(log.data(), true)
                .wrap_err_with(|| format!("Failed to decode {event_name} log"))?;

            // Reassemble declaration order: topics and data are decoded
            // into separate streams
            let mut indexed = decoded.indexed.into_iter();
            let mut body = decoded.body.into_iter();
            let mut values = Vec::with_capacity(event.inputs.len());
            for input in &event.inputs {
                let value = if input.indexed {
                    indexed.next()
                } else {
                    body.next()
                };
                values.push(value.ok_or_else(|| {
                    eyre!("Decoded {event_name} log is missing field '{}'", input.name)
                })?);
            }

            decoded_logs.push(DecodedEventLog {
                block_number: log
                    .block_number
                    .ok_or_else(|| eyre!("{event_name} log has no block number"))?,
                tx_hash: log.transaction_hash,
                values,
            });
        }
        Ok(decoded_logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ContractRegistry;

    const MANIFEST: &str = r#"{
        "bridge": {
            "address": "0x1111111111111111111111111111111111111111",
            "abi": [
                {
                    "type": "function",
                    "name": "exportReceipt",
                    "inputs": [{"name": "burnHash", "type": "bytes32"}],
                    "outputs": [{"name": "amount", "type": "uint256"}],
                    "stateMutability": "view"
                }
            ]
        }
    }"#;

    #[test]
    fn test_hex_to_u64() {
        assert_eq!(hex_to_u64("0x0").unwrap(), 0);
        assert_eq!(hex_to_u64("0x10").unwrap(), 16);
        assert_eq!(hex_to_u64("64").unwrap(), 100);
        assert!(hex_to_u64("0xzz").is_err());
    }

    #[test]
    fn test_client_construction() {
        let registry = ContractRegistry::from_json(MANIFEST).unwrap();
        let client = ChainClient::new(
            "testchain".to_string(),
            "http://localhost:8545",
            registry,
            None,
            Duration::from_secs(10),
        )
        .unwrap();
        assert!(client.signer_address().is_none());
        assert!(client.registry().required("bridge").is_ok());
    }

    #[test]
    fn test_bad_rpc_url_rejected() {
        let registry = ContractRegistry::from_json(MANIFEST).unwrap();
        assert!(ChainClient::new(
            "testchain".to_string(),
            "not a url",
            registry,
            None,
            Duration::from_secs(10),
        )
        .is_err());
    }

    #[test]
    fn test_manifest_function_encodes() {
        let registry = ContractRegistry::from_json(MANIFEST).unwrap();
        let func = registry
            .required("bridge")
            .unwrap()
            .abi
            .function("exportReceipt")
            .and_then(|fns| fns.first())
            .unwrap();
        let data = func
            .abi_encode_input(&[DynSolValue::FixedBytes(B256::repeat_byte(0xAB), 32)])
            .unwrap();
        // 4-byte selector + one 32-byte word
        assert_eq!(data.len(), 36);
        assert_eq!(&data[4..36], B256::repeat_byte(0xAB).as_slice());
    }
}
