//! Contract manifest parsing
//!
//! Each chain ships a JSON manifest mapping logical contract names to their
//! deployed address and ABI. The manifest is pure data: it is parsed once at
//! startup and any defect (unreadable file, bad JSON, bad address, bad ABI,
//! missing required contract) aborts the launch rather than surfacing later
//! as a mid-flight RPC failure.

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// A deployed contract as named by the manifest.
#[derive(Debug, Clone)]
pub struct ContractBinding {
    pub address: Address,
    pub abi: JsonAbi,
}

/// Raw manifest entry before address/ABI validation.
#[derive(Debug, Deserialize)]
struct RawBinding {
    address: String,
    abi: serde_json::Value,
}

/// Parsed manifest for one chain.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    contracts: HashMap<String, ContractBinding>,
}

impl ContractRegistry {
    /// Parse a manifest from its JSON text.
    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: HashMap<String, RawBinding> =
            serde_json::from_str(raw).wrap_err("Contract manifest is not valid JSON")?;

        let mut contracts = HashMap::with_capacity(entries.len());
        for (name, entry) in entries {
            let address: Address = entry
                .address
                .parse()
                .wrap_err_with(|| format!("Contract '{name}' has an invalid address"))?;
            let abi: JsonAbi = serde_json::from_value(entry.abi)
                .wrap_err_with(|| format!("Contract '{name}' has an invalid ABI"))?;
            contracts.insert(name, ContractBinding { address, abi });
        }
        Ok(Self { contracts })
    }

    /// Parse a manifest from a file on disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read contract manifest {}", path.display()))?;
        Self::from_json(&raw).wrap_err_with(|| format!("In manifest {}", path.display()))
    }

    /// Look up a contract that must exist; absent means a broken deployment.
    pub fn required(&self, name: &str) -> Result<&ContractBinding> {
        self.contracts
            .get(name)
            .ok_or_else(|| eyre!("Contract manifest has no entry named '{name}'"))
    }

    pub fn get(&self, name: &str) -> Option<&ContractBinding> {
        self.contracts.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_MANIFEST: &str = r#"{
        "bridge": {
            "address": "0x1111111111111111111111111111111111111111",
            "abi": [
                {
                    "type": "function",
                    "name": "exportReceipt",
                    "inputs": [{"name": "burnHash", "type": "bytes32"}],
                    "outputs": [{"name": "", "type": "uint256"}],
                    "stateMutability": "view"
                }
            ]
        },
        "validator": {
            "address": "0x2222222222222222222222222222222222222222",
            "abi": []
        }
    }"#;

    #[test]
    fn test_parse_manifest() {
        let registry = ContractRegistry::from_json(GOOD_MANIFEST).unwrap();
        assert_eq!(registry.len(), 2);

        let bridge = registry.required("bridge").unwrap();
        assert_eq!(
            bridge.address,
            "0x1111111111111111111111111111111111111111"
                .parse::<Address>()
                .unwrap()
        );
        assert!(bridge.abi.function("exportReceipt").is_some());
    }

    #[test]
    fn test_missing_contract_is_an_error() {
        let registry = ContractRegistry::from_json(GOOD_MANIFEST).unwrap();
        let err = registry.required("tokenVault").unwrap_err();
        assert!(err.to_string().contains("tokenVault"));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(ContractRegistry::from_json("{ not json").is_err());
    }

    #[test]
    fn test_bad_address_rejected() {
        let manifest = r#"{"bridge": {"address": "0xNOTANADDRESS", "abi": []}}"#;
        let err = ContractRegistry::from_json(manifest).unwrap_err();
        assert!(err.to_string().contains("bridge"));
    }

    #[test]
    fn test_bad_abi_rejected() {
        let manifest = r#"{
            "bridge": {
                "address": "0x1111111111111111111111111111111111111111",
                "abi": {"this is": "not an abi"}
            }
        }"#;
        assert!(ContractRegistry::from_json(manifest).is_err());
    }

    #[test]
    fn test_missing_file_rejected() {
        let err = ContractRegistry::from_file(Path::new("/nonexistent/manifest.json")).unwrap_err();
        assert!(err.to_string().contains("manifest"));
    }
}
