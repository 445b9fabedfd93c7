//! JSON-RPC chain client.
//!
//! Talks to any standard node endpoint. Two methods are used:
//! `eth_getTransactionReceipt` for payment proofs and `eth_call`
//! against the wallet contract for EIP-1271 signature checks. Every
//! request runs under the configured timeout; the verification
//! pipeline never blocks indefinitely on the chain.

use std::time::Duration;

use serde_json::{json, Value};

use super::signature::keccak256;
use super::{ChainClient, ChainError, Receipt, ReceiptLog};

/// EIP-1271 magic value returned by `isValidSignature` on success.
const EIP1271_MAGIC: &str = "1626ba7e";

/// JSON-RPC chain client.
pub struct RpcChainClient {
    http: reqwest::Client,
    url: String,
}

impl RpcChainClient {
    /// Create a client for the given RPC endpoint.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Rpc(format!("Client build failed: {}", e)))?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Rpc(format!("{}: {}", method, e)))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(format!("{}: {}", method, e)))?;

        if let Some(error) = payload.get("error") {
            return Err(ChainError::Rpc(format!("{}: {}", method, error)));
        }
        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait::async_trait]
impl ChainClient for RpcChainClient {
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, ChainError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        if result.is_null() {
            return Ok(None);
        }

        let status = result
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s == "0x1")
            .unwrap_or(false);

        let from = result
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::InvalidResponse("Receipt missing 'from'".into()))?
            .to_lowercase();

        let logs = result
            .get("logs")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        Some(ReceiptLog {
                            address: entry.get("address")?.as_str()?.to_lowercase(),
                            topics: entry
                                .get("topics")?
                                .as_array()?
                                .iter()
                                .filter_map(|t| t.as_str().map(str::to_string))
                                .collect(),
                            data: entry.get("data")?.as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(Receipt {
            tx_hash: tx_hash.to_lowercase(),
            status,
            from,
            logs,
        }))
    }

    async fn is_valid_contract_signature(
        &self,
        address: &str,
        message_hash: [u8; 32],
        signature: &[u8],
    ) -> Result<bool, ChainError> {
        let calldata = encode_is_valid_signature_call(message_hash, signature);
        let result = self
            .call(
                "eth_call",
                json!([{ "to": address, "data": calldata }, "latest"]),
            )
            .await;

        // A wallet that reverts (or does not implement 1271) is simply
        // an invalid signer, not an infrastructure failure.
        let value = match result {
            Ok(v) => v,
            Err(ChainError::Rpc(_)) => return Ok(false),
            Err(other) => return Err(other),
        };

        Ok(value
            .as_str()
            .map(|s| s.trim_start_matches("0x").starts_with(EIP1271_MAGIC))
            .unwrap_or(false))
    }
}

/// ABI-encode `isValidSignature(bytes32,bytes)` calldata.
fn encode_is_valid_signature_call(message_hash: [u8; 32], signature: &[u8]) -> String {
    let selector = &keccak256(b"isValidSignature(bytes32,bytes)")[0..4];

    let mut data = Vec::with_capacity(4 + 32 * 4 + signature.len());
    data.extend_from_slice(selector);
    data.extend_from_slice(&message_hash);
    // Offset of the bytes argument: two head words
    data.extend_from_slice(&abi_word(0x40));
    data.extend_from_slice(&abi_word(signature.len() as u64));
    data.extend_from_slice(signature);
    // Pad the tail to a 32-byte boundary
    let pad = (32 - signature.len() % 32) % 32;
    data.extend(std::iter::repeat(0u8).take(pad));

    format!("0x{}", hex::encode(data))
}

fn abi_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calldata_layout() {
        let hash = [0xABu8; 32];
        let sig = vec![0x01u8; 65];
        let calldata = encode_is_valid_signature_call(hash, &sig);
        let bytes = hex::decode(calldata.trim_start_matches("0x")).unwrap();

        // selector
        assert_eq!(&bytes[0..4], &keccak256(b"isValidSignature(bytes32,bytes)")[0..4]);
        // hash word
        assert_eq!(&bytes[4..36], &[0xABu8; 32]);
        // offset word points past the two head words
        assert_eq!(bytes[67], 0x40);
        // length word
        assert_eq!(bytes[99], 65);
        // tail is padded to a word boundary
        assert_eq!((bytes.len() - 4) % 32, 0);
    }

    #[test]
    fn test_abi_word() {
        let word = abi_word(0x1234);
        assert_eq!(&word[30..], &[0x12, 0x34]);
        assert!(word[..30].iter().all(|&b| b == 0));
    }
}
