//! Chain access for payment verification.
//!
//! The gateway needs three things from the chain: transaction receipts
//! (proof a fee payment landed), the burn event decoded out of a
//! receipt's logs, and signature verification for both plain accounts
//! and smart-contract wallets.
//!
//! ## The burn event
//!
//! Fee payments emit one event from the burn contract:
//!
//! ```text
//! FeeBurned(address indexed sender, bytes32 indexed tierId,
//!           uint256 primaryAmount, uint256 secondaryAmount)
//! ```
//!
//! `sender` and `tierId` live in topics, the two amounts in the data
//! word pair. The tier id is ASCII, right-padded to 32 bytes.

pub mod rpc;
pub mod signature;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use self::signature::keccak256;

/// Event signature of the fee burn log.
pub const BURN_EVENT_SIGNATURE: &str = "FeeBurned(address,bytes32,uint256,uint256)";

/// Failures raised by chain access.
#[derive(Error, Debug)]
pub enum ChainError {
    /// RPC transport failure or timeout
    #[error("Chain RPC error: {0}")]
    Rpc(String),

    /// The node answered with something undecodable
    #[error("Invalid chain response: {0}")]
    InvalidResponse(String),
}

/// A transaction receipt, reduced to the fields verification needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Transaction hash
    pub tx_hash: String,
    /// Whether the transaction succeeded
    pub status: bool,
    /// The transaction's reported sender
    pub from: String,
    /// Emitted logs
    pub logs: Vec<ReceiptLog>,
}

/// One log entry from a receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLog {
    /// Emitting contract
    pub address: String,
    /// Indexed topics, 0x-prefixed 32-byte hex
    pub topics: Vec<String>,
    /// ABI-encoded data, 0x-prefixed hex
    pub data: String,
}

/// The decoded burn event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnEvent {
    /// Address that paid the fee
    pub sender: String,
    /// Tier the fee was paid for
    pub tier_id: String,
    /// First fee amount, verbatim 0x-hex
    pub amount_primary: String,
    /// Second fee amount, verbatim 0x-hex
    pub amount_secondary: String,
}

/// Chain operations the payment verifier depends on.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetch a transaction receipt, `None` if the transaction is
    /// unknown or not yet mined.
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, ChainError>;

    /// EIP-1271 check: does the contract at `address` consider
    /// `signature` valid for `message_hash`?
    async fn is_valid_contract_signature(
        &self,
        address: &str,
        message_hash: [u8; 32],
        signature: &[u8],
    ) -> Result<bool, ChainError>;
}

/// The burn event's topic hash, 0x-prefixed.
pub fn burn_event_topic() -> String {
    format!("0x{}", hex::encode(keccak256(BURN_EVENT_SIGNATURE.as_bytes())))
}

/// Decode a burn event from a receipt log.
///
/// Returns `None` when the log is not a burn event or is structurally
/// unusable; callers scan all logs and take the first match.
pub fn decode_burn_event(log: &ReceiptLog) -> Option<BurnEvent> {
    if log.topics.len() < 3 {
        return None;
    }
    if !log.topics[0].eq_ignore_ascii_case(&burn_event_topic()) {
        return None;
    }

    let sender = topic_to_address(&log.topics[1])?;
    let tier_id = topic_to_ascii(&log.topics[2])?;

    let data = log.data.strip_prefix("0x").unwrap_or(&log.data);
    if data.len() < 128 {
        return None;
    }
    let amount_primary = trim_word(&data[0..64])?;
    let amount_secondary = trim_word(&data[64..128])?;

    Some(BurnEvent {
        sender,
        tier_id,
        amount_primary,
        amount_secondary,
    })
}

/// Extract the address from a 32-byte topic (last 20 bytes).
fn topic_to_address(topic: &str) -> Option<String> {
    let raw = topic.strip_prefix("0x").unwrap_or(topic);
    if raw.len() != 64 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", raw[24..].to_lowercase()))
}

/// Extract a right-padded ASCII string from a 32-byte topic.
fn topic_to_ascii(topic: &str) -> Option<String> {
    let raw = topic.strip_prefix("0x").unwrap_or(topic);
    if raw.len() != 64 {
        return None;
    }
    let bytes = hex::decode(raw).ok()?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text = std::str::from_utf8(&bytes[..end]).ok()?;
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

/// Reduce a 32-byte data word to canonical 0x-hex with leading zeros
/// trimmed, preserving the value verbatim.
fn trim_word(word: &str) -> Option<String> {
    if !word.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let trimmed = word.trim_start_matches('0');
    Some(if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{}", trimmed.to_lowercase())
    })
}

// ============================================================================
// TEST SUPPORT
// ============================================================================

#[cfg(test)]
pub mod mock {
    //! In-memory chain client for tests.

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::*;

    /// Canned-response chain client.
    #[derive(Default)]
    pub struct MockChainClient {
        receipts: Mutex<HashMap<String, Receipt>>,
        valid_contract_signers: Mutex<HashSet<String>>,
    }

    impl MockChainClient {
        /// Create an empty mock.
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a receipt under its transaction hash.
        pub fn add_receipt(&self, receipt: Receipt) {
            self.receipts
                .lock()
                .unwrap()
                .insert(receipt.tx_hash.to_lowercase(), receipt);
        }

        /// Mark an address as a contract wallet that accepts any
        /// signature in `is_valid_contract_signature`.
        pub fn allow_contract_signer(&self, address: &str) {
            self.valid_contract_signers
                .lock()
                .unwrap()
                .insert(address.to_lowercase());
        }
    }

    #[async_trait]
    impl ChainClient for MockChainClient {
        async fn transaction_receipt(
            &self,
            tx_hash: &str,
        ) -> Result<Option<Receipt>, ChainError> {
            Ok(self
                .receipts
                .lock()
                .unwrap()
                .get(&tx_hash.to_lowercase())
                .cloned())
        }

        async fn is_valid_contract_signature(
            &self,
            address: &str,
            _message_hash: [u8; 32],
            _signature: &[u8],
        ) -> Result<bool, ChainError> {
            Ok(self
                .valid_contract_signers
                .lock()
                .unwrap()
                .contains(&address.to_lowercase()))
        }
    }

    /// Build a well-formed burn event log for tests.
    pub fn burn_log(sender: &str, tier_id: &str, primary: u64, secondary: u64) -> ReceiptLog {
        let sender_raw = sender.trim_start_matches("0x");
        let mut tier_bytes = [0u8; 32];
        tier_bytes[..tier_id.len()].copy_from_slice(tier_id.as_bytes());

        ReceiptLog {
            address: "0x00000000000000000000000000000000000b04ed".to_string(),
            topics: vec![
                burn_event_topic(),
                format!("0x{:0>64}", sender_raw.to_lowercase()),
                format!("0x{}", hex::encode(tier_bytes)),
            ],
            data: format!("0x{:064x}{:064x}", primary, secondary),
        }
    }

    /// Build a successful receipt carrying the given logs.
    pub fn receipt(tx_hash: &str, from: &str, logs: Vec<ReceiptLog>) -> Receipt {
        Receipt {
            tx_hash: tx_hash.to_lowercase(),
            status: true,
            from: from.to_lowercase(),
            logs,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::mock::{burn_log, receipt};
    use super::*;

    const SENDER: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn test_burn_event_topic_is_stable() {
        // keccak256("FeeBurned(address,bytes32,uint256,uint256)")
        let topic = burn_event_topic();
        assert!(topic.starts_with("0x"));
        assert_eq!(topic.len(), 66);
        assert_eq!(topic, burn_event_topic());
    }

    #[test]
    fn test_decode_round_trip() {
        let log = burn_log(SENDER, "micro", 50, 5);
        let event = decode_burn_event(&log).unwrap();
        assert_eq!(event.sender, SENDER);
        assert_eq!(event.tier_id, "micro");
        assert_eq!(event.amount_primary, "0x32");
        assert_eq!(event.amount_secondary, "0x5");
    }

    #[test]
    fn test_decode_zero_amount() {
        let log = burn_log(SENDER, "micro", 0, 7);
        let event = decode_burn_event(&log).unwrap();
        assert_eq!(event.amount_primary, "0x0");
    }

    #[test]
    fn test_decode_rejects_foreign_topic() {
        let mut log = burn_log(SENDER, "micro", 1, 1);
        log.topics[0] = format!("0x{}", "ab".repeat(32));
        assert!(decode_burn_event(&log).is_none());
    }

    #[test]
    fn test_decode_rejects_short_data() {
        let mut log = burn_log(SENDER, "micro", 1, 1);
        log.data = "0x1234".to_string();
        assert!(decode_burn_event(&log).is_none());
    }

    #[test]
    fn test_decode_rejects_missing_topics() {
        let mut log = burn_log(SENDER, "micro", 1, 1);
        log.topics.truncate(2);
        assert!(decode_burn_event(&log).is_none());
    }

    #[tokio::test]
    async fn test_mock_receipt_lookup() {
        let chain = mock::MockChainClient::new();
        chain.add_receipt(receipt("0xAA", SENDER, vec![]));

        assert!(chain.transaction_receipt("0xaa").await.unwrap().is_some());
        assert!(chain.transaction_receipt("0xbb").await.unwrap().is_none());
    }
}
