// Protocol adapters
//
// Turn heterogeneous node responses into the canonical model. One adapter
// serves the whole bitcoin family, specialized by a `VariantHooks`
// strategy; the Omni sub-token layer has its own adapter.
//
// Any response that does not match the expected shape is a fatal error for
// the height being fetched. Nothing is guessed or defaulted silently.

pub mod bech32;
pub mod bitcoin;
pub mod exclusions;
pub mod omni;
pub mod variant;

pub use bitcoin::BitcoinFamily;
pub use exclusions::{ExclusionEntry, ExclusionTable};
pub use omni::OmniAdapter;
pub use variant::{hooks_for, VariantHooks};

use crate::amount::{self, AmountError};
use crate::model::{HashError, LedgerBlock};
use crate::rpc::{decimal_text, RpcEndpoint, RpcError};
use async_trait::async_trait;
use blocksql_common::Asset;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdapterError>;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("unknown output type '{0}'")]
    UnknownOutputType(String),

    #[error("unknown Omni transaction type {type_int} in {tx_hash}")]
    UnknownTransactionType { tx_hash: String, type_int: i64 },

    #[error("transaction {0} is both a stake vote and a ticket")]
    ConflictingClassification(String),

    #[error("invalid addresses on {output_type} output: {detail}")]
    InvalidAddress { output_type: String, detail: String },

    #[error("unknown {field} '{value}'")]
    UnknownValue { field: &'static str, value: String },

    #[error("amount error: {0}")]
    Amount(#[from] AmountError),

    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("{0} is not served by this adapter")]
    Unsupported(Asset),
}

/// Read access to one ledger node
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    type Block: LedgerBlock;

    fn asset(&self) -> Asset;

    fn endpoint(&self) -> &RpcEndpoint;

    /// Current best height reported by the node
    async fn get_height(&self) -> Result<u64>;

    /// Fetch and normalize the block at `height`
    async fn get_block_at(&self, height: u64) -> Result<Self::Block>;
}

#[async_trait]
impl<A: LedgerAdapter + ?Sized> LedgerAdapter for std::sync::Arc<A> {
    type Block = A::Block;

    fn asset(&self) -> Asset {
        self.as_ref().asset()
    }

    fn endpoint(&self) -> &RpcEndpoint {
        self.as_ref().endpoint()
    }

    async fn get_height(&self) -> Result<u64> {
        self.as_ref().get_height().await
    }

    async fn get_block_at(&self, height: u64) -> Result<Self::Block> {
        self.as_ref().get_block_at(height).await
    }
}

// Field accessors shared by the adapters

pub(crate) fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    value
        .get(key)
        .ok_or_else(|| AdapterError::Shape(format!("missing field '{key}'")))
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    field(value, key)?
        .as_str()
        .ok_or_else(|| AdapterError::Shape(format!("field '{key}' is not a string")))
}

pub(crate) fn u64_field(value: &Value, key: &str) -> Result<u64> {
    field(value, key)?
        .as_u64()
        .ok_or_else(|| AdapterError::Shape(format!("field '{key}' is not an unsigned integer")))
}

pub(crate) fn i64_field(value: &Value, key: &str) -> Result<i64> {
    field(value, key)?
        .as_i64()
        .ok_or_else(|| AdapterError::Shape(format!("field '{key}' is not an integer")))
}

pub(crate) fn array_field<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    field(value, key)?
        .as_array()
        .ok_or_else(|| AdapterError::Shape(format!("field '{key}' is not an array")))
}

/// Decimal coin amount in base units
pub(crate) fn amount_field(value: &Value, key: &str) -> Result<u128> {
    let text = decimal_text(field(value, key)?)
        .ok_or_else(|| AdapterError::Shape(format!("field '{key}' is not a number")))?;
    Ok(amount::to_base_units(&text)?)
}

pub(crate) fn epoch_field(value: &Value, key: &str) -> Result<DateTime<Utc>> {
    let secs = i64_field(value, key)?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AdapterError::Shape(format!("field '{key}' is not a valid timestamp")))
}

pub(crate) fn check_address(output_type: &str, address: &str) -> Result<()> {
    check_address_length(output_type, address, crate::model::MAX_ADDRESS_LENGTH)
}

pub(crate) fn check_address_length(output_type: &str, address: &str, max: usize) -> Result<()> {
    if address.is_empty() || address.len() > max {
        return Err(AdapterError::InvalidAddress {
            output_type: output_type.to_string(),
            detail: format!("address '{address}' has length {}", address.len()),
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_amount_field_keeps_exact_text() {
        let raw: Value = serde_json::from_str(r#"{"value": 0.00012345, "whole": 50}"#).unwrap();
        assert_eq!(amount_field(&raw, "value").unwrap(), 12345);
        assert_eq!(amount_field(&raw, "whole").unwrap(), 5_000_000_000);
        assert!(matches!(
            amount_field(&raw, "missing"),
            Err(AdapterError::Shape(_))
        ));
    }

    #[test]
    fn test_address_length_bounds() {
        assert!(check_address("pubkeyhash", "1BoatSLRHtKNngkdXEeobR76b53LETtpyT").is_ok());
        assert!(check_address("pubkeyhash", "").is_err());
        assert!(check_address("pubkeyhash", &"x".repeat(65)).is_err());
        assert!(check_address("pubkeyhash", &"x".repeat(64)).is_ok());
    }

    #[test]
    fn test_epoch_field() {
        let raw = json!({"time": 1231006505});
        assert_eq!(
            epoch_field(&raw, "time").unwrap().to_rfc3339(),
            "2009-01-03T18:15:05+00:00"
        );
        assert!(epoch_field(&json!({"time": "soon"}), "time").is_err());
    }
}
