// Canonical store
//
// Persists normalized blocks into asset-parameterized PostgreSQL tables.
// Each block is written in one database transaction:
// - block row
// - transactions and outputs, in batches
// - spent markers for every input (after the outputs, so spends of outputs
//   created in the same block are marked too)
// - protocol side records and coinbase scripts
//
// Primary-key conflicts are not tolerated: re-storing a height is an error.

pub mod omni;
pub mod postgres;
pub mod schema;

pub use omni::OmniStore;
pub use postgres::PgStore;
pub use schema::{Schema, SchemaOp};

use async_trait::async_trait;
use num_bigint::BigInt;
use sqlx::types::BigDecimal;
use thiserror::Error;

/// Rows per multi-row statement
pub const DEFAULT_STORE_BATCH_SIZE: usize = 512;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Value out of range for column {column}: {value}")]
    Range { column: &'static str, value: String },
}

/// Rows written for one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub transactions: usize,
    pub outputs: usize,
    pub inputs: usize,
    pub side_records: usize,
}

/// Destination of the store stage
#[async_trait]
pub trait BlockSink<B>: Send + Sync {
    /// Highest stored height, `None` when nothing is stored yet
    async fn stored_height(&self) -> Result<Option<u64>>;

    async fn store_block(&self, block: &B) -> Result<StoreCounts>;
}

pub(crate) fn numeric_u128(value: u128) -> BigDecimal {
    BigDecimal::new(BigInt::from(value), 0)
}

pub(crate) fn numeric_i128(value: i128) -> BigDecimal {
    BigDecimal::new(BigInt::from(value), 0)
}

pub(crate) fn int4<T>(column: &'static str, value: T) -> Result<i32>
where
    T: TryInto<i32> + Copy + std::fmt::Display,
{
    value.try_into().map_err(|_| StoreError::Range {
        column,
        value: value.to_string(),
    })
}

pub(crate) fn int8<T>(column: &'static str, value: T) -> Result<i64>
where
    T: TryInto<i64> + Copy + std::fmt::Display,
{
    value.try_into().map_err(|_| StoreError::Range {
        column,
        value: value.to_string(),
    })
}

pub(crate) fn chunk_count(len: usize, batch: usize) -> usize {
    len.div_ceil(batch.max(1))
}
