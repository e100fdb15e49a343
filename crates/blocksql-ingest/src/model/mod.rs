// Canonical ledger model
//
// Every bitcoin-family variant is normalized into these types before it
// reaches the store. Protocol extensions ride along as a `SidePayload`.

pub mod omni;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_bigint::{BigInt, BigUint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Block and transaction hashes must fit DECIMAL(78)
pub const HASH_PRECISION_DIGITS: u32 = 78;

/// Chain work must fit DECIMAL(48)
pub const CHAINWORK_PRECISION_DIGITS: u32 = 48;

/// Upper bound on the length of a single address
pub const MAX_ADDRESS_LENGTH: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("invalid hex '{0}'")]
    InvalidHex(String),

    #[error("'{0}' is wider than 256 bits")]
    TooWide(String),

    #[error("{value} does not fit {limit} decimal digits")]
    Precision { value: String, limit: u32 },
}

/// A 256-bit unsigned integer stored big-endian.
///
/// Hashes, txids and chain work all arrive as hex strings and are persisted
/// as exact decimal integers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Parse a hex string of at most 64 digits, left-padding shorter input.
    pub fn from_hex(text: &str) -> Result<Self, HashError> {
        let trimmed = text.trim().trim_start_matches("0x");
        if trimmed.len() > 64 {
            return Err(HashError::TooWide(text.to_string()));
        }
        let padded = format!("{trimmed:0>64}");
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&padded, &mut bytes)
            .map_err(|_| HashError::InvalidHex(text.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Exact base-10 rendering
    pub fn to_decimal_string(&self) -> String {
        self.to_biguint().to_string()
    }

    /// Exact NUMERIC value, as persisted
    pub fn to_numeric(&self) -> BigDecimal {
        BigDecimal::new(BigInt::from(self.to_biguint()), 0)
    }

    /// Parse an exact base-10 integer, the inverse of [`Self::to_decimal_string`]
    pub fn from_decimal_str(text: &str) -> Result<Self, HashError> {
        let text = text.trim();
        let value: BigUint = text
            .parse()
            .map_err(|_| HashError::InvalidHex(text.to_string()))?;
        let digits = value.to_bytes_be();
        if digits.len() > 32 {
            return Err(HashError::TooWide(text.to_string()));
        }
        let mut bytes = [0u8; 32];
        bytes[32 - digits.len()..].copy_from_slice(&digits);
        Ok(Self(bytes))
    }

    /// Check the value against a decimal digit bound (value < 10^limit)
    pub fn check_precision(self, limit: u32) -> Result<Self, HashError> {
        if self.to_biguint() >= BigUint::from(10u32).pow(limit) {
            return Err(HashError::Precision {
                value: self.to_decimal_string(),
                limit,
            });
        }
        Ok(self)
    }

    /// Parse a txid/block hash and enforce the hash precision bound
    pub fn parse_hash(text: &str) -> Result<Self, HashError> {
        Self::from_hex(text)?.check_precision(HASH_PRECISION_DIGITS)
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Hash256 {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash256 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Output classification, persisted as a SMALLINT code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    NullData,
    NonStandard,
    PubKeyHash,
    PubKey,
    Multisig,
    ScriptHash,
    WitnessV0KeyHash,
    WitnessV0ScriptHash,
    StakeGen,
    StakeSubmission,
    SstxCommitment,
    SstxChange,
    StakeRevoke,
    PubKeyAlt,
}

impl OutputType {
    /// Map the node's classification string. `None` for anything unknown.
    pub fn from_node_name(name: &str) -> Option<Self> {
        let output_type = match name {
            "nulldata" => OutputType::NullData,
            "nonstandard" => OutputType::NonStandard,
            "pubkeyhash" => OutputType::PubKeyHash,
            "pubkey" => OutputType::PubKey,
            "multisig" => OutputType::Multisig,
            "scripthash" => OutputType::ScriptHash,
            "witness_v0_keyhash" => OutputType::WitnessV0KeyHash,
            "witness_v0_scripthash" => OutputType::WitnessV0ScriptHash,
            "stakegen" => OutputType::StakeGen,
            "stakesubmission" => OutputType::StakeSubmission,
            "sstxcommitment" => OutputType::SstxCommitment,
            "sstxchange" => OutputType::SstxChange,
            "stakerevoke" => OutputType::StakeRevoke,
            "pubkeyalt" => OutputType::PubKeyAlt,
            _ => return None,
        };
        Some(output_type)
    }

    pub fn code(self) -> i16 {
        match self {
            OutputType::NullData => 0,
            OutputType::NonStandard => 1,
            OutputType::PubKeyHash => 2,
            OutputType::PubKey => 3,
            OutputType::Multisig => 4,
            OutputType::ScriptHash => 5,
            OutputType::WitnessV0KeyHash => 6,
            OutputType::WitnessV0ScriptHash => 7,
            OutputType::StakeGen => 64,
            OutputType::StakeSubmission => 65,
            OutputType::SstxCommitment => 66,
            OutputType::SstxChange => 67,
            OutputType::StakeRevoke => 68,
            OutputType::PubKeyAlt => 69,
        }
    }

    pub fn is_witness(self) -> bool {
        matches!(
            self,
            OutputType::WitnessV0KeyHash | OutputType::WitnessV0ScriptHash
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub index: u32,
    pub output_type: OutputType,
    pub addresses: Vec<String>,
    pub script: Vec<u8>,
    pub value: u128,
}

/// Reference to the prior output an input consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub tx_hash: Hash256,
    pub output_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSplit {
    pub value_old: u128,
    pub value_new: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaplingPayment {
    pub value_balance: i128,
    pub input_count: u32,
    pub output_count: u32,
}

/// Protocol-specific records attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SidePayload {
    Zcash {
        join_splits: Vec<JoinSplit>,
        sapling: Option<SaplingPayment>,
    },
    Pivx {
        mints: Vec<u128>,
        spends: Vec<u128>,
    },
    Decred {
        vote: bool,
        ticket: bool,
    },
}

impl SidePayload {
    /// Number of rows this payload adds to side tables
    pub fn record_count(&self) -> usize {
        match self {
            SidePayload::Zcash {
                join_splits,
                sapling,
            } => join_splits.len() + usize::from(sapling.is_some()),
            SidePayload::Pivx { mints, spends } => mints.len() + spends.len(),
            SidePayload::Decred { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    pub hash: Hash256,
    pub size: u32,
    pub time: DateTime<Utc>,
    pub median_time: Option<DateTime<Utc>>,
    pub coinbase: bool,
    pub coinbase_script: Option<Vec<u8>>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub side: Option<SidePayload>,
}

impl CanonicalTransaction {
    pub fn new(hash: Hash256, size: u32, time: DateTime<Utc>, coinbase: bool) -> Self {
        Self {
            hash,
            size,
            time,
            median_time: None,
            coinbase,
            coinbase_script: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            side: None,
        }
    }

    pub fn vote(&self) -> bool {
        matches!(self.side, Some(SidePayload::Decred { vote: true, .. }))
    }

    pub fn ticket(&self) -> bool {
        matches!(self.side, Some(SidePayload::Decred { ticket: true, .. }))
    }
}

/// Anything the pipeline stores per height
pub trait LedgerBlock: Send + 'static {
    fn height(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalBlock {
    pub height: u64,
    pub hash: Hash256,
    pub chain_work: Hash256,
    pub time: DateTime<Utc>,
    pub median_time: Option<DateTime<Utc>>,
    pub size: u32,
    pub difficulty: f64,
    pub transactions: Vec<CanonicalTransaction>,
}

impl CanonicalBlock {
    pub fn input_count(&self) -> usize {
        self.transactions.iter().map(|tx| tx.inputs.len()).sum()
    }

    pub fn output_count(&self) -> usize {
        self.transactions.iter().map(|tx| tx.outputs.len()).sum()
    }

    pub fn side_record_count(&self) -> usize {
        self.transactions
            .iter()
            .filter_map(|tx| tx.side.as_ref())
            .map(SidePayload::record_count)
            .sum()
    }
}

impl LedgerBlock for CanonicalBlock {
    fn height(&self) -> u64 {
        self.height
    }
}
