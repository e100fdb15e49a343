//! Per-ledger deviations from the bitcoin base behavior

use super::{amount_field, array_field, AdapterError, Result};
use crate::amount::to_signed_base_units;
use crate::model::{CanonicalTransaction, Hash256, JoinSplit, SaplingPayment, SidePayload};
use crate::rpc::{decimal_text, JsonRpcClient};
use async_trait::async_trait;
use blocksql_common::Asset;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::trace;

/// Heights above this treat the second transaction (coinstake) as coinbase
pub const PIVX_COINSTAKE_HEIGHT: u64 = 259_200;

/// What the base adapter should do with an input after the hook saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDisposition {
    /// Record it as a reference to a prior output
    Reference,
    /// The hook consumed it
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDisposition {
    Regular,
    Consumed,
}

/// Strategy set injected into [`super::BitcoinFamily`].
///
/// Every hook defaults to plain bitcoin behavior.
#[async_trait]
pub trait VariantHooks: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Whether `getrawtransaction` reports a usable `size`
    fn tx_size_reported(&self) -> bool {
        true
    }

    /// Whether `getblock` reports a usable `chainwork`
    fn chain_work_reported(&self) -> bool {
        true
    }

    /// Node serves RPC over TLS with a self-signed certificate
    fn unverified_tls(&self) -> bool {
        false
    }

    /// Extra coinbase rule on top of the `coinbase` input marker
    fn coinbase_equivalent(&self, _tx_index: usize, _height: u64) -> bool {
        false
    }

    fn process_inputs(&self, coinbase: bool, _tx_index: usize) -> bool {
        !coinbase
    }

    /// Side payload every transaction of this ledger starts with
    fn initial_side(&self) -> Option<SidePayload> {
        None
    }

    /// Raw transactions fetched in addition to the block's `tx` list
    async fn extra_transactions(&self, _rpc: &JsonRpcClient, _block: &Value) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn classify_input(
        &self,
        _rpc: &JsonRpcClient,
        _tx: &mut CanonicalTransaction,
        _input: &Value,
        _input_index: usize,
    ) -> Result<InputDisposition> {
        Ok(InputDisposition::Reference)
    }

    fn classify_output(
        &self,
        _tx: &mut CanonicalTransaction,
        _output: &Value,
        _node_type: &str,
    ) -> Result<OutputDisposition> {
        Ok(OutputDisposition::Regular)
    }

    fn finish_transaction(&self, _tx: &mut CanonicalTransaction, _raw: &Value) -> Result<()> {
        Ok(())
    }
}

/// Bitcoin and its direct forks, optionally without size or chain work
#[derive(Debug, Clone, Copy)]
pub struct Standard {
    name: &'static str,
    tx_size: bool,
    chain_work: bool,
}

impl Standard {
    pub const fn bitcoin() -> Self {
        Self {
            name: "bitcoin",
            tx_size: true,
            chain_work: true,
        }
    }

    pub const fn dogecoin() -> Self {
        Self {
            name: "dogecoin",
            tx_size: false,
            chain_work: true,
        }
    }

    pub const fn verge() -> Self {
        Self {
            name: "verge",
            tx_size: false,
            chain_work: false,
        }
    }
}

#[async_trait]
impl VariantHooks for Standard {
    fn name(&self) -> &'static str {
        self.name
    }

    fn tx_size_reported(&self) -> bool {
        self.tx_size
    }

    fn chain_work_reported(&self) -> bool {
        self.chain_work
    }
}

/// Transparent pool movements of join-splits and the sapling value balance
#[derive(Debug, Clone, Copy, Default)]
pub struct Zcash;

#[async_trait]
impl VariantHooks for Zcash {
    fn name(&self) -> &'static str {
        "zcash"
    }

    fn tx_size_reported(&self) -> bool {
        false
    }

    fn finish_transaction(&self, tx: &mut CanonicalTransaction, raw: &Value) -> Result<()> {
        let join_splits = array_field(raw, "vjoinsplit")?
            .iter()
            .map(|js| {
                Ok(JoinSplit {
                    value_old: amount_field(js, "vpub_old")?,
                    value_new: amount_field(js, "vpub_new")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let sapling = match raw.get("valueBalance") {
            Some(balance) => {
                let text = decimal_text(balance)
                    .ok_or_else(|| AdapterError::Shape("valueBalance is not a number".into()))?;
                Some(SaplingPayment {
                    value_balance: to_signed_base_units(&text)?,
                    input_count: shielded_count(raw, "vShieldedSpend")?,
                    output_count: shielded_count(raw, "vShieldedOutput")?,
                })
            },
            None => None,
        };

        tx.side = Some(SidePayload::Zcash {
            join_splits,
            sapling,
        });
        Ok(())
    }
}

fn shielded_count(raw: &Value, key: &str) -> Result<u32> {
    let count = array_field(raw, key)?.len();
    u32::try_from(count).map_err(|_| AdapterError::Shape(format!("{key} has {count} entries")))
}

/// Zerocoin mints and spends, proof-of-stake coinstake
#[derive(Debug, Clone, Copy, Default)]
pub struct Pivx;

#[async_trait]
impl VariantHooks for Pivx {
    fn name(&self) -> &'static str {
        "pivx"
    }

    fn tx_size_reported(&self) -> bool {
        false
    }

    fn coinbase_equivalent(&self, tx_index: usize, height: u64) -> bool {
        height > PIVX_COINSTAKE_HEIGHT && tx_index == 1
    }

    // The coinstake spends real outputs; only the true coinbase has none
    fn process_inputs(&self, coinbase: bool, tx_index: usize) -> bool {
        !(coinbase && tx_index == 0)
    }

    fn initial_side(&self) -> Option<SidePayload> {
        Some(SidePayload::Pivx {
            mints: Vec::new(),
            spends: Vec::new(),
        })
    }

    async fn classify_input(
        &self,
        rpc: &JsonRpcClient,
        tx: &mut CanonicalTransaction,
        input: &Value,
        input_index: usize,
    ) -> Result<InputDisposition> {
        let Some(txid) = input.get("txid").and_then(Value::as_str) else {
            return Ok(InputDisposition::Reference);
        };
        if !Hash256::from_hex(txid)?.is_zero() {
            return Ok(InputDisposition::Reference);
        }

        let amount = rpc
            .call_value(
                "getspentzerocoinamount",
                json!([tx.hash.to_hex(), input_index]),
            )
            .await?;
        let text = decimal_text(&amount)
            .ok_or_else(|| AdapterError::Shape("zerocoin spend amount is not a number".into()))?;
        let value = crate::amount::to_base_units(&text)?;
        trace!(tx = %tx.hash, input_index, value, "zerocoin spend");

        if let Some(SidePayload::Pivx { spends, .. }) = &mut tx.side {
            spends.push(value);
        }
        Ok(InputDisposition::Skip)
    }

    fn classify_output(
        &self,
        tx: &mut CanonicalTransaction,
        output: &Value,
        node_type: &str,
    ) -> Result<OutputDisposition> {
        if node_type != "zerocoinmint" {
            return Ok(OutputDisposition::Regular);
        }
        let value = amount_field(output, "value")?;
        if let Some(SidePayload::Pivx { mints, .. }) = &mut tx.side {
            mints.push(value);
        }
        Ok(OutputDisposition::Consumed)
    }
}

/// Stake transactions, votes and tickets
#[derive(Debug, Clone, Copy, Default)]
pub struct Decred;

const TICKET_OUTPUT_TYPES: [&str; 3] = ["sstxcommitment", "stakerevoke", "stakesubmission"];

impl Decred {
    fn mark(tx: &mut CanonicalTransaction, as_vote: bool) {
        if let Some(SidePayload::Decred { vote, ticket }) = &mut tx.side {
            if as_vote {
                *vote = true;
            } else {
                *ticket = true;
            }
        }
    }
}

#[async_trait]
impl VariantHooks for Decred {
    fn name(&self) -> &'static str {
        "decred"
    }

    fn tx_size_reported(&self) -> bool {
        false
    }

    fn chain_work_reported(&self) -> bool {
        false
    }

    fn unverified_tls(&self) -> bool {
        true
    }

    fn initial_side(&self) -> Option<SidePayload> {
        Some(SidePayload::Decred {
            vote: false,
            ticket: false,
        })
    }

    async fn extra_transactions(&self, rpc: &JsonRpcClient, block: &Value) -> Result<Vec<Value>> {
        let Some(stake) = block.get("stx") else {
            return Ok(Vec::new());
        };
        let params = stake
            .as_array()
            .ok_or_else(|| AdapterError::Shape("field 'stx' is not an array".into()))?
            .iter()
            .map(|hash| json!([hash, 1]))
            .collect();
        Ok(rpc.batch("getrawtransaction", params).await?)
    }

    async fn classify_input(
        &self,
        _rpc: &JsonRpcClient,
        tx: &mut CanonicalTransaction,
        input: &Value,
        _input_index: usize,
    ) -> Result<InputDisposition> {
        if input.get("stakebase").is_none() {
            return Ok(InputDisposition::Reference);
        }
        Self::mark(tx, true);
        if input.get("txid").is_some() {
            Ok(InputDisposition::Reference)
        } else {
            Ok(InputDisposition::Skip)
        }
    }

    fn classify_output(
        &self,
        tx: &mut CanonicalTransaction,
        _output: &Value,
        node_type: &str,
    ) -> Result<OutputDisposition> {
        if TICKET_OUTPUT_TYPES.contains(&node_type) {
            Self::mark(tx, false);
        }
        Ok(OutputDisposition::Regular)
    }

    fn finish_transaction(&self, tx: &mut CanonicalTransaction, _raw: &Value) -> Result<()> {
        if tx.vote() && tx.ticket() {
            return Err(AdapterError::ConflictingClassification(tx.hash.to_hex()));
        }
        Ok(())
    }
}

/// Hook set for a bitcoin-family asset
pub fn hooks_for(asset: Asset) -> Result<Arc<dyn VariantHooks>> {
    let hooks: Arc<dyn VariantHooks> = match asset {
        Asset::Btc
        | Asset::Ltc
        | Asset::Vtc
        | Asset::Dash
        | Asset::Dgb
        | Asset::Bch
        | Asset::Btg => Arc::new(Standard::bitcoin()),
        Asset::Doge => Arc::new(Standard::dogecoin()),
        Asset::Xvg => Arc::new(Standard::verge()),
        Asset::Zec => Arc::new(Zcash),
        Asset::Pivx => Arc::new(Pivx),
        Asset::Dcr => Arc::new(Decred),
        Asset::Omni => return Err(AdapterError::Unsupported(asset)),
    };
    Ok(hooks)
}
