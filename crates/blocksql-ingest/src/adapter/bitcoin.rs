//! Bitcoin-family adapter
//!
//! `getblockhash` → `getblock` → one batched `getrawtransaction(hash, 1)` for
//! every non-excluded transaction, then normalization of each transaction in
//! block order. Ledger-specific behavior comes from the injected hooks.

use super::variant::{hooks_for, InputDisposition, OutputDisposition, VariantHooks};
use super::{
    amount_field, array_field, bech32, check_address, epoch_field, field, str_field, u64_field,
    AdapterError, ExclusionTable, LedgerAdapter, Result,
};
use crate::model::{
    CanonicalBlock, CanonicalTransaction, Hash256, Input, Output, OutputType,
    CHAINWORK_PRECISION_DIGITS,
};
use crate::rpc::{JsonRpcClient, RpcEndpoint};
use async_trait::async_trait;
use blocksql_common::Asset;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct BitcoinFamily {
    asset: Asset,
    rpc: JsonRpcClient,
    hooks: Arc<dyn VariantHooks>,
    exclusions: ExclusionTable,
}

impl BitcoinFamily {
    pub fn new(
        asset: Asset,
        rpc: JsonRpcClient,
        hooks: Arc<dyn VariantHooks>,
        exclusions: ExclusionTable,
    ) -> Self {
        Self {
            asset,
            rpc,
            hooks,
            exclusions,
        }
    }

    /// Build the adapter for `asset`, applying the variant's transport needs
    pub fn connect(asset: Asset, endpoint: RpcEndpoint, exclusions: ExclusionTable) -> Result<Self> {
        let hooks = hooks_for(asset)?;
        let endpoint = if hooks.unverified_tls() {
            endpoint.with_unverified_tls()
        } else {
            endpoint
        };
        let rpc = JsonRpcClient::new(endpoint)?;
        Ok(Self::new(asset, rpc, hooks, exclusions))
    }

    pub fn hooks(&self) -> &dyn VariantHooks {
        self.hooks.as_ref()
    }

    fn block_header(&self, raw: &Value) -> Result<CanonicalBlock> {
        let hash = Hash256::parse_hash(str_field(raw, "hash")?)?;
        let chain_work = if self.hooks.chain_work_reported() {
            Hash256::from_hex(str_field(raw, "chainwork")?)?
                .check_precision(CHAINWORK_PRECISION_DIGITS)?
        } else {
            Hash256::ZERO
        };
        let median_time = match raw.get("mediantime") {
            Some(_) => Some(epoch_field(raw, "mediantime")?),
            None => None,
        };
        let difficulty = field(raw, "difficulty")?
            .as_f64()
            .ok_or_else(|| AdapterError::Shape("field 'difficulty' is not a number".into()))?;

        Ok(CanonicalBlock {
            height: u64_field(raw, "height")?,
            hash,
            chain_work,
            time: epoch_field(raw, "time")?,
            median_time,
            size: narrow(u64_field(raw, "size")?, "size")?,
            difficulty,
            transactions: Vec::new(),
        })
    }

    async fn transaction(
        &self,
        raw: &Value,
        tx_index: usize,
        block: &CanonicalBlock,
    ) -> Result<CanonicalTransaction> {
        let hash = Hash256::parse_hash(str_field(raw, "txid")?)?;
        let size = if self.hooks.tx_size_reported() {
            narrow(u64_field(raw, "size")?, "size")?
        } else {
            0
        };

        let raw_inputs = array_field(raw, "vin")?;
        let coinbase_input = raw_inputs.iter().find(|input| input.get("coinbase").is_some());
        let coinbase =
            coinbase_input.is_some() || self.hooks.coinbase_equivalent(tx_index, block.height);

        let mut tx = CanonicalTransaction::new(hash, size, block.time, coinbase);
        tx.median_time = block.median_time;
        tx.side = self.hooks.initial_side();
        if let Some(input) = coinbase_input {
            let script = str_field(input, "coinbase")?;
            tx.coinbase_script = Some(
                hex::decode(script)
                    .map_err(|e| AdapterError::Shape(format!("coinbase script: {e}")))?,
            );
        }

        if self.hooks.process_inputs(coinbase, tx_index) {
            for (input_index, input) in raw_inputs.iter().enumerate() {
                let disposition = self
                    .hooks
                    .classify_input(&self.rpc, &mut tx, input, input_index)
                    .await?;
                if disposition == InputDisposition::Reference {
                    tx.inputs.push(Input {
                        tx_hash: Hash256::parse_hash(str_field(input, "txid")?)?,
                        output_index: narrow(u64_field(input, "vout")?, "vout")?,
                    });
                }
            }
        }

        for (output_index, output) in array_field(raw, "vout")?.iter().enumerate() {
            let script = field(output, "scriptPubKey")?;
            let node_type = str_field(script, "type")?;
            if self.hooks.classify_output(&mut tx, output, node_type)? == OutputDisposition::Consumed
            {
                continue;
            }
            tx.outputs
                .push(normalize_output(output_index, output, script, node_type)?);
        }

        self.hooks.finish_transaction(&mut tx, raw)?;
        Ok(tx)
    }
}

#[async_trait]
impl LedgerAdapter for BitcoinFamily {
    type Block = CanonicalBlock;

    fn asset(&self) -> Asset {
        self.asset
    }

    fn endpoint(&self) -> &RpcEndpoint {
        self.rpc.endpoint()
    }

    async fn get_height(&self) -> Result<u64> {
        Ok(self.rpc.call::<u64>("getblockcount", json!([])).await?)
    }

    #[instrument(skip(self), fields(asset = %self.asset, variant = self.hooks.name()))]
    async fn get_block_at(&self, height: u64) -> Result<CanonicalBlock> {
        let block_hash: String = self.rpc.call("getblockhash", json!([height])).await?;
        let raw = self.rpc.call_value("getblock", json!([block_hash])).await?;
        let mut block = self.block_header(&raw)?;
        if block.height != height {
            return Err(AdapterError::Shape(format!(
                "asked for height {height}, node returned {}",
                block.height
            )));
        }

        let mut params = Vec::new();
        for hash in array_field(&raw, "tx")? {
            let hash = hash
                .as_str()
                .ok_or_else(|| AdapterError::Shape("transaction hash is not a string".into()))?;
            if self.exclusions.is_excluded(hash, height) {
                debug!(tx = hash, "Skipping excluded transaction");
                continue;
            }
            params.push(json!([hash, 1]));
        }

        let mut raw_txs = self.rpc.batch("getrawtransaction", params).await?;
        raw_txs.extend(self.hooks.extra_transactions(&self.rpc, &raw).await?);

        let mut transactions = Vec::with_capacity(raw_txs.len());
        for (tx_index, raw_tx) in raw_txs.iter().enumerate() {
            transactions.push(self.transaction(raw_tx, tx_index, &block).await?);
        }
        block.transactions = transactions;

        debug!(
            transactions = block.transactions.len(),
            outputs = block.output_count(),
            "Block normalized"
        );
        Ok(block)
    }
}

fn narrow(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| AdapterError::Shape(format!("{what} {value} out of range")))
}

fn normalize_output(
    index: usize,
    output: &Value,
    script: &Value,
    node_type: &str,
) -> Result<Output> {
    let output_type = OutputType::from_node_name(node_type)
        .ok_or_else(|| AdapterError::UnknownOutputType(node_type.to_string()))?;
    let script_bytes = hex::decode(str_field(script, "hex")?)
        .map_err(|e| AdapterError::Shape(format!("script hex: {e}")))?;

    let (mut addresses, present) = match (script.get("addresses"), script.get("address")) {
        (Some(list), _) => {
            let list = list
                .as_array()
                .ok_or_else(|| AdapterError::Shape("field 'addresses' is not an array".into()))?
                .iter()
                .map(|a| {
                    a.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| AdapterError::Shape("address is not a string".into()))
                })
                .collect::<Result<Vec<_>>>()?;
            (list, true)
        },
        (None, Some(single)) => {
            let single = single
                .as_str()
                .ok_or_else(|| AdapterError::Shape("field 'address' is not a string".into()))?;
            (vec![single.to_string()], true)
        },
        (None, None) => (Vec::new(), false),
    };
    for address in &addresses {
        check_address(node_type, address)?;
    }

    let invalid = |detail: String| AdapterError::InvalidAddress {
        output_type: node_type.to_string(),
        detail,
    };
    match output_type {
        OutputType::NonStandard | OutputType::NullData | OutputType::Multisig => {},
        OutputType::PubKey => {
            if present && addresses.len() != 1 {
                return Err(invalid(format!("expected one address, got {}", addresses.len())));
            }
        },
        OutputType::WitnessV0KeyHash | OutputType::WitnessV0ScriptHash => {
            if addresses.len() > 1 {
                return Err(invalid(format!("expected at most one address, got {}", addresses.len())));
            }
            if addresses.is_empty() {
                let hrp = if output_type == OutputType::WitnessV0KeyHash {
                    "wkh_"
                } else {
                    "wsh_"
                };
                let program = script_bytes.get(2..).unwrap_or_default();
                let synthesized = bech32::encode(hrp, 0, program)
                    .ok_or_else(|| invalid(format!("witness program of {} bytes", program.len())))?;
                addresses.push(synthesized);
            }
        },
        _ => {
            if addresses.len() != 1 {
                return Err(invalid(format!("expected one address, got {}", addresses.len())));
            }
        },
    }

    Ok(Output {
        index: narrow(index as u64, "output index")?,
        output_type,
        addresses,
        script: script_bytes,
        value: amount_field(output, "value")?,
    })
}
