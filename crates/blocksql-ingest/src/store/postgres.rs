//! PostgreSQL sink for canonical blocks

use super::schema::Schema;
use super::{
    chunk_count, int4, int8, numeric_i128, numeric_u128, BlockSink, Result, StoreCounts,
    StoreError, DEFAULT_STORE_BATCH_SIZE,
};
use crate::model::{CanonicalBlock, CanonicalTransaction, SidePayload};
use async_trait::async_trait;
use blocksql_common::Asset;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, warn};

fn timestamp(time: &DateTime<Utc>) -> NaiveDateTime {
    time.naive_utc()
}

struct TransactionRow {
    hash: BigDecimal,
    size: i32,
    time: NaiveDateTime,
    median_time: Option<NaiveDateTime>,
    coinbase: bool,
    vote: bool,
    ticket: bool,
}

struct OutputRow {
    tx_hash: BigDecimal,
    index: i32,
    output_type: i16,
    addresses: Vec<String>,
    script: Vec<u8>,
    value: BigDecimal,
    time_created: NaiveDateTime,
    median_time_created: Option<NaiveDateTime>,
}

struct SpendRow {
    tx_hash: BigDecimal,
    index: i32,
    spending_tx_hash: BigDecimal,
    time_spent: NaiveDateTime,
    median_time_spent: Option<NaiveDateTime>,
}

struct JoinSplitRow {
    tx_hash: BigDecimal,
    value_old: BigDecimal,
    value_new: BigDecimal,
    time: NaiveDateTime,
}

struct SaplingRow {
    tx_hash: BigDecimal,
    value_balance: BigDecimal,
    input_count: i32,
    output_count: i32,
    time: NaiveDateTime,
}

struct ZerocoinRow {
    tx_hash: BigDecimal,
    value: BigDecimal,
    time: NaiveDateTime,
}

struct CoinbaseScriptRow {
    tx_hash: BigDecimal,
    script: Vec<u8>,
}

/// A block converted into bindable rows, so range and precision failures
/// surface before any statement runs.
#[derive(Default)]
struct BlockRows {
    transactions: Vec<TransactionRow>,
    outputs: Vec<OutputRow>,
    spends: Vec<SpendRow>,
    join_splits: Vec<JoinSplitRow>,
    sapling: Vec<SaplingRow>,
    mints: Vec<ZerocoinRow>,
    zerocoin_spends: Vec<ZerocoinRow>,
    coinbase_scripts: Vec<CoinbaseScriptRow>,
}

impl BlockRows {
    fn from_block(block: &CanonicalBlock) -> Result<Self> {
        let mut rows = BlockRows::default();
        for tx in &block.transactions {
            rows.push_transaction(tx)?;
        }
        Ok(rows)
    }

    fn push_transaction(&mut self, tx: &CanonicalTransaction) -> Result<()> {
        let hash = tx.hash.to_numeric();
        let time = timestamp(&tx.time);
        let median_time = tx.median_time.as_ref().map(timestamp);

        self.transactions.push(TransactionRow {
            hash: hash.clone(),
            size: int4("tx_size", tx.size)?,
            time,
            median_time,
            coinbase: tx.coinbase,
            vote: tx.vote(),
            ticket: tx.ticket(),
        });

        for output in &tx.outputs {
            self.outputs.push(OutputRow {
                tx_hash: hash.clone(),
                index: int4("output_index", output.index)?,
                output_type: output.output_type.code(),
                addresses: output.addresses.clone(),
                script: output.script.clone(),
                value: numeric_u128(output.value),
                time_created: time,
                median_time_created: median_time,
            });
        }

        for input in &tx.inputs {
            self.spends.push(SpendRow {
                tx_hash: input.tx_hash.to_numeric(),
                index: int4("output_index", input.output_index)?,
                spending_tx_hash: hash.clone(),
                time_spent: time,
                median_time_spent: median_time,
            });
        }

        match &tx.side {
            Some(SidePayload::Zcash {
                join_splits,
                sapling,
            }) => {
                for split in join_splits {
                    self.join_splits.push(JoinSplitRow {
                        tx_hash: hash.clone(),
                        value_old: numeric_u128(split.value_old),
                        value_new: numeric_u128(split.value_new),
                        time,
                    });
                }
                if let Some(payment) = sapling {
                    self.sapling.push(SaplingRow {
                        tx_hash: hash.clone(),
                        value_balance: numeric_i128(payment.value_balance),
                        input_count: int4("sapling_payment_input_count", payment.input_count)?,
                        output_count: int4("sapling_payment_output_count", payment.output_count)?,
                        time,
                    });
                }
            },
            Some(SidePayload::Pivx { mints, spends }) => {
                for value in mints {
                    self.mints.push(ZerocoinRow {
                        tx_hash: hash.clone(),
                        value: numeric_u128(*value),
                        time,
                    });
                }
                for value in spends {
                    self.zerocoin_spends.push(ZerocoinRow {
                        tx_hash: hash.clone(),
                        value: numeric_u128(*value),
                        time,
                    });
                }
            },
            Some(SidePayload::Decred { .. }) | None => {},
        }

        if let Some(script) = &tx.coinbase_script {
            self.coinbase_scripts.push(CoinbaseScriptRow {
                tx_hash: hash,
                script: script.clone(),
            });
        }
        Ok(())
    }
}

/// Canonical table writer for one bitcoin-family asset
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: Schema,
    asset: Asset,
    batch_size: usize,
}

impl PgStore {
    pub fn new(pool: PgPool, asset: Asset) -> Self {
        Self {
            pool,
            schema: Schema::new(asset),
            asset,
            batch_size: DEFAULT_STORE_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn insert_block(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        block: &CanonicalBlock,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (block_hash, block_height, block_size, block_time, \
             block_median_time, block_difficulty, block_chainwork) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.schema.blocks_table()
        );
        sqlx::query(&sql)
            .bind(block.hash.to_numeric())
            .bind(int8("block_height", block.height)?)
            .bind(int4("block_size", block.size)?)
            .bind(timestamp(&block.time))
            .bind(block.median_time.as_ref().map(timestamp))
            .bind(block.difficulty)
            .bind(block.chain_work.to_numeric())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_transactions(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rows: &[TransactionRow],
        block_hash: &BigDecimal,
    ) -> Result<()> {
        let decred = self.asset == Asset::Dcr;
        let total = chunk_count(rows.len(), self.batch_size);
        for (i, chunk) in rows.chunks(self.batch_size).enumerate() {
            debug!("Storing transactions chunk {} / {}", i + 1, total);
            let columns = if decred {
                "tx_hash, tx_block_hash, tx_size, tx_time, tx_median_time, tx_coinbase, tx_vote, tx_ticket"
            } else {
                "tx_hash, tx_block_hash, tx_size, tx_time, tx_median_time, tx_coinbase"
            };
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({columns}) ",
                self.schema.transactions_table()
            ));
            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.hash.clone())
                    .push_bind(block_hash.clone())
                    .push_bind(row.size)
                    .push_bind(row.time)
                    .push_bind(row.median_time)
                    .push_bind(row.coinbase);
                if decred {
                    b.push_bind(row.vote).push_bind(row.ticket);
                }
            });
            query_builder.build().execute(&mut **tx).await?;
        }
        Ok(())
    }

    async fn insert_outputs(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rows: &[OutputRow],
    ) -> Result<()> {
        let total = chunk_count(rows.len(), self.batch_size);
        for (i, chunk) in rows.chunks(self.batch_size).enumerate() {
            debug!("Storing outputs chunk {} / {}", i + 1, total);
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (output_tx_hash, output_index, output_type, output_addresses, \
                 output_script, output_value_satoshi, output_time_created, \
                 output_median_time_created) ",
                self.schema.outputs_table()
            ));
            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.tx_hash.clone())
                    .push_bind(row.index)
                    .push_bind(row.output_type)
                    .push_bind(row.addresses.clone())
                    .push_bind(row.script.clone())
                    .push_bind(row.value.clone())
                    .push_bind(row.time_created)
                    .push_bind(row.median_time_created);
            });
            query_builder.build().execute(&mut **tx).await?;
        }
        Ok(())
    }

    /// Mark spent outputs. Returns the number of rows updated.
    async fn mark_spent(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rows: &[SpendRow],
    ) -> Result<u64> {
        let outputs = self.schema.outputs_table();
        let total = chunk_count(rows.len(), self.batch_size);
        let mut updated = 0;
        for (i, chunk) in rows.chunks(self.batch_size).enumerate() {
            debug!("Storing inputs chunk {} / {}", i + 1, total);
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "UPDATE {outputs} SET \
                 output_spending_tx_hash = v.spending_tx_hash, \
                 output_time_spent = v.time_spent, \
                 output_median_time_spent = v.median_time_spent \
                 FROM ("
            ));
            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.tx_hash.clone())
                    .push_bind(row.index)
                    .push_bind(row.spending_tx_hash.clone())
                    .push_bind(row.time_spent)
                    .push_bind(row.median_time_spent);
            });
            query_builder.push(format!(
                ") AS v(tx_hash, output_index, spending_tx_hash, time_spent, median_time_spent) \
                 WHERE {outputs}.output_tx_hash = v.tx_hash \
                 AND {outputs}.output_index = v.output_index"
            ));
            updated += query_builder.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(updated)
    }

    async fn insert_side_records(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rows: &BlockRows,
    ) -> Result<()> {
        for chunk in rows.join_splits.chunks(self.batch_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (joinsplit_tx_hash, joinsplit_value_old, joinsplit_value_new, \
                 joinsplit_time) ",
                self.schema.joinsplits_table()
            ));
            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.tx_hash.clone())
                    .push_bind(row.value_old.clone())
                    .push_bind(row.value_new.clone())
                    .push_bind(row.time);
            });
            query_builder.build().execute(&mut **tx).await?;
        }

        for chunk in rows.sapling.chunks(self.batch_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (sapling_payment_tx_hash, sapling_payment_value_balance, \
                 sapling_payment_input_count, sapling_payment_output_count, \
                 sapling_payment_time) ",
                self.schema.sapling_payments_table()
            ));
            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.tx_hash.clone())
                    .push_bind(row.value_balance.clone())
                    .push_bind(row.input_count)
                    .push_bind(row.output_count)
                    .push_bind(row.time);
            });
            query_builder.build().execute(&mut **tx).await?;
        }

        for (records, table, stem) in [
            (&rows.mints, self.schema.zerocoin_mints_table(), "zerocoin_mint"),
            (
                &rows.zerocoin_spends,
                self.schema.zerocoin_spends_table(),
                "zerocoin_spend",
            ),
        ] {
            for chunk in records.chunks(self.batch_size) {
                let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                    "INSERT INTO {table} ({stem}_tx_hash, {stem}_value, {stem}_time) "
                ));
                query_builder.push_values(chunk, |mut b, row| {
                    b.push_bind(row.tx_hash.clone())
                        .push_bind(row.value.clone())
                        .push_bind(row.time);
                });
                query_builder.build().execute(&mut **tx).await?;
            }
        }
        Ok(())
    }

    async fn insert_coinbase_scripts(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rows: &[CoinbaseScriptRow],
    ) -> Result<()> {
        for chunk in rows.chunks(self.batch_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (coinbase_script_tx_hash, coinbase_script_hex) ",
                self.schema.coinbase_scripts_table()
            ));
            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.tx_hash.clone()).push_bind(row.script.clone());
            });
            query_builder.build().execute(&mut **tx).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlockSink<CanonicalBlock> for PgStore {
    async fn stored_height(&self) -> Result<Option<u64>> {
        let sql = format!("SELECT MAX(block_height) FROM {}", self.schema.blocks_table());
        let height: Option<i64> = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        height
            .map(|h| {
                u64::try_from(h).map_err(|_| StoreError::Range {
                    column: "block_height",
                    value: h.to_string(),
                })
            })
            .transpose()
    }

    async fn store_block(&self, block: &CanonicalBlock) -> Result<StoreCounts> {
        let rows = BlockRows::from_block(block)?;
        let block_hash = block.hash.to_numeric();

        let mut tx = self.pool.begin().await?;

        self.insert_block(&mut tx, block).await?;
        self.insert_transactions(&mut tx, &rows.transactions, &block_hash)
            .await?;
        self.insert_outputs(&mut tx, &rows.outputs).await?;
        let updated = self.mark_spent(&mut tx, &rows.spends).await?;
        if updated < rows.spends.len() as u64 {
            warn!(
                asset = %self.asset,
                height = block.height,
                inputs = rows.spends.len(),
                updated,
                "Some inputs reference outputs that are not stored"
            );
        }
        self.insert_side_records(&mut tx, &rows).await?;
        self.insert_coinbase_scripts(&mut tx, &rows.coinbase_scripts)
            .await?;

        tx.commit().await?;

        Ok(StoreCounts {
            transactions: rows.transactions.len(),
            outputs: rows.outputs.len(),
            inputs: rows.spends.len(),
            side_records: rows.join_splits.len()
                + rows.sapling.len()
                + rows.mints.len()
                + rows.zerocoin_spends.len(),
        })
    }
}
