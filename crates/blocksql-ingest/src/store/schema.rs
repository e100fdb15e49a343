//! Table layout and maintenance statements

use super::Result;
use crate::amount::VALUE_PRECISION_DIGITS;
use crate::model::omni::OmniKind;
use crate::model::{CHAINWORK_PRECISION_DIGITS, HASH_PRECISION_DIGITS, MAX_ADDRESS_LENGTH};
use blocksql_common::Asset;
use sqlx::PgPool;
use tracing::info;

/// Omni block table shared by every Omni record table
pub const OMNI_BLOCKS_TABLE: &str = "blocks_omni";

/// Setup operation requested from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaOp {
    Create,
    Drop,
    AddIndexes,
    DropIndexes,
    Vacuum,
}

/// Statements for one asset's tables
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    asset: Asset,
}

impl Schema {
    pub fn new(asset: Asset) -> Self {
        Self { asset }
    }

    pub fn blocks_table(&self) -> String {
        format!("{}_blocks", self.asset)
    }

    pub fn transactions_table(&self) -> String {
        format!("{}_transactions", self.asset)
    }

    pub fn outputs_table(&self) -> String {
        format!("{}_outputs", self.asset)
    }

    pub fn coinbase_scripts_table(&self) -> String {
        format!("{}_coinbase_scripts", self.asset)
    }

    pub fn joinsplits_table(&self) -> String {
        format!("{}_joinsplits", self.asset)
    }

    pub fn sapling_payments_table(&self) -> String {
        format!("{}_sapling_payments", self.asset)
    }

    pub fn zerocoin_mints_table(&self) -> String {
        format!("{}_zerocoin_mints", self.asset)
    }

    pub fn zerocoin_spends_table(&self) -> String {
        format!("{}_zerocoin_spends", self.asset)
    }

    pub fn create_statements(&self) -> Vec<String> {
        if self.asset == Asset::Omni {
            return omni_create_statements();
        }

        let hash = HASH_PRECISION_DIGITS;
        let value = VALUE_PRECISION_DIGITS;
        let mut statements = vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 block_hash DECIMAL({hash}) PRIMARY KEY, \
                 block_height BIGINT, \
                 block_size INTEGER, \
                 block_time TIMESTAMP, \
                 block_median_time TIMESTAMP, \
                 block_difficulty DOUBLE PRECISION, \
                 block_chainwork DECIMAL({CHAINWORK_PRECISION_DIGITS}))",
                self.blocks_table()
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 tx_hash DECIMAL({hash}) PRIMARY KEY, \
                 tx_block_hash DECIMAL({hash}), \
                 tx_size INTEGER, \
                 tx_time TIMESTAMP, \
                 tx_median_time TIMESTAMP, \
                 tx_coinbase BOOLEAN)",
                self.transactions_table()
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 output_tx_hash DECIMAL({hash}), \
                 output_index INTEGER, \
                 output_type SMALLINT, \
                 output_addresses VARCHAR({MAX_ADDRESS_LENGTH})[], \
                 output_script BYTEA, \
                 output_value_satoshi DECIMAL({value}), \
                 output_spending_tx_hash DECIMAL({hash}), \
                 output_time_created TIMESTAMP, \
                 output_time_spent TIMESTAMP, \
                 output_median_time_created TIMESTAMP, \
                 output_median_time_spent TIMESTAMP, \
                 PRIMARY KEY (output_tx_hash, output_index))",
                self.outputs_table()
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 coinbase_script_tx_hash DECIMAL({hash}) PRIMARY KEY, \
                 coinbase_script_hex BYTEA)",
                self.coinbase_scripts_table()
            ),
        ];

        match self.asset {
            Asset::Zec => {
                statements.push(format!(
                    "CREATE TABLE IF NOT EXISTS {} (\
                     id SERIAL PRIMARY KEY, \
                     joinsplit_tx_hash DECIMAL({hash}), \
                     joinsplit_value_old DECIMAL({value}), \
                     joinsplit_value_new DECIMAL({value}), \
                     joinsplit_time TIMESTAMP)",
                    self.joinsplits_table()
                ));
                statements.push(format!(
                    "CREATE TABLE IF NOT EXISTS {} (\
                     sapling_payment_tx_hash DECIMAL({hash}) PRIMARY KEY, \
                     sapling_payment_value_balance DECIMAL({value}), \
                     sapling_payment_input_count INTEGER, \
                     sapling_payment_output_count INTEGER, \
                     sapling_payment_time TIMESTAMP)",
                    self.sapling_payments_table()
                ));
            },
            Asset::Pivx => {
                for (table, stem) in [
                    (self.zerocoin_mints_table(), "zerocoin_mint"),
                    (self.zerocoin_spends_table(), "zerocoin_spend"),
                ] {
                    statements.push(format!(
                        "CREATE TABLE IF NOT EXISTS {table} (\
                         id SERIAL PRIMARY KEY, \
                         {stem}_tx_hash DECIMAL({hash}), \
                         {stem}_value DECIMAL({value}), \
                         {stem}_time TIMESTAMP)"
                    ));
                }
            },
            Asset::Dcr => {
                let transactions = self.transactions_table();
                statements.push(format!(
                    "ALTER TABLE {transactions} ADD COLUMN IF NOT EXISTS tx_vote BOOLEAN"
                ));
                statements.push(format!(
                    "ALTER TABLE {transactions} ADD COLUMN IF NOT EXISTS tx_ticket BOOLEAN"
                ));
            },
            _ => {},
        }
        statements
    }

    /// (index name, table, column)
    fn indexes(&self) -> Vec<(String, String, String)> {
        let a = self.asset;
        if a == Asset::Omni {
            return OmniKind::ALL
                .iter()
                .map(|kind| {
                    (
                        format!("{}_tx_time_index_omni", kind.prefix()),
                        kind.table_name(),
                        omni_column(*kind, "time"),
                    )
                })
                .collect();
        }

        let mut indexes = vec![
            (format!("{a}_block_time_index"), self.blocks_table(), "block_time".to_string()),
            (format!("{a}_block_height_index"), self.blocks_table(), "block_height".to_string()),
            (format!("{a}_tx_time_index"), self.transactions_table(), "tx_time".to_string()),
            (
                format!("{a}_output_time_spent_index"),
                self.outputs_table(),
                "output_time_spent".to_string(),
            ),
            (
                format!("{a}_output_time_created_index"),
                self.outputs_table(),
                "output_time_created".to_string(),
            ),
        ];
        match a {
            Asset::Zec => {
                indexes.push((
                    format!("{a}_joinsplit_time_index"),
                    self.joinsplits_table(),
                    "joinsplit_time".to_string(),
                ));
                indexes.push((
                    format!("{a}_sapling_payment_time_index"),
                    self.sapling_payments_table(),
                    "sapling_payment_time".to_string(),
                ));
            },
            Asset::Pivx => {
                indexes.push((
                    format!("{a}_zerocoin_mint_time_index"),
                    self.zerocoin_mints_table(),
                    "zerocoin_mint_time".to_string(),
                ));
                indexes.push((
                    format!("{a}_zerocoin_spend_time_index"),
                    self.zerocoin_spends_table(),
                    "zerocoin_spend_time".to_string(),
                ));
            },
            _ => {},
        }
        indexes
    }

    pub fn add_index_statements(&self) -> Vec<String> {
        self.indexes()
            .into_iter()
            .map(|(name, table, column)| {
                format!("CREATE INDEX IF NOT EXISTS {name} ON {table}({column})")
            })
            .collect()
    }

    pub fn drop_index_statements(&self) -> Vec<String> {
        self.indexes()
            .into_iter()
            .rev()
            .map(|(name, _, _)| format!("DROP INDEX IF EXISTS {name}"))
            .collect()
    }

    /// Dependent tables first
    pub fn drop_statements(&self) -> Vec<String> {
        let tables = if self.asset == Asset::Omni {
            let mut tables: Vec<String> = OmniKind::ALL.iter().map(|k| k.table_name()).collect();
            tables.push(OMNI_BLOCKS_TABLE.to_string());
            tables
        } else {
            let mut tables = match self.asset {
                Asset::Zec => vec![self.sapling_payments_table(), self.joinsplits_table()],
                Asset::Pivx => vec![self.zerocoin_spends_table(), self.zerocoin_mints_table()],
                _ => Vec::new(),
            };
            tables.extend([
                self.coinbase_scripts_table(),
                self.outputs_table(),
                self.transactions_table(),
                self.blocks_table(),
            ]);
            tables
        };

        let mut statements = self.drop_index_statements();
        statements.extend(tables.into_iter().map(|t| format!("DROP TABLE IF EXISTS {t}")));
        statements
    }

    pub fn vacuum_statements(&self) -> Vec<String> {
        if self.asset == Asset::Omni {
            return OmniKind::ALL
                .iter()
                .map(|k| format!("VACUUM ANALYZE {}", k.table_name()))
                .collect();
        }
        vec![format!("VACUUM ANALYZE {}", self.outputs_table())]
    }

    pub fn statements(&self, op: SchemaOp) -> Vec<String> {
        match op {
            SchemaOp::Create => self.create_statements(),
            SchemaOp::Drop => self.drop_statements(),
            SchemaOp::AddIndexes => self.add_index_statements(),
            SchemaOp::DropIndexes => self.drop_index_statements(),
            SchemaOp::Vacuum => self.vacuum_statements(),
        }
    }

    /// Run a setup operation. Statements run outside a transaction since
    /// `VACUUM` refuses to run inside one.
    pub async fn apply(&self, pool: &PgPool, op: SchemaOp) -> Result<()> {
        info!(asset = %self.asset, ?op, "Applying schema operation");
        for statement in self.statements(op) {
            sqlx::query(&statement).execute(pool).await?;
        }
        Ok(())
    }
}

pub(crate) fn omni_column(kind: OmniKind, column: &str) -> String {
    format!("{}_tx_{column}", kind.prefix())
}

/// Every Omni record table shares one column set; kind-specific columns
/// stay NULL where they do not apply.
fn omni_create_statements() -> Vec<String> {
    let hash = HASH_PRECISION_DIGITS;
    let value = VALUE_PRECISION_DIGITS;
    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {OMNI_BLOCKS_TABLE} (\
         block_hash DECIMAL({hash}) PRIMARY KEY, \
         block_height BIGINT)"
    )];

    for kind in OmniKind::ALL {
        let c = |column: &str| omni_column(kind, column);
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             {tx_hash} DECIMAL({hash}), \
             {index} INTEGER, \
             {block_hash} DECIMAL({hash}) REFERENCES {OMNI_BLOCKS_TABLE}(block_hash) ON DELETE CASCADE, \
             {time} TIMESTAMP, \
             {sending} VARCHAR({MAX_ADDRESS_LENGTH}), \
             {receiving} VARCHAR({MAX_ADDRESS_LENGTH}), \
             {property_id} BIGINT, \
             {amount} DECIMAL({value}), \
             {fee} DECIMAL({value}), \
             {fee_required} DECIMAL({value}), \
             {bitcoin_desired} DECIMAL({value}), \
             {action} SMALLINT, \
             {property_type} SMALLINT, \
             {tokens_per_unit} DECIMAL({value}), \
             {deadline} TIMESTAMP, \
             {early_bonus} BIGINT, \
             {percent_to_issuer} BIGINT, \
             {amount_paid} DECIMAL({value}), \
             PRIMARY KEY ({tx_hash}, {index}))",
            table = kind.table_name(),
            tx_hash = c("hash"),
            index = c("index"),
            block_hash = c("block_hash"),
            time = c("time"),
            sending = c("sending_address"),
            receiving = c("receiving_address"),
            property_id = c("property_id"),
            amount = c("amount"),
            fee = c("fee"),
            fee_required = c("fee_required"),
            bitcoin_desired = c("bitcoin_desired"),
            action = c("action"),
            property_type = c("property_type"),
            tokens_per_unit = c("tokens_per_unit"),
            deadline = c("deadline"),
            early_bonus = c("early_bonus"),
            percent_to_issuer = c("percent_to_issuer"),
            amount_paid = c("amount_paid"),
        ));
    }
    statements
}
