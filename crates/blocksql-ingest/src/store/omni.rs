//! PostgreSQL sink for Omni layer blocks

use super::schema::{omni_column, OMNI_BLOCKS_TABLE};
use super::{int8, numeric_u128, BlockSink, Result, StoreCounts, StoreError, DEFAULT_STORE_BATCH_SIZE};
use crate::model::omni::{OmniBlock, OmniDetails, OmniKind, OmniRecord};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::types::BigDecimal;
use sqlx::{PgPool, Postgres, QueryBuilder};

const COLUMNS: [&str; 18] = [
    "hash",
    "index",
    "block_hash",
    "time",
    "sending_address",
    "receiving_address",
    "property_id",
    "amount",
    "fee",
    "fee_required",
    "bitcoin_desired",
    "action",
    "property_type",
    "tokens_per_unit",
    "deadline",
    "early_bonus",
    "percent_to_issuer",
    "amount_paid",
];

fn optional_numeric(value: Option<u128>) -> Option<BigDecimal> {
    value.map(numeric_u128)
}

struct RecordRow {
    tx_hash: BigDecimal,
    index: i32,
    time: NaiveDateTime,
    sending_address: String,
    receiving_address: Option<String>,
    property_id: i64,
    amount: Option<BigDecimal>,
    fee: Option<BigDecimal>,
    fee_required: Option<BigDecimal>,
    bitcoin_desired: Option<BigDecimal>,
    action: Option<i16>,
    property_type: Option<i16>,
    tokens_per_unit: Option<BigDecimal>,
    deadline: Option<NaiveDateTime>,
    early_bonus: Option<i64>,
    percent_to_issuer: Option<i64>,
    amount_paid: Option<BigDecimal>,
}

impl RecordRow {
    fn new(record: &OmniRecord) -> Result<Self> {
        let mut row = RecordRow {
            tx_hash: record.tx_hash.to_numeric(),
            index: i32::try_from(record.sub_index).map_err(|_| StoreError::Range {
                column: "tx_index",
                value: record.sub_index.to_string(),
            })?,
            time: record.time.naive_utc(),
            sending_address: record.sending_address.clone(),
            receiving_address: record.receiving_address.clone(),
            property_id: record.property_id,
            amount: optional_numeric(record.amount),
            fee: optional_numeric(record.fee),
            fee_required: None,
            bitcoin_desired: None,
            action: None,
            property_type: None,
            tokens_per_unit: None,
            deadline: None,
            early_bonus: None,
            percent_to_issuer: None,
            amount_paid: None,
        };

        match &record.details {
            OmniDetails::None => {},
            OmniDetails::SellForBitcoin {
                fee_required,
                bitcoin_desired,
                action,
            } => {
                row.fee_required = Some(numeric_u128(*fee_required));
                row.bitcoin_desired = Some(numeric_u128(*bitcoin_desired));
                row.action = Some(*action as i16);
            },
            OmniDetails::Property { property_type } => {
                row.property_type = Some(*property_type as i16);
            },
            OmniDetails::Crowdsale {
                property_type,
                tokens_per_unit,
                deadline,
                early_bonus,
                percent_to_issuer,
            } => {
                row.property_type = Some(*property_type as i16);
                row.tokens_per_unit = Some(numeric_u128(*tokens_per_unit));
                row.deadline = Some(deadline.naive_utc());
                row.early_bonus = Some(*early_bonus);
                row.percent_to_issuer = Some(*percent_to_issuer);
            },
            OmniDetails::DexPurchase { amount_paid } => {
                row.amount_paid = Some(numeric_u128(*amount_paid));
            },
        }
        Ok(row)
    }
}

/// Writes each Omni record kind into its own table
#[derive(Clone)]
pub struct OmniStore {
    pool: PgPool,
    batch_size: usize,
}

impl OmniStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_STORE_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[async_trait]
impl BlockSink<OmniBlock> for OmniStore {
    async fn stored_height(&self) -> Result<Option<u64>> {
        let sql = format!("SELECT MAX(block_height) FROM {OMNI_BLOCKS_TABLE}");
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

    async fn store_block(&self, block: &OmniBlock) -> Result<StoreCounts> {
        let block_hash = block.hash.to_numeric();
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO {OMNI_BLOCKS_TABLE} (block_hash, block_height) VALUES ($1, $2)"
        ))
        .bind(block_hash.clone())
        .bind(int8("block_height", block.height)?)
        .execute(&mut *tx)
        .await?;

        let mut stored = 0;
        for kind in OmniKind::ALL {
            let rows = block
                .records_of(kind)
                .map(RecordRow::new)
                .collect::<Result<Vec<_>>>()?;
            if rows.is_empty() {
                continue;
            }

            let columns: Vec<String> = COLUMNS.iter().map(|c| omni_column(kind, c)).collect();
            for chunk in rows.chunks(self.batch_size) {
                let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                    "INSERT INTO {} ({}) ",
                    kind.table_name(),
                    columns.join(", ")
                ));
                query_builder.push_values(chunk, |mut b, row| {
                    b.push_bind(row.tx_hash.clone())
                        .push_bind(row.index)
                        .push_bind(block_hash.clone())
                        .push_bind(row.time)
                        .push_bind(row.sending_address.clone())
                        .push_bind(row.receiving_address.clone())
                        .push_bind(row.property_id)
                        .push_bind(row.amount.clone())
                        .push_bind(row.fee.clone())
                        .push_bind(row.fee_required.clone())
                        .push_bind(row.bitcoin_desired.clone())
                        .push_bind(row.action)
                        .push_bind(row.property_type)
                        .push_bind(row.tokens_per_unit.clone())
                        .push_bind(row.deadline)
                        .push_bind(row.early_bonus)
                        .push_bind(row.percent_to_issuer)
                        .push_bind(row.amount_paid.clone());
                });
                query_builder.build().execute(&mut *tx).await?;
            }
            stored += rows.len();
        }

        tx.commit().await?;

        Ok(StoreCounts {
            transactions: stored,
            ..StoreCounts::default()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::omni::{PropertyType, SellAction};
    use crate::model::Hash256;
    use chrono::{TimeZone, Utc};

    fn record(details: OmniDetails) -> OmniRecord {
        OmniRecord {
            kind: OmniKind::SellForBitcoin,
            tx_hash: Hash256::from_hex("ff").unwrap(),
            sub_index: 0,
            time: Utc.with_ymd_and_hms(2017, 3, 1, 12, 0, 0).unwrap(),
            property_id: 31,
            sending_address: "1Sender".to_string(),
            receiving_address: None,
            amount: Some(500),
            fee: Some(1000),
            details,
        }
    }

    #[test]
    fn test_sell_details_fill_their_columns() {
        let row = RecordRow::new(&record(OmniDetails::SellForBitcoin {
            fee_required: 10,
            bitcoin_desired: 20,
            action: SellAction::Cancel,
        }))
        .unwrap();
        assert_eq!(row.tx_hash.to_string(), "255");
        assert_eq!(row.action, Some(3));
        assert_eq!(row.bitcoin_desired.unwrap().to_string(), "20");
        assert!(row.property_type.is_none());
        assert!(row.deadline.is_none());
    }

    #[test]
    fn test_crowdsale_details() {
        let deadline = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap();
        let row = RecordRow::new(&record(OmniDetails::Crowdsale {
            property_type: PropertyType::Divisible,
            tokens_per_unit: 100,
            deadline,
            early_bonus: 10,
            percent_to_issuer: 5,
        }))
        .unwrap();
        assert_eq!(row.property_type, Some(2));
        assert_eq!(row.deadline, Some(deadline.naive_utc()));
        assert!(row.amount_paid.is_none());
    }

    #[test]
    fn test_column_names() {
        assert_eq!(omni_column(OmniKind::GrantTokens, COLUMNS[0]), "grant_tokens_tx_hash");
        assert_eq!(omni_column(OmniKind::DexPurchase, COLUMNS[17]), "dex_purchase_tx_amount_paid");
    }
}
