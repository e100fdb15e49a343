//! Metric catalogue and the SQL behind each daily metric
//!
//! Every statement takes the day window as `$1` (inclusive start) and `$2`
//! (exclusive end) and returns a single NUMERIC. A metric's value is its base
//! statement plus or minus any variant adjustments.

use crate::store::Schema;
use blocksql_common::Asset;

/// Outputs spent sooner than this after creation are left out of the
/// heuristic volume
pub const HEURISTIC_HOLD_SECS: u32 = 2400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DailyMetric {
    AverageDifficulty,
    TxCount,
    TxVolume,
    MedianTxValue,
    ActiveAddresses,
    Fees,
    MedianFee,
    PaymentCount,
    Reward,
    BlockSize,
    HeuristicVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Computed from the day's own data
    Daily(DailyMetric),
    /// Previous day's value plus the day's delta
    ActiveSupply { days: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricGroup {
    Default,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    pub name: &'static str,
    pub kind: MetricKind,
    pub group: MetricGroup,
}

const fn daily(name: &'static str, metric: DailyMetric) -> MetricDef {
    MetricDef {
        name,
        kind: MetricKind::Daily(metric),
        group: MetricGroup::Default,
    }
}

/// Registry order is the processing order within a date
pub const REGISTRY: [MetricDef; 13] = [
    daily("average_difficulty", DailyMetric::AverageDifficulty),
    daily("tx_count", DailyMetric::TxCount),
    daily("tx_volume", DailyMetric::TxVolume),
    daily("median_tx_value", DailyMetric::MedianTxValue),
    daily("active_addresses", DailyMetric::ActiveAddresses),
    daily("fees", DailyMetric::Fees),
    daily("median_fee", DailyMetric::MedianFee),
    daily("payment_count", DailyMetric::PaymentCount),
    daily("reward", DailyMetric::Reward),
    daily("block_size", DailyMetric::BlockSize),
    MetricDef {
        name: "active_supply_30d",
        kind: MetricKind::ActiveSupply { days: 30 },
        group: MetricGroup::Default,
    },
    MetricDef {
        name: "active_supply_365d",
        kind: MetricKind::ActiveSupply { days: 365 },
        group: MetricGroup::Default,
    },
    MetricDef {
        name: "heuristical_volume",
        kind: MetricKind::Daily(DailyMetric::HeuristicVolume),
        group: MetricGroup::Heuristic,
    },
];

pub fn lookup(name: &str) -> Option<&'static MetricDef> {
    REGISTRY.iter().find(|def| def.name == name)
}

pub fn group(group: MetricGroup) -> impl Iterator<Item = &'static MetricDef> {
    REGISTRY.iter().filter(move |def| def.group == group)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

/// Base statement plus signed adjustments
#[derive(Debug, Clone)]
pub struct MetricSql {
    pub base: String,
    pub adjustments: Vec<(Sign, String)>,
}

impl MetricSql {
    fn plain(base: String) -> Self {
        Self {
            base,
            adjustments: Vec::new(),
        }
    }

    fn with(mut self, sign: Sign, sql: String) -> Self {
        self.adjustments.push((sign, sql));
        self
    }
}

/// Extra per-transaction amounts taken from a side table (`x(value, tx_hash)`)
struct SideAmounts {
    cte: String,
    sign: Sign,
}

/// Statement builder for one asset
struct Sql {
    blocks: String,
    transactions: String,
    outputs: String,
    schema: Schema,
}

impl Sql {
    fn new(asset: Asset) -> Self {
        let schema = Schema::new(asset);
        Self {
            blocks: schema.blocks_table(),
            transactions: schema.transactions_table(),
            outputs: schema.outputs_table(),
            schema,
        }
    }

    /// `t`: transactions of the day matching `condition`
    fn t_where(&self, condition: &str) -> String {
        format!(
            "t AS (SELECT tx_hash FROM {} \
             WHERE tx_time >= $1 AND tx_time < $2 AND {condition})",
            self.transactions
        )
    }

    fn t(&self, coinbase: bool, filter: &str) -> String {
        self.t_where(&format!("tx_coinbase = {coinbase}{filter}"))
    }

    /// `o`: outputs created during the day
    fn o(&self, condition: &str) -> String {
        format!(
            "o AS (SELECT output_tx_hash, output_index, output_value_satoshi, output_addresses \
             FROM {} WHERE output_time_created >= $1 AND output_time_created < $2{condition})",
            self.outputs
        )
    }

    /// `i`: outputs spent during the day
    fn i(&self) -> String {
        format!(
            "i AS (SELECT output_spending_tx_hash, output_value_satoshi, output_addresses \
             FROM {} WHERE output_time_spent >= $1 AND output_time_spent < $2)",
            self.outputs
        )
    }

    /// `change`: outputs paying back to an address of the spending inputs
    fn change() -> &'static str {
        "change AS (SELECT DISTINCT o.output_tx_hash, o.output_index FROM o JOIN i \
         ON o.output_tx_hash = i.output_spending_tx_hash \
         AND o.output_addresses && i.output_addresses)"
    }

    fn average_difficulty(&self) -> String {
        format!(
            "SELECT AVG(block_difficulty)::NUMERIC FROM {} \
             WHERE block_time >= $1 AND block_time < $2",
            self.blocks
        )
    }

    fn block_size(&self) -> String {
        format!(
            "SELECT COALESCE(SUM(block_size), 0)::NUMERIC FROM {} \
             WHERE block_time >= $1 AND block_time < $2",
            self.blocks
        )
    }

    fn tx_count(&self, filter: &str) -> String {
        format!(
            "SELECT COUNT(*)::NUMERIC FROM {} \
             WHERE tx_coinbase = false{filter} AND tx_time >= $1 AND tx_time < $2",
            self.transactions
        )
    }

    fn volume(&self, filter: &str, heuristic: bool) -> String {
        let mut condition = " AND output_type > 1".to_string();
        if heuristic {
            condition.push_str(&format!(
                " AND (output_time_spent IS NULL OR \
                 EXTRACT(EPOCH FROM (output_time_spent - output_time_created)) > {HEURISTIC_HOLD_SECS})"
            ));
        }
        format!(
            "WITH {}, {}, {}, {} \
             SELECT COALESCE(SUM(o.output_value_satoshi), 0)::NUMERIC \
             FROM o JOIN t ON o.output_tx_hash = t.tx_hash \
             LEFT JOIN change c ON o.output_tx_hash = c.output_tx_hash \
             AND o.output_index = c.output_index \
             WHERE c.output_tx_hash IS NULL",
            self.o(&condition),
            self.i(),
            self.t(false, filter),
            Self::change()
        )
    }

    fn active_addresses(&self) -> String {
        format!(
            "SELECT COUNT(DISTINCT address)::NUMERIC FROM (\
             SELECT unnest(output_addresses) AS address FROM {outputs} \
             WHERE output_time_created >= $1 AND output_time_created < $2 \
             UNION ALL \
             SELECT unnest(output_addresses) AS address FROM {outputs} \
             WHERE output_time_spent >= $1 AND output_time_spent < $2) active_addresses",
            outputs = self.outputs
        )
    }

    fn fees(&self, filter: &str) -> String {
        format!(
            "WITH {}, {}, {}, \
             volume_o AS (SELECT SUM(o.output_value_satoshi) v FROM o JOIN t ON t.tx_hash = o.output_tx_hash), \
             volume_i AS (SELECT SUM(i.output_value_satoshi) v FROM i JOIN t ON t.tx_hash = i.output_spending_tx_hash) \
             SELECT (COALESCE(volume_i.v, 0) - COALESCE(volume_o.v, 0))::NUMERIC \
             FROM volume_o CROSS JOIN volume_i",
            self.o(""),
            self.i(),
            self.t(false, filter)
        )
    }

    /// Per-transaction fee is inputs minus outputs, plus signed side amounts
    fn median_fee(&self, filter: &str, sides: &[SideAmounts]) -> String {
        let mut ctes = vec![self.o(""), self.i(), self.t(false, filter)];
        let mut parts = vec![
            "SELECT -SUM(o.output_value_satoshi) AS amount, t.tx_hash \
             FROM t JOIN o ON t.tx_hash = o.output_tx_hash GROUP BY t.tx_hash"
                .to_string(),
            "SELECT SUM(i.output_value_satoshi) AS amount, t.tx_hash \
             FROM t JOIN i ON t.tx_hash = i.output_spending_tx_hash GROUP BY t.tx_hash"
                .to_string(),
        ];
        for (n, side) in sides.iter().enumerate() {
            let name = format!("x{n}");
            ctes.push(format!("{name} AS ({})", side.cte));
            let sign = if side.sign == Sign::Minus { "-" } else { "" };
            parts.push(format!(
                "SELECT {sign}SUM({name}.value) AS amount, t.tx_hash \
                 FROM t JOIN {name} ON t.tx_hash = {name}.tx_hash GROUP BY t.tx_hash"
            ));
        }
        format!(
            "WITH {}, amounts AS ({}), \
             fees AS (SELECT COALESCE(SUM(amount), 0) AS fee FROM amounts GROUP BY tx_hash) \
             SELECT (percentile_cont(0.5) WITHIN GROUP (ORDER BY fee))::NUMERIC FROM fees",
            ctes.join(", "),
            parts.join(" UNION ALL ")
        )
    }

    /// Per-transaction value is non-change outputs plus an optional side amount
    fn median_tx_value(&self, filter: &str, side: Option<&SideAmounts>) -> String {
        let mut ctes = vec![
            self.o(""),
            self.i(),
            self.t(false, filter),
            Self::change().to_string(),
            "so AS (SELECT SUM(o.output_value_satoshi) AS amount, t.tx_hash \
             FROM t JOIN o ON t.tx_hash = o.output_tx_hash \
             LEFT JOIN change c ON o.output_tx_hash = c.output_tx_hash \
             AND o.output_index = c.output_index \
             WHERE c.output_tx_hash IS NULL GROUP BY t.tx_hash)"
                .to_string(),
        ];
        let total = match side {
            None => "SELECT amount AS total FROM so".to_string(),
            Some(side) => {
                ctes.push(format!("x AS ({})", side.cte));
                ctes.push(
                    "sx AS (SELECT SUM(x.value) AS amount, t.tx_hash \
                     FROM t JOIN x ON t.tx_hash = x.tx_hash GROUP BY t.tx_hash)"
                        .to_string(),
                );
                "SELECT COALESCE(so.amount, 0) + COALESCE(sx.amount, 0) AS total \
                 FROM so FULL OUTER JOIN sx ON so.tx_hash = sx.tx_hash"
                    .to_string()
            },
        };
        format!(
            "WITH {}, totals AS ({total}) \
             SELECT (percentile_cont(0.5) WITHIN GROUP (ORDER BY total))::NUMERIC FROM totals",
            ctes.join(", ")
        )
    }

    /// Outputs beyond the first per transaction, side records counting as outputs
    fn payment_count(&self, filter: &str, side: Option<&SideAmounts>) -> String {
        let mut ctes = vec![
            self.o(" AND output_type > 1"),
            self.t(false, filter),
            "so AS (SELECT COUNT(*) AS payments, t.tx_hash \
             FROM t JOIN o ON t.tx_hash = o.output_tx_hash GROUP BY t.tx_hash)"
                .to_string(),
        ];
        let totals = match side {
            None => "SELECT GREATEST(payments - 1, 0) AS payments FROM so".to_string(),
            Some(side) => {
                ctes.push(format!("x AS ({})", side.cte));
                ctes.push(
                    "sx AS (SELECT COUNT(*) AS payments, t.tx_hash \
                     FROM t JOIN x ON t.tx_hash = x.tx_hash GROUP BY t.tx_hash)"
                        .to_string(),
                );
                "SELECT GREATEST(COALESCE(so.payments, 0) + COALESCE(sx.payments, 0) - 1, 0) \
                 AS payments FROM so FULL OUTER JOIN sx ON so.tx_hash = sx.tx_hash"
                    .to_string()
            },
        };
        format!(
            "WITH {}, totals AS ({totals}) \
             SELECT COALESCE(SUM(payments), 0)::NUMERIC FROM totals",
            ctes.join(", ")
        )
    }

    /// Value created by the day's transactions matching `condition`
    fn created_by(&self, condition: &str) -> String {
        format!(
            "WITH {}, {} SELECT SUM(o.output_value_satoshi)::NUMERIC \
             FROM t JOIN o ON t.tx_hash = o.output_tx_hash",
            self.t_where(condition),
            self.o("")
        )
    }

    /// Value spent by the day's transactions matching `condition`
    fn spent_by(&self, condition: &str) -> String {
        format!(
            "WITH {}, {} SELECT COALESCE(SUM(i.output_value_satoshi), 0)::NUMERIC \
             FROM t JOIN i ON t.tx_hash = i.output_spending_tx_hash",
            self.t_where(condition),
            self.i()
        )
    }

    fn joinsplits(&self, value: &str) -> SideAmounts {
        SideAmounts {
            cte: format!(
                "SELECT {value} AS value, joinsplit_tx_hash AS tx_hash FROM {} \
                 WHERE joinsplit_time >= $1 AND joinsplit_time < $2",
                self.schema.joinsplits_table()
            ),
            sign: Sign::Plus,
        }
    }

    fn zerocoin(&self, stem: &str, table: String, sign: Sign) -> SideAmounts {
        SideAmounts {
            cte: format!(
                "SELECT {stem}_value AS value, {stem}_tx_hash AS tx_hash FROM {table} \
                 WHERE {stem}_time >= $1 AND {stem}_time < $2"
            ),
            sign,
        }
    }

    fn zerocoin_mints(&self) -> SideAmounts {
        self.zerocoin("zerocoin_mint", self.schema.zerocoin_mints_table(), Sign::Minus)
    }

    fn zerocoin_spends(&self) -> SideAmounts {
        self.zerocoin("zerocoin_spend", self.schema.zerocoin_spends_table(), Sign::Plus)
    }

    /// Side amounts belonging to transactions of one class
    fn side_total(&self, side: &SideAmounts, coinbase: bool) -> String {
        format!(
            "WITH {}, x AS ({}) SELECT COALESCE(SUM(x.value), 0)::NUMERIC \
             FROM x JOIN t ON x.tx_hash = t.tx_hash",
            self.t(coinbase, ""),
            side.cte
        )
    }
}

const DCR_NO_VOTES: &str = " AND tx_vote = false";
const DCR_NO_VOTES_TICKETS: &str = " AND tx_vote = false AND tx_ticket = false";

/// Statements computing `metric` for `asset`
pub fn sql_for(asset: Asset, metric: DailyMetric) -> MetricSql {
    let sql = Sql::new(asset);
    let (votes, votes_tickets) = if asset == Asset::Dcr {
        (DCR_NO_VOTES, DCR_NO_VOTES_TICKETS)
    } else {
        ("", "")
    };

    match (asset, metric) {
        (_, DailyMetric::AverageDifficulty) => MetricSql::plain(sql.average_difficulty()),
        (_, DailyMetric::BlockSize) => MetricSql::plain(sql.block_size()),
        (_, DailyMetric::ActiveAddresses) => MetricSql::plain(sql.active_addresses()),
        (_, DailyMetric::HeuristicVolume) => MetricSql::plain(sql.volume("", true)),
        (_, DailyMetric::TxCount) => MetricSql::plain(sql.tx_count(votes)),

        (Asset::Zec, DailyMetric::TxVolume) => MetricSql::plain(sql.volume("", false)).with(
            Sign::Plus,
            format!(
                "SELECT COALESCE(SUM(-LEAST(joinsplit_value_new - joinsplit_value_old, 0)), 0)::NUMERIC \
                 FROM {} WHERE joinsplit_time >= $1 AND joinsplit_time < $2",
                sql.schema.joinsplits_table()
            ),
        ),
        (Asset::Pivx, DailyMetric::TxVolume) => MetricSql::plain(sql.volume("", false))
            .with(Sign::Plus, sql.side_total(&sql.zerocoin_mints(), false)),
        (_, DailyMetric::TxVolume) => MetricSql::plain(sql.volume(votes_tickets, false)),

        (Asset::Zec, DailyMetric::Fees) => MetricSql::plain(sql.fees("")).with(
            Sign::Plus,
            format!(
                "SELECT COALESCE(SUM(joinsplit_value_new) - SUM(joinsplit_value_old), 0)::NUMERIC \
                 FROM {} WHERE joinsplit_time >= $1 AND joinsplit_time < $2",
                sql.schema.joinsplits_table()
            ),
        ),
        (Asset::Pivx, DailyMetric::Fees) => MetricSql::plain(sql.fees(""))
            .with(Sign::Minus, sql.side_total(&sql.zerocoin_mints(), false))
            .with(Sign::Plus, sql.side_total(&sql.zerocoin_spends(), false)),
        (_, DailyMetric::Fees) => MetricSql::plain(sql.fees(votes)),

        (Asset::Zec, DailyMetric::MedianFee) => MetricSql::plain(sql.median_fee(
            "",
            &[sql.joinsplits("joinsplit_value_new - joinsplit_value_old")],
        )),
        (Asset::Pivx, DailyMetric::MedianFee) => MetricSql::plain(
            sql.median_fee("", &[sql.zerocoin_spends(), sql.zerocoin_mints()]),
        ),
        (_, DailyMetric::MedianFee) => MetricSql::plain(sql.median_fee(votes, &[])),

        (Asset::Zec, DailyMetric::MedianTxValue) => MetricSql::plain(sql.median_tx_value(
            "",
            Some(&sql.joinsplits("-LEAST(joinsplit_value_new - joinsplit_value_old, 0)")),
        )),
        (Asset::Pivx, DailyMetric::MedianTxValue) => {
            MetricSql::plain(sql.median_tx_value("", Some(&sql.zerocoin_mints())))
        },
        (_, DailyMetric::MedianTxValue) => {
            MetricSql::plain(sql.median_tx_value(votes_tickets, None))
        },

        (Asset::Pivx, DailyMetric::PaymentCount) => {
            MetricSql::plain(sql.payment_count("", Some(&sql.zerocoin_mints())))
        },
        (_, DailyMetric::PaymentCount) => MetricSql::plain(sql.payment_count(votes_tickets, None)),

        (Asset::Pivx, DailyMetric::Reward) => MetricSql::plain(sql.created_by("tx_coinbase = true"))
            .with(Sign::Minus, sql.spent_by("tx_coinbase = true"))
            .with(Sign::Plus, sql.side_total(&sql.zerocoin_mints(), true))
            .with(Sign::Minus, sql.side_total(&sql.zerocoin_spends(), true)),
        (Asset::Dcr, DailyMetric::Reward) => MetricSql::plain(sql.created_by("tx_coinbase = true"))
            .with(Sign::Plus, sql.created_by("tx_vote = true"))
            .with(Sign::Minus, sql.spent_by("tx_vote = true")),
        (_, DailyMetric::Reward) => MetricSql::plain(sql.created_by("tx_coinbase = true")),
    }
}
