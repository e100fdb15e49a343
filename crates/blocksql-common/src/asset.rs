//! Catalogue of supported ledgers

use crate::error::BlocksqlError;
use serde::{Deserialize, Serialize};

const SECONDS_PER_WEEK: u64 = 7 * 24 * 3600;

/// A ledger the exporter knows how to ingest.
///
/// Most variants are members of the bitcoin family and share one canonical
/// table layout; `Omni` is the sub-token layer riding on top of bitcoin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Asset {
    Btc,
    Ltc,
    Vtc,
    Dash,
    Doge,
    Zec,
    Dgb,
    Xvg,
    Pivx,
    Dcr,
    Bch,
    Btg,
    Omni,
}

impl Asset {
    /// Every supported asset, in catalogue order
    pub const ALL: [Asset; 13] = [
        Asset::Btc,
        Asset::Ltc,
        Asset::Vtc,
        Asset::Dash,
        Asset::Doge,
        Asset::Zec,
        Asset::Dgb,
        Asset::Xvg,
        Asset::Pivx,
        Asset::Dcr,
        Asset::Bch,
        Asset::Btg,
        Asset::Omni,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::Btc => "btc",
            Asset::Ltc => "ltc",
            Asset::Vtc => "vtc",
            Asset::Dash => "dash",
            Asset::Doge => "doge",
            Asset::Zec => "zec",
            Asset::Dgb => "dgb",
            Asset::Xvg => "xvg",
            Asset::Pivx => "pivx",
            Asset::Dcr => "dcr",
            Asset::Bch => "bch",
            Asset::Btg => "btg",
            Asset::Omni => "omni",
        }
    }

    /// Target block interval in seconds
    pub fn block_time_secs(&self) -> u64 {
        match self {
            Asset::Btc | Asset::Bch | Asset::Btg | Asset::Omni => 600,
            Asset::Ltc | Asset::Vtc | Asset::Zec | Asset::Dcr => 150,
            Asset::Dash => 160,
            Asset::Doge | Asset::Pivx => 60,
            Asset::Xvg => 30,
            Asset::Dgb => 15,
        }
    }

    /// Number of trailing blocks covered by a confirmation lag expressed in seconds
    pub fn block_lag(&self, lag_secs: u64) -> u64 {
        lag_secs / self.block_time_secs()
    }

    /// Expected number of blocks produced in one week
    pub fn blocks_per_week(&self) -> u64 {
        SECONDS_PER_WEEK / self.block_time_secs()
    }

    /// Whether the asset is stored in the canonical UTXO tables
    pub fn is_utxo(&self) -> bool {
        !matches!(self, Asset::Omni)
    }
}

impl std::str::FromStr for Asset {
    type Err = BlocksqlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Asset::ALL
            .iter()
            .copied()
            .find(|asset| asset.as_str() == lowered)
            .ok_or_else(|| BlocksqlError::UnknownAsset(s.to_string()))
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_from_str() {
        assert_eq!("btc".parse::<Asset>().unwrap(), Asset::Btc);
        assert_eq!("DCR".parse::<Asset>().unwrap(), Asset::Dcr);
        assert_eq!(" pivx ".parse::<Asset>().unwrap(), Asset::Pivx);
        assert!(matches!(
            "xmr".parse::<Asset>(),
            Err(BlocksqlError::UnknownAsset(_))
        ));
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for asset in Asset::ALL {
            assert_eq!(asset.to_string().parse::<Asset>().unwrap(), asset);
        }
    }

    #[test]
    fn test_block_lag_uses_block_time() {
        assert_eq!(Asset::Btc.block_lag(7200), 12);
        assert_eq!(Asset::Dgb.block_lag(7200), 480);
        assert_eq!(Asset::Dash.block_lag(7200), 45);
    }

    #[test]
    fn test_blocks_per_week() {
        assert_eq!(Asset::Btc.blocks_per_week(), 1008);
        assert_eq!(Asset::Pivx.blocks_per_week(), 10080);
    }

    #[test]
    fn test_omni_is_not_utxo() {
        assert!(!Asset::Omni.is_utxo());
        assert!(Asset::Zec.is_utxo());
    }
}
