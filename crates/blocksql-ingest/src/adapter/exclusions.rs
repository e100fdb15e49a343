//! Transactions the exporter must skip
//!
//! Some ledgers contain duplicate coinbase txids (BIP 30) or transactions the
//! node cannot describe. Built-in defaults cover the known cases; a TOML file
//! can replace them:
//!
//! ```toml
//! [[transaction]]
//! hash = "d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599"
//! height = 91842
//!
//! [[transaction]]
//! hash = "f3b0e919ccac9b78b7fb15cb3e5e1f93f7dc0ed05080de3e8d67577f38b2c03d"
//! ```
//!
//! An entry without `height` is skipped wherever it appears.

use blocksql_common::{Asset, BlocksqlError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

const BTC_DUPLICATES: [(&str, u64); 2] = [
    (
        "d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599",
        91842,
    ),
    (
        "e3bf3d07d4b0375638d5f1db5255fe07ba2c4cb067cd81b84ee974b6585fb468",
        91880,
    ),
];

const DCR_DUPLICATES: [(&str, u64); 10] = [
    ("752db9a8fa003bb7fbacad57627001973b6b95500cb0aab0dfe406483467ac10", 83822),
    ("8521fb31190eacd9aaf4b27862ef88e55c6a6de8b66f241733800ddaa0b27e1b", 83912),
    ("0042f3ec6660fdfb566bec6147d28e277d04c9b117d9f656f433d14b6c00167b", 83912),
    ("1593791a34585557554ec85e49e39afda330dd745e7a82fc0efb0003bfae71a9", 83912),
    ("d075e4a96ffb0cae0be81ad9c9e3a77ad491d1586a61a533a48460891317fb73", 83912),
    ("cdea5df0ca44027336ec85c2bd3da792237fba1c582599494cda6780204ae128", 83912),
    ("63b1a7dcffe67fcdd962f86f467a122ac48fa31667a71c6e7f4c138feabdb43f", 87859),
    ("bf7a1a036ab4a79b6ef6062fb7e56e509660055e2a99bb346867b132d4fb5da8", 88437),
    ("70f9f77fa969609c3928e024caaa872a99e07a4a6c2d05732f30b34df3935333", 88724),
    ("e5b88eaaacedd86de1a670fd47ab705dbdad767df09bf0902fcbceab8987a28f", 90215),
];

// The node returns no usable data for these
const DCR_MISSING_INFO: [&str; 16] = [
    "f3b0e919ccac9b78b7fb15cb3e5e1f93f7dc0ed05080de3e8d67577f38b2c03d",
    "50893c9acf2776a8e7cee7674431142cd41292370387a0b8e79bd8d577a5c55f",
    "3d3c6581d9092db691e1624ed67a9647edab0027843f3583776a25d2dd3223e4",
    "daa402d95ac86763e02d8e6eaac227fc66ae9a13de27d4782758f37c178b72d8",
    "67f78257c355a86d8ebe2b0a5c053e73a26c9cdb43838085c21c1d715fda3487",
    "5b4e88991b1a217ac2763be68da209b113c5e7d613d14cd9298a4e64d8596589",
    "62dcaa62b47ddb6b5b1a5458b40ab2bad4160f668e2343a43130420cfd8cf3ec",
    "2d045cf863a3f813fbe513e5a3d5b24ee447c01d43d8f6d840d2804a053b6d20",
    "8a8a5903aa7bd8ea735e0219e216a0738858c9ae3ad4c436ef20168b9d9c1922",
    "b419240eab69242421a9183a0f5b3d6a4129c17cd0556b318dbe112df6cd866c",
    "f75dca3407378e73ef14d089dfb958a1e69578575242faffd9a02b641a547818",
    "e6171883344e3c9dbbfc544e451becd408233318c071949979d67f94d122e17f",
    "1310c7b01ce435598e30e74c4407431c27b5bdc03283a5e831f26d3a79497b4c",
    "a68d110d662d04aa3f4100894edccaddbd26252529a7d399c196f6667567e6dc",
    "69cff27b13002aa81e41598b844f45c32b1d4cb1b23ff82b53456ded49140a73",
    "48de4e70c6f556a7c33f18d7085f937855c4d3b285c9b8b16f348cb44d1d4e82",
];

/// One entry of an exclusion file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionEntry {
    pub hash: String,
    #[serde(default)]
    pub height: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ExclusionFile {
    #[serde(default, rename = "transaction")]
    transactions: Vec<ExclusionEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionTable {
    at_height: HashSet<(String, u64)>,
    anywhere: HashSet<String>,
}

impl ExclusionTable {
    pub fn new(entries: impl IntoIterator<Item = ExclusionEntry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            let hash = entry.hash.trim().to_lowercase();
            match entry.height {
                Some(height) => {
                    table.at_height.insert((hash, height));
                },
                None => {
                    table.anywhere.insert(hash);
                },
            }
        }
        table
    }

    /// Built-in table for an asset. PIVX shares the bitcoin entries.
    pub fn defaults_for(asset: Asset) -> Self {
        let pinned = |list: &[(&str, u64)]| -> Vec<ExclusionEntry> {
            list.iter()
                .map(|(hash, height)| ExclusionEntry {
                    hash: hash.to_string(),
                    height: Some(*height),
                })
                .collect()
        };

        match asset {
            Asset::Btc | Asset::Pivx => Self::new(pinned(&BTC_DUPLICATES)),
            Asset::Dcr => {
                let mut entries = pinned(&DCR_DUPLICATES);
                entries.extend(DCR_MISSING_INFO.iter().map(|hash| ExclusionEntry {
                    hash: hash.to_string(),
                    height: None,
                }));
                Self::new(entries)
            },
            _ => Self::default(),
        }
    }

    pub fn from_toml_str(text: &str) -> blocksql_common::Result<Self> {
        let file: ExclusionFile = toml::from_str(text)
            .map_err(|e| BlocksqlError::Config(format!("invalid exclusion file: {e}")))?;
        Ok(Self::new(file.transactions))
    }

    pub fn load(path: &Path) -> blocksql_common::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn is_excluded(&self, tx_hash: &str, height: u64) -> bool {
        let hash = tx_hash.to_lowercase();
        self.anywhere.contains(&hash) || self.at_height.contains(&(hash, height))
    }

    pub fn len(&self) -> usize {
        self.at_height.len() + self.anywhere.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
