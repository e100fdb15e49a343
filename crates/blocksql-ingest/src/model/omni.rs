// Sub-token (Omni layer) records
//
// Every Omni transaction kind lands in its own table. Rows share a common
// column set and may carry kind-specific details.

use super::{Hash256, LedgerBlock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OmniKind {
    SimpleSend,
    SendOwners,
    SendAll,
    SellForBitcoin,
    AcceptSellForBitcoin,
    DexPurchase,
    CreateFixedProperty,
    CreateCrowdsaleProperty,
    CloseCrowdsale,
    CreateManagedProperty,
    GrantTokens,
    RevokeTokens,
}

impl OmniKind {
    pub const ALL: [OmniKind; 12] = [
        OmniKind::SimpleSend,
        OmniKind::SendOwners,
        OmniKind::SendAll,
        OmniKind::SellForBitcoin,
        OmniKind::AcceptSellForBitcoin,
        OmniKind::DexPurchase,
        OmniKind::CreateFixedProperty,
        OmniKind::CreateCrowdsaleProperty,
        OmniKind::CloseCrowdsale,
        OmniKind::CreateManagedProperty,
        OmniKind::GrantTokens,
        OmniKind::RevokeTokens,
    ];

    /// Column prefix, also the stem of the table name
    pub fn prefix(self) -> &'static str {
        match self {
            OmniKind::SimpleSend => "simple_send",
            OmniKind::SendOwners => "send_owners",
            OmniKind::SendAll => "send_all",
            OmniKind::SellForBitcoin => "sell_for_bitcoin",
            OmniKind::AcceptSellForBitcoin => "accept_sell_for_bitcoin",
            OmniKind::DexPurchase => "dex_purchase",
            OmniKind::CreateFixedProperty => "create_fixed_property",
            OmniKind::CreateCrowdsaleProperty => "create_crowdsale_property",
            OmniKind::CloseCrowdsale => "close_crowdsale",
            OmniKind::CreateManagedProperty => "create_managed_property",
            OmniKind::GrantTokens => "grant_tokens",
            OmniKind::RevokeTokens => "revoke_tokens",
        }
    }

    pub fn table_name(self) -> String {
        format!("{}_transactions_omni", self.prefix())
    }
}

/// Action code of a sell-for-bitcoin offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellAction {
    New = 1,
    Update = 2,
    Cancel = 3,
}

impl SellAction {
    pub fn from_node_name(name: &str) -> Option<Self> {
        match name {
            "new" => Some(SellAction::New),
            "update" => Some(SellAction::Update),
            "cancel" => Some(SellAction::Cancel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    Indivisible = 1,
    Divisible = 2,
}

impl PropertyType {
    pub fn from_node_name(name: &str) -> Option<Self> {
        match name {
            "indivisible" => Some(PropertyType::Indivisible),
            "divisible" => Some(PropertyType::Divisible),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OmniDetails {
    None,
    SellForBitcoin {
        fee_required: u128,
        bitcoin_desired: u128,
        action: SellAction,
    },
    Property {
        property_type: PropertyType,
    },
    Crowdsale {
        property_type: PropertyType,
        tokens_per_unit: u128,
        deadline: DateTime<Utc>,
        early_bonus: i64,
        percent_to_issuer: i64,
    },
    DexPurchase {
        amount_paid: u128,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmniRecord {
    pub kind: OmniKind,
    pub tx_hash: Hash256,
    /// Position within a multi-part transaction (send-all subsends, DEx purchases)
    pub sub_index: u32,
    pub time: DateTime<Utc>,
    pub property_id: i64,
    pub sending_address: String,
    pub receiving_address: Option<String>,
    pub amount: Option<u128>,
    pub fee: Option<u128>,
    pub details: OmniDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmniBlock {
    pub height: u64,
    pub hash: Hash256,
    pub time: DateTime<Utc>,
    pub records: Vec<OmniRecord>,
}

impl OmniBlock {
    pub fn records_of(&self, kind: OmniKind) -> impl Iterator<Item = &OmniRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }
}

impl LedgerBlock for OmniBlock {
    fn height(&self) -> u64 {
        self.height
    }
}
