//! Omni layer adapter
//!
//! Transactions are fetched one by one: Omni nodes stall on batched
//! `omni_gettransaction` requests.

use super::{
    array_field, check_address_length, epoch_field, field, i64_field, str_field, AdapterError,
    LedgerAdapter, Result,
};
use crate::amount::to_base_units;
use crate::model::omni::{OmniBlock, OmniDetails, OmniKind, OmniRecord, PropertyType, SellAction};
use crate::model::{Hash256, MAX_ADDRESS_LENGTH};
use crate::rpc::{decimal_text, JsonRpcClient, RpcEndpoint};
use async_trait::async_trait;
use blocksql_common::Asset;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, instrument, trace};

/// Valid transaction types that carry nothing worth storing
pub const IGNORED_TYPES: [i64; 7] = [25, 26, 28, 70, 71, 185, 65534];

/// Latest deadline the node can meaningfully express (9999-12-31T23:59:59Z)
const MAX_DEADLINE_SECS: i64 = 253_402_300_799;
/// Stand-in for crowdsale deadlines outside the representable range
const FALLBACK_DEADLINE_SECS: i64 = 4_102_444_800;
/// Omni addresses must stay strictly below the column width
const MAX_OMNI_ADDRESS_LENGTH: usize = MAX_ADDRESS_LENGTH - 1;

type Handler = fn(&Value, &mut Vec<OmniRecord>) -> Result<()>;

/// Handler registry keyed by the node's `type_int`
const HANDLERS: [(i64, Handler); 11] = [
    (0, simple_send),
    (3, send_owners),
    (4, send_all),
    (20, sell_for_bitcoin),
    (22, accept_sell_for_bitcoin),
    (50, create_fixed_property),
    (51, create_crowdsale_property),
    (53, close_crowdsale),
    (54, create_managed_property),
    (55, grant_tokens),
    (56, revoke_tokens),
];

pub struct OmniAdapter {
    rpc: JsonRpcClient,
}

impl OmniAdapter {
    pub fn new(rpc: JsonRpcClient) -> Self {
        Self { rpc }
    }

    pub fn connect(endpoint: RpcEndpoint) -> Result<Self> {
        Ok(Self::new(JsonRpcClient::new(endpoint)?))
    }
}

#[async_trait]
impl LedgerAdapter for OmniAdapter {
    type Block = OmniBlock;

    fn asset(&self) -> Asset {
        Asset::Omni
    }

    fn endpoint(&self) -> &RpcEndpoint {
        self.rpc.endpoint()
    }

    async fn get_height(&self) -> Result<u64> {
        Ok(self.rpc.call::<u64>("getblockcount", json!([])).await?)
    }

    #[instrument(skip(self), fields(asset = "omni"))]
    async fn get_block_at(&self, height: u64) -> Result<OmniBlock> {
        let block_hash: String = self.rpc.call("getblockhash", json!([height])).await?;
        let raw = self.rpc.call_value("getblock", json!([block_hash])).await?;
        let mut block = OmniBlock {
            height,
            hash: Hash256::parse_hash(str_field(&raw, "hash")?)?,
            time: epoch_field(&raw, "time")?,
            records: Vec::new(),
        };

        let hashes: Vec<String> = self
            .rpc
            .call("omni_listblocktransactions", json!([height]))
            .await?;
        for hash in &hashes {
            let info = self.rpc.call_value("omni_gettransaction", json!([hash])).await?;
            normalize_transaction(&info, &mut block.records)?;
        }

        debug!(
            transactions = hashes.len(),
            records = block.records.len(),
            "Omni block normalized"
        );
        Ok(block)
    }
}

/// Append the records of one `omni_gettransaction` answer
pub fn normalize_transaction(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    match info.get("valid") {
        None => {
            let kind = str_field(info, "type")?;
            if kind != "DEx Purchase" {
                return Err(AdapterError::Shape(format!(
                    "transaction without validity flag has type '{kind}'"
                )));
            }
            dex_purchase(info, records)
        },
        Some(Value::Bool(false)) => {
            trace!(tx = ?info.get("txid"), "Skipping invalid Omni transaction");
            Ok(())
        },
        Some(Value::Bool(true)) => {
            let type_int = i64_field(info, "type_int")?;
            if let Some((_, handler)) = HANDLERS.iter().find(|(code, _)| *code == type_int) {
                handler(info, records)
            } else if IGNORED_TYPES.contains(&type_int) {
                Ok(())
            } else {
                Err(AdapterError::UnknownTransactionType {
                    tx_hash: str_field(info, "txid").unwrap_or("?").to_string(),
                    type_int,
                })
            }
        },
        Some(other) => Err(AdapterError::Shape(format!("validity flag is {other}"))),
    }
}

fn omni_amount(value: &Value, key: &str) -> Result<u128> {
    let text = decimal_text(field(value, key)?)
        .ok_or_else(|| AdapterError::Shape(format!("field '{key}' is not an amount")))?;
    Ok(to_base_units(&text)?)
}

fn address(value: &Value, key: &str) -> Result<String> {
    let address = str_field(value, key)?;
    check_address_length("omni", address, MAX_OMNI_ADDRESS_LENGTH)?;
    Ok(address.to_string())
}

fn property_type(info: &Value) -> Result<PropertyType> {
    let name = str_field(info, "propertytype")?;
    PropertyType::from_node_name(name).ok_or_else(|| AdapterError::UnknownValue {
        field: "property type",
        value: name.to_string(),
    })
}

/// Attributes every single-record transaction shares
fn base_record(info: &Value, kind: OmniKind) -> Result<OmniRecord> {
    Ok(OmniRecord {
        kind,
        tx_hash: Hash256::parse_hash(str_field(info, "txid")?)?,
        sub_index: 0,
        time: epoch_field(info, "blocktime")?,
        property_id: i64_field(info, "propertyid")?,
        sending_address: address(info, "sendingaddress")?,
        receiving_address: None,
        amount: None,
        fee: Some(omni_amount(info, "fee")?),
        details: OmniDetails::None,
    })
}

fn simple_send(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    records.push(OmniRecord {
        receiving_address: Some(address(info, "referenceaddress")?),
        amount: Some(omni_amount(info, "amount")?),
        ..base_record(info, OmniKind::SimpleSend)?
    });
    Ok(())
}

fn send_owners(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    records.push(OmniRecord {
        amount: Some(omni_amount(info, "amount")?),
        ..base_record(info, OmniKind::SendOwners)?
    });
    Ok(())
}

fn send_all(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    let tx_hash = Hash256::parse_hash(str_field(info, "txid")?)?;
    let time = epoch_field(info, "blocktime")?;
    let sending = address(info, "sendingaddress")?;
    let receiving = address(info, "referenceaddress")?;
    let fee = omni_amount(info, "fee")?;

    for (index, send) in array_field(info, "subsends")?.iter().enumerate() {
        records.push(OmniRecord {
            kind: OmniKind::SendAll,
            tx_hash,
            sub_index: sub_index(index)?,
            time,
            property_id: i64_field(send, "propertyid")?,
            sending_address: sending.clone(),
            receiving_address: Some(receiving.clone()),
            amount: Some(omni_amount(send, "amount")?),
            fee: Some(fee),
            details: OmniDetails::None,
        });
    }
    Ok(())
}

fn sell_for_bitcoin(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    let action_name = str_field(info, "action")?;
    let action = SellAction::from_node_name(action_name).ok_or_else(|| AdapterError::UnknownValue {
        field: "sell-for-bitcoin action",
        value: action_name.to_string(),
    })?;
    records.push(OmniRecord {
        amount: Some(omni_amount(info, "amount")?),
        details: OmniDetails::SellForBitcoin {
            fee_required: omni_amount(info, "feerequired")?,
            bitcoin_desired: omni_amount(info, "bitcoindesired")?,
            action,
        },
        ..base_record(info, OmniKind::SellForBitcoin)?
    });
    Ok(())
}

fn accept_sell_for_bitcoin(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    records.push(OmniRecord {
        receiving_address: Some(address(info, "referenceaddress")?),
        amount: Some(omni_amount(info, "amount")?),
        ..base_record(info, OmniKind::AcceptSellForBitcoin)?
    });
    Ok(())
}

fn create_fixed_property(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    records.push(OmniRecord {
        amount: Some(omni_amount(info, "amount")?),
        details: OmniDetails::Property {
            property_type: property_type(info)?,
        },
        ..base_record(info, OmniKind::CreateFixedProperty)?
    });
    Ok(())
}

fn create_crowdsale_property(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    let property_type = property_type(info)?;
    let deadline = i64_field(info, "deadline")?;
    let deadline = DateTime::from_timestamp(deadline, 0)
        .filter(|_| deadline <= MAX_DEADLINE_SECS)
        .unwrap_or_else(fallback_deadline);

    records.push(OmniRecord {
        amount: Some(omni_amount(info, "amount")?),
        details: OmniDetails::Crowdsale {
            property_type,
            tokens_per_unit: omni_amount(info, "tokensperunit")?,
            deadline,
            early_bonus: i64_field(info, "earlybonus")?,
            percent_to_issuer: i64_field(info, "percenttoissuer")?,
        },
        ..base_record(info, OmniKind::CreateCrowdsaleProperty)?
    });
    Ok(())
}

fn fallback_deadline() -> DateTime<Utc> {
    DateTime::from_timestamp(FALLBACK_DEADLINE_SECS, 0).unwrap_or_default()
}

fn close_crowdsale(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    records.push(base_record(info, OmniKind::CloseCrowdsale)?);
    Ok(())
}

fn create_managed_property(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    records.push(OmniRecord {
        details: OmniDetails::Property {
            property_type: property_type(info)?,
        },
        ..base_record(info, OmniKind::CreateManagedProperty)?
    });
    Ok(())
}

fn grant_tokens(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    records.push(OmniRecord {
        receiving_address: Some(address(info, "referenceaddress")?),
        amount: Some(omni_amount(info, "amount")?),
        ..base_record(info, OmniKind::GrantTokens)?
    });
    Ok(())
}

fn revoke_tokens(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    records.push(OmniRecord {
        amount: Some(omni_amount(info, "amount")?),
        ..base_record(info, OmniKind::RevokeTokens)?
    });
    Ok(())
}

fn dex_purchase(info: &Value, records: &mut Vec<OmniRecord>) -> Result<()> {
    let tx_hash = Hash256::parse_hash(str_field(info, "txid")?)?;
    let time = epoch_field(info, "blocktime")?;
    let sending = address(info, "sendingaddress")?;

    for (index, purchase) in array_field(info, "purchases")?.iter().enumerate() {
        if field(purchase, "valid")?.as_bool() != Some(true) {
            continue;
        }
        records.push(OmniRecord {
            kind: OmniKind::DexPurchase,
            tx_hash,
            sub_index: sub_index(index)?,
            time,
            property_id: i64_field(purchase, "propertyid")?,
            sending_address: sending.clone(),
            receiving_address: Some(address(purchase, "referenceaddress")?),
            amount: Some(omni_amount(purchase, "amountbought")?),
            fee: None,
            details: OmniDetails::DexPurchase {
                amount_paid: omni_amount(purchase, "amountpaid")?,
            },
        });
    }
    Ok(())
}

fn sub_index(index: usize) -> Result<u32> {
    u32::try_from(index).map_err(|_| AdapterError::Shape(format!("sub-record index {index}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const TXID: &str = "1f3a4c5b00000000000000000000000000000000000000000000000000000001";

    fn tx(type_int: i64, extra: Value) -> Value {
        let mut info = json!({
            "txid": TXID,
            "valid": true,
            "type_int": type_int,
            "blocktime": 1_500_000_000,
            "sendingaddress": "1Sender",
            "propertyid": 31,
            "fee": "0.0001",
        });
        if let (Some(base), Some(extra)) = (info.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        info
    }

    #[test]
    fn test_simple_send() {
        let mut records = Vec::new();
        let info = tx(0, json!({"referenceaddress": "1Receiver", "amount": "12.5"}));
        normalize_transaction(&info, &mut records).unwrap();

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.kind, OmniKind::SimpleSend);
        assert_eq!(r.property_id, 31);
        assert_eq!(r.receiving_address.as_deref(), Some("1Receiver"));
        assert_eq!(r.amount, Some(1_250_000_000));
        assert_eq!(r.fee, Some(10_000));
    }

    #[test]
    fn test_omni_address_must_be_shorter_than_column() {
        let mut records = Vec::new();
        let at_limit = tx(
            0,
            json!({"sendingaddress": "1".repeat(64), "referenceaddress": "1Receiver", "amount": "1"}),
        );
        let err = normalize_transaction(&at_limit, &mut records).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidAddress { .. }));
        assert!(records.is_empty());

        let below = tx(
            0,
            json!({"sendingaddress": "1".repeat(63), "referenceaddress": "1Receiver", "amount": "1"}),
        );
        normalize_transaction(&below, &mut records).unwrap();
        assert_eq!(records[0].sending_address.len(), 63);
    }

    #[test]
    fn test_indivisible_amount_is_scaled() {
        let mut records = Vec::new();
        let info = tx(56, json!({"amount": "7"}));
        normalize_transaction(&info, &mut records).unwrap();
        assert_eq!(records[0].amount, Some(700_000_000));
    }

    #[test]
    fn test_send_all_emits_one_record_per_subsend() {
        let mut records = Vec::new();
        let info = tx(
            4,
            json!({
                "referenceaddress": "1Receiver",
                "subsends": [
                    {"propertyid": 1, "amount": "1.0"},
                    {"propertyid": 3, "amount": "2"}
                ]
            }),
        );
        normalize_transaction(&info, &mut records).unwrap();
        let indices: Vec<(u32, i64)> = records.iter().map(|r| (r.sub_index, r.property_id)).collect();
        assert_eq!(indices, vec![(0, 1), (1, 3)]);
    }

    #[test]
    fn test_invalid_and_ignored_are_skipped() {
        let mut records = Vec::new();
        let mut invalid = tx(0, json!({}));
        invalid["valid"] = json!(false);
        normalize_transaction(&invalid, &mut records).unwrap();
        normalize_transaction(&tx(65534, json!({})), &mut records).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let mut records = Vec::new();
        let err = normalize_transaction(&tx(99, json!({})), &mut records).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::UnknownTransactionType { type_int: 99, .. }
        ));
    }

    #[test]
    fn test_unknown_sell_action_is_fatal() {
        let mut records = Vec::new();
        let info = tx(
            20,
            json!({"action": "haggle", "amount": "1", "feerequired": "0", "bitcoindesired": "1"}),
        );
        assert!(matches!(
            normalize_transaction(&info, &mut records),
            Err(AdapterError::UnknownValue { .. })
        ));
    }

    #[test]
    fn test_dex_purchase_keeps_valid_purchases_with_position() {
        let info = json!({
            "txid": TXID,
            "type": "DEx Purchase",
            "blocktime": 1_500_000_000,
            "sendingaddress": "1Buyer",
            "purchases": [
                {"valid": false, "propertyid": 1, "referenceaddress": "1Seller",
                 "amountbought": "1", "amountpaid": "0.5"},
                {"valid": true, "propertyid": 1, "referenceaddress": "1Seller",
                 "amountbought": "2.0", "amountpaid": "0.25"}
            ]
        });
        let mut records = Vec::new();
        normalize_transaction(&info, &mut records).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sub_index, 1);
        assert_eq!(records[0].amount, Some(200_000_000));
        assert_eq!(
            records[0].details,
            OmniDetails::DexPurchase {
                amount_paid: 25_000_000
            }
        );

        let mut wrong = info.clone();
        wrong["type"] = json!("Simple Send");
        assert!(normalize_transaction(&wrong, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_crowdsale_deadline_fallback() {
        let mut records = Vec::new();
        let info = tx(
            51,
            json!({
                "propertytype": "divisible",
                "amount": "0",
                "tokensperunit": "100",
                "deadline": 999_999_999_999_i64,
                "earlybonus": 10,
                "percenttoissuer": 5
            }),
        );
        normalize_transaction(&info, &mut records).unwrap();
        match &records[0].details {
            OmniDetails::Crowdsale { deadline, .. } => {
                assert_eq!(deadline.to_rfc3339(), "2100-01-01T00:00:00+00:00");
            },
            other => panic!("unexpected details {other:?}"),
        }
    }
}
