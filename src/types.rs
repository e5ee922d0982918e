use alloy_primitives::{Address, B256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A log decoded against an event ABI entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_name: String,
    pub args: Map<String, Value>,
    pub address: Address,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// Decoded call arguments, or the `"unknown"` sentinel when the input matched
/// no function of the primary ABI.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArgs {
    Decoded(Map<String, Value>),
    Unknown,
}

const UNKNOWN_ARGS: &str = "unknown";

impl Serialize for FunctionArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FunctionArgs::Decoded(args) => args.serialize(serializer),
            FunctionArgs::Unknown => serializer.serialize_str(UNKNOWN_ARGS),
        }
    }
}

impl<'de> Deserialize<'de> for FunctionArgs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(args) => Ok(FunctionArgs::Decoded(args)),
            Value::String(s) if s == UNKNOWN_ARGS => Ok(FunctionArgs::Unknown),
            other => Err(serde::de::Error::custom(format!(
                "expected decoded args object or \"unknown\", got {}",
                other
            ))),
        }
    }
}

/// A transaction decoded against the primary ABI, with its receipt outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
    pub contract_address: Option<Address>,
    pub caller_address: Address,
    pub function_name: String,
    pub function_args: FunctionArgs,
    pub status: u64,
    pub gas_used: u64,
    pub gas_price: u128,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

impl FunctionCall {
    pub fn is_decoded(&self) -> bool {
        matches!(self.function_args, FunctionArgs::Decoded(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallPayload {
    pub name: String,
    pub caller: String,
    pub args: FunctionArgs,
    pub status: u64,
    pub gas_used: u64,
    pub gas_price: u128,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPayload {
    pub name: String,
    pub args: Map<String, Value>,
}

/// Payload stored in the `label_data` JSONB column, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum LabelData {
    #[serde(rename = "tx_call")]
    FunctionCall(FunctionCallPayload),
    #[serde(rename = "event")]
    Event(EventPayload),
}

/// Persisted form of a label row.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRecord {
    pub label_name: String,
    pub label_data: LabelData,
    pub address: Option<String>,
    pub block_number: u64,
    pub transaction_hash: String,
    pub block_timestamp: u64,
    pub log_index: Option<u64>,
}

impl LabelRecord {
    pub fn from_function_call(label_name: &str, call: &FunctionCall) -> Self {
        Self {
            label_name: label_name.to_string(),
            label_data: LabelData::FunctionCall(FunctionCallPayload {
                name: call.function_name.clone(),
                caller: call.caller_address.to_string(),
                args: call.function_args.clone(),
                status: call.status,
                gas_used: call.gas_used,
                gas_price: call.gas_price,
                max_fee_per_gas: call.max_fee_per_gas,
                max_priority_fee_per_gas: call.max_priority_fee_per_gas,
            }),
            address: call.contract_address.map(|a| a.to_string()),
            block_number: call.block_number,
            transaction_hash: tx_hash_hex(&call.transaction_hash),
            block_timestamp: call.block_timestamp,
            log_index: None,
        }
    }

    pub fn from_event(label_name: &str, event: &Event) -> Self {
        Self {
            label_name: label_name.to_string(),
            label_data: LabelData::Event(EventPayload {
                name: event.event_name.clone(),
                args: event.args.clone(),
            }),
            address: Some(event.address.to_string()),
            block_number: event.block_number,
            transaction_hash: tx_hash_hex(&event.transaction_hash),
            block_timestamp: event.block_timestamp,
            log_index: Some(event.log_index),
        }
    }

    pub fn is_function_call(&self) -> bool {
        matches!(self.label_data, LabelData::FunctionCall(_))
    }
}

/// Lowercase `0x`-prefixed hash, the form transaction hashes take in the store.
pub fn tx_hash_hex(hash: &B256) -> String {
    format!("{:#x}", hash)
}
