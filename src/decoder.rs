use std::collections::HashMap;

use alloy_dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy_json_abi::{Event, EventParam, Function, JsonAbi};
use alloy_primitives::{Selector, B256};
use serde_json::{Map, Value};

use crate::chain::RawLog;
use crate::error::{CrawlerError, Result};
use crate::types::FunctionArgs;

/// Name and arguments of a successfully decoded log.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub name: String,
    pub args: Map<String, Value>,
}

/// Decodes logs against a single event ABI entry.
#[derive(Debug, Clone)]
pub struct LogDecoder {
    event: Event,
}

impl LogDecoder {
    pub fn new(event: Event) -> Self {
        Self { event }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// topic0 the event is emitted with, `None` for anonymous events
    pub fn topic0(&self) -> Option<B256> {
        (!self.event.anonymous).then(|| self.event.selector())
    }

    pub fn decode(&self, log: &RawLog) -> Result<DecodedLog> {
        let event = &self.event;
        let indexed: Vec<(usize, &EventParam)> = event.inputs.iter().enumerate().filter(|(_, p)| p.indexed).collect();
        let non_indexed: Vec<(usize, &EventParam)> = event.inputs.iter().enumerate().filter(|(_, p)| !p.indexed).collect();

        let mut topics = log.topics.iter();
        if let Some(signature) = self.topic0() {
            match topics.next() {
                Some(topic) if *topic == signature => {}
                _ => {
                    return Err(CrawlerError::Decode(format!(
                        "Log topic0 does not match event {} signature",
                        event.name
                    )))
                }
            }
        }

        let remaining = topics.len();
        if remaining != indexed.len() {
            return Err(CrawlerError::Decode(format!(
                "Event {} expects {} indexed topics, log has {}",
                event.name,
                indexed.len(),
                remaining
            )));
        }

        let mut values: Vec<(usize, &EventParam, DynSolValue)> = Vec::with_capacity(event.inputs.len());

        for ((position, param), topic) in indexed.iter().zip(topics) {
            values.push((*position, *param, decode_indexed_param(param, topic)?));
        }

        if !non_indexed.is_empty() {
            let params: Vec<&EventParam> = non_indexed.iter().map(|(_, p)| *p).collect();
            let data_values = decode_data_params(&params, &log.data)?;
            for ((position, param), value) in non_indexed.iter().zip(data_values) {
                values.push((*position, *param, value));
            }
        } else if !log.data.is_empty() {
            return Err(CrawlerError::Decode(format!(
                "Event {} has no data parameters but log carries {} data bytes",
                event.name,
                log.data.len()
            )));
        }

        // Keep the declaration order of the event inputs
        values.sort_by_key(|(position, _, _)| *position);

        let mut args = Map::new();
        for (position, param, value) in values {
            args.insert(arg_name(&param.name, position), value_to_json(&value));
        }

        Ok(DecodedLog {
            name: event.name.clone(),
            args,
        })
    }
}

/// Try each decoder in order; the first one that decodes the log wins.
pub fn decode_first_match(decoders: &[LogDecoder], log: &RawLog) -> Option<DecodedLog> {
    decoders.iter().find_map(|decoder| decoder.decode(log).ok())
}

/// Decodes transaction input against the functions of an ABI, by selector.
#[derive(Debug, Clone)]
pub struct FunctionDecoder {
    functions: HashMap<Selector, Function>,
}

impl FunctionDecoder {
    pub fn new(abi: &JsonAbi) -> Self {
        let functions = abi.functions().map(|f| (f.selector(), f.clone())).collect();
        Self { functions }
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn decode_input(&self, input: &[u8]) -> Result<(String, Map<String, Value>)> {
        if input.len() < 4 {
            return Err(CrawlerError::Decode(format!("Input of {} bytes has no selector", input.len())));
        }
        let selector = Selector::from_slice(&input[..4]);
        let function = self
            .functions
            .get(&selector)
            .ok_or_else(|| CrawlerError::Decode(format!("No function with selector {}", selector_hex(input))))?;

        let values = function
            .abi_decode_input(&input[4..])
            .map_err(|e| CrawlerError::Decode(format!("Failed to decode input of {}: {}", function.name, e)))?;

        let mut args = Map::new();
        for (position, (param, value)) in function.inputs.iter().zip(values.iter()).enumerate() {
            args.insert(arg_name(&param.name, position), value_to_json(value));
        }

        Ok((function.name.clone(), args))
    }

    /// Decoded `(name, args)`, or `(selector, Unknown)` when the input does not
    /// decode against any function.
    pub fn decode_or_selector(&self, input: &[u8]) -> (String, FunctionArgs) {
        match self.decode_input(input) {
            Ok((name, args)) => (name, FunctionArgs::Decoded(args)),
            Err(_) => (selector_hex(input), FunctionArgs::Unknown),
        }
    }
}

/// `0x`-prefixed hex of the first four input bytes (fewer if the input is shorter).
pub fn selector_hex(input: &[u8]) -> String {
    let end = input.len().min(4);
    format!("0x{}", hex::encode(&input[..end]))
}

fn arg_name(name: &str, position: usize) -> String {
    if name.is_empty() {
        format!("arg{}", position)
    } else {
        name.to_string()
    }
}

/// Decode an indexed parameter from a topic
fn decode_indexed_param(param: &EventParam, topic: &B256) -> Result<DynSolValue> {
    let sol_type: DynSolType = param
        .resolve()
        .map_err(|e| CrawlerError::Decode(format!("Unsupported type {} of {}: {}", param.ty, param.name, e)))?;

    // Dynamic types are stored as their keccak256 hash, the value is not recoverable
    match &sol_type {
        DynSolType::String
        | DynSolType::Bytes
        | DynSolType::Array(_)
        | DynSolType::FixedArray(..)
        | DynSolType::Tuple(_) => Ok(DynSolValue::FixedBytes(*topic, 32)),
        _ => sol_type
            .abi_decode(topic.as_slice())
            .map_err(|e| CrawlerError::Decode(format!("Failed to decode indexed parameter {}: {}", param.name, e))),
    }
}

/// Decode non-indexed parameters from log data
fn decode_data_params(params: &[&EventParam], data: &[u8]) -> Result<Vec<DynSolValue>> {
    let types = params
        .iter()
        .map(|p| {
            p.resolve()
                .map_err(|e| CrawlerError::Decode(format!("Unsupported type {} of {}: {}", p.ty, p.name, e)))
        })
        .collect::<Result<Vec<DynSolType>>>()?;

    let decoded = DynSolType::Tuple(types)
        .abi_decode_params(data)
        .map_err(|e| CrawlerError::Decode(format!("Failed to decode log data: {}", e)))?;

    match decoded {
        DynSolValue::Tuple(values) => Ok(values),
        _ => Err(CrawlerError::Decode("Expected tuple from log data decoding".to_string())),
    }
}

/// Convert DynSolValue to JSON Value for the label payload
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(format!("0x{}", hex::encode(&word[..*size]))),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::Address(addr) => Value::String(addr.to_string()),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        _ => Value::String(format!("{:?}", value)),
    }
}
