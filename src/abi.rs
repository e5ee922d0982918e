use std::fs;
use std::path::Path;

use alloy_json_abi::{Event, JsonAbi};
use serde_json::Value;
use tracing::warn;

use crate::error::{CrawlerError, Result};

/// Fill in the fields older compilers and hand-written ABIs leave out, so the
/// document deserializes with `JsonAbi`:
/// events without `anonymous`, functions without `stateMutability`/`outputs`.
pub fn preprocess_abi_json(raw: &[u8]) -> Result<Vec<u8>> {
    let mut value: Value = serde_json::from_slice(raw)
        .map_err(|e| CrawlerError::Abi(format!("ABI is not valid JSON: {}", e)))?;

    let Value::Array(entries) = &mut value else {
        return Err(CrawlerError::Abi("ABI must be a JSON array of entries".to_string()));
    };

    for entry in entries.iter_mut() {
        let Value::Object(obj) = entry else { continue };
        let kind = obj.get("type").and_then(Value::as_str).unwrap_or("function").to_string();
        match kind.as_str() {
            "event" => {
                if !obj.contains_key("anonymous") {
                    let name = obj.get("name").and_then(Value::as_str).unwrap_or_default();
                    warn!("Event {} has no explicit anonymous field, treating as non-anonymous", name);
                    obj.insert("anonymous".to_string(), Value::Bool(false));
                }
            }
            "function" => {
                if !obj.contains_key("stateMutability") {
                    let payable = obj.get("payable").and_then(Value::as_bool).unwrap_or(false);
                    let constant = obj.get("constant").and_then(Value::as_bool).unwrap_or(false);
                    let mutability = if payable {
                        "payable"
                    } else if constant {
                        "view"
                    } else {
                        "nonpayable"
                    };
                    obj.insert("stateMutability".to_string(), Value::String(mutability.to_string()));
                }
                if !obj.contains_key("outputs") {
                    obj.insert("outputs".to_string(), Value::Array(Vec::new()));
                }
            }
            _ => {}
        }
    }

    Ok(serde_json::to_vec(&value)?)
}

pub fn parse_abi(raw: &[u8]) -> Result<JsonAbi> {
    let preprocessed = preprocess_abi_json(raw)?;
    serde_json::from_slice(&preprocessed).map_err(|e| CrawlerError::Abi(format!("Invalid ABI: {}", e)))
}

pub fn load_abi(path: impl AsRef<Path>) -> Result<JsonAbi> {
    let path = path.as_ref();
    let raw = fs::read(path)
        .map_err(|e| CrawlerError::Abi(format!("Cannot read ABI file {:?}: {}", path, e)))?;
    parse_abi(&raw)
}

/// Event entries of an ABI, in declaration order.
pub fn event_entries(abi: &JsonAbi) -> Vec<Event> {
    abi.events().cloned().collect()
}

pub fn find_event(abi: &JsonAbi, name: &str) -> Result<Event> {
    abi.events()
        .find(|e| e.name == name)
        .cloned()
        .ok_or_else(|| CrawlerError::Abi(format!("Event '{}' not found in ABI", name)))
}

/// Load a file of event entries, used as the ordered secondary ABI list.
pub fn load_event_abis(path: impl AsRef<Path>) -> Result<Vec<Event>> {
    Ok(event_entries(&load_abi(path)?))
}
