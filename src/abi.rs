//! Contract interface description loading.
//!
//! Only the `Transfer` event matters here. The file is checked once, up
//! front, so a mismatched interface fails the run before any logs are read.

use crate::error::ConfigError;
use alloy::json_abi::{Event, JsonAbi};
use serde::Deserialize;
use std::path::Path;

/// Artifact files produced by Hardhat/Truffle wrap the ABI in an object.
#[derive(Deserialize)]
struct Artifact {
    abi: JsonAbi,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AbiDocument {
    Bare(JsonAbi),
    Artifact(Artifact),
}

pub fn read_abi(path: &Path) -> Result<JsonAbi, ConfigError> {
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_abi(&data).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_abi(data: &str) -> Result<JsonAbi, serde_json::Error> {
    let document: AbiDocument = serde_json::from_str(data)?;
    Ok(match document {
        AbiDocument::Bare(abi) => abi,
        AbiDocument::Artifact(artifact) => artifact.abi,
    })
}

/// Finds the ERC20 `Transfer` event and checks its field layout. Parameter
/// names are free (WETH calls them `src`, `dst`, `wad`); types and indexing
/// are not.
pub fn transfer_event(abi: &JsonAbi) -> Result<&Event, ConfigError> {
    let candidates = abi
        .event("Transfer")
        .filter(|events| !events.is_empty())
        .ok_or(ConfigError::MissingTransferEvent)?;

    candidates
        .iter()
        .find(|event| has_transfer_layout(event))
        .ok_or_else(|| ConfigError::TransferLayout {
            found: describe(&candidates[0]),
        })
}

fn has_transfer_layout(event: &Event) -> bool {
    let expected = [("address", true), ("address", true), ("uint256", false)];
    !event.anonymous
        && event.inputs.len() == expected.len()
        && event
            .inputs
            .iter()
            .zip(expected)
            .all(|(param, (ty, indexed))| param.ty == ty && param.indexed == indexed)
}

fn describe(event: &Event) -> String {
    let params: Vec<String> = event
        .inputs
        .iter()
        .map(|param| {
            if param.indexed {
                format!("{} indexed", param.ty)
            } else {
                param.ty.clone()
            }
        })
        .collect();
    format!("{}({})", event.name, params.join(","))
}
