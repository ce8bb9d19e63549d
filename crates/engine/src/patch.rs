//! Normalization of task patch documents.

use std::fmt;
use std::str::FromStr;

use castor_types::PatchSpec;
use serde_json::Value;

use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    Json,
    Merge,
    Strategic,
}

impl PatchType {
    /// Media type sent as the request content type.
    pub fn media_type(&self) -> &'static str {
        match self {
            PatchType::Json => "application/json-patch+json",
            PatchType::Merge => "application/merge-patch+json",
            PatchType::Strategic => "application/strategic-merge-patch+json",
        }
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatchType::Json => "json",
            PatchType::Merge => "merge",
            PatchType::Strategic => "strategic",
        })
    }
}

impl FromStr for PatchType {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(PatchType::Json),
            "merge" => Ok(PatchType::Merge),
            "strategic" => Ok(PatchType::Strategic),
            other => Err(EngineError::Parse(format!("unsupported patch type '{}'", other))),
        }
    }
}

/// A patch ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPatch {
    pub patch_type: PatchType,
    pub body: Vec<u8>,
}

impl TaskPatch {
    /// Build a patch from its YAML description.
    ///
    /// The document comes from `specs` when present, otherwise from the YAML
    /// string in `pspec`. It is re-encoded as JSON.
    pub fn build(spec: &PatchSpec) -> Result<Self, EngineError> {
        let patch_type: PatchType = spec.patch_type.parse()?;

        let document: Value = match &spec.specs {
            Some(specs) if !specs.is_null() => {
                serde_json::to_value(specs).map_err(|error| EngineError::Parse(format!("invalid patch specs: {}", error)))?
            }
            _ => {
                if spec.pspec.trim().is_empty() {
                    return Err(EngineError::Parse("patch has neither specs nor pspec".into()));
                }
                serde_yaml::from_str(&spec.pspec)?
            }
        };

        if patch_type == PatchType::Json && !document.is_array() {
            return Err(EngineError::Parse("json patch must be a list of operations".into()));
        }

        let body = serde_json::to_vec(&document).map_err(|error| EngineError::Parse(error.to_string()))?;
        Ok(Self { patch_type, body })
    }
}
