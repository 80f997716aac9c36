//! Host-provided value encoding. A `Task`'s `function_arguments` column and a
//! `Result`'s `function_result` column are opaque blobs from the Store's
//! point of view; this module is the one place that knows they are
//! JSON-encoded `serde_json::Value` trees.

use serde::{Deserialize, Serialize};

use crate::error::{AutocronError, Result};

/// Positional and keyword arguments bundled for a single task invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Arguments {
    pub args: Vec<serde_json::Value>,
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl Arguments {
    pub fn new(args: Vec<serde_json::Value>, kwargs: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { args, kwargs }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(AutocronError::from)
    }

    pub fn decode(blob: &[u8]) -> Result<Self> {
        serde_json::from_slice(blob).map_err(AutocronError::from)
    }
}

/// Encode an arbitrary return value into the blob stored in `function_result`.
pub fn encode_result(value: &serde_json::Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(AutocronError::from)
}

/// Decode a `function_result` blob back into a value. Empty blobs decode to `Null`.
pub fn decode_result(blob: &[u8]) -> Result<serde_json::Value> {
    if blob.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_slice(blob).map_err(AutocronError::from)
}
