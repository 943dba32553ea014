//! JSON persistence for merge inputs and reports.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TomeError};
use crate::tensor::Tensor;

/// Tensors supplied to a merge run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeInput {
    /// Features used only to measure similarity.
    pub metric: Tensor,
    /// Values that get merged; the metric itself when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Tensor>,
}

impl MergeInput {
    /// Returns the tensor to merge.
    #[must_use]
    pub fn values(&self) -> &Tensor {
        self.values.as_ref().unwrap_or(&self.metric)
    }
}

/// Reads a [`MergeInput`] from a JSON file.
pub fn load_input<P: AsRef<Path>>(path: P) -> Result<MergeInput> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|err| TomeError::io(err, Some(path.into())))?;
    let input = serde_json::from_str(&data)?;
    Ok(input)
}

/// Serialises `value` to a JSON string.
pub fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}

/// Writes `value` as JSON to `path`.
pub fn save_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P, pretty: bool) -> Result<()> {
    let path = path.as_ref();
    let json = to_json(value, pretty)?;
    fs::write(path, json).map_err(|err| TomeError::io(err, Some(path.into())))
}
