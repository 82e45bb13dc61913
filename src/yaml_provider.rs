//! Thin YAML seam used by the mapping catalog and the `resolve` command output.
//!
//! Table nodes pass through [`YamlValue`] so an inactive table can be skipped
//! when it does not parse. Repeated keys inside a node already fail while the
//! value is built.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{LoaderError, Result};

pub use serde_yaml::Value as YamlValue;

pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|err| LoaderError::config(format!("Opening YAML file {path:?}: {err}")))
}

pub fn from_str<T: DeserializeOwned>(input: &str) -> Result<T> {
    Ok(serde_yaml::from_str(input)?)
}

pub fn from_value<T: DeserializeOwned>(value: YamlValue) -> Result<T> {
    Ok(serde_yaml::from_value(value)?)
}

pub fn to_string<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}
