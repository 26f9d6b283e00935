//! Upload metadata and its wire encoding.
//!
//! The protocol carries metadata in the `Upload-Metadata` request header as
//! a comma-separated list of `key base64(value)` pairs. Keys are restricted
//! to ASCII without spaces or commas; values are arbitrary bytes.
use crate::error::{Error, Result};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata attached to an upload.
///
/// Entries are kept in key order so the emitted header is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, Vec<u8>>);

impl Metadata {
    /// Create an empty metadata map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, validating the key.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let key = key.into();
        validate_key(&key)?;
        self.0.insert(key, value.into());
        Ok(())
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Encode the map as an `Upload-Metadata` header value.
    ///
    /// Returns `None` when the map is empty; the header is omitted entirely
    /// in that case. Entries with empty values are encoded as the bare key.
    pub fn to_header_value(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .0
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{key} {}", BASE64.encode(value))
                }
            })
            .collect();
        Some(pairs.join(","))
    }

    /// Parse an `Upload-Metadata` header value back into a map.
    pub fn from_header_value(value: &str) -> Result<Self> {
        let mut metadata = Self::new();
        for pair in value.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            match pair.split_once(' ') {
                Some((key, encoded)) => {
                    let decoded = BASE64.decode(encoded).map_err(|e| {
                        Error::config(format!("metadata value for {key:?} is not valid base64: {e}"))
                    })?;
                    metadata.insert(key, decoded)?;
                }
                None => metadata.insert(pair, Vec::new())?,
            }
        }
        Ok(metadata)
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a Vec<u8>);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || !key.is_ascii() || key.contains(' ') || key.contains(',') {
        return Err(Error::config(format!(
            "metadata key {key:?} must be non-empty ASCII without spaces or commas"
        )));
    }
    Ok(())
}
