// SPDX-License-Identifier: PMPL-1.0-or-later
//! Commit log configuration.
//!
//! Settings come either from a flat property map with dotted keys (the
//! server-wide configuration format) or from a JSON file. Keys, relative to
//! a prefix such as `Tabula.CommitLog`:
//!
//! - `RollLimit`: fragment size in bytes before rotation (`K`/`M`/`G` suffixes)
//! - `Compressor`: codec spec, e.g. `zstd`, `lz4` or `zlib --best`
//! - `FragmentRemoval.RangeReferenceRequired`: purge needs per-log confirmation
//! - `SkipErrors`: replay skips corrupt fragments instead of failing
//! - `Replication.Data` / `Replication.Metadata`: replication factors

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{create_block_codec, BlockCodec};
use crate::error::{CommitLogError, CommitLogResult};

/// A flat map of dotted configuration keys to string values.
pub type Properties = BTreeMap<String, String>;

/// Default fragment size before rotation (100 MiB).
pub const DEFAULT_ROLL_LIMIT: u64 = 100 * 1024 * 1024;

/// Default codec spec.
pub const DEFAULT_COMPRESSOR: &str = "lz4";

/// Configuration for a commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitLogConfig {
    /// Roll to a new fragment once the current one exceeds this many bytes.
    pub roll_limit: u64,
    /// Block codec spec.
    pub compressor: String,
    /// Only purge fragments whose log directory the caller has confirmed.
    pub range_reference_required: bool,
    /// Skip corrupt fragments during replay instead of failing.
    pub skip_errors: bool,
    /// Replication factor for user logs (-1 = filesystem default).
    pub replication: i32,
    /// Replication factor for metadata logs (-1 = filesystem default).
    pub metadata_replication: i32,
}

impl Default for CommitLogConfig {
    fn default() -> Self {
        Self {
            roll_limit: DEFAULT_ROLL_LIMIT,
            compressor: DEFAULT_COMPRESSOR.to_string(),
            range_reference_required: true,
            skip_errors: false,
            replication: -1,
            metadata_replication: -1,
        }
    }
}

impl CommitLogConfig {
    /// Read settings under `prefix`, falling back to defaults for absent
    /// keys.
    pub fn from_properties(props: &Properties, prefix: &str) -> CommitLogResult<Self> {
        let key = |name: &str| format!("{prefix}.{name}");
        let mut config = Self::default();

        if let Some(value) = props.get(&key("RollLimit")) {
            config.roll_limit = parse_byte_size(value)?;
        }
        if let Some(value) = props.get(&key("Compressor")) {
            config.compressor = value.trim().to_string();
        }
        if let Some(value) = props.get(&key("FragmentRemoval.RangeReferenceRequired")) {
            config.range_reference_required = parse_bool(value)?;
        }
        if let Some(value) = props.get(&key("SkipErrors")) {
            config.skip_errors = parse_bool(value)?;
        }
        if let Some(value) = props.get(&key("Replication.Data")) {
            config.replication = parse_replication(value)?;
        }
        if let Some(value) = props.get(&key("Replication.Metadata")) {
            config.metadata_replication = parse_replication(value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> CommitLogResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable, including that the codec spec parses.
    pub fn validate(&self) -> CommitLogResult<()> {
        if self.roll_limit == 0 {
            return Err(CommitLogError::Config("RollLimit must be positive".to_string()));
        }
        self.codec()?;
        Ok(())
    }

    /// Instantiate the configured codec.
    pub fn codec(&self) -> CommitLogResult<Box<dyn BlockCodec>> {
        Ok(create_block_codec(&self.compressor)?)
    }

    /// Replication factor for a metadata or user log.
    pub fn replication_for(&self, is_meta: bool) -> i32 {
        if is_meta {
            self.metadata_replication
        } else {
            self.replication
        }
    }
}

/// Parse a byte count with an optional `K`, `M` or `G` (binary) suffix.
pub fn parse_byte_size(value: &str) -> CommitLogResult<u64> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last() {
        Some((idx, 'k' | 'K')) => (&value[..idx], 1u64 << 10),
        Some((idx, 'm' | 'M')) => (&value[..idx], 1u64 << 20),
        Some((idx, 'g' | 'G')) => (&value[..idx], 1u64 << 30),
        _ => (value, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| CommitLogError::Config(format!("invalid byte size '{value}'")))
}

fn parse_bool(value: &str) -> CommitLogResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(CommitLogError::Config(format!("invalid boolean '{other}'"))),
    }
}

fn parse_replication(value: &str) -> CommitLogResult<i32> {
    value
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|r| *r >= -1)
        .ok_or_else(|| CommitLogError::Config(format!("invalid replication factor '{value}'")))
}
