//! Cache configuration model
//!
//! Loaded once at startup from a TOML file, validated, then shared read-only
//! (`Arc<Configuration>`) by the router, rotator, bootstrapper and scheduler.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

#[cfg(test)]
mod tests;

pub const DEFAULT_SHARD_COUNT: u32 = 1;
pub const DEFAULT_KEY_COLUMN_COUNT: u32 = 1;
pub const DEFAULT_PARTITION_TIME_RANGE: i64 = 3600;
pub const DEFAULT_ACTIVE_PARTITION_COUNT: u32 = 2;
pub const DEFAULT_RETAINED_PARTITION_COUNT: u32 = 1;
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_ACQUIRE_TIMEOUT: u64 = 30;
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

/// Upper bound on the time covered by one bucket's retained and active
/// partitions, about 1000 years.
pub const MAX_PARTITION_SPAN_SECONDS: i64 = 1000 * 366 * 24 * 3600;

/// Derived partition names are `<bucket>_<shard>_<start>_<end>`; this keeps
/// them below the 63 byte identifier limit of the backend.
pub const MAX_BUCKET_NAME_LEN: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Murmur3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionKind {
    None,
    Delete,
    Truncate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvictionPolicy {
    #[serde(rename = "policy")]
    pub kind: EvictionKind,
    pub partition_time_range_seconds: i64,
    pub active_partition_count: u32,
    pub retained_partition_count: u32,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            kind: EvictionKind::None,
            partition_time_range_seconds: DEFAULT_PARTITION_TIME_RANGE,
            active_partition_count: DEFAULT_ACTIVE_PARTITION_COUNT,
            retained_partition_count: DEFAULT_RETAINED_PARTITION_COUNT,
        }
    }
}

impl EvictionPolicy {
    pub fn is_truncate(&self) -> bool {
        self.kind == EvictionKind::Truncate
    }
}

/// Everything persisted in a bucket's settings record. Two configurations
/// that compare equal here describe the same physical layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BucketConfig {
    pub key_column_count: u32,
    pub shard_count: u32,
    pub hash_algorithm: HashAlgorithm,
    pub eviction: EvictionPolicy,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            key_column_count: DEFAULT_KEY_COLUMN_COUNT,
            shard_count: DEFAULT_SHARD_COUNT,
            hash_algorithm: HashAlgorithm::Md5,
            eviction: EvictionPolicy::default(),
        }
    }
}

impl BucketConfig {
    /// Physical shard table names, in shard index order.
    pub fn shard_tables<'a>(&'a self, bucket: &'a str) -> impl Iterator<Item = String> + 'a {
        (0..self.shard_count).map(move |shard| shard_table_name(bucket, shard))
    }
}

pub fn shard_table_name(bucket: &str, shard: u32) -> String {
    format!("{}_{}", bucket, shard)
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_DB_PORT,
            name: String::new(),
            user: String::new(),
            password: String::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_seconds: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

// Keeps the password out of startup logs.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_seconds", &self.acquire_timeout_seconds)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Rotation period. Defaults to half of the smallest truncate time range.
    pub interval_seconds: Option<u64>,
    /// Upper bound of the random delay added to each period, as a fraction of it.
    pub jitter_ratio: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: None,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub buckets: BTreeMap<String, BucketConfig>,
}

impl Configuration {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Load configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;

        log::info!("Configuration loaded: {} bucket(s)", config.buckets.len());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Configuration = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn bucket(&self, name: &str) -> Result<&BucketConfig> {
        self.buckets
            .get(name)
            .ok_or_else(|| Error::UnknownBucket(name.to_string()))
    }

    /// Buckets whose shard tables are range partitioned on `exp`.
    pub fn truncate_buckets(&self) -> impl Iterator<Item = (&String, &BucketConfig)> {
        self.buckets.iter().filter(|(_, b)| b.eviction.is_truncate())
    }

    /// Period of the background rotation loop, or `None` when no bucket
    /// needs rotating.
    pub fn rotation_interval(&self) -> Option<Duration> {
        let smallest = self
            .truncate_buckets()
            .map(|(_, b)| b.eviction.partition_time_range_seconds)
            .min()?;

        let seconds = match self.scheduler.interval_seconds {
            Some(seconds) => seconds,
            None => (smallest as u64 / 2).max(1),
        };
        Some(Duration::from_secs(seconds))
    }

    pub fn validate(&self) -> Result<()> {
        if self.buckets.is_empty() {
            return Err(Error::Configuration("no buckets configured".into()));
        }

        for (name, bucket) in &self.buckets {
            validate_bucket_name(name)?;
            validate_bucket(name, bucket)?;
        }

        if !(0.0..1.0).contains(&self.scheduler.jitter_ratio) {
            return Err(Error::Configuration(format!(
                "scheduler jitter_ratio must be in [0, 1), got {}",
                self.scheduler.jitter_ratio
            )));
        }

        if let Some(interval) = self.scheduler.interval_seconds {
            if interval == 0 {
                return Err(Error::Configuration(
                    "scheduler interval_seconds must be positive".into(),
                ));
            }
            // A period at least as long as a window lets "now" outrun the
            // newest active partition between passes.
            for (name, bucket) in self.truncate_buckets() {
                let range = bucket.eviction.partition_time_range_seconds;
                if interval as i64 >= range {
                    return Err(Error::Configuration(format!(
                        "scheduler interval_seconds ({}) must be smaller than partition_time_range_seconds ({}) of bucket '{}'",
                        interval, range, name
                    )));
                }
            }
        }

        Ok(())
    }
}

fn validate_bucket_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !valid_start || !valid_rest {
        return Err(Error::Configuration(format!(
            "bucket name '{}' must match [a-z_][a-z0-9_]*",
            name
        )));
    }

    if name.len() > MAX_BUCKET_NAME_LEN {
        return Err(Error::Configuration(format!(
            "bucket name '{}' is longer than {} characters",
            name, MAX_BUCKET_NAME_LEN
        )));
    }

    Ok(())
}

fn validate_bucket(name: &str, bucket: &BucketConfig) -> Result<()> {
    if bucket.key_column_count == 0 {
        return Err(Error::Configuration(format!(
            "bucket '{}': key_column_count must be at least 1",
            name
        )));
    }

    if bucket.shard_count == 0 {
        return Err(Error::Configuration(format!(
            "bucket '{}': shard_count must be at least 1",
            name
        )));
    }

    let eviction = &bucket.eviction;
    if eviction.is_truncate() {
        if eviction.partition_time_range_seconds <= 0 {
            return Err(Error::Configuration(format!(
                "bucket '{}': partition_time_range_seconds must be positive, got {}",
                name, eviction.partition_time_range_seconds
            )));
        }
        if eviction.active_partition_count == 0 {
            return Err(Error::Configuration(format!(
                "bucket '{}': active_partition_count must be at least 1",
                name
            )));
        }

        // Retained, current and active windows must all fit around any
        // present-day timestamp.
        let windows = i64::from(eviction.active_partition_count)
            + i64::from(eviction.retained_partition_count)
            + 1;
        let span = eviction
            .partition_time_range_seconds
            .checked_mul(windows)
            .filter(|span| *span <= MAX_PARTITION_SPAN_SECONDS);
        if span.is_none() {
            return Err(Error::Configuration(format!(
                "bucket '{}': {} partition(s) of {}s do not fit in {}s",
                name, windows, eviction.partition_time_range_seconds, MAX_PARTITION_SPAN_SECONDS
            )));
        }
    }

    Ok(())
}
