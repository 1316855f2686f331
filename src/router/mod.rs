//! Key to shard routing
//!
//! Maps `(bucket, key)` to the physical shard table that holds it. Routing is
//! a pure function of the key and the bucket configuration, so every instance
//! and every restart agrees on where a key lives.

use std::io::Cursor;
use std::sync::Arc;

use crate::config::{shard_table_name, Configuration, HashAlgorithm};
use crate::errors::{Error, Result};

#[cfg(test)]
mod tests;

/// Separates the components of a composite key before hashing.
pub const KEY_SEPARATOR: u8 = 0;

#[derive(Clone, Debug)]
pub struct Router {
    config: Arc<Configuration>,
}

impl Router {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self { config }
    }

    /// Physical table name for `key` in `bucket`.
    pub fn route(&self, bucket: &str, key: &str) -> Result<String> {
        let shard = self.shard_index(bucket, key.as_bytes())?;
        Ok(shard_table_name(bucket, shard))
    }

    /// Same as [`Router::route`] for buckets keyed by several columns.
    pub fn route_composite(&self, bucket: &str, key: &[&str]) -> Result<String> {
        let settings = self.config.bucket(bucket)?;
        if key.len() != settings.key_column_count as usize {
            return Err(Error::Configuration(format!(
                "bucket '{}' is keyed by {} column(s), got {}",
                bucket,
                settings.key_column_count,
                key.len()
            )));
        }

        let mut bytes = Vec::with_capacity(key.iter().map(|k| k.len() + 1).sum());
        for (i, part) in key.iter().enumerate() {
            if i > 0 {
                bytes.push(KEY_SEPARATOR);
            }
            bytes.extend_from_slice(part.as_bytes());
        }

        let shard = self.shard_index(bucket, &bytes)?;
        Ok(shard_table_name(bucket, shard))
    }

    pub fn shard_index(&self, bucket: &str, key: &[u8]) -> Result<u32> {
        let settings = self.config.bucket(bucket)?;
        let digest = digest(settings.hash_algorithm, key)?;
        Ok(reduce(&digest, settings.shard_count))
    }
}

/// Hash `key` with `algorithm`. Bytes come out in big-endian order.
pub fn digest(algorithm: HashAlgorithm, key: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        HashAlgorithm::Md5 => Ok(md5::compute(key).0.to_vec()),
        HashAlgorithm::Murmur3 => {
            let hash = murmur3::murmur3_32(&mut Cursor::new(key), 0)?;
            Ok(hash.to_be_bytes().to_vec())
        }
    }
}

/// Reads `digest` as a base-256 big-endian integer and reduces it modulo
/// `modulus`, one byte at a time so digests of any width fit in a u64.
pub fn reduce(digest: &[u8], modulus: u32) -> u32 {
    let modulus = u64::from(modulus.max(1));
    let remainder = digest
        .iter()
        .fold(0u64, |acc, &byte| (acc * 256 + u64::from(byte)) % modulus);
    remainder as u32
}
