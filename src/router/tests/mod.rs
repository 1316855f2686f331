use std::collections::BTreeMap;

use rand::distr::Alphanumeric;
use rand::Rng;

use super::*;
use crate::config::BucketConfig;
use crate::errors::Error;

fn router(shard_count: u32, hash_algorithm: HashAlgorithm) -> Router {
    keyed_router(shard_count, hash_algorithm, 1)
}

fn keyed_router(shard_count: u32, hash_algorithm: HashAlgorithm, key_column_count: u32) -> Router {
    let mut buckets = BTreeMap::new();
    buckets.insert(
        "docs".to_string(),
        BucketConfig {
            key_column_count,
            shard_count,
            hash_algorithm,
            ..BucketConfig::default()
        },
    );
    Router::new(Arc::new(Configuration {
        buckets,
        ..Configuration::default()
    }))
}

// Fixtures read the digest as a big-endian base-256 integer. They do not
// match a decimal parse of the raw digest bytes, which is not well defined.
#[test]
fn test_md5_fixtures() {
    // md5("hello") = 5d41402abc4b2a76b9719d911017c592
    assert_eq!(router(16, HashAlgorithm::Md5).route("docs", "hello").unwrap(), "docs_2");
    assert_eq!(router(7, HashAlgorithm::Md5).route("docs", "hello").unwrap(), "docs_4");
    assert_eq!(router(3, HashAlgorithm::Md5).route("docs", "hello").unwrap(), "docs_1");
    // md5("") = d41d8cd98f00b204e9800998ecf8427e
    assert_eq!(router(16, HashAlgorithm::Md5).route("docs", "").unwrap(), "docs_14");
}

#[test]
fn test_murmur3_fixtures() {
    // murmur3_x86_32("hello", 0) = 0x248bfa47
    assert_eq!(router(16, HashAlgorithm::Murmur3).route("docs", "hello").unwrap(), "docs_7");
    assert_eq!(router(7, HashAlgorithm::Murmur3).route("docs", "hello").unwrap(), "docs_6");
    assert_eq!(router(7, HashAlgorithm::Murmur3).route("docs", "").unwrap(), "docs_0");
}

#[test]
fn test_digest_bytes() {
    let md5 = digest(HashAlgorithm::Md5, b"hello").unwrap();
    assert_eq!(md5.len(), 16);
    assert_eq!(md5[0], 0x5d);

    let murmur = digest(HashAlgorithm::Murmur3, b"hello").unwrap();
    assert_eq!(murmur, vec![0x24, 0x8b, 0xfa, 0x47]);
}

#[test]
fn test_reduce() {
    assert_eq!(reduce(&[], 5), 0);
    assert_eq!(reduce(&[0x01, 0x00], 1000), 256);
    assert_eq!(reduce(&[0xff; 32], 1), 0);
    assert_eq!(reduce(&[0x24, 0x8b, 0xfa, 0x47], 1_000_000), 0x248b_fa47 % 1_000_000);
}

#[test]
fn test_route_is_deterministic() {
    let first = router(32, HashAlgorithm::Md5);
    let second = router(32, HashAlgorithm::Md5);

    for i in 0..100 {
        let key = format!("key-{}", i);
        let a = first.route("docs", &key).unwrap();
        assert_eq!(a, first.route("docs", &key).unwrap());
        assert_eq!(a, second.route("docs", &key).unwrap());
    }
}

#[test]
fn test_single_shard() {
    let router = router(1, HashAlgorithm::Murmur3);
    for key in ["a", "b", "c"] {
        assert_eq!(router.route("docs", key).unwrap(), "docs_0");
    }
}

#[test]
fn test_unknown_bucket() {
    let result = router(4, HashAlgorithm::Md5).route("other", "key");
    assert!(matches!(result, Err(Error::UnknownBucket(ref b)) if b == "other"));
}

#[test]
fn test_composite_key() {
    let router = keyed_router(5, HashAlgorithm::Md5, 2);
    assert_eq!(router.route_composite("docs", &["tenant", "user"]).unwrap(), "docs_3");

    let single = self::router(5, HashAlgorithm::Md5);
    assert_eq!(
        single.route_composite("docs", &["only"]).unwrap(),
        single.route("docs", "only").unwrap()
    );
    // Component boundaries matter.
    assert_eq!(
        router.shard_index("docs", b"ab\0c").unwrap(),
        reduce(&digest(HashAlgorithm::Md5, b"ab\0c").unwrap(), 5)
    );
}

#[test]
fn test_composite_key_arity_checked() {
    let router = keyed_router(5, HashAlgorithm::Md5, 2);
    assert!(matches!(
        router.route_composite("docs", &["tenant"]),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        router.route_composite("docs", &["tenant", "user", "extra"]),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        router.route_composite("other", &["tenant", "user"]),
        Err(Error::UnknownBucket(_))
    ));
}

#[test]
fn test_distribution_is_uniform() {
    const SAMPLES: usize = 40_000;
    const SHARDS: u32 = 8;

    for algorithm in [HashAlgorithm::Md5, HashAlgorithm::Murmur3] {
        let router = router(SHARDS, algorithm);
        let mut counts = [0usize; SHARDS as usize];
        let mut rng = rand::rng();

        for _ in 0..SAMPLES {
            let key: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(16)
                .map(char::from)
                .collect();
            counts[router.shard_index("docs", key.as_bytes()).unwrap() as usize] += 1;
        }

        let expected = SAMPLES / SHARDS as usize;
        for (shard, &count) in counts.iter().enumerate() {
            let deviation = (count as f64 - expected as f64).abs() / expected as f64;
            assert!(
                deviation < 0.1,
                "{:?}: shard {} got {} keys, expected about {}",
                algorithm, shard, count, expected
            );
        }
    }
}
