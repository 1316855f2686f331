use std::io::Write;
use std::time::Duration;

use super::*;

pub const SAMPLE: &str = r#"
[database]
host = "db.internal"
name = "cache"
user = "cache"
password = "secret"

[buckets.sessions]
key_column_count = 2
shard_count = 4
hash_algorithm = "murmur3"

[buckets.sessions.eviction]
policy = "truncate"
partition_time_range_seconds = 600
active_partition_count = 3
retained_partition_count = 1

[buckets.profiles]
shard_count = 2
"#;

#[test]
fn test_parse_sample() {
    let config = Configuration::from_toml_str(SAMPLE).unwrap();

    assert_eq!(config.database.host, "db.internal");
    assert_eq!(config.database.port, DEFAULT_DB_PORT);
    assert_eq!(config.buckets.len(), 2);

    let sessions = config.bucket("sessions").unwrap();
    assert_eq!(sessions.key_column_count, 2);
    assert_eq!(sessions.shard_count, 4);
    assert_eq!(sessions.hash_algorithm, HashAlgorithm::Murmur3);
    assert!(sessions.eviction.is_truncate());
    assert_eq!(sessions.eviction.partition_time_range_seconds, 600);
}

#[test]
fn test_bucket_defaults() {
    let config = Configuration::from_toml_str(SAMPLE).unwrap();
    let profiles = config.bucket("profiles").unwrap();

    assert_eq!(profiles.key_column_count, DEFAULT_KEY_COLUMN_COUNT);
    assert_eq!(profiles.hash_algorithm, HashAlgorithm::Md5);
    assert_eq!(profiles.eviction.kind, EvictionKind::None);
    assert_eq!(profiles.eviction.partition_time_range_seconds, DEFAULT_PARTITION_TIME_RANGE);
    assert_eq!(profiles.eviction.active_partition_count, DEFAULT_ACTIVE_PARTITION_COUNT);
    assert_eq!(profiles.eviction.retained_partition_count, DEFAULT_RETAINED_PARTITION_COUNT);
}

#[test]
fn test_unknown_bucket() {
    let config = Configuration::from_toml_str(SAMPLE).unwrap();
    assert!(matches!(config.bucket("missing"), Err(Error::UnknownBucket(_))));
}

#[test]
fn test_unsupported_hash_algorithm() {
    let result = Configuration::from_toml_str(
        r#"
[buckets.b]
hash_algorithm = "sha1"
"#,
    );
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_zero_time_range_rejected() {
    let result = Configuration::from_toml_str(
        r#"
[buckets.b.eviction]
policy = "truncate"
partition_time_range_seconds = 0
"#,
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_oversized_time_range_rejected() {
    let result = Configuration::from_toml_str(
        r#"
[buckets.b.eviction]
policy = "truncate"
partition_time_range_seconds = 4611686018427387904
"#,
    );
    assert!(matches!(result, Err(Error::Configuration(_))));

    let result = Configuration::from_toml_str(&format!(
        r#"
[buckets.b.eviction]
policy = "truncate"
partition_time_range_seconds = {}
active_partition_count = 1
retained_partition_count = 0
"#,
        MAX_PARTITION_SPAN_SECONDS / 2
    ));
    assert!(result.is_ok());
}

#[test]
fn test_zero_time_range_ignored_without_truncate() {
    let config = Configuration::from_toml_str(
        r#"
[buckets.b.eviction]
policy = "delete"
partition_time_range_seconds = 0
"#,
    )
    .unwrap();
    assert_eq!(config.rotation_interval(), None);
}

#[test]
fn test_zero_counts_rejected() {
    for body in [
        "[buckets.b]\nshard_count = 0\n",
        "[buckets.b]\nkey_column_count = 0\n",
        "[buckets.b.eviction]\npolicy = \"truncate\"\nactive_partition_count = 0\n",
    ] {
        let result = Configuration::from_toml_str(body);
        assert!(matches!(result, Err(Error::Configuration(_))), "accepted: {}", body);
    }
}

#[test]
fn test_bucket_names() {
    for name in ["Sessions", "1st", "a-b", "with space"] {
        let body = format!("[buckets.\"{}\"]\n", name);
        assert!(
            matches!(Configuration::from_toml_str(&body), Err(Error::Configuration(_))),
            "accepted bucket name {:?}",
            name
        );
    }

    let long = "b".repeat(MAX_BUCKET_NAME_LEN + 1);
    let body = format!("[buckets.{}]\n", long);
    assert!(Configuration::from_toml_str(&body).is_err());

    assert!(Configuration::from_toml_str("[buckets._user_2]\n").is_ok());
}

#[test]
fn test_empty_configuration_rejected() {
    assert!(matches!(
        Configuration::from_toml_str(""),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_rotation_interval_defaults_to_half_window() {
    let config = Configuration::from_toml_str(SAMPLE).unwrap();
    assert_eq!(config.rotation_interval(), Some(Duration::from_secs(300)));
}

#[test]
fn test_rotation_interval_must_be_below_window() {
    let body = format!("{}\n[scheduler]\ninterval_seconds = 600\n", SAMPLE);
    assert!(matches!(
        Configuration::from_toml_str(&body),
        Err(Error::Configuration(_))
    ));

    let body = format!("{}\n[scheduler]\ninterval_seconds = 599\n", SAMPLE);
    let config = Configuration::from_toml_str(&body).unwrap();
    assert_eq!(config.rotation_interval(), Some(Duration::from_secs(599)));
}

#[test]
fn test_shard_tables() {
    let config = Configuration::from_toml_str(SAMPLE).unwrap();
    let tables: Vec<String> = config.bucket("sessions").unwrap().shard_tables("sessions").collect();
    assert_eq!(tables, vec!["sessions_0", "sessions_1", "sessions_2", "sessions_3"]);
}

#[test]
fn test_settings_json_round_trip_preserves_equality() {
    let config = Configuration::from_toml_str(SAMPLE).unwrap();
    let bucket = config.bucket("sessions").unwrap();

    let json = serde_json::to_string(bucket).unwrap();
    assert!(json.contains("\"policy\":\"truncate\""));

    let restored: BucketConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(&restored, bucket);
}

#[test]
fn test_password_not_in_debug_output() {
    let config = Configuration::from_toml_str(SAMPLE).unwrap();
    let debug = format!("{:?}", config.database);
    assert!(!debug.contains("secret"));
    assert!(debug.contains("db.internal"));
}

#[test]
fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();

    let config = Configuration::from_file(&path).unwrap();
    assert_eq!(config.buckets.len(), 2);

    let missing = Configuration::from_file(dir.path().join("missing.toml"));
    assert!(matches!(missing, Err(Error::IoError(_))));
}
