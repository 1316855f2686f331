use std::collections::BTreeMap;
use std::sync::Arc;

use super::rotator::{RotationReport, Rotator};
use super::scheduler::{Clock, Scheduler, SchedulerHandle};
use super::{Driver, Session, Transaction, SETTINGS_LOCK_ID, SETTINGS_TABLE};
use crate::config::{shard_table_name, BucketConfig, Configuration};
use crate::errors::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Empty settings catalog: shard tables, partitions and settings records
    /// were created in one transaction.
    Provisioned,
    /// Persisted settings match the configuration; nothing was written.
    Validated,
}

/// `create table` statement for one shard table of `bucket`.
pub fn shard_table_ddl(table: &str, bucket: &BucketConfig, if_not_exists: bool) -> String {
    let key_columns: Vec<String> = (0..bucket.key_column_count)
        .map(|i| format!("key_{}", i))
        .collect();

    let mut stmt = String::from("create table ");
    if if_not_exists {
        stmt.push_str("if not exists ");
    }
    stmt.push_str(table);
    stmt.push('(');
    for column in &key_columns {
        stmt.push_str(column);
        stmt.push_str(" varchar not null,");
    }
    stmt.push_str("document text not null,");
    stmt.push_str("exp numeric not null,");
    stmt.push_str(&format!(
        "constraint {}_pk primary key ({},exp)",
        table,
        key_columns.join(",")
    ));
    stmt.push(')');

    if bucket.eviction.is_truncate() {
        stmt.push_str(" partition by range (exp)");
    }

    stmt
}

/// Creates every shard table of `bucket` and, for truncate buckets, the
/// partitions of the window set at `now`.
pub(crate) async fn provision_bucket<S>(
    session: &mut S,
    name: &str,
    bucket: &BucketConfig,
    now: i64,
    if_not_exists: bool,
) -> Result<RotationReport>
where
    S: Session + ?Sized,
{
    let rotator = Rotator::for_policy(&bucket.eviction);
    let mut report = RotationReport::default();

    for shard in 0..bucket.shard_count {
        let table = shard_table_name(name, shard);
        let stmt = shard_table_ddl(&table, bucket, if_not_exists);
        log::debug!("Create table '{}' with statement: {}", table, stmt);
        session.execute(&stmt).await?;

        if let Some(rotator) = &rotator {
            let rotated = rotator.rotate(&mut *session, &table, now).await?;
            report.created.extend(rotated.created);
            report.dropped.extend(rotated.dropped);
        }
    }

    Ok(report)
}

/// Startup pass that provisions or validates the physical layout.
///
/// Runs under a transaction scoped advisory lock so instances racing on the
/// same database bootstrap one after another. The first instance finds an
/// empty settings catalog and provisions; later ones compare the persisted
/// settings against their own configuration and refuse to start on drift.
pub struct SchemaBootstrapper {
    config: Arc<Configuration>,
    driver: Arc<dyn Driver>,
    clock: Clock,
}

impl SchemaBootstrapper {
    pub fn new(config: Arc<Configuration>, driver: Arc<dyn Driver>) -> Self {
        Self {
            config,
            driver,
            clock: Clock::system(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Bootstraps, then hands over to the rotation scheduler.
    pub async fn start(self) -> Result<SchedulerHandle> {
        let outcome = self.run().await?;
        log::info!("Bootstrap finished: {:?}", outcome);

        let handle = Scheduler::new(self.config, self.driver)
            .with_clock(self.clock)
            .start()
            .await;
        Ok(handle)
    }

    pub async fn run(&self) -> Result<BootstrapOutcome> {
        log::info!("Bootstrap state: Uninitialized");
        self.ensure_catalog().await?;
        log::info!("Bootstrap state: CatalogReady");

        let mut tx = self.driver.begin().await?;

        log::debug!("Acquire lock on settings table.");
        tx.advisory_lock(SETTINGS_LOCK_ID).await?;
        log::info!("Bootstrap state: LockHeld");

        let persisted = load_persisted(&mut *tx).await?;

        if persisted.is_empty() {
            if let Err(e) = self.provision(tx).await {
                log::error!("Bootstrap state: Aborted");
                return Err(e);
            }
            log::info!("Bootstrap state: Provisioned");
            return Ok(BootstrapOutcome::Provisioned);
        }

        let drift = find_drift(&persisted, &self.config.buckets);
        tx.rollback().await?;

        if !drift.is_empty() {
            log::error!("Bootstrap state: Aborted");
            return Err(Error::SchemaDrift(format!(
                "database contains a different cache configuration: {}",
                drift.join("; ")
            )));
        }

        log::info!("Bootstrap state: Validated");
        Ok(BootstrapOutcome::Validated)
    }

    async fn ensure_catalog(&self) -> Result<()> {
        let mut session = self.driver.session().await?;
        session
            .execute(&format!(
                "create table if not exists {}(bucket varchar(128) not null primary key, settings varchar(1024))",
                SETTINGS_TABLE
            ))
            .await
    }

    async fn provision(&self, mut tx: Box<dyn Transaction>) -> Result<()> {
        log::info!("Register cache settings to database.");
        let now = self.clock.now();

        for (name, bucket) in &self.config.buckets {
            let report = provision_bucket(&mut *tx, name, bucket, now, false).await?;
            log::info!(
                "Provisioned bucket '{}': {} shard(s), {} partition(s)",
                name,
                bucket.shard_count,
                report.created.len()
            );
        }

        for (name, bucket) in &self.config.buckets {
            let settings = serde_json::to_string(bucket)?;
            tx.store_settings(name, &settings).await?;
        }

        tx.commit().await
    }
}

async fn load_persisted<S>(session: &mut S) -> Result<BTreeMap<String, BucketConfig>>
where
    S: Session + ?Sized,
{
    let mut persisted = BTreeMap::new();
    for (bucket, settings) in session.load_settings().await? {
        let settings: BucketConfig = serde_json::from_str(&settings)?;
        persisted.insert(bucket, settings);
    }
    log::debug!("Database configuration: {:?}", persisted);
    Ok(persisted)
}

/// One line per bucket whose persisted and live settings disagree.
pub(crate) fn find_drift(
    persisted: &BTreeMap<String, BucketConfig>,
    live: &BTreeMap<String, BucketConfig>,
) -> Vec<String> {
    let mut drift = Vec::new();

    for (name, settings) in live {
        match persisted.get(name) {
            None => drift.push(format!("bucket '{}' is not provisioned in the database", name)),
            Some(stored) if stored != settings => drift.push(format!(
                "bucket '{}' settings changed: database has {:?}, configuration has {:?}",
                name, stored, settings
            )),
            Some(_) => {}
        }
    }

    for name in persisted.keys().filter(|name| !live.contains_key(*name)) {
        drift.push(format!("bucket '{}' is provisioned but no longer configured", name));
    }

    drift
}
