//! Time window partition rotation
//!
//! Truncate-policy shard tables are range partitioned on `exp`. Each child
//! covers one window of an epoch-aligned grid, so every instance computes the
//! same boundaries. Eviction is a `drop table` of the children that fell out
//! of the kept set instead of row-by-row deletes.

use std::collections::BTreeSet;
use std::fmt;

use super::Session;
use crate::config::EvictionPolicy;
use crate::errors::{Error, Result};

/// Half-open range `[start, end)` of epoch seconds. Never empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    start: i64,
    end: i64,
}

impl Window {
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start <= ts && ts < self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// `count` consecutive windows of `time_range` seconds, the first one
/// containing `now`.
pub fn active_windows(now: i64, time_range: i64, count: u32) -> Result<Vec<Window>> {
    if time_range <= 0 {
        return Err(Error::InvalidWindow { start: now, end: now });
    }

    let anchor = grid_anchor(now, time_range)?;
    (0..i64::from(count))
        .map(|offset| window_at(anchor, offset, time_range))
        .collect()
}

/// The `count` windows immediately preceding the one containing `now`,
/// oldest first.
pub fn retained_windows(now: i64, time_range: i64, count: u32) -> Result<Vec<Window>> {
    if time_range <= 0 {
        return Err(Error::InvalidWindow { start: now, end: now });
    }

    let anchor = grid_anchor(now, time_range)?;
    (1..=i64::from(count))
        .rev()
        .map(|offset| window_at(anchor, -offset, time_range))
        .collect()
}

/// Start of the grid window containing `now`.
fn grid_anchor(now: i64, time_range: i64) -> Result<i64> {
    now.checked_sub(now.rem_euclid(time_range)).ok_or_else(|| {
        Error::Configuration(format!(
            "no {}s partition window contains {}",
            time_range, now
        ))
    })
}

/// Window `offset` steps away from the one starting at `anchor`.
fn window_at(anchor: i64, offset: i64, time_range: i64) -> Result<Window> {
    let start = offset
        .checked_mul(time_range)
        .and_then(|shift| anchor.checked_add(shift));
    let end = start.and_then(|start| start.checked_add(time_range));

    match (start, end) {
        (Some(start), Some(end)) => Window::new(start, end),
        _ => Err(Error::Configuration(format!(
            "partition window {} x {}s from {} is outside the epoch seconds range",
            offset, time_range, anchor
        ))),
    }
}

pub fn partition_name(table: &str, window: &Window) -> String {
    format!("{}_{}_{}", table, window.start, window.end)
}

/// Existing partitions that are not in `keep`, in the order they were listed.
pub fn stale_partitions<I>(existing: I, keep: &BTreeSet<String>) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    existing
        .into_iter()
        .filter(|name| !keep.contains(name))
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub created: Vec<String>,
    pub dropped: Vec<String>,
}

/// Rotation parameters of one truncate-policy bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rotator {
    time_range: i64,
    active: u32,
    retained: u32,
}

impl Rotator {
    /// `None` unless the policy partitions by time.
    pub fn for_policy(policy: &EvictionPolicy) -> Option<Self> {
        policy.is_truncate().then(|| Self {
            time_range: policy.partition_time_range_seconds,
            active: policy.active_partition_count,
            retained: policy.retained_partition_count,
        })
    }

    pub fn new(time_range: i64, active: u32, retained: u32) -> Self {
        Self {
            time_range,
            active,
            retained,
        }
    }

    pub fn active_windows(&self, now: i64) -> Result<Vec<Window>> {
        active_windows(now, self.time_range, self.active)
    }

    /// Names of every partition of `table` that must survive a pass at `now`.
    pub fn kept_partitions(&self, table: &str, now: i64) -> Result<BTreeSet<String>> {
        let retained = retained_windows(now, self.time_range, self.retained)?;
        let active = self.active_windows(now)?;

        Ok(retained
            .iter()
            .chain(active.iter())
            .map(|window| partition_name(table, window))
            .collect())
    }

    pub async fn discover_existing<S>(session: &mut S, table: &str) -> Result<BTreeSet<String>>
    where
        S: Session + ?Sized,
    {
        Ok(session.child_tables(table).await?.into_iter().collect())
    }

    /// Attaches a partition for every window that has none yet. Returns the
    /// names of the partitions created.
    pub async fn ensure_created<S>(
        &self,
        session: &mut S,
        table: &str,
        windows: &[Window],
    ) -> Result<Vec<String>>
    where
        S: Session + ?Sized,
    {
        let existing = Self::discover_existing(&mut *session, table).await?;
        let mut created = Vec::new();

        for window in windows {
            let name = partition_name(table, window);
            if existing.contains(&name) {
                continue;
            }

            let stmt = format!(
                "create table {} partition of {} for values from ({}) to ({})",
                name, table, window.start, window.end
            );
            log::debug!("Create partition '{}' with statement: {}", name, stmt);

            session.execute(&stmt).await?;
            created.push(name);
        }

        Ok(created)
    }

    /// Drops every partition of `table` not named in `keep`. Returns the
    /// names of the partitions dropped.
    pub async fn reconcile_stale<S>(
        &self,
        session: &mut S,
        table: &str,
        keep: &BTreeSet<String>,
    ) -> Result<Vec<String>>
    where
        S: Session + ?Sized,
    {
        let existing = Self::discover_existing(&mut *session, table).await?;
        let stale = stale_partitions(existing, keep);

        for name in &stale {
            log::warn!("Drop expired partition '{}' of '{}'", name, table);
            session.execute(&format!("drop table {}", name)).await?;
        }

        Ok(stale)
    }

    /// Brings `table` to the window set for `now`. Creation always runs
    /// before removal so the window containing `now` stays covered.
    pub async fn rotate<S>(&self, session: &mut S, table: &str, now: i64) -> Result<RotationReport>
    where
        S: Session + ?Sized,
    {
        let windows = self.active_windows(now)?;
        let keep = self.kept_partitions(table, now)?;

        let created = self.ensure_created(&mut *session, table, &windows).await?;
        let dropped = self.reconcile_stale(&mut *session, table, &keep).await?;

        Ok(RotationReport { created, dropped })
    }
}
