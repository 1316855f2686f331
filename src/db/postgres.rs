use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions};
use sqlx::Postgres;

use super::{Driver, Session, Transaction, SETTINGS_TABLE};
use crate::config::DatabaseConfig;
use crate::errors::{Error, Result};

const CHILD_TABLES_QUERY: &str = "select child.relname::text \
    from pg_inherits inherits \
    join pg_class parent on inherits.inhparent = parent.oid \
    join pg_class child on inherits.inhrelid = child.oid \
    where parent.relname = $1::name \
    order by child.relname";

/// Connection driver backed by a `sqlx` Postgres pool.
#[derive(Clone)]
pub struct PgDriver {
    pool: PgPool,
}

impl PgDriver {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        log::info!(
            "Connect to postgres://{}@{}:{}/{}",
            config.user, config.host, config.port, config.name
        );

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Driver for PgDriver {
    async fn session(&self) -> Result<Box<dyn Session>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgSession { conn }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgSession {
    conn: PoolConnection<Postgres>,
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&mut self, statement: &str) -> Result<()> {
        execute(&mut self.conn, statement).await
    }

    async fn child_tables(&mut self, parent: &str) -> Result<Vec<String>> {
        child_tables(&mut self.conn, parent).await
    }

    async fn advisory_lock(&mut self, id: i64) -> Result<()> {
        advisory_lock(&mut self.conn, id).await
    }

    async fn load_settings(&mut self) -> Result<Vec<(String, String)>> {
        load_settings(&mut self.conn).await
    }

    async fn store_settings(&mut self, bucket: &str, settings: &str) -> Result<()> {
        store_settings(&mut self.conn, bucket, settings).await
    }
}

#[async_trait]
impl Session for PgTransaction {
    async fn execute(&mut self, statement: &str) -> Result<()> {
        execute(&mut self.tx, statement).await
    }

    async fn child_tables(&mut self, parent: &str) -> Result<Vec<String>> {
        child_tables(&mut self.tx, parent).await
    }

    async fn advisory_lock(&mut self, id: i64) -> Result<()> {
        advisory_lock(&mut self.tx, id).await
    }

    async fn load_settings(&mut self) -> Result<Vec<(String, String)>> {
        load_settings(&mut self.tx).await
    }

    async fn store_settings(&mut self, bucket: &str, settings: &str) -> Result<()> {
        store_settings(&mut self.tx, bucket, settings).await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn execute(conn: &mut PgConnection, statement: &str) -> Result<()> {
    sqlx::query(statement).execute(conn).await?;
    Ok(())
}

async fn child_tables(conn: &mut PgConnection, parent: &str) -> Result<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>(CHILD_TABLES_QUERY)
        .bind(parent)
        .fetch_all(conn)
        .await?;
    Ok(names)
}

async fn advisory_lock(conn: &mut PgConnection, id: i64) -> Result<()> {
    sqlx::query("select pg_advisory_xact_lock($1)")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn load_settings(conn: &mut PgConnection) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query_as::<_, (String, Option<String>)>(&format!(
        "select bucket, settings from {}",
        SETTINGS_TABLE
    ))
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|(bucket, settings)| match settings {
            Some(settings) => Ok((bucket, settings)),
            None => Err(Error::SchemaDrift(format!(
                "bucket '{}' has no stored settings",
                bucket
            ))),
        })
        .collect()
}

async fn store_settings(conn: &mut PgConnection, bucket: &str, settings: &str) -> Result<()> {
    sqlx::query(&format!(
        "insert into {}(bucket, settings) values($1, $2)",
        SETTINGS_TABLE
    ))
    .bind(bucket)
    .bind(settings)
    .execute(conn)
    .await?;
    Ok(())
}
