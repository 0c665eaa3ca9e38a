//! # Database Migration System
//!
//! Embedded, version-tracked schema migrations. The SQL ships inside the
//! binary (no dependence on a `migrations/` directory being present at the
//! deployed path), versions are recorded in `eligibility_schema_migrations`,
//! and a PostgreSQL advisory lock serializes concurrent initializers:
//!
//! ```sql
//! -- One connection acquires the migration lock
//! SELECT pg_try_advisory_lock(7305441285120001)
//!
//! -- Others wait for the version table to appear
//! SELECT EXISTS (
//!     SELECT FROM information_schema.tables
//!     WHERE table_name = 'eligibility_schema_migrations'
//! )
//! ```
//!
//! That makes `run_all` safe to call from every service instance at startup
//! and from parallel test processes sharing one database.

use sqlx::{PgPool, Row};
use tracing::{debug, info};

/// Advisory lock key for schema initialization.
const MIGRATION_LOCK_KEY: i64 = 7_305_441_285_120_001;

/// A single embedded migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: &'static str,
    /// Human-readable migration name
    pub name: &'static str,
    /// Migration SQL, embedded at compile time
    pub sql: &'static str,
}

/// All migrations in apply order.
const MIGRATIONS: &[Migration] = &[Migration {
    version: "20240815000001",
    name: "create ingest tables",
    sql: include_str!("../../migrations/20240815000001_create_ingest_tables.sql"),
}];

/// Manages database schema migrations with concurrency safety.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply all outstanding migrations, serialized across processes.
    pub async fn run_all(pool: &PgPool) -> Result<(), sqlx::Error> {
        let lock_acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .fetch_one(pool)
            .await?;

        if lock_acquired {
            let result = Self::run_outstanding_migrations(pool).await;

            // Always release the lock
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(MIGRATION_LOCK_KEY)
                .execute(pool)
                .await?;

            result
        } else {
            // Another process is migrating; wait for it to finish
            Self::wait_for_schema_ready(pool).await
        }
    }

    /// Versions that have been applied to this database.
    pub async fn applied_versions(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        Self::ensure_migration_table(pool).await?;
        let rows =
            sqlx::query("SELECT version FROM eligibility_schema_migrations ORDER BY version")
                .fetch_all(pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect())
    }

    /// True when every embedded migration has been applied.
    pub async fn is_current(pool: &PgPool) -> Result<bool, sqlx::Error> {
        let applied = Self::applied_versions(pool).await?;
        Ok(MIGRATIONS
            .iter()
            .all(|migration| applied.iter().any(|version| version == migration.version)))
    }

    async fn run_outstanding_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        Self::ensure_migration_table(pool).await?;
        let applied = Self::applied_versions(pool).await?;

        for migration in MIGRATIONS {
            if applied.iter().any(|version| version == migration.version) {
                debug!(version = migration.version, "migration already applied");
                continue;
            }

            info!(
                version = migration.version,
                name = migration.name,
                "applying migration"
            );
            sqlx::raw_sql(migration.sql).execute(pool).await?;
            Self::record_migration(pool, migration.version).await?;
        }

        Ok(())
    }

    /// Wait for another process to finish initializing the schema.
    async fn wait_for_schema_ready(pool: &PgPool) -> Result<(), sqlx::Error> {
        use tokio::time::{sleep, Duration};

        for _ in 0..60 {
            sleep(Duration::from_millis(500)).await;

            let schema_ready = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_name = 'eligibility_schema_migrations')"
            )
            .fetch_one(pool)
            .await?;

            if schema_ready && Self::is_current(pool).await? {
                return Ok(());
            }
        }

        Err(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "Timeout waiting for schema initialization",
        )))
    }

    async fn ensure_migration_table(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS eligibility_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMP WITHOUT TIME ZONE DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn record_migration(pool: &PgPool, version: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO eligibility_schema_migrations (version) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(version)
        .execute(pool)
        .await?;

        Ok(())
    }
}
