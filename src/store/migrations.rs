//! Schema management.
//!
//! Migrations are the ordered SQL files under `migrations/`, tracked by
//! sqlx in its version table. Startup policy: an empty database is created
//! at head revision, a version table left behind by a previous archiver
//! generation is removed before upgrading, and an out-of-date schema is
//! reported as `SchemaUpgradeNeeded` so the operator runs
//! `archive-updatedb` before serving.

use sqlx::PgPool;

use crate::error::ArchiveError;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Version tables written by earlier generations of the archiver.
const LEGACY_VERSION_TABLES: &[&str] = &["patch", "alembic_version"];

async fn table_exists(pool: &PgPool, table: &str) -> Result<bool, sqlx::Error> {
    let found: Option<i32> = sqlx::query_scalar(
        "SELECT 1 FROM information_schema.tables
         WHERE table_schema = current_schema() AND table_name = $1",
    )
    .bind(table)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

async fn applied_head(pool: &PgPool) -> Result<Option<i64>, sqlx::Error> {
    if !table_exists(pool, "_sqlx_migrations").await? {
        return Ok(None);
    }
    sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
}

fn migrator_head() -> Option<i64> {
    MIGRATOR.iter().map(|migration| migration.version).max()
}

/// Whether the schema matches the head revision of this build.
pub async fn schema_is_current(pool: &PgPool) -> Result<bool, ArchiveError> {
    for legacy in LEGACY_VERSION_TABLES {
        if table_exists(pool, legacy).await? {
            return Ok(false);
        }
    }
    let applied = applied_head(pool).await?;
    Ok(applied >= migrator_head())
}

/// Bring the schema to head revision, removing any legacy version table
/// first. Safe to re-run; applied migrations are skipped.
pub async fn upgrade(pool: &PgPool) -> Result<(), ArchiveError> {
    for legacy in LEGACY_VERSION_TABLES {
        if table_exists(pool, legacy).await? {
            log::info!("removing legacy version table `{}`", legacy);
            sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", legacy))
                .execute(pool)
                .await?;
        }
    }
    log::info!("running database migrations");
    MIGRATOR.run(pool).await?;
    log::info!("database migrations completed");
    Ok(())
}
