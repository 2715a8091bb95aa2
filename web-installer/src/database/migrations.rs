// Migration runner
// Implements manifest-based migration execution with checksum validation
//
// `manifest.json` (in the migrations directory) lists the SQL files and their order:
//
//   { "migrations": [ { "name": "...", "file": "...", "order": 1, "checksum": "<sha256>" } ] }
//
// Applied migrations are recorded in `installer_migrations`. A migration already recorded is
// skipped, so running the full set against a migrated schema applies nothing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

use crate::database::connection::MySqlConnectionRegistry;
use crate::security::crypto::sha256_hex;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const TRACKING_TABLE: &str = "installer_migrations";

/// Applies the pending schema migrations on a named connection.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// `Ok(true)` when the schema is fully migrated, `Ok(false)` when nothing could be applied.
    async fn migrate(&self, connection_name: &str) -> Result<bool>;
}

/// Migration manifest structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationManifest {
    pub migrations: Vec<MigrationEntry>,
}

/// Individual migration entry in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationEntry {
    pub name: String,
    pub file: String,
    pub order: u32,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl MigrationManifest {
    /// Parse and order the manifest (by `order`, then `name` so ties stay stable).
    pub fn parse(content: &str) -> Result<Self> {
        let mut manifest: MigrationManifest =
            serde_json::from_str(content).context("Failed to parse migration manifest JSON")?;
        manifest
            .migrations
            .sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));

        let mut seen = std::collections::HashSet::new();
        for m in &manifest.migrations {
            if !seen.insert(m.name.as_str()) {
                anyhow::bail!("Duplicate migration name in manifest: {}", m.name);
            }
        }
        Ok(manifest)
    }
}

/// Verify a migration file against its manifest checksum. Returns the computed checksum.
pub fn verify_checksum(entry: &MigrationEntry, bytes: &[u8]) -> Result<String> {
    let computed = sha256_hex(bytes);
    if let Some(expected) = &entry.checksum {
        if !computed.eq_ignore_ascii_case(expected.trim()) {
            anyhow::bail!(
                "Checksum mismatch for migration {}: expected {}, computed {}",
                entry.name,
                expected,
                computed
            );
        }
    }
    Ok(computed)
}

/// Entries not yet recorded as applied, in manifest order. A recorded checksum that differs
/// from the file means the migration was edited after it ran.
pub fn pending<'a>(
    manifest: &'a MigrationManifest,
    applied: &HashMap<String, String>,
    checksums: &HashMap<String, String>,
) -> Result<Vec<&'a MigrationEntry>> {
    let mut out = Vec::new();
    for m in &manifest.migrations {
        match applied.get(&m.name) {
            None => out.push(m),
            Some(recorded) => {
                if let Some(current) = checksums.get(&m.name) {
                    if !recorded.is_empty() && !recorded.eq_ignore_ascii_case(current) {
                        anyhow::bail!(
                            "Migration {} was modified after it was applied (recorded {}, found {})",
                            m.name,
                            recorded,
                            current
                        );
                    }
                }
            }
        }
    }
    Ok(out)
}

fn manifest_relative_path(path: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for part in path.split(['/', '\\']) {
        if !part.is_empty() && part != ".." && part != "." {
            out.push(part);
        }
    }
    out
}

/// Migration runner for executing database migrations on MySQL.
pub struct MigrationRunner {
    registry: Arc<MySqlConnectionRegistry>,
    migrations_path: PathBuf,
}

impl MigrationRunner {
    pub fn new(registry: Arc<MySqlConnectionRegistry>, migrations_path: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            migrations_path: migrations_path.into(),
        }
    }

    /// Load and parse the migration manifest
    pub async fn load_manifest(&self) -> Result<MigrationManifest> {
        let manifest_path = self.migrations_path.join(MANIFEST_FILE);
        info!(
            "[PHASE: database] [STEP: load_manifest] Loading manifest from: {:?}",
            manifest_path
        );

        let content = fs::read_to_string(&manifest_path)
            .await
            .with_context(|| format!("Failed to read manifest file: {:?}", manifest_path))?;
        let manifest = MigrationManifest::parse(&content)
            .with_context(|| format!("Invalid manifest: {:?}", manifest_path))?;

        info!(
            "[PHASE: database] [STEP: load_manifest] Loaded {} migrations",
            manifest.migrations.len()
        );
        Ok(manifest)
    }

    /// Read every listed file and verify its checksum.
    async fn load_sources(&self, manifest: &MigrationManifest) -> Result<HashMap<String, (String, String)>> {
        let mut sources = HashMap::new();
        for m in &manifest.migrations {
            let file = self.migrations_path.join(manifest_relative_path(&m.file));
            let bytes = fs::read(&file)
                .await
                .with_context(|| format!("Failed to read migration file: {:?}", file))?;
            let checksum = verify_checksum(m, &bytes)?;
            let sql = String::from_utf8(bytes)
                .with_context(|| format!("Migration file is not valid UTF-8: {:?}", file))?;
            sources.insert(m.name.clone(), (sql, checksum));
        }
        Ok(sources)
    }

    async fn ensure_tracking_table(&self, pool: &MySqlPool) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                migration_name VARCHAR(255) NOT NULL PRIMARY KEY,
                checksum CHAR(64) NOT NULL,
                execution_time_ms INT NOT NULL,
                applied_at DATETIME NOT NULL
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
            TRACKING_TABLE
        );
        sqlx::query(&ddl)
            .execute(pool)
            .await
            .context("Failed to create migration tracking table")?;
        Ok(())
    }

    async fn applied_migrations(&self, pool: &MySqlPool) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(&format!(
            "SELECT migration_name, checksum FROM {}",
            TRACKING_TABLE
        ))
        .fetch_all(pool)
        .await
        .context("Failed to query applied migrations")?;
        Ok(rows.into_iter().collect())
    }

    /// Apply a single migration
    async fn apply_migration(
        &self,
        pool: &MySqlPool,
        migration: &MigrationEntry,
        sql: &str,
        checksum: &str,
    ) -> Result<()> {
        info!(
            "[PHASE: database] [STEP: apply_migration] Applying migration: {}",
            migration.name
        );
        let start_time = Utc::now();

        // MySQL commits DDL implicitly; the transaction only keeps the tracking row and DML
        // together.
        let mut tx = pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        // Explicit connection borrow keeps the future Send behind the trait object.
        let conn: &mut sqlx::MySqlConnection = &mut tx;
        sqlx::Executor::execute(conn, sqlx::raw_sql(sql))
            .await
            .with_context(|| format!("Failed to execute migration SQL: {}", migration.name))?;

        let execution_time_ms = (Utc::now() - start_time).num_milliseconds() as i32;

        sqlx::query(&format!(
            "INSERT INTO {} (migration_name, checksum, execution_time_ms, applied_at) VALUES (?, ?, ?, ?)",
            TRACKING_TABLE
        ))
        .bind(&migration.name)
        .bind(checksum)
        .bind(execution_time_ms)
        .bind(Utc::now().naive_utc())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to record applied migration: {}", migration.name))?;

        tx.commit().await.context("Failed to commit transaction")?;

        info!(
            "[PHASE: database] [STEP: apply_migration] Successfully applied migration: {} ({}ms)",
            migration.name, execution_time_ms
        );
        Ok(())
    }

    /// Apply all pending migrations, returning the names applied.
    pub async fn apply_all_pending(&self, connection_name: &str) -> Result<Vec<String>> {
        let pool = self
            .registry
            .pool(connection_name)
            .await
            .ok_or_else(|| anyhow::anyhow!("No connection registered under '{}'", connection_name))?;

        let manifest = self.load_manifest().await?;
        let sources = self.load_sources(&manifest).await?;
        let checksums: HashMap<String, String> = sources
            .iter()
            .map(|(name, (_, sum))| (name.clone(), sum.clone()))
            .collect();

        self.ensure_tracking_table(&pool).await?;
        let applied = self.applied_migrations(&pool).await?;
        let todo = pending(&manifest, &applied, &checksums)?;

        if todo.is_empty() {
            info!("[PHASE: database] [STEP: apply_all_pending] No pending migrations");
            return Ok(vec![]);
        }

        info!(
            "[PHASE: database] [STEP: apply_all_pending] Found {} pending migrations",
            todo.len()
        );

        let mut applied_names = Vec::new();
        for migration in todo {
            let (sql, checksum) = sources
                .get(&migration.name)
                .ok_or_else(|| anyhow::anyhow!("Migration source not loaded: {}", migration.name))?;
            self.apply_migration(&pool, migration, sql, checksum)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            applied_names.push(migration.name.clone());
        }

        info!(
            "[PHASE: database] [STEP: apply_all_pending] Successfully applied {} migrations",
            applied_names.len()
        );
        Ok(applied_names)
    }
}

#[async_trait]
impl Migrator for MigrationRunner {
    async fn migrate(&self, connection_name: &str) -> Result<bool> {
        let manifest = self.load_manifest().await?;
        if manifest.migrations.is_empty() {
            warn!("[PHASE: database] [STEP: migrate] The manifest lists no migrations");
            return Ok(false);
        }
        self.apply_all_pending(connection_name).await?;
        Ok(true)
    }
}
