use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sim_client::ResultsStore;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

use shared::domain::{AgentOutcome, SimulationRequest};

/// Blob keys shared with every other component reading this store. The names
/// are part of the persisted contract and must not be renamed.
pub mod keys {
    pub const SCENARIO: &str = "scenario";
    pub const CONTEXT: &str = "context";
    pub const ACTION_SPACE: &str = "actionSpace";
    pub const DEMOGRAPHIC_GROUP: &str = "demographicGroup";
    pub const ATTRIBUTES_LIST: &str = "attributesList";
    pub const AGENTS_ARRAY: &str = "agentsArray";
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        let storage = Self { pool };
        storage.ensure_blobs_table().await?;
        Ok(storage)
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_blobs_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure blobs table exists")?;
        Ok(())
    }

    pub async fn set_blob(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO blobs (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write blob '{key}'"))?;
        Ok(())
    }

    pub async fn get_blob(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn blob_updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT updated_at FROM blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<DateTime<Utc>, _>(0)))
    }

    pub async fn save_scenario_config(
        &self,
        scenario: &str,
        context: &str,
        action_space: &str,
    ) -> Result<()> {
        self.set_blob(keys::SCENARIO, scenario).await?;
        self.set_blob(keys::CONTEXT, context).await?;
        self.set_blob(keys::ACTION_SPACE, action_space).await?;
        Ok(())
    }

    pub async fn save_agent_config(
        &self,
        demographic_group: &str,
        attributes: &[String],
    ) -> Result<()> {
        self.set_blob(keys::DEMOGRAPHIC_GROUP, demographic_group)
            .await?;
        let serialized =
            serde_json::to_string(attributes).context("failed to serialize attribute list")?;
        self.set_blob(keys::ATTRIBUTES_LIST, &serialized).await?;
        Ok(())
    }

    /// Rebuilds the request from stored configuration. Returns `None` unless
    /// both the scenario and the agent configuration are complete. This is
    /// the readiness gate callers must pass before starting a run.
    pub async fn load_simulation_request(&self) -> Result<Option<SimulationRequest>> {
        let scenario = self.get_blob(keys::SCENARIO).await?;
        let context = self.get_blob(keys::CONTEXT).await?;
        let action_space = self.get_blob(keys::ACTION_SPACE).await?;
        let demographic_group = self.get_blob(keys::DEMOGRAPHIC_GROUP).await?;
        let attributes_raw = self.get_blob(keys::ATTRIBUTES_LIST).await?;

        let (
            Some(scenario),
            Some(context),
            Some(action_space),
            Some(demographic_group),
            Some(attributes_raw),
        ) = (
            scenario,
            context,
            action_space,
            demographic_group,
            attributes_raw,
        )
        else {
            return Ok(None);
        };

        let attributes: Vec<String> = serde_json::from_str(&attributes_raw)
            .context("stored attribute list is not valid JSON")?;

        if scenario.trim().is_empty()
            || context.trim().is_empty()
            || action_space.trim().is_empty()
            || demographic_group.trim().is_empty()
            || attributes.is_empty()
        {
            return Ok(None);
        }

        Ok(Some(SimulationRequest {
            scenario,
            context,
            action_space,
            demographic_group,
            attributes,
        }))
    }

    /// Whole-value replacement of the stored outcome sequence. The job
    /// controller is the only writer of this key.
    pub async fn save_agent_outcomes(&self, outcomes: &[AgentOutcome]) -> Result<()> {
        let serialized =
            serde_json::to_string(outcomes).context("failed to serialize agent outcomes")?;
        self.set_blob(keys::AGENTS_ARRAY, &serialized).await
    }

    pub async fn load_agent_outcomes(&self) -> Result<Option<Vec<AgentOutcome>>> {
        let Some(raw) = self.get_blob(keys::AGENTS_ARRAY).await? else {
            return Ok(None);
        };
        let outcomes =
            serde_json::from_str(&raw).context("stored agent outcomes are not valid JSON")?;
        Ok(Some(outcomes))
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[async_trait]
impl ResultsStore for Storage {
    async fn save_outcomes(&self, outcomes: &[AgentOutcome]) -> Result<()> {
        self.save_agent_outcomes(outcomes).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
