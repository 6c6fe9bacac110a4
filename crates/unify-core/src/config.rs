use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UnifyError};
use crate::similarity::SimilarityMetric;

static SQL_IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Root application configuration, loaded from `~/.config/unify/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub grouping: GroupingConfig,
    pub entities: BTreeMap<String, EntityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    pub threshold: f64,
    pub metric: SimilarityMetric,
    /// Only compare names sharing their first normalized token. Faster on
    /// large sets, misses duplicates whose first word differs.
    pub bucket_by_first_token: bool,
}

/// Where a unifiable entity lives and which columns reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityConfig {
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_name_column")]
    pub name_column: String,
    /// Optional explicit merged flag; set to `'merged'` on absorbed rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_column: Option<String>,
    #[serde(default)]
    pub attribute_columns: Vec<String>,
    #[serde(default)]
    pub dependents: Vec<DependentColumn>,
}

/// A foreign-key column that points at an entity's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentColumn {
    pub table: String,
    pub column: String,
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_name_column() -> String {
    "name".to_string()
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for AppConfig {
    fn default() -> Self {
        let mut entities = BTreeMap::new();
        entities.insert(
            "companies".to_string(),
            EntityConfig::new("companies")
                .with_dependent("vehicles", "company_id")
                .with_dependent("weigh_events", "company_id"),
        );
        entities.insert(
            "locations".to_string(),
            EntityConfig::new("locations").with_dependent("weigh_events", "location_id"),
        );

        Self {
            database: DatabaseConfig::default(),
            grouping: GroupingConfig::default(),
            entities,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("unify");

        Self {
            path: data_dir.join("unify.db").to_string_lossy().to_string(),
        }
    }
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            metric: SimilarityMetric::default(),
            bucket_by_first_token: false,
        }
    }
}

// ─── Entities ──────────────────────────────────────────────

impl EntityConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: default_id_column(),
            name_column: default_name_column(),
            status_column: None,
            attribute_columns: Vec::new(),
            dependents: Vec::new(),
        }
    }

    pub fn with_dependent(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.dependents.push(DependentColumn {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    pub fn with_status_column(mut self, column: impl Into<String>) -> Self {
        self.status_column = Some(column.into());
        self
    }

    pub fn with_attributes<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Static checks: identifiers are plain SQL names and at least one
    /// dependent column is declared.
    pub fn validate(&self) -> Result<()> {
        let mut identifiers = vec![&self.table, &self.id_column, &self.name_column];
        identifiers.extend(self.status_column.as_ref());
        identifiers.extend(self.attribute_columns.iter());
        for dependent in &self.dependents {
            identifiers.push(&dependent.table);
            identifiers.push(&dependent.column);
        }

        if let Some(bad) = identifiers.iter().find(|id| !SQL_IDENTIFIER_RE.is_match(id)) {
            return Err(UnifyError::Configuration(format!(
                "'{bad}' is not a valid table or column name"
            )));
        }

        if self.dependents.is_empty() {
            return Err(UnifyError::Configuration(format!(
                "no dependent tables declared for '{}'",
                self.table
            )));
        }

        Ok(())
    }

    /// [`validate`](Self::validate) plus a check that every declared table and
    /// column exists in the connected database.
    pub fn verify_schema(&self, conn: &Connection) -> Result<()> {
        self.validate()?;

        let mut entity_columns = vec![&self.id_column, &self.name_column];
        entity_columns.extend(self.status_column.as_ref());
        entity_columns.extend(self.attribute_columns.iter());
        require_columns(conn, &self.table, &entity_columns)?;

        for dependent in &self.dependents {
            require_columns(conn, &dependent.table, &[&dependent.column])?;
        }
        Ok(())
    }
}

fn require_columns(conn: &Connection, table: &str, columns: &[&String]) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<_>>()?;

    if existing.is_empty() {
        return Err(UnifyError::Configuration(format!(
            "table '{table}' does not exist"
        )));
    }

    for column in columns {
        if !existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            return Err(UnifyError::Configuration(format!(
                "column '{table}.{column}' does not exist"
            )));
        }
    }
    Ok(())
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/unify/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("UNIFY_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("unify")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn set_database_path(&mut self, path: PathBuf) {
        self.database.path = path.to_string_lossy().to_string();
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }

    pub fn entity(&self, name: &str) -> Result<&EntityConfig> {
        self.entities
            .get(name)
            .ok_or_else(|| UnifyError::EntityNotFound(name.to_string()))
    }
}
