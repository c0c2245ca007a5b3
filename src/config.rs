//! YAML configuration for a dump run.
//!
//! `load` reads and parses, `normalize` validates everything that can be
//! validated without touching the database and flattens the per-table
//! faker lists into per-column lookups.

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{DumpError, Result};
use crate::faker::FakerSpec;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumperConfig {
    #[serde(default)]
    pub source_db: SourceDbConfig,

    #[serde(default)]
    pub tables: Vec<TableConfig>,

    #[serde(default)]
    pub dump: DumpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDbConfig {
    pub driver: String,
    pub dsn: String,
}

impl Default for SourceDbConfig {
    fn default() -> Self {
        Self {
            driver: "mysql".to_string(),
            dsn: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,

    /// Seed queries; each must return the primary-key ids of the rows to
    /// pull. A table with none is reachable only transitively.
    #[serde(default, rename = "select_query")]
    pub select_queries: Vec<String>,

    /// Row cap per seed query, 0 = unlimited.
    #[serde(default)]
    pub limit: u64,

    #[serde(default)]
    pub allow_columns: Vec<String>,

    #[serde(default)]
    pub ignore_columns: Vec<String>,

    #[serde(default, rename = "faker")]
    pub fakers: Vec<FakerConfig>,

    /// Flattened `fakers`, keyed by column name. Built by `normalize`.
    #[serde(skip)]
    pub column_fakers: AHashMap<String, FakerSpec>,
}

impl TableConfig {
    pub fn is_ignored(&self, column: &str) -> bool {
        self.ignore_columns.iter().any(|c| c == column)
    }
}

/// One faker rule as written in the config file; applies to every listed
/// column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FakerConfig {
    #[serde(default)]
    pub columns: Vec<String>,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Output file; `None` means stdout. The CLI `--out` flag wins.
    #[serde(default)]
    pub out: Option<PathBuf>,

    /// Annotate every INSERT value with a `# column` comment.
    #[serde(default)]
    pub add_column_name: bool,

    /// Skip CREATE TABLE statements.
    #[serde(default)]
    pub only_data: bool,

    /// Emit `CREATE TABLE IF NOT EXISTS` instead of `CREATE TABLE`.
    #[serde(default)]
    pub create_tables_if_not_exist: bool,
}

impl DumperConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DumpError::Config(format!("read {}: {e}", path.display())))?;
        serde_yaml::from_str(&content)
            .map_err(|e| DumpError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Validate and flatten. Every config error must surface here, before
    /// any database access.
    pub fn normalize(&mut self) -> Result<()> {
        if self.source_db.dsn.is_empty() {
            return Err(DumpError::Config("source_db.dsn is empty".into()));
        }

        let mut names = ahash::AHashSet::new();
        for table in &mut self.tables {
            if table.name.is_empty() {
                return Err(DumpError::Config("a table entry is missing its name".into()));
            }
            if !names.insert(table.name.clone()) {
                return Err(DumpError::Config(format!(
                    "table {} is configured twice",
                    table.name
                )));
            }

            table.column_fakers.clear();
            for faker in &table.fakers {
                let spec = FakerSpec::parse(faker).map_err(|e| match e {
                    DumpError::Config(msg) => {
                        DumpError::Config(format!("table {}: {msg}", table.name))
                    }
                    other => other,
                })?;
                for column in &faker.columns {
                    table
                        .column_fakers
                        .insert(column.clone(), spec.clone());
                }
            }
        }

        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Names of every configured table; the closure walk never leaves this
    /// set and CREATE statements drop references outside it.
    pub fn table_names(&self) -> ahash::AHashSet<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}
