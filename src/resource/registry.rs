//! Table Registry - Load table definitions from JSON
//!
//! Table definitions are embedded at compile time, validated once and then
//! frozen. There is no write path after start-up, so readers need no
//! locking.

use super::table::{Baseline, BaselineDef, TableDef, TableSchema};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Baseline columns shared by every table
const BASELINE_FILE: &str = include_str!("../tables/common.json");

/// Embedded table files (compiled into the binary)
const TABLE_FILES: &[(&str, &str)] = &[
    ("compute.json", include_str!("../tables/compute.json")),
    ("storage.json", include_str!("../tables/storage.json")),
    ("gke.json", include_str!("../tables/gke.json")),
];

/// Root structure of tables/*.json
#[derive(Debug, Deserialize)]
struct TableFile {
    tables: Vec<TableDef>,
}

/// Frozen table name -> schema mapping
#[derive(Debug)]
pub struct TableRegistry {
    tables: BTreeMap<String, TableSchema>,
}

impl TableRegistry {
    pub fn builder(baseline: Baseline) -> TableRegistryBuilder {
        TableRegistryBuilder {
            baseline,
            tables: BTreeMap::new(),
        }
    }

    /// Build from the embedded definition files
    pub fn from_embedded() -> Result<Self> {
        let baseline_def: BaselineDef =
            serde_json::from_str(BASELINE_FILE).context("Failed to parse common.json")?;
        let mut builder = Self::builder(Baseline::try_from(baseline_def)?);

        for (file, content) in TABLE_FILES {
            let parsed: TableFile = serde_json::from_str(content)
                .with_context(|| format!("Failed to parse {}", file))?;
            for def in parsed.tables {
                builder = builder.add(def).with_context(|| format!("in {}", file))?;
            }
        }

        Ok(builder.build())
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Table names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Start-up builder; consumed by [`TableRegistryBuilder::build`]
pub struct TableRegistryBuilder {
    baseline: Baseline,
    tables: BTreeMap<String, TableSchema>,
}

impl TableRegistryBuilder {
    /// Validate and register one table
    pub fn add(mut self, def: TableDef) -> Result<Self> {
        if self.tables.contains_key(&def.name) {
            bail!("duplicate table '{}'", def.name);
        }
        let schema = TableSchema::build(def, &self.baseline)?;
        tracing::debug!(
            "registered table {} ({} columns)",
            schema.name,
            schema.columns().len()
        );
        self.tables.insert(schema.name.clone(), schema);
        Ok(self)
    }

    pub fn build(self) -> TableRegistry {
        TableRegistry {
            tables: self.tables,
        }
    }
}

/// Global registry loaded from the embedded JSON
static REGISTRY: OnceLock<std::result::Result<TableRegistry, String>> = OnceLock::new();

/// Get the table registry (built on first access)
pub fn get_registry() -> Result<&'static TableRegistry> {
    REGISTRY
        .get_or_init(|| TableRegistry::from_embedded().map_err(|e| format!("{:#}", e)))
        .as_ref()
        .map_err(|e| anyhow!("Failed to load table definitions: {}", e))
}

/// Get a table by name
pub fn get_table(name: &str) -> Result<&'static TableSchema> {
    let registry = get_registry()?;
    registry.get(name).with_context(|| {
        format!(
            "Unknown table: {} (available: {})",
            name,
            registry.names().collect::<Vec<_>>().join(", ")
        )
    })
}
