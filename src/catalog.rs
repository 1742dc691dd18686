//! Table catalog - the schema knowledge handed to query synthesis.
//!
//! Loaded once from a JSON file listing the queryable tables with their
//! descriptions and columns; the synthesis prompt picks the most relevant
//! table from this listing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

/// One queryable table with its description and column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_name: String,
    pub description: String,
    #[serde(default)]
    pub columns: HashMap<String, Value>,
}

/// The full set of tables available to the synthesizer.
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    tables: Vec<TableInfo>,
}

impl TableCatalog {
    pub fn new(tables: Vec<TableInfo>) -> Self {
        Self { tables }
    }

    /// Load the catalog from a JSON file (array of table entries).
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read table catalog {}: {}", path.display(), e))?;
        let tables: Vec<TableInfo> = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("invalid table catalog {}: {}", path.display(), e))?;

        tracing::info!("Loaded {} tables from {}", tables.len(), path.display());
        Ok(Self::new(tables))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.table_name == name)
    }

    /// One-table-per-line listing for the synthesis prompt.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let _ = writeln!(out, "- {}: {}", table.table_name, table.description);
        }
        out
    }

    /// Full schema of one table for the synthesis prompt, falling back to
    /// the bare name when the table is not in the catalog.
    pub fn describe(&self, name: &str) -> String {
        match self.get(name) {
            Some(table) => {
                let mut columns: Vec<&String> = table.columns.keys().collect();
                columns.sort();
                let columns: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
                format!(
                    "table: {}\ndescription: {}\ncolumns: {}",
                    table.table_name,
                    table.description,
                    columns.join(", ")
                )
            }
            None => format!("table: {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TableCatalog {
        let json = r#"[
            {
                "table_name": "dex.trades",
                "description": "All DEX trades",
                "columns": {"block_time": "timestamp", "amount_usd": "double"}
            },
            {
                "table_name": "nft.trades",
                "description": "NFT marketplace trades",
                "columns": {}
            }
        ]"#;
        TableCatalog::new(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_listing_covers_all_tables() {
        let listing = catalog().listing();
        assert!(listing.contains("dex.trades: All DEX trades"));
        assert!(listing.contains("nft.trades"));
    }

    #[test]
    fn test_describe_known_table() {
        let description = catalog().describe("dex.trades");
        assert!(description.contains("columns: amount_usd, block_time"));
    }

    #[test]
    fn test_describe_unknown_table_falls_back() {
        assert_eq!(catalog().describe("missing.table"), "table: missing.table");
    }
}
