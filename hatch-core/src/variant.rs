//! Build variants and variant selection.
//!
//! A variant is a named, fixed combination of base image, system packages and
//! Python dependency inputs. Variants live in a [`VariantTable`] so that the
//! minimal and extended images are two rows of data instead of two recipes.

use crate::error::{HatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// Default dependency manifest, relative to the build context.
pub const DEFAULT_REQUIREMENTS_PATH: &str = "requirements.txt";

/// Name of the slim variant without database client libraries.
pub const MINIMAL: &str = "minimal";

/// Name of the full variant with PostgreSQL client libraries and headers.
pub const EXTENDED: &str = "extended";

/// A named build variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    /// Unique variant name
    pub name: String,
    /// Base image reference (e.g. "python:3.11-slim")
    pub base_image_ref: String,
    /// System packages installed with the OS package manager
    #[serde(default)]
    pub system_packages: BTreeSet<String>,
    /// Dependency manifest path, relative to the build context
    #[serde(default = "default_requirements_path")]
    pub python_requirements_path: String,
    /// Extra pip packages installed after the manifest, in order
    #[serde(default)]
    pub extra_pip_packages: Vec<String>,
}

fn default_requirements_path() -> String {
    DEFAULT_REQUIREMENTS_PATH.to_string()
}

/// One row of the variant table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantEntry {
    /// Whether this variant ships a database client
    pub database_client: bool,
    #[serde(flatten)]
    pub spec: VariantSpec,
}

/// Table of known variants, keyed by name and by the database-client flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<VariantEntry>", into = "Vec<VariantEntry>")]
pub struct VariantTable {
    entries: Vec<VariantEntry>,
}

impl TryFrom<Vec<VariantEntry>> for VariantTable {
    type Error = HatchError;

    fn try_from(entries: Vec<VariantEntry>) -> Result<Self> {
        Self::new(entries)
    }
}

impl From<VariantTable> for Vec<VariantEntry> {
    fn from(table: VariantTable) -> Self {
        table.entries
    }
}

/// Rejects names that cannot serve as a stored image file name.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        return Err(HatchError::InvalidConfig {
            reason: format!("invalid variant name '{}'", name),
        });
    }
    Ok(())
}

impl VariantTable {
    /// Creates a table, rejecting duplicate or path-like variant names.
    pub fn new(entries: Vec<VariantEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            validate_name(&entry.spec.name)?;
            if !seen.insert(entry.spec.name.as_str()) {
                return Err(HatchError::InvalidConfig {
                    reason: format!("duplicate variant name '{}'", entry.spec.name),
                });
            }
        }
        Ok(Self { entries })
    }

    /// The built-in minimal and extended variants.
    pub fn builtin() -> Self {
        let gcc = ["gcc"];
        let pg = ["gcc", "libpq-dev", "postgresql-client"];

        Self {
            entries: vec![
                VariantEntry {
                    database_client: false,
                    spec: VariantSpec {
                        name: MINIMAL.to_string(),
                        base_image_ref: "python:3.11-slim".to_string(),
                        system_packages: gcc.iter().map(|p| p.to_string()).collect(),
                        python_requirements_path: default_requirements_path(),
                        extra_pip_packages: Vec::new(),
                    },
                },
                VariantEntry {
                    database_client: true,
                    spec: VariantSpec {
                        name: EXTENDED.to_string(),
                        base_image_ref: "python:3.11".to_string(),
                        system_packages: pg.iter().map(|p| p.to_string()).collect(),
                        python_requirements_path: default_requirements_path(),
                        extra_pip_packages: vec!["psycopg2".to_string()],
                    },
                },
            ],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[VariantEntry] {
        &self.entries
    }

    /// Looks up a variant by name.
    pub fn get(&self, name: &str) -> Result<&VariantSpec> {
        self.entries.iter().map(|e| &e.spec).find(|s| s.name == name).ok_or_else(|| {
            HatchError::UnknownVariant { reason: format!("no variant named '{}'", name) }
        })
    }

    /// Picks the variant for the given database-client requirement.
    ///
    /// An exact match wins. A request without a database client falls back to
    /// any variant, since a client-bearing image still serves it. A request
    /// for a database client never falls back to a variant without one.
    pub fn select(&self, requires_database_client: bool) -> Result<&VariantSpec> {
        if self.is_empty() {
            return Err(HatchError::UnknownVariant { reason: "variant table is empty".into() });
        }

        if let Some(entry) =
            self.entries.iter().find(|e| e.database_client == requires_database_client)
        {
            debug!(variant = %entry.spec.name, requires_database_client, "Selected variant");
            return Ok(&entry.spec);
        }

        if !requires_database_client {
            let fallback = &self.entries[0].spec;
            warn!(variant = %fallback.name, "No minimal variant configured, using fallback");
            return Ok(fallback);
        }

        Err(HatchError::UnknownVariant {
            reason: "no variant provides a database client".into(),
        })
    }
}

impl Default for VariantTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Selects a built-in variant from the database-client flag.
pub fn select_variant(requires_database_client: bool) -> Result<VariantSpec> {
    VariantTable::builtin().select(requires_database_client).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_builtin() {
        let minimal = select_variant(false).unwrap();
        let extended = select_variant(true).unwrap();

        assert_eq!(minimal.name, MINIMAL);
        assert_eq!(minimal.base_image_ref, "python:3.11-slim");
        assert_eq!(extended.name, EXTENDED);
        assert_eq!(extended.base_image_ref, "python:3.11");
    }

    #[test]
    fn test_extended_is_superset_of_minimal() {
        let minimal = select_variant(false).unwrap();
        let extended = select_variant(true).unwrap();

        assert!(extended.system_packages.is_superset(&minimal.system_packages));
        assert!(extended.system_packages.contains("libpq-dev"));
        assert!(extended.system_packages.contains("postgresql-client"));
    }

    #[test]
    fn test_empty_table_is_unknown_variant() {
        let table = VariantTable::new(Vec::new()).unwrap();
        assert!(matches!(table.select(false), Err(HatchError::UnknownVariant { .. })));
        assert!(matches!(table.select(true), Err(HatchError::UnknownVariant { .. })));
    }

    #[test]
    fn test_lookup_by_name() {
        let table = VariantTable::builtin();
        assert_eq!(table.get("extended").unwrap().name, "extended");
        assert!(matches!(table.get("gpu"), Err(HatchError::UnknownVariant { .. })));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let entry = VariantTable::builtin().entries()[0].clone();
        let result = VariantTable::new(vec![entry.clone(), entry]);
        assert!(matches!(result, Err(HatchError::InvalidConfig { .. })));
    }

    #[test]
    fn test_path_like_names_rejected() {
        for name in ["", "../minimal", "a/b", "a\\b", "..", "x..y"] {
            let mut entry = VariantTable::builtin().entries()[0].clone();
            entry.spec.name = name.to_string();
            let result = VariantTable::new(vec![entry]);
            assert!(
                matches!(result, Err(HatchError::InvalidConfig { .. })),
                "accepted variant name {:?}",
                name
            );
        }

        let json = r#"[{"database_client": false, "name": "../../etc/passwd",
                        "base_image_ref": "python:3.11-slim"}]"#;
        assert!(serde_json::from_str::<VariantTable>(json).is_err());
    }

    #[test]
    fn test_minimal_request_falls_back() {
        let extended_only: Vec<_> =
            VariantTable::builtin().entries().iter().filter(|e| e.database_client).cloned().collect();
        let table = VariantTable::new(extended_only).unwrap();

        assert_eq!(table.select(false).unwrap().name, EXTENDED);
    }

    #[test]
    fn test_database_client_request_never_downgrades() {
        let minimal_only: Vec<_> =
            VariantTable::builtin().entries().iter().filter(|e| !e.database_client).cloned().collect();
        let table = VariantTable::new(minimal_only).unwrap();

        assert!(matches!(table.select(true), Err(HatchError::UnknownVariant { .. })));
    }

    #[test]
    fn test_table_deserializes_from_config_json() {
        let json = r#"[
            {"database_client": false, "name": "tiny", "base_image_ref": "python:3.12-alpine",
             "system_packages": ["musl-dev", "gcc"]}
        ]"#;

        let table: VariantTable = serde_json::from_str(json).unwrap();
        let spec = table.select(false).unwrap();

        assert_eq!(spec.name, "tiny");
        assert_eq!(spec.python_requirements_path, DEFAULT_REQUIREMENTS_PATH);
        assert!(spec.extra_pip_packages.is_empty());
    }
}
