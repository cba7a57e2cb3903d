//! Brand catalog: per-brand alias lists and implicit-pattern tables.
//!
//! Loaded once at startup from versioned TOML and shared read-only between
//! concurrent matcher invocations.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Catalog format version this build understands.
pub const CATALOG_VERSION: u32 = 1;

const BUILTIN_CATALOG: &str = include_str!("../../data/brand_catalog.toml");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read brand catalog {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse brand catalog: {0}")]
    Parse(String),

    #[error("Unsupported brand catalog version {0} (expected {expected})", expected = CATALOG_VERSION)]
    UnsupportedVersion(u32),

    #[error("Invalid implicit pattern for {brand}: {pattern}: {message}")]
    InvalidPattern {
        brand: String,
        pattern: String,
        message: String,
    },

    #[error("Duplicate brand in catalog: {0}")]
    DuplicateBrand(String),
}

/// One brand as written in the catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub implicit_patterns: Vec<String>,
}

impl BrandEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            implicit_patterns: Vec::new(),
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.implicit_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    version: u32,
    #[serde(default)]
    brands: Vec<BrandEntry>,
}

#[derive(Debug, Clone)]
struct CompiledBrand {
    entry: BrandEntry,
    patterns: Vec<Regex>,
}

/// Compiled, read-only brand catalog.
///
/// Lookups are case-insensitive on the brand name. Brands that are not in
/// the catalog have no aliases and no implicit patterns.
#[derive(Debug, Clone, Default)]
pub struct BrandCatalog {
    brands: Vec<CompiledBrand>,
    index: HashMap<String, usize>,
}

impl BrandCatalog {
    /// A catalog with no brands; every match is exact-only.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The catalog shipped with the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    /// Load a catalog file from disk.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            toml::from_str(contents).map_err(|e| CatalogError::Parse(e.to_string()))?;
        if file.version != CATALOG_VERSION {
            return Err(CatalogError::UnsupportedVersion(file.version));
        }
        Self::from_entries(file.brands)
    }

    /// Compile entries, rejecting bad patterns and duplicate names.
    pub fn from_entries(entries: Vec<BrandEntry>) -> Result<Self, CatalogError> {
        let mut brands = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());

        for entry in entries {
            let key = entry.name.to_lowercase();
            if index.contains_key(&key) {
                return Err(CatalogError::DuplicateBrand(entry.name));
            }

            let patterns = entry
                .implicit_patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| CatalogError::InvalidPattern {
                        brand: entry.name.clone(),
                        pattern: p.clone(),
                        message: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            index.insert(key, brands.len());
            brands.push(CompiledBrand { entry, patterns });
        }

        Ok(Self { brands, index })
    }

    fn lookup(&self, brand: &str) -> Option<&CompiledBrand> {
        self.index
            .get(&brand.to_lowercase())
            .map(|&i| &self.brands[i])
    }

    /// Alias list for `brand` (empty if unknown).
    pub fn aliases(&self, brand: &str) -> &[String] {
        self.lookup(brand)
            .map(|b| b.entry.aliases.as_slice())
            .unwrap_or(&[])
    }

    /// Compiled implicit patterns for `brand` (empty if unknown).
    pub fn patterns(&self, brand: &str) -> &[Regex] {
        self.lookup(brand)
            .map(|b| b.patterns.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, brand: &str) -> bool {
        self.lookup(brand).is_some()
    }

    pub fn entries(&self) -> impl Iterator<Item = &BrandEntry> {
        self.brands.iter().map(|b| &b.entry)
    }

    pub fn len(&self) -> usize {
        self.brands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
    }
}
