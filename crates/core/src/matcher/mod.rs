//! Lexical brand-mention matching.

pub mod catalog;
pub mod engine;
pub mod types;

pub use catalog::{BrandCatalog, BrandEntry, CatalogError, CATALOG_VERSION};
pub use engine::{match_brand, match_prepared, BrandMatcher, PreparedText};
pub use types::{BrandMention, MatchMethods};
