use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Which detection strategies produced evidence for a mention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MatchMethods {
    pub exact: bool,
    pub variant: bool,
    pub implicit: bool,
}

impl MatchMethods {
    pub const NONE: MatchMethods = MatchMethods {
        exact: false,
        variant: false,
        implicit: false,
    };

    pub fn is_none(&self) -> bool {
        !(self.exact || self.variant || self.implicit)
    }
}

/// Renders as `exact`, `variant`, `implicit`, a comma-joined combination in
/// that order, or `none`.
impl fmt::Display for MatchMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("none");
        }
        let tags: Vec<&str> = [
            (self.exact, "exact"),
            (self.variant, "variant"),
            (self.implicit, "implicit"),
        ]
        .into_iter()
        .filter_map(|(set, tag)| set.then_some(tag))
        .collect();
        f.write_str(&tags.join(","))
    }
}

impl FromStr for MatchMethods {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut methods = MatchMethods::NONE;
        if s == "none" {
            return Ok(methods);
        }
        for tag in s.split(',') {
            match tag.trim() {
                "exact" => methods.exact = true,
                "variant" => methods.variant = true,
                "implicit" => methods.implicit = true,
                other => return Err(format!("unknown detection method: {}", other)),
            }
        }
        Ok(methods)
    }
}

impl Serialize for MatchMethods {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MatchMethods {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Outcome of matching one brand against one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandMention {
    pub brand: String,
    pub mentioned: bool,
    /// Always within [0, 1].
    pub confidence: f64,
    /// Sorted, deduplicated character offsets into the source text.
    pub positions: Vec<usize>,
    /// Deduplicated snippets, in first-seen order.
    pub contexts: Vec<String>,
    pub method: MatchMethods,
}

impl BrandMention {
    /// A non-mention entry.
    pub fn not_mentioned(brand: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
            mentioned: false,
            confidence: 0.0,
            positions: Vec::new(),
            contexts: Vec::new(),
            method: MatchMethods::NONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_tags_render_in_fixed_order() {
        let methods = MatchMethods {
            exact: true,
            variant: false,
            implicit: true,
        };
        assert_eq!(methods.to_string(), "exact,implicit");
        assert_eq!(MatchMethods::NONE.to_string(), "none");
        assert_eq!("implicit,exact".parse::<MatchMethods>().unwrap(), methods);
        assert!("fuzzy".parse::<MatchMethods>().is_err());
    }

    #[test]
    fn test_mention_serializes_method_as_string() {
        let mention = BrandMention::not_mentioned("Notion");
        let json = serde_json::to_value(&mention).unwrap();
        assert_eq!(json["method"], "none");
        let back: BrandMention = serde_json::from_value(json).unwrap();
        assert_eq!(back, mention);
    }
}
