//! Three-tier brand matching: exact, variant, and implicit.
//!
//! All offsets are character offsets. Matching is case-insensitive through a
//! one-to-one lowercase mapping, so offsets in the lowercased text line up
//! with the original.

use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use super::catalog::BrandCatalog;
use super::types::{BrandMention, MatchMethods};

/// Terms this short skip the word-boundary check.
const SHORT_TERM_LEN: usize = 3;
/// Characters kept on each side of an exact/variant hit.
const CONTEXT_RADIUS: usize = 50;
/// Characters kept on each side of an implicit hit.
const IMPLICIT_CONTEXT_RADIUS: usize = 20;
const IMPLICIT_PREFIX: &str = "implicit: ";

/// Text prepared once and matched against many brands.
#[derive(Debug, Clone)]
pub struct PreparedText {
    original: Vec<char>,
    lowered: Vec<char>,
    lowered_str: String,
}

impl PreparedText {
    pub fn new(text: &str) -> Self {
        let original: Vec<char> = text.chars().collect();
        let lowered: Vec<char> = original.iter().map(|&c| fold_char(c)).collect();
        let lowered_str = lowered.iter().collect();
        Self {
            original,
            lowered,
            lowered_str,
        }
    }
}

/// Lowercase a single character, keeping it unchanged when its lowercase
/// form is not exactly one character.
fn fold_char(c: char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

/// An adjacent ASCII letter or digit disqualifies a hit. Non-ASCII neighbours
/// are allowed so that scripts without word separators still match.
fn is_word_boundary(text: &[char], start: usize, len: usize) -> bool {
    let before = start.checked_sub(1).map(|i| text[i]);
    let after = text.get(start + len).copied();
    !before.is_some_and(|c| c.is_ascii_alphanumeric())
        && !after.is_some_and(|c| c.is_ascii_alphanumeric())
}

/// Every accepted occurrence of `term`, overlapping hits included.
fn find_occurrences(text: &[char], term: &[char]) -> Vec<usize> {
    if term.is_empty() || term.len() > text.len() {
        return Vec::new();
    }
    (0..=text.len() - term.len())
        .filter(|&i| text[i..i + term.len()] == *term)
        .filter(|&i| term.len() <= SHORT_TERM_LEN || is_word_boundary(text, i, term.len()))
        .collect()
}

fn surrounding(text: &[char], start: usize, end: usize, radius: usize) -> String {
    let from = start.saturating_sub(radius);
    let to = (end + radius).min(text.len());
    text[from..to].iter().collect()
}

/// Whitespace runs collapse to a single space; ends are trimmed.
fn clean_context(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hits for one search term (the brand itself or one alias).
fn term_hits(text: &PreparedText, term: &str) -> (Vec<usize>, Vec<String>) {
    let term: Vec<char> = term.chars().map(fold_char).collect();
    let positions = find_occurrences(&text.lowered, &term);
    let contexts = positions
        .iter()
        .map(|&p| {
            clean_context(&surrounding(
                &text.original,
                p,
                p + term.len(),
                CONTEXT_RADIUS,
            ))
        })
        .collect();
    (positions, contexts)
}

/// One synthetic context per pattern that matches, built around its first hit.
fn implicit_hits(text: &PreparedText, patterns: &[Regex]) -> Vec<String> {
    patterns
        .iter()
        .filter_map(|pattern| pattern.find(&text.lowered_str))
        .map(|m| {
            let start = text.lowered_str[..m.start()].chars().count();
            let end = start + m.as_str().chars().count();
            let window = surrounding(&text.lowered, start, end, IMPLICIT_CONTEXT_RADIUS);
            format!("{}{}", IMPLICIT_PREFIX, window.trim())
        })
        .collect()
}

fn confidence(
    methods: MatchMethods,
    position_hits: usize,
    implicit_hits: usize,
    contexts: &[String],
) -> f64 {
    if position_hits == 0 && implicit_hits == 0 {
        return 0.0;
    }

    let mut score = 0.0;
    if position_hits > 0 {
        score += 0.6;
    }

    if methods.exact {
        score += 0.3;
    } else if methods.variant {
        score += 0.2;
    } else if methods.implicit {
        score += 0.1;
    }

    let match_count = position_hits + implicit_hits;
    if match_count > 1 {
        score += (0.05 * match_count as f64).min(0.2);
    }

    if !contexts.is_empty() {
        let total: usize = contexts.iter().map(|c| c.chars().count()).sum();
        if total as f64 / contexts.len() as f64 > 30.0 {
            score += 0.1;
        }
    }

    score.clamp(0.0, 1.0)
}

/// Match one brand against prepared text using the given tables.
pub fn match_prepared(
    text: &PreparedText,
    brand: &str,
    aliases: &[String],
    patterns: &[Regex],
) -> BrandMention {
    let mut methods = MatchMethods::NONE;
    let mut positions = Vec::new();
    let mut contexts = Vec::new();

    let (exact_positions, exact_contexts) = term_hits(text, brand);
    if !exact_positions.is_empty() {
        methods.exact = true;
        positions.extend(exact_positions);
        contexts.extend(exact_contexts);
    }

    for alias in aliases {
        let (alias_positions, alias_contexts) = term_hits(text, alias);
        if !alias_positions.is_empty() {
            methods.variant = true;
            positions.extend(alias_positions);
            contexts.extend(alias_contexts);
        }
    }

    let implicit = implicit_hits(text, patterns);
    if !implicit.is_empty() {
        methods.implicit = true;
    }
    let implicit_count = implicit.len();
    contexts.extend(implicit);

    let confidence = confidence(methods, positions.len(), implicit_count, &contexts);

    positions.sort_unstable();
    positions.dedup();

    let mut seen = HashSet::new();
    contexts.retain(|c| seen.insert(c.clone()));

    BrandMention {
        brand: brand.to_string(),
        mentioned: !positions.is_empty() || implicit_count > 0,
        confidence,
        positions,
        contexts,
        method: methods,
    }
}

/// Match one brand against raw text.
///
/// Deterministic and free of side effects.
pub fn match_brand(text: &str, brand: &str, aliases: &[String], patterns: &[Regex]) -> BrandMention {
    match_prepared(&PreparedText::new(text), brand, aliases, patterns)
}

/// Brand matcher bound to a shared catalog.
#[derive(Debug, Clone)]
pub struct BrandMatcher {
    catalog: Arc<BrandCatalog>,
}

impl BrandMatcher {
    pub fn new(catalog: Arc<BrandCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &BrandCatalog {
        &self.catalog
    }

    pub fn match_brand(&self, text: &str, brand: &str) -> BrandMention {
        match_brand(
            text,
            brand,
            self.catalog.aliases(brand),
            self.catalog.patterns(brand),
        )
    }

    /// One mention per brand, in the order given.
    pub fn match_all(&self, text: &str, brands: &[String]) -> Vec<BrandMention> {
        let prepared = PreparedText::new(text);
        brands
            .iter()
            .map(|brand| {
                match_prepared(
                    &prepared,
                    brand,
                    self.catalog.aliases(brand),
                    self.catalog.patterns(brand),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> BrandMatcher {
        BrandMatcher::new(Arc::new(BrandCatalog::builtin().unwrap()))
    }

    fn brands(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mixed_script_example() {
        let results = matcher().match_all(
            "我推荐使用Notion和Obsidian",
            &brands(&["Notion", "Obsidian", "Roam Research"]),
        );
        assert_eq!(results.len(), 3);

        assert!(results[0].mentioned);
        assert!(results[0].confidence > 0.85);
        assert_eq!(results[0].positions, vec![5]);
        assert_eq!(results[0].method.to_string(), "exact,variant");

        assert!(results[1].mentioned);
        assert_eq!(results[1].positions, vec![12]);

        assert!(!results[2].mentioned);
        assert_eq!(results[2].confidence, 0.0);
        assert_eq!(results[2].method.to_string(), "none");
        assert!(results[2].contexts.is_empty());
    }

    #[test]
    fn test_ascii_neighbour_rejects_match() {
        let m = matcher().match_brand("A notional framework", "Notion");
        assert!(!m.mentioned);
        assert!(m.positions.is_empty());

        let m = matcher().match_brand("We tried Notion2 and liked it", "Notion");
        assert!(!m.mentioned);
    }

    #[test]
    fn test_punctuation_and_cjk_neighbours_accept_match() {
        let m = matcher().match_brand("(Notion), 以及Notion。", "Notion");
        assert!(m.mentioned);
        assert_eq!(m.positions, vec![1, 12]);
    }

    #[test]
    fn test_short_terms_bypass_boundary() {
        let m = match_brand("Gopher is not Go", "Go", &[], &[]);
        assert_eq!(m.positions, vec![0, 14]);
        assert!(m.method.exact);
    }

    #[test]
    fn test_overlapping_occurrences() {
        let m = match_brand("aaaa", "aa", &[], &[]);
        assert_eq!(m.positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_variant_only() {
        let m = matcher().match_brand("黑曜石是一个很好的工具", "Obsidian");
        assert!(m.mentioned);
        assert_eq!(m.method.to_string(), "variant");
        assert_eq!(m.positions, vec![0]);
        assert!((m.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_implicit_only() {
        let m = matcher().match_brand("我喜欢用知识图谱整理想法", "Obsidian");
        assert!(m.mentioned);
        assert!(m.positions.is_empty());
        assert_eq!(m.method.to_string(), "implicit");
        assert_eq!(m.contexts, vec!["implicit: 我喜欢用知识图谱整理想法".to_string()]);
        assert!((m.confidence - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_implicit_context_is_lowercased_window() {
        let text = format!("{}Markdown files stay local on disk", "x".repeat(40));
        let pattern = Regex::new("markdown.*local").unwrap();
        let m = match_brand(&text, "Obsidian", &[], std::slice::from_ref(&pattern));
        assert_eq!(m.contexts.len(), 1);
        let context = &m.contexts[0];
        assert!(context.starts_with("implicit: xxxxxxxxxxxxxxxxxxxxmarkdown"));
        assert!(context.ends_with("local on disk"));
    }

    #[test]
    fn test_positions_are_char_offsets_case_insensitive() {
        let m = match_brand("Ünïcödé NOTION rocks", "Notion", &[], &[]);
        assert_eq!(m.positions, vec![8]);
    }

    #[test]
    fn test_contexts_collapse_whitespace() {
        let m = match_brand("  Try \n\n  Logseq\t\tnow  ", "Logseq", &[], &[]);
        assert_eq!(m.contexts, vec!["Try Logseq now".to_string()]);
    }

    #[test]
    fn test_repeated_hits_and_long_context_raise_confidence() {
        let text = "Evernote is an established note-taking product. Many teams moved from \
                    Evernote to newer tools, but Evernote still has loyal users.";
        let m = match_brand(text, "Evernote", &[], &[]);
        assert_eq!(m.positions.len(), 3);
        // 0.6 + 0.3 + min(0.2, 0.15) + 0.1, clamped
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn test_empty_brand_and_empty_text() {
        assert!(!match_brand("anything", "", &[], &[]).mentioned);
        assert!(!match_brand("", "Notion", &[], &[]).mentioned);
    }

    #[test]
    fn test_unknown_brand_uses_exact_only() {
        let m = matcher().match_brand("I switched to Craft last year", "Craft");
        assert!(m.mentioned);
        assert_eq!(m.method.to_string(), "exact");
    }

    #[test]
    fn test_duplicate_contexts_removed_in_order() {
        let aliases = vec!["acme".to_string()];
        let m = match_brand("Acme", "Acme", &aliases, &[]);
        assert_eq!(m.positions, vec![0]);
        assert_eq!(m.contexts, vec!["Acme".to_string()]);
        assert_eq!(m.method.to_string(), "exact,variant");
    }

    #[test]
    fn test_deterministic_output() {
        let text = "Notion 和 notion.so 都很好，还有数据库笔记功能";
        let a = matcher().match_brand(text, "Notion");
        let b = matcher().match_brand(text, "Notion");
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    /// Small deterministic generator so the fuzz cases are reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
            items[(self.next() as usize) % items.len()]
        }
    }

    const ALPHABET: &[&str] = &[
        "a", "b", "n", "o", "t", "i", " ", "\n", ".", "笔", "记", "图", "谱", "Notion", "obsidian",
        "roam", "知识图谱", "数据库", "é", "Z", "9", "-", "黑曜石",
    ];

    #[test]
    fn test_confidence_bounded_for_generated_inputs() {
        let matcher = matcher();
        let mut rng = Lcg(42);
        let brand_pool = [
            "Notion", "Obsidian", "Roam Research", "a", "no", "Z9", "图谱", "Evernote",
        ];

        for _ in 0..500 {
            let len = (rng.next() % 60) as usize;
            let text: String = (0..len).map(|_| rng.pick(ALPHABET)).collect();
            let brand = rng.pick(&brand_pool);
            let m = matcher.match_brand(&text, brand);
            assert!((0.0..=1.0).contains(&m.confidence), "{text:?} {brand}");
            assert_eq!(m.mentioned, m.confidence > 0.0, "{text:?} {brand}");
            assert!(m.positions.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_bounded_exact_match_scores_high() {
        let mut rng = Lcg(7);
        let words = ["Acme", "Zentro", "Quillpad", "Brandly", "Vexa"];
        let fillers = [" ", ", ", "。", "（", "! ", "\n"];

        for _ in 0..200 {
            let brand = rng.pick(&words);
            let text = format!(
                "{}{}{}{}{}",
                rng.pick(&["intro", "我们用", ""]),
                rng.pick(&fillers),
                brand,
                rng.pick(&fillers),
                rng.pick(&["outro", "很好", ""]),
            );
            let m = match_brand(&text, brand, &[], &[]);
            assert!(m.mentioned, "{text:?}");
            assert!(m.method.exact);
            assert!(m.confidence >= 0.85, "{text:?} -> {}", m.confidence);
        }
    }
}
