//! Reusable prompt templates with `{name}` placeholders.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Missing value for template variable '{0}'")]
    MissingVariable(String),

    #[error("Unterminated placeholder starting at character {0}")]
    Unterminated(usize),

    #[error("Invalid placeholder name '{0}'")]
    InvalidPlaceholder(String),

    #[error("Invalid template: {0}")]
    Invalid(String),
}

/// A stored prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub category: Option<String>,
    pub template: String,
    /// Distinct placeholder names in first-use order.
    pub variables: Vec<String>,
    pub description: Option<String>,
    pub usage_count: u64,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a caller supplies when creating a template.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTemplate {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub template: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

impl PromptTemplate {
    /// Build a template, extracting its variables.
    pub fn create(new: NewTemplate) -> Result<Self, TemplateError> {
        if new.name.trim().is_empty() {
            return Err(TemplateError::Invalid("name must not be empty".into()));
        }
        if new.template.trim().is_empty() {
            return Err(TemplateError::Invalid("template must not be empty".into()));
        }
        let variables = placeholders(&new.template)?;
        let now = crate::detection::timestamp_now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id,
            name: new.name.trim().to_string(),
            category: new.category,
            template: new.template,
            variables,
            description: new.description,
            usage_count: 0,
            is_public: new.is_public,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn render(&self, values: &HashMap<String, String>) -> Result<String, TemplateError> {
        render(&self.template, values)
    }
}

enum Segment<'a> {
    Literal(char),
    Placeholder(&'a str),
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let mut segments = Vec::new();
    let mut chars = template.char_indices().enumerate().peekable();

    while let Some((char_pos, (byte_pos, c))) = chars.next() {
        match c {
            '{' => {
                if matches!(chars.peek(), Some((_, (_, '{')))) {
                    chars.next();
                    segments.push(Segment::Literal('{'));
                    continue;
                }
                let start = byte_pos + 1;
                let mut end = None;
                for (_, (idx, inner)) in chars.by_ref() {
                    if inner == '}' {
                        end = Some(idx);
                        break;
                    }
                }
                let end = end.ok_or(TemplateError::Unterminated(char_pos))?;
                let name = template[start..end].trim();
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(TemplateError::InvalidPlaceholder(name.to_string()));
                }
                segments.push(Segment::Placeholder(name));
            }
            '}' => {
                if matches!(chars.peek(), Some((_, (_, '}')))) {
                    chars.next();
                }
                segments.push(Segment::Literal('}'));
            }
            other => segments.push(Segment::Literal(other)),
        }
    }

    Ok(segments)
}

/// Distinct placeholder names, in first-use order.
pub fn placeholders(template: &str) -> Result<Vec<String>, TemplateError> {
    let mut names: Vec<String> = Vec::new();
    for segment in parse(template)? {
        if let Segment::Placeholder(name) = segment {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Substitute every `{name}` with its value. `{{` and `}}` produce literal braces.
pub fn render(template: &str, values: &HashMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(c) => out.push(c),
            Segment::Placeholder(name) => {
                let value = values
                    .get(name)
                    .ok_or_else(|| TemplateError::MissingVariable(name.to_string()))?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_values() {
        let out = render(
            "Best {category} tools for {audience}?",
            &values(&[("category", "note-taking"), ("audience", "students")]),
        )
        .unwrap();
        assert_eq!(out, "Best note-taking tools for students?");
    }

    #[test]
    fn test_render_escaped_braces() {
        let out = render("{{literal}} and {x}}}", &values(&[("x", "1")])).unwrap();
        assert_eq!(out, "{literal} and 1}");
    }

    #[test]
    fn test_missing_variable() {
        let err = render("Hello {name}", &HashMap::new()).unwrap_err();
        assert_eq!(err, TemplateError::MissingVariable("name".to_string()));
    }

    #[test]
    fn test_unterminated_placeholder() {
        let err = render("Héllo {name", &values(&[("name", "x")])).unwrap_err();
        assert_eq!(err, TemplateError::Unterminated(6));
    }

    #[test]
    fn test_invalid_placeholder_name() {
        assert!(matches!(
            placeholders("{}"),
            Err(TemplateError::InvalidPlaceholder(_))
        ));
        assert!(matches!(
            placeholders("{a b}"),
            Err(TemplateError::InvalidPlaceholder(_))
        ));
    }

    #[test]
    fn test_placeholders_are_distinct_in_order() {
        let names = placeholders("{b} {a} {b} {{c}}").unwrap();
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_create_extracts_variables() {
        let template = PromptTemplate::create(NewTemplate {
            user_id: "u1".into(),
            name: " Compare ".into(),
            category: Some("comparison".into()),
            template: "Compare {a} with {b}".into(),
            description: None,
            is_public: false,
        })
        .unwrap();
        assert_eq!(template.name, "Compare");
        assert_eq!(template.variables, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(template.usage_count, 0);
    }

    #[test]
    fn test_create_rejects_bad_template() {
        let err = PromptTemplate::create(NewTemplate {
            user_id: "u1".into(),
            name: "n".into(),
            category: None,
            template: "open {".into(),
            description: None,
            is_public: false,
        })
        .unwrap_err();
        assert!(matches!(err, TemplateError::Unterminated(_)));
    }
}
