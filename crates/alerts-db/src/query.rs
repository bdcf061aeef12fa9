//! SQL file loading and named-parameter rewriting.
//!
//! Query files use `:name` placeholders. Postgres wants `$n`, so names are
//! rewritten in order of first appearance; a repeated name reuses its index.
//! `::casts`, string literals, quoted identifiers and comments are copied
//! through untouched.

use std::path::Path;

use alerts_core::error::{AlertsError, Result};
use alerts_core::types::EventFilter;

/// A query ready for positional binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuery {
    pub sql: String,
    /// Parameter names in `$1..$n` order.
    pub params: Vec<String>,
}

/// A bind value taken from the event filter.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    BigInt(i64),
    NullableBigInt(Option<i64>),
    Int(i32),
    Text(String),
}

/// Read a query file. A missing file is a configuration error.
pub fn load_sql_query(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(AlertsError::config(format!(
            "SQL query file not found: {}",
            path.display()
        )));
    }
    let sql = std::fs::read_to_string(path)?;
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(AlertsError::config(format!("SQL query file is empty: {}", path.display())));
    }
    Ok(sql.to_string())
}

pub fn rewrite_named_params(sql: &str) -> PreparedQuery {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut params: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = quoted_end(&chars, i, c);
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p);
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = find_block_end(&chars, i + 2);
                out.extend(&chars[i..end]);
                i = end;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars.get(i + 1).is_some_and(|&n| n.is_ascii_alphabetic() || n == '_') => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let index = match params.iter().position(|p| *p == name) {
                    Some(pos) => pos + 1,
                    None => {
                        params.push(name);
                        params.len()
                    }
                };
                out.push_str(&format!("${index}"));
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    PreparedQuery { sql: out, params }
}

/// Index just past the closing quote; doubled quotes are escapes.
fn quoted_end(chars: &[char], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn find_block_end(chars: &[char], from: usize) -> usize {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}

/// Bind value for a named parameter. Unknown names are configuration errors.
pub fn param_value(name: &str, filter: &EventFilter) -> Result<QueryParam> {
    Ok(match name {
        "type_id" => QueryParam::BigInt(filter.type_id),
        "status_id" => QueryParam::NullableBigInt(filter.status_id),
        "name_filter" => QueryParam::Text(filter.name_filter_pattern()),
        "name_excluded" => QueryParam::Text(filter.name_excluded_pattern()),
        "lookback_days" => QueryParam::Int(filter.lookback_days),
        other => {
            return Err(AlertsError::config(format!(
                "query uses unknown parameter ':{other}'"
            )));
        }
    })
}

impl PreparedQuery {
    /// Bind values in positional order.
    pub fn bind_values(&self, filter: &EventFilter) -> Result<Vec<QueryParam>> {
        self.params.iter().map(|p| param_value(p, filter)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_in_order_and_reuses_index() {
        let q = rewrite_named_params(
            "SELECT * FROM events WHERE type_id = :type_id AND (:status_id IS NULL OR status_id = :status_id)",
        );
        assert_eq!(
            q.sql,
            "SELECT * FROM events WHERE type_id = $1 AND ($2 IS NULL OR status_id = $2)"
        );
        assert_eq!(q.params, vec!["type_id", "status_id"]);
    }

    #[test]
    fn test_casts_and_literals_untouched() {
        let q = rewrite_named_params(
            "SELECT created_at::date, ':not_a_param', \"col:x\" FROM t WHERE s = :status_id::bigint -- :comment\n AND n ILIKE :name_filter /* :also */",
        );
        assert_eq!(
            q.sql,
            "SELECT created_at::date, ':not_a_param', \"col:x\" FROM t WHERE s = $1::bigint -- :comment\n AND n ILIKE $2 /* :also */"
        );
        assert_eq!(q.params, vec!["status_id", "name_filter"]);
    }

    #[test]
    fn test_escaped_quote_inside_literal() {
        let q = rewrite_named_params("SELECT 'it''s :x' WHERE a = :type_id");
        assert_eq!(q.sql, "SELECT 'it''s :x' WHERE a = $1");
    }

    #[test]
    fn test_bind_values_follow_param_order() {
        let q = rewrite_named_params("WHERE n ILIKE :name_filter AND d > :lookback_days AND t = :type_id");
        let filter = EventFilter::default();
        let values = q.bind_values(&filter).unwrap();
        assert_eq!(
            values,
            vec![
                QueryParam::Text("%hot%".into()),
                QueryParam::Int(17),
                QueryParam::BigInt(18),
            ]
        );
    }

    #[test]
    fn test_unknown_param_is_config_error() {
        let q = rewrite_named_params("WHERE x = :vessel_id");
        assert!(matches!(
            q.bind_values(&EventFilter::default()),
            Err(AlertsError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_missing_query_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_sql_query(&dir.path().join("missing.sql")),
            Err(AlertsError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_query_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.sql");
        std::fs::write(&path, "\n  SELECT 1\n\n").unwrap();
        assert_eq!(load_sql_query(&path).unwrap(), "SELECT 1");
    }
}
