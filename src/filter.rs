//! The `id_match` filter of the user search.
//!
//! Clients send a comparison such as `>100` or `<= 42`. It is parsed into a
//! whitelisted operator and an integer that is bound as `$1`, never spliced
//! into the statement.

use crate::engine::Param;

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid operator in id_match: '{0}'. Expected one of =, !=, <>, <, <=, >, >=")]
    InvalidOperator(String),

    #[error("Invalid value in id_match: '{0}'")]
    InvalidValue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMatch {
    pub op: Comparison,
    pub value: i64,
}

impl FromStr for IdMatch {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !matches!(c, '=' | '!' | '<' | '>'))
            .unwrap_or(s.len());
        let (op, rest) = s.split_at(split);

        let op = match op {
            "=" | "==" => Comparison::Eq,
            "!=" | "<>" => Comparison::Ne,
            "<" => Comparison::Lt,
            "<=" => Comparison::Le,
            ">" => Comparison::Gt,
            ">=" => Comparison::Ge,
            _ => return Err(FilterError::InvalidOperator(op.to_string())),
        };

        let rest = rest.trim();
        let value = rest
            .parse::<i64>()
            .map_err(|_| FilterError::InvalidValue(rest.to_string()))?;

        Ok(Self { op, value })
    }
}

/// Statement and parameters for a user search, ordered by id.
pub fn user_search(filter: Option<&IdMatch>) -> (String, Vec<Param>) {
    match filter {
        Some(m) => (
            format!("SELECT * FROM users WHERE id {} $1 ORDER BY id", m.op),
            vec![Param::Int(m.value)],
        ),
        None => ("SELECT * FROM users ORDER BY id".to_string(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operators() {
        let cases = [
            (">100", Comparison::Gt, 100),
            (">= 5", Comparison::Ge, 5),
            ("  < 7 ", Comparison::Lt, 7),
            ("<=0", Comparison::Le, 0),
            ("=42", Comparison::Eq, 42),
            ("!=3", Comparison::Ne, 3),
            ("<>-1", Comparison::Ne, -1),
        ];
        for (input, op, value) in cases {
            assert_eq!(input.parse::<IdMatch>(), Ok(IdMatch { op, value }), "{input}");
        }
    }

    #[test]
    fn test_parse_rejects_injection() {
        assert_eq!(
            "> 1; DROP TABLE users".parse::<IdMatch>(),
            Err(FilterError::InvalidValue("1; DROP TABLE users".into()))
        );
        assert_eq!(
            "IN (1, 2)".parse::<IdMatch>(),
            Err(FilterError::InvalidOperator("".into()))
        );
        assert_eq!(
            "=<5".parse::<IdMatch>(),
            Err(FilterError::InvalidOperator("=<".into()))
        );
    }

    #[test]
    fn test_user_search_sql() {
        let m = IdMatch {
            op: Comparison::Ge,
            value: 10,
        };
        let (sql, params) = user_search(Some(&m));
        assert_eq!(sql, "SELECT * FROM users WHERE id >= $1 ORDER BY id");
        assert_eq!(params, vec![Param::Int(10)]);

        let (sql, params) = user_search(None);
        assert_eq!(sql, "SELECT * FROM users ORDER BY id");
        assert!(params.is_empty());
    }
}
