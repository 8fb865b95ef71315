//! Pass/fail gate for generated SQL plus a non-blocking complexity report.
//!
//! Rules run in a fixed order and the first failure wins:
//! non-empty, leading SELECT, no mutating keyword, no injection shape,
//! allow-listed tables only, length ceiling.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use ingredb_core::config::SafetySettings;

macro_rules! sql_pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

sql_pattern!(RE_LEADING_SELECT, r"(?i)^\s*SELECT\b");
sql_pattern!(RE_LEADING_WORD, r"^\s*([A-Za-z_]+)");
sql_pattern!(
    RE_MUTATING,
    r"(?i)\b(DROP|DELETE|TRUNCATE|ALTER|INSERT|UPDATE|CREATE|GRANT|REVOKE|EXEC|EXECUTE)\b"
);
sql_pattern!(RE_QUOTE_TERMINATOR, r#"['"]\s*;"#);
sql_pattern!(RE_LINE_COMMENT, r"--");
sql_pattern!(RE_BLOCK_COMMENT, r"/\*");
sql_pattern!(RE_UNION_SELECT, r"(?i)\bUNION\s+(?:ALL\s+)?SELECT\b");
sql_pattern!(RE_XP_PROC, r"(?i)\bxp_");
sql_pattern!(RE_SP_PROC, r"(?i)\bsp_");
sql_pattern!(RE_FUNCTION, r"([A-Za-z_][A-Za-z0-9_]*)\s*\(");
sql_pattern!(RE_JOIN, r"(?i)\bJOIN\b");
sql_pattern!(RE_FILTER, r"(?i)\b(?:WHERE|HAVING)\b");
sql_pattern!(RE_PATTERN_OP, r"(?i)\b(?:LIKE|GLOB|REGEXP)\b");
sql_pattern!(
    RE_WHERE_CLAUSE,
    r"(?is)\bWHERE\b(.*?)(?:\bGROUP\s+BY\b|\bORDER\s+BY\b|\bHAVING\b|\bLIMIT\b|;|$)"
);
sql_pattern!(RE_STRIP_LINE_COMMENT, r"--[^\n]*");
sql_pattern!(RE_STRIP_BLOCK_COMMENT, r"/\*[\s\S]*?\*/");
sql_pattern!(RE_WHITESPACE, r"\s+");

/// Injection shapes checked by rule (d), with the reason reported on a hit.
static INJECTION_PATTERNS: [(&LazyLock<Option<Regex>>, &str); 6] = [
    (&RE_QUOTE_TERMINATOR, "quote followed by statement terminator"),
    (&RE_LINE_COMMENT, "inline comment marker"),
    (&RE_BLOCK_COMMENT, "block comment"),
    (&RE_UNION_SELECT, "UNION-based multi-statement query"),
    (&RE_XP_PROC, "extended stored procedure prefix"),
    (&RE_SP_PROC, "system stored procedure prefix"),
];

// A pattern that failed to compile counts as a hit: the gate fails closed.
fn hit(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_none_or(|r| r.is_match(text))
}

fn count(re: &LazyLock<Option<Regex>>, text: &str) -> usize {
    re.as_ref().map_or(0, |r| r.find_iter(text).count())
}

fn captures(re: &LazyLock<Option<Regex>>, text: &str) -> Vec<String> {
    re.as_ref()
        .map(|r| r.captures_iter(text).filter_map(|c| c.get(1)).map(|m| m.as_str().to_string()).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Comma,
    Open,
    Close,
    Dot,
    Other,
}

fn tokenize(query: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            ',' => tokens.push(Token::Comma),
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '.' => tokens.push(Token::Dot),
            '\'' => {
                // '' inside a literal is an escaped quote
                while let Some(n) = chars.next() {
                    if n == '\'' {
                        if chars.peek() == Some(&'\'') { chars.next(); } else { break; }
                    }
                }
                tokens.push(Token::Other);
            }
            '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                let name: String = chars.by_ref().take_while(|&n| n != close).collect();
                tokens.push(Token::Quoted(name));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&n) = chars.peek() {
                    if !(n.is_alphanumeric() || n == '_' || n == '$') { break; }
                    word.push(n);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            _ => tokens.push(Token::Other),
        }
    }
    tokens
}

/// Keywords that close a FROM list at the same nesting level.
const LIST_END: [&str; 9] = ["WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "UNION", "EXCEPT", "INTERSECT", "WINDOW"];

/// Every table a statement reads: each entry of a FROM list (comma
/// separated or joined), at any subquery depth. Aliases are skipped and
/// schema-qualified names come back whole, e.g. `main.sqlite_master`.
pub fn table_refs(query: &str) -> Vec<String> {
    let tokens = tokenize(query);
    let mut tables = Vec::new();
    let mut depth = 0usize;
    // nesting depths that currently have an open FROM list
    let mut lists: Vec<usize> = Vec::new();
    let mut expect_table = false;
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            Token::Open => {
                expect_table = false;
                depth += 1;
            }
            Token::Close => {
                depth = depth.saturating_sub(1);
                while lists.last().is_some_and(|&d| d > depth) {
                    lists.pop();
                }
            }
            Token::Comma => expect_table = lists.last() == Some(&depth),
            Token::Word(w) if w.eq_ignore_ascii_case("FROM") || w.eq_ignore_ascii_case("JOIN") => {
                if lists.last() != Some(&depth) {
                    lists.push(depth);
                }
                expect_table = true;
            }
            Token::Word(w) | Token::Quoted(w) if expect_table => {
                let mut name = w.clone();
                if let (Some(Token::Dot), Some(Token::Word(n) | Token::Quoted(n))) = (tokens.get(i + 1), tokens.get(i + 2)) {
                    name = format!("{name}.{n}");
                    i += 2;
                }
                tables.push(name);
                expect_table = false;
            }
            Token::Word(w) if LIST_END.iter().any(|k| w.eq_ignore_ascii_case(k)) => {
                if lists.last() == Some(&depth) {
                    lists.pop();
                }
                expect_table = false;
            }
            _ => expect_table = false,
        }
        i += 1;
    }
    tables
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Query must be a non-empty string")]
    Empty,
    #[error("Only SELECT queries are allowed (read-only operations)")]
    NotSelect,
    #[error("Mutating SQL keyword '{0}' detected - not allowed")]
    MutatingKeyword(String),
    #[error("Potential SQL injection detected - {0}")]
    Injection(&'static str),
    #[error("Access to table '{0}' is not allowed")]
    TableNotAllowed(String),
    #[error("Query exceeds maximum length ({max} characters, got {len})")]
    TooLong { len: usize, max: usize },
}

/// A statement that passed [`QueryGuard::validate`]. Only the guard builds these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery(String);

impl ValidatedQuery {
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_string(self) -> String { self.0 }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone)]
pub struct QueryGuard {
    allowed_tables: HashSet<String>,
    max_len: usize,
}

impl QueryGuard {
    pub fn new(settings: &SafetySettings) -> Self {
        Self {
            allowed_tables: settings.allowed_tables.iter().map(|t| t.to_lowercase()).collect(),
            max_len: settings.max_query_len,
        }
    }

    pub fn validate(&self, query: &str) -> Result<ValidatedQuery, Rejection> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Rejection::Empty);
        }

        if !hit(&RE_LEADING_SELECT, query) {
            // A statement that opens with a write verb reports the verb itself.
            let leading = captures(&RE_LEADING_WORD, query).into_iter().next().map(|w| w.to_uppercase());
            return Err(match leading {
                Some(word) if hit(&RE_MUTATING, &word) => Rejection::MutatingKeyword(word),
                _ => Rejection::NotSelect,
            });
        }

        if let Some(keyword) = captures(&RE_MUTATING, query).into_iter().next() {
            return Err(Rejection::MutatingKeyword(keyword.to_uppercase()));
        }

        for (pattern, reason) in &INJECTION_PATTERNS {
            if hit(pattern, query) {
                return Err(Rejection::Injection(*reason));
            }
        }

        for table in table_refs(query) {
            if !self.allowed_tables.contains(&table.to_lowercase()) {
                return Err(Rejection::TableNotAllowed(table));
            }
        }

        let len = query.chars().count();
        if len > self.max_len {
            return Err(Rejection::TooLong { len, max: self.max_len });
        }

        Ok(ValidatedQuery(query.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Observability-only view of a statement. Never consulted by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyReport {
    pub is_select_only: bool,
    pub detected_tables: Vec<String>,
    pub detected_functions: Vec<String>,
    pub join_count: usize,
    pub filter_count: usize,
    pub uses_pattern_match: bool,
    pub complexity: Complexity,
    pub safety_score: u32,
    pub warnings: Vec<String>,
}

pub fn analyze(query: &str) -> SafetyReport {
    let upper = query.to_uppercase();
    let join_count = count(&RE_JOIN, &upper);
    let filter_count = count(&RE_FILTER, &upper);
    let uses_pattern_match = count(&RE_PATTERN_OP, &upper) > 0;
    let mut warnings = Vec::new();

    let complexity = if join_count > 3 {
        warnings.push(format!("Query has {join_count} JOINs - may be slow"));
        Complexity::High
    } else if join_count > 1 || filter_count > 1 {
        Complexity::Medium
    } else {
        Complexity::Low
    };

    let mut score: i64 = 100;
    if uses_pattern_match {
        score -= 5;
        warnings.push("Query uses pattern matching - may be slow".to_string());
    }
    score -= 10 * i64::try_from(join_count).unwrap_or(i64::MAX / 20);
    if complexity == Complexity::High {
        score -= 20;
    }

    SafetyReport {
        is_select_only: count(&RE_LEADING_SELECT, query) > 0,
        detected_tables: table_refs(query),
        detected_functions: captures(&RE_FUNCTION, &upper),
        join_count,
        filter_count,
        uses_pattern_match,
        complexity,
        safety_score: u32::try_from(score.max(0)).unwrap_or(0),
        warnings,
    }
}

/// Comment-free, single-line rendering of a statement, for logs.
pub fn sanitize(query: &str) -> String {
    let mut out = query.to_string();
    for re in [&RE_STRIP_LINE_COMMENT, &RE_STRIP_BLOCK_COMMENT] {
        if let Some(r) = re.as_ref() { out = r.replace_all(&out, "").into_owned(); }
    }
    if let Some(r) = RE_WHITESPACE.as_ref() { out = r.replace_all(&out, " ").into_owned(); }
    out.trim().to_string()
}

/// Body of the first WHERE clause, up to GROUP BY / ORDER BY / HAVING / LIMIT.
pub fn where_clause(query: &ValidatedQuery) -> Option<String> {
    let re = RE_WHERE_CLAUSE.as_ref()?;
    let body = re.captures(query.as_str())?.get(1)?.as_str().trim();
    if body.is_empty() { None } else { Some(body.to_string()) }
}
