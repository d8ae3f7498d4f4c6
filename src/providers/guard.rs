//! Statement guard for the free-form SQL path
//!
//! `execute_sql` serves trusted internal callers (table previews). Before a
//! statement reaches a backend it must pass a whole-word, case-insensitive
//! keyword denylist and contain exactly one statement.

use crate::errors::{Result, SourceplaneError};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Keywords that mutate data, schema or privileges
pub const DENIED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE", "CREATE", "GRANT", "EXEC", "EXECUTE",
];

static DENYLIST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(DROP|DELETE|UPDATE|INSERT|ALTER|TRUNCATE|CREATE|GRANT|EXEC|EXECUTE)\b")
        .expect("Denylist regex is valid at compile time")
});

/// Validate a free-form statement, returning it trimmed and without a
/// trailing semicolon.
///
/// Rejections are logged with the workspace id only; the statement body may
/// embed credentials.
pub fn check_statement<'a>(statement: &'a str, workspace_id: &str) -> Result<&'a str> {
    let trimmed = statement.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

    if trimmed.is_empty() {
        return Err(SourceplaneError::validation_field("SQL statement cannot be empty", "statement"));
    }

    if let Some(found) = DENYLIST_REGEX.find(trimmed) {
        let keyword = found.as_str().to_ascii_uppercase();
        warn!(workspace_id = %workspace_id, keyword = %keyword, "Rejected SQL statement containing denied keyword");
        return Err(SourceplaneError::security(
            format!("Statement contains forbidden keyword '{}'", keyword),
            Some(workspace_id),
        ));
    }

    if trimmed.contains(';') {
        warn!(workspace_id = %workspace_id, "Rejected SQL statement containing multiple statements");
        return Err(SourceplaneError::security(
            "Only a single statement is allowed",
            Some(workspace_id),
        ));
    }

    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn is_security(result: Result<&str>) -> bool {
        matches!(result, Err(SourceplaneError::Security { .. }))
    }

    #[test]
    fn test_rejects_mutations_case_insensitively() {
        assert!(is_security(check_statement("DROP TABLE x", "ws")));
        assert!(is_security(check_statement("delete from x", "ws")));
        assert!(is_security(check_statement("UpDaTe x SET y=1", "ws")));
        assert!(is_security(check_statement("insert into x values (1)", "ws")));
        assert!(is_security(check_statement("  truncate x", "ws")));
        assert!(is_security(check_statement("EXEC sp_who", "ws")));
        assert!(is_security(check_statement("grant all on x to y", "ws")));
    }

    #[test]
    fn test_accepts_plain_select() {
        assert_eq!(
            check_statement("SELECT * FROM x LIMIT 10", "ws").unwrap(),
            "SELECT * FROM x LIMIT 10"
        );
        assert_eq!(check_statement("select 1;", "ws").unwrap(), "select 1");
    }

    #[test]
    fn test_whole_word_matching() {
        assert!(check_statement("SELECT created_at, updated_by FROM audit", "ws").is_ok());
        assert!(check_statement("SELECT * FROM dropped_items", "ws").is_ok());
    }

    #[test]
    fn test_stacked_statements_rejected() {
        assert!(is_security(check_statement("SELECT 1; SELECT 2", "ws")));
    }

    #[test]
    fn test_empty_statement_is_validation_error() {
        assert!(matches!(check_statement("  ; ", "ws"), Err(SourceplaneError::Validation { .. })));
    }

    #[traced_test]
    #[test]
    fn test_rejection_log_omits_statement_body() {
        let _ = check_statement("DELETE FROM users WHERE password = 'hunter2'", "ws-42");
        assert!(logs_contain("ws-42"));
        assert!(!logs_contain("hunter2"));
    }
}
