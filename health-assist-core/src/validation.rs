//! Boundary input validation: the checks applied to a request before any of
//! its fields reach the orchestrator, the graph/vector gateways, or a SQL
//! query. Every function here is pure and synchronous so it can run ahead of
//! any I/O in the handler.

use std::sync::LazyLock;

use regex::Regex;

/// Patterns indicative of a SQL-injection attempt. This is a defense-in-depth
/// boundary check — persistence always goes through parameterized `sqlx`
/// queries — but free-text fields are still rejected outright if they look
/// like an injection payload rather than a health question.
const SQL_INJECTION_PATTERNS: &[&str] = &[
    "union select",
    "union all select",
    "drop table",
    "drop database",
    "insert into",
    "delete from",
    "update set",
    "xp_cmdshell",
    "; --",
    "/*",
    "*/",
    "' or '1'='1",
    "\" or \"1\"=\"1",
    "' or 1=1",
    "exec(",
    "execute(",
];

static UUID_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("UUID path regex is valid")
});

/// Characters stripped from any incoming field before it is used anywhere:
/// null bytes are never valid in a Postgres `text` column and some HTTP
/// parsers pass them through unchanged.
pub fn strip_null_bytes(input: &str) -> String {
    input.replace('\0', "")
}

/// `true` if `text` contains a recognizable SQL-injection pattern. Matching
/// is case-insensitive and substring-based, favoring false positives over
/// false negatives for a boundary check.
pub fn contains_sql_injection_pattern(text: &str) -> bool {
    let lower = text.to_lowercase();
    SQL_INJECTION_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Escape the handful of characters that matter if a field ends up rendered
/// into HTML (error pages, admin views) without further validation.
pub fn html_sanitize(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Validate a path segment is a well-formed UUID (hyphenated, lowercase or
/// uppercase hex). Used for `{customer_id}` / `{session_id}` path parameters
/// ahead of any database lookup.
pub fn is_valid_uuid_path_segment(segment: &str) -> bool {
    UUID_PATH_REGEX.is_match(segment)
}

/// Validation failure surfaced to the caller as a 422, naming the offending
/// field and a machine-checkable reason code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub field: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl ValidationFailure {
    fn new(field: &'static str, code: &'static str, message: impl Into<String>) -> Self {
        Self { field, code, message: message.into() }
    }
}

/// Maximum length accepted for the chat message body.
pub const MAX_TEXT_LENGTH: usize = 5000;

/// Validate the free-text chat message: non-empty after trimming, under
/// [`MAX_TEXT_LENGTH`], and free of recognizable SQL-injection patterns.
/// Null bytes are stripped rather than rejected, since they're a parsing
/// artifact rather than a sign of intent.
pub fn validate_chat_text(raw: &str) -> Result<String, ValidationFailure> {
    let cleaned = strip_null_bytes(raw);
    let trimmed = cleaned.trim();

    if trimmed.is_empty() {
        return Err(ValidationFailure::new("text", "REQUIRED", "message text must not be empty"));
    }

    if trimmed.chars().count() > MAX_TEXT_LENGTH {
        return Err(ValidationFailure::new(
            "text",
            "TOO_LONG",
            format!("message text must be at most {} characters", MAX_TEXT_LENGTH),
        ));
    }

    if contains_sql_injection_pattern(trimmed) {
        return Err(ValidationFailure::new(
            "text",
            "SUSPECT_PATTERN",
            "message text contains a disallowed pattern",
        ));
    }

    Ok(trimmed.to_string())
}

/// Validate a path parameter that must be a UUID (`customer_id`, `session_id`).
pub fn validate_uuid_path(field: &'static str, segment: &str) -> Result<uuid::Uuid, ValidationFailure> {
    if !is_valid_uuid_path_segment(segment) {
        return Err(ValidationFailure::new(field, "INVALID_UUID", format!("{} is not a valid UUID", field)));
    }
    uuid::Uuid::parse_str(segment)
        .map_err(|_| ValidationFailure::new(field, "INVALID_UUID", format!("{} is not a valid UUID", field)))
}

/// Validate a free-form profile string field (city, a free-text condition):
/// strip null bytes, reject SQL-injection patterns, and HTML-sanitize since
/// these values are not meant to carry markup.
pub fn sanitize_profile_field(field: &'static str, raw: &str) -> Result<String, ValidationFailure> {
    let cleaned = strip_null_bytes(raw);
    if contains_sql_injection_pattern(&cleaned) {
        return Err(ValidationFailure::new(field, "SUSPECT_PATTERN", format!("{} contains a disallowed pattern", field)));
    }
    Ok(html_sanitize(&cleaned))
}

impl From<ValidationFailure> for crate::responses::ValidationError {
    fn from(failure: ValidationFailure) -> Self {
        let mut errors = crate::responses::ValidationError::new("Validation failed");
        errors.add_field_error(failure.field, failure.code, failure.message);
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_null_bytes_removes_embedded_nul() {
        assert_eq!(strip_null_bytes("fe\0ver"), "fever");
    }

    #[test]
    fn contains_sql_injection_pattern_detects_union_select() {
        assert!(contains_sql_injection_pattern("1; UNION SELECT * FROM customers"));
    }

    #[test]
    fn contains_sql_injection_pattern_false_for_plain_question() {
        assert!(!contains_sql_injection_pattern("I have a fever and a headache"));
    }

    #[test]
    fn html_sanitize_escapes_markup_characters() {
        assert_eq!(html_sanitize("<script>alert('x')</script>"), "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;");
    }

    #[test]
    fn is_valid_uuid_path_segment_accepts_canonical_uuid() {
        assert!(is_valid_uuid_path_segment("550e8400-e29b-41d4-a716-446655440000"));
    }

    #[test]
    fn is_valid_uuid_path_segment_rejects_garbage() {
        assert!(!is_valid_uuid_path_segment("../../etc/passwd"));
        assert!(!is_valid_uuid_path_segment("1 OR 1=1"));
    }

    #[test]
    fn validate_chat_text_rejects_empty() {
        assert!(validate_chat_text("   ").is_err());
    }

    #[test]
    fn validate_chat_text_rejects_oversized_input() {
        let text = "a".repeat(MAX_TEXT_LENGTH + 1);
        let err = validate_chat_text(&text).unwrap_err();
        assert_eq!(err.code, "TOO_LONG");
    }

    #[test]
    fn validate_chat_text_rejects_injection_pattern() {
        let err = validate_chat_text("'; DROP TABLE customers; --").unwrap_err();
        assert_eq!(err.code, "SUSPECT_PATTERN");
    }

    #[test]
    fn validate_chat_text_accepts_ordinary_question() {
        assert_eq!(validate_chat_text("  I have a fever  ").unwrap(), "I have a fever");
    }

    #[test]
    fn validate_uuid_path_rejects_non_uuid() {
        assert!(validate_uuid_path("session_id", "not-a-uuid").is_err());
    }

    #[test]
    fn sanitize_profile_field_rejects_injection_and_escapes_markup() {
        assert!(sanitize_profile_field("city", "'; DROP TABLE x; --").is_err());
        assert_eq!(sanitize_profile_field("city", "<b>Pune</b>").unwrap(), "&lt;b&gt;Pune&lt;/b&gt;");
    }
}
