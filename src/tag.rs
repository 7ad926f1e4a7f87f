/// Workload tag extraction from raw statement text.
///
/// A statement carries its workload as an inline comment marker:
/// `SELECT /* WORKLOAD_NAME=api_endpoint_1 */ * FROM t`. Only the narrow
/// `WORKLOAD_NAME=<token>` grammar inside `/* ... */` is recognized; nothing
/// else about the statement is parsed.
use regex::Regex;
use std::sync::LazyLock;

/// Default upper bound on a workload name, in bytes.
pub const DEFAULT_MAX_WORKLOAD_LEN: usize = 50;

/// Closed inline comments. The regex engine scans in linear time, so
/// statements of any length are handled in a single pass.
static COMMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*(.*?)\*/").unwrap());

/// The marker inside a comment body. The closing delimiter is already
/// excluded from the body; an opening one is cut off by [`token_end`].
static MARKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"WORKLOAD_NAME=(\S+)").unwrap());

/// Length of the token prefix that stops before any nested `/*`.
fn token_end(token: &str) -> usize {
    token.find("/*").unwrap_or(token.len())
}

/// Extracts workload names, rejecting tokens longer than `max_len`.
#[derive(Debug, Clone, Copy)]
pub struct TagExtractor {
    max_len: usize,
}

impl Default for TagExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKLOAD_LEN)
    }
}

impl TagExtractor {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Returns the workload named by the first well-formed marker, or `None`.
    ///
    /// Comments are visited in text order; within a comment the first marker
    /// whose token fits in `max_len` wins. Unterminated comments, empty
    /// tokens and over-long tokens never match. The result borrows from
    /// `sql`, nothing is allocated per call.
    pub fn extract<'a>(&self, sql: &'a str) -> Option<&'a str> {
        for comment in COMMENT_PATTERN.captures_iter(sql) {
            let Some(body) = comment.get(1) else {
                continue;
            };
            for marker in MARKER_PATTERN.captures_iter(body.as_str()) {
                if let Some(token) = marker.get(1) {
                    let token = &token.as_str()[..token_end(token.as_str())];
                    if token.is_empty() {
                        continue;
                    }
                    if token.len() <= self.max_len {
                        return Some(token);
                    }
                    tracing::debug!(
                        len = token.len(),
                        max_len = self.max_len,
                        "workload tag too long, ignoring"
                    );
                }
            }
        }
        None
    }
}

/// Extract a workload name using the default length bound.
pub fn find_workload_name(sql: &str) -> Option<&str> {
    TagExtractor::default().extract(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_tag_after_keyword() {
        assert_eq!(
            find_workload_name("SELECT /* WORKLOAD_NAME=api_endpoint_1 */ * FROM t WHERE id=4"),
            Some("api_endpoint_1")
        );
    }

    #[test]
    fn test_tag_position_independent() {
        assert_eq!(
            find_workload_name("SELECT * FROM t /* WORKLOAD_NAME=tail */"),
            Some("tail")
        );
        assert_eq!(
            find_workload_name("/* WORKLOAD_NAME=head */ UPDATE t SET a = 1"),
            Some("head")
        );
    }

    #[test]
    fn test_tag_without_spaces_inside_comment() {
        assert_eq!(
            find_workload_name("INSERT /*WORKLOAD_NAME=batch_job_1*/ INTO t VALUES (1)"),
            Some("batch_job_1")
        );
    }

    #[test]
    fn test_tag_among_other_comment_text() {
        assert_eq!(
            find_workload_name("SELECT /* app=web WORKLOAD_NAME=svc:orders/v2 trace=abc */ 1"),
            Some("svc:orders/v2")
        );
    }

    #[test]
    fn test_untagged_statement() {
        assert_eq!(find_workload_name("SELECT * FROM t WHERE id=4"), None);
        assert_eq!(find_workload_name(""), None);
    }

    #[test]
    fn test_marker_outside_comment_ignored() {
        assert_eq!(find_workload_name("SELECT 'WORKLOAD_NAME=nope' FROM t"), None);
        assert_eq!(find_workload_name("-- WORKLOAD_NAME=nope\nSELECT 1"), None);
    }

    #[test]
    fn test_empty_token_is_none() {
        assert_eq!(find_workload_name("SELECT /* WORKLOAD_NAME= */ 1"), None);
        assert_eq!(find_workload_name("SELECT /* WORKLOAD_NAME=*/ 1"), None);
    }

    #[test]
    fn test_unterminated_comment_is_none() {
        assert_eq!(find_workload_name("SELECT /* WORKLOAD_NAME=open 1"), None);
    }

    #[test]
    fn test_case_sensitive_marker_and_token() {
        assert_eq!(find_workload_name("SELECT /* workload_name=x */ 1"), None);
        assert_eq!(
            find_workload_name("SELECT /* WORKLOAD_NAME=MixedCase */ 1"),
            Some("MixedCase")
        );
    }

    #[test]
    fn test_first_well_formed_marker_wins() {
        assert_eq!(
            find_workload_name("SELECT /* WORKLOAD_NAME=first */ /* WORKLOAD_NAME=second */ 1"),
            Some("first")
        );
        assert_eq!(
            find_workload_name("SELECT /* WORKLOAD_NAME= */ /* WORKLOAD_NAME=second */ 1"),
            Some("second")
        );
    }

    #[test]
    fn test_over_long_token_rejected() {
        let extractor = TagExtractor::new(8);
        assert_eq!(extractor.extract("SELECT /* WORKLOAD_NAME=12345678 */ 1"), Some("12345678"));
        assert_eq!(extractor.extract("SELECT /* WORKLOAD_NAME=123456789 */ 1"), None);
    }

    #[test]
    fn test_token_stops_at_nested_comment_opener() {
        assert_eq!(find_workload_name("SELECT /* WORKLOAD_NAME=a/*b */ 1"), Some("a"));
        assert_eq!(find_workload_name("SELECT /* WORKLOAD_NAME=a//*b */ 1"), Some("a/"));
        assert_eq!(
            find_workload_name("SELECT /* WORKLOAD_NAME=/*x WORKLOAD_NAME=ok */ 1"),
            Some("ok")
        );
    }

    #[test]
    fn test_default_length_matches_view_column() {
        let name = "w".repeat(DEFAULT_MAX_WORKLOAD_LEN);
        let sql = format!("SELECT /* WORKLOAD_NAME={name} */ 1");
        assert_eq!(find_workload_name(&sql), Some(name.as_str()));
        let sql = format!("SELECT /* WORKLOAD_NAME={name}x */ 1");
        assert_eq!(find_workload_name(&sql), None);
    }

    #[test]
    fn test_comment_spanning_lines() {
        let sql = "SELECT /*\n  WORKLOAD_NAME=multi_line\n*/ 1";
        assert_eq!(find_workload_name(sql), Some("multi_line"));
    }

    #[test]
    fn test_long_statement_scanned() {
        let mut sql = String::from("SELECT ");
        sql.push_str(&"x, ".repeat(100_000));
        sql.push_str("1 /* WORKLOAD_NAME=deep */");
        assert_eq!(find_workload_name(&sql), Some("deep"));
    }
}
