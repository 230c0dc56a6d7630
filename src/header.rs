//! Import-header parsing, canonicalization, comment stripping and raw-reply
//! classification. Ported from the `parse_header` / `make_header_key` /
//! `remove_comments` / `check_response_for_error` helpers of the system this
//! worker replaces.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Canonicalized, deduplicated, sorted tuple of import lines. Two headers
/// with the same import set produce the same key regardless of textual
/// order or duplicates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeaderKey(Vec<String>);

impl HeaderKey {
    pub fn empty() -> Self {
        HeaderKey(Vec::new())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// The imports joined by newline, as sent to the REPL to initialize
    /// environment 0.
    pub fn joined(&self) -> String {
        self.0.join("\n")
    }
}

impl fmt::Display for HeaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Split `text` into its leading `import ...` lines and the remaining body.
/// Non-blank lines matching `^import .*$` (after trimming) form the header
/// list in source order; the rest form the body, rejoined by newline and
/// trimmed. No deduplication happens here — that's `make_header_key`'s job.
pub fn parse_header(text: &str) -> (Vec<String>, String) {
    let mut header = Vec::new();
    let mut rest = Vec::new();

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let trimmed = line.trim();
        if trimmed.starts_with("import ") {
            header.push(trimmed.to_string());
        } else {
            rest.push(line);
        }
    }

    (header, rest.join("\n").trim().to_string())
}

/// Canonicalize a header (or the absence of one) into a `HeaderKey`:
/// trimmed, deduplicated, sorted. `None` or an empty slice both produce the
/// empty key.
pub fn make_header_key<S: AsRef<str>>(headers: Option<&[S]>) -> HeaderKey {
    match headers {
        None => HeaderKey::empty(),
        Some(hs) if hs.is_empty() => HeaderKey::empty(),
        Some(hs) => {
            let set: BTreeSet<String> = hs.iter().map(|s| s.as_ref().trim().to_string()).collect();
            HeaderKey(set.into_iter().collect())
        }
    }
}

/// Strip block comments `/- ... -/` (through the trailing newline) followed
/// by line comments `-- ...` through end-of-line. Order matters: block
/// comments are removed first so a line comment marker inside a block
/// comment isn't treated as a live line comment.
pub fn remove_comments(text: &str) -> String {
    let without_blocks = strip_block_comments(text);
    strip_line_comments(&without_blocks)
}

fn strip_block_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if text[i..].starts_with("/-") {
            // Matches `/-.*? -/\n` (DOTALL, non-greedy): the closer is the
            // literal sequence " -/" (a space before the dash-slash)
            // immediately followed by a newline. A bare "-/" with no
            // preceding space doesn't count as a terminator.
            if let Some(found) = find_block_terminator(text, i + 2) {
                i = found;
                continue;
            }
        }
        let ch_len = text[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        out.push_str(&text[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// From byte offset `from`, find the end (exclusive, just past the
/// newline) of the next `" -/\n"` sequence, or `None` if no such
/// terminator exists in the rest of `text`.
fn find_block_terminator(text: &str, from: usize) -> Option<usize> {
    let mut search_from = from;
    loop {
        let rel = text[search_from..].find("-/")?;
        let dash_at = search_from + rel;
        let preceded_by_space = dash_at > 0 && text.as_bytes()[dash_at - 1] == b' ';
        let close_at = dash_at + 2;
        if preceded_by_space && text[close_at..].starts_with('\n') {
            return Some(close_at + 1);
        }
        search_from = dash_at + 2;
    }
}

fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if text[i..].starts_with("--") {
            if let Some(nl) = text[i..].find('\n') {
                i += nl + 1;
                continue;
            } else {
                // No trailing newline: `--.*?\n` can't match, so the
                // original regex leaves this text untouched rather than
                // consuming it.
                out.push_str(&text[i..]);
                break;
            }
        }
        let ch_len = text[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        out.push_str(&text[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// A classified result record: whether the theorem verified, and the list
/// of errors (raw JSON message objects or single-string errors wrapped as
/// JSON strings).
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub raw_reply: Option<Value>,
    pub verified: bool,
    pub errors: Vec<Value>,
}

/// Classify a raw REPL reply into a result record. Decision order (first
/// match wins):
/// 1. missing/empty reply -> infrastructure failure
/// 2. `message` contains "timeout" -> timeout
/// 3. `error` field present -> REPL error
/// 4. `messages` list present -> compiler diagnostics (errors = severity=="error" entries)
/// 5. otherwise -> success
pub fn classify(raw_reply: Option<&Value>) -> ResultRecord {
    let is_empty = match raw_reply {
        None => true,
        Some(Value::Null) => true,
        Some(Value::Object(m)) => m.is_empty(),
        Some(_) => false,
    };

    if is_empty {
        return ResultRecord {
            raw_reply: raw_reply.cloned(),
            verified: false,
            errors: vec![Value::String("job failed".to_string())],
        };
    }

    let reply = raw_reply.unwrap();

    if let Some(message) = reply.get("message").and_then(Value::as_str) {
        if message.contains("timeout") {
            return ResultRecord {
                raw_reply: Some(reply.clone()),
                verified: false,
                errors: vec![Value::String("timeout".to_string())],
            };
        }
    }

    if let Some(error) = reply.get("error") {
        return ResultRecord {
            raw_reply: Some(reply.clone()),
            verified: false,
            errors: vec![error.clone()],
        };
    }

    if let Some(messages) = reply.get("messages").and_then(Value::as_array) {
        let errors: Vec<Value> = messages
            .iter()
            .filter(|m| m.get("severity").and_then(Value::as_str) == Some("error"))
            .cloned()
            .collect();
        let verified = errors.is_empty();
        return ResultRecord {
            raw_reply: Some(reply.clone()),
            verified,
            errors,
        };
    }

    ResultRecord {
        raw_reply: Some(reply.clone()),
        verified: true,
        errors: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_header_splits_imports_from_body() {
        let text = "import Mathlib\nimport Aesop\n\ntheorem t : 1 + 1 = 2 := by decide";
        let (header, body) = parse_header(text);
        assert_eq!(header, vec!["import Mathlib", "import Aesop"]);
        assert_eq!(body, "theorem t : 1 + 1 = 2 := by decide");
    }

    #[test]
    fn parse_header_round_trip_preserves_non_blank_lines() {
        let text = "import A\n\n  \ntheorem t : True := trivial\nqed.";
        let (header, body) = parse_header(text);
        let rejoined: Vec<&str> = header
            .iter()
            .map(String::as_str)
            .chain(body.lines())
            .collect();
        let expected: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        assert_eq!(rejoined, expected);
    }

    #[test]
    fn parse_header_no_imports() {
        let (header, body) = parse_header("theorem t : True := trivial");
        assert!(header.is_empty());
        assert_eq!(body, "theorem t : True := trivial");
    }

    #[test]
    fn make_header_key_is_order_and_duplicate_insensitive() {
        let xs = vec!["import B".to_string(), "import A".to_string()];
        let reversed: Vec<String> = xs.iter().rev().cloned().collect();
        let doubled: Vec<String> = xs.iter().chain(xs.iter()).cloned().collect();

        assert_eq!(make_header_key(Some(&xs)), make_header_key(Some(&reversed)));
        assert_eq!(make_header_key(Some(&xs)), make_header_key(Some(&doubled)));
    }

    #[test]
    fn make_header_key_empty_for_none_or_empty() {
        assert_eq!(make_header_key::<String>(None), HeaderKey::empty());
        assert_eq!(make_header_key::<String>(Some(&[])), HeaderKey::empty());
    }

    #[test]
    fn remove_comments_strips_block_then_line_comments() {
        let text = "/- this is\na block comment -/\ntheorem t : True := trivial -- trailing note\n";
        let cleaned = remove_comments(text);
        // the line-comment strip consumes "-- trailing note\n" but leaves
        // the space that preceded it, since the pattern starts at "--".
        assert_eq!(cleaned, "theorem t : True := trivial ");
    }

    #[test]
    fn remove_comments_is_idempotent() {
        let text = "/- a -/\ntheorem t -- note\n := trivial\n";
        let once = remove_comments(text);
        let twice = remove_comments(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn remove_comments_requires_space_before_block_closer() {
        // "note-/" has no space before "-/", so it isn't a valid
        // terminator per the original `r"/-.*? -/\n"` pattern; the block
        // stays open and the text is left untouched.
        let text = "/- note-/\ntheorem t : True := trivial\n";
        assert_eq!(remove_comments(text), text);
    }

    #[test]
    fn remove_comments_keeps_unterminated_line_comment() {
        // No trailing newline after "--": `r"--.*?\n"` can't match, so the
        // original leaves this text untouched instead of deleting it.
        let text = "theorem t : True := trivial -- trailing note with no newline";
        assert_eq!(remove_comments(text), text);
    }

    #[test]
    fn classify_empty_reply_is_infrastructure_failure() {
        let rec = classify(None);
        assert!(!rec.verified);
        assert_eq!(rec.errors, vec![json!("job failed")]);

        let rec = classify(Some(&json!({})));
        assert!(!rec.verified);
    }

    #[test]
    fn classify_timeout_message() {
        let reply = json!({"message": "timeout after 60s"});
        let rec = classify(Some(&reply));
        assert!(!rec.verified);
        assert_eq!(rec.errors, vec![json!("timeout")]);
    }

    #[test]
    fn classify_repl_error() {
        let reply = json!({"error": "parse failure"});
        let rec = classify(Some(&reply));
        assert!(!rec.verified);
        assert_eq!(rec.errors, vec![json!("parse failure")]);
    }

    #[test]
    fn classify_compiler_diagnostics() {
        let reply = json!({"messages": [{"severity": "error", "data": "type mismatch"}]});
        let rec = classify(Some(&reply));
        assert!(!rec.verified);
        assert_eq!(rec.errors.len(), 1);
        assert_eq!(rec.errors[0]["severity"], "error");
    }

    #[test]
    fn classify_success() {
        let reply = json!({"messages": [], "env": 1});
        let rec = classify(Some(&reply));
        assert!(rec.verified);
        assert!(rec.errors.is_empty());
    }

    #[test]
    fn classify_is_total_over_arbitrary_shapes() {
        for reply in [
            json!(null),
            json!({}),
            json!({"message": "x"}),
            json!({"unrelated": 1}),
        ] {
            let rec = classify(Some(&reply));
            assert!(rec.verified == true || rec.verified == false);
        }
    }
}
