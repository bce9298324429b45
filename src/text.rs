//! Text shaping for spoken replies.
//!
//! Two cleanup policies share the same whitespace and list-marker rules:
//! - [`normalize`]: strict policy for LLM output (no questions, bounded length)
//! - [`normalize_direct`]: lenient policy for user-authored text
//!
//! [`split_sentences`] cuts a reply into the segments streamed to the player.

use std::sync::LazyLock;

use regex::Regex;

/// Sentence ends accepted on LLM replies.
const REPLY_ENDS: &[char] = &['。', '！', '？'];

/// Sentence ends accepted on direct text and used as segment boundaries.
const SENTENCE_ENDS: &[char] = &['。', '！', '？', '!', '?'];

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)[\-\*]\s+").expect("valid regex"));

/// Collapse whitespace runs and drop `-` / `*` list markers.
fn clean(text: &str) -> String {
    let collapsed = WHITESPACE.replace_all(text, " ");
    LIST_MARKER
        .replace_all(collapsed.trim(), " ")
        .trim()
        .to_string()
}

/// Normalize an LLM reply to the conversational policy.
///
/// Returns `None` when the text is empty, ends in a question, or is shorter
/// than `min_chars` after shaping. Over-long text is cut at the last sentence
/// end within `max_chars + 1` characters when that keeps at least
/// `min_chars`, otherwise hard-truncated to `max_chars` plus a full stop.
/// Lengths count characters, not bytes.
pub fn normalize(text: &str, min_chars: usize, max_chars: usize) -> Option<String> {
    let mut text = clean(text);
    if text.is_empty() || text.ends_with(&['?', '？'][..]) {
        return None;
    }
    if !text.ends_with(REPLY_ENDS) {
        text.push('。');
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() > max_chars {
        let head = &chars[..=max_chars];
        text = match head.iter().rposition(|c| REPLY_ENDS.contains(c)) {
            Some(idx) if idx + 1 >= min_chars => head[..=idx].iter().collect(),
            _ => {
                let truncated: String = chars[..max_chars].iter().collect();
                let mut truncated = truncated.trim_end().to_string();
                truncated.push('。');
                truncated
            }
        };
    }

    if text.chars().count() < min_chars {
        return None;
    }
    Some(text)
}

/// Clean user-authored text without length policy.
///
/// Returns `None` only for empty input; otherwise the result always ends
/// with sentence punctuation.
pub fn normalize_direct(text: &str) -> Option<String> {
    let mut text = clean(text);
    if text.is_empty() {
        return None;
    }
    if !text.ends_with(SENTENCE_ENDS) {
        text.push('。');
    }
    Some(text)
}

/// Split text into sentence segments, keeping the terminal punctuation.
///
/// Empty input yields no segments; text without any sentence end is a
/// single segment.
pub fn split_sentences(text: &str) -> Vec<String> {
    let collapsed = WHITESPACE.replace_all(text, " ");
    let collapsed = collapsed.trim();
    if collapsed.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut start = 0;
    for (i, c) in collapsed.char_indices() {
        if SENTENCE_ENDS.contains(&c) {
            let end = i + c.len_utf8();
            let segment = collapsed[start..end].trim();
            if !segment.is_empty() {
                segments.push(segment.to_string());
            }
            start = end;
        }
    }

    // Remainder
    let rest = collapsed[start..].trim();
    if !rest.is_empty() {
        segments.push(rest.to_string());
    }

    if segments.is_empty() {
        segments.push(collapsed.to_string());
    }
    segments
}
