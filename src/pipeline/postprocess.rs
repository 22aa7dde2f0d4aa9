//! Text post-processor: grammar clean-up for retrieved answers and
//! style/safety clean-up for generated replies.
//!
//! Both entry points are pure: no I/O, no state beyond compiled patterns.

use regex::Regex;

use crate::config::PostProcessConfig;
use crate::error::PostProcessError;
use crate::pipeline::types::{PostProcessor, RetrievedAnswer};

/// Model control tokens that occasionally leak into generated text.
const CONTROL_TOKEN_PATTERN: &str =
    r"(?i)</?s>|<pad>|<unk>|<mask>|<\|endoftext\|>|\[(?:SEP|CLS|PAD|UNK|MASK)\]";

/// A protected term and the pattern that finds it in any casing.
struct SpecialToken {
    canonical: String,
    pattern: Regex,
}

/// Regex-based implementation of `PostProcessor`.
pub struct TextPostProcessor {
    special_tokens: Vec<SpecialToken>,
    control_tokens: Regex,
    handles: Regex,
    space_before_punct: Regex,
    max_reply_chars: usize,
    mention_recipient: bool,
}

impl TextPostProcessor {
    pub fn new(config: &PostProcessConfig) -> Result<Self, PostProcessError> {
        let compile =
            |pattern: &str| Regex::new(pattern).map_err(|e| PostProcessError::Failed(e.to_string()));

        // First spelling wins when the list repeats a term in another casing.
        let mut special_tokens: Vec<SpecialToken> = Vec::new();
        for token in &config.special_tokens {
            let token = token.trim();
            if token.is_empty()
                || special_tokens
                    .iter()
                    .any(|t| t.canonical.to_lowercase() == token.to_lowercase())
            {
                continue;
            }
            special_tokens.push(SpecialToken {
                canonical: token.to_string(),
                pattern: compile(&format!(r"(?i)\b{}\b", regex::escape(token)))?,
            });
        }

        Ok(Self {
            special_tokens,
            control_tokens: compile(CONTROL_TOKEN_PATTERN)?,
            handles: compile(r"@\w+")?,
            // `:` and `;` only as punctuation, so ":)" and ";)" keep their space.
            space_before_punct: compile(r"\s+([,.!?]|[;:](?:\s|$))")?,
            max_reply_chars: config.max_reply_chars,
            mention_recipient: config.mention_recipient,
        })
    }

    /// Shared clean-up used by both entry points.
    fn tidy(&self, text: &str) -> String {
        let collapsed = collapse_whitespace(text);
        let spaced = self.space_before_punct.replace_all(&collapsed, "$1");
        let deduped = drop_repeated_words(&spaced);
        let capitalized = capitalize_sentences(&deduped);
        self.restore_special_tokens(&capitalized)
    }

    fn restore_special_tokens(&self, text: &str) -> String {
        let mut out = text.to_string();
        for token in &self.special_tokens {
            out = token
                .pattern
                .replace_all(&out, regex::NoExpand(&token.canonical))
                .into_owned();
        }
        out
    }
}

impl PostProcessor for TextPostProcessor {
    fn correct_grammar(&self, answer: &RetrievedAnswer) -> Result<String, PostProcessError> {
        let text = self.tidy(&answer.reply);
        if text.is_empty() {
            return Err(PostProcessError::EmptyOutput);
        }
        Ok(truncate_reply(&text, self.max_reply_chars))
    }

    fn postprocess(&self, generated: &str, recipient: &str) -> Result<String, PostProcessError> {
        let stripped = self.control_tokens.replace_all(generated, " ");
        let stripped = self.handles.replace_all(&stripped, " ");
        let tidied = self.tidy(&stripped);
        let body = drop_repeated_sentences(&tidied);
        if body.is_empty() {
            return Err(PostProcessError::EmptyOutput);
        }

        let prefix = if self.mention_recipient && !recipient.is_empty() {
            format!("@{} ", recipient.trim_start_matches('@'))
        } else {
            String::new()
        };
        let budget = self.max_reply_chars.saturating_sub(prefix.chars().count());
        let body = truncate_reply(&body, budget);
        if body.is_empty() {
            return Err(PostProcessError::EmptyOutput);
        }
        Ok(format!("{prefix}{body}"))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop a word that repeats the previous one ("the the" -> "the").
fn drop_repeated_words(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for word in text.split(' ') {
        if let Some(prev) = out.last()
            && word.chars().all(char::is_alphabetic)
            && prev.to_lowercase() == word.to_lowercase()
        {
            continue;
        }
        out.push(word);
    }
    out.join(" ")
}

/// Upper-case the first ASCII letter of each sentence.
fn capitalize_sentences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_start = true;
    for c in text.chars() {
        if at_start && c.is_alphabetic() {
            out.push(c.to_ascii_uppercase());
            at_start = false;
            continue;
        }
        if matches!(c, '.' | '!' | '?') {
            at_start = true;
        } else if !c.is_whitespace() && !c.is_ascii_punctuation() {
            at_start = false;
        }
        out.push(c);
    }
    out
}

/// Split after `.`, `!` or `?` when followed by whitespace or the end.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_none_or(|n| n.is_whitespace()) {
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

fn drop_repeated_sentences(text: &str) -> String {
    let mut seen: Vec<String> = Vec::new();
    let mut kept: Vec<String> = Vec::new();
    for sentence in split_sentences(text) {
        let key = sentence.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        kept.push(sentence);
    }
    kept.join(" ")
}

/// Cut `text` to at most `max_chars` characters, preferring the end of a
/// sentence, then a word boundary.
fn truncate_reply(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..cut];

    if let Some(end) = head.rfind(['.', '!', '?'])
        && end > 0
    {
        return head[..=end].trim().to_string();
    }
    if let Some(space) = head.rfind(' ') {
        return head[..space].trim().to_string();
    }
    head.trim().to_string()
}
