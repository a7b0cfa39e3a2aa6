//! Content sanitizer
//!
//! Turns rich text (comments, prompts, code, CLI commands) into XML text
//! content. Code-like snippets are carried inside CDATA sections so their
//! bytes survive untouched; the surrounding prose is entity-escaped.
//!
//! Loading needs no counterpart: the XML reader returns CDATA content verbatim.

use regex::{Captures, Regex};
use std::sync::OnceLock;
use thiserror::Error;

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

/// Maximum passes over nested JSON-like braces
const MAX_BRACE_PASSES: usize = 16;

/// How a field is scanned before escaping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text that may embed code: comment, taskPromptForLlm
    Prose,
    /// The whole field is literal payload: code content, cliCommand
    Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    /// XML 1.0 cannot carry this character in any form
    #[error("character U+{:04X} cannot be represented in XML", code_point(.0))]
    InvalidCharacter(char),
}

fn code_point(c: &char) -> u32 {
    *c as u32
}

/// One piece of sanitized output
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Payload(String),
}

fn fenced_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("valid fenced code regex"))
}

fn inline_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`[^`\n]+`").expect("valid inline code regex"))
}

fn cli_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*[$>][^\n]*$").expect("valid cli line regex"))
}

fn tag_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?[A-Za-z!?][^<>]*>").expect("valid tag regex"))
}

fn json_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^{}]*\}").expect("valid json regex"))
}

fn ampersand_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(?:(amp|lt|gt|quot|apos|#[0-9]+|#x[0-9a-fA-F]+);)?")
            .expect("valid entity regex")
    })
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("\u{E000}([0-9]+)\u{E001}").expect("valid placeholder regex"))
}

/// Characters XML 1.0 allows anywhere in a document
fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

fn check_chars(text: &str) -> Result<(), SanitizeError> {
    match text.chars().find(|c| !is_xml_char(*c)) {
        Some(c) => Err(SanitizeError::InvalidCharacter(c)),
        None => Ok(()),
    }
}

fn has_metachar(text: &str) -> bool {
    text.contains(['&', '<', '>', '"', '\'', '{', '}'])
}

/// Escape the five XML metacharacters, leaving existing entities alone
pub fn escape_text(text: &str) -> String {
    let amp_escaped = ampersand_re().replace_all(text, |caps: &Captures| {
        if caps.get(1).is_some() {
            caps[0].to_string()
        } else {
            "&amp;".to_string()
        }
    });
    amp_escaped
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Escape an attribute value losslessly
///
/// Unlike [`escape_text`], every `&` is escaped and line breaks become
/// character references so attribute normalization cannot alter them.
pub fn escape_attribute(value: &str) -> Result<String, SanitizeError> {
    check_chars(value)?;
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Wrap a payload in CDATA, splitting any `]]>` it contains across sections
pub fn wrap_cdata(payload: &str) -> String {
    format!(
        "<![CDATA[{}]]>",
        payload.replace("]]>", "]]]]><![CDATA[>")
    )
}

/// Sanitize a field for embedding as XML element content
pub fn sanitize_field(text: &str, kind: FieldKind) -> Result<String, SanitizeError> {
    check_chars(text)?;

    let segments = match kind {
        // Text that already carries placeholder delimiters cannot be scanned safely
        FieldKind::Prose if !text.contains([PLACEHOLDER_OPEN, PLACEHOLDER_CLOSE]) => {
            let mut segments = scan_prose(text);
            protect_boundaries(&mut segments);
            segments
        }
        _ => vec![classify_snippet(text.to_string())],
    };

    Ok(render(merge_payloads(segments)))
}

fn classify_snippet(snippet: String) -> Segment {
    if has_metachar(&snippet) {
        Segment::Payload(snippet)
    } else {
        Segment::Text(snippet)
    }
}

/// Replace protected snippets with placeholders, then split into segments
fn scan_prose(text: &str) -> Vec<Segment> {
    let mut snippets: Vec<String> = Vec::new();
    let mut protected = text.to_string();

    for re in [fenced_code_re(), inline_code_re(), cli_line_re(), tag_like_re()] {
        protected = protect(re, &protected, &mut snippets);
    }
    for _ in 0..MAX_BRACE_PASSES {
        if !json_like_re().is_match(&protected) {
            break;
        }
        protected = protect(json_like_re(), &protected, &mut snippets);
    }

    let mut segments = Vec::new();
    let mut last = 0;
    for caps in placeholder_re().captures_iter(&protected) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        if whole.start > last {
            segments.push(Segment::Text(protected[last..whole.start].to_string()));
        }
        let index: usize = caps[1].parse().unwrap_or(usize::MAX);
        match snippets.get(index) {
            Some(snippet) => segments.push(classify_snippet(snippet.clone())),
            None => segments.push(Segment::Text(caps[0].to_string())),
        }
        last = whole.end;
    }
    if last < protected.len() {
        segments.push(Segment::Text(protected[last..].to_string()));
    }

    // Plain text segments are escaped here; snippet text without metacharacters
    // escapes to itself so it can share the same path.
    segments
        .into_iter()
        .map(|seg| match seg {
            Segment::Text(t) => Segment::Text(escape_text(&t)),
            payload => payload,
        })
        .collect()
}

fn protect(re: &Regex, text: &str, snippets: &mut Vec<String>) -> String {
    re.replace_all(text, |caps: &Captures| {
        let original = expand(&caps[0], snippets);
        snippets.push(original);
        format!("{}{}{}", PLACEHOLDER_OPEN, snippets.len() - 1, PLACEHOLDER_CLOSE)
    })
    .into_owned()
}

/// Resolve placeholders nested inside a later match
fn expand(text: &str, snippets: &[String]) -> String {
    placeholder_re()
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| snippets.get(i).cloned())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Adjacent payloads become one CDATA run instead of back-to-back sections
fn merge_payloads(segments: Vec<Segment>) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match (merged.last_mut(), seg) {
            (Some(Segment::Payload(prev)), Segment::Payload(next)) => prev.push_str(&next),
            (Some(Segment::Text(prev)), Segment::Text(next)) => prev.push_str(&next),
            (_, seg) => merged.push(seg),
        }
    }
    merged
}

/// Move whitespace at the outer edges into CDATA
///
/// The loader trims outer text of prose fields but never CDATA, so edge
/// whitespace kept as text would be lost on the next load.
fn protect_boundaries(segments: &mut Vec<Segment>) {
    let lead = match segments.first_mut() {
        Some(Segment::Text(first)) => {
            let n = first.len() - first.trim_start().len();
            first.drain(..n).collect::<String>()
        }
        _ => String::new(),
    };
    if !lead.is_empty() {
        segments.insert(0, Segment::Payload(lead));
    }

    let tail = match segments.last_mut() {
        Some(Segment::Text(last)) => {
            let n = last.trim_end().len();
            last.split_off(n)
        }
        _ => String::new(),
    };
    if !tail.is_empty() {
        segments.push(Segment::Payload(tail));
    }
    segments.retain(|seg| !matches!(seg, Segment::Text(t) if t.is_empty()));
}

fn render(segments: Vec<Segment>) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            Segment::Text(t) => out.push_str(&t),
            Segment::Payload(p) => out.push_str(&wrap_cdata(&p)),
        }
    }
    out
}
