//! Recovery parser for model output
//!
//! Models are asked for a single JSON object but routinely wrap it in prose,
//! markdown fences, or emit almost-JSON (bare enum words, trailing commas,
//! single quotes). `parse_json_recovering` tries progressively more lenient
//! strategies and stops at the first one that yields a JSON object:
//!
//! 1. **direct**: the whole text parses as-is
//! 2. **fenced**: the body of the first ```` ``` ```` block parses
//! 3. **repaired**: the span from the first `{` to the last `}` parses after
//!    the repair pass
//!
//! The parser never panics. Callers must check `success` before reading
//! `data`.

use sdk::errors::EngineError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Strategy that produced the parsed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStage {
    Direct,
    Fenced,
    Repaired,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseStage::Direct => f.write_str("direct"),
            ParseStage::Fenced => f.write_str("fenced"),
            ParseStage::Repaired => f.write_str("repaired"),
        }
    }
}

/// Result of a recovery attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseOutcome {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    /// Set on success.
    pub stage: Option<ParseStage>,
}

impl ParseOutcome {
    fn ok(data: Value, stage: ParseStage) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            stage: Some(stage),
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            stage: None,
        }
    }
}

/// Extract one JSON object from free-form model text.
pub fn parse_json_recovering(text: &str) -> ParseOutcome {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ParseOutcome::failed("direct: empty input".to_string());
    }

    let mut failures = Vec::with_capacity(3);

    match parse_object(trimmed) {
        Ok(value) => return ParseOutcome::ok(value, ParseStage::Direct),
        Err(e) => failures.push(format!("direct: {}", e)),
    }

    match extract_fenced_block(trimmed) {
        Some(body) => match parse_object(body.trim()) {
            Ok(value) => return ParseOutcome::ok(value, ParseStage::Fenced),
            Err(e) => failures.push(format!("fenced: {}", e)),
        },
        None => failures.push("fenced: no fenced block".to_string()),
    }

    match brace_span(trimmed) {
        Some(span) => {
            let repaired = repair_json(span);
            match parse_object(&repaired) {
                Ok(value) => return ParseOutcome::ok(value, ParseStage::Repaired),
                Err(e) => failures.push(format!("repaired: {}", e)),
            }
        }
        None => failures.push("repaired: no brace-delimited span".to_string()),
    }

    ParseOutcome::failed(failures.join("; "))
}

/// Recover and deserialize into `T`.
pub fn parse_as<T: DeserializeOwned>(text: &str) -> Result<T, EngineError> {
    let outcome = parse_json_recovering(text);
    match (outcome.data, outcome.stage) {
        (Some(data), Some(stage)) => {
            serde_json::from_value(data).map_err(|e| EngineError::ParseRecovery {
                stage: stage.to_string(),
                message: format!("shape mismatch: {}", e),
            })
        }
        _ => Err(EngineError::ParseRecovery {
            stage: "all".to_string(),
            message: outcome.error.unwrap_or_default(),
        }),
    }
}

fn parse_object(s: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(s) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected object, found {}", json_kind(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Body of the first markdown code fence.
///
/// Tolerates a language tag, a missing newline after the opening fence and
/// trailing prose after the closing fence.
fn extract_fenced_block(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    let tag_len = after_opening
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(after_opening.len());
    let body = &after_opening[tag_len..];

    let closing = body.find("```")?;
    let inner = &body[..closing];
    if inner.trim().is_empty() {
        return None;
    }
    Some(inner)
}

/// Span from the first `{` to the last `}`, inclusive.
fn brace_span(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&content[start..=end])
}

/// Apply the lenient rewrites in order.
pub fn repair_json(span: &str) -> String {
    let cleaned = strip_control_chars(span);
    let quoted = normalize_single_quotes(&cleaned);
    let tokens = quote_bare_tokens(&quoted);
    strip_trailing_commas(&tokens)
}

/// Drop control characters other than `\n`, `\r`, `\t`. Those three are
/// escaped when they appear raw inside a string literal.
fn strip_control_chars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape_next = false;

    for ch in s.chars() {
        if escape_next {
            escape_next = false;
            if !ch.is_control() {
                out.push(ch);
            }
            continue;
        }
        match ch {
            '\\' if in_string => {
                escape_next = true;
                out.push(ch);
            }
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            '\n' | '\r' | '\t' => out.push(ch),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Rewrite `'single'` strings as `"double"` strings.
///
/// A quote opens a string only in value or key position, so apostrophes in
/// bare prose (`don't know`) are left for the bare-token pass. Inside a
/// string, a quote closes it only when a delimiter follows.
fn normalize_single_quotes(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_double = false;
    let mut escape_next = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        i += 1;

        if in_double {
            out.push(ch);
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_double = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_double = true;
                out.push(ch);
            }
            '\'' if opens_string(&out) => {
                out.push('"');
                while i < chars.len() {
                    let inner = chars[i];
                    i += 1;
                    match inner {
                        '\\' => {
                            match chars.get(i) {
                                Some('\'') => out.push('\''),
                                Some(&escaped) => {
                                    out.push('\\');
                                    out.push(escaped);
                                }
                                None => out.push('\\'),
                            }
                            i += 1;
                        }
                        '\'' if closes_string(&chars[i..]) => break,
                        '"' => out.push_str("\\\""),
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            other => out.push(other),
        }
    }
    out
}

fn opens_string(emitted: &str) -> bool {
    matches!(
        emitted.trim_end().chars().last(),
        None | Some('{' | '[' | ',' | ':')
    )
}

fn closes_string(rest: &[char]) -> bool {
    matches!(
        rest.iter().find(|c| !c.is_whitespace()),
        None | Some(',' | '}' | ']' | ':')
    )
}

/// Quote bare words that sit before a delimiter, e.g. `"a": partially,`.
///
/// `true`, `false`, `null` and numeric literals are left alone.
fn quote_bare_tokens(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    let mut in_string = false;
    let mut escape_next = false;

    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            out.push(ch);
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if ch == '"' {
            in_string = true;
            out.push(ch);
            i += 1;
            continue;
        }

        let starts_number = ch.is_ascii_digit()
            || (ch == '-' && matches!(chars.get(i + 1), Some(c) if c.is_ascii_digit()));
        if starts_number {
            let end = scan_number(&chars, i);
            if ends_value(&chars[end..]) {
                out.extend(&chars[i..end]);
                i = end;
            } else {
                // `12 months` and the like
                i = push_bare_token(&chars, i, &mut out);
            }
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            i = push_bare_token(&chars, i, &mut out);
            continue;
        }

        out.push(ch);
        i += 1;
    }
    out
}

/// End index of the JSON number starting at `start`:
/// `-?digits(.digits)?([eE][+-]?digits)?`
fn scan_number(chars: &[char], start: usize) -> usize {
    let digits_from = |mut i: usize| {
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut i = start;
    if chars[i] == '-' {
        i += 1;
    }
    i = digits_from(i);

    if chars.get(i) == Some(&'.') && matches!(chars.get(i + 1), Some(c) if c.is_ascii_digit()) {
        i = digits_from(i + 1);
    }

    if matches!(chars.get(i), Some('e' | 'E')) {
        let mut j = i + 1;
        if matches!(chars.get(j), Some('+' | '-')) {
            j += 1;
        }
        if matches!(chars.get(j), Some(c) if c.is_ascii_digit()) {
            i = digits_from(j);
        }
    }
    i
}

fn is_token_delimiter(ch: char) -> bool {
    matches!(ch, ',' | '}' | ']' | ':' | '\n' | '"')
}

fn ends_value(rest: &[char]) -> bool {
    match rest.iter().find(|c| !matches!(c, ' ' | '\t' | '\r')) {
        None => true,
        Some(&c) => is_token_delimiter(c),
    }
}

/// Emit the token starting at `start`, quoted unless it is a literal.
/// Returns the index of the delimiter that ended it.
fn push_bare_token(chars: &[char], start: usize, out: &mut String) -> usize {
    let mut i = start;
    while i < chars.len() && !is_token_delimiter(chars[i]) {
        i += 1;
    }
    let raw: String = chars[start..i].iter().collect();
    let token = raw.trim_end();
    let trailing = &raw[token.len()..];

    if is_json_literal(token) {
        out.push_str(token);
    } else {
        out.push('"');
        out.push_str(&token.replace('"', "\\\""));
        out.push('"');
    }
    out.push_str(trailing);
    i
}

fn is_json_literal(token: &str) -> bool {
    matches!(token, "true" | "false" | "null") || token.parse::<f64>().is_ok()
}

/// Remove commas that directly precede `}` or `]`.
fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(ch);
                }
            }
            other => out.push(other),
        }
    }
    out
}
