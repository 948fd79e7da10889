//! JSON extraction from LLM responses.
//!
//! LLM responses may wrap their JSON payload in markdown code fences or
//! surround it with explanatory prose. The extraction tries, in order:
//!
//! 1. Direct JSON (content starts with '{' or '[')
//! 2. JSON inside a ```json code fence
//! 3. JSON inside a generic ``` code fence
//! 4. The first balanced JSON object or array anywhere in the content

use thiserror::Error;

/// Error type for JSON extraction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },

    #[error("JSON appears truncated: {unclosed} unclosed delimiters")]
    Truncated { unclosed: usize },
}

/// Extracts a JSON object or array from mixed LLM output.
pub fn extract_json_from_response(content: &str) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();

    // Strategy 1: response is already bare JSON
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Some(json) = balanced_json(trimmed) {
            return Ok(json);
        }
    }

    // Strategy 2 and 3: fenced code blocks
    for fence in ["```json", "```"] {
        if let Some(json) = extract_from_fence(trimmed, fence) {
            return Ok(json);
        }
    }

    // Strategy 4: first balanced object/array anywhere in the content
    if let Some(start) = trimmed.find(['{', '[']) {
        if let Some(json) = balanced_json(&trimmed[start..]) {
            return Ok(json);
        }
        // A delimiter opened but never closed: likely a truncated response
        let unclosed = count_unclosed(&trimmed[start..]);
        if unclosed > 0 {
            return Err(JsonExtractionError::Truncated { unclosed });
        }
    }

    let preview_len = trimmed.len().min(60);
    Err(JsonExtractionError::NotFound {
        content_preview: trimmed[..preview_len].to_string(),
    })
}

/// Returns the content of the first fenced block that parses as JSON.
fn extract_from_fence(content: &str, fence: &str) -> Option<String> {
    let start = content.find(fence)? + fence.len();
    let rest = &content[start..];
    let end = rest.find("```")?;
    let candidate = rest[..end].trim();
    balanced_json(candidate)
}

/// Returns the leading balanced JSON value of `content`, if any.
///
/// Tracks string/escape state so braces inside string literals do not
/// confuse the depth counter.
fn balanced_json(content: &str) -> Option<String> {
    let mut chars = content.char_indices();
    let (_, open) = chars.next()?;
    let close = match open {
        '{' => '}',
        '[' => ']',
        _ => return None,
    };

    let mut depth = 1usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in chars {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[..=i].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

/// Counts unclosed braces and brackets outside of string literals.
fn count_unclosed(content: &str) -> usize {
    let mut depth = 0isize;
    let mut in_string = false;
    let mut escaped = false;

    for c in content.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
    }

    depth.max(0) as usize
}
