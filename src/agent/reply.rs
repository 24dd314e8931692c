use crate::tools::ToolCall;

/// Parsed model turn.
#[derive(Debug, PartialEq)]
pub enum Reply {
    /// A ```tool block naming a registered tool.
    ToolCall(ToolCall),
    /// Body of `FINAL(...)`, expected to be a JSON object.
    Final(String),
    /// Neither form was found, or the tool block did not parse.
    Invalid(Option<String>),
}

impl Reply {
    pub fn parse(input: &str) -> Self {
        if let Some(answer) = extract_final(input) {
            return Reply::Final(answer);
        }

        match extract_tool_block(input) {
            Some(block) => match serde_json::from_str::<ToolCall>(block) {
                Ok(call) if !call.name.trim().is_empty() => Reply::ToolCall(call),
                Ok(_) => Reply::Invalid(Some("tool call has an empty `name`".to_string())),
                Err(e) => Reply::Invalid(Some(format!("tool block is not valid JSON: {e}"))),
            },
            None => Reply::Invalid(None),
        }
    }
}

/// Body of FINAL(...) by paren counting, ignoring parens inside JSON strings.
fn extract_final(input: &str) -> Option<String> {
    let idx = input.find("FINAL(")?;
    let after = &input[idx + 6..];
    let mut depth = 1i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut end = None;

    for (i, ch) in after.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }

    let content = match end {
        Some(e) => &after[..e],
        None => after,
    };
    let content = strip_fence(content.trim());
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

/// Models sometimes wrap the FINAL payload in a ```json fence.
fn strip_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let body = rest.find('\n').map(|i| &rest[i + 1..]).unwrap_or("");
    body.trim_end().trim_end_matches("```").trim()
}

/// Content of the first ```tool (or ```json) fence.
fn extract_tool_block(input: &str) -> Option<&str> {
    let patterns = ["```tool", "```json"];
    let (start_idx, pat_len) = patterns
        .iter()
        .filter_map(|pat| input.find(pat).map(|idx| (idx, pat.len())))
        .min_by_key(|(idx, _)| *idx)?;
    let after_tag = &input[start_idx + pat_len..];

    let body_start = after_tag.find('\n').map(|i| i + 1).unwrap_or(0);
    let region = &after_tag[body_start..];
    let end = region.find("```").unwrap_or(region.len());
    let body = region[..end].trim();

    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}
