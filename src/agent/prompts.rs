use super::signature::Signature;

const PROTOCOL: &str = r#"### How to respond
Each reply must do exactly one of the following.

1. Call a tool by writing a fenced block tagged `tool`:
```tool
{"name": "<tool name>", "arguments": {"<arg>": "<value>"}}
```
You will receive the tool output in the next message. Call one tool per reply.

2. Give your final answer as a single JSON object with every output field, wrapped in FINAL(...):
FINAL({"ic50_pred": 1.5, "confidence": 40, "explanation": "..."})

Never invent tool outputs. A tool that returns "not_found" has no measurement for that pair."#;

const NO_TOOLS: &str = "No tools are available for this task. Answer directly with FINAL(...).";

/// System message: signature, response protocol and the tool manifest.
pub fn system_prompt(signature: &Signature, manifest: &str) -> String {
    let tools = if manifest.trim().is_empty() {
        NO_TOOLS.to_string()
    } else {
        format!("### Available tools\n{manifest}")
    };
    format!("{}\n{}\n\n{}", signature.render(), PROTOCOL, tools)
}

pub fn nudge(reason: Option<&str>) -> String {
    let base = "Your reply contained neither a ```tool block nor FINAL({...}). \
                Call a tool or give your final JSON answer wrapped in FINAL(...).";
    match reason {
        Some(reason) => format!("{reason}. {base}"),
        None => base.to_string(),
    }
}

pub fn correction(problems: &str, fields: &[&str]) -> String {
    format!(
        "Your final answer was rejected: {problems}. Reply again with FINAL({{...}}) \
         containing a JSON object with the fields {}.",
        fields.join(", ")
    )
}

pub fn tool_output(name: &str, output: &str) -> String {
    format!("[Tool output: {name}]\n{output}")
}

pub fn tool_error(name: &str, error: &str) -> String {
    format!("[Tool error: {name}]\n{error}")
}

pub const EXTRACT: &str = "You have run out of turns. Based on everything above, give your \
final answer now as FINAL({...}) with every output field. Do not call any more tools.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::signature::PREDICT_IC50_DRUG_CELL;

    #[test]
    fn toolless_prompt_says_so() {
        let prompt = system_prompt(&PREDICT_IC50_DRUG_CELL, "");
        assert!(prompt.contains(NO_TOOLS));
        assert!(prompt.starts_with(PREDICT_IC50_DRUG_CELL.instruction));
    }

    #[test]
    fn manifest_is_included() {
        let prompt = system_prompt(&PREDICT_IC50_DRUG_CELL, "- prism_ic50: lookup\n");
        assert!(prompt.contains("### Available tools\n- prism_ic50: lookup"));
    }
}
