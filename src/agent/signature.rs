use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    OptionalStr,
    Float,
    Int,
}

impl FieldKind {
    fn hint(self) -> &'static str {
        match self {
            FieldKind::Str => "string",
            FieldKind::OptionalStr => "string or null",
            FieldKind::Float => "float",
            FieldKind::Int => "integer",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub desc: &'static str,
    pub kind: FieldKind,
}

/// Static input/output contract handed to the model.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub name: &'static str,
    pub instruction: &'static str,
    pub inputs: &'static [Field],
    pub outputs: &'static [Field],
}

pub const PREDICT_IC50_DRUG_CELL: Signature = Signature {
    name: "PredictIC50DrugCell",
    instruction: "You are an expert pharmacologist and medicinal chemist, tasked with \
predicting the cell viability IC50 value for a given drug against a specific cell line.

You are given a single drug name that uniquely identifies the drug, a single cell line \
name that uniquely identifies the cell line, and optionally an experimental description \
that provides additional context about the assay.

If tools are available, you may use them to look up more information about the drug, \
its target, or earlier screening results. To acquire such information you MUST \
explicitly call these tools.",
    inputs: &[
        Field {
            name: "drug",
            desc: "The drug name or identifier for which you will predict the IC50",
            kind: FieldKind::Str,
        },
        Field {
            name: "cell_line",
            desc: "The cell line name or identifier against which you will predict the IC50",
            kind: FieldKind::Str,
        },
        Field {
            name: "experimental_description",
            desc: "Optional description of experimental details that may be relevant for \
predicting the IC50, or null if not available",
            kind: FieldKind::OptionalStr,
        },
        Field {
            name: "output_unit",
            desc: "The unit required for the predicted IC50 value",
            kind: FieldKind::Str,
        },
    ],
    outputs: &[
        Field {
            name: "ic50_pred",
            desc: "Your predicted IC50 value in the requested unit, a float strictly greater than 0",
            kind: FieldKind::Float,
        },
        Field {
            name: "confidence",
            desc: "Your confidence in the IC50 prediction, an integer from 0 to 100",
            kind: FieldKind::Int,
        },
        Field {
            name: "explanation",
            desc: "A detailed explanation of how you arrived at your IC50 prediction",
            kind: FieldKind::Str,
        },
    ],
};

impl Signature {
    /// Instruction text followed by the field listings.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}\n", self.instruction);
        let _ = writeln!(out, "Input fields:");
        for field in self.inputs {
            let _ = writeln!(out, "- {} ({}): {}", field.name, field.kind.hint(), field.desc);
        }
        let _ = writeln!(out, "\nOutput fields:");
        for field in self.outputs {
            let _ = writeln!(out, "- {} ({}): {}", field.name, field.kind.hint(), field.desc);
        }
        out
    }

    pub fn output_names(&self) -> Vec<&'static str> {
        self.outputs.iter().map(|f| f.name).collect()
    }
}

/// Inputs of one IC50 prediction task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ic50Task {
    pub drug: String,
    pub cell_line: String,
    pub experimental_description: Option<String>,
    pub output_unit: String,
}

impl Ic50Task {
    pub fn render(&self) -> String {
        format!(
            "drug: {}\ncell_line: {}\nexperimental_description: {}\noutput_unit: {}",
            self.drug,
            self.cell_line,
            self.experimental_description.as_deref().unwrap_or("null"),
            self.output_unit
        )
    }
}

/// Validated outputs of [`PREDICT_IC50_DRUG_CELL`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ic50Answer {
    pub ic50_pred: f64,
    pub confidence: u8,
    pub explanation: String,
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Ic50Answer {
    /// Check a model answer against the output contract. On failure the
    /// error lists every problem, phrased for the model.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let mut problems = Vec::new();
        let Some(obj) = value.as_object() else {
            return Err("the answer must be a JSON object".to_string());
        };

        let ic50_pred = match obj.get("ic50_pred").and_then(number) {
            Some(v) if v.is_finite() && v > 0.0 => v,
            Some(v) => {
                problems.push(format!("`ic50_pred` must be strictly greater than 0, got {v}"));
                0.0
            }
            None => {
                problems.push("`ic50_pred` is missing or not a number".to_string());
                0.0
            }
        };

        let confidence = match obj.get("confidence").and_then(number) {
            Some(v) if v.fract() == 0.0 && (0.0..=100.0).contains(&v) => v as u8,
            Some(v) => {
                problems.push(format!("`confidence` must be an integer from 0 to 100, got {v}"));
                0
            }
            None => {
                problems.push("`confidence` is missing or not a number".to_string());
                0
            }
        };

        let explanation = match obj.get("explanation").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => {
                problems.push("`explanation` must be a non-empty string".to_string());
                String::new()
            }
        };

        if problems.is_empty() {
            Ok(Self {
                ic50_pred,
                confidence,
                explanation,
            })
        } else {
            Err(problems.join("; "))
        }
    }
}
