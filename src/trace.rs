use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::agent::{Prediction, Step};
use crate::error::Result;
use crate::metrics::{absolute_errors, fold_errors, geometric_mean, EPS};

/// One dispatched task with the agent's answer and the ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceUnit {
    pub drug: String,
    pub cell_line: String,
    pub experimental_description: Option<String>,
    pub output_unit: String,
    pub ic50_true: f64,
    pub ic50_pred: Option<f64>,
    pub confidence: Option<u8>,
    pub explanation: Option<String>,
    pub trajectory: Option<Vec<Step>>,
    /// Set when the agent failed to produce a usable answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceUnit {
    pub fn new(
        drug: impl Into<String>,
        cell_line: impl Into<String>,
        experimental_description: Option<String>,
        output_unit: impl Into<String>,
        ic50_true: f64,
    ) -> Self {
        Self {
            drug: drug.into(),
            cell_line: cell_line.into(),
            experimental_description,
            output_unit: output_unit.into(),
            ic50_true,
            ic50_pred: None,
            confidence: None,
            explanation: None,
            trajectory: None,
            error: None,
        }
    }

    pub fn record_prediction(&mut self, prediction: Prediction) {
        self.ic50_pred = Some(prediction.ic50_pred);
        self.confidence = Some(prediction.confidence);
        self.explanation = Some(prediction.explanation);
        self.trajectory = Some(prediction.trajectory);
    }
}

/// Append `record` as one JSON line, creating parent directories.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Read every non-empty line of a JSONL file.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = std::fs::File::open(path)?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

/// Error summary over every answered unit of a trace.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSummary {
    pub predictions: usize,
    pub failures: usize,
    pub geometric_mean_fold_error: Option<f64>,
    pub mean_absolute_error: Option<f64>,
}

impl TraceSummary {
    pub fn from_units(units: &[TraceUnit]) -> Result<Self> {
        let (truth, preds): (Vec<f64>, Vec<f64>) = units
            .iter()
            .filter_map(|u| u.ic50_pred.map(|pred| (u.ic50_true, pred)))
            .unzip();
        let folds = fold_errors(&truth, &preds, EPS)?;
        let abs = absolute_errors(&truth, &preds)?;
        let mean_absolute_error = (!abs.is_empty()).then(|| abs.iter().sum::<f64>() / abs.len() as f64);
        Ok(Self {
            predictions: preds.len(),
            failures: units.len() - preds.len(),
            geometric_mean_fold_error: geometric_mean(&folds),
            mean_absolute_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_one_object_per_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log/demo/run.jsonl");

        let mut unit = TraceUnit::new("erlotinib", "A549_LUNG", None, "uM", 3.2);
        append_jsonl(&path, &unit).unwrap();
        unit.record_prediction(Prediction {
            ic50_pred: 1.0,
            confidence: 40,
            explanation: "guess".into(),
            iterations: 1,
            trajectory: vec![],
        });
        append_jsonl(&path, &unit).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);

        let units: Vec<TraceUnit> = read_jsonl(&path).unwrap();
        assert_eq!(units[0].ic50_pred, None);
        assert_eq!(units[1].ic50_pred, Some(1.0));
        assert_eq!(units[1].confidence, Some(40));
        assert!(!text.contains("\"error\""));
    }

    #[test]
    fn summary_skips_failed_units() {
        let mut answered = TraceUnit::new("d1", "c1", None, "uM", 2.0);
        answered.ic50_pred = Some(8.0);
        let mut exact = TraceUnit::new("d2", "c1", None, "uM", 1.0);
        exact.ic50_pred = Some(1.0);
        let mut failed = TraceUnit::new("d3", "c1", None, "uM", 1.0);
        failed.error = Some("no usable answer".into());

        let summary = TraceSummary::from_units(&[answered, exact, failed]).unwrap();
        assert_eq!(summary.predictions, 2);
        assert_eq!(summary.failures, 1);
        assert!((summary.geometric_mean_fold_error.unwrap() - 2.0).abs() < 1e-6);
        assert!((summary.mean_absolute_error.unwrap() - 3.0).abs() < 1e-9);

        let empty = TraceSummary::from_units(&[]).unwrap();
        assert_eq!(empty.geometric_mean_fold_error, None);
        assert_eq!(empty.mean_absolute_error, None);
    }
}
