use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::{str_arg, Tool};
use crate::error::Result;
use crate::prism::{Ic50Record, PrismLookup, ScreenHistory};

pub const PRISM_IC50: &str = "prism_ic50";
pub const SCREEN_HISTORY: &str = "screen_history";

fn found(record: &Ic50Record) -> Value {
    json!({
        "status": "found",
        "drug": record.drug,
        "cell_line": record.cell_line,
        "ic50": record.ic50,
        "r2": record.r2,
        "screen_id": record.screen_id.as_ref().map(|s| s.as_str()),
    })
}

fn not_found(drug: &str, cell: &str) -> Value {
    json!({
        "status": "not_found",
        "drug": drug,
        "cell_line": cell,
    })
}

/// IC50 lookup against a cleaned PRISM table.
pub struct PrismIc50Tool {
    lookup: Arc<PrismLookup>,
}

impl PrismIc50Tool {
    pub fn new(lookup: Arc<PrismLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl Tool for PrismIc50Tool {
    fn name(&self) -> &str {
        PRISM_IC50
    }

    fn description(&self) -> &str {
        "Look up the measured PRISM IC50 (uM) for one drug against one cell line."
    }

    fn parameters(&self) -> &[(&'static str, &'static str)] {
        &[
            ("drug", "drug name, as given in the task"),
            ("cell_line", "CCLE cell line name"),
        ]
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let drug = str_arg(PRISM_IC50, args, "drug")?;
        let cell = str_arg(PRISM_IC50, args, "cell_line")?;
        Ok(match self.lookup.get_record(drug, cell) {
            Some(record) => found(record),
            None => not_found(drug, cell),
        })
    }
}

/// Lookup restricted to results already revealed to the agent.
///
/// Backed by shared, growing state, so it must not be routed through a cache.
pub struct ScreenHistoryTool {
    history: Arc<RwLock<ScreenHistory>>,
}

impl ScreenHistoryTool {
    pub fn new(history: Arc<RwLock<ScreenHistory>>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl Tool for ScreenHistoryTool {
    fn name(&self) -> &str {
        SCREEN_HISTORY
    }

    fn description(&self) -> &str {
        "Query IC50 results revealed earlier in this run. Omit cell_line to list every \
         revealed measurement for the drug."
    }

    fn parameters(&self) -> &[(&'static str, &'static str)] {
        &[
            ("drug", "drug name"),
            ("cell_line", "optional CCLE cell line name"),
        ]
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let drug = str_arg(SCREEN_HISTORY, args, "drug")?;
        let history = self.history.read().await;

        if let Ok(cell) = str_arg(SCREEN_HISTORY, args, "cell_line") {
            return Ok(match history.get_record(drug, cell) {
                Some(record) => found(record),
                None => not_found(drug, cell),
            });
        }

        let measurements: Vec<Value> = history
            .for_drug(drug)
            .into_iter()
            .map(|r| json!({"cell_line": r.cell_line, "ic50": r.ic50}))
            .collect();
        Ok(if measurements.is_empty() {
            json!({"status": "not_found", "drug": drug})
        } else {
            json!({"status": "found", "drug": drug, "measurements": measurements})
        })
    }
}
