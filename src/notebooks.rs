use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::Result;

const CHECKPOINTS: &str = ".ipynb_checkpoints";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Source {
    Lines(Vec<String>),
    Text(String),
}

impl Source {
    fn text(&self) -> String {
        match self {
            Source::Lines(lines) => lines.concat(),
            Source::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Cell {
    cell_type: String,
    source: Source,
    #[serde(default)]
    execution_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Notebook {
    cells: Vec<Cell>,
}

/// Render notebook JSON as a Python script.
pub fn notebook_to_script(json: &str) -> Result<String> {
    let notebook: Notebook = serde_json::from_str(json)?;
    let mut out = String::from("#!/usr/bin/env python\n# coding: utf-8\n\n");

    for cell in &notebook.cells {
        let text = cell.source.text();
        let text = text.trim_end();
        match cell.cell_type.as_str() {
            "code" => {
                let count = cell
                    .execution_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| " ".to_string());
                let _ = write!(out, "# In[{count}]:\n\n\n{text}\n\n\n");
            }
            "markdown" => {
                for line in text.lines() {
                    if line.trim().is_empty() {
                        out.push_str("#\n");
                    } else {
                        let _ = writeln!(out, "# {line}");
                    }
                }
                out.push_str("\n\n");
            }
            _ => {}
        }
    }

    Ok(format!("{}\n", out.trim_end()))
}

#[derive(Debug, Default)]
pub struct ConvertReport {
    pub converted: Vec<PathBuf>,
    pub skipped: usize,
}

fn is_up_to_date(notebook: &Path, script: &Path) -> bool {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(notebook), modified(script)) {
        (Some(nb), Some(py)) => py >= nb,
        _ => false,
    }
}

/// Mirror every notebook under `src` as a `.py` file under `dst`.
pub fn convert_tree(src: &Path, dst: &Path, force: bool) -> Result<ConvertReport> {
    let mut report = ConvertReport::default();
    let walker = WalkDir::new(src)
        .into_iter()
        .filter_entry(|e| e.file_name() != CHECKPOINTS);

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("ipynb") {
            continue;
        }

        let relative = path.strip_prefix(src).unwrap_or(path);
        let target = dst.join(relative).with_extension("py");
        if !force && is_up_to_date(path, &target) {
            debug!(notebook = %path.display(), "script up to date, skipping");
            report.skipped += 1;
            continue;
        }

        let script = notebook_to_script(&std::fs::read_to_string(path)?)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, script)?;
        debug!(notebook = %path.display(), script = %target.display(), "converted");
        report.converted.push(target);
    }

    info!(
        converted = report.converted.len(),
        skipped = report.skipped,
        "notebook conversion finished"
    );
    Ok(report)
}
