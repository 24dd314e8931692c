//! Cleaning of the raw PRISM secondary screen.
//!
//! The secondary screen ships two overlapping batches, HTS002 and MTS010.
//! Each batch is first deduplicated on (smiles, depmap_id, ccle_name) by best
//! curve fit, then the batches are merged with MTS010 taking precedence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::types::{is_missing, parse_float, ScreenId};
use crate::error::{PrismError, Result};

pub const DEDUP_SEED: u64 = 42;
const COMBO_KEYS: [&str; 3] = ["smiles", "depmap_id", "ccle_name"];
const TISSUE_COL: &str = "primary_tissue";

/// A CSV table held as raw strings so unknown columns pass through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for row in reader.records() {
            rows.push(row?.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.to_writer(file)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn require(&self, name: &str, table: &str) -> Result<usize> {
        self.column(name)
            .ok_or_else(|| PrismError::MissingColumn(name.to_string(), table.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Row counts at each stage of cleaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrangleReport {
    pub input_rows: usize,
    pub after_qc: usize,
    pub mts010_rows: usize,
    pub mts010_kept: usize,
    pub hts002_rows: usize,
    pub hts002_kept: usize,
    pub output_rows: usize,
}

type ComboKey = (String, String, String);

struct Columns {
    screen: usize,
    combo: [usize; 3],
    ic50: usize,
    name: usize,
    r2: Option<usize>,
    convergence: Option<usize>,
}

/// Deduplicate and merge the dose-response table, attaching primary tissue
/// from the cell line table.
pub fn clean_screens(dose_response: &Table, cell_line_info: &Table) -> Result<(Table, WrangleReport)> {
    let table = "dose response table";
    let cols = Columns {
        screen: dose_response.require("screen_id", table)?,
        combo: [
            dose_response.require(COMBO_KEYS[0], table)?,
            dose_response.require(COMBO_KEYS[1], table)?,
            dose_response.require(COMBO_KEYS[2], table)?,
        ],
        ic50: dose_response.require("ic50", table)?,
        name: dose_response.require("name", table)?,
        r2: dose_response.column("r2"),
        convergence: dose_response.column("convergence"),
    };

    let mut report = WrangleReport {
        input_rows: dose_response.len(),
        ..Default::default()
    };

    let mut mts = Vec::new();
    let mut hts = Vec::new();
    for row in &dose_response.rows {
        let Some(screen) = row.get(cols.screen).map(|s| ScreenId::parse(s)) else {
            continue;
        };
        if !matches!(screen, ScreenId::Mts010 | ScreenId::Hts002) {
            continue;
        }
        let has_keys = cols
            .combo
            .iter()
            .chain(std::iter::once(&cols.ic50))
            .all(|&i| row.get(i).is_some_and(|v| !is_missing(v)));
        if !has_keys {
            continue;
        }
        if let Some(c) = cols.convergence {
            if !row.get(c).is_some_and(|v| is_true(v)) {
                continue;
            }
        }
        let mut row = row.clone();
        row[cols.combo[0]] = row[cols.combo[0]].trim().to_string();
        match screen {
            ScreenId::Mts010 => mts.push(row),
            _ => hts.push(row),
        }
    }
    report.after_qc = mts.len() + hts.len();
    report.mts010_rows = mts.len();
    report.hts002_rows = hts.len();

    let mts = dedup_screen(mts, &cols);
    let hts = dedup_screen(hts, &cols);
    report.mts010_kept = mts.len();
    report.hts002_kept = hts.len();
    info!(
        from = report.mts010_rows,
        picked = report.mts010_kept,
        "deduplicated MTS010"
    );
    info!(
        from = report.hts002_rows,
        picked = report.hts002_kept,
        "deduplicated HTS002"
    );

    // MTS010 goes first so it wins any overlap
    let mut seen: HashSet<ComboKey> = HashSet::new();
    let mut combined = Vec::with_capacity(mts.len() + hts.len());
    for row in mts.into_iter().chain(hts) {
        if seen.insert(combo_key(&row, &cols)) {
            combined.push(row);
        }
    }

    let tissues = tissue_index(cell_line_info)?;
    let mut headers = dose_response.headers.clone();
    let tissue_pos = match headers.iter().position(|h| h == TISSUE_COL) {
        Some(pos) => pos,
        None => {
            headers.push(TISSUE_COL.to_string());
            headers.len() - 1
        }
    };
    for row in &mut combined {
        let cell = (row[cols.combo[1]].clone(), row[cols.combo[2]].clone());
        let tissue = tissues.get(&cell).cloned().unwrap_or_default();
        if tissue_pos < row.len() {
            row[tissue_pos] = tissue;
        } else {
            row.resize(tissue_pos, String::new());
            row.push(tissue);
        }
    }

    check_unique_pairs(&combined, &cols)?;
    report.output_rows = combined.len();
    debug!(?report, "PRISM cleaning finished");

    Ok((Table::new(headers, combined), report))
}

/// Read both raw tables, clean them and write the result to `output`.
/// The cleaned table is returned for summaries.
pub fn clean_files(
    dose_response: &Path,
    cell_line_info: &Path,
    output: &Path,
) -> Result<(Table, WrangleReport)> {
    let dose = Table::read_csv(dose_response)?;
    let cells = Table::read_csv(cell_line_info)?;
    let (cleaned, report) = clean_screens(&dose, &cells)?;
    cleaned.write_csv(output)?;
    info!(path = %output.display(), rows = report.output_rows, "cleaned PRISM table written");
    Ok((cleaned, report))
}

fn combo_key(row: &[String], cols: &Columns) -> ComboKey {
    (
        row[cols.combo[0]].clone(),
        row[cols.combo[1]].clone(),
        row[cols.combo[2]].clone(),
    )
}

fn is_true(raw: &str) -> bool {
    matches!(raw.trim(), "True" | "TRUE" | "true" | "1")
}

/// One row per combo: highest r² if the group has any, otherwise a seeded
/// random pick. Groups are visited in key order so the pick is reproducible.
fn dedup_screen(rows: Vec<Vec<String>>, cols: &Columns) -> Vec<Vec<String>> {
    let mut groups: BTreeMap<ComboKey, Vec<Vec<String>>> = BTreeMap::new();
    for row in rows {
        groups.entry(combo_key(&row, cols)).or_default().push(row);
    }

    let mut rng = StdRng::seed_from_u64(DEDUP_SEED);
    let mut kept = Vec::with_capacity(groups.len());
    for (_, mut group) in groups {
        if group.len() == 1 {
            kept.extend(group.pop());
            continue;
        }
        let best_fit = cols.r2.and_then(|r2| {
            let mut best: Option<(usize, f64)> = None;
            for (i, row) in group.iter().enumerate() {
                let Some(v) = row.get(r2).and_then(|s| parse_float(s)) else {
                    continue;
                };
                // strict comparison: first row wins ties
                if best.map_or(true, |(_, b)| v > b) {
                    best = Some((i, v));
                }
            }
            best.map(|(i, _)| i)
        });
        let pick = best_fit.unwrap_or_else(|| rng.gen_range(0..group.len()));
        kept.push(group.swap_remove(pick));
    }
    kept
}

fn tissue_index(cell_line_info: &Table) -> Result<HashMap<(String, String), String>> {
    let table = "cell line info table";
    let depmap = cell_line_info.require("depmap_id", table)?;
    let ccle = cell_line_info.require("ccle_name", table)?;
    let tissue = cell_line_info.require(TISSUE_COL, table)?;

    let mut index = HashMap::new();
    for row in &cell_line_info.rows {
        let key = (
            row.get(depmap).cloned().unwrap_or_default(),
            row.get(ccle).cloned().unwrap_or_default(),
        );
        index
            .entry(key)
            .or_insert_with(|| row.get(tissue).cloned().unwrap_or_default());
    }
    Ok(index)
}

fn check_unique_pairs(rows: &[Vec<String>], cols: &Columns) -> Result<()> {
    let mut counts: BTreeMap<(String, String), usize> = BTreeMap::new();
    for row in rows {
        *counts
            .entry((row[cols.combo[2]].clone(), row[cols.name].clone()))
            .or_default() += 1;
    }
    let dups: Vec<(String, String)> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(k, _)| k)
        .collect();
    if dups.is_empty() {
        Ok(())
    } else {
        Err(PrismError::DuplicatePairs(dups))
    }
}

/// Per-tissue composition of a cleaned table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TissueSummary {
    pub cell_lines: usize,
    pub combos: usize,
}

pub fn tissue_summary(cleaned: &Table) -> BTreeMap<String, TissueSummary> {
    let (Some(tissue), Some(ccle)) = (cleaned.column(TISSUE_COL), cleaned.column("ccle_name")) else {
        return BTreeMap::new();
    };
    let mut cells: BTreeMap<String, HashSet<&str>> = BTreeMap::new();
    let mut summary: BTreeMap<String, TissueSummary> = BTreeMap::new();
    for row in &cleaned.rows {
        let t = row.get(tissue).map(String::as_str).unwrap_or_default();
        let t = if t.is_empty() { "unknown" } else { t };
        summary.entry(t.to_string()).or_default().combos += 1;
        cells
            .entry(t.to_string())
            .or_default()
            .insert(row.get(ccle).map(String::as_str).unwrap_or_default());
    }
    for (t, set) in cells {
        if let Some(s) = summary.get_mut(&t) {
            s.cell_lines = set.len();
        }
    }
    summary
}
