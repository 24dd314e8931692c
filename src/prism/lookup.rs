use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use super::types::{parse_float, ColumnMap, Ic50Record, PrismKey, ScreenId};
use crate::error::{PrismError, Result};

/// Lookup behaviour for a [`PrismLookup`].
#[derive(Debug, Clone, Copy)]
pub struct LookupOptions {
    /// Case-insensitive matching on drug and cell line names.
    pub casefold: bool,
    /// Reject tables where a (drug, cell) pair occurs twice.
    pub validate_unique: bool,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            casefold: false,
            validate_unique: true,
        }
    }
}

/// In-memory IC50 table keyed by (drug, cell line).
///
/// Records are kept in canonical key order so that iteration, `keys()` and
/// queues built from them are stable across loads of the same file.
#[derive(Debug, Clone, Default)]
pub struct PrismLookup {
    records: Vec<Ic50Record>,
    index: HashMap<PrismKey, usize>,
    options: LookupOptions,
}

impl PrismLookup {
    pub fn from_records(records: Vec<Ic50Record>, options: LookupOptions) -> Result<Self> {
        let mut records: Vec<Ic50Record> = records
            .into_iter()
            .map(|mut r| {
                let key = r.key().norm(options.casefold);
                r.drug = key.drug;
                r.cell_line = key.cell;
                r
            })
            .collect();
        // stable: among duplicates the earlier row stays first
        records.sort_by(|a, b| (&a.drug, &a.cell_line).cmp(&(&b.drug, &b.cell_line)));

        let mut index = HashMap::with_capacity(records.len());
        let mut kept = Vec::with_capacity(records.len());
        let mut dups = Vec::new();

        for record in records {
            let key = record.key();
            if index.contains_key(&key) {
                if dups.last() != Some(&key) {
                    dups.push(key);
                }
                continue;
            }
            index.insert(key, kept.len());
            kept.push(record);
        }

        if !dups.is_empty() {
            if options.validate_unique {
                return Err(PrismError::DuplicateKeys(
                    dups.iter().take(5).map(PrismKey::as_tuple).collect(),
                ));
            }
            warn!(duplicates = dups.len(), "duplicate keys dropped, first record kept");
        }

        Ok(Self {
            records: kept,
            index,
            options,
        })
    }

    /// Load a cleaned PRISM CSV.
    pub fn from_csv(path: &Path, columns: &ColumnMap, options: LookupOptions) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let source = path.display().to_string();

        let position = |name: &str| headers.iter().position(|h| h == name);
        let require = |name: &str| {
            position(name).ok_or_else(|| PrismError::MissingColumn(name.to_string(), source.clone()))
        };
        let drug_idx = require(&columns.drug)?;
        let cell_idx = require(&columns.cell)?;
        let ic50_idx = require(&columns.ic50)?;
        let r2_idx = position(&columns.r2);
        let screen_idx = position(&columns.screen_id);

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for row in reader.records() {
            let row = row?;
            let Some(ic50) = row.get(ic50_idx).and_then(parse_float) else {
                skipped += 1;
                continue;
            };
            let mut record = Ic50Record::new(
                row.get(drug_idx).unwrap_or_default(),
                row.get(cell_idx).unwrap_or_default(),
                ic50,
            );
            record.r2 = r2_idx.and_then(|i| row.get(i)).and_then(parse_float);
            record.screen_id = screen_idx
                .and_then(|i| row.get(i))
                .filter(|s| !s.trim().is_empty())
                .map(ScreenId::parse);
            for (i, (header, value)) in headers.iter().zip(row.iter()).enumerate() {
                if i == drug_idx || i == cell_idx || i == ic50_idx {
                    continue;
                }
                record.extra.insert(header.to_string(), value.to_string());
            }
            records.push(record);
        }

        if skipped > 0 {
            warn!(skipped, path = %source, "rows without a numeric IC50 skipped");
        }
        debug!(rows = records.len(), path = %source, "PRISM table loaded");
        Self::from_records(records, options)
    }

    fn key_for(&self, drug: &str, cell: &str) -> PrismKey {
        PrismKey::new(drug, cell).norm(self.options.casefold)
    }

    pub fn get_record(&self, drug: &str, cell: &str) -> Option<&Ic50Record> {
        self.index
            .get(&self.key_for(drug, cell))
            .map(|&i| &self.records[i])
    }

    pub fn contains_key(&self, key: &PrismKey) -> bool {
        self.index.contains_key(&key.norm(self.options.casefold))
    }

    pub fn keys(&self) -> Vec<PrismKey> {
        self.records.iter().map(Ic50Record::key).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// New lookup holding only the records matching `predicate`.
    pub fn subset<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Ic50Record) -> bool,
    {
        let records: Vec<Ic50Record> = self
            .records
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect();
        let index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.key(), i))
            .collect();
        Self {
            records,
            index,
            options: self.options,
        }
    }
}
