use std::collections::BTreeMap;

use super::types::{Ic50Record, PrismKey};
use crate::tasks::queue::DispatchItem;

/// Screening results that have been revealed to the agent so far.
///
/// Behaves like a [`PrismLookup`](super::PrismLookup) restricted to revealed pairs. Adding a pair
/// that is already present replaces the earlier record.
#[derive(Debug, Clone)]
pub struct ScreenHistory {
    entries: BTreeMap<PrismKey, Ic50Record>,
    casefold: bool,
}

impl ScreenHistory {
    pub fn new(casefold: bool) -> Self {
        Self {
            entries: BTreeMap::new(),
            casefold,
        }
    }

    pub fn add_item(&mut self, drug: &str, cell: &str, ic50: f64, record: &Ic50Record) {
        let mut record = record.clone();
        record.drug = drug.to_string();
        record.cell_line = cell.to_string();
        record.ic50 = ic50;
        self.add_record(record);
    }

    pub fn add_dispatch_item(&mut self, item: &DispatchItem) {
        self.add_item(&item.drug, &item.cell, item.ic50, &item.record);
    }

    fn add_record(&mut self, mut record: Ic50Record) {
        let key = record.key().norm(self.casefold);
        record.drug = key.drug.clone();
        record.cell_line = key.cell.clone();
        self.entries.insert(key, record);
    }

    pub fn get_record(&self, drug: &str, cell: &str) -> Option<&Ic50Record> {
        self.entries
            .get(&PrismKey::new(drug, cell).norm(self.casefold))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Revealed records for one drug, across every cell line screened so far.
    pub fn for_drug(&self, drug: &str) -> Vec<&Ic50Record> {
        let drug = PrismKey::new(drug, "").norm(self.casefold).drug;
        self.entries
            .values()
            .filter(|r| r.drug == drug)
            .collect()
    }
}
