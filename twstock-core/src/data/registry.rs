//! Symbol registry: the list of codes to fetch and the market each trades on.
//!
//! Stored as a line-oriented text file:
//!
//! ```text
//! # code,name,market,target
//! 2330,台積電,TSE,Y
//! 6488,環球晶,TPEX,N
//! ```
//!
//! Loaded once per run and passed around read-only.

use super::provider::DataError;
use crate::domain::{Market, SymbolRecord};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    records: BTreeMap<String, SymbolRecord>,
    /// Codes in file order.
    order: Vec<String>,
}

impl Registry {
    /// Load the registry from a file. A missing file is fatal.
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        if !path.exists() {
            return Err(DataError::RegistryNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| DataError::Registry(format!("read {}: {e}", path.display())))?;
        Ok(Self::parse(&content))
    }

    /// Parse registry text. Malformed lines are skipped with a warning.
    pub fn parse(content: &str) -> Self {
        let mut registry = Self::default();

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim().trim_start_matches('\u{feff}');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some(record) => registry.insert(record),
                None => warn!(line = lineno + 1, content = line, "skipping malformed registry line"),
            }
        }

        debug!(symbols = registry.len(), targets = registry.targets().count(), "registry loaded");
        registry
    }

    fn insert(&mut self, record: SymbolRecord) {
        if !self.records.contains_key(&record.code) {
            self.order.push(record.code.clone());
        } else {
            warn!(code = %record.code, "duplicate registry entry, later line wins");
        }
        self.records.insert(record.code.clone(), record);
    }

    pub fn get(&self, code: &str) -> Option<&SymbolRecord> {
        self.records.get(code)
    }

    /// Configured market for a code, if the registry knows it.
    pub fn market_of(&self, code: &str) -> Option<Market> {
        self.get(code).and_then(|r| r.market)
    }

    /// All records in file order.
    pub fn records(&self) -> impl Iterator<Item = &SymbolRecord> {
        self.order.iter().filter_map(|code| self.records.get(code))
    }

    /// Records flagged as fetch targets, in file order.
    pub fn targets(&self) -> impl Iterator<Item = &SymbolRecord> {
        self.records().filter(|r| r.is_target)
    }

    /// Target codes grouped by configured market; `None` collects unknown tags.
    pub fn targets_by_market(&self) -> BTreeMap<Option<Market>, Vec<&str>> {
        let mut grouped: BTreeMap<Option<Market>, Vec<&str>> = BTreeMap::new();
        for record in self.targets() {
            grouped.entry(record.market).or_default().push(&record.code);
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn parse_line(line: &str) -> Option<SymbolRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let code = fields.first().filter(|c| !c.is_empty())?;
    if fields.len() < 3 {
        return None;
    }

    let market = match fields[2].parse::<Market>() {
        Ok(m) => Some(m),
        Err(e) => {
            warn!(code = *code, "{e}; market will be auto-detected");
            None
        }
    };
    let is_target = fields
        .get(3)
        .map(|f| f.eq_ignore_ascii_case("Y"))
        .unwrap_or(false);

    Some(SymbolRecord {
        code: code.to_string(),
        name: fields[1].to_string(),
        market,
        is_target,
    })
}
