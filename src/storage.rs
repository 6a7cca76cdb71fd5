// STORAGE: persisted per-symbol documents
// One JSON document per symbol (snapshot + derived state) and one per
// (symbol, month) budget cycle. Writes go through a temp file and an atomic
// rename so a partial document is never observable. Unparsable documents are
// treated as absent and logged as recoverable events.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ledger::BudgetCycle;
use crate::types::{
    BandSmoothing, FlagMap, IndicatorSnapshot, PriceBand, TrendRecord, TrendState,
};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Per-symbol display document: the latest snapshot and everything derived
/// from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SymbolDoc {
    pub schema_version: u32,
    pub symbol: String,
    pub snapshot: Option<IndicatorSnapshot>,
    pub trend: Option<TrendState>,
    pub band: PriceBand,
    pub smoothing: BandSmoothing,
    pub flags: FlagMap,
    pub updated_at: DateTime<Utc>,
}

impl SymbolDoc {
    pub fn empty(symbol: &str, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            symbol: symbol.to_string(),
            snapshot: None,
            trend: None,
            band: PriceBand::default(),
            smoothing: BandSmoothing::default(),
            flags: FlagMap::new(),
            updated_at: now,
        }
    }
}

/// Versioned wrapper around a persisted budget cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CycleDoc {
    pub schema_version: u32,
    pub cycle: BudgetCycle,
    pub updated_at: DateTime<Utc>,
}

pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|source| StorageError::Write {
            path: data_dir.display().to_string(),
            source,
        })?;
        info!("STORAGE: data directory ready at {}", data_dir.display());
        Ok(Self { data_dir })
    }

    fn symbol_path(&self, symbol: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", symbol.to_uppercase()))
    }

    fn cycle_path(&self, symbol: &str, month_tag: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}_cycle_{}.json", symbol.to_uppercase(), month_tag))
    }

    fn trend_log_path(&self, symbol: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}_trend.jsonl", symbol.to_uppercase()))
    }

    /// Serialize to `<path>.tmp`, then rename over the target.
    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        let display = path.display().to_string();
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Encode {
            path: display.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).map_err(|source| StorageError::Write {
            path: tmp.display().to_string(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| StorageError::Write {
            path: display,
            source,
        })?;
        Ok(())
    }

    /// Load and parse a document. A missing file returns None silently; a
    /// corrupt one returns None after a recoverable-event warning, so the
    /// caller reinitializes zeroed state instead of propagating the error.
    fn read_doc<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Option<T> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("STORAGE: cannot read {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(
                    "STORAGE: corrupt document {} ({e}), reinitializing",
                    path.display()
                );
                None
            }
        }
    }

    pub fn save_symbol_doc(&self, doc: &SymbolDoc) -> Result<(), StorageError> {
        self.write_atomic(&self.symbol_path(&doc.symbol), doc)
    }

    pub fn load_symbol_doc(&self, symbol: &str) -> Option<SymbolDoc> {
        let doc: SymbolDoc = self.read_doc(&self.symbol_path(symbol))?;
        if doc.schema_version != SCHEMA_VERSION {
            warn!(
                "STORAGE: {} has unsupported schema version {}, reinitializing",
                symbol, doc.schema_version
            );
            return None;
        }
        Some(doc)
    }

    pub fn save_cycle(&self, cycle: &BudgetCycle, month_tag: &str) -> Result<(), StorageError> {
        let doc = CycleDoc {
            schema_version: SCHEMA_VERSION,
            cycle: cycle.clone(),
            updated_at: Utc::now(),
        };
        self.write_atomic(&self.cycle_path(&cycle.symbol, month_tag), &doc)
    }

    pub fn load_cycle(&self, symbol: &str, month_tag: &str) -> Option<BudgetCycle> {
        let doc: CycleDoc = self.read_doc(&self.cycle_path(symbol, month_tag))?;
        if doc.schema_version != SCHEMA_VERSION {
            warn!(
                "STORAGE: cycle {}/{} has unsupported schema version {}, reinitializing",
                symbol, month_tag, doc.schema_version
            );
            return None;
        }
        Some(doc.cycle)
    }

    /// Append one record to the per-symbol trend history log. Best effort:
    /// failures are logged and swallowed.
    pub fn append_trend_record(&self, record: &TrendRecord) {
        let path = self.trend_log_path(&record.symbol);
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!("STORAGE: cannot encode trend record for {}: {e}", record.symbol);
                return;
            }
        };
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| {
                use std::io::Write;
                writeln!(f, "{line}")
            });
        if let Err(e) = result {
            warn!("STORAGE: cannot append trend log {}: {e}", path.display());
        }
    }

    // ------------------------------------------------------------------
    // Legacy migration
    // ------------------------------------------------------------------

    /// One-shot migration of pre-versioning documents. Earlier layouts kept
    /// `<SYMBOL>state.json` either at the data-dir root or under a nested
    /// `state/` directory; both are folded into versioned v1 documents here
    /// so the runtime read paths never branch on legacy locations.
    pub fn migrate_legacy_layout(&self) -> Result<usize, StorageError> {
        let mut migrated = 0;
        let candidates = [self.data_dir.clone(), self.data_dir.join("state")];

        // Collect first: migration writes into the directory being scanned.
        let mut legacy_files = Vec::new();
        for dir in candidates {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let symbol = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_suffix("state.json"))
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                if let Some(symbol) = symbol {
                    legacy_files.push((path, symbol));
                }
            }
        }

        for (path, symbol) in legacy_files {
            let legacy: Option<serde_json::Value> = self.read_doc(&path);
            let mut doc = self
                .load_symbol_doc(&symbol)
                .unwrap_or_else(|| SymbolDoc::empty(&symbol, Utc::now()));

            // Carry the only fields the legacy blobs reliably held.
            if let Some(legacy) = legacy {
                if let Some(smoothing) = legacy
                    .get("oco_smoothing")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                {
                    doc.smoothing = smoothing;
                }
            }

            self.save_symbol_doc(&doc)?;
            if let Err(e) = fs::remove_file(&path) {
                warn!(
                    "STORAGE: migrated {} but could not remove legacy file: {e}",
                    path.display()
                );
            }
            info!("STORAGE: migrated legacy document {}", path.display());
            migrated += 1;
        }

        if migrated > 0 {
            info!("STORAGE: legacy migration complete, {migrated} document(s)");
        }
        Ok(migrated)
    }
}
