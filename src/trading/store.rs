use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Result, VerifyError};
use crate::models::Timeframe;
use crate::trading::lifecycle::{TradeState, TradeStatus};
use crate::trading::signal::{TradeId, TradeSignal};

/// A signal together with its current lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub signal: TradeSignal,
    pub state: TradeState,
    /// Bumped on every committed transition; used for optimistic concurrency.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn new(signal: TradeSignal) -> Self {
        let updated_at = signal.generated_at;
        Self {
            signal,
            state: TradeState::initial(),
            version: 0,
            updated_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.signal.id
    }

    pub fn status(&self) -> TradeStatus {
        self.state.status()
    }
}

/// Optional filter over the trade population. Dates apply to `generated_at`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeScope {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub status: Option<TradeStatus>,
    #[serde(default)]
    pub timeframe: Option<Timeframe>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl TradeScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn symbol(symbol: &str) -> Self {
        Self {
            symbol: Some(symbol.trim().to_uppercase()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: TradeStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    /// Narrow by a command-line term: `all`, a status name, a timeframe, or a symbol.
    pub fn with_term(self, term: &str) -> Self {
        if term.eq_ignore_ascii_case("all") {
            return self;
        }
        if let Some(status) = TradeStatus::from_str_loose(term) {
            return self.with_status(status);
        }
        if let Some(timeframe) = Timeframe::from_str_loose(term) {
            return self.with_timeframe(timeframe);
        }
        Self {
            symbol: Some(term.trim().to_uppercase()),
            ..self
        }
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn matches(&self, record: &TradeRecord) -> bool {
        if let Some(symbol) = &self.symbol {
            if !record.signal.symbol.eq_ignore_ascii_case(symbol) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status() != status {
                return false;
            }
        }
        if let Some(timeframe) = self.timeframe {
            if record.signal.timeframe != timeframe {
                return false;
            }
        }
        if let Some(from) = self.from {
            if record.signal.generated_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if record.signal.generated_at > to {
                return false;
            }
        }
        true
    }
}

/// Durable home of signals and their lifecycle state.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Register a new signal in the `active` state.
    async fn insert(&self, signal: TradeSignal) -> Result<TradeRecord>;

    async fn get(&self, id: &str) -> Result<TradeRecord>;

    /// Snapshot of matching records, oldest signal first.
    async fn list(&self, scope: &TradeScope) -> Result<Vec<TradeRecord>>;

    /// Replace the state of `id` in one write, provided nobody committed since
    /// `expected_version` and the stored state is not terminal.
    async fn commit(
        &self,
        id: &str,
        expected_version: u64,
        state: TradeState,
        at: DateTime<Utc>,
    ) -> Result<TradeRecord>;
}

fn insert_into(records: &mut HashMap<TradeId, TradeRecord>, signal: TradeSignal) -> Result<TradeRecord> {
    signal.validate()?;
    if records.contains_key(&signal.id) {
        return Err(VerifyError::InvalidSignal(format!(
            "duplicate trade id {}",
            signal.id
        )));
    }
    let record = TradeRecord::new(signal);
    records.insert(record.signal.id.clone(), record.clone());
    Ok(record)
}

fn commit_into(
    records: &mut HashMap<TradeId, TradeRecord>,
    id: &str,
    expected_version: u64,
    state: TradeState,
    at: DateTime<Utc>,
) -> Result<TradeRecord> {
    let record = records
        .get_mut(id)
        .ok_or_else(|| VerifyError::NotFound(id.to_string()))?;
    if record.version != expected_version {
        return Err(VerifyError::ConcurrentEvaluationConflict {
            trade_id: id.to_string(),
        });
    }
    if record.state.is_terminal() {
        return Err(VerifyError::TerminalState(id.to_string()));
    }
    record.state = state;
    record.version += 1;
    record.updated_at = at;
    Ok(record.clone())
}

fn snapshot(records: &HashMap<TradeId, TradeRecord>, scope: &TradeScope) -> Vec<TradeRecord> {
    let mut out: Vec<TradeRecord> = records
        .values()
        .filter(|r| scope.matches(r))
        .cloned()
        .collect();
    out.sort_by(|a, b| {
        a.signal
            .generated_at
            .cmp(&b.signal.generated_at)
            .then_with(|| a.signal.id.cmp(&b.signal.id))
    });
    out
}

/// In-process store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<TradeId, TradeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn insert(&self, signal: TradeSignal) -> Result<TradeRecord> {
        let mut records = self.records.write().await;
        insert_into(&mut records, signal)
    }

    async fn get(&self, id: &str) -> Result<TradeRecord> {
        let records = self.records.read().await;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| VerifyError::NotFound(id.to_string()))
    }

    async fn list(&self, scope: &TradeScope) -> Result<Vec<TradeRecord>> {
        let records = self.records.read().await;
        Ok(snapshot(&records, scope))
    }

    async fn commit(
        &self,
        id: &str,
        expected_version: u64,
        state: TradeState,
        at: DateTime<Utc>,
    ) -> Result<TradeRecord> {
        let mut records = self.records.write().await;
        commit_into(&mut records, id, expected_version, state, at)
    }
}

/// Store backed by one JSON file. Each write goes to a temp file that is then
/// renamed over the original, so readers see either the old or the new state.
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<HashMap<TradeId, TradeRecord>>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut records = HashMap::new();

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let list: Vec<TradeRecord> = serde_json::from_str(&content).map_err(|e| {
                VerifyError::Storage(format!("corrupt store {}: {}", path.display(), e))
            })?;
            for record in list {
                records.insert(record.signal.id.clone(), record);
            }
            info!("Loaded {} trades from {}", records.len(), path.display());
        }

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &HashMap<TradeId, TradeRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let list = snapshot(records, &TradeScope::all());
        let json = serde_json::to_string_pretty(&list)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            VerifyError::Storage(format!(
                "cannot replace {} with {}: {}",
                self.path.display(),
                tmp.display(),
                e
            ))
        })?;
        debug!("Persisted {} trades to {}", list.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl TradeStore for JsonFileStore {
    async fn insert(&self, signal: TradeSignal) -> Result<TradeRecord> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        let record = insert_into(&mut next, signal)?;
        self.persist(&next)?;
        *records = next;
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<TradeRecord> {
        let records = self.records.read().await;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| VerifyError::NotFound(id.to_string()))
    }

    async fn list(&self, scope: &TradeScope) -> Result<Vec<TradeRecord>> {
        let records = self.records.read().await;
        Ok(snapshot(&records, scope))
    }

    async fn commit(
        &self,
        id: &str,
        expected_version: u64,
        state: TradeState,
        at: DateTime<Utc>,
    ) -> Result<TradeRecord> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        let record = commit_into(&mut next, id, expected_version, state, at)?;
        self.persist(&next)?;
        *records = next;
        Ok(record)
    }
}
