//! Signal Repository: append-only storage of emitted signals
//! with filtered listing. The SQLite backend is grounded on the teacher's
//! `signals/db_storage.rs` (WAL mode, covering indexes); the in-memory
//! backend is grounded on `signals/storage.rs`'s VecDeque shape, used by
//! tests and the backtest driver's scratch runs.

use crate::models::{ConfidenceLevel, RiskLevel, TradingSignal};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Filter/pagination parameters for [`SignalRepository::list`] and
/// [`SignalRepository::count`].
#[derive(Debug, Clone, Default)]
pub struct SignalQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub stock_code: Option<String>,
    pub etf_code: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

pub trait SignalRepository: Send + Sync {
    fn insert(&self, signal: TradingSignal) -> anyhow::Result<TradingSignal>;
    fn list(&self, query: &SignalQuery) -> anyhow::Result<Vec<TradingSignal>>;
    fn get(&self, id: i64) -> anyhow::Result<Option<TradingSignal>>;
    fn count(&self, query: &SignalQuery) -> anyhow::Result<usize>;
}

fn matches(signal: &TradingSignal, query: &SignalQuery) -> bool {
    if let Some(start) = query.start {
        if signal.timestamp < start {
            return false;
        }
    }
    if let Some(end) = query.end {
        if signal.timestamp > end {
            return false;
        }
    }
    if let Some(code) = &query.stock_code {
        if &signal.stock_code != code {
            return false;
        }
    }
    if let Some(code) = &query.etf_code {
        if &signal.etf_code != code {
            return false;
        }
    }
    if let Some(event_type) = &query.event_type {
        if &signal.event_type != event_type {
            return false;
        }
    }
    true
}

/// A VecDeque-backed repository for tests and throwaway backtest runs.
///
/// `id` allocation is a single `AtomicI64`, giving the strictly-increasing
/// cross-writer guarantee spec §8 invariant 4 requires without taking a
/// lock just to hand out an id.
#[derive(Default)]
pub struct InMemorySignalRepository {
    signals: Mutex<Vec<TradingSignal>>,
    next_id: AtomicI64,
}

impl InMemorySignalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalRepository for InMemorySignalRepository {
    fn insert(&self, mut signal: TradingSignal) -> anyhow::Result<TradingSignal> {
        signal.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut signals = self.signals.lock();
        signals.push(signal.clone());
        Ok(signal)
    }

    fn list(&self, query: &SignalQuery) -> anyhow::Result<Vec<TradingSignal>> {
        let signals = self.signals.lock();
        let mut matched: Vec<TradingSignal> =
            signals.iter().filter(|s| matches(s, query)).cloned().collect();
        matched.sort_by(|a, b| b.id.cmp(&a.id));
        let offset = query.offset.min(matched.len());
        let end = query
            .limit
            .map(|l| (offset + l).min(matched.len()))
            .unwrap_or(matched.len());
        Ok(matched[offset..end].to_vec())
    }

    fn get(&self, id: i64) -> anyhow::Result<Option<TradingSignal>> {
        Ok(self.signals.lock().iter().find(|s| s.id == id).cloned())
    }

    fn count(&self, query: &SignalQuery) -> anyhow::Result<usize> {
        Ok(self.signals.lock().iter().filter(|s| matches(s, query)).count())
    }
}

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    stock_code TEXT NOT NULL,
    stock_name TEXT NOT NULL,
    stock_price REAL NOT NULL,
    etf_code TEXT NOT NULL,
    etf_name TEXT NOT NULL,
    weight REAL NOT NULL,
    event_type TEXT NOT NULL,
    confidence_level TEXT NOT NULL,
    confidence_score REAL NOT NULL,
    risk_level TEXT NOT NULL,
    reason TEXT NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signals_timestamp ON signals(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_signals_stock_code ON signals(stock_code);
CREATE INDEX IF NOT EXISTS idx_signals_etf_code ON signals(etf_code);
"#;

/// The embedded-relational backend, backed by
/// `rusqlite` in WAL mode. Writes are serialized through a single
/// `parking_lot::Mutex<Connection>`, matching the repository's "insert is
/// serialized; list is snapshot-isolated" concurrency note.
pub struct SqliteSignalRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSignalRepository {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_signal(row: &rusqlite::Row<'_>) -> rusqlite::Result<TradingSignal> {
        let confidence_level: String = row.get("confidence_level")?;
        let risk_level: String = row.get("risk_level")?;
        let payload_json: String = row.get("payload_json")?;
        let breakdown = serde_json::from_str(&payload_json).unwrap_or(crate::models::ConfidenceBreakdown {
            order: 0.0,
            weight: 0.0,
            liquidity: 0.0,
            time: 0.0,
        });
        let timestamp: String = row.get("timestamp")?;

        Ok(TradingSignal {
            id: row.get("id")?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            stock_code: row.get("stock_code")?,
            stock_name: row.get("stock_name")?,
            stock_price: row.get("stock_price")?,
            etf_code: row.get("etf_code")?,
            etf_name: row.get("etf_name")?,
            weight: row.get("weight")?,
            event_type: row.get("event_type")?,
            confidence_level: match confidence_level.as_str() {
                "high" => ConfidenceLevel::High,
                "medium" => ConfidenceLevel::Medium,
                _ => ConfidenceLevel::Low,
            },
            confidence_score: row.get("confidence_score")?,
            risk_level: match risk_level.as_str() {
                "high" => RiskLevel::High,
                "low" => RiskLevel::Low,
                _ => RiskLevel::Medium,
            },
            reason: row.get("reason")?,
            breakdown,
        })
    }
}

impl SignalRepository for SqliteSignalRepository {
    fn insert(&self, mut signal: TradingSignal) -> anyhow::Result<TradingSignal> {
        let conn = self.conn.lock();
        let payload_json = serde_json::to_string(&signal.breakdown)?;
        conn.execute(
            "INSERT INTO signals (timestamp, stock_code, stock_name, stock_price, etf_code, etf_name, weight, \
             event_type, confidence_level, confidence_score, risk_level, reason, payload_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                signal.timestamp.to_rfc3339(),
                signal.stock_code,
                signal.stock_name,
                signal.stock_price,
                signal.etf_code,
                signal.etf_name,
                signal.weight,
                signal.event_type,
                signal.confidence_level.as_str(),
                signal.confidence_score,
                signal.risk_level.as_str(),
                signal.reason,
                payload_json,
            ],
        )?;
        signal.id = conn.last_insert_rowid();
        Ok(signal)
    }

    fn list(&self, query: &SignalQuery) -> anyhow::Result<Vec<TradingSignal>> {
        let conn = self.conn.lock();
        let mut sql = "SELECT * FROM signals WHERE 1=1".to_string();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(start) = &query.start {
            sql.push_str(" AND timestamp >= ?");
            params.push(Box::new(start.to_rfc3339()));
        }
        if let Some(end) = &query.end {
            sql.push_str(" AND timestamp <= ?");
            params.push(Box::new(end.to_rfc3339()));
        }
        if let Some(code) = &query.stock_code {
            sql.push_str(" AND stock_code = ?");
            params.push(Box::new(code.clone()));
        }
        if let Some(code) = &query.etf_code {
            sql.push_str(" AND etf_code = ?");
            params.push(Box::new(code.clone()));
        }
        if let Some(event_type) = &query.event_type {
            sql.push_str(" AND event_type = ?");
            params.push(Box::new(event_type.clone()));
        }
        sql.push_str(" ORDER BY id DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {}", query.offset));
        } else if query.offset > 0 {
            sql.push_str(&format!(" LIMIT -1 OFFSET {}", query.offset));
        }

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_signal)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get(&self, id: i64) -> anyhow::Result<Option<TradingSignal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM signals WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], Self::row_to_signal)?;
        Ok(rows.next().transpose()?)
    }

    fn count(&self, query: &SignalQuery) -> anyhow::Result<usize> {
        // A full list-then-count is adequate at this volume; the teacher's
        // own repository favors covering indexes only at its 10M-row scale.
        Ok(self.list(query)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfidenceBreakdown;

    fn sample(stock_code: &str) -> TradingSignal {
        TradingSignal {
            id: 0,
            timestamp: Utc::now(),
            stock_code: stock_code.to_string(),
            stock_name: "Moutai".to_string(),
            stock_price: 1980.0,
            etf_code: "510300".to_string(),
            etf_name: "CSI 300 ETF".to_string(),
            weight: 0.085,
            event_type: "limit_up".to_string(),
            confidence_level: ConfidenceLevel::High,
            confidence_score: 0.9,
            risk_level: RiskLevel::Medium,
            reason: "test".to_string(),
            breakdown: ConfidenceBreakdown {
                order: 1.0,
                weight: 0.85,
                liquidity: 1.0,
                time: 0.5,
            },
        }
    }

    #[test]
    fn in_memory_ids_are_strictly_increasing() {
        let repo = InMemorySignalRepository::new();
        let a = repo.insert(sample("600519")).unwrap();
        let b = repo.insert(sample("600519")).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn in_memory_list_is_newest_first() {
        let repo = InMemorySignalRepository::new();
        repo.insert(sample("600519")).unwrap();
        repo.insert(sample("601012")).unwrap();
        let listed = repo.list(&SignalQuery::default()).unwrap();
        assert_eq!(listed[0].stock_code, "601012");
        assert_eq!(listed[1].stock_code, "600519");
    }

    #[test]
    fn in_memory_filters_by_stock_code() {
        let repo = InMemorySignalRepository::new();
        repo.insert(sample("600519")).unwrap();
        repo.insert(sample("601012")).unwrap();
        let query = SignalQuery {
            stock_code: Some("601012".to_string()),
            ..Default::default()
        };
        let listed = repo.list(&query).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].stock_code, "601012");
    }

    #[test]
    fn sqlite_insert_then_get_round_trips() {
        let repo = SqliteSignalRepository::open_in_memory().unwrap();
        let inserted = repo.insert(sample("600519")).unwrap();
        let fetched = repo.get(inserted.id).unwrap().unwrap();
        assert_eq!(fetched.stock_code, "600519");
        assert_eq!(fetched.confidence_level, ConfidenceLevel::High);
        assert!((fetched.breakdown.weight - 0.85).abs() < 1e-9);
    }

    #[test]
    fn sqlite_ids_are_strictly_increasing_across_inserts() {
        let repo = SqliteSignalRepository::open_in_memory().unwrap();
        let a = repo.insert(sample("600519")).unwrap();
        let b = repo.insert(sample("600519")).unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn sqlite_list_respects_limit_and_newest_first_order() {
        let repo = SqliteSignalRepository::open_in_memory().unwrap();
        for _ in 0..5 {
            repo.insert(sample("600519")).unwrap();
        }
        let query = SignalQuery {
            limit: Some(2),
            ..Default::default()
        };
        let listed = repo.list(&query).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].id > listed[1].id);
    }
}
