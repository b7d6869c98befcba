//! Stock↔ETF mapping store: the inversion `stock_code →
//! [CandidateETF]` used during every scan. Rebuilds swap a whole new
//! snapshot in atomically so readers never observe a partially-built map,
//! the same lock-free-read / swap-on-write discipline the teacher's
//! orderbook store uses for its `ArcSwap<OrderBook>` snapshots.

use crate::models::{CandidateETF, Holding};
use crate::provider::HoldingsProvider;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct MappingEntry {
    etf_code: String,
    etf_name: String,
    weight: f64,
    rank: u32,
}

impl From<&MappingEntry> for CandidateETF {
    fn from(e: &MappingEntry) -> Self {
        CandidateETF {
            etf_code: e.etf_code.clone(),
            etf_name: e.etf_name.clone(),
            weight: e.weight,
            rank: e.rank,
            daily_amount: 0.0,
            quote: None,
        }
    }
}

type Document = HashMap<String, Vec<MappingEntry>>;

/// The persistent many-to-many stock→ETF mapping.
///
/// Reads are lock-free (an `Arc` clone of the current snapshot); a rebuild
/// constructs the entire new document off to the side and only then swaps
/// it in, so a failed or half-finished rebuild never corrupts the snapshot
/// in use.
pub struct StockEtfMapping {
    snapshot: ArcSwap<Document>,
}

impl Default for StockEtfMapping {
    fn default() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
        }
    }
}

impl StockEtfMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eligible ETFs for `stock_code`, ordered by weight descending. Empty
    /// if the stock is unmapped.
    pub fn get_etfs_for(&self, stock_code: &str) -> Vec<CandidateETF> {
        self.snapshot
            .load()
            .get(stock_code)
            .map(|entries| entries.iter().map(CandidateETF::from).collect())
            .unwrap_or_default()
    }

    pub fn has(&self, stock_code: &str) -> bool {
        self.snapshot.load().contains_key(stock_code)
    }

    pub fn list_stocks(&self) -> Vec<String> {
        self.snapshot.load().keys().cloned().collect()
    }

    /// Number of distinct ETFs appearing anywhere in the mapping.
    pub fn covered_etf_count(&self) -> usize {
        let snapshot = self.snapshot.load();
        let mut codes: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for entries in snapshot.values() {
            for e in entries {
                codes.insert(e.etf_code.as_str());
            }
        }
        codes.len()
    }

    /// Rebuild the whole mapping by inverting every ETF's top-N holdings.
    /// `min_weight_epsilon` filters out
    /// negligible holdings before insertion (default 0 — keep everything,
    /// eligibility by `min_weight` happens at scan time instead).
    pub async fn rebuild(
        &self,
        etf_universe: &[(String, String)], // (etf_code, etf_name)
        holdings: &dyn HoldingsProvider,
        top_n: usize,
        min_weight_epsilon: f64,
    ) -> anyhow::Result<()> {
        let mut document: Document = HashMap::new();

        for (etf_code, etf_name) in etf_universe {
            let top: Vec<Holding> = holdings.top_holdings(etf_code, top_n).await?;
            for h in top {
                if h.weight < min_weight_epsilon {
                    continue;
                }
                document
                    .entry(h.stock_code.clone())
                    .or_default()
                    .push(MappingEntry {
                        etf_code: etf_code.clone(),
                        etf_name: etf_name.clone(),
                        weight: h.weight,
                        rank: h.rank,
                    });
            }
        }

        for entries in document.values_mut() {
            // Keep the highest-weight entry per etf_code, then sort by
            // weight descending.
            entries.sort_by(|a, b| {
                a.etf_code
                    .cmp(&b.etf_code)
                    .then(b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal))
            });
            entries.dedup_by(|a, b| a.etf_code == b.etf_code);
            entries.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        }

        self.snapshot.store(Arc::new(document));
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let document = self.snapshot.load_full();
        let json = serde_json::to_vec_pretty(document.as_ref())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let bytes = std::fs::read(path)?;
        let document: Document = serde_json::from_slice(&bytes)?;
        self.snapshot.store(Arc::new(document));
        Ok(())
    }
}
