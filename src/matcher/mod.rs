//! Identity matcher.
//!
//! The matcher compares an item's normalized fingerprint against the rest
//! of the registry: an exact tier over the store's fingerprint index and an
//! optional fuzzy tier (edit distance one) that may be disabled under load.
//! It produces events only; persisting them is the caller's job.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult, ExecutionError};
use crate::event::{pair_key, MatchConfidence, MatchEvent};
use crate::fingerprint::{self, FUZZY_MIN_LEN};
use crate::ids::{ItemId, UserId};
use crate::item::Item;
use crate::storage::{ItemStore, MatchEventStore, StorageError};

#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Whether the fuzzy tier runs. Off by default; it is a full
    /// fingerprint scan and the first thing to shed under load.
    pub fuzzy_enabled: bool,
    /// Minimum normalized fingerprint length for the fuzzy tier.
    pub fuzzy_min_len: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            fuzzy_enabled: false,
            fuzzy_min_len: FUZZY_MIN_LEN,
        }
    }
}

struct Candidate {
    item: Item,
    confidence: MatchConfidence,
}

/// Lazy, finite sequence of match events for one detection run.
///
/// Candidates are gathered up front (cheap index lookups); the per-pair
/// re-emission check against recorded events happens as the scan is
/// consumed. A pair already recorded is re-emitted only when the
/// counterpart changed after the recorded detection time.
pub struct MatchScan {
    source: ItemId,
    fingerprint: String,
    events: Arc<dyn MatchEventStore>,
    candidates: std::vec::IntoIter<Candidate>,
    seen: HashSet<(ItemId, ItemId)>,
}

impl std::fmt::Debug for MatchScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchScan")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl MatchScan {
    fn empty(source: ItemId, events: Arc<dyn MatchEventStore>) -> Self {
        Self {
            source,
            fingerprint: String::new(),
            events,
            candidates: Vec::new().into_iter(),
            seen: HashSet::new(),
        }
    }
}

impl Iterator for MatchScan {
    type Item = EngineResult<MatchEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let candidate = self.candidates.next()?;
            let pair = pair_key(self.source, candidate.item.id);
            if !self.seen.insert(pair) {
                continue;
            }

            let previous = match self.events.latest_for_pair(pair.0, pair.1) {
                Ok(prev) => prev,
                Err(e) => return Some(Err(map_storage(&e))),
            };
            if let Some(prev) = previous {
                if candidate.item.updated_at <= prev.detected_at {
                    continue;
                }
            }

            let event = MatchEvent::new(
                self.source,
                candidate.item.id,
                self.fingerprint.clone(),
                candidate.confidence,
            )
            .map_err(|e| EngineError::internal(e.to_string()));
            return Some(event);
        }
    }
}

/// Cross-item fingerprint matcher.
pub struct IdentityMatcher {
    cfg: MatcherConfig,
    items: Arc<dyn ItemStore>,
    events: Arc<dyn MatchEventStore>,
}

impl std::fmt::Debug for IdentityMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMatcher")
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

impl IdentityMatcher {
    #[must_use]
    #[allow(missing_docs)]
    pub fn new(
        cfg: MatcherConfig,
        items: Arc<dyn ItemStore>,
        events: Arc<dyn MatchEventStore>,
    ) -> Self {
        Self { cfg, items, events }
    }

    /// Scans the registry for items sharing `item`'s fingerprint.
    ///
    /// Items without a usable fingerprint are silently skipped (empty
    /// scan). The submitted item itself and the owner's other items are
    /// never candidates.
    ///
    /// # Errors
    ///
    /// Returns a storage error if candidate gathering fails; per-candidate
    /// failures surface through the scan's items.
    pub fn check_for_matches(&self, item: &Item) -> EngineResult<MatchScan> {
        let Some(fp) = item.fingerprint.as_deref() else {
            return Ok(MatchScan::empty(item.id, Arc::clone(&self.events)));
        };
        if fp.is_empty() {
            return Ok(MatchScan::empty(item.id, Arc::clone(&self.events)));
        }

        let mut candidates = self.exact_candidates(item, fp)?;
        if self.cfg.fuzzy_enabled && fp.chars().count() >= self.cfg.fuzzy_min_len {
            candidates.extend(self.fuzzy_candidates(item, fp)?);
        }

        // Exact hits stay ahead of fuzzy ones; within a tier the order is
        // the candidate id, which makes runs reproducible.
        candidates.sort_by(|a, b| {
            tier_rank(a.confidence)
                .cmp(&tier_rank(b.confidence))
                .then_with(|| a.item.id.cmp(&b.item.id))
        });

        Ok(MatchScan {
            source: item.id,
            fingerprint: fp.to_string(),
            events: Arc::clone(&self.events),
            candidates: candidates.into_iter(),
            seen: HashSet::new(),
        })
    }

    fn exact_candidates(&self, item: &Item, fp: &str) -> EngineResult<Vec<Candidate>> {
        let matches = self
            .items
            .find_by_fingerprint(fp)
            .map_err(|e| map_storage(&e))?;
        Ok(matches
            .into_iter()
            .filter(|other| eligible(item.id, item.owner, other))
            .map(|other| Candidate {
                item: other,
                confidence: MatchConfidence::Exact,
            })
            .collect())
    }

    fn fuzzy_candidates(&self, item: &Item, fp: &str) -> EngineResult<Vec<Candidate>> {
        let all = self
            .items
            .scan_fingerprints()
            .map_err(|e| map_storage(&e))?;

        let mut out = Vec::new();
        for (other_fp, ids) in all {
            if other_fp == fp {
                continue;
            }
            if other_fp.chars().count() < self.cfg.fuzzy_min_len {
                continue;
            }
            if !fingerprint::within_edit_distance_one(fp, &other_fp) {
                continue;
            }
            for id in ids {
                let Some(other) = self.items.get(id).map_err(|e| map_storage(&e))? else {
                    continue;
                };
                if eligible(item.id, item.owner, &other) {
                    out.push(Candidate {
                        item: other,
                        confidence: MatchConfidence::Fuzzy,
                    });
                }
            }
        }
        Ok(out)
    }
}

fn eligible(source: ItemId, source_owner: UserId, other: &Item) -> bool {
    other.id != source && other.owner != source_owner
}

const fn tier_rank(confidence: MatchConfidence) -> u8 {
    match confidence {
        MatchConfidence::Exact => 0,
        MatchConfidence::Fuzzy => 1,
    }
}

fn map_storage(e: &StorageError) -> EngineError {
    ExecutionError::Storage {
        message: e.to_string(),
    }
    .into()
}
