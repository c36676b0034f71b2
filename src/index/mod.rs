//! Grid-of-cells spatial index.
//!
//! The index maps items to fixed-size latitude/longitude cells and answers
//! radius queries by scanning the cell neighborhood that can contain the
//! radius, then ranking survivors by great-circle distance. It stores only
//! ids and points; structured filters run as a post-filter against the item
//! store after spatial narrowing, keeping the structure single-purpose.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult, ExecutionError};
use crate::geo::{self, GeoPoint};
use crate::ids::ItemId;
use crate::item::{Category, Item};
use crate::status::ItemStatus;
use crate::storage::ItemStore;
use crate::subscription::DateRange;

/// Structured post-filters for radius queries.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Category exact match.
    pub category: Option<Category>,
    /// Accepted statuses. None accepts every status.
    pub statuses: Option<Vec<ItemStatus>>,
    /// Created-date containment.
    pub created: Option<DateRange>,
}

impl QueryFilters {
    /// Returns true if the item passes every configured filter.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(category) = &self.category {
            if &item.category != category {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&item.status) {
                return false;
            }
        }
        if let Some(range) = &self.created {
            if !range.contains(item.created_at) {
                return false;
            }
        }
        true
    }

    /// Returns true if no filter is configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.category.is_none() && self.statuses.is_none() && self.created.is_none()
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct SpatialIndexConfig {
    /// Cell edge length in degrees. The default (0.05°) is roughly 5.5 km
    /// of latitude, sized so metropolitan-scale radii touch a handful of
    /// cells.
    pub cell_size_deg: f64,
}

impl Default for SpatialIndexConfig {
    fn default() -> Self {
        Self {
            cell_size_deg: 0.05,
        }
    }
}

type Cell = (i32, i32);

#[derive(Debug, Default)]
struct GridState {
    cells: HashMap<Cell, BTreeSet<ItemId>>,
    positions: HashMap<ItemId, (GeoPoint, Cell)>,
}

/// Spatial index over item locations.
///
/// Upserts are idempotent; removes are strict. Radius queries return item
/// ids ordered by ascending distance, ties broken by item id, and carry a
/// deadline so a scan can never hang the caller.
pub struct SpatialIndex {
    cfg: SpatialIndexConfig,
    items: Arc<dyn ItemStore>,
    state: RwLock<GridState>,
    lng_cells: i32,
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

impl SpatialIndex {
    /// Creates an empty index backed by the given item store for
    /// post-filter lookups.
    #[must_use]
    pub fn new(cfg: SpatialIndexConfig, items: Arc<dyn ItemStore>) -> Self {
        let cell = cfg.cell_size_deg.max(1e-4);
        #[allow(clippy::cast_possible_truncation)]
        let lng_cells = (360.0 / cell).ceil() as i32;
        Self {
            cfg,
            items,
            state: RwLock::new(GridState::default()),
            lng_cells,
        }
    }

    fn cell_of(&self, point: &GeoPoint) -> Cell {
        let cell = self.cfg.cell_size_deg.max(1e-4);
        #[allow(clippy::cast_possible_truncation)]
        let lat_idx = (point.lat() / cell).floor() as i32;
        #[allow(clippy::cast_possible_truncation)]
        let lng_idx = ((point.lng() + 180.0) / cell).floor() as i32;
        (lat_idx, lng_idx.rem_euclid(self.lng_cells))
    }

    /// Inserts or moves an item's position. Idempotent.
    pub fn upsert(&self, id: ItemId, point: GeoPoint) -> EngineResult<()> {
        let cell = self.cell_of(&point);
        let mut state = self
            .state
            .write()
            .map_err(|_| EngineError::internal("spatial index lock poisoned"))?;

        if let Some((_, old_cell)) = state.positions.get(&id).copied() {
            if old_cell != cell {
                if let Some(ids) = state.cells.get_mut(&old_cell) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        state.cells.remove(&old_cell);
                    }
                }
            }
        }

        state.cells.entry(cell).or_default().insert(id);
        state.positions.insert(id, (point, cell));
        Ok(())
    }

    /// Removes an item from the index.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` for an id the index does not hold.
    pub fn remove(&self, id: ItemId) -> EngineResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| EngineError::internal("spatial index lock poisoned"))?;

        let Some((_, cell)) = state.positions.remove(&id) else {
            return Err(ExecutionError::ItemNotFound { id }.into());
        };
        if let Some(ids) = state.cells.get_mut(&cell) {
            ids.remove(&id);
            if ids.is_empty() {
                state.cells.remove(&cell);
            }
        }
        Ok(())
    }

    /// Number of indexed positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.positions.len()).unwrap_or(0)
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Radius query: item ids within `radius_m` of `center`, ascending by
    /// great-circle distance, ties by item id.
    ///
    /// Spatial narrowing runs first; `filters` are applied afterwards
    /// against the item store. The deadline is checked between cell scans.
    ///
    /// # Errors
    ///
    /// - `InvalidRadius` for a non-positive radius
    /// - `Timeout` when the scan exceeds `timeout`
    pub fn query_radius(
        &self,
        center: &GeoPoint,
        radius_m: f64,
        filters: &QueryFilters,
        timeout: Duration,
    ) -> EngineResult<Vec<(ItemId, f64)>> {
        geo::validate_radius(radius_m).map_err(EngineError::Validation)?;
        let deadline = Instant::now() + timeout;

        let candidates = self.spatial_candidates(center, radius_m, deadline, timeout)?;

        let mut hits = if filters.is_empty() {
            candidates
        } else {
            let mut kept = Vec::with_capacity(candidates.len());
            for (id, dist) in candidates {
                if Instant::now() > deadline {
                    return Err(timeout_error(timeout));
                }
                let item = self
                    .items
                    .get(id)
                    .map_err(|e| storage_error(&e))?;
                if let Some(item) = item {
                    if filters.matches(&item) {
                        kept.push((id, dist));
                    }
                }
            }
            kept
        };

        hits.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(hits)
    }

    fn spatial_candidates(
        &self,
        center: &GeoPoint,
        radius_m: f64,
        deadline: Instant,
        timeout: Duration,
    ) -> EngineResult<Vec<(ItemId, f64)>> {
        let cell = self.cfg.cell_size_deg.max(1e-4);

        let lat_half = geo::lat_degrees_for(radius_m);
        let lat_lo = (center.lat() - lat_half).max(-90.0);
        let lat_hi = (center.lat() + lat_half).min(90.0);
        #[allow(clippy::cast_possible_truncation)]
        let lat_cell_lo = (lat_lo / cell).floor() as i32;
        #[allow(clippy::cast_possible_truncation)]
        let lat_cell_hi = (lat_hi / cell).floor() as i32;

        // Longitude shrink is worst at the highest absolute latitude the
        // band reaches, so size the half-width there.
        let worst_lat = if lat_lo.abs() > lat_hi.abs() {
            lat_lo
        } else {
            lat_hi
        };
        let lng_half = geo::lng_degrees_for(radius_m, worst_lat);

        let lng_range: Vec<i32> = if lng_half * 2.0 >= 360.0 {
            (0..self.lng_cells).collect()
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let lo = (((center.lng() - lng_half) + 180.0) / cell).floor() as i32;
            #[allow(clippy::cast_possible_truncation)]
            let hi = (((center.lng() + lng_half) + 180.0) / cell).floor() as i32;
            (lo..=hi)
                .map(|i| i.rem_euclid(self.lng_cells))
                .collect()
        };

        let state = self
            .state
            .read()
            .map_err(|_| EngineError::internal("spatial index lock poisoned"))?;

        let mut out = Vec::new();
        for lat_idx in lat_cell_lo..=lat_cell_hi {
            if Instant::now() > deadline {
                return Err(timeout_error(timeout));
            }
            for &lng_idx in &lng_range {
                let Some(ids) = state.cells.get(&(lat_idx, lng_idx)) else {
                    continue;
                };
                for id in ids {
                    let Some((point, _)) = state.positions.get(id) else {
                        continue;
                    };
                    let dist = center.distance_m(point);
                    if dist <= radius_m {
                        out.push((*id, dist));
                    }
                }
            }
        }
        Ok(out)
    }
}

fn timeout_error(timeout: Duration) -> EngineError {
    ExecutionError::Timeout {
        duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
    }
    .into()
}

fn storage_error(e: &crate::storage::StorageError) -> EngineError {
    ExecutionError::Storage {
        message: e.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::item::ItemDraft;
    use crate::storage::InMemoryItemStore;

    const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

    fn setup() -> (Arc<InMemoryItemStore>, SpatialIndex) {
        let store = Arc::new(InMemoryItemStore::new());
        let index = SpatialIndex::new(
            SpatialIndexConfig::default(),
            Arc::clone(&store) as Arc<dyn ItemStore>,
        );
        (store, index)
    }

    fn add_item(
        store: &InMemoryItemStore,
        index: &SpatialIndex,
        lat: f64,
        lng: f64,
        category: Category,
    ) -> ItemId {
        let item = Item::new(
            crate::ids::UserId::new(),
            ItemDraft {
                category,
                serial: None,
                label: "Test".to_string(),
                description: None,
                location: GeoPoint::new(lat, lng).unwrap(),
            },
        );
        let id = item.id;
        let point = item.location;
        store.insert(item).unwrap();
        index.upsert(id, point).unwrap();
        id
    }

    #[test]
    fn query_orders_by_distance() {
        let (store, index) = setup();
        let center = GeoPoint::new(48.8566, 2.3522).unwrap();

        let far = add_item(&store, &index, 48.87, 2.37, Category::Bicycle);
        let near = add_item(&store, &index, 48.8570, 2.3530, Category::Bicycle);
        let out = add_item(&store, &index, 51.5074, -0.1278, Category::Bicycle);

        let hits = index
            .query_radius(&center, 5_000.0, &QueryFilters::default(), QUERY_TIMEOUT)
            .unwrap();
        let ids: Vec<ItemId> = hits.iter().map(|(id, _)| *id).collect();

        assert_eq!(ids, vec![near, far]);
        assert!(!ids.contains(&out));
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn query_rejects_bad_radius() {
        let (_, index) = setup();
        let center = GeoPoint::new(0.0, 0.0).unwrap();
        let err = index
            .query_radius(&center, 0.0, &QueryFilters::default(), QUERY_TIMEOUT)
            .unwrap_err();
        assert_eq!(err.code(), "invalid_radius");
    }

    #[test]
    fn upsert_is_idempotent_and_moves() {
        let (store, index) = setup();
        let id = add_item(&store, &index, 10.0, 10.0, Category::Phone);

        // Same position again: no-op.
        index
            .upsert(id, GeoPoint::new(10.0, 10.0).unwrap())
            .unwrap();
        assert_eq!(index.len(), 1);

        // Move far away: old cell must release the id.
        index
            .upsert(id, GeoPoint::new(-10.0, -10.0).unwrap())
            .unwrap();
        assert_eq!(index.len(), 1);

        let near_old = index
            .query_radius(
                &GeoPoint::new(10.0, 10.0).unwrap(),
                1_000.0,
                &QueryFilters::default(),
                QUERY_TIMEOUT,
            )
            .unwrap();
        assert!(near_old.is_empty());

        let near_new = index
            .query_radius(
                &GeoPoint::new(-10.0, -10.0).unwrap(),
                1_000.0,
                &QueryFilters::default(),
                QUERY_TIMEOUT,
            )
            .unwrap();
        assert_eq!(near_new.len(), 1);
    }

    #[test]
    fn remove_is_strict() {
        let (store, index) = setup();
        let id = add_item(&store, &index, 0.0, 0.0, Category::Phone);

        index.remove(id).unwrap();
        let err = index.remove(id).unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert!(index.is_empty());
    }

    #[test]
    fn filters_run_after_narrowing() {
        let (store, index) = setup();
        let center = GeoPoint::new(48.8566, 2.3522).unwrap();

        let bike = add_item(&store, &index, 48.857, 2.353, Category::Bicycle);
        let _phone = add_item(&store, &index, 48.858, 2.354, Category::Phone);

        let filters = QueryFilters {
            category: Some(Category::Bicycle),
            ..QueryFilters::default()
        };
        let hits = index
            .query_radius(&center, 2_000.0, &filters, QUERY_TIMEOUT)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, bike);
    }

    #[test]
    fn query_spans_the_antimeridian() {
        let (store, index) = setup();
        let west = add_item(&store, &index, 0.0, 179.99, Category::Phone);
        let east = add_item(&store, &index, 0.0, -179.99, Category::Phone);

        let center = GeoPoint::new(0.0, 179.995).unwrap();
        let hits = index
            .query_radius(&center, 10_000.0, &QueryFilters::default(), QUERY_TIMEOUT)
            .unwrap();
        let ids: Vec<ItemId> = hits.iter().map(|(id, _)| *id).collect();
        assert!(ids.contains(&west));
        assert!(ids.contains(&east));
    }

    #[test]
    fn zero_timeout_surfaces_timeout_error() {
        let (store, index) = setup();
        for i in 0..50 {
            add_item(
                &store,
                &index,
                48.0 + f64::from(i) * 0.01,
                2.0,
                Category::Bicycle,
            );
        }
        let center = GeoPoint::new(48.25, 2.0).unwrap();
        let err = index
            .query_radius(
                &center,
                100_000.0,
                &QueryFilters::default(),
                Duration::ZERO,
            )
            .unwrap_err();
        assert_eq!(err.code(), "timeout");
    }
}
