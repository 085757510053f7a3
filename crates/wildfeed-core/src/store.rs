// Persisted client-side state: last stats, active polygon, view mode
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;
use wildfeed_cache::CacheManager;

use crate::models::{GeoPoint, StatsSnapshot, ViewMode};
use crate::Result;

const STATS_SNAPSHOT: &str = "stats.snapshot";
const ACTIVE_POLYGON: &str = "filters.polygon";
const VIEW_MODE: &str = "view.mode";
const VIEW_SWITCHED: &str = "view.switched_at";

fn view_snapshot_key(view: ViewMode) -> String {
    format!("{}.{}", STATS_SNAPSHOT, view.as_str())
}

/// Key-value store the engine reads and writes but doesn't own
pub trait StateStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>>;
    fn set_raw(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    /// Milliseconds since the epoch of the last write to `key`
    fn updated_at(&self, key: &str) -> Result<Option<i64>>;
}

impl StateStore for CacheManager {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(CacheManager::get_raw(self, key)?)
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        Ok(CacheManager::set_raw(self, key, value)?)
    }

    fn delete(&self, key: &str) -> Result<()> {
        Ok(CacheManager::delete(self, key)?)
    }

    fn updated_at(&self, key: &str) -> Result<Option<i64>> {
        Ok(CacheManager::updated_at(self, key)?)
    }
}

/// Process-local store for tests and `--ephemeral` runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, i64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, i64)>> {
        // A panic mid-insert can't leave a HashMap half-written, so keep going
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).map(|(v, _)| v.clone()))
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(
            key.to_string(),
            (value.to_string(), Utc::now().timestamp_millis()),
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn updated_at(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.entries().get(key).map(|(_, ts)| *ts))
    }
}

/// Typed view over a [`StateStore`]
///
/// Reads never fail: an empty store, a missing key or a corrupt value all
/// read as `None`. Write failures are logged and swallowed since nothing in
/// the feed depends on them succeeding.
#[derive(Clone)]
pub struct PersistedState {
    store: Arc<dyn StateStore>,
}

impl PersistedState {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get_raw(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Could not read {} from state store: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring corrupt {} in state store: {}", key, e);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(crate::Error::from)
            .and_then(|raw| self.store.set_raw(key, &raw));
        if let Err(e) = result {
            warn!("Could not write {} to state store: {}", key, e);
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.store.delete(key) {
            warn!("Could not clear {} in state store: {}", key, e);
        }
    }

    pub fn stats_snapshot(&self) -> Option<StatsSnapshot> {
        self.read(STATS_SNAPSHOT)
    }

    pub fn save_stats_snapshot(&self, snapshot: &StatsSnapshot) {
        self.write(STATS_SNAPSHOT, snapshot)
    }

    pub fn view_snapshot(&self, view: ViewMode) -> Option<StatsSnapshot> {
        self.read(&view_snapshot_key(view))
    }

    pub fn save_view_snapshot(&self, view: ViewMode, snapshot: &StatsSnapshot) {
        self.write(&view_snapshot_key(view), snapshot)
    }

    /// Forget every per-view snapshot; they describe filters no longer active
    pub fn clear_view_snapshots(&self) {
        for view in ViewMode::ALL {
            self.remove(&view_snapshot_key(view));
        }
    }

    pub fn active_polygon(&self) -> Option<Vec<GeoPoint>> {
        self.read(ACTIVE_POLYGON)
    }

    pub fn save_active_polygon(&self, polygon: Option<&[GeoPoint]>) {
        match polygon {
            Some(points) => self.write(ACTIVE_POLYGON, &points),
            None => self.remove(ACTIVE_POLYGON),
        }
    }

    pub fn view_mode(&self) -> Option<ViewMode> {
        self.read(VIEW_MODE)
    }

    pub fn save_view_mode(&self, view: ViewMode) {
        self.write(VIEW_MODE, &view)
    }

    pub fn mark_view_switched(&self) {
        self.write(VIEW_SWITCHED, &true)
    }

    /// Whether a view switch happened within `ttl`
    pub fn recently_switched_view(&self, ttl: Duration) -> bool {
        let at = match self.store.updated_at(VIEW_SWITCHED) {
            Ok(Some(at)) => at,
            Ok(None) => return false,
            Err(e) => {
                warn!("Could not read {} from state store: {}", VIEW_SWITCHED, e);
                return false;
            }
        };
        let age_ms = Utc::now().timestamp_millis().saturating_sub(at);
        age_ms >= 0 && (age_ms as u128) < ttl.as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;
    use std::collections::BTreeMap;

    fn snapshot(birds: u64) -> StatsSnapshot {
        StatsSnapshot::from_counts(BTreeMap::from([(Source::Bird, birds)]), 3, 2)
    }

    #[test]
    fn test_empty_store_reads_none() {
        let state = PersistedState::in_memory();
        assert!(state.stats_snapshot().is_none());
        assert!(state.active_polygon().is_none());
        assert!(state.view_mode().is_none());
        assert!(!state.recently_switched_view(Duration::from_secs(2)));
    }

    #[test]
    fn test_snapshots_per_view() {
        let state = PersistedState::in_memory();
        state.save_stats_snapshot(&snapshot(10));
        state.save_view_snapshot(ViewMode::Map, &snapshot(4));

        assert_eq!(state.stats_snapshot(), Some(snapshot(10)));
        assert_eq!(state.view_snapshot(ViewMode::Map), Some(snapshot(4)));
        assert_eq!(state.view_snapshot(ViewMode::Grid), None);
    }

    #[test]
    fn test_clear_view_snapshots() {
        let state = PersistedState::in_memory();
        state.save_stats_snapshot(&snapshot(10));
        state.save_view_snapshot(ViewMode::Grid, &snapshot(4));
        state.save_view_snapshot(ViewMode::Map, &snapshot(5));

        state.clear_view_snapshots();
        assert_eq!(state.view_snapshot(ViewMode::Grid), None);
        assert_eq!(state.view_snapshot(ViewMode::Map), None);
        assert_eq!(state.stats_snapshot(), Some(snapshot(10)));
    }

    #[test]
    fn test_polygon_round_trip_and_clear() {
        let state = PersistedState::in_memory();
        let ring = vec![
            GeoPoint::new(-27.5, 153.0),
            GeoPoint::new(-27.5, 153.1),
            GeoPoint::new(-27.4, 153.1),
        ];
        state.save_active_polygon(Some(&ring));
        assert_eq!(state.active_polygon(), Some(ring));

        state.save_active_polygon(None);
        assert!(state.active_polygon().is_none());
    }

    #[test]
    fn test_view_switch_flag_expires() {
        let state = PersistedState::in_memory();
        state.mark_view_switched();
        assert!(state.recently_switched_view(Duration::from_secs(2)));
        assert!(!state.recently_switched_view(Duration::ZERO));
    }

    #[test]
    fn test_corrupt_value_reads_none() {
        let store = Arc::new(MemoryStore::new());
        store.set_raw(STATS_SNAPSHOT, "{{{").unwrap();
        let state = PersistedState::new(store);
        assert!(state.stats_snapshot().is_none());
    }

    #[test]
    fn test_sqlite_backed_state() {
        let cache = CacheManager::in_memory().unwrap();
        let state = PersistedState::new(Arc::new(cache));
        state.save_view_mode(ViewMode::List);
        assert_eq!(state.view_mode(), Some(ViewMode::List));
    }
}
