/// Station registry for the bike-share tracker.
///
/// Holds the canonical current state of every known docking station, keyed
/// by station id. The registry is owned by the poll loop and is only ever
/// mutated through `reconcile`, which merges a freshly fetched record and
/// decides whether the change is worth publishing.
///
/// # Clock injection
/// `reconcile` takes the fetch time as a parameter rather than calling
/// `Utc::now()` internally, so reconciliation is deterministic in tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::model::{ServiceError, Station, StationFields};

// ---------------------------------------------------------------------------
// Reconciliation outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// First successful fetch for this id.
    Created,
    /// At least one tracked field differs from the stored value.
    Changed,
    /// Only `updated_at` advanced.
    Unchanged,
}

impl Reconciliation {
    /// Whether the current-state file must be republished.
    pub fn publish_required(self) -> bool {
        !matches!(self, Reconciliation::Unchanged)
    }
}

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

/// Returns `true` if any tracked field differs between two versions of a
/// station: empty count, ready count, online flag, description or chart URL.
///
/// Position and id never change once set, and `updated_at` advances on every
/// fetch, so neither takes part in the comparison.
pub fn has_changed(before: &Station, after: &Station) -> bool {
    before.empty_count != after.empty_count
        || before.ready_count != after.ready_count
        || before.online != after.online
        || before.description != after.description
        || before.graph_url != after.graph_url
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct StationRegistry {
    stations: BTreeMap<String, Station>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry from previously published records. When an id
    /// appears more than once, the last record wins.
    pub fn from_stations(stations: impl IntoIterator<Item = Station>) -> Self {
        let stations = stations
            .into_iter()
            .map(|station| (station.id.clone(), station))
            .collect();
        Self { stations }
    }

    pub fn get(&self, station_id: &str) -> Option<&Station> {
        self.stations.get(station_id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Stations in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    /// Owned copy of all records in id order, ready for serialization.
    pub fn snapshot(&self) -> Vec<Station> {
        self.stations.values().cloned().collect()
    }

    /// Merge freshly fetched fields into the station `station_id`.
    ///
    /// Counts missing from the payload default to 0; description and online
    /// flag fall back to the stored value. `graph_url` always replaces the
    /// stored chart URL. `updated_at` is set to `fetched_at` whether or not
    /// anything changed.
    ///
    /// A station seen for the first time must carry a position, otherwise it
    /// cannot be placed on the map and the record is rejected as malformed.
    pub fn reconcile(
        &mut self,
        station_id: &str,
        fields: StationFields,
        graph_url: Option<String>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Reconciliation, ServiceError> {
        let ready_count = fields.ready_count.unwrap_or(0);
        let empty_count = fields.empty_count.unwrap_or(0);

        if let Some(stored) = self.stations.get_mut(station_id) {
            let candidate = Station {
                id: stored.id.clone(),
                position: stored.position,
                ready_count,
                empty_count,
                online: fields.online.unwrap_or(stored.online),
                description: fields.description.unwrap_or_else(|| stored.description.clone()),
                updated_at: fetched_at,
                graph_url,
            };
            let changed = has_changed(stored, &candidate);
            *stored = candidate;
            return Ok(if changed {
                Reconciliation::Changed
            } else {
                Reconciliation::Unchanged
            });
        }

        let position = fields.position.ok_or_else(|| {
            ServiceError::MalformedRecord(format!("new station {} has no coordinates", station_id))
        })?;

        self.stations.insert(
            station_id.to_string(),
            Station {
                id: station_id.to_string(),
                position,
                ready_count,
                empty_count,
                online: fields.online.unwrap_or(true),
                description: fields.description.unwrap_or_default(),
                updated_at: fetched_at,
                graph_url,
            },
        );
        Ok(Reconciliation::Created)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Position;
    use chrono::TimeZone;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, minute, 0).unwrap()
    }

    fn fields(ready: u32, empty: u32, online: bool, description: &str) -> StationFields {
        StationFields {
            description: Some(description.to_string()),
            position: Some(Position { latitude: 59.91, longitude: 10.75 }),
            ready_count: Some(ready),
            empty_count: Some(empty),
            online: Some(online),
        }
    }

    fn seeded(ready: u32, empty: u32) -> StationRegistry {
        let mut registry = StationRegistry::new();
        registry
            .reconcile("A", fields(ready, empty, true, "Main St"), None, t(0))
            .expect("seed reconcile should succeed");
        registry
    }

    // --- Creation -----------------------------------------------------------

    #[test]
    fn test_new_station_is_created_and_requires_publish() {
        let mut registry = StationRegistry::new();
        let outcome = registry
            .reconcile("A", fields(3, 2, true, "Main St"), None, t(0))
            .unwrap();
        assert_eq!(outcome, Reconciliation::Created);
        assert!(outcome.publish_required());

        let station = registry.get("A").expect("A should be registered");
        assert_eq!(station.ready_count, 3);
        assert_eq!(station.empty_count, 2);
        assert!(station.online);
        assert_eq!(station.description, "Main St");
        assert_eq!(station.updated_at, t(0));
    }

    #[test]
    fn test_new_station_without_position_is_rejected() {
        let mut registry = StationRegistry::new();
        let mut partial = fields(3, 2, true, "Main St");
        partial.position = None;
        let result = registry.reconcile("A", partial, None, t(0));
        assert!(matches!(result, Err(ServiceError::MalformedRecord(_))));
        assert!(registry.is_empty(), "rejected record must not create a station");
    }

    // --- Change detection ---------------------------------------------------

    #[test]
    fn test_identical_fields_refresh_timestamp_without_publish() {
        let mut registry = seeded(3, 2);
        let outcome = registry
            .reconcile("A", fields(3, 2, true, "Main St"), None, t(5))
            .unwrap();
        assert_eq!(outcome, Reconciliation::Unchanged);
        assert!(!outcome.publish_required());
        assert_eq!(registry.get("A").unwrap().updated_at, t(5));
    }

    #[test]
    fn test_each_tracked_field_triggers_publish() {
        let cases: Vec<(&str, StationFields, Option<String>)> = vec![
            ("ready", fields(4, 2, true, "Main St"), None),
            ("empty", fields(3, 1, true, "Main St"), None),
            ("online", fields(3, 2, false, "Main St"), None),
            ("description", fields(3, 2, true, "Main Street"), None),
            ("graph", fields(3, 2, true, "Main St"), Some("https://chart/x".to_string())),
        ];
        for (name, update, graph_url) in cases {
            let mut registry = seeded(3, 2);
            let outcome = registry.reconcile("A", update, graph_url, t(5)).unwrap();
            assert_eq!(outcome, Reconciliation::Changed, "{} change should publish", name);
        }
    }

    #[test]
    fn test_position_is_immutable_once_set() {
        let mut registry = seeded(3, 2);
        let mut moved = fields(3, 2, true, "Main St");
        moved.position = Some(Position { latitude: 1.0, longitude: 2.0 });
        let outcome = registry.reconcile("A", moved, None, t(5)).unwrap();
        assert_eq!(outcome, Reconciliation::Unchanged);
        assert_eq!(
            registry.get("A").unwrap().position,
            Position { latitude: 59.91, longitude: 10.75 }
        );
    }

    #[test]
    fn test_missing_counts_default_to_zero() {
        let mut registry = seeded(3, 2);
        let update = StationFields {
            online: Some(true),
            ..StationFields::default()
        };
        let outcome = registry.reconcile("A", update, None, t(5)).unwrap();
        assert_eq!(outcome, Reconciliation::Changed);
        let station = registry.get("A").unwrap();
        assert_eq!((station.ready_count, station.empty_count), (0, 0));
        assert_eq!(station.description, "Main St", "missing description keeps stored value");
    }

    #[test]
    fn test_has_changed_ignores_timestamp_and_position() {
        let registry = seeded(3, 2);
        let before = registry.get("A").unwrap().clone();
        let mut after = before.clone();
        after.updated_at = t(30);
        after.position = Position { latitude: 0.0, longitude: 0.0 };
        assert!(!has_changed(&before, &after));
        after.graph_url = Some("https://chart/y".to_string());
        assert!(has_changed(&before, &after));
    }

    // --- Seeding ------------------------------------------------------------

    #[test]
    fn test_from_stations_keeps_one_entry_per_id() {
        let first = seeded(1, 1).snapshot().remove(0);
        let mut second = first.clone();
        second.ready_count = 9;
        let registry = StationRegistry::from_stations(vec![first, second]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("A").unwrap().ready_count, 9);
    }
}
