//! Reachability state machine.
//!
//! Folds one probe observation per address per tick into an Online/Offline
//! status and emits a notification only on edges. The offline duration is
//! never stored: it is `now - offline_since`, recomputed on every read so a
//! pause in polling does not skew it.
//!
//! Records live behind a per-address lock; the outer map is only written
//! when an address is seen for the first time.

use crate::outcome::{FailureKind, OperationResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reachability {
    Online,
    Offline,
}

impl Reachability {
    pub fn from_probe(reachable: bool) -> Self {
        if reachable { Reachability::Online } else { Reachability::Offline }
    }
}

/// Per-address record; `offline_since` is set iff `status` is `Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachabilityRecord {
    status: Reachability,
    offline_since: Option<OffsetDateTime>,
}

impl ReachabilityRecord {
    /// Record created by the very first observation of an address.
    pub fn first(status: Reachability, now: OffsetDateTime) -> Self {
        let offline_since = (status == Reachability::Offline).then_some(now);
        Self { status, offline_since }
    }

    pub fn status(&self) -> Reachability {
        self.status
    }

    pub fn offline_since(&self) -> Option<OffsetDateTime> {
        self.offline_since
    }

    /// Seconds spent offline as of `now`, `None` while online.
    pub fn offline_duration(&self, now: OffsetDateTime) -> Option<i64> {
        self.offline_since.map(|since| (now - since).whole_seconds().max(0))
    }

    /// Applies one observation; returns the edge crossed, if any.
    pub fn apply(&mut self, observed: Reachability, now: OffsetDateTime) -> Option<Edge> {
        match (self.status, observed) {
            (Reachability::Online, Reachability::Offline) => {
                self.status = Reachability::Offline;
                self.offline_since = Some(now);
                Some(Edge::WentOffline)
            }
            (Reachability::Offline, Reachability::Online) => {
                let since = self.offline_since.take().unwrap_or(now);
                self.status = Reachability::Online;
                Some(Edge::CameOnline { offline_for: (now - since).whole_seconds().max(0) })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    WentOffline,
    CameOnline { offline_for: i64 },
}

/// Edge-triggered notification handed to loggers and alerting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Transition {
    WentOffline {
        address: String,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    CameOnline {
        address: String,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        offline_for_secs: i64,
    },
}

impl Transition {
    pub fn address(&self) -> &str {
        match self {
            Transition::WentOffline { address, .. } | Transition::CameOnline { address, .. } => address,
        }
    }
}

/// Read model served to the query surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReachabilityView {
    pub status: Reachability,
    #[serde(with = "time::serde::rfc3339::option")]
    pub offline_since: Option<OffsetDateTime>,
    pub offline_duration_secs: Option<i64>,
}

#[derive(Debug, Default)]
pub struct ReachabilityTable {
    records: RwLock<HashMap<String, Mutex<ReachabilityRecord>>>,
}

impl ReachabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one probe observation for `address`.
    pub fn observe(&self, address: &str, reachable: bool, now: OffsetDateTime) -> Option<Transition> {
        let observed = Reachability::from_probe(reachable);

        let edge = {
            let records = self.records.read();
            records.get(address).map(|record| record.lock().apply(observed, now))
        };
        let edge = match edge {
            Some(edge) => edge,
            None => {
                let mut records = self.records.write();
                match records.get(address) {
                    // first observation raced with another writer
                    Some(record) => record.lock().apply(observed, now),
                    None => {
                        records.insert(address.to_string(), Mutex::new(ReachabilityRecord::first(observed, now)));
                        None
                    }
                }
            }
        }?;

        Some(match edge {
            Edge::WentOffline => Transition::WentOffline { address: address.to_string(), at: now },
            Edge::CameOnline { offline_for } => Transition::CameOnline {
                address: address.to_string(),
                at: now,
                offline_for_secs: offline_for,
            },
        })
    }

    /// Folds a probe result; a cancelled probe observed nothing.
    pub fn observe_result(&self, result: &OperationResult, now: OffsetDateTime) -> Option<Transition> {
        if result.outcome.failure_kind() == Some(FailureKind::Cancelled) {
            return None;
        }
        self.observe(&result.address, result.is_success(), now)
    }

    pub fn record(&self, address: &str) -> Option<ReachabilityRecord> {
        self.records.read().get(address).map(|r| *r.lock())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn snapshot(&self, now: OffsetDateTime) -> BTreeMap<String, ReachabilityView> {
        self.records
            .read()
            .iter()
            .map(|(address, record)| {
                let record = *record.lock();
                let view = ReachabilityView {
                    status: record.status,
                    offline_since: record.offline_since,
                    offline_duration_secs: record.offline_duration(now),
                };
                (address.clone(), view)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;
    use time::macros::datetime;
    use time::Duration;

    #[test]
    fn test_probe_sequence_emits_two_edges() {
        let table = ReachabilityTable::new();
        let t0 = datetime!(2026-03-01 08:00 UTC);
        let probes = [true, true, false, false, true];
        let mut notified = Vec::new();

        for (i, reachable) in probes.iter().enumerate() {
            let now = t0 + Duration::seconds(30 * i as i64);
            if let Some(t) = table.observe("10.0.0.1", *reachable, now) {
                notified.push((i, t));
            }
            let record = table.record("10.0.0.1").unwrap();
            assert_eq!(record.offline_since().is_some(), record.status() == Reachability::Offline);
            if i == 2 {
                assert_eq!(record.offline_since(), Some(now));
            }
            if i == 3 {
                assert_eq!(record.offline_since(), Some(t0 + Duration::seconds(60)));
                assert!(record.offline_duration(now).unwrap() >= 0);
                assert_eq!(record.offline_duration(now), Some(30));
            }
        }

        assert_eq!(notified.len(), 2);
        assert_eq!(notified[0].0, 2);
        assert!(matches!(notified[0].1, Transition::WentOffline { .. }));
        assert_eq!(notified[1].0, 4);
        assert!(matches!(notified[1].1, Transition::CameOnline { offline_for_secs: 60, .. }));
        assert!(table.record("10.0.0.1").unwrap().offline_since().is_none());
    }

    #[test]
    fn test_first_observation_sets_state_silently() {
        let table = ReachabilityTable::new();
        let now = datetime!(2026-03-01 08:00 UTC);
        assert!(table.observe("10.0.0.9", false, now).is_none());
        let record = table.record("10.0.0.9").unwrap();
        assert_eq!(record.status(), Reachability::Offline);
        assert_eq!(record.offline_since(), Some(now));

        // still offline: no repeat notification
        assert!(table.observe("10.0.0.9", false, now + Duration::minutes(5)).is_none());
        let view = &table.snapshot(now + Duration::minutes(10))["10.0.0.9"];
        assert_eq!(view.offline_duration_secs, Some(600));
    }

    #[test]
    fn test_duration_never_negative() {
        let now = datetime!(2026-03-01 08:00 UTC);
        let record = ReachabilityRecord::first(Reachability::Offline, now);
        assert_eq!(record.offline_duration(now - Duration::seconds(10)), Some(0));
    }

    #[test]
    fn test_addresses_are_independent() {
        let table = ReachabilityTable::new();
        let now = datetime!(2026-03-01 08:00 UTC);
        table.observe("a", true, now);
        table.observe("b", true, now);
        assert!(table.observe("a", false, now).is_some());
        assert_eq!(table.record("b").unwrap().status(), Reachability::Online);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_cancelled_probe_is_not_an_observation() {
        let table = ReachabilityTable::new();
        let now = datetime!(2026-03-01 08:00 UTC);
        table.observe("10.0.0.1", true, now);
        let cancelled = OperationResult {
            index: 0,
            address: "10.0.0.1".into(),
            outcome: Outcome::failure(FailureKind::Cancelled, "batch cancelled before start"),
            attempts: 0,
            elapsed_ms: 0,
        };
        assert!(table.observe_result(&cancelled, now).is_none());
        assert_eq!(table.record("10.0.0.1").unwrap().status(), Reachability::Online);
    }
}
