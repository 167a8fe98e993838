//! Observation ledger.
//!
//! Append-only store of line observations keyed by (subject, market).
//! Each key has its own lock so appends for one stream are serialized
//! while other streams proceed independently. Reads hand out immutable
//! snapshots; nothing is ever deleted.

pub mod outcomes;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::types::{MarketKey, Observation, ObservationRecord, Side, ValidationError};

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// Inclusive time range for a query. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// Everything ever recorded.
    pub fn all() -> Self {
        Self::default()
    }

    /// The `lookback` period ending at `end`.
    pub fn lookback(end: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            start: Some(end - lookback),
            end: Some(end),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

/// Ordered, immutable snapshot of one stream within a window.
///
/// Cloning is cheap and iteration can be restarted any number of times.
#[derive(Debug, Clone)]
pub struct ObservationWindow {
    key: MarketKey,
    observations: Arc<[Observation]>,
}

impl ObservationWindow {
    pub fn new(key: MarketKey, observations: Vec<Observation>) -> Self {
        Self {
            key,
            observations: observations.into(),
        }
    }

    pub fn key(&self) -> &MarketKey {
        &self.key
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    /// Observations quoted on one side, in timestamp order.
    pub fn side(&self, side: Side) -> impl Iterator<Item = &Observation> + '_ {
        self.observations.iter().filter(move |o| o.side == side)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn as_slice(&self) -> &[Observation] {
        &self.observations
    }

    pub fn has_late_arrivals(&self) -> bool {
        self.observations.iter().any(|o| o.late)
    }
}

impl<'a> IntoIterator for &'a ObservationWindow {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// How an accepted observation was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Appended,
    /// Older than the newest stored point but within tolerance.
    LateArrival,
}

type Stream = Arc<Mutex<Vec<Observation>>>;

pub struct ObservationStore {
    streams: RwLock<HashMap<MarketKey, Stream>>,
    late_tolerance: Duration,
}

impl ObservationStore {
    pub fn new(late_tolerance: Duration) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            late_tolerance,
        }
    }

    /// Validate and append a feed record.
    pub fn record(&self, record: ObservationRecord) -> Result<RecordStatus, ValidationError> {
        let observation = validate(record)?;
        let stream = self.stream_for(&observation.key());
        let mut stream = stream.lock();

        let mut status = RecordStatus::Appended;
        let mut observation = observation;
        if let Some(last) = stream.last() {
            if observation.timestamp < last.timestamp {
                if observation.timestamp < last.timestamp - self.late_tolerance {
                    warn!(
                        key = %observation.key(),
                        timestamp = %observation.timestamp,
                        last = %last.timestamp,
                        "Rejected out-of-order observation"
                    );
                    return Err(ValidationError::OutOfOrder {
                        timestamp: observation.timestamp,
                        last: last.timestamp,
                    });
                }
                observation.late = true;
                status = RecordStatus::LateArrival;
            }
        }

        let at = stream.partition_point(|o| o.timestamp <= observation.timestamp);
        debug!(
            key = %observation.key(),
            book = %observation.book,
            side = %observation.side,
            line = observation.line,
            price = observation.price,
            late = observation.late,
            "Observation recorded"
        );
        stream.insert(at, observation);
        Ok(status)
    }

    /// Snapshot of one stream restricted to `window`, in timestamp order.
    pub fn query(&self, key: &MarketKey, window: TimeWindow) -> ObservationWindow {
        let observations = match self.streams.read().get(key) {
            Some(stream) => stream
                .lock()
                .iter()
                .filter(|o| window.contains(o.timestamp))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        ObservationWindow::new(key.clone(), observations)
    }

    /// Most recent observation for a key and side.
    pub fn latest(&self, key: &MarketKey, side: Side) -> Option<Observation> {
        let streams = self.streams.read();
        let stream = streams.get(key)?.lock();
        stream.iter().rev().find(|o| o.side == side).cloned()
    }

    /// All tracked keys, sorted.
    pub fn keys(&self) -> Vec<MarketKey> {
        let mut keys: Vec<MarketKey> = self.streams.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Total stored observations across all streams.
    pub fn len(&self) -> usize {
        self.streams.read().values().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full copy of every stream (for persistence).
    pub fn export(&self) -> Vec<(MarketKey, Vec<Observation>)> {
        let streams = self.streams.read();
        let mut out: Vec<(MarketKey, Vec<Observation>)> = streams
            .iter()
            .map(|(k, s)| (k.clone(), s.lock().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Load previously exported streams, replacing any existing stream for the key.
    pub fn restore(&self, streams: Vec<(MarketKey, Vec<Observation>)>) {
        let mut map = self.streams.write();
        for (key, mut observations) in streams {
            observations.sort_by_key(|o| o.timestamp);
            map.insert(key, Arc::new(Mutex::new(observations)));
        }
    }

    fn stream_for(&self, key: &MarketKey) -> Stream {
        if let Some(stream) = self.streams.read().get(key) {
            return Arc::clone(stream);
        }
        let mut map = self.streams.write();
        Arc::clone(map.entry(key.clone()).or_default())
    }
}

impl Default for ObservationStore {
    fn default() -> Self {
        Self::new(Duration::seconds(300))
    }
}

/// Turn a feed record into a stored observation, or explain why not.
fn validate(record: ObservationRecord) -> Result<Observation, ValidationError> {
    if record.subject_id.trim().is_empty() || record.market.trim().is_empty() {
        return Err(ValidationError::BlankKey);
    }
    if !(record.price > 0.0) || !record.price.is_finite() {
        return Err(ValidationError::NonPositivePrice(record.price));
    }
    if record.price < 1.0 {
        return Err(ValidationError::PriceBelowEven(record.price));
    }
    let line = record.line.ok_or(ValidationError::MissingLine)?;
    if !line.is_finite() {
        return Err(ValidationError::NonFiniteLine(line));
    }
    Ok(Observation {
        subject_id: record.subject_id,
        market: record.market,
        book: record.book,
        side: record.side,
        line,
        price: record.price,
        timestamp: record.timestamp,
        late: false,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    fn rec(side: Side, line: Option<f64>, price: f64, at: DateTime<Utc>) -> ObservationRecord {
        ObservationRecord {
            subject_id: "judge".to_string(),
            market: "batter_hits".to_string(),
            book: "dk".to_string(),
            side,
            line,
            price,
            timestamp: at,
        }
    }

    fn key() -> MarketKey {
        MarketKey::new("judge", "batter_hits")
    }

    #[test]
    fn test_record_and_query_in_order() {
        let store = ObservationStore::default();
        store.record(rec(Side::Over, Some(0.5), 1.9, ts(0))).unwrap();
        store.record(rec(Side::Over, Some(0.5), 1.8, ts(10))).unwrap();
        store.record(rec(Side::Under, Some(0.5), 2.0, ts(20))).unwrap();

        let window = store.query(&key(), TimeWindow::all());
        assert_eq!(window.len(), 3);
        let times: Vec<_> = window.iter().map(|o| o.timestamp).collect();
        assert_eq!(times, vec![ts(0), ts(10), ts(20)]);
        assert_eq!(window.side(Side::Over).count(), 2);
    }

    #[test]
    fn test_rejects_non_positive_price() {
        let store = ObservationStore::default();
        let err = store.record(rec(Side::Over, Some(0.5), 0.0, ts(0))).unwrap_err();
        assert_eq!(err, ValidationError::NonPositivePrice(0.0));
        assert!(store.record(rec(Side::Over, Some(0.5), -1.9, ts(0))).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejects_price_below_even() {
        let store = ObservationStore::default();
        let err = store.record(rec(Side::Over, Some(0.5), 0.8, ts(0))).unwrap_err();
        assert_eq!(err, ValidationError::PriceBelowEven(0.8));
    }

    #[test]
    fn test_rejects_missing_line() {
        let store = ObservationStore::default();
        let err = store.record(rec(Side::Over, None, 1.9, ts(0))).unwrap_err();
        assert_eq!(err, ValidationError::MissingLine);
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejects_blank_subject() {
        let store = ObservationStore::default();
        let mut r = rec(Side::Over, Some(0.5), 1.9, ts(0));
        r.subject_id = "  ".to_string();
        assert_eq!(store.record(r).unwrap_err(), ValidationError::BlankKey);
    }

    #[test]
    fn test_late_arrival_within_tolerance_is_flagged() {
        let store = ObservationStore::new(Duration::minutes(5));
        store.record(rec(Side::Over, Some(0.5), 1.9, ts(10))).unwrap();
        let status = store.record(rec(Side::Over, Some(0.5), 1.95, ts(7))).unwrap();
        assert_eq!(status, RecordStatus::LateArrival);

        let window = store.query(&key(), TimeWindow::all());
        // Stored in timestamp order, late point first
        assert_eq!(window.as_slice()[0].timestamp, ts(7));
        assert!(window.as_slice()[0].late);
        assert!(!window.as_slice()[1].late);
        assert!(window.has_late_arrivals());
    }

    #[test]
    fn test_out_of_order_beyond_tolerance_rejected() {
        let store = ObservationStore::new(Duration::minutes(5));
        store.record(rec(Side::Over, Some(0.5), 1.9, ts(30))).unwrap();
        let err = store.record(rec(Side::Over, Some(0.5), 1.9, ts(10))).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfOrder { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_query_window_bounds_inclusive() {
        let store = ObservationStore::default();
        for m in [0, 10, 20, 30] {
            store.record(rec(Side::Over, Some(0.5), 1.9, ts(m))).unwrap();
        }
        let window = store.query(
            &key(),
            TimeWindow {
                start: Some(ts(10)),
                end: Some(ts(20)),
            },
        );
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_window_is_restartable_snapshot() {
        let store = ObservationStore::default();
        store.record(rec(Side::Over, Some(0.5), 1.9, ts(0))).unwrap();
        let window = store.query(&key(), TimeWindow::all());
        store.record(rec(Side::Over, Some(0.5), 1.8, ts(5))).unwrap();

        // Snapshot does not see the later append, and can be iterated twice
        assert_eq!(window.iter().count(), 1);
        assert_eq!((&window).into_iter().count(), 1);
        assert_eq!(store.query(&key(), TimeWindow::all()).len(), 2);
    }

    #[test]
    fn test_latest_by_side() {
        let store = ObservationStore::default();
        store.record(rec(Side::Over, Some(0.5), 1.9, ts(0))).unwrap();
        store.record(rec(Side::Under, Some(0.5), 1.9, ts(5))).unwrap();
        store.record(rec(Side::Over, Some(1.5), 2.6, ts(9))).unwrap();
        let latest = store.latest(&key(), Side::Over).unwrap();
        assert_eq!(latest.line, 1.5);
        assert!(store.latest(&MarketKey::new("nobody", "x"), Side::Over).is_none());
    }

    #[test]
    fn test_unknown_key_queries_empty() {
        let store = ObservationStore::default();
        assert!(store.query(&MarketKey::new("a", "b"), TimeWindow::all()).is_empty());
    }

    #[test]
    fn test_export_restore() {
        let store = ObservationStore::default();
        store.record(rec(Side::Over, Some(0.5), 1.9, ts(0))).unwrap();
        let exported = store.export();

        let other = ObservationStore::default();
        other.restore(exported);
        assert_eq!(other.len(), 1);
        assert_eq!(other.keys(), vec![key()]);
    }
}
