//! Accelerometer samples and the timestamp-ordered series store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One decoded (timestamp, x, y, z) record.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Sample {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Sample {
    pub fn new(timestamp: f64, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, x, y, z }
    }

    pub fn value(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Default)]
pub enum Axis {
    X,
    #[default]
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Map key for timestamps. Ordered with `f64::total_cmp` so it can live in a `BTreeMap`.
#[derive(Clone, Copy, Debug)]
pub struct Timestamp(pub f64);

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct SeriesRange {
    pub min_timestamp: f64,
    pub max_timestamp: f64,
    pub min_y: f64,
    pub max_y: f64,
}

/// Timestamp-keyed store of x/y/z triples with running y bounds.
///
/// Each timestamp maps to one `[x, y, z]` record, so the three channels are
/// always written together. The bounds are updated on insert and only reset
/// by [`SeriesStore::clear`]. Growth is unbounded.
#[derive(Clone, Debug)]
pub struct SeriesStore {
    samples: BTreeMap<Timestamp, [f64; 3]>,
    min_y: f64,
    max_y: f64,
}

impl Default for SeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SeriesStore {
    pub fn new() -> Self {
        Self {
            samples: BTreeMap::new(),
            min_y: f64::MAX,
            max_y: f64::MIN,
        }
    }

    pub fn insert(&mut self, s: Sample) {
        self.samples.insert(Timestamp(s.timestamp), [s.x, s.y, s.z]);
        // f64::min/max skip NaN
        self.min_y = self.min_y.min(s.y);
        self.max_y = self.max_y.max(s.y);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.min_y = f64::MAX;
        self.max_y = f64::MIN;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Key span and y bounds, `None` while the store is empty.
    pub fn range(&self) -> Option<SeriesRange> {
        let (first, _) = self.samples.first_key_value()?;
        let (last, _) = self.samples.last_key_value()?;
        Some(SeriesRange {
            min_timestamp: first.0,
            max_timestamp: last.0,
            min_y: self.min_y,
            max_y: self.max_y,
        })
    }

    /// Lazily walks one channel as `(timestamp, value)` in timestamp order.
    pub fn channel(&self, axis: Axis) -> impl Iterator<Item = (f64, f64)> + '_ {
        let i = axis.index();
        self.samples.iter().map(move |(t, v)| (t.0, v[i]))
    }

    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        self.samples
            .iter()
            .map(|(t, [x, y, z])| Sample::new(t.0, *x, *y, *z))
    }
}
