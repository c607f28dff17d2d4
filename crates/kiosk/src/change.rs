//! State snapshots and per-client change detection.
//!
//! A [`StateSnapshot`] is the minimal tuple whose equality decides whether a
//! display has to refresh. Each client owns a [`ChangeDetector`] holding the
//! last snapshot it applied and its play position; feeding it a new snapshot
//! yields a [`Refresh`] saying what to do.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::CropRect;
use crate::shuffle::ShuffleSeed;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub items: Vec<String>,
    pub cadence_secs: u32,
    pub crop_fingerprint: String,
    pub shuffle_seed: ShuffleSeed,
    /// Canonical period (1..=6), only while the schedule drives selection.
    pub schedule_period: Option<u8>,
}

impl StateSnapshot {
    /// Short content hash of the whole snapshot, for cheap poll comparisons.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for id in &self.items {
            hasher.update(id.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&self.cadence_secs.to_le_bytes());
        hasher.update(self.crop_fingerprint.as_bytes());
        hasher.update(&self.shuffle_seed.0.to_le_bytes());
        hasher.update(&[self.schedule_period.unwrap_or(0)]);
        short_hex(hasher.finalize())
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            item_count: self.items.len(),
            cadence_secs: self.cadence_secs,
            shuffle_seed: self.shuffle_seed,
            schedule_period: self.schedule_period,
            fingerprint: self.fingerprint(),
        }
    }
}

/// What push clients receive instead of the full item list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub item_count: usize,
    pub cadence_secs: u32,
    pub shuffle_seed: ShuffleSeed,
    pub schedule_period: Option<u8>,
    pub fingerprint: String,
}

fn short_hex(hash: blake3::Hash) -> String {
    let hex = hash.to_hex();
    hex.as_str()[..32].to_string()
}

/// Hash of the crops of the given items. Items without a crop contribute nothing.
pub fn crop_fingerprint<'a>(crops: impl IntoIterator<Item = (&'a str, &'a CropRect)>) -> String {
    let sorted: BTreeMap<&str, &CropRect> = crops.into_iter().collect();
    let mut hasher = blake3::Hasher::new();
    for (id, rect) in sorted {
        hasher.update(id.as_bytes());
        hasher.update(&[0]);
        for value in [rect.x, rect.y, rect.w, rect.h, rect.source_w, rect.source_h] {
            hasher.update(&value.to_le_bytes());
        }
    }
    short_hex(hasher.finalize())
}

/// Which snapshot fields differ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FieldChanges {
    pub items: bool,
    pub cadence: bool,
    pub crops: bool,
    pub seed: bool,
    pub period: bool,
}

impl FieldChanges {
    pub fn between(previous: &StateSnapshot, next: &StateSnapshot) -> Self {
        Self {
            items: previous.items != next.items,
            cadence: previous.cadence_secs != next.cadence_secs,
            crops: previous.crop_fingerprint != next.crop_fingerprint,
            seed: previous.shuffle_seed != next.shuffle_seed,
            period: previous.schedule_period != next.schedule_period,
        }
    }

    pub fn any(&self) -> bool {
        self.items || self.cadence || self.crops || self.seed || self.period
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshKind {
    /// Nothing changed; keep playing.
    Unchanged,
    /// First snapshot for this client.
    Initial,
    /// Seed changed; start over from the first item.
    Reshuffled,
    /// Same seed, different members; position kept by item id where possible.
    Membership,
    /// Only cadence or crops changed; order and position untouched.
    Presentation,
    /// Resolution failed; the last good snapshot stays on screen.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refresh {
    pub kind: RefreshKind,
    pub position: usize,
    /// Apply now instead of waiting for the cadence timer (period boundary).
    pub immediate: bool,
}

impl Refresh {
    pub fn is_change(&self) -> bool {
        !matches!(self.kind, RefreshKind::Unchanged | RefreshKind::Fallback)
    }
}

/// Per-client record of what is on screen.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    applied: Option<StateSnapshot>,
    position: usize,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Option<&StateSnapshot> {
        self.applied.as_ref()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current_item(&self) -> Option<&str> {
        self.applied
            .as_ref()
            .and_then(|s| s.items.get(self.position))
            .map(String::as_str)
    }

    /// Step forward. Returns `true` when the rotation wrapped to the start.
    pub fn advance(&mut self) -> bool {
        let len = self.len();
        if len == 0 {
            return false;
        }
        self.position = (self.position + 1) % len;
        self.position == 0
    }

    pub fn retreat(&mut self) {
        let len = self.len();
        if len > 0 {
            self.position = (self.position + len - 1) % len;
        }
    }

    /// Move to an item by id. Returns `false` if it is not in the rotation.
    pub fn jump_to(&mut self, id: &str) -> bool {
        match self.index_of(id) {
            Some(index) => {
                self.position = index;
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.applied.as_ref().map_or(0, |s| s.items.len())
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.applied
            .as_ref()
            .and_then(|s| s.items.iter().position(|i| i == id))
    }

    /// Compare a freshly resolved snapshot with the applied one and adopt it.
    pub fn observe(&mut self, next: StateSnapshot) -> Refresh {
        let Some(previous) = self.applied.as_ref() else {
            self.applied = Some(next);
            self.position = 0;
            return Refresh {
                kind: RefreshKind::Initial,
                position: 0,
                immediate: true,
            };
        };

        let changes = FieldChanges::between(previous, &next);
        if !changes.any() {
            return Refresh {
                kind: RefreshKind::Unchanged,
                position: self.position,
                immediate: false,
            };
        }

        let kind = if changes.seed {
            self.position = 0;
            RefreshKind::Reshuffled
        } else if changes.items {
            self.position = reposition(&previous.items, self.position, &next.items);
            RefreshKind::Membership
        } else {
            RefreshKind::Presentation
        };

        self.applied = Some(next);
        Refresh {
            kind,
            position: self.position,
            immediate: changes.period,
        }
    }

    /// Like [`observe`](Self::observe), but a failed resolution keeps the
    /// last good snapshot.
    pub fn observe_result<E>(&mut self, next: Result<StateSnapshot, E>) -> Refresh {
        match next {
            Ok(snapshot) => self.observe(snapshot),
            Err(_) => Refresh {
                kind: RefreshKind::Fallback,
                position: self.position,
                immediate: false,
            },
        }
    }
}

/// Best-effort position in `next` for whatever was showing at `position` in
/// `previous`: the same item if it survived, otherwise the next survivor.
fn reposition(previous: &[String], position: usize, next: &[String]) -> usize {
    if next.is_empty() {
        return 0;
    }
    let survivors = previous.iter().skip(position).chain(previous.iter().take(position));
    for id in survivors {
        if let Some(index) = next.iter().position(|n| n == id) {
            return index;
        }
    }
    position.min(next.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(items: &[&str], seed: u64) -> StateSnapshot {
        StateSnapshot {
            items: items.iter().map(|s| s.to_string()).collect(),
            cadence_secs: 60,
            crop_fingerprint: crop_fingerprint(std::iter::empty()),
            shuffle_seed: ShuffleSeed(seed),
            schedule_period: None,
        }
    }

    #[test]
    fn first_observation_is_initial() {
        let mut detector = ChangeDetector::new();
        let refresh = detector.observe(snapshot(&["a", "b"], 1));
        assert_eq!(refresh.kind, RefreshKind::Initial);
        assert_eq!(detector.current_item(), Some("a"));
    }

    #[test]
    fn identical_snapshot_is_unchanged() {
        let mut detector = ChangeDetector::new();
        detector.observe(snapshot(&["a", "b", "c"], 1));
        detector.advance();
        let refresh = detector.observe(snapshot(&["a", "b", "c"], 1));
        assert_eq!(refresh.kind, RefreshKind::Unchanged);
        assert!(!refresh.is_change());
        assert_eq!(detector.position(), 1);
    }

    #[test]
    fn seed_change_resets_position() {
        let mut detector = ChangeDetector::new();
        detector.observe(snapshot(&["a", "b", "c"], 1));
        detector.advance();
        detector.advance();
        let refresh = detector.observe(snapshot(&["c", "a", "b"], 2));
        assert_eq!(refresh.kind, RefreshKind::Reshuffled);
        assert_eq!(refresh.position, 0);
    }

    #[test]
    fn membership_change_keeps_current_item() {
        let mut detector = ChangeDetector::new();
        detector.observe(snapshot(&["a", "b", "c", "d"], 1));
        detector.jump_to("c");
        let refresh = detector.observe(snapshot(&["b", "c", "d"], 1));
        assert_eq!(refresh.kind, RefreshKind::Membership);
        assert_eq!(detector.current_item(), Some("c"));
    }

    #[test]
    fn removed_current_item_moves_to_next_survivor() {
        let mut detector = ChangeDetector::new();
        detector.observe(snapshot(&["a", "b", "c", "d"], 1));
        detector.jump_to("b");
        detector.observe(snapshot(&["a", "c", "d"], 1));
        assert_eq!(detector.current_item(), Some("c"));

        detector.observe(snapshot(&[], 1));
        assert_eq!(detector.position(), 0);
        assert_eq!(detector.current_item(), None);
    }

    #[test]
    fn cadence_only_change_is_presentation() {
        let mut detector = ChangeDetector::new();
        detector.observe(snapshot(&["a", "b"], 1));
        detector.advance();
        let mut next = snapshot(&["a", "b"], 1);
        next.cadence_secs = 30;
        let refresh = detector.observe(next);
        assert_eq!(refresh.kind, RefreshKind::Presentation);
        assert_eq!(refresh.position, 1);
    }

    #[test]
    fn period_change_is_immediate() {
        let mut detector = ChangeDetector::new();
        let mut first = snapshot(&["a"], 1);
        first.schedule_period = Some(1);
        detector.observe(first);

        let mut next = snapshot(&["a"], 1);
        next.schedule_period = Some(2);
        let refresh = detector.observe(next);
        assert!(refresh.immediate);
        assert!(refresh.is_change());
    }

    #[test]
    fn failed_resolution_keeps_last_good() {
        let mut detector = ChangeDetector::new();
        detector.observe(snapshot(&["a", "b"], 1));
        let refresh = detector.observe_result::<&str>(Err("boom"));
        assert_eq!(refresh.kind, RefreshKind::Fallback);
        assert_eq!(detector.applied().map(|s| s.items.len()), Some(2));
    }

    #[test]
    fn advance_reports_wrap() {
        let mut detector = ChangeDetector::new();
        detector.observe(snapshot(&["a", "b"], 1));
        assert!(!detector.advance());
        assert!(detector.advance());
        detector.retreat();
        assert_eq!(detector.current_item(), Some("b"));
    }

    #[test]
    fn crop_fingerprint_ignores_order() {
        let r1 = CropRect { x: 0, y: 0, w: 10, h: 10, source_w: 20, source_h: 20 };
        let r2 = CropRect { x: 5, ..r1 };
        let a = crop_fingerprint([("one", &r1), ("two", &r2)]);
        let b = crop_fingerprint([("two", &r2), ("one", &r1)]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, crop_fingerprint([("one", &r1)]));
    }

    #[test]
    fn fingerprint_tracks_every_field() {
        let base = snapshot(&["a", "b"], 1);
        let mut other = base.clone();
        other.schedule_period = Some(3);
        assert_eq!(base.fingerprint(), base.clone().fingerprint());
        assert_ne!(base.fingerprint(), other.fingerprint());
    }
}
