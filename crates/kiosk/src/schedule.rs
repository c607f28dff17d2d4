//! Day schedule: which atmospheres play in each two-hour period.
//!
//! Only the six canonical periods are stored. Slots 7..=12 are the second
//! half of the day and read through to the same storage, so slot `i` and slot
//! `i + 6` can never diverge.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{KioskError, Result};

/// Number of stored periods.
pub const CANONICAL_PERIODS: usize = 6;

/// Number of two-hour slots in a day as seen by the UI.
pub const DAY_SLOTS: u8 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(default = "empty_periods")]
    periods: Vec<Vec<String>>,
}

fn empty_periods() -> Vec<Vec<String>> {
    vec![Vec::new(); CANONICAL_PERIODS]
}

impl Default for DaySchedule {
    fn default() -> Self {
        Self {
            periods: empty_periods(),
        }
    }
}

/// One row of the 12-slot view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodView {
    pub slot: u8,
    pub canonical: u8,
    pub atmospheres: Vec<String>,
}

/// Map a 1..=12 slot to its canonical 0-based storage index.
pub fn canonical_index(slot: u8) -> Result<usize> {
    if !(1..=DAY_SLOTS).contains(&slot) {
        return Err(KioskError::validation(format!(
            "schedule period {} is out of range 1..={}",
            slot, DAY_SLOTS
        )));
    }
    Ok(usize::from(slot - 1) % CANONICAL_PERIODS)
}

impl DaySchedule {
    /// Atmospheres configured for a slot (1..=12).
    pub fn period(&self, slot: u8) -> Result<&[String]> {
        let index = canonical_index(slot)?;
        Ok(self.periods[index].as_slice())
    }

    /// Replace the list for a slot. Writing slot 8 writes slot 2 and vice versa.
    pub fn set_period(&mut self, slot: u8, atmospheres: &[String]) -> Result<()> {
        let index = canonical_index(slot)?;
        let mut seen = BTreeSet::new();
        self.periods[index] = atmospheres
            .iter()
            .filter(|a| seen.insert(a.as_str()))
            .cloned()
            .collect();
        Ok(())
    }

    pub fn remove_atmosphere(&mut self, name: &str) {
        for period in self.periods.iter_mut() {
            period.retain(|a| a != name);
        }
    }

    pub fn rename_atmosphere(&mut self, old: &str, new: &str) {
        for period in self.periods.iter_mut() {
            for a in period.iter_mut().filter(|a| a.as_str() == old) {
                *a = new.to_string();
            }
        }
    }

    /// Drop entries the predicate rejects. Returns how many were dropped.
    pub fn retain_known(&mut self, known: impl Fn(&str) -> bool) -> usize {
        let mut dropped = 0;
        for period in self.periods.iter_mut() {
            let before = period.len();
            period.retain(|a| known(a));
            dropped += before - period.len();
        }
        dropped
    }

    /// Force exactly six de-duplicated periods.
    pub fn normalize(&mut self) {
        self.periods.resize_with(CANONICAL_PERIODS, Vec::new);
        for period in self.periods.iter_mut() {
            let mut seen = BTreeSet::new();
            period.retain(|a| seen.insert(a.clone()));
        }
    }

    /// All twelve slots, with 7..=12 mirroring 1..=6.
    pub fn day_view(&self) -> Vec<PeriodView> {
        (1..=DAY_SLOTS)
            .map(|slot| {
                let index = usize::from(slot - 1) % CANONICAL_PERIODS;
                PeriodView {
                    slot,
                    canonical: index as u8 + 1,
                    atmospheres: self.periods[index].clone(),
                }
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.iter().all(Vec::is_empty)
    }
}
