//! Schedule clock: maps "now" to a two-hour period slot.
//!
//! The clock source is injectable. A single process-wide virtual time can be
//! frozen in place for test mode; while set, every resolution in the process
//! sees the same instant. Persisted timestamps never go through this clock.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, FixedOffset, Local, Timelike, Utc};
use serde::Serialize;

/// Source of the current instant.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Which occurrence of a canonical period within the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayHalf {
    /// 06:00 to 18:00
    Day,
    /// 18:00 to 06:00
    Night,
}

/// A two-hour slot. Slot 1 starts at 06:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodSlot {
    /// Stored period, 1..=6.
    pub canonical: u8,
    /// UI-facing slot, 1..=12.
    pub label: u8,
    pub half: DayHalf,
}

impl PeriodSlot {
    pub fn from_hour(hour: u32) -> Self {
        let shifted = (hour % 24 + 24 - 6) % 24;
        let slot = (shifted / 2) % 6;
        let half = if shifted / 12 == 0 {
            DayHalf::Day
        } else {
            DayHalf::Night
        };
        let canonical = slot as u8 + 1;
        let label = match half {
            DayHalf::Day => canonical,
            DayHalf::Night => canonical + 6,
        };
        Self {
            canonical,
            label,
            half,
        }
    }
}

/// Offset of the host's local time zone right now.
pub fn local_offset() -> FixedOffset {
    *Local::now().offset()
}

pub struct ScheduleClock {
    source: Arc<dyn Clock>,
    offset: FixedOffset,
    virtual_now: RwLock<Option<DateTime<Utc>>>,
}

impl ScheduleClock {
    pub fn new(source: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        Self {
            source,
            offset,
            virtual_now: RwLock::new(None),
        }
    }

    pub fn system(offset: FixedOffset) -> Self {
        Self::new(Arc::new(SystemClock), offset)
    }

    /// Build from the configured offset in minutes, or the host's offset.
    pub fn from_offset_minutes(minutes: Option<i32>) -> Self {
        let offset = minutes
            .and_then(|m| FixedOffset::east_opt(m.saturating_mul(60)))
            .unwrap_or_else(local_offset);
        Self::system(offset)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The instant every resolution should use: virtual if set, else the source.
    pub fn now(&self) -> DateTime<Utc> {
        self.virtual_time().unwrap_or_else(|| self.source.now())
    }

    pub fn virtual_time(&self) -> Option<DateTime<Utc>> {
        *self
            .virtual_now
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_virtual(&self, at: Option<DateTime<Utc>>) {
        *self
            .virtual_now
            .write()
            .unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn period_at(&self, at: DateTime<Utc>) -> PeriodSlot {
        PeriodSlot::from_hour(at.with_timezone(&self.offset).hour())
    }

    pub fn current_period(&self) -> PeriodSlot {
        self.period_at(self.now())
    }
}

impl std::fmt::Debug for ScheduleClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleClock")
            .field("offset", &self.offset)
            .field("virtual_now", &self.virtual_time())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
    }

    #[test]
    fn slots_follow_two_hour_blocks_from_six() {
        let expected = [
            (6, 1, 1),
            (7, 1, 1),
            (8, 2, 2),
            (16, 6, 6),
            (17, 6, 6),
            (18, 1, 7),
            (23, 3, 9),
            (0, 4, 10),
            (4, 6, 12),
            (5, 6, 12),
        ];
        for (hour, canonical, label) in expected {
            let slot = PeriodSlot::from_hour(hour);
            assert_eq!(
                (slot.canonical, slot.label),
                (canonical, label),
                "hour {}",
                hour
            );
        }
        assert_eq!(PeriodSlot::from_hour(12).half, DayHalf::Day);
        assert_eq!(PeriodSlot::from_hour(2).half, DayHalf::Night);
    }

    #[test]
    fn virtual_time_overrides_the_source() {
        let source = Arc::new(ManualClock::new(utc(10, 0)));
        let clock = ScheduleClock::new(source.clone(), FixedOffset::east_opt(0).unwrap());
        assert_eq!(clock.current_period().label, 3);

        clock.set_virtual(Some(utc(23, 55)));
        assert_eq!(clock.current_period().label, 9);
        source.advance(chrono::Duration::hours(5));
        assert_eq!(clock.now(), utc(23, 55));

        clock.set_virtual(None);
        assert_eq!(clock.now(), utc(15, 0));
    }

    #[test]
    fn offset_shifts_the_hour() {
        let clock = ScheduleClock::new(
            Arc::new(ManualClock::new(utc(5, 30))),
            FixedOffset::east_opt(2 * 3600).unwrap(),
        );
        // 05:30 UTC is 07:30 at +02:00.
        assert_eq!(clock.current_period().canonical, 1);
        assert_eq!(clock.current_period().half, DayHalf::Day);
    }
}
