//! The kiosk engine: every boundary operation lives here.
//!
//! [`Kiosk`] ties together the state store, the schedule clock and the
//! command bus. Transports (HTTP, WebSocket) are thin wrappers over it.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use kioskconf::KioskConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::bus::{BusConfig, BusEvent, CommandBus};
use crate::change::{crop_fingerprint, StateSnapshot};
use crate::clock::{PeriodSlot, ScheduleClock};
use crate::command::Command;
use crate::error::{KioskError, Result};
use crate::event_buffer::{BufferStats, LogEntry, LogLevel, PollError, PollResult};
use crate::graph::{CropRect, PROTECTED_NAME};
use crate::schedule::PeriodView;
use crate::selection::{resolve_or_default, Remembered, ResolveContext, Selector};
use crate::shuffle::ShuffleSeed;
use crate::state_store::{MutationKind, StateDocument, StateStore};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_cadence_secs: u32,
    pub check_interval: Duration,
    pub bus: BusConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_cadence_secs: 3600,
            check_interval: Duration::from_secs(2),
            bus: BusConfig::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &KioskConfig) -> Self {
        let display = &config.bootstrap.display;
        Self {
            default_cadence_secs: display.default_cadence_secs.max(1),
            check_interval: Duration::from_secs(display.check_interval_secs.max(1)),
            bus: BusConfig {
                channel_capacity: display.event_channel_capacity,
                log_capacity: display.log_capacity,
                command_ttl: Duration::from_secs(display.command_ttl_secs),
            },
        }
    }
}

/// How a client asks to change the selector.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SelectorRequest {
    Theme { id: String },
    Atmosphere { id: String },
    Schedule,
    /// Leave schedule mode and return to the remembered manual selection.
    Manual,
}

/// Everything a display needs from one resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub snapshot: StateSnapshot,
    pub fingerprint: String,
    pub selector: Selector,
    /// The selector could not be resolved and the default theme was used.
    pub fell_back: bool,
    pub period: PeriodSlot,
    pub cadence_ms: u64,
    pub check_interval_ms: u64,
    pub dissolve: bool,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodChange {
    pub from: PeriodSlot,
    pub to: PeriodSlot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentItem {
    pub id: String,
    pub reported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub id: String,
    /// Theme the item was filed under, if one was active.
    pub theme: Option<String>,
    pub notified: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub active: bool,
    pub now: DateTime<Utc>,
    pub current: PeriodSlot,
    pub periods: Vec<PeriodView>,
    pub remembered: Remembered,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestStatus {
    pub virtual_time: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    pub current_period: PeriodSlot,
    pub cadence_override_ms: Option<u64>,
    pub check_interval_override_ms: Option<u64>,
    pub check_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub subscribers: usize,
    pub revision: u64,
    pub log: BufferStats,
}

#[derive(Debug, Default, Clone, Copy)]
struct Overrides {
    cadence_ms: Option<u64>,
    check_interval_ms: Option<u64>,
}

pub struct Kiosk {
    store: StateStore,
    clock: Arc<ScheduleClock>,
    bus: Arc<CommandBus>,
    settings: EngineSettings,
    overrides: RwLock<Overrides>,
    current_item: RwLock<Option<CurrentItem>>,
    period_watch: Mutex<PeriodSlot>,
    started_at: Instant,
}

impl Kiosk {
    /// Open the engine. `None` keeps state in memory only.
    pub fn open(
        state_file: Option<&Path>,
        settings: EngineSettings,
        clock: Arc<ScheduleClock>,
    ) -> Result<Self> {
        let bus = Arc::new(CommandBus::new(settings.bus.clone()));
        let store = match state_file {
            Some(path) => StateStore::open(path, settings.default_cadence_secs, bus.clone())?,
            None => StateStore::in_memory(settings.default_cadence_secs, bus.clone()),
        };
        let period = clock.current_period();

        Ok(Self {
            store,
            clock,
            bus,
            settings,
            overrides: RwLock::new(Overrides::default()),
            current_item: RwLock::new(None),
            period_watch: Mutex::new(period),
            started_at: Instant::now(),
        })
    }

    pub fn from_config(config: &KioskConfig) -> Result<Self> {
        let clock = Arc::new(ScheduleClock::from_offset_minutes(
            config.bootstrap.schedule.utc_offset_minutes,
        ));
        Self::open(
            Some(config.infra.paths.state_file.as_path()),
            EngineSettings::from_config(config),
            clock,
        )
    }

    pub fn bus(&self) -> &Arc<CommandBus> {
        &self.bus
    }

    pub fn clock(&self) -> &Arc<ScheduleClock> {
        &self.clock
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn overrides(&self) -> Overrides {
        *self.overrides.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check interval displays should use, honoring the test override.
    pub fn check_interval(&self) -> Duration {
        self.overrides()
            .check_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.check_interval)
    }

    // --- resolution ----------------------------------------------------------

    pub fn resolve_selection(&self) -> Result<Resolution> {
        let (doc, revision) = self.store.snapshot_with_revision();
        let period = self.clock.current_period();

        let ctx = ResolveContext {
            graph: &doc.graph,
            schedule: &doc.schedule,
            period,
            seed: doc.shuffle_seed,
            default_cadence: self.settings.default_cadence_secs,
        };
        let (resolved, fell_back) = resolve_or_default(&ctx, &doc.selector)?;

        let crops = resolved.items.iter().filter_map(|id| {
            doc.graph
                .items
                .get(id)
                .and_then(|item| item.crop.as_ref())
                .map(|rect| (id.as_str(), rect))
        });
        let snapshot = StateSnapshot {
            crop_fingerprint: crop_fingerprint(crops),
            items: resolved.items.clone(),
            cadence_secs: resolved.cadence_secs,
            shuffle_seed: doc.shuffle_seed,
            schedule_period: resolved.period.map(|p| p.canonical),
        };

        let overrides = self.overrides();
        Ok(Resolution {
            fingerprint: snapshot.fingerprint(),
            cadence_ms: overrides
                .cadence_ms
                .unwrap_or(u64::from(snapshot.cadence_secs) * 1000),
            check_interval_ms: self.check_interval().as_millis() as u64,
            snapshot,
            selector: doc.selector.clone(),
            fell_back,
            period,
            dissolve: doc.display.dissolve,
            revision,
        })
    }

    // --- selector ------------------------------------------------------------

    #[instrument(skip(self))]
    pub fn set_selector(&self, request: SelectorRequest) -> Result<Selector> {
        self.store.transact("select", MutationKind::Selection, |doc| {
            let selector = match request {
                SelectorRequest::Theme { id } => {
                    doc.graph.theme(&id)?;
                    Selector::Theme { id }
                }
                SelectorRequest::Atmosphere { id } => {
                    doc.graph.atmosphere(&id)?;
                    Selector::Atmosphere { id }
                }
                SelectorRequest::Schedule => Selector::Schedule,
                SelectorRequest::Manual => {
                    let restored = doc.remembered.restore();
                    if doc.selector_is_valid(&restored) {
                        restored
                    } else {
                        Selector::default()
                    }
                }
            };
            doc.remembered.record(&selector);
            doc.selector = selector.clone();
            Ok(selector)
        })
    }

    // --- items ---------------------------------------------------------------

    /// Flip an item's enabled flag, or set it explicitly.
    #[instrument(skip(self))]
    pub fn toggle_item(&self, id: &str, enabled: Option<bool>) -> Result<bool> {
        self.store.transact("toggle item", MutationKind::Content, |doc| {
            let item = doc.graph.item_mut(id)?;
            item.enabled = enabled.unwrap_or(!item.enabled);
            Ok(item.enabled)
        })
    }

    #[instrument(skip(self))]
    pub fn set_item_themes(&self, id: &str, themes: &[String]) -> Result<()> {
        self.store.transact("item themes", MutationKind::Selection, |doc| {
            doc.graph.set_item_themes(id, themes)
        })
    }

    #[instrument(skip(self))]
    pub fn set_item_crop(&self, id: &str, crop: Option<CropRect>) -> Result<()> {
        self.store.transact("item crop", MutationKind::Content, |doc| {
            doc.graph.set_item_crop(id, crop)
        })
    }

    /// Register a new item, file it under the active theme, and show it.
    #[instrument(skip(self))]
    pub fn ingest_item(&self, id: &str) -> Result<IngestOutcome> {
        let (id, theme) = self.store.transact("ingest item", MutationKind::Content, |doc| {
            let theme = match &doc.selector {
                Selector::Theme { id } if id != PROTECTED_NAME => Some(id.clone()),
                _ => None,
            };
            let item = doc.graph.add_item(id)?;
            if let Some(theme) = &theme {
                item.themes.insert(theme.clone());
            }
            Ok((id.trim().to_string(), theme))
        })?;

        let notified = self.bus.send_command(Command::Jump { item: id.clone() });
        info!(item = %id, theme = ?theme, notified, "item ingested");
        Ok(IngestOutcome {
            id,
            theme,
            notified,
        })
    }

    #[instrument(skip(self))]
    pub fn delete_item(&self, id: &str) -> Result<()> {
        self.store.transact("delete item", MutationKind::Content, |doc| {
            doc.graph.remove_item(id).map(|_| ())
        })?;
        let mut current = self.current_item.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
        }
        Ok(())
    }

    // --- themes --------------------------------------------------------------

    #[instrument(skip(self))]
    pub fn create_theme(&self, name: &str, cadence_secs: Option<u32>) -> Result<String> {
        let cadence = cadence_secs.unwrap_or(self.settings.default_cadence_secs);
        self.store.transact("create theme", MutationKind::Content, |doc| {
            doc.graph.create_theme(name, cadence)
        })
    }

    #[instrument(skip(self))]
    pub fn delete_theme(&self, name: &str) -> Result<()> {
        self.store.transact("delete theme", MutationKind::Selection, |doc| {
            doc.graph.delete_theme(name)?;
            if matches!(&doc.selector, Selector::Theme { id } if id == name) {
                doc.selector = Selector::default();
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn rename_theme(&self, old: &str, new: &str) -> Result<String> {
        self.store.transact("rename theme", MutationKind::Selection, |doc| {
            let new = doc.graph.rename_theme(old, new)?;
            if let Selector::Theme { id } = &mut doc.selector {
                if id == old {
                    *id = new.clone();
                }
            }
            if doc.remembered.theme == old {
                doc.remembered.theme = new.clone();
            }
            Ok(new)
        })
    }

    #[instrument(skip(self))]
    pub fn set_theme_cadence(&self, name: &str, secs: u32) -> Result<()> {
        self.store.transact("theme cadence", MutationKind::Content, |doc| {
            doc.graph.set_theme_cadence(name, secs)
        })
    }

    // --- atmospheres ---------------------------------------------------------

    #[instrument(skip(self))]
    pub fn create_atmosphere(&self, name: &str, cadence_secs: Option<u32>) -> Result<String> {
        self.store.transact("create atmosphere", MutationKind::Content, |doc| {
            doc.graph.create_atmosphere(name, cadence_secs)
        })
    }

    #[instrument(skip(self))]
    pub fn delete_atmosphere(&self, name: &str) -> Result<()> {
        self.store.transact("delete atmosphere", MutationKind::Selection, |doc| {
            doc.graph.delete_atmosphere(name)?;
            doc.schedule.remove_atmosphere(name);
            if matches!(&doc.selector, Selector::Atmosphere { id } if id == name) {
                doc.selector = Selector::default();
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn rename_atmosphere(&self, old: &str, new: &str) -> Result<String> {
        self.store.transact("rename atmosphere", MutationKind::Selection, |doc| {
            let new = doc.graph.rename_atmosphere(old, new)?;
            doc.schedule.rename_atmosphere(old, &new);
            if let Selector::Atmosphere { id } = &mut doc.selector {
                if id == old {
                    *id = new.clone();
                }
            }
            if doc.remembered.atmosphere.as_deref() == Some(old) {
                doc.remembered.atmosphere = Some(new.clone());
            }
            Ok(new)
        })
    }

    #[instrument(skip(self))]
    pub fn set_atmosphere_cadence(&self, name: &str, secs: Option<u32>) -> Result<()> {
        self.store.transact("atmosphere cadence", MutationKind::Content, |doc| {
            doc.graph.set_atmosphere_cadence(name, secs)
        })
    }

    #[instrument(skip(self))]
    pub fn set_atmosphere_themes(&self, name: &str, themes: &[String]) -> Result<()> {
        self.store.transact("atmosphere themes", MutationKind::Selection, |doc| {
            doc.graph.set_atmosphere_themes(name, themes)
        })
    }

    // --- schedule ------------------------------------------------------------

    /// Set the atmospheres for a period. Slot `i` and `i + 6` share storage.
    #[instrument(skip(self))]
    pub fn set_schedule_period(&self, slot: u8, atmospheres: &[String]) -> Result<()> {
        self.store.transact("schedule period", MutationKind::Selection, |doc| {
            for name in atmospheres {
                doc.graph.atmosphere(name)?;
            }
            doc.schedule.set_period(slot, atmospheres)
        })
    }

    pub fn schedule_status(&self) -> ScheduleStatus {
        let doc = self.store.snapshot();
        let now = self.clock.now();
        ScheduleStatus {
            active: doc.selector.is_schedule(),
            now,
            current: self.clock.period_at(now),
            periods: doc.schedule.day_view(),
            remembered: doc.remembered.clone(),
        }
    }

    /// Seed regeneration requested by a display that finished a full cycle.
    #[instrument(skip(self))]
    pub fn request_reshuffle(&self) -> Result<ShuffleSeed> {
        self.store.transact("reshuffle", MutationKind::Selection, |_| Ok(()))?;
        Ok(self.store.snapshot().shuffle_seed)
    }

    #[instrument(skip(self))]
    pub fn set_dissolve(&self, dissolve: bool) -> Result<()> {
        self.store.transact("display options", MutationKind::Content, |doc| {
            doc.display.dissolve = dissolve;
            Ok(())
        })
    }

    // --- backup --------------------------------------------------------------

    pub fn export_state(&self) -> StateDocument {
        (*self.store.snapshot()).clone()
    }

    #[instrument(skip(self, doc))]
    pub fn restore_state(&self, doc: StateDocument) -> Result<()> {
        self.store.replace(doc)?;
        info!(revision = self.store.revision(), "state restored");
        Ok(())
    }

    // --- test-mode hooks -----------------------------------------------------

    /// Freeze (or release) schedule time for the whole process. A boundary
    /// crossing is signalled immediately.
    #[instrument(skip(self))]
    pub fn set_virtual_clock(&self, at: Option<DateTime<Utc>>) -> Option<PeriodChange> {
        self.clock.set_virtual(at);
        self.check_period_boundary()
    }

    pub fn set_cadence_override(&self, ms: Option<u64>) -> Result<()> {
        if ms == Some(0) {
            return Err(KioskError::validation("cadence override must be positive"));
        }
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .cadence_ms = ms;
        info!(cadence_override_ms = ?ms, "cadence override set");
        Ok(())
    }

    pub fn set_check_interval_override(&self, ms: Option<u64>) -> Result<()> {
        if ms == Some(0) {
            return Err(KioskError::validation("check interval override must be positive"));
        }
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .check_interval_ms = ms;
        info!(check_interval_override_ms = ?ms, "check interval override set");
        Ok(())
    }

    pub fn test_status(&self) -> TestStatus {
        let overrides = self.overrides();
        let now = self.clock.now();
        TestStatus {
            virtual_time: self.clock.virtual_time(),
            now,
            current_period: self.clock.period_at(now),
            cadence_override_ms: overrides.cadence_ms,
            check_interval_override_ms: overrides.check_interval_ms,
            check_interval_ms: self.check_interval().as_millis() as u64,
        }
    }

    /// Compare the clock's period with the last one seen and publish a
    /// change if it moved.
    pub fn check_period_boundary(&self) -> Option<PeriodChange> {
        let now = self.clock.current_period();
        let change = {
            let mut last = self.period_watch.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == now {
                return None;
            }
            let change = PeriodChange {
                from: *last,
                to: now,
            };
            *last = now;
            change
        };

        info!(from = change.from.label, to = change.to.label, "schedule period changed");
        self.bus.publish(BusEvent::PeriodChanged {
            from: change.from,
            to: change.to,
        });
        Some(change)
    }

    // --- commands & logs -----------------------------------------------------

    #[instrument(skip(self))]
    pub fn send_command(&self, command: Command) -> Result<usize> {
        if let Some(target) = command.target() {
            self.store.snapshot().graph.item(target)?;
        }
        Ok(self.bus.send_command(command))
    }

    pub fn poll_command(&self) -> Option<Command> {
        self.bus.take_pending()
    }

    pub fn append_log(&self, level: &str, message: &str, source: Option<String>) -> Result<LogEntry> {
        let level = LogLevel::parse(level)
            .ok_or_else(|| KioskError::validation(format!("unknown log level \"{}\"", level)))?;
        Ok(self.bus.append_log(level, message, source))
    }

    pub fn poll_log(&self, cursor: Option<u64>, limit: usize) -> std::result::Result<PollResult, PollError> {
        self.bus.poll_log(cursor, limit)
    }

    pub fn clear_log(&self) -> usize {
        let dropped = self.bus.clear_log();
        info!(dropped, "debug log cleared");
        dropped
    }

    // --- current item --------------------------------------------------------

    pub fn report_current_item(&self, id: &str, source: Option<String>) -> Result<CurrentItem> {
        self.store.snapshot().graph.item(id)?;
        let current = CurrentItem {
            id: id.to_string(),
            reported_at: Utc::now(),
            source,
        };
        *self.current_item.write().unwrap_or_else(PoisonError::into_inner) = Some(current.clone());
        Ok(current)
    }

    pub fn current_item(&self) -> Option<CurrentItem> {
        self.current_item
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.started_at.elapsed().as_secs(),
            subscribers: self.bus.subscriber_count(),
            revision: self.store.revision(),
            log: self.bus.log_stats(),
        }
    }
}
