//! Persisted kiosk state and its transactional store.
//!
//! The whole configuration is one JSON document. Mutations go through
//! [`StateStore::transact`], which serializes writers, applies the change to
//! a copy, restores invariants, reseeds the shuffle when the change affects
//! selection, writes the file atomically, and only then swaps the copy in and
//! tells the bus. A failure at any step leaves both memory and disk untouched.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, CommandBus, StateChange};
use crate::error::{KioskError, Result};
use crate::graph::{ContentGraph, PROTECTED_NAME};
use crate::schedule::DaySchedule;
use crate::selection::{Remembered, Selector};
use crate::shuffle::ShuffleSeed;

pub const DOCUMENT_VERSION: u32 = 1;

fn current_version() -> u32 {
    DOCUMENT_VERSION
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayOptions {
    #[serde(default)]
    pub dissolve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(flatten)]
    pub graph: ContentGraph,
    #[serde(default)]
    pub selector: Selector,
    #[serde(default)]
    pub remembered: Remembered,
    #[serde(default)]
    pub schedule: DaySchedule,
    #[serde(default)]
    pub shuffle_seed: ShuffleSeed,
    #[serde(default)]
    pub display: DisplayOptions,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl StateDocument {
    pub fn new(default_cadence: u32) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            graph: ContentGraph::with_protected(default_cadence),
            selector: Selector::default(),
            remembered: Remembered::default(),
            schedule: DaySchedule::default(),
            shuffle_seed: ShuffleSeed::random(),
            display: DisplayOptions::default(),
            updated_at: Utc::now(),
        }
    }

    /// Repair whatever a hand-edited or older document got wrong. Returns the
    /// number of repairs made.
    pub fn normalize(&mut self, default_cadence: u32) -> usize {
        let mut repairs = 0;
        self.version = DOCUMENT_VERSION;
        self.graph.ensure_protected(default_cadence);
        repairs += self.graph.prune_dangling();

        let atmospheres = &self.graph.atmospheres;
        repairs += self.schedule.retain_known(|name| atmospheres.contains_key(name));
        self.schedule.normalize();

        if !self.selector_is_valid(&self.selector) {
            warn!(selector = ?self.selector, "selector points at a missing entity, resetting");
            self.selector = Selector::default();
            repairs += 1;
        }
        if !self.graph.themes.contains_key(&self.remembered.theme) {
            self.remembered.theme = PROTECTED_NAME.to_string();
            repairs += 1;
        }
        if let Some(name) = &self.remembered.atmosphere {
            if !self.graph.atmospheres.contains_key(name) {
                self.remembered.atmosphere = None;
                repairs += 1;
            }
        }
        repairs
    }

    pub fn selector_is_valid(&self, selector: &Selector) -> bool {
        match selector {
            Selector::Theme { id } => self.graph.themes.contains_key(id),
            Selector::Atmosphere { id } => self.graph.atmospheres.contains_key(id),
            Selector::Schedule => true,
        }
    }

    /// Invariants that must hold after every committed mutation.
    fn check_invariants(&self) -> Result<()> {
        let protected_theme = self.graph.themes.get(PROTECTED_NAME).is_some_and(|t| t.protected);
        let protected_atmosphere = self
            .graph
            .atmospheres
            .get(PROTECTED_NAME)
            .is_some_and(|a| a.protected && a.themes.is_empty());
        if !protected_theme || !protected_atmosphere {
            return Err(KioskError::validation("protected entities must remain intact"));
        }
        if !self.selector_is_valid(&self.selector) {
            return Err(KioskError::validation("selector refers to a missing entity"));
        }
        Ok(())
    }
}

/// Whether a mutation affects what is selected (and so reshuffles).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Selector, theme/atmosphere membership, schedule lists.
    Selection,
    /// Enabled flags, crops, cadences, display options.
    Content,
}

/// A committed document and the revision it was committed as. Kept behind
/// one lock so readers never pair a document with another commit's revision.
#[derive(Debug, Clone)]
struct Committed {
    doc: Arc<StateDocument>,
    revision: u64,
}

impl Committed {
    fn initial(doc: StateDocument) -> RwLock<Self> {
        RwLock::new(Self {
            doc: Arc::new(doc),
            revision: 0,
        })
    }
}

pub struct StateStore {
    path: Option<PathBuf>,
    current: RwLock<Committed>,
    write_lock: Mutex<()>,
    default_cadence: u32,
    bus: Arc<CommandBus>,
}

impl StateStore {
    /// Load from `path`, creating the file with defaults if it does not exist.
    pub fn open(path: impl AsRef<Path>, default_cadence: u32, bus: Arc<CommandBus>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut doc = if path.exists() {
            let json = std::fs::read_to_string(&path).map_err(|source| KioskError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<StateDocument>(&json).map_err(|source| KioskError::Corrupt {
                path: path.clone(),
                source,
            })?
        } else {
            info!(path = %path.display(), "no state file yet, starting fresh");
            StateDocument::new(default_cadence)
        };

        let repairs = doc.normalize(default_cadence);
        if repairs > 0 {
            warn!(repairs, path = %path.display(), "state document repaired on load");
        }
        write_atomic(&path, &doc)?;

        info!(
            path = %path.display(),
            items = doc.graph.items.len(),
            themes = doc.graph.themes.len(),
            atmospheres = doc.graph.atmospheres.len(),
            "state loaded"
        );

        Ok(Self {
            path: Some(path),
            current: Committed::initial(doc),
            write_lock: Mutex::new(()),
            default_cadence,
            bus,
        })
    }

    /// A store that never touches disk.
    pub fn in_memory(default_cadence: u32, bus: Arc<CommandBus>) -> Self {
        Self {
            path: None,
            current: Committed::initial(StateDocument::new(default_cadence)),
            write_lock: Mutex::new(()),
            default_cadence,
            bus,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn committed(&self) -> Committed {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Current document. Cheap; readers never wait on a disk write.
    pub fn snapshot(&self) -> Arc<StateDocument> {
        self.committed().doc
    }

    pub fn revision(&self) -> u64 {
        self.committed().revision
    }

    /// Current document together with the revision that produced it.
    pub fn snapshot_with_revision(&self) -> (Arc<StateDocument>, u64) {
        let Committed { doc, revision } = self.committed();
        (doc, revision)
    }

    /// Run one all-or-nothing mutation.
    pub fn transact<T>(
        &self,
        reason: &str,
        kind: MutationKind,
        apply: impl FnOnce(&mut StateDocument) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = (*self.snapshot()).clone();
        let output = apply(&mut next)?;
        self.commit(reason, kind, next)?;
        Ok(output)
    }

    /// Replace the whole document (restore from backup).
    pub fn replace(&self, mut doc: StateDocument) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let repairs = doc.normalize(self.default_cadence);
        if repairs > 0 {
            warn!(repairs, "restored document needed repairs");
        }
        self.commit("restore", MutationKind::Selection, doc)
    }

    /// Caller must hold `write_lock`.
    fn commit(&self, reason: &str, kind: MutationKind, mut next: StateDocument) -> Result<()> {
        next.normalize(self.default_cadence);
        next.check_invariants()?;

        let previous_seed = self.snapshot().shuffle_seed;
        let reshuffled = kind == MutationKind::Selection;
        if reshuffled {
            next.shuffle_seed = previous_seed.regenerate();
        }
        next.updated_at = Utc::now();

        if let Some(path) = &self.path {
            write_atomic(path, &next)?;
        }

        let change = StateChange {
            revision: 0,
            reason: reason.to_string(),
            reshuffled,
            shuffle_seed: next.shuffle_seed,
            selector: next.selector.clone(),
        };

        let revision = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            current.revision += 1;
            current.doc = Arc::new(next);
            current.revision
        };

        debug!(reason, revision, reshuffled, "state committed");
        self.bus.publish(BusEvent::StateChanged(StateChange { revision, ..change }));
        Ok(())
    }
}

/// Write to a temp file next to `path`, then rename over it.
///
/// Blocking, and runs with `write_lock` held on whichever thread made the
/// mutation, tokio workers included. Documents stay a few kilobytes.
fn write_atomic(path: &Path, doc: &StateDocument) -> Result<()> {
    let io_err = |source| KioskError::Io {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(doc).map_err(|source| KioskError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, json).map_err(io_err)?;
    std::fs::rename(&temp_path, path).map_err(io_err)?;
    Ok(())
}
