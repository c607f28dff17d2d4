//! Integration tests for the JSON state document.
//!
//! These tests verify:
//! - State survives a reopen
//! - Older or hand-edited documents load with defaults and repairs
//! - A syntactically broken file is refused rather than overwritten

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use kiosk::clock::ScheduleClock;
use kiosk::engine::{EngineSettings, Kiosk, SelectorRequest};
use kiosk::selection::Selector;
use kiosk::KioskError;
use tempfile::TempDir;

fn state_path(dir: &TempDir) -> PathBuf {
    dir.path().join("kiosk").join("state.json")
}

fn open_at(path: &Path) -> kiosk::Result<Kiosk> {
    Kiosk::open(
        Some(path),
        EngineSettings::default(),
        Arc::new(ScheduleClock::from_offset_minutes(Some(0))),
    )
}

#[test]
fn test_state_survives_reopen() -> Result<()> {
    let temp = TempDir::new()?;
    let path = state_path(&temp);

    let seed = {
        let kiosk = open_at(&path)?;
        kiosk.create_theme("Nature", Some(1800))?;
        kiosk.ingest_item("fern.jpg")?;
        kiosk.set_item_themes("fern.jpg", &["Nature".to_string()])?;
        kiosk.set_selector(SelectorRequest::Theme {
            id: "Nature".into(),
        })?;
        kiosk.set_schedule_period(4, &["All".to_string()])?;
        kiosk.store().snapshot().shuffle_seed
    };
    assert!(path.exists());

    let reopened = open_at(&path)?;
    let doc = reopened.store().snapshot();
    assert_eq!(doc.selector, Selector::theme("Nature"));
    assert_eq!(doc.shuffle_seed, seed);
    assert_eq!(doc.graph.themes["Nature"].cadence_secs, 1800);
    assert!(doc.graph.items["fern.jpg"].themes.contains("Nature"));
    assert_eq!(doc.schedule.period(10)?, ["All".to_string()]);
    Ok(())
}

#[test]
fn test_sparse_document_gets_defaults() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("state.json");
    std::fs::write(
        &path,
        r#"{"items": {"a.jpg": {}, "b.jpg": {"enabled": false, "themes": ["Ghost"]}}, "extra": 1}"#,
    )?;

    let kiosk = open_at(&path)?;
    let doc = kiosk.store().snapshot();
    assert!(doc.graph.themes["All"].protected);
    assert!(doc.graph.atmospheres["All"].protected);
    assert!(doc.graph.items["a.jpg"].enabled);
    assert!(doc.graph.items["b.jpg"].themes.is_empty(), "dangling theme pruned");
    assert_eq!(doc.selector, Selector::theme("All"));

    let resolution = kiosk.resolve_selection()?;
    assert_eq!(resolution.snapshot.items, vec!["a.jpg".to_string()]);
    Ok(())
}

#[test]
fn test_dangling_selector_is_reset_on_load() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("state.json");
    std::fs::write(
        &path,
        r#"{"selector": {"mode": "atmosphere", "id": "Vanished"}}"#,
    )?;

    let kiosk = open_at(&path)?;
    assert_eq!(kiosk.store().snapshot().selector, Selector::theme("All"));
    assert!(!kiosk.resolve_selection()?.fell_back);
    Ok(())
}

#[test]
fn test_corrupt_file_is_refused() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("state.json");
    std::fs::write(&path, "{ this is not json")?;

    let err = open_at(&path).err().expect("corrupt file must not open");
    assert!(matches!(err, KioskError::Corrupt { .. }), "got {:?}", err);
    assert_eq!(std::fs::read_to_string(&path)?, "{ this is not json");
    Ok(())
}

#[test]
fn test_failed_mutation_leaves_file_untouched() -> Result<()> {
    let temp = TempDir::new()?;
    let path = state_path(&temp);
    let kiosk = open_at(&path)?;
    kiosk.create_theme("Nature", None)?;
    let before = std::fs::read_to_string(&path)?;
    let revision = kiosk.store().revision();

    assert!(kiosk.create_theme("Nature", None).is_err());
    assert!(kiosk.delete_theme("All").is_err());
    assert!(kiosk.set_theme_cadence("Nature", 0).is_err());

    assert_eq!(std::fs::read_to_string(&path)?, before);
    assert_eq!(kiosk.store().revision(), revision);
    Ok(())
}
