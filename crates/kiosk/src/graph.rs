//! Content graph: items, themes, atmospheres and their memberships.
//!
//! Themes and atmospheres are keyed by their unique name. Each kind has exactly
//! one protected entry named [`PROTECTED_NAME`] that matches everything and can
//! never be removed or renamed. Every mutation here is all-or-nothing: it
//! validates first and only then touches the maps.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EntityKind, KioskError, Result};

/// Name of the protected theme and of the protected atmosphere.
pub const PROTECTED_NAME: &str = "All";

/// Crop rectangle in source pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub source_w: u32,
    pub source_h: u32,
}

impl CropRect {
    pub fn validate(&self) -> Result<()> {
        if self.w == 0 || self.h == 0 {
            return Err(KioskError::validation("crop width and height must be positive"));
        }
        if self.source_w == 0 || self.source_h == 0 {
            return Err(KioskError::validation("crop source dimensions must be positive"));
        }
        let right = u64::from(self.x) + u64::from(self.w);
        let bottom = u64::from(self.y) + u64::from(self.h);
        if right > u64::from(self.source_w) || bottom > u64::from(self.source_h) {
            return Err(KioskError::validation(format!(
                "crop {}x{}+{}+{} exceeds source {}x{}",
                self.w, self.h, self.x, self.y, self.source_w, self.source_h
            )));
        }
        Ok(())
    }
}

fn enabled_by_default() -> bool {
    true
}

/// A unit of displayable content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub themes: BTreeSet<String>,
    #[serde(default)]
    pub crop: Option<CropRect>,
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
}

impl Item {
    pub fn new() -> Self {
        Self {
            enabled: true,
            themes: BTreeSet::new(),
            crop: None,
            added_at: Utc::now(),
        }
    }
}

impl Default for Item {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub cadence_secs: u32,
    #[serde(default)]
    pub protected: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// A named group of themes.
///
/// `cadence_secs: None` inherits the cadence of the first listed theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atmosphere {
    #[serde(default)]
    pub cadence_secs: Option<u32>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub protected: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentGraph {
    #[serde(default)]
    pub items: BTreeMap<String, Item>,
    #[serde(default)]
    pub themes: BTreeMap<String, Theme>,
    #[serde(default)]
    pub atmospheres: BTreeMap<String, Atmosphere>,
}

/// Trim a user-supplied name and reject empty ones.
pub fn validate_name(kind: EntityKind, name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(KioskError::validation(format!("{} name must not be empty", kind)));
    }
    Ok(trimmed.to_string())
}

pub fn validate_cadence(secs: u32) -> Result<u32> {
    if secs == 0 {
        return Err(KioskError::validation("cadence must be at least one second"));
    }
    Ok(secs)
}

impl ContentGraph {
    /// A graph holding only the two protected entities.
    pub fn with_protected(default_cadence: u32) -> Self {
        let mut graph = Self::default();
        graph.ensure_protected(default_cadence);
        graph
    }

    /// (Re)create the protected theme and atmosphere and make sure nothing else
    /// claims protection.
    pub fn ensure_protected(&mut self, default_cadence: u32) {
        for (name, theme) in self.themes.iter_mut() {
            theme.protected = name == PROTECTED_NAME;
        }
        for (name, atmosphere) in self.atmospheres.iter_mut() {
            atmosphere.protected = name == PROTECTED_NAME;
        }

        self.themes
            .entry(PROTECTED_NAME.to_string())
            .or_insert_with(|| Theme {
                cadence_secs: default_cadence,
                protected: true,
                created_at: Utc::now(),
            });

        let all = self
            .atmospheres
            .entry(PROTECTED_NAME.to_string())
            .or_insert_with(|| Atmosphere {
                cadence_secs: Some(default_cadence),
                themes: Vec::new(),
                protected: true,
                created_at: Utc::now(),
            });
        // The protected atmosphere's empty theme list means "everything".
        all.themes.clear();
        if all.cadence_secs.is_none() {
            all.cadence_secs = Some(default_cadence);
        }
    }

    /// Drop theme references that point at nothing. Returns how many were dropped.
    pub fn prune_dangling(&mut self) -> usize {
        let known: BTreeSet<String> = self.themes.keys().cloned().collect();
        let mut dropped = 0;

        for item in self.items.values_mut() {
            let before = item.themes.len();
            item.themes.retain(|t| known.contains(t));
            dropped += before - item.themes.len();
        }

        for atmosphere in self.atmospheres.values_mut() {
            let before = atmosphere.themes.len();
            let mut seen = BTreeSet::new();
            atmosphere
                .themes
                .retain(|t| known.contains(t) && seen.insert(t.clone()));
            dropped += before - atmosphere.themes.len();
        }

        dropped
    }

    // --- lookups -------------------------------------------------------------

    pub fn item(&self, id: &str) -> Result<&Item> {
        self.items
            .get(id)
            .ok_or_else(|| KioskError::not_found(EntityKind::Item, id))
    }

    pub fn item_mut(&mut self, id: &str) -> Result<&mut Item> {
        self.items
            .get_mut(id)
            .ok_or_else(|| KioskError::not_found(EntityKind::Item, id))
    }

    pub fn theme(&self, name: &str) -> Result<&Theme> {
        self.themes
            .get(name)
            .ok_or_else(|| KioskError::not_found(EntityKind::Theme, name))
    }

    pub fn atmosphere(&self, name: &str) -> Result<&Atmosphere> {
        self.atmospheres
            .get(name)
            .ok_or_else(|| KioskError::not_found(EntityKind::Atmosphere, name))
    }

    /// Effective cadence of an atmosphere: its own, else its first theme's.
    pub fn atmosphere_cadence(&self, atmosphere: &Atmosphere, default_cadence: u32) -> u32 {
        atmosphere.cadence_secs.unwrap_or_else(|| {
            atmosphere
                .themes
                .iter()
                .find_map(|t| self.themes.get(t))
                .map(|t| t.cadence_secs)
                .unwrap_or(default_cadence)
        })
    }

    fn require_themes(&self, themes: &[String]) -> Result<()> {
        for name in themes {
            self.theme(name)?;
        }
        Ok(())
    }

    // --- items ---------------------------------------------------------------

    pub fn add_item(&mut self, id: &str) -> Result<&mut Item> {
        let id = validate_name(EntityKind::Item, id)?;
        if self.items.contains_key(&id) {
            return Err(KioskError::validation(format!("item \"{}\" already exists", id)));
        }
        Ok(self.items.entry(id).or_default())
    }

    pub fn remove_item(&mut self, id: &str) -> Result<Item> {
        self.items
            .remove(id)
            .ok_or_else(|| KioskError::not_found(EntityKind::Item, id))
    }

    pub fn set_item_themes(&mut self, id: &str, themes: &[String]) -> Result<()> {
        self.require_themes(themes)?;
        let item = self.item_mut(id)?;
        item.themes = themes.iter().cloned().collect();
        Ok(())
    }

    pub fn set_item_crop(&mut self, id: &str, crop: Option<CropRect>) -> Result<()> {
        if let Some(rect) = &crop {
            rect.validate()?;
        }
        self.item_mut(id)?.crop = crop;
        Ok(())
    }

    // --- themes --------------------------------------------------------------

    pub fn create_theme(&mut self, name: &str, cadence_secs: u32) -> Result<String> {
        let name = validate_name(EntityKind::Theme, name)?;
        let cadence_secs = validate_cadence(cadence_secs)?;
        if self.themes.contains_key(&name) {
            return Err(KioskError::validation(format!("theme \"{}\" already exists", name)));
        }
        self.themes.insert(
            name.clone(),
            Theme {
                cadence_secs,
                protected: false,
                created_at: Utc::now(),
            },
        );
        Ok(name)
    }

    /// Remove a theme and every reference to it.
    pub fn delete_theme(&mut self, name: &str) -> Result<()> {
        if self.theme(name)?.protected {
            return Err(KioskError::protected(EntityKind::Theme, name, "deleted"));
        }
        self.themes.remove(name);
        for item in self.items.values_mut() {
            item.themes.remove(name);
        }
        for atmosphere in self.atmospheres.values_mut() {
            atmosphere.themes.retain(|t| t != name);
        }
        Ok(())
    }

    pub fn rename_theme(&mut self, old: &str, new: &str) -> Result<String> {
        if self.theme(old)?.protected {
            return Err(KioskError::protected(EntityKind::Theme, old, "renamed"));
        }
        let new = validate_name(EntityKind::Theme, new)?;
        if new == old {
            return Ok(new);
        }
        if self.themes.contains_key(&new) {
            return Err(KioskError::validation(format!("theme \"{}\" already exists", new)));
        }

        if let Some(theme) = self.themes.remove(old) {
            self.themes.insert(new.clone(), theme);
        }
        for item in self.items.values_mut() {
            if item.themes.remove(old) {
                item.themes.insert(new.clone());
            }
        }
        for atmosphere in self.atmospheres.values_mut() {
            for t in atmosphere.themes.iter_mut().filter(|t| t.as_str() == old) {
                *t = new.clone();
            }
        }
        Ok(new)
    }

    pub fn set_theme_cadence(&mut self, name: &str, secs: u32) -> Result<()> {
        let secs = validate_cadence(secs)?;
        let theme = self
            .themes
            .get_mut(name)
            .ok_or_else(|| KioskError::not_found(EntityKind::Theme, name))?;
        theme.cadence_secs = secs;
        Ok(())
    }

    // --- atmospheres ---------------------------------------------------------

    pub fn create_atmosphere(&mut self, name: &str, cadence_secs: Option<u32>) -> Result<String> {
        let name = validate_name(EntityKind::Atmosphere, name)?;
        let cadence_secs = cadence_secs.map(validate_cadence).transpose()?;
        if self.atmospheres.contains_key(&name) {
            return Err(KioskError::validation(format!(
                "atmosphere \"{}\" already exists",
                name
            )));
        }
        self.atmospheres.insert(
            name.clone(),
            Atmosphere {
                cadence_secs,
                themes: Vec::new(),
                protected: false,
                created_at: Utc::now(),
            },
        );
        Ok(name)
    }

    pub fn delete_atmosphere(&mut self, name: &str) -> Result<()> {
        if self.atmosphere(name)?.protected {
            return Err(KioskError::protected(EntityKind::Atmosphere, name, "deleted"));
        }
        self.atmospheres.remove(name);
        Ok(())
    }

    pub fn rename_atmosphere(&mut self, old: &str, new: &str) -> Result<String> {
        if self.atmosphere(old)?.protected {
            return Err(KioskError::protected(EntityKind::Atmosphere, old, "renamed"));
        }
        let new = validate_name(EntityKind::Atmosphere, new)?;
        if new == old {
            return Ok(new);
        }
        if self.atmospheres.contains_key(&new) {
            return Err(KioskError::validation(format!(
                "atmosphere \"{}\" already exists",
                new
            )));
        }
        if let Some(atmosphere) = self.atmospheres.remove(old) {
            self.atmospheres.insert(new.clone(), atmosphere);
        }
        Ok(new)
    }

    /// `None` clears the atmosphere's own cadence so it inherits again.
    pub fn set_atmosphere_cadence(&mut self, name: &str, secs: Option<u32>) -> Result<()> {
        let secs = secs.map(validate_cadence).transpose()?;
        let atmosphere = self
            .atmospheres
            .get_mut(name)
            .ok_or_else(|| KioskError::not_found(EntityKind::Atmosphere, name))?;
        if atmosphere.protected && secs.is_none() {
            return Err(KioskError::validation(
                "the protected atmosphere must keep an explicit cadence",
            ));
        }
        atmosphere.cadence_secs = secs;
        Ok(())
    }

    /// Replace an atmosphere's theme list, keeping first-seen order.
    pub fn set_atmosphere_themes(&mut self, name: &str, themes: &[String]) -> Result<()> {
        if self.atmosphere(name)?.protected {
            return Err(KioskError::protected(
                EntityKind::Atmosphere,
                name,
                "given an explicit theme list",
            ));
        }
        self.require_themes(themes)?;

        let mut seen = BTreeSet::new();
        let ordered: Vec<String> = themes
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect();

        if let Some(atmosphere) = self.atmospheres.get_mut(name) {
            atmosphere.themes = ordered;
        }
        Ok(())
    }
}
