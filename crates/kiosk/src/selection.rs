//! Selector and selection resolution.
//!
//! Resolution turns the content graph plus the active selector into an ordered
//! list of item ids and an effective cadence:
//!
//! 1. Work out the allowed theme set. `None` means "no filtering" and comes
//!    from the protected theme, the protected atmosphere, or an empty
//!    schedule period.
//! 2. Keep enabled items sharing at least one theme with that set.
//! 3. Pick the cadence of whatever is driving the selection.
//! 4. Order the survivors with the current shuffle seed.
//!
//! An empty result is a valid outcome. Only references to missing entities
//! are errors, and [`resolve_or_default`] turns those into the default view.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::PeriodSlot;
use crate::error::Result;
use crate::graph::{ContentGraph, PROTECTED_NAME};
use crate::schedule::DaySchedule;
use crate::shuffle::{shuffled_ids, ShuffleSeed};

/// The single active choice of what filters the displayed items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Selector {
    Theme { id: String },
    Atmosphere { id: String },
    Schedule,
}

impl Selector {
    pub fn theme(id: impl Into<String>) -> Self {
        Selector::Theme { id: id.into() }
    }

    pub fn atmosphere(id: impl Into<String>) -> Self {
        Selector::Atmosphere { id: id.into() }
    }

    pub fn is_schedule(&self) -> bool {
        matches!(self, Selector::Schedule)
    }
}

impl Default for Selector {
    fn default() -> Self {
        Selector::theme(PROTECTED_NAME)
    }
}

/// Last manual selection, kept while the schedule is in control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remembered {
    #[serde(default = "protected_name")]
    pub theme: String,
    #[serde(default)]
    pub atmosphere: Option<String>,
}

fn protected_name() -> String {
    PROTECTED_NAME.to_string()
}

impl Default for Remembered {
    fn default() -> Self {
        Self {
            theme: protected_name(),
            atmosphere: None,
        }
    }
}

impl Remembered {
    /// Record a manual selector. Schedule leaves the memory untouched.
    pub fn record(&mut self, selector: &Selector) {
        match selector {
            Selector::Theme { id } => {
                self.theme = id.clone();
                self.atmosphere = None;
            }
            Selector::Atmosphere { id } => self.atmosphere = Some(id.clone()),
            Selector::Schedule => {}
        }
    }

    /// The manual selector to return to when leaving schedule mode.
    pub fn restore(&self) -> Selector {
        match &self.atmosphere {
            Some(id) => Selector::atmosphere(id.clone()),
            None => Selector::theme(self.theme.clone()),
        }
    }
}

/// Output of a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub items: Vec<String>,
    pub cadence_secs: u32,
    /// Set only when the schedule drove the selection.
    pub period: Option<PeriodSlot>,
}

/// Inputs that stay fixed for one resolution.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub graph: &'a ContentGraph,
    pub schedule: &'a DaySchedule,
    pub period: PeriodSlot,
    pub seed: ShuffleSeed,
    pub default_cadence: u32,
}

pub fn resolve(ctx: &ResolveContext<'_>, selector: &Selector) -> Result<Resolved> {
    let graph = ctx.graph;

    let (allowed, cadence_secs, period) = match selector {
        Selector::Theme { id } => {
            let theme = graph.theme(id)?;
            let allowed = (!theme.protected).then(|| BTreeSet::from([id.clone()]));
            (allowed, theme.cadence_secs, None)
        }
        Selector::Atmosphere { id } => {
            let atmosphere = graph.atmosphere(id)?;
            let allowed = (!atmosphere.protected)
                .then(|| atmosphere.themes.iter().cloned().collect::<BTreeSet<_>>());
            let cadence = graph.atmosphere_cadence(atmosphere, ctx.default_cadence);
            (allowed, cadence, None)
        }
        Selector::Schedule => {
            let listed = ctx.schedule.period(ctx.period.canonical)?;
            let atmospheres = listed
                .iter()
                .map(|name| graph.atmosphere(name))
                .collect::<Result<Vec<_>>>()?;

            // An empty period plays like the protected atmosphere.
            let driver = match atmospheres.first() {
                Some(first) => *first,
                None => graph.atmosphere(PROTECTED_NAME)?,
            };
            let cadence = graph.atmosphere_cadence(driver, ctx.default_cadence);

            let allowed = if atmospheres.is_empty() || atmospheres.iter().any(|a| a.protected) {
                None
            } else {
                Some(
                    atmospheres
                        .iter()
                        .flat_map(|a| a.themes.iter().cloned())
                        .collect::<BTreeSet<_>>(),
                )
            };
            (allowed, cadence, Some(ctx.period))
        }
    };

    let matching = graph.items.iter().filter_map(|(id, item)| {
        let visible = item.enabled
            && allowed
                .as_ref()
                .map_or(true, |set| !item.themes.is_disjoint(set));
        visible.then_some(id.as_str())
    });

    Ok(Resolved {
        items: shuffled_ids(matching, ctx.seed),
        cadence_secs,
        period,
    })
}

/// Resolve, falling back to the protected theme on a dangling reference.
///
/// The boolean reports whether the fallback was taken.
pub fn resolve_or_default(ctx: &ResolveContext<'_>, selector: &Selector) -> Result<(Resolved, bool)> {
    match resolve(ctx, selector) {
        Ok(resolved) => Ok((resolved, false)),
        Err(err) => {
            warn!(?selector, error = %err, "selector could not be resolved, using default theme");
            let resolved = resolve(ctx, &Selector::default())?;
            Ok((resolved, true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn graph() -> ContentGraph {
        let mut graph = ContentGraph::with_protected(3600);
        graph.create_theme("Nature", 1800).unwrap();
        graph.create_theme("Urban", 3600).unwrap();
        graph.create_theme("Night", 900).unwrap();
        for id in ["i1", "i2", "i3", "i4", "i5"] {
            graph.add_item(id).unwrap();
        }
        for id in ["i1", "i2"] {
            graph.set_item_themes(id, &names(&["Nature"])).unwrap();
        }
        graph.set_item_themes("i3", &names(&["Nature", "Urban"])).unwrap();
        graph.set_item_themes("i4", &names(&["Urban"])).unwrap();
        graph.set_item_themes("i5", &names(&["Night"])).unwrap();
        graph.create_atmosphere("Evening", None).unwrap();
        graph
            .set_atmosphere_themes("Evening", &names(&["Nature", "Urban"]))
            .unwrap();
        graph.create_atmosphere("Late", Some(600)).unwrap();
        graph.set_atmosphere_themes("Late", &names(&["Night"])).unwrap();
        graph
    }

    fn ctx<'a>(graph: &'a ContentGraph, schedule: &'a DaySchedule, hour: u32) -> ResolveContext<'a> {
        ResolveContext {
            graph,
            schedule,
            period: PeriodSlot::from_hour(hour),
            seed: ShuffleSeed(99),
            default_cadence: 3600,
        }
    }

    fn sorted(mut ids: Vec<String>) -> Vec<String> {
        ids.sort();
        ids
    }

    #[test]
    fn protected_theme_shows_every_enabled_item() {
        let mut graph = graph();
        graph.items.get_mut("i2").unwrap().enabled = false;
        let schedule = DaySchedule::default();
        let out = resolve(&ctx(&graph, &schedule, 12), &Selector::default()).unwrap();
        assert_eq!(sorted(out.items), names(&["i1", "i3", "i4", "i5"]));
        assert_eq!(out.cadence_secs, 3600);
        assert_eq!(out.period, None);
    }

    #[test]
    fn theme_filters_by_membership() {
        let graph = graph();
        let schedule = DaySchedule::default();
        let out = resolve(&ctx(&graph, &schedule, 12), &Selector::theme("Urban")).unwrap();
        assert_eq!(sorted(out.items), names(&["i3", "i4"]));
        assert_eq!(out.cadence_secs, 3600);
    }

    #[test]
    fn atmosphere_unions_its_themes() {
        let graph = graph();
        let schedule = DaySchedule::default();
        let out = resolve(&ctx(&graph, &schedule, 12), &Selector::atmosphere("Evening")).unwrap();
        assert_eq!(sorted(out.items), names(&["i1", "i2", "i3", "i4"]));
        assert_eq!(out.cadence_secs, 1800);
    }

    #[test]
    fn schedule_uses_first_atmosphere_cadence() {
        let graph = graph();
        let mut schedule = DaySchedule::default();
        schedule.set_period(1, &names(&["Late", "Evening"])).unwrap();

        let out = resolve(&ctx(&graph, &schedule, 7), &Selector::Schedule).unwrap();
        assert_eq!(sorted(out.items.clone()), names(&["i1", "i2", "i3", "i4", "i5"]));
        assert_eq!(out.cadence_secs, 600);
        assert_eq!(out.period.map(|p| p.canonical), Some(1));

        // 19:00 is the night occurrence of the same canonical period.
        let night = resolve(&ctx(&graph, &schedule, 19), &Selector::Schedule).unwrap();
        assert_eq!(night.items, out.items);
        assert_eq!(night.period.map(|p| p.label), Some(7));
    }

    #[test]
    fn empty_schedule_period_matches_protected_atmosphere() {
        let graph = graph();
        let schedule = DaySchedule::default();
        let scheduled = resolve(&ctx(&graph, &schedule, 7), &Selector::Schedule).unwrap();
        let all = resolve(&ctx(&graph, &schedule, 7), &Selector::atmosphere(PROTECTED_NAME)).unwrap();
        assert_eq!(scheduled.items, all.items);
        assert_eq!(scheduled.cadence_secs, all.cadence_secs);
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let mut graph = graph();
        graph.create_theme("Empty", 60).unwrap();
        let schedule = DaySchedule::default();
        let out = resolve(&ctx(&graph, &schedule, 12), &Selector::theme("Empty")).unwrap();
        assert!(out.items.is_empty());
        assert_eq!(out.cadence_secs, 60);
    }

    #[test]
    fn dangling_selector_falls_back_to_default() {
        let graph = graph();
        let schedule = DaySchedule::default();
        let c = ctx(&graph, &schedule, 12);
        assert!(resolve(&c, &Selector::theme("Gone")).is_err());

        let (out, fell_back) = resolve_or_default(&c, &Selector::theme("Gone")).unwrap();
        assert!(fell_back);
        assert_eq!(out, resolve(&c, &Selector::default()).unwrap());
    }

    #[test]
    fn remembered_selection_round_trips() {
        let mut remembered = Remembered::default();
        remembered.record(&Selector::theme("Nature"));
        remembered.record(&Selector::Schedule);
        assert_eq!(remembered.restore(), Selector::theme("Nature"));

        remembered.record(&Selector::atmosphere("Evening"));
        assert_eq!(remembered.restore(), Selector::atmosphere("Evening"));
        assert_eq!(remembered.theme, "Nature");
    }

    #[test]
    fn selector_wire_format_is_tagged() {
        let json = serde_json::to_value(Selector::theme("All")).unwrap();
        assert_eq!(json, serde_json::json!({"mode": "theme", "id": "All"}));
        let schedule: Selector = serde_json::from_str(r#"{"mode":"schedule"}"#).unwrap();
        assert_eq!(schedule, Selector::Schedule);
    }
}
