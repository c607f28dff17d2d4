//! Kiosk - selection and synchronization engine for a personal display.
//!
//! Library exposing the engine, persistence and HTTP surface for testing and reuse.

pub mod bus;
pub mod change;
pub mod clock;
pub mod command;
pub mod engine;
pub mod error;
pub mod event_buffer;
pub mod graph;
pub mod monitor;
pub mod schedule;
pub mod selection;
pub mod shuffle;
pub mod state_store;
pub mod telemetry;
pub mod web;

pub use engine::{EngineSettings, Kiosk};
pub use error::{EntityKind, KioskError, Result};
