//! # skyfuse Common Library
//!
//! Shared code for the skyfuse aircraft-state fusion service:
//! - Aircraft snapshot model and geographic bounds
//! - State normalization and validation of positional source records
//! - Priority merge resolution
//! - Staleness/visibility policy and the served view
//! - Client-side reconciliation of live and searched aircraft
//! - Configuration loading and event broadcast

pub mod config;
pub mod error;
pub mod events;
pub mod merge;
pub mod normalizer;
pub mod reconciler;
pub mod snapshot;
pub mod staleness;
pub mod time;
pub mod view;

pub use error::{Error, Result};
pub use snapshot::{AircraftSnapshot, Bounds, SourceMeta};
