//! # gis-engine
//!
//! Geo-spatial simulation core for network emulation.
//!
//! Terminals (UEs), points of attachment (POAs) and compute nodes live in a
//! spatial store. Terminals move along paths; each one is attached to the best
//! POA in range. Periodic automation turns those changes into events and keeps
//! an external cache in step with the store.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 HTTP API (/gis/v1)  ·  CLI                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │              Engine (scenario lifecycle, geodata)               │
//! ├──────────────────────────┬──────────────────────────────────────┤
//! │   Automation scheduler   │          Event dispatcher            │
//! │  ┌──────────┐ ┌────────┐ │   ┌───────────┐  ┌───────────┐       │
//! │  │ Movement │ │Mobility│ │   │ Broadcast │  │    Log    │       │
//! │  ├──────────┤ ├────────┤ │   └───────────┘  └───────────┘       │
//! │  │ NetChar  │ │InRange │ │                                      │
//! │  └──────────┘ └────────┘ │                                      │
//! ├──────────────────────────┴──────────────────────────────────────┤
//! │     Asset manager · Mobility · POA selection · Power model      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │       Spatial store (SQLite + geodesic SQL functions)           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  Differential cache synchronizer                │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)]        // Coordinates
#![allow(clippy::cast_possible_truncation)]  // Throughput and power rounding
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::suboptimal_flops)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::future_not_send)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::return_self_not_must_use)]

pub mod api;
pub mod assets;
pub mod automation;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod geo;
pub mod mobility;
pub mod selection;
pub mod store;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assets::AssetManager;
    pub use crate::automation::{AutomationState, AutomationType};
    pub use crate::cache::{CacheSynchronizer, GeoCache, MemoryCache};
    pub use crate::config::Config;
    pub use crate::engine::{Engine, GeoDataAsset, Scenario, Target};
    pub use crate::error::{Error, Result};
    pub use crate::events::{Event, EventSink};
    pub use crate::geo::{LineString, Point};
    pub use crate::store::{SpatialStore, Ue, UeData, Poa, PoaData, Compute, ComputeData};
    pub use crate::types::*;
}
