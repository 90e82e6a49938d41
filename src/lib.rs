//! boardsync — multi-tier synchronization for a shared drawing board.
//!
//! ARCHITECTURE
//! ============
//! Clients converge on one bounded board state (strokes, chat, presence)
//! through a cascade of transports:
//!
//! ```text
//!   UI events ──► SyncFacade ──► FailoverController (per channel)
//!                                   │ PRIMARY            │ DEGRADED
//!                                   ▼                    ▼
//!                              Transport          HybridRelay (merge)
//!                          (pub/sub channel)       │            │
//!                                              LocalRelay  CrossDeviceRelay
//!                                             (same device) (durable store)
//! ```
//!
//! The hub server (`routes`, `services::channel`, `state`) is the pub/sub
//! side of the primary transport; `db` and `services::retention` own the
//! durable store schema used by the cross-device tier.

pub mod capacity;
pub mod config;
pub mod cross_device;
pub mod db;
pub mod facade;
pub mod failover;
pub mod frame;
pub mod listeners;
pub mod local_relay;
pub mod merge;
pub mod model;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod transport;

pub use capacity::{CapacityDecision, CapacityGate};
pub use config::SyncConfig;
pub use facade::{SyncFacade, SyncStrategy};
pub use failover::TierState;
pub use model::{ChatMessage, Participant, Point, Stroke, SyncSnapshot};
