//! Netcafe Core - Device model, registry and room occupancy
//!
//! This crate provides the foundational types for presence tracking:
//! - Device model with the grace-window online rule
//! - In-memory device registry keyed by IPv4 address
//! - Presence transitions
//! - Rooms and occupancy derived from computer presence

pub mod device;
pub mod event;
pub mod registry;
pub mod room;

pub use device::{Device, DeviceConfig, DeviceState, DEFAULT_GRACE_SECS};
pub use event::{Direction, Transition};
pub use registry::{DeviceRegistry, ReloadSummary};
pub use room::{OccupancyChange, OccupancyTracker, Room, RoomStatus, SceneTargets};
