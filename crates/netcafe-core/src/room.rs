//! Rooms and occupancy derived from computer presence
//!
//! A room is occupied while any of its computers is online. Occupancy is the
//! signal scene automations (lights, climate, curtains) key off; each room
//! carries the entity ids those automations drive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::info;

use crate::device::DeviceState;

/// Home-automation entities a room's scene acts on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneTargets {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lights: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub climates: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub covers: Vec<String>,
    /// Do-not-disturb switch flipped with occupancy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dnd_switch: Option<String>,
}

impl SceneTargets {
    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
            && self.climates.is_empty()
            && self.covers.is_empty()
            && self.dnd_switch.is_none()
    }

    /// Add `other`'s entities that are not already listed.
    ///
    /// The first DND switch wins.
    pub fn merge(&mut self, other: &SceneTargets) {
        fn extend(into: &mut Vec<String>, from: &[String]) {
            for id in from {
                if !into.contains(id) {
                    into.push(id.clone());
                }
            }
        }
        extend(&mut self.lights, &other.lights);
        extend(&mut self.climates, &other.climates);
        extend(&mut self.covers, &other.covers);
        if self.dnd_switch.is_none() {
            self.dnd_switch = other.dnd_switch.clone();
        }
    }
}

/// A room and the computers placed in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub name: String,
    pub computers: Vec<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "SceneTargets::is_empty")]
    pub targets: SceneTargets,
}

impl Room {
    pub fn new(name: impl Into<String>, computers: Vec<Ipv4Addr>) -> Self {
        Self {
            name: name.into(),
            computers,
            targets: SceneTargets::default(),
        }
    }

    pub fn with_targets(mut self, targets: SceneTargets) -> Self {
        self.targets = targets;
        self
    }
}

/// Current occupancy of one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStatus {
    pub name: String,
    pub occupied: bool,
    pub online: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "SceneTargets::is_empty")]
    pub targets: SceneTargets,
}

/// Room switching between occupied and vacant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyChange {
    pub room: String,
    pub occupied: bool,
    pub online: usize,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "SceneTargets::is_empty")]
    pub targets: SceneTargets,
}

/// Tracks room occupancy across poll cycles
#[derive(Debug, Clone, Default)]
pub struct OccupancyTracker {
    rooms: Vec<Room>,
    occupied: HashMap<String, bool>,
}

impl OccupancyTracker {
    pub fn new(rooms: Vec<Room>) -> Self {
        Self {
            rooms,
            occupied: HashMap::new(),
        }
    }

    /// Swap the room layout; rooms that survive keep their last occupancy
    pub fn set_rooms(&mut self, rooms: Vec<Room>) {
        self.occupied
            .retain(|name, _| rooms.iter().any(|r| &r.name == name));
        self.rooms = rooms;
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Occupancy of every room given the latest device states
    pub fn status(&self, states: &[DeviceState]) -> Vec<RoomStatus> {
        self.status_from(&online_map(states))
    }

    /// Occupancy of every room given per-address online flags.
    ///
    /// Addresses missing from `online` count as offline.
    pub fn status_from(&self, online: &HashMap<Ipv4Addr, bool>) -> Vec<RoomStatus> {
        self.rooms
            .iter()
            .map(|room| {
                let online_count = room
                    .computers
                    .iter()
                    .filter(|ip| online.get(ip).copied().unwrap_or(false))
                    .count();
                RoomStatus {
                    name: room.name.clone(),
                    occupied: online_count > 0,
                    online: online_count,
                    total: room.computers.len(),
                    targets: room.targets.clone(),
                }
            })
            .collect()
    }

    /// Recompute occupancy and return the rooms whose occupancy flipped.
    ///
    /// A room seen for the first time only reports a change when it starts
    /// out occupied.
    pub fn update(&mut self, states: &[DeviceState], at: DateTime<Utc>) -> Vec<OccupancyChange> {
        self.update_from(&online_map(states), at)
    }

    /// Same as [`update`](Self::update) with per-address online flags
    pub fn update_from(
        &mut self,
        online: &HashMap<Ipv4Addr, bool>,
        at: DateTime<Utc>,
    ) -> Vec<OccupancyChange> {
        let mut changes = Vec::new();

        for status in self.status_from(online) {
            let previous = self
                .occupied
                .insert(status.name.clone(), status.occupied)
                .unwrap_or(false);

            if previous != status.occupied {
                info!(
                    room = %status.name,
                    occupied = status.occupied,
                    online = status.online,
                    "Room occupancy changed"
                );
                changes.push(OccupancyChange {
                    room: status.name,
                    occupied: status.occupied,
                    online: status.online,
                    at,
                    targets: status.targets,
                });
            }
        }

        changes
    }
}

fn online_map(states: &[DeviceState]) -> HashMap<Ipv4Addr, bool> {
    states.iter().map(|s| (s.address, s.online)).collect()
}
