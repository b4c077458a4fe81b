//! Eases rendered vehicle positions towards their schedule-derived targets.

use crate::geo::{self, LngLat};
use crate::position::{RawPosition, VehicleStatus};
use crate::schedule::StopRef;
use crate::VehicleId;
use itertools::Itertools;
use log::debug;
use slotmap::SecondaryMap;
use std::collections::HashMap;

/// A vehicle's rendered position and the raw position it is moving towards.
#[derive(Clone, Debug)]
pub struct SmoothedPosition {
    /// The rendered coordinate.
    pub coord: LngLat,
    /// The rendered bearing, in degrees.
    pub bearing: f64,
    /// The latest raw position. Its metadata is used as-is.
    pub target: RawPosition,
}

impl SmoothedPosition {
    fn new(target: RawPosition) -> Self {
        Self {
            coord: target.coord,
            bearing: target.bearing,
            target,
        }
    }

    /// Moves the fraction `alpha` of the way towards a new target,
    /// or straight to it if it is further than `snap_distance` m away.
    fn advance(&mut self, target: RawPosition, alpha: f64, snap_distance: f64) {
        if geo::distance(self.coord, target.coord) > snap_distance {
            self.coord = target.coord;
            self.bearing = target.bearing;
        } else {
            self.coord = geo::lerp(self.coord, target.coord, alpha);
            self.bearing = geo::lerp_bearing(self.bearing, target.bearing, alpha);
        }
        self.target = target;
    }

    pub fn status(&self) -> VehicleStatus {
        self.target.status
    }
}

/// Tracks the rendered position of every vehicle.
pub struct PositionTracker {
    entries: SecondaryMap<VehicleId, SmoothedPosition>,
    /// The time constant of the exponential smoothing, in ms.
    time_constant_ms: f64,
    snap_distance: f64,
}

impl PositionTracker {
    pub fn new(time_constant_ms: f64, snap_distance: f64) -> Self {
        Self {
            entries: SecondaryMap::new(),
            time_constant_ms,
            snap_distance,
        }
    }

    /// The fraction of the remaining distance covered in a tick of `dt_ms` ms.
    fn alpha(&self, dt_ms: f64) -> f64 {
        if self.time_constant_ms <= 0.0 {
            1.0
        } else {
            1.0 - (-dt_ms.max(0.0) / self.time_constant_ms).exp()
        }
    }

    /// Moves every vehicle towards its latest raw position.
    ///
    /// Vehicles seen for the first time are placed at their raw position,
    /// and vehicles without a raw position are forgotten.
    pub fn update(&mut self, raws: Vec<(VehicleId, RawPosition)>, dt_ms: f64) {
        let alpha = self.alpha(dt_ms);

        let mut seen = SecondaryMap::with_capacity(raws.len());
        for (id, _) in &raws {
            seen.insert(*id, ());
        }
        let before = self.entries.len();
        self.entries.retain(|id, _| seen.contains_key(id));
        if self.entries.len() < before {
            debug!("Retired {} smoothed positions", before - self.entries.len());
        }

        for (id, raw) in raws {
            match self.entries.get_mut(id) {
                Some(entry) => entry.advance(raw, alpha, self.snap_distance),
                None => {
                    self.entries.insert(id, SmoothedPosition::new(raw));
                }
            }
        }
    }

    /// The rendered position of a vehicle.
    pub fn get(&self, id: VehicleId) -> Option<&SmoothedPosition> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: VehicleId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VehicleId, &SmoothedPosition)> {
        self.entries.iter()
    }

    pub fn remove(&mut self, id: VehicleId) {
        self.entries.remove(id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The vehicles to draw this tick.
    ///
    /// A waiting vehicle is only drawn while a vehicle of the same line is past
    /// halfway along its final leg towards the waiting vehicle's stop, or has
    /// completed its trip there. Each such vehicle reveals at most one waiting
    /// vehicle: the one that departs first. A completed vehicle is only drawn
    /// alongside a waiting vehicle at its last stop, latest arrival first.
    pub fn visible(&self) -> Vec<VehicleId> {
        let key = |e: &SmoothedPosition, stop: &StopRef| {
            (e.target.line_number.clone(), stop.id.clone())
        };

        let mut finishing: HashMap<(String, String), usize> = HashMap::new();
        for (_, entry) in self.iter() {
            let raw = &entry.target;
            if raw.final_leg && raw.status.is_moving() && raw.progress > 0.5 {
                if let Some(next) = &raw.next_stop {
                    *finishing.entry(key(entry, next)).or_default() += 1;
                }
            }
        }

        let by_stop = |status: VehicleStatus| {
            self.iter()
                .filter(move |(_, e)| e.status() == status)
                .map(|(id, e)| (key(e, &e.target.current_stop), (id, e)))
                .into_group_map()
        };
        let waiting = by_stop(VehicleStatus::Waiting);
        let completed = by_stop(VehicleStatus::Completed);

        let mut revealed = SecondaryMap::new();
        for (stop, mut vehicles) in completed {
            let count = waiting.get(&stop).map_or(0, Vec::len);
            vehicles.sort_by(|(_, a), (_, b)| {
                b.target
                    .departs_at
                    .cmp(&a.target.departs_at)
                    .then_with(|| a.target.trip_id.cmp(&b.target.trip_id))
            });
            for (id, _) in vehicles.into_iter().take(count) {
                revealed.insert(id, ());
                *finishing.entry(stop.clone()).or_default() += 1;
            }
        }
        for (stop, mut vehicles) in waiting {
            let count = finishing.get(&stop).copied().unwrap_or(0);
            vehicles.sort_by(|(_, a), (_, b)| {
                a.target
                    .departs_at
                    .cmp(&b.target.departs_at)
                    .then_with(|| a.target.trip_id.cmp(&b.target.trip_id))
            });
            for (id, _) in vehicles.into_iter().take(count) {
                revealed.insert(id, ());
            }
        }

        self.iter()
            .filter(|(id, e)| match e.status() {
                VehicleStatus::Waiting | VehicleStatus::Completed => revealed.contains_key(*id),
                _ => true,
            })
            .map(|(id, _)| id)
            .collect()
    }
}
