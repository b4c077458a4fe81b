//! The per-tick working set and the records handed to the renderer.

use crate::geo::{self, LngLat};
use crate::position::VehicleStatus;
use crate::VehicleId;
#[cfg(feature = "serde")]
use serde::Serialize;

/// Which way a vehicle travels relative to the orientation of its route's track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TravelDirection {
    /// Towards increasing distance along the route.
    Forward,
    /// Towards decreasing distance along the route.
    Backward,
}

impl TravelDirection {
    /// Determines the direction of travel from the vehicle's bearing
    /// and the track's forward bearing at the vehicle.
    pub fn from_bearings(vehicle: f64, track: f64) -> Self {
        if geo::bearing_difference(vehicle, track) < 90.0 {
            Self::Forward
        } else {
            Self::Backward
        }
    }

    /// Converts a distance along the route into a distance travelled in this direction.
    pub fn travelled(self, linear: f64, route_length: f64) -> f64 {
        match self {
            Self::Forward => linear,
            Self::Backward => route_length - linear,
        }
    }

    /// Converts a distance travelled in this direction into a distance along the route.
    pub fn linear(self, travelled: f64, route_length: f64) -> f64 {
        match self {
            Self::Forward => travelled,
            Self::Backward => route_length - travelled,
        }
    }

    /// Converts the track's forward bearing into a bearing in this direction.
    pub fn bearing(self, track_bearing: f64) -> f64 {
        match self {
            Self::Forward => track_bearing,
            Self::Backward => geo::normalize_bearing(track_bearing + 180.0),
        }
    }
}

/// A vehicle being rendered this tick.
#[derive(Clone, Debug)]
pub struct RenderVehicle {
    pub id: VehicleId,
    /// The coordinate the vehicle is drawn at.
    pub coord: LngLat,
    /// The bearing the vehicle is drawn with.
    pub bearing: f64,
    /// Whether the vehicle is moving along the track.
    pub moving: bool,
    /// The distance of the vehicle along its route, if it could be placed on the track.
    pub linear: Option<f64>,
    /// The direction of travel along the route's track.
    pub direction: TravelDirection,
}

/// The rendered vehicles sharing a route.
#[derive(Clone, Debug)]
pub struct RouteGroup {
    pub route_id: String,
    pub vehicles: Vec<RenderVehicle>,
}

/// The state of one tick, handed to one processing stage at a time.
#[derive(Clone, Debug, Default)]
pub struct WorkingSet {
    pub groups: Vec<RouteGroup>,
    pub stats: FrameStats,
}

impl WorkingSet {
    /// Iterates over all vehicles in the working set.
    pub fn vehicles(&self) -> impl Iterator<Item = (&str, &RenderVehicle)> {
        self.groups
            .iter()
            .flat_map(|g| g.vehicles.iter().map(move |v| (g.route_id.as_str(), v)))
    }
}

/// Counters describing one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct FrameStats {
    pub waiting: usize,
    pub at_stop: usize,
    pub in_transit: usize,
    pub approaching: usize,
    pub completed: usize,
    /// Waiting vehicles not drawn because nothing is finishing at their stop.
    pub hidden: usize,
    /// Vehicles positioned on a synthetic path instead of the track.
    pub geometry_fallbacks: usize,
    /// Vehicles moved back to keep their distance from the vehicle ahead.
    pub collision_pushes: usize,
    /// Vehicles drawn with last tick's body shape.
    pub body_fallbacks: usize,
}

impl FrameStats {
    /// Counts a vehicle with the given status.
    pub fn count(&mut self, status: VehicleStatus) {
        let counter = match status {
            VehicleStatus::Waiting => &mut self.waiting,
            VehicleStatus::AtStop => &mut self.at_stop,
            VehicleStatus::InTransit => &mut self.in_transit,
            VehicleStatus::Approaching => &mut self.approaching,
            VehicleStatus::Completed => &mut self.completed,
        };
        *counter += 1;
    }
}

/// A vehicle to draw.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct RenderRecord {
    pub trip_id: String,
    /// `[longitude, latitude]`
    pub coord: [f64; 2],
    pub bearing: f64,
    pub status: VehicleStatus,
    pub line_number: String,
    pub destination: String,
    pub delay_minutes: Option<i32>,
    pub current_stop: String,
    pub next_stop: Option<String>,
}

/// One body segment of a vehicle, as a closed ring for extrusion.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct SegmentPolygon {
    pub trip_id: String,
    /// The index of the segment, counting from the head of the vehicle.
    pub index: usize,
    /// `[longitude, latitude]` pairs, with the first repeated at the end.
    pub ring: [[f64; 2]; 5],
    pub color: String,
    pub height: f64,
}

/// Everything the renderer needs for one tick.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Frame {
    pub vehicles: Vec<RenderRecord>,
    pub bodies: Vec<SegmentPolygon>,
    pub stats: FrameStats,
}

impl Frame {
    /// Finds the record of the given trip.
    pub fn vehicle(&self, trip_id: &str) -> Option<&RenderRecord> {
        self.vehicles.iter().find(|v| v.trip_id == trip_id)
    }

    /// Serializes the frame as JSON.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
