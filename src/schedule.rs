//! The schedule and geometry data supplied by the data layer.

use crate::geo::LngLat;
use chrono::{DateTime, Utc};

/// The geometry of a route: one or more polylines, in traversal order.
#[derive(Clone, Debug, Default)]
pub struct RouteGeometry {
    /// Changes whenever the data layer supplies different geometry for the route.
    pub version: u64,
    /// The polylines making up the route.
    pub segments: Vec<Vec<LngLat>>,
}

/// A place at which a vehicle stops.
#[derive(Clone, Debug, PartialEq)]
pub enum StopPlace {
    /// A platform that passengers wait on.
    Platform {
        id: String,
        name: String,
        coord: LngLat,
    },
    /// The point on the track where the vehicle halts.
    StopPosition {
        id: String,
        name: String,
        coord: LngLat,
    },
}

impl StopPlace {
    /// Creates a [StopPlace::Platform].
    pub fn platform(id: impl Into<String>, name: impl Into<String>, coord: LngLat) -> Self {
        Self::Platform {
            id: id.into(),
            name: name.into(),
            coord,
        }
    }

    /// Creates a [StopPlace::StopPosition].
    pub fn stop_position(id: impl Into<String>, name: impl Into<String>, coord: LngLat) -> Self {
        Self::StopPosition {
            id: id.into(),
            name: name.into(),
            coord,
        }
    }

    /// The stable identifier (IFOPT) of the stop.
    pub fn id(&self) -> &str {
        match self {
            Self::Platform { id, .. } | Self::StopPosition { id, .. } => id,
        }
    }

    /// The display name of the stop.
    pub fn name(&self) -> &str {
        match self {
            Self::Platform { name, .. } | Self::StopPosition { name, .. } => name,
        }
    }

    /// The location of the stop.
    pub fn coordinate(&self) -> LngLat {
        match self {
            Self::Platform { coord, .. } | Self::StopPosition { coord, .. } => *coord,
        }
    }

    /// A lightweight reference to the stop, for display.
    pub fn to_ref(&self) -> StopRef {
        StopRef {
            id: self.id().to_owned(),
            name: self.name().to_owned(),
        }
    }
}

/// A reference to a stop, carried with vehicle positions for display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StopRef {
    pub id: String,
    pub name: String,
}

/// One scheduled call of a trip at a stop.
#[derive(Clone, Debug)]
pub struct StopTime {
    /// Where the vehicle stops.
    pub place: StopPlace,
    /// The timetabled arrival.
    pub planned_arrival: DateTime<Utc>,
    /// The live estimate of the arrival, if there is one.
    pub estimated_arrival: Option<DateTime<Utc>>,
    /// The timetabled departure, if it differs from the arrival.
    pub planned_departure: Option<DateTime<Utc>>,
    /// The live estimate of the departure, if there is one.
    pub estimated_departure: Option<DateTime<Utc>>,
    /// The delay reported for this call in minutes.
    pub delay_minutes: Option<i32>,
}

impl StopTime {
    /// Creates a stop time with only a planned time.
    pub fn new(place: StopPlace, planned: DateTime<Utc>) -> Self {
        Self {
            place,
            planned_arrival: planned,
            estimated_arrival: None,
            planned_departure: None,
            estimated_departure: None,
            delay_minutes: None,
        }
    }

    /// Sets the estimated arrival, deriving the delay from it.
    pub fn with_estimate(mut self, estimated: DateTime<Utc>) -> Self {
        self.estimated_arrival = Some(estimated);
        self.delay_minutes = Some((estimated - self.planned_arrival).num_minutes() as i32);
        self
    }

    /// Sets the planned departure, giving the stop an explicit dwell time.
    pub fn with_departure(mut self, departure: DateTime<Utc>) -> Self {
        self.planned_departure = Some(departure);
        self
    }

    /// The best known arrival time: the estimate if present, otherwise the plan.
    pub fn arrival(&self) -> DateTime<Utc> {
        self.estimated_arrival.unwrap_or(self.planned_arrival)
    }

    /// The best known departure time, never earlier than the arrival.
    ///
    /// A planned departure without an estimate is shifted by the arrival's delay.
    pub fn departure(&self) -> DateTime<Utc> {
        let departure = match (self.estimated_departure, self.planned_departure) {
            (Some(estimated), _) => estimated,
            (None, Some(planned)) => planned + (self.arrival() - self.planned_arrival),
            (None, None) => self.arrival(),
        };
        departure.max(self.arrival())
    }

    /// Whether the schedule gives this stop an explicit dwell time.
    pub fn has_dwell(&self) -> bool {
        self.departure() > self.arrival()
    }
}

/// One scheduled run of a vehicle along a route.
#[derive(Clone, Debug)]
pub struct Trip {
    /// The unique identifier of the trip.
    pub trip_id: String,
    /// The route the trip runs on.
    pub route_id: String,
    /// The line number or label shown to passengers.
    pub line_number: String,
    /// The final destination shown to passengers.
    pub destination: String,
    /// The calls of the trip, in order.
    pub stops: Vec<StopTime>,
}

impl Trip {
    /// The delay of the trip in minutes, as reported for the next stop at `now`
    /// or, failing that, the most recent stop with a reported delay.
    pub fn delay_at(&self, now: DateTime<Utc>) -> Option<i32> {
        let next = self.stops.iter().position(|s| s.arrival() > now);
        let upto = next.map(|idx| idx + 1).unwrap_or(self.stops.len());
        self.stops[..upto]
            .iter()
            .rev()
            .find_map(|stop| stop.delay_minutes)
    }
}
