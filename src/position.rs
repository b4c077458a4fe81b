//! Schedule-derived vehicle positions.

use crate::dwell::simulated_dwell;
use crate::geo::{self, LngLat};
use crate::route::LinearRoute;
use crate::schedule::{StopRef, StopTime, Trip};
use arrayvec::ArrayVec;
use chrono::{DateTime, FixedOffset, Utc};
use log::trace;
use std::collections::HashMap;

/// The most points a synthetic fallback path may have.
const MAX_FALLBACK_POINTS: usize = 16;

/// What a vehicle is currently doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize), serde(rename_all = "snake_case"))]
pub enum VehicleStatus {
    /// At the first stop, before the trip starts.
    Waiting,
    /// Standing at an intermediate stop.
    AtStop,
    /// Travelling between two stops.
    InTransit,
    /// About to arrive at the next stop.
    Approaching,
    /// Past the last stop.
    Completed,
}

impl VehicleStatus {
    /// Whether the vehicle is moving along the track.
    pub fn is_moving(self) -> bool {
        matches!(self, Self::InTransit | Self::Approaching)
    }
}

/// A vehicle's position as derived from its schedule, before any smoothing.
#[derive(Clone, Debug)]
pub struct RawPosition {
    pub trip_id: String,
    pub route_id: String,
    pub line_number: String,
    pub destination: String,
    /// The coordinate of the head of the vehicle.
    pub coord: LngLat,
    /// The direction of travel, in degrees.
    pub bearing: f64,
    /// The fraction of the current leg that has been travelled.
    pub progress: f64,
    pub status: VehicleStatus,
    /// The stop most recently reached, or the first stop.
    pub current_stop: StopRef,
    /// The stop being travelled to, if any.
    pub next_stop: Option<StopRef>,
    pub delay_minutes: Option<i32>,
    /// Whether the leg is the last leg of the trip.
    pub final_leg: bool,
    /// Whether the position lies on track geometry rather than a synthetic path.
    pub on_track: bool,
    /// When the vehicle leaves, or left, its current stop.
    pub departs_at: DateTime<Utc>,
}

/// The inputs to [compute_position] other than the trip itself.
#[derive(Clone, Copy)]
pub struct PositionContext<'a> {
    /// The linearized route of the trip, if it has usable geometry.
    pub route: Option<&'a LinearRoute>,
    /// The fraction of a leg after which a vehicle is approaching the next stop.
    pub approach_threshold: f64,
    /// The number of points on a synthetic fallback path.
    pub fallback_points: usize,
    /// Whether vehicles dwell at stops without a timetabled dwell.
    pub simulated_stops: bool,
    /// The local time zone, for time-of-day decisions.
    pub local_offset: FixedOffset,
}

/// Where the stops of each leg of a trip lie on its route's track.
///
/// Entries are keyed by the index of the leg's first stop. The cache must be
/// cleared whenever the trip's stops or its route's geometry change.
#[derive(Clone, Debug, Default)]
pub struct LegCache {
    legs: HashMap<usize, Option<(f64, f64)>>,
}

impl LegCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The distances along the route of the stops of leg `idx`,
    /// or `None` if they cannot be placed on the track.
    fn ends(
        &mut self,
        idx: usize,
        from: &StopTime,
        to: &StopTime,
        route: &LinearRoute,
    ) -> Option<(f64, f64)> {
        *self
            .legs
            .entry(idx)
            .or_insert_with(|| locate_leg(from, to, route))
    }

    pub fn clear(&mut self) {
        self.legs.clear();
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }
}

/// Projects both stops of a leg onto the track.
fn locate_leg(from: &StopTime, to: &StopTime, route: &LinearRoute) -> Option<(f64, f64)> {
    let a = from.place.coordinate();
    let b = to.place.coordinate();
    let heading = geo::bearing(a, b);
    match (route.to_linear(a, Some(heading)), route.to_linear(b, Some(heading))) {
        (Some(start), Some(end)) if start != end => Some((start, end)),
        _ => {
            trace!(
                "Could not place leg {} -> {} on the track",
                from.place.id(),
                to.place.id()
            );
            None
        }
    }
}

/// The path a vehicle follows between two stops.
enum LegPath<'a> {
    /// A stretch of the linearized route, between two distances along it.
    Track {
        route: &'a LinearRoute,
        from: f64,
        to: f64,
    },
    /// A straight synthetic path.
    Straight(ArrayVec<LngLat, MAX_FALLBACK_POINTS>),
}

impl<'a> LegPath<'a> {
    /// Finds the path of leg `idx` of the trip, preferring the route's track.
    fn new(
        stops: &[StopTime],
        idx: usize,
        ctx: &PositionContext<'a>,
        legs: &mut LegCache,
    ) -> Self {
        let (from, to) = (&stops[idx], &stops[idx + 1]);
        if let Some(route) = ctx.route {
            if let Some((start, end)) = legs.ends(idx, from, to, route) {
                return Self::Track {
                    route,
                    from: start,
                    to: end,
                };
            }
        }
        let path = fallback_path(
            from.place.coordinate(),
            to.place.coordinate(),
            ctx.fallback_points,
        );
        Self::Straight(path)
    }

    /// Samples the path at the given fraction of its length.
    fn sample(&self, progress: f64) -> (LngLat, f64) {
        match self {
            Self::Track { route, from, to } => {
                let sample = route.from_linear(from + (to - from) * progress);
                let bearing = if to >= from {
                    sample.bearing
                } else {
                    geo::normalize_bearing(sample.bearing + 180.0)
                };
                (sample.coord, bearing)
            }
            Self::Straight(path) => {
                let coord = geo::interpolate_along_line(path, progress);
                let bearing = match (path.first(), path.last()) {
                    (Some(a), Some(b)) => geo::bearing(*a, *b),
                    _ => 0.0,
                };
                (coord, bearing)
            }
        }
    }

    fn on_track(&self) -> bool {
        matches!(self, Self::Track { .. })
    }
}

/// A straight path of evenly spaced points between two coordinates.
pub fn fallback_path(a: LngLat, b: LngLat, points: usize) -> ArrayVec<LngLat, MAX_FALLBACK_POINTS> {
    let points = points.clamp(2, MAX_FALLBACK_POINTS);
    (0..points)
        .map(|i| geo::lerp(a, b, i as f64 / (points - 1) as f64))
        .collect()
}

/// Computes where a trip's vehicle is at the given time.
///
/// `legs` remembers where the trip's stops lie on the track between calls.
/// Returns `None` only if the trip has no stops.
pub fn compute_position(
    trip: &Trip,
    now: DateTime<Utc>,
    ctx: &PositionContext,
    legs: &mut LegCache,
) -> Option<RawPosition> {
    let stops = &trip.stops;
    let first = stops.first()?;
    let last = stops.last()?;

    let position = |stop: &StopTime,
                    next: Option<&StopTime>,
                    leg: Option<(&LegPath, f64)>,
                    status: VehicleStatus,
                    final_leg: bool,
                    departs_at: DateTime<Utc>| {
        let (coord, bearing, on_track) = match leg {
            Some((path, progress)) => {
                let (coord, bearing) = path.sample(progress);
                (coord, bearing, path.on_track())
            }
            None => (stop.place.coordinate(), 0.0, false),
        };
        let progress = match (status, leg) {
            (VehicleStatus::Completed, _) => 1.0,
            (_, Some((_, progress))) => progress,
            (_, None) => 0.0,
        };
        RawPosition {
            trip_id: trip.trip_id.clone(),
            route_id: trip.route_id.clone(),
            line_number: trip.line_number.clone(),
            destination: trip.destination.clone(),
            coord,
            bearing,
            progress,
            status,
            current_stop: stop.place.to_ref(),
            next_stop: next.map(|s| s.place.to_ref()),
            delay_minutes: trip.delay_at(now),
            final_leg,
            on_track,
            departs_at,
        }
    };

    // Before the trip starts
    if now < first.departure() {
        let next = stops.get(1);
        let path = next.map(|_| LegPath::new(stops, 0, ctx, legs));
        let leg = path.as_ref().map(|path| (path, 0.0));
        return Some(position(
            first,
            next,
            leg,
            VehicleStatus::Waiting,
            stops.len() == 2,
            first.departure(),
        ));
    }

    // After the trip ends
    if now >= last.arrival() {
        let path = stops
            .len()
            .checked_sub(2)
            .map(|idx| LegPath::new(stops, idx, ctx, legs));
        let leg = path.as_ref().map(|path| (path, 1.0));
        return Some(position(
            last,
            None,
            leg,
            VehicleStatus::Completed,
            true,
            last.arrival(),
        ));
    }

    // Find the leg being travelled
    let idx = stops.partition_point(|s| s.arrival() <= now).saturating_sub(1);
    let from = &stops[idx];
    let to = &stops[idx + 1];
    let final_leg = idx + 2 == stops.len();
    let path = LegPath::new(stops, idx, ctx, legs);

    let mut leg_start = from.departure();
    let leg_end = to.arrival();
    let at_stop = |departs_at| {
        position(
            from,
            Some(to),
            Some((&path, 0.0)),
            VehicleStatus::AtStop,
            final_leg,
            departs_at,
        )
    };
    if now < leg_start {
        return Some(at_stop(leg_start));
    }

    if ctx.simulated_stops && idx > 0 && !from.has_dwell() {
        let local = leg_start.with_timezone(&ctx.local_offset);
        if let Some(dwell) = simulated_dwell(&trip.trip_id, from.place.id(), &local) {
            let dwell = dwell.min((leg_end - leg_start) / 2);
            leg_start = leg_start + dwell;
            if now < leg_start {
                return Some(at_stop(leg_start));
            }
        }
    }

    let duration = (leg_end - leg_start).num_milliseconds() as f64;
    let elapsed = (now - leg_start).num_milliseconds() as f64;
    let progress = if duration > 0.0 {
        (elapsed / duration).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let status = if progress >= ctx.approach_threshold {
        VehicleStatus::Approaching
    } else {
        VehicleStatus::InTransit
    };

    Some(position(
        from,
        Some(to),
        Some((&path, progress)),
        status,
        final_leg,
        leg_start,
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dwell::should_stop_at_station;
    use crate::geo::METRES_PER_DEGREE;
    use crate::schedule::StopPlace;
    use assert_approx_eq::assert_approx_eq;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, h, m, s).unwrap()
    }

    fn north(m: f64) -> LngLat {
        LngLat::new(10.9, 48.37 + m / METRES_PER_DEGREE)
    }

    fn stop(id: &str, m: f64, time: DateTime<Utc>) -> StopTime {
        StopTime::new(StopPlace::platform(id, id, north(m)), time)
    }

    fn trip(stops: Vec<StopTime>) -> Trip {
        Trip {
            trip_id: "T".into(),
            route_id: "R".into(),
            line_number: "2".into(),
            destination: "Augsburg West".into(),
            stops,
        }
    }

    fn ctx(route: Option<&LinearRoute>) -> PositionContext {
        PositionContext {
            route,
            approach_threshold: 0.9,
            fallback_points: 10,
            simulated_stops: false,
            local_offset: FixedOffset::east_opt(0).unwrap(),
        }
    }

    fn locate(trip: &Trip, now: DateTime<Utc>, ctx: &PositionContext) -> Option<RawPosition> {
        compute_position(trip, now, ctx, &mut LegCache::new())
    }

    fn straight_route() -> LinearRoute {
        LinearRoute::new(&[vec![north(0.0), north(250.0), north(500.0)]], 500.0).unwrap()
    }

    #[test]
    fn midway_between_stops() {
        let route = straight_route();
        let trip = trip(vec![stop("A", 0.0, at(8, 0, 0)), stop("B", 500.0, at(8, 5, 0))]);
        let pos = locate(&trip, at(8, 2, 30), &ctx(Some(&route))).unwrap();
        assert_eq!(pos.status, VehicleStatus::InTransit);
        assert_approx_eq!(pos.progress, 0.5);
        assert!(geo::distance(pos.coord, north(250.0)) < 0.5);
        assert_approx_eq!(pos.bearing, 0.0, 1e-6);
        assert!(pos.on_track);
        assert!(pos.final_leg);
        assert_eq!(pos.current_stop.id, "A");
        assert_eq!(pos.next_stop.unwrap().id, "B");
    }

    #[test]
    fn completed_after_last_stop() {
        let route = straight_route();
        let trip = trip(vec![stop("A", 0.0, at(8, 0, 0)), stop("B", 500.0, at(8, 5, 0))]);
        let pos = locate(&trip, at(8, 5, 1), &ctx(Some(&route))).unwrap();
        assert_eq!(pos.status, VehicleStatus::Completed);
        assert_eq!(pos.progress, 1.0);
        assert!(pos.next_stop.is_none());
    }

    #[test]
    fn waiting_before_first_stop() {
        let route = straight_route();
        let trip = trip(vec![stop("A", 0.0, at(8, 0, 0)), stop("B", 500.0, at(8, 5, 0))]);
        let pos = locate(&trip, at(7, 58, 0), &ctx(Some(&route))).unwrap();
        assert_eq!(pos.status, VehicleStatus::Waiting);
        assert_eq!(pos.progress, 0.0);
        assert!(geo::distance(pos.coord, north(0.0)) < 0.5);
    }

    #[test]
    fn approaching_near_the_end_of_a_leg() {
        let route = straight_route();
        let trip = trip(vec![stop("A", 0.0, at(8, 0, 0)), stop("B", 500.0, at(8, 5, 0))]);
        let pos = locate(&trip, at(8, 4, 45), &ctx(Some(&route))).unwrap();
        assert_eq!(pos.status, VehicleStatus::Approaching);
        assert_approx_eq!(pos.progress, 0.95);
    }

    #[test]
    fn estimates_override_plans() {
        let route = straight_route();
        let trip = trip(vec![
            stop("A", 0.0, at(8, 0, 0)).with_estimate(at(8, 1, 0)),
            stop("B", 500.0, at(8, 5, 0)).with_estimate(at(8, 6, 0)),
        ]);
        let pos = locate(&trip, at(8, 3, 30), &ctx(Some(&route))).unwrap();
        assert_approx_eq!(pos.progress, 0.5);
        assert_eq!(pos.delay_minutes, Some(1));
    }

    #[test]
    fn explicit_dwell() {
        let route = straight_route();
        let trip = trip(vec![
            stop("A", 0.0, at(8, 0, 0)),
            stop("B", 250.0, at(8, 2, 0)).with_departure(at(8, 3, 0)),
            stop("C", 500.0, at(8, 5, 0)),
        ]);
        let pos = locate(&trip, at(8, 2, 30), &ctx(Some(&route))).unwrap();
        assert_eq!(pos.status, VehicleStatus::AtStop);
        assert_eq!(pos.current_stop.id, "B");
        assert!(geo::distance(pos.coord, north(250.0)) < 0.5);

        let pos = locate(&trip, at(8, 4, 0), &ctx(Some(&route))).unwrap();
        assert_eq!(pos.status, VehicleStatus::InTransit);
        assert_approx_eq!(pos.progress, 0.5);
        assert!(pos.final_leg);
    }

    #[test]
    fn simulated_dwell_delays_departure() {
        let route = straight_route();
        let leg_start = at(8, 2, 0);
        // Pick a trip that stops at B at this time of day.
        let trip_id = (0..100)
            .map(|i| format!("trip-{}", i))
            .find(|id| should_stop_at_station(id, "B", &leg_start))
            .unwrap();
        let mut trip = trip(vec![
            stop("A", 0.0, at(8, 0, 0)),
            stop("B", 250.0, leg_start),
            stop("C", 500.0, at(8, 5, 0)),
        ]);
        trip.trip_id = trip_id;
        let ctx = PositionContext {
            simulated_stops: true,
            ..ctx(Some(&route))
        };

        let pos = locate(&trip, leg_start + Duration::seconds(5), &ctx).unwrap();
        assert_eq!(pos.status, VehicleStatus::AtStop);

        let pos = locate(&trip, leg_start + Duration::seconds(31), &ctx).unwrap();
        assert_eq!(pos.status, VehicleStatus::InTransit);
        assert!(pos.progress > 0.0 && pos.progress < 0.1);

        // The first stop never gets a simulated dwell.
        let pos = locate(&trip, at(8, 0, 6), &ctx).unwrap();
        assert_eq!(pos.status, VehicleStatus::InTransit);
    }

    #[test]
    fn falls_back_to_straight_path() {
        let trip = trip(vec![stop("A", 0.0, at(8, 0, 0)), stop("B", 500.0, at(8, 5, 0))]);
        let pos = locate(&trip, at(8, 2, 30), &ctx(None)).unwrap();
        assert!(!pos.on_track);
        assert!(geo::distance(pos.coord, north(250.0)) < 0.5);
        assert_approx_eq!(pos.bearing, 0.0, 1e-6);

        // A stop far from the track cannot be matched either.
        let route = LinearRoute::new(&[vec![north(5_000.0), north(6_000.0)]], 500.0).unwrap();
        let pos = locate(&trip, at(8, 2, 30), &ctx(Some(&route))).unwrap();
        assert!(!pos.on_track);
    }

    #[test]
    fn travel_against_track_orientation() {
        let route = straight_route();
        let trip = trip(vec![stop("B", 500.0, at(8, 0, 0)), stop("A", 0.0, at(8, 5, 0))]);
        let pos = locate(&trip, at(8, 1, 0), &ctx(Some(&route))).unwrap();
        assert!(pos.on_track);
        assert!(geo::distance(pos.coord, north(400.0)) < 0.5);
        assert_approx_eq!(pos.bearing, 180.0, 1e-6);
    }

    #[test]
    fn fallback_path_points() {
        let path = fallback_path(north(0.0), north(90.0), 10);
        assert_eq!(path.len(), 10);
        assert!(geo::distance(path[1], north(10.0)) < 1e-6);
        assert_eq!(fallback_path(north(0.0), north(1.0), 1000).len(), MAX_FALLBACK_POINTS);
    }

    #[test]
    fn leg_across_a_bend_ends_at_its_stops() {
        // North 300 m, east 300 m, then back south 300 m.
        let ne = north(300.0);
        let east = |p: LngLat| geo::destination(p, 90.0, 300.0);
        let route = LinearRoute::new(&[vec![north(0.0), ne, east(ne), east(north(0.0))]], 500.0)
            .unwrap();
        let a = StopPlace::platform("A", "A", north(250.0));
        let b = StopPlace::platform("B", "B", east(north(250.0)));
        let trip = trip(vec![
            StopTime::new(a.clone(), at(8, 0, 0)),
            StopTime::new(b.clone(), at(8, 7, 0)),
        ]);
        let ctx = ctx(Some(&route));

        let start = locate(&trip, at(8, 0, 0), &ctx).unwrap();
        assert!(start.on_track);
        assert!(geo::distance(start.coord, a.coordinate()) < 0.5);
        let end = locate(&trip, at(8, 6, 59), &ctx).unwrap();
        assert!(geo::distance(end.coord, b.coordinate()) < 1.5);
        assert_approx_eq!(end.bearing, 180.0, 0.1);
        let mid = locate(&trip, at(8, 3, 30), &ctx).unwrap();
        assert!(geo::distance(mid.coord, east(north(300.0))) > 100.0);
        assert_approx_eq!(mid.bearing, 90.0, 0.1);
    }

    #[test]
    fn leg_ends_are_remembered() {
        let route = straight_route();
        let trip = trip(vec![
            stop("A", 0.0, at(8, 0, 0)),
            stop("B", 250.0, at(8, 2, 0)),
            stop("C", 500.0, at(8, 5, 0)),
        ]);
        let mut legs = LegCache::new();
        compute_position(&trip, at(8, 1, 0), &ctx(Some(&route)), &mut legs).unwrap();
        compute_position(&trip, at(8, 1, 5), &ctx(Some(&route)), &mut legs).unwrap();
        assert_eq!(legs.len(), 1);
        compute_position(&trip, at(8, 3, 0), &ctx(Some(&route)), &mut legs).unwrap();
        assert_eq!(legs.len(), 2);
        let (from, to) = legs.legs[&1].unwrap();
        assert_approx_eq!(from, 250.0, 0.5);
        assert_approx_eq!(to, 500.0, 0.5);
        legs.clear();
        assert!(legs.is_empty());
    }

    #[test]
    fn empty_trip_has_no_position() {
        assert!(locate(&trip(vec![]), at(8, 0, 0), &ctx(None)).is_none());
    }
}
