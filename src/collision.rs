//! Keeps vehicles travelling the same way on a route from overlapping.

use crate::debug::debug_line;
use crate::features::TickProcessor;
use crate::frame::{RenderVehicle, WorkingSet};
use crate::geo;
use crate::route::{LinearRoute, RouteCache};
use log::trace;
use std::cmp::Ordering;

/// Vehicles whose bearings differ by this much or more travel opposite ways, in degrees.
const MAX_SAME_WAY_BEARING: f64 = 90.0;

/// Moves trailing vehicles back along the track until they are at least
/// a minimum distance behind the vehicle ahead.
#[derive(Clone, Copy, Debug)]
pub struct CollisionAvoidance {
    /// The minimum separation, in m.
    min_separation: f64,
}

impl CollisionAvoidance {
    pub fn new(min_separation: f64) -> Self {
        Self { min_separation }
    }

    /// Resolves the overlaps among the vehicles of one route.
    /// Returns the number of vehicles moved.
    ///
    /// Vehicles are visited from furthest along to least far along, so a push
    /// can cascade onto the vehicles behind. Only moving vehicles are pushed,
    /// and never further forward than they were.
    pub fn resolve(&self, vehicles: &mut [RenderVehicle], route: &LinearRoute) -> usize {
        let length = route.length();
        let travelled = |v: &RenderVehicle| v.linear.map(|l| v.direction.travelled(l, length));

        let mut order = (0..vehicles.len())
            .filter(|&i| vehicles[i].linear.is_some())
            .collect::<Vec<_>>();
        order.sort_by(|&a, &b| {
            let (a, b) = (travelled(&vehicles[a]), travelled(&vehicles[b]));
            b.partial_cmp(&a).unwrap_or(Ordering::Equal)
        });

        let mut pushes = 0;
        for (k, &i) in order.iter().enumerate() {
            if !vehicles[i].moving {
                continue;
            }
            for &j in order[..k].iter().rev() {
                let (ahead, me) = (&vehicles[j], &vehicles[i]);
                if ahead.direction != me.direction
                    || geo::bearing_difference(ahead.bearing, me.bearing) >= MAX_SAME_WAY_BEARING
                    || geo::distance(ahead.coord, me.coord) >= self.min_separation
                {
                    continue;
                }
                let (Some(ahead_t), Some(my_t)) = (travelled(ahead), travelled(me)) else {
                    continue;
                };
                if ahead_t - my_t >= self.min_separation {
                    continue;
                }

                let target = (ahead_t - self.min_separation).max(0.0);
                let linear = me.direction.linear(target, length);
                let sample = route.from_linear(linear);
                trace!("Pushed vehicle back {:.1} m", my_t - target);

                debug_line("collision push", me.coord, sample.coord);

                let me = &mut vehicles[i];
                me.coord = sample.coord;
                me.bearing = me.direction.bearing(sample.bearing);
                me.linear = Some(linear);
                pushes += 1;
            }
        }
        pushes
    }
}

impl TickProcessor for CollisionAvoidance {
    fn process(&self, working: &mut WorkingSet, routes: &RouteCache) {
        for group in &mut working.groups {
            if let Some(route) = routes.get(&group.route_id) {
                working.stats.collision_pushes += self.resolve(&mut group.vehicles, route);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::TravelDirection;
    use crate::geo::{LngLat, METRES_PER_DEGREE};
    use crate::VehicleId;
    use assert_approx_eq::assert_approx_eq;
    use slotmap::SlotMap;

    fn north(m: f64) -> LngLat {
        LngLat::new(10.9, 48.37 + m / METRES_PER_DEGREE)
    }

    fn route() -> LinearRoute {
        LinearRoute::new(&[vec![north(0.0), north(1_000.0)]], 500.0).unwrap()
    }

    fn vehicle(
        ids: &mut SlotMap<VehicleId, ()>,
        m: f64,
        bearing: f64,
        moving: bool,
    ) -> RenderVehicle {
        RenderVehicle {
            id: ids.insert(()),
            coord: north(m),
            bearing,
            moving,
            linear: Some(m),
            direction: TravelDirection::from_bearings(bearing, 0.0),
        }
    }

    #[test]
    fn trailing_vehicle_is_pushed_back() {
        let mut ids = SlotMap::with_key();
        let mut vehicles = vec![
            vehicle(&mut ids, 200.0, 0.0, true),
            vehicle(&mut ids, 230.0, 0.0, true),
        ];
        assert_eq!(CollisionAvoidance::new(50.0).resolve(&mut vehicles, &route()), 1);
        assert_approx_eq!(vehicles[0].linear.unwrap(), 180.0);
        assert!(geo::distance(vehicles[0].coord, north(180.0)) < 0.01);
        assert_approx_eq!(vehicles[1].linear.unwrap(), 230.0);
    }

    #[test]
    fn opposing_vehicles_are_left_alone() {
        let mut ids = SlotMap::with_key();
        let mut vehicles = vec![
            vehicle(&mut ids, 200.0, 0.0, true),
            vehicle(&mut ids, 230.0, 100.0, true),
        ];
        assert_eq!(CollisionAvoidance::new(50.0).resolve(&mut vehicles, &route()), 0);
        assert_eq!(vehicles[0].linear, Some(200.0));
        assert_eq!(vehicles[1].linear, Some(230.0));
    }

    #[test]
    fn diverging_bearings_are_left_alone() {
        // Both run with the track, but swing out on opposite sides of it.
        let mut ids = SlotMap::with_key();
        let mut vehicles = vec![
            vehicle(&mut ids, 200.0, 320.0, true),
            vehicle(&mut ids, 230.0, 80.0, true),
        ];
        assert!(vehicles
            .iter()
            .all(|v| v.direction == TravelDirection::Forward));
        assert_eq!(CollisionAvoidance::new(50.0).resolve(&mut vehicles, &route()), 0);
        assert_eq!(vehicles[0].linear, Some(200.0));
        assert_eq!(vehicles[0].coord, north(200.0));
        assert_eq!(vehicles[1].linear, Some(230.0));
    }

    #[test]
    fn stationary_vehicles_are_not_pushed() {
        let mut ids = SlotMap::with_key();
        let mut vehicles = vec![
            vehicle(&mut ids, 200.0, 0.0, false),
            vehicle(&mut ids, 230.0, 0.0, true),
        ];
        assert_eq!(CollisionAvoidance::new(50.0).resolve(&mut vehicles, &route()), 0);
        assert_eq!(vehicles[0].coord, north(200.0));
    }

    #[test]
    fn pushes_cascade() {
        let mut ids = SlotMap::with_key();
        let mut vehicles = vec![
            vehicle(&mut ids, 300.0, 0.0, true),
            vehicle(&mut ids, 280.0, 0.0, true),
            vehicle(&mut ids, 260.0, 0.0, true),
        ];
        let pushes = CollisionAvoidance::new(50.0).resolve(&mut vehicles, &route());
        assert!(pushes >= 2);
        assert_approx_eq!(vehicles[0].linear.unwrap(), 300.0);
        assert_approx_eq!(vehicles[1].linear.unwrap(), 250.0);
        assert_approx_eq!(vehicles[2].linear.unwrap(), 200.0);
    }

    #[test]
    fn backward_travel_pushes_towards_route_end() {
        let mut ids = SlotMap::with_key();
        let mut vehicles = vec![
            vehicle(&mut ids, 500.0, 180.0, true),
            vehicle(&mut ids, 520.0, 180.0, true),
        ];
        assert_eq!(CollisionAvoidance::new(50.0).resolve(&mut vehicles, &route()), 1);
        assert_approx_eq!(vehicles[0].linear.unwrap(), 500.0);
        assert_approx_eq!(vehicles[1].linear.unwrap(), 550.0);
        assert_approx_eq!(vehicles[1].bearing, 180.0, 1e-6);
    }

    #[test]
    fn push_stops_at_route_start() {
        let mut ids = SlotMap::with_key();
        let mut vehicles = vec![
            vehicle(&mut ids, 30.0, 0.0, true),
            vehicle(&mut ids, 10.0, 0.0, true),
        ];
        CollisionAvoidance::new(50.0).resolve(&mut vehicles, &route());
        assert_eq!(vehicles[1].linear, Some(0.0));
    }
}
