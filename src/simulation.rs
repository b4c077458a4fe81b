use crate::body::{segment_ring, BodySample, BodySampler, SamplerParams};
use crate::collision::CollisionAvoidance;
use crate::config::SimulationConfig;
#[cfg(feature = "debug")]
use crate::debug::take_debug_frame;
use crate::driver::TickDriver;
use crate::features::{
    Feature, FeatureManager, KeyValueStore, MemoryStore, COLLISION_AVOIDANCE, SIMULATED_STOPS,
    VEHICLE_BODIES,
};
use crate::frame::{
    Frame, FrameStats, RenderRecord, RenderVehicle, RouteGroup, SegmentPolygon, TravelDirection,
    WorkingSet,
};
use crate::position::{compute_position, LegCache, PositionContext, VehicleStatus};
use crate::route::{LinearRoute, RouteCache};
use crate::schedule::{RouteGeometry, Trip};
use crate::smoothing::{PositionTracker, SmoothedPosition};
use crate::{VehicleId, VehicleSet};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use log::{debug, info, trace};
use slotmap::SecondaryMap;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Animates the vehicles of a transit network from their schedules.
pub struct Simulation {
    config: SimulationConfig,
    /// The optional behaviours and whether each is enabled.
    features: FeatureManager,
    /// The linearized route geometries.
    routes: RouteCache,
    /// The trips being animated.
    vehicles: VehicleSet,
    /// Maps trip IDs to vehicles.
    trips: HashMap<String, VehicleId>,
    /// Where each trip's stops lie on its route's track.
    legs: SecondaryMap<VehicleId, LegCache>,
    /// The rendered position of each vehicle.
    tracker: PositionTracker,
    /// The body shape of each vehicle.
    sampler: BodySampler,
    /// Paces the animation ticks.
    driver: TickDriver,
    /// Whether vehicles are being rendered at all.
    rendering: bool,
    /// The current frame of animation.
    frame: usize,
    /// Debugging information from the previous frame.
    #[cfg(feature = "debug")]
    debug: serde_json::Value,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(SimulationConfig::default(), Box::new(MemoryStore::new()))
    }
}

impl Simulation {
    /// Creates a simulation, restoring the enabled features from `store`.
    pub fn new(config: SimulationConfig, store: Box<dyn KeyValueStore>) -> Self {
        let mut features = FeatureManager::new(store);
        features.register(
            Feature::new(
                COLLISION_AVOIDANCE,
                "Collision avoidance",
                "Keeps vehicles on the same track a minimum distance apart.",
                true,
            )
            .with_processor(CollisionAvoidance::new(config.min_separation_m)),
        );
        features.register(Feature::new(
            SIMULATED_STOPS,
            "Simulated stops",
            "Lets vehicles dwell at stops that have no timetabled dwell time.",
            true,
        ));
        features.register(Feature::new(
            VEHICLE_BODIES,
            "Vehicle bodies",
            "Draws articulated bodies that follow the track.",
            true,
        ));

        let sampler = BodySampler::new(
            config.body_template.clone(),
            SamplerParams {
                length_tolerance: config.segment_length_tolerance,
                max_front_jump: config.max_front_jump_m,
                max_fallback_ticks: config.max_fallback_ticks,
            },
        );
        let mut driver = TickDriver::new(config.tick_interval());
        driver.start();

        Self {
            features,
            routes: RouteCache::new(config.max_match_distance_m),
            vehicles: VehicleSet::with_key(),
            trips: HashMap::new(),
            legs: SecondaryMap::new(),
            tracker: PositionTracker::new(config.smoothing_time_ms, config.snap_distance_m),
            sampler,
            driver,
            rendering: true,
            frame: 0,
            #[cfg(feature = "debug")]
            debug: serde_json::Value::Null,
            config,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn features(&self) -> &FeatureManager {
        &self.features
    }

    pub fn features_mut(&mut self) -> &mut FeatureManager {
        &mut self.features
    }

    /// Supplies the geometry of a route.
    pub fn set_route_geometry(&mut self, route_id: &str, geometry: Rc<RouteGeometry>) {
        if self.routes.update(route_id, geometry) {
            for (id, trip) in &self.vehicles {
                if trip.route_id == route_id {
                    self.legs.remove(id);
                }
            }
        }
    }

    /// Gets the linearization of a route.
    pub fn route(&self, route_id: &str) -> Option<&LinearRoute> {
        self.routes.get(route_id)
    }

    /// Supplies the active trips of a route.
    ///
    /// Trips of the route that are not supplied again are retired,
    /// along with their rendered positions and body shapes.
    pub fn set_trips(&mut self, route_id: &str, trips: Vec<Trip>) {
        let incoming = trips
            .iter()
            .map(|t| t.trip_id.as_str())
            .collect::<HashSet<_>>();
        let gone = self
            .vehicles
            .iter()
            .filter(|(_, t)| t.route_id == route_id && !incoming.contains(t.trip_id.as_str()))
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        for id in gone {
            self.retire(id);
        }

        for mut trip in trips {
            if trip.route_id != route_id {
                trip.route_id = route_id.to_owned();
            }
            match self.trips.get(&trip.trip_id) {
                Some(&id) => {
                    let old = self.vehicles[id].stops.iter().map(|s| &s.place);
                    if !old.eq(trip.stops.iter().map(|s| &s.place)) {
                        self.legs.remove(id);
                    }
                    self.vehicles[id] = trip;
                }
                None => {
                    let trip_id = trip.trip_id.clone();
                    let id = self.vehicles.insert(trip);
                    self.trips.insert(trip_id, id);
                }
            }
        }
        debug!("Route {} has {} active trips", route_id, self.count_trips(route_id));
    }

    /// Retires every trip of a route and forgets its geometry.
    pub fn remove_route(&mut self, route_id: &str) {
        self.set_trips(route_id, vec![]);
        self.routes.remove(route_id);
    }

    /// The number of trips with at least one leg placed on the track.
    pub fn placed_trips(&self) -> usize {
        self.legs.values().filter(|legs| !legs.is_empty()).count()
    }

    fn count_trips(&self, route_id: &str) -> usize {
        self.vehicles
            .values()
            .filter(|t| t.route_id == route_id)
            .count()
    }

    fn retire(&mut self, id: VehicleId) {
        if let Some(trip) = self.vehicles.remove(id) {
            trace!("Retiring trip {}", trip.trip_id);
            self.trips.remove(&trip.trip_id);
        }
        self.legs.remove(id);
        self.tracker.remove(id);
        self.sampler.remove(id);
    }

    /// Gets the vehicle running the given trip.
    pub fn vehicle_id(&self, trip_id: &str) -> Option<VehicleId> {
        self.trips.get(trip_id).copied()
    }

    /// Gets the trip a vehicle is running.
    pub fn trip(&self, id: VehicleId) -> Option<&Trip> {
        self.vehicles.get(id)
    }

    /// Iterates over the trips being animated.
    pub fn iter_trips(&self) -> impl Iterator<Item = (VehicleId, &Trip)> {
        self.vehicles.iter()
    }

    /// Gets the rendered position of a vehicle.
    pub fn smoothed(&self, id: VehicleId) -> Option<&SmoothedPosition> {
        self.tracker.get(id)
    }

    /// Whether a body shape is cached for the vehicle.
    pub fn has_body(&self, id: VehicleId) -> bool {
        self.sampler.contains(id)
    }

    /// Whether vehicles are being rendered.
    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    /// Turns rendering on or off. Turning it off stops the ticks and
    /// forgets every rendered position and body shape.
    pub fn set_rendering(&mut self, enabled: bool) {
        if enabled == self.rendering {
            return;
        }
        self.rendering = enabled;
        if enabled {
            self.driver.start();
            info!("Vehicle rendering enabled");
        } else {
            self.driver.stop();
            self.tracker.clear();
            self.sampler.clear();
            info!("Vehicle rendering disabled");
        }
    }

    /// Gets the current animation frame index.
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// How long until the next tick is due.
    pub fn time_until_next_tick(&self, now: Instant) -> Duration {
        self.driver.time_until_next(now)
    }

    /// Runs a tick if one is due at `now`, with `wallclock` as the current time of day.
    pub fn tick(&mut self, now: Instant, wallclock: DateTime<Utc>) -> Option<Frame> {
        let dt = self.driver.poll(now)?;
        Some(self.step(wallclock, dt))
    }

    /// Advances the animation to `now`, `dt` after the previous frame.
    pub fn step(&mut self, now: DateTime<Utc>, dt: Duration) -> Frame {
        if !self.rendering {
            return Frame::default();
        }

        let mut stats = FrameStats::default();
        self.update_positions(now, dt, &mut stats);

        let visible = self.tracker.visible();
        stats.hidden = self.tracker.len() - visible.len();
        let mut working = WorkingSet {
            groups: self.route_groups(&visible),
            stats,
        };

        self.features.process(&mut working, &self.routes);
        let bodies = self.sample_bodies(&mut working);
        let vehicles = working
            .vehicles()
            .filter_map(|(_, v)| self.tracker.get(v.id).map(|pos| render_record(v, pos)))
            .collect();

        self.frame += 1;
        #[cfg(feature = "debug")]
        {
            self.debug = take_debug_frame();
        }

        Frame {
            vehicles,
            bodies,
            stats: working.stats,
        }
    }

    /// Computes every trip's raw position and moves the rendered positions towards them.
    ///
    /// A completed vehicle is only kept while a vehicle of its line waits at its last stop.
    fn update_positions(&mut self, now: DateTime<Utc>, dt: Duration, stats: &mut FrameStats) {
        let simulated_stops = self.features.is_enabled(SIMULATED_STOPS);
        let local_offset = self.config.local_offset();

        let mut raws = Vec::with_capacity(self.vehicles.len());
        for (id, trip) in &self.vehicles {
            let ctx = PositionContext {
                route: self.routes.get(&trip.route_id),
                approach_threshold: self.config.approach_threshold,
                fallback_points: self.config.fallback_path_points,
                simulated_stops,
                local_offset,
            };
            if !self.legs.contains_key(id) {
                self.legs.insert(id, LegCache::new());
            }
            let Some(raw) = compute_position(trip, now, &ctx, &mut self.legs[id]) else {
                trace!("Trip {} has no stops", trip.trip_id);
                continue;
            };
            stats.count(raw.status);
            if !raw.on_track && raw.status != VehicleStatus::Completed {
                stats.geometry_fallbacks += 1;
            }
            raws.push((id, raw));
        }

        let waiting = raws
            .iter()
            .filter(|(_, raw)| raw.status == VehicleStatus::Waiting)
            .map(|(_, raw)| (raw.line_number.clone(), raw.current_stop.id.clone()))
            .collect::<HashSet<_>>();
        raws.retain(|(_, raw)| {
            raw.status != VehicleStatus::Completed
                || waiting.contains(&(raw.line_number.clone(), raw.current_stop.id.clone()))
        });

        self.tracker.update(raws, dt.as_secs_f64() * 1000.0);
    }

    /// Groups the visible vehicles by route.
    fn route_groups(&self, visible: &[VehicleId]) -> Vec<RouteGroup> {
        visible
            .iter()
            .filter_map(|&id| {
                let pos = self.tracker.get(id)?;
                let route = self.routes.get(&pos.target.route_id);
                Some((pos.target.route_id.clone(), render_vehicle(id, pos, route)))
            })
            .into_group_map()
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .map(|(route_id, vehicles)| RouteGroup { route_id, vehicles })
            .collect()
    }

    /// Samples the body of every vehicle on the track and converts them to polygons.
    fn sample_bodies(&mut self, working: &mut WorkingSet) -> Vec<SegmentPolygon> {
        if !self.features.is_enabled(VEHICLE_BODIES) {
            self.sampler.clear();
            return vec![];
        }

        let mut bodies = vec![];
        for group in &working.groups {
            let Some(route) = self.routes.get(&group.route_id) else {
                continue;
            };
            for vehicle in &group.vehicles {
                let (Some(head), Some(pos)) = (vehicle.linear, self.tracker.get(vehicle.id)) else {
                    continue;
                };
                let sample = self
                    .sampler
                    .sample(vehicle.id, head, vehicle.direction, route);
                if let BodySample::Fallback(_) = sample {
                    working.stats.body_fallbacks += 1;
                }
                let Some(shape) = sample.shape() else {
                    continue;
                };

                let color = self.config.line_color(&pos.target.line_number);
                let cars = shape.iter().zip(self.config.body_template.segments());
                for (index, (car, template)) in cars.enumerate() {
                    bodies.push(SegmentPolygon {
                        trip_id: pos.target.trip_id.clone(),
                        index,
                        ring: segment_ring(car, self.config.body_width_m).map(|p| [p.x, p.y]),
                        color: color.to_owned(),
                        height: template.height,
                    });
                }
            }
        }

        let tracker = &self.tracker;
        self.sampler.retain(|id| tracker.contains(id));
        bodies
    }

    /// Gets the debugging information for the previous frame as a JSON array.
    #[cfg(feature = "debug")]
    pub fn debug(&mut self) -> serde_json::Value {
        self.debug.clone()
    }
}

/// Places a rendered position on its route's track.
fn render_vehicle(
    id: VehicleId,
    pos: &SmoothedPosition,
    route: Option<&LinearRoute>,
) -> RenderVehicle {
    let on_track = route
        .filter(|_| pos.target.on_track)
        .and_then(|route| {
            let linear = route.to_linear(pos.coord, Some(pos.bearing))?;
            Some((route, linear))
        });
    let direction = match on_track {
        Some((route, linear)) => {
            TravelDirection::from_bearings(pos.bearing, route.from_linear(linear).bearing)
        }
        None => TravelDirection::Forward,
    };
    RenderVehicle {
        id,
        coord: pos.coord,
        bearing: pos.bearing,
        moving: pos.status().is_moving(),
        linear: on_track.map(|(_, linear)| linear),
        direction,
    }
}

fn render_record(vehicle: &RenderVehicle, pos: &SmoothedPosition) -> RenderRecord {
    let raw = &pos.target;
    RenderRecord {
        trip_id: raw.trip_id.clone(),
        coord: [vehicle.coord.x, vehicle.coord.y],
        bearing: vehicle.bearing,
        status: raw.status,
        line_number: raw.line_number.clone(),
        destination: raw.destination.clone(),
        delay_minutes: raw.delay_minutes,
        current_stop: raw.current_stop.name.clone(),
        next_stop: raw.next_stop.as_ref().map(|s| s.name.clone()),
    }
}
