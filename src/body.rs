//! Articulated vehicle bodies, sampled along the track behind each vehicle's head.

use crate::debug::debug_point;
use crate::frame::TravelDirection;
use crate::geo::{self, LngLat};
use crate::route::LinearRoute;
use crate::util::Interval;
use crate::VehicleId;
use once_cell::sync::Lazy;
use slotmap::SecondaryMap;
use smallvec::SmallVec;

/// The layout of one car of a vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct SegmentTemplate {
    /// The distance from the head of the vehicle to the front of the car, in m.
    pub front_offset: f64,
    /// The distance from the head of the vehicle to the rear of the car, in m.
    pub rear_offset: f64,
    /// The height of the car, in m.
    pub height: f64,
}

impl SegmentTemplate {
    /// The length of the car, in m.
    pub fn length(&self) -> f64 {
        self.rear_offset - self.front_offset
    }
}

/// The cars making up a vehicle, from head to tail.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(transparent))]
pub struct BodyTemplate {
    segments: Vec<SegmentTemplate>,
}

/// A four-car low-floor tram.
static DEFAULT_TEMPLATE: Lazy<BodyTemplate> = Lazy::new(|| {
    let car = |front_offset, rear_offset| SegmentTemplate {
        front_offset,
        rear_offset,
        height: 3.5,
    };
    BodyTemplate::new(vec![
        car(0.0, 10.5),
        car(11.0, 20.5),
        car(21.0, 30.5),
        car(31.0, 41.5),
    ])
});

impl BodyTemplate {
    /// Creates a template from the given cars, ordered from head to tail.
    pub fn new(segments: Vec<SegmentTemplate>) -> Self {
        Self { segments }
    }

    /// The cars of the template.
    pub fn segments(&self) -> &[SegmentTemplate] {
        &self.segments
    }

    /// The distance from the head to the rear of the last car, in m.
    pub fn length(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.rear_offset)
            .fold(0.0, f64::max)
    }
}

impl Default for BodyTemplate {
    fn default() -> Self {
        DEFAULT_TEMPLATE.clone()
    }
}

/// Where one car is this tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentShape {
    pub front: LngLat,
    pub rear: LngLat,
}

/// Where every car of a vehicle is this tick.
pub type BodyShape = SmallVec<[SegmentShape; 4]>;

/// The result of sampling a vehicle's body.
#[derive(Clone, Copy, Debug)]
pub enum BodySample<'a> {
    /// A freshly sampled shape.
    Fresh(&'a BodyShape),
    /// The fresh shape was rejected and the last good one is reused.
    Fallback(&'a BodyShape),
    /// No acceptable shape is available.
    Missing,
}

impl<'a> BodySample<'a> {
    /// The shape to draw, if any.
    pub fn shape(self) -> Option<&'a BodyShape> {
        match self {
            Self::Fresh(shape) | Self::Fallback(shape) => Some(shape),
            Self::Missing => None,
        }
    }
}

/// The parameters of a [BodySampler].
#[derive(Clone, Copy, Debug)]
pub struct SamplerParams {
    /// The accepted range of sampled car length relative to its nominal length.
    pub length_tolerance: Interval<f64>,
    /// The furthest the front of a car may move between ticks, in m.
    pub max_front_jump: f64,
    /// After this many consecutive rejected ticks a shape that passes
    /// the length check is accepted regardless of how far it moved.
    pub max_fallback_ticks: u32,
}

struct CachedBody {
    shape: BodyShape,
    rejected: u32,
}

/// Samples vehicle bodies and remembers the last good shape of each vehicle.
pub struct BodySampler {
    template: BodyTemplate,
    params: SamplerParams,
    cache: SecondaryMap<VehicleId, CachedBody>,
}

impl BodySampler {
    pub fn new(template: BodyTemplate, params: SamplerParams) -> Self {
        Self {
            template,
            params,
            cache: SecondaryMap::new(),
        }
    }

    /// The template used for every vehicle.
    pub fn template(&self) -> &BodyTemplate {
        &self.template
    }

    /// Samples the body of a vehicle whose head is at distance `head` along `route`.
    pub fn sample(
        &mut self,
        id: VehicleId,
        head: f64,
        direction: TravelDirection,
        route: &LinearRoute,
    ) -> BodySample {
        let shape = sample_shape(&self.template, head, direction, route);
        let lengths_ok = self.lengths_ok(&shape);

        if !self.cache.contains_key(id) {
            if !lengths_ok {
                return BodySample::Missing;
            }
            self.cache.insert(id, CachedBody { shape, rejected: 0 });
            return self
                .cache
                .get(id)
                .map_or(BodySample::Missing, |c| BodySample::Fresh(&c.shape));
        }
        let Some(cached) = self.cache.get_mut(id) else {
            return BodySample::Missing;
        };

        let max_jump = self.params.max_front_jump;
        let jumps_ok = shape
            .iter()
            .zip(&cached.shape)
            .all(|(new, old)| geo::distance(new.front, old.front) <= max_jump);
        let recovering = cached.rejected >= self.params.max_fallback_ticks;

        if lengths_ok && (jumps_ok || recovering) {
            cached.shape = shape;
            cached.rejected = 0;
            BodySample::Fresh(&cached.shape)
        } else {
            if let Some(car) = shape.first() {
                debug_point("rejected body", car.front);
            }
            cached.rejected += 1;
            BodySample::Fallback(&cached.shape)
        }
    }

    /// Whether each car's sampled length is within tolerance of its nominal length.
    fn lengths_ok(&self, shape: &BodyShape) -> bool {
        shape
            .iter()
            .zip(self.template.segments())
            .all(|(car, template)| {
                let nominal = template.length();
                nominal <= 0.0
                    || self
                        .params
                        .length_tolerance
                        .contains(geo::distance(car.front, car.rear) / nominal)
            })
    }

    /// Whether a shape is cached for the vehicle.
    pub fn contains(&self, id: VehicleId) -> bool {
        self.cache.contains_key(id)
    }

    /// Forgets the shape of a vehicle.
    pub fn remove(&mut self, id: VehicleId) {
        self.cache.remove(id);
    }

    /// Forgets the shapes of all vehicles for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(VehicleId) -> bool) {
        self.cache.retain(|id, _| keep(id));
    }

    /// Forgets all shapes.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Places each car of the template behind the head of a vehicle.
fn sample_shape(
    template: &BodyTemplate,
    head: f64,
    direction: TravelDirection,
    route: &LinearRoute,
) -> BodyShape {
    let length = route.length();
    let travelled = direction.travelled(head, length);
    let at = |offset: f64| route.from_linear(direction.linear(travelled - offset, length)).coord;
    template
        .segments()
        .iter()
        .map(|car| SegmentShape {
            front: at(car.front_offset),
            rear: at(car.rear_offset),
        })
        .collect()
}

/// The footprint of a car: a closed rectangle of the given width around
/// the line from its front to its rear.
pub fn segment_ring(car: &SegmentShape, width: f64) -> [LngLat; 5] {
    let heading = geo::bearing(car.rear, car.front);
    let half = width / 2.0;
    let left = heading - 90.0;
    let right = heading + 90.0;
    let corners = [
        geo::destination(car.front, left, half),
        geo::destination(car.front, right, half),
        geo::destination(car.rear, right, half),
        geo::destination(car.rear, left, half),
    ];
    [corners[0], corners[1], corners[2], corners[3], corners[0]]
}
