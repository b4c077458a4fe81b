//! Arc-length parameterisation of route geometry.

use crate::geo::{self, LngLat};
use crate::math::LookupTable;
use crate::schedule::RouteGeometry;
use crate::util::Interval;
use itertools::Itertools;
use log::{debug, info};
use ::geo::{Closest, ClosestPoint, Line};
use std::collections::HashMap;
use std::rc::Rc;

/// The quantization of the distance lookup table, in m.
const LUT_SPACING: f64 = 25.0;

/// Points closer together than this are merged, in m.
const MIN_PIECE_LENGTH: f64 = 0.01;

/// Track pieces whose bearing differs from the reference bearing
/// by less than this are preferred when projecting onto the route, in degrees.
const MAX_ALIGNED_BEARING: f64 = 90.0;

/// How much further than the nearest piece a preferred piece may be, in m.
const MAX_TIE_DISTANCE: f64 = 15.0;

/// The result of sampling a [LinearRoute] at some distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackSample {
    /// The coordinate on the track.
    pub coord: LngLat,
    /// The forward bearing of the track at that point, in degrees.
    pub bearing: f64,
}

/// A route's geometry as a single polyline parameterised by distance from its start.
#[derive(Clone, Debug)]
pub struct LinearRoute {
    /// The track vertices.
    points: Vec<LngLat>,
    /// The distance from the route start to each vertex, in m.
    dists: Vec<f64>,
    /// The forward bearing of each piece between consecutive vertices.
    bearings: Vec<f64>,
    /// Maps a distance to the index of a piece at or before it.
    index: LookupTable<usize>,
    /// Projections further than this from the track fail, in m.
    max_match_distance: f64,
}

impl LinearRoute {
    /// Linearizes the given polylines. Returns `None` if they hold fewer
    /// than two distinct points.
    ///
    /// # Parameters
    /// * `segments` - The polylines, in traversal order
    /// * `max_match_distance` - The furthest a coordinate may be from the track and
    ///   still be projected onto it, in m
    pub fn new(segments: &[Vec<LngLat>], max_match_distance: f64) -> Option<Self> {
        let points = orient_segments(segments);
        if points.len() < 2 {
            return None;
        }

        let mut dists = Vec::with_capacity(points.len());
        let mut total = 0.0;
        dists.push(total);
        for w in points.windows(2) {
            total += geo::distance(w[0], w[1]);
            dists.push(total);
        }
        let bearings = points
            .windows(2)
            .map(|w| geo::bearing(w[0], w[1]))
            .collect::<Vec<_>>();

        let pieces = bearings.len();
        let index = LookupTable::from_samples(Interval::new(0.0, total), LUT_SPACING, |x| {
            let idx = dists.partition_point(|d| *d <= x);
            usize::min(idx.saturating_sub(1), pieces - 1)
        });

        Some(Self {
            points,
            dists,
            bearings,
            index,
            max_match_distance,
        })
    }

    /// The total length of the route in m.
    pub fn length(&self) -> f64 {
        *self.dists.last().unwrap_or(&0.0)
    }

    /// The track vertices, after orientation and de-duplication.
    pub fn points(&self) -> &[LngLat] {
        &self.points
    }

    /// Projects a coordinate onto the route, returning its distance from the route start.
    ///
    /// The nearest track piece wins. If a reference bearing is given, a piece running in
    /// roughly that direction is preferred over the nearest one when it is less than
    /// [MAX_TIE_DISTANCE] further away, which disambiguates routes that overlap or run
    /// back alongside themselves. Returns `None` if the coordinate is too far from the track.
    pub fn to_linear(&self, coord: LngLat, reference_bearing: Option<f64>) -> Option<f64> {
        let point = geo::to_point(coord);

        let mut best_aligned: Option<(f64, f64)> = None;
        let mut best_any: Option<(f64, f64)> = None;

        for (idx, w) in self.points.windows(2).enumerate() {
            let piece = Line::new((w[0].x, w[0].y), (w[1].x, w[1].y));
            let foot = match piece.closest_point(&point) {
                Closest::Intersection(p) | Closest::SinglePoint(p) => geo::from_point(p),
                Closest::Indeterminate => continue,
            };
            let dist = geo::distance(coord, foot);
            if dist > self.max_match_distance {
                continue;
            }
            let span = Interval::new(self.dists[idx], self.dists[idx + 1]);
            let along = span.clamp(span.min + geo::distance(w[0], foot));
            let candidate = Some((dist, along));

            if best_any.map_or(true, |(d, _)| dist < d) {
                best_any = candidate;
            }
            let aligned = reference_bearing.map_or(false, |reference| {
                geo::bearing_difference(self.bearings[idx], reference) < MAX_ALIGNED_BEARING
            });
            if aligned && best_aligned.map_or(true, |(d, _)| dist < d) {
                best_aligned = candidate;
            }
        }

        let nearest = best_any?;
        match best_aligned {
            Some(aligned) if aligned.0 <= nearest.0 + MAX_TIE_DISTANCE => Some(aligned.1),
            _ => Some(nearest.1),
        }
    }

    /// Samples the route at the given distance from its start, which is clamped
    /// to the extent of the route.
    pub fn from_linear(&self, distance: f64) -> TrackSample {
        let distance = distance.clamp(0.0, self.length());
        let last = self.bearings.len() - 1;

        let mut idx = *self.index.sample(distance);
        while idx < last && self.dists[idx + 1] < distance {
            idx += 1;
        }
        while idx > 0 && self.dists[idx] > distance {
            idx -= 1;
        }

        let span = Interval::new(self.dists[idx], self.dists[idx + 1]);
        let t = if span.length() > 0.0 {
            span.inv_lerp(distance).clamp(0.0, 1.0)
        } else {
            0.0
        };

        TrackSample {
            coord: geo::lerp(self.points[idx], self.points[idx + 1], t),
            bearing: self.bearings[idx],
        }
    }
}

/// Joins the polylines into one, reversing any polyline whose far end
/// lies closer to the end of the track built so far, and merging repeated points.
fn orient_segments(segments: &[Vec<LngLat>]) -> Vec<LngLat> {
    let segments = segments.iter().filter(|s| !s.is_empty()).collect::<Vec<_>>();

    let mut joined: Vec<LngLat> = vec![];
    for (idx, segment) in segments.iter().enumerate() {
        let first = segment[0];
        let last = segment[segment.len() - 1];
        let reverse = match joined.last() {
            Some(end) => geo::distance(*end, last) < geo::distance(*end, first),
            None => segments.get(idx + 1).map_or(false, |next| {
                let gap = |p: LngLat| {
                    f64::min(
                        geo::distance(p, next[0]),
                        geo::distance(p, next[next.len() - 1]),
                    )
                };
                gap(first) < gap(last)
            }),
        };
        if reverse {
            joined.extend(segment.iter().rev());
        } else {
            joined.extend(segment.iter());
        }
    }

    joined
        .into_iter()
        .dedup_by(|a, b| geo::distance(*a, *b) < MIN_PIECE_LENGTH)
        .collect()
}

/// A route's geometry together with its linearization.
struct CachedRoute {
    geometry: Rc<RouteGeometry>,
    linear: Option<LinearRoute>,
}

/// Linearized routes, keyed by route ID.
///
/// A route is rebuilt only when it is given geometry that is neither the same
/// allocation nor the same version as the cached geometry.
pub struct RouteCache {
    routes: HashMap<String, CachedRoute>,
    max_match_distance: f64,
}

impl RouteCache {
    /// Creates an empty cache.
    pub fn new(max_match_distance: f64) -> Self {
        Self {
            routes: HashMap::new(),
            max_match_distance,
        }
    }

    /// Supplies the geometry of a route, rebuilding its linearization if it changed.
    /// Returns `true` iff the route was rebuilt.
    pub fn update(&mut self, route_id: &str, geometry: Rc<RouteGeometry>) -> bool {
        if let Some(cached) = self.routes.get(route_id) {
            if Rc::ptr_eq(&cached.geometry, &geometry)
                || cached.geometry.version == geometry.version
            {
                return false;
            }
        }

        let linear = LinearRoute::new(&geometry.segments, self.max_match_distance);
        match &linear {
            Some(linear) => info!(
                "Linearized route {} (version {}): {:.0} m",
                route_id,
                geometry.version,
                linear.length()
            ),
            None => debug!("Route {} has no usable geometry", route_id),
        }
        self.routes
            .insert(route_id.to_owned(), CachedRoute { geometry, linear });
        true
    }

    /// Gets the linearization of a route, if it has usable geometry.
    pub fn get(&self, route_id: &str) -> Option<&LinearRoute> {
        self.routes.get(route_id)?.linear.as_ref()
    }

    /// Forgets a route.
    pub fn remove(&mut self, route_id: &str) {
        self.routes.remove(route_id);
    }
}
