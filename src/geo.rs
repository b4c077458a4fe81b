//! Geodesic helpers over longitude/latitude coordinates.
//!
//! Distances use the haversine formula. Interpolation between two points is
//! linear in longitude/latitude space, which is accurate enough at city scale.

use crate::math::Point2d;
use ::geo::{HaversineBearing, HaversineDestination, Point};

/// A coordinate, with `x` being the longitude and `y` the latitude, in degrees.
pub type LngLat = Point2d;

/// The mean radius of the Earth in m.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// The length of one degree of latitude in m.
pub const METRES_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Computes the great-circle distance between two coordinates in m.
pub fn distance(a: LngLat, b: LngLat) -> f64 {
    let lat1 = a.y.to_radians();
    let lat2 = b.y.to_radians();
    let delta_lat = (b.y - a.y).to_radians();
    let delta_lon = (b.x - a.x).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Sums the distances between consecutive coordinates, in m.
pub fn line_length(coords: &[LngLat]) -> f64 {
    coords.windows(2).map(|w| distance(w[0], w[1])).sum()
}

/// Linearly interpolates between two coordinates.
pub fn lerp(a: LngLat, b: LngLat, t: f64) -> LngLat {
    a + (b - a) * t
}

/// Finds the coordinate at the given fraction of the polyline's length.
///
/// An empty polyline yields the origin, and a progress outside `(0, 1)`
/// yields the corresponding end point.
pub fn interpolate_along_line(coords: &[LngLat], progress: f64) -> LngLat {
    let (first, last) = match (coords.first(), coords.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return LngLat::new(0.0, 0.0),
    };
    if coords.len() == 1 || progress <= 0.0 {
        return first;
    }
    if progress >= 1.0 {
        return last;
    }

    let target = progress * line_length(coords);
    let mut walked = 0.0;
    for w in coords.windows(2) {
        let piece = distance(w[0], w[1]);
        if piece > 0.0 && walked + piece >= target {
            return lerp(w[0], w[1], (target - walked) / piece);
        }
        walked += piece;
    }
    last
}

/// Computes the initial bearing from `a` to `b` in degrees, within `[0, 360)`.
pub fn bearing(a: LngLat, b: LngLat) -> f64 {
    normalize_bearing(to_point(a).haversine_bearing(to_point(b)))
}

/// Wraps an angle in degrees into `[0, 360)`.
pub fn normalize_bearing(bearing: f64) -> f64 {
    let b = bearing.rem_euclid(360.0);
    if b >= 360.0 {
        0.0
    } else {
        b
    }
}

/// The absolute difference between two bearings in degrees, within `[0, 180]`.
pub fn bearing_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// Turns from bearing `from` towards bearing `to` by the fraction `t`,
/// along the shorter arc.
pub fn lerp_bearing(from: f64, to: f64, t: f64) -> f64 {
    let mut delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 {
        delta -= 360.0;
    }
    normalize_bearing(from + delta * t)
}

/// Moves `distance` m from `origin` along the great circle with the given initial bearing.
pub fn destination(origin: LngLat, bearing: f64, distance: f64) -> LngLat {
    from_point(to_point(origin).haversine_destination(bearing, distance))
}

pub(crate) fn to_point(coord: LngLat) -> Point<f64> {
    Point::new(coord.x, coord.y)
}

pub(crate) fn from_point(point: Point<f64>) -> LngLat {
    LngLat::new(point.x(), point.y())
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn meridian(len: f64) -> Vec<LngLat> {
        let start = LngLat::new(10.9, 48.37);
        vec![
            start,
            LngLat::new(start.x, start.y + 0.4 * len / METRES_PER_DEGREE),
            LngLat::new(start.x, start.y + len / METRES_PER_DEGREE),
        ]
    }

    #[test]
    fn distance_along_meridian() {
        let line = meridian(500.0);
        assert_approx_eq!(distance(line[0], line[2]), 500.0, 1e-6);
        assert_approx_eq!(line_length(&line), 500.0, 1e-6);
    }

    #[test]
    fn known_city_distance() {
        // Two points in Augsburg, roughly 620 m apart.
        let a = LngLat::new(10.8938, 48.3659);
        let b = LngLat::new(10.8854, 48.3654);
        let d = distance(a, b);
        assert!(d > 600.0 && d < 650.0, "got {}", d);
    }

    #[test]
    fn interpolate_degenerate_inputs() {
        assert_eq!(interpolate_along_line(&[], 0.5), LngLat::new(0.0, 0.0));
        let p = LngLat::new(1.0, 2.0);
        assert_eq!(interpolate_along_line(&[p], 0.7), p);
        let line = meridian(100.0);
        assert_eq!(interpolate_along_line(&line, -0.5), line[0]);
        assert_eq!(interpolate_along_line(&line, 1.5), line[2]);
    }

    #[test]
    fn interpolate_midpoint() {
        let line = meridian(500.0);
        let mid = interpolate_along_line(&line, 0.5);
        assert_approx_eq!(distance(line[0], mid), 250.0, 1e-3);
    }

    #[test]
    fn interpolation_is_monotonic() {
        let line = vec![
            LngLat::new(10.90, 48.370),
            LngLat::new(10.902, 48.371),
            LngLat::new(10.902, 48.371),
            LngLat::new(10.905, 48.370),
            LngLat::new(10.906, 48.373),
        ];
        let total = line_length(&line);
        let mut rng = StdRng::seed_from_u64(7);
        let mut ps = (0..200).map(|_| rng.gen_range(0.0..=1.0)).collect::<Vec<f64>>();
        ps.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let along = |p: f64| {
            // Distance travelled along the line to reach the interpolated point.
            let target = interpolate_along_line(&line, p);
            let mut walked = 0.0;
            for w in line.windows(2) {
                let piece = distance(w[0], w[1]);
                let to_target = distance(w[0], target);
                let rest = distance(target, w[1]);
                if (to_target + rest - piece).abs() < 1e-3 {
                    return walked + to_target;
                }
                walked += piece;
            }
            walked
        };

        let mut last = 0.0;
        for p in ps {
            let d = along(p);
            assert!(d + 1e-3 >= last, "not monotonic at p = {}", p);
            assert_approx_eq!(d, p * total, 0.05);
            last = d;
        }
    }

    #[test]
    fn bearings() {
        let a = LngLat::new(10.9, 48.37);
        assert_approx_eq!(bearing(a, LngLat::new(10.9, 48.38)), 0.0, 1e-6);
        assert_approx_eq!(bearing(a, LngLat::new(10.91, 48.37)), 90.0, 0.01);
        assert_approx_eq!(bearing(a, LngLat::new(10.9, 48.36)), 180.0, 1e-6);
        assert_approx_eq!(bearing_difference(350.0, 10.0), 20.0);
        assert_approx_eq!(bearing_difference(0.0, 100.0), 100.0);
        assert_approx_eq!(lerp_bearing(350.0, 10.0, 0.5), 0.0);
        assert_approx_eq!(lerp_bearing(10.0, 350.0, 0.25), 5.0);
    }

    #[test]
    fn destination_round_trip() {
        let a = LngLat::new(10.9, 48.37);
        let b = destination(a, 45.0, 100.0);
        assert_approx_eq!(distance(a, b), 100.0, 0.1);
        assert_approx_eq!(bearing(a, b), 45.0, 0.1);

        let west = destination(a, 270.0, 250.0);
        assert_approx_eq!(bearing(a, west), 270.0, 0.1);
        assert!(west.x < a.x);
    }
}
