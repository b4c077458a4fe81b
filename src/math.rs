//! Mathematical structs and functions.

use cgmath::Point2;
pub use lut::LookupTable;

mod lut;

/// A 2D point
pub type Point2d = Point2<f64>;
