pub use body::{BodyTemplate, SegmentTemplate};
pub use cgmath;
pub use chrono;
pub use config::SimulationConfig;
pub use driver::{CameraTarget, Follower, TickDriver};
pub use error::{Error, Result};
pub use features::{Feature, FeatureInfo, FeatureManager, KeyValueStore, MemoryStore};
pub use frame::{Frame, FrameStats, RenderRecord, SegmentPolygon};
pub use crate::geo::LngLat;
pub use position::VehicleStatus;
pub use schedule::{RouteGeometry, StopPlace, StopTime, Trip};
pub use simulation::Simulation;
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use util::Interval;

pub mod body;
pub mod collision;
mod config;
mod debug;
pub mod driver;
pub mod dwell;
mod error;
pub mod features;
pub mod frame;
pub mod geo;
pub mod math;
pub mod position;
pub mod route;
pub mod schedule;
mod simulation;
pub mod smoothing;
mod util;

new_key_type! {
    /// Unique ID of a vehicle running a [Trip].
    pub struct VehicleId;
}

type VehicleSet = SlotMap<VehicleId, Trip>;
