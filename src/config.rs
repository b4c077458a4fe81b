//! Tunable parameters of the simulation.

use crate::body::BodyTemplate;
use crate::util::Interval;
use chrono::{FixedOffset, Offset, Utc};
#[cfg(feature = "serde")]
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// The configuration of a [Simulation](crate::Simulation).
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Deserialize), serde(default))]
pub struct SimulationConfig {
    /// The target interval between animation ticks, in ms.
    pub tick_interval_ms: u64,
    /// The time constant with which rendered positions approach their targets, in ms.
    pub smoothing_time_ms: f64,
    /// Targets further than this from the rendered position are jumped to directly, in m.
    pub snap_distance_m: f64,
    /// The fraction of a leg after which a vehicle is approaching the next stop.
    pub approach_threshold: f64,
    /// The minimum distance between vehicles travelling the same way on a route, in m.
    pub min_separation_m: f64,
    /// The furthest a stop or vehicle may be from the track and still be placed on it, in m.
    pub max_match_distance_m: f64,
    /// The number of points on the straight path used when a leg has no track geometry.
    pub fallback_path_points: usize,
    /// The accepted length of a sampled body segment, relative to its nominal length.
    pub segment_length_tolerance: Interval<f64>,
    /// The furthest a body segment's front may move in one tick, in m.
    pub max_front_jump_m: f64,
    /// The number of consecutive rejected samples after which a body shape is resampled anyway.
    pub max_fallback_ticks: u32,
    /// The width of the vehicle body, in m.
    pub body_width_m: f64,
    /// The offset of local time from UTC, in minutes, used for time-of-day decisions.
    pub utc_offset_minutes: i32,
    /// The colour of each line, keyed by line number.
    pub line_colors: HashMap<String, String>,
    /// The colour of lines without an entry in `line_colors`.
    pub default_color: String,
    /// The shape of the vehicle body.
    pub body_template: BodyTemplate,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            smoothing_time_ms: 500.0,
            snap_distance_m: 1000.0,
            approach_threshold: 0.9,
            min_separation_m: 50.0,
            max_match_distance_m: 500.0,
            fallback_path_points: 10,
            segment_length_tolerance: Interval::new(0.5, 1.5),
            max_front_jump_m: 20.0,
            max_fallback_ticks: 40,
            body_width_m: 2.3,
            utc_offset_minutes: 60,
            line_colors: HashMap::new(),
            default_color: "#7f7f7f".to_owned(),
            body_template: BodyTemplate::default(),
        }
    }
}

impl SimulationConfig {
    /// Parses a configuration from JSON. Missing fields take their default values.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The target interval between animation ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// The local time zone used for time-of-day decisions.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    /// The colour of the given line.
    pub fn line_color(&self, line_number: &str) -> &str {
        self.line_colors
            .get(line_number)
            .unwrap_or(&self.default_color)
    }
}
