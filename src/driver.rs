//! Paces animation ticks and camera follow mode.

use crate::geo::LngLat;
use crate::simulation::Simulation;
use crate::VehicleId;
use log::info;
use std::time::{Duration, Instant};

/// Decides when the next animation tick is due.
///
/// Ticks never overlap: the caller runs a tick to completion before polling again,
/// and each tick is told the real time elapsed since the previous one.
#[derive(Clone, Copy, Debug)]
pub struct TickDriver {
    cadence: Duration,
    last_tick: Option<Instant>,
    running: bool,
}

impl TickDriver {
    /// Creates a stopped driver that ticks at most once per `cadence`.
    pub fn new(cadence: Duration) -> Self {
        Self {
            cadence,
            last_tick: None,
            running: false,
        }
    }

    /// Starts ticking. The first poll after starting is always due.
    pub fn start(&mut self) {
        self.running = true;
        self.last_tick = None;
    }

    /// Stops ticking until started again.
    pub fn stop(&mut self) {
        self.running = false;
        self.last_tick = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Returns the time elapsed since the previous tick if a tick is due at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<Duration> {
        if !self.running {
            return None;
        }
        let elapsed = match self.last_tick {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::ZERO,
        };
        if self.last_tick.is_some() && elapsed < self.cadence {
            return None;
        }
        self.last_tick = Some(now);
        Some(elapsed)
    }

    /// How long until the next tick is due.
    pub fn time_until_next(&self, now: Instant) -> Duration {
        match self.last_tick {
            Some(last) => self
                .cadence
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

/// Where the camera should point while following a vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraTarget {
    pub coord: LngLat,
    pub bearing: f64,
}

/// Keeps the camera on one vehicle until the vehicle disappears.
#[derive(Clone, Debug)]
pub struct Follower {
    vehicle: VehicleId,
    driver: TickDriver,
}

impl Follower {
    /// Starts following a vehicle, updating the camera at most once per `cadence`.
    pub fn new(vehicle: VehicleId, cadence: Duration) -> Self {
        let mut driver = TickDriver::new(cadence);
        driver.start();
        Self { vehicle, driver }
    }

    /// The vehicle being followed.
    pub fn vehicle(&self) -> VehicleId {
        self.vehicle
    }

    /// Whether the follower is still following its vehicle.
    pub fn is_active(&self) -> bool {
        self.driver.is_running()
    }

    /// Returns the camera target if an update is due at `now`.
    /// Stops following once the vehicle no longer has a rendered position.
    pub fn poll(&mut self, now: Instant, sim: &Simulation) -> Option<CameraTarget> {
        self.driver.poll(now)?;
        match sim.smoothed(self.vehicle) {
            Some(position) => Some(CameraTarget {
                coord: position.coord,
                bearing: position.bearing,
            }),
            None => {
                info!("Followed vehicle is gone; leaving follow mode");
                self.driver.stop();
                None
            }
        }
    }

    /// Stops following.
    pub fn cancel(&mut self) {
        self.driver.stop();
    }
}
