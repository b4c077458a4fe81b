use std::rc::Rc;
use std::time::{Duration, Instant};

use tramline::chrono::{Duration as TimeDelta, Utc};
use tramline::geo::{destination, lerp};
use tramline::{Frame, LngLat, RouteGeometry, Simulation, StopPlace, StopTime, Trip};

/// The number of stops on the demo line.
const NUM_STOPS: usize = 12;

/// The distance between stops, in m.
const STOP_SPACING: f64 = 450.0;

/// The scheduled time between stops.
const STOP_INTERVAL_SECS: i64 = 90;

fn main() {
    env_logger::init();

    // A line running east from Königsplatz, with a slight bend halfway.
    let start = LngLat::new(10.8978, 48.3655);
    let mut stops = vec![start];
    for i in 1..NUM_STOPS {
        let bearing = if i < NUM_STOPS / 2 { 90.0 } else { 110.0 };
        stops.push(destination(stops[i - 1], bearing, STOP_SPACING));
    }
    let track = stops
        .windows(2)
        .flat_map(|w| (0..10).map(move |k| lerp(w[0], w[1], k as f64 / 10.0)))
        .chain(stops.last().copied())
        .collect::<Vec<_>>();

    let mut sim = Simulation::default();
    sim.set_route_geometry(
        "3",
        Rc::new(RouteGeometry {
            version: 1,
            segments: vec![track],
        }),
    );

    let now = Utc::now();
    let trips = (0..20)
        .map(|n| {
            let first = now + TimeDelta::seconds(n * 150 - 900);
            Trip {
                trip_id: format!("3-{}", n),
                route_id: "3".into(),
                line_number: "3".into(),
                destination: "Stadtbergen".into(),
                stops: stops
                    .iter()
                    .enumerate()
                    .map(|(i, coord)| {
                        let place =
                            StopPlace::platform(format!("s{}", i), format!("Stop {}", i), *coord);
                        let offset = TimeDelta::seconds(i as i64 * STOP_INTERVAL_SECS);
                        StopTime::new(place, first + offset)
                    })
                    .collect(),
            }
        })
        .collect();
    sim.set_trips("3", trips);

    println!("Animating...");
    let num_frames = 1000;
    let dt = Duration::from_millis(50);
    let mut wallclock = now;
    loop {
        let start = Instant::now();
        let mut frame = Frame::default();
        for _ in 0..num_frames {
            wallclock = wallclock + TimeDelta::milliseconds(50);
            frame = sim.step(wallclock, dt);
        }
        let elapsed = start.elapsed() / num_frames;
        println!(
            "Avg. frame: {:?} --> {} vehicles, {} body segments, {:?}",
            elapsed,
            frame.vehicles.len(),
            frame.bodies.len(),
            frame.stats,
        );
        if frame.vehicles.is_empty() {
            break;
        }
    }
}
