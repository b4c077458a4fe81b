use crate::geo::LngLat;
#[cfg(feature = "debug")]
use serde_json::json;

#[cfg(feature = "debug")]
thread_local!(
    static DEBUG_FRAME: std::cell::RefCell<Vec<serde_json::Value>> = Default::default();
);

/// Records a line between two coordinates, e.g. the path of a collision push.
#[allow(unused)]
pub fn debug_line(name: &str, from: LngLat, to: LngLat) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "line",
            "name": name,
            "from": [from.x, from.y],
            "to": [to.x, to.y],
        }))
    })
}

/// Records a single coordinate, e.g. a rejected body sample.
#[allow(unused)]
pub fn debug_point(name: &str, coord: LngLat) {
    #[cfg(feature = "debug")]
    DEBUG_FRAME.with(|frame| {
        frame.borrow_mut().push(json!({
            "type": "point",
            "name": name,
            "coord": [coord.x, coord.y],
        }))
    })
}

#[cfg(feature = "debug")]
pub fn take_debug_frame() -> serde_json::Value {
    json!(DEBUG_FRAME.with(|frame| frame.take()))
}
