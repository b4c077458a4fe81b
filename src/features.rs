//! Optional behaviours that can be switched on and off at runtime.

use crate::frame::WorkingSet;
use crate::route::RouteCache;
use crate::{Error, Result};
use log::{info, warn};
use std::collections::{HashMap, HashSet};

/// Spaces out vehicles that would overlap on the track.
pub const COLLISION_AVOIDANCE: &str = "collision-avoidance";

/// Lets vehicles dwell at stops without a timetabled dwell.
pub const SIMULATED_STOPS: &str = "simulated-stops";

/// Draws an articulated body behind each vehicle.
pub const VEHICLE_BODIES: &str = "vehicle-bodies";

/// The key under which the enabled features are persisted.
pub const STORAGE_KEY: &str = "enabled-features";

/// A persistent string key-value store.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
}

/// A [KeyValueStore] that lives only as long as the process.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_owned(), value);
    }
}

/// A stage run on every tick while its feature is enabled.
pub trait TickProcessor {
    /// Adjusts the vehicles of this tick.
    fn process(&self, working: &mut WorkingSet, routes: &RouteCache);
}

/// A feature that can be toggled.
pub struct Feature {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    default_enabled: bool,
    processor: Option<Box<dyn TickProcessor>>,
}

impl Feature {
    pub fn new(
        id: &'static str,
        name: &'static str,
        description: &'static str,
        default_enabled: bool,
    ) -> Self {
        Self {
            id,
            name,
            description,
            default_enabled,
            processor: None,
        }
    }

    /// Runs the given processor on every tick while the feature is enabled.
    pub fn with_processor(mut self, processor: impl TickProcessor + 'static) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }
}

/// A feature and its state, for display in a settings panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub enabled: bool,
}

/// Keeps track of which features are enabled, persisting changes to a store.
pub struct FeatureManager {
    features: Vec<Feature>,
    enabled: HashSet<&'static str>,
    /// The enabled features read from the store, if it held a valid list.
    stored: Option<HashSet<String>>,
    store: Box<dyn KeyValueStore>,
}

impl FeatureManager {
    /// Creates a manager backed by the given store.
    ///
    /// A missing or unreadable stored list means every feature starts in its default state.
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        let stored = store.get(STORAGE_KEY).and_then(|json| {
            match serde_json::from_str::<Vec<String>>(&json) {
                Ok(ids) => Some(ids.into_iter().collect()),
                Err(err) => {
                    warn!("Ignoring stored feature state: {}", err);
                    None
                }
            }
        });
        Self {
            features: vec![],
            enabled: HashSet::new(),
            stored,
            store,
        }
    }

    /// Registers a feature. Its processor, if any, runs after those of earlier features.
    pub fn register(&mut self, feature: Feature) {
        let enabled = match &self.stored {
            Some(stored) => stored.contains(feature.id),
            None => feature.default_enabled,
        };
        if enabled {
            self.enabled.insert(feature.id);
        }
        self.features.push(feature);
    }

    fn find(&self, id: &str) -> Result<&Feature> {
        self.features
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| {
                warn!("No feature named {}", id);
                Error::UnknownFeature(id.to_owned())
            })
    }

    /// Whether the feature is enabled. Unknown features are never enabled.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.enabled.contains(id)
    }

    /// Enables or disables a feature.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let id = self.find(id)?.id;
        let changed = if enabled {
            self.enabled.insert(id)
        } else {
            self.enabled.remove(id)
        };
        if changed {
            info!("{} feature {}", if enabled { "Enabled" } else { "Disabled" }, id);
            self.persist();
        }
        Ok(())
    }

    pub fn enable(&mut self, id: &str) -> Result<()> {
        self.set_enabled(id, true)
    }

    pub fn disable(&mut self, id: &str) -> Result<()> {
        self.set_enabled(id, false)
    }

    /// Flips a feature, returning its new state.
    pub fn toggle(&mut self, id: &str) -> Result<bool> {
        let enabled = !self.is_enabled(id);
        self.set_enabled(id, enabled)?;
        Ok(enabled)
    }

    /// The registered features, in registration order.
    pub fn features(&self) -> impl Iterator<Item = FeatureInfo> + '_ {
        self.features.iter().map(|f| FeatureInfo {
            id: f.id,
            name: f.name,
            description: f.description,
            enabled: self.is_enabled(f.id),
        })
    }

    /// Runs the processors of the enabled features, in registration order.
    pub fn process(&self, working: &mut WorkingSet, routes: &RouteCache) {
        for feature in &self.features {
            if let (Some(processor), true) = (&feature.processor, self.is_enabled(feature.id)) {
                processor.process(working, routes);
            }
        }
    }

    fn persist(&mut self) {
        let ids = self
            .features
            .iter()
            .map(|f| f.id)
            .filter(|id| self.enabled.contains(id))
            .collect::<Vec<_>>();
        match serde_json::to_string(&ids) {
            Ok(json) => self.store.set(STORAGE_KEY, json),
            Err(err) => warn!("Could not persist feature state: {}", err),
        }
    }
}
