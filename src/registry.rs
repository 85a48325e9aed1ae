use std::collections::HashMap;

use crate::models::TrainStatus;

/// In-memory store of live activities, owned by main and injected into
/// the handlers and the broadcast task behind an `Arc<RwLock<..>>`.
///
/// Two maps: push token -> last-known train state, and journey id ->
/// push token so a re-registration for the same journey displaces the
/// previous device token (last write wins).
#[derive(Default)]
pub struct Registry {
    activities: HashMap<String, TrainStatus>,
    journeys: HashMap<String, String>,
}

#[derive(Debug, PartialEq)]
pub enum RegistryError {
    NotRegistered,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Upsert a registration. The record starts empty; the broadcast
    /// loop ignores it until the first update arrives.
    pub fn register(&mut self, journey_id: &str, push_token: &str) {
        if let Some(previous) = self
            .journeys
            .insert(journey_id.to_string(), push_token.to_string())
        {
            if previous != push_token {
                self.activities.remove(&previous);
            }
        }
        self.activities.entry(push_token.to_string()).or_default();
    }

    /// Overwrite the stored state for a registered token.
    pub fn update(&mut self, push_token: &str, status: TrainStatus) -> Result<(), RegistryError> {
        match self.activities.get_mut(push_token) {
            Some(slot) => {
                *slot = status;
                Ok(())
            }
            None => Err(RegistryError::NotRegistered),
        }
    }

    /// Idempotent removal, also drops the journey mapping.
    pub fn remove(&mut self, push_token: &str) {
        self.activities.remove(push_token);
        self.journeys.retain(|_, token| token != push_token);
    }

    pub fn snapshot(&self) -> Vec<(String, TrainStatus)> {
        self.activities
            .iter()
            .map(|(token, status)| (token.clone(), status.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}
