//! Session pin store — keeps a client "stuck" on the model that last
//! succeeded for it, scoped by tier profile.
//!
//! Keyed by `(session_id, tier_profile)`, never by `session_id` alone: a
//! client switching from `premium` to `eco` must not inherit a pin written
//! under `premium`. Collapsing the key to `session_id` alone was an earlier
//! design and is the one regression this store exists to prevent.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

#[derive(Clone)]
struct Pin {
    model_id: String,
    expires_at: Instant,
    inserted_at: Instant,
}

/// Size cap beyond which `set` evicts the oldest entry first.
const MAX_PINS: usize = 10_000;

pub struct SessionPinStore {
    ttl: Duration,
    pins: Mutex<HashMap<(String, String), Pin>>,
}

impl SessionPinStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, pins: Mutex::new(HashMap::new()) }
    }

    /// Returns the pinned model for `(session_id, tier_profile)`, or `None`
    /// if there is no pin or it has expired. Expired entries are lazily
    /// removed here.
    pub async fn get(&self, session_id: &str, tier_profile: &str) -> Option<String> {
        let key = (session_id.to_string(), tier_profile.to_string());
        let mut pins = self.pins.lock().await;
        match pins.get(&key) {
            Some(pin) if pin.expires_at > Instant::now() => Some(pin.model_id.clone()),
            Some(_) => {
                pins.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Record a successful dispatch. Only the fallback executor calls this,
    /// and only after a confirmed 2xx response.
    pub async fn set(&self, session_id: &str, tier_profile: &str, model_id: &str) {
        let mut pins = self.pins.lock().await;
        if pins.len() >= MAX_PINS {
            if let Some(oldest_key) = pins
                .iter()
                .min_by_key(|(_, pin)| pin.inserted_at)
                .map(|(k, _)| k.clone())
            {
                pins.remove(&oldest_key);
            }
        }
        let now = Instant::now();
        pins.insert(
            (session_id.to_string(), tier_profile.to_string()),
            Pin { model_id: model_id.to_string(), expires_at: now + self.ttl, inserted_at: now },
        );
    }
}
