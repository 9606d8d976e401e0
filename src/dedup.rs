//! Request deduplication / in-flight coalescing cache.
//!
//! Identical concurrent requests (same fingerprint) share a single upstream
//! dispatch via a [`Shared`] future; once that dispatch completes, the
//! response is cached verbatim for a short TTL so a burst of retries doesn't
//! re-dispatch. Errors are never cached — only a successful response is
//! worth short-circuiting.
//!
//! Streaming requests bypass this cache entirely; callers simply don't
//! consult it for `stream: true` bodies.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::DispatchError;

type DispatchFuture = Shared<BoxFuture<'static, Result<Value, DispatchError>>>;

enum Slot {
    InFlight(DispatchFuture),
    Completed { response: Value, inserted_at: Instant },
}

pub struct DedupCache {
    ttl: Duration,
    entries: DashMap<String, Slot>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: DashMap::new() }
    }

    /// Run `make_future` at most once per in-flight fingerprint. Concurrent
    /// callers for the same fingerprint share its result; once it completes
    /// successfully, the response is cached until `ttl` elapses.
    pub async fn get_or_dispatch<F>(
        &self,
        fingerprint: &str,
        make_future: F,
    ) -> Result<Value, DispatchError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value, DispatchError>>,
    {
        let shared = match self.entries.entry(fingerprint.to_string()) {
            MapEntry::Occupied(mut occ) => match occ.get() {
                Slot::Completed { response, inserted_at } if inserted_at.elapsed() < self.ttl => {
                    return Ok(response.clone());
                }
                Slot::Completed { .. } => {
                    let fut = make_future().shared();
                    occ.insert(Slot::InFlight(fut.clone()));
                    fut
                }
                Slot::InFlight(fut) => fut.clone(),
            },
            MapEntry::Vacant(vac) => {
                let fut = make_future().shared();
                vac.insert(Slot::InFlight(fut.clone()));
                fut
            }
        };

        let result = shared.await;
        match &result {
            Ok(response) => {
                self.entries.insert(
                    fingerprint.to_string(),
                    Slot::Completed { response: response.clone(), inserted_at: Instant::now() },
                );
            }
            Err(_) => {
                self.entries.remove(fingerprint);
            }
        }
        result
    }
}

/// Canonical fingerprint over the fields that determine whether two requests
/// are "the same" for dedup purposes: normalized model id, messages,
/// max_tokens, temperature, seed. Field order in the source JSON doesn't
/// matter — keys are sorted before hashing.
pub fn fingerprint(normalized_model: &str, body: &Value) -> String {
    let canonical = serde_json::json!({
        "model": normalized_model,
        "messages": body.get("messages").cloned().unwrap_or(Value::Null),
        "max_tokens": body.get("max_tokens").cloned().unwrap_or(Value::Null),
        "temperature": body.get("temperature").cloned().unwrap_or(Value::Null),
        "seed": body.get("seed").cloned().unwrap_or(Value::Null),
    });
    // serde_json's Map is a BTreeMap by default (no "preserve_order" feature),
    // so `to_string()` already emits keys in sorted order.
    let bytes = serde_json::to_vec(&canonical).expect("canonical value always serializes");
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}
