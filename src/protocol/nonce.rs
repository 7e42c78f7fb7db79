/// Anti-replay nonce cache
use std::sync::Mutex;

use reqwest::header::HeaderMap;

/// Header carrying a fresh nonce in every CA response
pub const REPLAY_NONCE: &str = "Replay-Nonce";

/// Holds the single outstanding nonce for one account/CA session.
///
/// Every signed request consumes the slot; every CA response, success or
/// problem, refills it from the `Replay-Nonce` header. A consumed nonce
/// is never handed out twice.
#[derive(Debug, Default)]
pub struct NonceCache {
    slot: Mutex<Option<String>>,
}

impl NonceCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the cached nonce, leaving the slot empty.
    pub fn consume(&self) -> Option<String> {
        self.slot.lock().expect("nonce cache poisoned").take()
    }

    /// Store a nonce, replacing any previous one.
    pub fn replenish(&self, nonce: impl Into<String>) {
        let mut slot = self.slot.lock().expect("nonce cache poisoned");
        *slot = Some(nonce.into());
    }

    /// Store the nonce from a response header set, if present.
    pub fn replenish_from(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(REPLAY_NONCE).and_then(|v| v.to_str().ok()) {
            self.replenish(value.to_string());
        }
    }

    /// Drop any cached nonce. Used after a `badNonce` rejection so the
    /// retry fetches a fresh one instead of reusing the replenished slot.
    pub fn clear(&self) {
        self.slot.lock().expect("nonce cache poisoned").take();
    }

    /// Whether a nonce is currently cached
    pub fn has_nonce(&self) -> bool {
        self.slot.lock().expect("nonce cache poisoned").is_some()
    }
}
