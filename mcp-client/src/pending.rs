//! Correlation of outstanding requests with their asynchronous responses.

use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::oneshot;

use crate::error::ClientError;

pub(crate) type Outcome = Result<serde_json::Value, ClientError>;

pub(crate) struct PendingRequest {
    pub method: String,
    pub tx: oneshot::Sender<Outcome>,
}

/// Maps correlation ids to one-shot completion slots. An entry leaves the
/// map on exactly one of: response arrival, timeout, or shutdown.
pub(crate) struct RequestRegistry {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, PendingRequest>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a fresh entry. Callers must register *before* publishing so
    /// an immediate response cannot be lost.
    pub async fn register(&self, method: &str) -> (i64, oneshot::Receiver<Outcome>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                tx,
            },
        );
        (id, rx)
    }

    /// Resolves the entry for `id`, if any. Returns false when no request
    /// with that id is outstanding.
    pub async fn complete(&self, id: i64, outcome: Outcome) -> bool {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending.remove(&id)
        };
        match entry {
            Some(request) => {
                // The awaiter may have timed out already; nothing to do then.
                let _ = request.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Withdraws the entry without resolving it (timeout and send-failure
    /// paths). A response arriving later is ignored.
    pub async fn remove(&self, id: i64) -> bool {
        let mut pending = self.pending.lock().await;
        pending.remove(&id).is_some()
    }

    /// Rejects every outstanding request with `Cancelled` and clears the
    /// map. Used at shutdown.
    pub async fn fail_all(&self) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().await;
            pending.drain().map(|(_, request)| request).collect()
        };
        for request in drained {
            let _ = request.tx.send(Err(ClientError::Cancelled));
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Per-method default deadline.
    pub fn default_timeout(method: &str) -> Duration {
        match method {
            "ping" => Duration::from_millis(10_000),
            "tools/call" | "sampling/createMessage" | "completion/complete" => {
                Duration::from_millis(60_000)
            }
            _ => Duration::from_millis(30_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn response_resolves_exactly_one_awaiter() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.register("tools/list").await;

        assert!(registry.complete(id, Ok(json!({"tools": []}))).await);
        let outcome = rx.await.expect("slot must resolve");
        assert_eq!(outcome.expect("must be success"), json!({"tools": []}));

        // The entry is gone; a duplicate response finds nothing.
        assert!(!registry.complete(id, Ok(json!({}))).await);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn unknown_ids_complete_nothing() {
        let registry = RequestRegistry::new();
        assert!(!registry.complete(42, Ok(json!({}))).await);
    }

    #[tokio::test]
    async fn removal_makes_late_responses_invisible() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.register("tools/list").await;

        assert!(registry.remove(id).await);
        assert!(!registry.complete(id, Ok(json!({}))).await);
        // The slot was dropped without an outcome.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn fail_all_cancels_every_awaiter() {
        let registry = RequestRegistry::new();
        let (_, rx_a) = registry.register("tools/list").await;
        let (_, rx_b) = registry.register("ping").await;

        registry.fail_all().await;
        assert_eq!(registry.len().await, 0);
        for rx in [rx_a, rx_b] {
            let outcome = rx.await.expect("slot must resolve");
            assert!(matches!(outcome, Err(ClientError::Cancelled)));
        }
    }

    #[tokio::test]
    async fn ids_are_unique_and_increasing() {
        let registry = RequestRegistry::new();
        let (a, _rx_a) = registry.register("ping").await;
        let (b, _rx_b) = registry.register("ping").await;
        assert!(b > a);
    }

    #[test]
    fn timeout_table_matches_the_method_classes() {
        assert_eq!(
            RequestRegistry::default_timeout("ping"),
            Duration::from_millis(10_000)
        );
        for method in ["tools/call", "sampling/createMessage", "completion/complete"] {
            assert_eq!(
                RequestRegistry::default_timeout(method),
                Duration::from_millis(60_000)
            );
        }
        for method in [
            "initialize",
            "tools/list",
            "resources/list",
            "resources/read",
            "prompts/get",
            "logging/setLevel",
            "anything/else",
        ] {
            assert_eq!(
                RequestRegistry::default_timeout(method),
                Duration::from_millis(30_000)
            );
        }
    }
}
