//! Local browsing history used for personalization.
//!
//! Purely local: nothing here touches the network. Mutations apply to memory
//! right away and persist in the background; storage failures are logged and
//! otherwise ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use crate::{
    config::SessionConfig,
    logger::redact,
    storage::{get_or_log, keys, KeyValueStore},
    task::spawn_detached,
};

mod state;

use state::{BehaviorEvent, Caps, StoredBehavior};
pub use state::{BehaviorState, CategoryCounts, RECOMMENDATION_COUNT, SUGGESTION_COUNT};

struct Ledger {
    state: BehaviorState,
    /// Mutations made before the stored ledger was loaded. `None` once loaded.
    pending: Option<Vec<BehaviorEvent>>,
}

struct Inner {
    store: Arc<dyn KeyValueStore>,
    caps: Caps,
    ledger: Mutex<Ledger>,
    /// Held while writing, so each write carries the state current at that time.
    writer: tokio::sync::Mutex<()>,
}

/// Viewed products, searches and category affinity.
#[derive(Clone)]
pub struct BehaviorLedger {
    inner: Arc<Inner>,
}

impl BehaviorLedger {
    /// Creates an empty ledger. Call [`Self::hydrate`] once at startup.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, config: &SessionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                caps: Caps {
                    viewed: config.max_viewed_products,
                    searches: config.max_search_history,
                },
                ledger: Mutex::new(Ledger {
                    state: BehaviorState::default(),
                    pending: Some(Vec::new()),
                }),
                writer: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Records a product view, counting `category` when given.
    pub fn track_product_view(&self, product_id: &str, category: Option<&str>) {
        let id = product_id.trim();
        if id.is_empty() {
            return;
        }
        let category = category
            .map(str::trim)
            .filter(|category| !category.is_empty())
            .map(ToString::to_string);
        self.record(BehaviorEvent::ProductView {
            id: id.to_string(),
            category,
        });
    }

    /// Records a search query.
    pub fn track_search(&self, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            return;
        }
        self.record(BehaviorEvent::Search(query.to_string()));
    }

    /// Records a visit to a category page.
    pub fn track_category_visit(&self, category: &str) {
        let category = category.trim();
        if category.is_empty() {
            return;
        }
        self.record(BehaviorEvent::CategoryVisit(category.to_string()));
    }

    /// Up to five categories, most viewed first.
    #[must_use]
    pub fn recommended_categories(&self) -> Vec<String> {
        self.inner
            .lock()
            .state
            .top_categories(RECOMMENDATION_COUNT)
    }

    /// The five most recent searches.
    #[must_use]
    pub fn search_suggestions(&self) -> Vec<String> {
        self.inner.lock().state.recent_searches(SUGGESTION_COUNT)
    }

    /// The `limit` most recently viewed product ids.
    #[must_use]
    pub fn recently_viewed(&self, limit: usize) -> Vec<String> {
        self.inner
            .lock()
            .state
            .viewed_products
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    /// A copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> BehaviorState {
        self.inner.lock().state.clone()
    }

    /// Whether the stored ledger was loaded.
    #[must_use]
    pub fn is_hydrated(&self) -> bool {
        self.inner.lock().pending.is_none()
    }

    /// Loads the stored ledger and replays anything tracked before it.
    ///
    /// Stored values replace the defaults for every key they define. Runs
    /// once; later calls do nothing.
    pub async fn hydrate(&self) {
        if self.is_hydrated() {
            return;
        }
        let stored = self.inner.load().await;

        let replayed = {
            let mut ledger = self.inner.lock();
            let Some(pending) = ledger.pending.take() else {
                return;
            };
            let mut state = BehaviorState::default();
            if let Some(stored) = stored {
                stored.merge_into(&mut state);
            }
            state.enforce_caps(self.inner.caps);
            for event in &pending {
                state.apply(event, self.inner.caps);
            }
            ledger.state = state;
            pending.len()
        };

        log::debug!(replayed = replayed; "behavior ledger loaded");
        if replayed > 0 {
            self.inner.persist().await;
        }
    }

    /// Writes the current state and waits for the write.
    pub async fn flush(&self) {
        if self.is_hydrated() {
            self.inner.persist().await;
        }
    }

    fn record(&self, event: BehaviorEvent) {
        let hydrated = {
            let mut ledger = self.inner.lock();
            ledger.state.apply(&event, self.inner.caps);
            match ledger.pending.as_mut() {
                Some(pending) => {
                    pending.push(event);
                    false
                }
                None => true,
            }
        };
        // Writing before the stored ledger is loaded would clobber it.
        if hydrated {
            self.persist_in_background();
        }
    }

    fn persist_in_background(&self) -> Option<JoinHandle<()>> {
        let inner = Arc::clone(&self.inner);
        spawn_detached("ledger-persist", async move { inner.persist().await })
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load(&self) -> Option<StoredBehavior> {
        let raw = get_or_log(self.store.as_ref(), keys::USER_BEHAVIOR).await?;
        match serde_json::from_str(&raw) {
            Ok(stored) => Some(stored),
            Err(err) => {
                log::warn!(
                    "stored behavior ledger unreadable, starting empty: {}",
                    redact(&err.to_string())
                );
                None
            }
        }
    }

    async fn persist(&self) {
        let _writer = self.writer.lock().await;
        let state = self.lock().state.clone();
        let json = match serde_json::to_string(&state) {
            Ok(json) => json,
            Err(err) => {
                log::warn!("behavior ledger not serialized: {}", redact(&err.to_string()));
                return;
            }
        };
        if let Err(err) = self.store.set(keys::USER_BEHAVIOR, &json).await {
            log::warn!("behavior ledger not persisted: {}", redact(&err.to_string()));
        }
    }
}
