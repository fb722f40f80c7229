//! Cart, order and lifecycle notifications sent to the backend.
//!
//! Every trigger runs on a detached task and returns its handle. Callers may
//! drop it; failures are logged inside the task.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::{
    clock::Clock,
    config::{CART_REMINDER_PATH, CART_UPDATED_PATH, ORDER_PLACED_PATH},
    credential::SessionCoordinator,
    error::SessionError,
    http_request::ApiRequest,
    logger::redact,
    storage::{get_or_log, keys, KeyValueStore},
    task::spawn_detached,
};

/// Cart mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, uniffi::Enum)]
#[serde(rename_all = "lowercase")]
pub enum CartAction {
    /// One item was added.
    Added,
    /// One item was removed.
    Removed,
    /// The cart was emptied.
    Cleared,
}

/// What the backend needs to know about a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, uniffi::Record)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    /// Backend order identifier.
    pub order_id: String,
    /// Number of items in the order.
    pub item_count: u32,
    /// Order total in minor currency units.
    pub total_cents: u64,
}

/// Durable cart state used to decide on abandonment reminders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartActivity {
    /// Items currently in the cart.
    pub item_count: u32,
    /// Time of the last cart mutation, in Unix milliseconds.
    pub last_activity_ms: u64,
    /// Set once a reminder was requested for the current activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_requested_ms: Option<u64>,
}

impl CartActivity {
    fn apply(&mut self, action: CartAction, now_ms: u64) {
        self.item_count = match action {
            CartAction::Added => self.item_count.saturating_add(1),
            CartAction::Removed => self.item_count.saturating_sub(1),
            CartAction::Cleared => 0,
        };
        self.last_activity_ms = now_ms;
        self.reminder_requested_ms = None;
    }

    fn reminder_due(&self, now_ms: u64, abandonment: Duration) -> bool {
        let idle_ms = now_ms.saturating_sub(self.last_activity_ms);
        self.item_count > 0
            && u128::from(idle_ms) >= abandonment.as_millis()
            && self
                .reminder_requested_ms
                .is_none_or(|requested| requested < self.last_activity_ms)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CartUpdatedBody<'a> {
    action: CartAction,
    item_name: &'a str,
    item_count: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CartReminderBody {
    item_count: u32,
}

/// Cart event held back until the debounce window closes.
#[derive(Debug)]
struct PendingCartEvent {
    action: CartAction,
    item_name: String,
    item_count: u32,
}

#[derive(Debug, Default)]
struct Debounce {
    last_cart_event_ms: Option<u64>,
    last_reminder_ms: Option<u64>,
    pending_cart_event: Option<PendingCartEvent>,
    flush_scheduled: bool,
    /// Bumped on reset so a flush scheduled before it sends nothing.
    epoch: u64,
}

impl Debounce {
    fn reset(&mut self) {
        *self = Self {
            epoch: self.epoch.wrapping_add(1),
            ..Self::default()
        };
    }
}

/// What to do with a cart event once the record is updated.
enum CartDispatch {
    Send,
    Coalesced,
    FlushAfter { delay: Duration, epoch: u64 },
}

struct Inner {
    coordinator: Arc<SessionCoordinator>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write cycles on the cart activity record.
    record: tokio::sync::Mutex<()>,
    debounce: Mutex<Debounce>,
}

/// Informs the backend of cart, order and lifecycle events.
#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

impl ReminderScheduler {
    /// Creates a scheduler sending through `coordinator`.
    #[must_use]
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                coordinator,
                store,
                clock,
                record: tokio::sync::Mutex::new(()),
                debounce: Mutex::new(Debounce::default()),
            }),
        }
    }

    /// Records a cart mutation and tells the backend.
    ///
    /// Events inside the debounce window coalesce; the latest one is sent when
    /// the window closes.
    pub fn on_cart_updated(&self, action: CartAction, item_name: &str) -> Option<JoinHandle<()>> {
        let inner = Arc::clone(&self.inner);
        let item_name = item_name.to_string();
        spawn_detached("cart-updated", async move {
            inner.cart_updated(action, &item_name).await;
        })
    }

    /// Clears the cart record and reports the order.
    pub fn on_order_placed(&self, summary: OrderSummary) -> Option<JoinHandle<()>> {
        let inner = Arc::clone(&self.inner);
        spawn_detached("order-placed", async move {
            inner.order_placed(&summary).await;
        })
    }

    /// Requests a cart abandonment reminder if one is due.
    pub fn on_app_foreground(&self) -> Option<JoinHandle<()>> {
        let inner = Arc::clone(&self.inner);
        spawn_detached("cart-reminder", async move {
            inner.request_reminder_if_due().await;
        })
    }

    /// Same check as [`Self::on_app_foreground`], run once at launch.
    pub fn check_on_app_start(&self) -> Option<JoinHandle<()>> {
        self.on_app_foreground()
    }

    /// Forgets the cart record and debounce state (logout).
    pub async fn reset(&self) {
        let _record = self.inner.record.lock().await;
        self.inner.debounce().reset();
        if let Err(err) = self.inner.store.remove(keys::CART_ACTIVITY).await {
            log::warn!("cart activity not cleared: {}", redact(&err.to_string()));
        }
    }

    /// The persisted cart record, if any.
    pub async fn cart_activity(&self) -> Option<CartActivity> {
        self.inner.load().await
    }
}

impl Inner {
    fn debounce(&self) -> std::sync::MutexGuard<'_, Debounce> {
        self.debounce.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn within_window(&self, last_ms: Option<u64>, now_ms: u64) -> bool {
        let window = self.coordinator.config().reminder_debounce().as_millis();
        last_ms.is_some_and(|last| u128::from(now_ms.saturating_sub(last)) < window)
    }

    async fn cart_updated(&self, action: CartAction, item_name: &str) {
        let (item_count, dispatch) = {
            let _record = self.record.lock().await;
            let now_ms = self.clock.now_millis();
            let mut activity = self.load().await.unwrap_or_default();
            activity.apply(action, now_ms);
            self.save(&activity).await;
            let event = PendingCartEvent {
                action,
                item_name: item_name.to_string(),
                item_count: activity.item_count,
            };
            (activity.item_count, self.dispatch_cart_event(event, now_ms))
        };

        match dispatch {
            CartDispatch::Send => self.send_cart_event(action, item_name, item_count).await,
            CartDispatch::Coalesced => log::debug!("cart event coalesced"),
            CartDispatch::FlushAfter { delay, epoch } => {
                log::debug!(delay_secs = delay.as_secs(); "cart event deferred");
                self.clock.sleep(delay).await;
                self.flush_cart_event(epoch).await;
            }
        }
    }

    /// Decides under the record lock, so pending events keep mutation order.
    fn dispatch_cart_event(&self, event: PendingCartEvent, now_ms: u64) -> CartDispatch {
        let mut debounce = self.debounce();
        if debounce.flush_scheduled {
            debounce.pending_cart_event = Some(event);
            return CartDispatch::Coalesced;
        }
        let Some(last_ms) = debounce
            .last_cart_event_ms
            .filter(|last| self.within_window(Some(*last), now_ms))
        else {
            debounce.last_cart_event_ms = Some(now_ms);
            debounce.pending_cart_event = None;
            return CartDispatch::Send;
        };

        let window = self.coordinator.config().reminder_debounce();
        let elapsed = Duration::from_millis(now_ms.saturating_sub(last_ms));
        debounce.pending_cart_event = Some(event);
        debounce.flush_scheduled = true;
        CartDispatch::FlushAfter {
            delay: window.saturating_sub(elapsed),
            epoch: debounce.epoch,
        }
    }

    async fn flush_cart_event(&self, epoch: u64) {
        let event = {
            let mut debounce = self.debounce();
            if debounce.epoch != epoch {
                return;
            }
            debounce.flush_scheduled = false;
            let event = debounce.pending_cart_event.take();
            if event.is_some() {
                debounce.last_cart_event_ms = Some(self.clock.now_millis());
            }
            event
        };
        if let Some(event) = event {
            self.send_cart_event(event.action, &event.item_name, event.item_count)
                .await;
        }
    }

    async fn send_cart_event(&self, action: CartAction, item_name: &str, item_count: u32) {
        let body = CartUpdatedBody {
            action,
            item_name,
            item_count,
        };
        match self.post(CART_UPDATED_PATH, &body).await {
            Ok(()) => log::debug!(item_count = item_count; "cart update sent"),
            Err(err) => log::warn!("cart update not sent: {}", redact(&err.to_string())),
        }
    }

    async fn order_placed(&self, summary: &OrderSummary) {
        {
            let _record = self.record.lock().await;
            self.debounce().pending_cart_event = None;
            if let Err(err) = self.store.remove(keys::CART_ACTIVITY).await {
                log::warn!("cart activity not cleared: {}", redact(&err.to_string()));
            }
        }

        match self.post(ORDER_PLACED_PATH, summary).await {
            Ok(()) => log::info!(item_count = summary.item_count; "order placement sent"),
            Err(err) => log::warn!("order placement not sent: {}", redact(&err.to_string())),
        }
    }

    async fn request_reminder_if_due(&self) {
        let _record = self.record.lock().await;
        let now_ms = self.clock.now_millis();
        let Some(mut activity) = self.load().await else {
            return;
        };
        if !activity.reminder_due(now_ms, self.coordinator.config().cart_abandonment()) {
            return;
        }
        {
            let mut debounce = self.debounce();
            if self.within_window(debounce.last_reminder_ms, now_ms) {
                log::debug!("cart reminder debounced");
                return;
            }
            debounce.last_reminder_ms = Some(now_ms);
        }

        let body = CartReminderBody {
            item_count: activity.item_count,
        };
        match self.post(CART_REMINDER_PATH, &body).await {
            Ok(()) => {
                activity.reminder_requested_ms = Some(now_ms);
                self.save(&activity).await;
                log::info!(item_count = activity.item_count; "cart reminder requested");
            }
            Err(err) => log::warn!("cart reminder not requested: {}", redact(&err.to_string())),
        }
    }

    async fn post<T: Serialize + Sync + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<(), SessionError> {
        if !self.coordinator.has_session().await {
            return Err(SessionError::NoValidCredential);
        }
        let url = self.coordinator.config().endpoint(path)?;
        let request = ApiRequest::post(url.as_str()).json(body)?;
        let response = self.coordinator.authenticated_request(request).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(SessionError::NetworkFailure {
                url: url.to_string(),
                status: Some(response.status),
                error: redact(&response.text()),
            })
        }
    }

    async fn load(&self) -> Option<CartActivity> {
        let raw = get_or_log(self.store.as_ref(), keys::CART_ACTIVITY).await?;
        match serde_json::from_str(&raw) {
            Ok(activity) => Some(activity),
            Err(err) => {
                log::warn!("cart activity unreadable, starting over: {}", redact(&err.to_string()));
                None
            }
        }
    }

    async fn save(&self, activity: &CartActivity) {
        let result = match serde_json::to_string(activity) {
            Ok(json) => self.store.set(keys::CART_ACTIVITY, &json).await.map_err(SessionError::from),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            log::warn!("cart activity not persisted: {}", redact(&err.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        http_request::ApiResponse,
        test_support::{network_failure, Harness},
    };

    const MINUTE: Duration = Duration::from_secs(60);

    fn scheduler(harness: &Harness) -> ReminderScheduler {
        ReminderScheduler::new(
            harness.coordinator.clone(),
            harness.store.clone(),
            harness.clock.clone(),
        )
    }

    async fn run(handle: Option<JoinHandle<()>>) {
        handle.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_cart_events_coalesce_to_latest_state() {
        let harness = Harness::logged_in();
        let scheduler = scheduler(&harness);

        run(scheduler.on_cart_updated(CartAction::Added, "Linen Shirt")).await;
        let tote = scheduler.on_cart_updated(CartAction::Added, "Canvas Tote");
        let cleared = scheduler.on_cart_updated(CartAction::Cleared, "");
        run(tote).await;
        run(cleared).await;

        let calls = harness.transport.calls_to("/notifications/cart-updated");
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].body,
            Some(json!({"action": "added", "itemName": "Linen Shirt", "itemCount": 1}))
        );
        assert_eq!(
            calls[1].body,
            Some(json!({"action": "cleared", "itemName": "", "itemCount": 0}))
        );
        assert_eq!(harness.clock.sleeps(), vec![Duration::from_secs(30)]);
        assert_eq!(scheduler.cart_activity().await.unwrap().item_count, 0);

        harness.clock.advance(Duration::from_secs(31));
        run(scheduler.on_cart_updated(CartAction::Added, "Mug")).await;

        let calls = harness.transport.calls_to("/notifications/cart-updated");
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[2].body,
            Some(json!({"action": "added", "itemName": "Mug", "itemCount": 1}))
        );
    }

    #[tokio::test]
    async fn test_deferred_cart_event_sent_after_window() {
        let harness = Harness::logged_in();
        let scheduler = scheduler(&harness);

        run(scheduler.on_cart_updated(CartAction::Added, "Lamp")).await;
        harness.clock.advance(Duration::from_secs(10));
        run(scheduler.on_cart_updated(CartAction::Added, "Rug")).await;

        assert_eq!(harness.clock.sleeps(), vec![Duration::from_secs(20)]);
        let calls = harness.transport.calls_to("/notifications/cart-updated");
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1].body,
            Some(json!({"action": "added", "itemName": "Rug", "itemCount": 2}))
        );
    }

    #[tokio::test]
    async fn test_order_placed_drops_deferred_cart_event() {
        let harness = Harness::logged_in();
        let scheduler = scheduler(&harness);

        run(scheduler.on_cart_updated(CartAction::Added, "Lamp")).await;
        let deferred = scheduler.on_cart_updated(CartAction::Added, "Rug");
        let order = scheduler.on_order_placed(OrderSummary {
            order_id: "ord_7".to_string(),
            item_count: 2,
            total_cents: 12_000,
        });
        run(deferred).await;
        run(order).await;

        assert_eq!(harness.transport.calls_to("/notifications/cart-updated").len(), 1);
        assert_eq!(harness.transport.calls_to("/notifications/order-placed").len(), 1);
    }

    #[tokio::test]
    async fn test_item_count_saturates() {
        let harness = Harness::logged_in();
        let scheduler = scheduler(&harness);

        run(scheduler.on_cart_updated(CartAction::Removed, "Mug")).await;
        assert_eq!(scheduler.cart_activity().await.unwrap().item_count, 0);

        run(scheduler.on_cart_updated(CartAction::Added, "Mug")).await;
        run(scheduler.on_cart_updated(CartAction::Added, "Mug")).await;
        run(scheduler.on_cart_updated(CartAction::Cleared, "")).await;
        assert_eq!(scheduler.cart_activity().await.unwrap().item_count, 0);
    }

    #[tokio::test]
    async fn test_reminder_requested_once_after_abandonment() {
        let harness = Harness::logged_in();
        let scheduler = scheduler(&harness);

        run(scheduler.on_app_foreground()).await;
        run(scheduler.on_cart_updated(CartAction::Added, "Lamp")).await;

        // Fresh cart.
        harness.clock.advance(MINUTE * 10);
        run(scheduler.on_app_foreground()).await;
        assert!(harness.transport.calls_to("/notifications/cart-reminder").is_empty());

        harness.clock.advance(MINUTE * 51);
        run(scheduler.on_app_foreground()).await;
        let calls = harness.transport.calls_to("/notifications/cart-reminder");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].body, Some(json!({"itemCount": 1})));
        assert!(scheduler
            .cart_activity()
            .await
            .unwrap()
            .reminder_requested_ms
            .is_some());

        harness.clock.advance(MINUTE * 5);
        run(scheduler.check_on_app_start()).await;
        assert_eq!(harness.transport.calls_to("/notifications/cart-reminder").len(), 1);
    }

    #[tokio::test]
    async fn test_new_activity_rearms_reminder() {
        let harness = Harness::logged_in();
        let scheduler = scheduler(&harness);

        run(scheduler.on_cart_updated(CartAction::Added, "Lamp")).await;
        harness.clock.advance(MINUTE * 61);
        run(scheduler.on_app_foreground()).await;

        run(scheduler.on_cart_updated(CartAction::Added, "Rug")).await;
        assert_eq!(scheduler.cart_activity().await.unwrap().reminder_requested_ms, None);

        harness.clock.advance(MINUTE * 61);
        run(scheduler.on_app_foreground()).await;
        let calls = harness.transport.calls_to("/notifications/cart-reminder");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].body, Some(json!({"itemCount": 2})));
    }

    #[tokio::test]
    async fn test_failed_reminder_leaves_marker_unset() {
        let harness = Harness::logged_in();
        harness
            .transport
            .script("/notifications/cart-reminder", Ok(ApiResponse::new(502, "bad gateway")));
        let scheduler = scheduler(&harness);

        run(scheduler.on_cart_updated(CartAction::Added, "Lamp")).await;
        harness.clock.advance(MINUTE * 61);
        run(scheduler.on_app_foreground()).await;

        assert_eq!(scheduler.cart_activity().await.unwrap().reminder_requested_ms, None);
    }

    #[tokio::test]
    async fn test_order_placed_clears_record() {
        let harness = Harness::logged_in();
        let scheduler = scheduler(&harness);

        run(scheduler.on_cart_updated(CartAction::Added, "Lamp")).await;
        run(scheduler.on_order_placed(OrderSummary {
            order_id: "ord_42".to_string(),
            item_count: 1,
            total_cents: 4_999,
        }))
        .await;

        assert_eq!(scheduler.cart_activity().await, None);
        let calls = harness.transport.calls_to("/notifications/order-placed");
        assert_eq!(
            calls[0].body,
            Some(json!({"orderId": "ord_42", "itemCount": 1, "totalCents": 4999}))
        );
    }

    #[tokio::test]
    async fn test_failures_stay_inside_task() {
        let harness = Harness::logged_in();
        harness
            .transport
            .script("/notifications/cart-updated", network_failure("/notifications/cart-updated"));
        harness.store.set_fail_writes(true);
        let scheduler = scheduler(&harness);

        run(scheduler.on_cart_updated(CartAction::Added, "Lamp")).await;
        assert_eq!(harness.transport.calls_to("/notifications/cart-updated").len(), 1);
    }

    #[tokio::test]
    async fn test_logged_out_sends_nothing() {
        let harness = Harness::new();
        let scheduler = scheduler(&harness);

        run(scheduler.on_cart_updated(CartAction::Added, "Lamp")).await;
        harness.clock.advance(MINUTE * 61);
        run(scheduler.on_app_foreground()).await;

        assert!(harness.transport.calls().is_empty());
        assert_eq!(scheduler.cart_activity().await.unwrap().item_count, 1);
    }

    #[tokio::test]
    async fn test_reset_clears_record() {
        let harness = Harness::logged_in();
        let scheduler = scheduler(&harness);

        run(scheduler.on_cart_updated(CartAction::Added, "Lamp")).await;
        scheduler.reset().await;

        assert_eq!(harness.store.peek(keys::CART_ACTIVITY), None);
        run(scheduler.on_cart_updated(CartAction::Added, "Lamp")).await;
        assert_eq!(harness.transport.calls_to("/notifications/cart-updated").len(), 2);
    }

    #[test]
    fn test_stored_record_format() {
        let activity = CartActivity {
            item_count: 2,
            last_activity_ms: 1_700_000_000_000,
            reminder_requested_ms: None,
        };
        assert_eq!(
            serde_json::to_value(&activity).unwrap(),
            json!({"itemCount": 2, "lastActivityMs": 1_700_000_000_000_u64})
        );
    }
}
