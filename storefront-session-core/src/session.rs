//! One instance of each session component plus the app lifecycle hooks.

use std::sync::Arc;

use crate::{
    clock::{Clock, TokioClock},
    config::SessionConfig,
    credential::{Credential, SessionCoordinator},
    delivery::{DeliveryRegistrationService, PushPlatform, RegistrationOutcome},
    error::SessionError,
    http_request::{HttpTransport, ReqwestTransport},
    ledger::BehaviorLedger,
    reminders::ReminderScheduler,
    storage::KeyValueStore,
};

/// The session components of one app process, wired to shared collaborators.
pub struct SessionServices {
    coordinator: Arc<SessionCoordinator>,
    delivery: DeliveryRegistrationService,
    reminders: ReminderScheduler,
    ledger: BehaviorLedger,
}

impl SessionServices {
    /// Wires every component to the given collaborators.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn HttpTransport>,
        platform: Arc<dyn PushPlatform>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = BehaviorLedger::new(Arc::clone(&store), &config);
        let coordinator = Arc::new(SessionCoordinator::new(
            config,
            Arc::clone(&store),
            transport,
        ));
        let delivery = DeliveryRegistrationService::new(
            Arc::clone(&coordinator),
            Arc::clone(&store),
            platform,
            Arc::clone(&clock),
        );
        let reminders = ReminderScheduler::new(Arc::clone(&coordinator), store, clock);
        Self {
            coordinator,
            delivery,
            reminders,
            ledger,
        }
    }

    /// Wires the components with the reqwest transport and the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] if the configured base URL is unusable.
    pub fn with_defaults(
        config: SessionConfig,
        store: Arc<dyn KeyValueStore>,
        platform: Arc<dyn PushPlatform>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout()));
        Ok(Self::new(config, store, transport, platform, Arc::new(TokioClock)))
    }

    /// The credential coordinator, for authenticated calls.
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    /// The push registration service.
    #[must_use]
    pub const fn delivery(&self) -> &DeliveryRegistrationService {
        &self.delivery
    }

    /// The reminder scheduler.
    #[must_use]
    pub const fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }

    /// The behavior ledger.
    #[must_use]
    pub const fn ledger(&self) -> &BehaviorLedger {
        &self.ledger
    }

    /// Process start: loads the ledger, resends an unacknowledged push token
    /// and checks for a due cart reminder.
    pub async fn on_app_start(&self) -> RegistrationOutcome {
        self.ledger.hydrate().await;
        let _reminder = self.reminders.check_on_app_start();
        self.delivery.check_and_resend_if_unsent().await
    }

    /// App returned to the foreground.
    pub async fn on_app_foreground(&self) -> RegistrationOutcome {
        let _reminder = self.reminders.on_app_foreground();
        self.delivery.check_and_resend_if_unsent().await
    }

    /// Stores the login credential and registers the push token.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StorageFailure`] if the credential cannot be stored;
    /// registration is not attempted then.
    pub async fn on_login_success(
        &self,
        credential: &Credential,
    ) -> Result<RegistrationOutcome, SessionError> {
        self.coordinator.establish_session(credential).await?;
        Ok(self.delivery.register_delivery_address().await)
    }

    /// Unregisters the push token while the credential is still valid, then
    /// forgets the cart record and the credential. The ledger is kept.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StorageFailure`] if the credential cannot be removed.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.delivery.remove_delivery_address().await;
        self.reminders.reset().await;
        self.coordinator.clear_session().await
    }
}
