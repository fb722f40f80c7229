//! Fixed keys under which session state is persisted.
//!
//! The names match what earlier app releases wrote, so upgraded installs keep
//! their session.

/// Short-lived bearer token.
pub const AUTH_TOKEN: &str = "authToken";

/// Long-lived token exchanged for a new access token.
pub const REFRESH_TOKEN: &str = "refreshToken";

/// Last push token issued by the platform for this device.
pub const PUSH_TOKEN: &str = "pushToken";

/// `"true"` once the backend acknowledged [`PUSH_TOKEN`] for the current login.
pub const PUSH_TOKEN_SENT: &str = "pushTokenSent";

/// JSON blob holding the behavior ledger.
pub const USER_BEHAVIOR: &str = "userBehavior";

/// JSON blob holding the cart activity record used for abandonment reminders.
pub const CART_ACTIVITY: &str = "cartActivity";

/// Value written to boolean flags.
pub(crate) const FLAG_SET: &str = "true";
