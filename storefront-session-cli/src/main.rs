//! Developer CLI for the storefront session kit.
//!
//! Drives the same components the mobile apps use against a real backend,
//! with session state kept in a JSON file.
//!
//! # Usage
//!
//! ```bash
//! # Store a credential and register this "device" for push
//! storefront-session --environment staging login --access-token A --refresh-token R
//!
//! # Authenticated call, refreshing the credential if the backend rejects it
//! storefront-session request GET /orders
//!
//! # Cart events and the abandonment check
//! storefront-session cart add "Linen Shirt"
//! storefront-session foreground
//!
//! # Local browsing history
//! storefront-session ledger view sku-123 --category shirts
//! storefront-session ledger show
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use eyre::{bail, eyre, WrapErr};
use storefront_session_core::{
    ApiRequest, CartAction, Credential, Environment, OrderSummary, PermissionStatus,
    PlatformError, PushPlatform, SessionConfig, SessionServices,
};

mod file_store;
mod logging;

use file_store::FileStore;

#[derive(Parser)]
#[command(name = "storefront-session")]
#[command(author, version, about = "Storefront session kit developer tools")]
struct Cli {
    /// Backend deployment (`staging` or `production`)
    #[arg(long, env = "STOREFRONT_ENVIRONMENT", default_value = "staging", value_parser = parse_environment)]
    environment: Environment,

    /// Override the backend base URL
    #[arg(long, env = "STOREFRONT_BASE_URL")]
    base_url: Option<String>,

    /// Session state file (defaults to the platform data directory)
    #[arg(long, env = "STOREFRONT_STORE")]
    store: Option<PathBuf>,

    /// Push token this CLI registers as its device address
    #[arg(long, env = "STOREFRONT_PUSH_TOKEN", default_value = "ExponentPushToken[storefront-cli]")]
    push_token: String,

    /// Log debug output from the session kit
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a credential and register the push token
    Login {
        /// Access token issued by the backend
        #[arg(long)]
        access_token: String,
        /// Refresh token issued by the backend
        #[arg(long)]
        refresh_token: String,
    },
    /// Unregister the push token and forget the session
    Logout,
    /// Exchange the refresh token for a new access token
    Refresh,
    /// Perform an authenticated request
    Request {
        /// HTTP method
        method: String,
        /// Absolute URL or path relative to the base URL
        target: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Push token registration
    Push {
        #[command(subcommand)]
        action: PushAction,
    },
    /// Local browsing history
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
    /// Cart events
    Cart {
        #[command(subcommand)]
        action: CartCommand,
    },
    /// Report a placed order
    Order {
        /// Backend order identifier
        order_id: String,
        /// Number of items
        #[arg(long)]
        items: u32,
        /// Total in minor currency units
        #[arg(long)]
        total_cents: u64,
    },
    /// Run the app-foreground hooks (push resend, cart reminder)
    Foreground,
}

#[derive(Subcommand)]
enum PushAction {
    /// Register the push token
    Register,
    /// Resend the stored token if the backend never acknowledged it
    Resend,
    /// Register a replacement token issued by the platform
    Rotate {
        /// The new token
        token: String,
    },
    /// Unregister the push token
    Remove,
}

#[derive(Subcommand)]
enum LedgerAction {
    /// Record a product view
    View {
        /// Product id
        product_id: String,
        /// Product category
        #[arg(long)]
        category: Option<String>,
    },
    /// Record a search
    Search {
        /// Search query
        query: String,
    },
    /// Record a category visit
    Visit {
        /// Category name
        category: String,
    },
    /// Print the ledger, recommendations and suggestions
    Show,
}

#[derive(Subcommand)]
enum CartCommand {
    /// An item was added
    Add {
        /// Item name
        item: String,
    },
    /// An item was removed
    Remove {
        /// Item name
        item: String,
    },
    /// The cart was emptied
    Clear,
}

/// Stand-in for a phone: always push capable, permission always granted.
struct CliPlatform {
    token: String,
}

#[async_trait]
impl PushPlatform for CliPlatform {
    fn is_delivery_capable(&self) -> bool {
        true
    }

    async fn permission_status(&self) -> Result<PermissionStatus, PlatformError> {
        Ok(PermissionStatus::Granted)
    }

    async fn request_permission(&self) -> Result<PermissionStatus, PlatformError> {
        Ok(PermissionStatus::Granted)
    }

    async fn delivery_token(&self) -> Result<String, PlatformError> {
        Ok(self.token.clone())
    }
}

fn parse_environment(raw: &str) -> Result<Environment, String> {
    Environment::from_str(&raw.to_ascii_lowercase())
        .map_err(|_| format!("unknown environment `{raw}`, expected staging or production"))
}

fn default_store_path() -> eyre::Result<PathBuf> {
    let base = dirs::data_dir().ok_or_else(|| eyre!("no data directory, pass --store"))?;
    Ok(base.join("storefront-session").join("store.json"))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = SessionConfig::from_environment(cli.environment);
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url)?;
    }
    let store_path = match &cli.store {
        Some(path) => path.clone(),
        None => default_store_path()?,
    };
    let store = FileStore::open(&store_path)
        .await
        .wrap_err_with(|| format!("opening {}", store_path.display()))?;
    tracing::debug!(store = %store.path().display(), base_url = %config.base_url, "session store opened");

    let services = SessionServices::with_defaults(
        config,
        Arc::new(store),
        Arc::new(CliPlatform {
            token: cli.push_token.clone(),
        }),
    )?;

    run(&services, cli.command).await
}

async fn run(services: &SessionServices, command: Commands) -> eyre::Result<()> {
    match command {
        Commands::Login {
            access_token,
            refresh_token,
        } => {
            let outcome = services
                .on_login_success(&Credential::new(access_token, refresh_token))
                .await?;
            println!("logged in, push registration: {outcome:?}");
        }
        Commands::Logout => {
            services.logout().await?;
            println!("logged out");
        }
        Commands::Refresh => match services.coordinator().refresh_token().await {
            Some(_) => println!("access token refreshed"),
            None => bail!("session cannot be refreshed, log in again"),
        },
        Commands::Request {
            method,
            target,
            body,
        } => request(services, &method, &target, body.as_deref()).await?,
        Commands::Push { action } => {
            let delivery = services.delivery();
            match action {
                PushAction::Register => {
                    println!("{:?}", delivery.register_delivery_address().await);
                }
                PushAction::Resend => {
                    println!("{:?}", delivery.check_and_resend_if_unsent().await);
                }
                PushAction::Rotate { token } => {
                    println!("{:?}", delivery.handle_token_rotation(&token).await);
                }
                PushAction::Remove => {
                    delivery.remove_delivery_address().await;
                    println!("push token removed");
                }
            }
        }
        Commands::Ledger { action } => ledger(services, action).await?,
        Commands::Cart { action } => {
            let (action, item) = match action {
                CartCommand::Add { item } => (CartAction::Added, item),
                CartCommand::Remove { item } => (CartAction::Removed, item),
                CartCommand::Clear => (CartAction::Cleared, String::new()),
            };
            if let Some(task) = services.reminders().on_cart_updated(action, &item) {
                task.await?;
            }
            let activity = services.reminders().cart_activity().await.unwrap_or_default();
            println!("cart holds {} item(s)", activity.item_count);
        }
        Commands::Order {
            order_id,
            items,
            total_cents,
        } => {
            let summary = OrderSummary {
                order_id,
                item_count: items,
                total_cents,
            };
            if let Some(task) = services.reminders().on_order_placed(summary) {
                task.await?;
            }
            println!("order reported");
        }
        Commands::Foreground => {
            let reminder = services.reminders().on_app_foreground();
            println!("{:?}", services.delivery().check_and_resend_if_unsent().await);
            if let Some(task) = reminder {
                task.await?;
            }
        }
    }
    Ok(())
}

async fn request(
    services: &SessionServices,
    method: &str,
    target: &str,
    body: Option<&str>,
) -> eyre::Result<()> {
    let method = reqwest_method(method)?;
    let url = if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        services.coordinator().config().endpoint(target)?.to_string()
    };

    let mut request = ApiRequest::new(method, url);
    if let Some(body) = body {
        let value: serde_json::Value =
            serde_json::from_str(body).wrap_err("--body is not valid JSON")?;
        request = request.json(&value)?;
    }

    let response = services.coordinator().authenticated_request(request).await?;
    println!("{}", response.status);
    match response.json::<serde_json::Value>() {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", response.text()),
    }
    Ok(())
}

fn reqwest_method(raw: &str) -> eyre::Result<storefront_session_core::Method> {
    storefront_session_core::Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map_err(|_| eyre!("invalid HTTP method `{raw}`"))
}

async fn ledger(services: &SessionServices, action: LedgerAction) -> eyre::Result<()> {
    let ledger = services.ledger();
    ledger.hydrate().await;
    match action {
        LedgerAction::View {
            product_id,
            category,
        } => ledger.track_product_view(&product_id, category.as_deref()),
        LedgerAction::Search { query } => ledger.track_search(&query),
        LedgerAction::Visit { category } => ledger.track_category_visit(&category),
        LedgerAction::Show => {
            println!("{}", serde_json::to_string_pretty(&ledger.snapshot())?);
            println!("recommended: {}", ledger.recommended_categories().join(", "));
            println!("suggestions: {}", ledger.search_suggestions().join(", "));
            return Ok(());
        }
    }
    ledger.flush().await;
    Ok(())
}
