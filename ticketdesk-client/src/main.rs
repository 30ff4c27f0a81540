use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use ticketdesk_client::{
    api::ApiConfig,
    channel::{ChannelConfig, NotificationHandler},
    credentials::CredentialStore,
    session::{SessionConfig, SessionController},
};

#[derive(Parser, Debug)]
#[command(name = "ticketdesk", about = "Headless TicketDesk session shell")]
struct Cli {
    /// Backend REST base URL.
    #[arg(long, default_value = "https://backend.ticketdesk.example/api")]
    api_url: String,

    /// Push channel websocket URL.
    #[arg(long, default_value = "wss://backend.ticketdesk.example/push")]
    push_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticate and persist the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Tail live notifications using the stored session.
    Watch,
    /// Clear the stored session.
    Logout,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store = CredentialStore::default_location("TicketDesk");
    let config = SessionConfig {
        api: ApiConfig::new(cli.api_url),
        channel: ChannelConfig::new(cli.push_url),
    };

    let mut session = match SessionController::new(config, store) {
        Ok(session) => session,
        Err(err) => {
            error!("client init failed: {err}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Login { email, password } => match session.login(&email, &password).await {
            Ok(user) => info!(user = %user.email, "logged in"),
            Err(err) => {
                error!("{err}");
                std::process::exit(1);
            }
        },
        Command::Watch => {
            let handler: NotificationHandler = Arc::new(|payload| {
                info!("notification: {payload}");
            });
            if session.connect_notifications_with_stored(handler).is_none() {
                error!("no usable session; run `ticketdesk login` first");
                std::process::exit(1);
            }

            info!("watching for notifications; press ctrl-c to stop");
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("signal wait failed: {err}");
            }
            session.disconnect_notifications();
        }
        Command::Logout => session.logout(),
    }
}
