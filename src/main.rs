use std::sync::Arc;

use journey_os::config::Config;
use journey_os::journey::routes::{journey_routes, JourneyRouteState};
use journey_os::notify::email::SmtpNotifier;
use journey_os::notify::{LogNotifier, Notifier};
use journey_os::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env();

    eprintln!("journey-os v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path);
    eprintln!("   API: http://{}/api", config.bind_addr);

    let store = Arc::new(Store::open(&config.db_path).await.unwrap_or_else(|e| {
        eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
        std::process::exit(1);
    }));

    let notifier: Arc<dyn Notifier> = match config.smtp {
        Some(smtp) => {
            eprintln!("   Email: enabled (SMTP: {})", smtp.host);
            Arc::new(SmtpNotifier::new(smtp))
        }
        None => {
            eprintln!("   Email: disabled (log only)");
            Arc::new(LogNotifier)
        }
    };

    if config.webhook_secret.is_none() {
        eprintln!("   Warning: WEBHOOK_SECRET not set, provisioning webhook disabled");
    }
    eprintln!(
        "   IT nudges: {}\n",
        if config.slack_webhook_url.is_some() {
            "Slack"
        } else {
            "log only"
        }
    );

    let app = journey_routes(JourneyRouteState {
        store,
        notifier,
        webhook_secret: config.webhook_secret,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}
