use std::sync::Arc;

mod bili;
mod config;
mod db;
mod detect;
mod error;
mod models;
mod poller;
mod push;

use bili::{BiliClient, WbiSigner};
use config::Config;
use db::{Repository, SubscriptionStore};
use error::Result;
use poller::Poller;
use push::{LogNotifier, Notifier, NullResolver, Pusher, Resolver, WebhookNotifier};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (info and up by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let run_once = args.len() >= 2 && args[1] == "--once";

    // Load configuration
    let config = Config::load()?;

    // Wire components
    let repository: Arc<dyn SubscriptionStore> = Arc::new(Repository::new(&config.db_path).await?);

    let http = bili::build_http_client(&config.bilibili)?;
    let signer = Arc::new(WbiSigner::new(
        http.clone(),
        config.bilibili.wbi_keys_refresh_hours,
    ));
    let client = Arc::new(BiliClient::new(http, signer));

    let notifier: Arc<dyn Notifier> = match &config.push.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => {
            tracing::warn!("push.webhook_url not set, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let resolver: Arc<dyn Resolver> = Arc::new(NullResolver);

    let pusher = Pusher::new(
        notifier,
        resolver,
        Arc::clone(&repository),
        config.push.message_template.clone(),
    );

    let mut poller = Poller::new(client, repository, pusher, &config.polling);

    // Single headless cycle and exit
    if run_once {
        let stats = poller.run_once().await?;
        println!(
            "Cycle complete: {} pushed, {} healed, {} skipped",
            stats.pushed, stats.healed, stats.skipped
        );
        return Ok(());
    }

    poller.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    poller.stop().await;

    Ok(())
}
