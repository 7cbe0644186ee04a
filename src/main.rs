use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stormwatch::activity::{ActivityFeedQuery, ActivityItem};
use stormwatch::api::{ActivityApi, Client};
use stormwatch::config::{resolve_poll_interval, Config};
use stormwatch::lister::Lister;
use stormwatch::meta::relation;
use stormwatch::subscribe::{SubscribeError, SubscriberConfig, SubscriberRegistry};

/// Get the config file path (~/.config/stormwatch/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("stormwatch")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(name = "stormwatch", about = "Watch StormForge Optimize activity from the terminal")]
struct Args {
    /// Path to the config file (default: ~/.config/stormwatch/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// API endpoint (overrides the config file)
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to the activity feed and print items as they arrive
    Watch {
        /// Poll interval as a duration string, e.g. "30s" or "2m"
        #[arg(long, value_name = "DURATION")]
        interval: Option<String>,

        /// Jitter factor in [0, 1]; each wait adds up to interval*jitter
        #[arg(long)]
        jitter: Option<f64>,

        /// Show failed activities as well
        #[arg(long)]
        show_failed: bool,

        /// Restrict the feed to these type tags (repeatable)
        #[arg(long = "type", value_name = "TAG")]
        types: Vec<String>,
    },
    /// Walk a paginated collection and print one line per item
    List {
        #[command(subcommand)]
        kind: ListKind,
    },
    /// Look up an application by name, falling back to its display title
    Get {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum ListKind {
    Applications,
    Scenarios { application: String },
    Clusters,
    Experiments,
    Trials { experiment: String },
    Recommendations { application: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(p) => p.clone(),
        None => default_config_path()?,
    };
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let server = args.server.as_deref().unwrap_or(&config.server_url);
    let token = std::env::var("STORMFORGE_TOKEN")
        .ok()
        .or_else(|| config.access_token.clone())
        .map(SecretString::from);
    let client = Client::new(server, token)
        .with_context(|| format!("Invalid server URL: {server}"))?;

    // Cancel on Ctrl-C; in-flight work finishes before the loop observes it
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::debug!("Interrupt received, cancelling");
            cancel.cancel();
        });
    }

    match args.command {
        Command::Watch {
            interval,
            jitter,
            show_failed,
            types,
        } => {
            let mut query = ActivityFeedQuery::new();
            for tag in types {
                query = query.with_type(tag);
            }
            let subscriber_config = SubscriberConfig {
                poll_interval: resolve_poll_interval(interval.as_deref(), &config),
                jitter: jitter.unwrap_or(config.jitter),
                report_failed: show_failed || config.show_failed,
                query,
            };
            watch(client, cancel, subscriber_config).await
        }
        Command::List { kind } => list(client, cancel, kind).await,
        Command::Get { name } => {
            let lister = Lister::new(client);
            let app = lister
                .get_application_by_name_or_title(&cancel, &name)
                .await
                .with_context(|| format!("Failed to look up application '{name}'"))?;
            println!("{}\t{}", app.name, app.display_name());
            Ok(())
        }
    }
}

async fn watch(client: Client, cancel: CancellationToken, config: SubscriberConfig) -> Result<()> {
    // Discover the feed from the endpoint's advertised relation link
    let endpoint_meta = client
        .check_endpoint()
        .await
        .context("Failed to probe the API endpoint")?;
    let feed_url = endpoint_meta
        .link(relation::ALTERNATE)
        .context("Endpoint did not advertise an activity feed")?;

    let feed = client
        .list_activity(&feed_url, &config.query)
        .await
        .context("Failed to fetch the activity feed")?;

    let registry = SubscriberRegistry::new(client);
    let subscriber = registry.subscriber(&feed, config);

    let (tx, mut rx) = mpsc::channel::<ActivityItem>(32);
    let handle = tokio::spawn(subscriber.subscribe(cancel, tx));

    while let Some(item) = rx.recv().await {
        print_item(&item);
    }

    match handle.await? {
        Ok(()) | Err(SubscribeError::Cancelled) => Ok(()),
        Err(e) => Err(e).context("Subscription failed"),
    }
}

fn print_item(item: &ActivityItem) {
    let tags = item.tags.join(",");
    let when = item
        .date_published
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    match item.failure_reason() {
        Some(reason) => println!("{}\t{}\t{}\tFAILED({})", when, tags, item.title, reason),
        None => println!("{}\t{}\t{}\t{}", when, tags, item.title, item.url),
    }
}

async fn list(client: Client, cancel: CancellationToken, kind: ListKind) -> Result<()> {
    let lister = Lister::new(client);
    match kind {
        ListKind::Applications => {
            lister
                .for_each_application::<anyhow::Error, _>(&cancel, |app| {
                    println!("{}\t{}", app.name, app.display_name());
                    Ok(())
                })
                .await
        }
        ListKind::Scenarios { application } => {
            lister
                .for_each_scenario::<anyhow::Error, _>(&cancel, &application, |s| {
                    println!("{}\t{}", s.name, s.title);
                    Ok(())
                })
                .await
        }
        ListKind::Clusters => {
            lister
                .for_each_cluster::<anyhow::Error, _>(&cancel, |c| {
                    println!("{}\t{}", c.name, c.title);
                    Ok(())
                })
                .await
        }
        ListKind::Experiments => {
            lister
                .for_each_experiment::<anyhow::Error, _>(&cancel, |e| {
                    println!("{}\t{}", e.name, e.display_name);
                    Ok(())
                })
                .await
        }
        ListKind::Trials { experiment } => {
            lister
                .for_each_trial::<anyhow::Error, _>(&cancel, &experiment, |t| {
                    println!("{}\t{}", t.number, t.status);
                    Ok(())
                })
                .await
        }
        ListKind::Recommendations { application } => {
            lister
                .for_each_recommendation::<anyhow::Error, _>(&cancel, &application, |r| {
                    println!("{}", r.name);
                    Ok(())
                })
                .await
        }
    }
}
