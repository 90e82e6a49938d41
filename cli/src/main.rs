use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use boardsync::cross_device::PgStore;
use boardsync::facade::{BuildError, SyncFacadeBuilder};
use boardsync::local_relay::{FileSnapshotStore, LocalBus};
use boardsync::transport::WsTransport;
use boardsync::{Participant, Point, Stroke, SyncConfig, SyncFacade, SyncStrategy, db, model};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("facade start failed: {0}")]
    Build(#[from] BuildError),
    #[error("database init failed: {0}")]
    Database(String),
    #[error("invalid point `{0}`; expected x,y")]
    InvalidPoint(String),
    #[error("a stroke needs at least one point")]
    NoPoints,
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "boardsync-cli", about = "Join a shared board from the terminal")]
struct Cli {
    #[arg(long, env = "BOARDSYNC_HUB_URL", default_value = "ws://127.0.0.1:3000/api/ws")]
    hub_url: String,

    /// Postgres URL for the cross-device tier.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// primary | hybrid | local | cross-device
    #[arg(long, default_value = "primary")]
    strategy: SyncStrategy,

    #[arg(long)]
    name: Option<String>,

    /// File backing the same-device snapshot.
    #[arg(long, env = "BOARDSYNC_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Time to let channels subscribe before and flush after a write.
    #[arg(long, default_value_t = 750)]
    settle_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every snapshot as a JSON line until Ctrl-C.
    Watch,
    /// Send a chat message.
    Say { text: String },
    /// Draw one stroke.
    Draw(DrawArgs),
    /// Clear every stroke.
    Clear,
}

#[derive(Args, Debug)]
struct DrawArgs {
    /// Space-separated `x,y` pairs.
    #[arg(long)]
    points: String,

    #[arg(long, default_value = "#111827")]
    color: String,

    #[arg(long, default_value_t = 3.0)]
    thickness: f64,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settle = Duration::from_millis(cli.settle_ms);
    let facade = start_facade(&cli).await?;
    tokio::time::sleep(settle).await;

    let result = match &cli.command {
        Command::Watch => watch(&facade).await,
        Command::Say { text } => say(&facade, text).await,
        Command::Draw(args) => draw(&facade, args).await,
        Command::Clear => {
            facade.publish_clear().await;
            Ok(())
        }
    };

    if !matches!(cli.command, Command::Watch) {
        tokio::time::sleep(settle).await;
    }
    facade.shutdown().await;
    result
}

async fn start_facade(cli: &Cli) -> Result<SyncFacade, CliError> {
    let config = SyncConfig::from_env();
    let me = Participant::new(cli.name.clone().unwrap_or_else(model::random_nickname), model::random_color());
    let snapshot = cli.snapshot.clone().unwrap_or_else(|| std::env::temp_dir().join("boardsync-snapshot.json"));

    let mut builder: SyncFacadeBuilder = SyncFacade::builder(config)
        .strategy(cli.strategy)
        .participant(me)
        .local(LocalBus::default(), Arc::new(FileSnapshotStore::new(snapshot)));
    if cli.strategy == SyncStrategy::PrimaryTransport {
        builder = builder.transport(Arc::new(WsTransport::new(cli.hub_url.clone())));
    }
    if let Some(url) = &cli.database_url {
        let pool = db::init_pool(url).await.map_err(|e| CliError::Database(e.to_string()))?;
        builder = builder.durable(Arc::new(PgStore::new(pool)));
    }
    Ok(builder.start().await?)
}

async fn watch(facade: &SyncFacade) -> Result<(), CliError> {
    let _sub = facade.on_snapshot_change(|snapshot| match serde_json::to_string(snapshot) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "snapshot encode failed"),
    });
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn say(facade: &SyncFacade, text: &str) -> Result<(), CliError> {
    let Some(message) = facade.new_message(text).await else {
        return Err(CliError::EmptyMessage);
    };
    eprintln!("sent: {}", message.id);
    Ok(())
}

async fn draw(facade: &SyncFacade, args: &DrawArgs) -> Result<(), CliError> {
    let points = parse_points(&args.points)?;
    let stroke = Stroke::new(points, args.color.clone(), args.thickness);
    let id = stroke.id.clone();
    facade.publish_stroke(stroke).await;
    eprintln!("drew: {id}");
    Ok(())
}

/// Parse `"x,y x,y ..."` into points.
fn parse_points(raw: &str) -> Result<Vec<Point>, CliError> {
    let points = raw
        .split_whitespace()
        .map(|pair| {
            let (x, y) = pair.split_once(',').ok_or_else(|| CliError::InvalidPoint(pair.to_owned()))?;
            match (x.trim().parse::<f64>(), y.trim().parse::<f64>()) {
                (Ok(x), Ok(y)) if x.is_finite() && y.is_finite() => Ok(Point { x, y }),
                _ => Err(CliError::InvalidPoint(pair.to_owned())),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    if points.is_empty() {
        return Err(CliError::NoPoints);
    }
    Ok(points)
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
