//! ic10-session - inspect and build IC10 emulator share links, and manage
//! local saves from the command line.

use clap::Parser;
use clap::Subcommand;
use color_eyre::Result;
use color_eyre::eyre::bail;
use ic10_persistence::AnySnapshot;
use ic10_persistence::Codec;
use ic10_persistence::CompressionLevel;
use ic10_persistence::LocalStore;
use ic10_persistence::MemoryLocation;
use ic10_persistence::MemoryVm;
use ic10_persistence::SavedSessionRecord;
use ic10_persistence::SessionController;
use ic10_persistence::SessionControllerConfig;
use ic10_persistence::WireEnvelope;
use ic10_persistence::decode_token;
use ic10_persistence::ejson;
use ic10_persistence::encode_token;
use ic10_persistence::fragment::fragment_of;
use ic10_persistence::fragment::without_fragment;
use ic10_persistence::session_store::default_store_path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

const DEFAULT_BASE_URL: &str = "https://ic10emu.dev/";

/// Inspect and build IC10 emulator share links
#[derive(Parser, Debug)]
#[command(name = "ic10-session")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the payload of a share link or token as tagged JSON
    Decode {
        /// A full share link, or just the token after `#`
        input: String,
    },

    /// Build a share link from a file
    Encode {
        /// Tagged JSON envelope, or program text with --raw
        file: PathBuf,

        /// Treat the file as bare program text
        #[arg(long)]
        raw: bool,

        #[arg(long, default_value_t = Codec::Gzip)]
        codec: Codec,

        #[arg(long, env = "IC10_BASE_URL", default_value = DEFAULT_BASE_URL)]
        base_url: String,
    },

    /// Load a share link into a headless VM and list its programs
    Programs {
        url: String,
    },

    /// Convert a V1 snapshot file to the current layout
    Migrate {
        file: PathBuf,

        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage local saves
    Saves {
        /// Store directory (defaults to the platform data directory)
        #[arg(long, env = "IC10_STORE")]
        store: Option<PathBuf>,

        #[command(subcommand)]
        action: SavesAction,
    },
}

#[derive(Subcommand, Debug)]
enum SavesAction {
    /// List saves, most recent first
    List,
    /// Print one save as tagged JSON
    Show { name: String },
    Delete { name: String },
    /// Saves whose name contains QUERY, ignoring case
    Search { query: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Decode { input } => decode(&input),
        Command::Encode {
            file,
            raw,
            codec,
            base_url,
        } => encode(file, raw, codec, &base_url).await,
        Command::Programs { url } => programs(&url).await,
        Command::Migrate { file, output } => migrate(file, output).await,
        Command::Saves { store, action } => {
            saves(store.unwrap_or_else(default_store_path), action).await
        }
    }
}

/// Accepts a full link or a bare token.
fn token_of(input: &str) -> &str {
    if input.contains('#') {
        fragment_of(input)
    } else {
        input
    }
}

fn decode(input: &str) -> Result<()> {
    let envelope = decode_token(token_of(input))?;
    let kind = match &envelope {
        WireEnvelope::RawSource(_) => "raw source",
        WireEnvelope::LegacyPrograms { .. } => "legacy programs",
        WireEnvelope::Current { .. } => "current",
    };
    info!("Decoded {} envelope", kind);
    println!("{}", ejson::encode_pretty(&envelope.to_value()?)?);
    Ok(())
}

async fn encode(file: PathBuf, raw: bool, codec: Codec, base_url: &str) -> Result<()> {
    let text = tokio::fs::read_to_string(&file).await?;
    let envelope = if raw {
        WireEnvelope::RawSource(text)
    } else {
        WireEnvelope::from_text(&text)?
    };
    let token = encode_token(&envelope, codec, CompressionLevel::Maximum)?;
    println!("{}#{}", without_fragment(base_url), token);
    Ok(())
}

async fn programs(url: &str) -> Result<()> {
    let config = SessionControllerConfig {
        enable_local_store: false,
        ..SessionControllerConfig::default()
    };
    let controller = SessionController::new(
        config,
        Arc::new(MemoryVm::new()),
        Arc::new(MemoryLocation::new(url)),
    )
    .await;
    if !controller.load_from_fragment().await? {
        bail!("link has no fragment to load");
    }
    let Some(state) = controller.state().await else {
        bail!("nothing was loaded");
    };
    for (id, source) in &state.program_sources {
        let marker = if *id == state.active_object_id { "*" } else { " " };
        println!("{marker} [{id}]");
        for line in source.lines() {
            println!("    {line}");
        }
    }
    controller.shutdown().await?;
    Ok(())
}

async fn migrate(file: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let text = tokio::fs::read_to_string(&file).await?;
    let snapshot = AnySnapshot::from_value(ejson::decode(&text)?)?;
    info!("Read {} snapshot from {}", snapshot.schema_version(), file.display());
    let current = snapshot.into_current()?;
    let rendered = ejson::encode_pretty(&ejson::to_value(&current)?)?;
    match output {
        Some(path) => tokio::fs::write(path, rendered).await?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn print_summary(record: &SavedSessionRecord) {
    println!(
        "{}  {}  schema {}  active IC {}",
        record.date.format("%Y-%m-%d %H:%M:%S"),
        record.name,
        record.schema_version,
        record.session.active_ic
    );
}

async fn saves(store_path: PathBuf, action: SavesAction) -> Result<()> {
    let store = LocalStore::open(store_path, CompressionLevel::Balanced).await?;
    match action {
        SavesAction::List => {
            for record in store.list_all().await {
                print_summary(&record);
            }
        }
        SavesAction::Show { name } => {
            let Some(record) = store.get(&name).await else {
                bail!("no save named {name:?}");
            };
            println!("{}", ejson::encode_pretty(&record.to_value()?)?);
        }
        SavesAction::Delete { name } => {
            if !store.delete(&name).await? {
                bail!("no save named {name:?}");
            }
            println!("Deleted {name}");
        }
        SavesAction::Search { query } => {
            for record in store.search(&query).await {
                print_summary(&record);
            }
        }
    }
    Ok(())
}
