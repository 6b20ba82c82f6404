use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use closet_contracts::events::{ActivityLog, ClosetEvent};
use closet_contracts::wardrobe::WardrobeStore;
use closet_engine::stylist::shopping_for_analysis;
use closet_engine::{ClientConfig, ClientError, GeminiClient, Stylist, StylistError};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: i32 = 1;
const EXIT_CONFIGURATION: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "closet-rs", version, about = "Wardrobe assistant backed by Gemini")]
struct Cli {
    /// SQLite wardrobe database.
    #[arg(long, global = true, default_value = "closet.sqlite3")]
    db: PathBuf,
    /// Append activity events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify a garment photo and add it to the wardrobe.
    Analyze(AnalyzeArgs),
    /// Add an item from an existing analysis without calling the model.
    Add(AddArgs),
    List(UserArgs),
    Favorite(ItemArgs),
    Delete(ItemArgs),
    Clear(UserArgs),
    Stats(UserArgs),
    /// Generate a style profile (needs three items).
    Profile(UserArgs),
    /// Suggest wardrobe pieces that go with an item (needs two items).
    Match(ItemArgs),
    /// Partner store search links for an item or a raw analysis.
    Shop(ShopArgs),
}

#[derive(Debug, Parser)]
struct UserArgs {
    #[arg(long)]
    user: String,
}

#[derive(Debug, Parser)]
struct ItemArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    item: i64,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    image: PathBuf,
}

#[derive(Debug, Parser)]
struct AddArgs {
    #[arg(long)]
    user: String,
    /// Analysis JSON object, e.g. '{"type":"coat","colors":["camel"]}'.
    #[arg(long)]
    analysis: String,
    /// Image metadata JSON object stored alongside the analysis.
    #[arg(long)]
    image_info: Option<String>,
}

#[derive(Debug, Parser)]
#[command(group(ArgGroup::new("source").required(true).args(["item", "analysis"])))]
struct ShopArgs {
    #[arg(long, requires = "user")]
    item: Option<i64>,
    #[arg(long)]
    user: Option<String>,
    /// Analysis JSON object, e.g. '{"type":"shirt","colors":["blue"]}'.
    #[arg(long)]
    analysis: Option<String>,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Analyze(_) => "analyze",
            Self::Add(_) => "add",
            Self::List(_) => "list",
            Self::Favorite(_) => "favorite",
            Self::Delete(_) => "delete",
            Self::Clear(_) => "clear",
            Self::Stats(_) => "stats",
            Self::Profile(_) => "profile",
            Self::Match(_) => "match",
            Self::Shop(_) => "shop",
        }
    }

    fn needs_model(&self) -> bool {
        matches!(self, Self::Analyze(_) | Self::Profile(_) | Self::Match(_))
    }
}

fn main() {
    dotenv::dotenv().ok();
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("closet-rs error: {err:#}");
            std::process::exit(exit_code(&err));
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CLOSET_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    if let Command::Shop(ShopArgs {
        analysis: Some(raw),
        ..
    }) = &cli.command
    {
        let analysis = json_object(raw, "--analysis")?;
        print_json(&shopping_for_analysis(&analysis))?;
        return Ok(0);
    }

    let stylist = open_stylist(&cli)?;
    let output = match cli.command {
        Command::Analyze(args) => stylist.analyze_path(&args.user, &args.image)?,
        Command::Add(args) => {
            let analysis = json_object(&args.analysis, "--analysis")?;
            let image_info = match &args.image_info {
                Some(raw) => json_object(raw, "--image-info")?,
                None => Map::new(),
            };
            json!(stylist.add_item(&args.user, image_info, analysis)?)
        }
        Command::List(args) => json!(stylist.list_items(&args.user)?),
        Command::Favorite(args) => json!(stylist.toggle_favorite(&args.user, args.item)?),
        Command::Delete(args) => {
            stylist.delete_item(&args.user, args.item)?;
            json!({"deleted": args.item})
        }
        Command::Clear(args) => json!({"removed": stylist.clear_wardrobe(&args.user)?}),
        Command::Stats(args) => json!(stylist.statistics(&args.user)?),
        Command::Profile(args) => stylist.generate_style_profile(&args.user)?,
        Command::Match(args) => stylist.recommend_matches(&args.user, args.item)?,
        Command::Shop(args) => {
            let user = args.user.context("--user is required with --item")?;
            let item = args.item.context("--item or --analysis is required")?;
            stylist.shopping_for_item(&user, item)?
        }
    };
    print_json(&output)?;
    Ok(0)
}

fn open_stylist(cli: &Cli) -> Result<Stylist> {
    let mut config = ClientConfig::from_env();
    if !cli.command.needs_model() {
        // Store-only commands never reach the provider.
        config = config.with_test_mode(true);
    }
    tracing::debug!(?config, db = %cli.db.display(), "opening wardrobe");
    let client = GeminiClient::from_config(config)?;
    let store = WardrobeStore::open(&cli.db)?;
    let mut stylist = Stylist::new(client, store);

    if let Some(path) = &cli.events {
        let session_id = uuid::Uuid::new_v4().to_string();
        let activity = ActivityLog::new(path, session_id);
        activity.record(ClosetEvent::RunStarted {
            command: cli.command.name().to_string(),
            db: cli.db.display().to_string(),
        })?;
        stylist = stylist.with_activity(activity);
    }
    Ok(stylist)
}

fn json_object(raw: &str, flag: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{flag} must be a JSON object"),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    let client_error = err.downcast_ref::<ClientError>().or_else(|| {
        match err.downcast_ref::<StylistError>() {
            Some(StylistError::Client(inner)) => Some(inner),
            _ => None,
        }
    });
    match client_error {
        Some(ClientError::Configuration(_)) => EXIT_CONFIGURATION,
        _ => EXIT_FAILURE,
    }
}
