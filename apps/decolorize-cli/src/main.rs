mod routes;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use decolorize_colors::{
    AppConfig, Color, ColorPatch, Colors, HistoryKind, ImportRequest, NewColor, SortBy,
    SortDirection, SortPatch, create_store,
};
use decolorize_common::ColorId;
use decolorize_persist::{FileStorage, PersistenceBridge};
use decolorize_store::Store;
use decolorize_upload::{FileObjectStorage, StorageUploader, UploadConfig, UploadFile, UploadOptions};

#[derive(Parser)]
#[command(name = "decolorize", about = "Manage the De-Colorize color collection")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the persisted store and uploaded objects
    #[arg(long, default_value = ".decolorize")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a color
    Add {
        name: String,
        /// Color code, e.g. "#ff7f50"
        value: String,
    },
    /// Remove a color by id
    Remove { id: u64 },
    /// Select a color by id; without an id the selection is cleared
    Select { id: Option<u64> },
    /// Change the name or value of a color
    Update {
        id: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        value: Option<String>,
    },
    /// Remove every color
    Clear,
    /// List colors through the current filter
    List {
        /// Set the search term (empty string clears it)
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long, value_enum)]
        sort_by: Option<SortField>,
        #[arg(long, value_enum)]
        direction: Option<Direction>,
    },
    /// Show the color history
    History,
    /// Toggle dark mode, or set it explicitly
    DarkMode {
        #[arg(value_enum)]
        state: Option<Switch>,
    },
    /// Print app settings and store statistics
    Info,
    /// Resolve a route path to its page title
    Route { path: String },
    /// Upload an image and add a color pointing at it
    Import {
        file: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: String,
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SortField {
    Name,
    Date,
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let with_uploader = matches!(cli.command, Commands::Import { .. });
    let store = open_store(&cli.data_dir, with_uploader)?;
    let colors = Colors::new(&store);

    match cli.command {
        Commands::Add { name, value } => {
            let color = colors.add(NewColor::new(name, value))?;
            println!("added {}", describe(&color));
        }
        Commands::Remove { id } => {
            let id = ColorId(id);
            if colors.by_id(id).is_none() {
                bail!("no color with id {id}");
            }
            colors.remove(id)?;
            println!("removed {id}");
        }
        Commands::Select { id } => {
            colors.select(id.map(ColorId))?;
            match colors.selected() {
                Some(color) => println!("selected {}", describe(&color)),
                None => println!("selection cleared"),
            }
        }
        Commands::Update { id, name, value } => {
            let patch = ColorPatch {
                name,
                value,
                image_url: None,
            };
            if patch.is_empty() {
                bail!("nothing to update; pass --name and/or --value");
            }
            match colors.update(ColorId(id), patch)? {
                Some(color) => println!("updated {}", describe(&color)),
                None => bail!("no color with id {id}"),
            }
        }
        Commands::Clear => {
            let count = colors.count();
            colors.clear()?;
            println!("cleared {count} colors");
        }
        Commands::List {
            search,
            sort_by,
            direction,
        } => {
            if let Some(term) = search {
                colors.set_search_term(&term)?;
            }
            if sort_by.is_some() || direction.is_some() {
                colors.set_sort_options(SortPatch {
                    sort_by: sort_by.map(|field| match field {
                        SortField::Name => SortBy::Name,
                        SortField::Date => SortBy::Date,
                    }),
                    sort_direction: direction.map(|dir| match dir {
                        Direction::Asc => SortDirection::Asc,
                        Direction::Desc => SortDirection::Desc,
                    }),
                })?;
            }
            list(&colors);
        }
        Commands::History => {
            let history = colors.history();
            if history.is_empty() {
                println!("no history");
            }
            for entry in history {
                let kind = match entry.kind {
                    HistoryKind::Add => "add",
                    HistoryKind::Remove => "remove",
                    HistoryKind::Update => "update",
                    HistoryKind::Clear => "clear",
                };
                let subject = match (&entry.previous, &entry.color) {
                    (Some(before), Some(after)) => {
                        format!("{} -> {}", describe(before), describe(after))
                    }
                    (_, Some(color)) => describe(color),
                    _ => String::new(),
                };
                println!("{}  {kind:<6}  {subject}", entry.timestamp.to_rfc3339());
            }
        }
        Commands::DarkMode { state } => {
            match state {
                Some(Switch::On) => store.commit("setDarkMode", Value::Bool(true)),
                Some(Switch::Off) => store.commit("setDarkMode", Value::Bool(false)),
                None => {
                    store.dispatch("toggleDarkMode", Value::Null).await?;
                }
            }
            let enabled = store.getter("isDarkMode").and_then(|v| v.as_bool());
            println!("dark mode {}", if enabled == Some(true) { "on" } else { "off" });
        }
        Commands::Info => {
            println!("decolorize v{}", env!("CARGO_PKG_VERSION"));
            for name in ["appName", "version", "isDarkMode"] {
                let value = store.getter(name).unwrap_or_default();
                println!("{name}: {value}");
            }
            println!("colors: {}", colors.count());
            println!("history entries: {}", colors.history().len());
            println!("data dir: {}", cli.data_dir.display());
        }
        Commands::Route { path } => {
            let resolved = routes::resolve(&path);
            if resolved.redirected {
                println!("{path} -> {} (redirect)", resolved.route.path);
            }
            println!("{}", resolved.title());
        }
        Commands::Import {
            file,
            name,
            value,
            bucket,
            prefix,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let request = ImportRequest {
                name,
                value,
                file: UploadFile {
                    name: file_name(&file),
                    content_type: content_type_for(&file).map(str::to_string),
                    bytes,
                },
                options: UploadOptions {
                    bucket,
                    path_prefix: prefix,
                },
            };
            let uploaded = colors.import(request).await?;
            println!("uploaded {}", uploaded.path);
            if let Some(url) = uploaded.public_url {
                println!("public url: {url}");
            }
        }
    }

    Ok(())
}

fn open_store(data_dir: &Path, with_uploader: bool) -> anyhow::Result<Store> {
    debug!(data_dir = %data_dir.display(), with_uploader, "opening store");
    let storage = FileStorage::open(data_dir)
        .with_context(|| format!("failed to open data dir {}", data_dir.display()))?;
    let mut config = AppConfig::default().with_persistence(PersistenceBridge::new(storage));
    if with_uploader {
        let objects = FileObjectStorage::open(data_dir.join("objects"))
            .context("failed to open object directory")?;
        let uploader = StorageUploader::new(UploadConfig::from_env(), objects);
        config = config.with_uploader(Arc::new(uploader));
    }
    Ok(create_store(config))
}

fn list(colors: &Colors) {
    let filtered = colors.filtered();
    let selected = colors.selected().map(|color| color.id);
    let options = colors.sort_options();
    let term = colors.search_term();
    println!(
        "{} of {} colors (search {:?}, sort {:?} {:?})",
        filtered.len(),
        colors.count(),
        term,
        options.sort_by,
        options.sort_direction
    );
    for color in filtered {
        let marker = if Some(color.id) == selected { "*" } else { " " };
        println!(
            "{marker} {}  {}",
            describe(&color),
            color.created_at.to_rfc3339()
        );
    }
}

fn describe(color: &Color) -> String {
    let mut text = format!("{} {} {}", color.id, color.name, color.value);
    if let Some(url) = &color.image_url {
        text.push_str(&format!(" [{url}]"));
    }
    text
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => return None,
    })
}
