use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wildfeed_core::{
    query, Area, Config, DateRange, FeedEngine, FeedView, Filters, GeoPoint, Grade, LoadOutcome,
    MediaConstraint, Source, StatsSnapshot, TaxonSelection, ViewMode,
};

#[derive(Parser)]
#[command(name = "wildfeed")]
#[command(version, about = "Merged wildlife observation feed", long_about = None)]
struct Cli {
    /// Override the API base URL from the config file
    #[arg(long, global = true, env = "WILDFEED_BASE_URL")]
    base_url: Option<String>,

    /// Keep client state in memory instead of the on-disk store
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Load the merged observation feed
    Feed(FeedArgs),
    /// Refresh and print aggregate stats for the saved filters
    Stats,
    /// Switch view mode and print the stats it shows
    View {
        /// grid, list or map
        mode: ViewMode,
    },
    /// Show the effective configuration
    Config {
        /// Write the defaults to the config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(clap::Args)]
struct FeedArgs {
    /// Free-text search
    #[arg(long)]
    search: Option<String>,

    /// Taxon name picked from autocomplete
    #[arg(long)]
    taxon: Option<String>,

    #[arg(long, requires = "taxon")]
    taxon_id: Option<u64>,

    /// Polygon as "lon,lat|lon,lat|..."
    #[arg(long, conflicts_with = "near")]
    polygon: Option<String>,

    /// Circle center as "lat,lon"
    #[arg(long, value_parser = parse_point)]
    near: Option<GeoPoint>,

    #[arg(long, default_value_t = 10.0, requires = "near")]
    radius_km: f64,

    /// Place name passed through to the endpoints
    #[arg(long)]
    location: Option<String>,

    /// Start date, YYYY-MM-DD
    #[arg(long)]
    from: Option<String>,

    /// End date, YYYY-MM-DD
    #[arg(long)]
    to: Option<String>,

    /// Quality grade (repeatable)
    #[arg(long = "grade")]
    grades: Vec<Grade>,

    #[arg(long, value_enum, default_value_t = MediaArg::Any)]
    media: MediaArg,

    /// Only these collections (repeatable); all by default
    #[arg(long = "source")]
    sources: Vec<Source>,

    /// Pages to load before stopping
    #[arg(long, default_value_t = 1)]
    pages: u32,

    /// Print records as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum MediaArg {
    Any,
    WithMedia,
    Photo,
    Audio,
}

impl From<MediaArg> for MediaConstraint {
    fn from(arg: MediaArg) -> Self {
        match arg {
            MediaArg::Any => MediaConstraint::Any,
            MediaArg::WithMedia => MediaConstraint::WithMedia,
            MediaArg::Photo => MediaConstraint::Photo,
            MediaArg::Audio => MediaConstraint::Audio,
        }
    }
}

fn parse_point(raw: &str) -> Result<GeoPoint, String> {
    let (lat, lon) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected lat,lon but got '{}'", raw))?;
    let point = GeoPoint::new(
        lat.trim().parse().map_err(|e| format!("bad latitude: {}", e))?,
        lon.trim().parse().map_err(|e| format!("bad longitude: {}", e))?,
    );
    if !point.is_valid() {
        return Err(format!("'{}' is not on this planet", raw));
    }
    Ok(point)
}

impl FeedArgs {
    fn filters(&self) -> anyhow::Result<Filters> {
        let area = match (&self.polygon, self.near) {
            (Some(raw), _) => Some(Area::Polygon(
                query::parse_polygon(raw).context("Polygon must be lon,lat pairs separated by |")?,
            )),
            (None, Some(center)) => Some(Area::Circle {
                center,
                radius_m: self.radius_km * 1000.0,
            }),
            (None, None) => None,
        };

        Ok(Filters {
            search: self.search.clone(),
            taxon: self.taxon.clone().map(|name| TaxonSelection {
                name,
                id: self.taxon_id,
            }),
            area,
            location_name: self.location.clone(),
            date_range: DateRange {
                start: self.from.clone(),
                end: self.to.clone(),
            },
            grades: self.grades.iter().copied().collect(),
            media: self.media.into(),
            sources: self.sources.iter().copied().collect(),
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - helps when things go sideways
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wildfeed=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load config")?;
    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
    }
    if cli.ephemeral {
        config.cache.ephemeral = true;
    }

    match cli.command {
        Some(Commands::Feed(args)) => run_feed(&config, args).await?,
        Some(Commands::Stats) => {
            let engine = FeedEngine::from_config(&config)?;
            let stats = engine
                .refresh_stats()
                .await
                .context("Stats are unavailable right now")?;
            print_stats(&stats);
        }
        Some(Commands::View { mode }) => {
            let engine = FeedEngine::from_config(&config)?;
            let stats = engine.switch_view(mode);
            println!("View: {}", mode.as_str());
            print_stats(&stats);
        }
        Some(Commands::Config { init }) => {
            if init {
                let path = config.save()?;
                println!("Wrote {}", path.display());
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
        None => {
            println!("No command specified. Try --help");
        }
    }

    Ok(())
}

async fn run_feed(config: &Config, args: FeedArgs) -> anyhow::Result<()> {
    let filters = args.filters()?;
    let engine = FeedEngine::from_config(config)?;

    tracing::info!("Loading feed from {} source(s)", filters.active_sources().len());
    engine.apply_filters(filters).await?;

    let mut printed = print_new(&engine.feed(), 0, args.json)?;

    for _ in 1..args.pages.max(1) {
        match engine.load_more().await? {
            LoadOutcome::Loaded { .. } => {
                printed = print_new(&engine.feed(), printed, args.json)?;
            }
            LoadOutcome::Skipped | LoadOutcome::Superseded => break,
        }
    }

    let feed = engine.feed();
    if !args.json {
        println!();
        println!(
            "{} of ~{} observations, {} page(s){}",
            feed.items.len(),
            feed.total,
            feed.page,
            if feed.has_more { ", more available" } else { "" }
        );
        print_stats(&engine.stats());
    }

    engine.shutdown();
    Ok(())
}

/// Print the records past `already`; returns the new count
fn print_new(feed: &FeedView, already: usize, json: bool) -> anyhow::Result<usize> {
    for (i, record) in feed.items.iter().enumerate().skip(already) {
        if json {
            println!("{}", serde_json::to_string(record)?);
            continue;
        }
        let date = record
            .observation_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "----------".into());
        let grade = record.quality.grade.map_or("-", |g| g.as_str());
        println!(
            "{:>4}  {:<9} {}  {:<12} {}",
            i + 1,
            record.source,
            date,
            grade,
            record.title
        );
    }
    Ok(feed.items.len())
}

fn print_stats(stats: &StatsSnapshot) {
    if stats.is_empty() {
        println!("Stats: not loaded yet");
        return;
    }
    let per_source: Vec<String> = stats
        .counts_by_source
        .iter()
        .map(|(source, count)| format!("{} {}", source, count))
        .collect();
    println!(
        "Stats: {} observations ({}), {} species, {} contributors",
        stats.total_observations,
        per_source.join(", "),
        stats.total_species,
        stats.total_contributors
    );
}
