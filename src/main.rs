use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use log::{info, warn, LevelFilter};

use coverconsensus::config::{default_config_path, load_config, FetcherConfig};
use coverconsensus::tag_bridge::{embed_front_cover, read_track_query};
use coverconsensus::{CoverArtFetcher, CoverQuery};

/// Find the cover art most providers agree on for one track.
#[derive(Debug, Parser)]
#[command(name = "coverconsensus", version, about)]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the winning image bytes to this file
    #[arg(long)]
    out: Option<PathBuf>,

    /// Embed the winning image as front cover into this audio file
    #[arg(long)]
    embed: Option<PathBuf>,

    /// Read artist and title from this audio file's tags
    #[arg(long, conflicts_with_all = ["artist", "title"])]
    from_tags: Option<PathBuf>,

    /// Overrides `[logging] level`
    #[arg(long)]
    log_level: Option<String>,

    /// Upper bound on candidates across all providers
    #[arg(long)]
    max_candidates: Option<usize>,

    #[arg(required_unless_present = "from_tags")]
    artist: Option<String>,

    title: Option<String>,
}

fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::Info)
}

/// Installs colog at full verbosity; `log::set_max_level` does the actual filtering.
fn init_logging(level: LevelFilter) {
    let mut clog = colog::default_builder();
    clog.filter(None, LevelFilter::Trace);
    clog.init();
    log::set_max_level(level);

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

fn resolve_config(args: &Args) -> FetcherConfig {
    match args.config.clone().or_else(default_config_path) {
        Some(path) => load_config(&path),
        None => FetcherConfig::default(),
    }
}

fn resolve_query(args: &Args) -> Result<CoverQuery, Box<dyn std::error::Error>> {
    if let Some(path) = &args.from_tags {
        let query = read_track_query(path)?;
        info!("Read query from tags of {}", path.display());
        return Ok(query);
    }
    Ok(CoverQuery::new(
        args.artist.as_deref().unwrap_or_default(),
        args.title.as_deref().unwrap_or_default(),
    ))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let cli_level = args.log_level.as_deref().map(parse_level);
    init_logging(cli_level.unwrap_or(LevelFilter::Info));

    let config = resolve_config(&args);
    if cli_level.is_none() {
        log::set_max_level(parse_level(&config.logging.level));
    }

    let query = resolve_query(&args)?;
    let max_candidates = args
        .max_candidates
        .unwrap_or(config.fetch.max_candidates)
        .max(1);

    let fetcher = CoverArtFetcher::new(&config);
    info!(
        "Looking up cover art for {} - {} via {:?}",
        query.artist,
        query.title,
        fetcher.provider_names()
    );

    let Some(winner) = fetcher.fetch_cover_art(&query.artist, &query.title, max_candidates) else {
        println!("No cover art found for {} - {}", query.artist, query.title);
        return Ok(());
    };

    let resolution = winner.resolution();
    println!("source:     {}", winner.provider());
    println!("resolution: {}x{}", resolution.width, resolution.height);
    println!("size:       {} bytes", winner.size_bytes());
    println!(
        "similarity: {:.1}%",
        winner.similarity_score().unwrap_or_default() * 100.0
    );
    println!("url:        {}", winner.source_url());

    if let Some(path) = &args.out {
        std::fs::write(path, winner.image_bytes())?;
        info!("Saved cover art to {}", path.display());
    }
    if let Some(path) = &args.embed {
        if let Err(error) = embed_front_cover(path, winner.image_bytes()) {
            warn!("Could not embed cover art into {}: {}", path.display(), error);
            return Err(error.into());
        }
    }
    Ok(())
}
