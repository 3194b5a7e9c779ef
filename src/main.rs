//! Tile Animator - fetch and animate time-sequenced map tiles.
//!
//! This binary loads every frame of a region and plays it back, or lists the
//! tiles and frame URLs a region needs.

use clap::Parser;
use std::process::ExitCode;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_animator::{
    config::{Cli, Command, PlayConfig, SourceArgs, TilesConfig},
    coord::tiles_covering,
    AnimationOverlay, FrameManifest, OverlayEvent, UrlTemplate,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Play(config) => run_play(config).await,
        Command::Tiles(config) => run_tiles(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_animator=debug"
    } else {
        "tile_animator=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolve the per-frame templates from the command line or a manifest.
async fn resolve_templates(source: &SourceArgs) -> Result<Vec<UrlTemplate>, String> {
    match source.manifest.as_deref() {
        Some(location) => {
            let manifest = FrameManifest::load(location, &source.session())
                .await
                .map_err(|e| e.to_string())?;
            let templates = manifest.template_urls(source.frame_stride);
            info!(
                manifest = location,
                timestamps = manifest.timestamps.len(),
                frames = templates.len(),
                ingest = manifest.ingest.as_deref().unwrap_or("-"),
                "Loaded frame manifest"
            );
            Ok(templates)
        }
        None => source.parse_templates(),
    }
}

// =============================================================================
// Play Command
// =============================================================================

async fn run_play(config: PlayConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.source.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let templates = match resolve_templates(&config.source).await {
        Ok(templates) => templates,
        Err(e) => {
            error!("Failed to resolve frames: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let overlay_config = config.source.overlay_config(templates);
    let frame_duration = overlay_config.frame_duration;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut overlay = match AnimationOverlay::new(overlay_config) {
        Ok(overlay) => overlay.with_delegate(events_tx),
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let frame_count = overlay.frame_count();
    let rect = config.region.map_rect();
    let zoom = config.region.zoom;

    info!("Configuration:");
    info!(
        "  Region: center ({}, {}), span {}° x {}°",
        config.region.center.lat,
        config.region.center.lng,
        config.region.lat_span,
        config.region.lng_span
    );
    info!("  Zoom: {}", zoom);
    info!("  Frames: {} at {:?} each", frame_count, frame_duration);
    info!("  Concurrency: {}", config.source.concurrency);

    // Load
    let (done_tx, done_rx) = oneshot::channel();
    let started = Instant::now();
    let fetch = overlay.fetch_tiles_for_map_rect(
        rect,
        zoom,
        move |frame| info!("  Frame {}/{} ready", frame + 1, frame_count),
        move |outcome| {
            let _ = done_tx.send(outcome);
        },
    );
    if let Err(e) = fetch {
        error!("Cannot fetch region: {}", e);
        return ExitCode::FAILURE;
    }
    info!("Loading {} tile(s)...", overlay.visible_tiles().len());

    overlay.wait_for_load().await;
    let outcome = match done_rx.await {
        Ok(outcome) => outcome,
        Err(_) => {
            error!("Load finished without reporting an outcome");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Loaded {}/{} frame(s) in {:.2?}",
        outcome.loaded_frames,
        frame_count,
        started.elapsed()
    );
    if !outcome.failures.is_empty() {
        warn!("{} frame fetch(es) failed", outcome.failures.len());
    }

    // Animate
    if let Err(e) = overlay.start_animating() {
        error!("Cannot animate: {}", e);
        return ExitCode::FAILURE;
    }
    let Some(run_for) = config.play_duration(frame_duration, frame_count) else {
        error!(
            "Cannot play {} loop(s) of {} frame(s) at {:?}: duration overflows",
            config.loops, frame_count, frame_duration
        );
        return ExitCode::FAILURE;
    };
    overlay.run_until(Instant::now() + run_for).await;
    overlay.stop_animating();

    let mut frames_shown = 0usize;
    let mut errors = 0usize;
    while let Ok(event) = events_rx.try_recv() {
        match event {
            OverlayEvent::FrameAnimated(_) => frames_shown += 1,
            OverlayEvent::FetchFailed(_) => errors += 1,
            OverlayEvent::StateChanged { .. } => {}
        }
    }

    println!();
    println!("Tile Animator Summary");
    println!("═════════════════════");
    println!("  Tiles:          {}", overlay.visible_tiles().len());
    println!("  Frames loaded:  {}/{}", outcome.loaded_frames, frame_count);
    println!("  Fetch errors:   {}", errors);
    println!("  Frames shown:   {}", frames_shown);
    println!("  Load complete:  {}", if outcome.success { "✓" } else { "✗" });

    if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// =============================================================================
// Tiles Command
// =============================================================================

async fn run_tiles(config: TilesConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.source.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let templates = match resolve_templates(&config.source).await {
        Ok(templates) => templates,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Same limits the overlay enforces, checked before anything is allocated
    let overlay_config = config.source.overlay_config(templates);
    let rect = config.region.map_rect();
    let checked = overlay_config
        .validate()
        .and_then(|()| overlay_config.check_region(&rect, config.region.zoom));
    if let Err(e) = checked {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }
    let templates = overlay_config.template_urls;

    let tiles = tiles_covering(&rect, config.region.zoom);
    for coordinate in &tiles {
        println!("{}", coordinate);
        for (index, template) in templates.iter().enumerate() {
            println!("  [{}] {}", index, template.expand(*coordinate));
        }
    }

    println!();
    println!(
        "Total: {} tile(s) x {} frame(s) = {} fetch(es)",
        tiles.len(),
        templates.len(),
        tiles.len() * templates.len()
    );

    ExitCode::SUCCESS
}
