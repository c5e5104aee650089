use nodeplay::cli::Args;
use nodeplay::config::{EngineSettings, SETTINGS_FILE};
use nodeplay::core::engine::PlaybackEngine;
use nodeplay::core::engine_events::{EngineStoppedEvent, FpsChangedEvent, FrameDoneEvent};
use nodeplay::entities::{NodeRef, Output, ViewerOutput};
use nodeplay::nodes::{BufferViewer, GradeNode, HeadlessSurface, RampSource, SequenceWriter};
use nodeplay::paths::{self, PathConfig};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    let log_level = args.log_level();

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| paths::data_file("nodeplay.log", path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // respects RUST_LOG if set
        let default_level = log_level.as_str().to_lowercase();
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn load_settings(args: &Args, path_config: &PathConfig) -> EngineSettings {
    let path = paths::config_file(SETTINGS_FILE, path_config);
    let mut settings = EngineSettings::load(&path).unwrap_or_else(|e| {
        warn!("Ignoring settings file: {:#}", e);
        EngineSettings::default()
    });
    if let Some(fps) = args.fps {
        settings.fps = fps;
    }
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    if args.no_loop {
        settings.loop_enabled = false;
    }
    settings
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }
    init_logging(&args, &path_config)?;

    info!("nodeplay {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let settings = load_settings(&args, &path_config);
    let mut engine = PlaybackEngine::new(settings)?;

    let frames_done = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&frames_done);
    engine.bus().subscribe::<FrameDoneEvent, _>(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    engine.bus().subscribe::<FpsChangedEvent, _>(|e| info!("Playback rate: {:.2} fps", e.0));
    engine.bus().subscribe::<EngineStoppedEvent, _>(|e| debug!("Engine stopped ({} frames)", e.frames_done));

    let (first, last) = args.frame_range();
    let src = RampSource::new("ramp", first, last, args.width, args.height);
    let grade: NodeRef = GradeNode::new("grade", src, args.gain, 0.0);

    match (&args.output, args.viewer) {
        (Some(pattern), false) => {
            let writer = SequenceWriter::new("write", grade, pattern, first, last);
            engine.change_output(Some(Output::Writer(writer.clone())));
            engine.debug_tree();
            engine.start(-1, false, true, false)?;
            println!(
                "Wrote {} frames to {}",
                writer.encoded_frames().len(),
                pattern
            );
        }
        _ => {
            let viewer = BufferViewer::new("viewer", grade);
            viewer.set_zoom(args.zoom);
            viewer.set_exposure(args.exposure);
            let surface = HeadlessSurface::new();
            engine.set_surface(surface.clone());
            engine.change_output(Some(Output::Viewer(viewer.clone())));
            engine.debug_tree();

            viewer.seek(if args.backward { last } else { first });
            if args.frames < 0 && engine.settings().loop_enabled {
                info!("Looping until interrupted (pass --frames N or --no-loop to bound playback)");
            }
            engine.start(args.frames, false, !args.backward, false)?;
            println!(
                "Presented {} frames ({} uploads, {} from cache), last frame {}",
                frames_done.load(Ordering::Relaxed),
                surface.uploaded_frames(),
                engine.frame_cache().stats().hits(),
                viewer.current_frame()
            );
        }
    }

    let (used, limit) = engine.frame_cache().mem();
    info!("Frame cache: {} entries, {} / {} bytes", engine.frame_cache().len(), used, limit);
    Ok(())
}
