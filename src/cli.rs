use clap::Parser;
use std::path::PathBuf;

// Build version with runtime info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Writers: png, tiff, exr (image 0.25)\n",
    "Target:  ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Node-graph frame playback engine
///
/// Plays a procedural ramp -> grade graph through a headless viewer, or
/// renders it to an image sequence when OUTPUT is given.
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Output pattern for sequence rendering (e.g. out/frame.####.png, out.%04d.exr)
    #[arg(value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Play through the viewer instead of rendering to files
    #[arg(long = "viewer")]
    pub viewer: bool,

    /// Frame range of the source
    #[arg(long = "range", value_names = ["START", "END"], num_args = 2, default_values_t = [1, 48])]
    pub range: Vec<i32>,

    /// Frames to play in viewer mode (-1 = until stopped, or the range end with --no-loop)
    #[arg(short = 'n', long = "frames", value_name = "N", default_value_t = -1, allow_hyphen_values = true)]
    pub frames: i32,

    /// Desired playback rate
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f64>,

    /// Disable looping in viewer mode
    #[arg(long = "no-loop")]
    pub no_loop: bool,

    /// Play backward in viewer mode
    #[arg(short = 'b', long = "backward")]
    pub backward: bool,

    /// Source width in pixels
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: i32,

    /// Source height in pixels
    #[arg(long = "height", value_name = "PX", default_value_t = 360)]
    pub height: i32,

    /// Viewer zoom factor (below 1 subsamples rows)
    #[arg(long = "zoom", value_name = "FACTOR", default_value_t = 1.0)]
    pub zoom: f32,

    /// Viewer exposure in stops
    #[arg(long = "exposure", value_name = "STOPS", default_value_t = 0.0, allow_hyphen_values = true)]
    pub exposure: f32,

    /// Grade gain applied to the source
    #[arg(long = "gain", value_name = "GAIN", default_value_t = 1.0)]
    pub gain: f32,

    /// Row worker threads (0 = auto)
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Enable debug logging to file (default: nodeplay.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

impl Args {
    /// `(first, last)` of `--range`.
    pub fn frame_range(&self) -> (i32, i32) {
        match self.range.as_slice() {
            [first, last] => (*first, *last),
            _ => (1, 48),
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbosity {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
