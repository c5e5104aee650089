//! Attribute key constants for node parameters.
//!
//! Usage: `node.attrs().get_float(A_GAIN)`

// === Identity ===
/// Human-readable node name
pub const A_NAME: &str = "name";

// === Time range ===
/// First frame produced by a source or written by a writer
pub const A_FIRST: &str = "first";
/// Last frame (inclusive)
pub const A_LAST: &str = "last";

// === Format ===
/// Image width in pixels
pub const A_WIDTH: &str = "width";
/// Image height in pixels
pub const A_HEIGHT: &str = "height";
/// Pixel aspect ratio
pub const A_PIXEL_ASPECT: &str = "pixel_aspect";

// === Ramp source ===
/// Base colour at frame 0
pub const A_COLOR: &str = "color";
/// Per-frame phase increment of the ramp
pub const A_SPEED: &str = "speed";

// === Grade ===
/// Multiplier applied to every channel
pub const A_GAIN: &str = "gain";
/// Added after gain
pub const A_OFFSET: &str = "offset";

// === Viewer ===
/// Zoom factor of the view (1.0 = 1:1)
pub const A_ZOOM: &str = "zoom";
/// Exposure in stops
pub const A_EXPOSURE: &str = "exposure";
/// Colour transform identifier (e.g. "linear", "srgb")
pub const A_TRANSFORM: &str = "transform";

// === Writer ===
/// Output file pattern (`out.####.png`, `out.%04d.exr`)
pub const A_PATTERN: &str = "pattern";

/// Viewer-only knobs that travel in the frame cache key instead of the graph hash.
pub const VIEW_KEYS: &[&str] = &[A_ZOOM, A_EXPOSURE, A_TRANSFORM];
