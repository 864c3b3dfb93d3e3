// src/engine.rs
//
// The thumbnailing engine: codecs, pixel operations, the pipeline that
// chains them, and the worker pool that runs the pipeline.
//
// This file is a facade over the modules in engine/.

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Sources smaller than this on either axis are rejected.
pub const MIN_DIMENSION: u32 = 2;

/// Maximum source dimension (width or height). Larger sources are rejected
/// before any pixels are decoded.
pub const MAX_DIMENSION: u32 = 32766;

/// Default ceiling for requested output dimensions, enforced by the director.
pub const MAX_OUTPUT_DIMENSION: u32 = 2048;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod color;
mod common;
mod decoder;
mod encoder;
mod format;
mod geometry;
mod io;
mod orientation;
mod photo;
mod pipeline;
mod pool;
mod raster;
mod save;
mod watchdog;

pub use color::to_srgb;
pub use common::run_with_panic_policy;
pub use decoder::{check_dimensions, load};
pub use encoder::{encode_jpeg, encode_png, encode_webp, PROGRESSIVE_PIXELS};
pub use format::{metadata, Metadata, SourceFormat};
pub use geometry::{
    crop_offset, pre_shrink_factor, scale_aspect, shrink_factor, FAST_RESIZE_LIMIT,
    MAX_JPEG_SHRINK, MAX_SHRINK,
};
pub use io::{detect_exif_orientation, extract_icc_profile};
pub use orientation::{Orientation, Transform};
pub use photo::{is_photo, photo_metric, PHOTO_MIN_RUN, PHOTO_THRESHOLD};
pub use pipeline::{thumbnail, FLATTEN_MIN_ALPHA};
pub use pool::{Handler, Pool, PoolConfig, Reply};
pub use raster::{thread_shutdown, BandFormat, Image, Interpretation};
pub use save::{choose_format, save, use_lossless, PHOTO_DETECTION_MAX_PIXELS};
pub use watchdog::Watchdog;
