// lib.rs
//
// thumbnail-proxy: an HTTP image thumbnailing proxy.
//
// Design goals:
// - Bounded memory: decode with pre-shrink, refuse oversized buffers
// - Bounded CPU: a fixed pool of pinned worker threads
// - Backpressure: admission tokens with a queueing deadline
// - No cache: every response is computed fresh

// Memory allocator optimization - jemalloc for better performance
// Note: jemalloc is not supported on Windows/MSVC, so we exclude it on that platform
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod engine;
pub mod error;
pub mod ops;
pub mod proxy;

pub use engine::{thumbnail, Pool, PoolConfig};
pub use error::{Result, ThumbnailError};
pub use ops::{Options, OutputFormat, SaveOptions};
