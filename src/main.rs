// src/main.rs
//
// thumbnail-proxy binary. Startup order: tracing, flags, pool, proxy, serve.

use anyhow::{bail, Context};
use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thumbnail_proxy::proxy::director::PathDirector;
use thumbnail_proxy::proxy::origin::{HttpOrigin, LocalOrigin, Origin};
use thumbnail_proxy::proxy::{Proxy, ProxyConfig, DEFAULT_MAX_QUEUE_DURATION};
use thumbnail_proxy::{Options, Pool, PoolConfig, SaveOptions};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "thumbnail-proxy")]
#[command(about = "HTTP image thumbnailing proxy")]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3520")]
    listen: SocketAddr,

    /// Serve source images from this directory instead of proxying HTTP
    #[arg(long)]
    local_image_directory: Option<PathBuf>,

    /// Origin fetch timeout, seconds
    #[arg(long, default_value_t = 30)]
    fetch_timeout: u64,

    /// Longest a request may wait for a processing slot, seconds (0: one hour)
    #[arg(long, default_value_t = 0)]
    max_queue_duration: u64,

    /// Watchdog budget for processing one image, seconds (0: no watchdog)
    #[arg(long, default_value_t = 60)]
    max_processing_duration: u64,

    /// Image worker threads (0: one per CPU)
    #[arg(long, default_value_t = 0)]
    max_image_threads: usize,

    /// Images that may be fetched ahead of a free worker (0: one per CPU)
    #[arg(long, default_value_t = 0)]
    max_prefetch: usize,

    /// Refuse sources that would decode to more pixels than this
    #[arg(long, default_value_t = 6_500_000)]
    max_buffer_pixels: u64,

    /// Largest width or height a client may request
    #[arg(long, default_value_t = 2048)]
    max_output_dimension: u32,

    /// Mildly sharpen shrunk images
    #[arg(long)]
    sharpen: bool,

    /// Trade quality for speed when shrinking
    #[arg(long)]
    fast_resize: bool,

    /// Allow lossless output for non-JPEG sources
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    lossless: bool,

    /// With --lossless, still encode photographic content lossily
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    lossy_if_photo: bool,

    /// Encode WebP losslessly when the client allows WebP
    #[arg(long)]
    lossless_webp: bool,
}

impl Cli {
    fn options(&self) -> Options {
        let seconds = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        Options {
            sharpen: self.sharpen,
            fast_resize: self.fast_resize,
            max_buffer_pixels: self.max_buffer_pixels,
            max_queue_duration: Some(
                seconds(self.max_queue_duration).unwrap_or(DEFAULT_MAX_QUEUE_DURATION),
            ),
            max_processing_duration: seconds(self.max_processing_duration),
            save: SaveOptions {
                lossless: self.lossless,
                lossy_if_photo: self.lossy_if_photo,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if cli.max_output_dimension == 0 {
        bail!("--max-output-dimension must be positive");
    }

    let fetch_timeout = Duration::from_secs(cli.fetch_timeout);
    let origin = match &cli.local_image_directory {
        Some(dir) => {
            let root = dir
                .canonicalize()
                .with_context(|| format!("image directory {}", dir.display()))?;
            if !root.is_dir() {
                bail!("{} is not a directory", root.display());
            }
            info!(root = %root.display(), "serving local images");
            Origin::Local(LocalOrigin::new(root).with_timeout(fetch_timeout))
        }
        None => Origin::Http(HttpOrigin::new(fetch_timeout)),
    };

    let pool = Pool::new(PoolConfig {
        workers: cli.max_image_threads,
        queue_capacity: 0,
    })
    .context("starting image workers")?;
    let pool = Arc::new(pool);

    let prefetch = if cli.max_prefetch > 0 {
        cli.max_prefetch
    } else {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    };
    let director = PathDirector::new(cli.options(), origin.is_local())
        .context("compiling path grammar")?
        .with_max_output_dimension(cli.max_output_dimension)
        .with_lossless_webp(cli.lossless_webp);
    let proxy = Arc::new(Proxy::new(
        Arc::new(director),
        origin,
        pool.clone(),
        ProxyConfig {
            admission_capacity: pool.workers() + prefetch,
            ..Default::default()
        },
    ));

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;

    let server = tokio::spawn(proxy.clone().serve(listener));
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    proxy.shutdown();
    let _ = server.await;
    tokio::task::spawn_blocking(move || pool.close()).await?;
    Ok(())
}
