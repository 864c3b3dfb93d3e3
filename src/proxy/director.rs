// src/proxy/director.rs
//
// Request -> (origin, options) mapping.

use crate::engine::MAX_OUTPUT_DIMENSION;
use crate::ops::{Options, OutputFormat};
use hyper::header::HOST;
use hyper::http::request::Parts;
use hyper::StatusCode;
use regex::Regex;
use tracing::debug;

/// Where to fetch the source and how to transform it.
#[derive(Debug, Clone)]
pub struct Direction {
    /// URL (HTTP origin) or path (local origin).
    pub origin: String,
    pub options: Options,
}

/// Maps an inbound request onto a `Direction`, or rejects it with a status.
pub trait Director: Send + Sync {
    fn direct(&self, request: &Parts) -> Result<Direction, StatusCode>;
}

/// `<origin-path>=<flags><mode><W>x<H>`, e.g. `/a/b.jpg=pwc200x100`.
const PATH_GRAMMAR: &str = r"^(/.*)=(p?)(w?)([sc])(\d{1,5})x(\d{1,5})$";

pub const PREVIEW_BLUR_SIGMA: f64 = 0.4;
pub const PREVIEW_QUALITY: u8 = 40;

/// The default director: sizes and flags are encoded in the path.
pub struct PathDirector {
    grammar: Regex,
    defaults: Options,
    max_output_dimension: u32,
    lossless_webp: bool,
    local: bool,
}

impl PathDirector {
    /// `defaults` seeds every request. With `local` the origin is the bare
    /// path, otherwise `http://<Host><path>`.
    pub fn new(defaults: Options, local: bool) -> Result<Self, regex::Error> {
        Ok(Self {
            grammar: Regex::new(PATH_GRAMMAR)?,
            defaults,
            max_output_dimension: MAX_OUTPUT_DIMENSION,
            lossless_webp: false,
            local,
        })
    }

    pub fn with_max_output_dimension(mut self, max: u32) -> Self {
        self.max_output_dimension = max;
        self
    }

    pub fn with_lossless_webp(mut self, lossless_webp: bool) -> Self {
        self.lossless_webp = lossless_webp;
        self
    }

    fn dimension(&self, digits: &str) -> Result<u32, StatusCode> {
        match digits.parse::<u32>() {
            Ok(v) if v >= 1 && v <= self.max_output_dimension => Ok(v),
            _ => Err(StatusCode::BAD_REQUEST),
        }
    }
}

impl Director for PathDirector {
    fn direct(&self, request: &Parts) -> Result<Direction, StatusCode> {
        let path = request.uri.path();
        let query = request.uri.query();

        let caps = self.grammar.captures(path).ok_or_else(|| {
            debug!(%path, "path does not match");
            StatusCode::BAD_REQUEST
        })?;
        let origin_path = caps.get(1).map_or(path, |m| m.as_str());
        // One set of scaling parameters per path.
        if self.grammar.is_match(origin_path) {
            debug!(%path, "repeated scaling parameters");
            return Err(StatusCode::BAD_REQUEST);
        }

        let mut options = self.defaults.clone();
        options.width = self.dimension(&caps[5])?;
        options.height = self.dimension(&caps[6])?;
        options.crop = &caps[4] == "c";
        if !caps[2].is_empty() {
            options.blur_sigma = PREVIEW_BLUR_SIGMA;
            options.sharpen = false;
            options.save.format = Some(OutputFormat::Jpeg);
            options.save.quality = PREVIEW_QUALITY;
        }
        if !caps[3].is_empty() {
            options.save.allow_webp = true;
            // A forced format (preview) becomes WebP.
            if options.save.format.is_some() {
                options.save.format = Some(OutputFormat::WebP);
            }
            options.save.lossless = self.lossless_webp;
        }

        let origin = if self.local {
            origin_path.to_string()
        } else {
            let host = request
                .headers
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .filter(|h| !h.is_empty())
                .ok_or(StatusCode::BAD_REQUEST)?;
            match query {
                Some(query) => format!("http://{host}{origin_path}?{query}"),
                None => format!("http://{host}{origin_path}"),
            }
        };

        Ok(Direction { origin, options })
    }
}
