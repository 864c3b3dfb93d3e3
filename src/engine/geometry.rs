// src/engine/geometry.rs
//
// Integer geometry: aspect-ratio scaling, shrink factor selection and crop offsets.
//
// Rounding convention: every derived dimension is rounded up (ceiling
// division) and floored at 1. JPEG DCT scaling also rounds up, so a shrink
// factor chosen here never leaves the decoded image smaller than the box.

/// Minimum ratio (7/5 = 1.4) left for the high-quality resampler after any
/// decoder or box-filter shrink, unless fast resizing was requested.
pub const FAST_RESIZE_LIMIT: (u64, u64) = (7, 5);

/// Largest DCT-domain shrink libjpeg offers.
pub const MAX_JPEG_SHRINK: u32 = 8;

/// Upper bound for decoders that shrink by arbitrary integer factors.
pub const MAX_SHRINK: u32 = 1024;

#[inline]
fn div_ceil(n: u64, d: u64) -> u64 {
    n.div_ceil(d.max(1))
}

/// Scale `orig_w`x`orig_h` to the aspect ratio of `req_w`x`req_h`.
///
/// With `within` the result is the largest box that fits inside the request,
/// otherwise the smallest box that covers it. The third value is `true` when
/// the width was taken from the request and the height derived from it.
pub fn scale_aspect(orig_w: u32, orig_h: u32, req_w: u32, req_h: u32, within: bool) -> (u32, u32, bool) {
    let wp = orig_w as u64 * req_h as u64;
    let hp = orig_h as u64 * req_w as u64;

    let (w, h, trust_width) = if within == (wp < hp) {
        (div_ceil(wp, orig_h as u64), req_h as u64, false)
    } else {
        (req_w as u64, div_ceil(hp, orig_w as u64), true)
    };

    (
        w.clamp(1, u32::MAX as u64) as u32,
        h.clamp(1, u32::MAX as u64) as u32,
        trust_width,
    )
}

/// Integer factor to shrink `from` towards `to` with a cheap filter.
///
/// Unless `fast_resize` is set the factor leaves at least a 1.4x ratio for
/// the final resample. Never less than 1.
pub fn shrink_factor(from: u32, to: u32, fast_resize: bool) -> u32 {
    let (num, den) = if fast_resize {
        (from as u64, to.max(1) as u64)
    } else {
        (
            from as u64 * FAST_RESIZE_LIMIT.1,
            to.max(1) as u64 * FAST_RESIZE_LIMIT.0,
        )
    };
    (num / den).clamp(1, u32::MAX as u64) as u32
}

/// Shrink factor the decoder should apply while loading.
///
/// `mw`x`mh` are the source dimensions, `iw`x`ih` the intermediate box and
/// `trust_width` says which axis of the box was not derived. JPEG can only
/// shrink by 1, 2, 4 or 8.
pub fn pre_shrink_factor(
    mw: u32,
    mh: u32,
    iw: u32,
    ih: u32,
    trust_width: bool,
    fast_resize: bool,
    is_jpeg: bool,
) -> u32 {
    let shrink = if trust_width {
        shrink_factor(mw, iw, fast_resize)
    } else {
        shrink_factor(mh, ih, fast_resize)
    };

    if is_jpeg {
        let mut factor = MAX_JPEG_SHRINK;
        while factor > shrink {
            factor /= 2;
        }
        factor
    } else {
        shrink.min(MAX_SHRINK)
    }
}

/// Offset of an `out_w`x`out_h` crop inside a `source_w`x`source_h` image.
///
/// Horizontally centred, vertically biased towards the top quarter.
///
/// # Panics
///
/// If the crop box is larger than the source. Validation guarantees it never is.
pub fn crop_offset(source_w: u32, source_h: u32, out_w: u32, out_h: u32) -> (u32, u32) {
    assert!(
        out_w <= source_w && out_h <= source_h,
        "crop box {out_w}x{out_h} exceeds source {source_w}x{source_h}"
    );
    ((source_w - out_w + 1) / 2, (source_h - out_h + 1) / 4)
}
