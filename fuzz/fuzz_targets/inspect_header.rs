#![no_main]

//! Header-only paths: format sniffing, metadata, EXIF orientation and ICC extraction.

use libfuzzer_sys::fuzz_target;
use thumbnail_proxy::engine::{detect_exif_orientation, extract_icc_profile, metadata, SourceFormat};

fuzz_target!(|data: &[u8]| {
    let _ = metadata(data);
    let _ = detect_exif_orientation(data);
    if let Some(format) = SourceFormat::detect(data) {
        let _ = extract_icc_profile(data, format);
    }
});
