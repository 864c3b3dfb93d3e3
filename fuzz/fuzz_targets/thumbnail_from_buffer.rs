#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use thumbnail_proxy::{thumbnail, Options};

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    width: u16,
    height: u16,
    crop: bool,
    fast_resize: bool,
    data: &'a [u8],
}

fuzz_target!(|input: Input| {
    let options = Options {
        width: (input.width % 512) as u32,
        height: (input.height % 512) as u32,
        crop: input.crop,
        fast_resize: input.fast_resize,
        // Keep the fuzzer away from legitimately huge allocations.
        max_buffer_pixels: 4_000_000,
        ..Default::default()
    };
    let _ = thumbnail(input.data, &options);
});
