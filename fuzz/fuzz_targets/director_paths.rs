#![no_main]

use hyper::Request;
use libfuzzer_sys::fuzz_target;
use thumbnail_proxy::proxy::director::{Director, PathDirector};
use thumbnail_proxy::Options;

fuzz_target!(|path: &str| {
    let Ok(request) = Request::get(path).header("host", "fuzz.local").body(()) else {
        return;
    };
    let (parts, _) = request.into_parts();
    for local in [false, true] {
        let director = PathDirector::new(Options::default(), local).unwrap();
        if let Ok(direction) = director.direct(&parts) {
            assert!((1..=2048).contains(&direction.options.width));
            assert!((1..=2048).contains(&direction.options.height));
        }
    }
});
