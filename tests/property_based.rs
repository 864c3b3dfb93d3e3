use image::{DynamicImage, RgbImage};
use proptest::prelude::*;
use thumbnail_proxy::engine::{
    crop_offset, pre_shrink_factor, scale_aspect, shrink_factor, Image, Interpretation,
    Orientation,
};

fn create_test_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    }))
}

fn orientation_strategy() -> impl Strategy<Value = Orientation> {
    prop::sample::select(Orientation::ALL.to_vec())
}

/// Source size plus a crop box that fits inside it.
fn crop_strategy() -> impl Strategy<Value = (u32, u32, u32, u32)> {
    (1u32..=4000, 1u32..=4000).prop_flat_map(|(sw, sh)| (Just(sw), Just(sh), 1u32..=sw, 1u32..=sh))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_scale_within_fits_box(
        ow in 1u32..=32766,
        oh in 1u32..=32766,
        rw in 1u32..=4096,
        rh in 1u32..=4096,
    ) {
        let (w, h, _) = scale_aspect(ow, oh, rw, rh, true);
        prop_assert!(w >= 1 && h >= 1);
        prop_assert!(w <= rw, "{w} > {rw}");
        prop_assert!(h <= rh, "{h} > {rh}");
        // One side always touches the box.
        prop_assert!(w == rw || h == rh);
    }

    #[test]
    fn prop_scale_cover_covers_box(
        ow in 1u32..=32766,
        oh in 1u32..=32766,
        rw in 1u32..=4096,
        rh in 1u32..=4096,
    ) {
        let (w, h, _) = scale_aspect(ow, oh, rw, rh, false);
        prop_assert!(w >= rw);
        prop_assert!(h >= rh);
        prop_assert!(w == rw || h == rh);
    }

    #[test]
    fn prop_scale_preserves_aspect_within_one_pixel(
        ow in 1u32..=32766,
        oh in 1u32..=32766,
        rw in 1u32..=4096,
        rh in 1u32..=4096,
        within in any::<bool>(),
    ) {
        let (w, h, _) = scale_aspect(ow, oh, rw, rh, within);
        // w/h vs ow/oh, cross-multiplied: the derived side is off by less
        // than one pixel.
        let lhs = w as u64 * oh as u64;
        let rhs = h as u64 * ow as u64;
        prop_assert!(lhs.abs_diff(rhs) < ow.max(oh) as u64);
    }

    #[test]
    fn prop_scale_is_identity_on_matching_ratio(
        ow in 1u32..=2000,
        oh in 1u32..=2000,
        k in 1u32..=8,
        within in any::<bool>(),
    ) {
        let (w, h, _) = scale_aspect(ow, oh, ow * k, oh * k, within);
        prop_assert_eq!((w, h), (ow * k, oh * k));
    }

    #[test]
    fn prop_shrink_factor_leaves_room_for_resample(
        from in 1u32..=32766,
        to in 1u32..=4096,
    ) {
        let factor = shrink_factor(from, to, false);
        prop_assert!(factor >= 1);
        if factor > 1 {
            // At least 1.4x is left for the final resample.
            prop_assert!(factor as u64 * to as u64 * 7 <= from as u64 * 5);
        }

        let fast = shrink_factor(from, to, true);
        prop_assert!(fast >= factor);
        prop_assert!(fast == 1 || fast as u64 * to as u64 <= from as u64);
    }

    #[test]
    fn prop_jpeg_pre_shrink_is_power_of_two(
        mw in 2u32..=32766,
        mh in 2u32..=32766,
        iw in 1u32..=2048,
        ih in 1u32..=2048,
        trust_width in any::<bool>(),
        fast in any::<bool>(),
    ) {
        let factor = pre_shrink_factor(mw, mh, iw, ih, trust_width, fast, true);
        prop_assert!(matches!(factor, 1 | 2 | 4 | 8));
        let bound = if trust_width {
            shrink_factor(mw, iw, fast)
        } else {
            shrink_factor(mh, ih, fast)
        };
        prop_assert!(factor <= bound.max(1));
    }

    #[test]
    fn prop_crop_offset_stays_inside(params in crop_strategy()) {
        let (sw, sh, cw, ch) = params;
        let (x, y) = crop_offset(sw, sh, cw, ch);
        prop_assert!(x + cw <= sw);
        prop_assert!(y + ch <= sh);
    }

    #[test]
    fn prop_orientation_crop_stays_inside_stored_image(
        params in crop_strategy(),
        orientation in orientation_strategy(),
    ) {
        let (dw, dh, cw, ch) = params;
        let (x, y) = crop_offset(dw, dh, cw, ch);
        let (sw, sh) = orientation.dimensions(dw, dh);
        let (w, h, sx, sy) = orientation.crop(cw, ch, x, y, dw, dh);
        prop_assert_eq!((w, h), orientation.dimensions(cw, ch));
        prop_assert!(sx + w <= sw);
        prop_assert!(sy + h <= sh);
    }

    #[test]
    fn prop_orientation_round_trip(
        w in 1u32..=12,
        h in 1u32..=12,
        orientation in orientation_strategy(),
    ) {
        let original = create_test_image(w, h);
        let image = Image::new(original.clone(), Interpretation::Srgb).with_orientation(orientation);
        let upright = orientation.apply(image);
        prop_assert_eq!(upright.orientation(), Orientation::TopLeft);
        prop_assert_eq!((upright.width(), upright.height()), orientation.dimensions(w, h));

        let restored = orientation.inverse().apply(upright);
        prop_assert_eq!(restored.into_dynamic(), original);
    }
}
