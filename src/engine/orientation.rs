// src/engine/orientation.rs
//
// EXIF orientation: how the stored pixels map onto the upright picture.
// Decoding never rotates; the pipeline crops in stored coordinates and
// applies the rotation once, on the final (smallest) buffer.

use super::raster::Image;
use bitflags::bitflags;

bitflags! {
    /// Axis operations that turn stored pixels into display pixels.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Transform: u8 {
        const SWAP_XY = 1 << 0;
        const FLIP_X = 1 << 1;
        const FLIP_Y = 1 << 2;
    }
}

/// EXIF Orientation tag values, named by where row 0 / column 0 of the
/// stored image sit in the upright picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    /// Tag missing or out of range; treated as upright.
    #[default]
    Undefined,
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
    LeftTop,
    RightTop,
    RightBottom,
    LeftBottom,
}

impl Orientation {
    pub const ALL: [Orientation; 9] = [
        Orientation::Undefined,
        Orientation::TopLeft,
        Orientation::TopRight,
        Orientation::BottomRight,
        Orientation::BottomLeft,
        Orientation::LeftTop,
        Orientation::RightTop,
        Orientation::RightBottom,
        Orientation::LeftBottom,
    ];

    pub fn from_exif(value: u16) -> Self {
        match value {
            1 => Self::TopLeft,
            2 => Self::TopRight,
            3 => Self::BottomRight,
            4 => Self::BottomLeft,
            5 => Self::LeftTop,
            6 => Self::RightTop,
            7 => Self::RightBottom,
            8 => Self::LeftBottom,
            _ => Self::Undefined,
        }
    }

    pub fn to_exif(self) -> u16 {
        match self {
            Self::Undefined => 0,
            Self::TopLeft => 1,
            Self::TopRight => 2,
            Self::BottomRight => 3,
            Self::BottomLeft => 4,
            Self::LeftTop => 5,
            Self::RightTop => 6,
            Self::RightBottom => 7,
            Self::LeftBottom => 8,
        }
    }

    pub fn transform(self) -> Transform {
        match self {
            Self::Undefined | Self::TopLeft => Transform::empty(),
            Self::TopRight => Transform::FLIP_X,
            Self::BottomRight => Transform::FLIP_X | Transform::FLIP_Y,
            Self::BottomLeft => Transform::FLIP_Y,
            Self::LeftTop => Transform::SWAP_XY,
            Self::RightTop => Transform::SWAP_XY | Transform::FLIP_Y,
            Self::RightBottom => Transform::SWAP_XY | Transform::FLIP_X | Transform::FLIP_Y,
            Self::LeftBottom => Transform::SWAP_XY | Transform::FLIP_X,
        }
    }

    /// Orientation that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            Self::RightTop => Self::LeftBottom,
            Self::LeftBottom => Self::RightTop,
            other => other,
        }
    }

    /// Display dimensions of a stored `w`x`h` image (or the reverse).
    pub fn dimensions(self, w: u32, h: u32) -> (u32, u32) {
        if self.transform().contains(Transform::SWAP_XY) {
            (h, w)
        } else {
            (w, h)
        }
    }

    /// Translate a crop of `ow`x`oh` at (`x`, `y`) inside a display image of
    /// `iw`x`ih` into stored coordinates. Returns `(ow, oh, x, y)`.
    pub fn crop(self, ow: u32, oh: u32, x: u32, y: u32, iw: u32, ih: u32) -> (u32, u32, u32, u32) {
        let (mut ow, mut oh, mut x, mut y, mut iw, mut ih) = (ow, oh, x, y, iw, ih);
        let t = self.transform();
        if t.contains(Transform::SWAP_XY) {
            std::mem::swap(&mut ow, &mut oh);
            std::mem::swap(&mut x, &mut y);
            std::mem::swap(&mut iw, &mut ih);
        }
        if t.contains(Transform::FLIP_X) {
            x = iw - ow - x;
        }
        if t.contains(Transform::FLIP_Y) {
            y = ih - oh - y;
        }
        (ow, oh, x, y)
    }

    /// Rotate/flip stored pixels into display order and mark the image upright.
    pub fn apply(self, image: Image) -> Image {
        let image = match self {
            Self::Undefined | Self::TopLeft => image,
            Self::TopRight => image.flip_horizontal(),
            Self::BottomRight => image.rotate180(),
            Self::BottomLeft => image.flip_vertical(),
            Self::LeftTop => image.flip_vertical().rotate90(),
            Self::RightTop => image.rotate90(),
            Self::RightBottom => image.flip_vertical().rotate270(),
            Self::LeftBottom => image.rotate270(),
        };
        image.with_orientation(Orientation::TopLeft)
    }
}
