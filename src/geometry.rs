//! Affine geometry for the frame pipeline.
//!
//! Matrices map source pixel coordinates to destination pixel coordinates
//! (`dst = M * src`). `warp_affine` walks the destination and samples the source
//! through the inverse, bilinear, with a constant border colour for samples that
//! fall outside the source.
//!
//! Pixel coordinates address pixel centers: pixel `(x, y)` sits at exactly
//! `(x as f64, y as f64)`. An integer translation therefore moves pixels without
//! any resampling blur.

use image::{Rgb, RgbImage};

/// 2x3 affine matrix, row-major.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine2 {
    pub m: [[f64; 3]; 2],
}

impl Affine2 {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty]],
        }
    }

    /// Rotation by `angle_deg` about `center` with uniform `scale`.
    ///
    /// Positive angles rotate counter-clockwise as seen on screen (y axis
    /// pointing down):
    ///
    /// ```text
    /// [  a  b  (1-a)*cx - b*cy ]
    /// [ -b  a  b*cx + (1-a)*cy ]      a = scale*cos, b = scale*sin
    /// ```
    pub fn rotation_about(center: (f64, f64), angle_deg: f64, scale: f64) -> Self {
        let (sin, cos) = angle_deg.to_radians().sin_cos();
        let a = scale * cos;
        let b = scale * sin;
        let (cx, cy) = center;
        Self {
            m: [
                [a, b, (1.0 - a) * cx - b * cy],
                [-b, a, b * cx + (1.0 - a) * cy],
            ],
        }
    }

    /// Shift the translation terms.
    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.m[0][2] += dx;
        self.m[1][2] += dy;
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.m;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    /// Inverse matrix, `None` when the linear part is singular.
    pub fn invert(&self) -> Option<Self> {
        let [[a, b, tx], [c, d, ty]] = self.m;
        let det = a * d - b * c;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let ia = d * inv_det;
        let ib = -b * inv_det;
        let ic = -c * inv_det;
        let id = a * inv_det;
        Some(Self {
            m: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }
}

impl Default for Affine2 {
    fn default() -> Self {
        Self::identity()
    }
}

/// Size of the axis-aligned bounding box of a `width x height` rectangle
/// rotated by `angle_deg` about its own center.
pub fn rotated_bounds(width: u32, height: u32, angle_deg: f64) -> (f64, f64) {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let (w, h) = (width as f64, height as f64);
    let bw = (w * cos).abs() + (h * sin).abs();
    let bh = (w * sin).abs() + (h * cos).abs();
    (bw, bh)
}

/// Round a floating canvas extent to whole pixels, never below one.
pub fn canvas_extent(extent: f64) -> u32 {
    extent.round().max(1.0) as u32
}

/// Resample `src` through `matrix` into a `width x height` canvas.
///
/// Destination pixels whose source location lies outside `src` read `border`.
/// A singular matrix yields a canvas filled with `border`.
pub fn warp_affine(
    src: &RgbImage,
    matrix: &Affine2,
    width: u32,
    height: u32,
    border: Rgb<u8>,
) -> RgbImage {
    let mut dst = RgbImage::from_pixel(width, height, border);
    let Some(inverse) = matrix.invert() else {
        return dst;
    };
    for (x, y, px) in dst.enumerate_pixels_mut() {
        let (sx, sy) = inverse.apply(x as f64, y as f64);
        *px = sample_bilinear(src, sx, sy, border);
    }
    dst
}

fn sample_bilinear(src: &RgbImage, sx: f64, sy: f64, border: Rgb<u8>) -> Rgb<u8> {
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let (w, h) = (src.width() as i64, src.height() as i64);
    if x0 + 1 < 0 || y0 + 1 < 0 || x0 >= w || y0 >= h {
        return border;
    }
    let fetch = |x: i64, y: i64| -> [f64; 3] {
        let p = if x >= 0 && y >= 0 && x < w && y < h {
            *src.get_pixel(x as u32, y as u32)
        } else {
            border
        };
        [p[0] as f64, p[1] as f64, p[2] as f64]
    };

    let p00 = fetch(x0, y0);
    let p10 = fetch(x0 + 1, y0);
    let p01 = fetch(x0, y0 + 1);
    let p11 = fetch(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Surround `src` with a constant-colour border.
///
/// Returns `None` when the padded size does not fit in `u32`.
pub fn pad_constant(
    src: &RgbImage,
    top: u32,
    bottom: u32,
    left: u32,
    right: u32,
    color: Rgb<u8>,
) -> Option<RgbImage> {
    let width = src.width().checked_add(left)?.checked_add(right)?;
    let height = src.height().checked_add(top)?.checked_add(bottom)?;
    let mut dst = RgbImage::from_pixel(width, height, color);
    image::imageops::replace(&mut dst, src, left as i64, top as i64);
    Some(dst)
}
