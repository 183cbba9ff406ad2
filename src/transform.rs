//! The frame pipeline.
//!
//! Every frame runs the same fixed sequence:
//!
//! 1. decode (see `wire`)
//! 2. rotate about the image center into a canvas sized to the rotated bounds
//! 3. pad and shift down by the source's shift
//! 4. paint the black background white
//! 5. draw the three reference lines
//! 6. encode (see `wire`)
//!
//! Steps 2-5 are exposed individually. Only the shift can fail, when the
//! padded canvas would not fit in `u32`.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use crate::error::DecodeError;
use crate::frame::Frame;
use crate::geometry::{canvas_extent, pad_constant, rotated_bounds, warp_affine, Affine2};
use crate::params::TransformParameters;
use crate::routing::SourceTable;
use crate::wire;

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Reference line thickness in rows, centered on the configured row.
pub const LINE_THICKNESS: u32 = 5;

/// Colors for epi_1, epi_2 and epi_3, in RGB channel order.
pub const REFERENCE_LINE_COLORS: [Rgb<u8>; 3] = [
    Rgb([0, 255, 0]), // green
    Rgb([0, 0, 255]), // blue
    Rgb([255, 0, 0]), // red
];

const MASK_THRESHOLD: u8 = 0;

/// A transformed frame and the topic it is published on.
#[derive(Clone, Debug)]
pub struct TransformedFrame {
    pub output_topic: String,
    pub frame: Frame,
}

pub struct FrameTransformer {
    sources: SourceTable,
}

impl FrameTransformer {
    pub fn new(sources: SourceTable) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &SourceTable {
        &self.sources
    }

    /// Decode a wire frame and run it through the pipeline.
    pub fn process(
        &self,
        payload: &[u8],
        params: &TransformParameters,
    ) -> Result<TransformedFrame, DecodeError> {
        let frame = wire::decode_frame(payload)?;
        log::info!("received message {}", frame.tag());
        let output_topic = self.sources.route_for_tag(frame.tag()).output_topic.clone();
        let frame = self.transform(frame, params)?;
        Ok(TransformedFrame {
            output_topic,
            frame,
        })
    }

    /// Transform a decoded frame. The header is carried over unchanged.
    pub fn transform(
        &self,
        frame: Frame,
        params: &TransformParameters,
    ) -> Result<Frame, DecodeError> {
        let route = self.sources.route_for_tag(frame.tag());
        let shift = route.shift.select(params);
        log::debug!(
            "transforming {}x{} frame from '{}' (angle {}, {} = {})",
            frame.width(),
            frame.height(),
            frame.tag(),
            params.angle,
            route.shift,
            shift
        );
        let image = transform_image(&frame.image, shift, params)?;
        Ok(Frame::new(frame.header, image))
    }
}

impl Default for FrameTransformer {
    fn default() -> Self {
        Self::new(SourceTable::default())
    }
}

/// Steps 2-5 on a single image with the shift already selected.
pub fn transform_image(
    src: &RgbImage,
    shift: u32,
    params: &TransformParameters,
) -> Result<RgbImage, DecodeError> {
    let rotated = rotate_about_center(src, params.angle);
    let mut shifted = shift_down(&rotated, shift)?;
    whiten_background(&mut shifted);
    draw_reference_lines(&mut shifted, params.reference_rows());
    Ok(shifted)
}

/// Rotate about the image center into a canvas sized to the rotated bounds.
///
/// Content is centered in the new canvas; area not covered by the source is
/// black.
pub fn rotate_about_center(src: &RgbImage, angle_deg: f64) -> RgbImage {
    let (w, h) = src.dimensions();
    let center = ((w as f64 - 1.0) / 2.0, (h as f64 - 1.0) / 2.0);
    let mut matrix = Affine2::rotation_about(center, angle_deg, 1.0);
    let (bw, bh) = rotated_bounds(w, h, angle_deg);
    matrix.translate(bw / 2.0 - w as f64 / 2.0, bh / 2.0 - h as f64 / 2.0);
    warp_affine(src, &matrix, canvas_extent(bw), canvas_extent(bh), BLACK)
}

/// Pad with white (1 px top, left and right; `shift` px bottom) and move the
/// content down by `shift` rows.
///
/// The result is `(w + 2) x (h + 1 + shift)`. The `shift` rows vacated at the
/// top are black; the bottom padding is pushed off the canvas.
pub fn shift_down(src: &RgbImage, shift: u32) -> Result<RgbImage, DecodeError> {
    let padded =
        pad_constant(src, 1, shift, 1, 1, WHITE).ok_or(DecodeError::DimensionsOverflow)?;
    let (w, h) = padded.dimensions();
    Ok(warp_affine(
        &padded,
        &Affine2::translation(0.0, shift as f64),
        w,
        h,
        BLACK,
    ))
}

/// Per-pixel intensity as the brightest channel. Zero only for pure black.
pub fn intensity(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgb([r, g, b]) = *image.get_pixel(x, y);
        Luma([r.max(g).max(b)])
    })
}

/// Mask of background pixels: 255 where intensity is at or below
/// `MASK_THRESHOLD`, 0 elsewhere.
pub fn background_mask(image: &RgbImage) -> GrayImage {
    threshold(&intensity(image), MASK_THRESHOLD, ThresholdType::BinaryInverted)
}

/// Paint every masked pixel solid white.
pub fn whiten_background(image: &mut RgbImage) {
    let mask = background_mask(image);
    for (px, m) in image.pixels_mut().zip(mask.pixels()) {
        if m[0] != 0 {
            *px = WHITE;
        }
    }
}

/// Draw full-width reference lines centered on `rows`. Rows off the canvas
/// are clipped.
pub fn draw_reference_lines(image: &mut RgbImage, rows: [i32; 3]) {
    let (width, height) = (image.width(), i64::from(image.height()));
    let half = i64::from(LINE_THICKNESS / 2);
    for (row, color) in rows.into_iter().zip(REFERENCE_LINE_COLORS) {
        let top = (i64::from(row) - half).max(0);
        let bottom = (i64::from(row) + half + 1).min(height);
        if top >= bottom {
            continue;
        }
        // Both ends lie inside the canvas, so they fit in i32 and u32.
        let rect = Rect::at(0, top as i32).of_size(width, (bottom - top) as u32);
        draw_filled_rect_mut(image, rect, color);
    }
}
