//! Wire format for camera frames.
//!
//! A frame message is a length-prefixed JSON header followed by the pixel
//! payload:
//!
//! ```text
//! [u32 BE header length][JSON header][pixel bytes]
//! ```
//!
//! The header carries the camera header (`seq`, `stamp`, `frame_id`), the
//! encoding name and, for raw encodings, `width`, `height` and `step` (row
//! stride in bytes). Compressed encodings (`jpeg`, `png`) carry their own
//! dimensions and ignore the geometry fields.
//!
//! Decoding always produces RGB8. Encoding always emits `rgb8` with a tight
//! stride.

use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;
use crate::frame::{Frame, FrameHeader};

/// Upper bound on the JSON header.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Upper bound on the pixel payload (a 4K RGBA frame fits comfortably).
pub const MAX_DATA_BYTES: usize = 64 * 1024 * 1024;

/// Largest complete frame message the decoder accepts.
pub const MAX_MESSAGE_BYTES: usize = LENGTH_PREFIX_BYTES + MAX_HEADER_BYTES + MAX_DATA_BYTES;

const LENGTH_PREFIX_BYTES: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Mono8,
    Nv12,
    Jpeg,
    Png,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rgb8 => "rgb8",
            Self::Bgr8 => "bgr8",
            Self::Rgba8 => "rgba8",
            Self::Bgra8 => "bgra8",
            Self::Mono8 => "mono8",
            Self::Nv12 => "nv12",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    /// Bytes per pixel for packed raw encodings. `None` for planar and
    /// compressed encodings.
    fn packed_bytes_per_pixel(&self) -> Option<u32> {
        match self {
            Self::Rgb8 | Self::Bgr8 => Some(3),
            Self::Rgba8 | Self::Bgra8 => Some(4),
            Self::Mono8 => Some(1),
            Self::Nv12 | Self::Jpeg | Self::Png => None,
        }
    }
}

impl FromStr for Encoding {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, DecodeError> {
        match s.to_lowercase().as_str() {
            "rgb8" => Ok(Self::Rgb8),
            "bgr8" => Ok(Self::Bgr8),
            "rgba8" => Ok(Self::Rgba8),
            "bgra8" => Ok(Self::Bgra8),
            "mono8" => Ok(Self::Mono8),
            "nv12" => Ok(Self::Nv12),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            _ => Err(DecodeError::UnsupportedEncoding(s.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireHeader {
    header: FrameHeader,
    encoding: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    step: u32,
}

/// Decode a wire frame into an RGB8 `Frame`.
pub fn decode_frame(payload: &[u8]) -> Result<Frame, DecodeError> {
    let (wire, data) = split_envelope(payload)?;
    let encoding: Encoding = wire.encoding.parse()?;
    let image = match encoding {
        Encoding::Jpeg => decode_compressed(data, ImageFormat::Jpeg)?,
        Encoding::Png => decode_compressed(data, ImageFormat::Png)?,
        raw => raw_to_rgb(data, wire.width, wire.height, wire.step, raw)?,
    };
    Ok(Frame::new(wire.header, image))
}

/// Encode a frame as `rgb8`, header copied unchanged.
pub fn encode_frame(frame: &Frame) -> serde_json::Result<Vec<u8>> {
    encode_raw(
        &frame.header,
        Encoding::Rgb8,
        frame.width(),
        frame.height(),
        frame.width() * 3,
        frame.image.as_raw(),
    )
}

/// Build a wire frame from already-encoded pixel bytes.
///
/// For compressed encodings pass zero geometry; the decoder reads it from the
/// image stream.
pub fn encode_raw(
    header: &FrameHeader,
    encoding: Encoding,
    width: u32,
    height: u32,
    step: u32,
    data: &[u8],
) -> serde_json::Result<Vec<u8>> {
    let wire = WireHeader {
        header: header.clone(),
        encoding: encoding.as_str().to_string(),
        width,
        height,
        step,
    };
    let json = serde_json::to_vec(&wire)?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_BYTES + json.len() + data.len());
    out.extend_from_slice(&(json.len() as u32).to_be_bytes());
    out.extend_from_slice(&json);
    out.extend_from_slice(data);
    Ok(out)
}

fn split_envelope(payload: &[u8]) -> Result<(WireHeader, &[u8]), DecodeError> {
    if payload.len() < LENGTH_PREFIX_BYTES {
        return Err(DecodeError::Truncated {
            expected: LENGTH_PREFIX_BYTES,
            actual: payload.len(),
        });
    }
    let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
    prefix.copy_from_slice(&payload[..LENGTH_PREFIX_BYTES]);
    let header_len = u32::from_be_bytes(prefix) as usize;
    if header_len > MAX_HEADER_BYTES {
        return Err(DecodeError::HeaderTooLarge(header_len));
    }
    let body_start = LENGTH_PREFIX_BYTES + header_len;
    if payload.len() < body_start {
        return Err(DecodeError::Truncated {
            expected: body_start,
            actual: payload.len(),
        });
    }
    let wire: WireHeader = serde_json::from_slice(&payload[LENGTH_PREFIX_BYTES..body_start])?;
    let data = &payload[body_start..];
    if data.len() > MAX_DATA_BYTES {
        return Err(DecodeError::DataTooLarge(data.len()));
    }
    Ok((wire, data))
}

fn decode_compressed(data: &[u8], format: ImageFormat) -> Result<RgbImage, DecodeError> {
    let image = image::load_from_memory_with_format(data, format)?.to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::EmptyImage);
    }
    Ok(image)
}

fn raw_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    step: u32,
    encoding: Encoding,
) -> Result<RgbImage, DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::EmptyImage);
    }
    let rgb = match encoding.packed_bytes_per_pixel() {
        Some(bpp) => packed_to_rgb(pixels, width, height, step, bpp, encoding)?,
        None => nv12_to_rgb(pixels, width, height, step)?,
    };
    RgbImage::from_raw(width, height, rgb).ok_or(DecodeError::DimensionsOverflow)
}

/// Validate the row stride and total length of a raw plane, returning the
/// effective stride.
fn checked_stride(
    pixels: &[u8],
    min_step: u32,
    step: u32,
    rows: u32,
    encoding: Encoding,
) -> Result<usize, DecodeError> {
    let step = if step == 0 { min_step } else { step };
    if step < min_step {
        return Err(DecodeError::StepTooSmall {
            step,
            min: min_step,
        });
    }
    let expected = (step as usize)
        .checked_mul(rows as usize)
        .ok_or(DecodeError::DimensionsOverflow)?;
    if pixels.len() != expected {
        return Err(DecodeError::LengthMismatch {
            encoding: encoding.as_str(),
            expected,
            actual: pixels.len(),
        });
    }
    Ok(step as usize)
}

fn packed_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    step: u32,
    bpp: u32,
    encoding: Encoding,
) -> Result<Vec<u8>, DecodeError> {
    let min_step = width
        .checked_mul(bpp)
        .ok_or(DecodeError::DimensionsOverflow)?;
    let step = checked_stride(pixels, min_step, step, height, encoding)?;
    let row_bytes = min_step as usize;
    let out_len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or(DecodeError::DimensionsOverflow)?;

    let mut rgb = Vec::with_capacity(out_len);
    for row in pixels.chunks_exact(step) {
        for px in row[..row_bytes].chunks_exact(bpp as usize) {
            match encoding {
                Encoding::Rgb8 | Encoding::Rgba8 => rgb.extend_from_slice(&px[..3]),
                Encoding::Bgr8 | Encoding::Bgra8 => rgb.extend_from_slice(&[px[2], px[1], px[0]]),
                _ => rgb.extend_from_slice(&[px[0], px[0], px[0]]),
            }
        }
    }
    Ok(rgb)
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32, step: u32) -> Result<Vec<u8>, DecodeError> {
    let w = width as usize;
    let h = height as usize;
    let uv_rows = height.div_ceil(2);
    let plane_rows = height
        .checked_add(uv_rows)
        .ok_or(DecodeError::DimensionsOverflow)?;
    let stride = checked_stride(pixels, width, step, plane_rows, Encoding::Nv12)?;
    let y_plane = stride * h;

    let mut rgb = vec![0u8; w * h * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * stride + i] as f32;
            let uv_index = y_plane + (j / 2) * stride + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels.get(uv_index + 1).copied().unwrap_or(128) as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }

    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    fn header() -> FrameHeader {
        FrameHeader::new("quad1")
    }

    #[test]
    fn rgb8_frame_decodes_with_header() -> anyhow::Result<()> {
        let data: Vec<u8> = (0..12).collect();
        let payload = encode_raw(&header(), Encoding::Rgb8, 2, 2, 6, &data)?;
        let frame = decode_frame(&payload)?;
        assert_eq!(frame.header, header());
        assert_eq!(frame.image.as_raw(), &data);
        Ok(())
    }

    #[test]
    fn bgr8_channels_are_swapped() -> anyhow::Result<()> {
        let payload = encode_raw(&header(), Encoding::Bgr8, 1, 1, 3, &[10, 20, 30])?;
        let frame = decode_frame(&payload)?;
        assert_eq!(*frame.image.get_pixel(0, 0), Rgb([30, 20, 10]));
        Ok(())
    }

    #[test]
    fn row_padding_is_skipped() -> anyhow::Result<()> {
        // 1x2 mono8 with a 4 byte stride.
        let data = [7, 0xAA, 0xAA, 0xAA, 9, 0xAA, 0xAA, 0xAA];
        let payload = encode_raw(&header(), Encoding::Mono8, 1, 2, 4, &data)?;
        let frame = decode_frame(&payload)?;
        assert_eq!(*frame.image.get_pixel(0, 0), Rgb([7, 7, 7]));
        assert_eq!(*frame.image.get_pixel(0, 1), Rgb([9, 9, 9]));
        Ok(())
    }

    #[test]
    fn nv12_conversion_produces_gray() -> anyhow::Result<()> {
        let nv12 = [vec![128u8; 4], vec![128u8; 2]].concat();
        let payload = encode_raw(&header(), Encoding::Nv12, 2, 2, 2, &nv12)?;
        let frame = decode_frame(&payload)?;
        assert_eq!(frame.image.as_raw(), &vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn png_payload_decodes() -> anyhow::Result<()> {
        let source = RgbImage::from_pixel(3, 2, Rgb([1, 2, 3]));
        let mut png = Vec::new();
        source.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        let payload = encode_raw(&header(), Encoding::Png, 0, 0, 0, &png)?;
        let frame = decode_frame(&payload)?;
        assert_eq!(frame.image, source);
        Ok(())
    }

    #[test]
    fn encode_then_decode_keeps_pixels_and_header() -> anyhow::Result<()> {
        let mut h = header();
        h.seq = 42;
        h.stamp.secs = 1_700_000_000;
        h.stamp.nsecs = 5;
        let frame = Frame::new(h, RgbImage::from_pixel(5, 4, Rgb([9, 8, 7])));
        let decoded = decode_frame(&encode_frame(&frame)?)?;
        assert_eq!(decoded, frame);
        Ok(())
    }

    #[test]
    fn short_payload_is_truncated() {
        assert!(matches!(
            decode_frame(&[0, 0]),
            Err(DecodeError::Truncated { expected: 4, .. })
        ));
        let mut payload = 100u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"{}");
        assert!(matches!(
            decode_frame(&payload),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_header_is_rejected() {
        let payload = (MAX_HEADER_BYTES as u32 + 1).to_be_bytes();
        assert!(matches!(
            decode_frame(&payload),
            Err(DecodeError::HeaderTooLarge(_))
        ));
    }

    #[test]
    fn garbage_header_is_rejected() {
        let mut payload = 3u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"{{{");
        assert!(matches!(
            decode_frame(&payload),
            Err(DecodeError::InvalidHeader(_))
        ));
    }

    #[test]
    fn unknown_encoding_is_rejected() -> anyhow::Result<()> {
        let mut payload = encode_raw(&header(), Encoding::Rgb8, 1, 1, 3, &[0, 0, 0])?;
        let pos = payload
            .windows(4)
            .position(|w| w == b"rgb8")
            .expect("encoding in header");
        payload[pos..pos + 4].copy_from_slice(b"yuv9");
        assert!(matches!(
            decode_frame(&payload),
            Err(DecodeError::UnsupportedEncoding(e)) if e == "yuv9"
        ));
        Ok(())
    }

    #[test]
    fn length_mismatch_is_rejected() -> anyhow::Result<()> {
        let payload = encode_raw(&header(), Encoding::Rgb8, 2, 2, 6, &[0u8; 11])?;
        assert!(matches!(
            decode_frame(&payload),
            Err(DecodeError::LengthMismatch {
                expected: 12,
                actual: 11,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn short_stride_is_rejected() -> anyhow::Result<()> {
        let payload = encode_raw(&header(), Encoding::Rgb8, 2, 1, 5, &[0u8; 5])?;
        assert!(matches!(
            decode_frame(&payload),
            Err(DecodeError::StepTooSmall { step: 5, min: 6 })
        ));
        Ok(())
    }

    #[test]
    fn zero_sized_frame_is_rejected() -> anyhow::Result<()> {
        let payload = encode_raw(&header(), Encoding::Rgb8, 0, 4, 0, &[])?;
        assert!(matches!(decode_frame(&payload), Err(DecodeError::EmptyImage)));
        Ok(())
    }

    #[test]
    fn corrupt_jpeg_is_rejected() -> anyhow::Result<()> {
        let payload = encode_raw(&header(), Encoding::Jpeg, 0, 0, 0, b"not a jpeg")?;
        assert!(matches!(
            decode_frame(&payload),
            Err(DecodeError::Compressed(_))
        ));
        Ok(())
    }
}
