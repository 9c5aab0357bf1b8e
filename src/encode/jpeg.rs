// src/encode/jpeg.rs - Compress a planar YUV view to a JPEG byte stream
//
// Core features:
// - Stride-aware BT.601 YUV 4:2:0 -> RGB conversion in integer math
// - Source row/column clamping so subsampled chroma lookups never read past
//   the last valid row
// - Baseline JPEG via the `image` codec at a configurable quality

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::core::error::Result;
use crate::encode::transform::YuvView;

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert a planar 4:2:0 view to packed RGB24.
///
/// Uses the BT.601 studio-swing matrix in 8.8 fixed point. Chroma indices
/// are clamped to the plane bounds, which keeps the final rows of
/// odd-geometry sources safe without special-casing.
pub(crate) fn yuv420_to_rgb(src: &YuvView<'_>) -> Vec<u8> {
    let w = src.width as usize;
    let h = src.height as usize;
    let stride = src.stride as usize;
    let c_stride = src.chroma_stride() as usize;
    let c_w = w / 2;
    let c_h = h / 2;

    let mut rgb = vec![0u8; w * h * 3];
    for y in 0..h {
        let cy = (y / 2).min(c_h.saturating_sub(1));
        for x in 0..w {
            let cx = (x / 2).min(c_w.saturating_sub(1));
            let yv = src.y[y * stride + x] as i32;
            let uv = src.u[cy * c_stride + cx] as i32 - 128;
            let vv = src.v[cy * c_stride + cx] as i32 - 128;

            let c = (yv - 16).max(0) * 298;
            let r = (c + 409 * vv + 128) >> 8;
            let g = (c - 100 * uv - 208 * vv + 128) >> 8;
            let b = (c + 516 * uv + 128) >> 8;

            let off = (y * w + x) * 3;
            rgb[off] = clamp_u8(r);
            rgb[off + 1] = clamp_u8(g);
            rgb[off + 2] = clamp_u8(b);
        }
    }
    rgb
}

/// Compress one rendition to a JPEG byte stream.
pub(crate) fn compress(src: &YuvView<'_>, quality: u8) -> Result<Bytes> {
    let rgb = yuv420_to_rgb(src);
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder.encode(&rgb, src.width, src.height, ExtendedColorType::Rgb8)?;
    Ok(Bytes::from(out))
}
