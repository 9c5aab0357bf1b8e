// src/encode/transform.rs - Geometric transforms on planar YUV 4:2:0
//
// Core features:
// - Crop with offsets and sizes rounded to even, keeping chroma sampling valid
// - Rotation by multiples of 90 degrees plus horizontal/vertical flip
// - Box-filter downscale for the preview rendition, in its own buffer
// - Explicit stride arithmetic; chroma planes are half resolution in each
//   dimension with half the luma stride

use crate::core::config::{CropRegion, Rotation};
use crate::core::error::{Error, Result};
use crate::core::frame::{planar_size, RawFrame};

/// Row alignment of the preview buffer's luma stride.
const PREVIEW_STRIDE_ALIGN: u32 = 64;

/// Borrowed view over the three planes of a 4:2:0 buffer.
#[derive(Clone, Copy)]
pub(crate) struct YuvView<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Luma row stride; chroma rows use `stride / 2`.
    pub stride: u32,
}

impl<'a> YuvView<'a> {
    /// Split a frame's buffer into plane views. Geometry must already have
    /// been validated via `RawFrame::check_geometry`.
    pub fn from_frame(frame: &'a RawFrame) -> Self {
        Self::from_planar(
            frame.data(),
            frame.width(),
            frame.height(),
            frame.stride(),
        )
    }

    pub fn from_planar(data: &'a [u8], width: u32, height: u32, stride: u32) -> Self {
        let luma = stride as usize * height as usize;
        let chroma = (stride as usize / 2) * (height as usize / 2);
        Self {
            y: &data[..luma],
            u: &data[luma..luma + chroma],
            v: &data[luma + chroma..luma + 2 * chroma],
            width,
            height,
            stride,
        }
    }

    pub fn chroma_stride(&self) -> u32 {
        self.stride / 2
    }
}

/// Owned planar 4:2:0 buffer produced by a transform stage.
pub(crate) struct YuvBuffer {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

impl YuvBuffer {
    fn new(width: u32, height: u32, stride: u32) -> Self {
        Self {
            data: vec![0u8; planar_size(stride, height)],
            width,
            height,
            stride,
        }
    }

    pub fn view(&self) -> YuvView<'_> {
        YuvView::from_planar(&self.data, self.width, self.height, self.stride)
    }

    /// Mutable plane slices: (Y, U, V).
    fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let luma = self.stride as usize * self.height as usize;
        let chroma = (self.stride as usize / 2) * (self.height as usize / 2);
        let (y, rest) = self.data.split_at_mut(luma);
        let (u, v) = rest.split_at_mut(chroma);
        (y, u, v)
    }
}

/// Round down to an even value, with a floor of `min`.
fn even_floor(v: u32, min: u32) -> u32 {
    (v & !1).max(min)
}

/// Crop to a region of the source, offsets and sizes rounded to even.
///
/// The region is clamped to the source bounds; a region that degenerates to
/// zero pixels is rejected as malformed input.
pub(crate) fn crop(src: &YuvView<'_>, region: CropRegion) -> Result<YuvBuffer> {
    if region.width == 0 || region.height == 0 {
        return Err(Error::InvalidFrame(format!(
            "empty crop region {}x{}",
            region.width, region.height
        )));
    }
    if src.width < 2 || src.height < 2 {
        return Err(Error::InvalidFrame(format!(
            "source {}x{} too small to crop",
            src.width, src.height
        )));
    }

    // Even offsets keep the chroma co-siting valid; even sizes keep the
    // half-resolution planes whole.
    let x = (region.x & !1).min(src.width - 2);
    let y = (region.y & !1).min(src.height - 2);
    let w = even_floor(region.width.min(src.width - x), 2);
    let h = even_floor(region.height.min(src.height - y), 2);

    let mut out = YuvBuffer::new(w, h, w);
    let src_cs = src.chroma_stride() as usize;
    let dst_cs = (w / 2) as usize;
    let (dy, du, dv) = out.planes_mut();

    for row in 0..h as usize {
        let src_off = (y as usize + row) * src.stride as usize + x as usize;
        dy[row * w as usize..(row + 1) * w as usize]
            .copy_from_slice(&src.y[src_off..src_off + w as usize]);
    }
    for row in 0..(h / 2) as usize {
        let src_off = ((y / 2) as usize + row) * src_cs + (x / 2) as usize;
        du[row * dst_cs..(row + 1) * dst_cs].copy_from_slice(&src.u[src_off..src_off + dst_cs]);
        dv[row * dst_cs..(row + 1) * dst_cs].copy_from_slice(&src.v[src_off..src_off + dst_cs]);
    }

    Ok(out)
}

/// Copy one plane through a rotation + flip mapping.
///
/// `(dw, dh)` are the destination plane dimensions; the source dimensions
/// follow from the rotation.
fn orient_plane(
    src: &[u8],
    sw: usize,
    sh: usize,
    s_stride: usize,
    dst: &mut [u8],
    dw: usize,
    dh: usize,
    d_stride: usize,
    rotation: Rotation,
    hflip: bool,
    vflip: bool,
) {
    for dy in 0..dh {
        for dx in 0..dw {
            // Undo the flips on the destination coordinate, then map back
            // through the rotation to the source coordinate.
            let ix = if hflip { dw - 1 - dx } else { dx };
            let iy = if vflip { dh - 1 - dy } else { dy };
            let (sx, sy) = match rotation {
                Rotation::None => (ix, iy),
                Rotation::R90 => (iy, sh - 1 - ix),
                Rotation::R180 => (sw - 1 - ix, sh - 1 - iy),
                Rotation::R270 => (sw - 1 - iy, ix),
            };
            dst[dy * d_stride + dx] = src[sy * s_stride + sx];
        }
    }
}

/// Rotate by a multiple of 90 degrees and/or mirror the image.
pub(crate) fn orient(
    src: &YuvView<'_>,
    rotation: Rotation,
    hflip: bool,
    vflip: bool,
) -> YuvBuffer {
    let (dw, dh) = match rotation {
        Rotation::None | Rotation::R180 => (src.width, src.height),
        Rotation::R90 | Rotation::R270 => (src.height, src.width),
    };

    let mut out = YuvBuffer::new(dw, dh, dw);
    let s_cs = src.chroma_stride() as usize;
    let d_cs = (dw / 2) as usize;
    let (dy, du, dv) = out.planes_mut();

    orient_plane(
        src.y,
        src.width as usize,
        src.height as usize,
        src.stride as usize,
        dy,
        dw as usize,
        dh as usize,
        dw as usize,
        rotation,
        hflip,
        vflip,
    );
    orient_plane(
        src.u,
        (src.width / 2) as usize,
        (src.height / 2) as usize,
        s_cs,
        du,
        (dw / 2) as usize,
        (dh / 2) as usize,
        d_cs,
        rotation,
        hflip,
        vflip,
    );
    orient_plane(
        src.v,
        (src.width / 2) as usize,
        (src.height / 2) as usize,
        s_cs,
        dv,
        (dw / 2) as usize,
        (dh / 2) as usize,
        d_cs,
        rotation,
        hflip,
        vflip,
    );

    out
}

/// Average one `factor`-sized block of a plane, clamped to the plane bounds.
fn box_average(
    plane: &[u8],
    stride: usize,
    w: usize,
    h: usize,
    x0: usize,
    y0: usize,
    factor: usize,
) -> u8 {
    let mut sum = 0u32;
    let mut count = 0u32;
    for y in y0..(y0 + factor).min(h) {
        for x in x0..(x0 + factor).min(w) {
            sum += plane[y * stride + x] as u32;
            count += 1;
        }
    }
    if count == 0 {
        0
    } else {
        (sum / count) as u8
    }
}

/// Downscale by an integer factor with a box filter, producing the preview
/// rendition in a separate, stride-aligned buffer.
pub(crate) fn downscale(src: &YuvView<'_>, factor: u32) -> Result<YuvBuffer> {
    if factor == 0 {
        return Err(Error::InvalidFrame("zero downsample factor".to_string()));
    }
    let dw = even_floor(src.width / factor, 0);
    let dh = even_floor(src.height / factor, 0);
    if dw < 2 || dh < 2 {
        return Err(Error::InvalidFrame(format!(
            "downsample by {} of {}x{} leaves no pixels",
            factor, src.width, src.height
        )));
    }

    let d_stride = dw.next_multiple_of(PREVIEW_STRIDE_ALIGN);
    let mut out = YuvBuffer::new(dw, dh, d_stride);

    let f = factor as usize;
    let s_cs = src.chroma_stride() as usize;
    let d_cs = (d_stride / 2) as usize;
    let (sw, sh) = (src.width as usize, src.height as usize);
    let (scw, sch) = (sw / 2, sh / 2);
    let (dy_plane, du_plane, dv_plane) = out.planes_mut();

    for dy in 0..dh as usize {
        for dx in 0..dw as usize {
            dy_plane[dy * d_stride as usize + dx] =
                box_average(src.y, src.stride as usize, sw, sh, dx * f, dy * f, f);
        }
    }
    for dy in 0..(dh / 2) as usize {
        for dx in 0..(dw / 2) as usize {
            du_plane[dy * d_cs + dx] = box_average(src.u, s_cs, scw, sch, dx * f, dy * f, f);
            dv_plane[dy * d_cs + dx] = box_average(src.v, s_cs, scw, sch, dx * f, dy * f, f);
        }
    }

    Ok(out)
}
