// src/encode/metadata.rs - EXIF-like auxiliary metadata block
//
// Core features:
// - Structured tag/value records: device identifiers, timestamps,
//   exposure/gain pulled from capture metadata
// - Compact little-endian framing, attached to the result as a separate
//   buffer (not embedded in the JPEG stream)
// - Synthesis failure is non-fatal for the frame

use bytes::Bytes;

use crate::core::error::{Error, Result};
use crate::core::frame::CaptureMetadata;

const MAGIC: &[u8; 4] = b"FSX1";

// Tag ids follow the EXIF/TIFF numbering where one exists.
pub const TAG_MAKE: u16 = 0x010F;
pub const TAG_MODEL: u16 = 0x0110;
pub const TAG_TIMESTAMP_US: u16 = 0x0132;
pub const TAG_EXPOSURE_US: u16 = 0x829A;
pub const TAG_GAIN_MILLI: u16 = 0x8827;
pub const TAG_SEQUENCE: u16 = 0xA420;
pub const TAG_SENSOR_TS_US: u16 = 0x9290;

enum TagValue {
    Ascii(String),
    U64(u64),
    I64(i64),
}

fn push_record(out: &mut Vec<u8>, tag: u16, value: TagValue) -> Result<()> {
    out.extend_from_slice(&tag.to_le_bytes());
    match value {
        TagValue::Ascii(s) => {
            let bytes = s.as_bytes();
            let len = u16::try_from(bytes.len())
                .map_err(|_| Error::Metadata(format!("tag {:#06x} value too long", tag)))?;
            out.push(1);
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(bytes);
        }
        TagValue::U64(v) => {
            out.push(2);
            out.extend_from_slice(&8u16.to_le_bytes());
            out.extend_from_slice(&v.to_le_bytes());
        }
        TagValue::I64(v) => {
            out.push(3);
            out.extend_from_slice(&8u16.to_le_bytes());
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    Ok(())
}

/// Build the auxiliary block for one frame.
///
/// `timestamp_us` is the frame's capture timestamp. Optional capture fields
/// produce no record when absent.
pub(crate) fn synthesize(meta: &CaptureMetadata, timestamp_us: i64, seq: u64) -> Result<Bytes> {
    let mut out = Vec::with_capacity(96);
    out.extend_from_slice(MAGIC);
    // Record count back-patched below.
    out.extend_from_slice(&0u16.to_le_bytes());

    let mut count: u16 = 0;
    let mut add = |out: &mut Vec<u8>, tag, value| -> Result<()> {
        push_record(out, tag, value)?;
        count += 1;
        Ok(())
    };

    if let Some(make) = &meta.device_make {
        add(&mut out, TAG_MAKE, TagValue::Ascii(make.clone()))?;
    }
    if let Some(model) = &meta.device_model {
        add(&mut out, TAG_MODEL, TagValue::Ascii(model.clone()))?;
    }
    add(&mut out, TAG_TIMESTAMP_US, TagValue::I64(timestamp_us))?;
    add(&mut out, TAG_SEQUENCE, TagValue::U64(seq))?;
    if let Some(exposure) = meta.exposure_time_us {
        add(&mut out, TAG_EXPOSURE_US, TagValue::U64(exposure))?;
    }
    if let Some(gain) = meta.analogue_gain {
        if !gain.is_finite() || gain < 0.0 {
            return Err(Error::Metadata(format!("non-finite gain {gain}")));
        }
        add(&mut out, TAG_GAIN_MILLI, TagValue::U64((gain * 1000.0) as u64))?;
    }
    if let Some(ts) = meta.sensor_timestamp_us {
        add(&mut out, TAG_SENSOR_TS_US, TagValue::I64(ts))?;
    }

    out[4..6].copy_from_slice(&count.to_le_bytes());
    Ok(Bytes::from(out))
}
