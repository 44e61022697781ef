//! Binary patch files (`SGP1`).
//!
//! Layout, all little-endian:
//! - `[0..4]`   magic `SGP1`
//! - `[4..8]`   format version (u32, currently 1)
//! - `[8..12]`  image channels (u32)
//! - `[12..16]` height (u32)
//! - `[16..20]` width (u32)
//! - `[20..24]` label channels (u32, must be 1)
//! - `[24..32]` reserved
//! - image as f32 CHW, followed by the label plane as f32 HW.

use crate::types::{BurnDatasetError, DatasetResult, PatchSample};
use std::fs;
use std::path::Path;

pub const PATCH_MAGIC: &[u8; 4] = b"SGP1";
pub const PATCH_VERSION: u32 = 1;
pub const PATCH_HEADER_LEN: usize = 32;

fn read_u32_le(data: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(data);
    u32::from_le_bytes(arr)
}

fn malformed(path: &Path, msg: impl Into<String>) -> BurnDatasetError {
    BurnDatasetError::Malformed {
        path: path.to_path_buf(),
        msg: msg.into(),
    }
}

pub fn read_patch(path: &Path) -> DatasetResult<PatchSample> {
    let data = fs::read(path).map_err(|e| BurnDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    decode_patch(path, &data)
}

pub fn decode_patch(path: &Path, data: &[u8]) -> DatasetResult<PatchSample> {
    if data.len() < PATCH_HEADER_LEN {
        return Err(malformed(path, "file shorter than header"));
    }
    if &data[0..4] != PATCH_MAGIC {
        return Err(malformed(path, "bad magic"));
    }
    let version = read_u32_le(&data[4..8]);
    if version != PATCH_VERSION {
        return Err(malformed(path, format!("unsupported version {version}")));
    }
    let channels = read_u32_le(&data[8..12]) as usize;
    let height = read_u32_le(&data[12..16]) as usize;
    let width = read_u32_le(&data[16..20]) as usize;
    let label_channels = read_u32_le(&data[20..24]);
    if label_channels != 1 {
        return Err(malformed(
            path,
            format!("expected 1 label channel, found {label_channels}"),
        ));
    }

    let plane = height
        .checked_mul(width)
        .ok_or_else(|| malformed(path, "overflow computing plane size"))?;
    let image_elems = plane
        .checked_mul(channels)
        .ok_or_else(|| malformed(path, "overflow computing image elems"))?;
    let image_bytes = image_elems * std::mem::size_of::<f32>();
    let label_bytes = plane * std::mem::size_of::<f32>();
    let expected_len = PATCH_HEADER_LEN + image_bytes + label_bytes;
    if data.len() != expected_len {
        return Err(malformed(
            path,
            format!("expected {expected_len} bytes, found {}", data.len()),
        ));
    }

    let to_f32s = |bytes: &[u8]| -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| {
                let mut arr = [0u8; 4];
                arr.copy_from_slice(c);
                f32::from_le_bytes(arr)
            })
            .collect()
    };
    let image_end = PATCH_HEADER_LEN + image_bytes;
    let image = to_f32s(&data[PATCH_HEADER_LEN..image_end]);
    let label = to_f32s(&data[image_end..]);

    Ok(PatchSample {
        id: path.display().to_string(),
        channels,
        height,
        width,
        image,
        label,
    })
}

pub fn encode_patch(sample: &PatchSample) -> DatasetResult<Vec<u8>> {
    sample
        .check_buffers()
        .map_err(|msg| BurnDatasetError::Other(format!("cannot encode {}: {msg}", sample.id)))?;
    let mut out = Vec::with_capacity(
        PATCH_HEADER_LEN + (sample.image.len() + sample.label.len()) * std::mem::size_of::<f32>(),
    );
    out.extend_from_slice(PATCH_MAGIC);
    for v in [
        PATCH_VERSION,
        sample.channels as u32,
        sample.height as u32,
        sample.width as u32,
        1,
    ] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&[0u8; 8]);
    for v in sample.image.iter().chain(sample.label.iter()) {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Ok(out)
}

/// Writes a patch file, creating parent directories as needed.
pub fn write_patch(path: &Path, sample: &PatchSample) -> DatasetResult<()> {
    let bytes = encode_patch(sample)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BurnDatasetError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    fs::write(path, bytes).map_err(|e| BurnDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PatchSample {
        PatchSample {
            id: "p".into(),
            channels: 2,
            height: 2,
            width: 3,
            image: (0..12).map(|v| v as f32 * 0.5).collect(),
            label: vec![0.0, 1.0, 2.0, 2.0, 1.0, 0.0],
        }
    }

    #[test]
    fn truncated_patch_rejected() {
        let bytes = encode_patch(&sample()).unwrap();
        let err = decode_patch(Path::new("t.sgp"), &bytes[..bytes.len() - 4]).unwrap_err();
        assert!(matches!(err, BurnDatasetError::Malformed { .. }));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = encode_patch(&sample()).unwrap();
        bytes[0] = b'X';
        let err = decode_patch(Path::new("m.sgp"), &bytes).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn decoded_patch_keeps_layout() {
        let bytes = encode_patch(&sample()).unwrap();
        let decoded = decode_patch(Path::new("ok.sgp"), &bytes).unwrap();
        assert_eq!(decoded.dims(), (2, 2, 3));
        assert_eq!(decoded.image[5], 2.5);
        assert_eq!(decoded.label, sample().label);
        assert_eq!(decoded.id, "ok.sgp");
    }

    #[test]
    fn mismatched_buffers_not_encoded() {
        let mut bad = sample();
        bad.label.pop();
        assert!(encode_patch(&bad).is_err());
    }
}
