//! Render-dump persistence: the per-pixel radiance sums and SPP counter.
//!
//! Primary format, big-endian: magic `DUMP`, u32 version = 1, u32 width,
//! u32 height, u32 spp, i64 render time in milliseconds, then width*height
//! f64 RGB triples in row-major order.
//!
//! The legacy format has no magic: the entire stream is gzipped and holds
//! the same header fields (minus magic/version) followed by the same body.
//! The loader peeks the first four bytes to dispatch.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use thiserror::Error;

use strata_core::Scene;

pub const DUMP_MAGIC: [u8; 4] = *b"DUMP";
const DUMP_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("unsupported dump version {0}")]
    UnsupportedVersion(u32),
    #[error("dump dimensions {found_width}x{found_height} do not match scene {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        found_width: u32,
        found_height: u32,
    },
    #[error("dump is truncated or corrupt")]
    Corrupt,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// In-memory render dump.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderDump {
    pub width: u32,
    pub height: u32,
    pub spp: u32,
    pub render_time_ms: i64,
    /// Row-major RGB sample sums, `width * height * 3` values.
    pub samples: Vec<f64>,
}

impl RenderDump {
    /// An all-zero dump of the given dimensions.
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            spp: 0,
            render_time_ms: 0,
            samples: vec![0.0; (width as usize) * (height as usize) * 3],
        }
    }

    /// Snapshot the scene's sample buffer.
    pub fn from_scene(scene: &Scene) -> Self {
        Self {
            width: scene.width(),
            height: scene.height(),
            spp: scene.spp,
            render_time_ms: scene.render_time_ms as i64,
            samples: scene.sample_buffer().to_f64_vec(),
        }
    }

    /// Restore this dump into the scene. Rejects mismatched dimensions.
    pub fn apply(&self, scene: &mut Scene) -> Result<(), DumpError> {
        if self.width != scene.width() || self.height != scene.height() {
            return Err(DumpError::DimensionMismatch {
                expected_width: scene.width(),
                expected_height: scene.height(),
                found_width: self.width,
                found_height: self.height,
            });
        }
        scene.sample_buffer().load_f64(&self.samples, self.spp);
        scene.spp = self.spp;
        scene.render_time_ms = self.render_time_ms.max(0) as u64;
        Ok(())
    }

    /// Write the versioned format.
    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&DUMP_MAGIC)?;
        out.write_all(&DUMP_VERSION.to_be_bytes())?;
        out.write_all(&self.width.to_be_bytes())?;
        out.write_all(&self.height.to_be_bytes())?;
        out.write_all(&self.spp.to_be_bytes())?;
        out.write_all(&self.render_time_ms.to_be_bytes())?;
        for value in &self.samples {
            out.write_all(&value.to_be_bytes())?;
        }
        Ok(())
    }

    /// Read a dump, dispatching between the versioned and the legacy
    /// gzipped format by peeking the magic.
    pub fn read<R: Read>(input: &mut R) -> Result<Self, DumpError> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if magic == DUMP_MAGIC {
            let version = read_u32(input)?;
            if version != DUMP_VERSION {
                return Err(DumpError::UnsupportedVersion(version));
            }
            Self::read_body(input)
        } else {
            // Legacy stream: unread the peeked bytes and re-route through
            // the gzip decoder.
            let chained = io::Cursor::new(magic).chain(input);
            let mut decoder = GzDecoder::new(chained);
            Self::read_body(&mut decoder)
        }
    }

    fn read_body<R: Read>(input: &mut R) -> Result<Self, DumpError> {
        let width = read_u32(input)?;
        let height = read_u32(input)?;
        let spp = read_u32(input)?;
        let render_time_ms = read_i64(input)?;
        if width == 0 || height == 0 || (width as u64) * (height as u64) > (1 << 32) {
            return Err(DumpError::Corrupt);
        }
        let count = (width as usize) * (height as usize) * 3;
        let mut samples = Vec::with_capacity(count);
        let mut buf = [0u8; 8];
        for _ in 0..count {
            input.read_exact(&mut buf).map_err(|_| DumpError::Corrupt)?;
            samples.push(f64::from_be_bytes(buf));
        }
        Ok(Self {
            width,
            height,
            spp,
            render_time_ms,
            samples,
        })
    }

    /// Combine two dumps of matching dimensions. Sample sums add, so the
    /// merged mean is the SPP-weighted mean of the inputs; SPP and render
    /// time accumulate.
    pub fn merge(a: &RenderDump, b: &RenderDump) -> Result<RenderDump, DumpError> {
        if a.width != b.width || a.height != b.height {
            return Err(DumpError::DimensionMismatch {
                expected_width: a.width,
                expected_height: a.height,
                found_width: b.width,
                found_height: b.height,
            });
        }
        let samples = a
            .samples
            .iter()
            .zip(&b.samples)
            .map(|(x, y)| x + y)
            .collect();
        Ok(RenderDump {
            width: a.width,
            height: a.height,
            spp: a.spp + b.spp,
            render_time_ms: a.render_time_ms + b.render_time_ms,
            samples,
        })
    }
}

fn read_u32<R: Read>(input: &mut R) -> Result<u32, DumpError> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_i64<R: Read>(input: &mut R) -> Result<i64, DumpError> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

/// Write a legacy gzipped dump (used by tests and by external tooling that
/// still reads the old format).
pub fn write_legacy<W: Write>(dump: &RenderDump, out: &mut W) -> io::Result<()> {
    let mut encoder = flate2::write::GzEncoder::new(out, flate2::Compression::default());
    encoder.write_all(&dump.width.to_be_bytes())?;
    encoder.write_all(&dump.height.to_be_bytes())?;
    encoder.write_all(&dump.spp.to_be_bytes())?;
    encoder.write_all(&dump.render_time_ms.to_be_bytes())?;
    for value in &dump.samples {
        encoder.write_all(&value.to_be_bytes())?;
    }
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dump() -> RenderDump {
        let mut dump = RenderDump::empty(8, 6);
        dump.spp = 10;
        dump.render_time_ms = 4321;
        for (i, v) in dump.samples.iter_mut().enumerate() {
            *v = i as f64 * 0.125;
        }
        dump
    }

    #[test]
    fn test_versioned_roundtrip_bitwise() {
        let dump = sample_dump();
        let mut bytes = Vec::new();
        dump.write(&mut bytes).unwrap();
        assert_eq!(&bytes[0..4], b"DUMP");

        let loaded = RenderDump::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded, dump);
    }

    #[test]
    fn test_legacy_roundtrip() {
        let dump = sample_dump();
        let mut bytes = Vec::new();
        write_legacy(&dump, &mut bytes).unwrap();
        // Legacy streams start with the gzip magic, not "DUMP".
        assert_ne!(&bytes[0..4], b"DUMP");

        let loaded = RenderDump::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded, dump);
    }

    #[test]
    fn test_merge_identity() {
        let dump = sample_dump();
        let merged = RenderDump::merge(&dump, &RenderDump::empty(8, 6)).unwrap();
        assert_eq!(merged, dump);
    }

    #[test]
    fn test_merge_accumulates() {
        let a = sample_dump();
        let b = sample_dump();
        let merged = RenderDump::merge(&a, &b).unwrap();
        assert_eq!(merged.spp, 20);
        assert_eq!(merged.render_time_ms, 8642);
        assert_eq!(merged.samples[3], a.samples[3] * 2.0);
    }

    #[test]
    fn test_merge_dimension_mismatch() {
        let a = sample_dump();
        let b = RenderDump::empty(4, 4);
        assert!(matches!(
            RenderDump::merge(&a, &b),
            Err(DumpError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_apply_rejects_wrong_dims() {
        let dump = sample_dump();
        let mut scene = Scene::new("dims");
        scene.set_canvas_size(100, 100);
        assert!(matches!(
            dump.apply(&mut scene),
            Err(DumpError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_apply_restores_buffer() {
        let mut scene = Scene::new("restore");
        scene.set_canvas_size(20, 20);
        let mut dump = RenderDump::empty(20, 20);
        dump.spp = 5;
        dump.samples[0] = 1.5;
        dump.apply(&mut scene).unwrap();
        assert_eq!(scene.spp, 5);
        assert_eq!(scene.sample_buffer().get(0, 0).x, 1.5);
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"DUMP");
        bytes.extend_from_slice(&7u32.to_be_bytes());
        assert!(matches!(
            RenderDump::read(&mut bytes.as_slice()),
            Err(DumpError::UnsupportedVersion(7))
        ));
    }
}
