//! Per-pixel radiance accumulator and the 8-bit preview framebuffer.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use strata_math::DVec3;

/// HDR sample accumulator: row-major (r, g, b) f64 triples plus a parallel
/// per-pixel sample counter.
///
/// Accumulators store the *sum* of all samples; divide by the pixel's SPP
/// for the display value. Values are kept in `AtomicU64` bit patterns so a
/// worker can write its pixels while other threads read for snapshots; the
/// render scheduler guarantees one writer per pixel per pass, so plain
/// load/store ordering is sufficient.
pub struct SampleBuffer {
    width: u32,
    height: u32,
    samples: Vec<AtomicU64>,
    spp: Vec<AtomicU32>,
}

impl SampleBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = (width as usize) * (height as usize);
        Self {
            width,
            height,
            samples: (0..pixels * 3).map(|_| AtomicU64::new(0)).collect(),
            spp: (0..pixels).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    #[inline]
    fn base(&self, x: u32, y: u32) -> usize {
        ((y * self.width + x) * 3) as usize
    }

    /// Add one sample to the pixel's running sum. Non-finite and negative
    /// components are clamped to zero before the write.
    pub fn add_sample(&self, x: u32, y: u32, sample: DVec3) {
        let i = self.base(x, y);
        for (offset, component) in [sample.x, sample.y, sample.z].into_iter().enumerate() {
            let component = if component.is_finite() {
                component.max(0.0)
            } else {
                0.0
            };
            let cell = &self.samples[i + offset];
            let sum = f64::from_bits(cell.load(Ordering::Relaxed)) + component;
            cell.store(sum.to_bits(), Ordering::Relaxed);
        }
        self.spp[(y * self.width + x) as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Overwrite a pixel's accumulated sum and count.
    pub fn set_pixel(&self, x: u32, y: u32, sum: DVec3, spp: u32) {
        let i = self.base(x, y);
        self.samples[i].store(sum.x.to_bits(), Ordering::Relaxed);
        self.samples[i + 1].store(sum.y.to_bits(), Ordering::Relaxed);
        self.samples[i + 2].store(sum.z.to_bits(), Ordering::Relaxed);
        self.spp[(y * self.width + x) as usize].store(spp, Ordering::Relaxed);
    }

    /// The accumulated sum for a pixel.
    pub fn get(&self, x: u32, y: u32) -> DVec3 {
        let i = self.base(x, y);
        DVec3::new(
            f64::from_bits(self.samples[i].load(Ordering::Relaxed)),
            f64::from_bits(self.samples[i + 1].load(Ordering::Relaxed)),
            f64::from_bits(self.samples[i + 2].load(Ordering::Relaxed)),
        )
    }

    pub fn spp_at(&self, x: u32, y: u32) -> u32 {
        self.spp[(y * self.width + x) as usize].load(Ordering::Relaxed)
    }

    /// Mean radiance (sum / SPP); zero for unsampled pixels.
    pub fn mean(&self, x: u32, y: u32) -> DVec3 {
        let n = self.spp_at(x, y);
        if n == 0 {
            DVec3::ZERO
        } else {
            self.get(x, y) / n as f64
        }
    }

    /// Zero all accumulators and counters.
    pub fn clear(&self) {
        for cell in &self.samples {
            cell.store(0, Ordering::Relaxed);
        }
        for cell in &self.spp {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Snapshot the raw sums, row-major rgb triples (for dumps).
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.samples
            .iter()
            .map(|cell| f64::from_bits(cell.load(Ordering::Relaxed)))
            .collect()
    }

    /// Load raw sums and a uniform per-pixel SPP (dump restore).
    pub fn load_f64(&self, data: &[f64], spp: u32) {
        debug_assert_eq!(data.len(), self.samples.len());
        for (cell, value) in self.samples.iter().zip(data) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }
        for cell in &self.spp {
            cell.store(spp, Ordering::Relaxed);
        }
    }

    pub fn total_spp(&self) -> u64 {
        self.spp
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed) as u64)
            .sum()
    }
}

/// Double-buffered 32-bit ARGB preview.
///
/// Only the back buffer is ever written; `swap` flips the pair in one move.
pub struct PreviewBuffer {
    width: u32,
    height: u32,
    front: Vec<u32>,
    back: Vec<u32>,
}

impl PreviewBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = (width as usize) * (height as usize);
        Self {
            width,
            height,
            front: vec![0xFF00_0000; pixels],
            back: vec![0xFF00_0000; pixels],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set_back(&mut self, x: u32, y: u32, argb: u32) {
        self.back[(y * self.width + x) as usize] = argb;
    }

    pub fn back_mut(&mut self) -> &mut [u32] {
        &mut self.back
    }

    pub fn back(&self) -> &[u32] {
        &self.back
    }

    /// The displayable front buffer.
    pub fn front(&self) -> &[u32] {
        &self.front
    }

    /// Flip front and back.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
    }
}

/// Pack linear [0, 1] components into ARGB.
pub fn argb(r: f64, g: f64, b: f64) -> u32 {
    let to8 = |v: f64| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
    0xFF00_0000 | (to8(r) << 16) | (to8(g) << 8) | to8(b)
}
