//! Tileable blue noise for dithering the ray march.
//!
//! Banding is the typical artifact of marching with a few dozen steps. Offsetting
//! every pixel's samples by a blue-noise value trades the bands for
//! high-frequency grain that the depth-aware blur removes afterwards.
//!
//! [`BlueNoise`] is generated with the void-and-cluster method on a torus, so
//! the tile repeats seamlessly, or loaded from a pre-baked image. The same
//! lookup functions are implemented in `volumetric.wgsl`; the CPU versions
//! here back the reference kernel in [`raymarch`](crate::raymarch).

use std::path::Path;

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::error::{Result, VolumetricError};
use crate::gpu::GpuContext;

/// Rotation applied to the pixel grid before lookup.
const GRID_ROTATION: f32 = std::f32::consts::FRAC_PI_4;
/// Frames per second assumed by the temporal offset.
const NOISE_FRAME_RATE: f32 = 60.0;
/// Per-frame shift of the tile, in pixels.
const FRAME_SHIFT: Vec2 = Vec2::new(13.0, 7.0);
/// Offset (in tile UV) of the second decorrelating lookup.
const SECOND_TAP: Vec2 = Vec2::new(0.31, 0.57);
/// Standard deviation of the void-and-cluster energy filter.
const SIGMA: f32 = 1.5;

/// A square, tileable blue-noise tile with values in `[0, 1)`.
#[derive(Clone, Debug, PartialEq)]
pub struct BlueNoise {
    size: u32,
    values: Vec<f32>,
}

impl BlueNoise {
    /// Generates a `size` x `size` tile with void-and-cluster.
    ///
    /// The result is deterministic for a given seed. Generation is quadratic in
    /// the pixel count; 64 x 64 takes a few milliseconds in release builds.
    pub fn generate(size: u32, seed: u64) -> Self {
        let size = size.max(2);
        let ranks = VoidAndCluster::new(size as usize, seed).ranks();
        let count = ranks.len() as f32;
        let values = ranks.into_iter().map(|r| (r as f32 + 0.5) / count).collect();
        Self { size, values }
    }

    /// Loads a tile from an image file, using its red channel.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let img = image::open(path)?;
        Self::from_image(&img)
    }

    /// Builds a tile from a decoded image, using its red channel.
    pub fn from_image(img: &image::DynamicImage) -> Result<Self> {
        let luma = img.to_rgba8();
        let (width, height) = luma.dimensions();
        if width != height || width == 0 {
            return Err(VolumetricError::NoiseDimensions { width, height });
        }
        let values = luma.pixels().map(|p| p.0[0] as f32 / 256.0).collect();
        Ok(Self {
            size: width,
            values,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at integer coordinates, wrapping in both directions.
    pub fn value(&self, x: i64, y: i64) -> f32 {
        let n = self.size as i64;
        let x = x.rem_euclid(n) as usize;
        let y = y.rem_euclid(n) as usize;
        self.values[y * self.size as usize + x]
    }

    /// Value at the pixel containing `position`.
    pub fn sample(&self, position: Vec2) -> f32 {
        let p = position.floor();
        self.value(p.x as i64, p.y as i64)
    }

    /// Temporal dither value for a screen position.
    ///
    /// The pixel grid is rotated, shifted per frame, and two decorrelated taps
    /// are averaged.
    pub fn dither(&self, screen: Vec2, time: f32) -> f32 {
        let pixel = rotated_grid(screen).floor();
        let frame = (time * NOISE_FRAME_RATE).floor();
        let p = pixel + FRAME_SHIFT * frame;
        let a = self.sample(p);
        let b = self.sample(p + SECOND_TAP * self.size as f32);
        (a + b) * 0.5
    }

    /// Jitter in `[0, 1)` for step `index` of a march, mixing three frequencies.
    pub fn march_offset(&self, screen: Vec2, depth: f32, index: f32, time: f32) -> f32 {
        let base = self.dither(screen, time);
        let detail = self.dither(screen * 1.7 + Vec2::splat(index * 0.13), time);
        let depth_term = self.dither((screen + Vec2::splat(depth * 0.1)) * 0.77, time);
        base * 0.5 + detail * 0.3 + depth_term * 0.2
    }
}

/// Rotates a position by 45 degrees so the tile never aligns with the screen.
pub fn rotated_grid(position: Vec2) -> Vec2 {
    let (s, c) = GRID_ROTATION.sin_cos();
    Vec2::new(c * position.x + s * position.y, -s * position.x + c * position.y)
}

/// Void-and-cluster state on an `n` x `n` torus.
struct VoidAndCluster {
    n: usize,
    kernel: Vec<f32>,
    pattern: Vec<bool>,
    energy: Vec<f32>,
}

impl VoidAndCluster {
    fn new(n: usize, seed: u64) -> Self {
        let mut kernel = vec![0.0; n * n];
        for dy in 0..n {
            for dx in 0..n {
                let wx = dx.min(n - dx) as f32;
                let wy = dy.min(n - dy) as f32;
                kernel[dy * n + dx] = (-(wx * wx + wy * wy) / (2.0 * SIGMA * SIGMA)).exp();
            }
        }

        let mut state = Self {
            n,
            kernel,
            pattern: vec![false; n * n],
            energy: vec![0.0; n * n],
        };

        // Seed about a tenth of the pixels.
        let mut rng = StdRng::seed_from_u64(seed);
        let initial = (n * n / 10).max(1);
        let mut placed = 0;
        while placed < initial {
            let index = rng.random_range(0..n * n);
            if !state.pattern[index] {
                state.set(index, true);
                placed += 1;
            }
        }
        state
    }

    fn set(&mut self, index: usize, on: bool) {
        self.pattern[index] = on;
        let sign = if on { 1.0 } else { -1.0 };
        let n = self.n;
        let (px, py) = (index % n, index / n);
        for y in 0..n {
            let dy = (y + n - py) % n;
            for x in 0..n {
                let dx = (x + n - px) % n;
                self.energy[y * n + x] += sign * self.kernel[dy * n + dx];
            }
        }
    }

    fn tightest_cluster(&self) -> usize {
        let mut best = 0;
        let mut best_energy = f32::NEG_INFINITY;
        for (i, (&on, &e)) in self.pattern.iter().zip(&self.energy).enumerate() {
            if on && e > best_energy {
                best = i;
                best_energy = e;
            }
        }
        best
    }

    fn largest_void(&self) -> usize {
        let mut best = 0;
        let mut best_energy = f32::INFINITY;
        for (i, (&on, &e)) in self.pattern.iter().zip(&self.energy).enumerate() {
            if !on && e < best_energy {
                best = i;
                best_energy = e;
            }
        }
        best
    }

    /// Moves points from clusters into voids until the pattern is stable.
    fn relax(&mut self) {
        for _ in 0..self.n * self.n {
            let cluster = self.tightest_cluster();
            self.set(cluster, false);
            let void = self.largest_void();
            self.set(void, true);
            if void == cluster {
                break;
            }
        }
    }

    fn ranks(mut self) -> Vec<u32> {
        self.relax();
        let total = self.n * self.n;
        let mut ranks = vec![0u32; total];

        let prototype_pattern = self.pattern.clone();
        let prototype_energy = self.energy.clone();
        let ones = prototype_pattern.iter().filter(|&&on| on).count();

        // Rank the initial points by repeatedly removing the tightest cluster.
        let mut remaining = ones;
        while remaining > 0 {
            let cluster = self.tightest_cluster();
            self.set(cluster, false);
            remaining -= 1;
            ranks[cluster] = remaining as u32;
        }

        // Fill the voids of the initial pattern in order.
        self.pattern = prototype_pattern;
        self.energy = prototype_energy;
        for rank in ones..total {
            let void = self.largest_void();
            self.set(void, true);
            ranks[void] = rank as u32;
        }

        ranks
    }
}

/// A blue-noise tile uploaded as an `R32Float` texture.
///
/// The kernel reads it with `textureLoad` and wraps coordinates itself, so the
/// GPU lookup matches [`BlueNoise::value`] exactly.
pub struct BlueNoiseTexture {
    #[allow(dead_code)]
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub size: u32,
}

impl BlueNoiseTexture {
    pub fn upload(gpu: &GpuContext, noise: &BlueNoise) -> Self {
        use wgpu::util::DeviceExt;

        let texture = gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some("Blue Noise Texture"),
                size: wgpu::Extent3d {
                    width: noise.size(),
                    height: noise.size(),
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R32Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            bytemuck::cast_slice(noise.values()),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            size: noise.size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_form_a_permutation() {
        let noise = BlueNoise::generate(16, 7);
        let mut ranks: Vec<u32> = noise
            .values()
            .iter()
            .map(|v| (v * 256.0 - 0.5).round() as u32)
            .collect();
        ranks.sort_unstable();
        assert_eq!(ranks, (0..256).collect::<Vec<_>>());
    }

    #[test]
    fn values_stay_in_unit_interval() {
        let noise = BlueNoise::generate(16, 3);
        assert!(noise.values().iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn generation_is_deterministic() {
        assert_eq!(BlueNoise::generate(8, 42), BlueNoise::generate(8, 42));
    }

    #[test]
    fn seeds_change_the_tile() {
        assert_ne!(BlueNoise::generate(16, 1), BlueNoise::generate(16, 2));
    }

    #[test]
    fn lookups_wrap_around_the_tile() {
        let noise = BlueNoise::generate(8, 1);
        assert_eq!(noise.value(-1, 0), noise.value(7, 0));
        assert_eq!(noise.value(8, 9), noise.value(0, 1));
        assert_eq!(noise.sample(Vec2::new(-0.5, 16.2)), noise.value(7, 0));
    }

    #[test]
    fn low_ranks_are_spread_out() {
        // The lowest ranks of a blue-noise ordering should not contain
        // horizontally or vertically adjacent pixels.
        let n = 16;
        let noise = BlueNoise::generate(n, 11);
        let low = |x: i64, y: i64| noise.value(x, y) < 0.05;
        for y in 0..n as i64 {
            for x in 0..n as i64 {
                if low(x, y) {
                    assert!(!low(x + 1, y) && !low(x, y + 1), "clustered at ({x}, {y})");
                }
            }
        }
    }

    #[test]
    fn march_offset_is_a_convex_mix() {
        let noise = BlueNoise::generate(8, 5);
        for i in 0..32 {
            let v = noise.march_offset(Vec2::new(i as f32 * 3.7, 11.0), 2.0, i as f32, 0.25);
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn rejects_non_square_images() {
        let img = image::DynamicImage::new_rgba8(4, 8);
        assert!(matches!(
            BlueNoise::from_image(&img),
            Err(VolumetricError::NoiseDimensions { width: 4, height: 8 })
        ));
    }

    #[test]
    fn reads_red_channel_of_images() {
        let mut img = image::RgbaImage::new(2, 2);
        img.put_pixel(1, 0, image::Rgba([128, 0, 0, 255]));
        let noise = BlueNoise::from_image(&image::DynamicImage::ImageRgba8(img)).unwrap();
        assert_eq!(noise.value(1, 0), 0.5);
        assert_eq!(noise.value(0, 0), 0.0);
    }
}
