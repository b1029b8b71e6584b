//! Configuration for the volumetric lighting chain.
//!
//! All configuration is programmatic. [`VolumetricSettings::default`] matches
//! the classic tuning (half-resolution march, 32 to 64 adaptive steps, 1.1x
//! bounding sphere); every value can be overridden with the chained setters.
//!
//! ```
//! use godrays::{LightPriority, MarchSettings, VolumetricSettings};
//!
//! let settings = VolumetricSettings::default()
//!     .scale(0.25)
//!     .intensity(1.5)
//!     .priority(LightPriority::NearestToCamera)
//!     .march(MarchSettings::default().steps(16, 48));
//! assert!(settings.validate().is_ok());
//! ```

use std::path::PathBuf;

use crate::error::{Result, VolumetricError};
use crate::light::LightPriority;

/// Largest blue-noise tile generated at startup; bigger tiles should be baked
/// to an image and loaded with [`BlueNoiseSource::File`].
pub const MAX_GENERATED_NOISE_SIZE: u32 = 128;

/// Tunables of the ray-march kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct MarchSettings {
    /// Step count used for rays passing far from the light.
    pub min_steps: u32,
    /// Step count used for rays passing through the light position.
    pub max_steps: u32,
    /// Bounding sphere radius as a multiple of the light range.
    pub bounds_scale: f32,
    /// `k` in the `1 / (1 + k d^2)` distance attenuation.
    pub attenuation_softening: f32,
    /// The march stops once transmittance falls below this value.
    pub transmittance_cutoff: f32,
    /// Shadow depth bias, scaled by `1 - cos(angle)`.
    pub shadow_bias: f32,
}

impl Default for MarchSettings {
    fn default() -> Self {
        Self {
            min_steps: 32,
            max_steps: 64,
            bounds_scale: 1.1,
            attenuation_softening: 0.02,
            transmittance_cutoff: 0.01,
            shadow_bias: 0.01,
        }
    }
}

impl MarchSettings {
    pub fn steps(mut self, min_steps: u32, max_steps: u32) -> Self {
        self.min_steps = min_steps;
        self.max_steps = max_steps;
        self
    }

    pub fn bounds_scale(mut self, bounds_scale: f32) -> Self {
        self.bounds_scale = bounds_scale;
        self
    }

    pub fn attenuation_softening(mut self, softening: f32) -> Self {
        self.attenuation_softening = softening;
        self
    }

    pub fn transmittance_cutoff(mut self, cutoff: f32) -> Self {
        self.transmittance_cutoff = cutoff;
        self
    }

    pub fn shadow_bias(mut self, bias: f32) -> Self {
        self.shadow_bias = bias;
        self
    }
}

/// Tunables of the separable depth-aware blur.
#[derive(Clone, Debug, PartialEq)]
pub struct BlurSettings {
    /// Taps on each side of the center pixel.
    pub radius: u32,
    /// How quickly weights fall off with linear depth difference (per world unit).
    pub depth_sharpness: f32,
}

impl Default for BlurSettings {
    fn default() -> Self {
        Self {
            radius: 4,
            depth_sharpness: 4.0,
        }
    }
}

/// Where the blue-noise dithering tile comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum BlueNoiseSource {
    /// Generate a tile of the given size with void-and-cluster.
    Generated { size: u32, seed: u64 },
    /// Load a square tile from an image file (red channel).
    File(PathBuf),
}

impl Default for BlueNoiseSource {
    fn default() -> Self {
        Self::Generated { size: 64, seed: 0x5EED }
    }
}

/// Configuration of [`VolumetricLighting`](crate::VolumetricLighting).
#[derive(Clone, Debug, PartialEq)]
pub struct VolumetricSettings {
    /// Size of the ray-march buffer relative to the source surface, in `(0, 1]`.
    pub scale: f32,
    /// Global multiplier on the accumulated radiance before tone mapping.
    pub intensity: f32,
    /// Only lights flagged `volumetric` are gathered when `true`.
    pub require_volumetric_flag: bool,
    /// Ordering used when more than `MAX_LIGHTS` lights qualify.
    pub priority: LightPriority,
    pub march: MarchSettings,
    pub blur: BlurSettings,
    pub noise: BlueNoiseSource,
    /// HDR format of the intermediate buffers.
    pub format: wgpu::TextureFormat,
}

impl Default for VolumetricSettings {
    fn default() -> Self {
        Self {
            scale: 0.5,
            intensity: 1.0,
            require_volumetric_flag: true,
            priority: LightPriority::SceneOrder,
            march: MarchSettings::default(),
            blur: BlurSettings::default(),
            noise: BlueNoiseSource::default(),
            format: wgpu::TextureFormat::Rgba16Float,
        }
    }
}

impl VolumetricSettings {
    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn require_volumetric_flag(mut self, required: bool) -> Self {
        self.require_volumetric_flag = required;
        self
    }

    pub fn priority(mut self, priority: LightPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn march(mut self, march: MarchSettings) -> Self {
        self.march = march;
        self
    }

    pub fn blur(mut self, blur: BlurSettings) -> Self {
        self.blur = blur;
        self
    }

    pub fn noise(mut self, noise: BlueNoiseSource) -> Self {
        self.noise = noise;
        self
    }

    pub fn format(mut self, format: wgpu::TextureFormat) -> Self {
        self.format = format;
        self
    }

    /// Checks every value against its valid range.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(VolumetricError::InvalidSettings(msg));

        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return invalid(format!("scale must be in (0, 1], got {}", self.scale));
        }
        if !self.intensity.is_finite() || self.intensity < 0.0 {
            return invalid(format!("intensity must be finite and >= 0, got {}", self.intensity));
        }

        let march = &self.march;
        if march.min_steps == 0 || march.max_steps < march.min_steps {
            return invalid(format!(
                "step bounds must satisfy 0 < min <= max, got {}..{}",
                march.min_steps, march.max_steps
            ));
        }
        if !(march.bounds_scale.is_finite() && march.bounds_scale >= 1.0) {
            return invalid(format!(
                "bounds_scale must be finite and >= 1, got {}",
                march.bounds_scale
            ));
        }
        if !(march.attenuation_softening.is_finite() && march.attenuation_softening >= 0.0) {
            return invalid(format!(
                "attenuation_softening must be finite and >= 0, got {}",
                march.attenuation_softening
            ));
        }
        if !(0.0..1.0).contains(&march.transmittance_cutoff) {
            return invalid(format!(
                "transmittance_cutoff must be in [0, 1), got {}",
                march.transmittance_cutoff
            ));
        }

        if !march.shadow_bias.is_finite() {
            return invalid(format!("shadow_bias must be finite, got {}", march.shadow_bias));
        }

        if !(self.blur.depth_sharpness.is_finite() && self.blur.depth_sharpness >= 0.0) {
            return invalid(format!(
                "depth_sharpness must be finite and >= 0, got {}",
                self.blur.depth_sharpness
            ));
        }

        if let BlueNoiseSource::Generated { size, .. } = self.noise {
            if !(4..=MAX_GENERATED_NOISE_SIZE).contains(&size) {
                return invalid(format!(
                    "generated noise tile must be between 4 and {MAX_GENERATED_NOISE_SIZE} pixels wide, got {size}"
                ));
            }
        }

        let filterable = matches!(
            self.format.sample_type(None, None),
            Some(wgpu::TextureSampleType::Float { filterable: true })
        );
        let renderable = self
            .format
            .guaranteed_format_features(wgpu::Features::empty())
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT);
        if !filterable || !renderable {
            return invalid(format!(
                "{:?} must be a renderable, filterable float color format",
                self.format
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(VolumetricSettings::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_scale() {
        let settings = VolumetricSettings::default().scale(0.0);
        assert!(matches!(settings.validate(), Err(VolumetricError::InvalidSettings(_))));
    }

    #[test]
    fn rejects_inverted_step_bounds() {
        let settings = VolumetricSettings::default().march(MarchSettings::default().steps(64, 32));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_bounds_smaller_than_range() {
        let settings =
            VolumetricSettings::default().march(MarchSettings::default().bounds_scale(0.9));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_non_filterable_formats() {
        let depth = VolumetricSettings::default().format(wgpu::TextureFormat::Depth32Float);
        assert!(depth.validate().is_err());
        let integer = VolumetricSettings::default().format(wgpu::TextureFormat::Rgba32Uint);
        assert!(integer.validate().is_err());
    }

    #[test]
    fn rejects_non_finite_march_tunables() {
        for bounds in [f32::NAN, f32::INFINITY] {
            let settings =
                VolumetricSettings::default().march(MarchSettings::default().bounds_scale(bounds));
            assert!(settings.validate().is_err(), "bounds_scale {bounds}");
        }

        let march = MarchSettings::default().attenuation_softening(f32::NAN);
        assert!(VolumetricSettings::default().march(march).validate().is_err());

        let blur = BlurSettings {
            depth_sharpness: f32::NAN,
            ..Default::default()
        };
        assert!(VolumetricSettings::default().blur(blur).validate().is_err());
    }

    #[test]
    fn generated_noise_size_is_bounded() {
        let tile = |size| {
            VolumetricSettings::default()
                .noise(BlueNoiseSource::Generated { size, seed: 1 })
                .validate()
        };
        assert!(tile(MAX_GENERATED_NOISE_SIZE).is_ok());
        assert!(tile(MAX_GENERATED_NOISE_SIZE + 1).is_err());
        assert!(tile(4096).is_err());
        assert!(tile(3).is_err());
    }
}
