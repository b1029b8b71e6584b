//! Error types.
//!
//! Everything that can fail in this crate fails at initialization: creating a
//! [`GpuContext`](crate::GpuContext), loading a blue-noise tile, or building
//! [`VolumetricLighting`](crate::VolumetricLighting) from invalid settings.
//! Per-frame work never errors; it reports a
//! [`FrameOutcome`](crate::FrameOutcome) instead.

use thiserror::Error;

/// The error type for volumetric lighting setup and presentation.
#[derive(Error, Debug)]
pub enum VolumetricError {
    /// No compatible GPU adapter was found.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(#[from] wgpu::RequestAdapterError),

    /// The logical device could not be created.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// The window surface could not be created.
    #[error("Failed to create surface: {0}")]
    SurfaceCreateFailed(#[from] wgpu::CreateSurfaceError),

    /// The next swap-chain texture could not be acquired.
    #[error("Failed to acquire surface texture: {0}")]
    SurfaceAcquireFailed(#[from] wgpu::SurfaceError),

    /// A headless context was asked to present to a window.
    #[error("GPU context has no surface to present to")]
    NoSurface,

    /// The blue-noise image could not be read or decoded.
    #[error("Failed to load blue noise texture: {0}")]
    NoiseImage(#[from] image::ImageError),

    /// The blue-noise image is not a non-empty square tile.
    #[error("Blue noise texture must be square, got {width}x{height}")]
    NoiseDimensions {
        /// Width of the rejected image.
        width: u32,
        /// Height of the rejected image.
        height: u32,
    },

    /// A settings value is out of its valid range.
    #[error("Invalid volumetric settings: {0}")]
    InvalidSettings(String),
}

/// Alias for `std::result::Result<T, VolumetricError>`.
pub type Result<T> = std::result::Result<T, VolumetricError>;
