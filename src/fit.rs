//! Cover-fit math for mapping a fixed-aspect image onto a viewport.
//!
//! Everything here is pure and has no rendering dependency. Callers hand in
//! dimensions, get back either UV multipliers ([`ScaleFactors`]) or concrete
//! fill dimensions.

use serde::Serialize;
use thiserror::Error;

/// Aspect ratio of the stock background image the effect was tuned against.
pub const DEFAULT_IMAGE_ASPECT_RATIO: f32 = 1.784_313_7;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FitError {
    #[error("invalid dimensions for {what}: {width}x{height} (must be positive and finite)")]
    InvalidDimensions {
        what: &'static str,
        width: f32,
        height: f32,
    },
    #[error("invalid aspect ratio {0} (must be positive and finite)")]
    InvalidAspectRatio(f32),
}

/// Multipliers applied to centered UV space (`[-1, 1]`) before sampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaleFactors {
    pub x: f32,
    pub y: f32,
}

impl ScaleFactors {
    pub const IDENTITY: Self = Self { x: 1.0, y: 1.0 };

    pub fn swapped(self) -> Self {
        Self {
            x: self.y,
            y: self.x,
        }
    }
}

impl Default for ScaleFactors {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Scale factors for sampling an `image_width x image_height` image across a
/// full-viewport quad with "cover" intent.
///
/// Exactly one axis is left at `1.0`; the other gets the ratio of the two
/// aspect ratios, oriented by whether the viewport is landscape
/// (`aspect >= 1`) or portrait. Matching aspect ratios yield
/// [`ScaleFactors::IDENTITY`].
pub fn compute_cover_scale_factors(
    image_width: f32,
    image_height: f32,
    viewport_width: f32,
    viewport_height: f32,
) -> Result<ScaleFactors, FitError> {
    ensure_dimensions("image", image_width, image_height)?;
    ensure_dimensions("viewport", viewport_width, viewport_height)?;

    let container_aspect = viewport_width / viewport_height;
    let image_aspect = image_width / image_height;

    let landscape_factor = image_aspect / container_aspect;
    let portrait_factor = container_aspect / image_aspect;
    let factor = if container_aspect >= 1.0 {
        landscape_factor
    } else {
        portrait_factor
    };

    let mut factors = ScaleFactors::IDENTITY;
    if container_aspect >= image_aspect {
        factors.y = factor;
    } else {
        factors.x = factor;
    }
    Ok(factors)
}

/// Width and height of a rectangle with `aspect_ratio` clamped to one
/// viewport edge: width-clamped when the rectangle is relatively wider than
/// the viewport, height-clamped otherwise.
pub fn compute_aspect_fill_dimensions(
    aspect_ratio: f32,
    viewport_width: f32,
    viewport_height: f32,
) -> Result<(f32, f32), FitError> {
    if !(aspect_ratio.is_finite() && aspect_ratio > 0.0) {
        return Err(FitError::InvalidAspectRatio(aspect_ratio));
    }
    ensure_dimensions("viewport", viewport_width, viewport_height)?;

    let viewport_aspect = viewport_width / viewport_height;
    if aspect_ratio > viewport_aspect {
        Ok((viewport_width, viewport_width / aspect_ratio))
    } else {
        Ok((viewport_height * aspect_ratio, viewport_height))
    }
}

fn ensure_dimensions(what: &'static str, width: f32, height: f32) -> Result<(), FitError> {
    let valid = |value: f32| value.is_finite() && value > 0.0;
    if valid(width) && valid(height) {
        Ok(())
    } else {
        Err(FitError::InvalidDimensions {
            what,
            width,
            height,
        })
    }
}
