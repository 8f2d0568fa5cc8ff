//! Per-frame uniform updates for the depth material.
//!
//! The driver never talks to a window or a GPU directly. It reads the pointer
//! and sizes through [`FrameInputs`] and writes named values through
//! [`UniformSink`], so hosts (offline frame loop, interactive window, tests)
//! plug in at those two seams.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use thiserror::Error;

use crate::fit::ScaleFactors;

/// Host-side multiplier applied to the normalized pointer before it is
/// rescaled from window pixels into scene units.
pub const POINTER_GAIN: f32 = 4.0;

pub const UNIFORM_MOUSE: &str = "mouse";
pub const UNIFORM_SCALE_FACTOR_X: &str = "uScaleFactorX";
pub const UNIFORM_SCALE_FACTOR_Y: &str = "uScaleFactorY";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("window size must be positive and finite, got {width}x{height} px")]
    InvalidWindow { width: f32, height: f32 },
    #[error("unknown uniform '{0}'")]
    UnknownUniform(String),
    #[error("uniform '{name}' expects a {expected} value")]
    TypeMismatch {
        name: String,
        expected: &'static str,
    },
    #[error("smoothing must be within [0, 1), got {0}")]
    InvalidSmoothing(f32),
}

/// What the host exposes to the per-frame callback.
pub trait FrameInputs {
    /// Pointer position normalized to roughly `[-1, 1]` per axis, y up.
    fn pointer(&self) -> Vec2;
    /// Viewport size in scene units.
    fn viewport_size(&self) -> Vec2;
    /// Drawable size in device pixels.
    fn window_size_px(&self) -> Vec2;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2(Vec2),
}

pub trait UniformSink {
    fn set_uniform(&mut self, name: &str, value: UniformValue) -> Result<(), DriverError>;
}

/// The uniform bundle consumed by the depth material. Layout matches
/// `DepthUniforms` in `image_depth.wgsl` (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DepthUniforms {
    pub mouse: [f32; 2],
    pub scale_factor_x: f32,
    pub scale_factor_y: f32,
}

impl DepthUniforms {
    pub fn new(scale: ScaleFactors) -> Self {
        Self {
            mouse: [0.0, 0.0],
            scale_factor_x: scale.x,
            scale_factor_y: scale.y,
        }
    }

    pub fn mouse(&self) -> Vec2 {
        Vec2::from_array(self.mouse)
    }

    pub fn scale_factors(&self) -> ScaleFactors {
        ScaleFactors {
            x: self.scale_factor_x,
            y: self.scale_factor_y,
        }
    }
}

impl Default for DepthUniforms {
    fn default() -> Self {
        Self::new(ScaleFactors::IDENTITY)
    }
}

impl UniformSink for DepthUniforms {
    fn set_uniform(&mut self, name: &str, value: UniformValue) -> Result<(), DriverError> {
        match (name, value) {
            (UNIFORM_MOUSE, UniformValue::Vec2(v)) => self.mouse = v.to_array(),
            (UNIFORM_SCALE_FACTOR_X, UniformValue::Float(f)) => self.scale_factor_x = f,
            (UNIFORM_SCALE_FACTOR_Y, UniformValue::Float(f)) => self.scale_factor_y = f,
            (UNIFORM_MOUSE, _) => {
                return Err(DriverError::TypeMismatch {
                    name: name.to_owned(),
                    expected: "vec2",
                })
            }
            (UNIFORM_SCALE_FACTOR_X | UNIFORM_SCALE_FACTOR_Y, _) => {
                return Err(DriverError::TypeMismatch {
                    name: name.to_owned(),
                    expected: "float",
                })
            }
            _ => return Err(DriverError::UnknownUniform(name.to_owned())),
        }
        Ok(())
    }
}

/// Pointer offset in texture space for the current frame:
/// `pointer * 4 * viewport / window_px`, per axis.
pub fn pointer_offset(pointer: Vec2, viewport: Vec2, window_px: Vec2) -> Result<Vec2, DriverError> {
    let valid = |v: f32| v.is_finite() && v > 0.0;
    if !(valid(window_px.x) && valid(window_px.y)) {
        return Err(DriverError::InvalidWindow {
            width: window_px.x,
            height: window_px.y,
        });
    }
    Ok(pointer * POINTER_GAIN * viewport / window_px)
}

#[derive(Debug, Clone)]
pub struct DepthShaderDriver {
    smoothing: f32,
    last_offset: Option<Vec2>,
}

impl DepthShaderDriver {
    /// A driver that writes the raw offset every frame.
    pub fn new() -> Self {
        Self {
            smoothing: 0.0,
            last_offset: None,
        }
    }

    /// Exponential easing towards the target offset. `0.0` disables it.
    pub fn with_smoothing(smoothing: f32) -> Result<Self, DriverError> {
        if !(0.0..1.0).contains(&smoothing) {
            return Err(DriverError::InvalidSmoothing(smoothing));
        }
        Ok(Self {
            smoothing,
            last_offset: None,
        })
    }

    /// Write the scale factors once when a scene mounts (or its viewport changes).
    pub fn mount(
        &mut self,
        scale: ScaleFactors,
        sink: &mut impl UniformSink,
    ) -> Result<(), DriverError> {
        self.last_offset = None;
        sink.set_uniform(UNIFORM_SCALE_FACTOR_X, UniformValue::Float(scale.x))?;
        sink.set_uniform(UNIFORM_SCALE_FACTOR_Y, UniformValue::Float(scale.y))?;
        sink.set_uniform(UNIFORM_MOUSE, UniformValue::Vec2(Vec2::ZERO))
    }

    /// Per-frame callback: recompute the pointer offset and write `mouse`.
    pub fn update_frame(
        &mut self,
        inputs: &impl FrameInputs,
        sink: &mut impl UniformSink,
    ) -> Result<Vec2, DriverError> {
        let target = pointer_offset(
            inputs.pointer(),
            inputs.viewport_size(),
            inputs.window_size_px(),
        )?;
        let offset = match self.last_offset {
            Some(previous) if self.smoothing > 0.0 => {
                previous + (target - previous) * (1.0 - self.smoothing)
            }
            _ => target,
        };
        self.last_offset = Some(offset);
        sink.set_uniform(UNIFORM_MOUSE, UniformValue::Vec2(offset))?;
        Ok(offset)
    }
}

impl Default for DepthShaderDriver {
    fn default() -> Self {
        Self::new()
    }
}
