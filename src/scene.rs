//! Scene files and the mounted scene that drives one render.
//!
//! A scene file names the color/depth pair and describes the virtual host:
//! output size, camera, and how the pointer moves. [`Scene`] owns the loaded
//! textures plus the uniform bundle and runs the per-frame update against a
//! [`SceneHost`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use glam::Vec2;
use serde::Deserialize;

use crate::assets::load_depth_textures;
use crate::driver::{DepthShaderDriver, DepthUniforms, FrameInputs};
use crate::error_codes::CodedError;
use crate::fit::{compute_cover_scale_factors, ScaleFactors};
use crate::materials::IMAGE_DEPTH;
use crate::pointer::PointerMotion;
use crate::sampler::DepthTextures;

pub const SCENE_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub color_map: PathBuf,
    pub depth_map: PathBuf,
    #[serde(default = "default_material")]
    pub material: String,
    pub output: Output,
    #[serde(default)]
    pub camera: Camera,
    #[serde(default)]
    pub pointer: PointerConfig,
    #[serde(default)]
    pub require_matching_dimensions: bool,
}

fn default_version() -> u32 {
    SCENE_VERSION
}

fn default_material() -> String {
    IMAGE_DEPTH.to_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Output {
    pub resolution: Resolution,
    pub fps: u32,
    pub duration: Duration,
}

impl Output {
    pub fn total_frames(&self) -> u32 {
        match self.duration {
            Duration::Seconds(seconds) => {
                let frames = (seconds * self.fps as f32).ceil();
                frames.max(1.0) as u32
            }
            Duration::Frames { frames } => frames.max(1),
        }
    }

    pub fn window_px(&self) -> Vec2 {
        Vec2::new(self.resolution.width as f32, self.resolution.height as f32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum Duration {
    Seconds(f32),
    Frames { frames: u32 },
}

/// Perspective camera looking down -z at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Camera {
    pub fov_degrees: f32,
    pub distance: f32,
    /// Depth of the image plane; positive values sit closer to the camera.
    pub plane_z: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_degrees: 75.0,
            distance: 5.0,
            plane_z: 0.4,
        }
    }
}

impl Camera {
    /// Visible size of the z = 0 plane in scene units for a window of `window_px`.
    pub fn viewport_for(&self, window_px: Vec2) -> Vec2 {
        let height = 2.0 * (self.fov_degrees.to_radians() * 0.5).tan() * self.distance;
        Vec2::new(height * window_px.x / window_px.y, height)
    }

    /// How much larger than the screen the viewport-sized plane appears.
    pub fn overscan(&self) -> f32 {
        self.distance / (self.distance - self.plane_z)
    }

    fn validate(&self) -> Result<()> {
        if !(self.fov_degrees.is_finite() && self.fov_degrees > 0.0 && self.fov_degrees < 180.0) {
            bail!("camera fov_degrees must be within (0, 180), got {}", self.fov_degrees);
        }
        if !(self.distance.is_finite() && self.distance > 0.0) {
            bail!("camera distance must be > 0, got {}", self.distance);
        }
        if !self.plane_z.is_finite() || self.plane_z >= self.distance {
            bail!(
                "camera plane_z must be finite and in front of the camera (< {}), got {}",
                self.distance,
                self.plane_z
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointerConfig {
    #[serde(default)]
    pub motion: PointerMotion,
    #[serde(default)]
    pub smoothing: f32,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            motion: PointerMotion::default(),
            smoothing: 0.0,
        }
    }
}

impl SceneConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != SCENE_VERSION {
            bail!(
                "unsupported scene version {} (expected {})",
                self.version,
                SCENE_VERSION
            );
        }
        let Resolution { width, height } = self.output.resolution;
        if width == 0 || height == 0 {
            return Err(anyhow!(CodedError::invalid_input(
                "INVALID_DIMENSIONS",
                format!("resolution must be positive, got {width}x{height}"),
            )));
        }
        if self.output.fps == 0 {
            bail!("fps must be > 0");
        }
        match self.output.duration {
            Duration::Seconds(seconds) => {
                if !(seconds.is_finite() && seconds > 0.0) {
                    bail!("duration in seconds must be > 0");
                }
            }
            Duration::Frames { frames } => {
                if frames == 0 {
                    bail!("duration frames must be > 0");
                }
            }
        }
        self.camera.validate()?;
        if !(0.0..1.0).contains(&self.pointer.smoothing) {
            bail!(
                "pointer smoothing must be within [0, 1), got {}",
                self.pointer.smoothing
            );
        }
        self.pointer
            .motion
            .validate()
            .context("invalid pointer motion")?;
        Ok(())
    }
}

/// Parse, validate, and resolve asset paths relative to the scene file.
pub fn load_scene(path: &Path) -> Result<SceneConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read scene {}", path.display()))?;
    let mut config = parse_scene(&contents)
        .with_context(|| format!("failed to parse scene {}", path.display()))?;
    config.validate()?;

    let scene_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    config.color_map = resolve_asset_path(&scene_dir, &config.color_map, "color_map")?;
    config.depth_map = resolve_asset_path(&scene_dir, &config.depth_map, "depth_map")?;
    Ok(config)
}

pub fn parse_scene(yaml: &str) -> Result<SceneConfig> {
    serde_yaml::from_str(yaml).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!("invalid yaml at {}: {}", location, error)
    })
}

fn resolve_asset_path(scene_dir: &Path, asset: &Path, field_name: &str) -> Result<PathBuf> {
    let resolved = if asset.is_absolute() {
        asset.to_path_buf()
    } else {
        scene_dir.join(asset)
    };

    if !resolved.exists() {
        bail!("{} does not exist: {}", field_name, resolved.display());
    }
    if !resolved.is_file() {
        bail!("{} is not a file: {}", field_name, resolved.display());
    }
    Ok(resolved)
}

/// The host side of one frame: sizes come from the camera and window, the
/// pointer from wherever the caller got it.
#[derive(Debug, Clone, Copy)]
pub struct SceneHost {
    pub pointer: Vec2,
    pub viewport: Vec2,
    pub window_px: Vec2,
}

impl FrameInputs for SceneHost {
    fn pointer(&self) -> Vec2 {
        self.pointer
    }

    fn viewport_size(&self) -> Vec2 {
        self.viewport
    }

    fn window_size_px(&self) -> Vec2 {
        self.window_px
    }
}

pub struct Scene {
    pub config: SceneConfig,
    pub textures: DepthTextures,
    window_px: Vec2,
    viewport: Vec2,
    uniforms: DepthUniforms,
    driver: DepthShaderDriver,
}

impl Scene {
    /// Load the scene's textures and initialise its uniforms.
    pub fn mount(config: SceneConfig) -> Result<Self> {
        let textures = load_depth_textures(
            &config.color_map,
            &config.depth_map,
            config.require_matching_dimensions,
        )?;
        Self::from_parts(config, textures)
    }

    pub fn from_parts(config: SceneConfig, textures: DepthTextures) -> Result<Self> {
        let driver = DepthShaderDriver::with_smoothing(config.pointer.smoothing)
            .map_err(CodedError::from)?;
        let window_px = config.output.window_px();
        let mut scene = Self {
            config,
            textures,
            window_px,
            viewport: Vec2::ZERO,
            uniforms: DepthUniforms::default(),
            driver,
        };
        scene.resize(window_px)?;
        Ok(scene)
    }

    /// Recompute viewport and scale factors for a new drawable size.
    pub fn resize(&mut self, window_px: Vec2) -> Result<()> {
        if !(window_px.x > 0.0 && window_px.y > 0.0) {
            return Err(anyhow!(CodedError::invalid_input(
                "INVALID_DIMENSIONS",
                format!("window must be positive, got {}x{}", window_px.x, window_px.y),
            )));
        }
        let viewport = self.config.camera.viewport_for(window_px);
        let (image_width, image_height) = self.textures.color_dimensions();
        let scale = compute_cover_scale_factors(
            image_width as f32,
            image_height as f32,
            viewport.x,
            viewport.y,
        )
        .map_err(CodedError::from)?;

        self.window_px = window_px;
        self.viewport = viewport;
        self.driver
            .mount(scale, &mut self.uniforms)
            .map_err(CodedError::from)?;
        log::debug!(
            "scene mounted: viewport {:.3}x{:.3}, window {}x{} px, scale factors {:.4}/{:.4}",
            viewport.x,
            viewport.y,
            window_px.x,
            window_px.y,
            scale.x,
            scale.y
        );
        Ok(())
    }

    pub fn total_frames(&self) -> u32 {
        self.config.output.total_frames()
    }

    pub fn viewport(&self) -> Vec2 {
        self.viewport
    }

    pub fn scale_factors(&self) -> ScaleFactors {
        self.uniforms.scale_factors()
    }

    pub fn overscan(&self) -> f32 {
        self.config.camera.overscan()
    }

    pub fn uniforms(&self) -> &DepthUniforms {
        &self.uniforms
    }

    /// Per-frame update with the scripted pointer for `frame`.
    pub fn advance(&mut self, frame: u32) -> Result<&DepthUniforms> {
        let pointer = self
            .config
            .pointer
            .motion
            .position_at(frame, self.total_frames());
        self.advance_with_pointer(pointer)
    }

    /// Per-frame update with an externally supplied normalized pointer.
    pub fn advance_with_pointer(&mut self, pointer: Vec2) -> Result<&DepthUniforms> {
        let host = SceneHost {
            pointer,
            viewport: self.viewport,
            window_px: self.window_px,
        };
        self.driver
            .update_frame(&host, &mut self.uniforms)
            .map_err(CodedError::from)?;
        Ok(&self.uniforms)
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    const MINIMAL: &str = r#"
color_map: color.png
depth_map: depth.png
output:
  resolution: { width: 160, height: 90 }
  fps: 24
  duration: { frames: 12 }
"#;

    fn textures(width: u32, height: u32) -> DepthTextures {
        DepthTextures::new(
            RgbaImage::from_pixel(width, height, Rgba([128, 64, 32, 255])),
            RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])),
        )
        .expect("textures should build")
    }

    #[test]
    fn minimal_scene_gets_defaults() {
        let config = parse_scene(MINIMAL).expect("minimal scene should parse");
        config.validate().expect("minimal scene should validate");
        assert_eq!(config.material, IMAGE_DEPTH);
        assert_eq!(config.camera, Camera::default());
        assert_eq!(config.pointer.motion, PointerMotion::Static { x: 0.0, y: 0.0 });
        assert_eq!(config.output.total_frames(), 12);
    }

    #[test]
    fn seconds_duration_rounds_up() {
        let mut config = parse_scene(MINIMAL).unwrap();
        config.output.duration = Duration::Seconds(0.51);
        assert_eq!(config.output.total_frames(), 13);
    }

    #[test]
    fn unknown_fields_are_rejected_with_location() {
        let error = parse_scene(&format!("{MINIMAL}bogus: 1\n")).expect_err("should fail");
        assert!(error.to_string().contains("line"), "{error}");
    }

    #[test]
    fn validation_catches_bad_camera_and_smoothing() {
        let mut config = parse_scene(MINIMAL).unwrap();
        config.camera.plane_z = 5.0;
        assert!(config.validate().is_err());

        let mut config = parse_scene(MINIMAL).unwrap();
        config.pointer.smoothing = 1.0;
        assert!(config.validate().is_err());

        let mut config = parse_scene(MINIMAL).unwrap();
        config.output.resolution.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_camera_viewport_matches_window_aspect() {
        let camera = Camera::default();
        let viewport = camera.viewport_for(Vec2::new(1600.0, 900.0));
        let expected_height = 2.0 * (37.5_f32).to_radians().tan() * 5.0;
        assert!((viewport.y - expected_height).abs() < 1e-4);
        assert!((viewport.x / viewport.y - 16.0 / 9.0).abs() < 1e-5);
        assert!((camera.overscan() - 5.0 / 4.6).abs() < 1e-6);
    }

    #[test]
    fn matching_aspect_scene_mounts_with_identity_scale() {
        let config = parse_scene(MINIMAL).unwrap();
        let scene = Scene::from_parts(config, textures(16, 9)).expect("scene should mount");
        let scale = scene.scale_factors();
        assert!((scale.x - 1.0).abs() < 1e-5 && (scale.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn resize_recomputes_scale_factors() {
        let config = parse_scene(MINIMAL).unwrap();
        let mut scene = Scene::from_parts(config, textures(16, 9)).unwrap();
        scene.resize(Vec2::new(500.0, 500.0)).unwrap();
        assert!((scene.scale_factors().x - 16.0 / 9.0).abs() < 1e-4);
        assert!(scene.resize(Vec2::new(0.0, 500.0)).is_err());
    }

    #[test]
    fn advance_uses_pointer_track() {
        let mut config = parse_scene(MINIMAL).unwrap();
        config.pointer.motion = PointerMotion::Static { x: 1.0, y: 0.0 };
        let mut scene = Scene::from_parts(config, textures(16, 9)).unwrap();
        let viewport = scene.viewport();
        let uniforms = *scene.advance(3).unwrap();
        assert!((uniforms.mouse[0] - 4.0 * viewport.x / 160.0).abs() < 1e-6);
        assert_eq!(uniforms.mouse[1], 0.0);
    }

    #[test]
    fn load_scene_resolves_relative_assets() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let scene_path = dir.path().join("scene.yaml");
        fs::write(&scene_path, MINIMAL).unwrap();
        let error = load_scene(&scene_path).expect_err("missing assets should fail");
        assert!(format!("{error:#}").contains("color_map does not exist"));

        RgbaImage::new(2, 2).save(dir.path().join("color.png")).unwrap();
        RgbaImage::new(2, 2).save(dir.path().join("depth.png")).unwrap();
        let config = load_scene(&scene_path).expect("scene should load");
        assert_eq!(config.color_map, dir.path().join("color.png"));
    }
}
