//! CPU rendition of the depth fragment program.
//!
//! Mirrors `shaders/wgsl/image_depth.wgsl` operation for operation: UVs have
//! their origin at the bottom-left, textures are sampled bilinearly with
//! clamp-to-edge addressing, and the result is quantized to RGBA8 the way a
//! `Rgba8Unorm` target would store it.

use glam::{Vec2, Vec4};
use image::RgbaImage;
use thiserror::Error;

use crate::driver::DepthUniforms;
use crate::fit::ScaleFactors;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("{0} texture is empty")]
    EmptyTexture(&'static str),
    #[error("output size must be positive, got {width}x{height}")]
    EmptyTarget { width: u32, height: u32 },
}

/// Signature shared by every software fragment stage.
pub type FragmentFn = fn(&DepthTextures, &DepthUniforms, Vec2) -> Vec4;

#[derive(Debug, Clone)]
pub struct DepthTextures {
    pub color: RgbaImage,
    pub depth: RgbaImage,
}

impl DepthTextures {
    pub fn new(color: RgbaImage, depth: RgbaImage) -> Result<Self, SampleError> {
        if color.width() == 0 || color.height() == 0 {
            return Err(SampleError::EmptyTexture("color"));
        }
        if depth.width() == 0 || depth.height() == 0 {
            return Err(SampleError::EmptyTexture("depth"));
        }
        Ok(Self { color, depth })
    }

    pub fn color_dimensions(&self) -> (u32, u32) {
        self.color.dimensions()
    }
}

/// Remap a plane UV into the cover-corrected sampling coordinate.
#[inline]
pub fn cover_uv(uv: Vec2, scale: ScaleFactors) -> Vec2 {
    let centered = uv * 2.0 - Vec2::ONE;
    let scaled = centered * Vec2::new(scale.x, scale.y);
    scaled * 0.5 + Vec2::splat(0.5)
}

/// Bilinear, clamp-to-edge sample. `uv` has v pointing up.
pub fn sample_bilinear(image: &RgbaImage, uv: Vec2) -> Vec4 {
    let (width, height) = image.dimensions();
    let x = uv.x * width as f32 - 0.5;
    let y = (1.0 - uv.y) * height as f32 - 0.5;

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let texel = |ix: f32, iy: f32| -> Vec4 {
        let cx = (ix.max(0.0) as u32).min(width - 1);
        let cy = (iy.max(0.0) as u32).min(height - 1);
        let px = image.get_pixel(cx, cy).0;
        Vec4::new(
            f32::from(px[0]),
            f32::from(px[1]),
            f32::from(px[2]),
            f32::from(px[3]),
        ) / 255.0
    };

    let top = texel(x0, y0).lerp(texel(x0 + 1.0, y0), fx);
    let bottom = texel(x0, y0 + 1.0).lerp(texel(x0 + 1.0, y0 + 1.0), fx);
    top.lerp(bottom, fy)
}

/// Cover-corrected depth displacement (the default material).
pub fn shade_image_depth(textures: &DepthTextures, uniforms: &DepthUniforms, uv: Vec2) -> Vec4 {
    let st = cover_uv(uv, uniforms.scale_factors());
    let depth = sample_bilinear(&textures.depth, st);
    sample_bilinear(&textures.color, st + uniforms.mouse() * depth.x)
}

/// Displacement without cover correction; the image stretches to the plane.
pub fn shade_image_depth_stretch(
    textures: &DepthTextures,
    uniforms: &DepthUniforms,
    uv: Vec2,
) -> Vec4 {
    let depth = sample_bilinear(&textures.depth, uv);
    sample_bilinear(&textures.color, uv + uniforms.mouse() * depth.x)
}

/// Map a screen-space UV (v up) onto the plane, which overscans the screen by
/// `overscan` when it sits in front of the viewport plane.
#[inline]
pub fn screen_to_plane_uv(screen_uv: Vec2, overscan: f32) -> Vec2 {
    Vec2::splat(0.5) + (screen_uv - Vec2::splat(0.5)) / overscan
}

/// Rasterize one full frame into tightly packed RGBA8.
pub fn render_rgba(
    textures: &DepthTextures,
    uniforms: &DepthUniforms,
    fragment: FragmentFn,
    width: u32,
    height: u32,
    overscan: f32,
) -> Result<Vec<u8>, SampleError> {
    if width == 0 || height == 0 {
        return Err(SampleError::EmptyTarget { width, height });
    }

    let mut frame = Vec::with_capacity(width as usize * height as usize * 4);
    for py in 0..height {
        let v = 1.0 - (py as f32 + 0.5) / height as f32;
        for px in 0..width {
            let u = (px as f32 + 0.5) / width as f32;
            let plane_uv = screen_to_plane_uv(Vec2::new(u, v), overscan);
            let color = fragment(textures, uniforms, plane_uv);
            frame.extend_from_slice(&quantize(color));
        }
    }
    Ok(frame)
}

#[inline]
fn quantize(color: Vec4) -> [u8; 4] {
    let c = color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0;
    [
        c.x.round() as u8,
        c.y.round() as u8,
        c.z.round() as u8,
        c.w.round() as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 40) as u8, (y * 60) as u8, ((x + y) * 10) as u8, 255])
        })
    }

    fn flat_depth(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    #[test]
    fn cover_uv_is_identity_for_unit_scale() {
        let uv = Vec2::new(0.2, 0.9);
        let out = cover_uv(uv, ScaleFactors::IDENTITY);
        assert!((out - uv).length() < 1e-6);
    }

    #[test]
    fn cover_uv_scales_about_center() {
        let out = cover_uv(Vec2::new(1.0, 0.0), ScaleFactors { x: 0.5, y: 2.0 });
        assert!((out - Vec2::new(0.75, -0.5)).length() < 1e-6);
    }

    #[test]
    fn cover_uv_is_symmetric_under_axis_swap() {
        let scale = ScaleFactors { x: 1.37, y: 1.0 };
        for uv in [Vec2::new(0.1, 0.8), Vec2::new(0.5, 0.5), Vec2::new(0.95, 0.03)] {
            let direct = cover_uv(uv, scale);
            let swapped = cover_uv(Vec2::new(uv.y, uv.x), scale.swapped());
            assert!((direct - Vec2::new(swapped.y, swapped.x)).length() < 1e-6);
        }
    }

    #[test]
    fn bilinear_hits_texel_centers_exactly() {
        let image = gradient(4, 3);
        // Texel (2, 0) is the top row; v points up.
        let uv = Vec2::new(2.5 / 4.0, 1.0 - 0.5 / 3.0);
        let sample = sample_bilinear(&image, uv);
        assert!((sample.x * 255.0 - 80.0).abs() < 1e-3);
        assert!(sample.y.abs() < 1e-6);
    }

    #[test]
    fn bilinear_clamps_outside_the_image() {
        let image = gradient(4, 3);
        let far = sample_bilinear(&image, Vec2::new(7.0, -3.0));
        let corner = sample_bilinear(&image, Vec2::new(1.0, 0.0));
        assert!((far - corner).length() < 1e-6);
    }

    #[test]
    fn zero_offset_reproduces_color_map() {
        let color = gradient(5, 4);
        let textures = DepthTextures::new(color.clone(), flat_depth(5, 4, 255)).unwrap();
        let frame = render_rgba(
            &textures,
            &DepthUniforms::default(),
            shade_image_depth,
            5,
            4,
            1.0,
        )
        .unwrap();
        assert_eq!(frame, color.into_raw());
    }

    #[test]
    fn black_depth_cancels_displacement() {
        let color = gradient(6, 4);
        let textures = DepthTextures::new(color.clone(), flat_depth(6, 4, 0)).unwrap();
        let mut uniforms = DepthUniforms::default();
        uniforms.mouse = [0.3, -0.2];
        let frame = render_rgba(&textures, &uniforms, shade_image_depth, 6, 4, 1.0).unwrap();
        assert_eq!(frame, color.into_raw());
    }

    #[test]
    fn white_depth_shifts_by_mouse() {
        let color = gradient(6, 4);
        let textures = DepthTextures::new(color.clone(), flat_depth(6, 4, 255)).unwrap();
        let mut uniforms = DepthUniforms::default();
        // One texel to the right.
        uniforms.mouse = [1.0 / 6.0, 0.0];
        let frame = render_rgba(&textures, &uniforms, shade_image_depth, 6, 4, 1.0).unwrap();
        let first_pixel = &frame[0..4];
        assert_eq!(first_pixel, &color.get_pixel(1, 0).0);
    }

    #[test]
    fn stretch_material_ignores_scale_factors() {
        let color = gradient(5, 4);
        let textures = DepthTextures::new(color.clone(), flat_depth(5, 4, 0)).unwrap();
        let uniforms = DepthUniforms::new(ScaleFactors { x: 3.0, y: 1.0 });
        let frame =
            render_rgba(&textures, &uniforms, shade_image_depth_stretch, 5, 4, 1.0).unwrap();
        assert_eq!(frame, color.into_raw());
    }

    #[test]
    fn rejects_empty_inputs() {
        assert_eq!(
            DepthTextures::new(RgbaImage::new(0, 4), flat_depth(1, 1, 0)).unwrap_err(),
            SampleError::EmptyTexture("color")
        );
        let textures = DepthTextures::new(gradient(2, 2), flat_depth(2, 2, 0)).unwrap();
        assert!(matches!(
            render_rgba(&textures, &DepthUniforms::default(), shade_image_depth, 0, 2, 1.0),
            Err(SampleError::EmptyTarget { .. })
        ));
    }
}
