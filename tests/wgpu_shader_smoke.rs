use image::{Rgba, RgbaImage};

use depth_parallax::materials::{MaterialRegistry, IMAGE_DEPTH, IMAGE_DEPTH_STRETCH};
use depth_parallax::renderer::{BackendPreference, Renderer, RendererGpuContext};
use depth_parallax::sampler::DepthTextures;
use depth_parallax::scene::{parse_scene, Scene};

fn gpu_available() -> bool {
    match pollster::block_on(RendererGpuContext::headless()) {
        Ok(_) => true,
        Err(error) => {
            eprintln!("Skipping test: {error}");
            false
        }
    }
}

fn scene_yaml(width: u32, height: u32, material: &str, pointer: (f32, f32)) -> String {
    format!(
        r#"
color_map: color.png
depth_map: depth.png
material: {material}
output:
  resolution: {{ width: {width}, height: {height} }}
  fps: 30
  duration: {{ frames: 1 }}
pointer:
  motion: {{ kind: static, x: {}, y: {} }}
"#,
        pointer.0, pointer.1
    )
}

fn mount(yaml: &str, textures: DepthTextures) -> Scene {
    let config = parse_scene(yaml).expect("scene should parse");
    config.validate().expect("scene should validate");
    Scene::from_parts(config, textures).expect("scene should mount")
}

/// Gentle gradients keep GPU filtering precision well inside one step.
fn gradient_textures() -> DepthTextures {
    let color = RgbaImage::from_fn(64, 32, |x, y| {
        Rgba([(x * 4) as u8, (y * 8) as u8, (255 - x * 2) as u8, 255])
    });
    let depth = RgbaImage::from_fn(64, 32, |x, y| {
        let value = (x * 3 + y * 2) as u8;
        Rgba([value, value, value, 255])
    });
    DepthTextures::new(color, depth).expect("textures should build")
}

#[test]
fn gpu_renderer_draws_the_color_map() {
    if !gpu_available() {
        return;
    }
    let textures = DepthTextures::new(
        RgbaImage::from_pixel(16, 9, Rgba([200, 40, 10, 255])),
        RgbaImage::from_pixel(16, 9, Rgba([255, 255, 255, 255])),
    )
    .expect("textures should build");
    let mut scene = mount(&scene_yaml(64, 36, IMAGE_DEPTH, (0.0, 0.0)), textures);

    let registry = MaterialRegistry::with_builtins();
    let mut renderer =
        Renderer::new(&scene, &registry, BackendPreference::Gpu).expect("gpu renderer");
    assert!(renderer.is_gpu_backend());

    let uniforms = *scene.advance(0).expect("frame should advance");
    let rgba = renderer
        .render_frame_rgba(&uniforms)
        .expect("render_frame_rgba should succeed");
    assert_eq!(rgba.len(), 64 * 36 * 4);

    // A flat color map stays flat wherever the pointer sends the lookup.
    for pixel in rgba.chunks_exact(4) {
        assert!(pixel[0].abs_diff(200) <= 1, "unexpected pixel {pixel:?}");
        assert!(pixel[1].abs_diff(40) <= 1, "unexpected pixel {pixel:?}");
        assert_eq!(pixel[3], 255);
    }
}

#[test]
fn gpu_and_software_backends_agree() {
    if !gpu_available() {
        return;
    }
    let registry = MaterialRegistry::with_builtins();

    for material in [IMAGE_DEPTH, IMAGE_DEPTH_STRETCH] {
        // 64x32 maps on a 16:9 output: the cover correction is not the identity.
        let mut scene = mount(&scene_yaml(48, 27, material, (0.1, -0.05)), gradient_textures());
        assert!((scene.scale_factors().x - 1.0).abs() > 0.05);

        let uniforms = *scene.advance(0).expect("frame should advance");
        assert!(uniforms.mouse().length() > 0.0);

        let mut gpu =
            Renderer::new(&scene, &registry, BackendPreference::Gpu).expect("gpu renderer");
        let mut software = Renderer::new_software(&scene, &registry).expect("software renderer");
        let gpu_rgba = gpu.render_frame_rgba(&uniforms).expect("gpu frame");
        let software_rgba = software.render_frame_rgba(&uniforms).expect("software frame");
        assert_eq!(gpu_rgba.len(), software_rgba.len());

        for (index, (a, b)) in gpu_rgba.iter().zip(&software_rgba).enumerate() {
            let pixel = index / 4;
            assert!(
                a.abs_diff(*b) <= 1,
                "{material}: channel {} of pixel ({}, {}) differs: gpu {a} vs software {b}",
                index % 4,
                pixel % 48,
                pixel / 48
            );
        }
    }
}

#[test]
fn oversized_maps_fall_back_to_software() {
    let Ok(context) = pollster::block_on(RendererGpuContext::headless()) else {
        eprintln!("Skipping test: no GPU adapter found");
        return;
    };
    let too_wide = context.device.limits().max_texture_dimension_2d + 1;
    drop(context);

    let textures = DepthTextures::new(
        RgbaImage::from_pixel(too_wide, 1, Rgba([10, 20, 30, 255])),
        RgbaImage::from_pixel(too_wide, 1, Rgba([0, 0, 0, 255])),
    )
    .expect("textures should build");
    let scene = mount(&scene_yaml(32, 18, IMAGE_DEPTH, (0.0, 0.0)), textures);
    let registry = MaterialRegistry::with_builtins();

    let error = Renderer::new(&scene, &registry, BackendPreference::Gpu)
        .err()
        .expect("gpu-only renderer should refuse the map");
    assert!(format!("{error:#}").contains("px per side"), "{error:#}");

    let renderer =
        Renderer::new(&scene, &registry, BackendPreference::Auto).expect("auto should fall back");
    assert!(!renderer.is_gpu_backend());
    assert!(renderer.backend_reason().contains("px per side"));
}
