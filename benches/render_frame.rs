//! Software frame render benchmark.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{Rgba, RgbaImage};

use depth_parallax::materials::MaterialRegistry;
use depth_parallax::renderer::Renderer;
use depth_parallax::sampler::DepthTextures;
use depth_parallax::scene::{parse_scene, Scene};

const SCENE: &str = r#"
color_map: color.png
depth_map: depth.png
output:
  resolution: { width: 1280, height: 720 }
  fps: 30
  duration: { frames: 30 }
pointer:
  motion: { kind: orbit, radius_x: 0.4, radius_y: 0.2, period_frames: 30 }
"#;

fn bench_software_render(c: &mut Criterion) {
    let config = parse_scene(SCENE).expect("scene should parse");
    let textures = DepthTextures::new(
        RgbaImage::from_fn(910, 510, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 64, 255])),
        RgbaImage::from_fn(910, 510, |x, _| {
            let value = (x * 255 / 910) as u8;
            Rgba([value, value, value, 255])
        }),
    )
    .expect("textures should build");
    let mut scene = Scene::from_parts(config, textures).expect("scene should mount");
    let registry = MaterialRegistry::with_builtins();
    let mut renderer = Renderer::new_software(&scene, &registry).expect("create renderer");

    let mut group = c.benchmark_group("render_frame");
    group.sample_size(20);

    let mut frame = 0;
    group.bench_function("software_720p", |b| {
        b.iter(|| {
            let uniforms = *scene.advance(frame).expect("advance");
            frame = (frame + 1) % 30;
            black_box(renderer.render_frame_rgba(&uniforms).expect("render"))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_software_render);
criterion_main!(benches);
