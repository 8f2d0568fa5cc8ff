//! Interactive preview: the real cursor drives the pointer and window resizes
//! remount the fit, the way the background behaves on a live page.

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use anyhow::{anyhow, Context, Result};
use glam::Vec2;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event as WinitEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowBuilder;

use crate::materials::MaterialRegistry;
use crate::pointer::normalize_cursor;
use crate::renderer::{Renderer, RendererGpuContext};
use crate::scene::{load_scene, Scene};

pub fn run(scene_path: &Path, registry: MaterialRegistry) -> Result<()> {
    let scene_path = canonical_scene_path(scene_path);
    let mut scene = Scene::mount(load_scene(&scene_path)?)?;

    let event_loop = EventLoop::new().context("failed to create play event loop")?;
    let resolution = scene.config.output.resolution;
    let initial_size = PhysicalSize::new(resolution.width, resolution.height);
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(format!("parallax - {}", scene_path.display()))
            .with_inner_size(initial_size)
            .build(&event_loop)
            .context("failed to create preview window")?,
    );

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let surface = instance
        .create_surface(window.clone())
        .context("failed to create wgpu surface")?;
    let gpu_context = pollster::block_on(RendererGpuContext::for_surface(&instance, &surface))
        .with_context(|| format!("failed to initialize wgpu for {}", scene_path.display()))?;

    let caps = surface.get_capabilities(&gpu_context.adapter);
    let format = pick_surface_format(&caps.formats)?;
    let mut renderer = Renderer::new_with_context(&scene, &registry, &gpu_context, format)?;
    let alpha_mode = caps
        .alpha_modes
        .first()
        .copied()
        .unwrap_or(wgpu::CompositeAlphaMode::Auto);

    let window_size = window.inner_size();
    let mut surface_config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: window_size.width.max(1),
        height: window_size.height.max(1),
        present_mode: wgpu::PresentMode::Fifo,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(&gpu_context.device, &surface_config);
    scene.resize(surface_size(&surface_config))?;

    let (watch_tx, watch_rx) = mpsc::channel::<()>();
    let watched_scene = scene_path.clone();
    let mut watcher =
        notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                if should_reload(&event) && event_targets_scene(&event, &watched_scene) {
                    let _ = watch_tx.send(());
                }
            }
            Err(error) => log::warn!("file watcher error: {error}"),
        })
        .context("failed to create file watcher")?;
    let watch_root = scene_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    watcher
        .watch(&watch_root, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", watch_root.display()))?;

    log::info!(
        "play: {} on {} ({}); move the cursor to look around, Esc quits",
        scene.config.material,
        renderer.backend_name(),
        renderer.backend_reason()
    );

    let mut pointer = Vec2::ZERO;
    event_loop
        .run(move |event, target| {
            target.set_control_flow(ControlFlow::Wait);
            // Keep the watcher alive for the lifetime of the loop.
            let _ = &watcher;

            match event {
                WinitEvent::WindowEvent { window_id, event } if window_id == window.id() => {
                    match event {
                        WindowEvent::CloseRequested => target.exit(),
                        WindowEvent::KeyboardInput { event, .. } => {
                            if event.state == ElementState::Pressed
                                && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                            {
                                target.exit();
                            }
                        }
                        WindowEvent::CursorMoved { position, .. } => {
                            pointer = normalize_cursor(
                                Vec2::new(position.x as f32, position.y as f32),
                                surface_size(&surface_config),
                            );
                            window.request_redraw();
                        }
                        WindowEvent::CursorLeft { .. } => {
                            pointer = Vec2::ZERO;
                            window.request_redraw();
                        }
                        WindowEvent::Resized(size) => {
                            if size.width > 0 && size.height > 0 {
                                surface_config.width = size.width;
                                surface_config.height = size.height;
                                surface.configure(&gpu_context.device, &surface_config);
                                if let Err(error) = scene.resize(surface_size(&surface_config)) {
                                    log::error!("resize failed: {error:#}");
                                }
                                window.request_redraw();
                            }
                        }
                        WindowEvent::RedrawRequested => {
                            draw(&surface, &gpu_context, &surface_config, &mut scene, &mut renderer, pointer);
                        }
                        _ => {}
                    }
                }
                WinitEvent::AboutToWait => {
                    let mut scene_dirty = false;
                    while watch_rx.try_recv().is_ok() {
                        scene_dirty = true;
                    }
                    if scene_dirty {
                        try_hot_reload(
                            &scene_path,
                            &registry,
                            &gpu_context,
                            &surface_config,
                            &mut scene,
                            &mut renderer,
                        );
                        window.request_redraw();
                    }
                }
                _ => {}
            }
        })
        .map_err(|error| anyhow!("play event loop terminated: {error}"))
}

fn draw(
    surface: &wgpu::Surface<'_>,
    gpu_context: &RendererGpuContext,
    surface_config: &wgpu::SurfaceConfiguration,
    scene: &mut Scene,
    renderer: &mut Renderer,
    pointer: Vec2,
) {
    let frame = match surface.get_current_texture() {
        Ok(frame) => frame,
        Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
            surface.configure(&gpu_context.device, surface_config);
            return;
        }
        Err(wgpu::SurfaceError::Timeout) => return,
        Err(wgpu::SurfaceError::OutOfMemory) => {
            log::error!("surface out of memory");
            return;
        }
    };
    let view = frame
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());

    let result = scene
        .advance_with_pointer(pointer)
        .and_then(|uniforms| renderer.render_frame_to_view(uniforms, &view));
    if let Err(error) = result {
        log::error!("render error: {error:#}");
    }
    frame.present();
}

fn try_hot_reload(
    scene_path: &Path,
    registry: &MaterialRegistry,
    gpu_context: &RendererGpuContext,
    surface_config: &wgpu::SurfaceConfiguration,
    scene: &mut Scene,
    renderer: &mut Renderer,
) {
    let reloaded = load_scene(scene_path)
        .and_then(Scene::mount)
        .and_then(|mut next_scene| {
            next_scene.resize(surface_size(surface_config))?;
            let next_renderer =
                Renderer::new_with_context(&next_scene, registry, gpu_context, surface_config.format)?;
            Ok((next_scene, next_renderer))
        });

    match reloaded {
        Ok((next_scene, next_renderer)) => {
            *scene = next_scene;
            *renderer = next_renderer;
            log::info!(
                "reloaded {} (material {})",
                scene_path.display(),
                scene.config.material
            );
        }
        Err(error) => log::error!("reload failed, keeping previous scene: {error:#}"),
    }
}

fn surface_size(config: &wgpu::SurfaceConfiguration) -> Vec2 {
    Vec2::new(config.width as f32, config.height as f32)
}

fn should_reload(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any
    )
}

fn event_targets_scene(event: &Event, scene_path: &Path) -> bool {
    if event.paths.is_empty() {
        return true;
    }
    event.paths.iter().any(|path| {
        path == scene_path
            || std::fs::canonicalize(path)
                .map(|resolved| resolved == scene_path)
                .unwrap_or(false)
    })
}

fn canonical_scene_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Maps are uploaded as linear `Rgba8Unorm`, so present without an sRGB encode
/// to match offline renders.
fn pick_surface_format(formats: &[wgpu::TextureFormat]) -> Result<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .or_else(|| formats.first().copied())
        .ok_or_else(|| anyhow!("surface reports no supported formats"))
}

#[cfg(test)]
mod tests {
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    use super::*;

    #[test]
    fn prefers_linear_surface_formats() {
        let formats = [
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm,
        ];
        assert_eq!(
            pick_surface_format(&formats).expect("format"),
            wgpu::TextureFormat::Bgra8Unorm
        );
        assert!(pick_surface_format(&[]).is_err());
    }

    #[test]
    fn reload_ignores_removals() {
        let path = PathBuf::from("/tmp/scene.yaml");
        let modify = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path.clone());
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());
        assert!(should_reload(&modify) && event_targets_scene(&modify, &path));
        assert!(should_reload(&create));
        assert!(!should_reload(&remove));
    }

    #[test]
    fn events_for_other_files_are_ignored() {
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/tmp/other.yaml"));
        assert!(!event_targets_scene(&event, Path::new("/tmp/scene.yaml")));
    }
}
