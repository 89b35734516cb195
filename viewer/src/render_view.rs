//! Hosts a [`WorldRenderer`] against a small synthetic demo scene and
//! presents the rendered frame as an egui texture, since this crate has no
//! VFS/asset loader of its own (render has none either, by design).

use std::time::Instant;

use render::math::{Mat4, Vec3};
use render::pixel::{Pixel, PixelLanes};
use render::resources::{MapData, MapState, Settings};
use render::{RenderingContext, WorldRenderer};

use crate::ui_traits::UiTool;

const WIDTH: u32 = 480;
const HEIGHT: u32 = 320;
const ROOM_SIZE: u32 = 4;

/// Builds the combined view-rotation-and-projection matrix expected by
/// `WorldRenderer::draw`: world Z is up, so the camera's yaw rotates the XY
/// ground plane, an axis swap brings forward into the projection's
/// depth-carrying row, and the projection row turns view-space depth into
/// the homogeneous `w` the rasterizer divides by.
fn view_rot_proj(yaw: f32, aspect: f32, fov_y: f32) -> Mat4 {
    let yawed = Mat4::rotate_z(yaw);
    let axis_swap = Mat4([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);
    let y_scale = 1.0 / (fov_y * 0.5).tan();
    let x_scale = y_scale / aspect;
    let projection = Mat4([
        [x_scale, 0.0, 0.0, 0.0],
        [0.0, y_scale, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0, 0.0],
    ]);
    projection.mul(axis_swap).mul(yawed)
}

pub struct RenderView {
    renderer: WorldRenderer,
    map: MapData,
    state: MapState,
    pixels: Vec<u32>,
    palette: [u32; 256],
    started: Instant,
    texture: Option<egui::TextureHandle>,
}

impl Default for RenderView {
    fn default() -> Self {
        let (map, state) = render::demo_scene::room(ROOM_SIZE);
        Self {
            renderer: WorldRenderer::new((WIDTH, HEIGHT), map.static_walls.len(), 0, map.floor_ceiling_cells.len()),
            map,
            state,
            pixels: vec![0u32; (WIDTH * HEIGHT) as usize],
            palette: [0u32; 256],
            started: Instant::now(),
            texture: None,
        }
    }
}

impl RenderView {
    fn render_frame(&mut self) {
        self.renderer.set_settings(Settings::default());
        let elapsed = self.started.elapsed().as_secs_f32();
        let yaw = elapsed * 0.4;
        let camera = Vec3::new(ROOM_SIZE as f32 / 2.0, ROOM_SIZE as f32 / 2.0, 1.6);
        let view_rot_proj = view_rot_proj(yaw, WIDTH as f32 / HEIGHT as f32, 70f32.to_radians());

        let mut ctx =
            RenderingContext::new(&mut self.pixels, WIDTH, (WIDTH, HEIGHT), PixelLanes::RGBA, &self.palette);
        self.renderer.draw(&mut ctx, &self.map, &self.state, view_rot_proj, camera, &[], 0);
    }

    fn upload_texture(&mut self, ctx: &egui::Context) -> egui::TextureHandle {
        let mut rgba = Vec::with_capacity(self.pixels.len() * 4);
        for &raw in &self.pixels {
            let p = Pixel(raw);
            rgba.push(p.r(PixelLanes::RGBA));
            rgba.push(p.g(PixelLanes::RGBA));
            rgba.push(p.b(PixelLanes::RGBA));
            rgba.push(255);
        }
        let image = egui::ColorImage::from_rgba_unmultiplied([WIDTH as usize, HEIGHT as usize], &rgba);
        match &mut self.texture {
            Some(handle) => {
                handle.set(image, egui::TextureOptions::NEAREST);
                handle.clone()
            }
            None => {
                let handle = ctx.load_texture("render-view", image, egui::TextureOptions::NEAREST);
                self.texture = Some(handle.clone());
                handle
            }
        }
    }
}

impl UiTool for RenderView {
    fn name(&self) -> &'static str {
        "Render View"
    }

    fn show(&mut self, ctx: &egui::Context, open: &mut bool) {
        self.render_frame();
        let texture = self.upload_texture(ctx);
        egui::Window::new(self.name())
            .default_width(WIDTH as f32)
            .open(open)
            .show(ctx, |ui| {
                ui.image(&texture);
            });
    }
}
