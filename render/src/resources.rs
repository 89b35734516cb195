//! External interface data: the read-only resource handles the world
//! render driver consumes (§6). VFS/archive I/O, parsing and palette
//! loading are out of scope here — these types describe the *shape* of
//! already-loaded data, not how it got loaded.

use crate::pixel::{Pixel, PixelLanes};
use crate::math::Vec3;
use macros::log_once;

/// A 256x3 table mapping a 1-byte color index to 24-bit RGB, as loaded
/// from the game's data files.
#[derive(Debug, Clone)]
pub struct Palette {
    pub rgb: [[u8; 3]; 256],
}

impl Palette {
    /// Pre-packs this palette into the active pixel layout; index 255 is
    /// treated as fully transparent (alpha lane = 0) per §3.
    #[must_use]
    pub fn transform(&self, lanes: PixelLanes) -> [Pixel; 256] {
        let mut out = [Pixel::default(); 256];
        for (i, rgb) in self.rgb.iter().enumerate() {
            let alpha = if i == 255 { 0 } else { 255 };
            out[i] = Pixel::pack(lanes, rgb[0], rgb[1], rgb[2], alpha);
        }
        out
    }
}

/// One mip level of an RGBA texture: `alpha-aware averaging` (§3) already
/// applied by the loader, held here as plain data.
#[derive(Debug, Clone)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<Pixel>,
}

/// A wall texture: four mips, vertical trim rows, and the alpha-hole flag
/// the surface cache and C7 both consult (§3, §4.6.3).
#[derive(Debug, Clone)]
pub struct WallTexture {
    pub surface_width: u32,
    pub mips: [MipLevel; 4],
    /// Topmost and bottommost rows containing any non-alpha texel.
    pub full_alpha_row: (u32, u32),
    pub has_alpha: bool,
}

impl WallTexture {
    /// Validates the construction precondition from §7: dimensions must be
    /// power-of-two and match the canonical wall height (64px).
    pub fn new(surface_width: u32, mips: [MipLevel; 4], full_alpha_row: (u32, u32), has_alpha: bool) -> Result<Self, String> {
        if !surface_width.is_power_of_two() || (surface_width != 64 && surface_width != 128) {
            return Err(format!("wall texture width {surface_width} is not 64 or 128"));
        }
        Ok(Self { surface_width, mips, full_alpha_row, has_alpha })
    }
}

/// A floor/ceiling texture: 64x64 with 3 pre-built mips, always opaque.
#[derive(Debug, Clone)]
pub struct FloorCeilingTexture {
    pub mips: [MipLevel; 3],
}

/// A sprite texture: no mips, with a frame strip.
#[derive(Debug, Clone)]
pub struct SpriteTexture {
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
    pub texels: Vec<Pixel>,
}

/// A single tileable-in-X/Y sky layer.
#[derive(Debug, Clone)]
pub struct SkyTexture {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<Pixel>,
}

/// A static wall as stored in map data.
#[derive(Debug, Clone)]
pub struct StaticWall {
    pub v0: (f32, f32),
    pub v1: (f32, f32),
    pub tex_coord_u_range: (f32, f32),
    pub texture_id: u32,
    /// 8-texel lightmap for this wall.
    pub lightmap: [u8; 8],
    pub height: f32,
}

/// A dynamic wall, mirrored in `MapState` rather than the static BSP.
#[derive(Debug, Clone)]
pub struct DynamicWall {
    pub v0: (f32, f32),
    pub v1: (f32, f32),
    pub tex_coord_u_range: (f32, f32),
    pub texture_id: u32,
    pub height: f32,
}

/// One cell's floor or ceiling descriptor.
#[derive(Debug, Clone, Copy)]
pub struct FloorCeilingCellDesc {
    pub texture_id: u32,
    /// 4x4 lightmap grid over the cell.
    pub lightmap: [[u8; 4]; 4],
}

/// A map model's single animation frame: triangle indices into
/// `animation_vertices`, plus one texture coordinate per vertex, already
/// scaled to the model's texture size in texels (§4.6.8f).
#[derive(Debug, Clone, Copy)]
pub struct ModelTriangle {
    pub indices: [u32; 3],
    pub tex_coords: [(f32, f32); 3],
    pub alpha_test_mask: bool,
}

/// A map model: static geometry + animation frames, consumed read-only.
#[derive(Debug, Clone)]
pub struct MapModel {
    /// Base vertex positions, fixed-point-scaled by `1/2048` per §4.6.8f.
    pub animation_vertices: Vec<Vec3>,
    pub frames: Vec<Vec<ModelTriangle>>,
    pub texture_size: (u32, u32),
    pub texture_data: Vec<Pixel>,
    pub fullbright: bool,
}

/// An instance of a `MapModel` placed in the world: static model, item,
/// dynamic item, rocket, or monster, all share this shape in `MapState`.
#[derive(Debug, Clone, Copy)]
pub struct ModelInstance {
    pub model_index: usize,
    pub frame: usize,
    pub position: Vec3,
    pub angle: f32,
    pub entity_id: u32,
}

/// One sprite-effect instance (particles, explosions).
#[derive(Debug, Clone, Copy)]
pub struct SpriteEffect {
    pub sprite_index: usize,
    pub position: Vec3,
    pub frame: u32,
    pub half_size: bool,
    pub light_on: bool,
}

/// Static map geometry, textures, lightmap and BSP tree: the read-only
/// per-map resource handle (§6).
pub struct MapData {
    pub static_walls: Vec<StaticWall>,
    pub wall_textures: Vec<WallTexture>,
    pub floor_textures: Vec<FloorCeilingTexture>,
    pub ceiling_textures: Vec<FloorCeilingTexture>,
    pub floor_ceiling_cells: Vec<FloorCeilingCellDesc>,
    pub lightmap: Vec<u8>, // 256x256
    pub models: Vec<MapModel>,
    pub sprites: Vec<SpriteTexture>,
    pub sky_texture: Option<SkyTexture>,
    pub bsp: crate::bsp::BspTree,
    /// First texture id treated as transparent for back-face culling
    /// purposes (§9 open question: carried as map data, not a magic
    /// constant).
    pub first_transparent_texture_id: u32,
    pub walls_height: f32,
}

/// Dynamic per-frame game state: dynamic walls, models, items, rockets,
/// monsters, sprite effects. Read-only to the renderer (§6).
pub struct MapState {
    pub dynamic_walls: Vec<DynamicWall>,
    pub static_models: Vec<ModelInstance>,
    pub items: Vec<ModelInstance>,
    pub dynamic_items: Vec<ModelInstance>,
    pub rockets: Vec<ModelInstance>,
    pub monsters: Vec<ModelInstance>,
    pub sprite_effects: Vec<SpriteEffect>,
}

impl MapState {
    /// Logs (once) the first time a deprecated `XMove`/`YMove` level-set
    /// command form is observed, per §9's open question. The actual
    /// command parsing is out of scope; callers that do parse commands can
    /// route the deprecated-form notice through here.
    pub fn note_deprecated_move_command(kind: &str) {
        log_once!("deprecated level-set command form used: {kind} (behaves identically to Move)");
    }
}

/// Runtime-readable settings; the only other input besides resources and
/// view state that affects the core (§6).
#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    pub debug_draw_depth_hierarchy: bool,
    pub debug_draw_occlusion_buffer: bool,
}

/// A read-only description of the weapon view model, for the supplemented
/// `draw_weapon` entry point (§10.1).
#[derive(Debug, Clone, Copy)]
pub struct WeaponState {
    pub model_index: usize,
    pub frame: usize,
    pub fullbright: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn palette_index_255_is_transparent() {
        let mut rgb = [[10, 20, 30]; 256];
        rgb[255] = [0, 0, 0];
        let palette = Palette { rgb };
        let transformed = palette.transform(PixelLanes::RGBA);
        assert_eq!(transformed[255].a(PixelLanes::RGBA), 0);
        assert_eq!(transformed[0].a(PixelLanes::RGBA), 255);
    }

    #[test]
    fn wall_texture_rejects_bad_width() {
        let mip = MipLevel { width: 1, height: 1, texels: vec![Pixel::default()] };
        let mips = [mip.clone(), mip.clone(), mip.clone(), mip];
        let result = WallTexture::new(50, mips, (0, 64), false);
        assert!(result.is_err());
    }

    #[test]
    fn wall_texture_accepts_canonical_widths() {
        let mip = MipLevel { width: 1, height: 1, texels: vec![Pixel::default()] };
        let mips = [mip.clone(), mip.clone(), mip.clone(), mip];
        assert!(WallTexture::new(64, mips, (0, 64), false).is_ok());
    }
}
