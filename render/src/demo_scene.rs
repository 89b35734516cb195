//! Synthetic scene builders (§10.2): a single textured wall, a floor/ceiling
//! grid and a cube model, assembled without a VFS. Used by `viewer`'s demo
//! harness and by tests that want a populated [`MapData`]/[`MapState`]
//! without loading real map files.

use crate::bsp::{BspTree, WallSegment};
use crate::math::Vec3;
use crate::pixel::{Pixel, PixelLanes};
use crate::resources::{
    FloorCeilingCellDesc, FloorCeilingTexture, MapData, MapModel, MapState, MipLevel,
    ModelInstance, ModelTriangle, StaticWall, WallTexture,
};

/// A checkerboard mip, `tile` texels per square, alternating `a`/`b`.
#[must_use]
pub fn checker_mip(width: u32, height: u32, a: Pixel, b: Pixel) -> MipLevel {
    let tile = (width.max(1) / 8).max(1);
    let texels = (0..width * height)
        .map(|i| {
            let x = i % width;
            let y = i / width;
            if (x / tile + y / tile) % 2 == 0 { a } else { b }
        })
        .collect();
    MipLevel { width, height, texels }
}

/// A single 64px-wide brick wall texture with its four mips.
#[must_use]
pub fn wall_texture(a: Pixel, b: Pixel) -> WallTexture {
    let mips = [
        checker_mip(64, 64, a, b),
        checker_mip(32, 32, a, b),
        checker_mip(16, 16, a, b),
        checker_mip(8, 8, a, b),
    ];
    WallTexture::new(64, mips, (0, 64), false).expect("64px wall texture is canonical")
}

/// A 64x64 floor/ceiling texture with its three mips.
#[must_use]
pub fn floor_ceiling_texture(a: Pixel, b: Pixel) -> FloorCeilingTexture {
    FloorCeilingTexture { mips: [checker_mip(64, 64, a, b), checker_mip(32, 32, a, b), checker_mip(16, 16, a, b)] }
}

/// An axis-aligned unit cube model, centered at its base, one solid-color
/// texel; each face's quad gets the canonical 0..1 unit-square UVs (§4.6.8f),
/// scaled to this model's 1x1 texture size so every texel lookup lands on
/// the same pixel regardless of where on the face it samples.
#[must_use]
pub fn cube_model(color: Pixel) -> MapModel {
    let h = 0.5;
    let animation_vertices = vec![
        Vec3::new(-h, -h, 0.0),
        Vec3::new(h, -h, 0.0),
        Vec3::new(h, h, 0.0),
        Vec3::new(-h, h, 0.0),
        Vec3::new(-h, -h, 2.0 * h),
        Vec3::new(h, -h, 2.0 * h),
        Vec3::new(h, h, 2.0 * h),
        Vec3::new(-h, h, 2.0 * h),
    ];
    const FACES: [[u32; 4]; 6] = [
        [0, 1, 2, 3], // bottom
        [4, 5, 6, 7], // top
        [0, 1, 5, 4], // front
        [1, 2, 6, 5], // right
        [2, 3, 7, 6], // back
        [3, 0, 4, 7], // left
    ];
    const FACE_UV: [(f32, f32); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
    let triangles = FACES
        .iter()
        .flat_map(|f| {
            [
                ModelTriangle {
                    indices: [f[0], f[1], f[2]],
                    tex_coords: [FACE_UV[0], FACE_UV[1], FACE_UV[2]],
                    alpha_test_mask: false,
                },
                ModelTriangle {
                    indices: [f[0], f[2], f[3]],
                    tex_coords: [FACE_UV[0], FACE_UV[2], FACE_UV[3]],
                    alpha_test_mask: false,
                },
            ]
        })
        .collect();
    MapModel {
        animation_vertices,
        frames: vec![triangles],
        texture_size: (1, 1),
        texture_data: vec![color],
        fullbright: false,
    }
}

/// A closed `size`x`size` room: perimeter walls, a full floor/ceiling grid
/// and one cube model placed at its center, wired into a BSP tree.
#[must_use]
pub fn room(size: u32) -> (MapData, MapState) {
    let s = size as f32;
    let corners = [((0.0, 0.0), (s, 0.0)), ((s, 0.0), (s, s)), ((s, s), (0.0, s)), ((0.0, s), (0.0, 0.0))];
    let static_walls: Vec<StaticWall> = corners
        .iter()
        .map(|&(v0, v1)| StaticWall { v0, v1, tex_coord_u_range: (0.0, s), texture_id: 0, lightmap: [220; 8], height: 3.0 })
        .collect();
    let segments: Vec<WallSegment> = static_walls
        .iter()
        .enumerate()
        .map(|(i, wall)| WallSegment {
            wall_index: i,
            v0: wall.v0,
            v1: wall.v1,
            start_tc_u: wall.tex_coord_u_range.0,
            end_tc_u: wall.tex_coord_u_range.1,
        })
        .collect();

    let mut floor_ceiling_cells = vec![FloorCeilingCellDesc { texture_id: u32::MAX, lightmap: [[0; 4]; 4] }; 256 * 256];
    for y in 0..size {
        for x in 0..size {
            floor_ceiling_cells[(y * 256 + x) as usize] =
                FloorCeilingCellDesc { texture_id: 0, lightmap: [[200; 4]; 4] };
        }
    }

    let brick = Pixel::pack(PixelLanes::RGBA, 150, 60, 40, 255);
    let mortar = Pixel::pack(PixelLanes::RGBA, 90, 90, 90, 255);
    let floor_tint = Pixel::pack(PixelLanes::RGBA, 80, 100, 120, 255);
    let floor_dark = Pixel::pack(PixelLanes::RGBA, 40, 50, 60, 255);
    let ceiling_tint = Pixel::pack(PixelLanes::RGBA, 60, 60, 80, 255);
    let ceiling_dark = Pixel::pack(PixelLanes::RGBA, 30, 30, 40, 255);

    let map = MapData {
        static_walls,
        wall_textures: vec![wall_texture(brick, mortar)],
        floor_textures: vec![floor_ceiling_texture(floor_tint, floor_dark)],
        ceiling_textures: vec![floor_ceiling_texture(ceiling_tint, ceiling_dark)],
        floor_ceiling_cells,
        lightmap: vec![255; 256 * 256],
        models: vec![cube_model(Pixel::pack(PixelLanes::RGBA, 200, 180, 40, 255))],
        sprites: Vec::new(),
        sky_texture: None,
        bsp: BspTree::build(segments),
        first_transparent_texture_id: u32::MAX,
        walls_height: 3.0,
    };

    let state = MapState {
        dynamic_walls: Vec::new(),
        static_models: vec![ModelInstance { model_index: 0, frame: 0, position: Vec3::new(s / 2.0, s / 2.0, 0.0), angle: 0.0, entity_id: 1 }],
        items: Vec::new(),
        dynamic_items: Vec::new(),
        rockets: Vec::new(),
        monsters: Vec::new(),
        sprite_effects: Vec::new(),
    };

    (map, state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_builds_four_walls_and_one_model() {
        let (map, state) = room(4);
        assert_eq!(map.static_walls.len(), 4);
        assert_eq!(map.models.len(), 1);
        assert_eq!(state.static_models.len(), 1);
    }

    #[test]
    fn cube_model_has_six_faces_of_two_triangles() {
        let model = cube_model(Pixel::default());
        assert_eq!(model.frames[0].len(), 12);
    }
}
