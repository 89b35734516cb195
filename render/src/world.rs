//! World render driver (C7): per-frame orchestration. Clears buffers,
//! draws walls (BSP-ordered), floors/ceilings, sky, builds the depth
//! pyramid, draws models and sprite effects, and runs postprocess.
//!
//! Per §9's "Global mutable state" note, per-frame scratch lives in
//! [`FrameScratch`], owned by [`WorldRenderer`] and reset at the top of
//! `draw`. The renderer is otherwise stateless across frames except for
//! the surface cache and BSP/texture resources (§4.6, "State transitions").

use crate::bsp::WallSegment;
use crate::buffers::{DepthBuffer, DepthPyramid, OcclusionBuffer, OcclusionPyramid};
use crate::clip::clip_polygon;
use crate::context::RenderingContext;
use crate::math::{Mat4, Plane, Vec3};
use crate::pixel::Pixel;
use crate::raster::{draw_triangle, PixelSurface, TextureView, TexturingMode};
use crate::resources::{FloorCeilingTexture, MapData, MapState, ModelInstance, Settings, WeaponState};
use crate::surface_cache::{OwnerHandle, OwnerSurfaces, SurfaceCache};
use crate::vertex::RasterizerVertex;
use fixedmath::fixed16_from_f32;
use macros::log_once;

/// Overbright scale applied by the surface cache when baking lightmaps,
/// grounded on `ScaleLightmapLight` in the original renderer.
const OVERBRIGHT: f32 = 1.3;

/// Tag bits distinguishing static-wall, floor-cell and ceiling-cell owner
/// handles that all share the one surface cache arena (§4.4: "owner (a
/// `DrawWall` or a `FloorCeilingCell`)"). Every `SurfaceCache::allocate` call
/// site resolves evicted victims through [`owner_surfaces_for`] using these
/// tags, since a wrap can evict a slot belonging to any of the three
/// categories, not just the one currently allocating.
const OWNER_TAG_MASK: u32 = 0xC000_0000;
const FLOOR_OWNER_TAG: u32 = 1 << 30;
const CEILING_OWNER_TAG: u32 = 1 << 31;

/// Wall textures are always 64 texel rows tall at mip 0, the space
/// `WallTexture::full_alpha_row` is expressed in (§4.6.3).
const CANONICAL_WALL_ROWS: f32 = 64.0;

/// Per-frame scratch: clipped polygon storage and sprite sort order,
/// reset at the top of every `draw` call.
#[derive(Default)]
pub struct FrameScratch {
    sorted_sprite_indices: Vec<usize>,
}

impl FrameScratch {
    fn reset(&mut self) {
        self.sorted_sprite_indices.clear();
    }
}

/// Owns everything that persists across frames: the surface cache, its
/// per-owner back-pointer tables, and the depth/occlusion buffers.
pub struct WorldRenderer {
    viewport: (u32, u32),
    surface: PixelSurface,
    depth: DepthBuffer,
    occlusion: OcclusionBuffer,
    occlusion_pyramid: OcclusionPyramid,
    surface_cache: SurfaceCache,
    static_wall_surfaces: Vec<OwnerSurfaces>,
    dynamic_wall_surfaces: Vec<OwnerSurfaces>,
    dynamic_wall_last_texture_id: Vec<Option<u32>>,
    cell_surfaces: Vec<OwnerSurfaces>,
    cell_ceiling_surfaces: Vec<OwnerSurfaces>,
    scratch: FrameScratch,
    settings: Settings,
}

impl WorldRenderer {
    #[must_use]
    pub fn new(viewport: (u32, u32), static_wall_count: usize, dynamic_wall_count: usize, cell_count: usize) -> Self {
        let (w, h) = (viewport.0 as usize, viewport.1 as usize);
        Self {
            viewport,
            surface: PixelSurface::new(w, h, crate::pixel::PixelLanes::RGBA),
            depth: DepthBuffer::new(w, h),
            occlusion: OcclusionBuffer::new(w, h),
            occlusion_pyramid: OcclusionPyramid::new(w, h),
            surface_cache: SurfaceCache::new(w * h),
            static_wall_surfaces: vec![OwnerSurfaces::default(); static_wall_count],
            dynamic_wall_surfaces: vec![OwnerSurfaces::default(); dynamic_wall_count],
            dynamic_wall_last_texture_id: vec![None; dynamic_wall_count],
            cell_surfaces: vec![OwnerSurfaces::default(); cell_count],
            cell_ceiling_surfaces: vec![OwnerSurfaces::default(); cell_count],
            scratch: FrameScratch::default(),
            settings: Settings::default(),
        }
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    /// The primary entry point (§6, §4.6). A zero-area viewport or a map
    /// with no static walls is a no-op (§4.6, "Failure semantics").
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        ctx: &mut RenderingContext,
        map: &MapData,
        map_state: &MapState,
        view_rot_proj: Mat4,
        camera: Vec3,
        clip_planes: &[Plane],
        hide_entity_id: u32,
    ) {
        if ctx.viewport.0 == 0 || ctx.viewport.1 == 0 {
            return;
        }
        self.scratch.reset();

        // 1. Clear.
        self.depth.clear();
        self.occlusion.clear();
        self.occlusion_pyramid.clear();

        // 2. View transform: translate(-camera) . viewRotProj . scaleY(-1).
        let cam_mat = Mat4::scale(1.0, -1.0, 1.0)
            .mul(view_rot_proj)
            .mul(Mat4::translation(Vec3::new(-camera.x, -camera.y, -camera.z)));

        // 3. Static walls, BSP front-to-back.
        self.draw_static_walls(map, cam_mat, camera, clip_planes);

        // 4. Dynamic walls.
        self.draw_dynamic_walls(map, map_state, cam_mat, clip_planes);

        // 5. Floors and ceilings.
        self.draw_floors_and_ceilings(map, cam_mat, clip_planes);

        // 6. Sky.
        if map.sky_texture.is_some() {
            self.draw_sky(map, cam_mat);
        }

        // 7. Depth pyramid.
        let depth_pyramid = DepthPyramid::build(&self.depth);

        // 8. Models.
        self.draw_models(map, map_state, cam_mat, camera, clip_planes, hide_entity_id, &depth_pyramid);

        // 9. Sprite effects.
        self.draw_sprites(map, map_state, cam_mat, camera);

        // 10. Postprocess: debug overlays only (no-op without a host-side
        // overlay surface; the flags are honored by logging their state
        // once so host integrations can wire up actual drawing).
        if self.settings.debug_draw_depth_hierarchy {
            log_once!("r_debug_draw_depth_hierarchy is set; host must render the overlay");
        }
        if self.settings.debug_draw_occlusion_buffer {
            log_once!("r_debug_draw_occlusion_buffer is set; host must render the overlay");
        }

        self.blit(ctx);
    }

    /// A second, independent entry point for the screen-locked weapon view
    /// model (§10.1): no frustum culling, no BSP/occlusion, reuses the
    /// model triangle path with `DepthTest=Yes, DepthWrite=Yes,
    /// Lighting=Yes`.
    pub fn draw_weapon(
        &mut self,
        ctx: &mut RenderingContext,
        map: &MapData,
        weapon_state: &WeaponState,
        projection: Mat4,
        camera_position: Vec3,
        x_angle: f32,
        z_angle: f32,
    ) {
        let Some(model) = map.models.get(weapon_state.model_index) else {
            log_once!("draw_weapon: model index {} out of bounds", weapon_state.model_index);
            return;
        };
        let Some(frame) = model.frames.get(weapon_state.frame) else {
            log_once!("draw_weapon: frame index {} out of bounds", weapon_state.frame);
            return;
        };

        let rotation = Mat4::rotate_x(x_angle).mul(Mat4::rotate_z(z_angle - std::f32::consts::FRAC_PI_2));
        let cam_mat = projection.mul(Mat4::translation(camera_position)).mul(rotation);

        let light = if weapon_state.fullbright || model.fullbright { 1.0 } else { OVERBRIGHT };
        let texture = TextureView { width: model.texture_size.0, height: model.texture_size.1, texels: &model.texture_data };

        for tri in frame {
            let verts: Vec<(Vec3, (f32, f32))> = tri
                .indices
                .iter()
                .zip(tri.tex_coords)
                .map(|(&idx, tc)| (model.animation_vertices[idx as usize], tc))
                .collect();
            let Some(projected) = project_triangle(cam_mat, self.viewport, &verts, light) else { continue };

            if tri.alpha_test_mask {
                draw_triangle::<true, true, true, false, false, true>(
                    &mut self.surface, &mut self.depth, &mut self.occlusion, projected, texture, TexturingMode::Affine,
                );
            } else {
                draw_triangle::<true, true, false, false, false, true>(
                    &mut self.surface, &mut self.depth, &mut self.occlusion, projected, texture, TexturingMode::Affine,
                );
            }
        }

        self.blit(ctx);
    }

    fn draw_static_walls(&mut self, map: &MapData, cam_mat: Mat4, camera: Vec3, clip_planes: &[Plane]) {
        let mut segments = Vec::new();
        map.bsp.enumerate_segments_front_to_back((camera.x, camera.y), &mut |seg| segments.push(*seg));

        for seg in segments {
            self.draw_one_static_wall(map, cam_mat, camera, clip_planes, &seg);
        }
    }

    fn draw_one_static_wall(&mut self, map: &MapData, cam_mat: Mat4, camera: Vec3, clip_planes: &[Plane], seg: &WallSegment) {
        let Some(wall) = map.static_walls.get(seg.wall_index) else {
            log_once!("static wall index {} out of bounds", seg.wall_index);
            return;
        };
        let Some(texture) = map.wall_textures.get(wall.texture_id as usize) else {
            log_once!("wall texture id {} out of bounds", wall.texture_id);
            return;
        };

        // Back-face cull (opaque textures only, §4.6.3).
        if wall.texture_id < map.first_transparent_texture_id {
            let to_camera = Vec3::new(camera.x - seg.v0.0, camera.y - seg.v0.1, 0.0);
            let edge = Vec3::new(seg.v1.0 - seg.v0.0, seg.v1.1 - seg.v0.1, 0.0);
            if to_camera.cross_xy(edge) <= 0.0 {
                return;
            }
        }

        let (trim_top, trim_bottom) = texture.full_alpha_row;
        if trim_top >= trim_bottom {
            // Entire drawable region is above/below the texture's painted
            // band (§8): skip before touching the cache at all.
            return;
        }

        // z_top/z_bottom shrink from the wall's full height to just the
        // band the texture actually paints, per §4.6.3's "ztop includes the
        // trim-row offset from its texture".
        let z_top = wall.height * (1.0 - trim_top as f32 / CANONICAL_WALL_ROWS);
        let z_bottom = wall.height * (1.0 - trim_bottom as f32 / CANONICAL_WALL_ROWS);
        // tc v is relative to the baked (trimmed) surface's own rows, the
        // same way floor/ceiling tc stays in that texture's own texel units
        // regardless of which mip ends up baked.
        let v_top = 0.0;
        let v_bottom = (trim_bottom - trim_top) as f32;
        let poly = [
            (Vec3::new(seg.v0.0, seg.v0.1, z_bottom), (seg.start_tc_u, v_bottom)),
            (Vec3::new(seg.v0.0, seg.v0.1, z_top), (seg.start_tc_u, v_top)),
            (Vec3::new(seg.v1.0, seg.v1.1, z_top), (seg.end_tc_u, v_top)),
            (Vec3::new(seg.v1.0, seg.v1.1, z_bottom), (seg.end_tc_u, v_bottom)),
        ];
        let clipped = clip_polygon(&poly, clip_planes);
        if clipped.len() < 3 {
            return;
        }

        let Some((xmin, ymin, xmax, ymax)) = screen_aabb(cam_mat, self.viewport, &clipped) else { return };
        if self.occlusion_pyramid.is_occluded(xmin, ymin, xmax, ymax) {
            return;
        }

        let mip = select_mip_from_span(xmax - xmin, ymax - ymin);
        let owner = OwnerHandle(seg.wall_index as u32);
        let idx = seg.wall_index;
        let mut owner_surfaces = self.static_wall_surfaces[idx];
        let cached = self.surface_cache.lookup(&owner_surfaces, mip).map(|(w, h, p)| (w, h, p.to_vec()));
        let (surf_w, surf_h, pixels) = if let Some(v) = cached {
            v
        } else {
            let mip_level = &texture.mips[mip];
            let w = mip_level.width as usize;
            let scale = mip_level.height as f32 / CANONICAL_WALL_ROWS;
            let row_offset = ((trim_top as f32 * scale).round() as usize).min(mip_level.height as usize - 1);
            let row_count = (((trim_bottom - trim_top) as f32 * scale).round() as usize)
                .max(1)
                .min(mip_level.height as usize - row_offset);
            let h = row_count;
            let lightmap = wall.lightmap;
            let static_wall_surfaces = &mut self.static_wall_surfaces;
            let cell_surfaces = &mut self.cell_surfaces;
            let cell_ceiling_surfaces = &mut self.cell_ceiling_surfaces;
            self.surface_cache.allocate(
                owner,
                &mut owner_surfaces,
                mip,
                w,
                h,
                &mut |h| owner_surfaces_for(h, static_wall_surfaces, cell_surfaces, cell_ceiling_surfaces),
                |buf| bake_wall_surface(buf, mip_level, &lightmap, w, row_offset),
            );
            // Only this mip's slot is ours to commit: `allocate`'s eviction
            // loop may already have nulled one of this same owner's *other*
            // mip slots directly in the real table (self-collision on wrap),
            // and overwriting the whole entry with our stale local copy
            // would resurrect that freed slot index (§9 back-pointers).
            self.static_wall_surfaces[idx].slots[mip] = owner_surfaces.slots[mip];
            let (w2, h2, p) = self.surface_cache.lookup(&owner_surfaces, mip).expect("just allocated");
            (w2, h2, p.to_vec())
        };

        let texture_view = TextureView { width: surf_w as u32, height: surf_h as u32, texels: &pixels };
        let mode = triangle_mode(cam_mat, self.viewport, &clipped);

        for tri in fan_triangulate(&clipped) {
            let Some(verts) = project_triangle(cam_mat, self.viewport, &tri, 1.0) else { continue };
            if texture.has_alpha {
                draw_triangle::<false, true, true, true, true, false>(
                    &mut self.surface, &mut self.depth, &mut self.occlusion, verts, texture_view, mode,
                );
            } else {
                draw_triangle::<false, true, false, true, true, false>(
                    &mut self.surface, &mut self.depth, &mut self.occlusion, verts, texture_view, mode,
                );
            }
        }

        self.occlusion_pyramid.update(&self.occlusion, xmin, ymin, xmax, ymax, texture.has_alpha);
    }

    fn draw_dynamic_walls(&mut self, map: &MapData, map_state: &MapState, cam_mat: Mat4, clip_planes: &[Plane]) {
        for (i, wall) in map_state.dynamic_walls.iter().enumerate() {
            if self.dynamic_wall_last_texture_id[i] != Some(wall.texture_id) {
                self.surface_cache.invalidate_owner(&mut self.dynamic_wall_surfaces[i]);
                self.dynamic_wall_last_texture_id[i] = Some(wall.texture_id);
            }
            let Some(texture) = map.wall_textures.get(wall.texture_id as usize) else { continue };

            let poly = [
                (Vec3::new(wall.v0.0, wall.v0.1, 0.0), (wall.tex_coord_u_range.0, 1.0)),
                (Vec3::new(wall.v0.0, wall.v0.1, wall.height), (wall.tex_coord_u_range.0, 0.0)),
                (Vec3::new(wall.v1.0, wall.v1.1, wall.height), (wall.tex_coord_u_range.1, 0.0)),
                (Vec3::new(wall.v1.0, wall.v1.1, 0.0), (wall.tex_coord_u_range.1, 1.0)),
            ];
            let clipped = clip_polygon(&poly, clip_planes);
            if clipped.len() < 3 {
                continue;
            }
            let mip_level = &texture.mips[0];
            let texture_view = TextureView { width: mip_level.width, height: mip_level.height, texels: &mip_level.texels };
            let mode = triangle_mode(cam_mat, self.viewport, &clipped);
            for tri in fan_triangulate(&clipped) {
                let Some(verts) = project_triangle(cam_mat, self.viewport, &tri, 1.0) else { continue };
                if texture.has_alpha {
                    draw_triangle::<true, true, true, false, true, false>(
                        &mut self.surface, &mut self.depth, &mut self.occlusion, verts, texture_view, mode,
                    );
                } else {
                    draw_triangle::<true, true, false, false, true, false>(
                        &mut self.surface, &mut self.depth, &mut self.occlusion, verts, texture_view, mode,
                    );
                }
            }
        }
    }

    /// Draws both the floor (z=0) and the ceiling (z=`walls_height`) quad
    /// for every non-empty cell, per §4.6.5's "quad at z=0 (floor) or
    /// z=walls_height (ceiling)" — the original `DrawFloorsAndCeilings`
    /// emits both in one pass over each cell, and so do we.
    fn draw_floors_and_ceilings(&mut self, map: &MapData, cam_mat: Mat4, clip_planes: &[Plane]) {
        for (i, cell) in map.floor_ceiling_cells.iter().enumerate() {
            if cell.texture_id == u32::MAX {
                continue; // "empty" sentinel, per §4.6.5
            }

            if let Some(floor_tex) = map.floor_textures.get(cell.texture_id as usize) {
                draw_floor_or_ceiling_cell(
                    &mut self.surface,
                    &mut self.depth,
                    &mut self.occlusion,
                    &mut self.occlusion_pyramid,
                    &mut self.surface_cache,
                    &mut self.static_wall_surfaces,
                    &mut self.cell_surfaces,
                    &mut self.cell_ceiling_surfaces,
                    OwnerHandle(i as u32 | FLOOR_OWNER_TAG),
                    i,
                    self.viewport,
                    cam_mat,
                    clip_planes,
                    0.0,
                    floor_tex,
                    &cell.lightmap,
                );
            }

            if let Some(ceiling_tex) = map.ceiling_textures.get(cell.texture_id as usize) {
                draw_floor_or_ceiling_cell(
                    &mut self.surface,
                    &mut self.depth,
                    &mut self.occlusion,
                    &mut self.occlusion_pyramid,
                    &mut self.surface_cache,
                    &mut self.static_wall_surfaces,
                    &mut self.cell_surfaces,
                    &mut self.cell_ceiling_surfaces,
                    OwnerHandle(i as u32 | CEILING_OWNER_TAG),
                    i,
                    self.viewport,
                    cam_mat,
                    clip_planes,
                    map.walls_height,
                    ceiling_tex,
                    &cell.lightmap,
                );
            }
        }
    }

    fn draw_sky(&mut self, map: &MapData, cam_mat: Mat4) {
        let Some(sky) = &map.sky_texture else { return };
        let texture = TextureView { width: sky.width, height: sky.height, texels: &sky.texels };

        // Six rings, three stacks of quads around the camera (60 quads).
        const RINGS: usize = 6;
        const STACKS: usize = 3;
        for stack in 0..STACKS {
            for ring in 0..RINGS {
                let theta0 = ring as f32 / RINGS as f32 * std::f32::consts::TAU;
                let theta1 = (ring + 1) as f32 / RINGS as f32 * std::f32::consts::TAU;
                let phi0 = stack as f32 / STACKS as f32 * std::f32::consts::PI - std::f32::consts::FRAC_PI_2;
                let phi1 = (stack + 1) as f32 / STACKS as f32 * std::f32::consts::PI - std::f32::consts::FRAC_PI_2;

                let p = |theta: f32, phi: f32| Vec3::new(theta.cos() * phi.cos(), theta.sin() * phi.cos(), phi.sin());
                let u0 = ring as f32 / RINGS as f32 * 5.0;
                let u1 = (ring + 1) as f32 / RINGS as f32 * 5.0;
                let v0 = stack as f32 / STACKS as f32 * 3.0;
                let v1 = (stack + 1) as f32 / STACKS as f32 * 3.0;

                let quad = [
                    (p(theta0, phi0), (u0, v0)),
                    (p(theta1, phi0), (u1, v0)),
                    (p(theta1, phi1), (u1, v1)),
                    (p(theta0, phi1), (u0, v1)),
                ];
                for tri in fan_triangulate(&quad.to_vec()) {
                    let Some(verts) = project_triangle(cam_mat, self.viewport, &tri, 1.0) else { continue };
                    draw_triangle::<false, false, false, true, false, false>(
                        &mut self.surface, &mut self.depth, &mut self.occlusion, verts, texture, TexturingMode::Affine,
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_models(
        &mut self,
        map: &MapData,
        map_state: &MapState,
        cam_mat: Mat4,
        camera: Vec3,
        clip_planes: &[Plane],
        hide_entity_id: u32,
        depth_pyramid: &DepthPyramid,
    ) {
        let groups: [&Vec<ModelInstance>; 5] = [
            &map_state.static_models,
            &map_state.items,
            &map_state.dynamic_items,
            &map_state.rockets,
            &map_state.monsters,
        ];
        for group in groups {
            for instance in group {
                if instance.entity_id == hide_entity_id {
                    continue;
                }
                self.draw_one_model(map, cam_mat, camera, clip_planes, instance, depth_pyramid);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_one_model(
        &mut self,
        map: &MapData,
        cam_mat: Mat4,
        camera: Vec3,
        clip_planes: &[Plane],
        instance: &ModelInstance,
        depth_pyramid: &DepthPyramid,
    ) {
        let Some(model) = map.models.get(instance.model_index) else { return };
        let Some(frame) = model.frames.get(instance.frame) else { return };

        let rotation = Mat4::rotate_z(instance.angle);
        let model_mat = Mat4::translation(instance.position).mul(rotation);

        // Active-plane mask: only planes the AABB straddles matter.
        let local_planes: Vec<Plane> = clip_planes
            .iter()
            .map(|p| p.to_model_local(rotation, instance.position))
            .collect();

        let (xmin, ymin, xmax, ymax, wmax) = {
            let corners = model_aabb_corners(model);
            let mut screen: Option<(f32, f32, f32, f32)> = None;
            let mut wm = f32::MIN;
            for c in corners {
                let world = rotation.transform_point4(c);
                let world = Vec3::new(world[0] + instance.position.x, world[1] + instance.position.y, world[2] + instance.position.z);
                let clip = cam_mat.transform_point4(world);
                if clip[3] <= 1e-5 {
                    continue;
                }
                wm = wm.max(1.0 / clip[3]);
                let (sx, sy) = ndc_to_screen(clip, self.viewport);
                screen = Some(match screen {
                    None => (sx, sy, sx, sy),
                    Some((a, b, c2, d)) => (a.min(sx), b.min(sy), c2.max(sx), d.max(sy)),
                });
            }
            let Some((a, b, c2, d)) = screen else { return };
            (a, b, c2, d, wm)
        };

        if wmax > 0.0 {
            let wmax_fixed = fixed16_from_f32(wmax);
            if depth_pyramid.is_depth_occluded(xmin, ymin, xmax, ymax, wmax_fixed) {
                return;
            }
        }

        let light = if model.fullbright {
            1.0
        } else {
            let centroid = frame
                .first()
                .map(|tri| {
                    let p0 = model.animation_vertices[tri.indices[0] as usize];
                    let p1 = model.animation_vertices[tri.indices[1] as usize];
                    let p2 = model.animation_vertices[tri.indices[2] as usize];
                    Vec3::new((p0.x + p1.x + p2.x) / 3.0, (p0.y + p1.y + p2.y) / 3.0, (p0.z + p1.z + p2.z) / 3.0)
                })
                .unwrap_or_else(|| Vec3::new(instance.position.x, instance.position.y, instance.position.z));
            sample_lightmap(&map.lightmap, centroid) * OVERBRIGHT
        };

        let texture = TextureView { width: model.texture_size.0, height: model.texture_size.1, texels: &model.texture_data };

        for tri in frame {
            let verts: Vec<(Vec3, (f32, f32))> = tri
                .indices
                .iter()
                .zip(tri.tex_coords)
                .map(|(&idx, tc)| (model.animation_vertices[idx as usize], tc))
                .collect();
            let clipped = clip_polygon(&verts, &local_planes);
            if clipped.len() < 3 {
                continue;
            }
            let world_clipped: Vec<(Vec3, (f32, f32))> = clipped
                .iter()
                .map(|&(p, tc)| {
                    let wp = model_mat.transform_point4(p);
                    (Vec3::new(wp[0], wp[1], wp[2]), tc)
                })
                .collect();
            let mode = triangle_mode(cam_mat, self.viewport, &world_clipped);
            for t in fan_triangulate(&world_clipped) {
                let Some(rv) = project_triangle(cam_mat, self.viewport, &t, light) else { continue };
                if tri.alpha_test_mask {
                    draw_triangle::<true, true, true, false, false, true>(
                        &mut self.surface, &mut self.depth, &mut self.occlusion, rv, texture, mode,
                    );
                } else {
                    draw_triangle::<true, true, false, false, false, true>(
                        &mut self.surface, &mut self.depth, &mut self.occlusion, rv, texture, mode,
                    );
                }
            }
            let _ = camera;
        }
    }

    /// Sprite effects are cylindrical billboards: a quad whose horizontal
    /// edge stays perpendicular to the camera-to-sprite vector and whose
    /// vertical edge stays world-up, sorted back-to-front by squared
    /// camera distance (§4.6.9) and rasterized alpha-test-only.
    fn draw_sprites(&mut self, map: &MapData, map_state: &MapState, cam_mat: Mat4, camera: Vec3) {
        let mut order: Vec<usize> = (0..map_state.sprite_effects.len()).collect();
        order.sort_by(|&a, &b| {
            let da = sq_dist(map_state.sprite_effects[a].position, camera);
            let db = sq_dist(map_state.sprite_effects[b].position, camera);
            db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal) // back-to-front
        });
        self.scratch.sorted_sprite_indices = order;

        for &i in &self.scratch.sorted_sprite_indices.clone() {
            let effect = &map_state.sprite_effects[i];
            let Some(sprite) = map.sprites.get(effect.sprite_index) else { continue };

            let scale = if effect.half_size { 0.5 / 128.0 } else { 1.0 / 128.0 };
            let half_w = sprite.width as f32 * scale * 0.5;
            let h = sprite.height as f32 * scale;

            let to_camera = (camera.x - effect.position.x, camera.y - effect.position.y);
            let len = (to_camera.0 * to_camera.0 + to_camera.1 * to_camera.1).sqrt().max(1e-5);
            let right = Vec3::new(-to_camera.1 / len, to_camera.0 / len, 0.0).scale(half_w);

            let base = effect.position;
            let poly = [
                (Vec3::new(base.x - right.x, base.y - right.y, base.z), (0.0, h)),
                (Vec3::new(base.x + right.x, base.y + right.y, base.z), (sprite.width as f32, h)),
                (Vec3::new(base.x + right.x, base.y + right.y, base.z + h), (sprite.width as f32, 0.0)),
                (Vec3::new(base.x - right.x, base.y - right.y, base.z + h), (0.0, 0.0)),
            ];

            let frame_count = sprite.frame_count.max(1);
            let frame = effect.frame % frame_count;
            let frame_width = sprite.width / frame_count.max(1);
            let light = if effect.light_on { 1.0 } else { sample_lightmap(&map.lightmap, effect.position) * OVERBRIGHT };
            let frame_texels = &sprite.texels[(frame * frame_width * sprite.height) as usize..];
            let texture = TextureView { width: frame_width.max(1), height: sprite.height, texels: frame_texels };

            for tri in fan_triangulate(&poly) {
                let Some(verts) = project_triangle(cam_mat, self.viewport, &tri, light) else { continue };
                draw_triangle::<true, false, true, true, false, true>(
                    &mut self.surface, &mut self.depth, &mut self.occlusion, verts, texture, TexturingMode::Affine,
                );
            }
        }
    }

    fn blit(&self, ctx: &mut RenderingContext) {
        for y in 0..self.viewport.1 {
            for x in 0..self.viewport.0 {
                ctx.put(x, y, self.surface.get(x as usize, y as usize));
            }
        }
    }
}

/// Resolves an `OwnerHandle`'s back-pointer table, dispatching on the tag
/// bits set in [`FLOOR_OWNER_TAG`]/[`CEILING_OWNER_TAG`] (untagged handles
/// are static walls). The one shared `SurfaceCache` arena can evict a slot
/// belonging to any of the three owner categories on wrap, so every
/// `allocate` call site must be able to resolve all three, not just its own
/// (§4.4, §9 "Back-pointers in the cache").
fn owner_surfaces_for<'a>(
    h: OwnerHandle,
    static_wall_surfaces: &'a mut [OwnerSurfaces],
    cell_surfaces: &'a mut [OwnerSurfaces],
    cell_ceiling_surfaces: &'a mut [OwnerSurfaces],
) -> &'a mut OwnerSurfaces {
    let idx = (h.0 & !OWNER_TAG_MASK) as usize;
    match h.0 & OWNER_TAG_MASK {
        CEILING_OWNER_TAG => &mut cell_ceiling_surfaces[idx],
        FLOOR_OWNER_TAG => &mut cell_surfaces[idx],
        _ => &mut static_wall_surfaces[idx],
    }
}

/// Draws one floor or ceiling cell's quad at world-space height `z`,
/// shared between the floor and ceiling passes of `draw_floors_and_ceilings`
/// — the two differ only in `z`, the texture array, the owner tag and the
/// owner-surfaces table they bake into.
#[allow(clippy::too_many_arguments)]
fn draw_floor_or_ceiling_cell(
    surface: &mut PixelSurface,
    depth: &mut DepthBuffer,
    occlusion: &mut OcclusionBuffer,
    occlusion_pyramid: &mut OcclusionPyramid,
    surface_cache: &mut SurfaceCache,
    static_wall_surfaces: &mut [OwnerSurfaces],
    cell_surfaces: &mut [OwnerSurfaces],
    cell_ceiling_surfaces: &mut [OwnerSurfaces],
    owner: OwnerHandle,
    cell_index: usize,
    viewport: (u32, u32),
    cam_mat: Mat4,
    clip_planes: &[Plane],
    z: f32,
    texture: &FloorCeilingTexture,
    lightmap: &[[u8; 4]; 4],
) {
    let cell_x = (cell_index % 256) as f32;
    let cell_y = (cell_index / 256) as f32;
    let poly = [
        (Vec3::new(cell_x, cell_y, z), (0.0, 0.0)),
        (Vec3::new(cell_x + 1.0, cell_y, z), (64.0, 0.0)),
        (Vec3::new(cell_x + 1.0, cell_y + 1.0, z), (64.0, 64.0)),
        (Vec3::new(cell_x, cell_y + 1.0, z), (0.0, 64.0)),
    ];
    let clipped = clip_polygon(&poly, clip_planes);
    if clipped.len() < 3 {
        return;
    }
    let Some((xmin, ymin, xmax, ymax)) = screen_aabb(cam_mat, viewport, &clipped) else { return };
    if occlusion_pyramid.is_occluded(xmin, ymin, xmax, ymax) {
        return;
    }

    let mip = select_mip_from_span(xmax - xmin, ymax - ymin).min(texture.mips.len() - 1);
    let mip_level = &texture.mips[mip];
    let mut owner_surfaces = *owner_surfaces_for(owner, static_wall_surfaces, cell_surfaces, cell_ceiling_surfaces);
    let cached = surface_cache.lookup(&owner_surfaces, mip).map(|(w, h, p)| (w, h, p.to_vec()));
    let (surf_w, surf_h, pixels) = if let Some(v) = cached {
        v
    } else {
        let w = mip_level.width as usize;
        let h = mip_level.height as usize;
        surface_cache.allocate(
            owner,
            &mut owner_surfaces,
            mip,
            w,
            h,
            &mut |h2| owner_surfaces_for(h2, static_wall_surfaces, cell_surfaces, cell_ceiling_surfaces),
            |buf| bake_floor_surface(buf, mip_level, lightmap, w),
        );
        // Commit only this mip's slot; `allocate`'s eviction loop may have
        // already nulled one of this owner's other mip slots directly in the
        // real table on self-collision, and the stale local copy must not
        // overwrite that (§9 back-pointers), mirroring the wall-surface fix.
        owner_surfaces_for(owner, static_wall_surfaces, cell_surfaces, cell_ceiling_surfaces).slots[mip] =
            owner_surfaces.slots[mip];
        let (w, h, p) = surface_cache.lookup(&owner_surfaces, mip).expect("just allocated");
        (w, h, p.to_vec())
    };

    let texture_view = TextureView { width: surf_w as u32, height: surf_h as u32, texels: &pixels };
    let mode = triangle_mode(cam_mat, viewport, &clipped);
    for tri in fan_triangulate(&clipped) {
        let Some(verts) = project_triangle(cam_mat, viewport, &tri, 1.0) else { continue };
        draw_triangle::<false, true, false, true, true, false>(surface, depth, occlusion, verts, texture_view, mode);
    }
    occlusion_pyramid.update(&*occlusion, xmin, ymin, xmax, ymax, false);
}

fn fan_triangulate(poly: &[(Vec3, (f32, f32))]) -> Vec<Vec<(Vec3, (f32, f32))>> {
    if poly.len() < 3 {
        return Vec::new();
    }
    (1..poly.len() - 1).map(|i| vec![poly[0], poly[i], poly[i + 1]]).collect()
}

fn ndc_to_screen(clip: [f32; 4], viewport: (u32, u32)) -> (f32, f32) {
    let w = clip[3].max(1e-5);
    let ndc_x = clip[0] / w;
    let ndc_y = clip[1] / w;
    ((ndc_x + 1.0) * 0.5 * viewport.0 as f32, (ndc_y + 1.0) * 0.5 * viewport.1 as f32)
}

fn project_triangle(cam_mat: Mat4, viewport: (u32, u32), tri: &[(Vec3, (f32, f32))], light: f32) -> Option<[RasterizerVertex; 3]> {
    if tri.len() != 3 {
        return None;
    }
    let mut out = [RasterizerVertex::new(0, 0, 0, 0, 0, 0); 3];
    for (i, &(pos, tc)) in tri.iter().enumerate() {
        let clip = cam_mat.transform_point4(pos);
        if clip[3] <= 1e-5 {
            return None;
        }
        let (sx, sy) = ndc_to_screen(clip, viewport);
        let inv_w = 1.0 / clip[3];
        out[i] = RasterizerVertex::new(
            fixed16_from_f32(sx),
            fixed16_from_f32(sy),
            fixed16_from_f32(inv_w),
            fixed16_from_f32(tc.0),
            fixed16_from_f32(tc.1),
            fixed16_from_f32(light),
        );
    }
    Some(out)
}

fn screen_aabb(cam_mat: Mat4, viewport: (u32, u32), poly: &[(Vec3, (f32, f32))]) -> Option<(i32, i32, i32, i32)> {
    let mut result: Option<(f32, f32, f32, f32)> = None;
    for &(pos, _) in poly {
        let clip = cam_mat.transform_point4(pos);
        if clip[3] <= 1e-5 {
            continue;
        }
        let (sx, sy) = ndc_to_screen(clip, viewport);
        result = Some(match result {
            None => (sx, sy, sx, sy),
            Some((a, b, c, d)) => (a.min(sx), b.min(sy), c.max(sx), d.max(sy)),
        });
    }
    result.map(|(a, b, c, d)| (a as i32, b as i32, c as i32, d as i32))
}

/// Picks a mip level from a screen-space span, thresholds 2/4/8 in 16+8
/// fixed squared units per §4.6.3 (approximated here directly in pixels
/// since the span is already in screen space).
fn select_mip_from_span(span_x: i32, span_y: i32) -> usize {
    let longest = span_x.max(span_y).max(1);
    if longest > 8 * 64 {
        0
    } else if longest > 4 * 64 {
        1
    } else if longest > 2 * 64 {
        2
    } else {
        3
    }
}

fn triangle_mode(cam_mat: Mat4, viewport: (u32, u32), poly: &[(Vec3, (f32, f32))]) -> TexturingMode {
    let mut wmin = f32::MAX;
    let mut wmax = f32::MIN;
    for &(pos, _) in poly {
        let clip = cam_mat.transform_point4(pos);
        if clip[3] <= 1e-5 {
            continue;
        }
        wmin = wmin.min(clip[3]);
        wmax = wmax.max(clip[3]);
    }
    let _ = viewport;
    if wmin > 0.0 && wmax / wmin < 1.2 {
        TexturingMode::Affine
    } else {
        TexturingMode::PerspectiveSpan
    }
}

/// Bakes the lit wall surface starting `row_offset` rows into `mip`'s
/// texels, so only the band the texture's trim rows mark as painted ends
/// up in the cached surface (§4.4 build steps 1-2).
fn bake_wall_surface(buf: &mut [Pixel], mip: &crate::resources::MipLevel, lightmap: &[u8; 8], surface_width: usize, row_offset: usize) {
    let lightmap_x_shift = if surface_width == 128 { 4 } else { 3 };
    let width = mip.width as usize;
    let start = row_offset * width;
    for (i, texel) in mip.texels.iter().skip(start).enumerate().take(buf.len()) {
        let x = i % width;
        let col = (x >> lightmap_x_shift).min(7);
        let light = lightmap[col];
        buf[i] = scale_lit_texel(*texel, light);
    }
}

fn bake_floor_surface(buf: &mut [Pixel], mip: &crate::resources::MipLevel, lightmap: &[[u8; 4]; 4], width: usize) {
    for (i, texel) in mip.texels.iter().enumerate().take(buf.len()) {
        let x = i % width;
        let y = i / width;
        let lx = (x * 4 / width.max(1)).min(3);
        let ly = (y * 4 / width.max(1)).min(3);
        buf[i] = scale_lit_texel(*texel, lightmap[ly][lx]);
    }
}

fn scale_lit_texel(texel: Pixel, light: u8) -> Pixel {
    let lanes = crate::pixel::PixelLanes::RGBA;
    let scale = f32::from(light) / 255.0 * OVERBRIGHT;
    let lane = |v: u8| -> u8 { (f32::from(v) * scale).min(255.0) as u8 };
    Pixel::pack(lanes, lane(texel.r(lanes)), lane(texel.g(lanes)), lane(texel.b(lanes)), texel.a(lanes))
}

fn model_aabb_corners(model: &crate::resources::MapModel) -> [Vec3; 8] {
    let mut min = Vec3::new(f32::MAX, f32::MAX, f32::MAX);
    let mut max = Vec3::new(f32::MIN, f32::MIN, f32::MIN);
    for v in &model.animation_vertices {
        min.x = min.x.min(v.x);
        min.y = min.y.min(v.y);
        min.z = min.z.min(v.z);
        max.x = max.x.max(v.x);
        max.y = max.y.max(v.y);
        max.z = max.z.max(v.z);
    }
    [
        Vec3::new(min.x, min.y, min.z),
        Vec3::new(max.x, min.y, min.z),
        Vec3::new(min.x, max.y, min.z),
        Vec3::new(max.x, max.y, min.z),
        Vec3::new(min.x, min.y, max.z),
        Vec3::new(max.x, min.y, max.z),
        Vec3::new(min.x, max.y, max.z),
        Vec3::new(max.x, max.y, max.z),
    ]
}

fn sample_lightmap(lightmap: &[u8], pos: Vec3) -> f32 {
    if lightmap.len() < 256 * 256 {
        return 1.0;
    }
    let x = (pos.x.rem_euclid(256.0)) as usize;
    let y = (pos.y.rem_euclid(256.0)) as usize;
    f32::from(lightmap[y * 256 + x]) / 255.0
}

fn sq_dist(a: Vec3, b: Vec3) -> f32 {
    a.sub(b).dot(a.sub(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::BspTree;
    use crate::resources::{FloorCeilingCellDesc, MapData, MapState, Palette};
    use pretty_assertions::assert_eq;

    fn empty_map() -> MapData {
        MapData {
            static_walls: Vec::new(),
            wall_textures: Vec::new(),
            floor_textures: Vec::new(),
            ceiling_textures: Vec::new(),
            floor_ceiling_cells: Vec::new(),
            lightmap: vec![255; 256 * 256],
            models: Vec::new(),
            sprites: Vec::new(),
            sky_texture: None,
            bsp: BspTree::build(Vec::new()),
            first_transparent_texture_id: 0,
            walls_height: 2.0,
        }
    }

    fn empty_state() -> MapState {
        MapState {
            dynamic_walls: Vec::new(),
            static_models: Vec::new(),
            items: Vec::new(),
            dynamic_items: Vec::new(),
            rockets: Vec::new(),
            monsters: Vec::new(),
            sprite_effects: Vec::new(),
        }
    }

    #[test]
    fn zero_area_viewport_is_noop() {
        let mut renderer = WorldRenderer::new((0, 0), 0, 0, 0);
        let mut buf = vec![0u32; 0];
        let palette = [0u32; 256];
        let mut ctx = RenderingContext::new(&mut buf, 0, (0, 0), crate::pixel::PixelLanes::RGBA, &palette);
        let map = empty_map();
        let state = empty_state();
        renderer.draw(&mut ctx, &map, &state, Mat4::identity(), Vec3::new(0.0, 0.0, 0.0), &[], 0);
    }

    #[test]
    fn empty_map_draws_without_panicking() {
        let mut renderer = WorldRenderer::new((16, 16), 0, 0, 0);
        let mut buf = vec![0u32; 16 * 16];
        let palette = [0u32; 256];
        let mut ctx = RenderingContext::new(&mut buf, 16, (16, 16), crate::pixel::PixelLanes::RGBA, &palette);
        let map = empty_map();
        let state = empty_state();
        renderer.draw(&mut ctx, &map, &state, Mat4::identity(), Vec3::new(0.0, 0.0, 1.0), &[], 0);
    }

    #[test]
    fn floor_ceiling_empty_sentinel_is_skipped() {
        let mut map = empty_map();
        map.floor_ceiling_cells.push(FloorCeilingCellDesc { texture_id: u32::MAX, lightmap: [[0; 4]; 4] });
        let mut renderer = WorldRenderer::new((16, 16), 0, 0, 1);
        let mut buf = vec![0u32; 16 * 16];
        let palette = [0u32; 256];
        let mut ctx = RenderingContext::new(&mut buf, 16, (16, 16), crate::pixel::PixelLanes::RGBA, &palette);
        let state = empty_state();
        renderer.draw(&mut ctx, &map, &state, Mat4::identity(), Vec3::new(0.0, 0.0, 1.0), &[], 0);
    }

    #[test]
    fn palette_smoke() {
        let palette = Palette { rgb: [[1, 2, 3]; 256] };
        let transformed = palette.transform(crate::pixel::PixelLanes::RGBA);
        assert_eq!(transformed[0].r(crate::pixel::PixelLanes::RGBA), 1);
    }
}
