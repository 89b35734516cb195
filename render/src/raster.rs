//! The rasterizer (C2): scan-converts one textured triangle, with
//! depth/alpha/occlusion tests and writes selected by six compile-time
//! flags plus a texturing mode, gated behind const generics so every
//! instantiation the world render driver needs is monomorphic (§9,
//! "Rasterizer variants").

use crate::buffers::{DepthBuffer, OcclusionBuffer};
use crate::pixel::{Pixel, PixelLanes};
use crate::vertex::RasterizerVertex;
use fixedmath::{fixed16_div, fixed16_mul, fixed16_round_to_int, reciprocal_fixed16, Fixed16, ONE};

/// A read-only view over a power-of-two texture's texel data.
#[derive(Debug, Clone, Copy)]
pub struct TextureView<'a> {
    pub width: u32,
    pub height: u32,
    pub texels: &'a [Pixel],
}

impl<'a> TextureView<'a> {
    #[must_use]
    pub fn sample(&self, u_q16: Fixed16, v_q16: Fixed16) -> Pixel {
        let x = (u_q16 >> 16) & (self.width as i32 - 1);
        let y = (v_q16 >> 16) & (self.height as i32 - 1);
        self.texels[(y as u32 * self.width + x as u32) as usize]
    }
}

/// How texture coordinates are interpolated across a scanline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexturingMode {
    /// Linear u/v interpolation, no perspective division. Valid only when
    /// `w_max/w_min < 1.2` across the triangle (§4.1).
    Affine,
    /// Interpolate `(u/w, v/w, 1/w)` linearly, recovering `(u, v)` every 16
    /// pixels via a fixed-point reciprocal.
    PerspectiveSpan,
}

const PERSPECTIVE_SPAN: i32 = 16;

/// A row-major, caller-owned pixel surface the rasterizer writes into.
pub struct PixelSurface {
    pub width: usize,
    pub height: usize,
    pub row_pixels: usize,
    pub lanes: PixelLanes,
    pub data: Vec<Pixel>,
}

impl PixelSurface {
    #[must_use]
    pub fn new(width: usize, height: usize, lanes: PixelLanes) -> Self {
        Self { width, height, row_pixels: width, lanes, data: vec![Pixel::default(); width * height] }
    }

    #[inline]
    fn put(&mut self, x: usize, y: usize, p: Pixel) {
        self.data[y * self.row_pixels + x] = p;
    }

    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Pixel {
        self.data[y * self.row_pixels + x]
    }
}

struct Edge {
    x: Fixed16,
    dx_dy: Fixed16,
    u: Fixed16,
    du_dy: Fixed16,
    v: Fixed16,
    dv_dy: Fixed16,
    w: Fixed16,
    dw_dy: Fixed16,
}

impl Edge {
    fn new(top: &RasterizerVertex, bottom: &RasterizerVertex) -> Option<Self> {
        let dy = bottom.y - top.y;
        if dy == 0 {
            return None;
        }
        Some(Self {
            x: top.x,
            dx_dy: fixed16_div(bottom.x - top.x, dy),
            u: top.u,
            du_dy: fixed16_div(bottom.u - top.u, dy),
            v: top.v,
            dv_dy: fixed16_div(bottom.v - top.v, dy),
            w: top.w,
            dw_dy: fixed16_div(bottom.w - top.w, dy),
        })
    }

    fn advance_to(&mut self, top: &RasterizerVertex, row_y: Fixed16) {
        let dy = row_y - top.y;
        self.x = top.x + fixed16_mul(self.dx_dy, dy);
        self.u = top.u + fixed16_mul(self.du_dy, dy);
        self.v = top.v + fixed16_mul(self.dv_dy, dy);
        self.w = top.w + fixed16_mul(self.dw_dy, dy);
    }

    fn step(&mut self) {
        self.x += self.dx_dy;
        self.u += self.du_dy;
        self.v += self.dv_dy;
        self.w += self.dw_dy;
    }
}

/// Compile-time-flagged triangle rasterization. Generic parameters mirror
/// the C++ template non-type parameters named in §4.1 and §9.
#[allow(clippy::too_many_arguments)]
pub fn draw_triangle<
    const DEPTH_TEST: bool,
    const DEPTH_WRITE: bool,
    const ALPHA_TEST: bool,
    const OCCLUSION_TEST: bool,
    const OCCLUSION_WRITE: bool,
    const LIGHTING: bool,
>(
    surface: &mut PixelSurface,
    depth: &mut DepthBuffer,
    occlusion: &mut OcclusionBuffer,
    mut verts: [RasterizerVertex; 3],
    texture: TextureView,
    mode: TexturingMode,
) {
    verts.sort_by_key(RasterizerVertex::pixel_row);
    let [top, mid, bottom] = verts;

    if top.pixel_row() == bottom.pixel_row() {
        return; // degenerate: collapses to a horizontal line, draws nothing.
    }

    // Split into up to two trapezoids at the middle vertex.
    if mid.pixel_row() > top.pixel_row() {
        draw_trapezoid::<DEPTH_TEST, DEPTH_WRITE, ALPHA_TEST, OCCLUSION_TEST, OCCLUSION_WRITE, LIGHTING>(
            surface, depth, occlusion, &top, &mid, &top, &bottom, texture, mode,
        );
    }
    if bottom.pixel_row() > mid.pixel_row() {
        draw_trapezoid::<DEPTH_TEST, DEPTH_WRITE, ALPHA_TEST, OCCLUSION_TEST, OCCLUSION_WRITE, LIGHTING>(
            surface, depth, occlusion, &mid, &bottom, &top, &bottom, texture, mode,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_trapezoid<
    const DEPTH_TEST: bool,
    const DEPTH_WRITE: bool,
    const ALPHA_TEST: bool,
    const OCCLUSION_TEST: bool,
    const OCCLUSION_WRITE: bool,
    const LIGHTING: bool,
>(
    surface: &mut PixelSurface,
    depth: &mut DepthBuffer,
    occlusion: &mut OcclusionBuffer,
    left_top: &RasterizerVertex,
    left_bottom: &RasterizerVertex,
    right_top: &RasterizerVertex,
    right_bottom: &RasterizerVertex,
    texture: TextureView,
    mode: TexturingMode,
) {
    let Some(mut left) = Edge::new(left_top, left_bottom) else { return };
    let Some(mut right) = Edge::new(right_top, right_bottom) else { return };

    let y0 = fixed16_round_to_int(left_top.y).max(left_top.pixel_row()).max(0);
    let y1 = fixed16_round_to_int(left_bottom.y).min(surface.height as i32);
    if y0 >= y1 {
        return;
    }

    let row_y0 = ((y0 as Fixed16) << 16) + (ONE >> 1);
    left.advance_to(left_top, row_y0);
    right.advance_to(right_top, row_y0);

    for row in y0..y1 {
        if row < 0 || row as usize >= surface.height {
            left.step();
            right.step();
            continue;
        }
        let light = left_top.light;
        draw_scanline::<DEPTH_TEST, DEPTH_WRITE, ALPHA_TEST, OCCLUSION_TEST, OCCLUSION_WRITE, LIGHTING>(
            surface, depth, occlusion, row as usize, &left, &right, light, texture, mode,
        );
        left.step();
        right.step();
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_scanline<
    const DEPTH_TEST: bool,
    const DEPTH_WRITE: bool,
    const ALPHA_TEST: bool,
    const OCCLUSION_TEST: bool,
    const OCCLUSION_WRITE: bool,
    const LIGHTING: bool,
>(
    surface: &mut PixelSurface,
    depth: &mut DepthBuffer,
    occlusion: &mut OcclusionBuffer,
    row: usize,
    left: &Edge,
    right: &Edge,
    light: Fixed16,
    texture: TextureView,
    mode: TexturingMode,
) {
    let (xl, xr) = if left.x <= right.x { (left, right) } else { (right, left) };
    let xstart = fixed16_round_to_int(xl.x).max(0);
    let xend = fixed16_round_to_int(xr.x).min(surface.width as i32);
    if xstart >= xend {
        return;
    }

    let span = (xend - xstart) as Fixed16;
    let du = fixed16_div(xr.u - xl.u, span.max(1) << 16);
    let dv = fixed16_div(xr.v - xl.v, span.max(1) << 16);
    let dw = fixed16_div(xr.w - xl.w, span.max(1) << 16);

    let mut u = xl.u;
    let mut v = xl.v;
    let mut w = xl.w;

    match mode {
        TexturingMode::Affine => {
            for x in xstart..xend {
                plot::<DEPTH_TEST, DEPTH_WRITE, ALPHA_TEST, OCCLUSION_TEST, OCCLUSION_WRITE, LIGHTING>(
                    surface, depth, occlusion, x as usize, row, u, v, w, light, texture,
                );
                u += du;
                v += dv;
                w += dw;
            }
        }
        TexturingMode::PerspectiveSpan => {
            // Interpolate (u/w, v/w, 1/w) across the scanline, recovering
            // (u, v) every PERSPECTIVE_SPAN pixels (§4.1).
            let mut inv_w = reciprocal_fixed16(w.max(1));
            let mut uw = fixed16_mul(u, inv_w);
            let mut vw = fixed16_mul(v, inv_w);
            let d_inv_w = fixed16_div(reciprocal_fixed16(xr.w.max(1)) - inv_w, span.max(1) << 16);
            let d_uw = fixed16_div(fixed16_mul(xr.u, reciprocal_fixed16(xr.w.max(1))) - uw, span.max(1) << 16);
            let d_vw = fixed16_div(fixed16_mul(xr.v, reciprocal_fixed16(xr.w.max(1))) - vw, span.max(1) << 16);

            let mut x = xstart;
            while x < xend {
                let span_end = (x + PERSPECTIVE_SPAN).min(xend);
                let true_w = if inv_w == 0 { w } else { reciprocal_fixed16(inv_w) };
                let span_u = fixed16_mul(uw, true_w);
                let span_v = fixed16_mul(vw, true_w);
                let next_true_w = if span_end >= xend {
                    xr.w
                } else {
                    let adv = (span_end - x) as Fixed16;
                    reciprocal_fixed16((inv_w + d_inv_w * adv).max(1))
                };
                let steps = (span_end - x).max(1);
                let du_span = fixed16_div(
                    fixed16_mul(uw + d_uw * (steps as Fixed16), next_true_w) - span_u,
                    (steps as Fixed16) << 16,
                );
                let dv_span = fixed16_div(
                    fixed16_mul(vw + d_vw * (steps as Fixed16), next_true_w) - span_v,
                    (steps as Fixed16) << 16,
                );

                let mut su = span_u;
                let mut sv = span_v;
                for px in x..span_end {
                    plot::<DEPTH_TEST, DEPTH_WRITE, ALPHA_TEST, OCCLUSION_TEST, OCCLUSION_WRITE, LIGHTING>(
                        surface, depth, occlusion, px as usize, row, su, sv, true_w, light, texture,
                    );
                    su += du_span;
                    sv += dv_span;
                }

                uw += d_uw * (steps as Fixed16);
                vw += d_vw * (steps as Fixed16);
                inv_w += d_inv_w * (steps as Fixed16);
                x = span_end;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
#[inline]
fn plot<
    const DEPTH_TEST: bool,
    const DEPTH_WRITE: bool,
    const ALPHA_TEST: bool,
    const OCCLUSION_TEST: bool,
    const OCCLUSION_WRITE: bool,
    const LIGHTING: bool,
>(
    surface: &mut PixelSurface,
    depth: &mut DepthBuffer,
    occlusion: &mut OcclusionBuffer,
    x: usize,
    y: usize,
    u: Fixed16,
    v: Fixed16,
    w: Fixed16,
    light: Fixed16,
    texture: TextureView,
) {
    if x >= surface.width || y >= surface.height {
        return;
    }

    if DEPTH_TEST && !depth.test(x, y, w) {
        return;
    }
    if OCCLUSION_TEST && !occlusion.test(x, y) {
        return;
    }

    let mut texel = texture.sample(u, v);
    if ALPHA_TEST && !texel.alpha_test_passes(surface.lanes) {
        return;
    }
    if LIGHTING {
        texel = texel.lit(surface.lanes, light);
    }

    surface.put(x, y, texel);
    if DEPTH_WRITE {
        depth.set(x, y, w);
    }
    if OCCLUSION_WRITE {
        occlusion.set(x, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::PixelLanes;
    use fixedmath::fixed16_from_int;
    use pretty_assertions::assert_eq;

    fn solid_texture(pixel: Pixel) -> Vec<Pixel> {
        vec![pixel; 4]
    }

    #[test]
    fn affine_fill_covers_screen_quad() {
        let mut surface = PixelSurface::new(8, 8, PixelLanes::RGBA);
        let mut depth = DepthBuffer::new(8, 8);
        let mut occlusion = OcclusionBuffer::new(8, 8);
        let texels = solid_texture(Pixel::pack(PixelLanes::RGBA, 9, 9, 9, 255));
        let texture = TextureView { width: 2, height: 2, texels: &texels };

        let v0 = RasterizerVertex::new(fixed16_from_int(1), fixed16_from_int(1), ONE, 0, 0, ONE);
        let v1 = RasterizerVertex::new(fixed16_from_int(7), fixed16_from_int(1), ONE, 0, 0, ONE);
        let v2 = RasterizerVertex::new(fixed16_from_int(1), fixed16_from_int(7), ONE, 0, 0, ONE);

        draw_triangle::<false, false, false, false, false, false>(
            &mut surface,
            &mut depth,
            &mut occlusion,
            [v0, v1, v2],
            texture,
            TexturingMode::Affine,
        );

        assert_eq!(surface.get(2, 2), Pixel::pack(PixelLanes::RGBA, 9, 9, 9, 255));
        assert_eq!(surface.get(0, 0), Pixel::default());
    }

    #[test]
    fn depth_test_rejects_farther_pixel() {
        let mut surface = PixelSurface::new(4, 4, PixelLanes::RGBA);
        let mut depth = DepthBuffer::new(4, 4);
        depth.set(1, 1, fixed16_from_int(2)); // something nearer already there
        let mut occlusion = OcclusionBuffer::new(4, 4);
        let texels = solid_texture(Pixel::pack(PixelLanes::RGBA, 5, 5, 5, 255));
        let texture = TextureView { width: 2, height: 2, texels: &texels };

        let v0 = RasterizerVertex::new(0, 0, fixed16_from_int(1), 0, 0, ONE);
        let v1 = RasterizerVertex::new(fixed16_from_int(4), 0, fixed16_from_int(1), 0, 0, ONE);
        let v2 = RasterizerVertex::new(0, fixed16_from_int(4), fixed16_from_int(1), 0, 0, ONE);

        draw_triangle::<true, true, false, false, false, false>(
            &mut surface,
            &mut depth,
            &mut occlusion,
            [v0, v1, v2],
            texture,
            TexturingMode::Affine,
        );

        assert_eq!(surface.get(1, 1), Pixel::default());
    }

    #[test]
    fn occlusion_write_then_test_blocks_second_draw() {
        let mut surface = PixelSurface::new(4, 4, PixelLanes::RGBA);
        let mut depth = DepthBuffer::new(4, 4);
        let mut occlusion = OcclusionBuffer::new(4, 4);
        let texels = solid_texture(Pixel::pack(PixelLanes::RGBA, 1, 1, 1, 255));
        let texture = TextureView { width: 2, height: 2, texels: &texels };

        let v0 = RasterizerVertex::new(0, 0, ONE, 0, 0, ONE);
        let v1 = RasterizerVertex::new(fixed16_from_int(4), 0, ONE, 0, 0, ONE);
        let v2 = RasterizerVertex::new(0, fixed16_from_int(4), ONE, 0, 0, ONE);

        draw_triangle::<false, false, false, false, true, false>(
            &mut surface, &mut depth, &mut occlusion, [v0, v1, v2], texture, TexturingMode::Affine,
        );

        let texels2 = solid_texture(Pixel::pack(PixelLanes::RGBA, 2, 2, 2, 255));
        let texture2 = TextureView { width: 2, height: 2, texels: &texels2 };
        draw_triangle::<false, false, false, true, false, false>(
            &mut surface, &mut depth, &mut occlusion, [v0, v1, v2], texture2, TexturingMode::Affine,
        );

        assert_eq!(surface.get(1, 1), Pixel::pack(PixelLanes::RGBA, 1, 1, 1, 255));
    }
}
