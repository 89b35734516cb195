//! Software 3D world renderer: a fixed-point, perspective-correct,
//! depth/occlusion-tested triangle rasterizer driving a BSP-ordered
//! wall/floor/ceiling pipeline, a frustum-clipped model pipeline, a
//! lightmap-baking surface cache, and a hierarchical depth/occlusion buffer.
//!
//! This crate has no I/O and no game logic: it consumes read-only map
//! resources and a per-frame view state and writes one pixel buffer. VFS,
//! menus, audio, networking, input and the GL backend are all external
//! collaborators pinned down by [`resources`] and [`context`].

#[allow(clippy::similar_names)]
pub mod bsp;
pub mod buffers;
pub mod clip;
pub mod context;
#[cfg(feature = "debug")]
pub mod demo_scene;
pub mod math;
pub mod pixel;
pub mod raster;
pub mod resources;
pub mod surface_cache;
pub mod vertex;
pub mod world;

pub use context::RenderingContext;
pub use pixel::{Pixel, PixelLanes};
pub use resources::{MapData, MapState, Palette, WeaponState};
pub use world::{FrameScratch, WorldRenderer};
