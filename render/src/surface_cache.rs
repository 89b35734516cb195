//! Surface cache (C5): a slab-allocated arena of texture x lightmap
//! compositions, keyed by (owner, mip), with strict-bump allocation and
//! LRU-by-wrap eviction.
//!
//! Ownership is a *weak* link both ways (§4.4, §9 "Back-pointers in the
//! cache"): `arena[slot].owner == Some(h) <=> owners[h].surfaces[mip] ==
//! Some(slot)`. There are no raw pointers; `OwnerHandle`/`SlotIndex` are
//! plain indices and eviction nulls one side, then the other.

use crate::pixel::Pixel;

pub const MAX_MIPS: usize = 4;

/// Opaque handle identifying a surface-cache owner: a `DrawWall` or a
/// `FloorCeilingCell`, from the caller's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotIndex(usize);

struct Slot {
    owner: Option<(OwnerHandle, usize)>, // (owner, mip)
    offset: usize,
    width: usize,
    height: usize,
}

/// One owner's four (one per mip) cache pointers.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerSurfaces {
    pub slots: [Option<usize>; MAX_MIPS],
}

/// Strict-bump arena over a single pixel blob, sized roughly 2x the
/// viewport area (§4.4).
///
/// `slots` is indexed by a stable `SlotIndex` an owner holds onto across
/// frames: eviction tombstones an entry in place (`slots[i] = None`) rather
/// than removing it from the `Vec`, so no other owner's stored index is
/// ever invalidated by an unrelated eviction. Tombstoned indices are
/// recycled via `free_list` instead of growing the vector forever.
pub struct SurfaceCache {
    arena: Vec<Pixel>,
    cursor: usize,
    slots: Vec<Option<Slot>>,
    free_list: Vec<usize>,
}

impl SurfaceCache {
    #[must_use]
    pub fn new(viewport_area: usize) -> Self {
        Self { arena: vec![Pixel::default(); viewport_area * 2], cursor: 0, slots: Vec::new(), free_list: Vec::new() }
    }

    /// Returns the already-cached surface for `owner`'s `mip`, if present,
    /// as a `(width, height, pixels)` view.
    #[must_use]
    pub fn lookup(&self, owner_surfaces: &OwnerSurfaces, mip: usize) -> Option<(usize, usize, &[Pixel])> {
        let slot_idx = owner_surfaces.slots[mip]?;
        let slot = self.slots[slot_idx].as_ref()?;
        Some((slot.width, slot.height, &self.arena[slot.offset..slot.offset + slot.width * slot.height]))
    }

    /// Allocates a new `w*h` surface for `(owner, mip)`, filled by `build`,
    /// wrapping the bump cursor and evicting any overlapping slots (and
    /// clearing their owners' back-pointers) as needed. Updates
    /// `owner_surfaces` in place.
    pub fn allocate(
        &mut self,
        owner: OwnerHandle,
        owner_surfaces: &mut OwnerSurfaces,
        mip: usize,
        width: usize,
        height: usize,
        owners_table: &mut dyn for<'a> FnMut(OwnerHandle) -> &'a mut OwnerSurfaces,
        build: impl FnOnce(&mut [Pixel]),
    ) {
        let needed = width * height;
        if self.cursor + needed > self.arena.len() {
            self.cursor = 0;
        }
        let start = self.cursor;
        let end = start + needed;

        // Evict every slot whose byte range overlaps [start, end), tombstoning
        // it in place so every other slot's index stays valid (§9 "Back-pointers
        // in the cache").
        for (idx, entry) in self.slots.iter_mut().enumerate() {
            let overlaps = entry.as_ref().is_some_and(|slot| {
                let slot_end = slot.offset + slot.width * slot.height;
                slot.offset < end && start < slot_end
            });
            if overlaps {
                if let Some((victim_owner, victim_mip)) = entry.take().and_then(|slot| slot.owner) {
                    owners_table(victim_owner).slots[victim_mip] = None;
                }
                self.free_list.push(idx);
            }
        }

        build(&mut self.arena[start..end]);

        let new_slot = Slot { owner: Some((owner, mip)), offset: start, width, height };
        let new_index = if let Some(reused) = self.free_list.pop() {
            self.slots[reused] = Some(new_slot);
            reused
        } else {
            self.slots.push(Some(new_slot));
            self.slots.len() - 1
        };
        owner_surfaces.slots[mip] = Some(new_index);
        self.cursor = end;
    }

    /// Clears `owner`'s back-pointers without freeing arena space — used
    /// when a dynamic wall's texture id changes across frames (§4.6.4).
    pub fn invalidate_owner(&mut self, owner_surfaces: &mut OwnerSurfaces) {
        for slot in &mut owner_surfaces.slots {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn allocate_then_lookup_roundtrips() {
        let mut cache = SurfaceCache::new(64);
        let mut owners: HashMap<OwnerHandle, OwnerSurfaces> = HashMap::new();
        let owner = OwnerHandle(1);
        owners.insert(owner, OwnerSurfaces::default());
        let mut owner_surfaces = owners[&owner];

        cache.allocate(owner, &mut owner_surfaces, 0, 2, 2, &mut |h| owners.get_mut(&h).unwrap(), |buf| {
            buf.fill(Pixel::pack(crate::pixel::PixelLanes::RGBA, 1, 2, 3, 255));
        });

        let (w, h, pixels) = cache.lookup(&owner_surfaces, 0).unwrap();
        assert_eq!((w, h), (2, 2));
        assert_eq!(pixels[0], Pixel::pack(crate::pixel::PixelLanes::RGBA, 1, 2, 3, 255));
    }

    #[test]
    fn wrap_eviction_clears_victim_back_pointer() {
        let mut cache = SurfaceCache::new(2); // arena of 4 pixels
        let mut owners: HashMap<OwnerHandle, OwnerSurfaces> = HashMap::new();
        let a = OwnerHandle(1);
        let b = OwnerHandle(2);
        owners.insert(a, OwnerSurfaces::default());
        owners.insert(b, OwnerSurfaces::default());

        let mut a_surfaces = owners[&a];
        cache.allocate(a, &mut a_surfaces, 0, 2, 2, &mut |h| owners.get_mut(&h).unwrap(), |_| {});
        owners.insert(a, a_surfaces);

        // Second allocation wraps the 4-pixel arena and must evict `a`'s slot.
        let mut b_surfaces = owners[&b];
        cache.allocate(b, &mut b_surfaces, 0, 2, 2, &mut |h| owners.get_mut(&h).unwrap(), |_| {});
        owners.insert(b, b_surfaces);

        assert_eq!(owners[&a].slots[0], None);
        assert!(owners[&b].slots[0].is_some());
    }

    #[test]
    fn eviction_does_not_shift_surviving_slot_indices() {
        // Arena big enough for three 2x2 surfaces; a fourth allocation forces
        // the cursor to wrap and evict only the first slot. Surviving owners
        // `b` and `c` must still resolve to their own surfaces afterward,
        // not whatever slot happened to shift into their old index.
        let mut cache = SurfaceCache::new(6); // arena of 12 pixels
        let mut owners: HashMap<OwnerHandle, OwnerSurfaces> = HashMap::new();
        for id in 1..=3u32 {
            owners.insert(OwnerHandle(id), OwnerSurfaces::default());
        }

        let colors = [1u8, 2, 3];
        for (i, &id) in [1u32, 2, 3].iter().enumerate() {
            let owner = OwnerHandle(id);
            let mut surfaces = owners[&owner];
            let color = colors[i];
            cache.allocate(owner, &mut surfaces, 0, 2, 2, &mut |h| owners.get_mut(&h).unwrap(), |buf| {
                buf.fill(Pixel::pack(crate::pixel::PixelLanes::RGBA, color, color, color, 255));
            });
            owners.insert(owner, surfaces);
        }

        // Fourth allocation wraps the 12-pixel arena (3*4=12 used) and evicts
        // only owner 1's slot (the one overlapping [0,4)).
        let owner4 = OwnerHandle(4);
        let mut surfaces4 = OwnerSurfaces::default();
        cache.allocate(owner4, &mut surfaces4, 0, 2, 2, &mut |h| owners.get_mut(&h).unwrap(), |buf| {
            buf.fill(Pixel::pack(crate::pixel::PixelLanes::RGBA, 9, 9, 9, 255));
        });
        owners.insert(owner4, surfaces4);

        assert_eq!(owners[&OwnerHandle(1)].slots[0], None);

        let b_surfaces = owners[&OwnerHandle(2)];
        let (_, _, pixels) = cache.lookup(&b_surfaces, 0).unwrap();
        assert_eq!(pixels[0], Pixel::pack(crate::pixel::PixelLanes::RGBA, 2, 2, 2, 255));

        let c_surfaces = owners[&OwnerHandle(3)];
        let (_, _, pixels) = cache.lookup(&c_surfaces, 0).unwrap();
        assert_eq!(pixels[0], Pixel::pack(crate::pixel::PixelLanes::RGBA, 3, 3, 3, 255));
    }
}
