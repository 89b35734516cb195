//! Fixed-point primitives for the software rasterizer.
//!
//! Everything here is signed 32-bit fixed point. The default format is
//! Q16.16 (`Fixed16`): one sign bit, 15 integer bits, 16 fractional bits,
//! `1<<16` represents `1.0`. `Fixed8` (Q24.8) exists only for squared
//! lengths, which overflow Q16.16 far too easily.
//!
//! This crate has no dependency on the rasterizer itself — it is the leaf
//! numeric layer every other `render` module builds on, the way the
//! teacher's `vecfixed` crate was a leaf, dependency-free utility used by
//! the rest of the workspace.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

/// Q16.16 signed fixed-point value.
pub type Fixed16 = i32;

/// Q24.8 signed fixed-point value, used for squared lengths that would
/// overflow `Fixed16`.
pub type Fixed8 = i32;

/// `1.0` in Q16.16.
pub const ONE: Fixed16 = 1 << 16;

/// `0.5` in Q16.16.
pub const HALF: Fixed16 = 1 << 15;

/// `FixedMul<N>(a, b) = (a * b) >> N`.
///
/// Both operands are interpreted in whatever Q-format the caller intends;
/// the result lands in QF.(N) where F is `32 - N`. The multiply is done in
/// 64 bits so a Q16.16 * Q16.16 product (up to 47 bits before the shift)
/// never overflows before truncation.
#[inline]
#[must_use]
pub fn fixed_mul<const N: u32>(a: i32, b: i32) -> i32 {
    (((i64::from(a)) * i64::from(b)) >> N) as i32
}

/// `Fixed16Mul(a, b) = (a * b) >> 16`, both operands and result Q16.16.
#[inline]
#[must_use]
pub fn fixed16_mul(a: Fixed16, b: Fixed16) -> Fixed16 {
    fixed_mul::<16>(a, b)
}

/// `Fixed16Div(a, b) = (a << 16) / b`. Callers must ensure `b != 0`.
#[inline]
#[must_use]
pub fn fixed16_div(a: Fixed16, b: Fixed16) -> Fixed16 {
    debug_assert!(b != 0, "fixed16_div: division by zero");
    (((i64::from(a)) << 16) / i64::from(b)) as i32
}

/// Rounds a Q16.16 value to the nearest integer using a half-pixel bias:
/// `(v + HALF) >> 16`. This is the top-left fill-rule rounding used to turn
/// a sub-pixel screen coordinate into the integer pixel row/column it
/// belongs to.
#[inline]
#[must_use]
pub fn fixed16_round_to_int(v: Fixed16) -> i32 {
    (v.wrapping_add(HALF)) >> 16
}

/// Truncates a Q16.16 value to its integer part (no rounding).
#[inline]
#[must_use]
pub fn fixed16_floor_to_int(v: Fixed16) -> i32 {
    v >> 16
}

#[inline]
#[must_use]
pub fn fixed16_from_int(i: i32) -> Fixed16 {
    i << 16
}

#[inline]
#[must_use]
pub fn fixed16_from_f32(v: f32) -> Fixed16 {
    (v * 65536.0) as i32
}

#[inline]
#[must_use]
pub fn fixed16_to_f32(v: Fixed16) -> f32 {
    (v as f32) / 65536.0
}

/// A fixed-point reciprocal, `1/w` in Q16.16, computed without floating
/// point so the rasterizer's perspective-correction span recompute (see
/// the `raster` module) stays deterministic.
///
/// Uses the standard bit-length initial guess (accurate to within 2x)
/// followed by five Newton-Raphson refinement steps (`y = y * (2 - w*y)`).
/// Newton's method doubles the number of correct bits per iteration, so
/// five steps take the initial ~1 correct bit past the 32 bits available
/// in the accumulator — this is the "fixed 15-bit LUT or Newton step" the
/// design calls for, with enough steps to land within a handful of ULPs
/// rather than just one.
///
/// `w` must be strictly positive; the clipper guarantees this for every
/// vertex that reaches the rasterizer.
#[must_use]
pub fn reciprocal_fixed16(w: Fixed16) -> Fixed16 {
    debug_assert!(w > 0, "reciprocal_fixed16: w must be positive, got {w}");
    if w <= 0 {
        return 0;
    }
    if w == ONE {
        return ONE;
    }

    // Initial guess: 2^(32 - bit_length(w)) approximates 1/w in Q16.16
    // when w is itself in Q16.16 (i.e. scaled by 2^16).
    let shift = 32 - w.leading_zeros();
    let mut y: i64 = 1i64 << (32 - shift);

    // Newton iterations in Q16.16: y_{n+1} = y_n * (2 - w * y_n).
    let w64 = i64::from(w);
    for _ in 0..5 {
        let wy = (w64 * y) >> 16; // Q16.16 * Q16.16 >> 16 = Q16.16
        let two_minus_wy = (2i64 << 16) - wy;
        y = (y * two_minus_wy) >> 16;
    }

    y as i32
}

/// A squared-length helper in Q24.8: `FixedMul<16+8>(dx, dx) +
/// FixedMul<16+8>(dy, dy)` for two Q16.16 deltas, saturating to at least 1
/// so callers can divide by it safely (mirrors the `std::max(d_len_square,
/// 1)` guard in the mip-selection code).
#[inline]
#[must_use]
pub fn squared_length_fixed8(dx: Fixed16, dy: Fixed16) -> Fixed8 {
    let sq = fixed_mul::<24>(dx, dx).saturating_add(fixed_mul::<24>(dy, dy));
    sq.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fixed_mul_identity() {
        assert_eq!(fixed16_mul(ONE, ONE), ONE);
        assert_eq!(fixed16_mul(fixed16_from_int(3), fixed16_from_int(4)), fixed16_from_int(12));
    }

    #[test]
    fn fixed_mul_fraction() {
        let half = HALF;
        assert_eq!(fixed16_mul(half, half), 1 << 14); // 0.25
    }

    #[test]
    fn fixed_div_roundtrip() {
        let a = fixed16_from_int(10);
        let b = fixed16_from_int(4);
        let q = fixed16_div(a, b);
        assert_eq!(fixed16_to_f32(q), 2.5);
    }

    #[test]
    fn round_to_int_half_pixel_bias() {
        // 3.5 pixels rounds up to 4 under the top-left half-pixel bias.
        assert_eq!(fixed16_round_to_int(fixed16_from_f32(3.5)), 4);
        // 3.49999 stays at 3.
        assert_eq!(fixed16_round_to_int(fixed16_from_f32(3.4999)), 3);
        assert_eq!(fixed16_round_to_int(0), 0);
    }

    #[test]
    fn reciprocal_matches_float_within_tolerance() {
        for i in 1..200 {
            let w = fixed16_from_int(i);
            let got = reciprocal_fixed16(w);
            let want = fixed16_from_f32(1.0 / f32::from(i as i16));
            let diff = (got - want).abs();
            assert!(diff <= 4, "i={i} got={got} want={want} diff={diff}");
        }
    }

    #[test]
    fn reciprocal_of_one_is_one() {
        assert_eq!(reciprocal_fixed16(ONE), ONE);
    }

    #[test]
    fn squared_length_never_zero() {
        assert_eq!(squared_length_fixed8(0, 0), 1);
    }
}
