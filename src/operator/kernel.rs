//! In-place amplitude kernels over one contiguous buffer.
//!
//! Every kernel takes a power-of-two buffer, operated bit positions valid
//! inside that buffer, and a control constraint. Free-index iterations
//! touch disjoint amplitude pairs, so the loops may be chunked and run in
//! parallel without changing the result.

use super::kind::{y_string_factor, Kind, M1};
use crate::math::{c_i, count_bits, phase_from_rad, C, Mask, N, Real};

#[cfg(feature = "multi-thread")]
use rayon::prelude::*;

/// Control constraint in buffer-index space: the kernel updates an
/// amplitude iff `idx & mask == value`.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Ctrl {
    pub mask: Mask,
    pub value: Mask,
}

impl Ctrl {
    pub const NONE: Ctrl = Ctrl { mask: 0, value: 0 };

    pub fn new(controls: &[(N, bool)]) -> Self {
        controls.iter().fold(Ctrl::NONE, |ctrl, &(pos, value)| Ctrl {
            mask: ctrl.mask | (1 << pos),
            value: ctrl.value | ((value as Mask) << pos),
        })
    }

    #[inline(always)]
    fn admits(&self, idx: Mask) -> bool {
        idx & self.mask == self.value
    }
}

/// Run `f(base_index, chunk)` over equal chunks of the buffer,
/// in parallel when the `multi-thread` feature is enabled.
#[inline]
fn for_each_chunk<T, F>(psi: &mut [C<T>], chunk: N, f: F)
where
    T: Real,
    F: Fn(Mask, &mut [C<T>]) + Send + Sync,
{
    #[cfg(feature = "multi-thread")]
    {
        psi.par_chunks_mut(chunk)
            .enumerate()
            .for_each(|(c, block)| f(c * chunk, block));
    }
    #[cfg(not(feature = "multi-thread"))]
    {
        for (c, block) in psi.chunks_mut(chunk).enumerate() {
            f(c * chunk, block);
        }
    }
}

const DIAG_CHUNK: N = 1 << 12;

/// Multiply every admitted amplitude by `table[popcount(idx & tmask)]`.
pub(crate) fn diag_mul<T: Real>(psi: &mut [C<T>], tmask: Mask, table: &[C<T>], ctrl: Ctrl) {
    let chunk = DIAG_CHUNK.min(psi.len());
    for_each_chunk(psi, chunk, |base, block| {
        for (i, amp) in block.iter_mut().enumerate() {
            let idx = base + i;
            if ctrl.admits(idx) {
                *amp *= table[count_bits(idx & tmask)];
            }
        }
    });
}

/// Apply a dense 2×2 matrix to the target bit.
pub(crate) fn dense_1q<T: Real>(psi: &mut [C<T>], u: &M1<T>, target: N, ctrl: Ctrl) {
    debug_assert!(ctrl.mask & (1 << target) == 0);

    let bit = 1 << target;
    let [u00, u01, u10, u11] = *u;
    for_each_chunk(psi, bit << 1, move |base, block| {
        for i in 0..bit {
            // Control bits never include the target, so one check covers
            // both halves of the pair.
            if !ctrl.admits(base + i) {
                continue;
            }
            let (a, b) = (block[i], block[i + bit]);
            block[i] = u00 * a + u01 * b;
            block[i + bit] = u10 * a + u11 * b;
        }
    });
}

/// Pauli X/Y tensor string: an in-place swap across `flip_mask`, with the
/// `±i` per-bit factors of the Y axis when `y_axis` is set.
pub(crate) fn flip<T: Real>(psi: &mut [C<T>], flip_mask: Mask, y_axis: bool, ctrl: Ctrl) {
    debug_assert!(flip_mask != 0 && ctrl.mask & flip_mask == 0);

    let total = count_bits(flip_mask);
    let top = top_bit(flip_mask);
    for_each_chunk(psi, top << 1, move |base, block| {
        for i in 0..top {
            if !ctrl.admits(base + i) {
                continue;
            }
            let j = i ^ flip_mask;
            if y_axis {
                let ones = count_bits(i & flip_mask);
                let (a, b) = (block[i], block[j]);
                block[i] = y_string_factor::<T>(ones, total) * b;
                block[j] = y_string_factor::<T>(total - ones, total) * a;
            } else {
                block.swap(i, j);
            }
        }
    });
}

/// `exp(i·phase·P⊗…⊗P)` for P ∈ {X, Y}: `cos·ψ + i·sin·(Pψ)`.
pub(crate) fn string_exp<T: Real>(
    psi: &mut [C<T>],
    flip_mask: Mask,
    y_axis: bool,
    phase: T,
    ctrl: Ctrl,
) {
    debug_assert!(flip_mask != 0 && ctrl.mask & flip_mask == 0);

    let total = count_bits(flip_mask);
    let (sin, cos) = phase.sin_cos();
    let i_sin = c_i::<T>().scale(sin);
    let top = top_bit(flip_mask);
    for_each_chunk(psi, top << 1, move |base, block| {
        for i in 0..top {
            if !ctrl.admits(base + i) {
                continue;
            }
            let j = i ^ flip_mask;
            let (a, b) = (block[i], block[j]);
            if y_axis {
                let ones = count_bits(i & flip_mask);
                block[i] = a.scale(cos) + i_sin * y_string_factor::<T>(ones, total) * b;
                block[j] = b.scale(cos) + i_sin * y_string_factor::<T>(total - ones, total) * a;
            } else {
                block[i] = a.scale(cos) + i_sin * b;
                block[j] = b.scale(cos) + i_sin * a;
            }
        }
    });
}

/// Exchange the `01` and `10` slots of two target bits.
pub(crate) fn swap2<T: Real>(psi: &mut [C<T>], p1: N, p2: N, ctrl: Ctrl) {
    debug_assert!(p1 != p2 && ctrl.mask & ((1 << p1) | (1 << p2)) == 0);

    let (lo, hi) = (1 << p1.min(p2), 1 << p1.max(p2));
    for_each_chunk(psi, hi << 1, move |base, block| {
        for i in 0..hi {
            if i & lo == 0 || !ctrl.admits(base + i) {
                continue;
            }
            block.swap(i, i ^ (lo | hi));
        }
    });
}

/// `exp(i·phase·SWAP)`: `e^{i·phase}` on the symmetric slots, a cos/sin
/// mix on the `01`/`10` pair.
pub(crate) fn exp_swap<T: Real>(psi: &mut [C<T>], p1: N, p2: N, phase: T, ctrl: Ctrl) {
    debug_assert!(p1 != p2 && ctrl.mask & ((1 << p1) | (1 << p2)) == 0);

    let (lo, hi) = (1 << p1.min(p2), 1 << p1.max(p2));
    let (sin, cos) = phase.sin_cos();
    let i_sin = c_i::<T>().scale(sin);
    let eip = phase_from_rad(phase);
    for_each_chunk(psi, hi << 1, move |base, block| {
        for i in 0..hi {
            if !ctrl.admits(base + i) {
                continue;
            }
            if i & lo == 0 {
                block[i] *= eip;
                block[i | lo | hi] *= eip;
            } else {
                let j = i ^ (lo | hi);
                let (a, b) = (block[i], block[j]);
                block[i] = a.scale(cos) + i_sin * b;
                block[j] = b.scale(cos) + i_sin * a;
            }
        }
    });
}

#[inline]
fn top_bit(mask: Mask) -> Mask {
    debug_assert!(mask != 0);
    1 << (Mask::BITS - 1 - mask.leading_zeros())
}

/// Diagonal multiplier table indexed by the number of set target bits,
/// shifted by a fixed `extra_ones` contribution (bits that live outside
/// the buffer, e.g. on the process rank).
pub(crate) fn diag_table<T: Real>(kind: &Kind<T>, num_targets: N, extra_ones: N) -> Vec<C<T>> {
    (0..=num_targets)
        .map(|ones| kind.diag_factor(extra_ones + ones))
        .collect()
}

/// Apply one gate family to a contiguous buffer. `targets` are bit
/// positions inside the buffer, in gate-argument order; `ctrl` bits are
/// disjoint from them.
pub(crate) fn apply_flat<T: Real>(psi: &mut [C<T>], kind: &Kind<T>, targets: &[N], ctrl: Ctrl) {
    if targets.is_empty() {
        if !kind.is_diagonal() {
            return;
        }
        // A zero-target diagonal still contributes its fixed factor.
        return diag_mul(psi, 0, &diag_table(kind, 0, 0), ctrl);
    }

    let tmask = targets.iter().fold(0, |m, &t| m | (1 << t));
    match kind {
        _ if kind.is_diagonal() => {
            diag_mul(psi, tmask, &diag_table(kind, targets.len(), 0), ctrl)
        }
        Kind::X => flip(psi, tmask, false, ctrl),
        Kind::Y => flip(psi, tmask, true, ctrl),
        Kind::ExpX { phase } => string_exp(psi, tmask, false, *phase, ctrl),
        Kind::ExpY { phase } => string_exp(psi, tmask, true, *phase, ctrl),
        Kind::Swap => swap2(psi, targets[0], targets[1], ctrl),
        Kind::ExpSwap { phase } => exp_swap(psi, targets[0], targets[1], *phase, ctrl),
        _ => {
            let u = kind
                .dense_1q()
                .expect("single-target family with a dense matrix");
            dense_1q(psi, &u, targets[0], ctrl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{c_one, c_zero};

    fn basis(n: N, idx: Mask) -> Vec<C<f64>> {
        let mut psi = vec![c_zero(); 1 << n];
        psi[idx] = c_one();
        psi
    }

    fn norm_sqr(psi: &[C<f64>]) -> f64 {
        psi.iter().map(|a| a.norm_sqr()).sum()
    }

    #[test]
    fn x_flips_target() {
        let mut psi = basis(3, 0b000);
        apply_flat(&mut psi, &Kind::X, &[1], Ctrl::NONE);
        assert_eq!(psi, basis(3, 0b010));
    }

    #[test]
    fn x_string_flips_all_targets() {
        let mut psi = basis(3, 0b001);
        apply_flat(&mut psi, &Kind::X, &[0, 2], Ctrl::NONE);
        assert_eq!(psi, basis(3, 0b100));
    }

    #[test]
    fn y_twice_restores_up_to_sign() {
        let mut psi = basis(1, 1);
        apply_flat(&mut psi, &Kind::Y, &[0], Ctrl::NONE);
        assert_eq!(psi[0], -c_i::<f64>());
        apply_flat(&mut psi, &Kind::Y, &[0], Ctrl::NONE);
        assert_eq!(psi, basis(1, 1));
    }

    #[test]
    fn z_negates_set_bit() {
        let mut psi = basis(1, 1);
        apply_flat(&mut psi, &Kind::Z, &[0], Ctrl::NONE);
        assert_eq!(psi[1], -c_one::<f64>());
    }

    #[test]
    fn zz_signs_odd_patterns() {
        let mut psi = vec![c_one::<f64>().scale(0.5); 4];
        apply_flat(&mut psi, &Kind::Z, &[0, 1], Ctrl::NONE);
        assert_eq!(psi[0b00], c_one::<f64>().scale(0.5));
        assert_eq!(psi[0b01], -c_one::<f64>().scale(0.5));
        assert_eq!(psi[0b10], -c_one::<f64>().scale(0.5));
        assert_eq!(psi[0b11], c_one::<f64>().scale(0.5));
    }

    #[test]
    fn hadamard_splits_and_restores() {
        let mut psi = basis(1, 0);
        apply_flat(&mut psi, &Kind::H, &[0], Ctrl::NONE);
        let s = std::f64::consts::FRAC_1_SQRT_2;
        assert!((psi[0].re - s).abs() < 1e-15 && (psi[1].re - s).abs() < 1e-15);
        apply_flat(&mut psi, &Kind::H, &[0], Ctrl::NONE);
        assert!((psi[0].re - 1.0).abs() < 1e-15 && psi[1].norm() < 1e-15);
    }

    #[test]
    fn controlled_x_respects_control_value() {
        let mut psi = basis(2, 0b00);
        apply_flat(&mut psi, &Kind::X, &[1], Ctrl::new(&[(0, true)]));
        assert_eq!(psi, basis(2, 0b00));

        let mut psi = basis(2, 0b01);
        apply_flat(&mut psi, &Kind::X, &[1], Ctrl::new(&[(0, true)]));
        assert_eq!(psi, basis(2, 0b11));

        let mut psi = basis(2, 0b00);
        apply_flat(&mut psi, &Kind::X, &[1], Ctrl::new(&[(0, false)]));
        assert_eq!(psi, basis(2, 0b10));
    }

    #[test]
    fn toffoli_flips_only_all_ones() {
        let ctrl = Ctrl::new(&[(0, true), (1, true)]);
        let mut psi = basis(3, 0b011);
        apply_flat(&mut psi, &Kind::X, &[2], ctrl);
        assert_eq!(psi, basis(3, 0b111));

        let mut psi = basis(3, 0b010);
        apply_flat(&mut psi, &Kind::X, &[2], ctrl);
        assert_eq!(psi, basis(3, 0b010));
    }

    #[test]
    fn swap_exchanges_mixed_slots() {
        let mut psi = basis(2, 0b01);
        apply_flat(&mut psi, &Kind::Swap, &[0, 1], Ctrl::NONE);
        assert_eq!(psi, basis(2, 0b10));

        let mut psi = basis(2, 0b11);
        apply_flat(&mut psi, &Kind::Swap, &[0, 1], Ctrl::NONE);
        assert_eq!(psi, basis(2, 0b11));
    }

    #[test]
    fn exp_swap_halves_compose_to_swap() {
        let phase = std::f64::consts::FRAC_PI_2;
        let mut psi = basis(2, 0b01);
        psi[0b10] = c_one::<f64>().scale(0.5);
        psi[0b01] = c_one::<f64>().scale(0.5);
        psi[0b00] = c_one::<f64>().scale(std::f64::consts::FRAC_1_SQRT_2);
        let mut expected = psi.clone();
        apply_flat(&mut expected, &Kind::Swap, &[0, 1], Ctrl::NONE);
        // exp(i·π/2·SWAP) = i·SWAP.
        apply_flat(&mut psi, &Kind::ExpSwap { phase }, &[0, 1], Ctrl::NONE);
        for (got, want) in psi.iter().zip(expected.iter()) {
            assert!((got - c_i::<f64>() * want).norm() < 1e-15);
        }
    }

    #[test]
    fn exp_x_matches_dense_rotation() {
        let phase = 0.437;
        let mut by_string = basis(1, 0);
        apply_flat(&mut by_string, &Kind::ExpX { phase }, &[0], Ctrl::NONE);
        assert!((by_string[0].re - phase.cos()).abs() < 1e-15);
        assert!((by_string[1].im - phase.sin()).abs() < 1e-15);
        assert!((norm_sqr(&by_string) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn exp_y_string_is_unitary() {
        let phase = 1.234;
        let mut psi = basis(2, 0b01);
        apply_flat(&mut psi, &Kind::ExpY { phase }, &[0, 1], Ctrl::NONE);
        assert!((norm_sqr(&psi) - 1.0).abs() < 1e-12);
        apply_flat(&mut psi, &Kind::ExpY { phase: -phase }, &[0, 1], Ctrl::NONE);
        assert_eq!(basis(2, 0b01).len(), psi.len());
        assert!((psi[0b01] - c_one::<f64>()).norm() < 1e-12);
    }

    #[test]
    fn diagonal_with_control() {
        let mut psi = vec![c_one::<f64>().scale(0.5); 4];
        apply_flat(&mut psi, &Kind::Z, &[1], Ctrl::new(&[(0, true)]));
        assert_eq!(psi[0b11], -c_one::<f64>().scale(0.5));
        assert_eq!(psi[0b10], c_one::<f64>().scale(0.5));
    }
}
