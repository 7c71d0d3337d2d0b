//! Single-process backend: one flat amplitude buffer, logical qubits at
//! their own bit positions.

use rand::{rngs::StdRng, Rng};

use super::StateVector;
use crate::error::Result;
use crate::math::{
    approx_cmp::{approx_eq_real, approx_zero},
    c_one, c_zero,
    index::BlockIndexer,
    C, Mask, N, Real,
};
use crate::operator::{
    kernel::{apply_flat, Ctrl},
    Gate,
};

#[derive(Clone, Debug)]
pub struct LocalState<T: Real> {
    num_qubits: N,
    psi: Vec<C<T>>,
    scratch: Vec<C<T>>,
}

impl<T: Real> LocalState<T> {
    pub fn new(num_qubits: N) -> Self {
        let mut psi = vec![c_zero(); 1 << num_qubits];
        psi[0] = c_one();
        Self {
            num_qubits,
            psi,
            scratch: Vec::new(),
        }
    }

    pub fn with_state(num_qubits: N, basis: Mask) -> Self {
        let mut state = Self::new(num_qubits);
        state.reset(basis);
        state
    }

    fn ctrl_of(gate: &Gate<T>) -> Ctrl {
        let bits: Vec<(N, bool)> = gate.controls().iter().map(|c| (c.qubit, c.value)).collect();
        Ctrl::new(&bits)
    }
}

impl<T: Real> StateVector<T> for LocalState<T> {
    fn num_qubits(&self) -> N {
        self.num_qubits
    }

    fn reset(&mut self, basis: Mask) {
        self.psi.fill(c_zero());
        self.psi[basis] = c_one();
    }

    fn apply(&mut self, gate: &Gate<T>) -> Result {
        apply_flat(&mut self.psi, gate.kind(), gate.targets(), Self::ctrl_of(gate));
        Ok(())
    }

    fn apply_fused(&mut self, qubits: &[N], gates: &[Gate<T>]) -> Result {
        let indexer = BlockIndexer::new(self.num_qubits, qubits, &[]);
        let block = 1 << qubits.len();
        self.scratch.clear();
        self.scratch.resize(block, c_zero());

        let prepared: Vec<(&Gate<T>, Ctrl)> =
            gates.iter().map(|g| (g, Self::ctrl_of(g))).collect();

        for f in 0..indexer.free_count() {
            for p in 0..block {
                self.scratch[p] = self.psi[indexer.index(f, p)];
            }
            for (gate, ctrl) in &prepared {
                apply_flat(&mut self.scratch, gate.kind(), gate.targets(), *ctrl);
            }
            for p in 0..block {
                self.psi[indexer.index(f, p)] = self.scratch[p];
            }
        }
        Ok(())
    }

    fn prob_one(&mut self, qubit: N) -> T {
        let bit = 1 << qubit;
        self.psi
            .iter()
            .enumerate()
            .filter(|(idx, _)| idx & bit != 0)
            .map(|(_, amp)| amp.norm_sqr())
            .sum()
    }

    fn collapse(&mut self, qubit: N, outcome: bool, prob: T) {
        // Rounding can drive the survivor mass slightly negative when the
        // discarded branch held everything.
        if prob <= T::zero() || approx_zero(prob.to_f64()) {
            self.reset(0);
            return;
        }
        let bit = 1 << qubit;
        let keep = if outcome { bit } else { 0 };
        let scale = renorm_scale(prob);
        for (idx, amp) in self.psi.iter_mut().enumerate() {
            *amp = if idx & bit == keep {
                amp.scale(scale)
            } else {
                c_zero()
            };
        }
    }

    fn measure_all(&mut self, u: f64) -> Mask {
        let total: T = self.psi.iter().map(|amp| amp.norm_sqr()).sum();
        let target = T::from_f64(u) * total;

        let mut chosen = 0;
        let mut cum = T::zero();
        for (idx, amp) in self.psi.iter().enumerate() {
            let p = amp.norm_sqr();
            if p > T::zero() {
                chosen = idx;
            }
            cum += p;
            if target < cum {
                break;
            }
        }
        self.reset(chosen);
        chosen
    }

    fn sample_events(&mut self, variates: &[f64]) -> Vec<Mask> {
        let total: T = self.psi.iter().map(|amp| amp.norm_sqr()).sum();
        let mut events = vec![0; variates.len()];

        let mut vi = 0;
        let mut cum = T::zero();
        let mut last_occupied = 0;
        for (idx, amp) in self.psi.iter().enumerate() {
            let p = amp.norm_sqr();
            if p > T::zero() {
                last_occupied = idx;
            }
            cum += p;
            while vi < variates.len() && T::from_f64(variates[vi]) * total < cum {
                events[vi] = idx;
                vi += 1;
            }
        }
        // Variates pushed past the cumulative end by rounding fall on the
        // last occupied state.
        for event in events.iter_mut().skip(vi) {
            *event = last_occupied;
        }
        events
    }

    fn spin_expectations(&mut self) -> Vec<[T; 3]> {
        let two = T::from_f64(2.0);
        (0..self.num_qubits)
            .map(|q| {
                let bit = 1 << q;
                let mut pair_sum = c_zero();
                let mut s1 = T::zero();
                for (idx, amp) in self.psi.iter().enumerate() {
                    if idx & bit == 0 {
                        pair_sum += amp.conj() * self.psi[idx | bit];
                    } else {
                        s1 += amp.norm_sqr();
                    }
                }
                [
                    two * pair_sum.re,
                    two * pair_sum.im,
                    T::one() - two * s1,
                ]
            })
            .collect()
    }

    fn prepare_shor_box(&mut self, num_exponent_qubits: N, divisor: Mask, base: Mask) {
        self.psi.fill(c_zero());
        let count = 1usize << num_exponent_qubits;
        let amp = c_one::<T>().scale(T::from_f64(count as f64).sqrt().recip());
        for x in 0..count {
            let idx = (mod_pow(base, x, divisor) << num_exponent_qubits) | x;
            self.psi[idx] = amp;
        }
    }

    fn shared_uniform(&mut self, rng: &mut StdRng) -> f64 {
        rng.gen()
    }

    fn shared_uniforms(&mut self, rng: &mut StdRng, count: N) -> Vec<f64> {
        (0..count).map(|_| rng.gen()).collect()
    }

    fn collect(&mut self) -> Vec<C<T>> {
        self.psi.clone()
    }

    fn norm_sqr(&mut self) -> T {
        self.psi.iter().map(|amp| amp.norm_sqr()).sum()
    }
}

/// Renormalisation factor after discarding one measurement branch; a
/// survivor mass indistinguishable from one keeps the amplitudes as-is.
pub(crate) fn renorm_scale<T: Real>(prob: T) -> T {
    if approx_eq_real(prob.to_f64(), 1.0) {
        T::one()
    } else {
        prob.sqrt().recip()
    }
}

/// `base^exp mod modulus` by repeated squaring.
pub(crate) fn mod_pow(base: Mask, exp: Mask, modulus: Mask) -> Mask {
    if modulus == 1 {
        return 0;
    }
    let mut result = 1;
    let mut square = base % modulus;
    let mut exp = exp;
    while exp != 0 {
        if exp & 1 != 0 {
            result = result * square % modulus;
        }
        square = square * square % modulus;
        exp >>= 1;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator as op;

    #[test]
    fn initial_state_is_ground() {
        let mut state = LocalState::<f64>::new(3);
        let psi = state.collect();
        assert_eq!(psi[0], c_one());
        assert!(psi[1..].iter().all(|&amp| amp == c_zero()));
    }

    #[test]
    fn prob_and_collapse() {
        let mut state = LocalState::<f64>::new(2);
        state.apply(&op::h(0)).unwrap();
        state.apply(&op::cnot(1, 0)).unwrap();

        let p1 = state.prob_one(0);
        assert!((p1 - 0.5).abs() < 1e-12);

        state.collapse(0, true, p1);
        let psi = state.collect();
        assert!((psi[0b11].re - 1.0).abs() < 1e-12);
        assert!(psi[0b00].norm() < 1e-12);
    }

    #[test]
    fn fused_block_touches_only_selected_qubits() {
        let mut fused = LocalState::<f64>::new(3);
        let mut plain = LocalState::<f64>::new(3);
        plain.apply(&op::x(2)).unwrap();
        fused.apply(&op::x(2)).unwrap();

        // Slot space: h on slot 0 (= qubit 0), cnot slot 1 <- slot 0.
        let gates = vec![op::h(0), op::cnot(1, 0)];
        fused.apply_fused(&[0, 1], &gates).unwrap();
        plain.apply(&op::h(0)).unwrap();
        plain.apply(&op::cnot(1, 0)).unwrap();

        let (a, b) = (fused.collect(), plain.collect());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).norm() < 1e-12);
        }
    }

    #[test]
    fn mod_pow_matches_naive() {
        for base in 1..6usize {
            for exp in 0..8 {
                for modulus in 1..6 {
                    let naive = (0..exp).fold(1 % modulus, |acc, _| acc * base % modulus);
                    assert_eq!(mod_pow(base, exp, modulus), naive);
                }
            }
        }
    }

    #[test]
    fn shor_box_uniform_rows() {
        let mut state = LocalState::<f64>::new(3);
        state.prepare_shor_box(2, 2, 3);
        let psi = state.collect();
        // 3^x mod 2 = 1 for every x, so the modular bit is always set.
        for x in 0..4 {
            assert!((psi[0b100 | x].re - 0.5).abs() < 1e-12);
            assert!(psi[x].norm() < 1e-12);
        }
    }
}
