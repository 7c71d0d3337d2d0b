//! Scheduler façade.
//!
//! One [`Engine`] wraps a backend and drives it with gates, measurements
//! and channels, keeping the per-qubit outcome records, the shared RNG,
//! the fusion scope and the phase timeline. Each entry point validates
//! its qubits, so a failed call leaves the state untouched.

use std::time::Instant;

use rand::{rngs::StdRng, SeedableRng};

use crate::backend::{ClusterState, LocalState, StateVector};
use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::fusion::FusionBuffer;
use crate::math::{Mask, N, Real};
use crate::operator::{self as op, Gate};
use crate::permutation::Permutation;

/// Upper bound on the operated (target + control) qubits of one gate.
pub const MAX_OPERATED_QUBITS: N = 6;

/// Last measurement result of one qubit. Records are invalidated by the
/// next gate touching the qubit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Unspecified,
    Zero,
    One,
}

/// Which stage of a simulation finished at a timeline stamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishedPhase {
    Operations,
    BeginMeasurement,
    GenerateEvents,
    FullMeasurement,
}

pub type LocalEngine<T> = Engine<T, LocalState<T>>;
pub type ClusterEngine<T, M> = Engine<T, ClusterState<T, M>>;

pub struct Engine<T: Real, B: StateVector<T>> {
    backend: B,
    num_qubits: N,
    outcomes: Vec<Outcome>,
    rng: StdRng,
    fusion: Option<FusionBuffer<T>>,
    measured_value: Mask,
    events: Vec<Mask>,
    expectations: Option<Vec<[T; 3]>>,
    timeline: Vec<(Instant, FinishedPhase)>,
}

impl<T: Real> Engine<T, LocalState<T>> {
    /// Single-process engine in the |0…0⟩ state.
    pub fn local(num_qubits: N, seed: u64) -> Self {
        Self::with_backend(LocalState::new(num_qubits), seed)
    }
}

impl<T: Real, M: Communicator<T>> Engine<T, ClusterState<T, M>> {
    /// Distributed engine over a process grid.
    pub fn cluster(num_qubits: N, num_page_qubits: N, seed: u64, comm: M) -> Self {
        Self::with_backend(ClusterState::new(num_qubits, num_page_qubits, comm), seed)
    }

    /// Distributed engine with a caller-supplied initial qubit layout.
    pub fn cluster_with_permutation(
        num_qubits: N,
        num_page_qubits: N,
        seed: u64,
        comm: M,
        perm: Permutation,
    ) -> Self {
        Self::with_backend(
            ClusterState::with_permutation(num_qubits, num_page_qubits, comm, perm),
            seed,
        )
    }
}

impl<T: Real, B: StateVector<T>> Engine<T, B> {
    pub fn with_backend(backend: B, seed: u64) -> Self {
        let num_qubits = backend.num_qubits();
        Self {
            backend,
            num_qubits,
            outcomes: vec![Outcome::Unspecified; num_qubits],
            rng: StdRng::seed_from_u64(seed),
            fusion: None,
            measured_value: 0,
            events: Vec::new(),
            expectations: None,
            timeline: Vec::new(),
        }
    }

    pub fn num_qubits(&self) -> N {
        self.num_qubits
    }

    pub fn num_page_qubits(&self) -> N {
        self.backend.num_page_qubits()
    }

    pub fn num_pages(&self) -> N {
        self.backend.num_pages()
    }

    /// Re-initialise to a logical basis state, dropping any open fusion.
    pub fn reset(&mut self, basis: Mask) {
        self.fusion = None;
        self.outcomes.fill(Outcome::Unspecified);
        self.backend.reset(basis & crate::math::low_ones(self.num_qubits));
    }

    fn validate_qubit(&self, qubit: N) -> Result {
        if qubit < self.num_qubits {
            Ok(())
        } else {
            Err(Error::InvalidQubit {
                qubit,
                num_qubits: self.num_qubits,
            })
        }
    }

    fn validate(&self, gate: &Gate<T>) -> Result {
        let num = gate.num_operated();
        if num > MAX_OPERATED_QUBITS {
            return Err(Error::TooManyOperatedQubits {
                num,
                max: MAX_OPERATED_QUBITS,
            });
        }
        let mut seen: Vec<N> = Vec::with_capacity(num);
        for q in gate.operated() {
            self.validate_qubit(q)?;
            if seen.contains(&q) {
                return Err(Error::DuplicateQubit { qubit: q });
            }
            seen.push(q);
        }
        Ok(())
    }

    /// Apply one gate, or defer it if a fusion scope is open.
    pub fn apply(&mut self, gate: &Gate<T>) -> Result {
        self.validate(gate)?;

        if let Some(fusion) = &mut self.fusion {
            return fusion.push(gate);
        }

        self.backend.apply(gate)?;
        self.backend.check()?;
        for q in gate.operated() {
            self.outcomes[q] = Outcome::Unspecified;
        }
        Ok(())
    }

    /// Open a fusion scope over `qubits`.
    pub fn begin_fusion(&mut self, qubits: &[N]) -> Result {
        if self.fusion.is_some() {
            return Err(Error::UnsupportedFusedGate {
                name: "nested fusion scope".to_string(),
            });
        }
        for &q in qubits {
            self.validate_qubit(q)?;
        }
        self.fusion = Some(FusionBuffer::open(qubits)?);
        Ok(())
    }

    /// Replay the deferred gates and close the scope.
    pub fn end_fusion(&mut self) -> Result {
        let fusion = match self.fusion.take() {
            Some(fusion) => fusion,
            None => return Ok(()),
        };
        self.backend.apply_fused(fusion.qubits(), fusion.gates())?;
        self.backend.check()?;
        for &q in fusion.qubits() {
            self.outcomes[q] = Outcome::Unspecified;
        }
        Ok(())
    }

    fn stamp(&mut self, phase: FinishedPhase) {
        self.timeline.push((Instant::now(), phase));
    }

    /// Measure one qubit projectively and collapse the survivors.
    pub fn projective_measurement(&mut self, qubit: N) -> Result<bool> {
        self.validate_qubit(qubit)?;
        self.end_fusion()?;

        let prob_one = self.backend.prob_one(qubit);
        let u = self.backend.shared_uniform(&mut self.rng);
        // The variate walks the outcome axis from |0>: anything past the
        // |0> mass selects outcome 1.
        let outcome = u >= (T::one() - prob_one).to_f64();
        let prob = if outcome { prob_one } else { T::one() - prob_one };
        self.backend.collapse(qubit, outcome, prob);
        self.outcomes[qubit] = if outcome { Outcome::One } else { Outcome::Zero };
        Ok(outcome)
    }

    /// Compute per-qubit spin expectation values.
    pub fn begin_measurement(&mut self) -> Result {
        self.end_fusion()?;
        self.expectations = Some(self.backend.spin_expectations());
        self.stamp(FinishedPhase::BeginMeasurement);
        Ok(())
    }

    /// Collapse the whole register to one basis state.
    pub fn measure(&mut self) -> Result<Mask> {
        self.end_fusion()?;
        let u = self.backend.shared_uniform(&mut self.rng);
        let value = self.backend.measure_all(u);
        self.measured_value = value;
        for q in 0..self.num_qubits {
            self.outcomes[q] = if value & (1 << q) != 0 {
                Outcome::One
            } else {
                Outcome::Zero
            };
        }
        self.stamp(FinishedPhase::FullMeasurement);
        Ok(value)
    }

    /// Sample `count` basis states without collapsing.
    pub fn generate_events(&mut self, count: N, seed: u64) -> Result<&[Mask]> {
        self.end_fusion()?;
        let mut event_rng = StdRng::seed_from_u64(seed);
        let mut variates = self.backend.shared_uniforms(&mut event_rng, count);
        variates.sort_by(|a, b| a.partial_cmp(b).expect("uniform variates are never NaN"));
        self.events = self.backend.sample_events(&variates);
        self.stamp(FinishedPhase::GenerateEvents);
        Ok(&self.events)
    }

    /// Apply an X/Y/Z error on every qubit with the given probabilities.
    /// The Pauli choices are drawn on one rank and broadcast, so a seed
    /// fixes the error pattern across the whole grid.
    pub fn depolarizing_channel(&mut self, px: f64, py: f64, pz: f64, seed: u64) -> Result {
        self.end_fusion()?;
        let mut channel_rng = StdRng::seed_from_u64(seed);
        let variates = self
            .backend
            .shared_uniforms(&mut channel_rng, self.num_qubits);

        debug_assert!(px >= 0.0 && py >= 0.0 && pz >= 0.0 && px + py + pz <= 1.0);
        for (qubit, &u) in variates.iter().enumerate() {
            if u < px {
                self.apply(&op::x(qubit))?;
            } else if u < px + py {
                self.apply(&op::y(qubit))?;
            } else if u < px + py + pz {
                self.apply(&op::z(qubit))?;
            }
        }
        Ok(())
    }

    /// Force a qubit to |0⟩ without randomness.
    pub fn clear(&mut self, qubit: N) -> Result {
        self.validate_qubit(qubit)?;
        self.end_fusion()?;
        let prob_one = self.backend.prob_one(qubit);
        self.backend.collapse(qubit, false, T::one() - prob_one);
        self.outcomes[qubit] = Outcome::Zero;
        Ok(())
    }

    /// Force a qubit to |1⟩ without randomness.
    pub fn set(&mut self, qubit: N) -> Result {
        self.validate_qubit(qubit)?;
        self.end_fusion()?;
        let prob_one = self.backend.prob_one(qubit);
        self.backend.collapse(qubit, true, prob_one);
        self.outcomes[qubit] = Outcome::One;
        Ok(())
    }

    /// Overwrite the state with the Shor-box superposition: the exponent
    /// register spans the low `num_exponent_qubits` qubits, the modular
    /// register the rest.
    pub fn shor_box(&mut self, num_exponent_qubits: N, divisor: Mask, base: Mask) -> Result {
        if num_exponent_qubits > self.num_qubits {
            return Err(Error::InvalidQubit {
                qubit: num_exponent_qubits,
                num_qubits: self.num_qubits,
            });
        }
        let modular_bits = self.num_qubits - num_exponent_qubits;
        debug_assert!(divisor >= 1 && divisor <= (1 << modular_bits));
        self.end_fusion()?;
        self.backend
            .prepare_shor_box(num_exponent_qubits, divisor, base);
        self.outcomes.fill(Outcome::Unspecified);
        Ok(())
    }

    /// Stamp the end of the operation stream.
    pub fn exit(&mut self) -> Result {
        self.end_fusion()?;
        self.stamp(FinishedPhase::Operations);
        Ok(())
    }

    pub fn is_measured(&self, qubit: N) -> bool {
        self.outcomes[qubit] != Outcome::Unspecified
    }

    pub fn outcome(&self, qubit: N) -> Outcome {
        self.outcomes[qubit]
    }

    pub fn measured_value(&self) -> Mask {
        self.measured_value
    }

    pub fn generated_events(&self) -> &[Mask] {
        &self.events
    }

    pub fn expectation_values(&self) -> Option<&[[T; 3]]> {
        self.expectations.as_deref()
    }

    pub fn timeline(&self) -> &[(Instant, FinishedPhase)] {
        &self.timeline
    }

    /// Gathered amplitude vector in logical basis order.
    pub fn amplitudes(&mut self) -> Vec<crate::math::C<T>> {
        self.backend.collect()
    }

    /// Probabilities of every basis state.
    pub fn probabilities(&mut self) -> Vec<T> {
        self.backend
            .collect()
            .into_iter()
            .map(|amp| amp.norm_sqr())
            .collect()
    }

    pub fn norm_sqr(&mut self) -> T {
        self.backend.norm_sqr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wide_gates() {
        let mut engine = LocalEngine::<f64>::local(8, 1);
        let gate = op::xn::<f64>(&[0, 1, 2, 3]).controlled(4).controlled(5).controlled(6);
        assert_eq!(
            engine.apply(&gate),
            Err(Error::TooManyOperatedQubits { num: 7, max: 6 })
        );
        // Nothing was applied.
        assert_eq!(engine.amplitudes()[0].re, 1.0);
    }

    #[test]
    fn rejects_bad_qubits() {
        let mut engine = LocalEngine::<f64>::local(2, 1);
        assert_eq!(
            engine.apply(&op::x(2)),
            Err(Error::InvalidQubit { qubit: 2, num_qubits: 2 })
        );
        assert_eq!(
            engine.apply(&op::cnot(1, 1)),
            Err(Error::DuplicateQubit { qubit: 1 })
        );
    }

    #[test]
    fn outcome_records_expire_on_touch() {
        let mut engine = LocalEngine::<f64>::local(1, 7);
        engine.set(0).unwrap();
        assert!(engine.is_measured(0));
        assert_eq!(engine.outcome(0), Outcome::One);

        engine.apply(&op::h(0)).unwrap();
        assert!(!engine.is_measured(0));
    }

    #[test]
    fn fusion_defers_and_replays() {
        let mut engine = LocalEngine::<f64>::local(3, 1);
        engine.begin_fusion(&[0, 1]).unwrap();
        engine.apply(&op::h(0)).unwrap();
        // Deferred gates leave the state untouched.
        assert_eq!(engine.amplitudes()[0].re, 1.0);

        engine.apply(&op::cnot(1, 0)).unwrap();
        engine.end_fusion().unwrap();

        let psi = engine.amplitudes();
        let s = std::f64::consts::FRAC_1_SQRT_2;
        assert!((psi[0b00].re - s).abs() < 1e-12);
        assert!((psi[0b11].re - s).abs() < 1e-12);
    }

    #[test]
    fn fusion_scope_errors() {
        let mut engine = LocalEngine::<f64>::local(3, 1);
        engine.begin_fusion(&[0, 1]).unwrap();
        assert!(matches!(
            engine.apply(&op::x(2)),
            Err(Error::UnsupportedFusedGate { .. })
        ));
        assert!(matches!(
            engine.begin_fusion(&[2]),
            Err(Error::UnsupportedFusedGate { .. })
        ));
    }

    #[test]
    fn measurement_closes_fusion() {
        let mut engine = LocalEngine::<f64>::local(2, 3);
        engine.begin_fusion(&[0]).unwrap();
        engine.apply(&op::x(0)).unwrap();
        let value = engine.measure().unwrap();
        assert_eq!(value, 0b01);
        assert_eq!(engine.outcome(0), Outcome::One);
        assert_eq!(engine.outcome(1), Outcome::Zero);
        assert_eq!(engine.timeline().len(), 1);
        assert_eq!(engine.timeline()[0].1, FinishedPhase::FullMeasurement);
    }

    #[test]
    fn clear_and_set_are_deterministic() {
        let mut engine = LocalEngine::<f64>::local(1, 1);
        engine.apply(&op::h(0)).unwrap();
        engine.clear(0).unwrap();
        assert!((engine.amplitudes()[0].re - 1.0).abs() < 1e-12);

        engine.apply(&op::h(0)).unwrap();
        engine.set(0).unwrap();
        assert!((engine.amplitudes()[1].norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn depolarizing_identity_channel_is_noop() {
        let mut engine = LocalEngine::<f64>::local(2, 1);
        engine.apply(&op::h(0)).unwrap();
        let before = engine.amplitudes();
        engine.depolarizing_channel(0.0, 0.0, 0.0, 99).unwrap();
        assert_eq!(engine.amplitudes(), before);
    }

    #[test]
    fn depolarizing_all_x_flips_everything() {
        let mut engine = LocalEngine::<f64>::local(3, 1);
        engine.depolarizing_channel(1.0, 0.0, 0.0, 5).unwrap();
        assert!((engine.amplitudes()[0b111].norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn spin_expectations_of_plus_state() {
        let mut engine = LocalEngine::<f64>::local(2, 1);
        engine.apply(&op::h(0)).unwrap();
        engine.begin_measurement().unwrap();
        let spins = engine.expectation_values().unwrap();
        assert!((spins[0][0] - 1.0).abs() < 1e-12); // ⟨σx⟩ = 1 on |+⟩
        assert!(spins[0][1].abs() < 1e-12);
        assert!(spins[0][2].abs() < 1e-12);
        assert!((spins[1][2] - 1.0).abs() < 1e-12); // ⟨σz⟩ = 1 on |0⟩
    }
}
