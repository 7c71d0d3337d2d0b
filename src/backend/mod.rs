//! State-vector backends.
//!
//! [`StateVector`] is the minimal kernel-invocation surface the engine
//! façade drives. Two implementations exist: [`LocalState`] keeps the
//! whole vector in one flat buffer, [`ClusterState`] shards it across the
//! processes of a [`Communicator`](crate::comm::Communicator) grid.
//! Randomness that must agree across processes is drawn through the
//! backend so the distributed impl can root-draw and broadcast.

use rand::rngs::StdRng;

use crate::error::Result;
use crate::math::{C, Mask, N, Real};
use crate::operator::Gate;

mod cluster;
mod local;
mod page;

pub use cluster::ClusterState;
pub use local::LocalState;

pub trait StateVector<T: Real> {
    fn num_qubits(&self) -> N;

    /// Re-initialise to the given logical basis state.
    fn reset(&mut self, basis: Mask);

    /// Apply one gate, interchanging qubits between processes first if
    /// any operated qubit is global.
    fn apply(&mut self, gate: &Gate<T>) -> Result;

    /// Replay a deferred gate list over the sub-vector spanned by
    /// `qubits`; `gates` reference slots of that sub-vector.
    fn apply_fused(&mut self, qubits: &[N], gates: &[Gate<T>]) -> Result;

    /// Global probability of measuring `qubit` as 1.
    fn prob_one(&mut self, qubit: N) -> T;

    /// Zero the amplitudes inconsistent with `outcome` and renormalise
    /// the survivors by `1/sqrt(prob)`.
    fn collapse(&mut self, qubit: N, outcome: bool, prob: T);

    /// Collapse to a single basis state selected by the uniform variate
    /// `u` in `[0, 1)`; returns the logical index.
    fn measure_all(&mut self, u: f64) -> Mask;

    /// Sample logical basis states for ascending uniform variates,
    /// without collapsing.
    fn sample_events(&mut self, variates: &[f64]) -> Vec<Mask>;

    /// Per-qubit ⟨σx⟩, ⟨σy⟩, ⟨σz⟩.
    fn spin_expectations(&mut self) -> Vec<[T; 3]>;

    /// Overwrite the state with the Shor-box superposition for the given
    /// exponent-register width, divisor and base.
    fn prepare_shor_box(&mut self, num_exponent_qubits: N, divisor: Mask, base: Mask);

    /// One uniform variate in `[0, 1)`, identical on every process.
    fn shared_uniform(&mut self, rng: &mut StdRng) -> f64;

    /// `count` uniform variates in `[0, 1)`, identical on every process.
    fn shared_uniforms(&mut self, rng: &mut StdRng, count: N) -> Vec<f64>;

    /// Gather the full amplitude vector in logical basis order.
    fn collect(&mut self) -> Vec<C<T>>;

    /// Global squared norm.
    fn norm_sqr(&mut self) -> T;

    /// Internal consistency check run at call boundaries.
    fn check(&self) -> Result {
        Ok(())
    }

    fn num_page_qubits(&self) -> N {
        0
    }

    fn num_pages(&self) -> N {
        1
    }
}
