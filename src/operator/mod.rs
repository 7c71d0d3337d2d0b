//! Gate descriptors.
//!
//! Gates are lazy: a [`Gate`] only records its family, targets and
//! controls, and the state backend picks the kernel when it is applied.
//! Controlled and adjoint variants are derived from the base
//! constructors:
//!
//! ```rust
//! use qshard::operator as op;
//!
//! let cnot = op::x::<f64>(1).controlled(0);
//! let inverse_t = op::t::<f64>(2).adjoint();
//! ```

use std::fmt;

use crate::math::{phase_from_rad, C, N, Real};

pub(crate) mod kernel;
mod kind;

pub use kind::Kind;

/// A control qubit paired with its required bit value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Control {
    pub qubit: N,
    pub value: bool,
}

impl Control {
    pub fn one(qubit: N) -> Self {
        Self { qubit, value: true }
    }

    pub fn zero(qubit: N) -> Self {
        Self { qubit, value: false }
    }
}

/// One quantum operation over logical qubits.
#[derive(Clone, PartialEq)]
pub struct Gate<T: Real> {
    pub(crate) kind: Kind<T>,
    pub(crate) targets: Vec<N>,
    pub(crate) controls: Vec<Control>,
}

impl<T: Real> Gate<T> {
    fn new(kind: Kind<T>, targets: Vec<N>) -> Self {
        debug_assert!(kind.arity().map_or(true, |k| k == targets.len()));
        Self {
            kind,
            targets,
            controls: Vec::new(),
        }
    }

    /// Add a control qubit required to be |1>.
    pub fn controlled(mut self, qubit: N) -> Self {
        self.controls.push(Control::one(qubit));
        self
    }

    /// Add a control qubit required to be |0>.
    pub fn controlled_zero(mut self, qubit: N) -> Self {
        self.controls.push(Control::zero(qubit));
        self
    }

    /// Conjugate transpose. Self-inverse families return themselves.
    pub fn adjoint(self) -> Self {
        Self {
            kind: self.kind.adjoint(),
            ..self
        }
    }

    pub fn targets(&self) -> &[N] {
        &self.targets
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub(crate) fn kind(&self) -> &Kind<T> {
        &self.kind
    }

    /// Targets followed by controls.
    pub(crate) fn operated(&self) -> impl Iterator<Item = N> + '_ {
        self.targets
            .iter()
            .copied()
            .chain(self.controls.iter().map(|c| c.qubit))
    }

    pub(crate) fn num_operated(&self) -> N {
        self.targets.len() + self.controls.len()
    }

    /// `(C{controls}_)?{mnemonic}{targets}` in the style of OpenQASM
    /// mnemonics.
    pub fn name(&self) -> String {
        let mut name = String::new();
        if !self.controls.is_empty() {
            name.push('C');
            for c in &self.controls {
                name.push_str(&format!("{}{}", if c.value { "" } else { "!" }, c.qubit));
            }
            name.push('_');
        }
        name.push_str(self.kind.mnemonic());
        for (i, t) in self.targets.iter().enumerate() {
            name.push_str(&format!("{}{}", if i == 0 { "" } else { "," }, t));
        }
        name
    }
}

impl<T: Real> fmt::Debug for Gate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Identity gate.
pub fn i<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::I, vec![qubit])
}

/// Identity over several qubits.
pub fn in_gate<T: Real>(qubits: &[N]) -> Gate<T> {
    Gate::new(Kind::I, qubits.to_vec())
}

/// Hadamard gate.
pub fn h<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::H, vec![qubit])
}

/// Pauli X (NOT) gate.
pub fn x<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::X, vec![qubit])
}

/// Pauli X tensor string.
pub fn xn<T: Real>(qubits: &[N]) -> Gate<T> {
    Gate::new(Kind::X, qubits.to_vec())
}

/// Pauli Y gate.
pub fn y<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::Y, vec![qubit])
}

/// Pauli Y tensor string.
pub fn yn<T: Real>(qubits: &[N]) -> Gate<T> {
    Gate::new(Kind::Y, qubits.to_vec())
}

/// Pauli Z gate.
pub fn z<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::Z, vec![qubit])
}

/// Pauli Z tensor string: flips the sign of odd-parity patterns.
pub fn zn<T: Real>(qubits: &[N]) -> Gate<T> {
    Gate::new(Kind::Z, qubits.to_vec())
}

/// Square root of X.
pub fn sqrt_x<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::SqrtX { adj: false }, vec![qubit])
}

/// Square root of Y.
pub fn sqrt_y<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::SqrtY { adj: false }, vec![qubit])
}

/// Square root of Z, aka the S gate.
pub fn sqrt_z<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::SqrtZ { adj: false }, vec![qubit])
}

/// √Z tensor string.
pub fn sqrt_zn<T: Real>(qubits: &[N]) -> Gate<T> {
    Gate::new(Kind::SqrtZ { adj: false }, qubits.to_vec())
}

/// S gate (√Z).
pub fn s<T: Real>(qubit: N) -> Gate<T> {
    sqrt_z(qubit)
}

/// T gate (fourth root of Z).
pub fn t<T: Real>(qubit: N) -> Gate<T> {
    u1(T::FRAC_PI_4(), qubit)
}

/// Phase shift by a precomputed unit-norm coefficient: `diag(1, coeff)`.
pub fn phase_shift<T: Real>(coeff: C<T>, qubit: N) -> Gate<T> {
    Gate::new(Kind::Phase { coeff }, vec![qubit])
}

/// Phase shift by an angle in radians.
pub fn r<T: Real>(phase: T, qubit: N) -> Gate<T> {
    phase_shift(phase_from_rad(phase), qubit)
}

/// First universal gate: `diag(1, e^{iλ})`.
pub fn u1<T: Real>(lambda: T, qubit: N) -> Gate<T> {
    Gate::new(Kind::U1 { lambda }, vec![qubit])
}

/// Second universal gate.
pub fn u2<T: Real>(phi: T, lambda: T, qubit: N) -> Gate<T> {
    Gate::new(Kind::U2 { phi, lambda }, vec![qubit])
}

/// Third universal gate (Euler angles).
pub fn u3<T: Real>(theta: T, phi: T, lambda: T, qubit: N) -> Gate<T> {
    Gate::new(Kind::U3 { theta, phi, lambda }, vec![qubit])
}

/// Rotation by π/2 around X (the `+X` mnemonic).
pub fn x_half_pi<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::XHalfPi { adj: false }, vec![qubit])
}

/// Rotation by −π/2 around X (the `-X` mnemonic).
pub fn x_half_pi_dgr<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::XHalfPi { adj: true }, vec![qubit])
}

/// Rotation by π/2 around Y (the `+Y` mnemonic).
pub fn y_half_pi<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::YHalfPi { adj: false }, vec![qubit])
}

/// Rotation by −π/2 around Y (the `-Y` mnemonic).
pub fn y_half_pi_dgr<T: Real>(qubit: N) -> Gate<T> {
    Gate::new(Kind::YHalfPi { adj: true }, vec![qubit])
}

/// `exp(i·phase·X)`.
pub fn exp_x<T: Real>(phase: T, qubit: N) -> Gate<T> {
    Gate::new(Kind::ExpX { phase }, vec![qubit])
}

/// `exp(i·phase·X⊗…⊗X)`.
pub fn exp_xn<T: Real>(phase: T, qubits: &[N]) -> Gate<T> {
    Gate::new(Kind::ExpX { phase }, qubits.to_vec())
}

/// `exp(i·phase·Y)`.
pub fn exp_y<T: Real>(phase: T, qubit: N) -> Gate<T> {
    Gate::new(Kind::ExpY { phase }, vec![qubit])
}

/// `exp(i·phase·Y⊗…⊗Y)`.
pub fn exp_yn<T: Real>(phase: T, qubits: &[N]) -> Gate<T> {
    Gate::new(Kind::ExpY { phase }, qubits.to_vec())
}

/// `exp(i·phase·Z)`.
pub fn exp_z<T: Real>(phase: T, qubit: N) -> Gate<T> {
    Gate::new(Kind::ExpZ { phase }, vec![qubit])
}

/// `exp(i·phase·Z⊗…⊗Z)`.
pub fn exp_zn<T: Real>(phase: T, qubits: &[N]) -> Gate<T> {
    Gate::new(Kind::ExpZ { phase }, qubits.to_vec())
}

/// Exchange two qubits.
pub fn swap<T: Real>(qubit1: N, qubit2: N) -> Gate<T> {
    Gate::new(Kind::Swap, vec![qubit1, qubit2])
}

/// `exp(i·phase·SWAP)`.
pub fn exp_swap<T: Real>(phase: T, qubit1: N, qubit2: N) -> Gate<T> {
    Gate::new(Kind::ExpSwap { phase }, vec![qubit1, qubit2])
}

/// Controlled NOT.
pub fn cnot<T: Real>(target: N, control: N) -> Gate<T> {
    x(target).controlled(control)
}

/// Controlled NOT (the `CX` mnemonic).
pub fn cx<T: Real>(target: N, control: N) -> Gate<T> {
    cnot(target, control)
}

/// Controlled Z.
pub fn cz<T: Real>(target: N, control: N) -> Gate<T> {
    z(target).controlled(control)
}

/// Doubly controlled NOT.
pub fn toffoli<T: Real>(target: N, control1: N, control2: N) -> Gate<T> {
    x(target).controlled(control1).controlled(control2)
}

/// Controlled phase-coefficient gate (the `V` family).
pub fn controlled_v<T: Real>(coeff: C<T>, target: N, control: N) -> Gate<T> {
    phase_shift(coeff, target).controlled(control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(x::<f64>(3).name(), "X3");
        assert_eq!(cnot::<f64>(1, 0).name(), "C0_X1");
        assert_eq!(toffoli::<f64>(2, 0, 1).name(), "C01_X2");
        assert_eq!(xn::<f64>(&[0, 2]).name(), "X0,2");
        assert_eq!(x::<f64>(1).controlled_zero(0).name(), "C!0_X1");
        assert_eq!(x_half_pi_dgr::<f64>(0).name(), "-X0");
    }

    #[test]
    fn adjoint_round_trip_tags() {
        let gate = sqrt_x::<f64>(0);
        assert_eq!(gate.clone().adjoint().adjoint(), gate);

        let gate = exp_z::<f64>(0.5, 1);
        assert_eq!(gate.clone().adjoint().adjoint(), gate);
    }

    #[test]
    fn operated_order_is_targets_then_controls() {
        let gate = swap::<f64>(4, 2).controlled(7);
        assert_eq!(gate.operated().collect::<Vec<_>>(), vec![4, 2, 7]);
        assert_eq!(gate.num_operated(), 3);
    }

    #[test]
    fn t_is_fourth_root_of_z() {
        let t4 = t::<f64>(0);
        match t4.kind() {
            Kind::U1 { lambda } => assert!((lambda - std::f64::consts::FRAC_PI_4).abs() < 1e-15),
            other => panic!("unexpected kind {:?}", other.mnemonic()),
        }
    }
}
