//! Gate families and their 2×2 / diagonal closed forms.

use crate::math::{c_i, c_one, i_pow, phase_from_rad, C, N, Real};

/// Row-major 2×2 complex matrix, indexed `m[row << 1 | col]`.
pub type M1<T> = [C<T>; 4];

/// Tagged gate family descriptor.
///
/// Families marked `adj` carry their adjoint in the tag; the remaining
/// families are either self-inverse or take negated parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Kind<T: Real> {
    /// Identity on any number of qubits.
    I,
    /// Hadamard on a single target.
    H,
    /// Pauli X tensor string over all targets.
    X,
    /// Pauli Y tensor string over all targets.
    Y,
    /// Pauli Z tensor string over all targets.
    Z,
    SqrtX { adj: bool },
    SqrtY { adj: bool },
    /// √Z tensor string; the amplitude at a target pattern with `q` set
    /// bits picks up `i^q` (`(-i)^q` for the adjoint).
    SqrtZ { adj: bool },
    /// `diag(1, coeff)` for a unit-norm coefficient.
    Phase { coeff: C<T> },
    U1 { lambda: T },
    U2 { phi: T, lambda: T },
    U3 { theta: T, phi: T, lambda: T },
    XHalfPi { adj: bool },
    YHalfPi { adj: bool },
    /// `exp(i·phase·X⊗…⊗X)` over all targets.
    ExpX { phase: T },
    /// `exp(i·phase·Y⊗…⊗Y)` over all targets.
    ExpY { phase: T },
    /// `exp(i·phase·Z⊗…⊗Z)` over all targets.
    ExpZ { phase: T },
    /// Exchange of two targets.
    Swap,
    /// `exp(i·phase·SWAP)` on two targets.
    ExpSwap { phase: T },
}

impl<T: Real> Kind<T> {
    /// Diagonal families never move amplitudes between processes.
    pub(crate) fn is_diagonal(&self) -> bool {
        matches!(
            self,
            Kind::I
                | Kind::Z
                | Kind::SqrtZ { .. }
                | Kind::Phase { .. }
                | Kind::U1 { .. }
                | Kind::ExpZ { .. }
        )
    }

    /// Multiplier applied to an amplitude whose target-bit pattern has
    /// `ones` set bits. Only meaningful for diagonal families.
    pub(crate) fn diag_factor(&self, ones: N) -> C<T> {
        match self {
            Kind::I => c_one(),
            Kind::Z => {
                if ones & 1 == 0 {
                    c_one()
                } else {
                    -c_one::<T>()
                }
            }
            Kind::SqrtZ { adj: false } => i_pow(ones),
            Kind::SqrtZ { adj: true } => i_pow(ones).conj(),
            Kind::Phase { coeff } => {
                let mut factor = c_one();
                for _ in 0..ones {
                    factor *= *coeff;
                }
                factor
            }
            Kind::U1 { lambda } => phase_from_rad(*lambda * T::from_f64(ones as f64)),
            Kind::ExpZ { phase } => {
                if ones & 1 == 0 {
                    phase_from_rad(*phase)
                } else {
                    phase_from_rad(-*phase)
                }
            }
            _ => unreachable!("diag_factor on a non-diagonal family"),
        }
    }

    /// Dense 2×2 matrix for single-target families.
    pub(crate) fn dense_1q(&self) -> Option<M1<T>> {
        let half = T::from_f64(0.5);
        let s = T::FRAC_1_SQRT_2();
        let one = c_one::<T>();
        let i = c_i::<T>();

        let u = match *self {
            Kind::H => [one.scale(s), one.scale(s), one.scale(s), -one.scale(s)],
            Kind::SqrtX { adj } => {
                let p = (one + i).scale(half);
                let m = (one - i).scale(half);
                let u = [p, m, m, p];
                if adj {
                    conj_m1(&u)
                } else {
                    u
                }
            }
            Kind::SqrtY { adj } => {
                let p = (one + i).scale(half);
                if adj {
                    [p.conj(), p.conj(), -p.conj(), p.conj()]
                } else {
                    [p, -p, p, p]
                }
            }
            Kind::XHalfPi { adj } => {
                let d = one.scale(s);
                let o = if adj { i.scale(s) } else { -i.scale(s) };
                [d, o, o, d]
            }
            Kind::YHalfPi { adj } => {
                let d = one.scale(s);
                if adj {
                    [d, d, -d, d]
                } else {
                    [d, -d, d, d]
                }
            }
            Kind::U2 { phi, lambda } => [
                one.scale(s),
                -phase_from_rad(lambda).scale(s),
                phase_from_rad(phi).scale(s),
                phase_from_rad(phi + lambda).scale(s),
            ],
            Kind::U3 { theta, phi, lambda } => {
                let (sin, cos) = (theta * half).sin_cos();
                [
                    one.scale(cos),
                    -phase_from_rad(lambda).scale(sin),
                    phase_from_rad(phi).scale(sin),
                    phase_from_rad(phi + lambda).scale(cos),
                ]
            }
            _ => return None,
        };
        Some(u)
    }

    /// Adjoint family. Self-inverse families map to themselves.
    pub fn adjoint(self) -> Self {
        match self {
            Kind::I | Kind::H | Kind::X | Kind::Y | Kind::Z | Kind::Swap => self,
            Kind::SqrtX { adj } => Kind::SqrtX { adj: !adj },
            Kind::SqrtY { adj } => Kind::SqrtY { adj: !adj },
            Kind::SqrtZ { adj } => Kind::SqrtZ { adj: !adj },
            Kind::Phase { coeff } => Kind::Phase { coeff: coeff.conj() },
            Kind::U1 { lambda } => Kind::U1 { lambda: -lambda },
            Kind::U2 { phi, lambda } => Kind::U3 {
                theta: -T::FRAC_PI_2(),
                phi: -lambda,
                lambda: -phi,
            },
            Kind::U3 { theta, phi, lambda } => Kind::U3 {
                theta: -theta,
                phi: -lambda,
                lambda: -phi,
            },
            Kind::XHalfPi { adj } => Kind::XHalfPi { adj: !adj },
            Kind::YHalfPi { adj } => Kind::YHalfPi { adj: !adj },
            Kind::ExpX { phase } => Kind::ExpX { phase: -phase },
            Kind::ExpY { phase } => Kind::ExpY { phase: -phase },
            Kind::ExpZ { phase } => Kind::ExpZ { phase: -phase },
            Kind::ExpSwap { phase } => Kind::ExpSwap { phase: -phase },
        }
    }

    /// Required target count; `None` for tensor-string families.
    pub(crate) fn arity(&self) -> Option<N> {
        match self {
            Kind::H
            | Kind::SqrtX { .. }
            | Kind::SqrtY { .. }
            | Kind::Phase { .. }
            | Kind::U1 { .. }
            | Kind::U2 { .. }
            | Kind::U3 { .. }
            | Kind::XHalfPi { .. }
            | Kind::YHalfPi { .. } => Some(1),
            Kind::Swap | Kind::ExpSwap { .. } => Some(2),
            Kind::I
            | Kind::X
            | Kind::Y
            | Kind::Z
            | Kind::SqrtZ { .. }
            | Kind::ExpX { .. }
            | Kind::ExpY { .. }
            | Kind::ExpZ { .. } => None,
        }
    }

    pub(crate) fn mnemonic(&self) -> &'static str {
        match self {
            Kind::I => "I",
            Kind::H => "H",
            Kind::X => "X",
            Kind::Y => "Y",
            Kind::Z => "Z",
            Kind::SqrtX { .. } => "SX",
            Kind::SqrtY { .. } => "SY",
            Kind::SqrtZ { .. } => "SZ",
            Kind::Phase { .. } => "R",
            Kind::U1 { .. } => "U1",
            Kind::U2 { .. } => "U2",
            Kind::U3 { .. } => "U3",
            Kind::XHalfPi { adj: false } => "+X",
            Kind::XHalfPi { adj: true } => "-X",
            Kind::YHalfPi { adj: false } => "+Y",
            Kind::YHalfPi { adj: true } => "-Y",
            Kind::ExpX { .. } => "eX",
            Kind::ExpY { .. } => "eY",
            Kind::ExpZ { .. } => "eZ",
            Kind::Swap => "SWAP",
            Kind::ExpSwap { .. } => "eSWAP",
        }
    }
}

pub(crate) fn conj_m1<T: Real>(u: &M1<T>) -> M1<T> {
    [u[0].conj(), u[1].conj(), u[2].conj(), u[3].conj()]
}

/// `∏_j (bit_j ? i : -i)` for a Y tensor string: `ones` set target bits
/// out of `total`.
#[inline]
pub(crate) fn y_string_factor<T: Real>(ones: N, total: N) -> C<T> {
    i_pow((2 * ones + 3 * total) & 0b11)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::c_zero;

    fn mat_mul(a: &M1<f64>, b: &M1<f64>) -> M1<f64> {
        let mut out = [c_zero(); 4];
        for r in 0..2 {
            for c in 0..2 {
                out[r << 1 | c] = a[r << 1] * b[c] + a[r << 1 | 1] * b[1 << 1 | c];
            }
        }
        out
    }

    fn assert_identity(u: &M1<f64>) {
        let id: M1<f64> = [c_one(), c_zero(), c_zero(), c_one()];
        for (got, want) in u.iter().zip(id.iter()) {
            assert!((got - want).norm() < 1e-12, "{:?}", u);
        }
    }

    #[test]
    fn dense_adjoints_invert() {
        let kinds: Vec<Kind<f64>> = vec![
            Kind::H,
            Kind::SqrtX { adj: false },
            Kind::SqrtY { adj: false },
            Kind::XHalfPi { adj: false },
            Kind::YHalfPi { adj: false },
            Kind::U2 { phi: 0.3, lambda: 1.1 },
            Kind::U3 { theta: 0.5, phi: -0.2, lambda: 2.4 },
        ];
        for kind in kinds {
            let u = kind.dense_1q().unwrap();
            let v = kind.adjoint().dense_1q().unwrap();
            assert_identity(&mat_mul(&v, &u));
        }
    }

    #[test]
    fn sqrt_x_squares_to_x() {
        let u = Kind::<f64>::SqrtX { adj: false }.dense_1q().unwrap();
        let sq = mat_mul(&u, &u);
        assert!((sq[0].norm()) < 1e-12);
        assert!((sq[1] - c_one::<f64>()).norm() < 1e-12);
        assert!((sq[2] - c_one::<f64>()).norm() < 1e-12);
        assert!((sq[3].norm()) < 1e-12);
    }

    #[test]
    fn sqrt_y_squares_to_y() {
        let u = Kind::<f64>::SqrtY { adj: false }.dense_1q().unwrap();
        let sq = mat_mul(&u, &u);
        assert!((sq[1] + c_i::<f64>()).norm() < 1e-12);
        assert!((sq[2] - c_i::<f64>()).norm() < 1e-12);
    }

    #[test]
    fn sqrt_z_factor_cycles() {
        let kind = Kind::<f64>::SqrtZ { adj: false };
        assert_eq!(kind.diag_factor(0), c_one());
        assert_eq!(kind.diag_factor(1), c_i());
        assert_eq!(kind.diag_factor(2), -c_one::<f64>());
        let adj = Kind::<f64>::SqrtZ { adj: true };
        assert_eq!(adj.diag_factor(1), -c_i::<f64>());
    }

    #[test]
    fn y_string_factor_single() {
        assert_eq!(y_string_factor::<f64>(0, 1), -c_i::<f64>());
        assert_eq!(y_string_factor::<f64>(1, 1), c_i());
        // A pair of Y's on |11>: i · i = -1.
        assert_eq!(y_string_factor::<f64>(2, 2), -c_one::<f64>());
    }

    #[test]
    fn u1_matches_phase() {
        let lambda = 0.7;
        let u1 = Kind::<f64>::U1 { lambda };
        let phase = Kind::<f64>::Phase { coeff: phase_from_rad(lambda) };
        assert!((u1.diag_factor(1) - phase.diag_factor(1)).norm() < 1e-15);
    }
}
