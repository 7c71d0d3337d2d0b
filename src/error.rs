use std::fmt;

use crate::math::N;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A single gate operates on more qubits than any kernel accepts.
    TooManyOperatedQubits { num: N, max: N },
    /// A gate cannot be deferred into the open fusion scope, or the fused
    /// qubit set itself is too large.
    UnsupportedFusedGate { name: String },
    /// The two permutation arrays disagree.
    PermutationInconsistency,
    /// Qubit index out of range.
    InvalidQubit { qubit: N, num_qubits: N },
    /// The same qubit appears twice among one gate's targets and controls.
    DuplicateQubit { qubit: N },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TooManyOperatedQubits { num, max } => {
                write!(f, "gate operates on {} qubits, at most {} supported", num, max)
            }
            Error::UnsupportedFusedGate { name } => {
                write!(f, "gate {} cannot be applied inside the open fusion scope", name)
            }
            Error::PermutationInconsistency => {
                write!(f, "qubit permutation arrays are inconsistent")
            }
            Error::InvalidQubit { qubit, num_qubits } => {
                write!(f, "qubit {} out of range for a {}-qubit state", qubit, num_qubits)
            }
            Error::DuplicateQubit { qubit } => {
                write!(f, "qubit {} appears more than once in a single gate", qubit)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T = ()> = std::result::Result<T, Error>;
