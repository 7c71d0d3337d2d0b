//! Deferred-gate buffer for cache-resident replay.
//!
//! While a fusion scope is open, gates on the fused qubit set are only
//! recorded, remapped so that their targets and controls name slots of
//! the fused sub-vector. `end_fusion` hands the whole list to the backend,
//! which replays it once per fixed bit pattern of the remaining qubits.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::math::{N, Real};
use crate::operator::{Control, Gate};

/// Upper bound on the fused qubit set; `2^MAX_FUSED_QUBITS` amplitudes
/// must fit in cache for the replay to pay off. One less than the
/// on-cache qubit count the kernels are tuned for.
pub const MAX_FUSED_QUBITS: N = 10;

pub(crate) struct FusionBuffer<T: Real> {
    qubits: Vec<N>,
    slot_of: HashMap<N, N>,
    gates: Vec<Gate<T>>,
}

impl<T: Real> FusionBuffer<T> {
    pub fn open(qubits: &[N]) -> Result<Self> {
        if qubits.len() > MAX_FUSED_QUBITS {
            return Err(Error::UnsupportedFusedGate {
                name: format!("fusion over {} qubits", qubits.len()),
            });
        }

        let mut slot_of = HashMap::with_capacity(qubits.len());
        for (slot, &q) in qubits.iter().enumerate() {
            if slot_of.insert(q, slot).is_some() {
                return Err(Error::DuplicateQubit { qubit: q });
            }
        }

        Ok(Self {
            qubits: qubits.to_vec(),
            slot_of,
            gates: Vec::new(),
        })
    }

    /// Defer one gate, rewritten into slot space.
    pub fn push(&mut self, gate: &Gate<T>) -> Result {
        let slot = |q: N| -> Result<N> {
            self.slot_of
                .get(&q)
                .copied()
                .ok_or_else(|| Error::UnsupportedFusedGate { name: gate.name() })
        };

        let targets = gate
            .targets()
            .iter()
            .map(|&q| slot(q))
            .collect::<Result<Vec<_>>>()?;
        let controls = gate
            .controls()
            .iter()
            .map(|c| {
                Ok(Control {
                    qubit: slot(c.qubit)?,
                    value: c.value,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.gates.push(Gate {
            kind: *gate.kind(),
            targets,
            controls,
        });
        Ok(())
    }

    pub fn qubits(&self) -> &[N] {
        &self.qubits
    }

    pub fn gates(&self) -> &[Gate<T>] {
        &self.gates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator as op;

    #[test]
    fn remaps_to_slots() {
        let mut buffer = FusionBuffer::<f64>::open(&[5, 2, 7]).unwrap();
        buffer.push(&op::h(2)).unwrap();
        buffer.push(&op::cnot(7, 5)).unwrap();

        assert_eq!(buffer.gates()[0].targets(), &[1]);
        assert_eq!(buffer.gates()[1].targets(), &[2]);
        assert_eq!(buffer.gates()[1].controls()[0].qubit, 0);
    }

    #[test]
    fn rejects_outside_qubits() {
        let mut buffer = FusionBuffer::<f64>::open(&[0, 1]).unwrap();
        assert_eq!(
            buffer.push(&op::x(3)),
            Err(Error::UnsupportedFusedGate {
                name: "X3".to_string()
            })
        );
    }

    #[test]
    fn rejects_oversized_scope() {
        let qubits: Vec<N> = (0..=MAX_FUSED_QUBITS).collect();
        assert!(matches!(
            FusionBuffer::<f64>::open(&qubits),
            Err(Error::UnsupportedFusedGate { .. })
        ));
    }
}
