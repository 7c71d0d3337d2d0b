//! In-process process grid backed by channels.
//!
//! Each participant runs on its own OS thread and talks to its peers
//! through per-pair FIFO channels plus one shared reduction slot. The
//! collective call sequence is identical on every rank (the engine is
//! SPMD), so per-pair FIFO ordering is enough to keep messages matched.

use std::sync::{
    mpsc::{channel, Receiver, Sender},
    Arc, Condvar, Mutex,
};

use super::Communicator;
use crate::math::{C, N, Real};

enum Payload<T: Real> {
    Amps(Vec<C<T>>),
    Reals(Vec<T>),
    Indices(Vec<u64>),
}

struct ReduceState<T: Real> {
    acc: Vec<T>,
    acc_indices: Vec<u64>,
    result: Vec<T>,
    result_indices: Vec<u64>,
    joined: N,
    generation: u64,
}

struct ReduceSlot<T: Real> {
    state: Mutex<ReduceState<T>>,
    all_joined: Condvar,
}

/// One participant of an in-process grid; create the whole grid with
/// [`ThreadComm::grid`] and move each instance into its own thread.
pub struct ThreadComm<T: Real> {
    rank: N,
    size: N,
    senders: Vec<Sender<Payload<T>>>,
    receivers: Vec<Receiver<Payload<T>>>,
    reduce: Arc<ReduceSlot<T>>,
}

impl<T: Real> ThreadComm<T> {
    /// Build a grid of `size` connected communicators.
    pub fn grid(size: N) -> Vec<ThreadComm<T>> {
        assert!(size.is_power_of_two(), "process count must be a power of two");

        // senders[src][dst] transmits on the (src → dst) channel;
        // receivers[dst][src] is the matching end.
        let mut senders: Vec<Vec<Sender<Payload<T>>>> = (0..size).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Receiver<Payload<T>>>> =
            (0..size).map(|_| Vec::new()).collect();
        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = channel();
                senders[src].push(tx);
                receivers[dst].push(rx);
            }
        }

        let reduce = Arc::new(ReduceSlot {
            state: Mutex::new(ReduceState {
                acc: Vec::new(),
                acc_indices: Vec::new(),
                result: Vec::new(),
                result_indices: Vec::new(),
                joined: 0,
                generation: 0,
            }),
            all_joined: Condvar::new(),
        });

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ThreadComm {
                rank,
                size,
                senders,
                receivers,
                reduce: Arc::clone(&reduce),
            })
            .collect()
    }

    fn recv_from(&mut self, src: N) -> Payload<T> {
        self.receivers[src].recv().expect("peer hung up mid-collective")
    }
}

impl<T: Real> Communicator<T> for ThreadComm<T> {
    fn rank(&self) -> N {
        self.rank
    }

    fn size(&self) -> N {
        self.size
    }

    fn allreduce_sum(&mut self, values: &mut [T]) {
        let mut state = self.reduce.state.lock().unwrap();
        if state.joined == 0 {
            state.acc = values.to_vec();
        } else {
            for (acc, v) in state.acc.iter_mut().zip(values.iter()) {
                *acc += *v;
            }
        }
        state.joined += 1;

        if state.joined == self.size {
            state.result = std::mem::take(&mut state.acc);
            state.joined = 0;
            state.generation += 1;
            self.reduce.all_joined.notify_all();
        } else {
            let generation = state.generation;
            while state.generation == generation {
                state = self.reduce.all_joined.wait(state).unwrap();
            }
        }
        values.copy_from_slice(&state.result);
    }

    fn allreduce_sum_indices(&mut self, values: &mut [u64]) {
        let mut state = self.reduce.state.lock().unwrap();
        if state.joined == 0 {
            state.acc_indices = values.to_vec();
        } else {
            for (acc, v) in state.acc_indices.iter_mut().zip(values.iter()) {
                *acc += *v;
            }
        }
        state.joined += 1;

        if state.joined == self.size {
            state.result_indices = std::mem::take(&mut state.acc_indices);
            state.joined = 0;
            state.generation += 1;
            self.reduce.all_joined.notify_all();
        } else {
            let generation = state.generation;
            while state.generation == generation {
                state = self.reduce.all_joined.wait(state).unwrap();
            }
        }
        values.copy_from_slice(&state.result_indices);
    }

    fn broadcast(&mut self, values: &mut [T], root: N) {
        if self.rank == root {
            for dst in 0..self.size {
                if dst != root {
                    self.senders[dst]
                        .send(Payload::Reals(values.to_vec()))
                        .expect("peer hung up mid-collective");
                }
            }
        } else {
            match self.recv_from(root) {
                Payload::Reals(data) => values.copy_from_slice(&data),
                _ => unreachable!("collective sequence out of step"),
            }
        }
    }

    fn broadcast_indices(&mut self, values: &mut [u64], root: N) {
        if self.rank == root {
            for dst in 0..self.size {
                if dst != root {
                    self.senders[dst]
                        .send(Payload::Indices(values.to_vec()))
                        .expect("peer hung up mid-collective");
                }
            }
        } else {
            match self.recv_from(root) {
                Payload::Indices(data) => values.copy_from_slice(&data),
                _ => unreachable!("collective sequence out of step"),
            }
        }
    }

    fn sendrecv(&mut self, peer: N, outgoing: &[C<T>], incoming: &mut [C<T>]) {
        debug_assert!(peer != self.rank && peer < self.size);
        self.senders[peer]
            .send(Payload::Amps(outgoing.to_vec()))
            .expect("peer hung up mid-collective");
        match self.recv_from(peer) {
            Payload::Amps(data) => incoming.copy_from_slice(&data),
            _ => unreachable!("collective sequence out of step"),
        }
    }
}
