#![warn(clippy::cargo)]
#![allow(clippy::comparison_chain)]
#![doc = include_str!("../README.md")]

pub mod math;

pub mod backend;
pub mod comm;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod operator;
pub mod permutation;


#[doc(hidden)]
pub mod prelude {
    pub use crate::{
        backend::{ClusterState, LocalState, StateVector},
        comm::{threads::ThreadComm, Communicator, SoloComm},
        engine::{ClusterEngine, Engine, FinishedPhase, LocalEngine, Outcome},
        error::{Error, Result},
        operator as op,
        operator::{Control, Gate},
        permutation::Permutation,
    };
}
