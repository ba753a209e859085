//! Core parameter tree, adaptors, executors, algorithm loop, and observer
//! chain for parallel metaheuristic optimization (spec §1).
//!
//! `crates/cli` is the thin binary shell; everything an optimization run
//! actually does lives here so it can be driven from a library consumer
//! without a subprocess in the loop.

pub mod activity;
pub mod adaptor;
pub mod algorithm;
pub mod error;
pub mod executor;
pub mod grammar;
pub mod individual;
pub mod observer;
pub mod personality;
pub mod rng;
pub mod scan;
pub mod tree;
