//! Batch document processing against a remote service.
//!
//! A selected directory becomes a folder/file tree, the tree is flattened
//! into an ordered work list, and each file is pushed through the remote
//! service one at a time while a ledger records per-file outcomes. Two-phase
//! workflows can wait on a polled server-side condition between phases.

pub mod cli;
pub mod config;
pub mod gate;
pub mod ledger;
pub mod remote;
pub mod render;
pub mod runner;
pub mod selection;
pub mod state;
pub mod state_machine;
pub mod structured_logger;
pub mod tree;
pub mod workflow;
