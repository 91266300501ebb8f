//! UI module - Terminal rendering for the `thaw` binary

pub mod cli;
