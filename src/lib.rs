//! Junction Priority Library
//!
//! Road-topology cache and junction right-of-way arbitration for a traffic
//! simulation host, with a standalone reference host for headless runs.

pub mod simulation;
