//! 2-D acoustic wave propagation on a fixed rectangular grid.
//!
//! A leapfrog finite-difference kernel advances the displacement field driven
//! by one or more sinusoidal point sources, with a multiplicative damping band
//! and 2-point edge smoothing to suppress boundary reflections. Frequency,
//! phase and the active source set can be changed between steps through a
//! shared [`simulation::Controls`] handle; everything else is fixed when the
//! simulation is built.

pub mod config;
pub mod grid;
pub mod simulation;
pub mod sources;
pub mod visualisation;
pub mod wavefield;
