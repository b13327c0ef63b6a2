//! Testing utilities for crabfocus
//!
//! A simulated camera for end-to-end runs without hardware, and scripted
//! collaborators for driving the sweep with a known sharpness landscape.

pub mod mock;
pub mod simulated;

pub use mock::{DeadFrameSource, LandscapeProbe, MockLens, StillFrameSource};
pub use simulated::{SimulatedCamera, SimulatedScene};
