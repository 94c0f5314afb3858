//! resona-core: Shared types and utilities for the Resona binaural renderer
//!
//! This crate provides the foundational types used across all Resona crates:
//! - `SampleBuffer` - fixed-length audio block with in-place gain and mixing
//! - `Vector3` / `Quaternion` / `Transform` - rigid-body math with the
//!   angular queries the spatialization pipeline needs
//! - `Orientation` - quantized (azimuth, elevation) table key
//! - `GlobalConfig` - sample rate, block size and acoustic constants,
//!   threaded explicitly into every service and processor
//! - Error kinds and the process-wide last-error recorder

mod buffer;
mod config;
mod error;
mod math;
mod orientation;

pub use buffer::*;
pub use config::*;
pub use error::*;
pub use math::*;
pub use orientation::*;

use serde::{Deserialize, Serialize};

/// Ear selector used throughout the HRTF and spatialization services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ear {
    Left,
    Right,
    Both,
}

/// A left/right pair of anything ear-related
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EarPair<T> {
    pub left: T,
    pub right: T,
}

impl<T> EarPair<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    /// Get a reference for one ear. `Ear::Both` is not a valid selector here.
    pub fn get(&self, ear: Ear) -> &T {
        match ear {
            Ear::Left => &self.left,
            Ear::Right => &self.right,
            Ear::Both => panic!("EarPair::get requires a single ear"),
        }
    }

    pub fn get_mut(&mut self, ear: Ear) -> &mut T {
        match ear {
            Ear::Left => &mut self.left,
            Ear::Right => &mut self.right,
            Ear::Both => panic!("EarPair::get_mut requires a single ear"),
        }
    }
}
