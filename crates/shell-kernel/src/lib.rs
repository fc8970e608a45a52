//! Shell layout engine for keyboard cases.
//!
//! Given key positions, this crate computes the point scaffolding of a case:
//! the web mesh joining the key sockets, the wall ring around them and the
//! positions of screw inserts and the microcontroller holder. Turning the
//! scaffolding into a solid is left to a modeling kernel.

pub mod attachment;
pub mod config;
pub mod error;
pub mod floor;
pub mod footprint;
pub mod geometry;
pub mod hull;
pub mod pipeline;
pub mod triangulation;
pub mod validation;
pub mod wall;
pub mod web;

pub use config::{ShellConfig, ShellMode};
pub use error::{AttachmentKind, PipelineError, ShellError, ShellResult, Stage};
pub use footprint::{Key, KeyKind, KeyPoint};
pub use geometry::{Frame, Vec2, Vec3};
pub use pipeline::{ShellLayout, ShellPipeline};
pub use wall::{WallCrossSection, WallSynthesizer};

use serde::{Deserialize, Serialize};

/// Global tolerance configuration for geometric comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Points closer than this are considered coincident (mm).
    pub coincidence: f64,
    /// Angles smaller than this (radians) are considered zero.
    pub angular: f64,
    /// Allowed deviation when checking wall thickness (mm).
    pub thickness: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            coincidence: 1e-7,
            angular: 1e-10,
            thickness: 1e-3,
        }
    }
}

impl Tolerance {
    pub fn points_coincident(&self, a: &Vec3, b: &Vec3) -> bool {
        a.distance_to(b) < self.coincidence
    }

    pub fn is_zero_length(&self, length: f64) -> bool {
        length.abs() < self.coincidence
    }

    pub fn is_zero_angle(&self, angle: f64) -> bool {
        angle.abs() < self.angular
    }
}
