//! Source direction as seen from the listener's head and ears
//!
//! The head-centre angles drive the ITD lookup and, with parallax
//! correction disabled, both ears. With parallax enabled each ear gets its
//! own direction: the ear position is translated into world space, the
//! vector to the source recomputed from there, and the result projected
//! back onto the sphere the HRTF was measured on.

use resona_core::{Ear, Transform, Vector3};

use crate::hrtf::HrtfService;

/// Sources closer than this to the head centre are treated as being at
/// this distance
pub const MINIMUM_SOURCE_DISTANCE: f32 = 0.0001;

const ELEVATION_SINGULARITY_EPSILON: f32 = 0.0001;

/// Per-ear and head-centre angles of a source relative to a listener
#[derive(Debug, Clone, Copy, Default)]
pub struct RelativePosition {
    pub left_azimuth: f32,
    pub left_elevation: f32,
    pub right_azimuth: f32,
    pub right_elevation: f32,
    pub center_azimuth: f32,
    pub center_elevation: f32,
    pub interaural_azimuth: f32,
    pub distance: f32,
}

impl RelativePosition {
    /// Compute the relative angles. With `parallax_correction` the ear
    /// angles come from per-ear sphere projections; otherwise both ears
    /// share the head-centre angles.
    pub fn calculate(
        source_transform: &Transform,
        listener_transform: &Transform,
        hrtf: &HrtfService,
        parallax_correction: bool,
    ) -> Self {
        let vector_to_source = listener_transform.vector_to(source_transform);
        let distance = vector_to_source.magnitude().max(MINIMUM_SOURCE_DISTANCE);

        let center_elevation = vector_to_source.elevation_degrees();
        let center_azimuth = if at_elevation_singularity(center_elevation) {
            0.0
        } else {
            vector_to_source.azimuth_degrees()
        };

        let mut relative = Self {
            left_azimuth: center_azimuth,
            left_elevation: center_elevation,
            right_azimuth: center_azimuth,
            right_elevation: center_elevation,
            center_azimuth,
            center_elevation,
            interaural_azimuth: vector_to_source.interaural_azimuth_degrees(),
            distance,
        };

        if parallax_correction {
            let measurement_distance = hrtf.measurement_distance();
            for ear in [Ear::Left, Ear::Right] {
                let ear_local = hrtf.ear_local_position(ear);
                let ear_transform = listener_transform.local_translation(ear_local);
                let vector_to_ear = ear_transform.vector_to(source_transform);
                let projected =
                    sphere_projection(vector_to_ear, ear_local, measurement_distance);

                let elevation = projected.elevation_degrees();
                let azimuth = if at_elevation_singularity(elevation) {
                    0.0
                } else {
                    projected.azimuth_degrees()
                };
                match ear {
                    Ear::Left => {
                        relative.left_azimuth = azimuth;
                        relative.left_elevation = elevation;
                    }
                    Ear::Right => {
                        relative.right_azimuth = azimuth;
                        relative.right_elevation = elevation;
                    }
                    Ear::Both => unreachable!(),
                }
            }
        }

        relative
    }

    /// Angles for one ear
    pub fn ear_angles(&self, ear: Ear) -> (f32, f32) {
        match ear {
            Ear::Left => (self.left_azimuth, self.left_elevation),
            Ear::Right => (self.right_azimuth, self.right_elevation),
            Ear::Both => (self.center_azimuth, self.center_elevation),
        }
    }
}

fn at_elevation_singularity(elevation: f32) -> bool {
    (elevation - 90.0).abs() < ELEVATION_SINGULARITY_EPSILON
        || (elevation - 270.0).abs() < ELEVATION_SINGULARITY_EPSILON
}

/// Project the point the ear "sees" onto the measurement sphere: solve
/// for the intersection of the ear-to-source ray with the sphere of the
/// given radius centred on the head.
///
/// With right = -Y under the build convention, the ear sits at
/// (0, ear_local.y, 0) and the ray is `ear + lambda * vector_to_ear`;
/// `lambda` comes from the positive root of the quadratic.
fn sphere_projection(vector_to_ear: Vector3, ear_local: Vector3, radius: f32) -> Vector3 {
    let forward = vector_to_ear.x;
    let right = -vector_to_ear.y;
    let up = vector_to_ear.z;
    if forward == 0.0 && right == 0.0 && up == 0.0 {
        return vector_to_ear;
    }
    let ear_right = -ear_local.y;

    let a = forward * forward + right * right + up * up;
    let b = 2.0 * ear_right * right;
    let c = ear_right * ear_right - radius * radius;
    let discriminant = (b * b - 4.0 * a * c).max(0.0);
    let lambda = (-b + discriminant.sqrt()) * 0.5 / a;

    Vector3::new(
        lambda * forward,
        -(ear_right + lambda * right),
        lambda * up,
    )
}
