//! Single sensor reading.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// One tracked coil at one instant.
///
/// `rotation` is kept exactly as received (`w, i, j, k` = `q0, qx, qy, qz`) so a decoded
/// frame re-encodes to the same bytes; use [`Coil::unit_rotation`] for arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub struct Coil {
    /// Location in the measurement device's global space.
    pub location: Vector3<f32>,

    /// Orientation, present only for 6-DOF components.
    pub rotation: Option<Quaternion<f32>>,

    /// Error word reported by 6-DOF devices.
    pub error: u32,

    /// Reliability word reported by 3-DOF devices.
    pub reliability: u32,

    /// Location relative to the head reference sensors, set by head correction.
    pub ref_location: Option<Vector3<f32>>,

    /// Location in biteplate space, set by head correction.
    pub corrected_location: Option<Vector3<f32>>,
}

impl Coil {
    /// 3-DOF reading.
    pub fn new_3d(location: Vector3<f32>, reliability: u32) -> Self {
        Self {
            location,
            rotation: None,
            error: 0,
            reliability,
            ref_location: None,
            corrected_location: None,
        }
    }

    /// 6-DOF reading.
    pub fn new_6d(location: Vector3<f32>, rotation: Quaternion<f32>, error: u32) -> Self {
        Self {
            location,
            rotation: Some(rotation),
            error,
            reliability: 0,
            ref_location: None,
            corrected_location: None,
        }
    }

    /// Normalized orientation, `None` for 3-DOF readings or degenerate quaternions.
    pub fn unit_rotation(&self) -> Option<UnitQuaternion<f32>> {
        let q = self.rotation?;
        let norm = q.norm();
        if !norm.is_finite() || norm <= f32::EPSILON {
            return None;
        }
        Some(UnitQuaternion::from_quaternion(q))
    }

    /// Whether the location holds usable numbers (devices send NaN for missing sensors).
    pub fn is_finite(&self) -> bool {
        self.location.iter().all(|v| v.is_finite())
    }

    /// The most processed location available: biteplate corrected, head corrected, raw.
    pub fn best_location(&self) -> Vector3<f32> {
        self.corrected_location.or(self.ref_location).unwrap_or(self.location)
    }
}
