//! Local coordinate systems built from three sensor positions.

use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Relative tolerance below which input points count as coincident or collinear.
const DEGENERATE: f64 = 1e-9;

/// Orthonormal frame: an origin plus three unit axes, all in global coordinates.
///
/// x points from the left to the right point, z is normal to the plane through the three
/// points, y completes a right-handed system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateFrame {
    pub origin: Vector3<f64>,
    pub x_axis: Vector3<f64>,
    pub y_axis: Vector3<f64>,
    pub z_axis: Vector3<f64>,
}

impl CoordinateFrame {
    /// Frame through `left`, `right` and `front`, with its origin midway between left and right.
    pub fn from_points(
        left: Vector3<f64>,
        right: Vector3<f64>,
        front: Vector3<f64>,
    ) -> Result<Self> {
        if [left, right, front].iter().any(|p| p.iter().any(|c| !c.is_finite())) {
            return Err(RelayError::calibration("non-finite calibration point"));
        }
        let across = right - left;
        let midpoint = (left + right) / 2.0;
        let forward = front - midpoint;

        if across.norm() <= DEGENERATE * forward.norm().max(1.0) {
            return Err(RelayError::calibration("left and right points coincide"));
        }
        let normal = across.cross(&forward);
        if normal.norm() <= DEGENERATE * across.norm() * forward.norm().max(1.0) {
            return Err(RelayError::calibration("the three points are collinear"));
        }

        let x_axis = across.normalize();
        let z_axis = normal.normalize();
        let y_axis = z_axis.cross(&x_axis).normalize();
        Ok(Self { origin: midpoint, x_axis, y_axis, z_axis })
    }

    /// Frame for head reference sensors: same axes, origin at the centroid of the three points.
    pub fn reference(
        left: Vector3<f64>,
        right: Vector3<f64>,
        front: Vector3<f64>,
    ) -> Result<Self> {
        let mut frame = Self::from_points(left, right, front)?;
        frame.set_origin((left + right + front) / 3.0);
        Ok(frame)
    }

    pub fn set_origin(&mut self, origin: Vector3<f64>) {
        self.origin = origin;
    }

    /// Rows are the axes, so this rotates global offsets into local coordinates.
    fn rotation(&self) -> Matrix3<f64> {
        Matrix3::from_rows(&[
            self.x_axis.transpose(),
            self.y_axis.transpose(),
            self.z_axis.transpose(),
        ])
    }

    /// Global point expressed in this frame.
    pub fn to_local(&self, point: &Vector3<f64>) -> Vector3<f64> {
        let shifted = point - self.origin;
        Vector3::new(shifted.dot(&self.x_axis), shifted.dot(&self.y_axis), shifted.dot(&self.z_axis))
    }

    /// Inverse of [`to_local`](Self::to_local).
    pub fn to_global(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.origin + self.x_axis * local.x + self.y_axis * local.y + self.z_axis * local.z
    }

    /// Homogeneous global-to-local transform: translate by `-origin`, then rotate.
    pub fn global_to_local(&self) -> Matrix4<f64> {
        let rotation = self.rotation();
        let mut m = rotation.to_homogeneous();
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&(-(rotation * self.origin)));
        m
    }

    /// Homogeneous local-to-global transform.
    pub fn local_to_global(&self) -> Matrix4<f64> {
        let mut m = self.rotation().transpose().to_homogeneous();
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.origin);
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn v(x: f64, y: f64, z: f64) -> Vector3<f64> {
        Vector3::new(x, y, z)
    }

    #[test]
    fn axis_aligned_points_give_identity_axes() -> anyhow::Result<()> {
        let frame = CoordinateFrame::from_points(v(-1.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(0.0, 1.0, 0.0))?;
        assert_relative_eq!(frame.x_axis, Vector3::x());
        assert_relative_eq!(frame.y_axis, Vector3::y());
        assert_relative_eq!(frame.z_axis, Vector3::z());
        assert_relative_eq!(frame.origin, Vector3::zeros());
        assert_relative_eq!(frame.to_local(&v(0.0, 2.0, 3.0)), v(0.0, 2.0, 3.0));
        Ok(())
    }

    #[test]
    fn reference_origin_is_centroid() -> anyhow::Result<()> {
        let frame = CoordinateFrame::reference(v(0.0, 0.0, 0.0), v(3.0, 0.0, 0.0), v(0.0, 3.0, 0.0))?;
        assert_relative_eq!(frame.origin, v(1.0, 1.0, 0.0));
        Ok(())
    }

    #[test]
    fn degenerate_points_are_rejected() {
        let p = v(1.0, 2.0, 3.0);
        assert!(matches!(
            CoordinateFrame::from_points(p, p, v(0.0, 0.0, 0.0)),
            Err(RelayError::Calibration { .. })
        ));
        assert!(matches!(
            CoordinateFrame::from_points(v(0.0, 0.0, 0.0), v(1.0, 0.0, 0.0), v(5.0, 0.0, 0.0)),
            Err(RelayError::Calibration { .. })
        ));
        assert!(CoordinateFrame::from_points(v(f64::NAN, 0.0, 0.0), p, p).is_err());
    }

    #[test]
    fn matrices_agree_with_projection() -> anyhow::Result<()> {
        let mut frame =
            CoordinateFrame::from_points(v(3.7, -79.7, -222.9), v(-36.9, 32.4, -166.2), v(-55.7, 22.7, -168.1))?;
        frame.set_origin(v(10.0, -20.0, 5.0));
        let p = v(1.0, 2.0, 3.0);

        let local = frame.global_to_local() * p.push(1.0);
        assert_relative_eq!(local.xyz(), frame.to_local(&p), epsilon = 1e-9);
        let back = frame.local_to_global() * local;
        assert_relative_eq!(back.xyz(), p, epsilon = 1e-9);
        assert_relative_eq!(
            frame.global_to_local() * frame.local_to_global(),
            Matrix4::identity(),
            epsilon = 1e-9
        );
        Ok(())
    }

    fn point() -> impl Strategy<Value = Vector3<f64>> {
        (-500.0..500.0f64, -500.0..500.0f64, -500.0..500.0f64).prop_map(|(x, y, z)| v(x, y, z))
    }

    proptest! {
        #[test]
        fn projection_round_trips(left in point(), right in point(), front in point(), p in point()) {
            let frame = CoordinateFrame::from_points(left, right, front);
            prop_assume!(frame.is_ok());
            let frame = frame.map_err(|e| TestCaseError::fail(e.to_string()))?;

            let back = frame.to_global(&frame.to_local(&p));
            prop_assert!((back - p).norm() <= 1e-7 * (1.0 + p.norm()), "{back} vs {p}");

            prop_assert!((frame.x_axis.dot(&frame.y_axis)).abs() < 1e-9);
            prop_assert!((frame.y_axis.dot(&frame.z_axis)).abs() < 1e-9);
            prop_assert!((frame.z_axis.norm() - 1.0).abs() < 1e-9);
        }
    }
}
