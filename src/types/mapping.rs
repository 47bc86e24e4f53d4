//! Raw channel to coil mapping for motion files.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use super::Coil;

/// Order in which Euler angles are applied, about fixed axes.
///
/// `Xyz` rotates about X first, then Y, then Z, so the composed rotation is `Rz * Ry * Rx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EulerOrder {
    #[default]
    Xyz,
    Xzy,
    Yxz,
    Yzx,
    Zxy,
    Zyx,
}

impl EulerOrder {
    /// Quaternion for Euler angles given in degrees about X, Y and Z.
    pub fn to_quaternion(self, degrees: Vector3<f32>) -> UnitQuaternion<f32> {
        let rx = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), degrees.x.to_radians());
        let ry = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), degrees.y.to_radians());
        let rz = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), degrees.z.to_radians());
        // first applied rotation sits rightmost
        match self {
            EulerOrder::Xyz => rz * ry * rx,
            EulerOrder::Xzy => ry * rz * rx,
            EulerOrder::Yxz => rz * rx * ry,
            EulerOrder::Yzx => rx * rz * ry,
            EulerOrder::Zxy => ry * rx * rz,
            EulerOrder::Zyx => rx * ry * rz,
        }
    }

    /// Order implied by a BVH `CHANNELS` list, whose rotation channels are listed outermost
    /// first: `Zrotation Xrotation Yrotation` composes `Rz * Rx * Ry`, which is `Yxz`.
    /// `None` unless exactly three distinct rotation axes are listed.
    pub fn from_bvh_channels<S: AsRef<str>>(labels: &[S]) -> Option<Self> {
        let axes: Vec<char> = labels
            .iter()
            .filter_map(|label| {
                let label = label.as_ref().to_ascii_lowercase();
                let axis = label.strip_suffix("rotation")?.chars().next()?;
                matches!(axis, 'x' | 'y' | 'z').then_some(axis)
            })
            .collect();
        match axes.as_slice() {
            ['z', 'y', 'x'] => Some(EulerOrder::Xyz),
            ['y', 'z', 'x'] => Some(EulerOrder::Xzy),
            ['z', 'x', 'y'] => Some(EulerOrder::Yxz),
            ['x', 'z', 'y'] => Some(EulerOrder::Yzx),
            ['y', 'x', 'z'] => Some(EulerOrder::Zxy),
            ['x', 'y', 'z'] => Some(EulerOrder::Zyx),
            _ => None,
        }
    }
}

/// How the raw values of one sensor encode its orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationChannels {
    /// No orientation data.
    None,
    /// Quaternion components `q0, qx, qy, qz`.
    Quaternion { q0: Option<usize>, qx: Option<usize>, qy: Option<usize>, qz: Option<usize> },
    /// Euler angles in degrees about X, Y and Z.
    Euler { x: Option<usize>, y: Option<usize>, z: Option<usize> },
    /// Azimuth and elevation in degrees, as written by electromagnetic articulographs.
    Elevation { azimuth: usize, elevation: usize },
}

/// Which raw channel index supplies each coil attribute.
///
/// Indices are relative to the values of one sensor. A missing index reads as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMapping {
    pub rotation: RotationChannels,
    pub x: Option<usize>,
    pub y: Option<usize>,
    pub z: Option<usize>,
}

impl ChannelMapping {
    /// Quaternion mapping from indices in `q0, qx, qy, qz, x, y, z` order.
    pub const fn quaternion(indices: [usize; 7]) -> Self {
        let [q0, qx, qy, qz, x, y, z] = indices;
        Self {
            rotation: RotationChannels::Quaternion {
                q0: Some(q0),
                qx: Some(qx),
                qy: Some(qy),
                qz: Some(qz),
            },
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// Euler mapping from indices in `ex, ey, ez, x, y, z` order.
    pub const fn euler(indices: [usize; 6]) -> Self {
        let [ex, ey, ez, x, y, z] = indices;
        Self {
            rotation: RotationChannels::Euler { x: Some(ex), y: Some(ey), z: Some(ez) },
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// NDI Wave export: `id, status, x, y, z, q0, qx, qy, qz` per sensor.
    pub const fn wave_tsv() -> Self {
        Self::quaternion([5, 6, 7, 8, 2, 3, 4])
    }

    /// Files written by [`FrameRecorder`](crate::reader::FrameRecorder):
    /// `name, status, q0, qx, qy, qz, x, y, z` per sensor.
    pub const fn recording() -> Self {
        Self::quaternion([2, 3, 4, 5, 6, 7, 8])
    }

    /// Carstens AG500/AG501 `.pos`: `x, y, z, phi, theta, rms, extra` per channel.
    pub const fn carstens_pos() -> Self {
        Self {
            rotation: RotationChannels::Elevation { azimuth: 3, elevation: 4 },
            x: Some(0),
            y: Some(1),
            z: Some(2),
        }
    }

    /// Build a 6-DOF coil from one sensor's raw values.
    pub fn build_coil(&self, values: &[f32], order: EulerOrder) -> Coil {
        let at = |index: Option<usize>| index.and_then(|i| values.get(i).copied()).unwrap_or(0.0);
        let location = Vector3::new(at(self.x), at(self.y), at(self.z));

        let rotation = match self.rotation {
            RotationChannels::None => Quaternion::identity(),
            RotationChannels::Quaternion { q0, qx, qy, qz } => {
                Quaternion::new(at(q0), at(qx), at(qy), at(qz))
            }
            RotationChannels::Euler { x, y, z } => {
                *order.to_quaternion(Vector3::new(at(x), at(y), at(z))).quaternion()
            }
            RotationChannels::Elevation { azimuth, elevation } => {
                let angles = Vector3::new(at(Some(elevation)), 0.0, at(Some(azimuth)));
                *order.to_quaternion(angles).quaternion()
            }
        };
        Coil::new_6d(location, rotation, 0)
    }

    /// Every index this mapping reads, for validation.
    pub fn indices(&self) -> Vec<usize> {
        let rotation = match self.rotation {
            RotationChannels::None => vec![],
            RotationChannels::Quaternion { q0, qx, qy, qz } => vec![q0, qx, qy, qz],
            RotationChannels::Euler { x, y, z } => vec![x, y, z],
            RotationChannels::Elevation { azimuth, elevation } => {
                vec![Some(azimuth), Some(elevation)]
            }
        };
        rotation.into_iter().chain([self.x, self.y, self.z]).flatten().collect()
    }
}

/// Numeric value of a text field, 0 when it does not parse.
pub(crate) fn value_or_zero(field: &str) -> f32 {
    field.trim().parse::<f32>().unwrap_or(0.0)
}
