//! Head and biteplate coordinate correction.
//!
//! Calibration records a still window with the biteplate in place, averages it robustly and
//! builds two [`CoordinateFrame`]s: one from three head reference sensors in global space,
//! one from the three biteplate sensors in that reference space. At run time
//! [`HeadCorrector::correct`] rebuilds the reference frame from each incoming frame, which
//! cancels head movement, and then expresses every coil in biteplate coordinates.
//!
//! ```rust
//! use emarelay::calibration::CoordinateFrame;
//! use nalgebra::Vector3;
//!
//! let frame = CoordinateFrame::from_points(
//!     Vector3::new(-1.0, 0.0, 0.0),
//!     Vector3::new(1.0, 0.0, 0.0),
//!     Vector3::new(0.0, 1.0, 0.0),
//! ).unwrap();
//! let p = Vector3::new(0.5, 2.0, -1.0);
//! assert!((frame.to_global(&frame.to_local(&p)) - p).norm() < 1e-12);
//! ```

mod frame;
mod head;
pub mod outliers;
mod roles;

pub use frame::CoordinateFrame;
pub use head::{CameraTransform, HeadCorrector};
pub use roles::{SensorRole, SensorRoles};
