//! Core types for articulography data.
//!
//! These are the format-agnostic records every other module speaks:
//!
//! - [`Coil`] is one sensor reading: location, optional orientation, quality figures and
//!   the head/biteplate corrected locations once correction has run.
//! - [`Component`] groups the coils of one kind (3-DOF, 6-DOF) sampled at one instant;
//!   analog, force and event components are carried opaquely.
//! - [`DataFrame`] is one snapshot of all components, and knows how to average a window.
//! - [`ChannelMapping`] says which raw channel of a motion file feeds which coil attribute.
//! - [`SmoothingWindow`] is the bounded recent-frame history behind streamed replies.
//! - [`SessionState`] tracks `Ready`/`Streaming`/`Eof` for one stream.
//!
//! ```rust
//! use emarelay::types::{Coil, DataFrame};
//! use nalgebra::{UnitQuaternion, Vector3};
//!
//! let q = UnitQuaternion::from_euler_angles(0.1_f32, 0.2, 0.3);
//! let a = DataFrame::six_dof(0, 0, vec![Coil::new_6d(Vector3::new(1.0, 0.0, 0.0), *q.quaternion(), 0)]);
//! let b = DataFrame::six_dof(1, 5000, vec![Coil::new_6d(Vector3::new(3.0, 0.0, 0.0), *q.quaternion(), 0)]);
//!
//! let mean = DataFrame::average([&a, &b]).unwrap();
//! assert_eq!(mean.timestamp_micros(), Some(5000));
//! assert_eq!(mean.coil(0).unwrap().location.x, 2.0);
//! ```

mod coil;
mod frame;
mod mapping;
mod session;
mod window;

pub use coil::Coil;
pub use frame::{Component, ComponentKind, DataFrame, average_rotations};
pub use mapping::{ChannelMapping, EulerOrder, RotationChannels};
pub(crate) use mapping::value_or_zero;
pub use session::{SessionState, StreamStatus};
pub use window::{Smoothing, SmoothingWindow};
