//! Data frames and their components.

use bytes::Bytes;
use nalgebra::{UnitQuaternion, Vector3};

use super::Coil;

/// Kind of a data-frame component, with its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    ThreeD,
    Analog,
    Force,
    SixD,
    Event,
}

impl ComponentKind {
    /// Wire code of this component kind.
    pub const fn code(self) -> u32 {
        match self {
            ComponentKind::ThreeD => 1,
            ComponentKind::Analog => 2,
            ComponentKind::Force => 3,
            ComponentKind::SixD => 4,
            ComponentKind::Event => 5,
        }
    }

    /// Component kind for a wire code.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ComponentKind::ThreeD),
            2 => Some(ComponentKind::Analog),
            3 => Some(ComponentKind::Force),
            4 => Some(ComponentKind::SixD),
            5 => Some(ComponentKind::Event),
            _ => None,
        }
    }

    /// Size of one coil record, `None` for kinds whose payload is carried opaquely.
    pub const fn coil_record_len(self) -> Option<usize> {
        match self {
            ComponentKind::ThreeD => Some(16),
            ComponentKind::SixD => Some(32),
            ComponentKind::Analog | ComponentKind::Force | ComponentKind::Event => None,
        }
    }

    pub const fn carries_coils(self) -> bool {
        self.coil_record_len().is_some()
    }
}

/// One component of a data frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub kind: ComponentKind,
    pub frame_number: u32,
    pub timestamp_micros: u64,
    /// Sensor readings for 3D and 6D components.
    pub coils: Vec<Coil>,
    /// Raw payload of analog, force and event components.
    pub payload: Bytes,
}

impl Component {
    /// Component holding sensor readings.
    pub fn with_coils(
        kind: ComponentKind,
        frame_number: u32,
        timestamp_micros: u64,
        coils: Vec<Coil>,
    ) -> Self {
        Self { kind, frame_number, timestamp_micros, coils, payload: Bytes::new() }
    }

    /// Component whose payload is not interpreted.
    pub fn opaque(
        kind: ComponentKind,
        frame_number: u32,
        timestamp_micros: u64,
        payload: Bytes,
    ) -> Self {
        Self { kind, frame_number, timestamp_micros, coils: Vec::new(), payload }
    }
}

/// One time-stamped snapshot of all sensors, grouped into components.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataFrame {
    pub components: Vec<Component>,
}

impl DataFrame {
    pub fn new(components: Vec<Component>) -> Self {
        Self { components }
    }

    /// Frame holding one 6-DOF component, the shape motion-file parsers produce.
    pub fn six_dof(frame_number: u32, timestamp_micros: u64, coils: Vec<Coil>) -> Self {
        Self::new(vec![Component::with_coils(
            ComponentKind::SixD,
            frame_number,
            timestamp_micros,
            coils,
        )])
    }

    /// Timestamp of the first component.
    pub fn timestamp_micros(&self) -> Option<u64> {
        self.components.first().map(|c| c.timestamp_micros)
    }

    /// Frame number of the first component.
    pub fn frame_number(&self) -> Option<u32> {
        self.components.first().map(|c| c.frame_number)
    }

    /// All coils of all coil-bearing components, in wire order.
    pub fn coils(&self) -> impl Iterator<Item = &Coil> {
        self.components.iter().filter(|c| c.kind.carries_coils()).flat_map(|c| c.coils.iter())
    }

    pub fn coils_mut(&mut self) -> impl Iterator<Item = &mut Coil> {
        self.components
            .iter_mut()
            .filter(|c| c.kind.carries_coils())
            .flat_map(|c| c.coils.iter_mut())
    }

    /// Coil by its index in [`DataFrame::coils`] order.
    pub fn coil(&self, index: usize) -> Option<&Coil> {
        self.coils().nth(index)
    }

    pub fn coil_count(&self) -> usize {
        self.coils().count()
    }

    /// Average a window of frames into one representative frame.
    ///
    /// Locations, errors and reliabilities are arithmetic means; rotations use the
    /// exponential-map mean of [`average_rotations`]. The newest (last) frame supplies the
    /// structure, frame number and timestamp. Samples with non-finite locations are skipped.
    /// Returns `None` for an empty window.
    pub fn average<'a, I>(frames: I) -> Option<DataFrame>
    where
        I: IntoIterator<Item = &'a DataFrame>,
    {
        let frames: Vec<&DataFrame> = frames.into_iter().collect();
        let newest = *frames.last()?;
        let mut averaged = newest.clone();

        for (ci, component) in averaged.components.iter_mut().enumerate() {
            if !component.kind.carries_coils() {
                continue;
            }
            let kind = component.kind;
            for (k, coil) in component.coils.iter_mut().enumerate() {
                let samples: Vec<&Coil> = frames
                    .iter()
                    .filter_map(|f| f.components.get(ci))
                    .filter(|c| c.kind == kind)
                    .filter_map(|c| c.coils.get(k))
                    .filter(|c| c.is_finite())
                    .collect();
                if let Some(mean) = average_coils(&samples) {
                    *coil = mean;
                }
            }
        }
        Some(averaged)
    }
}

fn average_coils(samples: &[&Coil]) -> Option<Coil> {
    let first = samples.first()?;
    let n = samples.len() as f32;

    let location = samples.iter().fold(Vector3::zeros(), |acc, c| acc + c.location) / n;
    let error = mean_word(samples.iter().map(|c| c.error));
    let reliability = mean_word(samples.iter().map(|c| c.reliability));
    let rotation = if first.rotation.is_some() {
        average_rotations(samples.iter().filter_map(|c| c.unit_rotation()))
            .map(|q| *q.quaternion())
            .or(first.rotation)
    } else {
        None
    };

    Some(Coil { location, rotation, error, reliability, ref_location: None, corrected_location: None })
}

/// Rounded mean of the integer trailer words.
fn mean_word(words: impl ExactSizeIterator<Item = u32>) -> u32 {
    let n = words.len() as u64;
    if n == 0 {
        return 0;
    }
    let sum: u64 = words.map(u64::from).sum();
    u32::try_from((sum + n / 2) / n).unwrap_or(u32::MAX)
}

/// Mean rotation through the exponential map.
///
/// Each rotation is mapped to its scaled axis (axis times angle, which is the same for `q`
/// and `-q`), the vectors are averaged and mapped back. Unlike a per-component mean this does
/// not depend on the sign or the frame the quaternions are expressed in.
pub fn average_rotations<I>(rotations: I) -> Option<UnitQuaternion<f32>>
where
    I: IntoIterator<Item = UnitQuaternion<f32>>,
{
    let mut sum = Vector3::zeros();
    let mut count = 0usize;
    for rotation in rotations {
        let scaled = rotation.scaled_axis();
        if scaled.iter().all(|v| v.is_finite()) {
            sum += scaled;
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some(UnitQuaternion::from_scaled_axis(sum / count as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Quaternion;

    fn coil_at(x: f32, rotation: UnitQuaternion<f32>) -> Coil {
        Coil::new_6d(Vector3::new(x, 2.0 * x, -x), *rotation.quaternion(), 5)
    }

    #[test]
    fn component_codes_round_trip() {
        for code in 1..=5 {
            let kind = ComponentKind::from_code(code).expect("known code");
            assert_eq!(kind.code(), code);
        }
        assert!(ComponentKind::from_code(0).is_none());
        assert!(ComponentKind::from_code(6).is_none());
    }

    #[test]
    fn average_of_empty_window_is_none() {
        assert!(DataFrame::average(std::iter::empty()).is_none());
    }

    #[test]
    fn average_takes_mean_location_and_newest_timestamp() {
        let identity = UnitQuaternion::identity();
        let a = DataFrame::six_dof(1, 1000, vec![coil_at(1.0, identity)]);
        let b = DataFrame::six_dof(2, 2000, vec![coil_at(3.0, identity)]);

        let mean = DataFrame::average([&a, &b]).expect("non-empty window");
        assert_eq!(mean.timestamp_micros(), Some(2000));
        assert_eq!(mean.frame_number(), Some(2));
        let coil = mean.coil(0).expect("one coil");
        assert_eq!(coil.location, Vector3::new(2.0, 4.0, -2.0));
        assert_eq!(coil.error, 5);
    }

    #[test]
    fn trailer_words_average_to_the_rounded_mean() {
        assert_eq!(mean_word([1u32, 2].into_iter()), 2);
        assert_eq!(mean_word([4u32, 4, 5].into_iter()), 4);
        assert_eq!(mean_word([u32::MAX, u32::MAX].into_iter()), u32::MAX);
        assert_eq!(mean_word(std::iter::empty::<u32>()), 0);
    }

    #[test]
    fn average_skips_missing_sensors() {
        let identity = UnitQuaternion::identity();
        let good = DataFrame::six_dof(1, 0, vec![coil_at(4.0, identity)]);
        let missing = DataFrame::six_dof(
            2,
            10,
            vec![Coil::new_6d(
                Vector3::new(f32::NAN, f32::NAN, f32::NAN),
                Quaternion::new(1.0, 0.0, 0.0, 0.0),
                0,
            )],
        );
        let mean = DataFrame::average([&good, &missing]).expect("non-empty window");
        assert_eq!(mean.coil(0).map(|c| c.location.x), Some(4.0));
    }

    #[test]
    fn average_rotations_handles_opposite_signs() {
        let q = UnitQuaternion::from_euler_angles(0.3_f32, -0.2, 0.1);
        let negated = UnitQuaternion::new_unchecked(-*q.quaternion());
        let mean = average_rotations([q, negated]).expect("two samples");
        assert!(mean.angle_to(&q) < 1e-4);
    }

    #[test]
    fn average_rotations_is_between_inputs() {
        let a = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.2_f32);
        let b = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.6_f32);
        let mean = average_rotations([a, b]).expect("two samples");
        let expected = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.4_f32);
        assert!(mean.angle_to(&expected) < 1e-5);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn repeated_rotation_averages_to_itself(
                roll in -3.0f32..3.0,
                pitch in -1.5f32..1.5,
                yaw in -3.0f32..3.0,
                repeats in 1usize..12
            ) {
                let q = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
                let mean = average_rotations(std::iter::repeat_n(q, repeats)).expect("samples");
                prop_assert!(mean.angle_to(&q) < 1e-3, "mean {:?} vs {:?}", mean, q);
            }

            #[test]
            fn repeated_frame_averages_to_itself(
                x in -200.0f32..200.0,
                roll in -3.0f32..3.0,
                repeats in 1usize..8
            ) {
                let q = UnitQuaternion::from_euler_angles(roll, 0.1, -0.4);
                let frame = DataFrame::six_dof(7, 70, vec![coil_at(x, q)]);
                let window = vec![frame.clone(); repeats];
                let mean = DataFrame::average(&window).expect("non-empty window");
                let coil = mean.coil(0).expect("one coil");
                let original = frame.coil(0).map(|c| c.location).unwrap_or_else(Vector3::zeros);
                prop_assert!((coil.location - original).norm() < 1e-3);
                let rotation = coil.unit_rotation().expect("rotation");
                prop_assert!(rotation.angle_to(&q) < 1e-3);
            }
        }
    }
}
