//! Channel label interpretation for hierarchical files.
//!
//! BVH files name their channels (`Xposition`, `Zrotation`, ...) but nothing guarantees a
//! vocabulary, so the mapping from labels to coil attributes is a strategy. The keyword
//! heuristic is best effort: every slot it cannot fill, and every label two slots compete
//! for, is reported instead of silently guessed.

use crate::types::{ChannelMapping, RotationChannels};

/// Outcome of interpreting one marker's channel labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMapping {
    pub mapping: ChannelMapping,
    pub warnings: Vec<String>,
}

/// Turns a channel label list into a [`ChannelMapping`].
pub trait LabelStrategy: Send + Sync {
    fn map_labels(&self, labels: &[String]) -> LabelMapping;
}

/// A mapping known in advance, used for files whose labels are unreliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedLabels(pub ChannelMapping);

impl LabelStrategy for FixedLabels {
    fn map_labels(&self, labels: &[String]) -> LabelMapping {
        let warnings = self
            .0
            .indices()
            .into_iter()
            .filter(|&i| i >= labels.len())
            .map(|i| format!("fixed mapping reads channel {i} but only {} exist", labels.len()))
            .collect();
        LabelMapping { mapping: self.0, warnings }
    }
}

/// Keyword heuristic over lower-cased labels.
///
/// - `rot` or `q` marks a rotation channel; `loc`, `pos` or `mm` a location channel.
/// - The axis is the first or last letter when that is `x`, `y` or `z`.
/// - A label starting or ending in `q` is a quaternion part, `q` with `0` is the scalar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeywordLabels;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
    Z,
}

#[derive(Debug, Clone, Copy, Default)]
struct LabelTraits {
    rotation: bool,
    location: bool,
    axis: Option<Axis>,
    quaternion: bool,
    scalar: bool,
}

fn classify(label: &str) -> LabelTraits {
    let label = label.to_ascii_lowercase();
    let rotation = label.contains("rot") || label.contains('q');
    let location =
        !rotation && (label.contains("loc") || label.contains("pos") || label.contains("mm"));
    let edge = |c: char| label.starts_with(c) || label.ends_with(c);
    let axis = if edge('x') {
        Some(Axis::X)
    } else if edge('y') {
        Some(Axis::Y)
    } else if edge('z') {
        Some(Axis::Z)
    } else {
        None
    };
    LabelTraits { rotation, location, axis, quaternion: edge('q'), scalar: label.contains('0') }
}

/// Fills named slots with the first matching label, recording conflicts.
struct SlotFiller<'a> {
    labels: &'a [String],
    warnings: Vec<String>,
}

impl SlotFiller<'_> {
    fn fill(&mut self, slot: &str, candidates: impl Iterator<Item = usize>) -> Option<usize> {
        let found: Vec<usize> = candidates.collect();
        if found.len() > 1 {
            let names: Vec<&str> = found.iter().map(|&i| self.labels[i].as_str()).collect();
            self.warnings.push(format!("{slot}: labels {names:?} all match, using the first"));
        }
        found.first().copied()
    }

    fn require(&mut self, slot: &str, found: Option<usize>) -> Option<usize> {
        if found.is_none() {
            self.warnings.push(format!("{slot}: no channel label matches, reading 0"));
        }
        found
    }
}

impl LabelStrategy for KeywordLabels {
    fn map_labels(&self, labels: &[String]) -> LabelMapping {
        let traits: Vec<LabelTraits> = labels.iter().map(|l| classify(l)).collect();
        let mut filler = SlotFiller { labels, warnings: Vec::new() };

        let matching = |pred: &dyn Fn(&LabelTraits) -> bool| {
            traits.iter().enumerate().filter(|(_, t)| pred(t)).map(|(i, _)| i).collect::<Vec<_>>()
        };

        let mut location = [None; 3];
        for (slot, axis) in [Axis::X, Axis::Y, Axis::Z].into_iter().enumerate() {
            let name = format!("{axis:?} location");
            let found = filler
                .fill(&name, matching(&|t| t.location && t.axis == Some(axis)).into_iter());
            location[slot] = filler.require(&name, found);
        }

        let has_quaternion = traits.iter().any(|t| t.rotation && t.quaternion);
        let has_rotation = traits.iter().any(|t| t.rotation);
        let rotation = if has_quaternion {
            let q0 = filler.fill("q0", matching(&|t| t.quaternion && t.scalar).into_iter());
            let mut parts = [None; 3];
            for (slot, axis) in [Axis::X, Axis::Y, Axis::Z].into_iter().enumerate() {
                let name = format!("q{axis:?}");
                let found = filler.fill(
                    &name,
                    matching(&|t| t.quaternion && !t.scalar && t.axis == Some(axis)).into_iter(),
                );
                parts[slot] = filler.require(&name, found);
            }
            let q0 = filler.require("q0", q0);
            RotationChannels::Quaternion { q0, qx: parts[0], qy: parts[1], qz: parts[2] }
        } else if has_rotation {
            let mut angles = [None; 3];
            for (slot, axis) in [Axis::X, Axis::Y, Axis::Z].into_iter().enumerate() {
                let name = format!("{axis:?} rotation");
                let found = filler
                    .fill(&name, matching(&|t| t.rotation && t.axis == Some(axis)).into_iter());
                angles[slot] = filler.require(&name, found);
            }
            RotationChannels::Euler { x: angles[0], y: angles[1], z: angles[2] }
        } else {
            RotationChannels::None
        };

        for (label, t) in labels.iter().zip(&traits) {
            if !t.rotation && !t.location {
                filler.warnings.push(format!("label '{label}' is neither rotation nor location"));
            }
        }

        LabelMapping {
            mapping: ChannelMapping { rotation, x: location[0], y: location[1], z: location[2] },
            warnings: filler.warnings,
        }
    }
}
