//! Data-frame body layout.
//!
//! ```text
//! componentCount: u32
//! per component:
//!   componentSize: u32      (includes this 20-byte component header)
//!   componentType: u32      (1 3D, 2 analog, 3 force, 4 6D, 5 event)
//!   frameNumber:   u32
//!   timestamp:     u64      (microseconds)
//!   3D/6D payload:
//!     coilCount: u32
//!     3D coil: x y z reliability          (3 x f32, u32)
//!     6D coil: q0 qx qy qz x y z error    (7 x f32, u32)
//! ```
//!
//! All values are big-endian. Analog, force and event payloads are kept verbatim.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use nalgebra::{Quaternion, Vector3};

use crate::error::{RelayError, Result};
use crate::types::{Coil, Component, ComponentKind, DataFrame};

/// Size of the per-component header.
pub const COMPONENT_HEADER_LEN: usize = 20;

/// Encode a data frame body (without packet header).
///
/// Fails with [`RelayError::Format`] when a count or size does not fit its `u32` field.
pub fn encode_frame(frame: &DataFrame) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(encoded_len(frame));
    out.put_u32(word(frame.components.len(), "component count")?);
    for component in &frame.components {
        out.put_u32(word(COMPONENT_HEADER_LEN + payload_len(component), "component size")?);
        out.put_u32(component.kind.code());
        out.put_u32(component.frame_number);
        out.put_u64(component.timestamp_micros);
        match component.kind {
            ComponentKind::ThreeD => {
                out.put_u32(word(component.coils.len(), "coil count")?);
                for coil in &component.coils {
                    put_vector(&mut out, &coil.location);
                    out.put_u32(coil.reliability);
                }
            }
            ComponentKind::SixD => {
                out.put_u32(word(component.coils.len(), "coil count")?);
                for coil in &component.coils {
                    let q = coil.rotation.unwrap_or_else(Quaternion::identity);
                    out.put_f32(q.w);
                    out.put_f32(q.i);
                    out.put_f32(q.j);
                    out.put_f32(q.k);
                    put_vector(&mut out, &coil.location);
                    out.put_u32(coil.error);
                }
            }
            ComponentKind::Analog | ComponentKind::Force | ComponentKind::Event => {
                out.put_slice(&component.payload);
            }
        }
    }
    Ok(out.freeze())
}

fn word(value: usize, field: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| RelayError::format_error("data frame", format!("{field} {value} exceeds u32")))
}

/// Decode a data frame body (without packet header).
///
/// Fails with [`RelayError::Format`] when a declared component or coil count does not
/// consume exactly the bytes its size field claims.
pub fn decode_frame(body: &[u8]) -> Result<DataFrame> {
    let mut buf = body;
    need(buf, 4, "component count")?;
    let count = buf.get_u32();

    let mut components = Vec::with_capacity((count as usize).min(16));
    for index in 0..count {
        need(buf, COMPONENT_HEADER_LEN, "component header")?;
        let size = buf.get_u32() as usize;
        let code = buf.get_u32();
        let frame_number = buf.get_u32();
        let timestamp_micros = buf.get_u64();

        let payload_len = size.checked_sub(COMPONENT_HEADER_LEN).ok_or_else(|| {
            RelayError::format_error(
                "data frame",
                format!("component {index} size {size} below header size {COMPONENT_HEADER_LEN}"),
            )
        })?;
        need(buf, payload_len, "component payload")?;
        let (payload, rest) = buf.split_at(payload_len);
        buf = rest;

        let kind = ComponentKind::from_code(code).ok_or_else(|| {
            RelayError::format_error("data frame", format!("component {index} has unknown type {code}"))
        })?;
        let component = match kind.coil_record_len() {
            Some(record_len) => Component::with_coils(
                kind,
                frame_number,
                timestamp_micros,
                decode_coils(payload, kind, record_len)?,
            ),
            None => Component::opaque(
                kind,
                frame_number,
                timestamp_micros,
                Bytes::copy_from_slice(payload),
            ),
        };
        components.push(component);
    }

    if !buf.is_empty() {
        return Err(RelayError::format_error(
            "data frame",
            format!("{} bytes left after {count} components", buf.len()),
        ));
    }
    Ok(DataFrame::new(components))
}

fn decode_coils(mut payload: &[u8], kind: ComponentKind, record_len: usize) -> Result<Vec<Coil>> {
    need(payload, 4, "coil count")?;
    let count = payload.get_u32() as usize;
    let expected = count.checked_mul(record_len);
    if expected != Some(payload.len()) {
        return Err(RelayError::format_error(
            "data frame",
            format!(
                "{count} coils of {record_len} bytes do not fill the {} byte coil section",
                payload.len()
            ),
        ));
    }

    let mut coils = Vec::with_capacity(count);
    for _ in 0..count {
        let coil = match kind {
            ComponentKind::SixD => {
                let (w, i, j, k) =
                    (payload.get_f32(), payload.get_f32(), payload.get_f32(), payload.get_f32());
                let location = get_vector(&mut payload);
                Coil::new_6d(location, Quaternion::new(w, i, j, k), payload.get_u32())
            }
            _ => {
                let location = get_vector(&mut payload);
                Coil::new_3d(location, payload.get_u32())
            }
        };
        coils.push(coil);
    }
    Ok(coils)
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.len() < len {
        return Err(RelayError::format_error(
            "data frame",
            format!("truncated {what}: need {len} bytes, have {}", buf.len()),
        ));
    }
    Ok(())
}

fn payload_len(component: &Component) -> usize {
    match component.kind.coil_record_len() {
        Some(record_len) => 4 + component.coils.len() * record_len,
        None => component.payload.len(),
    }
}

fn encoded_len(frame: &DataFrame) -> usize {
    4 + frame.components.iter().map(|c| COMPONENT_HEADER_LEN + payload_len(c)).sum::<usize>()
}

fn put_vector(out: &mut BytesMut, v: &Vector3<f32>) {
    out.put_f32(v.x);
    out.put_f32(v.y);
    out.put_f32(v.z);
}

fn get_vector(buf: &mut &[u8]) -> Vector3<f32> {
    let x = buf.get_f32();
    let y = buf.get_f32();
    let z = buf.get_f32();
    Vector3::new(x, y, z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, PacketType, decode, encode};

    fn sample_frame() -> DataFrame {
        let coils = (0..15)
            .map(|i| {
                Coil::new_6d(
                    Vector3::new(i as f32, -(i as f32), 0.5),
                    Quaternion::new(1.0, 0.0, 0.0, 0.0),
                    0,
                )
            })
            .collect();
        DataFrame::six_dof(0, 779_200, coils)
    }

    #[test]
    fn fifteen_six_dof_coils_make_a_504_byte_component() -> anyhow::Result<()> {
        let body = encode_frame(&sample_frame())?;
        assert_eq!(body.len(), 4 + 504);
        assert_eq!(&body[..8], &[0, 0, 0, 1, 0, 0, 0x01, 0xf8]);
        assert_eq!(&body[8..12], &[0, 0, 0, 4]);
        Ok(())
    }

    #[test]
    fn decodes_what_it_encodes() -> anyhow::Result<()> {
        let frame = sample_frame();
        let decoded = decode_frame(&encode_frame(&frame)?)?;
        assert_eq!(decoded, frame);
        Ok(())
    }

    #[test]
    fn three_dof_component_keeps_reliability() -> anyhow::Result<()> {
        let frame = DataFrame::new(vec![Component::with_coils(
            ComponentKind::ThreeD,
            3,
            30,
            vec![Coil::new_3d(Vector3::new(1.0, 2.0, 3.0), 7)],
        )]);
        let body = encode_frame(&frame)?;
        assert_eq!(body.len(), 4 + COMPONENT_HEADER_LEN + 4 + 16);
        let decoded = decode_frame(&body)?;
        assert_eq!(decoded.coil(0).map(|c| c.reliability), Some(7));
        assert_eq!(&body[body.len() - 4..], &7u32.to_be_bytes());
        assert!(decoded.coil(0).is_some_and(|c| c.rotation.is_none()));
        Ok(())
    }

    #[test]
    fn opaque_components_survive() -> anyhow::Result<()> {
        let frame = DataFrame::new(vec![
            Component::opaque(ComponentKind::Analog, 1, 10, Bytes::from_static(&[1, 2, 3])),
            sample_frame().components.remove(0),
        ]);
        let decoded = decode_frame(&encode_frame(&frame)?)?;
        assert_eq!(decoded, frame);
        assert_eq!(decoded.coil_count(), 15);
        Ok(())
    }

    #[test]
    fn coil_count_must_fill_component() -> anyhow::Result<()> {
        let mut body = encode_frame(&sample_frame())?.to_vec();
        // claim 16 coils in a section sized for 15
        body[24..28].copy_from_slice(&16u32.to_be_bytes());
        let err = decode_frame(&body).expect_err("inconsistent coil count");
        assert!(matches!(err, RelayError::Format { .. }));
        Ok(())
    }

    #[test]
    fn component_size_below_header_is_rejected() -> anyhow::Result<()> {
        let mut body = encode_frame(&sample_frame())?.to_vec();
        body[4..8].copy_from_slice(&12u32.to_be_bytes());
        assert!(matches!(decode_frame(&body), Err(RelayError::Format { .. })));
        Ok(())
    }

    #[test]
    fn truncated_body_is_rejected() -> anyhow::Result<()> {
        let body = encode_frame(&sample_frame())?;
        assert!(matches!(decode_frame(&body[..100]), Err(RelayError::Format { .. })));
        assert!(matches!(decode_frame(&[0, 0]), Err(RelayError::Format { .. })));
        Ok(())
    }

    #[test]
    fn trailing_bytes_are_rejected() -> anyhow::Result<()> {
        let mut body = encode_frame(&sample_frame())?.to_vec();
        body.push(0);
        assert!(matches!(decode_frame(&body), Err(RelayError::Format { .. })));
        Ok(())
    }

    #[test]
    fn unknown_component_type_is_rejected() -> anyhow::Result<()> {
        let mut body = encode_frame(&sample_frame())?.to_vec();
        body[8..12].copy_from_slice(&9u32.to_be_bytes());
        assert!(matches!(decode_frame(&body), Err(RelayError::Format { .. })));
        Ok(())
    }

    #[test]
    fn oversized_counts_are_refused() {
        assert_eq!(word(504, "component size").ok(), Some(504));
        assert!(matches!(word(u32::MAX as usize, "coil count"), Ok(u32::MAX)));
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(word(u32::MAX as usize + 1, "coil count"), Err(RelayError::Format { .. })));
    }

    #[test]
    fn decodes_through_packet_envelope() -> anyhow::Result<()> {
        let frame = sample_frame();
        let bytes = encode(&encode_frame(&frame)?, PacketType::DataFrame);
        assert_eq!(decode(&bytes)?, Message::Frame(frame));
        Ok(())
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn coil_3d() -> impl Strategy<Value = Coil> {
            (any::<u32>(), any::<u32>(), any::<u32>(), any::<u32>()).prop_map(|(x, y, z, r)| {
                Coil::new_3d(
                    Vector3::new(f32::from_bits(x), f32::from_bits(y), f32::from_bits(z)),
                    r,
                )
            })
        }

        fn coil_6d() -> impl Strategy<Value = Coil> {
            prop::array::uniform8(any::<u32>()).prop_map(|w| {
                let f = w.map(f32::from_bits);
                Coil::new_6d(
                    Vector3::new(f[4], f[5], f[6]),
                    Quaternion::new(f[0], f[1], f[2], f[3]),
                    w[7],
                )
            })
        }

        fn component() -> impl Strategy<Value = Component> {
            prop_oneof![
                (any::<u32>(), any::<u64>(), prop::collection::vec(coil_3d(), 0..8)).prop_map(
                    |(n, ts, coils)| Component::with_coils(ComponentKind::ThreeD, n, ts, coils)
                ),
                (any::<u32>(), any::<u64>(), prop::collection::vec(coil_6d(), 0..8)).prop_map(
                    |(n, ts, coils)| Component::with_coils(ComponentKind::SixD, n, ts, coils)
                ),
                (any::<u32>(), any::<u64>(), prop::collection::vec(any::<u8>(), 0..40)).prop_map(
                    |(n, ts, raw)| Component::opaque(ComponentKind::Force, n, ts, Bytes::from(raw))
                ),
            ]
        }

        proptest! {
            #[test]
            fn well_formed_packets_round_trip(components in prop::collection::vec(component(), 0..4)) {
                let body = encode_frame(&DataFrame::new(components))
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let packet = encode(&body, PacketType::DataFrame);

                let message = decode(&packet).map_err(|e| TestCaseError::fail(e.to_string()))?;
                let reencoded = message.to_packet().map_err(|e| TestCaseError::fail(e.to_string()))?.to_bytes();
                prop_assert_eq!(reencoded.to_vec(), packet);
            }

            #[test]
            fn arbitrary_bytes_never_panic(body in prop::collection::vec(any::<u8>(), 0..256)) {
                let _ = decode_frame(&body);
            }
        }
    }
}
