use bytes::{BufMut, BytesMut};

use super::{Argument, Bundle, FramingError, Message, OscError, Packet, BUNDLE_TAG};

/// Length of a string on the wire: the bytes, one NUL, then NULs up to the
/// next multiple of four.
pub fn padded_len(len: usize) -> usize {
    (len + 4) & !3
}

pub(crate) fn put_padded(dst: &mut BytesMut, s: &[u8]) {
    dst.put_slice(s);
    dst.put_bytes(0, padded_len(s.len()) - s.len());
}

pub(crate) fn put_bundle_header(dst: &mut BytesMut, timetag: u64) {
    put_padded(dst, BUNDLE_TAG.as_bytes());
    dst.put_u64(timetag);
}

/// Addresses must start with '/' and may not contain ',' or NUL, otherwise
/// the decoder would find the type tag in the wrong place.
pub(crate) fn validate_address(address: &str) -> Result<(), OscError> {
    let ok = address.starts_with('/') && !address.bytes().any(|b| b == b',' || b == 0);
    if ok {
        Ok(())
    } else {
        Err(FramingError::InvalidAddress(address.to_string()).into())
    }
}

/// Append one message to `dst`.
pub fn encode_message(msg: &Message, dst: &mut BytesMut) -> Result<(), OscError> {
    validate_address(&msg.address)?;

    put_padded(dst, msg.address.as_bytes());
    put_padded(dst, msg.type_tag().as_bytes());

    for arg in &msg.args {
        match arg {
            Argument::Int(v) => dst.put_i32(*v),
            Argument::Float(v) => dst.put_f32(*v),
            Argument::String(s) => put_padded(dst, s.as_bytes()),
            Argument::Blob(b) => {
                dst.put_u32(wire_len(b.len())?);
                dst.put_slice(b);
            }
        }
    }
    Ok(())
}

fn encode_bundle(bundle: &Bundle, dst: &mut BytesMut) -> Result<(), OscError> {
    put_bundle_header(dst, bundle.timetag);
    for p in &bundle.packets {
        let at = dst.len();
        dst.put_u32(0);
        encode_into(p, dst)?;
        let len = wire_len(dst.len() - at - 4)?;
        dst[at..at + 4].copy_from_slice(&len.to_be_bytes());
    }
    Ok(())
}

fn encode_into(packet: &Packet, dst: &mut BytesMut) -> Result<(), OscError> {
    match packet {
        Packet::Message(m) => encode_message(m, dst),
        Packet::Bundle(b) => encode_bundle(b, dst),
    }
}

fn wire_len(len: usize) -> Result<u32, OscError> {
    u32::try_from(len).map_err(|_| OscError::Oversize {
        size: len,
        max: u32::MAX as usize,
    })
}

/// Encode a message or bundle, failing if the result exceeds `max_packet_size`.
pub fn encode_packet(packet: &Packet, max_packet_size: usize) -> Result<Vec<u8>, OscError> {
    let mut dst = BytesMut::with_capacity(256);
    encode_into(packet, &mut dst)?;
    if dst.len() > max_packet_size {
        return Err(OscError::Oversize {
            size: dst.len(),
            max: max_packet_size,
        });
    }
    Ok(dst.to_vec())
}
