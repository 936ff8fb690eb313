use super::{
    encode::padded_len, Argument, Bundle, FramingError, Message, OscError, Packet,
    BUNDLE_HEADER_SIZE, BUNDLE_TAG, MAX_BUNDLE_DEPTH,
};

/// Bounds-checked read position over a borrowed datagram.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], OscError> {
        if n > self.remaining() {
            return Err(OscError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32, OscError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A NUL-terminated string plus its padding; returns the bytes before the NUL.
    fn read_padded(&mut self) -> Result<&'a [u8], OscError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(OscError::Truncated {
                needed: rest.len() + 1,
                available: rest.len(),
            })?;
        let padded = self.take(padded_len(nul))?;
        Ok(&padded[..nul])
    }
}

/// Decode one datagram: a bare message (`/...`) or a bundle (`#bundle`).
pub fn decode_packet(buf: &[u8]) -> Result<Packet, OscError> {
    decode_at_depth(buf, 0)
}

fn decode_at_depth(buf: &[u8], depth: usize) -> Result<Packet, OscError> {
    match buf.first() {
        None => Err(FramingError::Empty.into()),
        Some(b'/') => decode_message(buf).map(Packet::Message),
        Some(b'#') if buf.starts_with(BUNDLE_TAG.as_bytes()) => {
            if depth >= MAX_BUNDLE_DEPTH {
                return Err(FramingError::TooDeep.into());
            }
            decode_bundle(buf, depth).map(Packet::Bundle)
        }
        Some(&b) => Err(FramingError::UnknownPacketKind(b).into()),
    }
}

fn decode_bundle(buf: &[u8], depth: usize) -> Result<Bundle, OscError> {
    if buf.len() < BUNDLE_HEADER_SIZE {
        return Err(OscError::Truncated {
            needed: BUNDLE_HEADER_SIZE,
            available: buf.len(),
        });
    }
    if buf[BUNDLE_TAG.len()] != 0 {
        return Err(FramingError::UnknownPacketKind(buf[0]).into());
    }

    let mut cur = Cursor::new(buf, BUNDLE_TAG.len() + 1);
    let hi = cur.read_u32()? as u64;
    let lo = cur.read_u32()? as u64;
    let mut bundle = Bundle::new((hi << 32) | lo);

    while cur.remaining() > 0 {
        let len = cur.read_u32()? as usize;
        let body = cur.take(len)?;
        bundle.packets.push(decode_at_depth(body, depth + 1)?);
    }
    Ok(bundle)
}

fn decode_message(buf: &[u8]) -> Result<Message, OscError> {
    let comma = buf
        .iter()
        .position(|&b| b == b',')
        .ok_or(FramingError::NoTypeTag)?;

    let head = &buf[..comma];
    let addr_end = head.iter().position(|&b| b == 0).unwrap_or(head.len());
    let address = std::str::from_utf8(&head[..addr_end])
        .map_err(|_| FramingError::NotUtf8("address"))?;

    let mut cur = Cursor::new(buf, comma);
    let tag = cur.read_padded()?;

    let mut msg = Message::new(address);
    for &t in &tag[1..] {
        let arg = match t {
            b'i' => Argument::Int(cur.read_u32()? as i32),
            b'f' => Argument::Float(f32::from_bits(cur.read_u32()?)),
            b's' => {
                let s = cur.read_padded()?;
                let s = std::str::from_utf8(s).map_err(|_| FramingError::NotUtf8("string"))?;
                Argument::String(s.to_string())
            }
            b'b' => {
                let len = cur.read_u32()? as usize;
                Argument::Blob(cur.take(len)?.to_vec())
            }
            other => return Err(FramingError::UnknownTypeTag(other as char).into()),
        };
        msg.args.push(arg);
    }

    // Blobs go out unpadded, but tolerate a peer that pads the last one.
    let rest = cur.take(cur.remaining())?;
    if rest.len() >= 4 || rest.iter().any(|&b| b != 0) {
        return Err(FramingError::TrailingBytes(rest.len()).into());
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_comma_is_a_framing_error() {
        let err = decode_packet(b"/foo").unwrap_err();
        assert_eq!(err, OscError::Framing(FramingError::NoTypeTag));
    }

    #[test]
    fn decodes_message_without_arguments() {
        let p = decode_packet(b"/ping\0\0\0,\0\0\0").unwrap();
        assert_eq!(p, Packet::Message(Message::new("/ping")));
    }

    #[test]
    fn unknown_tag_drops_the_message() {
        let err = decode_packet(b"/x\0\0,iT\0\0\0\0\x01").unwrap_err();
        assert_eq!(err, OscError::Framing(FramingError::UnknownTypeTag('T')));
    }

    #[test]
    fn missing_argument_bytes_are_truncated() {
        let err = decode_packet(b"/x\0\0,ii\0\0\0\0\x01").unwrap_err();
        assert_eq!(
            err,
            OscError::Truncated {
                needed: 4,
                available: 0
            }
        );
    }

    #[test]
    fn oversized_blob_length_never_reads_past_end() {
        let mut buf = b"/b\0\0,b\0\0".to_vec();
        buf.extend_from_slice(&0x7FFF_FFFFu32.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        let err = decode_packet(&buf).unwrap_err();
        assert!(matches!(err, OscError::Truncated { available: 3, .. }));
    }

    #[test]
    fn oversized_bundle_element_fails_cleanly() {
        let mut buf = b"#bundle\0".to_vec();
        buf.extend_from_slice(&[0; 8]);
        buf.extend_from_slice(&1000u32.to_be_bytes());
        buf.extend_from_slice(b"/a\0\0,\0\0\0");
        let err = decode_packet(&buf).unwrap_err();
        assert_eq!(
            err,
            OscError::Truncated {
                needed: 1000,
                available: 8
            }
        );
    }

    #[test]
    fn short_bundle_header_is_truncated() {
        let err = decode_packet(b"#bundle\0\0\0").unwrap_err();
        assert!(matches!(err, OscError::Truncated { needed: 16, .. }));
    }

    #[test]
    fn empty_bundle_decodes() {
        let mut buf = b"#bundle\0".to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
        let p = decode_packet(&buf).unwrap();
        assert_eq!(p, Packet::Bundle(Bundle::new(1)));
    }

    #[test]
    fn unknown_leading_byte_is_rejected() {
        let err = decode_packet(b"xyz").unwrap_err();
        assert_eq!(err, OscError::Framing(FramingError::UnknownPacketKind(b'x')));
        assert_eq!(
            decode_packet(b"").unwrap_err(),
            OscError::Framing(FramingError::Empty)
        );
    }

    #[test]
    fn bytes_after_the_last_argument_are_rejected() {
        let err = decode_packet(b"/a\0\0,i\0\0\0\0\0\x01JUNK").unwrap_err();
        assert_eq!(err, OscError::Framing(FramingError::TrailingBytes(4)));

        let err = decode_packet(b"/a\0\0,\0\0\0\0\0\0\0").unwrap_err();
        assert_eq!(err, OscError::Framing(FramingError::TrailingBytes(4)));
    }

    #[test]
    fn padding_after_a_final_blob_is_accepted() {
        let p = decode_packet(b"/b\0\0,b\0\0\0\0\0\x02\xDE\xAD\0\0").unwrap();
        assert_eq!(
            p,
            Packet::Message(Message::new("/b").arg(Argument::Blob(vec![0xDE, 0xAD])))
        );
    }

    #[test]
    fn string_argument_is_unpadded_on_decode() {
        let p = decode_packet(b"/s\0\0,s\0\0hello\0\0\0").unwrap();
        assert_eq!(p, Packet::Message(Message::new("/s").arg("hello")));
    }
}
