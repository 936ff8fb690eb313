//! SLIP framing (RFC 1055) used on the USB-CDC link to a running board.

use thiserror::Error;

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlipError {
    #[error("SLIP frame exceeds {max} bytes")]
    FrameTooLarge { max: usize },
}

/// Escape `payload` into one frame. A leading END flushes any line noise the
/// receiver may have accumulated.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(END);
    for &b in payload {
        match b {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(b),
        }
    }
    out.push(END);
    out
}

/// Streaming decoder; feed it bytes as they arrive.
pub struct SlipDecoder {
    buffer: Vec<u8>,
    escaping: bool,
    overflowed: bool,
    max: usize,
}

impl SlipDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            escaping: false,
            overflowed: false,
            max: max_frame,
        }
    }

    /// Returns a frame when `byte` completes one. Empty frames (back-to-back
    /// END bytes) are skipped. An oversized frame is discarded and reported
    /// at its closing END, after which decoding resumes normally.
    pub fn push(&mut self, byte: u8) -> Result<Option<Vec<u8>>, SlipError> {
        if self.escaping {
            self.escaping = false;
            let decoded = match byte {
                ESC_END => END,
                ESC_ESC => ESC,
                // Protocol violation; keep the byte like the RFC reference code.
                other => other,
            };
            self.store(decoded);
            return Ok(None);
        }

        match byte {
            END => {
                if self.overflowed {
                    self.reset();
                    return Err(SlipError::FrameTooLarge { max: self.max });
                }
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                Ok(Some(std::mem::take(&mut self.buffer)))
            }
            ESC => {
                self.escaping = true;
                Ok(None)
            }
            _ => {
                self.store(byte);
                Ok(None)
            }
        }
    }

    fn store(&mut self, byte: u8) {
        if self.buffer.len() >= self.max {
            self.overflowed = true;
        } else {
            self.buffer.push(byte);
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escaping = false;
        self.overflowed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(dec: &mut SlipDecoder, bytes: &[u8]) -> Vec<Result<Vec<u8>, SlipError>> {
        bytes
            .iter()
            .filter_map(|&b| dec.push(b).transpose())
            .collect()
    }

    #[test]
    fn escapes_special_bytes() {
        let framed = encode_frame(&[0x01, END, 0x02, ESC, 0x03]);
        assert_eq!(
            framed,
            vec![END, 0x01, ESC, ESC_END, 0x02, ESC, ESC_ESC, 0x03, END]
        );
    }

    #[test]
    fn decoder_inverts_encoder_and_skips_empty_frames() {
        let payload = vec![END, ESC, 0x00, 0x7F, END];
        let mut stream = vec![END, END];
        stream.extend(encode_frame(&payload));
        stream.extend(encode_frame(b"/ping"));

        let mut dec = SlipDecoder::new(2048);
        let frames = decode_all(&mut dec, &stream);
        assert_eq!(frames, vec![Ok(payload), Ok(b"/ping".to_vec())]);
    }

    #[test]
    fn oversized_frame_is_dropped_then_decoder_recovers() {
        let mut dec = SlipDecoder::new(4);
        let mut stream = encode_frame(&[1, 2, 3, 4, 5, 6]);
        stream.extend(encode_frame(&[9, 9]));

        let frames = decode_all(&mut dec, &stream);
        assert_eq!(
            frames,
            vec![Err(SlipError::FrameTooLarge { max: 4 }), Ok(vec![9, 9])]
        );
    }
}
