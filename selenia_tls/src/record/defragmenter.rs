//! Reassembles whole protocol messages out of a stream of record
//! fragments (§4.2). A single record may carry part of a message, all of
//! it, or several messages back to back; this type hides that from
//! `MessageSocket`.

use crate::protocol::ContentType;
use std::collections::HashMap;

/// How to find a complete message's length inside a type's accumulated
/// buffer.
#[derive(Clone, Copy)]
pub enum SizeDescriptor {
    /// Every message of this type is exactly `n` bytes (alerts,
    /// change_cipher_spec).
    Fixed(usize),
    /// The length lives `offset` bytes in, encoded big-endian over `width`
    /// bytes, and counts bytes *after* the header (handshake messages:
    /// offset=1, width=3).
    Dynamic { header_len: usize, offset: usize, width: usize },
}

struct TypeState {
    priority: usize,
    descriptor: SizeDescriptor,
    buf: Vec<u8>,
}

/// Buffers per-`ContentType` bytes and yields whole messages in
/// registration-priority order.
pub struct Defragmenter {
    types: HashMap<ContentType, TypeState>,
    next_priority: usize,
}

impl Defragmenter {
    pub fn new() -> Defragmenter {
        Defragmenter {
            types: HashMap::new(),
            next_priority: 0,
        }
    }

    pub fn register(&mut self, content_type: ContentType, descriptor: SizeDescriptor) {
        let priority = self.next_priority;
        self.next_priority += 1;
        self.types.insert(
            content_type,
            TypeState {
                priority,
                descriptor,
                buf: Vec::new(),
            },
        );
    }

    /// Append bytes for `content_type`. Returns `false` if the type was
    /// never registered.
    pub fn add(&mut self, content_type: ContentType, bytes: &[u8]) -> bool {
        match self.types.get_mut(&content_type) {
            Some(state) => {
                state.buf.extend_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Return the next complete message, by registration-priority order
    /// among types that currently have one ready, removing it from the
    /// buffer. `None` if nothing is complete yet.
    pub fn next(&mut self) -> Option<(ContentType, Vec<u8>)> {
        let mut best: Option<(ContentType, usize)> = None;
        for (&ct, state) in self.types.iter() {
            if let Some(len) = message_len(state) {
                if state.buf.len() >= len {
                    match best {
                        Some((_, prio)) if prio <= state.priority => {}
                        _ => best = Some((ct, state.priority)),
                    }
                }
            }
        }
        let (content_type, _) = best?;
        let state = self.types.get_mut(&content_type).unwrap();
        let len = message_len(state).unwrap();
        let message: Vec<u8> = state.buf.drain(0..len).collect();
        Some((content_type, message))
    }

    /// Drop all buffered, incomplete data for every type. Called on key
    /// change in TLS 1.2 and below so a fragment from one epoch never gets
    /// stitched to a fragment from the next.
    pub fn clear(&mut self) {
        for state in self.types.values_mut() {
            state.buf.clear();
        }
    }
}

fn message_len(state: &TypeState) -> Option<usize> {
    match state.descriptor {
        SizeDescriptor::Fixed(n) => Some(n),
        SizeDescriptor::Dynamic { header_len, offset, width } => {
            if state.buf.len() < offset + width {
                return None;
            }
            let mut body_len = 0usize;
            for i in 0..width {
                body_len = (body_len << 8) | state.buf[offset + i] as usize;
            }
            Some(header_len + body_len)
        }
    }
}

/// The standard registration this engine uses: handshake has a 4-byte
/// header (type + u24 length) so its length lives at offset 1, width 3;
/// alerts are always 2 bytes; change_cipher_spec is always 1 byte.
/// Handshake is registered first so a complete handshake message is always
/// preferred over a same-arrival alert, matching the priority rule in §4.2.
pub fn standard(defrag: &mut Defragmenter) {
    defrag.register(
        ContentType::Handshake,
        SizeDescriptor::Dynamic {
            header_len: 4,
            offset: 1,
            width: 3,
        },
    );
    defrag.register(ContentType::Alert, SizeDescriptor::Fixed(2));
    defrag.register(ContentType::ChangeCipherSpec, SizeDescriptor::Fixed(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_handshake_message_split_across_two_adds() {
        let mut d = Defragmenter::new();
        standard(&mut d);
        // ClientHello header: type=1, length=0x000002, body=[0xAA, 0xBB]
        d.add(ContentType::Handshake, &[1, 0, 0, 2, 0xAA]);
        assert!(d.next().is_none());
        d.add(ContentType::Handshake, &[0xBB]);
        let (ct, msg) = d.next().unwrap();
        assert_eq!(ct, ContentType::Handshake);
        assert_eq!(msg, vec![1, 0, 0, 2, 0xAA, 0xBB]);
    }

    #[test]
    fn handshake_takes_priority_over_alert() {
        let mut d = Defragmenter::new();
        standard(&mut d);
        d.add(ContentType::Alert, &[1, 0]);
        d.add(ContentType::Handshake, &[0, 0, 0, 0]);
        let (ct, _) = d.next().unwrap();
        assert_eq!(ct, ContentType::Handshake);
    }

    #[test]
    fn clear_drops_partial_data() {
        let mut d = Defragmenter::new();
        standard(&mut d);
        d.add(ContentType::Handshake, &[1, 0, 0, 5, 1, 2]);
        d.clear();
        d.add(ContentType::Alert, &[2, 10]);
        assert_eq!(d.next().unwrap().0, ContentType::Alert);
    }
}
