//! MessageSocket (§4.5): the layer between RecordLayer and the handshake
//! FSM. Feeds incoming fragments through the `Defragmenter`, answers
//! heartbeats transparently, and coalesces outbound handshake messages
//! into as few records as possible.

use crate::error::TlsError;
use crate::protocol::{AlertDescription, AlertLevel, ContentType, ProtocolVersion};
use crate::record::defragmenter::{self, Defragmenter};
use crate::record::RecordLayer;
use std::io::{Read, Write};

/// What a peer is allowed to do with heartbeats (RFC 6520), negotiated via
/// the `heartbeat` extension and carried in `Config`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatMode {
    Disabled,
    AllowSend,
    AllowReceive,
    AllowBoth,
}

impl HeartbeatMode {
    pub fn peer_may_send(self) -> bool {
        matches!(self, HeartbeatMode::AllowReceive | HeartbeatMode::AllowBoth)
    }
}

const HEARTBEAT_REQUEST: u8 = 1;
const HEARTBEAT_RESPONSE: u8 = 2;
const MAX_HEARTBEAT_PAYLOAD: usize = 1 << 14;
const MIN_HEARTBEAT_PADDING: usize = 16;

pub struct MessageSocket<T: Read + Write> {
    layer: RecordLayer<T>,
    defrag: Defragmenter,
    pub heartbeat_mode: HeartbeatMode,
}

impl<T: Read + Write> MessageSocket<T> {
    pub fn new(layer: RecordLayer<T>, heartbeat_mode: HeartbeatMode) -> MessageSocket<T> {
        let mut defrag = Defragmenter::new();
        defragmenter::standard(&mut defrag);
        MessageSocket {
            layer,
            defrag,
            heartbeat_mode,
        }
    }

    pub fn layer_mut(&mut self) -> &mut RecordLayer<T> {
        &mut self.layer
    }

    pub fn into_layer(self) -> RecordLayer<T> {
        self.layer
    }

    /// Drop defragmenter state for a content type. Called after a key
    /// change in TLS 1.2 and below (§4.2).
    pub fn reset_defragmenter(&mut self) {
        self.defrag.clear();
    }

    /// Return the next complete, non-heartbeat message of any content
    /// type, processing and replying to heartbeats internally along the
    /// way.
    pub fn recv_message(&mut self) -> Result<(ContentType, Vec<u8>), TlsError> {
        loop {
            if let Some(ready) = self.defrag.next() {
                return Ok(ready);
            }
            let (content_type, plaintext) = self.layer.read_record()?;
            if content_type == ContentType::Heartbeat {
                self.handle_heartbeat(&plaintext)?;
                continue;
            }
            if !self.defrag.add(content_type, &plaintext) {
                // Application data and change_cipher_spec aren't
                // reassembled -- a single record's worth is already a
                // whole "message" to the caller.
                return Ok((content_type, plaintext));
            }
        }
    }

    fn handle_heartbeat(&mut self, payload: &[u8]) -> Result<(), TlsError> {
        if !self.heartbeat_mode.peer_may_send() {
            return Err(TlsError::LocalAlert(AlertDescription::UnexpectedMessage));
        }
        if payload.is_empty() {
            return Err(TlsError::Decode("empty heartbeat message".into()));
        }
        let message_type = payload[0];
        let mut r_rest = &payload[1..];
        if r_rest.len() < 2 {
            return Err(TlsError::Decode("heartbeat missing payload length".into()));
        }
        let payload_len = u16::from_be_bytes([r_rest[0], r_rest[1]]) as usize;
        r_rest = &r_rest[2..];
        if payload_len > MAX_HEARTBEAT_PAYLOAD || r_rest.len() < payload_len {
            return Err(TlsError::Decode("heartbeat payload length out of range".into()));
        }
        let padding_len = r_rest.len() - payload_len;
        if padding_len < MIN_HEARTBEAT_PADDING {
            return Err(TlsError::Decode("heartbeat padding below minimum".into()));
        }
        let data = &r_rest[..payload_len];

        match message_type {
            HEARTBEAT_REQUEST => {
                let mut response = Vec::with_capacity(3 + data.len() + MIN_HEARTBEAT_PADDING);
                response.push(HEARTBEAT_RESPONSE);
                response.extend_from_slice(&(data.len() as u16).to_be_bytes());
                response.extend_from_slice(data);
                let mut padding = vec![0u8; MIN_HEARTBEAT_PADDING];
                crate::crypto::rand::fill_random(&mut padding);
                response.extend_from_slice(&padding);
                self.layer.write(ContentType::Heartbeat, &response)
            }
            HEARTBEAT_RESPONSE => Ok(()), // unsolicited response: ignored.
            _ => Err(TlsError::Decode(format!("unknown heartbeat message type {message_type}"))),
        }
    }

    /// Send a heartbeat_request (only valid when our role may send one).
    pub fn send_heartbeat_request(&mut self, data: &[u8]) -> Result<(), TlsError> {
        let mut msg = Vec::with_capacity(3 + data.len() + MIN_HEARTBEAT_PADDING);
        msg.push(HEARTBEAT_REQUEST);
        msg.extend_from_slice(&(data.len() as u16).to_be_bytes());
        msg.extend_from_slice(data);
        let mut padding = vec![0u8; MIN_HEARTBEAT_PADDING];
        crate::crypto::rand::fill_random(&mut padding);
        msg.extend_from_slice(&padding);
        self.layer.write(ContentType::Heartbeat, &msg)
    }

    /// Send one or more handshake messages under a single content type,
    /// coalesced into as few records as `RecordLayer::write` allows.
    pub fn send_flight(&mut self, messages: &[Vec<u8>]) -> Result<(), TlsError> {
        let mut coalesced = Vec::new();
        for m in messages {
            coalesced.extend_from_slice(m);
        }
        self.layer.write(ContentType::Handshake, &coalesced)
    }

    /// Send the single-byte change_cipher_spec record (RFC 5246 §7.1) that
    /// signals the next record in this direction uses the just-negotiated
    /// keys. Callers still have to flip `RecordLayer`'s active state
    /// themselves -- this only puts the wire signal on the pipe.
    pub fn send_change_cipher_spec(&mut self) -> Result<(), TlsError> {
        self.layer.write(ContentType::ChangeCipherSpec, &[1u8])
    }

    pub fn send_alert(&mut self, level: AlertLevel, description: AlertDescription) -> Result<(), TlsError> {
        let alert = crate::handshake::Alert { level, description };
        self.layer.write(ContentType::Alert, &alert.encode())
    }

    pub fn send_application_data(&mut self, bytes: &[u8]) -> Result<(), TlsError> {
        self.layer.write(ContentType::ApplicationData, bytes)
    }

    pub fn record_version(&self) -> ProtocolVersion {
        ProtocolVersion::TLS1_2
    }
}
