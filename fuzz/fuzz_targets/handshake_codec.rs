#![no_main]

use libfuzzer_sys::fuzz_target;
use selenia_tls::handshake::HandshakeMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = HandshakeMessage::decode(data) {
        // A successfully decoded message must re-encode without panicking;
        // byte-for-byte equality isn't guaranteed (padding, compression
        // methods) but encode() itself must never panic on decoder output.
        let _ = msg.encode();
    }
});
