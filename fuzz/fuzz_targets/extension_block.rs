#![no_main]

use libfuzzer_sys::fuzz_target;
use selenia_tls::codec::Reader;
use selenia_tls::extensions::ExtensionBlock;

fuzz_target!(|data: &[u8]| {
    let mut r = Reader::new(data);
    if let Ok(block) = ExtensionBlock::parse(&mut r) {
        // Exercise every structured accessor a handshake would call;
        // malformed opaque extension bodies must surface as TlsError, not
        // a panic or out-of-bounds read.
        let _ = block.server_name();
        let _ = block.supported_groups();
        let _ = block.alpn_protocols();
        let _ = block.supported_versions_list();
        let _ = block.key_share_entries();
    }
});
