#![no_main]

use libfuzzer_sys::fuzz_target;
use match_handoff::protocol::{Envelope, ServerMessage};

fuzz_target!(|data: &[u8]| {
    // Raw-byte path, including serde_json's own UTF-8 validation.
    if let Ok(envelope) = serde_json::from_slice::<Envelope<ServerMessage>>(data) {
        // Anything that decodes must survive a consistency check and re-encode.
        let _ = envelope.is_consistent();
        let _ = serde_json::to_string(&envelope);
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<Envelope<ServerMessage>>(s);
    }
});
