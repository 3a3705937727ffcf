#![no_main]

use libfuzzer_sys::fuzz_target;
use match_handoff::protocol::FrontendResponse;

fuzz_target!(|data: &[u8]| {
    if let Ok(FrontendResponse::Assignment { endpoint, .. }) =
        serde_json::from_slice::<FrontendResponse>(data)
    {
        let _ = endpoint.is_resolved();
        let _ = endpoint.to_string();
    }
});
