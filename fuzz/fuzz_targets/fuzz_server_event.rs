#![no_main]

use libfuzzer_sys::fuzz_target;

use ridewire_client::protocol::{decode_frame, ServerEvent};

fuzz_target!(|data: &[u8]| {
    // Exercise the full inbound path: raw text → frame envelope → typed
    // event. Neither stage may panic on arbitrary input.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(frame) = decode_frame(s) {
            let _ = ServerEvent::from_frame(&frame);
        }
    }
});
