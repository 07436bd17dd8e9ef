#![no_main]

use hdvault_core::Envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Envelope::decode must never panic on arbitrary strings.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(envelope) = Envelope::decode(s) {
            // Anything that decodes re-encodes to something that decodes identically
            let reencoded = envelope.encode();
            assert_eq!(Envelope::decode(&reencoded).ok(), Some(envelope));
        }
    }
});
