#![no_main]

use hdvault_core::seed::{mnemonic_phrase, mnemonic_to_entropy, parse_mnemonic};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // parse_mnemonic must return Ok or Err for any UTF-8 input, never panic.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(mnemonic) = parse_mnemonic(s) {
            // A parsed phrase re-parses to the same entropy
            let entropy = mnemonic_to_entropy(&mnemonic);
            let again = parse_mnemonic(&mnemonic_phrase(&mnemonic)).expect("canonical phrase parses");
            assert_eq!(&entropy[..], &mnemonic_to_entropy(&again)[..]);
        }
    }
});
