//! Frame decoding fuzz target: arbitrary Ethernet frames, strict and lenient.
//! A frame that decodes must re-encode without error.
//! Build with: cargo fuzz run decode_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    use pktset::{LinkType, ProtocolRegistry};

    let strict = ProtocolRegistry::builtin();
    if let Ok(chain) = strict.decode_link(LinkType::Ethernet, data, None) {
        let _ = chain.to_bytes();
    }
    let lenient = ProtocolRegistry::builtin().with_lenient(true);
    let _ = lenient.decode_link(LinkType::Ethernet, data, None);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run decode_fuzz");
}
