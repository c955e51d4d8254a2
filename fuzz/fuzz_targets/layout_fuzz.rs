//! Layout language fuzz target: arbitrary source must parse or fail, never panic.
//! Build with: cargo fuzz run layout_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let mut registry = pktset::ProtocolRegistry::builtin();
    let _ = registry.load_layouts(s);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run layout_fuzz");
}
