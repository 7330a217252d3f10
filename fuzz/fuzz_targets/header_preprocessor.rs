#![no_main]

use libfuzzer_sys::fuzz_target;
use uapi_registry::target::Target;

fuzz_target!(|data: &[u8]| {
    // Header text is arbitrary; preprocessing and declaration parsing
    // must never panic or loop, whatever the directives look like
    if let Ok(input) = std::str::from_utf8(data) {
        for triple in ["x86_64-unknown-linux-gnu", "i686-unknown-linux-gnu"] {
            if let Ok(target) = Target::parse(triple) {
                let _ = uapi_registry::extract::scan_header(input, &target);
            }
        }
    }
});
