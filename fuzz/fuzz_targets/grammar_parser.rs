#![no_main]

use libfuzzer_sys::fuzz_target;
use strataopt_core::grammar::parse_property_string;

fuzz_target!(|data: &str| {
    let _ = parse_property_string(data);
});
