#![no_main]

use libfuzzer_sys::fuzz_target;
use redes_sync::{extract_fault_string, FaultKind};

fuzz_target!(|data: &[u8]| {
    let body = String::from_utf8_lossy(data);
    if let Some(fault) = extract_fault_string(&body) {
        assert!(!fault.trim().is_empty());
        let kind = FaultKind::classify(&fault);
        assert!(!kind.as_str().is_empty());
    }
});
