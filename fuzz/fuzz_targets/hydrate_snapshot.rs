#![no_main]

use libfuzzer_sys::fuzz_target;
use relink_core::snapshot::EngineSnapshot;
use relink_core::{BatchCoordinator, EngineConfig};

// Arbitrary state files must either be rejected or hydrate into an engine
// whose own snapshot validates.
fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(snapshot) = EngineSnapshot::from_json(raw) else {
        return;
    };
    if let Ok(coordinator) = BatchCoordinator::hydrate(EngineConfig::default(), snapshot) {
        assert!(coordinator.snapshot().validate().is_ok());
    }
});
