#![no_main]

use libfuzzer_sys::fuzz_target;
use relink_core::{BatchCoordinator, CandidateEdge, EngineConfig};

fuzz_target!(|data: &[u8]| {
    let Ok(rows) = serde_json::from_slice::<Vec<CandidateEdge>>(data) else {
        return;
    };
    let mut coordinator = BatchCoordinator::new(EngineConfig::default());
    let Ok(report) = coordinator.submit_batch(&rows) else {
        return;
    };
    assert_eq!(report.rows.len(), rows.len());
    assert!(coordinator.snapshot().validate().is_ok());
});
