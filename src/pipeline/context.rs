// src/pipeline/context.rs
//
// Shared mutable state for the enrichment pipeline, explicitly owned
// and passed to workers. Two distinct sets live here:
//
//   - the claim set prevents reprocessing the same FILE;
//   - the dedup ledger prevents re-finalizing the same PLATE discovered
//     from different files.
//
// Both last for the pipeline process lifetime. The first successful
// read of a plate is authoritative; later sightings are discarded
// without updating timestamps or counts.

use crate::metrics::PipelineMetrics;
use std::collections::HashSet;
use std::sync::Mutex;

pub struct PipelineContext {
    claimed: Mutex<HashSet<String>>,
    finalized_plates: Mutex<HashSet<String>>,
    pub metrics: PipelineMetrics,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            claimed: Mutex::new(HashSet::new()),
            finalized_plates: Mutex::new(HashSet::new()),
            metrics: PipelineMetrics::new(),
        }
    }

    /// Claim an artifact filename. Returns false if it was already
    /// claimed in this pipeline's lifetime.
    pub fn claim(&self, filename: &str) -> bool {
        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        claimed.insert(filename.to_string())
    }

    pub fn is_claimed(&self, filename: &str) -> bool {
        let claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        claimed.contains(filename)
    }

    /// Enter a plate into the dedup ledger. Returns false for a plate
    /// already finalized -- the sighting must then be discarded.
    pub fn try_finalize(&self, plate: &str) -> bool {
        let mut plates = self
            .finalized_plates
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        plates.insert(plate.to_string())
    }

    pub fn unique_plate_count(&self) -> usize {
        self.finalized_plates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_claim_is_once_per_filename() {
        let ctx = PipelineContext::new();
        assert!(ctx.claim("violation_vehicle_1_ID2_300x500_conf0.60.jpg"));
        assert!(!ctx.claim("violation_vehicle_1_ID2_300x500_conf0.60.jpg"));
        assert!(ctx.is_claimed("violation_vehicle_1_ID2_300x500_conf0.60.jpg"));
        assert!(!ctx.is_claimed("other.jpg"));
    }

    #[test]
    fn test_dedup_discards_second_sighting() {
        let ctx = PipelineContext::new();
        assert!(ctx.try_finalize("KA01CD5678"));
        // Same plate read from a different artifact
        assert!(!ctx.try_finalize("KA01CD5678"));
        assert_eq!(ctx.unique_plate_count(), 1);
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = PipelineContext::new();
        let b = PipelineContext::new();
        assert!(a.try_finalize("KA01CD5678"));
        assert!(b.try_finalize("KA01CD5678"));
    }

    #[test]
    fn test_concurrent_finalize_single_winner() {
        let ctx = Arc::new(PipelineContext::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || ctx.try_finalize("MH12AB1234"))
            })
            .collect();
        let winners = handles.into_iter().filter(|h| h.join().unwrap()).count();
        assert_eq!(winners, 1);
    }
}
