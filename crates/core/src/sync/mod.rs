pub mod checksum;
pub mod conflict;
pub mod loop_detector;

pub use checksum::payload_checksum;
pub use conflict::{ConflictResolver, SyncDecision, Winner};
pub use loop_detector::{EntityMappingStore, LoopDetector, DEFAULT_LOOP_WINDOW_SECS};
