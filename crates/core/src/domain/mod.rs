pub mod mapping;
pub mod system;

pub use mapping::{EntityMapping, EntityMappingId, MappingKey, SyncRecord};
pub use system::SystemType;
