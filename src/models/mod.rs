mod mission;
mod recovery;
mod sample;
mod sync_item;

pub use mission::{Mission, MissionInfo, MissionStats};
pub use recovery::RecoverySnapshot;
pub use sample::{GeoFix, ParticulateReadings, Sample, DUPLICATE_WINDOW_MS};
pub use sync_item::{SyncItem, SyncItemKind, SyncItemState};
