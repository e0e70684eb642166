/// 卷管理
/// 
/// 卷注册表、持久化、名称锁、事件输出与对外的卷管理器

pub mod events;
pub mod locker;
pub mod manager;
pub mod registry;
pub mod store;


pub use events::{DriverCounters, EventSink};
pub use manager::{CreateOptions, PruneReport, RestoreReport, VolumeList, VolumeManager};
pub use registry::{VolumeEntry, VolumeRegistry};
pub use store::VolumeStore;
