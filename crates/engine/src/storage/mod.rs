/// 卷驱动
/// 
/// 驱动抽象、内置 local 驱动与驱动注册表

pub mod driver;
pub mod local;
pub mod manager;

pub use driver::VolumeDriver;
pub use local::LocalDriver;
pub use manager::{DriverHandle, DriverRegistry};
