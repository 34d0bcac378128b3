//! 内存存储实现模块
//!
//! 包含以下实现：
//! - DeviceStateStore: InMemoryDeviceStateStore
//! - RoutingStore: InMemoryRoutingStore
//! - TableSource: StaticTableSource（测试与演示用）

pub mod device_state;
pub mod routing;
pub mod source;

pub use device_state::*;
pub use routing::*;
pub use source::*;
