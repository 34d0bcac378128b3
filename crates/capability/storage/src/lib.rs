//! # Wavy Storage 模块
//!
//! 聚合器的配置/状态存储：设备状态表与路由表。
//!
//! ## 架构设计
//!
//! 1. **接口抽象层** (`traits.rs`)：`DeviceStateStore`、`RoutingStore`、`TableSource`
//! 2. **数据模型层** (`models.rs`)：`DeviceRecord`、`RoutingRule`
//! 3. **错误处理层** (`error.rs`)：统一的存储错误类型
//! 4. **实现层**：
//!    - `in_memory/`：`RwLock<HashMap>` 实现的两张表，以及测试用的静态外部源
//!    - `csv_source`：`waves.csv` / `routing.csv` 外部源（读取、设备表回写）
//! 5. **门面** (`registry.rs`)：`StateRegistry`，读、单点更新（写穿）与整体重载
//!
//! ## 约束
//!
//! - 调用方只通过 `StateRegistry` 访问表，不直接接触底层容器
//! - 单条记录整体替换，读者不会看到写了一半的记录
//! - 路由规则按 `(device_id, metric_type)` 精确匹配，没有通配与回退
//! - 外部源缺失或不可读时以空表启动，由上层的"未找到"分支统一拒绝

pub mod csv_source;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod registry;
pub mod traits;

pub use csv_source::CsvTableSource;
pub use error::*;
pub use in_memory::{InMemoryDeviceStateStore, InMemoryRoutingStore, StaticTableSource};
pub use models::*;
pub use registry::{LoadSummary, SetStateOutcome, StateRegistry};
pub use traits::*;
