//! 核心模块
//!
//! 包含脚本层的基础设施：
//! - `error` - 错误类型定义
//! - `registry` - 基于 `bevy_ecs::World` 的单例注册表
//! - `logging` - 日志初始化

pub mod error;
pub mod logging;
pub mod registry;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{ScriptError, ScriptResult};

pub use logging::init_logging;
pub use registry::{Registry, WeakRegistry};
