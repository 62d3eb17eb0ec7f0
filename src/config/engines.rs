//! 各脚本后端的配置

use serde::{Deserialize, Serialize};
use super::{ConfigResult, ConfigError};

/// JavaScript 后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JavaScriptConfig {
    /// 每次运行脚本后触发垃圾回收
    pub gc_after_run: bool,

    /// 运行时内存上限（字节），0 表示不限制
    pub memory_limit: usize,

    /// 预先创建的备用上下文数量
    ///
    /// 运行时加锁期间无法新建上下文，嵌套的 `include` 从备用池中取用。
    pub spare_contexts: usize,
}

impl Default for JavaScriptConfig {
    fn default() -> Self {
        Self {
            gc_after_run: true,
            memory_limit: 0,
            spare_contexts: 2,
        }
    }
}

impl JavaScriptConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.memory_limit != 0 && self.memory_limit < 1024 * 1024 {
            return Err(ConfigError::ValidationError(
                "JavaScript memory limit must be at least 1 MiB".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lua 后端配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LuaConfig {
    /// 只加载 table/string/math/utf8 标准库
    pub sandboxed: bool,
}

/// LullScript 后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LullConfig {
    /// 函数调用的最大嵌套深度
    pub max_call_depth: usize,
}

impl Default for LullConfig {
    fn default() -> Self {
        Self { max_call_depth: 256 }
    }
}

impl LullConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_call_depth == 0 {
            return Err(ConfigError::ValidationError(
                "LullScript call depth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
