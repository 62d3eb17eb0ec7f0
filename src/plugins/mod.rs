//! 插件系统
//!
//! `ScriptApp` 持有一个 `Registry` 和一组插件，按注册顺序构建插件、逆序
//! 关闭。脚本系统本身由 `ScriptingPlugin` 装配。

pub mod registry;
pub mod scripting;

pub use registry::{PluginError, PluginRegistry, PluginResult};
pub use scripting::ScriptingPlugin;

use crate::core::Registry;

/// 插件版本信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl PluginVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

/// 插件依赖信息
#[derive(Debug, Clone)]
pub struct PluginDependency {
    pub name: String,
}

impl PluginDependency {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// 插件元数据
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub name: String,
    pub version: PluginVersion,
    pub description: String,
    pub dependencies: Vec<PluginDependency>,
}

/// 引擎插件
pub trait EnginePlugin {
    /// 插件名称
    fn name(&self) -> &'static str;

    fn version(&self) -> PluginVersion {
        PluginVersion::new(1, 0, 0)
    }

    fn description(&self) -> &'static str {
        ""
    }

    /// 必须先于本插件注册的插件
    fn dependencies(&self) -> Vec<PluginDependency> {
        Vec::new()
    }

    /// 构建阶段：向注册表中创建单例
    fn build(&self, registry: &Registry) -> PluginResult<()>;

    /// 关闭阶段：移除 `build` 创建的单例
    fn shutdown(&self, _registry: &Registry) {}

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: self.name().to_string(),
            version: self.version(),
            description: self.description().to_string(),
            dependencies: self.dependencies(),
        }
    }
}

/// 驱动插件生命周期的应用
#[derive(Default)]
pub struct ScriptApp {
    registry: Registry,
    plugins: PluginRegistry,
}

impl ScriptApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 添加插件
    pub fn add_plugin<P: EnginePlugin + 'static>(&mut self, plugin: P) -> PluginResult<&mut Self> {
        self.plugins.add(plugin)?;
        Ok(self)
    }

    /// 构建所有插件
    pub fn build(&mut self) -> PluginResult<&mut Self> {
        self.plugins.build_all(&self.registry)?;
        Ok(self)
    }

    /// 关闭所有插件
    pub fn shutdown(&mut self) {
        self.plugins.shutdown_all(&self.registry);
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }
}

impl Drop for ScriptApp {
    fn drop(&mut self) {
        self.shutdown();
    }
}
