//! 插件注册表
//!
//! 按注册顺序构建插件，逆序关闭。依赖必须先于依赖者注册，因此注册顺序
//! 本身就是一个合法的构建顺序。

use std::collections::HashSet;

use thiserror::Error;

use super::{EnginePlugin, PluginMetadata};
use crate::config::ConfigError;
use crate::core::{Registry, ScriptError};

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Duplicate plugin: {0}")]
    DuplicatePlugin(String),
    #[error("Missing dependency: {0} requires {1}")]
    MissingDependency(String, String),
    #[error("Plugin {0} is already built")]
    AlreadyBuilt(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Script(#[from] ScriptError),
}

pub type PluginResult<T> = Result<T, PluginError>;

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn EnginePlugin>>,
    names: HashSet<&'static str>,
    built: usize,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加插件
    pub fn add<P: EnginePlugin + 'static>(&mut self, plugin: P) -> PluginResult<()> {
        let name = plugin.name();
        if self.names.contains(name) {
            return Err(PluginError::DuplicatePlugin(name.to_string()));
        }
        if self.built > 0 {
            return Err(PluginError::AlreadyBuilt(name.to_string()));
        }
        for dep in plugin.dependencies() {
            if !self.names.contains(dep.name.as_str()) {
                return Err(PluginError::MissingDependency(name.to_string(), dep.name));
            }
        }
        self.names.insert(name);
        self.plugins.push(Box::new(plugin));
        Ok(())
    }

    /// 按注册顺序构建，遇到错误时停止，已构建的插件保持构建状态
    pub fn build_all(&mut self, registry: &Registry) -> PluginResult<()> {
        while let Some(plugin) = self.plugins.get(self.built) {
            plugin.build(registry)?;
            tracing::debug!(target: "scripting", plugin = plugin.name(), "Plugin built");
            self.built += 1;
        }
        Ok(())
    }

    /// 逆序关闭已构建的插件
    pub fn shutdown_all(&mut self, registry: &Registry) {
        for plugin in self.plugins[..self.built].iter().rev() {
            plugin.shutdown(registry);
            tracing::debug!(target: "scripting", plugin = plugin.name(), "Plugin shut down");
        }
        self.built = 0;
    }

    pub fn list_plugins(&self) -> Vec<PluginMetadata> {
        self.plugins.iter().map(|plugin| plugin.metadata()).collect()
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }
}
