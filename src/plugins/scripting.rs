//! 脚本插件
//!
//! 按配置安装各语言后端，并把 `ScriptEngine` 与 `FunctionBinder` 放进注册表。

use std::fs;
use std::rc::Rc;

use super::{EnginePlugin, PluginResult, PluginVersion};
use crate::bindings::FunctionBinder;
use crate::config::ScriptingConfig;
use crate::core::{init_logging, Registry};
use crate::scripting::{JsEngine, Language, LuaEngine, LullEngine, ScriptEngine};

pub struct ScriptingPlugin {
    config: ScriptingConfig,
}

impl ScriptingPlugin {
    /// 使用 `ScriptingConfig::load_or_default` 的结果创建插件
    pub fn new() -> Self {
        Self::with_config(ScriptingConfig::load_or_default())
    }

    pub fn with_config(config: ScriptingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScriptingConfig {
        &self.config
    }

    fn install_backends(&self, engine: &ScriptEngine) -> PluginResult<()> {
        for language in &self.config.languages {
            match language {
                Language::Lua => engine.install(Rc::new(LuaEngine::new(&self.config.lua)?)),
                Language::JavaScript => {
                    engine.install(Rc::new(JsEngine::new(&self.config.javascript)?))
                }
                Language::LullScript => engine.install(Rc::new(LullEngine::new(&self.config.lull))),
                Language::Unknown => {
                    tracing::warn!(target: "scripting", "Skipping unknown script language");
                }
            }
        }
        Ok(())
    }
}

impl Default for ScriptingPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl EnginePlugin for ScriptingPlugin {
    fn name(&self) -> &'static str {
        "scripting"
    }

    fn version(&self) -> PluginVersion {
        PluginVersion::new(0, 1, 0)
    }

    fn description(&self) -> &'static str {
        "Lua, JavaScript and LullScript backends with a shared native function registry"
    }

    fn build(&self, registry: &Registry) -> PluginResult<()> {
        self.config.validate()?;
        init_logging(&self.config.logging);

        let engine = ScriptEngine::new();
        self.install_backends(&engine)?;

        let config = self.config.clone();
        engine.set_load_file_function(move |filename| {
            let path = config.resolve_path(filename);
            match fs::read_to_string(&path) {
                Ok(code) => Some(code),
                Err(err) => {
                    tracing::debug!(
                        target: "scripting",
                        path = %path.display(),
                        "Failed to read script: {}",
                        err
                    );
                    None
                }
            }
        });

        registry.create(engine);
        registry.create(FunctionBinder::new(registry));
        tracing::info!(
            target: "scripting",
            languages = ?self.config.languages,
            "Scripting initialized"
        );
        Ok(())
    }

    fn shutdown(&self, registry: &Registry) {
        // 绑定器析构时要从引擎注销函数，所以先于引擎移除
        drop(registry.remove::<FunctionBinder>());
        drop(registry.remove::<ScriptEngine>());
    }
}
