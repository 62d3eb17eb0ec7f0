/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量和运行时动态调整
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod engines;

pub use engines::{JavaScriptConfig, LuaConfig, LullConfig};

use crate::scripting::engine::Language;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 脚本系统主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// 需要安装的脚本后端
    #[serde(default = "default_languages")]
    pub languages: Vec<Language>,

    /// 相对脚本路径的根目录
    #[serde(default)]
    pub script_root: Option<PathBuf>,

    #[serde(default)]
    pub javascript: JavaScriptConfig,

    #[serde(default)]
    pub lua: LuaConfig,

    #[serde(default)]
    pub lull: LullConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_languages() -> Vec<Language> {
    vec![Language::Lua, Language::JavaScript, Language::LullScript]
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            script_root: None,
            javascript: JavaScriptConfig::default(),
            lua: LuaConfig::default(),
            lull: LullConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ScriptingConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("LULL_SCRIPT_ROOT") {
            if !val.is_empty() {
                self.script_root = Some(PathBuf::from(val));
            }
        }
        if let Ok(val) = env::var("LULL_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }
        if let Ok(val) = env::var("LULL_JS_GC_AFTER_RUN") {
            self.javascript.gc_after_run = val.parse().unwrap_or(self.javascript.gc_after_run);
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.languages.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one script language must be enabled".to_string(),
            ));
        }
        if self.languages.contains(&Language::Unknown) {
            return Err(ConfigError::ValidationError(
                "Unknown is not an installable language".to_string(),
            ));
        }
        self.javascript.validate()?;
        self.lull.validate()?;
        Ok(())
    }

    /// 将相对路径解析到 `script_root` 下
    pub fn resolve_path(&self, filename: &str) -> PathBuf {
        let path = Path::new(filename);
        match &self.script_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./scripting.toml
    /// 2. 使用默认配置
    ///
    /// 最后应用环境变量覆盖。
    pub fn load_or_default() -> Self {
        let mut config = match Self::from_toml_file("scripting.toml") {
            Ok(config) => {
                tracing::debug!(target: "scripting", "Loaded config from scripting.toml");
                config
            }
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        config
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

use crate::impl_default;

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_console: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}
