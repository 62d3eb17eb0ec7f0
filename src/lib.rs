//! # Lull Scripting
//!
//! Cross-language native function marshalling for Lua, JavaScript and LullScript.
//!
//! ## Features
//!
//! - **Register once**: a strongly-typed Rust closure becomes callable from every installed backend
//! - **Lua**: embedded via `mlua`
//! - **JavaScript**: embedded via `rquickjs`
//! - **LullScript**: a small s-expression language interpreted in-crate
//! - **FunctionBinder**: call registered functions by name from native code
//!
//! ## Architecture Design
//!
//! 原生函数与脚本之间只通过两样东西交流：
//! - **Variant**: 可脚本化值的动态表示
//! - **ScriptContext**: 每种语言各自实现的参数读取与返回值写入
//!
//! `ScriptEngine` 是各后端的门面，`Registry` 以单例形式保存引擎与绑定器。
//!
//! ### Example
//!
//! ```ignore
//! use lull_scripting::{Language, ScriptEngine, ScriptApp, ScriptingPlugin};
//!
//! let mut app = ScriptApp::new();
//! app.add_plugin(ScriptingPlugin::new())?.build()?;
//!
//! let engine = app.registry().get::<ScriptEngine>().unwrap();
//! engine.register_function("add", |a: i32, b: i32| a + b);
//! let id = engine.load_inline_script("x = add(1, 2)", "inline", Language::Lua);
//! engine.run_script(id);
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Errors, logging and the singleton registry
//! - [`config`]: TOML/JSON configuration
//! - [`scripting`]: Variants, contexts and the language backends
//! - [`bindings`]: The function binder
//! - [`plugins`]: Plugin lifecycle and the scripting plugin

/// Errors, logging and the singleton registry
pub mod core;
/// Configuration system
pub mod config;
/// Scripting system with Lua, JavaScript and LullScript backends
pub mod scripting;
/// Native function bindings callable by name
pub mod bindings;
/// Plugin lifecycle
pub mod plugins;

pub use bindings::{FunctionBinder, InstanceMethod};
pub use config::{ConfigError, LogLevel, LoggingConfig, ScriptingConfig};
pub use core::{Registry, ScriptError, ScriptResult, WeakRegistry};
pub use plugins::{EnginePlugin, PluginError, ScriptApp, ScriptingPlugin};
pub use scripting::{
    EventHandler, EventWrapper, HashValue, Language, ScriptBackend, ScriptEngine, ScriptId,
    ValueKind, Variant, VariantArray, VariantMap,
};
