//! 脚本系统
//!
//! 原生函数以强类型闭包的形式注册一次，由 `ScriptEngine` 投射到 Lua、
//! JavaScript 与 LullScript 三个后端。参数与返回值经由 `Variant` 和
//! `ScriptContext` 在各语言的值表示之间转换。
//!
//! - `types` - 可脚本化类型与 `Variant`
//! - `convert` - Rust 类型与 `Variant` 之间的桥接
//! - `context` - 调用上下文 (`ScriptContext`)
//! - `call` - 原生函数的类型擦除与调用
//! - `engine` - 后端接口与多语言门面

pub mod call;
pub mod context;
pub mod convert;
pub mod engine;
pub mod javascript;
pub mod lua;
pub mod lull;
pub mod types;

pub use call::{call_native_function, NativeFunction, ScriptableFn};
pub use context::{decode_arg, encode_return, ScriptContext, VariantArgs};
pub use convert::{variant_array, ScriptReturn, Scriptable};
pub use engine::{HandleGenerator, Language, LoadFileFn, ScriptBackend, ScriptEngine, ScriptId};
pub use javascript::JsEngine;
pub use lua::LuaEngine;
pub use lull::LullEngine;
pub use types::{
    hash, EventHandler, EventWrapper, HashValue, ValueKind, Variant, VariantArray, VariantMap,
    SCRIPTABLE_TYPES,
};
