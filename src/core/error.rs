//! 统一错误处理模块
//!
//! 脚本层的错误不会越过脚本与原生代码的边界：后端内部以 `ScriptResult`
//! 传播错误，门面 (`ScriptEngine`) 在边界处将其记录为日志并返回哨兵值。

use thiserror::Error;

use crate::scripting::engine::Language;

/// 脚本系统错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("{0}")]
    Compilation(String),

    #[error("{0}")]
    Runtime(String),

    #[error("Script not found")]
    NotFound,

    #[error("Invalid script binding: {0}")]
    InvalidBinding(String),

    #[error("Language not supported: {0:?}")]
    UnsupportedLanguage(Language),

    #[error("Couldn't find file: {0}")]
    LoadFile(String),

    #[error("{name} expects {expected} args, but got {actual}")]
    ArgumentCount {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("{name} expects the type of arg {index} to be {type_name}")]
    ArgumentType {
        name: String,
        index: usize,
        type_name: String,
    },
}

impl ScriptError {
    /// 将错误附加到脚本调试名之后，格式为 `<debug_name>: <message>`
    pub fn in_script(&self, debug_name: &str) -> String {
        format!("{}: {}", debug_name, self)
    }
}

/// 脚本结果类型别名
pub type ScriptResult<T> = Result<T, ScriptError>;
