//! 原生函数绑定层
//!
//! `FunctionBinder` 把原生函数注册一次，之后既可以由脚本调用，也可以由
//! 原生代码按名字直接调用。

pub mod function_binder;

pub use function_binder::{FunctionBinder, InstanceMethod};
