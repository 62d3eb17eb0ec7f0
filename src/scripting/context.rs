//! 原生调用上下文
//!
//! 每个脚本后端在一次原生调用期间提供一个 `ScriptContext`：检查参数个数、
//! 按类型取出参数、写回返回值。类型错误由上下文自行记录诊断信息，调用方
//! 只看到失败。

use super::convert::{ScriptReturn, Scriptable};
use super::types::{ValueKind, Variant};
use crate::core::ScriptError;

/// 脚本运行时与原生函数之间的适配接口
pub trait ScriptContext {
    /// 参数个数不等于 `expected` 时记录错误并返回 `false`
    fn check_num_args(&mut self, name: &str, expected: usize) -> bool;

    /// 以 `kind` 解码第 `index` 个参数（按声明顺序，从 0 开始）
    ///
    /// 先走类型列表的快速路径，其余类型经通用 `Variant` 编码。失败时
    /// 上下文负责记录包含函数名、参数位置和期望类型的错误。
    fn arg_to_native(&mut self, name: &str, index: usize, kind: &ValueKind) -> Option<Variant>;

    /// 把返回值推回脚本运行时
    fn return_from_native(&mut self, name: &str, value: Variant) -> bool;

    /// 记录第 `index` 个参数的类型错误
    fn type_error(&mut self, name: &str, index: usize, kind: &ValueKind);
}

/// 以 `T` 解码参数
pub fn decode_arg<T: Scriptable>(
    ctx: &mut dyn ScriptContext,
    name: &str,
    index: usize,
) -> Option<T> {
    let kind = T::kind();
    let value = ctx.arg_to_native(name, index, &kind)?;
    let result = T::from_variant(value);
    if result.is_none() {
        ctx.type_error(name, index, &kind);
    }
    result
}

/// 写回返回值，成功时给出返回值个数
pub fn encode_return<R: ScriptReturn>(
    ctx: &mut dyn ScriptContext,
    name: &str,
    value: R,
) -> Option<usize> {
    match value.into_return() {
        None => Some(0),
        Some(variant) => ctx.return_from_native(name, variant).then_some(1),
    }
}

/// 以 `Variant` 列表为参数的上下文
///
/// 供原生代码直接调用已注册函数，以及解释执行的 LullScript 使用。错误不在
/// 这里记录，而是保存下来交给调用方按自己的日志目标输出。
#[derive(Debug, Default)]
pub struct VariantArgs {
    args: Vec<Variant>,
    result: Variant,
    error: Option<ScriptError>,
}

impl VariantArgs {
    pub fn new(args: impl IntoIterator<Item = Variant>) -> Self {
        Self {
            args: args.into_iter().collect(),
            result: Variant::Empty,
            error: None,
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// 调用产生的第一个错误
    pub fn error(&self) -> Option<&ScriptError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<ScriptError> {
        self.error.take()
    }

    /// 取出返回值，没有返回值时为 `Variant::Empty`
    pub fn into_result(self) -> Variant {
        self.result
    }

    fn fail(&mut self, error: ScriptError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

impl ScriptContext for VariantArgs {
    fn check_num_args(&mut self, name: &str, expected: usize) -> bool {
        if self.args.len() == expected {
            return true;
        }
        self.fail(ScriptError::ArgumentCount {
            name: name.to_string(),
            expected,
            actual: self.args.len(),
        });
        false
    }

    fn arg_to_native(&mut self, name: &str, index: usize, kind: &ValueKind) -> Option<Variant> {
        let value = self.args.get_mut(index).map(std::mem::take);
        match value.and_then(|value| kind.coerce(value)) {
            Some(value) => Some(value),
            None => {
                self.type_error(name, index, kind);
                None
            }
        }
    }

    fn return_from_native(&mut self, _name: &str, value: Variant) -> bool {
        self.result = value;
        true
    }

    fn type_error(&mut self, name: &str, index: usize, kind: &ValueKind) {
        self.fail(ScriptError::ArgumentType {
            name: name.to_string(),
            index,
            type_name: kind.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_num_args() {
        let mut ctx = VariantArgs::new([Variant::Int32(1)]);
        assert!(ctx.check_num_args("f", 1));
        assert!(!ctx.check_num_args("f", 2));
        assert_eq!(
            ctx.error().map(|e| e.to_string()),
            Some("f expects 2 args, but got 1".to_string())
        );
    }

    #[test]
    fn test_decode_arg_coerces() {
        let mut ctx = VariantArgs::new([Variant::Int64(4), Variant::from("x")]);
        assert_eq!(decode_arg::<f32>(&mut ctx, "f", 0), Some(4.0));
        assert_eq!(decode_arg::<i32>(&mut ctx, "f", 1), None);
        assert_eq!(
            ctx.take_error().map(|e| e.to_string()),
            Some("f expects the type of arg 1 to be int32".to_string())
        );
    }

    #[test]
    fn test_encode_return() {
        let mut ctx = VariantArgs::default();
        assert_eq!(encode_return(&mut ctx, "f", ()), Some(0));
        assert_eq!(encode_return(&mut ctx, "f", 9u8), Some(1));
        assert_eq!(ctx.into_result(), Variant::Uint8(9));
    }
}
