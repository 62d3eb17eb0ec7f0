use mlua::Value;

use super::convert::type_name;
use super::LuaShared;
use crate::core::ScriptError;
use crate::scripting::context::ScriptContext;
use crate::scripting::types::{ValueKind, Variant};

/// 一次原生调用期间的 Lua 参数与返回值
///
/// 参数位置在错误信息中从 1 开始计数，与 Lua 的习惯一致。
pub(super) struct LuaContext<'a> {
    shared: &'a LuaShared,
    args: Vec<Value>,
    returns: Vec<Value>,
    error: Option<String>,
}

impl<'a> LuaContext<'a> {
    pub(super) fn new(shared: &'a LuaShared, args: Vec<Value>) -> Self {
        Self {
            shared,
            args,
            returns: Vec::new(),
            error: None,
        }
    }

    pub(super) fn into_returns(self) -> Vec<Value> {
        self.returns
    }

    pub(super) fn into_error(self, name: &str) -> String {
        self.error
            .unwrap_or_else(|| format!("Error calling {}", name))
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }
}

impl ScriptContext for LuaContext<'_> {
    fn check_num_args(&mut self, name: &str, expected: usize) -> bool {
        if self.args.len() == expected {
            return true;
        }
        let error = ScriptError::ArgumentCount {
            name: name.to_string(),
            expected,
            actual: self.args.len(),
        };
        self.fail(error.to_string());
        false
    }

    fn arg_to_native(&mut self, name: &str, index: usize, kind: &ValueKind) -> Option<Variant> {
        let decoded = self
            .args
            .get(index)
            .and_then(|value| self.shared.from_lua(value, kind));
        if decoded.is_none() {
            self.type_error(name, index, kind);
        }
        decoded
    }

    fn return_from_native(&mut self, name: &str, value: Variant) -> bool {
        match self.shared.to_lua(&value) {
            Ok(value) => {
                self.returns.push(value);
                true
            }
            Err(err) => {
                self.fail(format!("{}: {}", name, super::describe_error(&err)));
                false
            }
        }
    }

    fn type_error(&mut self, name: &str, index: usize, kind: &ValueKind) {
        let error = ScriptError::ArgumentType {
            name: name.to_string(),
            index: index + 1,
            type_name: type_name(kind),
        };
        self.fail(error.to_string());
    }
}
