use rquickjs::{Ctx, Value};

use super::convert::type_name;
use super::{describe_error, JsShared};
use crate::core::ScriptError;
use crate::scripting::context::ScriptContext;
use crate::scripting::types::{ValueKind, Variant};

/// 一次原生调用期间的 JavaScript 参数与返回值
///
/// 参数位置从 0 开始计数，与 `arguments[i]` 一致。
pub(super) struct JsContext<'a, 'js> {
    shared: &'a JsShared,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
    ret: Option<Value<'js>>,
    error: Option<String>,
}

impl<'a, 'js> JsContext<'a, 'js> {
    pub(super) fn new(shared: &'a JsShared, ctx: Ctx<'js>, args: Vec<Value<'js>>) -> Self {
        Self {
            shared,
            ctx,
            args,
            ret: None,
            error: None,
        }
    }

    pub(super) fn into_return(self) -> Value<'js> {
        self.ret
            .unwrap_or_else(|| Value::new_undefined(self.ctx.clone()))
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

impl ScriptContext for JsContext<'_, '_> {
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
            .and_then(|value| self.shared.from_js(&self.ctx, value, kind));
        if decoded.is_none() {
            self.type_error(name, index, kind);
        }
        decoded
    }

    fn return_from_native(&mut self, name: &str, value: Variant) -> bool {
        match self.shared.to_js(&self.ctx, &value) {
            Ok(value) => {
                self.ret = Some(value);
                true
            }
            Err(err) => {
                let message = describe_error(&self.ctx, err);
                self.fail(format!("{}: {}", name, message));
                false
            }
        }
    }

    fn type_error(&mut self, name: &str, index: usize, kind: &ValueKind) {
        let error = ScriptError::ArgumentType {
            name: name.to_string(),
            index,
            type_name: type_name(kind),
        };
        self.fail(error.to_string());
    }
}
