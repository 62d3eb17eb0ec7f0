//! LullScript 求值器

use std::rc::Rc;

use super::env::Environment;
use super::value::{Lambda, LullResult, LullValue, NativeBinding};
use crate::scripting::context::VariantArgs;
use crate::scripting::types::{Variant, VariantArray, VariantMap};

/// 函数与宏的参数上限
pub const MAX_ARGS: usize = 16;

pub(crate) fn check_arity(params: usize, args: usize) -> LullResult<()> {
    if params.min(args) > MAX_ARGS {
        Err(format!("Too many arguments, limit of {}.", MAX_ARGS))
    } else if args > params {
        Err("Too many arguments.".to_string())
    } else if params > args {
        Err("Too few arguments.".to_string())
    } else {
        Ok(())
    }
}

/// 在一个脚本环境上求值
pub struct Interpreter<'a> {
    env: &'a mut Environment,
    script: &'a str,
    depth: usize,
    max_depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(env: &'a mut Environment, script: &'a str, max_depth: usize) -> Self {
        Self {
            env,
            script,
            depth: 0,
            max_depth,
        }
    }

    pub fn env(&mut self) -> &mut Environment {
        self.env
    }

    /// 当前脚本的调试名
    pub fn script(&self) -> &str {
        self.script
    }

    /// 执行脚本顶层表达式
    pub fn run(&mut self, code: &LullValue) -> LullResult<LullValue> {
        match self.eval(code)? {
            LullValue::Return(value) => Ok(*value),
            value => Ok(value),
        }
    }

    fn nested<R>(&mut self, f: impl FnOnce(&mut Self) -> LullResult<R>) -> LullResult<R> {
        if self.depth >= self.max_depth {
            return Err(format!("Maximum call depth of {} exceeded.", self.max_depth));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    pub fn eval(&mut self, value: &LullValue) -> LullResult<LullValue> {
        match value {
            // 宏参数绑定的是语法树，取值时再求值一次
            LullValue::Symbol(name) => match self.env.get(name).cloned() {
                Some(bound) => self.nested(|this| this.eval(&bound)),
                None => Ok(LullValue::Nil),
            },
            LullValue::List(items) => match items.split_first() {
                Some((head, args)) => self.nested(|this| this.call(head, args)),
                None => Ok(LullValue::Nil),
            },
            LullValue::ArrayLiteral(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval_data(item))
                    .collect::<LullResult<VariantArray>>()?;
                Ok(LullValue::Data(Variant::Array(values)))
            }
            LullValue::MapLiteral(entries) => {
                let mut map = VariantMap::new();
                for (key, value) in entries.iter() {
                    let key = self.map_key(key)?;
                    let value = self.eval_data(value)?;
                    map.insert(key, value);
                }
                Ok(LullValue::Data(Variant::Map(map)))
            }
            other => Ok(other.clone()),
        }
    }

    /// 求值并要求得到数据值
    pub fn eval_data(&mut self, value: &LullValue) -> LullResult<Variant> {
        let result = self.eval(value)?;
        result
            .to_variant()
            .ok_or_else(|| format!("Expected a value but got a {}.", result.type_name()))
    }

    /// 映射字面量的键：符号按字面使用，其余表达式须求值为字符串
    fn map_key(&mut self, key: &LullValue) -> LullResult<String> {
        if let Some(name) = key.as_symbol() {
            return Ok(name.to_string());
        }
        match self.eval_data(key)? {
            Variant::String(key) => Ok(key),
            other => Err(format!("Map keys must be strings or symbols, got {}.", other)),
        }
    }

    pub fn call(&mut self, head: &LullValue, args: &[LullValue]) -> LullResult<LullValue> {
        let callee = match head {
            LullValue::Symbol(name) => {
                let bound = self
                    .env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("Unknown function: {}", name))?;
                match bound {
                    LullValue::Symbol(_) | LullValue::List(_) => self.eval(&bound)?,
                    bound => bound,
                }
            }
            LullValue::List(_) => self.eval(head)?,
            other => other.clone(),
        };
        match callee {
            LullValue::Builtin(builtin) => (builtin.call)(self, args),
            LullValue::Native(native) => self.call_native(&native, args),
            LullValue::Lambda(lambda) => self.call_lambda(&lambda, args),
            LullValue::Macro(lambda) => self.expand_macro(&lambda, args),
            _ => Err("Expected callable type.".to_string()),
        }
    }

    /// 依次求值，遇到 `return` 时提前结束
    pub fn do_block(&mut self, body: &[LullValue]) -> LullResult<LullValue> {
        let mut result = LullValue::Nil;
        for expr in body {
            match self.eval(expr)? {
                LullValue::Return(value) => return Ok(*value),
                value => result = value,
            }
        }
        Ok(result)
    }

    fn call_native(&mut self, native: &NativeBinding, args: &[LullValue]) -> LullResult<LullValue> {
        let name = native.function.name();
        if !native.live.get() {
            return Err(format!("Tried to call an unregistered function: {}", name));
        }
        let values = args
            .iter()
            .map(|arg| self.eval_data(arg))
            .collect::<LullResult<Vec<_>>>()?;
        let mut call = VariantArgs::new(values);
        match native.function.invoke(&mut call) {
            Some(_) => Ok(LullValue::from_variant(call.into_result())),
            None => Err(call
                .take_error()
                .map(|err| err.to_string())
                .unwrap_or_else(|| format!("Error calling {}", name))),
        }
    }

    fn call_lambda(&mut self, lambda: &Rc<Lambda>, args: &[LullValue]) -> LullResult<LullValue> {
        check_arity(lambda.params.len(), args.len())?;
        let values = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<LullResult<Vec<_>>>()?;
        self.env.push_scope();
        for (param, value) in lambda.params.iter().zip(values) {
            self.env.define(param, value);
        }
        let result = self.do_block(&lambda.body);
        self.env.pop_scope();
        result
    }

    /// 宏参数不求值，直接绑定到当前作用域
    fn expand_macro(&mut self, lambda: &Rc<Lambda>, args: &[LullValue]) -> LullResult<LullValue> {
        check_arity(lambda.params.len(), args.len())?;
        for (param, arg) in lambda.params.iter().zip(args) {
            self.env.define(param, arg.clone());
        }
        self.do_block(&lambda.body)
    }
}
