//! LullScript 后端
//!
//! 一个小型的 Lisp 方言，由本模块直接解释执行。每个脚本在加载时复制一份
//! 基础环境（内置函数加上当时已注册的原生函数），之后注册的函数对已加载的
//! 脚本不可见。注销函数时不从环境中删除绑定，而是让绑定失效，已加载的
//! 脚本再调用它会得到错误。
//!
//! 脚本运行期间独占自己的环境。由它调用的原生函数可以运行或读写其他脚本，
//! 但对同一脚本的 `get_value`、`set_value`、`reload_script` 与 `run_script`
//! 都会以 "Script is already running" 失败。

mod builtins;
mod env;
mod interpreter;
mod ops;
mod parser;
mod value;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use self::env::Environment;
use self::interpreter::Interpreter;
use self::value::{LullValue, NativeBinding};
use super::call::ScriptableFn;
use super::engine::{HandleGenerator, Language, LoadFileFn, ScriptBackend};
use super::types::{ValueKind, Variant};
use crate::config::LullConfig;
use crate::core::{ScriptError, ScriptResult};

struct LullScript {
    debug_name: String,
    code: LullValue,
    env: Environment,
}

pub struct LullEngine {
    base: RefCell<Environment>,
    natives: RefCell<HashMap<String, NativeBinding>>,
    scripts: RefCell<HashMap<u64, Rc<RefCell<LullScript>>>>,
    ids: HandleGenerator,
    config: LullConfig,
}

impl LullEngine {
    pub fn new(config: &LullConfig) -> Self {
        let mut base = Environment::new();
        builtins::install(&mut base);
        tracing::debug!(
            target: "script.lull",
            max_call_depth = config.max_call_depth,
            "LullScript engine created"
        );
        Self {
            base: RefCell::new(base),
            natives: RefCell::new(HashMap::new()),
            scripts: RefCell::new(HashMap::new()),
            ids: HandleGenerator::new(),
            config: config.clone(),
        }
    }

    fn script(&self, handle: u64) -> ScriptResult<Rc<RefCell<LullScript>>> {
        self.scripts
            .borrow()
            .get(&handle)
            .cloned()
            .ok_or(ScriptError::NotFound)
    }

    fn borrow_script<'a>(
        script: &'a RefCell<LullScript>,
    ) -> ScriptResult<std::cell::RefMut<'a, LullScript>> {
        script
            .try_borrow_mut()
            .map_err(|_| ScriptError::Runtime("Script is already running".to_string()))
    }
}

impl ScriptBackend for LullEngine {
    fn language(&self) -> Language {
        Language::LullScript
    }

    fn set_load_file_function(&self, _load_file: LoadFileFn) {
        tracing::debug!(target: "script.lull", "LullScript has no include, ignoring file loader");
    }

    fn load_script(&self, code: &str, debug_name: &str) -> ScriptResult<u64> {
        let code = parser::parse(code, self.config.max_call_depth).map_err(|msg| {
            ScriptError::Compilation(format!("{}: Error loading script: {}", debug_name, msg))
        })?;
        let script = LullScript {
            debug_name: debug_name.to_string(),
            code,
            env: self.base.borrow().clone(),
        };
        let handle = self.ids.next();
        self.scripts
            .borrow_mut()
            .insert(handle, Rc::new(RefCell::new(script)));
        tracing::debug!(target: "script.lull", script = debug_name, handle, "Script loaded");
        Ok(handle)
    }

    fn reload_script(&self, handle: u64, code: &str) -> ScriptResult<()> {
        let script = self.script(handle)?;
        let mut script = Self::borrow_script(&script)?;
        let code = parser::parse(code, self.config.max_call_depth).map_err(|msg| {
            ScriptError::Compilation(format!(
                "{}: Error reloading script: {}",
                script.debug_name, msg
            ))
        })?;
        script.code = code;
        Ok(())
    }

    fn unload_script(&self, handle: u64) -> ScriptResult<()> {
        match self.scripts.borrow_mut().remove(&handle) {
            Some(_) => Ok(()),
            None => Err(ScriptError::NotFound),
        }
    }

    fn run_script(&self, handle: u64) -> ScriptResult<()> {
        // 脚本表的借用在执行前释放，原生函数可以运行其他脚本；
        // 本脚本在运行结束前保持独占借用
        let script = self.script(handle)?;
        let mut guard = Self::borrow_script(&script)?;
        let script = &mut *guard;
        let result = Interpreter::new(&mut script.env, &script.debug_name, self.config.max_call_depth)
            .run(&script.code);
        result
            .map(drop)
            .map_err(|msg| ScriptError::Runtime(format!("{}: {}", script.debug_name, msg)))
    }

    fn register_function(&self, name: &str, function: ScriptableFn) {
        let binding = NativeBinding {
            function,
            live: Rc::new(Cell::new(true)),
        };
        if let Some(old) = self
            .natives
            .borrow_mut()
            .insert(name.to_string(), binding.clone())
        {
            old.live.set(false);
        }
        self.base
            .borrow_mut()
            .define_global(name, LullValue::Native(binding));
    }

    fn unregister_function(&self, name: &str) {
        if let Some(binding) = self.natives.borrow_mut().remove(name) {
            binding.live.set(false);
        }
    }

    fn set_value(&self, handle: u64, name: &str, value: &Variant) -> ScriptResult<()> {
        let script = self.script(handle)?;
        let mut script = Self::borrow_script(&script)?;
        script
            .env
            .define_global(name, LullValue::from_variant(value.clone()));
        Ok(())
    }

    fn get_value(
        &self,
        handle: u64,
        name: &str,
        kind: &ValueKind,
    ) -> ScriptResult<Option<Variant>> {
        let script = self.script(handle)?;
        let script = script
            .try_borrow()
            .map_err(|_| ScriptError::Runtime("Script is already running".to_string()))?;
        let mismatch = || {
            ScriptError::Runtime(format!(
                "{}: Value {} is not of type {}",
                script.debug_name, name, kind
            ))
        };
        match script.env.get(name) {
            None | Some(LullValue::Nil) => Ok(match kind {
                ValueKind::Optional(_) | ValueKind::Any => Some(Variant::Empty),
                _ => None,
            }),
            Some(LullValue::Data(value)) => kind.coerce(value.clone()).map(Some).ok_or_else(mismatch),
            Some(_) => Err(mismatch()),
        }
    }

    fn total_scripts(&self) -> usize {
        self.scripts.borrow().len()
    }
}
