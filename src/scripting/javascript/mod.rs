//! JavaScript 脚本后端 (rquickjs)
//!
//! 所有脚本共享一个 QuickJS 运行时，每个脚本拥有自己的上下文（全局对象），
//! 脚本之间互不共享全局变量。每次进入运行时都经过 [`ContextLocker`]：
//! 原生函数或事件回调可能在脚本执行期间重新进入另一个上下文。
//!
//! 运行时加锁期间不能创建新上下文，因此预先保留少量备用上下文供嵌套的
//! `include` 与加载使用，并在回到最外层时补足。

mod context;
mod convert;
mod locker;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Exception, Function, Object, Persistent, Runtime, Value};

pub use convert::type_name;

use self::context::JsContext;
use self::locker::{ContextLocker, RawContext};
use super::call::ScriptableFn;
use super::engine::{HandleGenerator, Language, LoadFileFn, ScriptBackend};
use super::types::{hash, EventHandler, EventWrapper, ValueKind, Variant};
use crate::config::JavaScriptConfig;
use crate::core::{ScriptError, ScriptResult};

/// 取出待处理的异常并格式化为 `Name: message`
pub(crate) fn describe_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }
    let value = ctx.catch();
    if let Some(exception) = value.as_exception() {
        let message = exception.message().unwrap_or_default();
        return match exception.get::<_, Option<String>>("name") {
            Ok(Some(name)) => format!("{}: {}", name, message),
            _ => message,
        };
    }
    value
        .get::<Coerced<String>>()
        .map(|text| text.0)
        .unwrap_or_else(|_| "Unknown exception".to_string())
}

/// 用 `Function` 构造器检查语法，不执行代码
fn check_syntax(ctx: &Ctx<'_>, code: &str) -> rquickjs::Result<()> {
    let constructor: Function = ctx.globals().get("Function")?;
    constructor.call::<_, Value>((code,)).map(|_| ())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn lookup_global<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Value<'js>> {
    let value: Value = ctx.globals().get(name)?;
    // 顶层的 let/const 绑定不在全局对象上
    if value.is_undefined() && is_identifier(name) {
        return ctx.eval(format!(
            "typeof {0} !== 'undefined' ? {0} : undefined",
            name
        ));
    }
    Ok(value)
}

fn context_key(raw: RawContext) -> usize {
    raw.as_ptr() as usize
}

fn console_function<'js>(
    ctx: &Ctx<'js>,
    script: &str,
    log: fn(&str, &str),
) -> rquickjs::Result<Function<'js>> {
    let script = script.to_string();
    Function::new(ctx.clone(), move |args: Rest<Coerced<String>>| {
        let parts: Vec<String> = args.0.into_iter().map(|arg| arg.0).collect();
        log(&script, &parts.join(" "));
    })
}

struct JsScript {
    debug_name: String,
    source: String,
    context: Context,
    raw: RawContext,
}

/// 事件回调被丢弃时释放对应的 JS 函数
struct CallbackGuard {
    shared: Weak<JsShared>,
    id: u64,
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.callbacks.borrow_mut().remove(&self.id);
        }
    }
}

/// JavaScript 后端的共享状态
///
/// 持久化的 JS 值必须先于运行时释放，`runtime` 因此放在最后。
pub(crate) struct JsShared {
    this: Weak<JsShared>,
    included: RefCell<HashMap<String, Persistent<Object<'static>>>>,
    callbacks: RefCell<HashMap<u64, Persistent<Function<'static>>>>,
    scripts: RefCell<HashMap<u64, JsScript>>,
    functions: RefCell<HashMap<String, ScriptableFn>>,
    load_file: RefCell<Option<LoadFileFn>>,
    ids: HandleGenerator,
    callback_ids: HandleGenerator,
    /// 本后端创建的所有存活上下文，以原始指针地址为键
    contexts: RefCell<HashMap<usize, Context>>,
    spare: RefCell<Vec<(Context, RawContext)>>,
    /// 加锁期间卸载的上下文，回到最外层再释放
    retired: RefCell<Vec<Context>>,
    locker: ContextLocker,
    config: JavaScriptConfig,
    runtime: Runtime,
}

/// JavaScript 脚本引擎
pub struct JsEngine {
    shared: Rc<JsShared>,
}

impl JsEngine {
    pub fn new(config: &JavaScriptConfig) -> ScriptResult<Self> {
        let runtime = Runtime::new().map_err(|err| {
            ScriptError::Runtime(format!("Failed to initialize JavaScript: {}", err))
        })?;
        if config.memory_limit > 0 {
            runtime.set_memory_limit(config.memory_limit);
        }
        let shared = Rc::new_cyclic(|this| JsShared {
            this: this.clone(),
            included: RefCell::new(HashMap::new()),
            callbacks: RefCell::new(HashMap::new()),
            scripts: RefCell::new(HashMap::new()),
            functions: RefCell::new(HashMap::new()),
            load_file: RefCell::new(None),
            ids: HandleGenerator::new(),
            callback_ids: HandleGenerator::new(),
            contexts: RefCell::new(HashMap::new()),
            spare: RefCell::new(Vec::new()),
            retired: RefCell::new(Vec::new()),
            locker: ContextLocker::default(),
            config: config.clone(),
            runtime,
        });
        shared.settle();
        tracing::debug!(
            target: "script.js",
            memory_limit = config.memory_limit,
            spare_contexts = config.spare_contexts,
            "JavaScript engine created"
        );
        Ok(Self { shared })
    }

    /// 在一个临时上下文中执行 `f`
    #[cfg(test)]
    pub(crate) fn with_scratch<R>(&self, f: impl for<'js> FnOnce(&JsShared, Ctx<'js>) -> R) -> R {
        let shared = &self.shared;
        let (context, raw) = shared.create_context().unwrap();
        shared.locker.enter(&context, raw, |ctx| f(shared, ctx))
    }
}

impl JsShared {
    fn create_context(&self) -> ScriptResult<(Context, RawContext)> {
        let context = Context::full(&self.runtime).map_err(|err| {
            ScriptError::Runtime(format!("Failed to create JavaScript context: {}", err))
        })?;
        let raw = context.with(|ctx| ctx.as_raw());
        self.contexts
            .borrow_mut()
            .insert(context_key(raw), context.clone());
        Ok((context, raw))
    }

    /// 运行时加锁时从备用池中取上下文
    fn new_context(&self) -> ScriptResult<(Context, RawContext)> {
        if !self.locker.is_locked() {
            return self.create_context();
        }
        self.spare.borrow_mut().pop().ok_or_else(|| {
            ScriptError::Runtime("No spare JavaScript context available".to_string())
        })
    }

    /// 上下文的最后一个引用必须在运行时解锁后释放
    fn retire_context(&self, context: Context, raw: RawContext) {
        let mut retired = self.retired.borrow_mut();
        if let Some(registered) = self.contexts.borrow_mut().remove(&context_key(raw)) {
            retired.push(registered);
        }
        retired.push(context);
    }

    /// 回到最外层后释放退役的上下文并补足备用池
    fn settle(&self) {
        if self.locker.is_locked() {
            return;
        }
        let retired = std::mem::take(&mut *self.retired.borrow_mut());
        drop(retired);
        while self.spare.borrow().len() < self.config.spare_contexts {
            match self.create_context() {
                Ok(spare) => self.spare.borrow_mut().push(spare),
                Err(err) => {
                    tracing::warn!(target: "script.js", "{}", err);
                    break;
                }
            }
        }
    }

    /// 安装内置对象与已注册的原生函数
    fn install_globals(&self, ctx: &Ctx<'_>, debug_name: &str) -> rquickjs::Result<()> {
        let globals = ctx.globals();
        let console = Object::new(ctx.clone())?;
        console.set(
            "log",
            console_function(ctx, debug_name, |script, text| {
                tracing::info!(target: "script.js", script = %script, "{}", text)
            })?,
        )?;
        console.set(
            "debug",
            console_function(ctx, debug_name, |script, text| {
                tracing::debug!(target: "script.js", script = %script, "{}", text)
            })?,
        )?;
        console.set(
            "error",
            console_function(ctx, debug_name, |script, text| {
                tracing::error!(target: "script.js", script = %script, "{}", text)
            })?,
        )?;
        globals.set("console", console)?;
        globals.set("include", self.include_function(ctx)?)?;
        globals.set(
            "hash",
            Function::new(ctx.clone(), |name: String| f64::from(hash(&name)))?,
        )?;

        let names: Vec<String> = self.functions.borrow().keys().cloned().collect();
        for name in names {
            self.bind_function(ctx, &name, debug_name)?;
        }
        Ok(())
    }

    /// 把原生函数写入全局对象，点号分隔的名字展开为嵌套对象
    fn bind_function<'js>(
        &self,
        ctx: &Ctx<'js>,
        name: &str,
        debug_name: &str,
    ) -> rquickjs::Result<()> {
        let mut segments: Vec<&str> = name.split('.').collect();
        let last = segments.pop().unwrap_or(name);
        let mut object = ctx.globals();
        for segment in segments {
            let existing: Value = object.get(segment)?;
            object = match existing.into_object() {
                Some(child) => child,
                None => {
                    let child = Object::new(ctx.clone())?;
                    object.set(segment, child.clone())?;
                    child
                }
            };
        }
        object.set(last, self.trampoline(ctx, name, debug_name)?)
    }

    /// 调用时才按名字查找原生函数，注销后调用抛出 ReferenceError
    ///
    /// 参数个数或类型不符时不抛出异常：记录错误，返回 `undefined`，脚本继续执行。
    fn trampoline<'js>(
        &self,
        ctx: &Ctx<'js>,
        name: &str,
        debug_name: &str,
    ) -> rquickjs::Result<Function<'js>> {
        let shared = self.this.clone();
        let name = name.to_string();
        let script = debug_name.to_string();
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                let Some(shared) = shared.upgrade() else {
                    return Err(Exception::throw_reference(&ctx, &format!("{} is not defined", name)));
                };
                let function = shared.functions.borrow().get(&name).cloned();
                let Some(function) = function else {
                    return Err(Exception::throw_reference(&ctx, &format!("{} is not defined", name)));
                };
                let mut call = JsContext::new(&shared, ctx.clone(), args.0);
                match function.invoke(&mut call) {
                    Some(_) => Ok(call.into_return()),
                    None => {
                        let message = call.into_error(&name);
                        tracing::error!(target: "script.js", "{}: {}", script, message);
                        Ok(Value::new_undefined(ctx))
                    }
                }
            },
        )
    }

    /// `include(filename)`：加载并缓存另一个脚本，返回其全局对象
    fn include_function<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Function<'js>> {
        let shared = self.this.clone();
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                if args.0.len() != 1 {
                    return Err(Exception::throw_message(&ctx, "include expects exactly 1 argument"));
                }
                let Some(filename) = args.0[0].as_string().and_then(|s| s.to_string().ok()) else {
                    return Err(Exception::throw_type(
                        &ctx,
                        "include expects the type of arg 0 to be string",
                    ));
                };
                let Some(shared) = shared.upgrade() else {
                    return Err(Exception::throw_message(&ctx, "JavaScript engine has been destroyed"));
                };
                let global = shared
                    .include(&filename)
                    .map_err(|message| Exception::throw_message(&ctx, &message))?;
                Ok(global.restore(&ctx)?.into_value())
            },
        )
    }

    fn include(&self, filename: &str) -> Result<Persistent<Object<'static>>, String> {
        if let Some(global) = self.included.borrow().get(filename).cloned() {
            return Ok(global);
        }
        let code = self
            .read_file(filename)
            .ok_or_else(|| format!("Couldn't find file: {}", filename))?;
        let (context, raw) = self.new_context().map_err(|err| err.to_string())?;
        let global = self.locker.enter(&context, raw, |ctx| {
            self.evaluate_include(&ctx, filename, &code)
                .map_err(|err| format!("{}: {}", filename, describe_error(&ctx, err)))
        })?;
        tracing::debug!(target: "script.js", "Included {}", filename);
        Ok(global)
    }

    fn evaluate_include(
        &self,
        ctx: &Ctx<'_>,
        filename: &str,
        code: &str,
    ) -> rquickjs::Result<Persistent<Object<'static>>> {
        self.install_globals(ctx, filename)?;
        let global = Persistent::save(ctx, ctx.globals());
        // 先放入缓存，允许循环 include
        self.included
            .borrow_mut()
            .insert(filename.to_string(), global.clone());
        ctx.eval::<Value, _>(code)?;
        Ok(global)
    }

    fn read_file(&self, filename: &str) -> Option<String> {
        let load_file = self.load_file.borrow().clone()?;
        load_file(filename)
    }

    /// 把 JS 函数包装为事件回调
    ///
    /// 回调本身只持有编号，函数保存在后端中，后端销毁后回调变为空操作。
    pub(crate) fn event_handler<'js>(&self, ctx: &Ctx<'js>, function: Function<'js>) -> EventHandler {
        let id = self.callback_ids.next();
        self.callbacks
            .borrow_mut()
            .insert(id, Persistent::save(ctx, function));
        let raw = ctx.as_raw();
        let guard = CallbackGuard {
            shared: self.this.clone(),
            id,
        };
        EventHandler::new(move |event| {
            if let Some(shared) = guard.shared.upgrade() {
                shared.call_handler(guard.id, raw, event);
            }
        })
    }

    fn call_handler(&self, id: u64, raw: RawContext, event: &EventWrapper) {
        let function = self.callbacks.borrow().get(&id).cloned();
        let context = self.contexts.borrow().get(&context_key(raw)).cloned();
        let (Some(function), Some(context)) = (function, context) else {
            tracing::error!(target: "script.js", "Event handler called after its script was unloaded");
            return;
        };
        let result = self.locker.enter(&context, raw, |ctx| {
            let call = || -> rquickjs::Result<()> {
                let function = function.restore(&ctx)?;
                let event = self.to_js(&ctx, &Variant::Event(event.clone()))?;
                function.call::<_, Value>((event,)).map(|_| ())
            };
            call().map_err(|err| describe_error(&ctx, err))
        });
        self.settle();
        if let Err(message) = result {
            tracing::error!(target: "script.js", "Error in event handler: {}", message);
        }
    }

    fn script(&self, handle: u64) -> ScriptResult<(Context, RawContext, String)> {
        self.scripts
            .borrow()
            .get(&handle)
            .map(|script| (script.context.clone(), script.raw, script.debug_name.clone()))
            .ok_or(ScriptError::NotFound)
    }
}

impl ScriptBackend for JsEngine {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn set_load_file_function(&self, load_file: LoadFileFn) {
        *self.shared.load_file.borrow_mut() = Some(load_file);
    }

    fn load_script(&self, code: &str, debug_name: &str) -> ScriptResult<u64> {
        let shared = &self.shared;
        let (context, raw) = shared.new_context()?;
        let result = shared.locker.enter(&context, raw, |ctx| {
            shared
                .install_globals(&ctx, debug_name)
                .and_then(|_| check_syntax(&ctx, code))
                .map_err(|err| describe_error(&ctx, err))
        });
        if let Err(message) = result {
            shared.retire_context(context, raw);
            shared.settle();
            return Err(ScriptError::Compilation(format!(
                "Error loading script: {}",
                message
            )));
        }
        let handle = shared.ids.next();
        shared.scripts.borrow_mut().insert(
            handle,
            JsScript {
                debug_name: debug_name.to_string(),
                source: code.to_string(),
                context,
                raw,
            },
        );
        shared.settle();
        Ok(handle)
    }

    fn reload_script(&self, handle: u64, code: &str) -> ScriptResult<()> {
        let (context, raw, debug_name) = self.shared.script(handle)?;
        self.shared
            .locker
            .enter(&context, raw, |ctx| {
                check_syntax(&ctx, code).map_err(|err| describe_error(&ctx, err))
            })
            .map_err(|message| {
                ScriptError::Compilation(format!(
                    "{}: Error reloading script: {}",
                    debug_name, message
                ))
            })?;
        if let Some(script) = self.shared.scripts.borrow_mut().get_mut(&handle) {
            script.source = code.to_string();
        }
        Ok(())
    }

    fn unload_script(&self, handle: u64) -> ScriptResult<()> {
        let script = self
            .shared
            .scripts
            .borrow_mut()
            .remove(&handle)
            .ok_or(ScriptError::NotFound)?;
        self.shared.retire_context(script.context, script.raw);
        self.shared.settle();
        Ok(())
    }

    fn run_script(&self, handle: u64) -> ScriptResult<()> {
        let shared = &self.shared;
        let (context, raw, debug_name) = shared.script(handle)?;
        let source = shared
            .scripts
            .borrow()
            .get(&handle)
            .map(|script| script.source.clone())
            .unwrap_or_default();
        let result = shared.locker.enter(&context, raw, |ctx| {
            ctx.eval::<Value, _>(source)
                .map(|_| ())
                .map_err(|err| describe_error(&ctx, err))
        });
        if shared.config.gc_after_run && !shared.locker.is_locked() {
            shared.runtime.run_gc();
        }
        shared.settle();
        result.map_err(|message| {
            ScriptError::Runtime(format!("{}: Script error: {}", debug_name, message))
        })
    }

    fn register_function(&self, name: &str, function: ScriptableFn) {
        self.shared
            .functions
            .borrow_mut()
            .insert(name.to_string(), function);
    }

    fn unregister_function(&self, name: &str) {
        self.shared.functions.borrow_mut().remove(name);
    }

    fn set_value(&self, handle: u64, name: &str, value: &Variant) -> ScriptResult<()> {
        let shared = &self.shared;
        let (context, raw, _) = shared.script(handle)?;
        shared
            .locker
            .enter(&context, raw, |ctx| {
                shared
                    .to_js(&ctx, value)
                    .and_then(|value| ctx.globals().set(name, value))
                    .map_err(|err| describe_error(&ctx, err))
            })
            .map_err(ScriptError::Runtime)
    }

    fn get_value(
        &self,
        handle: u64,
        name: &str,
        kind: &ValueKind,
    ) -> ScriptResult<Option<Variant>> {
        let shared = &self.shared;
        let (context, raw, debug_name) = shared.script(handle)?;
        shared.locker.enter(&context, raw, |ctx| {
            let value = lookup_global(&ctx, name)
                .map_err(|err| ScriptError::Runtime(describe_error(&ctx, err)))?;
            if value.is_undefined() || value.is_null() {
                return Ok(match kind {
                    ValueKind::Optional(_) | ValueKind::Any => Some(Variant::Empty),
                    _ => None,
                });
            }
            match shared.from_js(&ctx, &value, kind) {
                Some(variant) => Ok(Some(variant)),
                None => Err(ScriptError::Runtime(format!(
                    "{}: Value {} is not of type {}",
                    debug_name,
                    name,
                    type_name(kind)
                ))),
            }
        })
    }

    fn total_scripts(&self) -> usize {
        self.shared.scripts.borrow().len()
    }
}
