//! Lua 脚本后端 (mlua)
//!
//! 所有脚本共享一个 Lua 状态。每个脚本拥有独立的环境表：加载时复制全局
//! 表，再加入内置函数和已注册的原生函数，以 `lull.script.<id>` 为键存放在
//! Lua 注册表中。脚本的顶层代码编译为以该环境为 `_ENV` 的函数，因此多次
//! 运行与重新加载都共享同一个环境。
//!
//! 栈平衡由 mlua 在每次调用时自行维护，这里不再手工检查。

mod context;
mod convert;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use glam::{Quat, Vec3};
use mlua::{Function, Lua, LuaOptions, StdLib, Table, Value, Variadic};

pub use convert::type_name;

use self::context::LuaContext;
use super::call::ScriptableFn;
use super::engine::{HandleGenerator, Language, LoadFileFn, ScriptBackend};
use super::types::{hash, ValueKind, Variant};
use crate::config::LuaConfig;
use crate::core::{ScriptError, ScriptResult};

const PRELUDE: &str = include_str!("prelude.lua");

/// 展开回调错误，只保留最内层的原因
pub(crate) fn describe_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => describe_error(cause),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn registry_key(handle: u64) -> String {
    format!("lull.script.{}", handle)
}

/// 原生转换使用的 Lua 构造函数
struct LuaUtil {
    vec2: Function,
    vec3: Function,
    vec4: Function,
    quat: Function,
}

struct LuaScript {
    debug_name: String,
    function: Function,
}

/// Lua 后端的共享状态
///
/// 原生函数与回调只持有 `Weak<LuaShared>`，避免 Lua 状态与其中的闭包
/// 互相持有。
pub(crate) struct LuaShared {
    this: Weak<LuaShared>,
    scripts: RefCell<HashMap<u64, LuaScript>>,
    functions: RefCell<HashMap<String, ScriptableFn>>,
    included: RefCell<HashMap<String, Table>>,
    load_file: RefCell<Option<LoadFileFn>>,
    ids: HandleGenerator,
    util: LuaUtil,
    lua: Lua,
}

/// Lua 脚本引擎
pub struct LuaEngine {
    shared: Rc<LuaShared>,
}

fn quat_from(x: f32, y: f32, z: f32, s: f32) -> Quat {
    Quat::from_xyzw(x, y, z, s)
}

/// 四元数运算交给 glam
fn load_prelude(lua: &Lua) -> mlua::Result<LuaUtil> {
    let native = lua.create_table()?;
    native.raw_set(
        "mul_quat_scalar",
        lua.create_function(|_, (x, y, z, s, scale): (f32, f32, f32, f32, f32)| {
            let (axis, angle) = quat_from(x, y, z, s).to_axis_angle();
            let q = Quat::from_axis_angle(axis, angle * scale);
            Ok((q.x, q.y, q.z, q.w))
        })?,
    )?;
    native.raw_set(
        "mul_quat_quat",
        lua.create_function(
            |_, (ax, ay, az, a_s, bx, by, bz, b_s): (f32, f32, f32, f32, f32, f32, f32, f32)| {
                let q = quat_from(ax, ay, az, a_s) * quat_from(bx, by, bz, b_s);
                Ok((q.x, q.y, q.z, q.w))
            },
        )?,
    )?;
    native.raw_set(
        "mul_quat_vec3",
        lua.create_function(
            |_, (x, y, z, s, vx, vy, vz): (f32, f32, f32, f32, f32, f32, f32)| {
                let v = quat_from(x, y, z, s) * Vec3::new(vx, vy, vz);
                Ok((v.x, v.y, v.z))
            },
        )?,
    )?;

    let util: Table = lua.load(PRELUDE).set_name("prelude").call(native)?;
    Ok(LuaUtil {
        vec2: util.get("vec2")?,
        vec3: util.get("vec3")?,
        vec4: util.get("vec4")?,
        quat: util.get("quat")?,
    })
}

impl LuaEngine {
    pub fn new(config: &LuaConfig) -> ScriptResult<Self> {
        let init_error = |err: mlua::Error| {
            ScriptError::Runtime(format!("Failed to initialize Lua: {}", describe_error(&err)))
        };
        let lua = if config.sandboxed {
            Lua::new_with(
                StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
                LuaOptions::default(),
            )
            .map_err(init_error)?
        } else {
            Lua::new()
        };
        let util = load_prelude(&lua).map_err(init_error)?;
        let shared = Rc::new_cyclic(|this| LuaShared {
            this: this.clone(),
            scripts: RefCell::new(HashMap::new()),
            functions: RefCell::new(HashMap::new()),
            included: RefCell::new(HashMap::new()),
            load_file: RefCell::new(None),
            ids: HandleGenerator::new(),
            util,
            lua,
        });
        tracing::debug!(target: "script.lua", sandboxed = config.sandboxed, "Lua engine created");
        Ok(Self { shared })
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &LuaShared {
        &self.shared
    }
}

impl LuaShared {
    /// 为脚本创建新的环境表
    fn create_env(&self, debug_name: &str) -> mlua::Result<Table> {
        let lua = &self.lua;
        let env = lua.create_table()?;
        for pair in lua.globals().pairs::<Value, Value>() {
            let (key, value) = pair?;
            env.raw_set(key, value)?;
        }
        env.raw_set("_G", env.clone())?;
        env.raw_set("debug_name", debug_name)?;
        env.raw_set("print", self.print_function(debug_name)?)?;
        env.raw_set("include", self.include_function()?)?;
        env.raw_set("hash", lua.create_function(|_, name: String| Ok(hash(&name)))?)?;
        env.raw_set("vec2", self.util.vec2.clone())?;
        env.raw_set("vec3", self.util.vec3.clone())?;
        env.raw_set("vec4", self.util.vec4.clone())?;
        env.raw_set("quat", self.util.quat.clone())?;

        let names: Vec<String> = self.functions.borrow().keys().cloned().collect();
        for name in names {
            self.bind_function(&env, &name)?;
        }
        Ok(env)
    }

    fn print_function(&self, debug_name: &str) -> mlua::Result<Function> {
        let tostring: Function = self.lua.globals().get("tostring")?;
        let script = debug_name.to_string();
        self.lua.create_function(move |_, args: Variadic<Value>| {
            let parts = args
                .iter()
                .map(|arg| tostring.call::<String>(arg.clone()))
                .collect::<mlua::Result<Vec<_>>>()?;
            tracing::info!(target: "script.lua", script = %script, "{}", parts.join(" "));
            Ok(())
        })
    }

    /// `include(filename)`：加载并缓存另一个脚本，返回其环境表
    fn include_function(&self) -> mlua::Result<Function> {
        let shared = self.this.clone();
        self.lua.create_function(move |lua, args: Variadic<Value>| {
            if args.len() != 1 {
                return Err(mlua::Error::RuntimeError(
                    "include expects exactly 1 argument".to_string(),
                ));
            }
            let filename = match &args[0] {
                Value::String(s) => (*s.to_str()?).to_owned(),
                _ => {
                    return Err(mlua::Error::RuntimeError(
                        "include expects the type of arg 1 to be string".to_string(),
                    ))
                }
            };
            let shared = shared.upgrade().ok_or_else(|| {
                mlua::Error::RuntimeError("Lua engine has been destroyed".to_string())
            })?;
            if let Some(env) = shared.included.borrow().get(&filename).cloned() {
                return Ok(env);
            }
            let code = shared.read_file(&filename).ok_or_else(|| {
                mlua::Error::RuntimeError(format!("Couldn't find file: {}", filename))
            })?;
            let env = shared.create_env(&filename)?;
            let function = lua
                .load(code)
                .set_name(filename.as_str())
                .set_environment(env.clone())
                .into_function()?;
            // 先放入缓存，允许循环 include
            shared
                .included
                .borrow_mut()
                .insert(filename.clone(), env.clone());
            function.call::<()>(())?;
            tracing::debug!(target: "script.lua", "Included {}", filename);
            Ok(env)
        })
    }

    fn read_file(&self, filename: &str) -> Option<String> {
        let load_file = self.load_file.borrow().clone()?;
        load_file(filename)
    }

    /// 把原生函数写入环境表，点号分隔的名字展开为嵌套表
    fn bind_function(&self, env: &Table, name: &str) -> mlua::Result<()> {
        let mut segments: Vec<&str> = name.split('.').collect();
        let last = segments.pop().unwrap_or(name);
        let mut table = env.clone();
        for segment in segments {
            table = match table.raw_get::<Value>(segment)? {
                Value::Table(child) => child,
                _ => {
                    let child = self.lua.create_table()?;
                    table.raw_set(segment, child.clone())?;
                    child
                }
            };
        }
        table.raw_set(last, self.trampoline(name)?)
    }

    /// 调用时才按名字查找原生函数，注销后的调用得到运行时错误
    fn trampoline(&self, name: &str) -> mlua::Result<Function> {
        let shared = self.this.clone();
        let name = name.to_string();
        self.lua.create_function(move |_, args: Variadic<Value>| {
            let shared = shared.upgrade().ok_or_else(|| {
                mlua::Error::RuntimeError("Lua engine has been destroyed".to_string())
            })?;
            let function = shared.functions.borrow().get(&name).cloned();
            let Some(function) = function else {
                return Err(mlua::Error::RuntimeError(format!(
                    "Tried to call an unregistered function: {}",
                    name
                )));
            };
            let mut ctx = LuaContext::new(&shared, args.to_vec());
            match function.invoke(&mut ctx) {
                Some(_) => Ok(Variadic::from_iter(ctx.into_returns())),
                None => Err(mlua::Error::RuntimeError(ctx.into_error(&name))),
            }
        })
    }

    fn compile(&self, code: &str, debug_name: &str, env: Table) -> mlua::Result<Function> {
        self.lua
            .load(code)
            .set_name(debug_name)
            .set_environment(env)
            .into_function()
    }

    fn env(&self, handle: u64) -> ScriptResult<Table> {
        if !self.scripts.borrow().contains_key(&handle) {
            return Err(ScriptError::NotFound);
        }
        self.lua
            .named_registry_value::<Table>(&registry_key(handle))
            .map_err(|_| ScriptError::NotFound)
    }

    fn debug_name(&self, handle: u64) -> String {
        self.scripts
            .borrow()
            .get(&handle)
            .map(|script| script.debug_name.clone())
            .unwrap_or_default()
    }
}

impl ScriptBackend for LuaEngine {
    fn language(&self) -> Language {
        Language::Lua
    }

    fn set_load_file_function(&self, load_file: LoadFileFn) {
        *self.shared.load_file.borrow_mut() = Some(load_file);
    }

    fn load_script(&self, code: &str, debug_name: &str) -> ScriptResult<u64> {
        let shared = &self.shared;
        let load = || -> mlua::Result<(Table, Function)> {
            let env = shared.create_env(debug_name)?;
            let function = shared.compile(code, debug_name, env.clone())?;
            Ok((env, function))
        };
        let (env, function) = load().map_err(|err| {
            ScriptError::Compilation(format!("Error loading script: {}", describe_error(&err)))
        })?;
        let handle = shared.ids.next();
        shared
            .lua
            .set_named_registry_value(&registry_key(handle), env)
            .map_err(|err| ScriptError::Runtime(describe_error(&err)))?;
        shared.scripts.borrow_mut().insert(
            handle,
            LuaScript {
                debug_name: debug_name.to_string(),
                function,
            },
        );
        Ok(handle)
    }

    fn reload_script(&self, handle: u64, code: &str) -> ScriptResult<()> {
        let env = self.shared.env(handle)?;
        let debug_name = self.shared.debug_name(handle);
        let function = self.shared.compile(code, &debug_name, env).map_err(|err| {
            ScriptError::Compilation(format!(
                "{}: Error reloading script: {}",
                debug_name,
                describe_error(&err)
            ))
        })?;
        if let Some(script) = self.shared.scripts.borrow_mut().get_mut(&handle) {
            script.function = function;
        }
        Ok(())
    }

    fn unload_script(&self, handle: u64) -> ScriptResult<()> {
        if self.shared.scripts.borrow_mut().remove(&handle).is_none() {
            return Err(ScriptError::NotFound);
        }
        self.shared
            .lua
            .unset_named_registry_value(&registry_key(handle))
            .map_err(|err| ScriptError::Runtime(describe_error(&err)))
    }

    fn run_script(&self, handle: u64) -> ScriptResult<()> {
        // 执行期间不持有借用，原生函数可以重新进入本后端
        let (function, debug_name) = {
            let scripts = self.shared.scripts.borrow();
            let script = scripts.get(&handle).ok_or(ScriptError::NotFound)?;
            (script.function.clone(), script.debug_name.clone())
        };
        function.call::<()>(()).map_err(|err| {
            ScriptError::Runtime(format!("{}: Script error: {}", debug_name, describe_error(&err)))
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
        let env = self.shared.env(handle)?;
        let result = self
            .shared
            .to_lua(value)
            .and_then(|value| env.raw_set(name, value));
        result.map_err(|err| ScriptError::Runtime(describe_error(&err)))
    }

    fn get_value(
        &self,
        handle: u64,
        name: &str,
        kind: &ValueKind,
    ) -> ScriptResult<Option<Variant>> {
        let env = self.shared.env(handle)?;
        let value = env
            .raw_get::<Value>(name)
            .map_err(|err| ScriptError::Runtime(describe_error(&err)))?;
        if value.is_nil() {
            return Ok(match kind {
                ValueKind::Optional(_) | ValueKind::Any => Some(Variant::Empty),
                _ => None,
            });
        }
        match self.shared.from_lua(&value, kind) {
            Some(variant) => Ok(Some(variant)),
            None => Err(ScriptError::Runtime(format!(
                "{}: Value {} is not of type {}",
                self.shared.debug_name(handle),
                name,
                type_name(kind)
            ))),
        }
    }

    fn total_scripts(&self) -> usize {
        self.shared.scripts.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::scripting::engine::{ScriptEngine, ScriptId};

    fn engine() -> (ScriptEngine, Rc<LuaEngine>) {
        let engine = ScriptEngine::new();
        let lua = Rc::new(LuaEngine::new(&LuaConfig::default()).unwrap());
        engine.install(lua.clone());
        (engine, lua)
    }

    fn load(engine: &ScriptEngine, code: &str) -> ScriptId {
        let id = engine.load_inline_script(code, "test", Language::Lua);
        assert!(id.is_valid());
        id
    }

    #[test]
    fn test_argument_order() {
        let (engine, _) = engine();
        engine.register_function("Sub", |x: i32, y: i32| x - y);
        let id = load(&engine, "result = Sub(10, 3)");
        assert!(engine.run_script(id));
        assert_eq!(engine.get_value::<i32>(id, "result"), Some(7));
    }

    #[test]
    fn test_arity_mismatch_skips_call() {
        let (engine, _) = engine();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        engine.register_function("Two", move |_: i32, _: i32| counter.set(counter.get() + 1));
        let id = load(&engine, "Two(1)");
        assert!(!engine.run_script(id));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_type_mismatch_error_message() {
        let (engine, lua) = engine();
        engine.register_function("F", |_: i32, _: i32| {});
        let id = load(&engine, "err = tostring(select(2, pcall(F, 'abc', 5)))");
        assert!(engine.run_script(id));
        let err = lua
            .get_value(id.handle(), "err", &ValueKind::String)
            .unwrap()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap();
        assert!(err.contains("F expects the type of arg 1 to be number"), "{}", err);
    }

    #[test]
    fn test_environment_persists_across_runs() {
        let (engine, _) = engine();
        let id = load(&engine, "x = x + 1");
        assert!(engine.set_value(id, "x", 10));
        for _ in 0..4 {
            assert!(engine.run_script(id));
        }
        assert_eq!(engine.get_value::<i32>(id, "x"), Some(14));
    }

    #[test]
    fn test_reload_keeps_environment() {
        let (engine, _) = engine();
        let id = load(&engine, "x = 5");
        assert!(engine.run_script(id));
        assert!(engine.reload_script(id, "y = x * 2"));
        assert!(engine.run_script(id));
        assert_eq!(engine.get_value::<i32>(id, "y"), Some(10));
    }

    #[test]
    fn test_scripts_do_not_share_globals() {
        let (engine, _) = engine();
        let a = load(&engine, "shared = 1");
        let b = load(&engine, "shared = 2");
        assert!(engine.run_script(a));
        assert!(engine.run_script(b));
        assert_eq!(engine.get_value::<i32>(a, "shared"), Some(1));
        assert_eq!(engine.get_value::<i32>(b, "shared"), Some(2));
    }

    #[test]
    fn test_unregister_removes_callability() {
        let (engine, _) = engine();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        engine.register_function("func1", move || counter.set(counter.get() + 1));
        let id = load(&engine, "func1()");
        assert!(engine.run_script(id));
        assert_eq!(calls.get(), 1);
        engine.unregister_function("func1");
        assert!(!engine.run_script(id));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_dotted_names() {
        let (engine, _) = engine();
        engine.register_function("lull.math.Add", |a: i32, b: i32| a + b);
        let id = load(&engine, "sum = lull.math.Add(2, 3)");
        assert!(engine.run_script(id));
        assert_eq!(engine.get_value::<i32>(id, "sum"), Some(5));
    }

    #[test]
    fn test_include_is_cached() {
        let (engine, _) = engine();
        engine.set_load_file_function(|name| {
            (name == "thing.lua").then(|| {
                "local value = 0\n\
                 function SetThing(v) value = v end\n\
                 function GetThing() return value end"
                    .to_string()
            })
        });
        let a = load(&engine, "include('thing.lua').SetThing(42)");
        let b = load(&engine, "got = include('thing.lua').GetThing()");
        assert!(engine.run_script(a));
        assert!(engine.run_script(b));
        assert_eq!(engine.get_value::<i32>(b, "got"), Some(42));
    }

    #[test]
    fn test_include_errors() {
        let (engine, _) = engine();
        let id = load(&engine, "include('missing.lua')");
        assert!(!engine.run_script(id));
        let id = load(&engine, "include()");
        assert!(!engine.run_script(id));
    }

    #[test]
    fn test_unload_then_run() {
        let (engine, _) = engine();
        let id = load(&engine, "x = 1");
        assert_eq!(engine.total_scripts(), 1);
        assert!(engine.unload_script(id));
        assert_eq!(engine.total_scripts(), 0);
        assert!(!engine.run_script(id));
    }

    #[test]
    fn test_syntax_error_returns_invalid_id() {
        let (engine, _) = engine();
        let id = engine.load_inline_script("x = = 1", "bad", Language::Lua);
        assert!(!id.is_valid());
        assert_eq!(engine.total_scripts(), 0);
    }

    #[test]
    fn test_vector_metatables() {
        let (engine, _) = engine();
        let id = load(
            &engine,
            "a = vec3(1, 2, 3) + vec3(1, 1, 1)\n\
             b = -vec2(1, 2) * 2\n\
             same = vec2(1, 2) == vec2(1, 2)\n\
             text = tostring(vec2(1, 2))",
        );
        assert!(engine.run_script(id));
        assert_eq!(engine.get_value::<Vec3>(id, "a"), Some(Vec3::new(2.0, 3.0, 4.0)));
        assert_eq!(
            engine.get_value::<glam::Vec2>(id, "b"),
            Some(glam::Vec2::new(-2.0, -4.0))
        );
        assert_eq!(engine.get_value::<bool>(id, "same"), Some(true));
        assert_eq!(engine.get_value::<String>(id, "text"), Some("(1, 2)".to_string()));
    }

    #[test]
    fn test_quaternion_rotation() {
        let (engine, _) = engine();
        let id = load(&engine, "v = q * vec3(1, 0, 0)");
        let q = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        assert!(engine.set_value(id, "q", q));
        assert!(engine.run_script(id));
        let v = engine.get_value::<Vec3>(id, "v").unwrap();
        assert!(v.abs_diff_eq(Vec3::new(0.0, 1.0, 0.0), 1e-5));
    }

    #[test]
    fn test_event_handler_reenters_lua() {
        let (engine, _) = engine();
        let id = load(
            &engine,
            "count = 0\n\
             handler = function(event) count = count + event.data.amount end",
        );
        assert!(engine.run_script(id));
        let handler = engine
            .get_value::<crate::scripting::types::EventHandler>(id, "handler")
            .unwrap();
        let mut event = crate::scripting::types::EventWrapper::new("add");
        event.set_value("amount", 3);
        handler.call(&event);
        handler.call(&event);
        assert_eq!(engine.get_value::<i32>(id, "count"), Some(6));
    }

    #[test]
    fn test_debug_name_and_hash() {
        let (engine, _) = engine();
        let id = load(&engine, "name = debug_name\nh = hash('a')");
        assert!(engine.run_script(id));
        assert_eq!(engine.get_value::<String>(id, "name"), Some("test".to_string()));
        assert_eq!(engine.get_value::<u32>(id, "h"), Some(hash("a")));
    }

    #[test]
    fn test_missing_value() {
        let (engine, _) = engine();
        let id = load(&engine, "");
        assert_eq!(engine.get_value::<i32>(id, "nothing"), None);
        assert_eq!(engine.get_value::<Option<i32>>(id, "nothing"), Some(None));
    }

    #[test]
    fn test_sandboxed_state_has_no_io() {
        let engine = ScriptEngine::new();
        let lua = LuaEngine::new(&LuaConfig { sandboxed: true }).unwrap();
        engine.install(Rc::new(lua));
        let id = engine.load_inline_script("has_io = io ~= nil", "sandbox", Language::Lua);
        assert!(engine.run_script(id));
        assert_eq!(engine.get_value::<bool>(id, "has_io"), Some(false));
    }
}
