//! 脚本引擎门面
//!
//! `ScriptEngine` 持有所有已安装的语言后端，按 `ScriptId` 中的语言标签把
//! 调用路由到对应后端，并统一管理原生函数的注册。后端返回的错误在这里
//! 记录为日志并转换为哨兵返回值，不会以 panic 的形式越过边界。

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::call::{NativeFunction, ScriptableFn};
use super::convert::Scriptable;
use super::types::{ValueKind, Variant};
use crate::core::{ScriptError, ScriptResult};

/// 脚本语言
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    Unknown,
    Lua,
    JavaScript,
    LullScript,
}

impl Language {
    /// 根据文件扩展名判断语言
    pub fn from_filename(filename: &str) -> Self {
        match Path::new(filename).extension().and_then(|ext| ext.to_str()) {
            Some("lua") => Language::Lua,
            Some("js") => Language::JavaScript,
            Some("lull") | Some("lullscript") => Language::LullScript,
            _ => Language::Unknown,
        }
    }
}

/// 已加载脚本的不透明句柄
///
/// 默认值是无效句柄，加载失败时返回。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ScriptId {
    language: Language,
    handle: u64,
}

impl ScriptId {
    pub(crate) fn new(language: Language, handle: u64) -> Self {
        Self { language, handle }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn is_valid(&self) -> bool {
        self.language != Language::Unknown && self.handle != 0
    }
}

/// 按文件名读取脚本源码
pub type LoadFileFn = Rc<dyn Fn(&str) -> Option<String>>;

/// 单一语言的脚本后端
///
/// 所有方法都只需要共享引用：原生函数可能在脚本执行期间重新进入同一个
/// 后端，后端需用内部可变性且不在调用脚本时持有借用。
pub trait ScriptBackend {
    fn language(&self) -> Language;

    /// 设置 `include` 使用的文件读取函数
    fn set_load_file_function(&self, load_file: LoadFileFn);

    /// 编译脚本，返回非零句柄
    fn load_script(&self, code: &str, debug_name: &str) -> ScriptResult<u64>;

    /// 替换脚本代码，保留其环境
    fn reload_script(&self, handle: u64, code: &str) -> ScriptResult<()>;

    fn unload_script(&self, handle: u64) -> ScriptResult<()>;

    /// 在脚本的持久环境中执行顶层代码
    fn run_script(&self, handle: u64) -> ScriptResult<()>;

    fn register_function(&self, name: &str, function: ScriptableFn);

    fn unregister_function(&self, name: &str);

    fn set_value(&self, handle: u64, name: &str, value: &Variant) -> ScriptResult<()>;

    /// 以 `kind` 读取脚本变量，变量不存在时返回 `Ok(None)`
    fn get_value(&self, handle: u64, name: &str, kind: &ValueKind)
        -> ScriptResult<Option<Variant>>;

    fn total_scripts(&self) -> usize;
}

/// 单调递增的脚本句柄生成器
#[derive(Debug, Default)]
pub struct HandleGenerator {
    last: Cell<u64>,
}

impl HandleGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从指定的句柄之后开始分配
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: Cell::new(last),
        }
    }

    /// 分配下一个句柄
    ///
    /// # Panics
    ///
    /// 64 位句柄空间耗尽时 panic，继续运行会破坏句柄到脚本的映射。
    pub fn next(&self) -> u64 {
        let next = self
            .last
            .get()
            .checked_add(1)
            .unwrap_or_else(|| panic!("Script id overflow"));
        self.last.set(next);
        next
    }
}

#[derive(Default)]
struct EngineInner {
    backends: RefCell<HashMap<Language, Rc<dyn ScriptBackend>>>,
    functions: RefCell<BTreeMap<String, ScriptableFn>>,
    load_file: RefCell<Option<LoadFileFn>>,
}

/// 多语言脚本引擎
///
/// 可廉价克隆的句柄，所有克隆共享同一组后端。
#[derive(Clone, Default)]
pub struct ScriptEngine {
    inner: Rc<EngineInner>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 安装语言后端
    ///
    /// 已注册的函数和文件读取函数会同步到新后端。同一语言重复安装时替换
    /// 旧后端，旧后端加载的脚本随之失效。
    pub fn install(&self, backend: Rc<dyn ScriptBackend>) {
        let language = backend.language();
        if let Some(load_file) = self.inner.load_file.borrow().clone() {
            backend.set_load_file_function(load_file);
        }
        let functions: Vec<_> = self.inner.functions.borrow().values().cloned().collect();
        for function in functions {
            let name = function.name().to_string();
            backend.register_function(&name, function);
        }
        let replaced = self
            .inner
            .backends
            .borrow_mut()
            .insert(language, backend)
            .is_some();
        if replaced {
            tracing::warn!(target: "scripting", "Replaced script backend for {:?}", language);
        } else {
            tracing::debug!(target: "scripting", "Installed script backend for {:?}", language);
        }
    }

    pub fn is_installed(&self, language: Language) -> bool {
        self.inner.backends.borrow().contains_key(&language)
    }

    fn backend(&self, language: Language) -> ScriptResult<Rc<dyn ScriptBackend>> {
        self.inner
            .backends
            .borrow()
            .get(&language)
            .cloned()
            .ok_or(ScriptError::UnsupportedLanguage(language))
    }

    fn report<T>(&self, language: Language, result: ScriptResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(target: "scripting", language = ?language, "{}", err);
                None
            }
        }
    }

    /// 设置文件读取函数，同步到所有已安装的后端
    pub fn set_load_file_function(&self, load_file: impl Fn(&str) -> Option<String> + 'static) {
        let load_file: LoadFileFn = Rc::new(load_file);
        *self.inner.load_file.borrow_mut() = Some(load_file.clone());
        let backends: Vec<_> = self.inner.backends.borrow().values().cloned().collect();
        for backend in backends {
            backend.set_load_file_function(load_file.clone());
        }
    }

    /// 按文件名加载脚本，语言由扩展名决定
    pub fn load_script(&self, filename: &str, debug_name: &str) -> ScriptId {
        let language = Language::from_filename(filename);
        let result = self.read_file(filename, language);
        match self.report(language, result) {
            Some(code) => self.load_inline_script(&code, debug_name, language),
            None => ScriptId::default(),
        }
    }

    fn read_file(&self, filename: &str, language: Language) -> ScriptResult<String> {
        if language == Language::Unknown {
            return Err(ScriptError::UnsupportedLanguage(language));
        }
        let load_file = self.inner.load_file.borrow().clone();
        load_file
            .and_then(|load_file| load_file(filename))
            .ok_or_else(|| ScriptError::LoadFile(filename.to_string()))
    }

    /// 从源码加载脚本
    pub fn load_inline_script(&self, code: &str, debug_name: &str, language: Language) -> ScriptId {
        let result = self
            .backend(language)
            .and_then(|backend| backend.load_script(code, debug_name));
        match self.report(language, result) {
            Some(handle) => {
                tracing::debug!(target: "scripting", "Loaded script {} ({:?})", debug_name, language);
                ScriptId::new(language, handle)
            }
            None => ScriptId::default(),
        }
    }

    /// 执行脚本，失败时记录错误并返回 `false`
    pub fn run_script(&self, id: ScriptId) -> bool {
        let result = self
            .backend(id.language)
            .and_then(|backend| backend.run_script(id.handle));
        self.report(id.language, result).is_some()
    }

    pub fn reload_script(&self, id: ScriptId, code: &str) -> bool {
        let result = self
            .backend(id.language)
            .and_then(|backend| backend.reload_script(id.handle, code));
        self.report(id.language, result).is_some()
    }

    pub fn unload_script(&self, id: ScriptId) -> bool {
        let result = self
            .backend(id.language)
            .and_then(|backend| backend.unload_script(id.handle));
        self.report(id.language, result).is_some()
    }

    /// 注册原生函数，投射到所有已安装的后端
    pub fn register_function<Args, F>(&self, name: &str, f: F)
    where
        F: NativeFunction<Args>,
    {
        self.register_scriptable_fn(ScriptableFn::new(name, f));
    }

    /// 注册已类型擦除的原生函数
    pub fn register_scriptable_fn(&self, function: ScriptableFn) {
        let name = function.name().to_string();
        self.inner
            .functions
            .borrow_mut()
            .insert(name.clone(), function.clone());
        let backends: Vec<_> = self.inner.backends.borrow().values().cloned().collect();
        for backend in backends {
            backend.register_function(&name, function.clone());
        }
        tracing::debug!(target: "scripting", "Registered function {}", name);
    }

    pub fn unregister_function(&self, name: &str) {
        if self.inner.functions.borrow_mut().remove(name).is_none() {
            tracing::warn!(target: "scripting", "Unregistering unknown function {}", name);
        }
        let backends: Vec<_> = self.inner.backends.borrow().values().cloned().collect();
        for backend in backends {
            backend.unregister_function(name);
        }
    }

    pub fn is_function_registered(&self, name: &str) -> bool {
        self.inner.functions.borrow().contains_key(name)
    }

    /// 设置脚本变量
    pub fn set_value<T: Scriptable>(&self, id: ScriptId, name: &str, value: T) -> bool {
        self.set_variant(id, name, &value.into_variant())
    }

    pub fn set_variant(&self, id: ScriptId, name: &str, value: &Variant) -> bool {
        let result = self
            .backend(id.language)
            .and_then(|backend| backend.set_value(id.handle, name, value));
        self.report(id.language, result).is_some()
    }

    /// 读取脚本变量
    ///
    /// 变量不存在时返回 `None`；类型不符时同样返回 `None` 并记录错误。
    pub fn get_value<T: Scriptable>(&self, id: ScriptId, name: &str) -> Option<T> {
        let kind = T::kind();
        let value = self.get_variant(id, name, &kind)?;
        let result = T::from_variant(value).ok_or_else(|| {
            ScriptError::Runtime(format!("Value {} is not of type {}", name, kind))
        });
        self.report(id.language, result)
    }

    pub fn get_variant(&self, id: ScriptId, name: &str, kind: &ValueKind) -> Option<Variant> {
        let result = self
            .backend(id.language)
            .and_then(|backend| backend.get_value(id.handle, name, kind));
        self.report(id.language, result).flatten()
    }

    /// 所有后端中已加载的脚本总数
    pub fn total_scripts(&self) -> usize {
        let backends: Vec<_> = self.inner.backends.borrow().values().cloned().collect();
        backends.iter().map(|backend| backend.total_scripts()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_filename() {
        assert_eq!(Language::from_filename("a/b.lua"), Language::Lua);
        assert_eq!(Language::from_filename("thing.js"), Language::JavaScript);
        assert_eq!(Language::from_filename("x.lull"), Language::LullScript);
        assert_eq!(Language::from_filename("x.lullscript"), Language::LullScript);
        assert_eq!(Language::from_filename("x.py"), Language::Unknown);
        assert_eq!(Language::from_filename("noext"), Language::Unknown);
    }

    #[test]
    fn test_script_id_validity() {
        assert!(!ScriptId::default().is_valid());
        assert!(!ScriptId::new(Language::Lua, 0).is_valid());
        assert!(ScriptId::new(Language::Lua, 1).is_valid());
    }

    #[test]
    fn test_handle_generator() {
        let ids = HandleGenerator::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[test]
    #[should_panic(expected = "Script id overflow")]
    fn test_handle_generator_overflow_is_fatal() {
        let ids = HandleGenerator::starting_after(u64::MAX);
        ids.next();
    }

    #[test]
    fn test_missing_backend_returns_sentinels() {
        let engine = ScriptEngine::new();
        let id = engine.load_inline_script("x = 1", "test", Language::Lua);
        assert!(!id.is_valid());
        assert!(!engine.run_script(ScriptId::new(Language::Lua, 1)));
        assert_eq!(engine.get_value::<i32>(id, "x"), None);
        assert_eq!(engine.total_scripts(), 0);
    }

    #[test]
    fn test_load_script_unknown_extension() {
        let engine = ScriptEngine::new();
        engine.set_load_file_function(|_| Some(String::new()));
        assert!(!engine.load_script("script.txt", "script").is_valid());
    }

    #[test]
    fn test_install_replays_registered_functions() {
        let engine = ScriptEngine::new();
        engine.register_function("Add", |a: i32, b: i32| a + b);
        engine.install(Rc::new(crate::scripting::lull::LullEngine::new(
            &crate::config::LullConfig::default(),
        )));
        let id = engine.load_inline_script("(= r (Add 2 3))", "late", Language::LullScript);
        assert!(engine.run_script(id));
        assert_eq!(engine.get_value::<i32>(id, "r"), Some(5));
    }

    #[test]
    fn test_register_function_bookkeeping() {
        let engine = ScriptEngine::new();
        engine.register_function("Add", |a: i32, b: i32| a + b);
        assert!(engine.is_function_registered("Add"));
        engine.unregister_function("Add");
        assert!(!engine.is_function_registered("Add"));
    }
}
