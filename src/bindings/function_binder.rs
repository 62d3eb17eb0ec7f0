//! 原生函数绑定器
//!
//! `FunctionBinder` 是注册表中的一张按名字索引的调用表：注册的函数同时投射
//! 到同一注册表中的 `ScriptEngine`，也可以不经过任何脚本由原生代码直接调用。

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::core::{Registry, WeakRegistry};
use crate::scripting::call::{NativeFunction, ScriptableFn};
use crate::scripting::context::VariantArgs;
use crate::scripting::convert::{ScriptReturn, Scriptable};
use crate::scripting::engine::ScriptEngine;
use crate::scripting::types::Variant;

/// 注册表中某个单例的方法
///
/// 实例在调用时才从注册表中查找，因此注册顺序与单例的创建顺序无关。
pub trait InstanceMethod<T, Args>: 'static {
    fn bind(self, registry: WeakRegistry, name: &str) -> ScriptableFn;
}

macro_rules! impl_instance_method {
    ($($ty:ident $arg:ident),*) => {
        impl<T, F, R, $($ty,)*> InstanceMethod<T, ($($ty,)*)> for F
        where
            T: 'static,
            F: Fn(&T, $($ty),*) -> R + 'static,
            R: ScriptReturn + Default,
            $($ty: Scriptable,)*
        {
            fn bind(self, registry: WeakRegistry, name: &str) -> ScriptableFn {
                let method = name.to_string();
                ScriptableFn::new(name, move |$($arg: $ty),*| -> R {
                    let result = registry
                        .upgrade()
                        .and_then(|registry| registry.with(|instance: &T| (self)(instance, $($arg),*)));
                    result.unwrap_or_else(|| {
                        tracing::error!(
                            target: "script.binder",
                            "{}: no {} instance in the registry",
                            method,
                            std::any::type_name::<T>()
                        );
                        R::default()
                    })
                })
            }
        }
    };
}

impl_instance_method!();
impl_instance_method!(A0 a0);
impl_instance_method!(A0 a0, A1 a1);
impl_instance_method!(A0 a0, A1 a1, A2 a2);
impl_instance_method!(A0 a0, A1 a1, A2 a2, A3 a3);
impl_instance_method!(A0 a0, A1 a1, A2 a2, A3 a3, A4 a4);
impl_instance_method!(A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);

struct BinderInner {
    registry: WeakRegistry,
    functions: RefCell<HashMap<String, ScriptableFn>>,
}

impl BinderInner {
    fn engine(&self) -> Option<ScriptEngine> {
        self.registry.upgrade()?.get::<ScriptEngine>()
    }
}

impl Drop for BinderInner {
    fn drop(&mut self) {
        let Some(engine) = self.engine() else {
            return;
        };
        for name in self.functions.get_mut().keys() {
            engine.unregister_function(name);
        }
    }
}

/// 按名字调用原生函数
///
/// 可廉价克隆的句柄。最后一个句柄释放时，从脚本引擎中注销所有经由它
/// 注册的函数。
#[derive(Clone)]
pub struct FunctionBinder {
    inner: Rc<BinderInner>,
}

impl FunctionBinder {
    pub fn new(registry: &Registry) -> Self {
        Self {
            inner: Rc::new(BinderInner {
                registry: registry.downgrade(),
                functions: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// 注册函数，同名函数已存在时记录错误并保留原函数
    pub fn register_function<Args, F>(&self, name: &str, f: F)
    where
        F: NativeFunction<Args>,
    {
        self.register_scriptable_fn(ScriptableFn::new(name, f));
    }

    /// 注册注册表中单例 `T` 的方法
    ///
    /// 调用时找不到实例会记录错误并返回默认值。
    pub fn register_method<T, Args, M>(&self, name: &str, method: M)
    where
        T: 'static,
        M: InstanceMethod<T, Args>,
    {
        self.register_scriptable_fn(method.bind(self.inner.registry.clone(), name));
    }

    fn register_scriptable_fn(&self, function: ScriptableFn) {
        let name = function.name().to_string();
        {
            let mut functions = self.inner.functions.borrow_mut();
            if functions.contains_key(&name) {
                tracing::error!(target: "script.binder", "Function {} is already registered", name);
                return;
            }
            functions.insert(name.clone(), function.clone());
        }
        if let Some(engine) = self.inner.engine() {
            engine.register_scriptable_fn(function);
        }
        tracing::debug!(target: "script.binder", "Registered function {}", name);
    }

    pub fn unregister_function(&self, name: &str) {
        if self.inner.functions.borrow_mut().remove(name).is_none() {
            tracing::error!(target: "script.binder", "Function {} is not registered", name);
            return;
        }
        if let Some(engine) = self.inner.engine() {
            engine.unregister_function(name);
        }
    }

    pub fn is_function_registered(&self, name: &str) -> bool {
        self.inner.functions.borrow().contains_key(name)
    }

    /// 以 `Variant` 参数直接调用
    ///
    /// 函数不存在、参数个数或类型不符时记录错误并返回 `Variant::Empty`。
    /// 没有返回值的函数同样返回 `Variant::Empty`。
    pub fn call(&self, name: &str, args: impl IntoIterator<Item = Variant>) -> Variant {
        // 调用期间不持有借用，被调用的函数可以再注册或调用其他函数
        let function = self.inner.functions.borrow().get(name).cloned();
        let Some(function) = function else {
            tracing::error!(target: "script.binder", "Tried to call unregistered function {}", name);
            return Variant::Empty;
        };
        let mut ctx = VariantArgs::new(args);
        match function.invoke(&mut ctx) {
            Some(_) => ctx.into_result(),
            None => {
                match ctx.take_error() {
                    Some(err) => tracing::error!(target: "script.binder", "{}", err),
                    None => tracing::error!(target: "script.binder", "Error calling {}", name),
                }
                Variant::Empty
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::LullConfig;
    use crate::scripting::convert::variant_array;
    use crate::scripting::engine::Language;
    use crate::scripting::lull::LullEngine;
    use crate::scripting::types::{hash, EventHandler, EventWrapper, VariantMap};

    fn binder() -> (Registry, FunctionBinder) {
        let registry = Registry::new();
        let binder = FunctionBinder::new(&registry);
        (registry, binder)
    }

    #[test]
    fn test_basic_usage() {
        let (_registry, binder) = binder();
        binder.register_function("Concat", |a: String, b: String| a + &b);
        let result = binder.call("Concat", variant_array(["abc".to_string(), "def".to_string()]));
        assert_eq!(result, Variant::from("abcdef"));
    }

    #[test]
    fn test_vectors_return_arrays() {
        let (_registry, binder) = binder();
        binder.register_function("IntsToStrings", |v: Vec<i32>| {
            v.iter().map(|i| i.to_string()).collect::<Vec<_>>()
        });
        let result = binder.call("IntsToStrings", [Variant::Array(variant_array([1, 2, 3]))]);
        assert_eq!(
            result,
            Variant::Array(vec![Variant::from("1"), Variant::from("2"), Variant::from("3")])
        );
    }

    #[test]
    fn test_maps() {
        let (_registry, binder) = binder();
        binder.register_function("RepeatStrings", |m: VariantMap| {
            m.into_iter()
                .map(|(k, v)| {
                    let s = v.as_str().unwrap_or_default().repeat(2);
                    (k, Variant::String(s))
                })
                .collect::<VariantMap>()
        });
        let mut input = VariantMap::new();
        input.insert("0".to_string(), Variant::from("abc"));
        input.insert("1".to_string(), Variant::from("def"));
        let Variant::Map(result) = binder.call("RepeatStrings", [Variant::Map(input)]) else {
            panic!("expected a map");
        };
        assert_eq!(result.len(), 2);
        assert_eq!(result["0"], Variant::from("abcabc"));
        assert_eq!(result["1"], Variant::from("defdef"));
    }

    #[test]
    fn test_optionals() {
        let (_registry, binder) = binder();
        binder.register_function("DoubleOptionals", |o: Option<f32>| o.map(|v| v * 2.0));
        assert_eq!(binder.call("DoubleOptionals", [Variant::Float(4.0)]), Variant::Float(8.0));
        assert_eq!(binder.call("DoubleOptionals", [Variant::Empty]), Variant::Empty);
    }

    #[test]
    fn test_event_handler_argument() {
        let (_registry, binder) = binder();
        let count = Rc::new(Cell::new(0));
        let calls = count.clone();
        binder.register_function("EventHandlerArgument", move |handler: EventHandler| {
            calls.set(calls.get() + 1);
            let mut event = EventWrapper::new("myEvent");
            event.set_value("myInt", 999);
            handler.call(&event);
        });
        let handled = Rc::new(Cell::new(0));
        let seen = handled.clone();
        let handler = EventHandler::new(move |event| {
            assert_eq!(event.type_id(), hash("myEvent"));
            assert_eq!(event.value("myInt"), Some(&Variant::Int32(999)));
            seen.set(seen.get() + 1);
        });
        binder.call("EventHandlerArgument", [Variant::EventHandler(handler)]);
        assert_eq!((count.get(), handled.get()), (1, 1));
    }

    #[test]
    fn test_event_handler_return() {
        let (_registry, binder) = binder();
        let handled = Rc::new(Cell::new(0));
        let seen = handled.clone();
        binder.register_function("EventHandlerReturn", move || {
            let seen = seen.clone();
            EventHandler::new(move |_| seen.set(seen.get() + 1))
        });
        let Variant::EventHandler(handler) = binder.call("EventHandlerReturn", []) else {
            panic!("expected an event handler");
        };
        assert_eq!(handled.get(), 0);
        handler.call(&EventWrapper::new("myEvent"));
        assert_eq!(handled.get(), 1);
    }

    #[test]
    fn test_call_errors_return_empty() {
        let (_registry, binder) = binder();
        binder.register_function("Concat", |a: String, b: String| a + &b);
        binder.register_function("ExpectVector", |_: Vec<String>| {});
        binder.register_function("ExpectOptional", |_: Option<f32>| {});
        assert_eq!(binder.call("Concat", [Variant::from("abc")]), Variant::Empty);
        assert_eq!(
            binder.call("Concat", [Variant::from("abc"), Variant::Int32(123)]),
            Variant::Empty
        );
        assert_eq!(binder.call("ExpectVector", [Variant::Int32(123)]), Variant::Empty);
        assert_eq!(binder.call("ExpectOptional", [Variant::from("x")]), Variant::Empty);
        binder.unregister_function("Concat");
        assert!(!binder.is_function_registered("Concat"));
        assert_eq!(
            binder.call("Concat", [Variant::from("abc"), Variant::from("def")]),
            Variant::Empty
        );
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let (_registry, binder) = binder();
        binder.register_function("Value", || 1);
        binder.register_function("Value", || 2);
        assert_eq!(binder.call("Value", []), Variant::Int32(1));
    }

    #[derive(Default)]
    struct Counter {
        value: Cell<i32>,
    }

    impl Counter {
        fn add(&self, amount: i32) -> i32 {
            self.value.set(self.value.get() + amount);
            self.value.get()
        }
    }

    #[test]
    fn test_register_method_looks_up_instance_lazily() {
        let (registry, binder) = binder();
        binder.register_method::<Counter, _, _>("Counter.add", Counter::add);
        assert_eq!(binder.call("Counter.add", [Variant::Int32(5)]), Variant::Int32(0));
        registry.create(Counter::default());
        assert_eq!(binder.call("Counter.add", [Variant::Int32(5)]), Variant::Int32(5));
        assert_eq!(binder.call("Counter.add", [Variant::Int32(2)]), Variant::Int32(7));
    }

    #[test]
    fn test_projects_into_script_engine() {
        let registry = Registry::new();
        let engine = ScriptEngine::new();
        engine.install(Rc::new(LullEngine::new(&LullConfig::default())));
        registry.create(engine.clone());
        let binder = FunctionBinder::new(&registry);
        binder.register_function("Triple", |x: i32| x * 3);
        assert!(engine.is_function_registered("Triple"));

        let id = engine.load_inline_script("(= y (Triple 4))", "binder", Language::LullScript);
        assert!(engine.run_script(id));
        assert_eq!(engine.get_value::<i32>(id, "y"), Some(12));

        drop(binder);
        assert!(!engine.is_function_registered("Triple"));
    }
}
