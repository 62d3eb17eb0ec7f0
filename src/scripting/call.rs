//! 原生函数调用分派
//!
//! `NativeFunction` 为 0 到 8 个参数的闭包实现统一的调用流程：先检查参数
//! 个数，再从最后一个参数开始逆序解码，全部成功后按正序调用闭包，最后
//! 写回返回值。任何一步失败都不会调用闭包。

use std::fmt;
use std::rc::Rc;

use super::context::{decode_arg, encode_return, ScriptContext};
use super::convert::{ScriptReturn, Scriptable};

/// 可以被脚本调用的原生函数
///
/// `Args` 是参数类型元组，仅用于区分不同签名的实现。
pub trait NativeFunction<Args>: 'static {
    const ARG_COUNT: usize;
    const RETURN_COUNT: usize;

    /// 从上下文解码参数并调用，参数不匹配时返回 `false`
    fn invoke(&self, ctx: &mut dyn ScriptContext, name: &str) -> bool;
}

macro_rules! impl_native_function {
    ($count:expr => ($($ty:ident $arg:ident),*) rev ($($rarg:ident $rty:ident $idx:expr),*)) => {
        impl<F, R, $($ty,)*> NativeFunction<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + 'static,
            R: ScriptReturn,
            $($ty: Scriptable,)*
        {
            const ARG_COUNT: usize = $count;
            const RETURN_COUNT: usize = R::COUNT;

            fn invoke(&self, ctx: &mut dyn ScriptContext, name: &str) -> bool {
                if !ctx.check_num_args(name, $count) {
                    return false;
                }
                $(
                    let $rarg = match decode_arg::<$rty>(ctx, name, $idx) {
                        Some(value) => value,
                        None => return false,
                    };
                )*
                let result = (self)($($arg),*);
                encode_return(ctx, name, result).is_some()
            }
        }
    };
}

impl_native_function!(0 => () rev ());
impl_native_function!(1 => (A0 a0) rev (a0 A0 0));
impl_native_function!(2 => (A0 a0, A1 a1) rev (a1 A1 1, a0 A0 0));
impl_native_function!(3 => (A0 a0, A1 a1, A2 a2) rev (a2 A2 2, a1 A1 1, a0 A0 0));
impl_native_function!(4 => (A0 a0, A1 a1, A2 a2, A3 a3)
    rev (a3 A3 3, a2 A2 2, a1 A1 1, a0 A0 0));
impl_native_function!(5 => (A0 a0, A1 a1, A2 a2, A3 a3, A4 a4)
    rev (a4 A4 4, a3 A3 3, a2 A2 2, a1 A1 1, a0 A0 0));
impl_native_function!(6 => (A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5)
    rev (a5 A5 5, a4 A4 4, a3 A3 3, a2 A2 2, a1 A1 1, a0 A0 0));
impl_native_function!(7 => (A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6)
    rev (a6 A6 6, a5 A5 5, a4 A4 4, a3 A3 3, a2 A2 2, a1 A1 1, a0 A0 0));
impl_native_function!(8 => (A0 a0, A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7)
    rev (a7 A7 7, a6 A6 6, a5 A5 5, a4 A4 4, a3 A3 3, a2 A2 2, a1 A1 1, a0 A0 0));

/// 通过上下文调用原生函数
pub fn call_native_function<Args, F>(ctx: &mut dyn ScriptContext, name: &str, f: &F) -> bool
where
    F: NativeFunction<Args>,
{
    f.invoke(ctx, name)
}

/// 类型擦除后的原生函数
///
/// 后端只持有 `ScriptableFn`，调用结果为 `None` 表示参数不匹配，
/// `Some(n)` 表示成功并产生了 `n` 个返回值。
#[derive(Clone)]
pub struct ScriptableFn {
    name: Rc<str>,
    arg_count: usize,
    call: Rc<dyn Fn(&mut dyn ScriptContext, &str) -> Option<usize>>,
}

impl ScriptableFn {
    pub fn new<Args, F>(name: &str, f: F) -> Self
    where
        F: NativeFunction<Args>,
    {
        Self {
            name: Rc::from(name),
            arg_count: F::ARG_COUNT,
            call: Rc::new(move |ctx, name| f.invoke(ctx, name).then_some(F::RETURN_COUNT)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    pub fn invoke(&self, ctx: &mut dyn ScriptContext) -> Option<usize> {
        (self.call)(ctx, &self.name)
    }

    /// 两个句柄是否指向同一个函数
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.call, &other.call)
    }
}

impl fmt::Debug for ScriptableFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptableFn")
            .field("name", &self.name)
            .field("arg_count", &self.arg_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::scripting::context::VariantArgs;
    use crate::scripting::types::{ValueKind, Variant};
    use crate::core::ScriptError;

    /// 记录解码顺序的上下文
    struct RecordingContext {
        inner: VariantArgs,
        order: Vec<usize>,
    }

    impl ScriptContext for RecordingContext {
        fn check_num_args(&mut self, name: &str, expected: usize) -> bool {
            self.inner.check_num_args(name, expected)
        }

        fn arg_to_native(&mut self, name: &str, index: usize, kind: &ValueKind) -> Option<Variant> {
            self.order.push(index);
            self.inner.arg_to_native(name, index, kind)
        }

        fn return_from_native(&mut self, name: &str, value: Variant) -> bool {
            self.inner.return_from_native(name, value)
        }

        fn type_error(&mut self, name: &str, index: usize, kind: &ValueKind) {
            self.inner.type_error(name, index, kind)
        }
    }

    #[test]
    fn test_forward_argument_order() {
        let sub = |x: i32, y: i32| x - y;
        let mut ctx = VariantArgs::new([Variant::Int32(10), Variant::Int32(3)]);
        assert!(call_native_function(&mut ctx, "Sub", &sub));
        assert_eq!(ctx.into_result(), Variant::Int32(7));
    }

    #[test]
    fn test_reverse_decode_order() {
        let mut ctx = RecordingContext {
            inner: VariantArgs::new([1, 2, 3].map(Variant::Int32)),
            order: Vec::new(),
        };
        let f = |_: i32, _: i32, _: i32| {};
        assert!(call_native_function(&mut ctx, "f", &f));
        assert_eq!(ctx.order, vec![2, 1, 0]);
    }

    #[test]
    fn test_arity_mismatch_does_not_call() {
        let counter = Rc::new(Cell::new(0));
        let captured = counter.clone();
        let f = move |_: i32, _: i32| captured.set(captured.get() + 1);
        let mut ctx = VariantArgs::new([Variant::Int32(1)]);
        assert!(!call_native_function(&mut ctx, "F", &f));
        assert_eq!(counter.get(), 0);
        assert!(matches!(ctx.error(), Some(ScriptError::ArgumentCount { .. })));
    }

    #[test]
    fn test_type_mismatch_reports_first_argument() {
        let called = Rc::new(Cell::new(false));
        let captured = called.clone();
        let f = move |_: i32, _: i32| captured.set(true);
        let mut ctx = VariantArgs::new([Variant::from("abc"), Variant::Int32(5)]);
        assert!(!call_native_function(&mut ctx, "F", &f));
        assert!(!called.get());
        assert!(matches!(
            ctx.error(),
            Some(ScriptError::ArgumentType { index: 0, .. })
        ));
    }

    #[test]
    fn test_scriptable_fn_return_counts() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let captured = log.clone();
        let void_fn = ScriptableFn::new("push", move |s: String| captured.borrow_mut().push(s));
        let value_fn = ScriptableFn::new("answer", || 42i64);
        assert_eq!(void_fn.arg_count(), 1);
        assert_eq!(value_fn.arg_count(), 0);

        let mut ctx = VariantArgs::new([Variant::from("hi")]);
        assert_eq!(void_fn.invoke(&mut ctx), Some(0));
        assert_eq!(*log.borrow(), vec!["hi".to_string()]);

        let mut ctx = VariantArgs::default();
        assert_eq!(value_fn.invoke(&mut ctx), Some(1));
        assert_eq!(ctx.into_result(), Variant::Int64(42));

        let mut ctx = VariantArgs::default();
        assert_eq!(void_fn.invoke(&mut ctx), None);
    }

    #[test]
    fn test_eight_arguments() {
        let f = |a: u8, b: i8, c: u16, d: i16, e: u32, f: i32, g: u64, h: i64| {
            a as i64 + b as i64 + c as i64 + d as i64 + e as i64 + f as i64 + g as i64 + h
        };
        let mut ctx = VariantArgs::new((1..=8).map(Variant::Int32));
        assert!(call_native_function(&mut ctx, "sum", &f));
        assert_eq!(ctx.into_result(), Variant::Int64(36));
    }
}
