//! LullScript 内置函数
//!
//! 内置函数接收未求值的参数，自行决定求值时机，因此 `=`、`def`、`if`、
//! `and` 等特殊形式与普通函数使用同一套注册方式。

use std::rc::Rc;
use std::time::Duration;

use glam::{IVec2, IVec3, IVec4, Quat, Vec2, Vec3, Vec4};
use tracing::info;

use super::env::Environment;
use super::interpreter::{Interpreter, MAX_ARGS};
use super::ops::{arithmetic, compare, Arith, Compare};
use super::value::{Builtin, BuiltinFn, Lambda, LullResult, LullValue};
use crate::core::error::ScriptError;
use crate::scripting::types::{hash, Variant};

fn expect_args(name: &str, args: &[LullValue], expected: usize) -> LullResult<()> {
    if args.len() == expected {
        return Ok(());
    }
    Err(ScriptError::ArgumentCount {
        name: name.to_string(),
        expected,
        actual: args.len(),
    }
    .to_string())
}

fn eval_all(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<Vec<Variant>> {
    args.iter().map(|arg| interp.eval_data(arg)).collect()
}

fn data(value: impl Into<Variant>) -> LullResult<LullValue> {
    Ok(LullValue::from_variant(value.into()))
}

fn set(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let name = args
        .first()
        .and_then(LullValue::as_symbol)
        .ok_or_else(|| "Expected symbol.".to_string())?;
    let expr = args.get(1).ok_or_else(|| "Expected expression.".to_string())?;
    let value = interp.eval(expr)?;
    interp.env().assign(name, value.clone());
    Ok(value)
}

fn do_block(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    interp.do_block(args)
}

/// 解析 `(params...) body...` 形式的定义
fn make_lambda(args: &[LullValue]) -> LullResult<Lambda> {
    let Some((LullValue::List(params), body)) = args.split_first() else {
        return Err("Expected arguments.".to_string());
    };
    if params.len() > MAX_ARGS {
        return Err(format!("Too many arguments, limit of {}.", MAX_ARGS));
    }
    let params = params
        .iter()
        .map(|param| {
            param
                .as_symbol()
                .map(Rc::from)
                .ok_or_else(|| "Parameter should be a symbol.".to_string())
        })
        .collect::<LullResult<Vec<Rc<str>>>>()?;
    Ok(Lambda {
        params,
        body: Rc::from(body),
    })
}

fn define_named(
    interp: &mut Interpreter<'_>,
    args: &[LullValue],
    wrap: fn(Rc<Lambda>) -> LullValue,
) -> LullResult<LullValue> {
    let (name, rest) = match args.split_first() {
        Some((LullValue::Symbol(name), rest)) => (name.clone(), rest),
        _ => return Err("Expected symbol.".to_string()),
    };
    let value = wrap(Rc::new(make_lambda(rest)?));
    interp.env().define(&name, value.clone());
    Ok(value)
}

fn def(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    define_named(interp, args, LullValue::Lambda)
}

fn define_macro(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    define_named(interp, args, LullValue::Macro)
}

fn lambda(_interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    Ok(LullValue::Lambda(Rc::new(make_lambda(args)?)))
}

fn eval(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    expect_args("eval", args, 1)?;
    let code = interp.eval(&args[0])?;
    interp.eval(&code)
}

fn return_value(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let value = match args.first() {
        Some(expr) => interp.eval(expr)?,
        None => LullValue::Nil,
    };
    Ok(LullValue::Return(Box::new(value)))
}

fn print(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(interp.eval(arg)?.to_string());
    }
    let message = parts.join(" ");
    info!(target: "script.lull", script = interp.script(), "{}", message);
    data(message)
}

fn if_else(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    if !(2..=3).contains(&args.len()) {
        return Err("if expects a condition and one or two branches".to_string());
    }
    if interp.eval(&args[0])?.is_truthy() {
        interp.eval(&args[1])
    } else {
        args.get(2).map_or(Ok(LullValue::Nil), |branch| interp.eval(branch))
    }
}

fn and(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    for arg in args {
        if !interp.eval(arg)?.is_truthy() {
            return data(false);
        }
    }
    data(true)
}

fn or(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    for arg in args {
        if interp.eval(arg)?.is_truthy() {
            return data(true);
        }
    }
    data(false)
}

fn not(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    expect_args("not", args, 1)?;
    data(!interp.eval(&args[0])?.is_truthy())
}

fn fold(interp: &mut Interpreter<'_>, args: &[LullValue], op: Arith) -> LullResult<LullValue> {
    let values = eval_all(interp, args)?;
    let mut iter = values.into_iter();
    let Some(first) = iter.next() else {
        return Err(format!("{} expects at least 1 argument", op.symbol()));
    };
    let Some(second) = iter.next() else {
        return match op {
            Arith::Sub => arithmetic(op, &Variant::Int8(0), &first).map(LullValue::from),
            _ => Ok(LullValue::from(first)),
        };
    };
    let mut acc = arithmetic(op, &first, &second)?;
    for value in iter {
        acc = arithmetic(op, &acc, &value)?;
    }
    Ok(LullValue::from(acc))
}

fn compare_two(interp: &mut Interpreter<'_>, args: &[LullValue], op: Compare) -> LullResult<LullValue> {
    expect_args(op.symbol(), args, 2)?;
    let lhs = interp.eval_data(&args[0])?;
    let rhs = interp.eval_data(&args[1])?;
    data(compare(op, &lhs, &rhs)?)
}

macro_rules! arith_builtin {
    ($($name:ident => $op:expr),* $(,)?) => {
        $(
            fn $name(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
                fold(interp, args, $op)
            }
        )*
    };
}

macro_rules! compare_builtin {
    ($($name:ident => $op:expr),* $(,)?) => {
        $(
            fn $name(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
                compare_two(interp, args, $op)
            }
        )*
    };
}

arith_builtin!(add => Arith::Add, sub => Arith::Sub, mul => Arith::Mul, div => Arith::Div, rem => Arith::Mod);
compare_builtin!(
    eq => Compare::Eq,
    ne => Compare::Ne,
    lt => Compare::Lt,
    gt => Compare::Gt,
    le => Compare::Le,
    ge => Compare::Ge,
);

/// 按维数求值分量
fn vector_args<T>(
    interp: &mut Interpreter<'_>,
    args: &[LullValue],
    dims: usize,
    cast: fn(&Variant) -> Option<T>,
) -> LullResult<Vec<T>> {
    const INVALID: &str = "Invalid arguments for constructing vector.";
    if args.len() != dims {
        return Err(INVALID.to_string());
    }
    let mut out = Vec::with_capacity(dims);
    for arg in args {
        let value = interp.eval_data(arg)?;
        out.push(cast(&value).ok_or_else(|| INVALID.to_string())?);
    }
    Ok(out)
}

fn float(value: &Variant) -> Option<f32> {
    value.as_f64().map(|v| v as f32)
}

fn int(value: &Variant) -> Option<i32> {
    value.as_f64().map(|v| v as i32)
}

fn vec2(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let v = vector_args(interp, args, 2, float)?;
    data(Vec2::new(v[0], v[1]))
}

fn vec3(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let v = vector_args(interp, args, 3, float)?;
    data(Vec3::new(v[0], v[1], v[2]))
}

fn vec4(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let v = vector_args(interp, args, 4, float)?;
    data(Vec4::new(v[0], v[1], v[2], v[3]))
}

fn vec2i(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let v = vector_args(interp, args, 2, int)?;
    data(IVec2::new(v[0], v[1]))
}

fn vec3i(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let v = vector_args(interp, args, 3, int)?;
    data(IVec3::new(v[0], v[1], v[2]))
}

fn vec4i(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let v = vector_args(interp, args, 4, int)?;
    data(IVec4::new(v[0], v[1], v[2], v[3]))
}

/// `(quat w x y z)`，标量在前
fn quat(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let v = vector_args(interp, args, 4, float)
        .map_err(|_| "Invalid arguments for constructing quaternion.".to_string())?;
    data(Quat::from_xyzw(v[1], v[2], v[3], v[0]))
}

/// 读取分量，`w` 对四元数而言是标量部分
fn component(value: &Variant, index: usize) -> Option<Variant> {
    let value = match value {
        Variant::Vec2(v) => Variant::Float(*v.to_array().get(index)?),
        Variant::Vec3(v) => Variant::Float(*v.to_array().get(index)?),
        Variant::Vec4(v) => Variant::Float(*v.to_array().get(index)?),
        Variant::Vec2i(v) => Variant::Int32(*v.to_array().get(index)?),
        Variant::Vec3i(v) => Variant::Int32(*v.to_array().get(index)?),
        Variant::Vec4i(v) => Variant::Int32(*v.to_array().get(index)?),
        Variant::Quat(q) => Variant::Float(*q.to_array().get(index)?),
        _ => return None,
    };
    Some(value)
}

fn with_component(value: &Variant, index: usize, new: &Variant) -> Option<Variant> {
    fn replace<T: Copy, const N: usize>(mut parts: [T; N], index: usize, new: T) -> Option<[T; N]> {
        *parts.get_mut(index)? = new;
        Some(parts)
    }
    let f = new.as_f64().map(|v| v as f32);
    let i = new.as_integral().and_then(|v| i32::try_from(v).ok());
    let value = match value {
        Variant::Vec2(v) => Variant::Vec2(Vec2::from_array(replace(v.to_array(), index, f?)?)),
        Variant::Vec3(v) => Variant::Vec3(Vec3::from_array(replace(v.to_array(), index, f?)?)),
        Variant::Vec4(v) => Variant::Vec4(Vec4::from_array(replace(v.to_array(), index, f?)?)),
        Variant::Vec2i(v) => Variant::Vec2i(IVec2::from_array(replace(v.to_array(), index, i?)?)),
        Variant::Vec3i(v) => Variant::Vec3i(IVec3::from_array(replace(v.to_array(), index, i?)?)),
        Variant::Vec4i(v) => Variant::Vec4i(IVec4::from_array(replace(v.to_array(), index, i?)?)),
        Variant::Quat(q) => Variant::Quat(Quat::from_array(replace(q.to_array(), index, f?)?)),
        _ => return None,
    };
    Some(value)
}

fn get_component(
    interp: &mut Interpreter<'_>,
    args: &[LullValue],
    name: &str,
    index: usize,
) -> LullResult<LullValue> {
    let invalid = || format!("{}: invalid arguments", name);
    if args.len() != 1 {
        return Err(invalid());
    }
    let value = interp.eval_data(&args[0])?;
    component(&value, index).map(LullValue::Data).ok_or_else(invalid)
}

/// 第一个参数是符号时把新值写回该变量
fn set_component(
    interp: &mut Interpreter<'_>,
    args: &[LullValue],
    name: &str,
    index: usize,
) -> LullResult<LullValue> {
    let invalid = || format!("{}: invalid arguments", name);
    if args.len() != 2 {
        return Err(invalid());
    }
    let target = interp.eval_data(&args[0])?;
    let new = interp.eval_data(&args[1])?;
    let updated = with_component(&target, index, &new).ok_or_else(invalid)?;
    let updated = LullValue::Data(updated);
    if let Some(symbol) = args[0].as_symbol() {
        interp.env().assign(symbol, updated.clone());
    }
    Ok(updated)
}

macro_rules! component_builtins {
    ($($get:ident, $set:ident => $index:expr, $get_name:literal, $set_name:literal;)*) => {
        $(
            fn $get(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
                get_component(interp, args, $get_name, $index)
            }

            fn $set(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
                set_component(interp, args, $set_name, $index)
            }
        )*
    };
}

component_builtins! {
    get_x, set_x => 0, "get-x", "set-x";
    get_y, set_y => 1, "get-y", "set-y";
    get_z, set_z => 2, "get-z", "set-z";
    get_w, set_w => 3, "get-w", "set-w";
}

fn map_size(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    expect_args("map-size", args, 1)?;
    match interp.eval_data(&args[0])? {
        Variant::Map(map) => data(map.len() as i32),
        other => Err(format!("map-size expects a map, got {}", other)),
    }
}

fn array_size(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    expect_args("array-size", args, 1)?;
    match interp.eval_data(&args[0])? {
        Variant::Array(array) => data(array.len() as i32),
        other => Err(format!("array-size expects an array, got {}", other)),
    }
}

fn duration_arg(interp: &mut Interpreter<'_>, args: &[LullValue], name: &str) -> LullResult<Duration> {
    expect_args(name, args, 1)?;
    match interp.eval_data(&args[0])? {
        Variant::Duration(duration) => Ok(duration),
        other => Err(format!("{} expects a duration, got {}", name, other)),
    }
}

fn duration_from_seconds(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    expect_args("durationFromSeconds", args, 1)?;
    let seconds = interp
        .eval_data(&args[0])?
        .as_f64()
        .ok_or_else(|| "durationFromSeconds expects a number".to_string())?;
    Duration::try_from_secs_f64(seconds)
        .map(|d| LullValue::Data(Variant::Duration(d)))
        .map_err(|err| format!("Invalid duration: {}", err))
}

fn duration_from_milliseconds(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    expect_args("durationFromMilliseconds", args, 1)?;
    let millis = interp
        .eval_data(&args[0])?
        .as_integral()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| "durationFromMilliseconds expects a non-negative integer".to_string())?;
    data(Duration::from_millis(millis))
}

fn seconds_from_duration(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let duration = duration_arg(interp, args, "secondsFromDuration")?;
    data(duration.as_secs_f64())
}

fn milliseconds_from_duration(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    let duration = duration_arg(interp, args, "millisecondsFromDuration")?;
    let millis = i64::try_from(duration.as_millis()).map_err(|_| "Duration overflow.".to_string())?;
    data(millis)
}

fn hash_string(interp: &mut Interpreter<'_>, args: &[LullValue]) -> LullResult<LullValue> {
    expect_args("hash", args, 1)?;
    match interp.eval_data(&args[0])? {
        Variant::String(s) => data(hash(&s)),
        other => Err(format!("hash expects a string, got {}", other)),
    }
}

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("=", set),
    ("do", do_block),
    ("def", def),
    ("macro", define_macro),
    ("lambda", lambda),
    ("eval", eval),
    ("return", return_value),
    ("?", print),
    ("if", if_else),
    ("and", and),
    ("or", or),
    ("not", not),
    ("+", add),
    ("-", sub),
    ("*", mul),
    ("/", div),
    ("%", rem),
    ("==", eq),
    ("!=", ne),
    ("<", lt),
    (">", gt),
    ("<=", le),
    (">=", ge),
    ("vec2", vec2),
    ("vec3", vec3),
    ("vec4", vec4),
    ("vec2i", vec2i),
    ("vec3i", vec3i),
    ("vec4i", vec4i),
    ("quat", quat),
    ("get-x", get_x),
    ("get-y", get_y),
    ("get-z", get_z),
    ("get-w", get_w),
    ("set-x", set_x),
    ("set-y", set_y),
    ("set-z", set_z),
    ("set-w", set_w),
    ("map-size", map_size),
    ("array-size", array_size),
    ("durationFromSeconds", duration_from_seconds),
    ("durationFromMilliseconds", duration_from_milliseconds),
    ("secondsFromDuration", seconds_from_duration),
    ("millisecondsFromDuration", milliseconds_from_duration),
    ("hash", hash_string),
];

/// 把全部内置函数定义到全局作用域
pub fn install(env: &mut Environment) {
    for (name, call) in BUILTINS {
        env.define_global(name, LullValue::Builtin(Builtin { name: *name, call: *call }));
    }
    env.define_global("null", LullValue::Nil);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::lull::parser::parse;

    fn exec(env: &mut Environment, src: &str) -> LullResult<LullValue> {
        let code = parse(src, 64)?;
        Interpreter::new(env, "test", 64).run(&code)
    }

    fn value(env: &mut Environment, src: &str) -> Variant {
        exec(env, src).unwrap().to_variant().unwrap()
    }

    fn env() -> Environment {
        let mut env = Environment::new();
        install(&mut env);
        env
    }

    #[test]
    fn test_set_and_arithmetic() {
        let mut env = env();
        exec(&mut env, "(= x 10)").unwrap();
        assert_eq!(value(&mut env, "(= y (+ (* (+ x 3) 2) 1))"), Variant::Int32(27));
        assert_eq!(value(&mut env, "(- 5)"), Variant::Int32(-5));
        assert_eq!(value(&mut env, "(+ 1 2 3 4)"), Variant::Int32(10));
        assert_eq!(exec(&mut env, "(= 1 2)").unwrap_err(), "Expected symbol.");
        assert_eq!(exec(&mut env, "(= x)").unwrap_err(), "Expected expression.");
    }

    #[test]
    fn test_def_and_lambda() {
        let mut env = env();
        exec(&mut env, "(def square (n) (* n n))").unwrap();
        assert_eq!(value(&mut env, "(square 7)"), Variant::Int32(49));
        assert_eq!(exec(&mut env, "(square 1 2)").unwrap_err(), "Too many arguments.");
        exec(&mut env, "(= twice (lambda (n) (+ n n)))").unwrap();
        assert_eq!(value(&mut env, "(twice 4)"), Variant::Int32(8));
        assert_eq!(exec(&mut env, "(def bad x 1)").unwrap_err(), "Expected arguments.");
        assert_eq!(
            exec(&mut env, "(def bad (1) 1)").unwrap_err(),
            "Parameter should be a symbol."
        );
        let params: Vec<String> = (0..17).map(|i| format!("p{}", i)).collect();
        assert_eq!(
            exec(&mut env, &format!("(def many ({}) 1)", params.join(" "))).unwrap_err(),
            "Too many arguments, limit of 16."
        );
    }

    #[test]
    fn test_return_and_macro() {
        let mut env = env();
        exec(&mut env, "(def early (n) (return (* n 2)) 99)").unwrap();
        assert_eq!(value(&mut env, "(early 3)"), Variant::Int32(6));
        assert_eq!(value(&mut env, "(do (return 1) 2)"), Variant::Int32(1));

        // 宏参数在每次引用时重新求值
        exec(&mut env, "(= counter 0)").unwrap();
        exec(&mut env, "(macro twice (expr) expr expr)").unwrap();
        exec(&mut env, "(twice (= counter (+ counter 1)))").unwrap();
        assert_eq!(value(&mut env, "counter"), Variant::Int32(2));
    }

    #[test]
    fn test_control_flow() {
        let mut env = env();
        assert_eq!(value(&mut env, "(if (< 1 2) 'yes' 'no')"), Variant::from("yes"));
        assert_eq!(value(&mut env, "(if false 1)"), Variant::Empty);
        assert_eq!(value(&mut env, "(and true 1 (not false))"), Variant::Bool(true));
        assert_eq!(value(&mut env, "(or null 0 false)"), Variant::Bool(false));
        assert_eq!(value(&mut env, "(eval (+ 1 1))"), Variant::Int32(2));
    }

    #[test]
    fn test_print_joins_arguments() {
        let mut env = env();
        assert_eq!(value(&mut env, "(? 'a' 1 2.5f)"), Variant::from("a 1 2.5"));
    }

    #[test]
    fn test_vectors() {
        let mut env = env();
        assert_eq!(value(&mut env, "(vec2i 1 2)"), Variant::Vec2i(IVec2::new(1, 2)));
        assert_eq!(
            value(&mut env, "(vec3 3.0f 4.0f 5.0f)"),
            Variant::Vec3(Vec3::new(3.0, 4.0, 5.0))
        );
        exec(&mut env, "(= q (quat 0.1f 0.2f 0.3f 0.4f))").unwrap();
        assert_eq!(value(&mut env, "(get-x q)"), Variant::Float(0.2));
        assert_eq!(value(&mut env, "(get-w q)"), Variant::Float(0.1));
        assert_eq!(
            exec(&mut env, "(vec2 1)").unwrap_err(),
            "Invalid arguments for constructing vector."
        );
        assert_eq!(exec(&mut env, "(get-z (vec2 1 2))").unwrap_err(), "get-z: invalid arguments");
    }

    #[test]
    fn test_setters_write_back() {
        let mut env = env();
        exec(&mut env, "(= v (vec4i 6 7 8 9))").unwrap();
        exec(&mut env, "(set-w v 0)").unwrap();
        assert_eq!(value(&mut env, "(get-w v)"), Variant::Int32(0));
        exec(&mut env, "(= f (vec2 1.0f 2.0f))").unwrap();
        exec(&mut env, "(set-y f 0.0)").unwrap();
        assert_eq!(value(&mut env, "f"), Variant::Vec2(Vec2::new(1.0, 0.0)));
        assert_eq!(exec(&mut env, "(set-x v 0.5)").unwrap_err(), "set-x: invalid arguments");
    }

    #[test]
    fn test_durations_and_sizes() {
        let mut env = env();
        assert_eq!(
            value(&mut env, "(durationFromMilliseconds 1500)"),
            Variant::Duration(Duration::from_millis(1500))
        );
        assert_eq!(
            value(&mut env, "(== 0.5 (secondsFromDuration (durationFromSeconds 0.5)))"),
            Variant::Bool(true)
        );
        assert_eq!(
            value(&mut env, "(millisecondsFromDuration (durationFromSeconds 2))"),
            Variant::Int64(2000)
        );
        assert_eq!(value(&mut env, "(map-size {a 1 b 2})"), Variant::Int32(2));
        assert_eq!(value(&mut env, "(array-size [1 2 3])"), Variant::Int32(3));
        assert_eq!(value(&mut env, "(hash 'foo')"), Variant::Uint32(hash("foo")));
        assert_eq!(
            exec(&mut env, "(hash)").unwrap_err(),
            "hash expects 1 args, but got 0"
        );
    }
}
