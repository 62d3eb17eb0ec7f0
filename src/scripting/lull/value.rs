//! LullScript 的值
//!
//! 代码与数据使用同一种表示：解析结果是 `LullValue` 树，求值时列表按调用
//! 处理，宏参数绑定的是未求值的语法树。

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use super::interpreter::Interpreter;
use crate::scripting::call::ScriptableFn;
use crate::scripting::types::Variant;

/// 求值错误，只携带消息
pub type LullResult<T> = Result<T, String>;

/// 内置函数接收未求值的参数
pub type BuiltinFn = fn(&mut Interpreter<'_>, &[LullValue]) -> LullResult<LullValue>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub call: BuiltinFn,
}

/// 已注册的原生函数
///
/// 所有脚本环境共享同一个 `live` 标记，注销后已加载的脚本也无法再调用。
#[derive(Clone)]
pub struct NativeBinding {
    pub function: ScriptableFn,
    pub live: Rc<Cell<bool>>,
}

/// `def`/`lambda`/`macro` 定义的函数
#[derive(Debug)]
pub struct Lambda {
    pub params: Vec<Rc<str>>,
    pub body: Rc<[LullValue]>,
}

#[derive(Clone, Default)]
pub enum LullValue {
    #[default]
    Nil,
    Data(Variant),
    Symbol(Rc<str>),
    List(Rc<[LullValue]>),
    ArrayLiteral(Rc<[LullValue]>),
    MapLiteral(Rc<[(LullValue, LullValue)]>),
    Builtin(Builtin),
    Native(NativeBinding),
    Lambda(Rc<Lambda>),
    Macro(Rc<Lambda>),
    /// `return` 的结果，由最近的 `do` 块展开
    Return(Box<LullValue>),
}

impl LullValue {
    #[cfg(test)]
    pub fn symbol(name: &str) -> Self {
        LullValue::Symbol(Rc::from(name))
    }

    #[cfg(test)]
    pub fn is_nil(&self) -> bool {
        matches!(self, LullValue::Nil)
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            LullValue::Symbol(name) => Some(name),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn as_variant(&self) -> Option<&Variant> {
        match self {
            LullValue::Data(value) => Some(value),
            _ => None,
        }
    }

    /// 转为原生值，空值对应 `Variant::Empty`
    pub fn to_variant(&self) -> Option<Variant> {
        match self {
            LullValue::Nil => Some(Variant::Empty),
            LullValue::Data(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn from_variant(value: Variant) -> Self {
        match value {
            Variant::Empty => LullValue::Nil,
            value => LullValue::Data(value),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            LullValue::Nil => false,
            LullValue::Data(value) => value.is_truthy(),
            _ => true,
        }
    }

    /// 错误信息中使用的类别名
    pub fn type_name(&self) -> &'static str {
        match self {
            LullValue::Nil => "nil",
            LullValue::Data(_) => "value",
            LullValue::Symbol(_) => "symbol",
            LullValue::List(_) => "expression",
            LullValue::ArrayLiteral(_) => "array literal",
            LullValue::MapLiteral(_) => "map literal",
            LullValue::Builtin(_) | LullValue::Native(_) => "function",
            LullValue::Lambda(_) => "lambda",
            LullValue::Macro(_) => "macro",
            LullValue::Return(_) => "return",
        }
    }
}

impl From<Variant> for LullValue {
    fn from(value: Variant) -> Self {
        LullValue::from_variant(value)
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[LullValue], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

impl fmt::Display for LullValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LullValue::Nil => f.write_str("nil"),
            LullValue::Data(value) => write!(f, "{}", value),
            LullValue::Symbol(name) => f.write_str(name),
            LullValue::List(items) => write_seq(f, "(", items, ")"),
            LullValue::ArrayLiteral(items) => write_seq(f, "[", items, "]"),
            LullValue::MapLiteral(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{} {}", key, value)?;
                }
                f.write_str("}")
            }
            LullValue::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name),
            LullValue::Native(native) => write!(f, "<native {}>", native.function.name()),
            LullValue::Lambda(_) => f.write_str("<lambda>"),
            LullValue::Macro(_) => f.write_str("<macro>"),
            LullValue::Return(value) => write!(f, "{}", value),
        }
    }
}

impl fmt::Debug for LullValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let list = LullValue::List(Rc::from(vec![
            LullValue::symbol("+"),
            LullValue::Data(Variant::Int32(1)),
            LullValue::Data(Variant::Float(2.5)),
        ]));
        assert_eq!(list.to_string(), "(+ 1 2.5)");
        assert_eq!(LullValue::Nil.to_string(), "nil");
    }

    #[test]
    fn test_variant_conversion() {
        assert!(LullValue::from_variant(Variant::Empty).is_nil());
        assert_eq!(LullValue::Nil.to_variant(), Some(Variant::Empty));
        assert_eq!(LullValue::symbol("x").to_variant(), None);
        assert!(!LullValue::Data(Variant::Int32(0)).is_truthy());
        assert!(LullValue::Data(Variant::from("")).is_truthy());
    }
}
