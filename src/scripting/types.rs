//! 跨语言值模型
//!
//! `Variant` 是所有脚本后端共享的通用值表示；`ValueKind` 是可脚本化类型的
//! 封闭有序列表，后端按它选择快速路径的转换函数。

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use bevy_ecs::entity::Entity;
use glam::{IVec2, IVec3, IVec4, Mat4, Quat, Vec2, Vec3, Vec4};

/// 字符串哈希值
pub type HashValue = u32;

/// 计算字符串的 32 位 FNV-1a 哈希，空字符串的哈希为 0
pub const fn hash(value: &str) -> HashValue {
    let bytes = value.as_bytes();
    if bytes.is_empty() {
        return 0;
    }
    let mut result: u32 = 0x811c_9dc5;
    let mut i = 0;
    while i < bytes.len() {
        result ^= bytes[i] as u32;
        result = result.wrapping_mul(0x0100_0193);
        i += 1;
    }
    result
}

/// 以字符串为键的通用映射
pub type VariantMap = BTreeMap<String, Variant>;

/// 通用数组
pub type VariantArray = Vec<Variant>;

/// 带类型标识的键值事件
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventWrapper {
    type_id: HashValue,
    values: VariantMap,
}

impl EventWrapper {
    pub fn new(name: &str) -> Self {
        Self::from_type(hash(name))
    }

    pub fn from_type(type_id: HashValue) -> Self {
        Self {
            type_id,
            values: VariantMap::new(),
        }
    }

    pub fn type_id(&self) -> HashValue {
        self.type_id
    }

    pub fn values(&self) -> &VariantMap {
        &self.values
    }

    pub fn set_values(&mut self, values: VariantMap) {
        self.values = values;
    }

    pub fn set_value(&mut self, key: &str, value: impl Into<Variant>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<&Variant> {
        self.values.get(key)
    }
}

/// 事件回调
///
/// 脚本函数传给原生代码时被包装成 `EventHandler`；调用时由所属后端
/// 重新进入对应的运行时。
#[derive(Clone)]
pub struct EventHandler(Rc<dyn Fn(&EventWrapper)>);

impl EventHandler {
    pub fn new(handler: impl Fn(&EventWrapper) + 'static) -> Self {
        Self(Rc::new(handler))
    }

    pub fn call(&self, event: &EventWrapper) {
        (self.0)(event)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventHandler")
    }
}

impl PartialEq for EventHandler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// 通用值
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Variant {
    #[default]
    Empty,
    Bool(bool),
    Int8(i8),
    Uint8(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    String(String),
    Float(f32),
    Double(f64),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Vec2i(IVec2),
    Vec3i(IVec3),
    Vec4i(IVec4),
    Quat(Quat),
    Mat4(Mat4),
    Event(EventWrapper),
    Duration(Duration),
    Entity(Entity),
    Map(VariantMap),
    Array(VariantArray),
    EventHandler(EventHandler),
}

impl Variant {
    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    /// 当前值对应的类型，空值返回 `None`
    pub fn kind(&self) -> Option<ValueKind> {
        let kind = match self {
            Variant::Empty => return None,
            Variant::Bool(_) => ValueKind::Bool,
            Variant::Int8(_) => ValueKind::Int8,
            Variant::Uint8(_) => ValueKind::Uint8,
            Variant::Int16(_) => ValueKind::Int16,
            Variant::Uint16(_) => ValueKind::Uint16,
            Variant::Int32(_) => ValueKind::Int32,
            Variant::Uint32(_) => ValueKind::Uint32,
            Variant::Int64(_) => ValueKind::Int64,
            Variant::Uint64(_) => ValueKind::Uint64,
            Variant::String(_) => ValueKind::String,
            Variant::Float(_) => ValueKind::Float,
            Variant::Double(_) => ValueKind::Double,
            Variant::Vec2(_) => ValueKind::Vec2,
            Variant::Vec3(_) => ValueKind::Vec3,
            Variant::Vec4(_) => ValueKind::Vec4,
            Variant::Vec2i(_) => ValueKind::Vec2i,
            Variant::Vec3i(_) => ValueKind::Vec3i,
            Variant::Vec4i(_) => ValueKind::Vec4i,
            Variant::Quat(_) => ValueKind::Quat,
            Variant::Mat4(_) => ValueKind::Mat4,
            Variant::Event(_) => ValueKind::Event,
            Variant::Duration(_) => ValueKind::Duration,
            Variant::Entity(_) => ValueKind::Entity,
            Variant::Map(_) => ValueKind::VariantMap,
            Variant::Array(_) => ValueKind::VariantArray,
            Variant::EventHandler(_) => ValueKind::EventHandler,
        };
        Some(kind)
    }

    pub fn is_integer(&self) -> bool {
        self.as_i128().is_some()
    }

    pub fn is_number(&self) -> bool {
        self.as_f64().is_some()
    }

    /// 任意整数值（浮点值不算）
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Variant::Int8(v) => Some(v as i128),
            Variant::Uint8(v) => Some(v as i128),
            Variant::Int16(v) => Some(v as i128),
            Variant::Uint16(v) => Some(v as i128),
            Variant::Int32(v) => Some(v as i128),
            Variant::Uint32(v) => Some(v as i128),
            Variant::Int64(v) => Some(v as i128),
            Variant::Uint64(v) => Some(v as i128),
            _ => None,
        }
    }

    /// 任意数值转为 `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Variant::Float(v) => Some(v as f64),
            Variant::Double(v) => Some(v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    /// 数值转为整数：整数直接返回，浮点值必须没有小数部分
    pub fn as_integral(&self) -> Option<i128> {
        if let Some(v) = self.as_i128() {
            return Some(v);
        }
        let v = match *self {
            Variant::Float(v) => v as f64,
            Variant::Double(v) => v,
            _ => return None,
        };
        if v.is_finite() && v.fract() == 0.0 && v.abs() < 1.8e19 {
            Some(v as i128)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    /// 脚本中的真值判断：空值、false 与数值 0 为假
    pub fn is_truthy(&self) -> bool {
        match self {
            Variant::Empty => false,
            Variant::Bool(b) => *b,
            other => other.as_f64().map(|v| v != 0.0).unwrap_or(true),
        }
    }
}

macro_rules! impl_variant_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Variant::$variant(value)
                }
            }
        )*
    };
}

impl_variant_from!(
    bool => Bool,
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    u64 => Uint64,
    String => String,
    f32 => Float,
    f64 => Double,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    IVec2 => Vec2i,
    IVec3 => Vec3i,
    IVec4 => Vec4i,
    Quat => Quat,
    Mat4 => Mat4,
    EventWrapper => Event,
    Duration => Duration,
    Entity => Entity,
    VariantMap => Map,
    VariantArray => Array,
    EventHandler => EventHandler,
);

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => f.write_str("nil"),
            Variant::Bool(v) => write!(f, "{}", v),
            Variant::String(v) => f.write_str(v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::Vec2(v) => write!(f, "({}, {})", v.x, v.y),
            Variant::Vec3(v) => write!(f, "({}, {}, {})", v.x, v.y, v.z),
            Variant::Vec4(v) => write!(f, "({}, {}, {}, {})", v.x, v.y, v.z, v.w),
            Variant::Vec2i(v) => write!(f, "({}, {})", v.x, v.y),
            Variant::Vec3i(v) => write!(f, "({}, {}, {})", v.x, v.y, v.z),
            Variant::Vec4i(v) => write!(f, "({}, {}, {}, {})", v.x, v.y, v.z, v.w),
            Variant::Quat(q) => write!(f, "({}, {}, {}, {})", q.x, q.y, q.z, q.w),
            Variant::Mat4(m) => write!(f, "{}", m),
            Variant::Event(e) => write!(f, "event({})", e.type_id()),
            Variant::Duration(d) => write!(f, "{}ns", d.as_nanos()),
            Variant::Entity(e) => write!(f, "{:?}", e),
            Variant::Map(m) => {
                f.write_str("{")?;
                for (i, (key, value)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Variant::Array(a) => {
                f.write_str("[")?;
                for (i, value) in a.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                f.write_str("]")
            }
            Variant::EventHandler(_) => f.write_str("<function>"),
            integer => match integer.as_i128() {
                Some(v) => write!(f, "{}", v),
                None => f.write_str("?"),
            },
        }
    }
}

/// 可脚本化类型
///
/// 变体顺序即类型列表顺序，不可调整。`Optional` 与 `Sequence` 包装其余
/// 类型，`Any` 表示走通用 `Variant` 编码。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    String,
    Float,
    Double,
    Vec2,
    Vec3,
    Vec4,
    Vec2i,
    Vec3i,
    Vec4i,
    Quat,
    Mat4,
    Event,
    Duration,
    Entity,
    VariantMap,
    VariantArray,
    EventHandler,
    Optional(Box<ValueKind>),
    Sequence(Box<ValueKind>),
    Any,
}

/// 快速路径类型列表，顺序决定歧义值的解析优先级
pub const SCRIPTABLE_TYPES: &[ValueKind] = &[
    ValueKind::Bool,
    ValueKind::Int8,
    ValueKind::Uint8,
    ValueKind::Int16,
    ValueKind::Uint16,
    ValueKind::Int32,
    ValueKind::Uint32,
    ValueKind::Int64,
    ValueKind::Uint64,
    ValueKind::String,
    ValueKind::Float,
    ValueKind::Double,
    ValueKind::Vec2,
    ValueKind::Vec3,
    ValueKind::Vec4,
    ValueKind::Vec2i,
    ValueKind::Vec3i,
    ValueKind::Vec4i,
    ValueKind::Quat,
    ValueKind::Mat4,
    ValueKind::Event,
    ValueKind::Duration,
    ValueKind::Entity,
    ValueKind::VariantMap,
    ValueKind::VariantArray,
    ValueKind::EventHandler,
];

/// 没有类型提示时，动态脚本值依次尝试的解码类型
///
/// 是 `SCRIPTABLE_TYPES` 的子序列，第一个成功的解码胜出。
pub const DYNAMIC_DECODE_ORDER: &[ValueKind] = &[
    ValueKind::Bool,
    ValueKind::Int32,
    ValueKind::Int64,
    ValueKind::String,
    ValueKind::Double,
    ValueKind::Event,
    ValueKind::VariantMap,
    ValueKind::VariantArray,
    ValueKind::EventHandler,
];

impl ValueKind {
    pub fn optional(inner: ValueKind) -> Self {
        ValueKind::Optional(Box::new(inner))
    }

    pub fn sequence(inner: ValueKind) -> Self {
        ValueKind::Sequence(Box::new(inner))
    }

    /// 在类型列表中的位置，包装类型与 `Any` 返回 `None`
    pub fn list_position(&self) -> Option<usize> {
        SCRIPTABLE_TYPES.iter().position(|kind| kind == self)
    }

    /// 是否允许出现在 `Optional`/`Sequence` 包装中
    pub fn is_wrappable(&self) -> bool {
        !matches!(
            self,
            ValueKind::Event
                | ValueKind::Duration
                | ValueKind::Entity
                | ValueKind::VariantMap
                | ValueKind::VariantArray
                | ValueKind::EventHandler
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ValueKind::Int8
                | ValueKind::Uint8
                | ValueKind::Int16
                | ValueKind::Uint16
                | ValueKind::Int32
                | ValueKind::Uint32
                | ValueKind::Int64
                | ValueKind::Uint64
        )
    }

    /// 用整数构造该类型的值，超出范围返回 `None`
    pub fn integer(&self, value: i128) -> Option<Variant> {
        let variant = match self {
            ValueKind::Int8 => Variant::Int8(i8::try_from(value).ok()?),
            ValueKind::Uint8 => Variant::Uint8(u8::try_from(value).ok()?),
            ValueKind::Int16 => Variant::Int16(i16::try_from(value).ok()?),
            ValueKind::Uint16 => Variant::Uint16(u16::try_from(value).ok()?),
            ValueKind::Int32 => Variant::Int32(i32::try_from(value).ok()?),
            ValueKind::Uint32 => Variant::Uint32(u32::try_from(value).ok()?),
            ValueKind::Int64 => Variant::Int64(i64::try_from(value).ok()?),
            ValueKind::Uint64 => Variant::Uint64(u64::try_from(value).ok()?),
            _ => return None,
        };
        Some(variant)
    }

    /// 把一个已有的 `Variant` 转换为该类型
    ///
    /// 数值之间按值转换（整数要求无损），包装类型逐层转换，其余类型要求
    /// 精确匹配。
    pub fn coerce(&self, value: Variant) -> Option<Variant> {
        match self {
            ValueKind::Any => Some(value),
            ValueKind::Optional(inner) => {
                if value.is_empty() {
                    Some(Variant::Empty)
                } else {
                    inner.coerce(value)
                }
            }
            ValueKind::Sequence(inner) => match value {
                Variant::Array(items) => items
                    .into_iter()
                    .map(|item| inner.coerce(item))
                    .collect::<Option<Vec<_>>>()
                    .map(Variant::Array),
                _ => None,
            },
            kind if kind.is_integer() => value.as_integral().and_then(|v| kind.integer(v)),
            ValueKind::Float => value.as_f64().map(|v| Variant::Float(v as f32)),
            ValueKind::Double => value.as_f64().map(Variant::Double),
            kind => {
                if value.kind().as_ref() == Some(kind) {
                    Some(value)
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => f.write_str("bool"),
            ValueKind::Int8 => f.write_str("int8"),
            ValueKind::Uint8 => f.write_str("uint8"),
            ValueKind::Int16 => f.write_str("int16"),
            ValueKind::Uint16 => f.write_str("uint16"),
            ValueKind::Int32 => f.write_str("int32"),
            ValueKind::Uint32 => f.write_str("uint32"),
            ValueKind::Int64 => f.write_str("int64"),
            ValueKind::Uint64 => f.write_str("uint64"),
            ValueKind::String => f.write_str("string"),
            ValueKind::Float => f.write_str("float"),
            ValueKind::Double => f.write_str("double"),
            ValueKind::Vec2 => f.write_str("vec2"),
            ValueKind::Vec3 => f.write_str("vec3"),
            ValueKind::Vec4 => f.write_str("vec4"),
            ValueKind::Vec2i => f.write_str("vec2i"),
            ValueKind::Vec3i => f.write_str("vec3i"),
            ValueKind::Vec4i => f.write_str("vec4i"),
            ValueKind::Quat => f.write_str("quat"),
            ValueKind::Mat4 => f.write_str("mat4"),
            ValueKind::Event => f.write_str("event"),
            ValueKind::Duration => f.write_str("duration"),
            ValueKind::Entity => f.write_str("entity"),
            ValueKind::VariantMap => f.write_str("map"),
            ValueKind::VariantArray => f.write_str("array"),
            ValueKind::EventHandler => f.write_str("event handler"),
            ValueKind::Optional(inner) => write!(f, "optional {}", inner),
            ValueKind::Sequence(inner) => write!(f, "array of {}", inner),
            ValueKind::Any => f.write_str("any value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash() {
        assert_eq!(hash(""), 0);
        assert_eq!(hash("a"), 0xe40c_292c);
        assert_ne!(hash("myEvent"), hash("myevent"));
        const ID: HashValue = hash("name");
        assert_eq!(ID, hash("name"));
    }

    #[test]
    fn test_scriptable_types_order() {
        assert_eq!(SCRIPTABLE_TYPES.first(), Some(&ValueKind::Bool));
        assert_eq!(SCRIPTABLE_TYPES.last(), Some(&ValueKind::EventHandler));
        assert!(ValueKind::Int8.list_position() < ValueKind::Uint64.list_position());
        assert!(ValueKind::String.list_position() < ValueKind::Float.list_position());
        assert!(ValueKind::Float.list_position() < ValueKind::Double.list_position());
        assert_eq!(ValueKind::optional(ValueKind::Bool).list_position(), None);
    }

    #[test]
    fn test_dynamic_order_is_subsequence() {
        let positions: Vec<_> = DYNAMIC_DECODE_ORDER
            .iter()
            .map(|kind| kind.list_position().unwrap())
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_wrappable() {
        assert!(ValueKind::Vec3.is_wrappable());
        assert!(!ValueKind::Entity.is_wrappable());
        assert!(!ValueKind::EventHandler.is_wrappable());
    }

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(
            ValueKind::Float.coerce(Variant::Int32(3)),
            Some(Variant::Float(3.0))
        );
        assert_eq!(
            ValueKind::Int32.coerce(Variant::Double(4.0)),
            Some(Variant::Int32(4))
        );
        assert_eq!(ValueKind::Int32.coerce(Variant::Double(4.5)), None);
        assert_eq!(ValueKind::Uint8.coerce(Variant::Int32(300)), None);
        assert_eq!(ValueKind::Int32.coerce(Variant::from("abc")), None);
    }

    #[test]
    fn test_coerce_wrappers() {
        let optional = ValueKind::optional(ValueKind::Int32);
        assert_eq!(optional.coerce(Variant::Empty), Some(Variant::Empty));
        assert_eq!(optional.coerce(Variant::Int64(2)), Some(Variant::Int32(2)));

        let sequence = ValueKind::sequence(ValueKind::Bool);
        let values = Variant::Array(vec![Variant::Bool(true), Variant::Bool(false)]);
        assert_eq!(sequence.coerce(values.clone()), Some(values));
        assert_eq!(
            sequence.coerce(Variant::Array(vec![Variant::Int32(1)])),
            None
        );
    }

    #[test]
    fn test_event_wrapper() {
        let mut event = EventWrapper::new("myEvent");
        event.set_value("count", 3);
        assert_eq!(event.type_id(), hash("myEvent"));
        assert_eq!(event.value("count"), Some(&Variant::Int32(3)));
    }

    #[test]
    fn test_event_handler_identity() {
        let a = EventHandler::new(|_| {});
        let b = a.clone();
        let c = EventHandler::new(|_| {});
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Variant::Empty.is_truthy());
        assert!(!Variant::Int32(0).is_truthy());
        assert!(Variant::Double(0.5).is_truthy());
        assert!(Variant::from("").is_truthy());
    }
}
