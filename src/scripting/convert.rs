//! Rust 类型与 `Variant` 之间的桥梁
//!
//! `Scriptable` 为类型列表中的每个类型声明其 `ValueKind`，后端据此选择
//! 快速路径；不在列表中的类型实现 `Scriptable` 时以 `ValueKind::Any`
//! 或 `VariantMap` 声明自身，经由通用 `Variant` 往返。

use std::time::Duration;

use bevy_ecs::entity::Entity;
use glam::{IVec2, IVec3, IVec4, Mat4, Quat, Vec2, Vec3, Vec4};

use super::types::{EventHandler, EventWrapper, ValueKind, Variant, VariantArray, VariantMap};

/// 可以跨越脚本边界的类型
pub trait Scriptable: Sized + 'static {
    /// 该类型在类型列表中的描述
    fn kind() -> ValueKind;

    fn into_variant(self) -> Variant;

    /// 从 `Variant` 还原，形状不符时返回 `None`
    fn from_variant(value: Variant) -> Option<Self>;
}

/// 原生函数的返回值
///
/// `()` 表示零个返回值，其余可脚本化类型表示一个返回值。
pub trait ScriptReturn: 'static {
    const COUNT: usize;

    fn into_return(self) -> Option<Variant>;
}

impl ScriptReturn for () {
    const COUNT: usize = 0;

    fn into_return(self) -> Option<Variant> {
        None
    }
}

impl<T: Scriptable> ScriptReturn for T {
    const COUNT: usize = 1;

    fn into_return(self) -> Option<Variant> {
        Some(self.into_variant())
    }
}

macro_rules! impl_scriptable_integer {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Scriptable for $ty {
                fn kind() -> ValueKind {
                    ValueKind::$kind
                }

                fn into_variant(self) -> Variant {
                    Variant::from(self)
                }

                fn from_variant(value: Variant) -> Option<Self> {
                    value.as_integral().and_then(|v| <$ty>::try_from(v).ok())
                }
            }
        )*
    };
}

impl_scriptable_integer!(
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    u64 => Uint64,
);

// 其余类型要求 `Variant` 精确匹配
macro_rules! impl_scriptable_exact {
    ($($ty:ty => $kind:ident / $variant:ident),* $(,)?) => {
        $(
            impl Scriptable for $ty {
                fn kind() -> ValueKind {
                    ValueKind::$kind
                }

                fn into_variant(self) -> Variant {
                    Variant::$variant(self)
                }

                fn from_variant(value: Variant) -> Option<Self> {
                    match value {
                        Variant::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_scriptable_exact!(
    bool => Bool / Bool,
    String => String / String,
    Vec2 => Vec2 / Vec2,
    Vec3 => Vec3 / Vec3,
    Vec4 => Vec4 / Vec4,
    IVec2 => Vec2i / Vec2i,
    IVec3 => Vec3i / Vec3i,
    IVec4 => Vec4i / Vec4i,
    Quat => Quat / Quat,
    Mat4 => Mat4 / Mat4,
    EventWrapper => Event / Event,
    Duration => Duration / Duration,
    Entity => Entity / Entity,
    VariantMap => VariantMap / Map,
    EventHandler => EventHandler / EventHandler,
);

impl Scriptable for f32 {
    fn kind() -> ValueKind {
        ValueKind::Float
    }

    fn into_variant(self) -> Variant {
        Variant::Float(self)
    }

    fn from_variant(value: Variant) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
}

impl Scriptable for f64 {
    fn kind() -> ValueKind {
        ValueKind::Double
    }

    fn into_variant(self) -> Variant {
        Variant::Double(self)
    }

    fn from_variant(value: Variant) -> Option<Self> {
        value.as_f64()
    }
}

impl Scriptable for Variant {
    fn kind() -> ValueKind {
        ValueKind::Any
    }

    fn into_variant(self) -> Variant {
        self
    }

    fn from_variant(value: Variant) -> Option<Self> {
        Some(value)
    }
}

impl<T: Scriptable> Scriptable for Option<T> {
    fn kind() -> ValueKind {
        ValueKind::optional(T::kind())
    }

    fn into_variant(self) -> Variant {
        match self {
            Some(value) => value.into_variant(),
            None => Variant::Empty,
        }
    }

    fn from_variant(value: Variant) -> Option<Self> {
        if value.is_empty() {
            Some(None)
        } else {
            T::from_variant(value).map(Some)
        }
    }
}

/// `Vec<Variant>` 即 `VariantArray`，其余元素类型为 `Sequence`
impl<T: Scriptable> Scriptable for Vec<T> {
    fn kind() -> ValueKind {
        match T::kind() {
            ValueKind::Any => ValueKind::VariantArray,
            inner => ValueKind::sequence(inner),
        }
    }

    fn into_variant(self) -> Variant {
        Variant::Array(self.into_iter().map(Scriptable::into_variant).collect())
    }

    fn from_variant(value: Variant) -> Option<Self> {
        match value {
            Variant::Array(items) => items.into_iter().map(T::from_variant).collect(),
            _ => None,
        }
    }
}

impl Variant {
    /// 由任意可脚本化类型构造
    pub fn from_value<T: Scriptable>(value: T) -> Self {
        value.into_variant()
    }

    /// 读出为任意可脚本化类型
    pub fn get<T: Scriptable>(&self) -> Option<T> {
        T::from_variant(self.clone())
    }
}

/// 便于构造参数列表
pub fn variant_array<I, T>(values: I) -> VariantArray
where
    I: IntoIterator<Item = T>,
    T: Scriptable,
{
    values.into_iter().map(Scriptable::into_variant).collect()
}
