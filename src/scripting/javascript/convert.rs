//! JavaScript 值与 `Variant` 之间的转换
//!
//! 向量与四元数是数字数组（四元数为 `[x, y, z, w]`），矩阵是
//! `{c0, c1, c2, c3}` 对象，事件是 `{type, data}` 对象。时长为纳秒数，
//! 实体为 `Entity::to_bits`。整数在 ±(2^53 - 1) 以内用 JS 数字表示，超出时
//! 用 `BigInt`，解码时两种表示都接受。

use std::time::Duration;

use bevy_ecs::entity::Entity;
use glam::{IVec2, IVec3, IVec4, Mat4, Quat, Vec2, Vec3, Vec4};
use rquickjs::convert::Coerced;
use rquickjs::{Array, BigInt, Ctx, Exception, Function, Object, Type, Value};

use super::JsShared;
use crate::scripting::types::{
    EventWrapper, ValueKind, Variant, VariantArray, VariantMap, DYNAMIC_DECODE_ORDER,
};

/// 错误信息中使用的 JavaScript 类型名
pub fn type_name(kind: &ValueKind) -> String {
    match kind {
        ValueKind::Bool => "boolean".to_string(),
        ValueKind::String => "string".to_string(),
        ValueKind::Vec2
        | ValueKind::Vec3
        | ValueKind::Vec4
        | ValueKind::Vec2i
        | ValueKind::Vec3i
        | ValueKind::Vec4i
        | ValueKind::Quat => "array of number".to_string(),
        ValueKind::Mat4 => "map like {c0:vec4, c1:vec4, c2:vec4, c3:vec4}".to_string(),
        ValueKind::Event => "map like {type:number, data:map}".to_string(),
        ValueKind::VariantMap => "map".to_string(),
        ValueKind::VariantArray => "array".to_string(),
        ValueKind::EventHandler => "callback function".to_string(),
        ValueKind::Optional(inner) => format!("{} or null", type_name(inner)),
        ValueKind::Sequence(inner) => format!("array of {}", type_name(inner)),
        ValueKind::Any => "any value".to_string(),
        _ => "number".to_string(),
    }
}

/// JS 数字能精确表示的最大整数
const MAX_SAFE_INTEGER: u128 = (1 << 53) - 1;

fn integral(value: &Value<'_>) -> Option<i128> {
    if value.type_of() == Type::BigInt {
        return value.get::<Coerced<String>>().ok()?.0.parse().ok();
    }
    value.as_number().and_then(|n| Variant::Double(n).as_integral())
}

/// 超出安全整数范围的值转为 `BigInt`
fn integer<'js>(ctx: &Ctx<'js>, value: i128) -> rquickjs::Result<Value<'js>> {
    if let Ok(small) = i32::try_from(value) {
        return Ok(Value::new_int(ctx.clone(), small));
    }
    if value.unsigned_abs() <= MAX_SAFE_INTEGER {
        return Ok(number(ctx, value as f64));
    }
    if let Ok(signed) = i64::try_from(value) {
        return Ok(BigInt::from_i64(ctx.clone(), signed)?.into_value());
    }
    match u64::try_from(value) {
        Ok(unsigned) => Ok(BigInt::from_u64(ctx.clone(), unsigned)?.into_value()),
        Err(_) => Ok(number(ctx, value as f64)),
    }
}

fn numbers<T>(value: &Value<'_>, len: usize, convert: impl Fn(&Value<'_>) -> Option<T>) -> Option<Vec<T>> {
    let array = value.as_array()?;
    if array.len() != len {
        return None;
    }
    (0..len)
        .map(|i| array.get::<Value>(i).ok().as_ref().and_then(&convert))
        .collect()
}

fn floats(value: &Value<'_>, len: usize) -> Option<Vec<f32>> {
    numbers(value, len, |v| v.as_number().map(|n| n as f32))
}

fn ints(value: &Value<'_>, len: usize) -> Option<Vec<i32>> {
    numbers(value, len, |v| integral(v).and_then(|n| i32::try_from(n).ok()))
}

/// 普通对象（数组和函数除外）
fn plain_object<'a, 'js>(value: &'a Value<'js>) -> Option<&'a Object<'js>> {
    if value.is_array() || value.is_function() {
        return None;
    }
    value.as_object()
}

fn number<'js>(ctx: &Ctx<'js>, value: f64) -> Value<'js> {
    Value::new_number(ctx.clone(), value)
}

fn float_array<'js>(ctx: &Ctx<'js>, values: &[f32]) -> rquickjs::Result<Value<'js>> {
    let array = Array::new(ctx.clone())?;
    for (i, v) in values.iter().enumerate() {
        array.set(i, *v as f64)?;
    }
    Ok(array.into_value())
}

fn int_array<'js>(ctx: &Ctx<'js>, values: &[i32]) -> rquickjs::Result<Value<'js>> {
    let array = Array::new(ctx.clone())?;
    for (i, v) in values.iter().enumerate() {
        array.set(i, *v)?;
    }
    Ok(array.into_value())
}

impl JsShared {
    /// 按类型提示把 JS 值转为 `Variant`
    pub(crate) fn from_js<'js>(
        &self,
        ctx: &Ctx<'js>,
        value: &Value<'js>,
        kind: &ValueKind,
    ) -> Option<Variant> {
        match kind {
            ValueKind::Any => self.from_js_dynamic(ctx, value),
            ValueKind::Optional(inner) => {
                if value.is_null() || value.is_undefined() {
                    Some(Variant::Empty)
                } else {
                    self.from_js(ctx, value, inner)
                }
            }
            ValueKind::Sequence(inner) => value
                .as_array()?
                .iter::<Value>()
                .map(|item| item.ok().and_then(|item| self.from_js(ctx, &item, inner)))
                .collect::<Option<VariantArray>>()
                .map(Variant::Array),
            ValueKind::Bool => value.as_bool().map(Variant::Bool),
            kind if kind.is_integer() => integral(value).and_then(|v| kind.integer(v)),
            ValueKind::String => value
                .as_string()
                .and_then(|s| s.to_string().ok())
                .map(Variant::String),
            ValueKind::Float => value.as_number().map(|n| Variant::Float(n as f32)),
            ValueKind::Double => value.as_number().map(Variant::Double),
            ValueKind::Vec2 => floats(value, 2).map(|v| Variant::Vec2(Vec2::from_slice(&v))),
            ValueKind::Vec3 => floats(value, 3).map(|v| Variant::Vec3(Vec3::from_slice(&v))),
            ValueKind::Vec4 => floats(value, 4).map(|v| Variant::Vec4(Vec4::from_slice(&v))),
            ValueKind::Vec2i => ints(value, 2).map(|v| Variant::Vec2i(IVec2::from_slice(&v))),
            ValueKind::Vec3i => ints(value, 3).map(|v| Variant::Vec3i(IVec3::from_slice(&v))),
            ValueKind::Vec4i => ints(value, 4).map(|v| Variant::Vec4i(IVec4::from_slice(&v))),
            ValueKind::Quat => floats(value, 4).map(|v| Variant::Quat(Quat::from_slice(&v))),
            ValueKind::Mat4 => {
                let object = plain_object(value)?;
                let column = |key: &str| {
                    let column: Value = object.get(key).ok()?;
                    floats(&column, 4).map(|v| Vec4::from_slice(&v))
                };
                Some(Variant::Mat4(Mat4::from_cols(
                    column("c0")?,
                    column("c1")?,
                    column("c2")?,
                    column("c3")?,
                )))
            }
            ValueKind::Event => {
                let object = plain_object(value)?;
                let type_value: Value = object.get("type").ok()?;
                let type_id = integral(&type_value).and_then(|v| u32::try_from(v).ok())?;
                let mut event = EventWrapper::from_type(type_id);
                let data: Value = object.get("data").ok()?;
                if !data.is_undefined() && !data.is_null() {
                    event.set_values(self.map_from_js(ctx, plain_object(&data)?)?);
                }
                Some(Variant::Event(event))
            }
            ValueKind::Duration => integral(value)
                .and_then(|v| u64::try_from(v).ok())
                .map(|nanos| Variant::Duration(Duration::from_nanos(nanos))),
            ValueKind::Entity => integral(value)
                .and_then(|v| u64::try_from(v).ok())
                .and_then(|bits| Entity::try_from_bits(bits).ok())
                .map(Variant::Entity),
            ValueKind::VariantMap => self.map_from_js(ctx, plain_object(value)?).map(Variant::Map),
            ValueKind::VariantArray => value
                .as_array()?
                .iter::<Value>()
                .map(|item| item.ok().and_then(|item| self.from_js_dynamic(ctx, &item)))
                .collect::<Option<VariantArray>>()
                .map(Variant::Array),
            ValueKind::EventHandler => value
                .as_function()
                .map(|function| Variant::EventHandler(self.event_handler(ctx, function.clone()))),
            _ => None,
        }
    }

    /// 没有类型提示时按固定顺序尝试解码
    pub(crate) fn from_js_dynamic<'js>(&self, ctx: &Ctx<'js>, value: &Value<'js>) -> Option<Variant> {
        if value.is_null() || value.is_undefined() {
            return Some(Variant::Empty);
        }
        DYNAMIC_DECODE_ORDER
            .iter()
            .find_map(|kind| self.from_js(ctx, value, kind))
    }

    fn map_from_js<'js>(&self, ctx: &Ctx<'js>, object: &Object<'js>) -> Option<VariantMap> {
        let mut map = VariantMap::new();
        for prop in object.props::<String, Value>() {
            let (key, value) = prop.ok()?;
            if value.is_undefined() {
                continue;
            }
            map.insert(key, self.from_js_dynamic(ctx, &value)?);
        }
        Some(map)
    }

    /// 把 `Variant` 转为 JS 值，空值为 `null`
    pub(crate) fn to_js<'js>(&self, ctx: &Ctx<'js>, value: &Variant) -> rquickjs::Result<Value<'js>> {
        let value = match value {
            Variant::Empty => Value::new_null(ctx.clone()),
            Variant::Bool(b) => Value::new_bool(ctx.clone(), *b),
            Variant::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
            Variant::Float(v) => number(ctx, *v as f64),
            Variant::Double(v) => number(ctx, *v),
            Variant::Vec2(v) => float_array(ctx, &v.to_array())?,
            Variant::Vec3(v) => float_array(ctx, &v.to_array())?,
            Variant::Vec4(v) => float_array(ctx, &v.to_array())?,
            Variant::Vec2i(v) => int_array(ctx, &v.to_array())?,
            Variant::Vec3i(v) => int_array(ctx, &v.to_array())?,
            Variant::Vec4i(v) => int_array(ctx, &v.to_array())?,
            Variant::Quat(q) => float_array(ctx, &q.to_array())?,
            Variant::Mat4(m) => {
                let object = Object::new(ctx.clone())?;
                for (i, key) in ["c0", "c1", "c2", "c3"].into_iter().enumerate() {
                    object.set(key, float_array(ctx, &m.col(i).to_array())?)?;
                }
                object.into_value()
            }
            Variant::Event(event) => {
                let object = Object::new(ctx.clone())?;
                object.set("type", number(ctx, event.type_id() as f64))?;
                object.set("data", self.map_to_js(ctx, event.values())?)?;
                object.into_value()
            }
            Variant::Duration(d) => integer(ctx, d.as_nanos().min(u64::MAX as u128) as i128)?,
            Variant::Entity(e) => integer(ctx, i128::from(e.to_bits()))?,
            Variant::Map(map) => self.map_to_js(ctx, map)?,
            Variant::Array(items) => {
                let array = Array::new(ctx.clone())?;
                for (i, item) in items.iter().enumerate() {
                    array.set(i, self.to_js(ctx, item)?)?;
                }
                array.into_value()
            }
            Variant::EventHandler(handler) => {
                let handler = handler.clone();
                let shared = self.this.clone();
                let function = Function::new(
                    ctx.clone(),
                    move |ctx: Ctx<'js>, event: Value<'js>| -> rquickjs::Result<()> {
                        let decoded = shared
                            .upgrade()
                            .and_then(|shared| shared.from_js(&ctx, &event, &ValueKind::Event));
                        match decoded {
                            Some(Variant::Event(event)) => {
                                handler.call(&event);
                                Ok(())
                            }
                            _ => Err(Exception::throw_type(
                                &ctx,
                                &format!(
                                    "Event handler expects the type of arg 0 to be {}",
                                    type_name(&ValueKind::Event)
                                ),
                            )),
                        }
                    },
                )?;
                function.into_value()
            }
            other => match other.as_i128() {
                Some(v) => integer(ctx, v)?,
                None => Value::new_undefined(ctx.clone()),
            },
        };
        Ok(value)
    }

    fn map_to_js<'js>(&self, ctx: &Ctx<'js>, map: &VariantMap) -> rquickjs::Result<Value<'js>> {
        let object = Object::new(ctx.clone())?;
        for (key, value) in map {
            object.set(key.as_str(), self.to_js(ctx, value)?)?;
        }
        Ok(object.into_value())
    }
}
