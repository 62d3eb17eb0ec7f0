//! Lua 值与 `Variant` 之间的转换
//!
//! 表示约定：
//! - 向量为带元表的 `{x, y, z, w}` 表，四元数为 `{x, y, z, s}`
//! - 矩阵为 `{c0, c1, c2, c3}`，每列一个 vec4
//! - 事件为 `{type = number, data = table}`
//! - 时长为整数纳秒，实体为 `Entity::to_bits`
//! - `uint64` 以 Lua 整数的位模式保存

use std::time::Duration;

use bevy_ecs::entity::Entity;
use glam::{IVec2, IVec3, IVec4, Mat4, Quat, Vec2, Vec3, Vec4};
use mlua::{Function, Table, Value};

use super::LuaShared;
use crate::scripting::types::{
    EventHandler, EventWrapper, ValueKind, Variant, VariantArray, VariantMap, DYNAMIC_DECODE_ORDER,
};

/// 错误信息中使用的 Lua 类型名
pub fn type_name(kind: &ValueKind) -> String {
    match kind {
        ValueKind::Bool => "boolean".to_string(),
        ValueKind::String => "string".to_string(),
        ValueKind::Vec2 | ValueKind::Vec2i => "table like {x=number, y=number}".to_string(),
        ValueKind::Vec3 | ValueKind::Vec3i => {
            "table like {x=number, y=number, z=number}".to_string()
        }
        ValueKind::Vec4 | ValueKind::Vec4i => {
            "table like {x=number, y=number, z=number, w=number}".to_string()
        }
        ValueKind::Quat => "table like {x=number, y=number, z=number, s=number}".to_string(),
        ValueKind::Mat4 => "table like {c0=vec4, c1=vec4, c2=vec4, c3=vec4}".to_string(),
        ValueKind::Event => "table like {type=number, data=table}".to_string(),
        ValueKind::VariantMap | ValueKind::VariantArray => "table".to_string(),
        ValueKind::EventHandler => "function".to_string(),
        ValueKind::Optional(inner) => format!("{} or nil", type_name(inner)),
        ValueKind::Sequence(inner) => format!("table of {}", type_name(inner)),
        ValueKind::Any => "value or nil".to_string(),
        // 整数、浮点数、时长与实体都是 number
        _ => "number".to_string(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match *value {
        Value::Integer(i) => Some(i as f64),
        Value::Number(n) => Some(n),
        _ => None,
    }
}

fn integral(value: &Value) -> Option<i128> {
    match *value {
        Value::Integer(i) => Some(i as i128),
        Value::Number(n) => Variant::Double(n).as_integral(),
        _ => None,
    }
}

fn as_table(value: &Value) -> Option<&Table> {
    match value {
        Value::Table(table) => Some(table),
        _ => None,
    }
}

fn field(table: &Table, key: &str) -> Option<Value> {
    table.raw_get::<Value>(key).ok()
}

fn field_f32(table: &Table, key: &str) -> Option<f32> {
    field(table, key).as_ref().and_then(number).map(|n| n as f32)
}

fn field_i32(table: &Table, key: &str) -> Option<i32> {
    field(table, key)
        .as_ref()
        .and_then(integral)
        .and_then(|v| i32::try_from(v).ok())
}

fn vec4_of(value: &Value) -> Option<Vec4> {
    let table = as_table(value)?;
    Some(Vec4::new(
        field_f32(table, "x")?,
        field_f32(table, "y")?,
        field_f32(table, "z")?,
        field_f32(table, "w")?,
    ))
}

/// 表的数组部分，`raw_len` 之后的元素被忽略
fn sequence(table: &Table) -> Option<Vec<Value>> {
    (1..=table.raw_len())
        .map(|i| table.raw_get::<Value>(i).ok())
        .collect()
}

/// 非空且只有连续整数键的表
fn is_pure_sequence(table: &Table) -> bool {
    let len = table.raw_len();
    len > 0 && table.clone().pairs::<Value, Value>().count() == len
}

impl LuaShared {
    /// 按类型提示把 Lua 值转为 `Variant`，形状不符时返回 `None`
    pub(crate) fn from_lua(&self, value: &Value, kind: &ValueKind) -> Option<Variant> {
        match kind {
            ValueKind::Any => self.from_lua_dynamic(value),
            ValueKind::Optional(inner) => {
                if value.is_nil() {
                    Some(Variant::Empty)
                } else {
                    self.from_lua(value, inner)
                }
            }
            ValueKind::Sequence(inner) => sequence(as_table(value)?)?
                .iter()
                .map(|item| self.from_lua(item, inner))
                .collect::<Option<VariantArray>>()
                .map(Variant::Array),
            ValueKind::Bool => match value {
                Value::Boolean(b) => Some(Variant::Bool(*b)),
                _ => None,
            },
            ValueKind::Uint64 => match *value {
                Value::Integer(i) => Some(Variant::Uint64(i as u64)),
                _ => integral(value).and_then(|v| kind.integer(v)),
            },
            kind if kind.is_integer() => integral(value).and_then(|v| kind.integer(v)),
            ValueKind::String => match value {
                Value::String(s) => s.to_str().ok().map(|s| Variant::String((*s).to_owned())),
                _ => None,
            },
            ValueKind::Float => number(value).map(|n| Variant::Float(n as f32)),
            ValueKind::Double => number(value).map(Variant::Double),
            ValueKind::Vec2 => {
                let t = as_table(value)?;
                Some(Variant::Vec2(Vec2::new(field_f32(t, "x")?, field_f32(t, "y")?)))
            }
            ValueKind::Vec3 => {
                let t = as_table(value)?;
                Some(Variant::Vec3(Vec3::new(
                    field_f32(t, "x")?,
                    field_f32(t, "y")?,
                    field_f32(t, "z")?,
                )))
            }
            ValueKind::Vec4 => vec4_of(value).map(Variant::Vec4),
            ValueKind::Vec2i => {
                let t = as_table(value)?;
                Some(Variant::Vec2i(IVec2::new(field_i32(t, "x")?, field_i32(t, "y")?)))
            }
            ValueKind::Vec3i => {
                let t = as_table(value)?;
                Some(Variant::Vec3i(IVec3::new(
                    field_i32(t, "x")?,
                    field_i32(t, "y")?,
                    field_i32(t, "z")?,
                )))
            }
            ValueKind::Vec4i => {
                let t = as_table(value)?;
                Some(Variant::Vec4i(IVec4::new(
                    field_i32(t, "x")?,
                    field_i32(t, "y")?,
                    field_i32(t, "z")?,
                    field_i32(t, "w")?,
                )))
            }
            ValueKind::Quat => {
                let t = as_table(value)?;
                Some(Variant::Quat(Quat::from_xyzw(
                    field_f32(t, "x")?,
                    field_f32(t, "y")?,
                    field_f32(t, "z")?,
                    field_f32(t, "s")?,
                )))
            }
            ValueKind::Mat4 => {
                let t = as_table(value)?;
                Some(Variant::Mat4(Mat4::from_cols(
                    vec4_of(&field(t, "c0")?)?,
                    vec4_of(&field(t, "c1")?)?,
                    vec4_of(&field(t, "c2")?)?,
                    vec4_of(&field(t, "c3")?)?,
                )))
            }
            ValueKind::Event => {
                let t = as_table(value)?;
                let type_id = integral(&field(t, "type")?).and_then(|v| u32::try_from(v).ok())?;
                let mut event = EventWrapper::from_type(type_id);
                match field(t, "data")? {
                    Value::Nil => {}
                    Value::Table(data) => event.set_values(self.map_from_table(&data)?),
                    _ => return None,
                }
                Some(Variant::Event(event))
            }
            ValueKind::Duration => match *value {
                Value::Integer(i) if i >= 0 => Some(Variant::Duration(Duration::from_nanos(i as u64))),
                _ => None,
            },
            ValueKind::Entity => match *value {
                Value::Integer(i) => Entity::try_from_bits(i as u64).ok().map(Variant::Entity),
                _ => None,
            },
            ValueKind::VariantMap => {
                let t = as_table(value)?;
                if is_pure_sequence(t) {
                    return None;
                }
                self.map_from_table(t).map(Variant::Map)
            }
            ValueKind::VariantArray => sequence(as_table(value)?)?
                .iter()
                .map(|item| self.from_lua_dynamic(item))
                .collect::<Option<VariantArray>>()
                .map(Variant::Array),
            ValueKind::EventHandler => match value {
                Value::Function(function) => Some(Variant::EventHandler(self.event_handler(function.clone()))),
                _ => None,
            },
            // 其余整数类型已由 is_integer 分支处理
            _ => None,
        }
    }

    /// 没有类型提示时按固定顺序尝试解码
    pub(crate) fn from_lua_dynamic(&self, value: &Value) -> Option<Variant> {
        if value.is_nil() {
            return Some(Variant::Empty);
        }
        DYNAMIC_DECODE_ORDER
            .iter()
            .find_map(|kind| self.from_lua(value, kind))
    }

    fn map_from_table(&self, table: &Table) -> Option<VariantMap> {
        let mut map = VariantMap::new();
        for pair in table.clone().pairs::<Value, Value>() {
            let (key, value) = pair.ok()?;
            let key = match key {
                Value::String(s) => (*s.to_str().ok()?).to_owned(),
                Value::Integer(i) => i.to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            map.insert(key, self.from_lua_dynamic(&value)?);
        }
        Some(map)
    }

    /// 包装为原生回调，调用时重新进入 Lua
    fn event_handler(&self, function: Function) -> EventHandler {
        let shared = self.this.clone();
        EventHandler::new(move |event| {
            let Some(shared) = shared.upgrade() else {
                tracing::warn!(target: "script.lua", "Event handler called after the Lua engine was destroyed");
                return;
            };
            let result = shared
                .to_lua(&Variant::Event(event.clone()))
                .and_then(|arg| function.call::<()>(arg));
            if let Err(err) = result {
                tracing::error!(target: "script.lua", "Event handler error: {}", super::describe_error(&err));
            }
        })
    }

    /// 把 `Variant` 转为 Lua 值
    pub(crate) fn to_lua(&self, value: &Variant) -> mlua::Result<Value> {
        let lua = &self.lua;
        let value = match value {
            Variant::Empty => Value::Nil,
            Variant::Bool(b) => Value::Boolean(*b),
            Variant::Uint64(v) => Value::Integer(*v as i64),
            Variant::String(s) => Value::String(lua.create_string(s)?),
            Variant::Float(v) => Value::Number(*v as f64),
            Variant::Double(v) => Value::Number(*v),
            Variant::Vec2(v) => self.util.vec2.call::<Value>((v.x, v.y))?,
            Variant::Vec3(v) => self.util.vec3.call::<Value>((v.x, v.y, v.z))?,
            Variant::Vec4(v) => self.util.vec4.call::<Value>((v.x, v.y, v.z, v.w))?,
            Variant::Vec2i(v) => self.util.vec2.call::<Value>((v.x, v.y))?,
            Variant::Vec3i(v) => self.util.vec3.call::<Value>((v.x, v.y, v.z))?,
            Variant::Vec4i(v) => self.util.vec4.call::<Value>((v.x, v.y, v.z, v.w))?,
            Variant::Quat(q) => self.util.quat.call::<Value>((q.x, q.y, q.z, q.w))?,
            Variant::Mat4(m) => {
                let table = lua.create_table()?;
                for (i, key) in ["c0", "c1", "c2", "c3"].into_iter().enumerate() {
                    table.raw_set(key, self.to_lua(&Variant::Vec4(m.col(i)))?)?;
                }
                Value::Table(table)
            }
            Variant::Event(event) => {
                let table = lua.create_table()?;
                table.raw_set("type", event.type_id())?;
                table.raw_set("data", self.map_to_lua(event.values())?)?;
                Value::Table(table)
            }
            Variant::Duration(d) => Value::Integer(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)),
            Variant::Entity(e) => Value::Integer(e.to_bits() as i64),
            Variant::Map(map) => self.map_to_lua(map)?,
            Variant::Array(items) => {
                let table = lua.create_table()?;
                for (i, item) in items.iter().enumerate() {
                    table.raw_set(i + 1, self.to_lua(item)?)?;
                }
                Value::Table(table)
            }
            Variant::EventHandler(handler) => {
                let handler = handler.clone();
                let shared = self.this.clone();
                let function = lua.create_function(move |_, event: Value| {
                    let decoded = shared
                        .upgrade()
                        .and_then(|shared| shared.from_lua(&event, &ValueKind::Event));
                    match decoded {
                        Some(Variant::Event(event)) => {
                            handler.call(&event);
                            Ok(())
                        }
                        _ => Err(mlua::Error::RuntimeError(format!(
                            "Event handler expects the type of arg 1 to be {}",
                            type_name(&ValueKind::Event)
                        ))),
                    }
                })?;
                Value::Function(function)
            }
            integer => match integer.as_i128() {
                Some(v) => Value::Integer(v as i64),
                None => Value::Nil,
            },
        };
        Ok(value)
    }

    fn map_to_lua(&self, map: &VariantMap) -> mlua::Result<Value> {
        let table = self.lua.create_table()?;
        for (key, value) in map {
            table.raw_set(key.as_str(), self.to_lua(value)?)?;
        }
        Ok(Value::Table(table))
    }
}
