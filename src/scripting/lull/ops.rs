//! 运算符的数值提升规则
//!
//! 两个整数按位宽较大（同宽时无符号优先）的类型计算，溢出报错；任一方为
//! 浮点时结果为浮点，有 `double` 参与时为 `double`。向量按分量计算，也可
//! 与标量混合。时长之间可以加减比较，也可以与数值相乘除。

use std::cmp::Ordering;
use std::mem::discriminant;
use std::time::Duration;

use glam::{IVec2, IVec3, IVec4, Vec2, Vec3, Vec4};

use super::value::LullResult;
use crate::scripting::types::{ValueKind, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl Arith {
    pub fn symbol(self) -> &'static str {
        match self {
            Arith::Add => "+",
            Arith::Sub => "-",
            Arith::Mul => "*",
            Arith::Div => "/",
            Arith::Mod => "%",
        }
    }

    fn float(self, a: f64, b: f64) -> f64 {
        match self {
            Arith::Add => a + b,
            Arith::Sub => a - b,
            Arith::Mul => a * b,
            Arith::Div => a / b,
            Arith::Mod => a % b,
        }
    }

    fn integer(self, a: i128, b: i128) -> LullResult<i128> {
        if matches!(self, Arith::Div | Arith::Mod) && b == 0 {
            return Err("Division by zero.".to_string());
        }
        let value = match self {
            Arith::Add => a.checked_add(b),
            Arith::Sub => a.checked_sub(b),
            Arith::Mul => a.checked_mul(b),
            Arith::Div => a.checked_div(b),
            Arith::Mod => a.checked_rem(b),
        };
        value.ok_or_else(|| format!("Integer overflow in {}", self.symbol()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Compare {
    pub fn symbol(self) -> &'static str {
        match self {
            Compare::Eq => "==",
            Compare::Ne => "!=",
            Compare::Lt => "<",
            Compare::Gt => ">",
            Compare::Le => "<=",
            Compare::Ge => ">=",
        }
    }

    fn test(self, ordering: Ordering) -> bool {
        match self {
            Compare::Eq => ordering == Ordering::Equal,
            Compare::Ne => ordering != Ordering::Equal,
            Compare::Lt => ordering == Ordering::Less,
            Compare::Gt => ordering == Ordering::Greater,
            Compare::Le => ordering != Ordering::Greater,
            Compare::Ge => ordering != Ordering::Less,
        }
    }
}

/// 整数类型的提升次序
const INTEGER_RANKS: [ValueKind; 8] = [
    ValueKind::Int8,
    ValueKind::Uint8,
    ValueKind::Int16,
    ValueKind::Uint16,
    ValueKind::Int32,
    ValueKind::Uint32,
    ValueKind::Int64,
    ValueKind::Uint64,
];

fn integer_rank(value: &Variant) -> usize {
    value
        .kind()
        .and_then(|kind| INTEGER_RANKS.iter().position(|k| *k == kind))
        .unwrap_or(0)
}

fn is_double(value: &Variant) -> bool {
    matches!(value, Variant::Double(_))
}

/// 向量的分量，统一以 f64 表示
fn components(value: &Variant) -> Option<(ValueKind, Vec<f64>)> {
    let floats = |v: &[f32]| -> Vec<f64> { v.iter().map(|c| *c as f64).collect() };
    let ints = |v: &[i32]| -> Vec<f64> { v.iter().map(|c| *c as f64).collect() };
    match value {
        Variant::Vec2(v) => Some((ValueKind::Vec2, floats(&v.to_array()))),
        Variant::Vec3(v) => Some((ValueKind::Vec3, floats(&v.to_array()))),
        Variant::Vec4(v) => Some((ValueKind::Vec4, floats(&v.to_array()))),
        Variant::Vec2i(v) => Some((ValueKind::Vec2i, ints(&v.to_array()))),
        Variant::Vec3i(v) => Some((ValueKind::Vec3i, ints(&v.to_array()))),
        Variant::Vec4i(v) => Some((ValueKind::Vec4i, ints(&v.to_array()))),
        _ => None,
    }
}

fn is_int_vector(kind: &ValueKind) -> bool {
    matches!(kind, ValueKind::Vec2i | ValueKind::Vec3i | ValueKind::Vec4i)
}

/// 由分量重建向量，整数向量要求每个分量都是 i32 范围内的整数
pub(crate) fn rebuild_vector(kind: &ValueKind, values: &[f64]) -> Option<Variant> {
    let f = |i: usize| values.get(i).map(|v| *v as f32);
    let i = |i: usize| {
        values
            .get(i)
            .filter(|v| v.fract() == 0.0)
            .and_then(|v| i32::try_from(*v as i64).ok())
    };
    match kind {
        ValueKind::Vec2 => Some(Variant::Vec2(Vec2::new(f(0)?, f(1)?))),
        ValueKind::Vec3 => Some(Variant::Vec3(Vec3::new(f(0)?, f(1)?, f(2)?))),
        ValueKind::Vec4 => Some(Variant::Vec4(Vec4::new(f(0)?, f(1)?, f(2)?, f(3)?))),
        ValueKind::Vec2i => Some(Variant::Vec2i(IVec2::new(i(0)?, i(1)?))),
        ValueKind::Vec3i => Some(Variant::Vec3i(IVec3::new(i(0)?, i(1)?, i(2)?))),
        ValueKind::Vec4i => Some(Variant::Vec4i(IVec4::new(i(0)?, i(1)?, i(2)?, i(3)?))),
        _ => None,
    }
}

fn vector_op(op: Arith, lhs: &Variant, rhs: &Variant) -> Option<LullResult<Variant>> {
    if op == Arith::Mod {
        return None;
    }
    let (kind, a, b) = match (components(lhs), components(rhs)) {
        (Some((ka, a)), Some((kb, b))) if ka == kb => (ka, a, b),
        (Some((kind, a)), None) => {
            let scalar = rhs.as_f64()?;
            let b = vec![scalar; a.len()];
            (kind, a, b)
        }
        (None, Some((kind, b))) => {
            let scalar = lhs.as_f64()?;
            let a = vec![scalar; b.len()];
            (kind, a, b)
        }
        _ => return None,
    };
    let int = is_int_vector(&kind);
    if int && op == Arith::Div && b.contains(&0.0) {
        return Some(Err("Division by zero.".to_string()));
    }
    let values: Vec<f64> = a
        .iter()
        .zip(&b)
        .map(|(x, y)| {
            let v = op.float(*x, *y);
            if int {
                v.trunc()
            } else {
                v
            }
        })
        .collect();
    Some(
        rebuild_vector(&kind, &values)
            .ok_or_else(|| format!("Integer overflow in {}", op.symbol())),
    )
}

fn duration_op(op: Arith, lhs: &Variant, rhs: &Variant) -> Option<LullResult<Variant>> {
    let scaled = |d: &Duration, factor: f64| {
        Duration::try_from_secs_f64(d.as_secs_f64() * factor)
            .map(Variant::Duration)
            .map_err(|err| format!("Invalid duration: {}", err))
    };
    let result = match (op, lhs, rhs) {
        (Arith::Add, Variant::Duration(a), Variant::Duration(b)) => a
            .checked_add(*b)
            .map(Variant::Duration)
            .ok_or_else(|| "Duration overflow.".to_string()),
        (Arith::Sub, Variant::Duration(a), Variant::Duration(b)) => a
            .checked_sub(*b)
            .map(Variant::Duration)
            .ok_or_else(|| "Negative duration.".to_string()),
        (Arith::Mul, Variant::Duration(d), n) | (Arith::Mul, n, Variant::Duration(d)) => {
            scaled(d, n.as_f64()?)
        }
        (Arith::Div, Variant::Duration(d), n) => match n.as_f64()? {
            v if v == 0.0 => Err("Division by zero.".to_string()),
            v => scaled(d, 1.0 / v),
        },
        _ => return None,
    };
    Some(result)
}

/// 二元算术运算
pub fn arithmetic(op: Arith, lhs: &Variant, rhs: &Variant) -> LullResult<Variant> {
    if let (Some(a), Some(b)) = (lhs.as_i128(), rhs.as_i128()) {
        let kind = &INTEGER_RANKS[integer_rank(lhs).max(integer_rank(rhs))];
        let value = op.integer(a, b)?;
        return kind
            .integer(value)
            .ok_or_else(|| format!("Integer overflow in {}", op.symbol()));
    }
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        let value = op.float(a, b);
        return Ok(if is_double(lhs) || is_double(rhs) {
            Variant::Double(value)
        } else {
            Variant::Float(value as f32)
        });
    }
    if let Some(result) = duration_op(op, lhs, rhs).or_else(|| vector_op(op, lhs, rhs)) {
        return result;
    }
    match (op, lhs, rhs) {
        (Arith::Mul, Variant::Quat(a), Variant::Quat(b)) => Ok(Variant::Quat(*a * *b)),
        (Arith::Mul, Variant::Quat(q), Variant::Vec3(v)) => Ok(Variant::Vec3(*q * *v)),
        _ => Err(format!("Unsupported operands for {}", op.symbol())),
    }
}

/// 比较运算，空值只能参与相等比较
pub fn compare(op: Compare, lhs: &Variant, rhs: &Variant) -> LullResult<bool> {
    let ordering = if let (Some(a), Some(b)) = (lhs.as_i128(), rhs.as_i128()) {
        Some(a.cmp(&b))
    } else if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        a.partial_cmp(&b)
    } else if let (Variant::Duration(a), Variant::Duration(b)) = (lhs, rhs) {
        Some(a.cmp(b))
    } else if matches!(op, Compare::Eq | Compare::Ne)
        && (discriminant(lhs) == discriminant(rhs) || lhs.is_empty() || rhs.is_empty())
    {
        let equal = lhs == rhs;
        return Ok(if op == Compare::Eq { equal } else { !equal });
    } else {
        return Err(format!("Unsupported operands for {}", op.symbol()));
    };
    // NaN 与任何值都不相等
    Ok(match ordering {
        Some(ordering) => op.test(ordering),
        None => op == Compare::Ne,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_promotion() {
        assert_eq!(
            arithmetic(Arith::Add, &Variant::Int32(1), &Variant::Int32(1)),
            Ok(Variant::Int32(2))
        );
        assert_eq!(
            arithmetic(Arith::Mul, &Variant::Int32(3), &Variant::Int64(4)),
            Ok(Variant::Int64(12))
        );
        assert_eq!(
            arithmetic(Arith::Mod, &Variant::Int32(13), &Variant::Int32(7)),
            Ok(Variant::Int32(6))
        );
        assert_eq!(
            arithmetic(Arith::Div, &Variant::Int32(1), &Variant::Int32(0)),
            Err("Division by zero.".to_string())
        );
        assert!(arithmetic(Arith::Add, &Variant::Int32(i32::MAX), &Variant::Int32(1)).is_err());
    }

    #[test]
    fn test_float_promotion() {
        assert_eq!(
            arithmetic(Arith::Add, &Variant::Int32(1), &Variant::Float(0.5)),
            Ok(Variant::Float(1.5))
        );
        assert_eq!(
            arithmetic(Arith::Div, &Variant::Float(1.0), &Variant::Double(4.0)),
            Ok(Variant::Double(0.25))
        );
    }

    #[test]
    fn test_vectors() {
        let a = Variant::Vec3(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(
            arithmetic(Arith::Add, &a, &a),
            Ok(Variant::Vec3(Vec3::new(2.0, 4.0, 6.0)))
        );
        assert_eq!(
            arithmetic(Arith::Mul, &Variant::Int32(2), &a),
            Ok(Variant::Vec3(Vec3::new(2.0, 4.0, 6.0)))
        );
        let i = Variant::Vec2i(IVec2::new(7, 9));
        assert_eq!(
            arithmetic(Arith::Div, &i, &Variant::Int32(2)),
            Ok(Variant::Vec2i(IVec2::new(3, 4)))
        );
        assert!(arithmetic(Arith::Add, &a, &i).is_err());
    }

    #[test]
    fn test_durations() {
        let sec = Variant::Duration(Duration::from_secs(1));
        let half = Variant::Duration(Duration::from_millis(500));
        assert_eq!(arithmetic(Arith::Add, &half, &half), Ok(sec.clone()));
        assert_eq!(arithmetic(Arith::Mul, &half, &Variant::Int32(2)), Ok(sec.clone()));
        assert_eq!(compare(Compare::Lt, &half, &sec), Ok(true));
        assert!(arithmetic(Arith::Sub, &half, &sec).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(compare(Compare::Eq, &Variant::Int32(1000), &Variant::Int64(1000)), Ok(true));
        assert_eq!(compare(Compare::Eq, &Variant::Double(0.5), &Variant::Float(0.5)), Ok(true));
        assert_eq!(compare(Compare::Le, &Variant::Int32(1), &Variant::Int32(1)), Ok(true));
        assert_eq!(compare(Compare::Ne, &Variant::from("a"), &Variant::from("b")), Ok(true));
        assert_eq!(compare(Compare::Eq, &Variant::Empty, &Variant::Int32(1)), Ok(false));
        assert!(compare(Compare::Lt, &Variant::from("a"), &Variant::from("b")).is_err());
        assert!(compare(Compare::Eq, &Variant::from("a"), &Variant::Int32(1)).is_err());
    }
}
