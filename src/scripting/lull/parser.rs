//! LullScript 解析器
//!
//! 一个脚本是单个表达式。`(...)` 为调用，`[...]` 为数组字面量，`{k v ...}`
//! 为映射字面量，`;` 开始行注释。数字按后缀区分类型：`ul` 为 u64，`l` 为
//! i64，`u` 为 u32，`f` 为 f32，不带后缀的整数为 i32，其余数字为 f64。
//! `:name` 解析为名字的哈希值。嵌套层数不得超过 `max_depth`。

use std::rc::Rc;

use super::value::{LullResult, LullValue};
use crate::scripting::types::{hash, Variant};

fn is_delimiter(c: char) -> bool {
    matches!(c, '(' | ')' | '[' | ']' | '{' | '}')
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == ';'
}

/// 把一个原子记号解析为字面量或符号
pub fn parse_atom(token: &str) -> LullValue {
    fn suffixed<'a>(token: &'a str, suffix: &str) -> Option<&'a str> {
        token.strip_suffix(suffix).filter(|rest| !rest.is_empty())
    }

    if let Some(name) = token.strip_prefix(':') {
        return LullValue::Data(Variant::Uint32(hash(name)));
    }
    let value = match token {
        "true" => Some(Variant::Bool(true)),
        "false" => Some(Variant::Bool(false)),
        _ => None,
    };
    let value = value
        .or_else(|| suffixed(token, "ul").and_then(|n| n.parse().ok()).map(Variant::Uint64))
        .or_else(|| suffixed(token, "l").and_then(|n| n.parse().ok()).map(Variant::Int64))
        .or_else(|| suffixed(token, "u").and_then(|n| n.parse().ok()).map(Variant::Uint32))
        .or_else(|| token.parse().ok().map(Variant::Int32))
        .or_else(|| suffixed(token, "f").and_then(|n| n.parse().ok()).map(Variant::Float))
        .or_else(|| {
            // 符号 `inf`/`nan` 不作为数字
            token
                .starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
                .then(|| token.parse().ok())
                .flatten()
                .map(Variant::Double)
        });
    match value {
        Some(value) => LullValue::Data(value),
        None => LullValue::Symbol(Rc::from(token)),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// 跳过空白与注释
    fn skip(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if !trimmed.starts_with(';') {
                return;
            }
            let line = trimmed.find(['\r', '\n']).unwrap_or(trimmed.len());
            self.pos += line;
        }
    }

    fn expr(&mut self) -> LullResult<LullValue> {
        self.skip();
        let Some(c) = self.peek() else {
            return Ok(LullValue::Nil);
        };
        match c {
            '(' => self.block(')').map(|items| LullValue::List(Rc::from(items))),
            '[' => self
                .block(']')
                .map(|items| LullValue::ArrayLiteral(Rc::from(items))),
            '{' => {
                let items = self.block('}')?;
                if items.len() % 2 != 0 {
                    return Err("Map literal expects key value pairs.".to_string());
                }
                let entries: Vec<(LullValue, LullValue)> = items
                    .chunks(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect();
                Ok(LullValue::MapLiteral(Rc::from(entries)))
            }
            ')' | ']' | '}' => Err("Invalid delimiter.".to_string()),
            '\'' | '"' => self.string(c),
            _ => Ok(parse_atom(self.token())),
        }
    }

    fn block(&mut self, close: char) -> LullResult<Vec<LullValue>> {
        if self.depth >= self.max_depth {
            return Err("Expression nested too deeply.".to_string());
        }
        self.depth += 1;
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip();
            match self.peek() {
                None => return Err(format!("Expected closing '{}'", close)),
                Some(c) if c == close => {
                    self.pos += c.len_utf8();
                    self.depth -= 1;
                    return Ok(items);
                }
                Some(_) => items.push(self.expr()?),
            }
        }
    }

    fn string(&mut self, quote: char) -> LullResult<LullValue> {
        let body = &self.rest()[1..];
        let mut escape = false;
        for (i, c) in body.char_indices() {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == quote {
                self.pos += 1 + i + c.len_utf8();
                return Ok(LullValue::Data(Variant::String(unescape(&body[..i]))));
            }
        }
        Err("Expected matching closing quote.".to_string())
    }

    fn token(&mut self) -> &'a str {
        let rest = self.rest();
        let end = rest
            .find(|c: char| is_separator(c) || is_delimiter(c))
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }
}

/// 解析脚本源码，空脚本得到 `Nil`
pub fn parse(src: &str, max_depth: usize) -> LullResult<LullValue> {
    let mut parser = Parser {
        src,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let value = parser.expr()?;
    parser.skip();
    if parser.peek().is_some() {
        return Err("Unexpected content after script.".to_string());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> LullResult<LullValue> {
        super::parse(src, 16)
    }

    fn data(value: LullValue) -> Variant {
        value.as_variant().cloned().unwrap()
    }

    #[test]
    fn test_literal_suffixes() {
        assert_eq!(data(parse_atom("12")), Variant::Int32(12));
        assert_eq!(data(parse_atom("-12")), Variant::Int32(-12));
        assert_eq!(data(parse_atom("12u")), Variant::Uint32(12));
        assert_eq!(data(parse_atom("12l")), Variant::Int64(12));
        assert_eq!(data(parse_atom("12ul")), Variant::Uint64(12));
        assert_eq!(data(parse_atom("1.5f")), Variant::Float(1.5));
        assert_eq!(data(parse_atom("1.5")), Variant::Double(1.5));
        assert_eq!(data(parse_atom("3000000000")), Variant::Double(3e9));
        assert_eq!(data(parse_atom("true")), Variant::Bool(true));
        assert_eq!(data(parse_atom(":foo")), Variant::Uint32(hash("foo")));
    }

    #[test]
    fn test_symbols() {
        for token in ["def", "null", "+", "-", "get-x", "lull.Foo", "nan", "inf", "l", "ul"] {
            assert_eq!(parse_atom(token).as_symbol(), Some(token), "{}", token);
        }
    }

    #[test]
    fn test_nested_structure() {
        let value = parse("; comment\n(= y (+ [1 2] {'a' 1.5f}))  ; trailing\n").unwrap();
        assert_eq!(value.to_string(), "(= y (+ [1 2] {a 1.5}))");
    }

    #[test]
    fn test_strings() {
        let value = parse(r#"(? 'one' "two")"#).unwrap();
        assert_eq!(value.to_string(), "(? one two)");
        let value = parse(r#"(? "say \"hi\"\n")"#).unwrap();
        let LullValue::List(items) = value else {
            panic!("expected a list");
        };
        assert_eq!(data(items[1].clone()), Variant::from("say \"hi\"\n"));
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse("(+ 1 2").unwrap_err(), "Expected closing ')'");
        assert_eq!(parse("[1 2").unwrap_err(), "Expected closing ']'");
        assert_eq!(parse("{1 2").unwrap_err(), "Expected closing '}'");
        assert_eq!(parse("(? 'abc)").unwrap_err(), "Expected matching closing quote.");
        assert_eq!(parse("(= x 1) (= y 2)").unwrap_err(), "Unexpected content after script.");
        assert_eq!(parse("(+ 1 ]").unwrap_err(), "Invalid delimiter.");
        assert!(parse("").unwrap().is_nil());
        assert!(parse("  ; only a comment").unwrap().is_nil());
    }

    #[test]
    fn test_nesting_limit() {
        let within = format!("{}1{}", "[".repeat(16), "]".repeat(16));
        assert!(parse(&within).is_ok());
        let beyond = format!("{}1{}", "(".repeat(17), ")".repeat(17));
        assert_eq!(parse(&beyond).unwrap_err(), "Expression nested too deeply.");
        assert_eq!(
            parse(&"{".repeat(10_000)).unwrap_err(),
            "Expression nested too deeply."
        );
    }
}
