use std::collections::HashMap;
use std::rc::Rc;

use super::value::LullValue;

/// 符号表
///
/// 第一层是脚本的全局作用域，函数调用压入新的一层。查找由内向外进行
/// （动态作用域），赋值更新最内层已有的绑定，没有时写入当前层。
#[derive(Clone)]
pub struct Environment {
    scopes: Vec<HashMap<Rc<str>, LullValue>>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&LullValue> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 在当前作用域中定义
    pub fn define(&mut self, name: &str, value: LullValue) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(Rc::from(name), value);
        }
    }

    /// 在全局作用域中定义
    pub fn define_global(&mut self, name: &str, value: LullValue) {
        self.scopes[0].insert(Rc::from(name), value);
    }

    pub fn assign(&mut self, name: &str, value: LullValue) {
        match self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name)) {
            Some(slot) => *slot = value,
            None => self.define(name, value),
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// 全局作用域不会被弹出
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}
