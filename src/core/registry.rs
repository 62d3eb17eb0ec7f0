//! 单例注册表
//!
//! `Registry` 把 `bevy_ecs::World` 当作类型索引的单例容器使用。脚本引擎
//! 持有 `!Send` 的运行时，因此全部以 non-send 资源的形式存放。注册表本身
//! 是可廉价克隆的句柄，原生回调可以持有 `WeakRegistry` 在调用时再查找实例。

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use bevy_ecs::world::World;

/// 类型索引的单例注册表
#[derive(Clone, Default)]
pub struct Registry {
    world: Rc<RefCell<World>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建（或替换）类型为 `T` 的单例
    ///
    /// 在 `with`/`with_mut` 回调中调用时注册表已被借用，此时放弃创建并返回 `false`。
    pub fn create<T: 'static>(&self, value: T) -> bool {
        match self.world.try_borrow_mut() {
            Ok(mut world) => {
                world.insert_non_send_resource(value);
                true
            }
            Err(_) => {
                tracing::error!(
                    target: "scripting",
                    "Cannot create {} while the registry is borrowed",
                    std::any::type_name::<T>()
                );
                false
            }
        }
    }

    /// 移除并返回类型为 `T` 的单例
    pub fn remove<T: 'static>(&self) -> Option<T> {
        match self.world.try_borrow_mut() {
            Ok(mut world) => world.remove_non_send_resource::<T>(),
            Err(_) => {
                tracing::error!(
                    target: "scripting",
                    "Cannot remove {} while the registry is borrowed",
                    std::any::type_name::<T>()
                );
                None
            }
        }
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.world
            .try_borrow()
            .map(|world| world.contains_non_send::<T>())
            .unwrap_or(false)
    }

    /// 克隆出单例句柄
    ///
    /// 用于 `ScriptEngine`、`FunctionBinder` 这类内部共享状态的句柄类型，
    /// 克隆后立即释放对注册表的借用，因而可以安全地重入。
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.with(|value: &T| value.clone())
    }

    /// 以共享引用访问单例
    ///
    /// 注册表正被可变借用时返回 `None`。
    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let world = self.world.try_borrow().ok()?;
        let result = world.get_non_send_resource::<T>().map(f);
        result
    }

    /// 以可变引用访问单例
    pub fn with_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut world = self.world.try_borrow_mut().ok()?;
        let result = world
            .get_non_send_resource_mut::<T>()
            .map(|mut value| f(&mut *value));
        result
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            world: Rc::downgrade(&self.world),
        }
    }
}

/// 不延长注册表生命周期的弱引用
#[derive(Clone, Default)]
pub struct WeakRegistry {
    world: Weak<RefCell<World>>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<Registry> {
        self.world.upgrade().map(|world| Registry { world })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Counter(u32);

    #[test]
    fn test_create_and_get() {
        let registry = Registry::new();
        assert!(!registry.contains::<Counter>());
        registry.create(Counter(3));
        assert!(registry.contains::<Counter>());
        assert_eq!(registry.get::<Counter>(), Some(Counter(3)));
    }

    #[test]
    fn test_with_mut() {
        let registry = Registry::new();
        registry.create(Counter(1));
        registry.with_mut(|counter: &mut Counter| counter.0 += 1);
        assert_eq!(registry.with(|counter: &Counter| counter.0), Some(2));
        assert_eq!(registry.remove::<Counter>(), Some(Counter(2)));
        assert!(registry.get::<Counter>().is_none());
    }

    #[test]
    fn test_weak_registry() {
        let registry = Registry::new();
        let weak = registry.downgrade();
        assert!(weak.upgrade().is_some());
        drop(registry);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_create_and_remove_inside_with_are_refused() {
        let registry = Registry::new();
        registry.create(Counter(5));
        let (inner, logs) = crate::core::logging::capture_logs(|| {
            registry.with(|_: &Counter| (registry.create(0u8), registry.remove::<Counter>()))
        });
        assert_eq!(inner, Some((false, None)));
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|(target, _)| target == "scripting"));
        assert!(!registry.contains::<u8>());
        assert_eq!(registry.get::<Counter>(), Some(Counter(5)));
        assert!(registry.create(0u8));
    }
}
