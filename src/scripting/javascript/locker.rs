//! 运行时锁的重入
//!
//! `Context::with` 会锁住整个运行时，不允许嵌套调用。原生函数在脚本执行
//! 期间又进入另一个脚本（或回调）时，运行时锁已由最外层持有，此时直接
//! 由上下文的原始指针重建 `Ctx`。

use std::cell::Cell;
use std::ptr::NonNull;

use rquickjs::{qjs, Context, Ctx};

/// 上下文的原始指针，在创建上下文时记录
pub(crate) type RawContext = NonNull<qjs::JSContext>;

/// 记录运行时锁的持有深度
#[derive(Debug, Default)]
pub(crate) struct ContextLocker {
    depth: Cell<usize>,
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl ContextLocker {
    /// 运行时锁是否已被持有
    pub(crate) fn is_locked(&self) -> bool {
        self.depth.get() > 0
    }

    /// 在 `context` 中执行 `f`
    ///
    /// 最外层经由 `Context::with` 加锁，嵌套调用复用已持有的锁。
    pub(crate) fn enter<R>(
        &self,
        context: &Context,
        raw: RawContext,
        f: impl for<'js> FnOnce(Ctx<'js>) -> R,
    ) -> R {
        let depth = self.depth.get();
        self.depth.set(depth + 1);
        let _guard = DepthGuard(&self.depth);
        if depth == 0 {
            context.with(f)
        } else {
            // SAFETY: 外层的 `Context::with` 仍持有同一运行时的锁，`raw` 来自
            // 该运行时中由 `context` 保持存活的上下文。
            let ctx = unsafe { Ctx::from_raw(raw) };
            f(ctx)
        }
    }
}
