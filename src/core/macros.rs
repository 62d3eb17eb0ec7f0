//! 核心宏定义
//!
//! 提供统一的宏来减少代码重复

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use lull_scripting::impl_default;
///
/// struct LimitConfig {
///     max_depth: u32,
///     label: String,
/// }
///
/// impl_default!(LimitConfig {
///     max_depth: 256,
///     label: String::new(),
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    struct DepthLimit {
        max_depth: u32,
        label: String,
    }

    impl_default!(DepthLimit {
        max_depth: 16,
        label: "lull".to_string(),
    });

    #[test]
    fn test_impl_default() {
        let limit = DepthLimit::default();
        assert_eq!(limit.max_depth, 16);
        assert_eq!(limit.label, "lull");
    }
}
