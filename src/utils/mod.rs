//! # 常用接口模块
//!
//! 本模块提供单元测试用的断言宏（仅在测试时编译）

/// 断言表达式会触发panic
macro_rules! assert_panic {
    ($expr:expr) => {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| $expr)) {
            Ok(_) => panic!("表达式没有触发panic"),
            Err(_) => (),
        }
    };
}

/// 错误断言宏
///
/// # 用法
/// - `assert_err!(expr)`：只验证是 Err
/// - `assert_err!(expr, Pattern { .. })`：验证错误类型
/// - `assert_err!(expr, Pattern { field, .. } if condition)`：验证类型 + 条件
macro_rules! assert_err {
    ($expr:expr) => {
        assert!($expr.is_err(), "预期 Err，实际得到 Ok");
    };
    ($expr:expr, $pattern:pat $(if $guard:expr)?) => {
        match $expr {
            Err(e) => assert!(
                matches!(&e, $pattern $(if $guard)?),
                "错误类型不匹配：预期 `{}`，实际得到 `{:?}`",
                stringify!($pattern),
                e
            ),
            Ok(_) => panic!("预期 Err({})，实际得到 Ok", stringify!($pattern)),
        }
    };
}

pub(crate) use {assert_err, assert_panic};
