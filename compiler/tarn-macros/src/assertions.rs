//! Assertion macros
//!
//! This module contains macros for performing assertions in tests. Notable macros defined in this
//! module are:
//!
//! - [`assert_ok!`]
//! - [`assert_err!`]
//! - [`assert_some!`]
//! - [`assert_none!`]
//! - [`assert_matches!`]
//! - [`assert_lines_contain!`]
//!
//! This module is only available when the `assertion-macros` feature is enabled.

/// Assert that a `Result` is `Ok`, returning the value inside the `Ok` variant.
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {{
        match $expr {
            ::std::result::Result::Ok(val) => val,
            ::std::result::Result::Err(err) => {
                panic!("assertion failed: Err({:?})", err);
            }
        }
    }};
}

/// Assert that a `Result` is `Err`, returning the error inside the `Err` variant.
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {{
        match $expr {
            ::std::result::Result::Ok(val) => {
                panic!("assertion failed: Ok({:?})", val);
            }
            ::std::result::Result::Err(err) => err,
        }
    }};
}

/// Assert that an `Option` is `Some`, returning the value inside the `Some` variant.
#[macro_export]
macro_rules! assert_some {
    ($expr:expr) => {{
        match $expr {
            ::std::option::Option::Some(val) => val,
            ::std::option::Option::None => {
                panic!("assertion failed: None");
            }
        }
    }};
}

/// Assert that an `Option` is `None`.
#[macro_export]
macro_rules! assert_none {
    ($expr:expr) => {{
        if let ::std::option::Option::Some(val) = $expr {
            panic!("assertion failed: Some({:?})", val);
        };
    }};
}

/// Assert that an expression matches a pattern, returning the output expression evaluated with the
/// pattern's bindings.
#[macro_export]
macro_rules! assert_matches {
    ($expr:expr, $ty:pat_param => $output:expr) => {{
        match $expr {
            $ty => $output,
            ref other => {
                panic!(
                    "assertion failed: expected {:?} to match {}",
                    other,
                    stringify!($ty)
                );
            }
        }
    }};
}

/// Assert that the given lines appear in a printed document in the given order, ignoring
/// surrounding whitespace on each line.
#[macro_export]
macro_rules! assert_lines_contain {
    ($text:expr, [$($line:expr),* $(,)?]) => {{
        let text: &str = &$text;
        let mut lines = text.lines().map(|l| l.trim());
        $(
            let expected: &str = $line;
            if !lines.any(|l| l == expected) {
                panic!(
                    "assertion failed: expected line `{}` (in order) in document:\n{}",
                    expected, text
                );
            }
        )*
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_std_result_assertions() {
        let result: Result<i32, &str> = Ok(42);
        assert_eq!(assert_ok!(result), 42);
        let result: Result<i32, &str> = Err("error");
        assert_eq!(assert_err!(result), "error");
    }

    #[test]
    fn test_std_option_assertions() {
        let option: Option<i32> = Some(42);
        assert_eq!(assert_some!(option), 42);
        let option: Option<i32> = None;
        assert_none!(option);
    }

    #[test]
    fn test_assert_matches_binds_output() {
        let value: Result<(i32, &str), ()> = Ok((7, "bb1"));
        let label = assert_matches!(value, Ok((_, label)) => label);
        assert_eq!(label, "bb1");
    }

    #[test]
    fn test_assert_lines_contain_in_order() {
        let text = "bb0(%0 : *Big):\n  %1 = tuple () : ()\n  return %1\n";
        assert_lines_contain!(text, ["bb0(%0 : *Big):", "return %1"]);
    }

    #[test]
    #[should_panic]
    fn test_assert_lines_contain_out_of_order() {
        let text = "return %1\nbb0:\n";
        assert_lines_contain!(text, ["bb0:", "return %1"]);
    }

    #[test]
    #[should_panic]
    fn test_assert_ok_err() {
        let result: Result<i32, &str> = Err("error");
        assert_ok!(result);
    }

    #[test]
    #[should_panic]
    fn test_assert_some_none() {
        let option: Option<i32> = None;
        assert_some!(option);
    }
}
