//! Diagnostics shared by every stage of the compiler.
//!
//! User-facing errors are modelled as `miette` diagnostics in the crate that produces them. This
//! crate only hosts the [`ice`] macro, which is used for conditions that indicate a bug in the
//! compiler itself rather than in its input.

/// Abort compilation with an internal compiler error.
///
/// Accepts either a single message expression, or a format string with arguments.
#[macro_export]
macro_rules! ice {
    ($fmt:literal, $($arg:tt)+) => {{
        $crate::ice!(format!($fmt, $($arg)+))
    }};
    ($message:expr) => {{
        let message = $message;
        let file = file!();
        let line = line!();
        let column = column!();
        panic!(
            "internal compiler error ({}:{}:{}):\n{}",
            file, line, column, message
        )
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    #[should_panic(expected = "internal compiler error")]
    fn test_ice_with_message() {
        ice!("worklist was not drained");
    }

    #[test]
    #[should_panic(expected = "no binding for %3 in @f")]
    fn test_ice_with_format_arguments() {
        let function = "f";
        ice!("no binding for %{} in @{}", 3, function);
    }
}
