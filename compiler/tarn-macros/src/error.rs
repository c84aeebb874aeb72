//! Declaration of diagnostic error enums.
//!
//! Every compiler area groups its diagnostics into a single enum whose variants wrap one
//! diagnostic struct each. [`declare_error_type`] generates that enum with transparent `Display`
//! and `Diagnostic` forwarding, `From` conversions for each wrapped struct, and a `kind` accessor
//! naming the variant.

/// Declare a new error type that can be used as a diagnostic error.
#[macro_export]
macro_rules! declare_error_type {
    {
        #[error($msg:expr)]
        $vis:vis enum $type_name:ident {
            $(
                $(#[doc = $doc:expr])*
                $name:ident($ty:ty),
            )*
        }
    } => {
        #[derive(thiserror::Error, miette::Diagnostic, Debug)]
        #[error($msg)]
        $vis enum $type_name {
            $(
                $(#[doc = $doc])*
                #[error(transparent)]
                #[diagnostic(transparent)]
                $name(#[from] $ty),
            )*
        }

        impl $type_name {
            /// The name of the variant holding the diagnostic.
            pub fn kind(&self) -> &'static str {
                match self {
                    $(Self::$name(_) => stringify!($name),)*
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use miette::Diagnostic;
    use thiserror::Error;

    #[derive(Error, Diagnostic, Debug)]
    #[diagnostic(code(test::unbalanced_stack))]
    #[error("stack allocation {name} is never deallocated")]
    struct UnbalancedStackError {
        name: String,
    }

    #[derive(Error, Diagnostic, Debug)]
    #[diagnostic(code(test::unknown_block))]
    #[error("unknown block")]
    struct UnknownBlockError;

    declare_error_type! {
        #[error("test error: {0}")]
        enum TestError {
            /// A leaked allocation.
            UnbalancedStack(UnbalancedStackError),
            UnknownBlock(UnknownBlockError),
        }
    }

    #[test]
    fn test_variants_are_transparent() {
        let error = TestError::from(UnbalancedStackError {
            name: "%4".to_owned(),
        });
        assert_eq!(error.to_string(), "stack allocation %4 is never deallocated");
        let code = error.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("test::unbalanced_stack"));
        assert_eq!(error.kind(), "UnbalancedStack");
        assert_eq!(TestError::from(UnknownBlockError).kind(), "UnknownBlock");
    }
}
