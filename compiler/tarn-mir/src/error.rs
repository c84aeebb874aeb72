use miette::{Diagnostic, SourceSpan};
use tarn_macros::declare_error_type;
use thiserror::Error;

declare_error_type! {
    #[error("mir error: {0}")]
    pub enum MirError {
        Parse(ParseError),
        Verifier(VerifierError),
        Lowering(LoweringError),
    }
}

/// Handy type alias for all MIR-related errors.
pub type MirResult<T> = Result<T, MirError>;

declare_error_type! {
    #[error("parse error: {0}")]
    pub enum ParseError {
        Syntax(SyntaxError),
        UndefinedValue(UndefinedValueError),
        DuplicateValue(DuplicateValueError),
        UndefinedBlock(UndefinedBlockError),
        DuplicateBlock(DuplicateBlockError),
        UndefinedSymbol(UndefinedSymbolError),
        DuplicateSymbol(DuplicateSymbolError),
        UnknownType(UnknownTypeError),
        DuplicateType(DuplicateTypeError),
        UnknownEnvironment(UnknownEnvironmentError),
        ResultCount(ResultCountError),
        EmptyBody(EmptyBodyError),
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::syntax))]
#[error("syntax error")]
pub struct SyntaxError {
    pub expected: String,
    #[label = "expected {expected}"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::undefined_value))]
#[error("use of undefined value {name}")]
pub struct UndefinedValueError {
    pub name: String,
    #[label = "{name} is never defined in this function"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::duplicate_value))]
#[error("value {name} is defined more than once")]
pub struct DuplicateValueError {
    pub name: String,
    #[label = "redefinition of {name}"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::undefined_block))]
#[error("branch to undefined block {name}")]
pub struct UndefinedBlockError {
    pub name: String,
    #[label = "no block named {name} in this function"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::duplicate_block))]
#[error("block {name} is defined more than once")]
pub struct DuplicateBlockError {
    pub name: String,
    #[label = "redefinition of {name}"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::undefined_symbol))]
#[error("reference to undefined symbol @{name}")]
pub struct UndefinedSymbolError {
    pub name: String,
    #[label = "no function or global named @{name}"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::duplicate_symbol))]
#[error("symbol @{name} is defined more than once")]
pub struct DuplicateSymbolError {
    pub name: String,
    #[label = "redefinition of @{name}"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::unknown_type))]
#[error("{name} does not name a declared type")]
pub struct UnknownTypeError {
    pub name: String,
    #[label = "could not find type {name}"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::duplicate_type))]
#[error("type {name} is declared more than once")]
pub struct DuplicateTypeError {
    pub name: String,
    #[label = "redeclaration of {name}"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::unknown_environment))]
#[error("unknown generic environment #{id}")]
pub struct UnknownEnvironmentError {
    pub id: u32,
    #[label = "environments must be declared in order before they are used"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::result_count))]
#[error("{opcode} produces {expected} results, but {found} names were bound")]
pub struct ResultCountError {
    pub opcode: String,
    pub expected: usize,
    pub found: usize,
    #[label = "wrong number of results"]
    pub span: SourceSpan,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(parse::empty_body))]
#[error("function @{name} has an empty body")]
pub struct EmptyBodyError {
    pub name: String,
    #[label = "a function body needs at least an entry block"]
    pub span: SourceSpan,
}

declare_error_type! {
    #[error("verifier error: {0}")]
    pub enum VerifierError {
        MissingTerminator(MissingTerminatorError),
        MisplacedTerminator(MisplacedTerminatorError),
        DeadOperand(DeadOperandError),
        UnbalancedStack(UnbalancedStackError),
        CalleeTypeMismatch(CalleeTypeMismatchError),
        ArgumentCount(ArgumentCountError),
        ArgumentType(ArgumentTypeError),
        EntryArguments(EntryArgumentsError),
        ReturnType(ReturnTypeError),
    }
}

pub type VerifierResult<T> = Result<T, VerifierError>;

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(verifier::missing_terminator))]
#[error("block {block} of @{function} does not end in a terminator")]
pub struct MissingTerminatorError {
    pub function: String,
    pub block: String,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(verifier::misplaced_terminator))]
#[error("{opcode} in block {block} of @{function} is a terminator but not the last instruction")]
pub struct MisplacedTerminatorError {
    pub function: String,
    pub block: String,
    pub opcode: String,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(verifier::dead_operand))]
#[error("{opcode} in @{function} uses {value}, which is no longer defined")]
pub struct DeadOperandError {
    pub function: String,
    pub opcode: String,
    pub value: String,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(
    code(verifier::unbalanced_stack),
    help("stack allocations must be deallocated in reverse order on every path to an exit")
)]
#[error("stack discipline violated in @{function}: {reason}")]
pub struct UnbalancedStackError {
    pub function: String,
    pub reason: String,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(verifier::callee_type_mismatch))]
#[error("{opcode} in @{function} is formed against {expected}, but its callee has type {found}")]
pub struct CalleeTypeMismatchError {
    pub function: String,
    pub opcode: String,
    pub expected: String,
    pub found: String,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(verifier::argument_count))]
#[error("{opcode} in @{function} passes {found} arguments, but the callee expects {expected}")]
pub struct ArgumentCountError {
    pub function: String,
    pub opcode: String,
    pub expected: usize,
    pub found: usize,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(verifier::argument_type))]
#[error("argument {index} of {opcode} in @{function} has type {found}, expected {expected}")]
pub struct ArgumentTypeError {
    pub function: String,
    pub opcode: String,
    pub index: usize,
    pub expected: String,
    pub found: String,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(verifier::entry_arguments))]
#[error("entry block of @{function} takes ({found}), but its type requires ({expected})")]
pub struct EntryArgumentsError {
    pub function: String,
    pub expected: String,
    pub found: String,
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(code(verifier::return_type))]
#[error("return in @{function} produces {found}, but the function returns {expected}")]
pub struct ReturnTypeError {
    pub function: String,
    pub expected: String,
    pub found: String,
}

declare_error_type! {
    #[error("lowering error: {0}")]
    pub enum LoweringError {
        /// A borrowed coroutine yield that would have to be reloaded after the call.
        UnsupportedBorrowedYield(UnsupportedBorrowedYieldError),
    }
}

#[derive(Error, Diagnostic, Debug)]
#[diagnostic(
    code(lowering::unsupported_borrowed_yield),
    help("yield the value @in_guaranteed or as an owned value instead")
)]
#[error("not yet implemented: borrowed yield of {ty} in @{function} cannot be passed by address")]
pub struct UnsupportedBorrowedYieldError {
    pub function: String,
    pub ty: String,
}
