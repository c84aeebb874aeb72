//! Instructions of the MIR.
//!
//! Every instruction kind is a variant of [`MirInstructionKind`]. Code that dispatches on the kind
//! is expected to match exhaustively, so that adding an instruction forces every consumer to decide
//! how to handle it.

use crate::body::{BlockId, FunctionId, GlobalId, ValueId};
use crate::ty::MirTy;
use std::fmt::Display;

/// A reference to a member of a nominal type, written `#Owner.name`.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirMember<'ta> {
    pub owner: &'ta str,
    pub name: &'ta str,
}

impl Display for MirMember<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.owner, self.name)
    }
}

/// The callee and arguments of a call-like instruction.
///
/// `callee_ty` is the function type the call was formed against. It is kept on the instruction
/// rather than read from the callee value, because the callee's type may change before the call
/// site is recreated.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub struct MirApply<'ta> {
    pub callee: ValueId,
    pub callee_ty: &'ta MirTy<'ta>,
    pub arguments: Vec<ValueId>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub struct MirSwitchEnum<'ta> {
    pub operand: ValueId,
    pub cases: Vec<(&'ta str, BlockId)>,
    pub default: Option<BlockId>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadQualifier {
    Take,
    Copy,
    Trivial,
}

impl LoadQualifier {
    pub fn spelling(&self) -> &'static str {
        match self {
            Self::Take => "take",
            Self::Copy => "copy",
            Self::Trivial => "trivial",
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreQualifier {
    Init,
    Assign,
    Trivial,
}

impl StoreQualifier {
    pub fn spelling(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Assign => "assign",
            Self::Trivial => "trivial",
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirAccessKind {
    Read,
    Modify,
}

impl MirAccessKind {
    pub fn spelling(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Modify => "modify",
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub enum MirInstructionKind<'ta> {
    /// `apply %f(%a, ...) : fn(...)`. The result is the tuple of the callee's direct results.
    Apply(MirApply<'ta>),
    /// A call whose callee may throw. The normal successor receives the direct result and the
    /// error successor receives the error.
    TryApply {
        apply: MirApply<'ta>,
        normal: BlockId,
        error: BlockId,
    },
    /// Start a coroutine. The results are the yielded values followed by a continuation token.
    BeginApply(MirApply<'ta>),
    /// Bind leading arguments of a function, producing a closure.
    PartialApply(MirApply<'ta>),
    EndApply {
        token: ValueId,
    },
    AbortApply {
        token: ValueId,
    },
    ClassMethod {
        operand: ValueId,
        member: MirMember<'ta>,
    },
    SuperMethod {
        operand: ValueId,
        member: MirMember<'ta>,
    },
    WitnessMethod {
        lookup: &'ta MirTy<'ta>,
        member: MirMember<'ta>,
    },
    FunctionRef {
        function: FunctionId,
    },
    ThinToThickFunction {
        operand: ValueId,
    },
    ConvertFunction {
        operand: ValueId,
    },
    ConvertEscapeToNoEscape {
        operand: ValueId,
    },
    MarkDependence {
        value: ValueId,
        base: ValueId,
    },
    Builtin {
        name: &'ta str,
        arguments: Vec<ValueId>,
    },
    AllocGlobal {
        global: GlobalId,
    },
    GlobalAddr {
        global: GlobalId,
    },
    GlobalValue {
        global: GlobalId,
    },
    IntegerLiteral {
        value: i64,
    },
    /// Allocate stack storage for the object type of the result address.
    AllocStack,
    DeallocStack {
        operand: ValueId,
    },
    Load {
        address: ValueId,
        qualifier: LoadQualifier,
    },
    Store {
        source: ValueId,
        destination: ValueId,
        qualifier: StoreQualifier,
    },
    /// Copy the value at one address to another.
    ///
    /// With `take` the source is left uninitialized; with `initialize` the destination is
    /// assumed to be uninitialized.
    CopyAddr {
        source: ValueId,
        destination: ValueId,
        take: bool,
        initialize: bool,
    },
    DestroyAddr {
        operand: ValueId,
    },
    PointerToAddress {
        operand: ValueId,
    },
    UncheckedAddrCast {
        operand: ValueId,
    },
    /// Reinterpret the bits of an object as another type of the same layout.
    UncheckedBitwiseCast {
        operand: ValueId,
    },
    ProjectBlockStorage {
        operand: ValueId,
    },
    Tuple {
        elements: Vec<ValueId>,
    },
    TupleExtract {
        operand: ValueId,
        index: u32,
    },
    TupleElementAddr {
        operand: ValueId,
        index: u32,
    },
    Struct {
        elements: Vec<ValueId>,
    },
    StructExtract {
        operand: ValueId,
        field: MirMember<'ta>,
    },
    StructElementAddr {
        operand: ValueId,
        field: MirMember<'ta>,
    },
    Enum {
        case: &'ta str,
        payload: Option<ValueId>,
    },
    UncheckedEnumData {
        operand: ValueId,
        case: &'ta str,
    },
    UncheckedTakeEnumDataAddr {
        operand: ValueId,
        case: &'ta str,
    },
    RefElementAddr {
        operand: ValueId,
        field: MirMember<'ta>,
    },
    RefTailAddr {
        operand: ValueId,
    },
    BeginAccess {
        operand: ValueId,
        access: MirAccessKind,
    },
    EndAccess {
        operand: ValueId,
    },
    RetainValue {
        operand: ValueId,
    },
    ReleaseValue {
        operand: ValueId,
    },
    RetainValueAddr {
        operand: ValueId,
    },
    ReleaseValueAddr {
        operand: ValueId,
    },
    DestroyValue {
        operand: ValueId,
    },
    DebugValue {
        operand: ValueId,
        name: &'ta str,
    },
    DebugValueAddr {
        operand: ValueId,
        name: &'ta str,
    },
    Return {
        operand: ValueId,
    },
    Throw {
        operand: ValueId,
    },
    Yield {
        values: Vec<ValueId>,
        resume: BlockId,
        unwind: BlockId,
    },
    Unwind,
    Branch {
        destination: BlockId,
        arguments: Vec<ValueId>,
    },
    CondBranch {
        condition: ValueId,
        true_destination: BlockId,
        true_arguments: Vec<ValueId>,
        false_destination: BlockId,
        false_arguments: Vec<ValueId>,
    },
    SwitchEnum(MirSwitchEnum<'ta>),
    SwitchEnumAddr(MirSwitchEnum<'ta>),
    Unreachable,
}

impl<'ta> MirInstructionKind<'ta> {
    /// The textual name of the instruction.
    pub fn opcode(&self) -> &'static str {
        match self {
            Self::Apply(_) => "apply",
            Self::TryApply { .. } => "try_apply",
            Self::BeginApply(_) => "begin_apply",
            Self::PartialApply(_) => "partial_apply",
            Self::EndApply { .. } => "end_apply",
            Self::AbortApply { .. } => "abort_apply",
            Self::ClassMethod { .. } => "class_method",
            Self::SuperMethod { .. } => "super_method",
            Self::WitnessMethod { .. } => "witness_method",
            Self::FunctionRef { .. } => "function_ref",
            Self::ThinToThickFunction { .. } => "thin_to_thick_function",
            Self::ConvertFunction { .. } => "convert_function",
            Self::ConvertEscapeToNoEscape { .. } => "convert_escape_to_noescape",
            Self::MarkDependence { .. } => "mark_dependence",
            Self::Builtin { .. } => "builtin",
            Self::AllocGlobal { .. } => "alloc_global",
            Self::GlobalAddr { .. } => "global_addr",
            Self::GlobalValue { .. } => "global_value",
            Self::IntegerLiteral { .. } => "integer_literal",
            Self::AllocStack => "alloc_stack",
            Self::DeallocStack { .. } => "dealloc_stack",
            Self::Load { .. } => "load",
            Self::Store { .. } => "store",
            Self::CopyAddr { .. } => "copy_addr",
            Self::DestroyAddr { .. } => "destroy_addr",
            Self::PointerToAddress { .. } => "pointer_to_address",
            Self::UncheckedAddrCast { .. } => "unchecked_addr_cast",
            Self::UncheckedBitwiseCast { .. } => "unchecked_bitwise_cast",
            Self::ProjectBlockStorage { .. } => "project_block_storage",
            Self::Tuple { .. } => "tuple",
            Self::TupleExtract { .. } => "tuple_extract",
            Self::TupleElementAddr { .. } => "tuple_element_addr",
            Self::Struct { .. } => "struct",
            Self::StructExtract { .. } => "struct_extract",
            Self::StructElementAddr { .. } => "struct_element_addr",
            Self::Enum { .. } => "enum",
            Self::UncheckedEnumData { .. } => "unchecked_enum_data",
            Self::UncheckedTakeEnumDataAddr { .. } => "unchecked_take_enum_data_addr",
            Self::RefElementAddr { .. } => "ref_element_addr",
            Self::RefTailAddr { .. } => "ref_tail_addr",
            Self::BeginAccess { .. } => "begin_access",
            Self::EndAccess { .. } => "end_access",
            Self::RetainValue { .. } => "retain_value",
            Self::ReleaseValue { .. } => "release_value",
            Self::RetainValueAddr { .. } => "retain_value_addr",
            Self::ReleaseValueAddr { .. } => "release_value_addr",
            Self::DestroyValue { .. } => "destroy_value",
            Self::DebugValue { .. } => "debug_value",
            Self::DebugValueAddr { .. } => "debug_value_addr",
            Self::Return { .. } => "return",
            Self::Throw { .. } => "throw",
            Self::Yield { .. } => "yield",
            Self::Unwind => "unwind",
            Self::Branch { .. } => "br",
            Self::CondBranch { .. } => "cond_br",
            Self::SwitchEnum(_) => "switch_enum",
            Self::SwitchEnumAddr(_) => "switch_enum_addr",
            Self::Unreachable => "unreachable",
        }
    }

    /// The value operands of the instruction, in a fixed order.
    ///
    /// Calls list the callee first, followed by the arguments. Stores and copies list the source
    /// before the destination.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Self::Apply(a) | Self::BeginApply(a) | Self::PartialApply(a) => {
                std::iter::once(a.callee).chain(a.arguments.iter().copied()).collect()
            }
            Self::TryApply { apply, .. } => std::iter::once(apply.callee)
                .chain(apply.arguments.iter().copied())
                .collect(),
            Self::EndApply { token } | Self::AbortApply { token } => vec![*token],
            Self::ClassMethod { operand, .. }
            | Self::SuperMethod { operand, .. }
            | Self::ThinToThickFunction { operand }
            | Self::ConvertFunction { operand }
            | Self::ConvertEscapeToNoEscape { operand }
            | Self::DeallocStack { operand }
            | Self::DestroyAddr { operand }
            | Self::PointerToAddress { operand }
            | Self::UncheckedAddrCast { operand }
            | Self::UncheckedBitwiseCast { operand }
            | Self::ProjectBlockStorage { operand }
            | Self::TupleExtract { operand, .. }
            | Self::TupleElementAddr { operand, .. }
            | Self::StructExtract { operand, .. }
            | Self::StructElementAddr { operand, .. }
            | Self::UncheckedEnumData { operand, .. }
            | Self::UncheckedTakeEnumDataAddr { operand, .. }
            | Self::RefElementAddr { operand, .. }
            | Self::RefTailAddr { operand }
            | Self::BeginAccess { operand, .. }
            | Self::EndAccess { operand }
            | Self::RetainValue { operand }
            | Self::ReleaseValue { operand }
            | Self::RetainValueAddr { operand }
            | Self::ReleaseValueAddr { operand }
            | Self::DestroyValue { operand }
            | Self::DebugValue { operand, .. }
            | Self::DebugValueAddr { operand, .. }
            | Self::Return { operand }
            | Self::Throw { operand } => vec![*operand],
            Self::Load { address, .. } => vec![*address],
            Self::MarkDependence { value, base } => vec![*value, *base],
            Self::Store {
                source,
                destination,
                ..
            }
            | Self::CopyAddr {
                source,
                destination,
                ..
            } => vec![*source, *destination],
            Self::Builtin { arguments, .. } => arguments.clone(),
            Self::Tuple { elements } | Self::Struct { elements } => elements.clone(),
            Self::Enum { payload, .. } => payload.iter().copied().collect(),
            Self::Yield { values, .. } => values.clone(),
            Self::Branch { arguments, .. } => arguments.clone(),
            Self::CondBranch {
                condition,
                true_arguments,
                false_arguments,
                ..
            } => std::iter::once(*condition)
                .chain(true_arguments.iter().copied())
                .chain(false_arguments.iter().copied())
                .collect(),
            Self::SwitchEnum(s) | Self::SwitchEnumAddr(s) => vec![s.operand],
            Self::WitnessMethod { .. }
            | Self::FunctionRef { .. }
            | Self::AllocGlobal { .. }
            | Self::GlobalAddr { .. }
            | Self::GlobalValue { .. }
            | Self::IntegerLiteral { .. }
            | Self::AllocStack
            | Self::Unwind
            | Self::Unreachable => vec![],
        }
    }

    /// Mutable references to the operands, in the same order as [`Self::operands`].
    pub fn operands_mut(&mut self) -> Vec<&mut ValueId> {
        match self {
            Self::Apply(a) | Self::BeginApply(a) | Self::PartialApply(a) => {
                std::iter::once(&mut a.callee)
                    .chain(a.arguments.iter_mut())
                    .collect()
            }
            Self::TryApply { apply, .. } => std::iter::once(&mut apply.callee)
                .chain(apply.arguments.iter_mut())
                .collect(),
            Self::EndApply { token } | Self::AbortApply { token } => vec![token],
            Self::ClassMethod { operand, .. }
            | Self::SuperMethod { operand, .. }
            | Self::ThinToThickFunction { operand }
            | Self::ConvertFunction { operand }
            | Self::ConvertEscapeToNoEscape { operand }
            | Self::DeallocStack { operand }
            | Self::DestroyAddr { operand }
            | Self::PointerToAddress { operand }
            | Self::UncheckedAddrCast { operand }
            | Self::UncheckedBitwiseCast { operand }
            | Self::ProjectBlockStorage { operand }
            | Self::TupleExtract { operand, .. }
            | Self::TupleElementAddr { operand, .. }
            | Self::StructExtract { operand, .. }
            | Self::StructElementAddr { operand, .. }
            | Self::UncheckedEnumData { operand, .. }
            | Self::UncheckedTakeEnumDataAddr { operand, .. }
            | Self::RefElementAddr { operand, .. }
            | Self::RefTailAddr { operand }
            | Self::BeginAccess { operand, .. }
            | Self::EndAccess { operand }
            | Self::RetainValue { operand }
            | Self::ReleaseValue { operand }
            | Self::RetainValueAddr { operand }
            | Self::ReleaseValueAddr { operand }
            | Self::DestroyValue { operand }
            | Self::DebugValue { operand, .. }
            | Self::DebugValueAddr { operand, .. }
            | Self::Return { operand }
            | Self::Throw { operand } => vec![operand],
            Self::Load { address, .. } => vec![address],
            Self::MarkDependence { value, base } => vec![value, base],
            Self::Store {
                source,
                destination,
                ..
            }
            | Self::CopyAddr {
                source,
                destination,
                ..
            } => vec![source, destination],
            Self::Builtin { arguments, .. } => arguments.iter_mut().collect(),
            Self::Tuple { elements } | Self::Struct { elements } => elements.iter_mut().collect(),
            Self::Enum { payload, .. } => payload.iter_mut().collect(),
            Self::Yield { values, .. } => values.iter_mut().collect(),
            Self::Branch { arguments, .. } => arguments.iter_mut().collect(),
            Self::CondBranch {
                condition,
                true_arguments,
                false_arguments,
                ..
            } => std::iter::once(condition)
                .chain(true_arguments.iter_mut())
                .chain(false_arguments.iter_mut())
                .collect(),
            Self::SwitchEnum(s) | Self::SwitchEnumAddr(s) => vec![&mut s.operand],
            Self::WitnessMethod { .. }
            | Self::FunctionRef { .. }
            | Self::AllocGlobal { .. }
            | Self::GlobalAddr { .. }
            | Self::GlobalValue { .. }
            | Self::IntegerLiteral { .. }
            | Self::AllocStack
            | Self::Unwind
            | Self::Unreachable => vec![],
        }
    }

    /// The control-flow successors of a terminator.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Self::TryApply { normal, error, .. } => vec![*normal, *error],
            Self::Yield { resume, unwind, .. } => vec![*resume, *unwind],
            Self::Branch { destination, .. } => vec![*destination],
            Self::CondBranch {
                true_destination,
                false_destination,
                ..
            } => vec![*true_destination, *false_destination],
            Self::SwitchEnum(s) | Self::SwitchEnumAddr(s) => s
                .cases
                .iter()
                .map(|(_, b)| *b)
                .chain(s.default)
                .collect(),
            _ => vec![],
        }
    }

    /// Mutable references to the successor blocks, in the same order as [`Self::successors`].
    pub fn successors_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            Self::TryApply { normal, error, .. } => vec![normal, error],
            Self::Yield { resume, unwind, .. } => vec![resume, unwind],
            Self::Branch { destination, .. } => vec![destination],
            Self::CondBranch {
                true_destination,
                false_destination,
                ..
            } => vec![true_destination, false_destination],
            Self::SwitchEnum(s) | Self::SwitchEnumAddr(s) => s
                .cases
                .iter_mut()
                .map(|(_, b)| b)
                .chain(s.default.iter_mut())
                .collect(),
            _ => vec![],
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::TryApply { .. }
                | Self::Return { .. }
                | Self::Throw { .. }
                | Self::Yield { .. }
                | Self::Unwind
                | Self::Branch { .. }
                | Self::CondBranch { .. }
                | Self::SwitchEnum(_)
                | Self::SwitchEnumAddr(_)
                | Self::Unreachable
        )
    }

    /// Does the terminator leave the function?
    pub fn is_function_exiting(&self) -> bool {
        matches!(
            self,
            Self::Return { .. } | Self::Throw { .. } | Self::Unwind
        )
    }

    /// The callee and arguments of any call-like instruction.
    pub fn apply(&self) -> Option<&MirApply<'ta>> {
        match self {
            Self::Apply(a) | Self::BeginApply(a) | Self::PartialApply(a) => Some(a),
            Self::TryApply { apply, .. } => Some(apply),
            _ => None,
        }
    }

    pub fn apply_mut(&mut self) -> Option<&mut MirApply<'ta>> {
        match self {
            Self::Apply(a) | Self::BeginApply(a) | Self::PartialApply(a) => Some(a),
            Self::TryApply { apply, .. } => Some(apply),
            _ => None,
        }
    }

    /// Is this a call that runs the callee to completion or suspension, as opposed to a partial
    /// application?
    pub fn is_full_apply(&self) -> bool {
        matches!(
            self,
            Self::Apply(_) | Self::TryApply { .. } | Self::BeginApply(_)
        )
    }
}

/// A single instruction in a function body.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub struct MirInstruction<'ta> {
    pub kind: MirInstructionKind<'ta>,
    pub results: Vec<ValueId>,
    pub block: BlockId,
}
