//! Instruction construction.
//!
//! The builder inserts instructions at an insertion point and computes their result types where
//! the IR defines them. Inserting after an instruction or at the start of a block moves the
//! insertion point past the new instruction, so that a sequence of insertions ends up in program
//! order.

use crate::body::{BlockId, FunctionId, GlobalId, InstId, MirBody, ValueId};
use crate::context::MirTypeContext;
use crate::instruction::{
    LoadQualifier, MirAccessKind, MirApply, MirInstructionKind, MirMember, MirSwitchEnum,
    StoreQualifier,
};
use crate::ty::{MirTy, MirType};
use tarn_diagnostics::ice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    Before(InstId),
    After(InstId),
    BlockStart(BlockId),
    BlockEnd(BlockId),
}

pub struct MirBuilder<'b, 'ta> {
    tcx: &'b MirTypeContext<'ta>,
    body: &'b mut MirBody<'ta>,
    point: InsertPoint,
}

impl<'b, 'ta> MirBuilder<'b, 'ta> {
    pub fn new(
        tcx: &'b MirTypeContext<'ta>,
        body: &'b mut MirBody<'ta>,
        point: InsertPoint,
    ) -> Self {
        Self { tcx, body, point }
    }

    pub fn body(&self) -> &MirBody<'ta> {
        &*self.body
    }

    pub fn point(&self) -> InsertPoint {
        self.point
    }

    pub fn set_point(&mut self, point: InsertPoint) {
        self.point = point;
    }

    /// Insert an instruction with explicit result types.
    pub fn insert(
        &mut self,
        kind: MirInstructionKind<'ta>,
        result_types: Vec<MirType<'ta>>,
    ) -> InstId {
        match self.point {
            InsertPoint::Before(anchor) => {
                let block = self.body.instruction(anchor).block;
                let position = self.body.position_in_block(anchor);
                self.body
                    .insert_instruction(block, position, kind, result_types)
            }
            InsertPoint::After(anchor) => {
                if self.body.kind(anchor).is_terminator() {
                    ice!(
                        "cannot insert {} after the terminator {}",
                        kind.opcode(),
                        self.body.kind(anchor).opcode()
                    );
                }
                let block = self.body.instruction(anchor).block;
                let position = self.body.position_in_block(anchor) + 1;
                let id = self
                    .body
                    .insert_instruction(block, position, kind, result_types);
                self.point = InsertPoint::After(id);
                id
            }
            InsertPoint::BlockStart(block) => {
                let id = self.body.insert_instruction(block, 0, kind, result_types);
                self.point = InsertPoint::After(id);
                id
            }
            InsertPoint::BlockEnd(block) => self.body.push_instruction(block, kind, result_types),
        }
    }

    fn insert_value(&mut self, kind: MirInstructionKind<'ta>, ty: MirType<'ta>) -> ValueId {
        let inst = self.insert(kind, vec![ty]);
        self.body.result(inst)
    }

    fn object_type_of(&self, value: ValueId) -> MirType<'ta> {
        self.body.value_ty(value).as_object()
    }

    pub fn create_apply(
        &mut self,
        callee: ValueId,
        callee_ty: &'ta MirTy<'ta>,
        arguments: Vec<ValueId>,
    ) -> ValueId {
        let result = self.direct_result_of(callee_ty);
        let apply = MirApply {
            callee,
            callee_ty,
            arguments,
        };
        self.insert_value(MirInstructionKind::Apply(apply), MirType::object(result))
    }

    pub fn create_try_apply(
        &mut self,
        callee: ValueId,
        callee_ty: &'ta MirTy<'ta>,
        arguments: Vec<ValueId>,
        normal: BlockId,
        error: BlockId,
    ) -> InstId {
        let apply = MirApply {
            callee,
            callee_ty,
            arguments,
        };
        self.insert(
            MirInstructionKind::TryApply {
                apply,
                normal,
                error,
            },
            vec![],
        )
    }

    /// Start a coroutine. The results are the yielded values followed by the token.
    pub fn create_begin_apply(
        &mut self,
        callee: ValueId,
        callee_ty: &'ta MirTy<'ta>,
        arguments: Vec<ValueId>,
    ) -> InstId {
        let f = callee_ty
            .as_function()
            .unwrap_or_else(|| ice!("begin_apply of non-function type {}", callee_ty));
        let result_types = f
            .yields
            .iter()
            .map(|y| y.storage_type())
            .chain(std::iter::once(MirType::object(
                self.tcx.arena().get_token_ty(),
            )))
            .collect();
        let apply = MirApply {
            callee,
            callee_ty,
            arguments,
        };
        self.insert(MirInstructionKind::BeginApply(apply), result_types)
    }

    pub fn create_partial_apply(
        &mut self,
        callee: ValueId,
        callee_ty: &'ta MirTy<'ta>,
        arguments: Vec<ValueId>,
        closure_ty: MirType<'ta>,
    ) -> ValueId {
        let apply = MirApply {
            callee,
            callee_ty,
            arguments,
        };
        self.insert_value(MirInstructionKind::PartialApply(apply), closure_ty)
    }

    fn direct_result_of(&self, callee_ty: &'ta MirTy<'ta>) -> &'ta MirTy<'ta> {
        let f = callee_ty
            .as_function()
            .unwrap_or_else(|| ice!("call of non-function type {}", callee_ty));
        self.tcx.direct_result_type(f)
    }

    pub fn create_class_method(
        &mut self,
        operand: ValueId,
        member: MirMember<'ta>,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(MirInstructionKind::ClassMethod { operand, member }, ty)
    }

    pub fn create_super_method(
        &mut self,
        operand: ValueId,
        member: MirMember<'ta>,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(MirInstructionKind::SuperMethod { operand, member }, ty)
    }

    pub fn create_witness_method(
        &mut self,
        lookup: &'ta MirTy<'ta>,
        member: MirMember<'ta>,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(MirInstructionKind::WitnessMethod { lookup, member }, ty)
    }

    pub fn create_function_ref(&mut self, function: FunctionId, ty: &'ta MirTy<'ta>) -> ValueId {
        self.insert_value(
            MirInstructionKind::FunctionRef { function },
            MirType::object(ty),
        )
    }

    pub fn create_thin_to_thick_function(
        &mut self,
        operand: ValueId,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(MirInstructionKind::ThinToThickFunction { operand }, ty)
    }

    pub fn create_convert_function(&mut self, operand: ValueId, ty: MirType<'ta>) -> ValueId {
        self.insert_value(MirInstructionKind::ConvertFunction { operand }, ty)
    }

    pub fn create_convert_escape_to_noescape(
        &mut self,
        operand: ValueId,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(MirInstructionKind::ConvertEscapeToNoEscape { operand }, ty)
    }

    /// The result has the type of the value it marks.
    pub fn create_mark_dependence(&mut self, value: ValueId, base: ValueId) -> ValueId {
        let ty = self.body.value_ty(value);
        self.insert_value(MirInstructionKind::MarkDependence { value, base }, ty)
    }

    pub fn create_builtin(
        &mut self,
        name: &'ta str,
        arguments: Vec<ValueId>,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(MirInstructionKind::Builtin { name, arguments }, ty)
    }

    pub fn create_alloc_global(&mut self, global: GlobalId) -> InstId {
        self.insert(MirInstructionKind::AllocGlobal { global }, vec![])
    }

    pub fn create_global_addr(&mut self, global: GlobalId, ty: &'ta MirTy<'ta>) -> ValueId {
        self.insert_value(MirInstructionKind::GlobalAddr { global }, MirType::address(ty))
    }

    pub fn create_global_value(&mut self, global: GlobalId, ty: &'ta MirTy<'ta>) -> ValueId {
        self.insert_value(MirInstructionKind::GlobalValue { global }, MirType::object(ty))
    }

    pub fn create_integer_literal(&mut self, value: i64, ty: &'ta MirTy<'ta>) -> ValueId {
        self.insert_value(
            MirInstructionKind::IntegerLiteral { value },
            MirType::object(ty),
        )
    }

    /// Allocate stack storage for a value of the given type. The result is its address.
    pub fn create_alloc_stack(&mut self, ty: MirType<'ta>) -> ValueId {
        self.insert_value(MirInstructionKind::AllocStack, ty.as_address())
    }

    pub fn create_dealloc_stack(&mut self, operand: ValueId) -> InstId {
        self.insert(MirInstructionKind::DeallocStack { operand }, vec![])
    }

    pub fn create_load(&mut self, address: ValueId, qualifier: LoadQualifier) -> ValueId {
        let ty = self.object_type_of(address);
        self.insert_value(MirInstructionKind::Load { address, qualifier }, ty)
    }

    pub fn create_store(
        &mut self,
        source: ValueId,
        destination: ValueId,
        qualifier: StoreQualifier,
    ) -> InstId {
        self.insert(
            MirInstructionKind::Store {
                source,
                destination,
                qualifier,
            },
            vec![],
        )
    }

    /// Store a value, choosing `[trivial]` or `[init]` from the value's type.
    pub fn create_initializing_store(&mut self, source: ValueId, destination: ValueId) -> InstId {
        let qualifier = if self.tcx.is_trivial(self.body.value_ty(source).ty()) {
            StoreQualifier::Trivial
        } else {
            StoreQualifier::Init
        };
        self.create_store(source, destination, qualifier)
    }

    pub fn create_copy_addr(
        &mut self,
        source: ValueId,
        destination: ValueId,
        take: bool,
        initialize: bool,
    ) -> InstId {
        self.insert(
            MirInstructionKind::CopyAddr {
                source,
                destination,
                take,
                initialize,
            },
            vec![],
        )
    }

    pub fn create_destroy_addr(&mut self, operand: ValueId) -> InstId {
        self.insert(MirInstructionKind::DestroyAddr { operand }, vec![])
    }

    pub fn create_pointer_to_address(&mut self, operand: ValueId, ty: MirType<'ta>) -> ValueId {
        self.insert_value(
            MirInstructionKind::PointerToAddress { operand },
            ty.as_address(),
        )
    }

    pub fn create_unchecked_addr_cast(&mut self, operand: ValueId, ty: MirType<'ta>) -> ValueId {
        self.insert_value(
            MirInstructionKind::UncheckedAddrCast { operand },
            ty.as_address(),
        )
    }

    pub fn create_unchecked_bitwise_cast(
        &mut self,
        operand: ValueId,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(
            MirInstructionKind::UncheckedBitwiseCast { operand },
            ty.as_object(),
        )
    }

    pub fn create_tuple(&mut self, elements: Vec<ValueId>, ty: MirType<'ta>) -> ValueId {
        self.insert_value(MirInstructionKind::Tuple { elements }, ty)
    }

    /// The empty tuple value `()`.
    pub fn create_empty_tuple(&mut self) -> ValueId {
        let unit = self.tcx.arena().get_empty_tuple_ty();
        self.create_tuple(vec![], MirType::object(unit))
    }

    pub fn create_tuple_extract(
        &mut self,
        operand: ValueId,
        index: u32,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(
            MirInstructionKind::TupleExtract { operand, index },
            ty.as_object(),
        )
    }

    pub fn create_tuple_element_addr(
        &mut self,
        operand: ValueId,
        index: u32,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(
            MirInstructionKind::TupleElementAddr { operand, index },
            ty.as_address(),
        )
    }

    pub fn create_struct_extract(
        &mut self,
        operand: ValueId,
        field: MirMember<'ta>,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(
            MirInstructionKind::StructExtract { operand, field },
            ty.as_object(),
        )
    }

    pub fn create_struct_element_addr(
        &mut self,
        operand: ValueId,
        field: MirMember<'ta>,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(
            MirInstructionKind::StructElementAddr { operand, field },
            ty.as_address(),
        )
    }

    pub fn create_enum(
        &mut self,
        case: &'ta str,
        payload: Option<ValueId>,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(MirInstructionKind::Enum { case, payload }, ty.as_object())
    }

    pub fn create_unchecked_enum_data(
        &mut self,
        operand: ValueId,
        case: &'ta str,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(
            MirInstructionKind::UncheckedEnumData { operand, case },
            ty.as_object(),
        )
    }

    pub fn create_unchecked_take_enum_data_addr(
        &mut self,
        operand: ValueId,
        case: &'ta str,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(
            MirInstructionKind::UncheckedTakeEnumDataAddr { operand, case },
            ty.as_address(),
        )
    }

    pub fn create_ref_element_addr(
        &mut self,
        operand: ValueId,
        field: MirMember<'ta>,
        ty: MirType<'ta>,
    ) -> ValueId {
        self.insert_value(
            MirInstructionKind::RefElementAddr { operand, field },
            ty.as_address(),
        )
    }

    pub fn create_ref_tail_addr(&mut self, operand: ValueId, ty: MirType<'ta>) -> ValueId {
        self.insert_value(MirInstructionKind::RefTailAddr { operand }, ty.as_address())
    }

    /// The result has the type of the accessed address.
    pub fn create_begin_access(&mut self, operand: ValueId, access: MirAccessKind) -> ValueId {
        let ty = self.body.value_ty(operand);
        self.insert_value(MirInstructionKind::BeginAccess { operand, access }, ty)
    }

    pub fn create_retain_value_addr(&mut self, operand: ValueId) -> InstId {
        self.insert(MirInstructionKind::RetainValueAddr { operand }, vec![])
    }

    pub fn create_release_value_addr(&mut self, operand: ValueId) -> InstId {
        self.insert(MirInstructionKind::ReleaseValueAddr { operand }, vec![])
    }

    pub fn create_debug_value_addr(&mut self, operand: ValueId, name: &'ta str) -> InstId {
        self.insert(MirInstructionKind::DebugValueAddr { operand, name }, vec![])
    }

    pub fn create_return(&mut self, operand: ValueId) -> InstId {
        self.insert(MirInstructionKind::Return { operand }, vec![])
    }

    pub fn create_switch_enum_addr(&mut self, switch: MirSwitchEnum<'ta>) -> InstId {
        self.insert(MirInstructionKind::SwitchEnumAddr(switch), vec![])
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::MirArena;
    use crate::body::MirBody;
    use crate::builder::{InsertPoint, MirBuilder};
    use crate::context::MirTypeContext;
    use crate::instruction::{LoadQualifier, MirInstructionKind};
    use crate::ty::{
        MirFunctionSignature, MirParameterInfo, MirResultInfo, MirType, ParameterConvention,
        ResultConvention,
    };
    use bumpalo::Bump;
    use tarn_macros::assert_matches;

    #[test]
    fn test_insertions_at_block_start_keep_program_order() {
        let bump = Bump::new();
        let tcx = MirTypeContext::new(MirArena::new(&bump));
        let i64_ty = tcx.arena().get_integer_ty(64);
        let mut body = MirBody::new();
        let entry = body.add_block();
        let arg = body.add_block_argument(entry, MirType::object(i64_ty));
        let ret = body.push_instruction(entry, MirInstructionKind::Return { operand: arg }, vec![]);

        let mut builder = MirBuilder::new(&tcx, &mut body, InsertPoint::BlockStart(entry));
        let buffer = builder.create_alloc_stack(MirType::object(i64_ty));
        builder.create_initializing_store(arg, buffer);
        let loaded = builder.create_load(buffer, LoadQualifier::Trivial);
        builder.set_point(InsertPoint::Before(ret));
        builder.create_dealloc_stack(buffer);

        assert_eq!(body.value_ty(buffer).to_string(), "*i64");
        assert_eq!(body.value_ty(loaded).to_string(), "i64");
        let opcodes = body
            .block(entry)
            .instructions
            .iter()
            .map(|i| body.kind(*i).opcode())
            .collect::<Vec<_>>();
        assert_eq!(
            opcodes,
            vec!["alloc_stack", "store", "load", "dealloc_stack", "return"]
        );
        let store = body.block(entry).instructions[1];
        assert_matches!(body.kind(store), MirInstructionKind::Store { qualifier, .. } => {
            assert_eq!(qualifier.spelling(), "trivial");
        });
    }

    #[test]
    fn test_apply_result_is_tuple_of_direct_results() {
        let bump = Bump::new();
        let tcx = MirTypeContext::new(MirArena::new(&bump));
        let arena = tcx.arena();
        let i64_ty = arena.get_integer_ty(64);
        let indirect = arena.get_function_ty(MirFunctionSignature::thin(
            vec![MirParameterInfo::new(i64_ty, ParameterConvention::DirectOwned)],
            vec![MirResultInfo::new(i64_ty, ResultConvention::Indirect)],
        ));
        let mut body = MirBody::new();
        let entry = body.add_block();
        let callee = body.add_block_argument(entry, MirType::object(indirect));
        let out = body.add_block_argument(entry, MirType::address(i64_ty));
        let arg = body.add_block_argument(entry, MirType::object(i64_ty));
        let mut builder = MirBuilder::new(&tcx, &mut body, InsertPoint::BlockEnd(entry));
        let result = builder.create_apply(callee, indirect, vec![out, arg]);
        assert_eq!(body.value_ty(result).to_string(), "()");
    }
}
