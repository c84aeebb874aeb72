//! Classification of the instructions of a function body.
//!
//! The scan visits blocks in reverse post-order and sorts every instruction that touches a large
//! value or a changed function signature into the worklist of the rewrite that handles it.

use crate::body::InstId;
use crate::instruction::MirInstructionKind;
use crate::passes::large_values::mapper::{inner_function_ty, is_modifiable};
use crate::passes::large_values::{function_mir_ty, function_ty_of, FunctionLowering};
use crate::ty::MirType;
use tarn_diagnostics::ice;
use tracing::trace;

impl<'ta> FunctionLowering<'_, '_, 'ta> {
    pub(super) fn scan(&mut self) {
        for block in self.body.reverse_post_order() {
            for inst in self.body.block(block).instructions.clone() {
                self.visit(inst);
            }
        }
    }

    fn visit(&mut self, inst: InstId) {
        let kind = self.body.kind(inst).clone();
        match kind {
            MirInstructionKind::Apply(_)
            | MirInstructionKind::TryApply { .. }
            | MirInstructionKind::BeginApply(_)
            | MirInstructionKind::PartialApply(_) => self.visit_apply(inst),
            MirInstructionKind::ClassMethod { .. }
            | MirInstructionKind::SuperMethod { .. }
            | MirInstructionKind::WitnessMethod { .. } => self.visit_method(inst),
            MirInstructionKind::Store { source, .. } => {
                if self.state.large_args.contains(&source) {
                    self.state.stores.push(inst);
                }
            }
            MirInstructionKind::SwitchEnum(switch) => {
                if self.state.large_args.contains(&switch.operand) {
                    self.state.switch_enums.push(inst);
                    return;
                }
                for (_, block) in &switch.cases {
                    for &argument in &self.body.block(*block).arguments {
                        let ty = self.value_ty(argument);
                        if self.mapper.should_convert_block_argument(self.env, ty)
                            && self.lower_type(ty).is_address()
                        {
                            self.state.switch_enums.push(inst);
                            return;
                        }
                    }
                }
            }
            MirInstructionKind::StructExtract { operand, .. } => {
                self.visit_result_ty(inst);
                if self.state.large_args.contains(&operand) {
                    self.state.struct_extracts.push(inst);
                }
            }
            MirInstructionKind::StructElementAddr { .. }
            | MirInstructionKind::RefTailAddr { .. }
            | MirInstructionKind::RefElementAddr { .. }
            | MirInstructionKind::BeginAccess { .. }
            | MirInstructionKind::Enum { .. } => {
                self.visit_result_ty(inst);
                self.visit_instr(inst);
            }
            MirInstructionKind::RetainValue { operand } => {
                if self.state.large_args.contains(&operand) {
                    self.state.retains.push(inst);
                }
            }
            MirInstructionKind::ReleaseValue { operand } => {
                if self.state.large_args.contains(&operand) {
                    self.state.releases.push(inst);
                }
            }
            MirInstructionKind::DestroyValue { operand } => {
                if self.state.large_args.contains(&operand) {
                    self.state.destroys.push(inst);
                }
            }
            MirInstructionKind::DebugValue { operand, .. } => {
                if self.state.large_args.contains(&operand) {
                    self.state.debug_values.push(inst);
                }
            }
            MirInstructionKind::TupleExtract { .. } | MirInstructionKind::TupleElementAddr { .. } => {
                self.visit_tuple(inst);
                self.visit_instr(inst);
            }
            MirInstructionKind::AllocStack => {
                let ty = self.value_ty(self.body.result(inst)).as_object();
                if self.mapper.has_different_function_signature(self.env, ty) {
                    self.state.alloc_stacks.push(inst);
                }
            }
            MirInstructionKind::PointerToAddress { .. } => {
                let ty = self.value_ty(self.body.result(inst)).as_object();
                if inner_function_ty(ty).is_some() {
                    self.state.pointer_to_addresses.push(inst);
                }
            }
            MirInstructionKind::Return { .. } => {
                if !self.mapper.should_transform_results(self.env, self.ty) {
                    self.visit_instr(inst);
                } else if self.mapper.is_large_single_result(self.env, self.ty) {
                    self.state.mod_returns.push(inst);
                }
            }
            MirInstructionKind::Yield { .. } => {
                if self.mapper.should_transform_yields(self.env, self.ty) {
                    self.state.mod_yields.push(inst);
                } else {
                    self.visit_instr(inst);
                }
            }
            MirInstructionKind::DeallocStack { operand } => {
                if self.state.large_args.contains(&operand)
                    && !self.state.buffer_to_apply.contains_key(&operand)
                {
                    ice!("dealloc_stack of the argument {} in @{}", operand, self.name);
                }
            }
            MirInstructionKind::EndApply { .. }
            | MirInstructionKind::AbortApply { .. }
            | MirInstructionKind::FunctionRef { .. }
            | MirInstructionKind::ThinToThickFunction { .. }
            | MirInstructionKind::ConvertFunction { .. }
            | MirInstructionKind::ConvertEscapeToNoEscape { .. }
            | MirInstructionKind::MarkDependence { .. }
            | MirInstructionKind::Builtin { .. }
            | MirInstructionKind::AllocGlobal { .. }
            | MirInstructionKind::GlobalAddr { .. }
            | MirInstructionKind::GlobalValue { .. }
            | MirInstructionKind::IntegerLiteral { .. }
            | MirInstructionKind::Load { .. }
            | MirInstructionKind::CopyAddr { .. }
            | MirInstructionKind::DestroyAddr { .. }
            | MirInstructionKind::UncheckedAddrCast { .. }
            | MirInstructionKind::UncheckedBitwiseCast { .. }
            | MirInstructionKind::ProjectBlockStorage { .. }
            | MirInstructionKind::Tuple { .. }
            | MirInstructionKind::Struct { .. }
            | MirInstructionKind::UncheckedEnumData { .. }
            | MirInstructionKind::UncheckedTakeEnumDataAddr { .. }
            | MirInstructionKind::EndAccess { .. }
            | MirInstructionKind::RetainValueAddr { .. }
            | MirInstructionKind::ReleaseValueAddr { .. }
            | MirInstructionKind::DebugValueAddr { .. }
            | MirInstructionKind::Throw { .. }
            | MirInstructionKind::Unwind
            | MirInstructionKind::Branch { .. }
            | MirInstructionKind::CondBranch { .. }
            | MirInstructionKind::SwitchEnumAddr(_)
            | MirInstructionKind::Unreachable => self.visit_instr(inst),
        }
    }

    /// Any operand that moved to memory needs its object reload.
    fn visit_instr(&mut self, inst: InstId) {
        for operand in self.body.kind(inst).operands() {
            if self.state.large_args.contains(&operand) {
                self.state.insts_to_mod.push(inst);
                self.state.bindings.entry(operand).or_insert(operand);
            }
        }
    }

    fn visit_apply(&mut self, inst: InstId) {
        if !self.modifiable_apply(inst) {
            return self.visit_instr(inst);
        }
        let kind = self.body.kind(inst).clone();
        let apply = kind
            .apply()
            .unwrap_or_else(|| ice!("{} is not a call", kind.opcode()));
        let f = function_ty_of(apply.callee_ty);
        let env = self.callee_env(f);

        let argument_changes = apply.arguments.iter().any(|argument| {
            let ty = self.value_ty(*argument);
            self.mapper.lower_type(env, ty) != ty
                || self.state.large_args.contains(argument)
                || self.state.func_sig_args.contains(argument)
        });
        if argument_changes {
            trace!(opcode = kind.opcode(), "call passes a lowered argument");
            self.state.applies.push(inst);
            return;
        }

        let result_ty = match &kind {
            MirInstructionKind::BeginApply(_) => {
                let results = self.body.results(inst);
                let yields = &results[..results.len().saturating_sub(1)];
                if yields.iter().any(|y| {
                    let ty = self.value_ty(*y);
                    self.mapper.lower_type(env, ty) != ty
                }) {
                    self.state.applies.push(inst);
                }
                return;
            }
            MirInstructionKind::TryApply { .. } => {
                MirType::object(self.tcx.direct_result_type(f))
            }
            _ => self.value_ty(self.body.result(inst)),
        };
        if !self.mapper.is_large(env, result_ty) && self.mapper.lower_type(env, result_ty) != result_ty
        {
            self.state.applies.push(inst);
            return;
        }
        let lowered = self.mapper.lower_function_ty(env, apply.callee_ty);
        if !std::ptr::eq(lowered, apply.callee_ty) {
            self.state.applies.push(inst);
        }
    }

    /// Method lookups are retyped unless they feed a foreign call.
    fn visit_method(&mut self, inst: InstId) {
        let result = self.body.result(inst);
        let Some(f) = self.value_ty(result).function_ty() else {
            return self.visit_instr(inst);
        };
        let feeds_foreign_call = self.body.users(result).into_iter().any(|user| {
            self.body
                .kind(user)
                .apply()
                .is_some_and(|a| !is_modifiable(function_ty_of(a.callee_ty)))
        });
        if feeds_foreign_call {
            return self.visit_instr(inst);
        }
        let env = f.generic_context.or(self.env);
        if self.mapper.should_transform_function_ty(env, f) || self.mapper.results_differ(env, f.results)
        {
            self.state.methods.push(inst);
        }
    }

    fn visit_result_ty(&mut self, inst: InstId) {
        let ty = self.value_ty(self.body.result(inst)).as_object();
        if self.lower_type(ty) != ty {
            self.state.result_ty_insts.push(inst);
        }
    }

    fn visit_tuple(&mut self, inst: InstId) {
        let ty = self.value_ty(self.body.result(inst)).as_object();
        let Some(function) = function_mir_ty(ty) else {
            return;
        };
        let lowered = self.mapper.lower_function_ty(self.env, function);
        if !std::ptr::eq(lowered, function) {
            self.state.tuple_insts.push(inst);
        }
    }
}
