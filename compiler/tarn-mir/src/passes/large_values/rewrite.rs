//! The rewrite of a scanned function body.

use crate::body::{InstId, MirUse, ValueId};
use crate::builder::InsertPoint;
use crate::instruction::{MirInstructionKind, MirSwitchEnum, StoreQualifier};
use crate::passes::large_values::mapper::inner_function_ty;
use crate::passes::large_values::state::WorkList;
use crate::passes::large_values::{recreate_with_type, FunctionLowering};
use crate::ty::MirType;
use std::collections::HashSet;
use tarn_diagnostics::ice;
use tracing::trace;

impl<'ta> FunctionLowering<'_, '_, 'ta> {
    /// Does the function's result change? A large result moves to the `@out` argument; a result
    /// containing a changed function signature is retyped.
    pub(super) fn rewrite_function_return(&self) -> bool {
        let results = MirType::object(self.tcx.all_results_type(self.ty));
        self.mapper.is_large_single_result(self.env, self.ty)
            || self
                .mapper
                .has_different_function_signature(self.env, results)
    }

    pub(super) fn rewrite_function(&mut self) {
        self.rewrite_to_fixed_point();
        self.patch_operands();
        for inst in self.state.tuple_insts.take() {
            let ty = self.value_ty(self.body.result(inst));
            let lowered = self.lower_type(ty);
            if lowered != ty {
                trace!(opcode = self.body.kind(inst).opcode(), %lowered, "retype projection");
                recreate_with_type(self.tcx, self.body, inst, lowered);
            }
        }
        for inst in self.state.alloc_stacks.take() {
            let ty = self.value_ty(self.body.result(inst));
            let lowered = self.lower_type(ty.as_object()).as_address();
            recreate_with_type(self.tcx, self.body, inst, lowered);
        }
        for inst in self.state.pointer_to_addresses.take() {
            let ty = self.value_ty(self.body.result(inst));
            let lowered = self.lower_type(ty.as_object()).as_address();
            recreate_with_type(self.tcx, self.body, inst, lowered);
        }
        self.patch_debug_values();
        for inst in self.state.destroys.take() {
            let operand = self.single_operand(inst);
            self.builder(InsertPoint::Before(inst))
                .create_destroy_addr(operand);
            self.body.erase_instruction(inst);
        }
        for inst in self.state.stores.take() {
            let MirInstructionKind::Store {
                source,
                destination,
                qualifier,
            } = *self.body.kind(inst)
            else {
                ice!("expected a store, found {}", self.body.kind(inst).opcode());
            };
            let initialize = qualifier != StoreQualifier::Assign;
            // Guaranteed storage is taken too: ownership is unqualified at this level.
            self.builder(InsertPoint::Before(inst))
                .create_copy_addr(source, destination, true, initialize);
            self.body.erase_instruction(inst);
        }
        for inst in self.state.retains.take() {
            let operand = self.single_operand(inst);
            self.builder(InsertPoint::Before(inst))
                .create_retain_value_addr(operand);
            self.body.erase_instruction(inst);
        }
        for inst in self.state.releases.take() {
            let operand = self.single_operand(inst);
            self.builder(InsertPoint::Before(inst))
                .create_release_value_addr(operand);
            self.body.erase_instruction(inst);
        }
        self.patch_result_types();
        for inst in self.state.methods.take() {
            let ty = self.value_ty(self.body.result(inst));
            let Some(f) = ty.function_ty() else {
                ice!("method lookup produces non-function type {}", ty);
            };
            let env = f.generic_context.or(self.env);
            let lowered = MirType::object(self.mapper.lower_function_ty(env, ty.ty()));
            if lowered != ty {
                recreate_with_type(self.tcx, self.body, inst, lowered);
            }
        }
        for inst in self.state.mod_returns.take() {
            self.rewrite_return(inst);
        }
    }

    /// Rewrite switches, field extractions, call arguments and yields until no rewrite queues
    /// more work. The call sites stay queued for the module sweep.
    fn rewrite_to_fixed_point(&mut self) {
        let mut current_applies = WorkList::default();
        loop {
            while let Some(inst) = self.state.switch_enums.pop() {
                self.rewrite_switch_enum(inst);
            }
            while let Some(inst) = self.state.struct_extracts.pop() {
                self.rewrite_struct_extract(inst);
            }
            while let Some(inst) = self.state.applies.pop() {
                current_applies.push(inst);
                let arguments = self
                    .body
                    .kind(inst)
                    .apply()
                    .map(|a| a.arguments.clone())
                    .unwrap_or_default();
                self.allocate_and_set_all(arguments);
            }
            while let Some(inst) = self.state.mod_yields.pop() {
                let values = self.body.kind(inst).operands();
                self.allocate_and_set_all(values);
            }
            let repeat =
                !self.state.switch_enums.is_empty() || !self.state.struct_extracts.is_empty();
            for inst in current_applies.iter() {
                self.state.applies.push(*inst);
            }
            if !repeat {
                break;
            }
        }
    }

    /// Switch over a private copy of the enum and take the payloads out of the copy.
    fn rewrite_switch_enum(&mut self, inst: InstId) {
        let MirInstructionKind::SwitchEnum(switch) = self.body.kind(inst).clone() else {
            ice!("expected a switch_enum, found {}", self.body.kind(inst).opcode());
        };
        let copy = self.copy_of_enum(inst, switch.operand);
        for (case, block) in &switch.cases {
            let arguments = &self.body.block(*block).arguments;
            if arguments.len() > 1 {
                ice!("case block {} of switch_enum takes {} arguments", block, arguments.len());
            }
            let Some(&argument) = arguments.first() else {
                continue;
            };
            let ty = self.value_ty(argument);
            let payload_ty = self.lower_type(ty).as_address();
            let qualifier = self.take_qualifier(ty);
            let mut builder = self.builder(InsertPoint::BlockStart(*block));
            let payload = builder.create_unchecked_take_enum_data_addr(copy, *case, payload_ty);
            let loaded = builder.create_load(payload, qualifier);
            self.body.replace_all_uses_with(argument, loaded);
            self.body.erase_block_argument(*block, 0);
            trace!(case = *case, %payload, "payload taken from enum copy");
            if inner_function_ty(self.value_ty(loaded)).is_some() {
                continue;
            }
            let load = self.defining(loaded);
            self.replace_load(load);
        }
        self.builder(InsertPoint::Before(inst))
            .create_switch_enum_addr(MirSwitchEnum {
                operand: copy,
                cases: switch.cases.clone(),
                default: switch.default,
            });
        self.body.erase_instruction(inst);
    }

    fn copy_of_enum(&mut self, inst: InstId, operand: ValueId) -> ValueId {
        let ty = self.value_ty(operand);
        let copy = self.allocate(ty.as_object());
        let mut builder = self.builder(InsertPoint::Before(inst));
        if ty.is_address() {
            builder.create_copy_addr(operand, copy, false, true);
        } else {
            builder.create_initializing_store(operand, copy);
        }
        copy
    }

    /// A field of a value in memory is read through its address.
    fn rewrite_struct_extract(&mut self, inst: InstId) {
        let MirInstructionKind::StructExtract { operand, field } = *self.body.kind(inst) else {
            ice!("expected a struct_extract, found {}", self.body.kind(inst).opcode());
        };
        let result = self.body.result(inst);
        let ty = self.value_ty(result);
        let retype = self.state.result_ty_insts.remove(inst);
        let qualifier = self.copy_qualifier(ty);
        let mut builder = self.builder(InsertPoint::Before(inst));
        let address = builder.create_struct_element_addr(operand, field, ty);
        let loaded = builder.create_load(address, qualifier);
        self.body.replace_all_uses_with(result, loaded);
        self.body.erase_instruction(inst);
        trace!(%field, %address, "field read through address");
        if retype {
            let address_inst = self.defining(address);
            self.state.result_ty_insts.push(address_inst);
        }
        if inner_function_ty(ty).is_some() {
            return;
        }
        let load = self.defining(loaded);
        self.replace_load(load);
    }

    fn allocate_and_set_all(&mut self, operands: Vec<ValueId>) {
        let mut seen = HashSet::new();
        for operand in operands {
            if !seen.insert(operand) || !self.is_large(self.value_ty(operand)) {
                continue;
            }
            self.allocate_and_set(operand);
        }
    }

    /// Put a large object into memory for the users that take it by address.
    fn allocate_and_set(&mut self, value: ValueId) {
        match self.body.defining_instruction(value) {
            None => self.allocate_and_set_for_argument(value),
            Some(def) if matches!(self.body.kind(def), MirInstructionKind::Load { .. }) => {
                self.replace_load(def)
            }
            Some(def) => self.allocate_and_set_for_inst_result(value, def),
        }
    }

    fn allocate_and_set_for_argument(&mut self, value: ValueId) {
        let buffer = self.allocate(self.value_ty(value).as_object());
        let block = self.body.parent_block(value);
        let point = if block == self.body.entry_block() {
            InsertPoint::After(self.defining(buffer))
        } else {
            InsertPoint::BlockStart(block)
        };
        let store = self.builder(point).create_initializing_store(value, buffer);
        self.rewrite_uses_of_scalar(buffer, value, store);
    }

    fn allocate_and_set_for_inst_result(&mut self, value: ValueId, def: InstId) {
        let buffer = self.allocate(self.value_ty(value).as_object());
        let store = self
            .builder(InsertPoint::After(def))
            .create_initializing_store(value, buffer);
        self.rewrite_uses_of_scalar(buffer, value, store);
    }

    fn rewrite_uses_of_scalar(&mut self, address: ValueId, scalar: ValueId, store: InstId) {
        trace!(%scalar, %address, "scalar stored for indirect uses");
        for site in self.body.uses(scalar) {
            if site.user == store {
                continue;
            }
            match self.body.kind(site.user).clone() {
                MirInstructionKind::Apply(_)
                | MirInstructionKind::TryApply { .. }
                | MirInstructionKind::BeginApply(_)
                | MirInstructionKind::PartialApply(_) => {
                    if self.modifiable_apply(site.user) {
                        self.body.set_operand(site, address);
                    }
                }
                MirInstructionKind::Yield { .. } => self.body.set_operand(site, address),
                MirInstructionKind::Store {
                    destination,
                    qualifier,
                    ..
                } => {
                    let initialize = qualifier != StoreQualifier::Assign;
                    self.builder(InsertPoint::Before(site.user))
                        .create_copy_addr(address, destination, false, initialize);
                    self.body.erase_instruction(site.user);
                }
                MirInstructionKind::DebugValue { name, .. } => {
                    self.builder(InsertPoint::Before(site.user))
                        .create_debug_value_addr(address, name);
                    self.body.erase_instruction(site.user);
                }
                _ => {}
            }
        }
    }

    /// Operands that moved to memory are replaced by their reload.
    fn patch_operands(&mut self) {
        for inst in self.state.insts_to_mod.take() {
            let operands = self.body.kind(inst).operands();
            for (index, operand) in operands.into_iter().enumerate() {
                if !self.state.large_args.contains(&operand) {
                    continue;
                }
                let reload = match self.state.bindings.get(&operand) {
                    Some(reload) if *reload != operand => *reload,
                    _ => ice!("{} in @{} has no reload", operand, self.name),
                };
                self.body
                    .set_operand(MirUse { user: inst, index }, reload);
            }
        }
    }

    fn patch_debug_values(&mut self) {
        for inst in self.state.debug_values.take() {
            let MirInstructionKind::DebugValue { operand, name } = *self.body.kind(inst) else {
                ice!("expected a debug_value, found {}", self.body.kind(inst).opcode());
            };
            if let Some(&reload) = self.state.bindings.get(&operand) {
                self.body
                    .set_operand(MirUse { user: inst, index: 0 }, reload);
                continue;
            }
            if !self.value_ty(operand).is_address() {
                ice!("debug_value of {} in @{} is neither reloaded nor in memory", operand, self.name);
            }
            self.builder(InsertPoint::Before(inst))
                .create_debug_value_addr(operand, name);
            self.body.erase_instruction(inst);
        }
    }

    fn patch_result_types(&mut self) {
        for inst in self.state.result_ty_insts.take() {
            match self.body.kind(inst) {
                MirInstructionKind::StructExtract { .. }
                | MirInstructionKind::StructElementAddr { .. }
                | MirInstructionKind::UncheckedTakeEnumDataAddr { .. }
                | MirInstructionKind::RefTailAddr { .. }
                | MirInstructionKind::RefElementAddr { .. }
                | MirInstructionKind::BeginAccess { .. }
                | MirInstructionKind::Enum { .. } => {}
                kind => ice!("cannot retype the result of {}", kind.opcode()),
            }
            let ty = self.value_ty(self.body.result(inst));
            let lowered = self.lower_type(ty.as_object());
            let lowered = if ty.is_address() {
                lowered.as_address()
            } else {
                lowered.as_object()
            };
            if lowered != ty {
                trace!(opcode = self.body.kind(inst).opcode(), %lowered, "retype result");
                recreate_with_type(self.tcx, self.body, inst, lowered);
            }
        }
    }

    /// A large result is written to the `@out` argument and the function returns `()`.
    fn rewrite_return(&mut self, inst: InstId) {
        let operand = self.single_operand(inst);
        let entry = self.body.entry_block();
        let out = self
            .body
            .block(entry)
            .arguments
            .first()
            .copied()
            .unwrap_or_else(|| ice!("@{} has no indirect result argument", self.name));
        if self.value_ty(operand).is_address() {
            let anchor = self.first_trailing_dealloc(inst);
            // Takes even an `@in_guaranteed` argument, as stores do.
            self.builder(InsertPoint::Before(anchor))
                .create_copy_addr(operand, out, true, true);
        } else {
            self.builder(InsertPoint::Before(inst))
                .create_initializing_store(operand, out);
        }
        let mut builder = self.builder(InsertPoint::Before(inst));
        let unit = builder.create_empty_tuple();
        builder.create_return(unit);
        self.body.erase_instruction(inst);
        trace!(%operand, "result returned indirectly");
    }

    /// The first of the deallocations that directly precede a terminator, or the terminator.
    fn first_trailing_dealloc(&self, terminator: InstId) -> InstId {
        let block = self.body.instruction(terminator).block;
        let instructions = &self.body.block(block).instructions;
        let position = self.body.position_in_block(terminator);
        instructions[..position]
            .iter()
            .rev()
            .take_while(|i| matches!(self.body.kind(**i), MirInstructionKind::DeallocStack { .. }))
            .last()
            .copied()
            .unwrap_or(terminator)
    }

    fn single_operand(&self, inst: InstId) -> ValueId {
        let operands = self.body.kind(inst).operands();
        match operands.as_slice() {
            [operand] => *operand,
            _ => ice!("{} in @{} has {} operands", self.body.kind(inst).opcode(), self.name, operands.len()),
        }
    }
}

