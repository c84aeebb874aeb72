//! Buffers, argument conversion and load collapsing.

use crate::body::{InstId, MirUse, ValueId};
use crate::builder::{InsertPoint, MirBuilder};
use crate::instruction::{LoadQualifier, MirInstructionKind};
use crate::passes::large_values::{function_ty_of, FunctionLowering};
use crate::ty::MirType;
use tarn_diagnostics::ice;
use tracing::{debug, trace};

impl<'ta> FunctionLowering<'_, '_, 'ta> {
    /// Retype the entry arguments of a native function. A large argument is now passed by
    /// address, and a single large result gets a leading `@out` argument.
    pub(super) fn convert_indirect_function_args(&mut self) {
        let entry = self.body.entry_block();
        for argument in self.body.block(entry).arguments.clone() {
            let ty = self.value_ty(argument);
            let lowered = self.lower_type(ty);
            if lowered == ty {
                continue;
            }
            self.body.set_value_type(argument, lowered);
            if self.is_large(ty) {
                debug!(%argument, %ty, "large argument is passed by address");
                self.state.large_args.insert(argument);
            } else {
                debug!(%argument, %ty, %lowered, "argument signature changed");
                self.state.func_sig_args.insert(argument);
            }
        }
        if self.mapper.is_large_single_result(self.env, self.ty) {
            let results = MirType::object(self.tcx.all_results_type(self.ty));
            let storage = self.lower_type(results).as_address();
            debug!(%storage, "large result is returned indirectly");
            self.body.insert_block_argument(entry, 0, storage);
        }
    }

    /// A foreign function keeps its signature, so arguments whose function signature changed are
    /// cast to the lowered type for the benefit of the body.
    pub(super) fn convert_unmodifiable_function_pointer_args(&mut self) {
        let entry = self.body.entry_block();
        for argument in self.body.block(entry).arguments.clone() {
            let ty = self.value_ty(argument);
            if !self.mapper.has_different_function_signature(self.env, ty) {
                continue;
            }
            let lowered = self.lower_type(ty);
            let mut builder = self.builder(InsertPoint::BlockStart(entry));
            let cast = if ty.is_address() {
                builder.create_unchecked_addr_cast(argument, lowered)
            } else {
                builder.create_unchecked_bitwise_cast(argument, lowered)
            };
            let cast_inst = self.defining(cast);
            self.body.replace_all_uses_except(argument, cast, cast_inst);
            trace!(%argument, %lowered, "cast foreign argument");
        }
    }

    /// Give every native call with a large result a result buffer, and let the users of the
    /// result read the buffer instead.
    pub(super) fn convert_apply_results(&mut self) {
        for inst in self.body.instructions_in_order() {
            let kind = self.body.kind(inst).clone();
            let (apply, normal) = match &kind {
                MirInstructionKind::Apply(apply) => (apply, None),
                MirInstructionKind::TryApply { apply, normal, .. } => (apply, Some(*normal)),
                _ => continue,
            };
            if !self.modifiable_apply(inst) {
                continue;
            }
            let f = function_ty_of(apply.callee_ty);
            let env = self.callee_env(f);
            if !self.mapper.should_transform_results(env, f) {
                continue;
            }
            let results = MirType::object(self.tcx.all_results_type(f));
            if !self.mapper.is_large(env, results) {
                continue;
            }
            let buffer_ty = self.mapper.lower_type(env, results).as_object();
            let buffer = self.allocate_for_apply(inst, buffer_ty);
            match normal {
                None => {
                    let result = self.body.result(inst);
                    self.body.replace_all_uses_with(result, buffer);
                }
                Some(normal) => {
                    let argument = self
                        .body
                        .block(normal)
                        .arguments
                        .first()
                        .copied()
                        .unwrap_or_else(|| {
                            ice!("normal successor {} of try_apply takes no result", normal)
                        });
                    self.body.replace_all_uses_with(argument, buffer);
                    let unit = self.tcx.arena().get_empty_tuple_ty();
                    self.body.set_value_type(argument, MirType::object(unit));
                }
            }
        }
    }

    fn allocate_for_apply(&mut self, inst: InstId, ty: MirType<'ta>) -> ValueId {
        let buffer = self.allocate(ty);
        trace!(%buffer, %ty, "result buffer for call");
        self.state.large_args.insert(buffer);
        self.state.buffer_to_apply.insert(buffer, inst);
        self.state.apply_to_buffer.insert(inst, buffer);
        buffer
    }

    /// Allocate a buffer at the start of the entry block, deallocated before every exit.
    pub(super) fn allocate(&mut self, ty: MirType<'ta>) -> ValueId {
        let entry = self.body.entry_block();
        let buffer = MirBuilder::new(self.tcx, self.body, InsertPoint::BlockStart(entry))
            .create_alloc_stack(ty);
        for exit in &self.exits {
            MirBuilder::new(self.tcx, self.body, InsertPoint::Before(*exit))
                .create_dealloc_stack(buffer);
        }
        buffer
    }

    /// Reload a value that moved to memory, for the uses that need it as an object.
    pub(super) fn allocate_for_arg(&mut self, value: ValueId) {
        let ty = self.value_ty(value).as_object();
        let qualifier = self.take_qualifier(ty);
        if let Some(&apply) = self.state.buffer_to_apply.get(&value) {
            let point = match self.body.kind(apply) {
                MirInstructionKind::Apply(_) => InsertPoint::After(apply),
                MirInstructionKind::TryApply { normal, .. } => InsertPoint::BlockStart(*normal),
                kind => ice!("result buffer {} belongs to {}", value, kind.opcode()),
            };
            let load = self.builder(point).create_load(value, qualifier);
            self.state.bindings.insert(value, load);
            return;
        }
        let buffer = self.allocate(ty);
        let anchor = self.first_non_allocation();
        let mut builder = self.builder(InsertPoint::Before(anchor));
        builder.create_copy_addr(value, buffer, true, true);
        let load = builder.create_load(buffer, qualifier);
        trace!(%value, %load, "reload of argument");
        self.state.bindings.insert(value, load);
    }

    fn first_non_allocation(&self) -> InstId {
        let entry = self.body.entry_block();
        self.body
            .block(entry)
            .instructions
            .iter()
            .copied()
            .find(|i| !matches!(self.body.kind(*i), MirInstructionKind::AllocStack))
            .unwrap_or_else(|| ice!("entry block of @{} has no terminator", self.name))
    }

    /// Non-entry block arguments whose function signature changed take the lowered type.
    pub(super) fn convert_block_arguments(&mut self) {
        let entry = self.body.entry_block();
        let blocks = self.body.block_ids().filter(|b| *b != entry).collect::<Vec<_>>();
        for block in blocks {
            for argument in self.body.block(block).arguments.clone() {
                let ty = self.value_ty(argument);
                if !self.mapper.should_convert_block_argument(self.env, ty) {
                    continue;
                }
                let lowered = self.lower_type(ty);
                let lowered = if ty.is_object() {
                    lowered.as_object()
                } else {
                    lowered
                };
                trace!(%argument, %lowered, "retype block argument");
                self.body.set_value_type(argument, lowered);
            }
        }
    }

    /// Rewrite a load of a large value so that its users read memory instead.
    pub(super) fn replace_load(&mut self, load: InstId) {
        if self.all_uses_replaceable(load) {
            self.replace_load_with_copy_addr(load);
        } else {
            self.replace_load_with_copy_addr_for_modifiable(load);
        }
    }

    fn all_uses_replaceable(&self, load: InstId) -> bool {
        let value = self.body.result(load);
        self.body
            .uses(value)
            .into_iter()
            .all(|site| match self.body.kind(site.user) {
                MirInstructionKind::RetainValue { .. }
                | MirInstructionKind::ReleaseValue { .. }
                | MirInstructionKind::Store { .. }
                | MirInstructionKind::DebugValue { .. }
                | MirInstructionKind::DestroyValue { .. }
                | MirInstructionKind::StructExtract { .. }
                | MirInstructionKind::SwitchEnum(_) => true,
                MirInstructionKind::Apply(_)
                | MirInstructionKind::TryApply { .. }
                | MirInstructionKind::BeginApply(_)
                | MirInstructionKind::PartialApply(_) => self.is_rewritable_call_use(site, value),
                MirInstructionKind::Yield { .. } => self.is_large(self.value_ty(value)),
                _ => false,
            })
    }

    /// Does a call need the value passed by address?
    fn is_rewritable_call_use(&self, site: MirUse, value: ValueId) -> bool {
        if !self.modifiable_apply(site.user) || site.index == 0 {
            return false;
        }
        let ty = self.value_ty(value).as_object();
        self.lower_type(ty) != ty
    }

    fn has_mandatory_rewrite_use(&self, value: ValueId) -> bool {
        self.body
            .uses(value)
            .into_iter()
            .any(|site| match self.body.kind(site.user) {
                MirInstructionKind::Apply(_)
                | MirInstructionKind::TryApply { .. }
                | MirInstructionKind::BeginApply(_)
                | MirInstructionKind::PartialApply(_) => self.is_rewritable_call_use(site, value),
                MirInstructionKind::Yield { .. } => self.is_large(self.value_ty(value)),
                _ => false,
            })
    }

    /// Copy the loaded memory into a fresh buffer before the load.
    fn copy_load_source(&mut self, load: InstId, take: bool) -> ValueId {
        let MirInstructionKind::Load { address, .. } = *self.body.kind(load) else {
            ice!("expected a load, found {}", self.body.kind(load).opcode());
        };
        let ty = self.value_ty(address).as_object();
        let buffer = self.allocate(ty);
        self.builder(InsertPoint::Before(load))
            .create_copy_addr(address, buffer, take, true);
        buffer
    }

    /// Queue a user that now reads `buffer` for the rewrite that turns it into an address form.
    fn requeue_user(&mut self, user: InstId) {
        match self.body.kind(user) {
            MirInstructionKind::Apply(_)
            | MirInstructionKind::TryApply { .. }
            | MirInstructionKind::BeginApply(_)
            | MirInstructionKind::PartialApply(_) => {
                self.state.applies.push(user);
            }
            MirInstructionKind::RetainValue { .. } => {
                self.state.retains.push(user);
            }
            MirInstructionKind::ReleaseValue { .. } => {
                self.state.releases.push(user);
            }
            MirInstructionKind::Store { .. } => {
                self.state.stores.push(user);
            }
            MirInstructionKind::DebugValue { .. } => {
                self.state.debug_values.push(user);
            }
            MirInstructionKind::DestroyValue { .. } => {
                self.state.destroys.push(user);
            }
            MirInstructionKind::StructExtract { .. } => {
                self.state.struct_extracts.push(user);
            }
            MirInstructionKind::SwitchEnum(_) => {
                self.state.switch_enums.push(user);
            }
            MirInstructionKind::Yield { .. } => {}
            kind => ice!("unexpected user {} of a collapsed load in @{}", kind.opcode(), self.name),
        }
    }

    /// Every user can work on memory: move the loaded value into a buffer and drop the load.
    fn replace_load_with_copy_addr(&mut self, load: InstId) {
        let take = !matches!(
            self.body.kind(load),
            MirInstructionKind::Load {
                qualifier: LoadQualifier::Copy,
                ..
            }
        );
        let buffer = self.copy_load_source(load, take);
        let value = self.body.result(load);
        for user in self.body.users(value) {
            self.requeue_user(user);
        }
        trace!(%value, %buffer, "collapsed load into copy_addr");
        self.body.replace_all_uses_with(value, buffer);
        self.body.erase_instruction(load);
    }

    /// Some users need the object: keep the load, and redirect only the uses that must see
    /// memory to a copy of the source.
    fn replace_load_with_copy_addr_for_modifiable(&mut self, load: InstId) {
        let value = self.body.result(load);
        if !self.has_mandatory_rewrite_use(value) {
            return;
        }
        let buffer = self.copy_load_source(load, false);
        for site in self.body.uses(value) {
            let redirect = match self.body.kind(site.user) {
                MirInstructionKind::Apply(_)
                | MirInstructionKind::TryApply { .. }
                | MirInstructionKind::BeginApply(_)
                | MirInstructionKind::PartialApply(_) => self.is_rewritable_call_use(site, value),
                MirInstructionKind::Yield { .. } => self.is_large(self.value_ty(value)),
                MirInstructionKind::RetainValue { .. }
                | MirInstructionKind::ReleaseValue { .. }
                | MirInstructionKind::Store { .. }
                | MirInstructionKind::DebugValue { .. }
                | MirInstructionKind::DestroyValue { .. }
                | MirInstructionKind::StructExtract { .. }
                | MirInstructionKind::SwitchEnum(_) => true,
                _ => false,
            };
            if redirect {
                self.requeue_user(site.user);
                self.body.set_operand(site, buffer);
            }
        }
        trace!(%value, %buffer, "redirected uses of load");
    }
}
