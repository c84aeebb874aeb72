//! The module sweep.
//!
//! Once every body has been lowered, the re-signed functions and globals get their new types, and
//! every instruction whose type depends on them is recreated. Within a function the sweep visits
//! instructions in block order, so that an operand is always recreated before its users.

use crate::abi::AbiOracle;
use crate::body::{FunctionId, GlobalId, InstId, MirBody, MirUse, ValueId};
use crate::builder::{InsertPoint, MirBuilder};
use crate::context::{GenericContextId, MirTypeContext};
use crate::error::{LoweringError, UnsupportedBorrowedYieldError};
use crate::instruction::{LoadQualifier, MirInstructionKind};
use crate::passes::large_values::mapper::{is_modifiable, LargeTypeMapper};
use crate::passes::large_values::state::WorkList;
use crate::passes::large_values::{
    function_mir_ty, function_ty_of, lower_function, recreate_with_type, FunctionOutcome,
};
use crate::passes::{LoweredSignature, LoweringReport};
use crate::ty::{MirFunctionTy, MirTy, MirType};
use crate::{MirGlobal, MirModule};
use std::collections::{BTreeSet, HashMap, HashSet};
use tarn_diagnostics::ice;
use tracing::{debug, debug_span, trace};

/// Lower every function of the module, then bring the rest of the module in line with the new
/// function types.
pub fn lower_module<'ta>(
    module: &mut MirModule<'ta>,
    oracle: &dyn AbiOracle<'ta>,
) -> Result<LoweringReport, LoweringError> {
    let MirModule {
        context,
        functions,
        globals,
    } = module;
    let mapper = LargeTypeMapper::new(context, oracle);

    let outcomes = functions
        .iter_mut()
        .map(|function| lower_function(&mapper, function))
        .collect::<Vec<_>>();
    let modified = outcomes
        .iter()
        .enumerate()
        .filter(|(_, outcome)| outcome.modified)
        .map(|(index, _)| FunctionId(index as u32))
        .collect::<BTreeSet<_>>();
    let mut report = LoweringReport::default();
    if modified.is_empty() && outcomes.iter().all(|o| o.applies.is_empty()) {
        debug!("module has no large values");
        return Ok(report);
    }

    let transformed_globals = globals
        .iter()
        .enumerate()
        .filter(|(_, global)| should_transform_global(&mapper, global))
        .map(|(index, _)| GlobalId(index as u32))
        .collect::<BTreeSet<_>>();

    let mut resigned = BTreeSet::new();
    for id in modified {
        let function = &mut functions[id.0 as usize];
        let before = function.ty;
        let after = mapper.lower_function_ty(function.generic_environment(), before);
        if std::ptr::eq(before, after) {
            continue;
        }
        debug!(function = function.name, %before, %after, "function re-signed");
        function.ty = after;
        resigned.insert(id);
        report.signatures.push(LoweredSignature {
            function: function.name.to_string(),
            before: before.to_string(),
            after: after.to_string(),
        });
    }
    let function_types = functions.iter().map(|f| f.ty).collect::<Vec<_>>();

    for (index, global) in globals.iter_mut().enumerate() {
        let retype = transformed_globals.contains(&GlobalId(index as u32));
        if retype {
            let env = function_ty_of(global.ty).generic_context;
            let lowered = mapper.lower_function_ty(env, global.ty);
            debug!(global = global.name, ty = %lowered, "global retyped");
            global.ty = lowered;
            report.retyped_globals.push(global.name.to_string());
        }
        let references_resigned = global
            .initializer
            .as_ref()
            .is_some_and(|init| references_function(init, &resigned));
        if retype || references_resigned {
            if let Some(init) = global.initializer.take() {
                global.initializer = Some(reclone_initializer(&mapper, &init, &function_types));
            }
        }
    }
    let global_types = globals.iter().map(|g| g.ty).collect::<Vec<_>>();

    for (function, outcome) in functions.iter_mut().zip(outcomes) {
        let Some(body) = function.body.as_mut() else {
            continue;
        };
        let _span = debug_span!("sweep_function", function = function.name).entered();
        let env = function.generic_context.or_else(|| {
            function
                .ty
                .as_function()
                .and_then(|f| f.generic_context)
        });
        let mut sweep = FunctionSweep::new(&mapper, function.name, env, body, outcome);
        sweep.recreate_references(&resigned, &transformed_globals, &function_types, &global_types);
        sweep.collect();
        sweep.run()?;
        report.recreated_call_sites += sweep.recreated_call_sites;
    }
    debug!(
        signatures = report.signatures.len(),
        call_sites = report.recreated_call_sites,
        "module lowered"
    );
    Ok(report)
}

/// A global initialized to a function value whose signature changes.
fn should_transform_global<'ta>(mapper: &LargeTypeMapper<'_, 'ta>, global: &MirGlobal<'ta>) -> bool {
    if global.initializer.is_none() {
        return false;
    }
    global
        .ty
        .as_function()
        .is_some_and(|f| mapper.should_transform_function_ty(f.generic_context, f))
}

fn references_function(body: &MirBody, functions: &BTreeSet<FunctionId>) -> bool {
    body.instructions_in_order().into_iter().any(|inst| {
        matches!(body.kind(inst), MirInstructionKind::FunctionRef { function } if functions.contains(function))
    })
}

/// Copy an initializer, giving every function value its lowered type.
fn reclone_initializer<'ta>(
    mapper: &LargeTypeMapper<'_, 'ta>,
    init: &MirBody<'ta>,
    function_types: &[&'ta MirTy<'ta>],
) -> MirBody<'ta> {
    if init.block_count() != 1 {
        ice!("global initializer has {} blocks", init.block_count());
    }
    let mut body = MirBody::new();
    let block = body.add_block();
    let mut values = HashMap::<ValueId, ValueId>::new();
    for inst in init.instructions_in_order() {
        let mut kind = init.kind(inst).clone();
        for operand in kind.operands_mut() {
            let value = values
                .get(&*operand)
                .copied()
                .unwrap_or_else(|| ice!("initializer uses {} before its definition", operand));
            *operand = value;
        }
        let result_types = init
            .results(inst)
            .iter()
            .map(|result| match &kind {
                MirInstructionKind::FunctionRef { function } => {
                    MirType::object(function_types[function.0 as usize])
                }
                _ => {
                    let ty = init.value_ty(*result);
                    match ty.function_ty() {
                        Some(f) => ty.with_ty(mapper.lower_function_ty(f.generic_context, ty.ty())),
                        None => ty,
                    }
                }
            })
            .collect();
        let new_inst = body.push_instruction(block, kind, result_types);
        for (old, new) in init.results(inst).iter().zip(body.results(new_inst)) {
            values.insert(*old, *new);
        }
    }
    body
}

/// The per-function part of the module sweep.
struct FunctionSweep<'s, 'm, 'ta> {
    mapper: &'s LargeTypeMapper<'m, 'ta>,
    tcx: &'m MirTypeContext<'ta>,
    name: &'ta str,
    env: Option<GenericContextId>,
    body: &'s mut MirBody<'ta>,
    applies: WorkList<InstId>,
    apply_buffers: HashMap<InstId, ValueId>,
    conversions: HashSet<InstId>,
    builtins: HashSet<InstId>,
    loads: HashSet<InstId>,
    enum_data: HashSet<InstId>,
    take_enum_data: HashSet<InstId>,
    block_storage_stores: HashSet<InstId>,
    recreated_call_sites: usize,
}

impl<'s, 'm, 'ta> FunctionSweep<'s, 'm, 'ta> {
    fn new(
        mapper: &'s LargeTypeMapper<'m, 'ta>,
        name: &'ta str,
        env: Option<GenericContextId>,
        body: &'s mut MirBody<'ta>,
        outcome: FunctionOutcome,
    ) -> Self {
        Self {
            mapper,
            tcx: mapper.tcx(),
            name,
            env,
            body,
            applies: outcome.applies,
            apply_buffers: outcome.apply_buffers,
            conversions: HashSet::new(),
            builtins: HashSet::new(),
            loads: HashSet::new(),
            enum_data: HashSet::new(),
            take_enum_data: HashSet::new(),
            block_storage_stores: HashSet::new(),
            recreated_call_sites: 0,
        }
    }

    /// Recreate references to re-signed functions and retyped globals, and queue the calls that
    /// go through such a function reference.
    fn recreate_references(
        &mut self,
        resigned: &BTreeSet<FunctionId>,
        transformed_globals: &BTreeSet<GlobalId>,
        function_types: &[&'ta MirTy<'ta>],
        global_types: &[&'ta MirTy<'ta>],
    ) {
        for inst in self.body.instructions_in_order() {
            match *self.body.kind(inst) {
                MirInstructionKind::FunctionRef { function } if resigned.contains(&function) => {
                    let result = self.body.result(inst);
                    for user in self.body.users(result) {
                        match self.body.kind(user) {
                            MirInstructionKind::Apply(_)
                            | MirInstructionKind::TryApply { .. }
                            | MirInstructionKind::BeginApply(_)
                            | MirInstructionKind::PartialApply(_) => {
                                self.applies.push(user);
                            }
                            _ => {}
                        }
                    }
                    let ty = MirType::object(function_types[function.0 as usize]);
                    if self.body.value_ty(result) != ty {
                        trace!(%function, %ty, "recreate function_ref");
                        recreate_with_type(self.tcx, self.body, inst, ty);
                    }
                }
                MirInstructionKind::GlobalAddr { global }
                    if transformed_globals.contains(&global) =>
                {
                    let ty = MirType::address(global_types[global.0 as usize]);
                    recreate_with_type(self.tcx, self.body, inst, ty);
                }
                MirInstructionKind::GlobalValue { global }
                    if transformed_globals.contains(&global) =>
                {
                    let ty = MirType::object(global_types[global.0 as usize]);
                    recreate_with_type(self.tcx, self.body, inst, ty);
                }
                _ => {}
            }
        }
    }

    /// Find the instructions whose types follow a function type.
    fn collect(&mut self) {
        for inst in self.body.instructions_in_order() {
            match self.body.kind(inst) {
                MirInstructionKind::ThinToThickFunction { operand }
                | MirInstructionKind::ConvertFunction { operand }
                | MirInstructionKind::ConvertEscapeToNoEscape { operand }
                | MirInstructionKind::MarkDependence { value: operand, .. } => {
                    let modifiable = self
                        .body
                        .value_ty(*operand)
                        .function_ty()
                        .is_some_and(is_modifiable);
                    if modifiable {
                        self.conversions.insert(inst);
                    }
                }
                MirInstructionKind::Builtin { .. } => {
                    self.builtins.insert(inst);
                }
                MirInstructionKind::Load { .. } => {
                    self.loads.insert(inst);
                }
                MirInstructionKind::UncheckedEnumData { .. } => {
                    self.enum_data.insert(inst);
                }
                MirInstructionKind::UncheckedTakeEnumDataAddr { .. } => {
                    self.take_enum_data.insert(inst);
                }
                MirInstructionKind::Store { destination, .. } => {
                    if matches!(
                        self.body.defining_kind(*destination),
                        Some(MirInstructionKind::ProjectBlockStorage { .. })
                    ) {
                        self.block_storage_stores.insert(inst);
                    }
                }
                MirInstructionKind::PartialApply(_) => {
                    self.applies.push(inst);
                }
                _ => {}
            }
        }
    }

    fn run(&mut self) -> Result<(), LoweringError> {
        for inst in self.body.instructions_in_order() {
            if !self.body.is_live(inst) {
                continue;
            }
            if matches!(self.body.kind(inst), MirInstructionKind::Tuple { .. }) {
                self.recreate_lowered(inst);
            } else if self.conversions.contains(&inst) {
                self.recreate_conversion(inst);
            } else if self.builtins.contains(&inst) {
                self.recreate_lowered(inst);
            } else if self.enum_data.contains(&inst) {
                self.recreate_enum_data(inst, false);
            } else if self.take_enum_data.contains(&inst) {
                self.recreate_enum_data(inst, true);
            } else if self.loads.contains(&inst) {
                self.recreate_load(inst);
            } else if self.applies.contains(inst) {
                self.recreate_apply(inst)?;
            } else if self.block_storage_stores.contains(&inst) {
                self.cast_block_storage_store(inst);
            }
        }
        if let Some(inst) = self.applies.iter().find(|i| self.body.is_live(**i)) {
            ice!("call site {} of @{} was not recreated", inst, self.name);
        }
        Ok(())
    }

    fn recreate_lowered(&mut self, inst: InstId) {
        let [result] = *self.body.results(inst) else {
            return;
        };
        let ty = self.body.value_ty(result);
        let lowered = self.mapper.lower_type(self.env, ty);
        if lowered != ty {
            trace!(opcode = self.body.kind(inst).opcode(), %lowered, "recreate");
            recreate_with_type(self.tcx, self.body, inst, lowered);
        }
    }

    fn recreate_conversion(&mut self, inst: InstId) {
        let ty = self.body.value_ty(self.body.result(inst));
        if !ty.is_function() {
            return;
        }
        let lowered = ty.with_ty(self.mapper.lower_function_ty(self.env, ty.ty()));
        if lowered != ty {
            trace!(opcode = self.body.kind(inst).opcode(), %lowered, "recreate conversion");
            recreate_with_type(self.tcx, self.body, inst, lowered);
        }
    }

    /// Enum payloads are extracted with the payload type the enum declares, then cast to the
    /// lowered type.
    fn recreate_enum_data(&mut self, inst: InstId, address: bool) {
        let (operand, case) = match *self.body.kind(inst) {
            MirInstructionKind::UncheckedEnumData { operand, case }
            | MirInstructionKind::UncheckedTakeEnumDataAddr { operand, case } => (operand, case),
            ref kind => ice!("expected enum data, found {}", kind.opcode()),
        };
        let result = self.body.result(inst);
        let ty = self.body.value_ty(result);
        let lowered = self.mapper.lower_type(self.env, ty.as_object());
        let lowered = if address {
            lowered.as_address()
        } else {
            lowered.as_object()
        };
        let enum_ty = self.body.value_ty(operand).ty();
        let payload = self
            .tcx
            .payload_type(enum_ty, case)
            .flatten()
            .unwrap_or_else(|| ice!("{} has no payload for case #{}", enum_ty, case));
        let payload = if address {
            MirType::address(payload)
        } else {
            MirType::object(payload)
        };
        if payload == ty && lowered == ty {
            return;
        }
        let mut builder = MirBuilder::new(self.tcx, self.body, InsertPoint::Before(inst));
        let new = match (address, payload == lowered) {
            (false, true) => builder.create_unchecked_enum_data(operand, case, lowered),
            (false, false) => {
                let data = builder.create_unchecked_enum_data(operand, case, payload);
                builder.create_unchecked_bitwise_cast(data, lowered)
            }
            (true, true) => builder.create_unchecked_take_enum_data_addr(operand, case, lowered),
            (true, false) => {
                let data = builder.create_unchecked_take_enum_data_addr(operand, case, payload);
                builder.create_unchecked_addr_cast(data, lowered)
            }
        };
        trace!(case, %lowered, "recreate enum payload");
        self.body.replace_all_uses_with(result, new);
        self.body.erase_instruction(inst);
    }

    fn recreate_load(&mut self, inst: InstId) {
        let MirInstructionKind::Load { address, qualifier } = *self.body.kind(inst) else {
            ice!("expected a load, found {}", self.body.kind(inst).opcode());
        };
        let result = self.body.result(inst);
        let source = self.cast_if_necessary(inst, address);
        if source == address && self.body.value_ty(result) == self.body.value_ty(address).as_object()
        {
            return;
        }
        let new = MirBuilder::new(self.tcx, self.body, InsertPoint::Before(inst))
            .create_load(source, qualifier);
        self.body.replace_all_uses_with(result, new);
        self.body.erase_instruction(inst);
    }

    fn cast_block_storage_store(&mut self, inst: InstId) {
        let MirInstructionKind::Store {
            source,
            destination,
            ..
        } = *self.body.kind(inst)
        else {
            ice!("expected a store, found {}", self.body.kind(inst).opcode());
        };
        let expected = self.body.value_ty(destination).as_object();
        if self.body.value_ty(source) == expected {
            return;
        }
        let cast = MirBuilder::new(self.tcx, self.body, InsertPoint::Before(inst))
            .create_unchecked_bitwise_cast(source, expected);
        self.body.set_operand(MirUse { user: inst, index: 0 }, cast);
    }

    /// A function value that still has its old signature is cast to the lowered signature.
    fn cast_if_necessary(&mut self, inst: InstId, value: ValueId) -> ValueId {
        let ty = self.body.value_ty(value);
        let Some(function) = function_mir_ty(ty) else {
            return value;
        };
        let lowered = self.mapper.lower_function_ty(self.env, function);
        if std::ptr::eq(lowered, function) {
            return value;
        }
        let lowered = if ty.ty().is_optional() {
            ty.with_ty(self.tcx.arena().get_optional_ty(lowered))
        } else {
            ty.with_ty(lowered)
        };
        let mut builder = MirBuilder::new(self.tcx, self.body, InsertPoint::Before(inst));
        if ty.is_address() {
            builder.create_unchecked_addr_cast(value, lowered)
        } else {
            builder.create_unchecked_bitwise_cast(value, lowered)
        }
    }

    /// Recreate a queued call against the lowered callee type.
    fn recreate_apply(&mut self, inst: InstId) -> Result<(), LoweringError> {
        if !self.applies.remove(inst) {
            return Ok(());
        }
        let callee = self
            .body
            .kind(inst)
            .apply()
            .map(|a| a.callee)
            .unwrap_or_else(|| ice!("queued {} is not a call", self.body.kind(inst).opcode()));
        if let Some(callee_inst) = self.body.defining_instruction(callee) {
            if self.applies.contains(callee_inst) {
                self.recreate_apply(callee_inst)?;
            }
        }
        let kind = self.body.kind(inst).clone();
        let apply = kind
            .apply()
            .unwrap_or_else(|| ice!("queued {} is not a call", kind.opcode()));
        let f = function_ty_of(apply.callee_ty);
        let env = f.generic_context.or(self.env);
        let callee_ty = self.mapper.lower_function_ty(env, apply.callee_ty);

        let mut arguments = Vec::with_capacity(apply.arguments.len() + 1);
        if let Some(&buffer) = self.apply_buffers.get(&inst) {
            arguments.push(buffer);
        }
        for &argument in &apply.arguments {
            let argument = self.cast_if_necessary(inst, argument);
            arguments.push(argument);
        }

        let mut builder = MirBuilder::new(self.tcx, self.body, InsertPoint::Before(inst));
        match &kind {
            MirInstructionKind::Apply(_) => {
                let new = builder.create_apply(apply.callee, callee_ty, arguments);
                let old = self.body.result(inst);
                self.body.replace_all_uses_with(old, new);
            }
            MirInstructionKind::TryApply { normal, error, .. } => {
                builder.create_try_apply(apply.callee, callee_ty, arguments, *normal, *error);
            }
            MirInstructionKind::BeginApply(_) => {
                let new_inst = builder.create_begin_apply(apply.callee, callee_ty, arguments);
                self.reload_yields(inst, new_inst, f)?;
            }
            MirInstructionKind::PartialApply(_) => {
                let old = self.body.result(inst);
                let closure_ty = self.mapper.lower_type(self.env, self.body.value_ty(old));
                let new = MirBuilder::new(self.tcx, self.body, InsertPoint::Before(inst))
                    .create_partial_apply(apply.callee, callee_ty, arguments, closure_ty);
                self.body.replace_all_uses_with(old, new);
            }
            kind => ice!("cannot recreate {}", kind.opcode()),
        }
        trace!(opcode = kind.opcode(), callee = %callee_ty, "recreated call");
        self.body.erase_instruction(inst);
        self.recreated_call_sites += 1;
        Ok(())
    }

    /// Yields that moved to memory are loaded again for the users of the old yields.
    fn reload_yields(
        &mut self,
        old_inst: InstId,
        new_inst: InstId,
        f: &MirFunctionTy<'ta>,
    ) -> Result<(), LoweringError> {
        let old_results = self.body.results(old_inst).to_vec();
        let new_results = self.body.results(new_inst).to_vec();
        let (old_token, old_yields) = old_results
            .split_last()
            .unwrap_or_else(|| ice!("begin_apply without a token"));
        let (new_token, new_yields) = new_results
            .split_last()
            .unwrap_or_else(|| ice!("begin_apply without a token"));
        self.body.replace_all_uses_with(*old_token, *new_token);

        let mut point = InsertPoint::After(new_inst);
        for (index, (old, new)) in old_yields.iter().zip(new_yields).enumerate() {
            let old_ty = self.body.value_ty(*old);
            let new_ty = self.body.value_ty(*new);
            if old_ty == new_ty || old_ty.is_address() {
                self.body.replace_all_uses_with(*old, *new);
                continue;
            }
            let qualifier = if self.tcx.is_trivial(old_ty.ty()) {
                LoadQualifier::Trivial
            } else if f.yields[index].convention.is_guaranteed() {
                return Err(LoweringError::UnsupportedBorrowedYield(
                    UnsupportedBorrowedYieldError {
                        function: self.name.to_string(),
                        ty: old_ty.to_string(),
                    },
                ));
            } else {
                LoadQualifier::Take
            };
            let mut builder = MirBuilder::new(self.tcx, self.body, point);
            let loaded = builder.create_load(*new, qualifier);
            point = builder.point();
            self.body.replace_all_uses_with(*old, loaded);
        }
        Ok(())
    }
}
