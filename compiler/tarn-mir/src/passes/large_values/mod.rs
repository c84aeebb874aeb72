//! Large-value lowering.
//!
//! Values whose type the ABI oracle reports as too large for registers are moved behind
//! addresses. The pass runs in two phases:
//!
//! 1. Every function is lowered on its own ([`FunctionLowering`]). Entry arguments and call
//!    results are converted first, then the body is scanned for instructions that touch a large
//!    value or a changed function signature, and finally those instructions are rewritten. The
//!    rewrite of switches, field extractions and call arguments can expose more work, so it runs
//!    to a fixed point before the one-shot patches are applied.
//! 2. The module sweep ([`coordinator`]) retypes the re-signed functions and globals, and
//!    recreates every call site, function reference and conversion so that they agree with the
//!    new types.
//!
//! Every buffer the pass introduces is allocated at the start of the entry block and deallocated
//! right before each function exit.

use crate::body::{InstId, MirBody, ValueId};
use crate::builder::{InsertPoint, MirBuilder};
use crate::context::{GenericContextId, MirTypeContext};
use crate::instruction::LoadQualifier;
use crate::passes::large_values::mapper::{is_modifiable, LargeTypeMapper};
use crate::passes::large_values::state::{LoweringState, WorkList};
use crate::ty::{MirFunctionTy, MirTy, MirType};
use crate::MirFunction;
use std::collections::HashMap;
use tarn_diagnostics::ice;
use tracing::{debug, debug_span, warn};

mod coordinator;
pub mod mapper;
mod rewrite;
mod scanner;
mod state;
mod storage;

pub use coordinator::lower_module;

/// What the module sweep needs to know about a lowered function.
#[derive(Debug, Default)]
pub struct FunctionOutcome {
    /// Does the function's own type have to be lowered?
    pub modified: bool,
    /// Call sites that must be recreated against the lowered callee type.
    pub applies: WorkList<InstId>,
    /// The result buffer of each call whose large result is now returned indirectly.
    pub apply_buffers: HashMap<InstId, ValueId>,
}

/// Lower the body of a single function.
///
/// A declaration has no body to rewrite; it only reports whether its type changes.
pub fn lower_function<'ta>(
    mapper: &LargeTypeMapper<'_, 'ta>,
    function: &mut MirFunction<'ta>,
) -> FunctionOutcome {
    let name = function.name;
    let ty = function.function_ty();
    let env = function.generic_environment();
    let Some(body) = function.body.as_mut() else {
        let modified = is_modifiable(ty) && mapper.should_transform_function_ty(env, ty);
        if modified {
            debug!(function = name, "declaration is re-signed");
        }
        return FunctionOutcome {
            modified,
            ..Default::default()
        };
    };
    FunctionLowering::new(mapper, name, ty, env, body).run()
}

pub struct FunctionLowering<'l, 'm, 'ta> {
    mapper: &'l LargeTypeMapper<'m, 'ta>,
    tcx: &'m MirTypeContext<'ta>,
    name: &'ta str,
    ty: &'ta MirFunctionTy<'ta>,
    env: Option<GenericContextId>,
    modifiable: bool,
    body: &'l mut MirBody<'ta>,
    /// The function-exiting terminators, where every buffer is deallocated.
    exits: Vec<InstId>,
    state: LoweringState,
}

impl<'l, 'm, 'ta> FunctionLowering<'l, 'm, 'ta> {
    pub fn new(
        mapper: &'l LargeTypeMapper<'m, 'ta>,
        name: &'ta str,
        ty: &'ta MirFunctionTy<'ta>,
        env: Option<GenericContextId>,
        body: &'l mut MirBody<'ta>,
    ) -> Self {
        let exits = body.function_exits();
        Self {
            mapper,
            tcx: mapper.tcx(),
            name,
            ty,
            env,
            modifiable: is_modifiable(ty),
            body,
            exits,
            state: LoweringState::default(),
        }
    }

    pub fn run(mut self) -> FunctionOutcome {
        let _span = debug_span!("lower_function", function = self.name).entered();
        if self.modifiable {
            self.convert_indirect_function_args();
        } else {
            if self
                .ty
                .parameters
                .iter()
                .any(|p| self.mapper.is_large(self.env, p.storage_type()))
            {
                warn!(
                    function = self.name,
                    "foreign function keeps passing large values directly"
                );
            }
            self.convert_unmodifiable_function_pointer_args();
        }
        self.convert_apply_results();
        self.scan();
        self.convert_block_arguments();
        let bound = self.state.bindings.keys().copied().collect::<Vec<_>>();
        for value in bound {
            self.allocate_for_arg(value);
        }
        let rewritten_return = self.modifiable && self.rewrite_function_return();
        self.rewrite_function();
        self.state.assert_drained(self.name);

        let modified = self.modifiable
            && (rewritten_return
                || !self.state.large_args.is_empty()
                || !self.state.func_sig_args.is_empty()
                || self.has_large_yields());
        debug!(
            modified,
            call_sites = self.state.applies.len(),
            "lowered function body"
        );
        FunctionOutcome {
            modified,
            applies: std::mem::take(&mut self.state.applies),
            apply_buffers: std::mem::take(&mut self.state.apply_to_buffer),
        }
    }

    fn has_large_yields(&self) -> bool {
        self.ty
            .yields
            .iter()
            .any(|y| self.mapper.lower_parameter(self.env, *y) != *y)
    }

    fn builder(&mut self, point: InsertPoint) -> MirBuilder<'_, 'ta> {
        MirBuilder::new(self.tcx, self.body, point)
    }

    fn value_ty(&self, value: ValueId) -> MirType<'ta> {
        self.body.value_ty(value)
    }

    fn is_large(&self, ty: MirType<'ta>) -> bool {
        self.mapper.is_large(self.env, ty)
    }

    fn lower_type(&self, ty: MirType<'ta>) -> MirType<'ta> {
        self.mapper.lower_type(self.env, ty)
    }

    fn defining(&self, value: ValueId) -> InstId {
        self.body
            .defining_instruction(value)
            .unwrap_or_else(|| ice!("{} in @{} is not an instruction result", value, self.name))
    }

    /// The environment a callee's types are resolved in.
    fn callee_env(&self, f: &MirFunctionTy<'ta>) -> Option<GenericContextId> {
        f.generic_context.or(self.env)
    }

    /// Can the call at `inst` be re-signed? The callee type and every call producing the callee
    /// must be native.
    fn modifiable_apply(&self, inst: InstId) -> bool {
        let Some(apply) = self.body.kind(inst).apply() else {
            return false;
        };
        if !is_modifiable(function_ty_of(apply.callee_ty)) {
            return false;
        }
        match self.body.defining_instruction(apply.callee) {
            Some(callee) if self.body.kind(callee).apply().is_some() => {
                self.modifiable_apply(callee)
            }
            _ => true,
        }
    }

    /// The qualifier for moving a value out of memory.
    fn take_qualifier(&self, ty: MirType<'ta>) -> LoadQualifier {
        if self.tcx.is_trivial(ty.ty()) {
            LoadQualifier::Trivial
        } else {
            LoadQualifier::Take
        }
    }

    /// The qualifier for reading a value while leaving the memory initialized.
    fn copy_qualifier(&self, ty: MirType<'ta>) -> LoadQualifier {
        if self.tcx.is_trivial(ty.ty()) {
            LoadQualifier::Trivial
        } else {
            LoadQualifier::Copy
        }
    }
}

pub fn function_ty_of<'ta>(ty: &'ta MirTy<'ta>) -> &'ta MirFunctionTy<'ta> {
    ty.as_function()
        .unwrap_or_else(|| ice!("expected a function type, found {}", ty))
}

/// The function type of a function or optional function value, as a type.
pub fn function_mir_ty<'ta>(ty: MirType<'ta>) -> Option<&'ta MirTy<'ta>> {
    let ty = ty.ty();
    if ty.is_function() {
        return Some(ty);
    }
    ty.optional_wrapped().filter(|w| w.is_function())
}

/// Replace a single-result instruction with a copy of itself that produces `ty`.
pub fn recreate_with_type<'ta>(
    tcx: &MirTypeContext<'ta>,
    body: &mut MirBody<'ta>,
    inst: InstId,
    ty: MirType<'ta>,
) -> ValueId {
    let kind = body.kind(inst).clone();
    let old = body.result(inst);
    let new_inst = MirBuilder::new(tcx, body, InsertPoint::Before(inst)).insert(kind, vec![ty]);
    let new = body.result(new_inst);
    body.replace_all_uses_with(old, new);
    body.erase_instruction(inst);
    new
}
