//! Mid-level Intermediate Representation.
//!
//! The MIR is a typed, SSA-form representation of a module that sits right before code
//! generation. Values live either in registers (objects) or in memory (addresses), and every
//! function carries a calling-convention aware function type. Passes in the [`passes`] module
//! rewrite a module in place, most notably the large-value lowering which moves values that are
//! too large for registers behind addresses.
//!
//! Modules are usually read from and written to the textual format, see [`parser`] and
//! [`textual_pass`].

use crate::body::{FunctionId, GlobalId, MirBody};
use crate::context::{GenericContextId, MirTypeContext};
use crate::ty::{MirFunctionTy, MirTy};
use tarn_diagnostics::ice;

pub mod abi;
pub mod arena;
pub mod body;
pub mod builder;
pub mod context;
pub mod error;
pub mod instruction;
pub mod layout;
pub mod parser;
pub mod passes;
pub mod textual_pass;
pub mod ty;
pub mod verifier;

/// A function of a module. A function without a body is an external declaration.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirFunction<'ta> {
    pub name: &'ta str,
    pub ty: &'ta MirTy<'ta>,
    /// The environment the body is specialized for, if the function type itself is not generic.
    pub generic_context: Option<GenericContextId>,
    pub body: Option<MirBody<'ta>>,
}

impl<'ta> MirFunction<'ta> {
    pub fn function_ty(&self) -> &'ta MirFunctionTy<'ta> {
        self.ty
            .as_function()
            .unwrap_or_else(|| ice!("function @{} has non-function type {}", self.name, self.ty))
    }

    /// The substitution environment for types mentioned in the function.
    pub fn generic_environment(&self) -> Option<GenericContextId> {
        self.generic_context
            .or_else(|| self.function_ty().generic_context)
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }
}

/// A global variable, optionally with a static initializer.
///
/// The initializer is a body with a single block. Its last instruction produces the value of
/// the global.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirGlobal<'ta> {
    pub name: &'ta str,
    pub ty: &'ta MirTy<'ta>,
    pub initializer: Option<MirBody<'ta>>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirModule<'ta> {
    pub context: MirTypeContext<'ta>,
    pub functions: Vec<MirFunction<'ta>>,
    pub globals: Vec<MirGlobal<'ta>>,
}

impl<'ta> MirModule<'ta> {
    pub fn new(context: MirTypeContext<'ta>) -> Self {
        Self {
            context,
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn add_function(&mut self, function: MirFunction<'ta>) -> FunctionId {
        self.functions.push(function);
        FunctionId(self.functions.len() as u32 - 1)
    }

    pub fn add_global(&mut self, global: MirGlobal<'ta>) -> GlobalId {
        self.globals.push(global);
        GlobalId(self.globals.len() as u32 - 1)
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FunctionId> {
        (0..self.functions.len() as u32).map(FunctionId)
    }

    pub fn function(&self, id: FunctionId) -> &MirFunction<'ta> {
        self.functions
            .get(id.0 as usize)
            .unwrap_or_else(|| ice!("unknown function {}", id))
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut MirFunction<'ta> {
        self.functions
            .get_mut(id.0 as usize)
            .unwrap_or_else(|| ice!("unknown function {}", id))
    }

    pub fn global(&self, id: GlobalId) -> &MirGlobal<'ta> {
        self.globals
            .get(id.0 as usize)
            .unwrap_or_else(|| ice!("unknown global {}", id))
    }

    pub fn find_function(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FunctionId(i as u32))
    }

    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.name == name)
            .map(|i| GlobalId(i as u32))
    }
}
