//! Module-level transformations of the MIR.

use crate::abi::{AbiOracle, RegisterBudgetOracle};
use crate::error::MirResult;
use crate::MirModule;

mod large_values;

pub use large_values::mapper::LargeTypeMapper;

/// Must the pass run for the module to be valid input to code generation?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassRequirement {
    Mandatory,
    Optional,
}

/// The analyses a pass leaves stale behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// Instructions were added, removed or rewritten. Type information is kept.
    Instructions,
    /// Nothing derived from the module can be trusted.
    Everything,
}

pub trait MirModulePass<'ta> {
    fn name(&self) -> &'static str;
    fn requirement(&self) -> PassRequirement;
    fn invalidation(&self) -> Invalidation;
    fn run(&mut self, module: &mut MirModule<'ta>) -> MirResult<LoweringReport>;
}

/// A function whose externally visible type changed.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweredSignature {
    pub function: String,
    pub before: String,
    pub after: String,
}

/// What the lowering did to a module.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoweringReport {
    pub signatures: Vec<LoweredSignature>,
    pub retyped_globals: Vec<String>,
    /// Calls that were rebuilt against a new callee type.
    pub recreated_call_sites: usize,
}

impl LoweringReport {
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
            && self.retyped_globals.is_empty()
            && self.recreated_call_sites == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoweringOptions {
    /// The number of scalar words a value may explode into and still be passed in registers.
    pub max_direct_words: u32,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self {
            max_direct_words: RegisterBudgetOracle::default().max_direct_words,
        }
    }
}

/// Pass that moves values too large for registers behind addresses.
///
/// Native function signatures are rewritten so that large parameters are passed `@in` and a
/// single large result is returned `@out`. Bodies, call sites and every function value that
/// refers to a re-signed function are updated to match. Foreign functions keep their signature.
pub struct LargeValueLoweringPass<O = RegisterBudgetOracle> {
    oracle: O,
}

impl LargeValueLoweringPass {
    pub fn new(options: LoweringOptions) -> Self {
        Self {
            oracle: RegisterBudgetOracle::new(options.max_direct_words),
        }
    }
}

impl<O> LargeValueLoweringPass<O> {
    /// Lower with a custom answer to "is this type passed indirectly?".
    pub fn with_oracle(oracle: O) -> Self {
        Self { oracle }
    }
}

impl<'ta, O: AbiOracle<'ta>> MirModulePass<'ta> for LargeValueLoweringPass<O> {
    fn name(&self) -> &'static str {
        "large-value-lowering"
    }

    fn requirement(&self) -> PassRequirement {
        PassRequirement::Mandatory
    }

    fn invalidation(&self) -> Invalidation {
        Invalidation::Instructions
    }

    fn run(&mut self, module: &mut MirModule<'ta>) -> MirResult<LoweringReport> {
        Ok(large_values::lower_module(module, &self.oracle)?)
    }
}
