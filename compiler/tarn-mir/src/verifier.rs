//! Structural checks of a module.
//!
//! The verifier runs after parsing and after each pass. It checks that every block is
//! terminated, that no operand refers to an erased definition, that stack allocations are
//! balanced on every path, and that every call site agrees with its callee's type.

use crate::body::{BlockId, MirBody, MirValueDefinition, ValueId};
use crate::context::MirTypeContext;
use crate::error::{
    ArgumentCountError, ArgumentTypeError, CalleeTypeMismatchError, DeadOperandError,
    EntryArgumentsError, MisplacedTerminatorError, MissingTerminatorError, ReturnTypeError,
    UnbalancedStackError, VerifierError, VerifierResult,
};
use crate::instruction::{MirApply, MirInstructionKind};
use crate::ty::{MirFunctionTy, MirType};
use crate::{MirFunction, MirModule};
use std::collections::HashMap;
use tracing::trace;

pub fn verify_module(module: &MirModule) -> VerifierResult<()> {
    for function in &module.functions {
        let Some(body) = &function.body else {
            continue;
        };
        trace!(function = function.name, "verifying function");
        let verifier = FunctionVerifier {
            tcx: &module.context,
            function,
            ty: function.function_ty(),
            body,
        };
        verifier.verify()?;
    }
    Ok(())
}

struct FunctionVerifier<'v, 'ta> {
    tcx: &'v MirTypeContext<'ta>,
    function: &'v MirFunction<'ta>,
    ty: &'ta MirFunctionTy<'ta>,
    body: &'v MirBody<'ta>,
}

impl<'ta> FunctionVerifier<'_, 'ta> {
    fn verify(&self) -> VerifierResult<()> {
        self.verify_terminators()?;
        self.verify_operands()?;
        self.verify_entry_arguments()?;
        self.verify_instructions()?;
        self.verify_stack_discipline()
    }

    fn name(&self) -> String {
        self.function.name.to_string()
    }

    fn verify_terminators(&self) -> VerifierResult<()> {
        for block in self.body.block_ids() {
            let instructions = &self.body.block(block).instructions;
            let Some((last, rest)) = instructions.split_last() else {
                return Err(self.missing_terminator(block));
            };
            if !self.body.kind(*last).is_terminator() {
                return Err(self.missing_terminator(block));
            }
            if let Some(inst) = rest.iter().find(|i| self.body.kind(**i).is_terminator()) {
                return Err(VerifierError::MisplacedTerminator(MisplacedTerminatorError {
                    function: self.name(),
                    block: block.to_string(),
                    opcode: self.body.kind(*inst).opcode().to_string(),
                }));
            }
        }
        Ok(())
    }

    fn missing_terminator(&self, block: BlockId) -> VerifierError {
        VerifierError::MissingTerminator(MissingTerminatorError {
            function: self.name(),
            block: block.to_string(),
        })
    }

    fn is_defined(&self, value: ValueId) -> bool {
        match self.body.value(value).definition {
            MirValueDefinition::Result(inst, _) => self.body.is_live(inst),
            MirValueDefinition::Argument(_) => self.body.block_argument_index(value).is_some(),
        }
    }

    fn verify_operands(&self) -> VerifierResult<()> {
        for inst in self.body.instructions_in_order() {
            let kind = self.body.kind(inst);
            if let Some(value) = kind.operands().into_iter().find(|v| !self.is_defined(*v)) {
                return Err(VerifierError::DeadOperand(DeadOperandError {
                    function: self.name(),
                    opcode: kind.opcode().to_string(),
                    value: value.to_string(),
                }));
            }
        }
        Ok(())
    }

    fn verify_entry_arguments(&self) -> VerifierResult<()> {
        let entry = self.body.entry_block();
        let found = self
            .body
            .block(entry)
            .arguments
            .iter()
            .map(|a| self.body.value_ty(*a))
            .collect::<Vec<_>>();
        let expected = self.ty.argument_types();
        if found != expected {
            return Err(VerifierError::EntryArguments(EntryArgumentsError {
                function: self.name(),
                expected: join_types(&expected),
                found: join_types(&found),
            }));
        }
        Ok(())
    }

    fn verify_instructions(&self) -> VerifierResult<()> {
        for inst in self.body.instructions_in_order() {
            let kind = self.body.kind(inst);
            match kind {
                MirInstructionKind::Apply(apply)
                | MirInstructionKind::TryApply { apply, .. }
                | MirInstructionKind::BeginApply(apply) => {
                    self.verify_call(kind.opcode(), apply, false)?
                }
                MirInstructionKind::PartialApply(apply) => {
                    self.verify_call(kind.opcode(), apply, true)?
                }
                MirInstructionKind::Return { operand } => {
                    let expected = MirType::object(self.tcx.direct_result_type(self.ty));
                    let found = self.body.value_ty(*operand);
                    if found != expected {
                        return Err(VerifierError::ReturnType(ReturnTypeError {
                            function: self.name(),
                            expected: expected.to_string(),
                            found: found.to_string(),
                        }));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// A full call passes the indirect results followed by every parameter. A partial
    /// application binds a suffix of the parameters.
    fn verify_call(&self, opcode: &str, apply: &MirApply<'ta>, partial: bool) -> VerifierResult<()> {
        let found = self.body.value_ty(apply.callee).ty();
        if !std::ptr::eq(found, apply.callee_ty) {
            return Err(VerifierError::CalleeTypeMismatch(CalleeTypeMismatchError {
                function: self.name(),
                opcode: opcode.to_string(),
                expected: apply.callee_ty.to_string(),
                found: found.to_string(),
            }));
        }
        let Some(callee) = apply.callee_ty.as_function() else {
            return Ok(());
        };
        let mut expected = callee.argument_types();
        if partial {
            let bound = apply.arguments.len().min(callee.parameters.len());
            let skipped = expected.len() - bound;
            expected.drain(..skipped);
        }
        if expected.len() != apply.arguments.len() {
            return Err(VerifierError::ArgumentCount(ArgumentCountError {
                function: self.name(),
                opcode: opcode.to_string(),
                expected: expected.len(),
                found: apply.arguments.len(),
            }));
        }
        for (index, (argument, expected)) in apply.arguments.iter().zip(expected).enumerate() {
            let found = self.body.value_ty(*argument);
            if !self.argument_matches(found, expected) {
                return Err(VerifierError::ArgumentType(ArgumentTypeError {
                    function: self.name(),
                    opcode: opcode.to_string(),
                    index,
                    expected: expected.to_string(),
                    found: found.to_string(),
                }));
            }
        }
        Ok(())
    }

    /// Generic parameters are substituted per call site, so only their category is checked.
    fn argument_matches(&self, found: MirType<'ta>, expected: MirType<'ta>) -> bool {
        if self.tcx.has_type_parameter(expected.ty()) {
            return found.category() == expected.category();
        }
        found == expected
    }

    /// Walk the control flow graph, tracking the live stack allocations of every path.
    ///
    /// Every block must be reached with the same allocations on all paths, deallocations must
    /// release the innermost allocation, and nothing may be live at a function exit. Paths that
    /// end in `unreachable` may leave allocations behind.
    fn verify_stack_discipline(&self) -> VerifierResult<()> {
        let mut entry_stacks = HashMap::<BlockId, Vec<ValueId>>::new();
        let entry = self.body.entry_block();
        let mut pending = vec![(entry, Vec::new())];
        entry_stacks.insert(entry, Vec::new());
        while let Some((block, mut stack)) = pending.pop() {
            for inst in &self.body.block(block).instructions {
                match self.body.kind(*inst) {
                    MirInstructionKind::AllocStack => stack.push(self.body.result(*inst)),
                    MirInstructionKind::DeallocStack { operand } => match stack.pop() {
                        Some(top) if top == *operand => {}
                        Some(top) => {
                            return Err(self.unbalanced(format!(
                                "dealloc_stack {} in {} while {} is the innermost allocation",
                                operand, block, top
                            )))
                        }
                        None => {
                            return Err(self.unbalanced(format!(
                                "dealloc_stack {} in {} without a live allocation",
                                operand, block
                            )))
                        }
                    },
                    kind if kind.is_function_exiting() && !stack.is_empty() => {
                        return Err(self.unbalanced(format!(
                            "{} in {} leaves {} allocation(s) live",
                            kind.opcode(),
                            block,
                            stack.len()
                        )));
                    }
                    _ => {}
                }
            }
            for successor in self.body.successors(block) {
                match entry_stacks.get(&successor) {
                    Some(known) if *known == stack => {}
                    Some(_) => {
                        return Err(self.unbalanced(format!(
                            "{} is reached with different allocations",
                            successor
                        )))
                    }
                    None => {
                        entry_stacks.insert(successor, stack.clone());
                        pending.push((successor, stack.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    fn unbalanced(&self, reason: String) -> VerifierError {
        VerifierError::UnbalancedStack(UnbalancedStackError {
            function: self.name(),
            reason,
        })
    }
}

fn join_types(types: &[MirType]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use crate::arena::MirArena;
    use crate::error::VerifierError;
    use crate::parser::parse_module;
    use crate::verifier::verify_module;
    use bumpalo::Bump;
    use tarn_macros::{assert_err, assert_matches, assert_ok};

    const PRELUDE: &str = "struct Big { a: i64, b: i64, c: i64, d: i64, e: i64 }\n\n";

    fn verify(source: &str) -> Result<(), VerifierError> {
        let bump = Bump::new();
        let source = format!("{}{}", PRELUDE, source);
        let module = assert_ok!(parse_module(&source, MirArena::new(&bump)));
        verify_module(&module)
    }

    #[test]
    fn test_balanced_allocations_on_both_paths() {
        let source = r#"fn @f : fn(@owned i1) -> () {
bb0(%0 : i1):
  %1 = alloc_stack Big
  cond_br %0, bb1, bb2
bb1:
  dealloc_stack %1
  br bb3
bb2:
  dealloc_stack %1
  br bb3
bb3:
  %2 = tuple () : ()
  return %2
}
"#;
        assert_ok!(verify(source));
    }

    #[test]
    fn test_allocation_live_at_return() {
        let source = r#"fn @f : fn() -> () {
bb0:
  %0 = alloc_stack Big
  %1 = tuple () : ()
  return %1
}
"#;
        let err = assert_err!(verify(source));
        assert_matches!(err, VerifierError::UnbalancedStack(e) => {
            assert!(e.reason.contains("leaves 1 allocation(s) live"));
        });
    }

    #[test]
    fn test_unreachable_may_leave_allocations() {
        let source = r#"fn @f : fn() -> () {
bb0:
  %0 = alloc_stack Big
  unreachable
}
"#;
        assert_ok!(verify(source));
    }

    #[test]
    fn test_deallocation_out_of_order() {
        let source = r#"fn @f : fn() -> () {
bb0:
  %0 = alloc_stack Big
  %1 = alloc_stack i64
  dealloc_stack %0
  dealloc_stack %1
  %2 = tuple () : ()
  return %2
}
"#;
        let err = assert_err!(verify(source));
        assert_matches!(err, VerifierError::UnbalancedStack(_) => ());
    }

    #[test]
    fn test_missing_terminator() {
        let source = "fn @f : fn() -> () {\nbb0:\n  %0 = tuple () : ()\n}\n";
        let err = assert_err!(verify(source));
        assert_matches!(err, VerifierError::MissingTerminator(e) => {
            assert_eq!(e.block, "bb0");
        });
    }

    #[test]
    fn test_call_against_the_wrong_callee_type() {
        let source = r#"fn @f : fn() -> () {
bb0:
  %0 = function_ref @g : fn(@in Big) -> ()
  %1 = alloc_stack Big
  %2 = apply %0(%1) : fn(@owned Big) -> ()
  dealloc_stack %1
  return %2
}

fn @g : fn(@in Big) -> ()
"#;
        let err = assert_err!(verify(source));
        assert_matches!(err, VerifierError::CalleeTypeMismatch(e) => {
            assert_eq!(e.expected, "fn(@owned Big) -> ()");
            assert_eq!(e.found, "fn(@in Big) -> ()");
        });
    }

    #[test]
    fn test_call_with_an_object_for_an_indirect_parameter() {
        let source = r#"fn @f : fn(@owned Big) -> () {
bb0(%0 : Big):
  %1 = function_ref @g : fn(@in Big) -> ()
  %2 = apply %1(%0) : fn(@in Big) -> ()
  return %2
}

fn @g : fn(@in Big) -> ()
"#;
        let err = assert_err!(verify(source));
        assert_matches!(err, VerifierError::ArgumentType(e) => {
            assert_eq!(e.index, 0);
            assert_eq!(e.expected, "*Big");
            assert_eq!(e.found, "Big");
        });
    }

    #[test]
    fn test_entry_arguments_include_indirect_results() {
        let source = r#"fn @f : fn(@in Big) -> (@out Big) {
bb0(%0 : *Big):
  unreachable
}
"#;
        let err = assert_err!(verify(source));
        assert_matches!(err, VerifierError::EntryArguments(e) => {
            assert_eq!(e.expected, "*Big, *Big");
            assert_eq!(e.found, "*Big");
        });
    }

    #[test]
    fn test_return_of_the_wrong_type() {
        let source = r#"fn @f : fn(@owned i64) -> () {
bb0(%0 : i64):
  return %0
}
"#;
        let err = assert_err!(verify(source));
        assert_matches!(err, VerifierError::ReturnType(e) => {
            assert_eq!(e.expected, "()");
            assert_eq!(e.found, "i64");
        });
    }
}
