//! ABI classification of types.
//!
//! The lowering pass asks an [`AbiOracle`] whether a type has to be passed indirectly under the
//! native calling convention. The answer is authoritative; the pass never second-guesses it.

use crate::context::{MirNominalKind, MirTypeContext};
use crate::ty::MirTy;
use tarn_diagnostics::ice;

/// The type-layout collaborator of the lowering pass.
///
/// Types handed to the oracle are concrete: generic parameters have already been mapped through
/// the relevant generic environment.
pub trait AbiOracle<'ta> {
    /// Does passing a value of this type as a native `@in` parameter require an address?
    fn requires_indirect(&self, tcx: &MirTypeContext<'ta>, ty: &'ta MirTy<'ta>) -> bool;
}

/// An oracle that passes a value directly as long as its explosion into scalar words fits into a
/// fixed register budget.
#[derive(Debug, Clone, Copy)]
pub struct RegisterBudgetOracle {
    pub max_direct_words: u32,
}

impl Default for RegisterBudgetOracle {
    fn default() -> Self {
        Self {
            max_direct_words: 4,
        }
    }
}

/// Nesting depth past which a type is assumed to contain itself by value.
const MAX_TYPE_DEPTH: u32 = 128;

impl RegisterBudgetOracle {
    pub fn new(max_direct_words: u32) -> Self {
        Self { max_direct_words }
    }

    /// The number of scalar words a value of the type explodes into.
    pub fn explosion_words<'ta>(&self, tcx: &MirTypeContext<'ta>, ty: &'ta MirTy<'ta>) -> u32 {
        self.words_at_depth(tcx, ty, 0)
    }

    fn words_at_depth<'ta>(
        &self,
        tcx: &MirTypeContext<'ta>,
        ty: &'ta MirTy<'ta>,
        depth: u32,
    ) -> u32 {
        if depth > MAX_TYPE_DEPTH {
            ice!("type {} contains itself by value", ty);
        }
        let words = |ty: &'ta MirTy<'ta>| self.words_at_depth(tcx, ty, depth + 1);
        match ty {
            MirTy::Integer(i) => i.bits.div_ceil(64).max(1),
            MirTy::RawPointer | MirTy::Token | MirTy::Parameter(_) => 1,
            MirTy::Function(f) if f.representation.has_context() => 2,
            MirTy::Function(_) => 1,
            MirTy::Tuple(t) => t.elements.iter().map(|e| words(*e)).sum(),
            MirTy::Optional(o) if Self::is_pointer_like(tcx, o.wrapped) => words(o.wrapped),
            MirTy::Optional(o) => words(o.wrapped) + 1,
            MirTy::BlockStorage(b) => words(b.captured) + 1,
            MirTy::Nominal(n) => {
                let kind = tcx
                    .nominal(n.name)
                    .map(|d| d.kind)
                    .unwrap_or_else(|| ice!("nominal type {} is not declared", n.name));
                match kind {
                    MirNominalKind::Class => 1,
                    MirNominalKind::Struct => tcx.fields(ty).iter().map(|f| words(f.ty)).sum(),
                    MirNominalKind::Enum => {
                        let cases = tcx.cases(ty);
                        let payload = cases
                            .iter()
                            .filter_map(|c| c.payload)
                            .map(|p| words(p))
                            .max()
                            .unwrap_or(0);
                        let tag = if cases.len() > 1 { 1 } else { 0 };
                        payload + tag
                    }
                }
            }
        }
    }

    /// Types with spare bits in a pointer, which an optional can use for its tag.
    fn is_pointer_like<'ta>(tcx: &MirTypeContext<'ta>, ty: &'ta MirTy<'ta>) -> bool {
        match ty {
            MirTy::RawPointer | MirTy::Function(_) => true,
            MirTy::Nominal(_) => tcx.is_class(ty),
            _ => false,
        }
    }
}

impl<'ta> AbiOracle<'ta> for RegisterBudgetOracle {
    fn requires_indirect(&self, tcx: &MirTypeContext<'ta>, ty: &'ta MirTy<'ta>) -> bool {
        self.explosion_words(tcx, ty) > self.max_direct_words
    }
}

#[cfg(test)]
mod tests {
    use crate::abi::{AbiOracle, RegisterBudgetOracle};
    use crate::arena::MirArena;
    use crate::context::{MirEnumCase, MirField, MirNominalDecl, MirNominalKind, MirTypeContext};
    use crate::ty::{MirFunctionRepresentation, MirFunctionSignature};
    use bumpalo::Bump;

    fn declare<'ta>(
        tcx: &mut MirTypeContext<'ta>,
        name: &str,
        kind: MirNominalKind,
        fields: usize,
    ) {
        let arena = tcx.arena();
        let i64_ty = arena.get_integer_ty(64);
        let decl = MirNominalDecl {
            name: arena.intern_str(name),
            kind,
            type_parameters: 0,
            fields: (0..fields)
                .map(|i| MirField {
                    name: arena.intern_str(&format!("f{}", i)),
                    ty: i64_ty,
                })
                .collect(),
            cases: vec![],
        };
        tcx.declare_nominal(decl);
    }

    #[test]
    fn test_structs_over_budget_are_indirect() {
        let bump = Bump::new();
        let mut tcx = MirTypeContext::new(MirArena::new(&bump));
        declare(&mut tcx, "Big", MirNominalKind::Struct, 5);
        declare(&mut tcx, "Small", MirNominalKind::Struct, 4);
        declare(&mut tcx, "Node", MirNominalKind::Class, 9);
        let oracle = RegisterBudgetOracle::default();
        let big = tcx.arena().get_nominal_ty("Big", &[]);
        let small = tcx.arena().get_nominal_ty("Small", &[]);
        let node = tcx.arena().get_nominal_ty("Node", &[]);
        assert!(oracle.requires_indirect(&tcx, big));
        assert!(!oracle.requires_indirect(&tcx, small));
        assert!(!oracle.requires_indirect(&tcx, node));
        // An optional of a struct needs a tag word, an optional of a class does not.
        let optional_small = tcx.arena().get_optional_ty(small);
        assert!(oracle.requires_indirect(&tcx, optional_small));
        let optional_node = tcx.arena().get_optional_ty(node);
        assert_eq!(oracle.explosion_words(&tcx, optional_node), 1);
        // A wider budget changes the answer.
        assert!(!RegisterBudgetOracle::new(5).requires_indirect(&tcx, big));
    }

    #[test]
    fn test_enum_and_function_words() {
        let bump = Bump::new();
        let mut tcx = MirTypeContext::new(MirArena::new(&bump));
        let arena = tcx.arena();
        let i64_ty = arena.get_integer_ty(64);
        let pair = arena.get_tuple_ty(&[i64_ty, i64_ty]);
        let shape = MirNominalDecl {
            name: arena.intern_str("Shape"),
            kind: MirNominalKind::Enum,
            type_parameters: 0,
            fields: vec![],
            cases: vec![
                MirEnumCase {
                    name: arena.intern_str("point"),
                    payload: None,
                },
                MirEnumCase {
                    name: arena.intern_str("line"),
                    payload: Some(pair),
                },
            ],
        };
        tcx.declare_nominal(shape);
        let oracle = RegisterBudgetOracle::default();
        let shape = tcx.arena().get_nominal_ty("Shape", &[]);
        assert_eq!(oracle.explosion_words(&tcx, shape), 3);

        let mut signature = MirFunctionSignature::thin(vec![], vec![]);
        let thin = tcx.arena().get_function_ty(signature.clone());
        signature.representation = MirFunctionRepresentation::Thick;
        let thick = tcx.arena().get_function_ty(signature);
        assert_eq!(oracle.explosion_words(&tcx, thin), 1);
        assert_eq!(oracle.explosion_words(&tcx, thick), 2);
        assert_eq!(oracle.explosion_words(&tcx, tcx.arena().get_integer_ty(128)), 2);
    }
}
