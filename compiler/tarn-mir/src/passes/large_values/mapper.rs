//! The type transform of the large-value lowering.
//!
//! The mapper answers two questions for a type in a generic environment: is a value of the type
//! too large to be passed in registers, and what does the type look like once every large value
//! that flows through it is passed by address. Only native function signatures change. A large
//! parameter becomes `@in` (or `@in_guaranteed`), a single large result becomes `@out`, and function
//! types nested in parameters, results, tuples and optionals are rewritten recursively.
//!
//! Every answer of [`LargeTypeMapper::lower_type`] is cached per environment. Entries are inserted
//! once and never replaced.

use crate::abi::AbiOracle;
use crate::context::{GenericContextId, MirTypeContext};
use crate::ty::{
    MirFunctionTy, MirLanguage, MirParameterInfo, MirResultInfo, MirTy, MirType,
    ParameterConvention, ResultConvention,
};
use std::cell::RefCell;
use std::collections::HashMap;
use tarn_diagnostics::ice;

pub struct LargeTypeMapper<'m, 'ta> {
    tcx: &'m MirTypeContext<'ta>,
    oracle: &'m dyn AbiOracle<'ta>,
    cache: RefCell<HashMap<(Option<GenericContextId>, MirType<'ta>), MirType<'ta>>>,
}

/// Can a function of this type be re-signed? Foreign calling conventions keep their ABI.
pub fn is_modifiable(f: &MirFunctionTy) -> bool {
    f.language() == MirLanguage::Native
}

/// The function type of a function or optional function value.
pub fn inner_function_ty<'ta>(ty: MirType<'ta>) -> Option<&'ta MirFunctionTy<'ta>> {
    ty.function_ty()
        .or_else(|| ty.optional_wrapped().and_then(|w| w.function_ty()))
}

impl<'m, 'ta> LargeTypeMapper<'m, 'ta> {
    pub fn new(tcx: &'m MirTypeContext<'ta>, oracle: &'m dyn AbiOracle<'ta>) -> Self {
        Self {
            tcx,
            oracle,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn tcx(&self) -> &'m MirTypeContext<'ta> {
        self.tcx
    }

    /// Is a value of the type passed indirectly by the native calling convention?
    ///
    /// Addresses and class references are never large. Only nominal and optional types are handed
    /// to the oracle; tuples and functions are always exploded.
    pub fn is_large(&self, env: Option<GenericContextId>, ty: MirType<'ta>) -> bool {
        if ty.is_address() {
            return false;
        }
        let mapped = self.tcx.map_into_context(env, ty.ty());
        match mapped {
            MirTy::Nominal(_) if self.tcx.is_class(mapped) => false,
            MirTy::Nominal(_) | MirTy::Optional(_) => {
                self.oracle.requires_indirect(self.tcx, mapped)
            }
            _ => false,
        }
    }

    /// The type a value of `ty` has after lowering.
    pub fn lower_type(&self, env: Option<GenericContextId>, ty: MirType<'ta>) -> MirType<'ta> {
        if let Some(lowered) = self.cache.borrow().get(&(env, ty)) {
            return *lowered;
        }
        let lowered = self.compute_lowered_type(env, ty);
        *self
            .cache
            .borrow_mut()
            .entry((env, ty))
            .or_insert(lowered)
    }

    fn compute_lowered_type(&self, env: Option<GenericContextId>, ty: MirType<'ta>) -> MirType<'ta> {
        let non_optional = ty.optional_wrapped().unwrap_or(ty);
        if non_optional.ty().is_tuple() {
            let lowered = self.lower_tuple_type(env, non_optional, ty);
            return if self.is_large(env, lowered) {
                lowered.as_address()
            } else {
                lowered
            };
        }
        let optional = self.lower_optional_function_type(env, ty);
        if optional != ty {
            return optional;
        }
        if let Some(f) = ty.function_ty() {
            if self.should_transform_function_ty(env, f) {
                return ty.with_ty(self.lower_function_ty(env, ty.ty()));
            }
            return ty;
        }
        if self.is_large(env, ty) {
            return ty.as_address();
        }
        ty
    }

    /// Lower the elements of a tuple or optional tuple. Large elements keep their formal type.
    fn lower_tuple_type(
        &self,
        env: Option<GenericContextId>,
        non_optional: MirType<'ta>,
        ty: MirType<'ta>,
    ) -> MirType<'ta> {
        let elements = non_optional
            .ty()
            .tuple_elements()
            .unwrap_or_else(|| ice!("expected a tuple type, found {}", non_optional))
            .iter()
            .map(|e| self.lower_type(env, MirType::object(e)).ty())
            .collect::<Vec<_>>();
        let arena = self.tcx.arena();
        let mut lowered = arena.get_tuple_ty(&elements);
        if non_optional != ty {
            lowered = arena.get_optional_ty(lowered);
        }
        ty.with_ty(lowered)
    }

    /// `Optional<fn ...>` with the function type lowered, or the type unchanged.
    fn lower_optional_function_type(
        &self,
        env: Option<GenericContextId>,
        ty: MirType<'ta>,
    ) -> MirType<'ta> {
        let Some(wrapped) = ty.ty().optional_wrapped() else {
            return ty;
        };
        match wrapped.as_function() {
            Some(f) if self.should_transform_function_ty(env, f) => {
                let lowered = self.lower_function_ty(env, wrapped);
                ty.with_ty(self.tcx.arena().get_optional_ty(lowered))
            }
            _ => ty,
        }
    }

    /// The lowered form of a function type.
    ///
    /// A function type with its own generic context is lowered in that context. Foreign function
    /// types are returned unchanged.
    pub fn lower_function_ty(
        &self,
        env: Option<GenericContextId>,
        ty: &'ta MirTy<'ta>,
    ) -> &'ta MirTy<'ta> {
        let f = ty
            .as_function()
            .unwrap_or_else(|| ice!("expected a function type, found {}", ty));
        if !is_modifiable(f) {
            return ty;
        }
        let env = f.generic_context.or(env);
        let mut signature = f.to_signature();
        signature.parameters = f
            .parameters
            .iter()
            .map(|p| self.lower_parameter(env, *p))
            .collect();
        signature.yields = f
            .yields
            .iter()
            .map(|y| self.lower_parameter(env, *y))
            .collect();
        signature.results = self.lower_results(env, f);
        self.tcx.arena().get_function_ty(signature)
    }

    pub fn lower_parameter(
        &self,
        env: Option<GenericContextId>,
        parameter: MirParameterInfo<'ta>,
    ) -> MirParameterInfo<'ta> {
        let storage = parameter.storage_type();
        let optional = self.lower_optional_function_type(env, storage);
        if optional != storage {
            return parameter.with_type(optional.ty());
        }
        if let Some(f) = storage.function_ty() {
            if self.should_transform_function_ty(env, f) {
                return parameter.with_type(self.lower_function_ty(env, storage.ty()));
            }
            return parameter;
        }
        if self.is_large(env, storage) {
            let convention = if parameter.convention == ParameterConvention::DirectGuaranteed {
                ParameterConvention::IndirectInGuaranteed
            } else {
                ParameterConvention::IndirectIn
            };
            return MirParameterInfo::new(storage.ty(), convention);
        }
        parameter.with_type(self.lower_type(env, storage).ty())
    }

    /// The lowered result list. A single large result becomes `@out`; results that contain a
    /// changed function signature keep their convention with the new type.
    pub fn lower_results(
        &self,
        env: Option<GenericContextId>,
        f: &MirFunctionTy<'ta>,
    ) -> Vec<MirResultInfo<'ta>> {
        let indirect = self.is_large_single_result(env, f);
        f.results
            .iter()
            .map(|result| {
                let storage = result.storage_type();
                let lowered = self.lower_type(env, storage);
                if indirect {
                    MirResultInfo::new(lowered.ty(), ResultConvention::Indirect)
                } else if self.contains_different_function_signature(env, storage, lowered) {
                    result.with_type(lowered.ty())
                } else {
                    *result
                }
            })
            .collect()
    }

    /// Does the function return exactly one result that is large?
    pub fn is_large_single_result(
        &self,
        env: Option<GenericContextId>,
        f: &MirFunctionTy<'ta>,
    ) -> bool {
        if !is_modifiable(f) {
            return false;
        }
        f.single_result()
            .is_some_and(|r| self.is_large(env, r.storage_type()))
    }

    pub fn should_transform_function_ty(
        &self,
        env: Option<GenericContextId>,
        f: &MirFunctionTy<'ta>,
    ) -> bool {
        if !is_modifiable(f) {
            return false;
        }
        let env = f.generic_context.or(env);
        self.should_transform_results(env, f)
            || f
                .parameters
                .iter()
                .chain(f.yields.iter())
                .any(|p| self.lower_parameter(env, *p) != *p)
    }

    pub fn should_transform_results(
        &self,
        env: Option<GenericContextId>,
        f: &MirFunctionTy<'ta>,
    ) -> bool {
        if !is_modifiable(f) {
            return false;
        }
        let Some(single) = f.single_result() else {
            let results = MirType::object(self.tcx.all_results_type(f));
            return self.lower_type(env, results) != results;
        };
        let storage = single.storage_type();
        self.lower_type(env, storage) != storage || self.is_large_single_result(env, f)
    }

    pub fn should_transform_yields(
        &self,
        env: Option<GenericContextId>,
        f: &MirFunctionTy<'ta>,
    ) -> bool {
        if !is_modifiable(f) {
            return false;
        }
        f.yields.iter().any(|y| {
            let storage = y.storage_type();
            self.lower_type(env, storage) != storage
        })
    }

    /// Does `lowered` differ from `ty` because a function signature inside it changed?
    ///
    /// Large values that merely became addresses do not count.
    pub fn contains_different_function_signature(
        &self,
        env: Option<GenericContextId>,
        ty: MirType<'ta>,
        lowered: MirType<'ta>,
    ) -> bool {
        if ty == lowered {
            return false;
        }
        if inner_function_ty(ty).is_some() {
            return true;
        }
        let non_optional = ty.optional_wrapped().unwrap_or(ty);
        let Some(elements) = non_optional.ty().tuple_elements() else {
            return false;
        };
        elements.iter().any(|e| {
            let element = MirType::object(e);
            let lowered = self.lower_type(env, element);
            self.contains_different_function_signature(env, element, lowered)
        })
    }

    /// Convenience form of [`Self::contains_different_function_signature`] against the lowered
    /// type.
    pub fn has_different_function_signature(
        &self,
        env: Option<GenericContextId>,
        ty: MirType<'ta>,
    ) -> bool {
        let lowered = self.lower_type(env, ty);
        self.contains_different_function_signature(env, ty, lowered)
    }

    pub fn results_differ(
        &self,
        env: Option<GenericContextId>,
        results: &[MirResultInfo<'ta>],
    ) -> bool {
        results
            .iter()
            .any(|r| self.has_different_function_signature(env, r.storage_type()))
    }

    /// Must a block argument of this type be retyped?
    pub fn should_convert_block_argument(
        &self,
        env: Option<GenericContextId>,
        ty: MirType<'ta>,
    ) -> bool {
        let env = match ty.function_ty() {
            Some(f) if f.is_polymorphic() => f.generic_context,
            _ => env,
        };
        self.has_different_function_signature(env, ty)
    }
}

#[cfg(test)]
mod tests {
    use crate::abi::RegisterBudgetOracle;
    use crate::arena::MirArena;
    use crate::context::{MirField, MirNominalDecl, MirNominalKind, MirTypeContext};
    use crate::passes::large_values::mapper::LargeTypeMapper;
    use crate::ty::{
        MirFunctionRepresentation, MirFunctionSignature, MirParameterInfo, MirResultInfo,
        MirType, ParameterConvention, ResultConvention,
    };
    use bumpalo::Bump;

    fn declare_big(tcx: &mut MirTypeContext) {
        let arena = tcx.arena();
        let i64_ty = arena.get_integer_ty(64);
        let decl = MirNominalDecl {
            name: arena.intern_str("Big"),
            kind: MirNominalKind::Struct,
            type_parameters: 0,
            fields: ["a", "b", "c", "d", "e"]
                .iter()
                .map(|name| MirField {
                    name: arena.intern_str(name),
                    ty: i64_ty,
                })
                .collect(),
            cases: vec![],
        };
        tcx.declare_nominal(decl);
    }

    #[test]
    fn test_large_parameter_and_result_become_indirect() {
        let bump = Bump::new();
        let mut tcx = MirTypeContext::new(MirArena::new(&bump));
        declare_big(&mut tcx);
        let oracle = RegisterBudgetOracle::default();
        let mapper = LargeTypeMapper::new(&tcx, &oracle);
        let arena = tcx.arena();
        let big = arena.get_nominal_ty("Big", &[]);
        let i64_ty = arena.get_integer_ty(64);
        let f = arena.get_function_ty(MirFunctionSignature::thin(
            vec![
                MirParameterInfo::new(big, ParameterConvention::DirectGuaranteed),
                MirParameterInfo::new(i64_ty, ParameterConvention::DirectOwned),
            ],
            vec![MirResultInfo::new(big, ResultConvention::Owned)],
        ));
        let lowered = mapper.lower_type(None, MirType::object(f));
        assert_eq!(
            lowered.to_string(),
            "fn(@in_guaranteed Big, @owned i64) -> (@out Big)"
        );
        // Lowering is idempotent.
        assert_eq!(mapper.lower_type(None, lowered), lowered);
        assert!(mapper.is_large(None, MirType::object(big)));
        assert!(!mapper.is_large(None, MirType::address(big)));
        assert_eq!(
            mapper.lower_type(None, MirType::object(big)),
            MirType::address(big)
        );
    }

    #[test]
    fn test_foreign_functions_are_unchanged() {
        let bump = Bump::new();
        let mut tcx = MirTypeContext::new(MirArena::new(&bump));
        declare_big(&mut tcx);
        let oracle = RegisterBudgetOracle::default();
        let mapper = LargeTypeMapper::new(&tcx, &oracle);
        let big = tcx.arena().get_nominal_ty("Big", &[]);
        let mut signature = MirFunctionSignature::thin(
            vec![MirParameterInfo::new(big, ParameterConvention::DirectOwned)],
            vec![MirResultInfo::new(big, ResultConvention::Owned)],
        );
        signature.representation = MirFunctionRepresentation::CFunction;
        let c_function = tcx.arena().get_function_ty(signature);
        let lowered = mapper.lower_function_ty(None, c_function);
        assert!(std::ptr::eq(lowered, c_function));
        let f = c_function.as_function().unwrap();
        assert!(!mapper.should_transform_function_ty(None, f));
    }

    #[test]
    fn test_nested_function_types_are_rewritten() {
        let bump = Bump::new();
        let mut tcx = MirTypeContext::new(MirArena::new(&bump));
        declare_big(&mut tcx);
        let oracle = RegisterBudgetOracle::default();
        let mapper = LargeTypeMapper::new(&tcx, &oracle);
        let arena = tcx.arena();
        let big = arena.get_nominal_ty("Big", &[]);
        let i64_ty = arena.get_integer_ty(64);
        let callback = arena.get_function_ty(MirFunctionSignature::thin(
            vec![MirParameterInfo::new(big, ParameterConvention::DirectOwned)],
            vec![],
        ));
        let optional_callback = arena.get_optional_ty(callback);
        let pair = arena.get_tuple_ty(&[optional_callback, big, i64_ty]);
        let lowered = mapper.lower_type(None, MirType::object(pair));
        assert_eq!(lowered.to_string(), "(Optional<fn(@in Big) -> ()>, Big, i64)");
        assert!(mapper.contains_different_function_signature(
            None,
            MirType::object(pair),
            lowered
        ));
        // A large value becoming an address is not a signature change.
        assert!(!mapper.has_different_function_signature(None, MirType::object(big)));
    }
}
