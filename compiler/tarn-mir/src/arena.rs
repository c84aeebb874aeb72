use crate::ty::{
    MirBlockStorageTy, MirFunctionSignature, MirFunctionTy, MirIntegerTy, MirNominalTy,
    MirOptionalTy, MirParameterTy, MirTupleTy, MirTy, MirTyId,
};
use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// A type arena for MIR types.
///
/// In order to avoid duplication of types, we use an arena allocator to allocate the types. This
/// arena acts as a cache for the types, meaning we can look up types from the arena by their ID
/// or characteristics.
///
/// It also simplifies comparison of types to pointer equality.
#[derive(Debug)]
pub struct MirArena<'ta> {
    allocator: &'ta Bump,
    interned_types: RefCell<HashMap<MirTyId, &'ta MirTy<'ta>>>,
    interned_strings: RefCell<HashSet<&'ta str>>,
}

impl<'ta> MirArena<'ta> {
    pub fn new(bump: &'ta Bump) -> Self {
        Self {
            allocator: bump,
            interned_types: RefCell::new(HashMap::new()),
            interned_strings: RefCell::new(HashSet::new()),
        }
    }

    /// Get a type from the arena.
    pub fn get_type(&self, id: MirTyId) -> Option<&'ta MirTy<'ta>> {
        self.interned_types.borrow().get(&id).copied()
    }

    /// Intern a string so that it lives as long as the arena.
    pub fn intern_str(&self, s: &str) -> &'ta str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(interned) = strings.get(s) {
            return *interned;
        }
        let interned: &'ta str = self.allocator.alloc_str(s);
        strings.insert(interned);
        interned
    }

    fn intern(&self, id: MirTyId, build: impl FnOnce() -> MirTy<'ta>) -> &'ta MirTy<'ta> {
        let mut types = self.interned_types.borrow_mut();
        *types
            .entry(id)
            .or_insert_with(|| self.allocator.alloc(build()))
    }

    pub fn get_integer_ty(&self, bits: u32) -> &'ta MirTy<'ta> {
        let id = MirTyId::compute_integer_ty_id(bits);
        self.intern(id, || MirTy::Integer(MirIntegerTy { bits }))
    }

    pub fn get_raw_pointer_ty(&self) -> &'ta MirTy<'ta> {
        let id = MirTyId::compute_raw_pointer_ty_id();
        self.intern(id, || MirTy::RawPointer)
    }

    pub fn get_token_ty(&self) -> &'ta MirTy<'ta> {
        let id = MirTyId::compute_token_ty_id();
        self.intern(id, || MirTy::Token)
    }

    pub fn get_tuple_ty(&self, elements: &[&'ta MirTy<'ta>]) -> &'ta MirTy<'ta> {
        let element_ids = elements
            .iter()
            .map(|e| MirTyId::from(*e))
            .collect::<Vec<_>>();
        let id = MirTyId::compute_tuple_ty_id(&element_ids);
        self.intern(id, || {
            MirTy::Tuple(MirTupleTy {
                elements: self.allocator.alloc_slice_copy(elements),
            })
        })
    }

    pub fn get_empty_tuple_ty(&self) -> &'ta MirTy<'ta> {
        self.get_tuple_ty(&[])
    }

    pub fn get_function_ty(&self, signature: MirFunctionSignature<'ta>) -> &'ta MirTy<'ta> {
        let id = MirTyId::compute_function_ty_id(&signature);
        self.intern(id, || {
            MirTy::Function(MirFunctionTy {
                representation: signature.representation,
                coroutine: signature.coroutine,
                noescape: signature.noescape,
                generic_context: signature.generic_context,
                parameters: self.allocator.alloc_slice_copy(&signature.parameters),
                yields: self.allocator.alloc_slice_copy(&signature.yields),
                results: self.allocator.alloc_slice_copy(&signature.results),
                error: signature.error,
            })
        })
    }

    pub fn get_optional_ty(&self, wrapped: &'ta MirTy<'ta>) -> &'ta MirTy<'ta> {
        let id = MirTyId::compute_optional_ty_id(&MirTyId::from(wrapped));
        self.intern(id, || MirTy::Optional(MirOptionalTy { wrapped }))
    }

    pub fn get_nominal_ty(&self, name: &str, arguments: &[&'ta MirTy<'ta>]) -> &'ta MirTy<'ta> {
        let argument_ids = arguments
            .iter()
            .map(|a| MirTyId::from(*a))
            .collect::<Vec<_>>();
        let id = MirTyId::compute_nominal_ty_id(name, &argument_ids);
        self.intern(id, || {
            MirTy::Nominal(MirNominalTy {
                name: self.intern_str(name),
                arguments: self.allocator.alloc_slice_copy(arguments),
            })
        })
    }

    pub fn get_parameter_ty(&self, index: u32) -> &'ta MirTy<'ta> {
        let id = MirTyId::compute_parameter_ty_id(index);
        self.intern(id, || MirTy::Parameter(MirParameterTy { index }))
    }

    pub fn get_block_storage_ty(&self, captured: &'ta MirTy<'ta>) -> &'ta MirTy<'ta> {
        let id = MirTyId::compute_block_storage_ty_id(&MirTyId::from(captured));
        self.intern(id, || MirTy::BlockStorage(MirBlockStorageTy { captured }))
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::MirArena;
    use crate::ty::{
        MirFunctionSignature, MirParameterInfo, MirResultInfo, ParameterConvention,
        ResultConvention,
    };
    use bumpalo::Bump;

    #[test]
    fn test_structurally_equal_types_are_interned_once() {
        let bump = Bump::new();
        let arena = MirArena::new(&bump);
        let i64_ty = arena.get_integer_ty(64);
        let a = arena.get_nominal_ty("Pair", &[i64_ty, i64_ty]);
        let b = arena.get_nominal_ty("Pair", &[arena.get_integer_ty(64), i64_ty]);
        assert!(std::ptr::eq(a, b));
        assert!(!std::ptr::eq(a, arena.get_nominal_ty("Pair", &[])));
        assert_eq!(a.to_string(), "Pair<i64, i64>");
    }

    #[test]
    fn test_function_types_distinguish_conventions() {
        let bump = Bump::new();
        let arena = MirArena::new(&bump);
        let big = arena.get_nominal_ty("Big", &[]);
        let owned = arena.get_function_ty(MirFunctionSignature::thin(
            vec![MirParameterInfo::new(big, ParameterConvention::DirectOwned)],
            vec![MirResultInfo::new(big, ResultConvention::Owned)],
        ));
        let indirect = arena.get_function_ty(MirFunctionSignature::thin(
            vec![MirParameterInfo::new(big, ParameterConvention::IndirectIn)],
            vec![MirResultInfo::new(big, ResultConvention::Indirect)],
        ));
        assert!(!std::ptr::eq(owned, indirect));
        assert_eq!(owned.to_string(), "fn(@owned Big) -> (@owned Big)");
        assert_eq!(indirect.to_string(), "fn(@in Big) -> (@out Big)");
    }

    #[test]
    fn test_interned_strings_are_shared() {
        let bump = Bump::new();
        let arena = MirArena::new(&bump);
        let a = arena.intern_str("payload");
        let b = arena.intern_str(&String::from("payload"));
        assert!(std::ptr::eq(a, b));
    }
}
