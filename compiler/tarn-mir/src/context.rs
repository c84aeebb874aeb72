//! The type context of a module.
//!
//! The context owns the type arena, the nominal type declarations and the generic environments of
//! a module. Everything that needs to look through a nominal type or resolve a generic parameter
//! goes through it.

use crate::arena::MirArena;
use crate::ty::{MirFunctionSignature, MirFunctionTy, MirTy};
use std::collections::HashMap;
use std::fmt::Display;
use tarn_diagnostics::ice;

/// Identifies a generic environment of the type context.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenericContextId(pub u32);

impl Display for GenericContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirNominalKind {
    Struct,
    Enum,
    Class,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy)]
pub struct MirField<'ta> {
    pub name: &'ta str,
    pub ty: &'ta MirTy<'ta>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy)]
pub struct MirEnumCase<'ta> {
    pub name: &'ta str,
    pub payload: Option<&'ta MirTy<'ta>>,
}

/// A struct, enum or class declaration.
///
/// Field and payload types may refer to the declaration's own type parameters as `$0`, `$1`, and
/// so on. They are substituted with the arguments of a nominal type when queried through the
/// context.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirNominalDecl<'ta> {
    pub name: &'ta str,
    pub kind: MirNominalKind,
    pub type_parameters: u32,
    pub fields: Vec<MirField<'ta>>,
    pub cases: Vec<MirEnumCase<'ta>>,
}

/// A substitution environment mapping generic parameters to concrete types.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirGenericEnvironment<'ta> {
    pub substitutions: Vec<&'ta MirTy<'ta>>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirTypeContext<'ta> {
    #[cfg_attr(feature = "serde", serde(skip))]
    arena: MirArena<'ta>,
    pub nominals: Vec<MirNominalDecl<'ta>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    nominal_index: HashMap<&'ta str, usize>,
    pub environments: Vec<MirGenericEnvironment<'ta>>,
}

impl<'ta> MirTypeContext<'ta> {
    pub fn new(arena: MirArena<'ta>) -> Self {
        Self {
            arena,
            nominals: Vec::new(),
            nominal_index: HashMap::new(),
            environments: Vec::new(),
        }
    }

    pub fn arena(&self) -> &MirArena<'ta> {
        &self.arena
    }

    /// Add a nominal declaration, returning `false` if the name is already declared.
    pub fn declare_nominal(&mut self, decl: MirNominalDecl<'ta>) -> bool {
        if self.nominal_index.contains_key(decl.name) {
            return false;
        }
        self.nominal_index.insert(decl.name, self.nominals.len());
        self.nominals.push(decl);
        true
    }

    pub fn nominal(&self, name: &str) -> Option<&MirNominalDecl<'ta>> {
        self.nominal_index.get(name).map(|i| &self.nominals[*i])
    }

    pub fn declare_environment(&mut self, env: MirGenericEnvironment<'ta>) -> GenericContextId {
        let id = GenericContextId(self.environments.len() as u32);
        self.environments.push(env);
        id
    }

    pub fn environment(&self, id: GenericContextId) -> &MirGenericEnvironment<'ta> {
        self.environments
            .get(id.0 as usize)
            .unwrap_or_else(|| ice!("unknown generic environment {}", id))
    }

    /// The declaration behind a nominal type.
    fn decl_of(&self, ty: &'ta MirTy<'ta>) -> Option<&MirNominalDecl<'ta>> {
        match ty {
            MirTy::Nominal(n) => Some(
                self.nominal(n.name)
                    .unwrap_or_else(|| ice!("nominal type {} is not declared", n.name)),
            ),
            _ => None,
        }
    }

    pub fn nominal_kind(&self, ty: &'ta MirTy<'ta>) -> Option<MirNominalKind> {
        self.decl_of(ty).map(|d| d.kind)
    }

    pub fn is_class(&self, ty: &'ta MirTy<'ta>) -> bool {
        self.decl_of(ty)
            .is_some_and(|d| d.kind == MirNominalKind::Class)
    }

    /// Does the type mention a generic parameter anywhere in its structure?
    pub fn has_type_parameter(&self, ty: &'ta MirTy<'ta>) -> bool {
        match ty {
            MirTy::Parameter(_) => true,
            MirTy::Integer(_) | MirTy::RawPointer | MirTy::Token => false,
            MirTy::Tuple(t) => t.elements.iter().any(|e| self.has_type_parameter(e)),
            MirTy::Optional(o) => self.has_type_parameter(o.wrapped),
            MirTy::Nominal(n) => n.arguments.iter().any(|a| self.has_type_parameter(a)),
            MirTy::BlockStorage(b) => self.has_type_parameter(b.captured),
            MirTy::Function(f) => {
                f.parameters.iter().any(|p| self.has_type_parameter(p.ty))
                    || f.yields.iter().any(|p| self.has_type_parameter(p.ty))
                    || f.results.iter().any(|r| self.has_type_parameter(r.ty))
                    || f.error.is_some_and(|r| self.has_type_parameter(r.ty))
            }
        }
    }

    /// Replace every parameter `$i` in the type with `substitutions[i]`.
    pub fn substitute(
        &self,
        ty: &'ta MirTy<'ta>,
        substitutions: &[&'ta MirTy<'ta>],
    ) -> &'ta MirTy<'ta> {
        if !self.has_type_parameter(ty) {
            return ty;
        }
        match ty {
            MirTy::Parameter(p) => substitutions
                .get(p.index as usize)
                .copied()
                .unwrap_or_else(|| ice!("no substitution for generic parameter {}", ty)),
            MirTy::Integer(_) | MirTy::RawPointer | MirTy::Token => ty,
            MirTy::Tuple(t) => {
                let elements = t
                    .elements
                    .iter()
                    .map(|e| self.substitute(e, substitutions))
                    .collect::<Vec<_>>();
                self.arena.get_tuple_ty(&elements)
            }
            MirTy::Optional(o) => self
                .arena
                .get_optional_ty(self.substitute(o.wrapped, substitutions)),
            MirTy::Nominal(n) => {
                let arguments = n
                    .arguments
                    .iter()
                    .map(|a| self.substitute(a, substitutions))
                    .collect::<Vec<_>>();
                self.arena.get_nominal_ty(n.name, &arguments)
            }
            MirTy::BlockStorage(b) => self
                .arena
                .get_block_storage_ty(self.substitute(b.captured, substitutions)),
            MirTy::Function(f) => {
                let mut signature: MirFunctionSignature<'ta> = f.to_signature();
                for p in signature
                    .parameters
                    .iter_mut()
                    .chain(signature.yields.iter_mut())
                {
                    p.ty = self.substitute(p.ty, substitutions);
                }
                for r in signature.results.iter_mut().chain(signature.error.iter_mut()) {
                    r.ty = self.substitute(r.ty, substitutions);
                }
                self.arena.get_function_ty(signature)
            }
        }
    }

    /// Resolve the generic parameters of a type through the given environment.
    ///
    /// Mapping a type that mentions a parameter without an environment is a compiler bug.
    pub fn map_into_context(
        &self,
        context: Option<GenericContextId>,
        ty: &'ta MirTy<'ta>,
    ) -> &'ta MirTy<'ta> {
        if !self.has_type_parameter(ty) {
            return ty;
        }
        let context = context
            .unwrap_or_else(|| ice!("expected a generic environment to map {} into", ty));
        let mapped = self.substitute(ty, &self.environment(context).substitutions);
        if self.has_type_parameter(mapped) {
            ice!("generic environment {} leaves {} unresolved", context, mapped);
        }
        mapped
    }

    /// Can values of the type be copied bitwise without any reference counting?
    pub fn is_trivial(&self, ty: &'ta MirTy<'ta>) -> bool {
        match ty {
            MirTy::Integer(_) | MirTy::RawPointer | MirTy::Token => true,
            MirTy::Function(f) => !f.representation.has_context(),
            MirTy::Tuple(t) => t.elements.iter().all(|e| self.is_trivial(e)),
            MirTy::Optional(o) => self.is_trivial(o.wrapped),
            MirTy::Parameter(_) | MirTy::BlockStorage(_) => false,
            MirTy::Nominal(_) => match self.decl_of(ty).map(|d| d.kind) {
                Some(MirNominalKind::Class) | None => false,
                Some(MirNominalKind::Struct) => self
                    .fields(ty)
                    .iter()
                    .all(|f| self.is_trivial(f.ty)),
                Some(MirNominalKind::Enum) => self
                    .cases(ty)
                    .iter()
                    .all(|c| c.payload.map_or(true, |p| self.is_trivial(p))),
            },
        }
    }

    /// The type of the value a call of the function produces: the single direct result, or the
    /// tuple of all direct results.
    pub fn direct_result_type(&self, f: &MirFunctionTy<'ta>) -> &'ta MirTy<'ta> {
        let direct = f.direct_results().map(|r| r.ty).collect::<Vec<_>>();
        match direct.as_slice() {
            [single] => *single,
            _ => self.arena.get_tuple_ty(&direct),
        }
    }

    /// The formal type of all results of a function taken together.
    pub fn all_results_type(&self, f: &MirFunctionTy<'ta>) -> &'ta MirTy<'ta> {
        match f.results {
            [single] => single.ty,
            results => {
                let elements = results.iter().map(|r| r.ty).collect::<Vec<_>>();
                self.arena.get_tuple_ty(&elements)
            }
        }
    }

    /// The stored properties of a struct or class type, with the type's arguments substituted.
    pub fn fields(&self, ty: &'ta MirTy<'ta>) -> Vec<MirField<'ta>> {
        let MirTy::Nominal(n) = ty else {
            return vec![];
        };
        let Some(decl) = self.decl_of(ty) else {
            return vec![];
        };
        decl.fields
            .iter()
            .map(|f| MirField {
                name: f.name,
                ty: self.substitute(f.ty, n.arguments),
            })
            .collect()
    }

    /// The cases of an enum or optional type, with payloads substituted.
    pub fn cases(&self, ty: &'ta MirTy<'ta>) -> Vec<MirEnumCase<'ta>> {
        match ty {
            MirTy::Optional(o) => vec![
                MirEnumCase {
                    name: self.arena.intern_str("none"),
                    payload: None,
                },
                MirEnumCase {
                    name: self.arena.intern_str("some"),
                    payload: Some(o.wrapped),
                },
            ],
            MirTy::Nominal(n) => match self.decl_of(ty) {
                Some(decl) if decl.kind == MirNominalKind::Enum => decl
                    .cases
                    .iter()
                    .map(|c| MirEnumCase {
                        name: c.name,
                        payload: c.payload.map(|p| self.substitute(p, n.arguments)),
                    })
                    .collect(),
                _ => vec![],
            },
            _ => vec![],
        }
    }

    pub fn field_type(&self, ty: &'ta MirTy<'ta>, field: &str) -> Option<&'ta MirTy<'ta>> {
        self.fields(ty)
            .into_iter()
            .find(|f| f.name == field)
            .map(|f| f.ty)
    }

    /// The payload type of an enum case. `None` if the case does not exist, `Some(None)` if the
    /// case carries no payload.
    pub fn payload_type(
        &self,
        ty: &'ta MirTy<'ta>,
        case: &str,
    ) -> Option<Option<&'ta MirTy<'ta>>> {
        self.cases(ty)
            .into_iter()
            .find(|c| c.name == case)
            .map(|c| c.payload)
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::MirArena;
    use crate::context::{
        MirEnumCase, MirField, MirGenericEnvironment, MirNominalDecl, MirNominalKind,
        MirTypeContext,
    };
    use bumpalo::Bump;
    use tarn_macros::{assert_none, assert_some};

    fn declare_pair<'ta>(tcx: &mut MirTypeContext<'ta>) {
        let arena = tcx.arena();
        let decl = MirNominalDecl {
            name: arena.intern_str("Pair"),
            kind: MirNominalKind::Struct,
            type_parameters: 1,
            fields: vec![
                MirField {
                    name: arena.intern_str("first"),
                    ty: arena.get_parameter_ty(0),
                },
                MirField {
                    name: arena.intern_str("second"),
                    ty: arena.get_parameter_ty(0),
                },
            ],
            cases: vec![],
        };
        assert!(tcx.declare_nominal(decl));
    }

    #[test]
    fn test_field_types_are_substituted() {
        let bump = Bump::new();
        let mut tcx = MirTypeContext::new(MirArena::new(&bump));
        declare_pair(&mut tcx);
        let i32_ty = tcx.arena().get_integer_ty(32);
        let pair = tcx.arena().get_nominal_ty("Pair", &[i32_ty]);
        let field = assert_some!(tcx.field_type(pair, "second"));
        assert!(std::ptr::eq(field, i32_ty));
        assert_none!(tcx.field_type(pair, "third"));
        assert!(tcx.is_trivial(pair));
    }

    #[test]
    fn test_map_into_context_resolves_parameters() {
        let bump = Bump::new();
        let mut tcx = MirTypeContext::new(MirArena::new(&bump));
        declare_pair(&mut tcx);
        let i8_ty = tcx.arena().get_integer_ty(8);
        let env = tcx.declare_environment(MirGenericEnvironment {
            substitutions: vec![i8_ty],
        });
        let param = tcx.arena().get_parameter_ty(0);
        let generic_pair = tcx.arena().get_nominal_ty("Pair", &[param]);
        let mapped = tcx.map_into_context(Some(env), generic_pair);
        assert_eq!(mapped.to_string(), "Pair<i8>");
        assert!(!tcx.has_type_parameter(mapped));
        // Concrete types need no environment.
        assert!(std::ptr::eq(tcx.map_into_context(None, i8_ty), i8_ty));
    }

    #[test]
    #[should_panic(expected = "expected a generic environment")]
    fn test_map_into_context_without_environment() {
        let bump = Bump::new();
        let tcx = MirTypeContext::new(MirArena::new(&bump));
        let param = tcx.arena().get_parameter_ty(0);
        tcx.map_into_context(None, param);
    }

    #[test]
    fn test_optional_cases() {
        let bump = Bump::new();
        let mut tcx = MirTypeContext::new(MirArena::new(&bump));
        let node = MirNominalDecl {
            name: tcx.arena().intern_str("Node"),
            kind: MirNominalKind::Class,
            type_parameters: 0,
            fields: vec![],
            cases: vec![],
        };
        tcx.declare_nominal(node);
        let shape = MirNominalDecl {
            name: tcx.arena().intern_str("Shape"),
            kind: MirNominalKind::Enum,
            type_parameters: 0,
            fields: vec![],
            cases: vec![MirEnumCase {
                name: tcx.arena().intern_str("circle"),
                payload: Some(tcx.arena().get_integer_ty(64)),
            }],
        };
        tcx.declare_nominal(shape);
        let node_ty = tcx.arena().get_nominal_ty("Node", &[]);
        let optional = tcx.arena().get_optional_ty(node_ty);
        let payload = assert_some!(tcx.payload_type(optional, "some"));
        assert!(payload.is_some_and(|p| std::ptr::eq(p, node_ty)));
        assert_none!(assert_some!(tcx.payload_type(optional, "none")));
        assert!(tcx.is_class(node_ty));
        assert!(!tcx.is_trivial(optional));
        let shape_ty = tcx.arena().get_nominal_ty("Shape", &[]);
        assert!(tcx.is_trivial(shape_ty));
    }
}
