use crate::context::GenericContextId;
use std::fmt::{Debug, Display};
use std::hash::{DefaultHasher, Hash, Hasher};

/// An interned identifier for a type.
///
/// This is used to represent a MirTy in the [`MirArena`](crate::arena::MirArena). The identifier
/// is a structural hash, so two structurally equal types always receive the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MirTyId(u64);

impl MirTyId {
    pub fn compute_integer_ty_id(bits: u32) -> Self {
        let mut hasher = DefaultHasher::new();
        (0x00, bits).hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn compute_raw_pointer_ty_id() -> Self {
        let mut hasher = DefaultHasher::new();
        0x01.hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn compute_token_ty_id() -> Self {
        let mut hasher = DefaultHasher::new();
        0x02.hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn compute_tuple_ty_id(elements: &[MirTyId]) -> Self {
        let mut hasher = DefaultHasher::new();
        (0x10, elements).hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn compute_function_ty_id(signature: &MirFunctionSignature) -> Self {
        let mut hasher = DefaultHasher::new();
        let parameters = signature
            .parameters
            .iter()
            .map(|p| (MirTyId::from(p.ty), p.convention))
            .collect::<Vec<_>>();
        let yields = signature
            .yields
            .iter()
            .map(|p| (MirTyId::from(p.ty), p.convention))
            .collect::<Vec<_>>();
        let results = signature
            .results
            .iter()
            .map(|r| (MirTyId::from(r.ty), r.convention))
            .collect::<Vec<_>>();
        let error = signature
            .error
            .map(|r| (MirTyId::from(r.ty), r.convention));
        (
            0x20,
            signature.representation,
            signature.coroutine,
            signature.noescape,
            signature.generic_context,
            parameters,
            yields,
            results,
            error,
        )
            .hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn compute_optional_ty_id(wrapped: &MirTyId) -> Self {
        let mut hasher = DefaultHasher::new();
        (0x30, wrapped).hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn compute_nominal_ty_id(name: &str, arguments: &[MirTyId]) -> Self {
        let mut hasher = DefaultHasher::new();
        (0x40, name, arguments).hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn compute_parameter_ty_id(index: u32) -> Self {
        let mut hasher = DefaultHasher::new();
        (0x50, index).hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn compute_block_storage_ty_id(captured: &MirTyId) -> Self {
        let mut hasher = DefaultHasher::new();
        (0x60, captured).hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl<'ta> From<&'ta MirTy<'ta>> for MirTyId {
    fn from(ty: &'ta MirTy<'ta>) -> Self {
        match ty {
            MirTy::Integer(t) => MirTyId::compute_integer_ty_id(t.bits),
            MirTy::RawPointer => MirTyId::compute_raw_pointer_ty_id(),
            MirTy::Token => MirTyId::compute_token_ty_id(),
            MirTy::Tuple(t) => {
                let elements = t
                    .elements
                    .iter()
                    .map(|e| MirTyId::from(*e))
                    .collect::<Vec<_>>();
                MirTyId::compute_tuple_ty_id(&elements)
            }
            MirTy::Function(f) => MirTyId::compute_function_ty_id(&f.to_signature()),
            MirTy::Optional(o) => MirTyId::compute_optional_ty_id(&MirTyId::from(o.wrapped)),
            MirTy::Nominal(n) => {
                let arguments = n
                    .arguments
                    .iter()
                    .map(|a| MirTyId::from(*a))
                    .collect::<Vec<_>>();
                MirTyId::compute_nominal_ty_id(n.name, &arguments)
            }
            MirTy::Parameter(p) => MirTyId::compute_parameter_ty_id(p.index),
            MirTy::BlockStorage(b) => {
                MirTyId::compute_block_storage_ty_id(&MirTyId::from(b.captured))
            }
        }
    }
}

/// A single formal type in the MIR.
///
/// Types are structural and interned, which means that two types are equal if and only if they
/// are the same reference. Whether a value of the type lives in a register or in memory is not
/// part of the formal type, see [`MirType`] for that.
#[must_use]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum MirTy<'ta> {
    /// A builtin integer with the given bit width, `i1`, `i8`, `i64` and so on.
    Integer(MirIntegerTy),
    /// An untyped pointer, `rawptr`.
    RawPointer,
    /// The continuation token of a coroutine call, `token`.
    Token,
    /// A tuple of zero or more elements. The empty tuple is the unit value.
    Tuple(MirTupleTy<'ta>),
    /// A function type with its calling convention.
    Function(MirFunctionTy<'ta>),
    /// The builtin optional wrapper, `Optional<T>`.
    ///
    /// It behaves like an enum with the cases `none` and `some(T)`.
    Optional(MirOptionalTy<'ta>),
    /// A struct, enum or class declared in the type context.
    Nominal(MirNominalTy<'ta>),
    /// A generic type parameter, `$0`, `$1` and so on.
    ///
    /// Parameters only become concrete by mapping them through a generic environment.
    Parameter(MirParameterTy),
    /// The opaque storage that a block closure captures its context into.
    BlockStorage(MirBlockStorageTy<'ta>),
}

impl Debug for MirTy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for MirTy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MirTy::Integer(t) => write!(f, "{}", t),
            MirTy::RawPointer => write!(f, "rawptr"),
            MirTy::Token => write!(f, "token"),
            MirTy::Tuple(t) => write!(f, "{}", t),
            MirTy::Function(t) => write!(f, "{}", t),
            MirTy::Optional(t) => write!(f, "{}", t),
            MirTy::Nominal(t) => write!(f, "{}", t),
            MirTy::Parameter(t) => write!(f, "{}", t),
            MirTy::BlockStorage(t) => write!(f, "{}", t),
        }
    }
}

impl<'ta> MirTy<'ta> {
    pub fn is_function(&self) -> bool {
        matches!(self, MirTy::Function(_))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, MirTy::Tuple(_))
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, MirTy::Optional(_))
    }

    pub fn is_nominal(&self) -> bool {
        matches!(self, MirTy::Nominal(_))
    }

    pub fn is_empty_tuple(&self) -> bool {
        matches!(self, MirTy::Tuple(t) if t.elements.is_empty())
    }

    pub fn as_function(&self) -> Option<&MirFunctionTy<'ta>> {
        match self {
            MirTy::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn tuple_elements(&self) -> Option<&'ta [&'ta MirTy<'ta>]> {
        match self {
            MirTy::Tuple(t) => Some(t.elements),
            _ => None,
        }
    }

    /// The wrapped type if this is an `Optional`.
    pub fn optional_wrapped(&self) -> Option<&'ta MirTy<'ta>> {
        match self {
            MirTy::Optional(o) => Some(o.wrapped),
            _ => None,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, PartialEq, Eq)]
pub struct MirIntegerTy {
    pub bits: u32,
}

impl Display for MirIntegerTy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i{}", self.bits)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirTupleTy<'ta> {
    pub elements: &'ta [&'ta MirTy<'ta>],
}

impl Display for MirTupleTy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let elements = self
            .elements
            .iter()
            .map(|e| format!("{}", e))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "({})", elements)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirOptionalTy<'ta> {
    pub wrapped: &'ta MirTy<'ta>,
}

impl Display for MirOptionalTy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Optional<{}>", self.wrapped)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirNominalTy<'ta> {
    pub name: &'ta str,
    pub arguments: &'ta [&'ta MirTy<'ta>],
}

impl Display for MirNominalTy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.arguments.is_empty() {
            return write!(f, "{}", self.name);
        }
        let arguments = self
            .arguments
            .iter()
            .map(|a| format!("{}", a))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}<{}>", self.name, arguments)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirParameterTy {
    pub index: u32,
}

impl Display for MirParameterTy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.index)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirBlockStorageTy<'ta> {
    pub captured: &'ta MirTy<'ta>,
}

impl Display for MirBlockStorageTy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@block_storage {}", self.captured)
    }
}

/// How a function value is represented at the machine level.
///
/// The representation decides which calling convention applies. Only native representations are
/// subject to large-value lowering.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirFunctionRepresentation {
    /// A plain function pointer without context.
    Thin,
    /// A function pointer paired with a reference-counted context.
    Thick,
    /// A native class or struct method.
    Method,
    /// A protocol witness.
    WitnessMethod,
    /// A C function pointer.
    CFunction,
    /// An Objective-C block.
    Block,
    /// An Objective-C method.
    ObjCMethod,
}

/// The language whose ABI governs a function representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirLanguage {
    Native,
    Foreign,
}

impl MirFunctionRepresentation {
    pub fn language(&self) -> MirLanguage {
        match self {
            Self::Thin | Self::Thick | Self::Method | Self::WitnessMethod => MirLanguage::Native,
            Self::CFunction | Self::Block | Self::ObjCMethod => MirLanguage::Foreign,
        }
    }

    /// Does a value of this representation carry a context word next to the function pointer?
    pub fn has_context(&self) -> bool {
        matches!(self, Self::Thick | Self::Block)
    }

    /// The attribute spelling in the textual format, or `None` for the default thin
    /// representation.
    pub fn attribute(&self) -> Option<&'static str> {
        match self {
            Self::Thin => None,
            Self::Thick => Some("thick"),
            Self::Method => Some("method"),
            Self::WitnessMethod => Some("witness_method"),
            Self::CFunction => Some("c"),
            Self::Block => Some("block"),
            Self::ObjCMethod => Some("objc_method"),
        }
    }

    pub fn from_attribute(attribute: &str) -> Option<Self> {
        match attribute {
            "thin" => Some(Self::Thin),
            "thick" => Some(Self::Thick),
            "method" => Some(Self::Method),
            "witness_method" => Some(Self::WitnessMethod),
            "c" => Some(Self::CFunction),
            "block" => Some(Self::Block),
            "objc_method" => Some(Self::ObjCMethod),
            _ => None,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterConvention {
    DirectOwned,
    DirectGuaranteed,
    IndirectIn,
    IndirectInGuaranteed,
    IndirectInout,
}

impl ParameterConvention {
    pub fn is_indirect(&self) -> bool {
        matches!(
            self,
            Self::IndirectIn | Self::IndirectInGuaranteed | Self::IndirectInout
        )
    }

    pub fn is_guaranteed(&self) -> bool {
        matches!(self, Self::DirectGuaranteed | Self::IndirectInGuaranteed)
    }

    pub fn spelling(&self) -> &'static str {
        match self {
            Self::DirectOwned => "@owned",
            Self::DirectGuaranteed => "@guaranteed",
            Self::IndirectIn => "@in",
            Self::IndirectInGuaranteed => "@in_guaranteed",
            Self::IndirectInout => "@inout",
        }
    }

    pub fn from_spelling(spelling: &str) -> Option<Self> {
        match spelling {
            "owned" => Some(Self::DirectOwned),
            "guaranteed" => Some(Self::DirectGuaranteed),
            "in" => Some(Self::IndirectIn),
            "in_guaranteed" => Some(Self::IndirectInGuaranteed),
            "inout" => Some(Self::IndirectInout),
            _ => None,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultConvention {
    Owned,
    Unowned,
    Indirect,
}

impl ResultConvention {
    pub fn spelling(&self) -> &'static str {
        match self {
            Self::Owned => "@owned",
            Self::Unowned => "@unowned",
            Self::Indirect => "@out",
        }
    }

    pub fn from_spelling(spelling: &str) -> Option<Self> {
        match spelling {
            "owned" => Some(Self::Owned),
            "unowned" => Some(Self::Unowned),
            "out" => Some(Self::Indirect),
            _ => None,
        }
    }
}

/// A parameter or yield of a function type.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy)]
pub struct MirParameterInfo<'ta> {
    pub ty: &'ta MirTy<'ta>,
    pub convention: ParameterConvention,
}

impl<'ta> MirParameterInfo<'ta> {
    pub fn new(ty: &'ta MirTy<'ta>, convention: ParameterConvention) -> Self {
        Self { ty, convention }
    }

    /// The type of the value that carries this parameter inside a function body.
    pub fn storage_type(&self) -> MirType<'ta> {
        if self.convention.is_indirect() {
            MirType::address(self.ty)
        } else {
            MirType::object(self.ty)
        }
    }

    pub fn with_type(&self, ty: &'ta MirTy<'ta>) -> Self {
        Self::new(ty, self.convention)
    }
}

impl PartialEq for MirParameterInfo<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ty, other.ty) && self.convention == other.convention
    }
}

impl Display for MirParameterInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.convention.spelling(), self.ty)
    }
}

/// A result of a function type.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy)]
pub struct MirResultInfo<'ta> {
    pub ty: &'ta MirTy<'ta>,
    pub convention: ResultConvention,
}

impl<'ta> MirResultInfo<'ta> {
    pub fn new(ty: &'ta MirTy<'ta>, convention: ResultConvention) -> Self {
        Self { ty, convention }
    }

    pub fn is_indirect(&self) -> bool {
        self.convention == ResultConvention::Indirect
    }

    pub fn storage_type(&self) -> MirType<'ta> {
        if self.is_indirect() {
            MirType::address(self.ty)
        } else {
            MirType::object(self.ty)
        }
    }

    pub fn with_type(&self, ty: &'ta MirTy<'ta>) -> Self {
        Self::new(ty, self.convention)
    }
}

impl PartialEq for MirResultInfo<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ty, other.ty) && self.convention == other.convention
    }
}

impl Display for MirResultInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.convention.spelling(), self.ty)
    }
}

/// An interned function type.
///
/// ```text
/// fn<#0> @thick @yield_once (@guaranteed Big, @owned i64) yields (@in_guaranteed Big) -> (@out Big)
/// ```
///
/// Results with the `@out` convention are returned through memory: in a function body they are
/// the leading entry block arguments, and at a call site they are the leading arguments.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug)]
pub struct MirFunctionTy<'ta> {
    pub representation: MirFunctionRepresentation,
    pub coroutine: bool,
    pub noescape: bool,
    pub generic_context: Option<GenericContextId>,
    pub parameters: &'ta [MirParameterInfo<'ta>],
    pub yields: &'ta [MirParameterInfo<'ta>],
    pub results: &'ta [MirResultInfo<'ta>],
    pub error: Option<MirResultInfo<'ta>>,
}

impl<'ta> MirFunctionTy<'ta> {
    pub fn language(&self) -> MirLanguage {
        self.representation.language()
    }

    pub fn is_polymorphic(&self) -> bool {
        self.generic_context.is_some()
    }

    pub fn indirect_results(&self) -> impl Iterator<Item = &MirResultInfo<'ta>> {
        self.results.iter().filter(|r| r.is_indirect())
    }

    pub fn direct_results(&self) -> impl Iterator<Item = &MirResultInfo<'ta>> {
        self.results.iter().filter(|r| !r.is_indirect())
    }

    pub fn single_result(&self) -> Option<&MirResultInfo<'ta>> {
        match self.results {
            [result] => Some(result),
            _ => None,
        }
    }

    /// The types of the arguments a body or call site of this function carries, indirect results
    /// first.
    pub fn argument_types(&self) -> Vec<MirType<'ta>> {
        self.indirect_results()
            .map(|r| r.storage_type())
            .chain(self.parameters.iter().map(|p| p.storage_type()))
            .collect()
    }

    /// Copy the function type into an editable signature.
    pub fn to_signature(&self) -> MirFunctionSignature<'ta> {
        MirFunctionSignature {
            representation: self.representation,
            coroutine: self.coroutine,
            noescape: self.noescape,
            generic_context: self.generic_context,
            parameters: self.parameters.to_vec(),
            yields: self.yields.to_vec(),
            results: self.results.to_vec(),
            error: self.error,
        }
    }
}

impl Display for MirFunctionTy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn")?;
        if let Some(context) = self.generic_context {
            write!(f, "<{}>", context)?;
        }
        let mut attributes = Vec::new();
        if let Some(attribute) = self.representation.attribute() {
            attributes.push(attribute);
        }
        if self.coroutine {
            attributes.push("yield_once");
        }
        if self.noescape {
            attributes.push("noescape");
        }
        for attribute in &attributes {
            write!(f, " @{}", attribute)?;
        }
        if !attributes.is_empty() {
            write!(f, " ")?;
        }
        let join = |items: Vec<String>| items.join(", ");
        write!(
            f,
            "({})",
            join(self.parameters.iter().map(|p| p.to_string()).collect())
        )?;
        if self.coroutine {
            write!(
                f,
                " yields ({})",
                join(self.yields.iter().map(|p| p.to_string()).collect())
            )?;
        }
        write!(
            f,
            " -> ({})",
            join(self.results.iter().map(|r| r.to_string()).collect())
        )?;
        if let Some(error) = self.error {
            write!(f, " throws {}", error)?;
        }
        Ok(())
    }
}

/// An owned, editable description of a function type.
///
/// The arena turns a signature into an interned [`MirFunctionTy`].
#[derive(Debug, Clone)]
pub struct MirFunctionSignature<'ta> {
    pub representation: MirFunctionRepresentation,
    pub coroutine: bool,
    pub noescape: bool,
    pub generic_context: Option<GenericContextId>,
    pub parameters: Vec<MirParameterInfo<'ta>>,
    pub yields: Vec<MirParameterInfo<'ta>>,
    pub results: Vec<MirResultInfo<'ta>>,
    pub error: Option<MirResultInfo<'ta>>,
}

impl<'ta> MirFunctionSignature<'ta> {
    pub fn thin(
        parameters: Vec<MirParameterInfo<'ta>>,
        results: Vec<MirResultInfo<'ta>>,
    ) -> Self {
        Self {
            representation: MirFunctionRepresentation::Thin,
            coroutine: false,
            noescape: false,
            generic_context: None,
            parameters,
            yields: vec![],
            results,
            error: None,
        }
    }
}

/// Whether a value is held directly or through its address.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirTypeCategory {
    Object,
    Address,
}

/// The type of an SSA value: a formal type together with its storage category.
///
/// An address type is printed as `*T`. Taking the address type of an address type yields the
/// same type, so there is no address-of-address.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Clone, Copy)]
pub struct MirType<'ta> {
    ty: &'ta MirTy<'ta>,
    category: MirTypeCategory,
}

impl<'ta> MirType<'ta> {
    pub fn object(ty: &'ta MirTy<'ta>) -> Self {
        Self {
            ty,
            category: MirTypeCategory::Object,
        }
    }

    pub fn address(ty: &'ta MirTy<'ta>) -> Self {
        Self {
            ty,
            category: MirTypeCategory::Address,
        }
    }

    pub fn ty(&self) -> &'ta MirTy<'ta> {
        self.ty
    }

    pub fn category(&self) -> MirTypeCategory {
        self.category
    }

    pub fn is_address(&self) -> bool {
        self.category == MirTypeCategory::Address
    }

    pub fn is_object(&self) -> bool {
        self.category == MirTypeCategory::Object
    }

    pub fn as_address(&self) -> Self {
        Self::address(self.ty)
    }

    pub fn as_object(&self) -> Self {
        Self::object(self.ty)
    }

    /// The same category with a different formal type.
    pub fn with_ty(&self, ty: &'ta MirTy<'ta>) -> Self {
        Self {
            ty,
            category: self.category,
        }
    }

    pub fn function_ty(&self) -> Option<&'ta MirFunctionTy<'ta>> {
        match self.ty {
            MirTy::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_function(&self) -> bool {
        self.ty.is_function()
    }

    pub fn optional_wrapped(&self) -> Option<Self> {
        self.ty.optional_wrapped().map(|w| self.with_ty(w))
    }
}

impl PartialEq for MirType<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.ty, other.ty) && self.category == other.category
    }
}

impl Eq for MirType<'_> {}

impl Hash for MirType<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.ty, state);
        self.category.hash(state);
    }
}

impl Debug for MirType<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for MirType<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.category {
            MirTypeCategory::Object => write!(f, "{}", self.ty),
            MirTypeCategory::Address => write!(f, "*{}", self.ty),
        }
    }
}
