//! Parser for the textual MIR format.
//!
//! The format is the one produced by the [`textual_pass`](crate::textual_pass). Tokens and types
//! are recognized by the nom grammar in [`grammar`]; this module drives it item by item and
//! builds the module directly.
//!
//! Names may be used before they are defined: values and blocks within a function, functions and
//! globals within the module. References are recorded as placeholder ids while parsing and
//! resolved once the enclosing function or module is complete.

use crate::arena::MirArena;
use crate::body::{BlockId, FunctionId, GlobalId, MirBody, ValueId};
use crate::context::{
    GenericContextId, MirEnumCase, MirField, MirGenericEnvironment, MirNominalDecl,
    MirNominalKind,
};
use crate::error::{
    DuplicateBlockError, DuplicateSymbolError, DuplicateTypeError, DuplicateValueError,
    EmptyBodyError, ParseError, ParseResult, ResultCountError, SyntaxError, UndefinedBlockError,
    UndefinedSymbolError, UndefinedValueError, UnknownEnvironmentError, UnknownTypeError,
};
use crate::instruction::{
    LoadQualifier, MirAccessKind, MirApply, MirInstructionKind, MirMember, MirSwitchEnum,
    StoreQualifier,
};
use crate::parser::grammar::{
    block_name, case_name, environment_number, identifier, keyword, member, punct, qualifier,
    signed_number, skip, string_literal, symbol_name, ty, value_name, value_ty, ConventionTyExpr,
    FnTyExpr, PResult, TyExpr,
};
use crate::ty::{
    MirFunctionRepresentation, MirFunctionSignature, MirParameterInfo, MirResultInfo, MirTy,
    MirType, ParameterConvention, ResultConvention,
};
use crate::{MirFunction, MirGlobal, MirModule};
use miette::SourceSpan;
use nom::combinator::consumed;
use nom::multi::{separated_list0, separated_list1};
use nom::sequence::delimited;
use std::collections::HashMap;
use tarn_diagnostics::ice;

pub mod grammar;

/// Ids at or above this index are unresolved references.
const PLACEHOLDER: u32 = u32::MAX / 2;

/// Parse a module in the textual format, interning its types into the given arena.
pub fn parse_module<'ta>(source: &str, arena: MirArena<'ta>) -> ParseResult<MirModule<'ta>> {
    let mut parser = ModuleParser::new(source, arena);
    parser.parse_items()?;
    parser.finish()
}

/// Names bound and referenced within one body.
#[derive(Default)]
struct BodyScope<'s> {
    values: HashMap<&'s str, ValueId>,
    blocks: HashMap<&'s str, BlockId>,
    value_references: Vec<&'s str>,
    block_references: Vec<&'s str>,
}

impl<'s> BodyScope<'s> {
    fn reference_value(&mut self, name: &'s str) -> ValueId {
        self.value_references.push(name);
        ValueId(PLACEHOLDER + self.value_references.len() as u32 - 1)
    }

    fn reference_block(&mut self, name: &'s str) -> BlockId {
        self.block_references.push(name);
        BlockId(PLACEHOLDER + self.block_references.len() as u32 - 1)
    }
}

struct ModuleParser<'s, 'ta> {
    source: &'s str,
    rest: &'s str,
    module: MirModule<'ta>,
    function_references: Vec<&'s str>,
    global_references: Vec<&'s str>,
    nominal_mentions: Vec<&'s str>,
}

impl<'s, 'ta> ModuleParser<'s, 'ta> {
    fn new(source: &'s str, arena: MirArena<'ta>) -> Self {
        Self {
            source,
            rest: source,
            module: MirModule::new(crate::context::MirTypeContext::new(arena)),
            function_references: Vec::new(),
            global_references: Vec::new(),
            nominal_mentions: Vec::new(),
        }
    }

    fn arena(&self) -> &MirArena<'ta> {
        self.module.context.arena()
    }

    fn intern(&self, s: &str) -> &'ta str {
        self.arena().intern_str(s)
    }

    /// The span of a token, which must be a slice of the source.
    fn span_of(&self, token: &str) -> SourceSpan {
        let token = token.trim_start();
        let offset = token.as_ptr() as usize - self.source.as_ptr() as usize;
        (offset, token.len()).into()
    }

    /// A syntax error at the start of the given remaining input.
    fn syntax_error(&self, expected: &str, at: &str) -> ParseError {
        let at = at.trim_start();
        let offset = at.as_ptr() as usize - self.source.as_ptr() as usize;
        let length = at.chars().next().map_or(0, |c| c.len_utf8());
        ParseError::Syntax(SyntaxError {
            expected: expected.to_owned(),
            span: (offset, length).into(),
        })
    }

    fn token_error(&self, expected: &str, token: &str) -> ParseError {
        ParseError::Syntax(SyntaxError {
            expected: expected.to_owned(),
            span: self.span_of(token),
        })
    }

    /// Run a grammar rule on the remaining input, failing with a syntax error.
    fn expect<O>(
        &mut self,
        expected: &str,
        mut parser: impl FnMut(&'s str) -> PResult<'s, O>,
    ) -> ParseResult<O> {
        match parser(self.rest) {
            Ok((rest, output)) => {
                self.rest = rest;
                Ok(output)
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                Err(self.syntax_error(expected, e.input))
            }
            Err(nom::Err::Incomplete(_)) => {
                Err(self.syntax_error(expected, &self.source[self.source.len()..]))
            }
        }
    }

    /// Run a grammar rule, consuming input only if it matches.
    fn eat<O>(&mut self, mut parser: impl FnMut(&'s str) -> PResult<'s, O>) -> Option<O> {
        let (rest, output) = parser(self.rest).ok()?;
        self.rest = rest;
        Some(output)
    }

    fn peek<O>(&self, mut parser: impl FnMut(&'s str) -> PResult<'s, O>) -> bool {
        parser(self.rest).is_ok()
    }

    fn at_end(&self) -> bool {
        skip(self.rest).is_ok_and(|(rest, _)| rest.is_empty())
    }

    fn parse_items(&mut self) -> ParseResult<()> {
        while !self.at_end() {
            let item = self.expect("item", identifier)?;
            match item {
                "struct" => self.parse_nominal(MirNominalKind::Struct)?,
                "enum" => self.parse_nominal(MirNominalKind::Enum)?,
                "class" => self.parse_nominal(MirNominalKind::Class)?,
                "generic_env" => self.parse_environment()?,
                "global" => self.parse_global()?,
                "fn" => self.parse_function()?,
                _ => return Err(self.token_error("item", item)),
            }
        }
        Ok(())
    }

    /// Check the names that could only be resolved once the whole module is known.
    fn finish(mut self) -> ParseResult<MirModule<'ta>> {
        for name in &self.nominal_mentions {
            if self.module.context.nominal(name).is_none() {
                return Err(ParseError::UnknownType(UnknownTypeError {
                    name: (*name).to_owned(),
                    span: self.span_of(name),
                }));
            }
        }
        let functions = self
            .function_references
            .iter()
            .map(|name| {
                self.module
                    .find_function(name)
                    .ok_or_else(|| self.undefined_symbol(name))
            })
            .collect::<ParseResult<Vec<_>>>()?;
        let globals = self
            .global_references
            .iter()
            .map(|name| {
                self.module
                    .find_global(name)
                    .ok_or_else(|| self.undefined_symbol(name))
            })
            .collect::<ParseResult<Vec<_>>>()?;
        let bodies = self
            .module
            .functions
            .iter_mut()
            .filter_map(|f| f.body.as_mut())
            .chain(
                self.module
                    .globals
                    .iter_mut()
                    .filter_map(|g| g.initializer.as_mut()),
            );
        for body in bodies {
            for inst in body.instructions_in_order() {
                match &mut body.instruction_mut(inst).kind {
                    MirInstructionKind::FunctionRef { function } => {
                        *function = functions[(function.0 - PLACEHOLDER) as usize];
                    }
                    MirInstructionKind::AllocGlobal { global }
                    | MirInstructionKind::GlobalAddr { global }
                    | MirInstructionKind::GlobalValue { global } => {
                        *global = globals[(global.0 - PLACEHOLDER) as usize];
                    }
                    _ => {}
                }
            }
        }
        Ok(self.module)
    }

    fn undefined_symbol(&self, name: &str) -> ParseError {
        ParseError::UndefinedSymbol(UndefinedSymbolError {
            name: name.to_owned(),
            span: self.span_of(name),
        })
    }

    fn parse_nominal(&mut self, kind: MirNominalKind) -> ParseResult<()> {
        let name = self.expect("type name", identifier)?;
        let type_parameters = self
            .eat(delimited(punct("<"), separated_list1(punct(","), ty), punct(">")))
            .map_or(0, |p| p.len() as u32);
        self.expect("`{`", punct("{"))?;
        let mut fields = Vec::new();
        let mut cases = Vec::new();
        if self.eat(punct("}")).is_none() {
            loop {
                let member_name = self.expect("member name", identifier)?;
                let member_name = self.intern(member_name);
                if kind == MirNominalKind::Enum {
                    let payload = match self.eat(punct("(")) {
                        Some(_) => {
                            let payload = self.parse_ty()?;
                            self.expect("`)`", punct(")"))?;
                            Some(payload)
                        }
                        None => None,
                    };
                    cases.push(MirEnumCase {
                        name: member_name,
                        payload,
                    });
                } else {
                    self.expect("`:`", punct(":"))?;
                    let ty = self.parse_ty()?;
                    fields.push(MirField {
                        name: member_name,
                        ty,
                    });
                }
                if self.eat(punct(",")).is_none() {
                    break;
                }
            }
            self.expect("`}`", punct("}"))?;
        }
        let decl = MirNominalDecl {
            name: self.intern(name),
            kind,
            type_parameters,
            fields,
            cases,
        };
        if !self.module.context.declare_nominal(decl) {
            return Err(ParseError::DuplicateType(DuplicateTypeError {
                name: name.to_owned(),
                span: self.span_of(name),
            }));
        }
        Ok(())
    }

    fn parse_environment(&mut self) -> ParseResult<()> {
        self.expect("`#`", punct("#"))?;
        let (text, id) = self.expect("environment number", environment_number)?;
        if id as usize != self.module.context.environments.len() {
            return Err(ParseError::UnknownEnvironment(UnknownEnvironmentError {
                id,
                span: self.span_of(text),
            }));
        }
        self.expect("`=`", punct("="))?;
        let substitutions = self.expect(
            "list of types",
            delimited(punct("["), separated_list0(punct(","), ty), punct("]")),
        )?;
        let substitutions = substitutions
            .iter()
            .map(|t| self.lower_ty(t))
            .collect::<ParseResult<Vec<_>>>()?;
        self.module
            .context
            .declare_environment(MirGenericEnvironment { substitutions });
        Ok(())
    }

    fn parse_global(&mut self) -> ParseResult<()> {
        let name = self.expect("global name", symbol_name)?;
        if self.module.find_global(name).is_some() {
            return Err(self.duplicate_symbol(name));
        }
        self.expect("`:`", punct(":"))?;
        let ty = self.parse_ty()?;
        let initializer = match self.eat(punct("=")) {
            Some(_) => {
                self.expect("`{`", punct("{"))?;
                let mut body = MirBody::new();
                let entry = body.add_block();
                let mut scope = BodyScope::default();
                while self.eat(punct("}")).is_none() {
                    self.parse_instruction(&mut body, &mut scope, entry)?;
                }
                self.resolve_body(&mut body, &scope)?;
                Some(body)
            }
            None => None,
        };
        let global = MirGlobal {
            name: self.intern(name),
            ty,
            initializer,
        };
        self.module.add_global(global);
        Ok(())
    }

    fn duplicate_symbol(&self, name: &str) -> ParseError {
        ParseError::DuplicateSymbol(DuplicateSymbolError {
            name: name.to_owned(),
            span: self.span_of(name),
        })
    }

    fn parse_function(&mut self) -> ParseResult<()> {
        let name = self.expect("function name", symbol_name)?;
        if self.module.find_function(name).is_some() {
            return Err(self.duplicate_symbol(name));
        }
        let generic_context = match self.eat(punct("[")) {
            Some(_) => {
                self.expect("`env`", keyword("env"))?;
                self.expect("`#`", punct("#"))?;
                let (text, id) = self.expect("environment number", environment_number)?;
                self.expect("`]`", punct("]"))?;
                Some(self.environment(text, id)?)
            }
            None => None,
        };
        self.expect("`:`", punct(":"))?;
        let (text, expr) = self.expect("function type", consumed(ty))?;
        let ty = self.lower_ty(&expr)?;
        if !ty.is_function() {
            return Err(self.token_error("function type", text));
        }
        let body = match self.eat(punct("{")) {
            Some(_) => Some(self.parse_function_body(name)?),
            None => None,
        };
        let function = MirFunction {
            name: self.intern(name),
            ty,
            generic_context,
            body,
        };
        self.module.add_function(function);
        Ok(())
    }

    fn environment(&self, text: &str, id: u32) -> ParseResult<GenericContextId> {
        if id as usize >= self.module.context.environments.len() {
            return Err(ParseError::UnknownEnvironment(UnknownEnvironmentError {
                id,
                span: self.span_of(text),
            }));
        }
        Ok(GenericContextId(id))
    }

    fn parse_function_body(&mut self, name: &'s str) -> ParseResult<MirBody<'ta>> {
        let mut body = MirBody::new();
        let mut scope = BodyScope::default();
        let mut current = None;
        while self.eat(punct("}")).is_none() {
            if let Some(label) = self.eat(block_name) {
                current = Some(self.parse_block_header(&mut body, &mut scope, label)?);
                continue;
            }
            let Some(block) = current else {
                return Err(self.syntax_error("block label", self.rest));
            };
            self.parse_instruction(&mut body, &mut scope, block)?;
        }
        if body.block_count() == 0 {
            return Err(ParseError::EmptyBody(EmptyBodyError {
                name: name.to_owned(),
                span: self.span_of(name),
            }));
        }
        self.resolve_body(&mut body, &scope)?;
        Ok(body)
    }

    fn parse_block_header(
        &mut self,
        body: &mut MirBody<'ta>,
        scope: &mut BodyScope<'s>,
        label: &'s str,
    ) -> ParseResult<BlockId> {
        if scope.blocks.contains_key(label) {
            return Err(ParseError::DuplicateBlock(DuplicateBlockError {
                name: label.to_owned(),
                span: self.span_of(label),
            }));
        }
        let block = body.add_block();
        scope.blocks.insert(label, block);
        if self.eat(punct("(")).is_some() {
            loop {
                let name = self.expect("value name", value_name)?;
                self.expect("`:`", punct(":"))?;
                let ty = self.parse_value_ty()?;
                let argument = body.add_block_argument(block, ty);
                self.bind_value(scope, name, argument)?;
                if self.eat(punct(",")).is_none() {
                    break;
                }
            }
            self.expect("`)`", punct(")"))?;
        }
        self.expect("`:`", punct(":"))?;
        Ok(block)
    }

    fn bind_value(
        &self,
        scope: &mut BodyScope<'s>,
        name: &'s str,
        value: ValueId,
    ) -> ParseResult<()> {
        if scope.values.insert(name, value).is_some() {
            return Err(ParseError::DuplicateValue(DuplicateValueError {
                name: name.to_owned(),
                span: self.span_of(name),
            }));
        }
        Ok(())
    }

    /// Replace the placeholder operands and successors of a body with the values and blocks
    /// they name.
    fn resolve_body(&self, body: &mut MirBody<'ta>, scope: &BodyScope<'s>) -> ParseResult<()> {
        for inst in body.instructions_in_order() {
            let kind = &mut body.instruction_mut(inst).kind;
            for operand in kind.operands_mut() {
                let name = operand
                    .0
                    .checked_sub(PLACEHOLDER)
                    .and_then(|i| scope.value_references.get(i as usize))
                    .unwrap_or_else(|| ice!("operand {} was not parsed from source", operand));
                *operand = *scope.values.get(name).ok_or_else(|| {
                    ParseError::UndefinedValue(UndefinedValueError {
                        name: (*name).to_owned(),
                        span: self.span_of(name),
                    })
                })?;
            }
            for successor in kind.successors_mut() {
                let name = successor
                    .0
                    .checked_sub(PLACEHOLDER)
                    .and_then(|i| scope.block_references.get(i as usize))
                    .unwrap_or_else(|| ice!("successor {} was not parsed from source", successor));
                *successor = *scope.blocks.get(name).ok_or_else(|| {
                    ParseError::UndefinedBlock(UndefinedBlockError {
                        name: (*name).to_owned(),
                        span: self.span_of(name),
                    })
                })?;
            }
        }
        Ok(())
    }

    fn parse_ty(&mut self) -> ParseResult<&'ta MirTy<'ta>> {
        let expr = self.expect("type", ty)?;
        self.lower_ty(&expr)
    }

    fn parse_value_ty(&mut self) -> ParseResult<MirType<'ta>> {
        let expr = self.expect("type", value_ty)?;
        let ty = self.lower_ty(&expr.ty)?;
        Ok(if expr.address {
            MirType::address(ty)
        } else {
            MirType::object(ty)
        })
    }

    /// `: T`, the result type of an instruction.
    fn type_annotation(&mut self) -> ParseResult<MirType<'ta>> {
        self.expect("`:`", punct(":"))?;
        self.parse_value_ty()
    }

    fn lower_ty(&mut self, expr: &TyExpr<'s>) -> ParseResult<&'ta MirTy<'ta>> {
        let ty = match expr {
            TyExpr::Integer(bits) => self.arena().get_integer_ty(*bits),
            TyExpr::RawPointer => self.arena().get_raw_pointer_ty(),
            TyExpr::Token => self.arena().get_token_ty(),
            TyExpr::Tuple(elements) => {
                let elements = elements
                    .iter()
                    .map(|e| self.lower_ty(e))
                    .collect::<ParseResult<Vec<_>>>()?;
                self.arena().get_tuple_ty(&elements)
            }
            TyExpr::Optional(wrapped) => {
                let wrapped = self.lower_ty(wrapped)?;
                self.arena().get_optional_ty(wrapped)
            }
            TyExpr::Parameter(index) => self.arena().get_parameter_ty(*index),
            TyExpr::BlockStorage(captured) => {
                let captured = self.lower_ty(captured)?;
                self.arena().get_block_storage_ty(captured)
            }
            TyExpr::Function(f) => self.lower_function_ty(f)?,
            TyExpr::Nominal(name, arguments) => {
                self.nominal_mentions.push(*name);
                let arguments = arguments
                    .iter()
                    .map(|a| self.lower_ty(a))
                    .collect::<ParseResult<Vec<_>>>()?;
                self.arena().get_nominal_ty(name, &arguments)
            }
        };
        Ok(ty)
    }

    fn lower_function_ty(&mut self, f: &FnTyExpr<'s>) -> ParseResult<&'ta MirTy<'ta>> {
        let mut signature = MirFunctionSignature::thin(vec![], vec![]);
        if let Some((text, id)) = f.environment {
            signature.generic_context = Some(self.environment(text, id)?);
        }
        for attribute in &f.attributes {
            match *attribute {
                "yield_once" => signature.coroutine = true,
                "noescape" => signature.noescape = true,
                other => {
                    signature.representation = MirFunctionRepresentation::from_attribute(other)
                        .ok_or_else(|| self.token_error("function attribute", other))?;
                }
            }
        }
        for parameter in &f.parameters {
            let parameter = self.lower_parameter(parameter)?;
            signature.parameters.push(parameter);
        }
        if let Some(yields) = &f.yields {
            signature.coroutine = true;
            for y in yields {
                let y = self.lower_parameter(y)?;
                signature.yields.push(y);
            }
        }
        for result in &f.results {
            let result = self.lower_result(result)?;
            signature.results.push(result);
        }
        if let Some(error) = &f.error {
            signature.error = Some(self.lower_result(error)?);
        }
        Ok(self.arena().get_function_ty(signature))
    }

    fn lower_parameter(&mut self, p: &ConventionTyExpr<'s>) -> ParseResult<MirParameterInfo<'ta>> {
        let convention = ParameterConvention::from_spelling(p.convention)
            .ok_or_else(|| self.token_error("parameter convention", p.convention))?;
        Ok(MirParameterInfo::new(self.lower_ty(&p.ty)?, convention))
    }

    fn lower_result(&mut self, r: &ConventionTyExpr<'s>) -> ParseResult<MirResultInfo<'ta>> {
        let convention = ResultConvention::from_spelling(r.convention)
            .ok_or_else(|| self.token_error("result convention", r.convention))?;
        Ok(MirResultInfo::new(self.lower_ty(&r.ty)?, convention))
    }

    /// `(%result =)? opcode operands`
    fn parse_instruction(
        &mut self,
        body: &mut MirBody<'ta>,
        scope: &mut BodyScope<'s>,
        block: BlockId,
    ) -> ParseResult<()> {
        let names = if let Some(name) = self.eat(value_name) {
            vec![name]
        } else if let Some(names) = self.eat(delimited(
            punct("("),
            separated_list1(punct(","), value_name),
            punct(")"),
        )) {
            names
        } else {
            vec![]
        };
        if !names.is_empty() {
            self.expect("`=`", punct("="))?;
        }
        let opcode = self.expect("instruction", identifier)?;
        let (kind, result_types) = self.parse_operands(opcode, scope)?;
        if result_types.len() != names.len() {
            return Err(ParseError::ResultCount(ResultCountError {
                opcode: opcode.to_owned(),
                expected: result_types.len(),
                found: names.len(),
                span: self.span_of(opcode),
            }));
        }
        let inst = body.push_instruction(block, kind, result_types);
        let results = body.results(inst).to_vec();
        for (name, result) in names.into_iter().zip(results) {
            self.bind_value(scope, name, result)?;
        }
        Ok(())
    }

    fn value(&mut self, scope: &mut BodyScope<'s>) -> ParseResult<ValueId> {
        let name = self.expect("value", value_name)?;
        Ok(scope.reference_value(name))
    }

    fn values(&mut self, scope: &mut BodyScope<'s>) -> ParseResult<Vec<ValueId>> {
        let names = self.expect(
            "list of values",
            delimited(punct("("), separated_list0(punct(","), value_name), punct(")")),
        )?;
        Ok(names
            .into_iter()
            .map(|n| scope.reference_value(n))
            .collect())
    }

    fn block(&mut self, scope: &mut BodyScope<'s>) -> ParseResult<BlockId> {
        let name = self.expect("block", block_name)?;
        Ok(scope.reference_block(name))
    }

    /// `bbN` or `bbN(%a, ...)`
    fn destination(&mut self, scope: &mut BodyScope<'s>) -> ParseResult<(BlockId, Vec<ValueId>)> {
        let block = self.block(scope)?;
        let arguments = if self.peek(punct("(")) {
            self.values(scope)?
        } else {
            vec![]
        };
        Ok((block, arguments))
    }

    fn comma(&mut self) -> ParseResult<()> {
        self.expect("`,`", punct(","))?;
        Ok(())
    }

    fn member(&mut self) -> ParseResult<MirMember<'ta>> {
        let (owner, name) = self.expect("member reference", member)?;
        Ok(MirMember {
            owner: self.intern(owner),
            name: self.intern(name),
        })
    }

    fn case(&mut self) -> ParseResult<&'ta str> {
        let case = self.expect("enum case", case_name)?;
        Ok(self.intern(case))
    }

    fn function_reference(&mut self) -> ParseResult<FunctionId> {
        let name = self.expect("function name", symbol_name)?;
        self.function_references.push(name);
        Ok(FunctionId(
            PLACEHOLDER + self.function_references.len() as u32 - 1,
        ))
    }

    fn global_reference(&mut self) -> ParseResult<GlobalId> {
        let name = self.expect("global name", symbol_name)?;
        self.global_references.push(name);
        Ok(GlobalId(PLACEHOLDER + self.global_references.len() as u32 - 1))
    }

    /// `%callee(%a, ...) : fn(...)`
    fn apply(&mut self, scope: &mut BodyScope<'s>) -> ParseResult<MirApply<'ta>> {
        let callee = self.value(scope)?;
        let arguments = self.values(scope)?;
        self.expect("`:`", punct(":"))?;
        let (text, expr) = self.expect("function type", consumed(ty))?;
        let callee_ty = self.lower_ty(&expr)?;
        if !callee_ty.is_function() {
            return Err(self.token_error("function type", text));
        }
        Ok(MirApply {
            callee,
            callee_ty,
            arguments,
        })
    }

    fn load_qualifier(&mut self) -> ParseResult<LoadQualifier> {
        let q = self.expect("load qualifier", qualifier)?;
        match q {
            "take" => Ok(LoadQualifier::Take),
            "copy" => Ok(LoadQualifier::Copy),
            "trivial" => Ok(LoadQualifier::Trivial),
            _ => Err(self.token_error("`take`, `copy` or `trivial`", q)),
        }
    }

    fn store_qualifier(&mut self) -> ParseResult<StoreQualifier> {
        let q = self.expect("store qualifier", qualifier)?;
        match q {
            "init" => Ok(StoreQualifier::Init),
            "assign" => Ok(StoreQualifier::Assign),
            "trivial" => Ok(StoreQualifier::Trivial),
            _ => Err(self.token_error("`init`, `assign` or `trivial`", q)),
        }
    }

    /// An optional `[flag]` that may only be spelled one way.
    fn flag(&mut self, flag: &str) -> ParseResult<bool> {
        if !self.peek(punct("[")) {
            return Ok(false);
        }
        let q = self.expect("qualifier", qualifier)?;
        if q != flag {
            return Err(self.token_error(flag, q));
        }
        Ok(true)
    }

    fn switch(&mut self, scope: &mut BodyScope<'s>) -> ParseResult<MirSwitchEnum<'ta>> {
        let operand = self.value(scope)?;
        let mut cases = Vec::new();
        let mut default = None;
        while self.eat(punct(",")).is_some() {
            if self.eat(keyword("default")).is_some() {
                default = Some(self.block(scope)?);
                break;
            }
            self.expect("`case` or `default`", keyword("case"))?;
            let case = self.case()?;
            self.expect("`:`", punct(":"))?;
            let block = self.block(scope)?;
            cases.push((case, block));
        }
        Ok(MirSwitchEnum {
            operand,
            cases,
            default,
        })
    }

    fn parse_operands(
        &mut self,
        opcode: &'s str,
        scope: &mut BodyScope<'s>,
    ) -> ParseResult<(MirInstructionKind<'ta>, Vec<MirType<'ta>>)> {
        use MirInstructionKind as K;
        let parsed = match opcode {
            "apply" => {
                let apply = self.apply(scope)?;
                let f = apply
                    .callee_ty
                    .as_function()
                    .unwrap_or_else(|| ice!("callee type is not a function type"));
                let result = MirType::object(self.module.context.direct_result_type(f));
                (K::Apply(apply), vec![result])
            }
            "begin_apply" => {
                let apply = self.apply(scope)?;
                let f = apply
                    .callee_ty
                    .as_function()
                    .unwrap_or_else(|| ice!("callee type is not a function type"));
                let token = MirType::object(self.arena().get_token_ty());
                let results = f
                    .yields
                    .iter()
                    .map(|y| y.storage_type())
                    .chain(std::iter::once(token))
                    .collect();
                (K::BeginApply(apply), results)
            }
            "try_apply" => {
                let apply = self.apply(scope)?;
                self.comma()?;
                self.expect("`normal`", keyword("normal"))?;
                let normal = self.block(scope)?;
                self.comma()?;
                self.expect("`error`", keyword("error"))?;
                let error = self.block(scope)?;
                (
                    K::TryApply {
                        apply,
                        normal,
                        error,
                    },
                    vec![],
                )
            }
            "partial_apply" => {
                let apply = self.apply(scope)?;
                self.expect("`as`", keyword("as"))?;
                let closure = self.parse_value_ty()?;
                (K::PartialApply(apply), vec![closure])
            }
            "end_apply" => (K::EndApply { token: self.value(scope)? }, vec![]),
            "abort_apply" => (K::AbortApply { token: self.value(scope)? }, vec![]),
            "class_method" | "super_method" => {
                let operand = self.value(scope)?;
                self.comma()?;
                let member = self.member()?;
                let ty = self.type_annotation()?;
                let kind = if opcode == "class_method" {
                    K::ClassMethod { operand, member }
                } else {
                    K::SuperMethod { operand, member }
                };
                (kind, vec![ty])
            }
            "witness_method" => {
                let lookup = self.parse_ty()?;
                self.comma()?;
                let member = self.member()?;
                let ty = self.type_annotation()?;
                (K::WitnessMethod { lookup, member }, vec![ty])
            }
            "function_ref" => {
                let function = self.function_reference()?;
                let ty = self.type_annotation()?;
                (K::FunctionRef { function }, vec![ty])
            }
            "thin_to_thick_function"
            | "convert_function"
            | "convert_escape_to_noescape"
            | "pointer_to_address"
            | "unchecked_addr_cast"
            | "unchecked_bitwise_cast"
            | "project_block_storage"
            | "ref_tail_addr" => {
                let operand = self.value(scope)?;
                let ty = self.type_annotation()?;
                let kind = match opcode {
                    "thin_to_thick_function" => K::ThinToThickFunction { operand },
                    "convert_function" => K::ConvertFunction { operand },
                    "convert_escape_to_noescape" => K::ConvertEscapeToNoEscape { operand },
                    "pointer_to_address" => K::PointerToAddress { operand },
                    "unchecked_addr_cast" => K::UncheckedAddrCast { operand },
                    "unchecked_bitwise_cast" => K::UncheckedBitwiseCast { operand },
                    "project_block_storage" => K::ProjectBlockStorage { operand },
                    _ => K::RefTailAddr { operand },
                };
                (kind, vec![ty])
            }
            "mark_dependence" => {
                let value = self.value(scope)?;
                self.expect("`on`", keyword("on"))?;
                let base = self.value(scope)?;
                let ty = self.type_annotation()?;
                (K::MarkDependence { value, base }, vec![ty])
            }
            "builtin" => {
                let name = self.expect("builtin name", string_literal)?;
                let name = self.intern(name);
                let arguments = self.values(scope)?;
                let ty = self.type_annotation()?;
                (K::Builtin { name, arguments }, vec![ty])
            }
            "alloc_global" => (
                K::AllocGlobal {
                    global: self.global_reference()?,
                },
                vec![],
            ),
            "global_addr" | "global_value" => {
                let global = self.global_reference()?;
                let ty = self.type_annotation()?;
                let kind = if opcode == "global_addr" {
                    K::GlobalAddr { global }
                } else {
                    K::GlobalValue { global }
                };
                (kind, vec![ty])
            }
            "integer_literal" => {
                let value = self.expect("integer", signed_number)?;
                let ty = self.type_annotation()?;
                (K::IntegerLiteral { value }, vec![ty])
            }
            "alloc_stack" => {
                let ty = self.parse_value_ty()?;
                (K::AllocStack, vec![ty.as_address()])
            }
            "dealloc_stack" | "destroy_addr" | "end_access" | "retain_value"
            | "release_value" | "retain_value_addr" | "release_value_addr" | "destroy_value"
            | "return" | "throw" => {
                let operand = self.value(scope)?;
                let kind = match opcode {
                    "dealloc_stack" => K::DeallocStack { operand },
                    "destroy_addr" => K::DestroyAddr { operand },
                    "end_access" => K::EndAccess { operand },
                    "retain_value" => K::RetainValue { operand },
                    "release_value" => K::ReleaseValue { operand },
                    "retain_value_addr" => K::RetainValueAddr { operand },
                    "release_value_addr" => K::ReleaseValueAddr { operand },
                    "destroy_value" => K::DestroyValue { operand },
                    "return" => K::Return { operand },
                    _ => K::Throw { operand },
                };
                (kind, vec![])
            }
            "load" => {
                let qualifier = self.load_qualifier()?;
                let address = self.value(scope)?;
                let ty = self.type_annotation()?;
                (K::Load { address, qualifier }, vec![ty])
            }
            "store" => {
                let source = self.value(scope)?;
                self.expect("`to`", keyword("to"))?;
                let qualifier = self.store_qualifier()?;
                let destination = self.value(scope)?;
                (
                    K::Store {
                        source,
                        destination,
                        qualifier,
                    },
                    vec![],
                )
            }
            "copy_addr" => {
                let take = self.flag("take")?;
                let source = self.value(scope)?;
                self.expect("`to`", keyword("to"))?;
                let initialize = self.flag("init")?;
                let destination = self.value(scope)?;
                (
                    K::CopyAddr {
                        source,
                        destination,
                        take,
                        initialize,
                    },
                    vec![],
                )
            }
            "tuple" | "struct" => {
                let elements = self.values(scope)?;
                let ty = self.type_annotation()?;
                let kind = if opcode == "tuple" {
                    K::Tuple { elements }
                } else {
                    K::Struct { elements }
                };
                (kind, vec![ty])
            }
            "tuple_extract" | "tuple_element_addr" => {
                let operand = self.value(scope)?;
                self.comma()?;
                let index = self.expect("element index", grammar::number)?;
                let ty = self.type_annotation()?;
                let kind = if opcode == "tuple_extract" {
                    K::TupleExtract { operand, index }
                } else {
                    K::TupleElementAddr { operand, index }
                };
                (kind, vec![ty])
            }
            "struct_extract" | "struct_element_addr" | "ref_element_addr" => {
                let operand = self.value(scope)?;
                self.comma()?;
                let field = self.member()?;
                let ty = self.type_annotation()?;
                let kind = match opcode {
                    "struct_extract" => K::StructExtract { operand, field },
                    "struct_element_addr" => K::StructElementAddr { operand, field },
                    _ => K::RefElementAddr { operand, field },
                };
                (kind, vec![ty])
            }
            "enum" => {
                let case = self.case()?;
                let payload = match self.eat(punct("(")) {
                    Some(_) => {
                        let payload = self.value(scope)?;
                        self.expect("`)`", punct(")"))?;
                        Some(payload)
                    }
                    None => None,
                };
                let ty = self.type_annotation()?;
                (K::Enum { case, payload }, vec![ty])
            }
            "unchecked_enum_data" | "unchecked_take_enum_data_addr" => {
                let operand = self.value(scope)?;
                self.comma()?;
                let case = self.case()?;
                let ty = self.type_annotation()?;
                let kind = if opcode == "unchecked_enum_data" {
                    K::UncheckedEnumData { operand, case }
                } else {
                    K::UncheckedTakeEnumDataAddr { operand, case }
                };
                (kind, vec![ty])
            }
            "begin_access" => {
                let q = self.expect("access kind", qualifier)?;
                let access = match q {
                    "read" => MirAccessKind::Read,
                    "modify" => MirAccessKind::Modify,
                    _ => return Err(self.token_error("`read` or `modify`", q)),
                };
                let operand = self.value(scope)?;
                let ty = self.type_annotation()?;
                (K::BeginAccess { operand, access }, vec![ty])
            }
            "debug_value" | "debug_value_addr" => {
                let operand = self.value(scope)?;
                self.comma()?;
                self.expect("`name`", keyword("name"))?;
                let name = self.expect("variable name", string_literal)?;
                let name = self.intern(name);
                let kind = if opcode == "debug_value" {
                    K::DebugValue { operand, name }
                } else {
                    K::DebugValueAddr { operand, name }
                };
                (kind, vec![])
            }
            "yield" => {
                let values = self.values(scope)?;
                self.comma()?;
                self.expect("`resume`", keyword("resume"))?;
                let resume = self.block(scope)?;
                self.comma()?;
                self.expect("`unwind`", keyword("unwind"))?;
                let unwind = self.block(scope)?;
                (
                    K::Yield {
                        values,
                        resume,
                        unwind,
                    },
                    vec![],
                )
            }
            "unwind" => (K::Unwind, vec![]),
            "unreachable" => (K::Unreachable, vec![]),
            "br" => {
                let (destination, arguments) = self.destination(scope)?;
                (
                    K::Branch {
                        destination,
                        arguments,
                    },
                    vec![],
                )
            }
            "cond_br" => {
                let condition = self.value(scope)?;
                self.comma()?;
                let (true_destination, true_arguments) = self.destination(scope)?;
                self.comma()?;
                let (false_destination, false_arguments) = self.destination(scope)?;
                (
                    K::CondBranch {
                        condition,
                        true_destination,
                        true_arguments,
                        false_destination,
                        false_arguments,
                    },
                    vec![],
                )
            }
            "switch_enum" => (K::SwitchEnum(self.switch(scope)?), vec![]),
            "switch_enum_addr" => (K::SwitchEnumAddr(self.switch(scope)?), vec![]),
            _ => return Err(self.token_error("instruction", opcode)),
        };
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::MirArena;
    use crate::error::ParseError;
    use crate::instruction::MirInstructionKind;
    use crate::parser::parse_module;
    use crate::textual_pass::MirModuleTextualPass;
    use bumpalo::Bump;
    use tarn_macros::{assert_err, assert_matches, assert_ok, assert_some};

    const MODULE: &str = r#"struct Big { a: i64, b: i64, c: i64, d: i64, e: i64 }

enum Maybe<$0> { none, some($0) }

generic_env #0 = [Big]

global @counter : i64 = {
  %0 = integer_literal -1 : i64
}

fn @unwrap : fn(@owned Maybe<Big>) -> (@owned Big) {
bb0(%0 : Maybe<Big>):
  switch_enum %0, case #some: bb1, default bb2
bb1(%1 : Big):
  br bb3(%1)
bb2:
  unreachable
bb3(%2 : Big):
  return %2
}

fn @main : fn() -> () {
bb0:
  %0 = function_ref @helper : fn(@in Big) -> ()
  %1 = alloc_stack Big
  %2 = global_addr @counter : *i64
  %3 = load [trivial] %2 : i64
  %4 = apply %0(%1) : fn(@in Big) -> ()
  dealloc_stack %1
  return %4
}

fn @helper : fn(@in Big) -> ()
"#;

    #[test]
    fn test_printing_a_parsed_module_reproduces_it() {
        let bump = Bump::new();
        let module = assert_ok!(parse_module(MODULE, MirArena::new(&bump)));
        assert_eq!(module.functions.len(), 3);
        assert_eq!(module.globals.len(), 1);
        assert_eq!(module.context.environments.len(), 1);
        let printed = MirModuleTextualPass::print_module(&module);
        assert_eq!(printed, MODULE);
    }

    #[test]
    fn test_forward_references_are_resolved() {
        let bump = Bump::new();
        let module = assert_ok!(parse_module(MODULE, MirArena::new(&bump)));
        let main = assert_some!(module.find_function("main"));
        let helper = assert_some!(module.find_function("helper"));
        let body = assert_some!(module.function(main).body.as_ref());
        let first = body.block(body.entry_block()).instructions[0];
        assert_matches!(body.kind(first), MirInstructionKind::FunctionRef { function } => {
            assert_eq!(*function, helper);
        });
        assert!(module.function(helper).is_declaration());
    }

    #[test]
    fn test_undefined_value_is_reported() {
        let bump = Bump::new();
        let source = "fn @f : fn() -> () {\nbb0:\n  return %7\n}\n";
        let err = assert_err!(parse_module(source, MirArena::new(&bump)));
        let err = assert_matches!(err, ParseError::UndefinedValue(e) => e);
        assert_eq!(err.name, "%7");
        assert_eq!(err.span.offset(), source.find("%7").unwrap_or_default());
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let bump = Bump::new();
        let source = "fn @f : fn(@owned Missing) -> ()\n";
        let err = assert_err!(parse_module(source, MirArena::new(&bump)));
        let err = assert_matches!(err, ParseError::UnknownType(e) => e);
        assert_eq!(err.name, "Missing");
    }

    #[test]
    fn test_result_count_must_match() {
        let bump = Bump::new();
        let source = "fn @f : fn() -> () {\nbb0:\n  %0 = dealloc_stack %1\n}\n";
        let err = assert_err!(parse_module(source, MirArena::new(&bump)));
        let err = assert_matches!(err, ParseError::ResultCount(e) => e);
        assert_eq!((err.expected, err.found), (0, 1));
    }

    #[test]
    fn test_duplicate_block_and_missing_environment() {
        let bump = Bump::new();
        let source = "fn @f : fn() -> () {\nbb0:\n  unreachable\nbb0:\n  unreachable\n}\n";
        let err = assert_err!(parse_module(source, MirArena::new(&bump)));
        assert_matches!(err, ParseError::DuplicateBlock(_) => ());

        let bump = Bump::new();
        let source = "fn @g [env #0] : fn() -> ()\n";
        let err = assert_err!(parse_module(source, MirArena::new(&bump)));
        let err = assert_matches!(err, ParseError::UnknownEnvironment(e) => e);
        assert_eq!(err.id, 0);
    }

    #[test]
    fn test_syntax_error_points_at_offending_token() {
        let bump = Bump::new();
        let source = "fn @f : fn() -> () {\nbb0:\n  frobnicate %0\n}\n";
        let err = assert_err!(parse_module(source, MirArena::new(&bump)));
        let err = assert_matches!(err, ParseError::Syntax(e) => e);
        assert_eq!(err.expected, "instruction");
        assert_eq!(err.span.offset(), source.find("frobnicate").unwrap_or_default());
    }
}
