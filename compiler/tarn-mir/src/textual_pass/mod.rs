//! Textual formatting for MIR modules.
//!
//! This module provides a Wadler-style pretty printer for MIR modules. Unlike the debug formats of
//! the earlier stages, the output is meant to be read back: everything the printer emits is
//! accepted by the [`parser`](crate::parser), and printing a parsed module again yields the same
//! text.
//!
//! Values are renumbered in block order, block arguments before instruction results, so that the
//! printed names do not depend on how many values a pass created and erased along the way.

use crate::body::{BlockId, InstId, MirBody, ValueId};
use crate::context::{MirGenericEnvironment, MirNominalDecl, MirNominalKind};
use crate::instruction::{MirApply, MirInstructionKind, MirSwitchEnum};
use crate::{MirFunction, MirGlobal, MirModule};
use pretty::{Arena, DocAllocator, DocBuilder};
use std::collections::HashMap;
use tarn_diagnostics::ice;

#[derive(Default)]
pub struct MirModuleTextualPass<'a> {
    arena: Arena<'a>,
}

pub type Document<'a> = DocBuilder<'a, Arena<'a>>;

/// The printed names of the values of one body.
struct ValueNames {
    names: HashMap<ValueId, usize>,
}

impl ValueNames {
    fn new(body: &MirBody) -> Self {
        let mut names = HashMap::new();
        for block in body.block_ids() {
            for argument in &body.block(block).arguments {
                names.insert(*argument, names.len());
            }
            for inst in &body.block(block).instructions {
                for result in body.results(*inst) {
                    names.insert(*result, names.len());
                }
            }
        }
        Self { names }
    }

    fn name(&self, value: ValueId) -> String {
        match self.names.get(&value) {
            Some(index) => format!("%{}", index),
            None => format!("<dead {}>", value),
        }
    }

    fn list(&self, values: &[ValueId]) -> String {
        values
            .iter()
            .map(|v| self.name(*v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl<'a> MirModuleTextualPass<'a> {
    pub fn format_doc_to_string(doc: Document<'a>) -> String {
        let mut w = Vec::new();
        doc.render(80, &mut w)
            .unwrap_or_else(|_| ice!("failed to render mir module"));
        String::from_utf8(w).unwrap_or_else(|_| ice!("rendered mir module is not utf-8"))
    }

    /// Render a module to text in one go.
    pub fn print_module(module: &MirModule) -> String {
        let pass = MirModuleTextualPass::default();
        let doc = pass.visit_module(module);
        MirModuleTextualPass::format_doc_to_string(doc)
    }

    pub fn visit_module(&'a self, module: &MirModule) -> Document<'a> {
        let nominals = module
            .context
            .nominals
            .iter()
            .map(|d| self.visit_nominal(d));
        let environments = module
            .context
            .environments
            .iter()
            .enumerate()
            .map(|(i, env)| self.visit_environment(i, env));
        let globals = module.globals.iter().map(|g| self.visit_global(module, g));
        let functions = module
            .functions
            .iter()
            .map(|f| self.visit_function(module, f));
        let items = nominals
            .chain(environments)
            .chain(globals)
            .chain(functions)
            .collect::<Vec<_>>();
        self.arena
            .intersperse(items, self.arena.hardline().append(self.arena.hardline()))
            .append(self.arena.hardline())
    }

    pub fn visit_nominal(&'a self, decl: &MirNominalDecl) -> Document<'a> {
        let keyword = match decl.kind {
            MirNominalKind::Struct => "struct",
            MirNominalKind::Enum => "enum",
            MirNominalKind::Class => "class",
        };
        let parameters = if decl.type_parameters == 0 {
            String::new()
        } else {
            let parameters = (0..decl.type_parameters)
                .map(|i| format!("${}", i))
                .collect::<Vec<_>>();
            format!("<{}>", parameters.join(", "))
        };
        let members = match decl.kind {
            MirNominalKind::Struct | MirNominalKind::Class => decl
                .fields
                .iter()
                .map(|f| format!("{}: {}", f.name, f.ty))
                .collect::<Vec<_>>(),
            MirNominalKind::Enum => decl
                .cases
                .iter()
                .map(|c| match c.payload {
                    Some(payload) => format!("{}({})", c.name, payload),
                    None => c.name.to_string(),
                })
                .collect(),
        };
        let body = if members.is_empty() {
            "{}".to_owned()
        } else {
            format!("{{ {} }}", members.join(", "))
        };
        self.arena
            .text(keyword)
            .append(self.arena.space())
            .append(self.arena.text(format!("{}{}", decl.name, parameters)))
            .append(self.arena.space())
            .append(self.arena.text(body))
    }

    pub fn visit_environment(&'a self, index: usize, env: &MirGenericEnvironment) -> Document<'a> {
        let substitutions = env
            .substitutions
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.arena
            .text("generic_env")
            .append(self.arena.space())
            .append(self.arena.text(format!("#{}", index)))
            .append(self.arena.text(" = "))
            .append(self.arena.text(format!("[{}]", substitutions)))
    }

    pub fn visit_global(&'a self, module: &MirModule, global: &MirGlobal) -> Document<'a> {
        let header = self
            .arena
            .text("global")
            .append(self.arena.space())
            .append(self.arena.text(format!("@{} : {}", global.name, global.ty)));
        let Some(initializer) = &global.initializer else {
            return header;
        };
        let names = ValueNames::new(initializer);
        let instructions = initializer
            .instructions_in_order()
            .into_iter()
            .map(|inst| {
                self.arena
                    .hardline()
                    .append(self.arena.text(self.format_instruction(
                        module,
                        initializer,
                        &names,
                        inst,
                    )))
            })
            .collect::<Vec<_>>();
        header
            .append(self.arena.text(" = {"))
            .append(self.arena.concat(instructions).nest(2))
            .append(self.arena.hardline())
            .append(self.arena.text("}"))
    }

    pub fn visit_function(&'a self, module: &MirModule, function: &MirFunction) -> Document<'a> {
        let environment = match function.generic_context {
            Some(context) => format!(" [env {}]", context),
            None => String::new(),
        };
        let header = self
            .arena
            .text("fn")
            .append(self.arena.space())
            .append(self.arena.text(format!(
                "@{}{} : {}",
                function.name, environment, function.ty
            )));
        let Some(body) = &function.body else {
            return header;
        };
        let names = ValueNames::new(body);
        let blocks = body
            .block_ids()
            .map(|block| {
                self.arena
                    .hardline()
                    .append(self.visit_block(module, body, &names, block))
            })
            .collect::<Vec<_>>();
        header
            .append(self.arena.text(" {"))
            .append(self.arena.concat(blocks))
            .append(self.arena.hardline())
            .append(self.arena.text("}"))
    }

    fn visit_block(
        &'a self,
        module: &MirModule,
        body: &MirBody,
        names: &ValueNames,
        block: BlockId,
    ) -> Document<'a> {
        let arguments = &body.block(block).arguments;
        let label = if arguments.is_empty() {
            format!("{}:", block)
        } else {
            let arguments = arguments
                .iter()
                .map(|a| format!("{} : {}", names.name(*a), body.value_ty(*a)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({}):", block, arguments)
        };
        let instructions = body
            .block(block)
            .instructions
            .iter()
            .map(|inst| {
                self.arena
                    .hardline()
                    .append(self.arena.text(self.format_instruction(module, body, names, *inst)))
            })
            .collect::<Vec<_>>();
        self.arena
            .text(label)
            .append(self.arena.concat(instructions).nest(2))
    }

    fn format_apply(&self, names: &ValueNames, apply: &MirApply) -> String {
        format!(
            "{}({}) : {}",
            names.name(apply.callee),
            names.list(&apply.arguments),
            apply.callee_ty
        )
    }

    fn format_switch(&self, names: &ValueNames, switch: &MirSwitchEnum) -> String {
        let mut parts = vec![names.name(switch.operand)];
        for (case, block) in &switch.cases {
            parts.push(format!("case #{}: {}", case, block));
        }
        if let Some(default) = switch.default {
            parts.push(format!("default {}", default));
        }
        parts.join(", ")
    }

    fn format_destination(names: &ValueNames, block: BlockId, arguments: &[ValueId]) -> String {
        if arguments.is_empty() {
            block.to_string()
        } else {
            format!("{}({})", block, names.list(arguments))
        }
    }

    /// Format a single instruction, including its result names.
    fn format_instruction(
        &self,
        module: &MirModule,
        body: &MirBody,
        names: &ValueNames,
        inst: InstId,
    ) -> String {
        let kind = body.kind(inst);
        let results = body.results(inst);
        let name = |v: &ValueId| names.name(*v);
        let result_ty = || match results {
            [result] => body.value_ty(*result).to_string(),
            _ => ice!("{} is expected to produce a single result", kind.opcode()),
        };
        let opcode = kind.opcode();
        let operands = match kind {
            MirInstructionKind::Apply(apply) | MirInstructionKind::BeginApply(apply) => {
                self.format_apply(names, apply)
            }
            MirInstructionKind::TryApply {
                apply,
                normal,
                error,
            } => format!(
                "{}, normal {}, error {}",
                self.format_apply(names, apply),
                normal,
                error
            ),
            MirInstructionKind::PartialApply(apply) => {
                format!("{} as {}", self.format_apply(names, apply), result_ty())
            }
            MirInstructionKind::EndApply { token } | MirInstructionKind::AbortApply { token } => {
                name(token)
            }
            MirInstructionKind::ClassMethod { operand, member }
            | MirInstructionKind::SuperMethod { operand, member } => {
                format!("{}, {} : {}", name(operand), member, result_ty())
            }
            MirInstructionKind::WitnessMethod { lookup, member } => {
                format!("{}, {} : {}", lookup, member, result_ty())
            }
            MirInstructionKind::FunctionRef { function } => {
                format!("@{} : {}", module.function(*function).name, result_ty())
            }
            MirInstructionKind::ThinToThickFunction { operand }
            | MirInstructionKind::ConvertFunction { operand }
            | MirInstructionKind::ConvertEscapeToNoEscape { operand }
            | MirInstructionKind::PointerToAddress { operand }
            | MirInstructionKind::UncheckedAddrCast { operand }
            | MirInstructionKind::UncheckedBitwiseCast { operand }
            | MirInstructionKind::ProjectBlockStorage { operand }
            | MirInstructionKind::RefTailAddr { operand } => {
                format!("{} : {}", name(operand), result_ty())
            }
            MirInstructionKind::MarkDependence { value, base } => {
                format!("{} on {} : {}", name(value), name(base), result_ty())
            }
            MirInstructionKind::Builtin { name: builtin, arguments } => {
                format!(
                    "\"{}\"({}) : {}",
                    builtin,
                    names.list(arguments),
                    result_ty()
                )
            }
            MirInstructionKind::AllocGlobal { global } => {
                format!("@{}", module.global(*global).name)
            }
            MirInstructionKind::GlobalAddr { global }
            | MirInstructionKind::GlobalValue { global } => {
                format!("@{} : {}", module.global(*global).name, result_ty())
            }
            MirInstructionKind::IntegerLiteral { value } => {
                format!("{} : {}", value, result_ty())
            }
            MirInstructionKind::AllocStack => match results {
                [result] => body.value_ty(*result).as_object().to_string(),
                _ => ice!("alloc_stack is expected to produce a single result"),
            },
            MirInstructionKind::DeallocStack { operand }
            | MirInstructionKind::DestroyAddr { operand }
            | MirInstructionKind::EndAccess { operand }
            | MirInstructionKind::RetainValue { operand }
            | MirInstructionKind::ReleaseValue { operand }
            | MirInstructionKind::RetainValueAddr { operand }
            | MirInstructionKind::ReleaseValueAddr { operand }
            | MirInstructionKind::DestroyValue { operand }
            | MirInstructionKind::Return { operand }
            | MirInstructionKind::Throw { operand } => name(operand),
            MirInstructionKind::Load { address, qualifier } => {
                format!("[{}] {} : {}", qualifier.spelling(), name(address), result_ty())
            }
            MirInstructionKind::Store {
                source,
                destination,
                qualifier,
            } => format!(
                "{} to [{}] {}",
                name(source),
                qualifier.spelling(),
                name(destination)
            ),
            MirInstructionKind::CopyAddr {
                source,
                destination,
                take,
                initialize,
            } => format!(
                "{}{} to {}{}",
                if *take { "[take] " } else { "" },
                name(source),
                if *initialize { "[init] " } else { "" },
                name(destination)
            ),
            MirInstructionKind::Tuple { elements } | MirInstructionKind::Struct { elements } => {
                format!("({}) : {}", names.list(elements), result_ty())
            }
            MirInstructionKind::TupleExtract { operand, index }
            | MirInstructionKind::TupleElementAddr { operand, index } => {
                format!("{}, {} : {}", name(operand), index, result_ty())
            }
            MirInstructionKind::StructExtract { operand, field }
            | MirInstructionKind::StructElementAddr { operand, field }
            | MirInstructionKind::RefElementAddr { operand, field } => {
                format!("{}, {} : {}", name(operand), field, result_ty())
            }
            MirInstructionKind::Enum { case, payload } => match payload {
                Some(payload) => format!("#{}({}) : {}", case, name(payload), result_ty()),
                None => format!("#{} : {}", case, result_ty()),
            },
            MirInstructionKind::UncheckedEnumData { operand, case }
            | MirInstructionKind::UncheckedTakeEnumDataAddr { operand, case } => {
                format!("{}, #{} : {}", name(operand), case, result_ty())
            }
            MirInstructionKind::BeginAccess { operand, access } => {
                format!("[{}] {} : {}", access.spelling(), name(operand), result_ty())
            }
            MirInstructionKind::DebugValue { operand, name: var }
            | MirInstructionKind::DebugValueAddr { operand, name: var } => {
                format!("{}, name \"{}\"", name(operand), var)
            }
            MirInstructionKind::Yield {
                values,
                resume,
                unwind,
            } => format!(
                "({}), resume {}, unwind {}",
                names.list(values),
                resume,
                unwind
            ),
            MirInstructionKind::Branch {
                destination,
                arguments,
            } => Self::format_destination(names, *destination, arguments),
            MirInstructionKind::CondBranch {
                condition,
                true_destination,
                true_arguments,
                false_destination,
                false_arguments,
            } => format!(
                "{}, {}, {}",
                name(condition),
                Self::format_destination(names, *true_destination, true_arguments),
                Self::format_destination(names, *false_destination, false_arguments)
            ),
            MirInstructionKind::SwitchEnum(switch) | MirInstructionKind::SwitchEnumAddr(switch) => {
                self.format_switch(names, switch)
            }
            MirInstructionKind::Unwind | MirInstructionKind::Unreachable => String::new(),
        };
        let prefix = match results {
            [] => String::new(),
            [result] => format!("{} = ", names.name(*result)),
            results => format!("({}) = ", names.list(results)),
        };
        if operands.is_empty() {
            format!("{}{}", prefix, opcode)
        } else {
            format!("{}{} {}", prefix, opcode, operands)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::MirArena;
    use crate::body::MirBody;
    use crate::context::{MirField, MirNominalDecl, MirNominalKind, MirTypeContext};
    use crate::instruction::MirInstructionKind;
    use crate::textual_pass::MirModuleTextualPass;
    use crate::ty::{
        MirFunctionSignature, MirParameterInfo, MirResultInfo, MirType, ParameterConvention,
        ResultConvention,
    };
    use crate::{MirFunction, MirModule};
    use bumpalo::Bump;

    #[test]
    fn test_print_identity_function() {
        let bump = Bump::new();
        let mut tcx = MirTypeContext::new(MirArena::new(&bump));
        let arena = tcx.arena();
        let i64_ty = arena.get_integer_ty(64);
        let pair = MirNominalDecl {
            name: arena.intern_str("Pair"),
            kind: MirNominalKind::Struct,
            type_parameters: 0,
            fields: vec![
                MirField {
                    name: arena.intern_str("a"),
                    ty: i64_ty,
                },
                MirField {
                    name: arena.intern_str("b"),
                    ty: i64_ty,
                },
            ],
            cases: vec![],
        };
        tcx.declare_nominal(pair);
        let pair_ty = tcx.arena().get_nominal_ty("Pair", &[]);
        let fn_ty = tcx.arena().get_function_ty(MirFunctionSignature::thin(
            vec![MirParameterInfo::new(
                pair_ty,
                ParameterConvention::DirectOwned,
            )],
            vec![MirResultInfo::new(pair_ty, ResultConvention::Owned)],
        ));
        let mut body = MirBody::new();
        let entry = body.add_block();
        let arg = body.add_block_argument(entry, MirType::object(pair_ty));
        body.push_instruction(entry, MirInstructionKind::Return { operand: arg }, vec![]);
        let name = tcx.arena().intern_str("id");
        let mut module = MirModule::new(tcx);
        module.add_function(MirFunction {
            name,
            ty: fn_ty,
            generic_context: None,
            body: Some(body),
        });
        let text = MirModuleTextualPass::print_module(&module);
        assert_eq!(
            text,
            "struct Pair { a: i64, b: i64 }\n\nfn @id : fn(@owned Pair) -> (@owned Pair) {\nbb0(%0 : Pair):\n  return %0\n}\n"
        );
    }
}
