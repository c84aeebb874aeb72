use crate::pipeline::{Pipeline, PipelineError, PipelineOperation};
use crate::query::{EmitQuery, MirEmitQuery, QueryError};
use tarn_diagnostics::ice;
use tarn_mir::layout::LayoutString;
use tarn_mir::passes::LoweringReport;
use tarn_mir::textual_pass::{Document, MirModuleTextualPass};
use tarn_mir::MirModule;

/// Operation for emitting the requested representations of the lowered module.
///
/// Emissions are concatenated in a fixed order: MIR text, RON, layout programs, and the report.
pub struct EmitOperation;

impl EmitOperation {
    pub fn decode<'a>(
        query: &MirEmitQuery,
        module: &MirModule,
        textual_pass: &'a MirModuleTextualPass<'a>,
    ) -> Result<Document<'a>, PipelineError> {
        match query {
            MirEmitQuery::Function(name) => {
                let id = module
                    .find_function(name)
                    .ok_or_else(|| QueryError::UnknownFunction(name.clone()))?;
                Ok(textual_pass.visit_function(module, module.function(id)))
            }
            MirEmitQuery::Global(name) => {
                let id = module
                    .find_global(name)
                    .ok_or_else(|| QueryError::UnknownGlobal(name.clone()))?;
                Ok(textual_pass.visit_global(module, module.global(id)))
            }
        }
    }

    fn emit_mir(pipeline: &Pipeline, module: &MirModule) -> Result<String, PipelineError> {
        // If no query patterns have been specified, we dump the entire module.
        if pipeline.queries.is_empty() {
            return Ok(MirModuleTextualPass::print_module(module));
        }
        let textual_pass = MirModuleTextualPass::default();
        let mut text = String::new();
        for query in pipeline.queries.iter() {
            let EmitQuery::Mir(query) = query;
            let target = Self::decode(query, module, &textual_pass)?;
            text.push_str(&MirModuleTextualPass::format_doc_to_string(target));
            text.push('\n');
        }
        Ok(text)
    }

    /// One line per non-generic nominal type: its layout program in hex and decoded.
    fn emit_layout(module: &MirModule) -> String {
        let mut text = String::new();
        for decl in module.context.nominals.iter() {
            if decl.type_parameters > 0 {
                continue;
            }
            let ty = module.context.arena().get_nominal_ty(decl.name, &[]);
            let layout = LayoutString::for_type(&module.context, ty);
            let ops = LayoutString::decode(layout.bytes()).unwrap_or_else(|e| {
                ice!("layout program of {} does not decode: {}", decl.name, e)
            });
            let ops = ops.iter().map(|op| op.to_string()).collect::<Vec<_>>();
            text.push_str(&format!(
                "{}: {} [{}]\n",
                decl.name,
                layout.to_hex(),
                ops.join(", ")
            ));
        }
        text
    }
}

impl<'c> PipelineOperation<'c, (MirModule<'c>, LoweringReport), String> for EmitOperation {
    fn execute(
        pipeline: &'c Pipeline<'c>,
        input: (MirModule<'c>, LoweringReport),
    ) -> Result<String, PipelineError> {
        let (module, report) = input;
        let mut output = String::new();
        if pipeline.opts.emit_mir {
            output.push_str(&Self::emit_mir(pipeline, &module)?);
        }
        if pipeline.opts.emit_ron {
            let ron = ron::ser::to_string_pretty(&module, Default::default())
                .unwrap_or_else(|e| ice!("failed to serialize mir module to ron: {}", e));
            output.push_str(&ron);
            output.push('\n');
        }
        if pipeline.opts.emit_layout {
            output.push_str(&Self::emit_layout(&module));
        }
        if pipeline.opts.emit_report {
            let ron = ron::ser::to_string_pretty(&report, Default::default())
                .unwrap_or_else(|e| ice!("failed to serialize lowering report to ron: {}", e));
            output.push_str(&ron);
            output.push('\n');
        }
        Ok(output)
    }
}
