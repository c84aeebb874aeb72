use crate::pipeline::{Pipeline, PipelineError, PipelineOperation};
use tarn_mir::arena::MirArena;
use tarn_mir::error::MirError;
use tarn_mir::parser::parse_module;
use tarn_mir::MirModule;

/// Operation for parsing the input source into a MIR module.
pub struct ParseOperation {}
impl<'c, T: AsRef<str>> PipelineOperation<'c, T, MirModule<'c>> for ParseOperation {
    fn execute(pipeline: &'c Pipeline<'c>, input: T) -> Result<MirModule<'c>, PipelineError> {
        let module = parse_module(input.as_ref(), MirArena::new(pipeline.bump))
            .map_err(MirError::from)?;
        Ok(module)
    }
}
