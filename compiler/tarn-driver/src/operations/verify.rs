use crate::pipeline::{Pipeline, PipelineError, PipelineOperation};
use tarn_mir::error::MirError;
use tarn_mir::verifier::verify_module;
use tarn_mir::MirModule;
use tracing::debug;

/// Operation for checking that a module is well-formed.
///
/// Runs before and after lowering, unless verification was turned off.
pub struct VerifyOperation {}
impl<'c> PipelineOperation<'c, MirModule<'c>, MirModule<'c>> for VerifyOperation {
    fn execute(
        pipeline: &'c Pipeline<'c>,
        input: MirModule<'c>,
    ) -> Result<MirModule<'c>, PipelineError> {
        if pipeline.opts.skip_verify {
            return Ok(input);
        }
        verify_module(&input).map_err(MirError::from)?;
        debug!(functions = input.functions.len(), "module verified");
        Ok(input)
    }
}
