use crate::pipeline::{Pipeline, PipelineError, PipelineOperation};
use tarn_mir::passes::{LargeValueLoweringPass, LoweringReport, MirModulePass};
use tarn_mir::MirModule;
use tracing::{info, info_span};

/// Operation for moving large values behind addresses.
pub struct LowerOperation {}
impl<'c> PipelineOperation<'c, MirModule<'c>, (MirModule<'c>, LoweringReport)>
    for LowerOperation
{
    fn execute(
        pipeline: &'c Pipeline<'c>,
        mut input: MirModule<'c>,
    ) -> Result<(MirModule<'c>, LoweringReport), PipelineError> {
        if pipeline.opts.skip_lowering {
            return Ok((input, LoweringReport::default()));
        }
        let mut pass = LargeValueLoweringPass::new(pipeline.opts.lowering);
        let _span = info_span!("pass", name = pass.name()).entered();
        let report = pass.run(&mut input)?;
        info!(
            signatures = report.signatures.len(),
            call_sites = report.recreated_call_sites,
            "lowered large values"
        );
        Ok((input, report))
    }
}
