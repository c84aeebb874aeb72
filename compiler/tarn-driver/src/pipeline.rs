use crate::operations::emit::EmitOperation;
use crate::operations::lower::LowerOperation;
use crate::operations::parse::ParseOperation;
use crate::operations::verify::VerifyOperation;
use crate::query::{EmitQuery, QueryError};
use bumpalo::Bump;
use miette::Diagnostic;
use tarn_mir::error::MirError;
use tarn_mir::passes::LoweringOptions;
use thiserror::Error;
use tracing::debug;

/// Execute the entire compilation pipeline, returning everything that was requested for emission.
pub fn execute_compilation_pipeline(
    opts: PipelineOptions,
    input: &str,
) -> Result<String, PipelineError> {
    let bump = Bump::new();
    let pipeline = Pipeline::new(opts, &bump)?;
    let module = ParseOperation::execute(&pipeline, input)?;
    let module = VerifyOperation::execute(&pipeline, module)?;
    let (module, report) = LowerOperation::execute(&pipeline, module)?;
    let module = VerifyOperation::execute(&pipeline, module)?;
    let output = EmitOperation::execute(&pipeline, (module, report))?;
    Ok(output)
}

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    MirError(#[from] MirError),
    #[diagnostic(transparent)]
    #[error(transparent)]
    QueryError(#[from] QueryError),
}

/// Options for the compilation pipeline.
///
/// Most of these are derived from the command line arguments.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub emit_mir: bool,
    pub emit_ron: bool,
    pub emit_layout: bool,
    pub emit_report: bool,
    pub queries: Vec<String>,
    pub lowering: LoweringOptions,
    pub skip_lowering: bool,
    pub skip_verify: bool,
}

/// A compilation pipeline for the compiler.
pub struct Pipeline<'c> {
    pub(crate) opts: PipelineOptions,
    pub(crate) bump: &'c Bump,
    pub(crate) queries: Vec<EmitQuery>,
}

impl<'c> Pipeline<'c> {
    pub fn new(opts: PipelineOptions, bump: &'c Bump) -> Result<Self, PipelineError> {
        let queries = EmitQuery::from_queries(&opts.queries)?;
        debug!(queries = queries.len(), "configured pipeline");
        Ok(Self {
            opts,
            bump,
            queries,
        })
    }
}

pub trait PipelineOperation<'c, I, O> {
    fn execute(pipeline: &'c Pipeline<'c>, input: I) -> Result<O, PipelineError>;
}
