use clap::Parser;
use miette::{IntoDiagnostic, NamedSource};
use std::io::Read;
use tarn_driver::pipeline::{execute_compilation_pipeline, PipelineOptions};
use tarn_mir::passes::LoweringOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(clap::Parser)]
#[command(version, about, long_about = None)]
struct AppArgs {
    /// The input MIR. If this is `-`, the input is read from stdin.
    input: String,

    /// Should the lowered MIR be emitted as text?
    #[arg(long, default_value = "false")]
    emit_mir: bool,

    /// Should the lowered MIR be emitted as RON?
    #[arg(long, default_value = "false")]
    emit_ron: bool,

    /// Should the layout programs of the module's nominal types be emitted?
    #[arg(long, default_value = "false")]
    emit_layout: bool,

    /// Should the lowering report be emitted as RON?
    #[arg(long, default_value = "false")]
    emit_report: bool,

    /// Emission queries to specify which functions or globals should be emitted.
    #[arg(long)]
    emit_query: Vec<String>,

    /// The number of scalar words a value may occupy and still be passed in registers.
    #[arg(long)]
    max_register_words: Option<u32>,

    /// Parse, verify and emit the module without lowering it.
    #[arg(long, default_value = "false")]
    skip_lowering: bool,

    /// Do not verify the module before and after lowering.
    #[arg(long, default_value = "false")]
    no_verify: bool,

    /// Log filter, e.g. `debug` or `tarn_mir=trace`. Falls back to `RUST_LOG`.
    #[arg(long)]
    log_level: Option<String>,
}

impl From<AppArgs> for PipelineOptions {
    fn from(args: AppArgs) -> Self {
        let lowering = match args.max_register_words {
            Some(max_direct_words) => LoweringOptions { max_direct_words },
            None => LoweringOptions::default(),
        };
        Self {
            emit_mir: args.emit_mir,
            emit_ron: args.emit_ron,
            emit_layout: args.emit_layout,
            emit_report: args.emit_report,
            queries: args.emit_query,
            lowering,
            skip_lowering: args.skip_lowering,
            skip_verify: args.no_verify,
        }
    }
}

fn setup_logs(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let formatter = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    tracing_subscriber::registry()
        .with(formatter)
        .with(filter)
        .init();
}

fn main() -> miette::Result<()> {
    let args = AppArgs::parse();
    setup_logs(args.log_level.as_deref());

    let source = match args.input.as_str() {
        "-" => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .into_diagnostic()?;
            source
        }
        path => std::fs::read_to_string(path).into_diagnostic()?,
    };
    let source_code = NamedSource::new(&args.input, source.clone());
    let options = PipelineOptions::from(args);

    let result = || -> miette::Result<String> {
        let output = execute_compilation_pipeline(options, &source)?;
        Ok(output)
    }();
    let output = result.map_err(|e| e.with_source_code(source_code))?;
    print!("{}", output);
    Ok(())
}
