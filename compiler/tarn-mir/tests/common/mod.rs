/// A macro for parsing a MIR module from source, running the large-value lowering over it, and
/// asserting that the lowered module still verifies.
///
/// Evaluates to the lowering result: the printed module together with the report, or the error
/// the pass failed with.
#[macro_export]
macro_rules! lower_source {
    ($input:expr) => {
        $crate::lower_source!($input, tarn_mir::passes::LoweringOptions::default())
    };
    ($input:expr, $options:expr) => {{
        use bumpalo::Bump;
        use tarn_mir::arena::MirArena;
        use tarn_mir::parser::parse_module;
        use tarn_mir::passes::{LargeValueLoweringPass, MirModulePass};
        use tarn_mir::textual_pass::MirModuleTextualPass;
        use tarn_mir::verifier::verify_module;

        let bump = Bump::new();
        let mut module =
            parse_module($input, MirArena::new(&bump)).expect("failed to parse test module");
        let mut pass = LargeValueLoweringPass::new($options);
        pass.run(&mut module).map(|report| {
            verify_module(&module).expect("lowered module does not verify");
            (MirModuleTextualPass::print_module(&module), report)
        })
    }};
}
