use crate::{CompilerConfig, Environment, Error};

macro_rules! compile {
    (debug $source:expr) => {
        crate::test::compile_listing($source, true)?
    };

    (errors $source:expr) => {
        crate::test::compile_errors($source)
    };

    ($source:expr) => {
        crate::test::compile_listing($source, false)?
    };
}

mod assignment;
mod calls;
mod division;
mod print;

/// Runs the full front half of the pipeline and returns the concatenated
/// listings of every function in scan order.
pub(crate) fn compile_listing(source: &str, debug: bool) -> Result<String, Error> {
    let tokens = tokenizer::tokenize(source);
    let program = crate::scan(&tokens)?;
    let environment = Environment::new(program.functions.iter().cloned());
    let mut listing = String::new();

    for function in &program.functions {
        let assembler =
            crate::compile_function(function, &environment, CompilerConfig { debug })?;
        listing.push_str(&assembler.to_string());
    }

    Ok(listing)
}

/// Compiles every function and collects the per-function errors. A failing
/// function never stops its peers from compiling.
pub(crate) fn compile_errors(source: &str) -> Vec<Error> {
    let tokens = tokenizer::tokenize(source);

    let program = match crate::scan(&tokens) {
        Ok(program) => program,
        Err(error) => return vec![error],
    };

    let environment = Environment::new(program.functions.iter().cloned());

    program
        .functions
        .iter()
        .filter_map(|function| {
            crate::compile_function(function, &environment, CompilerConfig::default()).err()
        })
        .collect()
}

/// Compiles and finalizes every function into machine code.
pub(crate) fn compile_machine_code(source: &str) -> Result<Vec<asm::MachineCode>, Error> {
    let tokens = tokenizer::tokenize(source);
    let program = crate::scan(&tokens)?;
    let environment = Environment::new(program.functions.iter().cloned());

    program
        .functions
        .iter()
        .map(|function| {
            crate::compile_function(function, &environment, CompilerConfig::default())
                .and_then(|assembler| assembler.finalize().map_err(Error::from))
        })
        .collect()
}
