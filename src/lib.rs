#[macro_use]
extern crate quick_error;

pub mod elf;
pub mod link;

pub use link::{link, Executable, IMAGE_BASE};

use compiler::{compile_function, CompilerConfig, Environment, Program};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

quick_error! {
    #[derive(Debug)]
    pub enum BuildError {
        Io(err: std::io::Error) {
            from()
            display("IO error: {}", err)
        }
        Compile(diagnostics: Vec<Diagnostic>) {
            display("{}", diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("\n"))
        }
        Link(err: link::Error) {
            from()
            display("Link error: {}", err)
        }
        Assemble(err: asm::Error) {
            from()
            display("{}", err)
        }
    }
}

/// A compile error with the source context a person needs to act on it.
#[derive(Debug)]
pub struct Diagnostic {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub snippet: String,
    pub error: compiler::Error,
}

impl Diagnostic {
    /// Attaches file path, line/column and the offending source line to a
    /// compiler error.
    pub fn new(error: compiler::Error, path: &str, source: &str) -> Self {
        let position = error.position().unwrap_or_default().min(source.len());
        let prefix = source.get(..position).unwrap_or(source);
        let line = prefix.bytes().filter(|b| *b == b'\n').count() + 1;
        let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or_default();
        let column = position - line_start + 1;
        let snippet = source[line_start..]
            .lines()
            .next()
            .unwrap_or_default()
            .trim_end()
            .to_string();

        Self {
            path: path.into(),
            line,
            column,
            snippet,
            error,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}:{}:{}: {}", self.path, self.line, self.column, self.error)?;
        write!(f, "  {}", self.snippet)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BuildConfig {
    /// Annotate listings with variable names.
    pub debug: bool,
    /// Worker threads for function compilation. Zero means one per core.
    pub jobs: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { debug: false, jobs: 0 }
    }
}

/// Everything a build produces: the textual listing of all functions in
/// scan order and the linked executable image.
#[derive(Debug)]
pub struct BuildOutput {
    pub listing: String,
    pub executable: Executable,
}

/// Compiles one source file into a linked executable image.
pub fn build_source(source: &str, path: &str, config: &BuildConfig) -> Result<BuildOutput, BuildError> {
    let tokens = tokenizer::tokenize(source);

    let program = compiler::scan(&tokens)
        .map_err(|error| BuildError::Compile(vec![Diagnostic::new(error, path, source)]))?;

    let environment = Environment::new(program.functions.iter().cloned());
    let compiled = compile_parallel(&program, &environment, config);

    let mut diagnostics = Vec::new();
    let mut listing = String::new();
    let mut units = Vec::new();

    for result in compiled {
        match result {
            Ok(assembler) => {
                listing.push_str(&assembler.to_string());
                units.push(assembler.finalize()?);
            }
            Err(error) => diagnostics.push(Diagnostic::new(error, path, source)),
        }
    }

    if !diagnostics.is_empty() {
        return Err(BuildError::Compile(diagnostics));
    }

    let executable = link(units)?;

    Ok(BuildOutput { listing, executable })
}

/// Compiles every function of the program, one function per worker.
///
/// The environment is read-only here; only the per-function atomic
/// counters are written across workers. Results come back in scan order
/// so the final image does not depend on the thread count.
fn compile_parallel(
    program: &Program,
    environment: &Environment,
    config: &BuildConfig,
) -> Vec<Result<asm::Assembler, compiler::Error>> {
    let functions = &program.functions;
    let compiler_config = CompilerConfig { debug: config.debug };

    let workers = match config.jobs {
        0 => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        n => n,
    }
    .min(functions.len().max(1));

    let next = AtomicUsize::new(0);
    let (sender, receiver) = mpsc::channel();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let sender = sender.clone();
            let next = &next;

            scope.spawn(move || loop {
                let index = next.fetch_add(1, Ordering::Relaxed);

                let Some(function) = functions.get(index) else {
                    break;
                };

                let result = compile_function(function, environment, compiler_config);

                if sender.send((index, result)).is_err() {
                    break;
                }
            });
        }
    });

    drop(sender);

    let mut results: Vec<Option<Result<asm::Assembler, compiler::Error>>> =
        functions.iter().map(|_| None).collect();

    for (index, result) in receiver {
        results[index] = Some(result);
    }

    results
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| unreachable!("every function is compiled exactly once")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "f(a, b) {
    return a + b
}

main() {
    x = f(2, 3)
    if x < 100 {
        print(\"small\")
    }
    syscall(60, x)
}";

    #[test]
    fn output_is_identical_across_thread_counts() -> Result<()> {
        let single = build_source(
            SOURCE,
            "test.vel",
            &BuildConfig { debug: false, jobs: 1 },
        )
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let parallel = build_source(
            SOURCE,
            "test.vel",
            &BuildConfig { debug: false, jobs: 4 },
        )
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        assert_eq!(single.executable.code, parallel.executable.code);
        assert_eq!(single.executable.rodata, parallel.executable.rodata);
        assert_eq!(single.listing, parallel.listing);
        Ok(())
    }

    #[test]
    fn repeated_builds_are_byte_identical() -> Result<()> {
        let first = build_source(SOURCE, "test.vel", &BuildConfig::default())
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let second = build_source(SOURCE, "test.vel", &BuildConfig::default())
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        assert_eq!(first.executable.code, second.executable.code);
        assert_eq!(first.executable.rodata, second.executable.rodata);
        Ok(())
    }

    #[test]
    fn diagnostics_carry_line_and_column() {
        let source = "main() {\n    x = 2 + 3\n}\n";
        let error = build_source(source, "unused.vel", &BuildConfig::default()).unwrap_err();

        let BuildError::Compile(diagnostics) = error else {
            panic!("Expected a compile error");
        };

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].line, 2);
        assert_eq!(diagnostics[0].column, 5);
        assert_eq!(diagnostics[0].snippet, "    x = 2 + 3");
        assert!(diagnostics[0].to_string().contains("unused.vel:2:5:"));
    }

    #[test]
    fn every_failing_function_gets_a_diagnostic() {
        let source = "bad() {\n    x = 1\n}\n\nworse() {\n    y = 2\n}\n";
        let error = build_source(source, "test.vel", &BuildConfig::default()).unwrap_err();

        let BuildError::Compile(diagnostics) = error else {
            panic!("Expected a compile error");
        };

        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn strings_land_in_rodata() -> Result<()> {
        let output = build_source(
            "main() { print(\"Hello\") }",
            "test.vel",
            &BuildConfig::default(),
        )
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        let text = b"Hello\n";
        assert!(output
            .executable
            .rodata
            .windows(text.len())
            .any(|window| window == text));
        Ok(())
    }
}
