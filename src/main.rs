use clap::{Parser, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use velc::{build_source, elf, BuildConfig, BuildError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// The textual listing of every compiled function.
    Asm,
    /// The raw linked code and data, no container.
    Bin,
    /// A runnable ELF executable.
    Elf,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The source file to compile.
    input_file: PathBuf,

    /// Where to write the output. Defaults to the input name without its
    /// extension (or stdout for --emit asm).
    #[arg(short, long)]
    output_file: Option<PathBuf>,

    /// What kind of output to produce.
    #[arg(long, value_enum, default_value_t = Emit::Elf)]
    emit: Emit,

    /// Annotate the listing with variable names.
    #[arg(long)]
    debug: bool,

    /// Worker threads for function compilation. Defaults to one per core.
    #[arg(short, long, default_value_t = 0)]
    jobs: usize,
}

fn run(args: Args) -> Result<(), BuildError> {
    let source = std::fs::read_to_string(&args.input_file)?;
    let path = args.input_file.display().to_string();

    let config = BuildConfig {
        debug: args.debug,
        jobs: args.jobs,
    };

    let output = build_source(&source, &path, &config)?;

    match args.emit {
        Emit::Asm => match args.output_file {
            Some(path) => std::fs::write(path, output.listing)?,
            None => std::io::stdout().write_all(output.listing.as_bytes())?,
        },
        Emit::Bin => {
            let path = output_path(&args);
            let mut bytes = output.executable.code.clone();
            bytes.extend_from_slice(&output.executable.rodata);
            std::fs::write(path, bytes)?;
        }
        Emit::Elf => {
            let path = output_path(&args);
            std::fs::write(&path, elf::write_executable(&output.executable))?;
            make_executable(&path)?;
        }
    }

    Ok(())
}

fn output_path(args: &Args) -> PathBuf {
    args.output_file
        .clone()
        .unwrap_or_else(|| args.input_file.with_extension(""))
}

#[cfg(unix)]
fn make_executable(path: &PathBuf) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    std::fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn make_executable(_path: &PathBuf) -> std::io::Result<()> {
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(error) = run(args) {
        match &error {
            BuildError::Compile(diagnostics) => {
                eprintln!("Compilation error:");
                for diagnostic in diagnostics {
                    eprintln!("{diagnostic}");
                }
            }
            other => eprintln!("{other}"),
        }

        std::process::exit(1);
    }
}
