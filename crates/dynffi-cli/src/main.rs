use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dynffi_config::{ConfigLoader, FfiConfig};
use dynffi_runtime::Ffi;
use std::path::{Path, PathBuf};

mod commands;
mod logging;

/// Inspect C declarations and call native functions dynamically.
///
/// dynffi parses C declarations at runtime, computes their memory layout
/// and calls functions in shared libraries without generated bindings.
///
/// EXAMPLES:
///     dynffi check decls.h                            List declared functions
///     dynffi sizeof "struct point" --decl decls.h     Size of a declared type
///     dynffi offsetof "struct point" y --decl decls.h Offset of a member
///     dynffi call abs -42 --decl libc.h               Call a libc function
///     dynffi call cos 0.5 --decl m.h --lib libm.so.6  Call into libm
///
/// ENVIRONMENT VARIABLES:
///     DYNFFI_LIBRARY_PATH  Extra library search paths, searched first
///     DYNFFI_GLOBAL        Set to '1' to load libraries with global symbols
///     DYNFFI_LOG           Log filter, e.g. 'dynffi_runtime=debug'
#[derive(Parser)]
#[command(name = "dynffi")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (default: dynffi.toml found from the current directory)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log filter directive (overrides DYNFFI_LOG and the config file)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a declaration file and list its functions
    ///
    /// Every declaration in the file goes through a single batch; any error
    /// is reported as `file:line:message` and nothing is declared.
    ///
    /// EXAMPLES:
    ///     dynffi check decls.h
    #[command(visible_alias = "c")]
    Check {
        /// Path to the declaration file
        file: PathBuf,
    },

    /// Print the size of a C type in bytes
    ///
    /// EXAMPLES:
    ///     dynffi sizeof "unsigned long"
    ///     dynffi sizeof "struct point[4]" --decl decls.h
    Sizeof {
        /// Type expression, e.g. "int[4]" or "struct point *"
        #[arg(value_name = "TYPE")]
        ty: String,
        /// Declaration file defining the named types
        #[arg(long, short = 'd')]
        decl: Option<PathBuf>,
    },

    /// Print the byte offset of a record member
    ///
    /// EXAMPLES:
    ///     dynffi offsetof "struct point" y --decl decls.h
    Offsetof {
        /// Record type expression
        #[arg(value_name = "TYPE")]
        ty: String,
        /// Member name, including members of anonymous nested records
        field: String,
        /// Declaration file defining the record
        #[arg(long, short = 'd')]
        decl: Option<PathBuf>,
    },

    /// Call a declared function and print its result
    ///
    /// Arguments are read as integers, floats, `nil`, `true` or `false`;
    /// anything else is passed as a string.
    ///
    /// EXAMPLES:
    ///     dynffi call strlen hello --decl libc.h
    ///     dynffi call abs -42 --decl libc.h
    ///     dynffi call add 2 3 --decl demo.h --lib ./libdemo.so
    Call {
        /// Function name
        name: String,
        /// Arguments to pass
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,
        /// Declaration file with the function prototype
        #[arg(long, short = 'd')]
        decl: PathBuf,
        /// Library to load (default: symbols of the running process)
        #[arg(long, short = 'l')]
        lib: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    logging::init(cli.log.as_deref(), &config);

    let ffi = Ffi::with_config(&config);

    match cli.command {
        Commands::Check { file } => commands::check::run(&ffi, &file)?,
        Commands::Sizeof { ty, decl } => commands::layout::sizeof(&ffi, &ty, decl.as_deref())?,
        Commands::Offsetof { ty, field, decl } => {
            commands::layout::offsetof(&ffi, &ty, &field, decl.as_deref())?
        }
        Commands::Call {
            name,
            args,
            decl,
            lib,
        } => {
            let args = commands::call::CallArgs {
                name,
                args,
                decl,
                lib,
            };
            commands::call::run(&ffi, args)?;
        }
    }

    Ok(())
}

/// Explicit `--config` file, or the project/global files plus environment
fn load_config(path: Option<&Path>) -> Result<FfiConfig> {
    let mut loader = ConfigLoader::new();
    match path {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => {
            let cwd = std::env::current_dir()?;
            loader
                .load_from_directory(&cwd)
                .context("Failed to load configuration")
        }
    }
}
