use std::{collections::BTreeMap, path::PathBuf};

use clap::{CommandFactory, Parser as ClapParser, error::ErrorKind};
use colored::Colorize;

use crate::{
    backend::{CodeGenerator, CodegenOptions, x86_64_linux_gnu::CodeGeneratorX86_64LinuxGnu},
    frontend::{SourceFile, SourceFileOrigin, parser::Parser},
    middle::{ir::Lowered, lowering, optimize, pretty_print},
};

mod backend;
mod frontend;
mod middle;

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Rill source file to compile
    source_file: PathBuf,

    /// Where to write the generated assembly
    #[arg(short, long, default_value = "out.asm")]
    output: PathBuf,

    /// Dump the IR before and after optimization
    #[arg(long)]
    emit_ir: bool,

    /// Embed each IR instruction as a comment in the generated assembly
    #[arg(long)]
    comments: bool,

    /// Assemble and link the output, then run it and exit with its status
    #[arg(long)]
    run: bool,
}

fn main() {
    let args = Args::parse();

    if !args.source_file.exists() {
        Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("Source file '{}' does not exist!", args.source_file.display()),
            )
            .exit()
    }

    if !args.source_file.is_file() {
        Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("Input path '{}' is not a file!", args.source_file.display()),
            )
            .exit()
    }

    let contents = std::fs::read_to_string(&args.source_file)
        .expect("Failed to read input file (or invalid UTF-8)");

    let source_file = SourceFile {
        contents,
        origin: SourceFileOrigin::File(args.source_file),
    };

    /* Front end: on a parse failure the process has already exited */

    let program = Parser::parse_program(&source_file);

    /* Lowering */

    let lowered = match lowering::lower(&program) {
        Ok(lowered) => lowered,
        Err(error) => report_fatal_error(&error.to_string()),
    };

    if args.emit_ir {
        println!("{}", "; lowered".white());
        pretty_print::pretty_print_ir(&lowered);
    }

    /* Optimization pipeline */

    let Lowered {
        code,
        identifiers,
        constants,
    } = lowered;

    let code = match optimize::optimize(code) {
        Ok(code) => code,
        Err(error) => report_fatal_error(&error.to_string()),
    };

    let lowered = Lowered {
        code,
        identifiers,
        constants,
    };

    if args.emit_ir {
        println!("\n{}", "; optimized".white());
        pretty_print::pretty_print_ir(&lowered);
    }

    /* Code generation */

    // The pipeline produces final names, so there are no renames to apply
    let temp_renames = BTreeMap::new();
    let generator = CodeGeneratorX86_64LinuxGnu;

    let options = CodegenOptions {
        emit_comments: args.comments,
    };

    let assembly = match generator.translate_to_asm(&lowered, &temp_renames, &options) {
        Ok(assembly) => assembly,
        Err(error) => report_fatal_error(&error.to_string()),
    };

    if let Err(error) = std::fs::write(&args.output, &assembly) {
        report_fatal_error(&format!(
            "Failed to write '{}': {error}",
            args.output.display()
        ));
    }

    if args.run {
        match backend::assemble_and_run(&generator, &assembly) {
            Ok(status) => std::process::exit(status),
            Err(error) => report_fatal_error(&format!("Failed to run toolchain: {error}")),
        }
    }
}

fn report_fatal_error(message: &str) -> ! {
    eprintln!("{} {message}", "error:".red().bold());
    std::process::exit(1);
}
