mod assemble;
use assemble::{assemble, AssembleArgs};
mod dump_header;
use dump_header::{dump_header, DumpHeaderArgs};
mod dump_sections;
use dump_sections::dump_sections;
mod dump_exports;
use dump_exports::dump_exports;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Assemble QSM sources and inspect QPL object files
#[derive(Clone, Debug, Parser)]
struct Args {
    /// input filename, QSM source or QPL object depending on the operation
    #[arg(short, long)]
    input: PathBuf,
    // operation to execute
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Assemble a QSM source file into a QPL object file
    Assemble(AssembleArgs),
    /// Print the header of a QPL file
    DumpHeader(DumpHeaderArgs),
    /// Print every section of a QPL file as a hex dump
    DumpSections,
    /// Print the export table of a QPL file
    DumpExports,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match &args.operation {
        Operation::Assemble(assemble_args) => assemble(&args, assemble_args),
        Operation::DumpHeader(header_args) => dump_header(&args, header_args),
        Operation::DumpSections => dump_sections(&args),
        Operation::DumpExports => dump_exports(&args),
    }
}
