use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use qsm_rs::{ArchInfo, QplFlags};

use crate::Args;

/// Assemble a QSM source file into a QPL object file
#[derive(Clone, Debug, Parser)]
pub struct AssembleArgs {
    /// output filename, defaults to the input with a .qpl extension
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// mark the file as having an entry point (a `main` function)
    #[arg(long)]
    entry_point: bool,
    /// mark the file as carrying an export table
    #[arg(long)]
    exports: bool,
    /// mark the file as using relative addressing
    #[arg(long)]
    relative: bool,
    /// target word size in bytes, defaults to the host's
    #[arg(long)]
    word_size: Option<u8>,
    /// emit big-endian words
    #[arg(long)]
    big_endian: bool,
}

pub fn assemble(args: &Args, assemble_args: &AssembleArgs) -> Result<()> {
    let mut flags = QplFlags::NONE;
    if assemble_args.entry_point {
        flags = flags | QplFlags::HAS_ENTRY_POINT;
    }
    if assemble_args.exports {
        flags = flags | QplFlags::HAS_EXPORTS;
    }
    if assemble_args.relative {
        flags = flags | QplFlags::RELATIVE_ADDRESSING;
    }
    let arch = match assemble_args.word_size {
        Some(word_size) => Some(ArchInfo::new(word_size, assemble_args.big_endian)?),
        None if assemble_args.big_endian => {
            Some(ArchInfo::new(std::mem::size_of::<usize>() as u8, true)?)
        }
        None => None,
    };
    let output = qsm_rs::assemble_file(
        &args.input,
        assemble_args.output.as_deref(),
        flags,
        arch,
        None,
    )?;
    println!("{}", output.display());
    Ok(())
}
