#![forbid(unsafe_code)]
pub mod asm;
pub mod ast;
pub mod bin_type;
pub mod inst;
pub mod parser;
pub mod qpl;
pub(crate) mod reader;
pub mod stack;
pub mod token;
pub mod tokenizer;

#[cfg(test)]
mod test;

use std::path::{Path, PathBuf};

use tracing::debug;

pub use asm::{AsmError, Assembler};
pub use parser::Parser;
pub use qpl::{ArchInfo, FileError, QplFile, QplFlags};
pub use tokenizer::{SyntaxError, Tokenizer};

pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;

pub const OUTPUT_EXTENSION: &str = "qpl";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Asm(#[from] AsmError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Assemble one source string into the bytes of a QPL object file.
pub fn assemble(source: &str, flags: QplFlags, arch: ArchInfo) -> Result<Vec<u8>, Error> {
    assemble_in(source, flags, arch, Path::new("."))
}

/// As [`assemble`], with `import` paths resolved against `base_dir`.
pub fn assemble_in(
    source: &str,
    flags: QplFlags,
    arch: ArchInfo,
    base_dir: &Path,
) -> Result<Vec<u8>, Error> {
    let mut tokens = Tokenizer::new(source);
    let document = Parser::new().parse(&mut tokens)?;
    let file = Assembler::new(arch)
        .with_base_dir(base_dir)
        .assemble(&document, flags)?;
    Ok(file.to_bytes(flags, arch)?)
}

/// Assemble a source file and write the object file next to it (or to
/// `output`). Returns the path written to.
pub fn assemble_file(
    input: &Path,
    output: Option<&Path>,
    flags: QplFlags,
    arch: Option<ArchInfo>,
    cwd: Option<&Path>,
) -> Result<PathBuf, Error> {
    let source = std::fs::read_to_string(input)?;
    let base_dir = cwd
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let arch = arch.unwrap_or_else(ArchInfo::native);
    let bytes = assemble_in(&source, flags, arch, &base_dir)?;
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension(OUTPUT_EXTENSION));
    std::fs::write(&output, bytes)?;
    debug!(output = %output.display(), "wrote object file");
    Ok(output)
}
