use anyhow::{anyhow, Result};
use clap::Parser;

use crate::Args;

/// Print the file header
#[derive(Clone, Debug, Parser)]
pub struct DumpHeaderArgs {
    /// print as JSON instead of plain text
    #[arg(long)]
    json: bool,
}

pub fn dump_header(args: &Args, header_args: &DumpHeaderArgs) -> Result<()> {
    let file = qsm_rs::qpl::read_file(&args.input)?;
    let header = file
        .header()
        .ok_or_else(|| anyhow!("file has no header"))?;
    if header_args.json {
        println!("{}", serde_json::to_string_pretty(header)?);
        return Ok(());
    }
    println!("flags: {:#04x}", header.flags.into_raw());
    println!("  entry point: {}", header.flags.has_entry_point());
    println!("  exports: {}", header.flags.has_exports());
    println!("  relative addressing: {}", header.flags.relative_addressing());
    println!("architecture: {}", header.arch);
    println!("sections: {}", header.num_sections);
    println!("version: {}.{}", header.version.0, header.version.1);
    Ok(())
}
