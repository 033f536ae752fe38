use anyhow::{anyhow, Result};

use qsm_rs::qpl::exports::ExportTable;

use crate::Args;

pub fn dump_exports(args: &Args) -> Result<()> {
    let file = qsm_rs::qpl::read_file(&args.input)?;
    let header = file
        .header()
        .ok_or_else(|| anyhow!("file has no header"))?;
    let data = file
        .section("exports")
        .ok_or_else(|| anyhow!("file has no exports section"))?;
    let table = ExportTable::from_bytes(data, header.arch)?;
    for entry in table.entries() {
        let params: Vec<String> = entry
            .parameter_types
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "{} ({}) : {} at {:#x}, {} locals",
            entry.name,
            params.join(", "),
            entry.return_type,
            entry.offset,
            entry.num_locals,
        );
    }
    Ok(())
}
