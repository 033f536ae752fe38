use anyhow::Result;

use crate::Args;

pub fn dump_sections(args: &Args) -> Result<()> {
    let file = qsm_rs::qpl::read_file(&args.input)?;
    for name in file.section_names() {
        let data = file.section(name).unwrap_or(&[]);
        println!("[{name}] {} bytes", data.len());
        for chunk in data.chunks(16) {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
            println!("  {}", hex.join(" "));
        }
    }
    Ok(())
}
