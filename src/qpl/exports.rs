use std::io::BufRead;

use serde::Serialize;

use crate::bin_type::BinType;
use crate::qpl::{ArchInfo, FileError};
use crate::reader::{QplBufRead, QplRead};

/// One exported function: ASCII name, NUL, word offset, return-type
/// index, parameter-type indices, a `void` terminator, then the local
/// count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportTableEntry {
    pub name: String,
    pub offset: u64,
    pub return_type: BinType,
    pub parameter_types: Vec<BinType>,
    pub num_locals: u8,
}

impl ExportTableEntry {
    pub fn byte_len(name: &str, num_params: usize, arch: ArchInfo) -> u64 {
        (name.len() + 1 + arch.word_size() + 1 + num_params + 1 + 1) as u64
    }

    pub fn to_bytes(&self, arch: ArchInfo) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        out.extend(arch.word_bytes(self.offset));
        out.push(self.return_type.index());
        out.extend(self.parameter_types.iter().map(|t| t.index()));
        out.push(BinType::Void.index());
        out.push(self.num_locals);
        out
    }

    pub fn read_from<R: BufRead>(input: &mut R, arch: ArchInfo) -> Result<Self, FileError> {
        let name = input.read_c_string_raw()?;
        let name = String::from_utf8_lossy(&name).into_owned();
        let offset = input.read_word(arch)?;
        let return_type = BinType::from_index(input.read_u8()?)?;
        let mut parameter_types = Vec::new();
        loop {
            let ty = BinType::from_index(input.read_u8()?)?;
            if ty == BinType::Void {
                break;
            }
            parameter_types.push(ty);
        }
        let num_locals = input.read_u8()?;
        Ok(Self {
            name,
            offset,
            return_type,
            parameter_types,
            num_locals,
        })
    }
}

/// A serialized registry of callable symbols: a word-sized entry count
/// followed by that many entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    entries: Vec<ExportTableEntry>,
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ExportTableEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&ExportTableEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn push(&mut self, entry: ExportTableEntry) {
        self.entries.push(entry);
    }

    pub fn to_bytes(&self, arch: ArchInfo) -> Vec<u8> {
        let mut out = arch.word_bytes(self.entries.len() as u64);
        for entry in &self.entries {
            out.extend(entry.to_bytes(arch));
        }
        out
    }

    pub fn read_from<R: BufRead>(input: &mut R, arch: ArchInfo) -> Result<Self, FileError> {
        let count = input.read_word(arch)?;
        let mut table = Self::new();
        for _ in 0..count {
            table.entries.push(ExportTableEntry::read_from(input, arch)?);
        }
        Ok(table)
    }

    pub fn from_bytes(data: &[u8], arch: ArchInfo) -> Result<Self, FileError> {
        Self::read_from(&mut std::io::Cursor::new(data), arch)
    }
}
