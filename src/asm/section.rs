use crate::asm::label::LabelManager;
use crate::asm::AsmError;
use crate::bin_type::{BinType, Value};
use crate::inst::Opcode;
use crate::qpl::exports::{ExportTable, ExportTableEntry};
use crate::qpl::ArchInfo;

/// A value assigned to a config option: either a parsed literal or a
/// symbol whose resolved offset is encoded at emission.
#[derive(Debug, Clone)]
pub enum ConfigValue {
    Literal(Value),
    Label(String),
}

#[derive(Debug, Clone)]
struct ConfigOption {
    name: &'static str,
    types: Vec<BinType>,
    values: Option<Vec<ConfigValue>>,
}

/// Known options and their assigned values. Serialized as the
/// concatenated encodings of every option that was set, in declaration
/// order.
#[derive(Debug)]
pub struct ConfigSection {
    options: Vec<ConfigOption>,
}

impl ConfigSection {
    pub const NAME: &'static str = "config";
    pub const OPTION_ENTRY: &'static str = "entry";

    pub fn new() -> Self {
        Self {
            options: vec![ConfigOption {
                name: Self::OPTION_ENTRY,
                types: vec![BinType::Ptr],
                values: None,
            }],
        }
    }

    pub fn set(&mut self, name: &str, values: Vec<ConfigValue>) -> Result<(), AsmError> {
        let option = self
            .options
            .iter_mut()
            .find(|o| o.name == name)
            .ok_or_else(|| AsmError::UnknownOption {
                name: name.to_owned(),
            })?;
        if values.len() != option.types.len() {
            return Err(AsmError::OptionArity {
                name: name.to_owned(),
                expected: option.types.len(),
                got: values.len(),
            });
        }
        option.values = Some(values);
        Ok(())
    }

    pub fn byte_len(&self, arch: ArchInfo) -> u64 {
        self.options
            .iter()
            .filter(|o| o.values.is_some())
            .flat_map(|o| o.types.iter())
            .map(|ty| ty.size(arch) as u64)
            .sum()
    }

    pub fn to_bytes(
        &self,
        labels: &LabelManager,
        arch: ArchInfo,
    ) -> Result<Vec<u8>, AsmError> {
        let mut out = Vec::new();
        for option in &self.options {
            let Some(values) = &option.values else {
                continue;
            };
            for (ty, value) in option.types.iter().zip(values) {
                let bytes = match value {
                    ConfigValue::Literal(v) => ty.value_to_bytes(v, arch)?,
                    ConfigValue::Label(name) => {
                        let offset = labels.require(name)?.offset();
                        ty.value_to_bytes(&Value::Int(offset as i64), arch)?
                    }
                };
                out.extend(bytes);
            }
        }
        Ok(out)
    }
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self::new()
    }
}

/// How one encoded operand gets its bytes at emission.
#[derive(Debug, Clone)]
pub enum OperandPayload {
    Value(Value),
    /// A symbol, encoded as its resolved offset (relative to the
    /// instruction for `rptr` operands).
    Label(String),
    /// A field of a user-defined type, encoded as its intra-type offset.
    FieldRef { type_name: String, field: String },
}

#[derive(Debug, Clone)]
pub struct Operand {
    pub ty: BinType,
    pub payload: OperandPayload,
}

impl Operand {
    pub fn literal(ty: BinType, value: Value) -> Self {
        Self {
            ty,
            payload: OperandPayload::Value(value),
        }
    }

    /// Emitted length in bytes. Variable-length values report the length
    /// of the bytes they expand to.
    pub fn size(&self, arch: ArchInfo) -> u64 {
        match &self.payload {
            OperandPayload::Value(Value::Str(s)) => s.len() as u64,
            OperandPayload::Value(Value::Bytes(b)) => b.len() as u64,
            _ => self.ty.size(arch) as u64,
        }
    }

    fn encode(
        &self,
        instruction_offset: u64,
        labels: &LabelManager,
        arch: ArchInfo,
    ) -> Result<Vec<u8>, AsmError> {
        match &self.payload {
            OperandPayload::Value(value) => Ok(self.ty.value_to_bytes(value, arch)?),
            OperandPayload::Label(name) => {
                let offset = labels.require(name)?.offset();
                let value = if self.ty == BinType::Rptr {
                    offset as i64 - instruction_offset as i64
                } else {
                    offset as i64
                };
                Ok(self.ty.value_to_bytes(&Value::Int(value), arch)?)
            }
            OperandPayload::FieldRef { type_name, field } => {
                let ty = labels.require_type(type_name)?;
                let field_def =
                    ty.field(field)
                        .ok_or_else(|| AsmError::UnknownSymbol {
                            name: format!("{type_name}.{field}"),
                        })?;
                Ok(self
                    .ty
                    .value_to_bytes(&Value::Int(field_def.offset as i64), arch)?)
            }
        }
    }
}

/// An instruction whose operands are fixed but whose symbolic references
/// are still names; everything resolves when the section serializes.
#[derive(Debug, Clone)]
pub struct EncodedInstruction {
    pub opcode: Opcode,
    pub offset: u64,
    pub operands: Vec<Operand>,
    /// Set for `call`: the callee whose `num_params`/`num_locals` bytes
    /// are appended after the operands.
    pub call_target: Option<String>,
}

impl EncodedInstruction {
    pub fn size(&self, arch: ArchInfo) -> u64 {
        let operands: u64 = self.operands.iter().map(|o| o.size(arch)).sum();
        let extras = if self.call_target.is_some() { 2 } else { 0 };
        1 + operands + extras
    }
}

/// The code section: encoded instructions in source order with their
/// section-relative offsets.
#[derive(Debug, Default)]
pub struct CodeSection {
    instructions: Vec<EncodedInstruction>,
    labels: Vec<String>,
    size: u64,
}

impl CodeSection {
    pub const NAME: &'static str = "code";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn instructions(&self) -> &[EncodedInstruction] {
        &self.instructions
    }

    pub fn add_label(&mut self, name: &str) {
        self.labels.push(name.to_owned());
    }

    /// Append one instruction, returning its section-relative offset.
    pub fn push_instruction(
        &mut self,
        opcode: Opcode,
        operands: Vec<Operand>,
        call_target: Option<String>,
        arch: ArchInfo,
    ) -> u64 {
        let instruction = EncodedInstruction {
            opcode,
            offset: self.size,
            operands,
            call_target,
        };
        let offset = instruction.offset;
        self.size += instruction.size(arch);
        self.instructions.push(instruction);
        offset
    }

    pub fn relocate(&mut self, base: u64, labels: &mut LabelManager) {
        for name in &self.labels {
            labels.offset_by(name, base);
        }
        for instruction in &mut self.instructions {
            instruction.offset += base;
        }
    }

    pub fn to_bytes(
        &self,
        labels: &LabelManager,
        arch: ArchInfo,
    ) -> Result<Vec<u8>, AsmError> {
        let mut out = Vec::new();
        for instruction in &self.instructions {
            out.push(instruction.opcode.byte());
            for operand in &instruction.operands {
                out.extend(operand.encode(instruction.offset, labels, arch)?);
            }
            if let Some(target) = &instruction.call_target {
                let callee = labels.require_function(target)?;
                out.push(callee.num_params());
                out.push(callee.num_locals());
            }
        }
        Ok(out)
    }
}

/// The data section: concatenated typed-literal bytes with labels for
/// the globals stored in it.
#[derive(Debug, Default)]
pub struct DataSection {
    data: Vec<u8>,
    labels: Vec<String>,
}

impl DataSection {
    pub const NAME: &'static str = "data";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn add_label(&mut self, name: &str) {
        self.labels.push(name.to_owned());
    }

    pub fn push_value(
        &mut self,
        ty: BinType,
        value: &Value,
        arch: ArchInfo,
    ) -> Result<(), AsmError> {
        self.data.extend(ty.value_to_bytes(value, arch)?);
        Ok(())
    }

    pub fn relocate(&self, base: u64, labels: &mut LabelManager) {
        for name in &self.labels {
            labels.offset_by(name, base);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// The types section: registered type symbols. Serializes as filler
/// bytes, one per byte of declared storage; the layout information
/// itself lives in the symbol table.
#[derive(Debug, Default)]
pub struct TypesSection {
    type_names: Vec<String>,
    size: u64,
}

impl TypesSection {
    pub const NAME: &'static str = "types";
    const FILL: u8 = 0xCA;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn type_names(&self) -> &[String] {
        &self.type_names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.type_names.iter().any(|n| n == name)
    }

    pub fn add_type(&mut self, name: &str) -> Result<(), AsmError> {
        if self.contains(name) {
            return Err(AsmError::DuplicateType {
                name: name.to_owned(),
            });
        }
        self.type_names.push(name.to_owned());
        Ok(())
    }

    pub fn grow(&mut self, bytes: u64) {
        self.size += bytes;
    }

    pub fn relocate(&self, base: u64, labels: &mut LabelManager) {
        for name in &self.type_names {
            labels.offset_by(name, base);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        vec![Self::FILL; self.size as usize]
    }
}

/// The imports section: raw bytes of every loaded file, plus the labels
/// of the function symbols copied out of their export tables.
#[derive(Debug, Default)]
pub struct ImportSection {
    data: Vec<u8>,
    labels: Vec<String>,
    imported: Vec<String>,
}

impl ImportSection {
    pub const NAME: &'static str = "imports";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Append a loaded file's section bytes, returning the offset the
    /// file's symbols are shifted by.
    pub fn append_file(&mut self, raw: &[u8]) -> u64 {
        let base = self.size();
        self.data.extend_from_slice(raw);
        base
    }

    pub fn record_import(&mut self, name: &str) -> Result<(), AsmError> {
        if self.imported.iter().any(|n| n == name) {
            return Err(AsmError::DuplicateImport {
                name: name.to_owned(),
            });
        }
        self.imported.push(name.to_owned());
        self.labels.push(name.to_owned());
        Ok(())
    }

    pub fn relocate(&self, base: u64, labels: &mut LabelManager) {
        for name in &self.labels {
            labels.offset_by(name, base);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// The exports section: auto-populated with every function bearing the
/// `export` modifier, serialized as an export table.
#[derive(Debug, Default)]
pub struct ExportSection {
    names: Vec<String>,
}

impl ExportSection {
    pub const NAME: &'static str = "exports";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn add_export(&mut self, name: &str) -> Result<(), AsmError> {
        if self.names.iter().any(|n| n == name) {
            return Err(AsmError::DuplicateExport {
                name: name.to_owned(),
            });
        }
        self.names.push(name.to_owned());
        Ok(())
    }

    pub fn byte_len(&self, labels: &LabelManager, arch: ArchInfo) -> Result<u64, AsmError> {
        if self.names.is_empty() {
            return Ok(0);
        }
        let mut len = arch.word_size() as u64;
        for name in &self.names {
            let function = labels.require_function(name)?;
            len += ExportTableEntry::byte_len(name, function.parameters.len(), arch);
        }
        Ok(len)
    }

    pub fn to_bytes(
        &self,
        labels: &LabelManager,
        arch: ArchInfo,
    ) -> Result<Vec<u8>, AsmError> {
        if self.names.is_empty() {
            return Ok(Vec::new());
        }
        let mut table = ExportTable::new();
        for name in &self.names {
            let function = labels.require_function(name)?;
            table.push(ExportTableEntry {
                name: name.clone(),
                offset: function.offset,
                return_type: function.return_type,
                parameter_types: function.parameter_types(),
                num_locals: function.num_locals(),
            });
        }
        Ok(table.to_bytes(arch))
    }
}
