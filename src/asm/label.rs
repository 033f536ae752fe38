use std::collections::HashMap;

use crate::asm::AsmError;
use crate::bin_type::BinType;
use crate::qpl::ArchInfo;

/// A named, offset-addressable point inside a sized section.
#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub offset: u64,
}

/// A parameter or local slot of a function.
#[derive(Debug, Clone)]
pub struct Slot {
    pub name: String,
    pub ty: BinType,
    pub index: u8,
}

/// A callable symbol. Imported functions carry only the signature part
/// (`num_locals` with empty slot tables); functions defined in this
/// source also carry their parameter and local slots plus modifiers.
#[derive(Debug, Clone)]
pub struct FunctionSymbol {
    pub name: String,
    pub offset: u64,
    pub return_type: BinType,
    pub parameters: Vec<Slot>,
    pub num_locals: u8,
    pub locals: Vec<Slot>,
    pub modifiers: Vec<String>,
}

impl FunctionSymbol {
    pub const MODIFIER_EXPORT: &'static str = "export";

    pub fn parameter_types(&self) -> Vec<BinType> {
        self.parameters.iter().map(|p| p.ty).collect()
    }

    pub fn num_params(&self) -> u8 {
        self.parameters.len() as u8
    }

    pub fn num_locals(&self) -> u8 {
        self.num_locals
    }

    pub fn parameter(&self, name: &str) -> Option<&Slot> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn local(&self, name: &str) -> Option<&Slot> {
        self.locals.iter().find(|l| l.name == name)
    }

    pub fn is_exported(&self) -> bool {
        self.modifiers.iter().any(|m| m == Self::MODIFIER_EXPORT)
    }
}

/// How a user-defined type stores one field.
#[derive(Debug, Clone)]
pub enum FieldType {
    Builtin(BinType),
    /// Another user-defined type, embedded inline.
    Struct { name: String, size: u64 },
}

impl FieldType {
    pub fn size(&self, arch: ArchInfo) -> u64 {
        match self {
            FieldType::Builtin(ty) => ty.size(arch) as u64,
            FieldType::Struct { size, .. } => *size,
        }
    }
}

/// A field of a user-defined type; the offset is relative to the start
/// of the owning type.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub offset: u64,
    pub ty: FieldType,
}

/// A user-defined type: a label in the types section plus an ordered
/// field list and the total storage size.
#[derive(Debug, Clone)]
pub struct TypeSymbol {
    pub name: String,
    pub offset: u64,
    pub modifiers: Vec<String>,
    fields: Vec<FieldDefinition>,
    size: u64,
}

impl TypeSymbol {
    pub fn new(name: String, offset: u64, modifiers: Vec<String>) -> Self {
        Self {
            name,
            offset,
            modifiers,
            fields: Vec::new(),
            size: 0,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn add_field(
        &mut self,
        name: &str,
        ty: FieldType,
        arch: ArchInfo,
    ) -> Result<&FieldDefinition, AsmError> {
        if self.field(name).is_some() {
            return Err(AsmError::DuplicateField {
                type_name: self.name.clone(),
                field: name.to_owned(),
            });
        }
        let size = ty.size(arch);
        self.fields.push(FieldDefinition {
            name: name.to_owned(),
            offset: self.size,
            ty,
        });
        self.size += size;
        Ok(&self.fields[self.fields.len() - 1])
    }
}

/// Any named entity the assembler can resolve a reference to.
#[derive(Debug, Clone)]
pub enum Symbol {
    Label(Label),
    Function(FunctionSymbol),
    Type(TypeSymbol),
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Label(l) => &l.name,
            Symbol::Function(f) => &f.name,
            Symbol::Type(t) => &t.name,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            Symbol::Label(l) => l.offset,
            Symbol::Function(f) => f.offset,
            Symbol::Type(t) => t.offset,
        }
    }

    pub fn offset_mut(&mut self) -> &mut u64 {
        match self {
            Symbol::Label(l) => &mut l.offset,
            Symbol::Function(f) => &mut f.offset,
            Symbol::Type(t) => &mut t.offset,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionSymbol> {
        match self {
            Symbol::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&TypeSymbol> {
        match self {
            Symbol::Type(t) => Some(t),
            _ => None,
        }
    }
}

/// The single global symbol table; duplicate names are rejected.
#[derive(Debug, Default)]
pub struct LabelManager {
    symbols: HashMap<String, Symbol>,
}

impl LabelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, symbol: Symbol) -> Result<(), AsmError> {
        let name = symbol.name().to_owned();
        if self.symbols.contains_key(&name) {
            return Err(AsmError::DuplicateLabel { name });
        }
        self.symbols.insert(name, symbol);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.symbols.get_mut(name)
    }

    pub fn require(&self, name: &str) -> Result<&Symbol, AsmError> {
        self.get(name).ok_or_else(|| AsmError::UnknownSymbol {
            name: name.to_owned(),
        })
    }

    pub fn require_function(&self, name: &str) -> Result<&FunctionSymbol, AsmError> {
        self.require(name)?
            .as_function()
            .ok_or_else(|| AsmError::NotAFunction {
                name: name.to_owned(),
            })
    }

    pub fn require_type(&self, name: &str) -> Result<&TypeSymbol, AsmError> {
        self.require(name)?
            .as_type()
            .ok_or_else(|| AsmError::UnknownType {
                name: name.to_owned(),
            })
    }

    /// Shift a symbol owned by a section whose base offset just became
    /// known.
    pub fn offset_by(&mut self, name: &str, base: u64) {
        if let Some(symbol) = self.symbols.get_mut(name) {
            *symbol.offset_mut() += base;
        }
    }
}
