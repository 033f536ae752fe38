pub mod label;
pub mod section;

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::ast::{
    ArgValue, Document, Fqn, FunctionDefinition, ImportKind, ImportStatement,
    InstructionArgument, TypeDefinition, TypeExpr, VariableDeclaration,
};
use crate::bin_type::{BinType, LiteralError, Value};
use crate::inst::{self, Opcode, ParamKind};
use crate::qpl::exports::ExportTable;
use crate::qpl::{read_file, ArchInfo, FileError, QplFile, QplFlags};
use crate::stack::{Stack, StackError, StackState};
use crate::token::{Token, TokenKind};

use label::{FieldType, FunctionSymbol, Label, LabelManager, Slot, Symbol, TypeSymbol};
use section::{
    CodeSection, ConfigSection, ConfigValue, DataSection, ExportSection,
    ImportSection, Operand, OperandPayload, TypesSection,
};

/// The function the `entry` config option points at when the entry-point
/// flag is requested.
pub const ENTRY_FUNCTION: &str = "main";

#[derive(Debug, thiserror::Error)]
pub enum AsmError {
    #[error("unknown instruction {name:?}")]
    UnknownInstruction { name: String },
    #[error("unknown type {name:?}")]
    UnknownType { name: String },
    #[error("unknown symbol {name:?}")]
    UnknownSymbol { name: String },
    #[error("unknown option {name:?}")]
    UnknownOption { name: String },
    #[error("no function {name:?} is exported by {file:?}")]
    UnknownExport { name: String, file: String },
    #[error("label {name:?} already exists")]
    DuplicateLabel { name: String },
    #[error("type {name:?} already exists")]
    DuplicateType { name: String },
    #[error("field {field:?} already exists in type {type_name:?}")]
    DuplicateField { type_name: String, field: String },
    #[error("{name:?} was already imported")]
    DuplicateImport { name: String },
    #[error("function {name:?} is already exported")]
    DuplicateExport { name: String },
    #[error("{name:?} is not a function")]
    NotAFunction { name: String },
    #[error("file {file:?} has no exports section")]
    NoExports { file: String },
    #[error("only functions can be imported, {name:?} is not one")]
    UnsupportedImportKind { name: String },
    #[error("instruction {name:?} takes {expected} arguments, but {got} were given")]
    WrongArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("option {name:?} takes exactly {expected} arguments, but {got} were given")]
    OptionArity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("expected argument type {expected}, got {got}")]
    InvalidInstructionArgumentType { expected: String, got: String },
    #[error("{name:?} used outside a function")]
    OutsideFunction { name: String },
    #[error("function {name:?} has too many parameters")]
    TooManyParameters { name: String },
    #[error("function {name:?} has too many locals")]
    TooManyLocals { name: String },
    #[error(transparent)]
    Literal(#[from] LiteralError),
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error(transparent)]
    File(#[from] FileError),
}

/// Drives one source document through symbol resolution, type-checked
/// instruction encoding, relocation and emission. One instance serves
/// one `assemble` call; the symbol table stays inspectable afterwards.
#[derive(Debug)]
pub struct Assembler {
    arch: ArchInfo,
    base_dir: PathBuf,
    labels: LabelManager,
    config: ConfigSection,
    types: TypesSection,
    data: DataSection,
    code: CodeSection,
    imports: ImportSection,
    exports: ExportSection,
    current_function: Option<String>,
    stack: Stack,
}

impl Assembler {
    pub fn new(arch: ArchInfo) -> Self {
        Self {
            arch,
            base_dir: PathBuf::from("."),
            labels: LabelManager::new(),
            config: ConfigSection::new(),
            types: TypesSection::new(),
            data: DataSection::new(),
            code: CodeSection::new(),
            imports: ImportSection::new(),
            exports: ExportSection::new(),
            current_function: None,
            stack: Stack::new(),
        }
    }

    /// Directory `import` file paths are resolved against.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn arch(&self) -> ArchInfo {
        self.arch
    }

    pub fn labels(&self) -> &LabelManager {
        &self.labels
    }

    pub fn code(&self) -> &CodeSection {
        &self.code
    }

    pub fn assemble(
        &mut self,
        document: &Document,
        flags: QplFlags,
    ) -> Result<QplFile, AsmError> {
        for statement in &document.imports {
            self.import_statement(statement)?;
        }
        for definition in &document.types {
            self.define_type(definition)?;
        }
        for variable in &document.globals {
            self.define_global(variable)?;
        }

        let mut functions: Vec<(String, &FunctionDefinition)> = Vec::new();
        for definition in &document.types {
            for function in &definition.functions {
                let name = format!("{}.{}", definition.name, function.name);
                functions.push((name, function));
            }
        }
        for function in &document.functions {
            functions.push((function.name.name(), function));
        }

        // signatures first, so calls may point forward
        for (name, function) in &functions {
            self.declare_function(name, function)?;
        }
        for (name, function) in &functions {
            self.assemble_function(name, function)?;
        }

        if flags.has_entry_point() {
            self.labels.require(ENTRY_FUNCTION)?;
            self.config.set(
                ConfigSection::OPTION_ENTRY,
                vec![ConfigValue::Label(ENTRY_FUNCTION.to_owned())],
            )?;
        }

        self.relocate();
        self.emit()
    }

    fn import_statement(&mut self, statement: &ImportStatement) -> Result<(), AsmError> {
        let file_name = statement.file.lexeme.clone();
        let path = self.base_dir.join(&file_name);
        let file = read_file(&path)?;
        let arch = file
            .header()
            .map(|h| h.arch)
            .ok_or(FileError::Truncated { what: "header" })?;
        let exports = file
            .section(ExportSection::NAME)
            .ok_or_else(|| AsmError::NoExports {
                file: file_name.clone(),
            })?;
        let table = ExportTable::from_bytes(exports, arch)?;
        let base = self.imports.append_file(&file.raw_data());

        for declaration in &statement.imports {
            let name = declaration.name.name();
            if declaration.kind != ImportKind::Function {
                return Err(AsmError::UnsupportedImportKind { name });
            }
            let export = table.get(&name).ok_or_else(|| AsmError::UnknownExport {
                name: name.clone(),
                file: file_name.clone(),
            })?;
            self.imports.record_import(&name)?;
            let offset = export.offset + base;
            debug!(function = %name, offset, "imported function");
            let parameters = export
                .parameter_types
                .iter()
                .enumerate()
                .map(|(i, &ty)| Slot {
                    name: i.to_string(),
                    ty,
                    index: i as u8,
                })
                .collect();
            self.labels.add(Symbol::Function(FunctionSymbol {
                name,
                offset,
                return_type: export.return_type,
                parameters,
                num_locals: export.num_locals,
                locals: Vec::new(),
                modifiers: Vec::new(),
            }))?;
        }
        Ok(())
    }

    fn define_type(&mut self, definition: &TypeDefinition) -> Result<(), AsmError> {
        let name = definition.name.name();
        self.types.add_type(&name)?;
        let modifiers = definition
            .modifiers
            .iter()
            .map(|m| m.lexeme.clone())
            .collect();
        self.labels.add(Symbol::Type(TypeSymbol::new(
            name.clone(),
            self.types.size(),
            modifiers,
        )))?;

        let mut fields = Vec::with_capacity(definition.fields.len());
        for field in &definition.fields {
            if field.value.is_some() {
                warn!(field = %field.name, "field initializers are ignored");
            }
            let ty = self.resolve_field_type(&field.ty)?;
            fields.push((field.name.name(), ty));
        }
        for (field_name, ty) in fields {
            let size = ty.size(self.arch);
            match self.labels.get_mut(&name) {
                Some(Symbol::Type(symbol)) => {
                    symbol.add_field(&field_name, ty, self.arch)?;
                }
                _ => {
                    return Err(AsmError::UnknownType { name: name.clone() });
                }
            }
            self.types.grow(size);
        }
        Ok(())
    }

    fn define_global(&mut self, variable: &VariableDeclaration) -> Result<(), AsmError> {
        let name = variable.name.name();
        let ty = self.resolve_bin_type(&variable.ty)?;
        self.labels.add(Symbol::Label(Label {
            name: name.clone(),
            offset: self.data.size(),
        }))?;
        self.data.add_label(&name);
        let value = match &variable.value {
            Some(token) => literal_as(token, ty)?,
            None => ty.default_value(),
        };
        self.data.push_value(ty, &value, self.arch)
    }

    fn declare_function(
        &mut self,
        name: &str,
        function: &FunctionDefinition,
    ) -> Result<(), AsmError> {
        if function.parameters.len() > usize::from(u8::MAX) {
            return Err(AsmError::TooManyParameters {
                name: name.to_owned(),
            });
        }
        if function.locals.len() > usize::from(u8::MAX) {
            return Err(AsmError::TooManyLocals {
                name: name.to_owned(),
            });
        }

        let return_type = self.resolve_bin_type(&function.return_type)?;
        let mut parameters = Vec::with_capacity(function.parameters.len());
        for (index, parameter) in function.parameters.iter().enumerate() {
            let ty = self.resolve_bin_type(&parameter.ty)?;
            // anonymous parameters go by their position
            let slot_name = parameter
                .name
                .as_ref()
                .map(|t| t.lexeme.clone())
                .unwrap_or_else(|| index.to_string());
            parameters.push(Slot {
                name: slot_name,
                ty,
                index: index as u8,
            });
        }
        let mut locals = Vec::with_capacity(function.locals.len());
        for (index, local) in function.locals.iter().enumerate() {
            let ty = self.resolve_bin_type(&local.ty)?;
            locals.push(Slot {
                name: local.name.name(),
                ty,
                index: index as u8,
            });
        }

        let symbol = FunctionSymbol {
            name: name.to_owned(),
            offset: 0,
            return_type,
            parameters,
            num_locals: locals.len() as u8,
            locals,
            modifiers: function
                .modifiers
                .iter()
                .map(|m| m.lexeme.clone())
                .collect(),
        };
        let exported = symbol.is_exported();
        self.labels.add(Symbol::Function(symbol))?;
        self.code.add_label(name);
        if exported {
            self.exports.add_export(name)?;
        }
        Ok(())
    }

    fn assemble_function(
        &mut self,
        name: &str,
        function: &FunctionDefinition,
    ) -> Result<(), AsmError> {
        let offset = self.code.size();
        if let Some(Symbol::Function(symbol)) = self.labels.get_mut(name) {
            symbol.offset = offset;
        }
        let returns_void = self.labels.require_function(name)?.return_type == BinType::Void;
        self.current_function = Some(name.to_owned());
        self.stack = Stack::new();

        for instruction in &function.body {
            if returns_void && instruction.name.name() == "ret" {
                // a void return still pops one value at runtime
                self.assemble_instruction(&push_zero())?;
            }
            self.assemble_instruction(instruction)?;
        }
        self.current_function = None;
        Ok(())
    }

    fn assemble_instruction(
        &mut self,
        instruction: &crate::ast::Instruction,
    ) -> Result<(), AsmError> {
        let name = instruction.name.name();
        let template = inst::lookup(&name)
            .ok_or_else(|| AsmError::UnknownInstruction { name: name.clone() })?;
        if instruction.arguments.len() != template.params.len() {
            return Err(AsmError::WrongArgumentCount {
                name,
                expected: template.params.len(),
                got: instruction.arguments.len(),
            });
        }

        let mut bindings: HashMap<&'static str, BinType> = HashMap::new();
        let mut operands = Vec::new();
        for (param, argument) in template.params.iter().zip(&instruction.arguments) {
            match *param {
                ParamKind::TypeIndex(generic) => {
                    let (index, bound) = self.resolve_type_argument(argument)?;
                    bindings.insert(generic, bound);
                    operands.push(Operand::literal(
                        BinType::Int8,
                        Value::Int(i64::from(index)),
                    ));
                }
                ParamKind::SizeOf => {
                    let size = self.resolve_type_size(argument)?;
                    operands.push(Operand::literal(BinType::Int, Value::Int(size as i64)));
                }
                ParamKind::Var(generic) => {
                    let (var_operands, bound) = self.resolve_var_argument(&name, argument)?;
                    bindings.insert(generic, bound);
                    operands.extend(var_operands);
                }
                ParamKind::Value(ty) => {
                    operands.push(self.resolve_value_argument(ty, argument)?);
                }
            }
        }

        let mut call_target = None;
        match template.opcode {
            Opcode::Call => {
                let target = match &operands[0].payload {
                    OperandPayload::Label(target) => target.clone(),
                    _ => {
                        return Err(AsmError::NotAFunction {
                            name: describe_argument(&instruction.arguments[0]),
                        })
                    }
                };
                let callee = self.labels.require_function(&target)?;
                let arguments = StackState::from(callee.parameter_types());
                let result = if callee.return_type == BinType::Void {
                    StackState::default()
                } else {
                    StackState::from(vec![callee.return_type])
                };
                self.stack.apply(&arguments.then(result), &mut bindings)?;
                call_target = Some(target);
            }
            // unchecked by definition
            Opcode::UnsafeCall => {}
            Opcode::Ret => {
                let current = self.current_function_symbol("ret")?;
                let popped = match current.return_type {
                    BinType::Void => BinType::Int,
                    other => other,
                };
                let transformation =
                    StackState::from(vec![popped]).then(StackState::default());
                self.stack.apply(&transformation, &mut bindings)?;
            }
            _ => {
                self.stack.apply(&template.transformation, &mut bindings)?;
            }
        }

        self.code
            .push_instruction(template.opcode, operands, call_target, self.arch);
        Ok(())
    }

    fn current_function_symbol(&self, context: &str) -> Result<&FunctionSymbol, AsmError> {
        let name = self
            .current_function
            .as_ref()
            .ok_or_else(|| AsmError::OutsideFunction {
                name: context.to_owned(),
            })?;
        self.labels.require_function(name)
    }

    /// A `type` pseudo-argument: the named type's index and the binary
    /// type it binds. User-defined types are addressed through pointers.
    fn resolve_type_argument(
        &self,
        argument: &InstructionArgument,
    ) -> Result<(u8, BinType), AsmError> {
        match &argument.value {
            ArgValue::Name(fqn) => {
                let name = fqn.name();
                if let Some(ty) = BinType::from_name(&name) {
                    return Ok((ty.index(), ty));
                }
                match self.labels.get(&name) {
                    Some(Symbol::Type(_)) => Ok((BinType::Ptr.index(), BinType::Ptr)),
                    _ => Err(AsmError::UnknownType { name }),
                }
            }
            ArgValue::Literal(token) => Err(AsmError::InvalidInstructionArgumentType {
                expected: "a type name".to_owned(),
                got: token.lexeme.clone(),
            }),
        }
    }

    /// A `sizeof` pseudo-argument: the named type's byte size.
    fn resolve_type_size(&self, argument: &InstructionArgument) -> Result<u64, AsmError> {
        match &argument.value {
            ArgValue::Name(fqn) => {
                let name = fqn.name();
                if let Some(ty) = BinType::from_name(&name) {
                    return Ok(ty.size(self.arch) as u64);
                }
                match self.labels.get(&name) {
                    Some(Symbol::Type(symbol)) => Ok(symbol.size()),
                    _ => Err(AsmError::UnknownType { name }),
                }
            }
            ArgValue::Literal(token) => Err(AsmError::InvalidInstructionArgumentType {
                expected: "a type name".to_owned(),
                got: token.lexeme.clone(),
            }),
        }
    }

    /// A `var` pseudo-argument: the argument's type index followed by its
    /// value. Slot references encode as (slot kind index, slot index);
    /// other symbols encode as pointers to their labels.
    fn resolve_var_argument(
        &self,
        instruction: &str,
        argument: &InstructionArgument,
    ) -> Result<(Vec<Operand>, BinType), AsmError> {
        match &argument.value {
            ArgValue::Literal(token) => {
                let ty = match &argument.ty {
                    Some(annotation) => self.resolve_bin_type(annotation)?,
                    None => BinType::from_literal_kind(token.kind).ok_or_else(|| {
                        AsmError::InvalidInstructionArgumentType {
                            expected: "a literal".to_owned(),
                            got: token.lexeme.clone(),
                        }
                    })?,
                };
                let value = literal_as(token, ty)?;
                Ok((
                    vec![
                        Operand::literal(BinType::Int8, Value::Int(i64::from(ty.index()))),
                        Operand::literal(ty, value),
                    ],
                    ty,
                ))
            }
            ArgValue::Name(fqn) => {
                let parts = fqn.parts();
                if parts.len() == 2
                    && (parts[0].lexeme == "arg" || parts[0].lexeme == "local")
                {
                    let current = self.current_function_symbol(instruction)?;
                    let slot_name = parts[1].lexeme.as_str();
                    let (marker, slot) = if parts[0].lexeme == "arg" {
                        (BinType::Arg, current.parameter(slot_name))
                    } else {
                        (BinType::Local, current.local(slot_name))
                    };
                    let slot = slot.ok_or_else(|| AsmError::UnknownSymbol {
                        name: fqn.name(),
                    })?;
                    return Ok((
                        vec![
                            Operand::literal(
                                BinType::Int8,
                                Value::Int(i64::from(marker.index())),
                            ),
                            Operand::literal(BinType::Int8, Value::Int(i64::from(slot.index))),
                        ],
                        slot.ty,
                    ));
                }
                if parts.len() == 2
                    && self
                        .labels
                        .get(&parts[0].lexeme)
                        .and_then(Symbol::as_type)
                        .is_some()
                {
                    return Ok((
                        vec![
                            Operand::literal(
                                BinType::Int8,
                                Value::Int(i64::from(BinType::Int.index())),
                            ),
                            Operand {
                                ty: BinType::Int,
                                payload: OperandPayload::FieldRef {
                                    type_name: parts[0].lexeme.clone(),
                                    field: parts[1].lexeme.clone(),
                                },
                            },
                        ],
                        BinType::Int,
                    ));
                }
                let name = fqn.name();
                self.labels.require(&name)?;
                Ok((
                    vec![
                        Operand::literal(
                            BinType::Int8,
                            Value::Int(i64::from(BinType::Ptr.index())),
                        ),
                        Operand {
                            ty: BinType::Ptr,
                            payload: OperandPayload::Label(name),
                        },
                    ],
                    BinType::Ptr,
                ))
            }
        }
    }

    /// An operand with a fixed type; symbolic references stay names
    /// until emission.
    fn resolve_value_argument(
        &self,
        ty: BinType,
        argument: &InstructionArgument,
    ) -> Result<Operand, AsmError> {
        match &argument.value {
            ArgValue::Literal(token) => {
                Ok(Operand::literal(ty, literal_as(token, ty)?))
            }
            ArgValue::Name(fqn) => {
                let parts = fqn.parts();
                if parts.len() == 2
                    && self
                        .labels
                        .get(&parts[0].lexeme)
                        .and_then(Symbol::as_type)
                        .is_some()
                {
                    return Ok(Operand {
                        ty,
                        payload: OperandPayload::FieldRef {
                            type_name: parts[0].lexeme.clone(),
                            field: parts[1].lexeme.clone(),
                        },
                    });
                }
                let name = fqn.name();
                self.labels.require(&name)?;
                Ok(Operand {
                    ty,
                    payload: OperandPayload::Label(name),
                })
            }
        }
    }

    fn resolve_bin_type(&self, ty: &TypeExpr) -> Result<BinType, AsmError> {
        if ty.is_pointer() {
            return Ok(BinType::Ptr);
        }
        if let Some(builtin) = BinType::from_name(&ty.name.lexeme) {
            return Ok(builtin);
        }
        match self.labels.get(&ty.name.lexeme) {
            Some(Symbol::Type(_)) => Ok(BinType::Ptr),
            _ => Err(AsmError::UnknownType {
                name: ty.name.lexeme.clone(),
            }),
        }
    }

    fn resolve_field_type(&self, ty: &TypeExpr) -> Result<FieldType, AsmError> {
        if ty.is_pointer() {
            return Ok(FieldType::Builtin(BinType::Ptr));
        }
        if let Some(builtin) = BinType::from_name(&ty.name.lexeme) {
            return Ok(FieldType::Builtin(builtin));
        }
        match self.labels.get(&ty.name.lexeme) {
            Some(Symbol::Type(symbol)) => Ok(FieldType::Struct {
                name: symbol.name.clone(),
                size: symbol.size(),
            }),
            _ => Err(AsmError::UnknownType {
                name: ty.name.lexeme.clone(),
            }),
        }
    }

    /// Fix every label and instruction offset by walking the sections in
    /// emission order and accumulating their sizes.
    fn relocate(&mut self) {
        let mut offset = self.config.byte_len(self.arch);
        self.types.relocate(offset, &mut self.labels);
        offset += self.types.size();
        self.data.relocate(offset, &mut self.labels);
        offset += self.data.size();
        self.code.relocate(offset, &mut self.labels);
        offset += self.code.size();
        self.imports.relocate(offset, &mut self.labels);
        // the exports table closes the file; nothing is laid out past it
    }

    /// Serialize every section; empty sections are left out of the file.
    fn emit(&self) -> Result<QplFile, AsmError> {
        let sections: [(&str, Vec<u8>); 6] = [
            (
                ConfigSection::NAME,
                self.config.to_bytes(&self.labels, self.arch)?,
            ),
            (TypesSection::NAME, self.types.to_bytes()),
            (DataSection::NAME, self.data.to_bytes()),
            (
                CodeSection::NAME,
                self.code.to_bytes(&self.labels, self.arch)?,
            ),
            (ImportSection::NAME, self.imports.to_bytes()),
            (
                ExportSection::NAME,
                self.exports.to_bytes(&self.labels, self.arch)?,
            ),
        ];

        let mut file = QplFile::new();
        for (name, data) in sections {
            if !data.is_empty() {
                file.add_section(name, data)?;
            }
        }
        Ok(file)
    }
}

fn push_zero() -> crate::ast::Instruction {
    crate::ast::Instruction {
        name: Fqn::new(vec![Token::synthetic(TokenKind::Identifier, "push")]),
        arguments: vec![InstructionArgument {
            value: ArgValue::Literal(Token::synthetic(TokenKind::IntLit, "0")),
            ty: None,
        }],
    }
}

fn describe_argument(argument: &InstructionArgument) -> String {
    match &argument.value {
        ArgValue::Name(fqn) => fqn.name(),
        ArgValue::Literal(token) => token.lexeme.clone(),
    }
}

/// Convert a literal token into a value of the given binary type.
fn literal_as(token: &Token, ty: BinType) -> Result<Value, AsmError> {
    match token.kind {
        TokenKind::CharLit => {
            let c = token.lexeme.chars().next().unwrap_or('\0');
            Ok(Value::Int(c as i64))
        }
        TokenKind::HexLit => i64::from_str_radix(&token.lexeme, 16)
            .map(Value::Int)
            .map_err(|_| {
                AsmError::from(LiteralError {
                    ty,
                    text: token.lexeme.clone(),
                })
            }),
        TokenKind::NullLit => Ok(Value::Int(0)),
        _ => Ok(ty.parse(&token.lexeme)?),
    }
}
