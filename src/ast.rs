use crate::token::Token;

/// A dot-joined sequence of identifiers, e.g. `Point.y` or `main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fqn {
    parts: Vec<Token>,
}

impl Fqn {
    pub fn new(parts: Vec<Token>) -> Self {
        debug_assert!(!parts.is_empty());
        Self { parts }
    }

    pub fn parts(&self) -> &[Token] {
        &self.parts
    }

    pub fn first(&self) -> &Token {
        &self.parts[0]
    }

    pub fn last(&self) -> &Token {
        &self.parts[self.parts.len() - 1]
    }

    pub fn name(&self) -> String {
        self.parts
            .iter()
            .map(|t| t.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl std::fmt::Display for Fqn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// A type as spelled in the source: a name plus zero or more `*` suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeExpr {
    pub name: Token,
    pub pointer_depth: u8,
}

impl TypeExpr {
    pub fn is_pointer(&self) -> bool {
        self.pointer_depth > 0
    }
}

impl std::fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name.lexeme)?;
        for _ in 0..self.pointer_depth {
            f.write_str("*")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Variable,
    Function,
    Type,
}

#[derive(Debug, Clone)]
pub struct ImportDeclaration {
    pub keyword: Token,
    pub kind: ImportKind,
    pub name: Fqn,
}

#[derive(Debug, Clone)]
pub struct ImportStatement {
    pub keyword: Token,
    pub file: Token,
    pub modifiers: Vec<Token>,
    pub imports: Vec<ImportDeclaration>,
}

/// A `var` declaration; `value` is set when the source initializes it.
#[derive(Debug, Clone)]
pub struct VariableDeclaration {
    pub keyword: Token,
    pub name: Fqn,
    pub ty: TypeExpr,
    pub modifiers: Vec<Token>,
    pub value: Option<Token>,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: Option<Token>,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone)]
pub enum ArgValue {
    Name(Fqn),
    Literal(Token),
}

#[derive(Debug, Clone)]
pub struct InstructionArgument {
    pub value: ArgValue,
    pub ty: Option<TypeExpr>,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub name: Fqn,
    pub arguments: Vec<InstructionArgument>,
}

#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub keyword: Token,
    pub name: Fqn,
    pub parameters: Vec<Parameter>,
    pub return_type: TypeExpr,
    pub modifiers: Vec<Token>,
    pub locals: Vec<VariableDeclaration>,
    pub body: Vec<Instruction>,
}

#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub keyword: Token,
    pub name: Fqn,
    pub modifiers: Vec<Token>,
    pub fields: Vec<VariableDeclaration>,
    pub functions: Vec<FunctionDefinition>,
}

/// Everything one source file declares, in source order per list.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub imports: Vec<ImportStatement>,
    pub globals: Vec<VariableDeclaration>,
    pub types: Vec<TypeDefinition>,
    pub functions: Vec<FunctionDefinition>,
}
