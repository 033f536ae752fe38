use std::ops::BitOr;

use crate::ast::{
    ArgValue, Document, Fqn, FunctionDefinition, ImportDeclaration, ImportKind,
    ImportStatement, Instruction, InstructionArgument, Parameter, TypeDefinition,
    TypeExpr, VariableDeclaration,
};
use crate::token::{Token, TokenKind};
use crate::tokenizer::{SyntaxError, TokenQuery, Tokenizer, TokenizerOptions};

pub const KEYWORD_IMPORT: &str = "import";
pub const KEYWORD_FUNCTION: &str = "func";
pub const KEYWORD_TYPE: &str = "type";
pub const KEYWORD_VARIABLE: &str = "var";

/// Runtime-toggleable parser behavior, packed as a bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParserOptions(u8);

impl ParserOptions {
    pub const NONE: Self = Self(0);
    pub const ALLOW_FUNCTION_MODIFIERS: Self = Self(1 << 0);
    pub const ALLOW_VARIABLE_MODIFIERS: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: Self, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | other.0)
        } else {
            Self(self.0 & !other.0)
        }
    }
}

impl BitOr for ParserOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Recursive-descent parser over a tokenizer, one token of lookahead.
/// Parsing is strict: the first unexpected token aborts with an error.
#[derive(Debug, Default)]
pub struct Parser {
    options: ParserOptions,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(&self) -> ParserOptions {
        self.options
    }

    pub fn set_options(&mut self, options: ParserOptions) {
        self.options = options;
    }

    /// Run `f` with the given options forced on or off, restoring the
    /// previous option set on every exit path.
    pub fn with_options<R>(
        &mut self,
        options: ParserOptions,
        enabled: bool,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let saved = self.options;
        self.options = self.options.with(options, enabled);
        let result = f(self);
        self.options = saved;
        result
    }

    pub fn parse(&mut self, tokens: &mut Tokenizer) -> Result<Document, SyntaxError> {
        tokens.set_options(tokens.options().with(TokenizerOptions::EMIT_COMMENTS, false));
        tokens.advance()?;
        self.with_options(
            ParserOptions::ALLOW_FUNCTION_MODIFIERS | ParserOptions::ALLOW_VARIABLE_MODIFIERS,
            true,
            |parser| parser.parse_top_level(tokens),
        )
    }

    fn parse_top_level(&mut self, tokens: &mut Tokenizer) -> Result<Document, SyntaxError> {
        let mut document = Document::default();
        while tokens.has_tokens() {
            let keyword = tokens.current().lexeme.clone();
            match keyword.as_str() {
                KEYWORD_FUNCTION => document.functions.push(self.function_definition(tokens)?),
                KEYWORD_VARIABLE => document.globals.push(self.variable_declaration(tokens)?),
                KEYWORD_TYPE => document.types.push(self.type_definition(tokens)?),
                KEYWORD_IMPORT => document.imports.push(self.import_statement(tokens)?),
                _ => {
                    return Err(SyntaxError::UnexpectedToken {
                        expected: TokenQuery::Lexeme("import, func, type or var"),
                        got: tokens.current().clone(),
                    })
                }
            }
        }
        Ok(document)
    }

    fn try_eat(
        &self,
        tokens: &mut Tokenizer,
        query: impl Into<TokenQuery>,
    ) -> Result<Option<Token>, SyntaxError> {
        let query = query.into();
        if query.matches(tokens.current()) {
            return tokens.eat(query).map(Some);
        }
        Ok(None)
    }

    fn type_expr(&self, tokens: &mut Tokenizer) -> Result<TypeExpr, SyntaxError> {
        let name = tokens.eat(TokenKind::Identifier)?;
        let mut pointer_depth = 0u8;
        while self.try_eat(tokens, TokenKind::Asterisk)?.is_some() {
            pointer_depth = pointer_depth.saturating_add(1);
        }
        Ok(TypeExpr {
            name,
            pointer_depth,
        })
    }

    fn fully_qualified_name(&self, tokens: &mut Tokenizer) -> Result<Fqn, SyntaxError> {
        let mut parts = vec![tokens.eat(TokenKind::Identifier)?];
        while self.try_eat(tokens, TokenKind::Dot)?.is_some() {
            parts.push(tokens.eat(TokenKind::Identifier)?);
        }
        Ok(Fqn::new(parts))
    }

    fn modifiers(&self, tokens: &mut Tokenizer) -> Result<Vec<Token>, SyntaxError> {
        let mut modifiers = Vec::new();
        while let Some(modifier) = self.try_eat(tokens, TokenKind::Identifier)? {
            modifiers.push(modifier);
        }
        Ok(modifiers)
    }

    fn parameter(&self, tokens: &mut Tokenizer) -> Result<Parameter, SyntaxError> {
        let ty = self.type_expr(tokens)?;
        let name = self.try_eat(tokens, TokenKind::Identifier)?;
        Ok(Parameter { name, ty })
    }

    fn parameters(&self, tokens: &mut Tokenizer) -> Result<Vec<Parameter>, SyntaxError> {
        if tokens.current().kind != TokenKind::Identifier {
            return Ok(Vec::new());
        }
        let mut params = vec![self.parameter(tokens)?];
        while self.try_eat(tokens, TokenKind::Comma)?.is_some() {
            params.push(self.parameter(tokens)?);
        }
        Ok(params)
    }

    fn literal(&self, tokens: &mut Tokenizer) -> Result<Token, SyntaxError> {
        tokens.eat(TokenQuery::Literal)
    }

    /// `func FQN '(' Params? ')' ':' Type`
    fn function_signature(
        &self,
        tokens: &mut Tokenizer,
    ) -> Result<(Token, Fqn, Vec<Parameter>, TypeExpr), SyntaxError> {
        let keyword = tokens.eat(KEYWORD_FUNCTION)?;
        let name = self.fully_qualified_name(tokens)?;
        tokens.eat(TokenKind::LeftParen)?;
        let parameters = self.parameters(tokens)?;
        tokens.eat(TokenKind::RightParen)?;
        tokens.eat(TokenKind::Colon)?;
        let return_type = self.type_expr(tokens)?;
        Ok((keyword, name, parameters, return_type))
    }

    fn function_definition(
        &mut self,
        tokens: &mut Tokenizer,
    ) -> Result<FunctionDefinition, SyntaxError> {
        let (keyword, name, parameters, return_type) = self.function_signature(tokens)?;
        let modifiers = if self.options.contains(ParserOptions::ALLOW_FUNCTION_MODIFIERS) {
            self.modifiers(tokens)?
        } else {
            Vec::new()
        };
        let mut function = FunctionDefinition {
            keyword,
            name,
            parameters,
            return_type,
            modifiers,
            locals: Vec::new(),
            body: Vec::new(),
        };
        tokens.eat(TokenKind::LeftBrace)?;
        // newlines terminate instructions, so emit them inside the body
        tokens.with_options(TokenizerOptions::EMIT_NEWLINE, true, |tokens| loop {
            if self.try_eat(tokens, TokenKind::NewLine)?.is_some() {
                continue;
            }
            if self.try_eat(tokens, TokenKind::RightBrace)?.is_some() {
                return Ok(());
            }
            if tokens.current().lexeme == KEYWORD_VARIABLE {
                function.locals.push(self.variable_declaration(tokens)?);
            } else {
                function.body.push(self.instruction(tokens)?);
            }
        })?;
        // the closing brace may have been followed by an already-emitted
        // newline
        if tokens.current().kind == TokenKind::NewLine {
            tokens.advance()?;
        }
        Ok(function)
    }

    /// `FQN (Argument (',' Argument)*)?` — arguments are taken while the
    /// next token can begin one.
    fn instruction(&self, tokens: &mut Tokenizer) -> Result<Instruction, SyntaxError> {
        let name = self.fully_qualified_name(tokens)?;
        let mut arguments = Vec::new();
        let current = tokens.current();
        if current.kind == TokenKind::Identifier || current.kind.is_literal() {
            arguments.push(self.instruction_argument(tokens)?);
            while self.try_eat(tokens, TokenKind::Comma)?.is_some() {
                arguments.push(self.instruction_argument(tokens)?);
            }
        }
        Ok(Instruction { name, arguments })
    }

    fn instruction_argument(
        &self,
        tokens: &mut Tokenizer,
    ) -> Result<InstructionArgument, SyntaxError> {
        let value = if tokens.current().kind == TokenKind::Identifier {
            ArgValue::Name(self.fully_qualified_name(tokens)?)
        } else {
            ArgValue::Literal(self.literal(tokens)?)
        };
        let ty = if self.try_eat(tokens, TokenKind::Colon)?.is_some() {
            Some(self.type_expr(tokens)?)
        } else {
            None
        };
        Ok(InstructionArgument { value, ty })
    }

    /// `var FQN ':' Type ( ';' | Modifiers? '=' Literal ';' )`
    fn variable_declaration(
        &mut self,
        tokens: &mut Tokenizer,
    ) -> Result<VariableDeclaration, SyntaxError> {
        let keyword = tokens.eat(KEYWORD_VARIABLE)?;
        let name = self.fully_qualified_name(tokens)?;
        tokens.eat(TokenKind::Colon)?;
        let ty = self.type_expr(tokens)?;
        if self.try_eat(tokens, TokenKind::SemiColon)?.is_some() {
            return Ok(VariableDeclaration {
                keyword,
                name,
                ty,
                modifiers: Vec::new(),
                value: None,
            });
        }
        let modifiers = if self.options.contains(ParserOptions::ALLOW_VARIABLE_MODIFIERS) {
            self.modifiers(tokens)?
        } else {
            Vec::new()
        };
        tokens.eat(TokenKind::Equal)?;
        let value = self.literal(tokens)?;
        tokens.eat(TokenKind::SemiColon)?;
        Ok(VariableDeclaration {
            keyword,
            name,
            ty,
            modifiers,
            value: Some(value),
        })
    }

    /// `type FQN Modifiers* '{' (VarDecl | FunctionDefinition)* '}'`
    fn type_definition(
        &mut self,
        tokens: &mut Tokenizer,
    ) -> Result<TypeDefinition, SyntaxError> {
        let keyword = tokens.eat(KEYWORD_TYPE)?;
        let name = self.fully_qualified_name(tokens)?;
        let modifiers = self.modifiers(tokens)?;
        let mut definition = TypeDefinition {
            keyword,
            name,
            modifiers,
            fields: Vec::new(),
            functions: Vec::new(),
        };
        tokens.eat(TokenKind::LeftBrace)?;
        while self.try_eat(tokens, TokenKind::RightBrace)?.is_none() {
            let keyword = tokens.current().lexeme.clone();
            match keyword.as_str() {
                KEYWORD_VARIABLE => definition.fields.push(self.variable_declaration(tokens)?),
                KEYWORD_FUNCTION => {
                    definition.functions.push(self.function_definition(tokens)?)
                }
                _ => {
                    return Err(SyntaxError::UnexpectedToken {
                        expected: TokenQuery::Lexeme("var or func"),
                        got: tokens.current().clone(),
                    })
                }
            }
        }
        Ok(definition)
    }

    /// `import Modifiers* StringLiteral ( ';' | '{' ImportDecl* '}' )`
    fn import_statement(
        &mut self,
        tokens: &mut Tokenizer,
    ) -> Result<ImportStatement, SyntaxError> {
        let keyword = tokens.eat(KEYWORD_IMPORT)?;
        let modifiers = self.modifiers(tokens)?;
        let file = tokens.eat(TokenKind::StringLit)?;
        let mut statement = ImportStatement {
            keyword,
            file,
            modifiers,
            imports: Vec::new(),
        };
        if self.try_eat(tokens, TokenKind::SemiColon)?.is_some() {
            return Ok(statement);
        }
        tokens.eat(TokenKind::LeftBrace)?;
        while self.try_eat(tokens, TokenKind::RightBrace)?.is_none() {
            statement.imports.push(self.import_declaration(tokens)?);
        }
        Ok(statement)
    }

    fn import_declaration(
        &self,
        tokens: &mut Tokenizer,
    ) -> Result<ImportDeclaration, SyntaxError> {
        let keyword = tokens.eat(TokenKind::Identifier)?;
        let kind = match keyword.lexeme.as_str() {
            KEYWORD_VARIABLE => ImportKind::Variable,
            KEYWORD_FUNCTION => ImportKind::Function,
            KEYWORD_TYPE => ImportKind::Type,
            _ => {
                return Err(SyntaxError::UnexpectedToken {
                    expected: TokenQuery::Lexeme("var, func or type"),
                    got: keyword,
                })
            }
        };
        let name = self.fully_qualified_name(tokens)?;
        Ok(ImportDeclaration {
            keyword,
            kind,
            name,
        })
    }
}
