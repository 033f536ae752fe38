use rstest::rstest;

use std::collections::HashMap;

use crate::asm::section::ConfigSection;
use crate::asm::{AsmError, Assembler};
use crate::ast::Document;
use crate::bin_type::{BinType, Value};
use crate::inst;
use crate::qpl::exports::{ExportTable, ExportTableEntry};
use crate::qpl::{ArchInfo, Header, QplFlags, SectionTableEntry};
use crate::stack::{Stack, StackError, StackState, TypeTag};
use crate::token::TokenKind;
use crate::tokenizer::{Tokenizer, TokenizerOptions};
use crate::{assemble, Error, Parser, QplFile};

fn arch64() -> ArchInfo {
    ArchInfo::new(8, false).unwrap()
}

fn parse(source: &str) -> Document {
    Parser::new().parse(&mut Tokenizer::new(source)).unwrap()
}

fn assemble_doc(source: &str, flags: QplFlags) -> (Assembler, QplFile) {
    let document = parse(source);
    let mut assembler = Assembler::new(arch64());
    let file = assembler.assemble(&document, flags).unwrap();
    (assembler, file)
}

fn word(value: i64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

// ---- header and section table ----

#[rstest]
#[case(QplFlags::NONE, 8, false, 0)]
#[case(QplFlags::HAS_ENTRY_POINT, 8, false, 2)]
#[case(QplFlags::HAS_ENTRY_POINT | QplFlags::HAS_EXPORTS, 4, true, 6)]
#[case(QplFlags::RELATIVE_ADDRESSING, 2, false, 255)]
fn header_round_trip(
    #[case] flags: QplFlags,
    #[case] word_size: u8,
    #[case] big_endian: bool,
    #[case] num_sections: u8,
) {
    let header = Header {
        flags,
        arch: ArchInfo::new(word_size, big_endian).unwrap(),
        num_sections,
        version: (1, 0),
    };
    let bytes = header.to_bytes();
    assert_eq!(bytes.len(), Header::SIZE);
    assert_eq!(&bytes[0..4], b"QPL\0");
    assert_eq!(Header::from_bytes(&bytes).unwrap(), header);
}

#[test]
fn header_rejects_bad_magic() {
    let mut bytes = Header {
        flags: QplFlags::NONE,
        arch: arch64(),
        num_sections: 0,
        version: (1, 0),
    }
    .to_bytes();
    bytes[0] = b'X';
    assert!(matches!(
        Header::from_bytes(&bytes),
        Err(crate::FileError::BadMagic { .. })
    ));
}

#[test]
fn header_rejects_truncated_input() {
    assert!(matches!(
        Header::from_bytes(&[0x51, 0x50]),
        Err(crate::FileError::Truncated { .. })
    ));
}

#[rstest]
#[case("code", 11, 48)]
#[case("exports!", 0x11223344, 0)]
#[case("a", 0, u32::MAX)]
fn section_table_entry_round_trip(
    #[case] name: &str,
    #[case] size: u32,
    #[case] offset: u32,
) {
    let entry = SectionTableEntry::new(name, size, offset).unwrap();
    let bytes = entry.to_bytes();
    assert_eq!(bytes.len(), SectionTableEntry::SIZE);
    let parsed = SectionTableEntry::from_bytes(&bytes).unwrap();
    assert_eq!(parsed, entry);
    assert_eq!(parsed.name(), name);
}

#[test]
fn section_name_limit_is_eight_bytes() {
    assert!(matches!(
        SectionTableEntry::new("morethan8", 0, 0),
        Err(crate::FileError::SectionNameTooLong { .. })
    ));
}

#[test]
fn flags_reject_unknown_bits() {
    assert!(matches!(
        QplFlags::from_raw(0x80),
        Err(crate::FileError::InvalidFlags { bits: 0x80 })
    ));
}

#[rstest]
#[case(8, false)]
#[case(8, true)]
#[case(4, false)]
#[case(2, true)]
fn arch_byte_round_trip(#[case] word_size: u8, #[case] big_endian: bool) {
    let arch = ArchInfo::new(word_size, big_endian).unwrap();
    assert_eq!(ArchInfo::from_raw(arch.into_raw()).unwrap(), arch);
    assert_eq!(arch.into_raw() & 0x80 != 0, big_endian);
    assert_eq!(arch.into_raw() & 0x7F, word_size);
}

#[test]
fn word_encoding_honors_byte_order() {
    let be = ArchInfo::new(4, true).unwrap();
    assert_eq!(be.word_bytes(0x0102), vec![0, 0, 1, 2]);
    let le = ArchInfo::new(4, false).unwrap();
    assert_eq!(le.word_bytes(0x0102), vec![2, 1, 0, 0]);
    assert_eq!(le.sword_bytes(-2), vec![0xFE, 0xFF, 0xFF, 0xFF]);
    assert_eq!(le.word_from_bytes(&[2, 1, 0, 0]), 0x0102);
    assert_eq!(be.word_from_bytes(&[0, 0, 1, 2]), 0x0102);
}

// ---- export table ----

#[rstest]
#[case(arch64())]
#[case(ArchInfo::new(4, false).unwrap())]
fn export_table_round_trip(#[case] arch: ArchInfo) {
    let mut table = ExportTable::new();
    table.push(ExportTableEntry {
        name: "add".into(),
        offset: 0x20,
        return_type: BinType::Int,
        parameter_types: vec![BinType::Int, BinType::Int],
        num_locals: 0,
    });
    table.push(ExportTableEntry {
        name: "tick".into(),
        offset: 0,
        return_type: BinType::Void,
        parameter_types: vec![],
        num_locals: 3,
    });
    let bytes = table.to_bytes(arch);
    let parsed = ExportTable::from_bytes(&bytes, arch).unwrap();
    assert_eq!(parsed, table);
}

#[test]
fn export_entry_layout_is_frozen() {
    let entry = ExportTableEntry {
        name: "add".into(),
        offset: 0,
        return_type: BinType::Int,
        parameter_types: vec![BinType::Int, BinType::Int],
        num_locals: 0,
    };
    let mut expected = b"add\0".to_vec();
    expected.extend(word(0));
    expected.extend([5, 5, 5, 1, 0]);
    assert_eq!(entry.to_bytes(arch64()), expected);
}

// ---- tokenizer ----

fn all_kinds(source: &str, options: TokenizerOptions) -> Vec<TokenKind> {
    let mut tokens = Tokenizer::new(source);
    tokens.set_options(options);
    let mut kinds = Vec::new();
    loop {
        let token = tokens.advance().unwrap();
        if token.kind == TokenKind::Eof {
            return kinds;
        }
        kinds.push(token.kind);
    }
}

#[rstest]
#[case("")]
#[case("func main() : void { ret }")]
#[case("a b c\n\n 1 2.5 .5 -3 \"s\" 'c' \\xFF ;; note\n{}()*=:;,.x")]
#[case("   \t \n\n  ")]
fn tokenizer_reaches_eof(#[case] source: &str) {
    let mut tokens = Tokenizer::new(source);
    tokens.set_options(
        TokenizerOptions::EMIT_NEWLINE
            | TokenizerOptions::EMIT_WHITESPACE
            | TokenizerOptions::EMIT_COMMENTS,
    );
    let mut last = (1u32, 1u32);
    for _ in 0..10_000 {
        let token = tokens.advance().unwrap();
        assert!((token.line, token.column) >= last, "positions went backwards");
        last = (token.line, token.column);
        if token.kind == TokenKind::Eof {
            // EoF is sticky
            assert_eq!(tokens.advance().unwrap().kind, TokenKind::Eof);
            return;
        }
    }
    panic!("tokenizer did not reach EOF");
}

#[test]
fn option_orthogonality() {
    let source = "func f() : void { ;; note\n ret }\n";
    let base = all_kinds(source, TokenizerOptions::NONE);
    assert!(!base.contains(&TokenKind::NewLine));
    assert!(!base.contains(&TokenKind::WhiteSpace));
    assert!(!base.contains(&TokenKind::Comment));

    for (option, kind) in [
        (TokenizerOptions::EMIT_NEWLINE, TokenKind::NewLine),
        (TokenizerOptions::EMIT_WHITESPACE, TokenKind::WhiteSpace),
        (TokenizerOptions::EMIT_COMMENTS, TokenKind::Comment),
    ] {
        let enriched = all_kinds(source, option);
        assert!(enriched.contains(&kind));
        let filtered: Vec<TokenKind> =
            enriched.into_iter().filter(|k| *k != kind).collect();
        assert_eq!(filtered, base, "option added tokens of a foreign kind");
    }
}

#[rstest]
#[case("'a'", TokenKind::CharLit, "a")]
#[case("'\\n'", TokenKind::CharLit, "\n")]
#[case("'\\\\'", TokenKind::CharLit, "\\")]
#[case("\\xFF", TokenKind::HexLit, "FF")]
#[case("\\x2a", TokenKind::HexLit, "2a")]
#[case("\"hi\\tthere\"", TokenKind::StringLit, "hi\tthere")]
#[case("\"\"", TokenKind::StringLit, "")]
#[case(".5", TokenKind::FloatLit, ".5")]
#[case("3.25", TokenKind::FloatLit, "3.25")]
#[case("-12", TokenKind::IntLit, "-12")]
#[case("42", TokenKind::IntLit, "42")]
#[case("true", TokenKind::BoolLit, "true")]
#[case("false", TokenKind::BoolLit, "false")]
#[case("null", TokenKind::NullLit, "null")]
#[case("$tmp1", TokenKind::Identifier, "$tmp1")]
fn literal_and_identifier_lexemes(
    #[case] source: &str,
    #[case] kind: TokenKind,
    #[case] lexeme: &str,
) {
    let mut tokens = Tokenizer::new(source);
    let token = tokens.advance().unwrap();
    assert_eq!(token.kind, kind);
    assert_eq!(token.lexeme, lexeme);
    assert_eq!(tokens.advance().unwrap().kind, TokenKind::Eof);
}

#[rstest]
#[case("'ab'")]
#[case("\"open")]
#[case("\\y")]
#[case("-x")]
#[case("?")]
fn lexical_errors(#[case] source: &str) {
    let mut tokens = Tokenizer::new(source);
    assert!(matches!(
        tokens.advance(),
        Err(crate::SyntaxError::UnexpectedCharacter { .. })
    ));
}

#[test]
fn comment_does_not_swallow_the_newline() {
    let kinds = all_kinds(
        ";; note\nret",
        TokenizerOptions::EMIT_COMMENTS | TokenizerOptions::EMIT_NEWLINE,
    );
    assert_eq!(
        kinds,
        vec![TokenKind::Comment, TokenKind::NewLine, TokenKind::Identifier]
    );
}

#[test]
fn comment_lexeme_options() {
    let mut tokens = Tokenizer::new(";; note\n");
    tokens.set_options(TokenizerOptions::EMIT_COMMENTS);
    assert_eq!(tokens.advance().unwrap().lexeme, " note");

    let mut tokens = Tokenizer::new(";; note\n");
    tokens.set_options(
        TokenizerOptions::EMIT_COMMENTS
            | TokenizerOptions::INCLUDE_COMMENT_CHARACTER
            | TokenizerOptions::INCLUDE_COMMENT_EOL,
    );
    assert_eq!(tokens.advance().unwrap().lexeme, ";; note\n");
}

#[test]
fn single_semicolon_is_punctuation() {
    let kinds = all_kinds("var x : int;", TokenizerOptions::NONE);
    assert_eq!(*kinds.last().unwrap(), TokenKind::SemiColon);
}

#[test]
fn eat_matches_kind_and_lexeme() {
    let mut tokens = Tokenizer::new("func main");
    tokens.advance().unwrap();
    let keyword = tokens.eat("func").unwrap();
    assert_eq!(keyword.lexeme, "func");
    let err = tokens.eat("func").unwrap_err();
    assert!(matches!(err, crate::SyntaxError::UnexpectedToken { .. }));
    tokens.eat(TokenKind::Identifier).unwrap();
    assert!(!tokens.has_tokens());
}

#[test]
fn eat_skips_whitespace_on_request() {
    let mut tokens = Tokenizer::new("a  b");
    tokens.set_options(
        TokenizerOptions::EMIT_WHITESPACE | TokenizerOptions::SKIP_SPACES_BEFORE_EATING,
    );
    tokens.advance().unwrap();
    tokens.eat("a").unwrap();
    assert_eq!(tokens.eat("b").unwrap().lexeme, "b");
}

#[test]
fn scoped_options_restore_on_error() {
    let mut tokens = Tokenizer::new("?");
    tokens.set_options(TokenizerOptions::EMIT_NEWLINE);
    let result =
        tokens.with_options(TokenizerOptions::EMIT_COMMENTS, true, |t| t.advance());
    assert!(result.is_err());
    assert_eq!(tokens.options(), TokenizerOptions::EMIT_NEWLINE);
}

// ---- stack model ----

#[test]
fn generic_binds_to_the_stack_type() {
    let dup = inst::lookup("dup").unwrap();
    let mut stack = Stack::new();
    stack.push(BinType::Float);
    let mut bindings = HashMap::new();
    stack.apply(&dup.transformation, &mut bindings).unwrap();
    assert_eq!(bindings["T"], BinType::Float);
    assert_eq!(stack.top(2), [BinType::Float, BinType::Float]);
}

#[test]
fn bound_generic_must_match_the_stack() {
    let add = inst::lookup("add").unwrap();
    let mut stack = Stack::new();
    stack.push(BinType::Int);
    stack.push(BinType::Float);
    let mut bindings = HashMap::new();
    bindings.insert("a", BinType::Int);
    bindings.insert("b", BinType::Int);
    let err = stack.apply(&add.transformation, &mut bindings).unwrap_err();
    assert!(matches!(err, StackError::IncompatibleTypesOnStack { .. }));
}

#[test]
fn generic_reuse_across_before_and_after() {
    let transformation = StackState::new(vec![TypeTag::Generic("T")])
        .then(StackState::new(vec![TypeTag::Generic("T")]));
    for ty in [BinType::Int, BinType::Str, BinType::Float64] {
        let mut stack = Stack::new();
        stack.push(ty);
        let mut bindings = HashMap::new();
        stack.apply(&transformation, &mut bindings).unwrap();
        assert_eq!(stack.top(1), [ty]);
    }
}

#[test]
fn many_with_fixed_count_pops_exactly_that_many() {
    let mut stack = Stack::new();
    for _ in 0..3 {
        stack.push(BinType::Int);
    }
    let transformation = StackState::new(vec![TypeTag::many(
        TypeTag::Concrete(BinType::Int),
        2,
    )])
    .then(StackState::default());
    stack.apply(&transformation, &mut HashMap::new()).unwrap();
    assert_eq!(stack.len(), 1);
}

#[test]
fn many_with_fixed_count_checks_depth() {
    let mut stack = Stack::new();
    stack.push(BinType::Int);
    let transformation = StackState::new(vec![TypeTag::many(
        TypeTag::Concrete(BinType::Int),
        4,
    )])
    .then(StackState::default());
    let err = stack
        .apply(&transformation, &mut HashMap::new())
        .unwrap_err();
    assert_eq!(err, StackError::NotEnoughValues { expected: 4, got: 1 });
}

#[test]
fn greedy_many_stops_at_the_first_other_type() {
    let mut stack = Stack::new();
    stack.push(BinType::Float);
    stack.push(BinType::Int);
    stack.push(BinType::Int);
    let transformation = StackState::new(vec![TypeTag::many(
        TypeTag::Concrete(BinType::Int),
        -1,
    )])
    .then(StackState::default());
    stack.apply(&transformation, &mut HashMap::new()).unwrap();
    assert_eq!(stack.top(1), [BinType::Float]);
    assert_eq!(stack.len(), 1);

    // greedy on an empty stack is a no-op
    let mut empty = Stack::new();
    empty.apply(&transformation, &mut HashMap::new()).unwrap();
    assert!(empty.is_empty());
}

// ---- parser ----

#[test]
fn parses_a_function_definition() {
    let document = parse(
        "func math.add(int a, int b) : int export {\n\
         \tvar t : int;\n\
         \tpush arg.a\n\
         \tpush arg.b\n\
         \tadd int, int\n\
         \tret\n\
         }",
    );
    assert_eq!(document.functions.len(), 1);
    let function = &document.functions[0];
    assert_eq!(function.name.name(), "math.add");
    assert_eq!(function.parameters.len(), 2);
    assert_eq!(function.parameters[0].ty.name.lexeme, "int");
    assert_eq!(function.modifiers.len(), 1);
    assert_eq!(function.modifiers[0].lexeme, "export");
    assert_eq!(function.locals.len(), 1);
    assert_eq!(function.body.len(), 4);
    assert_eq!(function.body[2].name.name(), "add");
    assert_eq!(function.body[2].arguments.len(), 2);
}

#[test]
fn parses_anonymous_parameters_and_pointers() {
    let document = parse("func f(int*, Point** p) : void { ret }");
    let params = &document.functions[0].parameters;
    assert!(params[0].name.is_none());
    assert_eq!(params[0].ty.pointer_depth, 1);
    assert_eq!(params[1].ty.pointer_depth, 2);
    assert_eq!(params[1].ty.name.lexeme, "Point");
}

#[test]
fn parses_globals_and_types() {
    let document = parse(
        "var counter : int = 42;\n\
         var buffer : ptr;\n\
         type Point packed {\n\
         \tvar x : int;\n\
         \tvar y : int;\n\
         \tfunc len() : int { push 0  ret }\n\
         }",
    );
    assert_eq!(document.globals.len(), 2);
    assert_eq!(document.globals[0].value.as_ref().unwrap().lexeme, "42");
    assert!(document.globals[1].value.is_none());
    let ty = &document.types[0];
    assert_eq!(ty.name.name(), "Point");
    assert_eq!(ty.modifiers[0].lexeme, "packed");
    assert_eq!(ty.fields.len(), 2);
    assert_eq!(ty.functions.len(), 1);
}

#[test]
fn parses_import_statements() {
    let document = parse(
        "import \"lib.qpl\" {\n\
         \tfunc add\n\
         \ttype Point\n\
         }\n\
         import \"other.qpl\";",
    );
    assert_eq!(document.imports.len(), 2);
    let imports = &document.imports[0].imports;
    assert_eq!(imports.len(), 2);
    assert_eq!(imports[0].kind, crate::ast::ImportKind::Function);
    assert_eq!(imports[0].name.name(), "add");
    assert_eq!(imports[1].kind, crate::ast::ImportKind::Type);
    assert!(document.imports[1].imports.is_empty());
}

#[test]
fn parses_typed_instruction_arguments() {
    let document = parse("func f() : void { push 65 : int8  ret }");
    let argument = &document.functions[0].body[0].arguments[0];
    assert_eq!(argument.ty.as_ref().unwrap().name.lexeme, "int8");
}

#[test]
fn rejects_unknown_top_level_keywords() {
    let err = Parser::new()
        .parse(&mut Tokenizer::new("banana"))
        .unwrap_err();
    assert!(matches!(err, crate::SyntaxError::UnexpectedToken { .. }));
}

#[test]
fn parse_is_strict_inside_types() {
    let err = Parser::new()
        .parse(&mut Tokenizer::new("type T { ret }"))
        .unwrap_err();
    assert!(matches!(err, crate::SyntaxError::UnexpectedToken { .. }));
}

// ---- end-to-end scenarios ----

// S1: empty source, no flags
#[test]
fn header_only_file() {
    let bytes = assemble("", QplFlags::NONE, arch64()).unwrap();
    assert_eq!(bytes.len(), 16);
    assert_eq!(&bytes[0..4], b"QPL\0");
    assert_eq!(bytes[6], 0);
}

// S2: single void function with an entry point
#[test]
fn void_function_gets_a_push_before_ret() {
    let source = "func main() : void { ret }";
    let (assembler, file) = assemble_doc(source, QplFlags::HAS_ENTRY_POINT);

    let code = file.section("code").unwrap();
    let mut expected = vec![2, 5];
    expected.extend(word(0));
    expected.push(6);
    assert_eq!(code, expected);

    // config is 8 bytes, so code starts at 8 and main sits at its base
    let main = assembler.labels().require("main").unwrap();
    assert_eq!(main.offset(), 8);
    assert_eq!(file.section("config").unwrap(), word(8));

    let bytes = assemble(source, QplFlags::HAS_ENTRY_POINT, arch64()).unwrap();
    assert_eq!(bytes[4] & 0x01, 0x01);
}

#[test]
fn entry_point_flag_requires_main() {
    let err = assemble("func f() : void { ret }", QplFlags::HAS_ENTRY_POINT, arch64())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Asm(AsmError::UnknownSymbol { name }) if name == "main"
    ));
}

// S3: exported function signature lands in the export table
#[test]
fn exported_function() {
    let source = "func add(int a, int b) : int export {\n\
                  \tpush arg.a\n\
                  \tpush arg.b\n\
                  \tadd int, int\n\
                  \tret\n\
                  }";
    let (_, file) = assemble_doc(source, QplFlags::HAS_EXPORTS);

    let code = file.section("code").unwrap();
    assert_eq!(code, [2, 16, 0, 2, 16, 1, 16, 5, 5, 6]);

    let exports = file.section("exports").unwrap();
    let mut expected = word(1);
    expected.extend(b"add\0");
    expected.extend(word(0));
    expected.extend([5, 5, 5, 1, 0]);
    assert_eq!(exports, expected);

    let table = ExportTable::from_bytes(exports, arch64()).unwrap();
    let entry = table.get("add").unwrap();
    assert_eq!(entry.offset, 0);
    assert_eq!(entry.return_type, BinType::Int);
    assert_eq!(entry.parameter_types, vec![BinType::Int, BinType::Int]);
    assert_eq!(entry.num_locals, 0);
}

// S4: a relative call encodes callee offset minus call-site offset
#[test]
fn relative_call_offsets() {
    let source = "func a() : void { call b  ret }\n\
                  func b() : void { ret }";
    let (assembler, file) = assemble_doc(source, QplFlags::NONE);

    let labels = assembler.labels();
    assert_eq!(labels.require("a").unwrap().offset(), 0);
    assert_eq!(labels.require("b").unwrap().offset(), 22);

    let code = file.section("code").unwrap();
    assert_eq!(code.len(), 33);
    assert_eq!(code[0], 4);
    assert_eq!(&code[1..9], &word(22)[..]);
    // num_params and num_locals of the callee follow the rptr
    assert_eq!(&code[9..11], &[0, 0]);
}

#[test]
fn backward_call_encodes_a_negative_offset() {
    let source = "type V { var x : int;  func get() : int { push 1  ret } }\n\
                  func main() : int { call V.get  ret }";
    let (assembler, file) = assemble_doc(source, QplFlags::NONE);

    // methods assemble first; main's call site sits past V.get's body
    let labels = assembler.labels();
    let base = labels.require("V.get").unwrap().offset();
    let main = labels.require("main").unwrap().offset();
    assert_eq!(main, base + 11);

    let code = file.section("code").unwrap();
    let call_at = 11;
    assert_eq!(code[call_at], 4);
    assert_eq!(&code[call_at + 1..call_at + 9], &word(-11)[..]);
}

// S5: field references resolve to intra-type offsets
#[test]
fn field_reference_emits_the_field_offset() {
    let source = "type Point { var x : int;  var y : int; }\n\
                  func f() : int {\n\
                  \tnew Point, 1\n\
                  \tpush_mem int, int, Point.y\n\
                  \tret\n\
                  }";
    let (assembler, file) = assemble_doc(source, QplFlags::NONE);

    let types = file.section("types").unwrap();
    assert_eq!(types, vec![0xCA; 16]);

    let point = assembler.labels().require_type("Point").unwrap();
    assert_eq!(point.size(), 16);
    assert_eq!(point.field("x").unwrap().offset, 0);
    assert_eq!(point.field("y").unwrap().offset, 8);

    let code = file.section("code").unwrap();
    // new: opcode, sizeof Point as int, count as int
    let mut new_inst = vec![23];
    new_inst.extend(word(16));
    new_inst.extend(word(1));
    assert_eq!(&code[..17], &new_inst[..]);
    // push_mem: opcode, two type indices, the field offset as a pointer
    let mut push_mem = vec![21, 5, 5];
    push_mem.extend(word(8));
    assert_eq!(&code[17..28], &push_mem[..]);
}

// S6: stack underflow aborts assembly
#[test]
fn stack_underflow_is_detected() {
    let source = "func f() : void { push 1  add int, int }";
    let err = assemble(source, QplFlags::NONE, arch64()).unwrap_err();
    assert!(matches!(
        err,
        Error::Asm(AsmError::Stack(StackError::NotEnoughValues {
            expected: 2,
            got: 1,
        }))
    ));
}

#[test]
fn stack_type_mismatch_is_detected() {
    let source = "func f() : void { push 1  push 1.5  add int, int }";
    let err = assemble(source, QplFlags::NONE, arch64()).unwrap_err();
    assert!(matches!(
        err,
        Error::Asm(AsmError::Stack(StackError::IncompatibleTypesOnStack { .. }))
    ));
}

// ---- assembler details ----

#[test]
fn globals_live_in_the_data_section() {
    let source = "var g : int = 7;\n\
                  var s : str = \"hi\";\n\
                  func main() : void {\n\
                  \tpush g\n\
                  \tfree\n\
                  \tret\n\
                  }";
    let (assembler, file) = assemble_doc(source, QplFlags::NONE);

    let mut data = word(7);
    data.extend(b"hi");
    assert_eq!(file.section("data").unwrap(), data);

    let labels = assembler.labels();
    assert_eq!(labels.require("g").unwrap().offset(), 0);
    assert_eq!(labels.require("s").unwrap().offset(), 8);

    // push g encodes a pointer to the global's label
    let code = file.section("code").unwrap();
    let mut push_g = vec![2, 3];
    push_g.extend(word(0));
    assert_eq!(&code[..10], &push_g[..]);
}

#[test]
fn locals_encode_as_slot_references() {
    let source = "func f() : int export {\n\
                  \tvar t : int;\n\
                  \tpush 5\n\
                  \tpop local.t\n\
                  \tpush local.t\n\
                  \tret\n\
                  }";
    let (_, file) = assemble_doc(source, QplFlags::NONE);

    let code = file.section("code").unwrap();
    let mut expected = vec![2, 5];
    expected.extend(word(5));
    expected.extend([3, 15, 0]); // pop local.t
    expected.extend([2, 15, 0]); // push local.t
    expected.push(6);
    assert_eq!(code, expected);

    let exports = file.section("exports").unwrap();
    let table = ExportTable::from_bytes(exports, arch64()).unwrap();
    assert_eq!(table.get("f").unwrap().num_locals, 1);
}

#[test]
fn annotated_literals_use_the_annotated_type() {
    let source = "func f() : int8 { push 65 : int8  ret }";
    let (_, file) = assemble_doc(source, QplFlags::NONE);
    let code = file.section("code").unwrap();
    assert_eq!(code, [2, 6, 65, 6]);
}

#[rstest]
#[case("func f() : void { bogus  ret }", "bogus")]
#[case("func f() : void { mem.write 1  ret }", "mem.write")]
fn unknown_instructions_are_rejected(#[case] source: &str, #[case] name: &str) {
    let err = assemble(source, QplFlags::NONE, arch64()).unwrap_err();
    assert!(matches!(
        err,
        Error::Asm(AsmError::UnknownInstruction { name: n }) if n == name
    ));
}

#[test]
fn unknown_type_names_are_rejected() {
    let err = assemble(
        "func f() : void { dlog Missing  ret }",
        QplFlags::NONE,
        arch64(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Asm(AsmError::UnknownType { name }) if name == "Missing"
    ));
}

#[test]
fn calling_a_non_function_is_rejected() {
    let source = "var g : int = 1;\nfunc f() : void { call g  ret }";
    let err = assemble(source, QplFlags::NONE, arch64()).unwrap_err();
    assert!(matches!(
        err,
        Error::Asm(AsmError::NotAFunction { name }) if name == "g"
    ));
}

#[rstest]
#[case("func f() : void { ret }\nfunc f() : void { ret }")]
#[case("var x : int = 1;\nfunc x() : void { ret }")]
fn duplicate_labels_are_rejected(#[case] source: &str) {
    let err = assemble(source, QplFlags::NONE, arch64()).unwrap_err();
    assert!(matches!(err, Error::Asm(AsmError::DuplicateLabel { .. })));
}

#[test]
fn duplicate_types_are_rejected() {
    let source = "type T { var x : int; }\ntype T { var y : int; }";
    let err = assemble(source, QplFlags::NONE, arch64()).unwrap_err();
    assert!(matches!(err, Error::Asm(AsmError::DuplicateType { .. })));
}

#[test]
fn duplicate_fields_are_rejected() {
    let source = "type T { var x : int;  var x : int; }";
    let err = assemble(source, QplFlags::NONE, arch64()).unwrap_err();
    assert!(matches!(
        err,
        Error::Asm(AsmError::DuplicateField { field, .. }) if field == "x"
    ));
}

#[test]
fn config_rejects_unknown_options() {
    let mut config = ConfigSection::new();
    let err = config.set("threads", vec![]).unwrap_err();
    assert!(matches!(err, AsmError::UnknownOption { name } if name == "threads"));
}

// ---- imports across files ----

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("qsm-rs-{}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

const MATH_LIB: &str = "func add(int a, int b) : int export {\n\
                        \tpush arg.a\n\
                        \tpush arg.b\n\
                        \tadd int, int\n\
                        \tret\n\
                        }";

#[test]
fn imported_functions_resolve_and_relocate() {
    let dir = scratch_dir("import");
    let lib = assemble(MATH_LIB, QplFlags::HAS_EXPORTS, arch64()).unwrap();
    std::fs::write(dir.join("math.qpl"), &lib).unwrap();

    let source = "import \"math.qpl\" { func add }\n\
                  func main() : int {\n\
                  \tpush 1\n\
                  \tpush 2\n\
                  \tcall add\n\
                  \tret\n\
                  }";
    let document = parse(source);
    let mut assembler = Assembler::new(arch64()).with_base_dir(&dir);
    let file = assembler.assemble(&document, QplFlags::NONE).unwrap();

    // the imports section carries the library's raw section bytes
    let lib_file = QplFile::from_bytes(&lib).unwrap();
    assert_eq!(file.section("imports").unwrap(), lib_file.raw_data());

    // add lands after main's 32 code bytes; the call site is at 20
    let labels = assembler.labels();
    assert_eq!(labels.require("add").unwrap().offset(), 32);
    let code = file.section("code").unwrap();
    assert_eq!(code[20], 4);
    assert_eq!(&code[21..29], &word(12)[..]);
    assert_eq!(&code[29..31], &[2, 0]);
}

#[test]
fn importing_the_same_name_twice_is_rejected() {
    let dir = scratch_dir("dup-import");
    let lib = assemble(MATH_LIB, QplFlags::HAS_EXPORTS, arch64()).unwrap();
    std::fs::write(dir.join("math.qpl"), &lib).unwrap();

    let source = "import \"math.qpl\" { func add }\n\
                  import \"math.qpl\" { func add }";
    let document = parse(source);
    let err = Assembler::new(arch64())
        .with_base_dir(&dir)
        .assemble(&document, QplFlags::NONE)
        .unwrap_err();
    assert!(matches!(err, AsmError::DuplicateImport { name } if name == "add"));
}

#[test]
fn importing_an_unknown_export_is_rejected() {
    let dir = scratch_dir("missing-export");
    let lib = assemble(MATH_LIB, QplFlags::HAS_EXPORTS, arch64()).unwrap();
    std::fs::write(dir.join("math.qpl"), &lib).unwrap();

    let document = parse("import \"math.qpl\" { func mul }");
    let err = Assembler::new(arch64())
        .with_base_dir(&dir)
        .assemble(&document, QplFlags::NONE)
        .unwrap_err();
    assert!(matches!(err, AsmError::UnknownExport { name, .. } if name == "mul"));
}

// ---- container round trip ----

#[test]
fn emitted_files_read_back() {
    let source = "type Point { var x : int;  var y : int; }\n\
                  var zero : int = 0;\n\
                  func main() : void { ret }";
    let bytes = assemble(source, QplFlags::HAS_ENTRY_POINT, arch64()).unwrap();
    let file = QplFile::from_bytes(&bytes).unwrap();

    let header = file.header().unwrap();
    assert!(header.flags.has_entry_point());
    assert_eq!(header.arch, arch64());
    assert_eq!(usize::from(header.num_sections), file.num_sections());
    let names: Vec<&str> = file.section_names().collect();
    assert_eq!(names, ["config", "types", "data", "code"]);

    // round-trip the container itself
    let rebuilt = file.to_bytes(header.flags, header.arch).unwrap();
    assert_eq!(rebuilt, bytes);
}

#[test]
fn value_encodings() {
    let arch = arch64();
    assert_eq!(
        BinType::Int16
            .value_to_bytes(&Value::Int(-2), arch)
            .unwrap(),
        vec![0xFE, 0xFF]
    );
    assert_eq!(
        BinType::Bool
            .value_to_bytes(&Value::Bool(true), arch)
            .unwrap(),
        vec![1]
    );
    assert_eq!(
        BinType::Float32
            .value_to_bytes(&Value::Float(1.0), arch)
            .unwrap(),
        1.0f32.to_le_bytes().to_vec()
    );
    assert_eq!(
        BinType::Str
            .value_to_bytes(&Value::Str("abc".into()), arch)
            .unwrap(),
        b"abc".to_vec()
    );
    let big = ArchInfo::new(8, true).unwrap();
    assert_eq!(
        BinType::Int.value_to_bytes(&Value::Int(1), big).unwrap(),
        vec![0, 0, 0, 0, 0, 0, 0, 1]
    );
}

#[test]
fn binary_type_indices_are_stable() {
    let expected: [(BinType, u8); 16] = [
        (BinType::Void, 1),
        (BinType::Bool, 2),
        (BinType::Ptr, 3),
        (BinType::Rptr, 4),
        (BinType::Int, 5),
        (BinType::Int8, 6),
        (BinType::Int16, 7),
        (BinType::Int32, 8),
        (BinType::Int64, 9),
        (BinType::Float, 10),
        (BinType::Float32, 11),
        (BinType::Float64, 12),
        (BinType::Str, 13),
        (BinType::Raw, 14),
        (BinType::Local, 15),
        (BinType::Arg, 16),
    ];
    for (ty, index) in expected {
        assert_eq!(ty.index(), index);
        assert_eq!(BinType::from_index(index).unwrap(), ty);
        assert_eq!(BinType::from_name(ty.name()), Some(ty));
    }
}
