use super::*;

fn lex(source: &str) -> Vec<Lexeme> {
    let (tokens, diags) = Lexer::new(source).tokenize();
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    tokens.into_iter().map(|t| t.node).collect()
}

#[test]
fn test_keywords_and_idents() {
    assert_eq!(
        lex("kernel copy over"),
        vec![
            Lexeme::Kernel,
            Lexeme::Ident("copy".to_string()),
            Lexeme::Over,
            Lexeme::Eof
        ]
    );
}

#[test]
fn test_ranges_are_not_floats() {
    assert_eq!(
        lex("[0..16]"),
        vec![
            Lexeme::LBracket,
            Lexeme::Integer(0),
            Lexeme::DotDot,
            Lexeme::Integer(16),
            Lexeme::RBracket,
            Lexeme::Eof
        ]
    );
}

#[test]
fn test_numbers() {
    assert_eq!(
        lex("2.0 1e-7 2.5e3 42"),
        vec![
            Lexeme::Float(2.0),
            Lexeme::Float(1e-7),
            Lexeme::Float(2.5e3),
            Lexeme::Integer(42),
            Lexeme::Eof
        ]
    );
}

#[test]
fn test_values_and_assignments() {
    assert_eq!(
        lex("adj %3 += adj %12 * %4\nadj %1 -= adj %2"),
        vec![
            Lexeme::Adj,
            Lexeme::Value(3),
            Lexeme::PlusEq,
            Lexeme::Adj,
            Lexeme::Value(12),
            Lexeme::Star,
            Lexeme::Value(4),
            Lexeme::Adj,
            Lexeme::Value(1),
            Lexeme::MinusEq,
            Lexeme::Adj,
            Lexeme::Value(2),
            Lexeme::Eof
        ]
    );
}

#[test]
fn test_comments_are_skipped() {
    assert_eq!(
        lex("# header\nfield # trailing\n"),
        vec![Lexeme::Field, Lexeme::Eof]
    );
}

#[test]
fn test_negative_constant() {
    assert_eq!(
        lex("const -1.5"),
        vec![
            Lexeme::Ident("const".to_string()),
            Lexeme::Minus,
            Lexeme::Float(1.5),
            Lexeme::Eof
        ]
    );
}

#[test]
fn test_spans() {
    let (tokens, _) = Lexer::new("store x").tokenize();
    assert_eq!(tokens[0].span, Span::new(0, 5));
    assert_eq!(tokens[1].span, Span::new(6, 7));
}

#[test]
fn test_bad_characters_report_and_recover() {
    let (tokens, diags) = Lexer::new("store @ x + %").tokenize();
    assert_eq!(diags.len(), 3);
    assert!(diags[0].message.contains("unexpected character '@'"));
    let nodes: Vec<Lexeme> = tokens.into_iter().map(|t| t.node).collect();
    assert_eq!(
        nodes,
        vec![Lexeme::Store, Lexeme::Ident("x".to_string()), Lexeme::Eof]
    );
}
