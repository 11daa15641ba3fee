/// All lexemes of the kernel text format.
#[derive(Clone, Debug, PartialEq)]
pub enum Lexeme {
    // Keywords
    Kernel,
    Over,
    Args,
    Field,
    In,
    Grad,
    Store,
    If,
    Else,
    Adj,

    // Symbols
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
    Colon,    // :
    Dot,      // .
    DotDot,   // ..
    Eq,       // =
    PlusEq,   // +=
    MinusEq,  // -=
    Minus,    // -
    Star,     // *

    // Literals
    Integer(u64),
    Float(f64),
    /// `%n`
    Value(u32),
    Ident(String),

    // End of file
    Eof,
}

impl Lexeme {
    /// Try to match an identifier string to a keyword.
    pub fn from_keyword(s: &str) -> Option<Lexeme> {
        match s {
            "kernel" => Some(Lexeme::Kernel),
            "over" => Some(Lexeme::Over),
            "args" => Some(Lexeme::Args),
            "field" => Some(Lexeme::Field),
            "in" => Some(Lexeme::In),
            "grad" => Some(Lexeme::Grad),
            "store" => Some(Lexeme::Store),
            "if" => Some(Lexeme::If),
            "else" => Some(Lexeme::Else),
            "adj" => Some(Lexeme::Adj),
            _ => None,
        }
    }

    /// Human-readable description for error messages.
    pub fn description(&self) -> &'static str {
        match self {
            Lexeme::Kernel => "'kernel'",
            Lexeme::Over => "'over'",
            Lexeme::Args => "'args'",
            Lexeme::Field => "'field'",
            Lexeme::In => "'in'",
            Lexeme::Grad => "'grad'",
            Lexeme::Store => "'store'",
            Lexeme::If => "'if'",
            Lexeme::Else => "'else'",
            Lexeme::Adj => "'adj'",
            Lexeme::LBrace => "'{'",
            Lexeme::RBrace => "'}'",
            Lexeme::LBracket => "'['",
            Lexeme::RBracket => "']'",
            Lexeme::Comma => "','",
            Lexeme::Colon => "':'",
            Lexeme::Dot => "'.'",
            Lexeme::DotDot => "'..'",
            Lexeme::Eq => "'='",
            Lexeme::PlusEq => "'+='",
            Lexeme::MinusEq => "'-='",
            Lexeme::Minus => "'-'",
            Lexeme::Star => "'*'",
            Lexeme::Integer(_) => "integer literal",
            Lexeme::Float(_) => "number",
            Lexeme::Value(_) => "value",
            Lexeme::Ident(_) => "identifier",
            Lexeme::Eof => "end of file",
        }
    }
}
