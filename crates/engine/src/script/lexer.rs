//! Tokenizer for assertion scripts

use super::error::{ScriptError, ScriptResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    /// Template literal: alternating text and raw `${...}` sources
    Template(Vec<TemplateChunk>),
    Regex { pattern: String, flags: String },
    Ident(String),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    Expr { source: String, line: u32, column: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    Const,
    Var,
    Function,
    Return,
    If,
    Else,
    For,
    While,
    Break,
    Continue,
    Throw,
    New,
    Typeof,
    True,
    False,
    Null,
    Undefined,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        Some(match ident {
            "let" => Keyword::Let,
            "const" => Keyword::Const,
            "var" => Keyword::Var,
            "function" => Keyword::Function,
            "return" => Keyword::Return,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "for" => Keyword::For,
            "while" => Keyword::While,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "throw" => Keyword::Throw,
            "new" => Keyword::New,
            "typeof" => Keyword::Typeof,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "null" => Keyword::Null,
            "undefined" => Keyword::Undefined,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Let => "let",
            Keyword::Const => "const",
            Keyword::Var => "var",
            Keyword::Function => "function",
            Keyword::Return => "return",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::For => "for",
            Keyword::While => "while",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Throw => "throw",
            Keyword::New => "new",
            Keyword::Typeof => "typeof",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Null => "null",
            Keyword::Undefined => "undefined",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Dot,
    QuestionDot,
    Question,
    Colon,
    Arrow,
    Assign,
    PlusAssign,
    MinusAssign,
    Eq,
    StrictEq,
    NotEq,
    StrictNotEq,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    Nullish,
    PlusPlus,
    MinusMinus,
}

impl Punct {
    pub fn as_str(&self) -> &'static str {
        match self {
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Semi => ";",
            Punct::Comma => ",",
            Punct::Dot => ".",
            Punct::QuestionDot => "?.",
            Punct::Question => "?",
            Punct::Colon => ":",
            Punct::Arrow => "=>",
            Punct::Assign => "=",
            Punct::PlusAssign => "+=",
            Punct::MinusAssign => "-=",
            Punct::Eq => "==",
            Punct::StrictEq => "===",
            Punct::NotEq => "!=",
            Punct::StrictNotEq => "!==",
            Punct::Lt => "<",
            Punct::Gt => ">",
            Punct::Le => "<=",
            Punct::Ge => ">=",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::Bang => "!",
            Punct::AndAnd => "&&",
            Punct::OrOr => "||",
            Punct::Nullish => "??",
            Punct::PlusPlus => "++",
            Punct::MinusMinus => "--",
        }
    }
}

/// Token with the position of its first character (1-based)
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
    pub column: u32,
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    tokens: Vec<Spanned>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self::at(source, 1, 1)
    }

    /// Lexer whose positions start at the given line and column, for
    /// template substitutions
    pub fn at(source: &str, line: u32, column: u32) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line,
            column,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> ScriptResult<Vec<Spanned>> {
        loop {
            self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                self.tokens.push(Spanned {
                    token: Token::Eof,
                    line,
                    column,
                });
                return Ok(self.tokens);
            };

            let token = if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())) {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.string(c)?
            } else if c == '`' {
                self.template()?
            } else if is_ident_start(c) {
                let ident = self.ident();
                match Keyword::from_ident(&ident) {
                    Some(keyword) => Token::Keyword(keyword),
                    None => Token::Ident(ident),
                }
            } else if c == '/' && self.regex_allowed() {
                self.regex()?
            } else {
                Token::Punct(self.punct()?)
            };
            self.tokens.push(Spanned { token, line, column });
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message, self.line, self.column)
    }

    fn skip_trivia(&mut self) -> ScriptResult<()> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => return Err(self.error("unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// A `/` starts a regex literal unless the previous token ends a value
    fn regex_allowed(&self) -> bool {
        match self.tokens.last().map(|t| &t.token) {
            None => true,
            Some(Token::Punct(p)) => !matches!(p, Punct::RParen | Punct::RBracket | Punct::RBrace),
            Some(Token::Keyword(k)) => matches!(
                k,
                Keyword::Return | Keyword::Typeof | Keyword::Throw | Keyword::Else
            ),
            Some(_) => false,
        }
    }

    fn number(&mut self) -> ScriptResult<Token> {
        let start = self.pos;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let digits: String = self.chars[digits_start..self.pos].iter().collect();
            return u64::from_str_radix(&digits, 16)
                .map(|n| Token::Number(n as f64))
                .map_err(|_| self.error("invalid hex literal"));
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1).map_or(true, |c| c.is_ascii_digit()) {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    self.bump();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(format!("invalid number literal {}", text)))
    }

    fn escape(&mut self) -> ScriptResult<char> {
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated escape sequence"));
        };
        Ok(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            '0' => '\0',
            'u' => {
                let mut code = String::new();
                for _ in 0..4 {
                    match self.bump() {
                        Some(h) if h.is_ascii_hexdigit() => code.push(h),
                        _ => return Err(self.error("invalid unicode escape")),
                    }
                }
                u32::from_str_radix(&code, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or('\u{fffd}')
            }
            other => other,
        })
    }

    fn string(&mut self, quote: char) -> ScriptResult<Token> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(Token::Str(out)),
                Some('\\') => out.push(self.escape()?),
                Some('\n') | None => return Err(self.error("unterminated string literal")),
                Some(c) => out.push(c),
            }
        }
    }

    fn template(&mut self) -> ScriptResult<Token> {
        self.bump();
        let mut chunks = Vec::new();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('`') => break,
                Some('\\') => text.push(self.escape()?),
                Some('$') if self.peek() == Some('{') => {
                    self.bump();
                    if !text.is_empty() {
                        chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                    }
                    let (line, column) = (self.line, self.column);
                    let mut depth = 0usize;
                    let mut source = String::new();
                    loop {
                        match self.bump() {
                            Some('{') => {
                                depth += 1;
                                source.push('{');
                            }
                            Some('}') if depth == 0 => break,
                            Some('}') => {
                                depth -= 1;
                                source.push('}');
                            }
                            Some(c) => source.push(c),
                            None => return Err(self.error("unterminated template substitution")),
                        }
                    }
                    chunks.push(TemplateChunk::Expr {
                        source,
                        line,
                        column,
                    });
                }
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated template literal")),
            }
        }
        if !text.is_empty() {
            chunks.push(TemplateChunk::Text(text));
        }
        Ok(Token::Template(chunks))
    }

    fn ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if is_ident_part(c) {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        out
    }

    fn regex(&mut self) -> ScriptResult<Token> {
        self.bump();
        let mut pattern = String::new();
        let mut in_class = false;
        loop {
            match self.bump() {
                Some('\\') => {
                    pattern.push('\\');
                    match self.bump() {
                        Some(c) => pattern.push(c),
                        None => return Err(self.error("unterminated regex literal")),
                    }
                }
                Some('[') => {
                    in_class = true;
                    pattern.push('[');
                }
                Some(']') => {
                    in_class = false;
                    pattern.push(']');
                }
                Some('/') if !in_class => break,
                Some('\n') | None => return Err(self.error("unterminated regex literal")),
                Some(c) => pattern.push(c),
            }
        }
        let flags = self.ident();
        Ok(Token::Regex { pattern, flags })
    }

    fn punct(&mut self) -> ScriptResult<Punct> {
        let c = self.peek().unwrap_or('\0');
        let next = self.peek_at(1);
        let third = self.peek_at(2);
        let (punct, width) = match (c, next, third) {
            ('=', Some('='), Some('=')) => (Punct::StrictEq, 3),
            ('!', Some('='), Some('=')) => (Punct::StrictNotEq, 3),
            ('=', Some('='), _) => (Punct::Eq, 2),
            ('!', Some('='), _) => (Punct::NotEq, 2),
            ('=', Some('>'), _) => (Punct::Arrow, 2),
            ('<', Some('='), _) => (Punct::Le, 2),
            ('>', Some('='), _) => (Punct::Ge, 2),
            ('&', Some('&'), _) => (Punct::AndAnd, 2),
            ('|', Some('|'), _) => (Punct::OrOr, 2),
            ('?', Some('?'), _) => (Punct::Nullish, 2),
            ('?', Some('.'), d) if !d.is_some_and(|d| d.is_ascii_digit()) => (Punct::QuestionDot, 2),
            ('+', Some('+'), _) => (Punct::PlusPlus, 2),
            ('-', Some('-'), _) => (Punct::MinusMinus, 2),
            ('+', Some('='), _) => (Punct::PlusAssign, 2),
            ('-', Some('='), _) => (Punct::MinusAssign, 2),
            ('{', _, _) => (Punct::LBrace, 1),
            ('}', _, _) => (Punct::RBrace, 1),
            ('(', _, _) => (Punct::LParen, 1),
            (')', _, _) => (Punct::RParen, 1),
            ('[', _, _) => (Punct::LBracket, 1),
            (']', _, _) => (Punct::RBracket, 1),
            (';', _, _) => (Punct::Semi, 1),
            (',', _, _) => (Punct::Comma, 1),
            ('.', _, _) => (Punct::Dot, 1),
            ('?', _, _) => (Punct::Question, 1),
            (':', _, _) => (Punct::Colon, 1),
            ('=', _, _) => (Punct::Assign, 1),
            ('<', _, _) => (Punct::Lt, 1),
            ('>', _, _) => (Punct::Gt, 1),
            ('+', _, _) => (Punct::Plus, 1),
            ('-', _, _) => (Punct::Minus, 1),
            ('*', _, _) => (Punct::Star, 1),
            ('/', _, _) => (Punct::Slash, 1),
            ('%', _, _) => (Punct::Percent, 1),
            ('!', _, _) => (Punct::Bang, 1),
            (other, _, _) => return Err(self.error(format!("unexpected character '{}'", other))),
        };
        for _ in 0..width {
            self.bump();
        }
        Ok(punct)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
