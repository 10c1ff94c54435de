//! Import specifier extraction for JS/TS sources.
//!
//! A small tokenizer rather than a pattern match: comments and string
//! contents are skipped as units, so an `import` inside a comment or a
//! string is never reported. Recognised forms:
//!
//! - `import x, { y } from "m"` / `import type { T } from "m"`
//! - `import "m"` (side effect)
//! - `export { a } from "m"` / `export * from "m"` / `export * as ns from "m"`
//! - `import("m")` and `require("m")` with a literal argument

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Punct(char),
}

// Words that start a new statement; an import clause never contains them.
const STATEMENT_WORDS: &[&str] = &[
    "import", "export", "require", "const", "let", "var", "function", "class", "return",
];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek_char(0) {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '/' && self.peek_char(1) == Some('/') {
                while let Some(c) = self.peek_char(0) {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else if c == '/' && self.peek_char(1) == Some('*') {
                self.pos += 2;
                while self.pos < self.chars.len() {
                    if self.peek_char(0) == Some('*') && self.peek_char(1) == Some('/') {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Quoted string. Plain quotes stop at an unescaped newline so a stray
    /// apostrophe in JSX text cannot swallow the rest of the file.
    fn read_string(&mut self, quote: char) -> String {
        self.pos += 1;
        let mut value = String::new();
        while let Some(c) = self.peek_char(0) {
            self.pos += 1;
            match c {
                '\\' => {
                    if let Some(escaped) = self.peek_char(0) {
                        value.push(escaped);
                        self.pos += 1;
                    }
                }
                c if c == quote => return value,
                '\n' if quote != '`' => return value,
                c => value.push(c),
            }
        }
        value
    }

    fn next_token(&mut self) -> Option<Token> {
        self.skip_trivia();
        let c = self.peek_char(0)?;
        if c == '"' || c == '\'' || c == '`' {
            return Some(Token::Str(self.read_string(c)));
        }
        if c.is_alphanumeric() || c == '_' || c == '$' {
            let start = self.pos;
            while let Some(c) = self.peek_char(0) {
                if c.is_alphanumeric() || c == '_' || c == '$' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            return Some(Token::Ident(self.chars[start..self.pos].iter().collect()));
        }
        self.pos += 1;
        Some(Token::Punct(c))
    }

    fn peek_token(&mut self) -> Option<Token> {
        let saved = self.pos;
        let token = self.next_token();
        self.pos = saved;
        token
    }

    /// Skips the tokens up to and including a matching `}`.
    fn skip_braces(&mut self) {
        let mut depth = 1usize;
        while let Some(token) = self.next_token() {
            match token {
                Token::Punct('{') => depth += 1,
                Token::Punct('}') => {
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    /// Walks an import/export clause and returns the specifier after `from`.
    /// Stops without consuming at anything that cannot be part of a clause.
    fn clause_source(&mut self) -> Option<String> {
        loop {
            match self.peek_token()? {
                Token::Ident(word) if word == "from" => {
                    self.next_token();
                    if let Some(Token::Str(specifier)) = self.peek_token() {
                        self.next_token();
                        return Some(specifier);
                    }
                }
                Token::Ident(word) if STATEMENT_WORDS.contains(&word.as_str()) => return None,
                Token::Ident(_) | Token::Punct('*') | Token::Punct(',') => {
                    self.next_token();
                }
                Token::Punct('{') => {
                    self.next_token();
                    self.skip_braces();
                }
                _ => return None,
            }
        }
    }

    /// `( "literal" )` after `import` or `require`.
    fn call_argument(&mut self) -> Option<String> {
        if self.peek_token()? != Token::Punct('(') {
            return None;
        }
        self.next_token();
        match self.peek_token()? {
            Token::Str(specifier) if !specifier.contains("${") => {
                self.next_token();
                Some(specifier)
            }
            _ => None,
        }
    }
}

/// Module specifiers referenced by `source`, in order of appearance.
pub fn extract_specifiers(source: &str) -> Vec<String> {
    let mut lexer = Lexer::new(source);
    let mut specifiers = Vec::new();
    let mut previous: Option<Token> = None;

    while let Some(token) = lexer.next_token() {
        let member_access = matches!(previous, Some(Token::Punct('.')));
        if let Token::Ident(word) = &token {
            if !member_access {
                let found = match word.as_str() {
                    "import" => match lexer.peek_token() {
                        Some(Token::Str(specifier)) => {
                            lexer.next_token();
                            Some(specifier)
                        }
                        Some(Token::Punct('(')) => lexer.call_argument(),
                        Some(Token::Punct('.')) => None,
                        _ => lexer.clause_source(),
                    },
                    "export" => match lexer.peek_token() {
                        Some(Token::Punct('{')) | Some(Token::Punct('*')) => lexer.clause_source(),
                        Some(Token::Ident(word)) if word == "type" => lexer.clause_source(),
                        _ => None,
                    },
                    "require" => lexer.call_argument(),
                    _ => None,
                };
                if let Some(specifier) = found {
                    specifiers.push(specifier);
                    previous = None;
                    continue;
                }
            }
        }
        previous = Some(token);
    }

    specifiers
}
