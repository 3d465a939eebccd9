//! Formula tokenizer.

use super::FormulaError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Text(String),
    /// Function name or TRUE/FALSE, upper-cased.
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Ampersand,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    /// Argument separator; `,` and `;` are both accepted.
    Separator,
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

/// Split `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, FormulaError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && next_is_digit(&chars, i)) {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                let mut j = i + 1;
                if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].1.is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            let number = literal.parse::<f64>().map_err(|_| FormulaError::Syntax {
                position: pos,
                message: format!("invalid number '{}'", literal),
            })?;
            tokens.push(Spanned {
                token: Token::Number(number),
                pos,
            });
            continue;
        }

        if c == '"' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(FormulaError::Syntax {
                            position: pos,
                            message: "unterminated string".into(),
                        })
                    }
                    Some((_, '"')) if matches!(chars.get(i + 1), Some((_, '"'))) => {
                        text.push('"');
                        i += 2;
                    }
                    Some((_, '"')) => {
                        i += 1;
                        break;
                    }
                    Some((_, ch)) => {
                        text.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Spanned {
                token: Token::Text(text),
                pos,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '.')
            {
                i += 1;
            }
            let ident: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            tokens.push(Spanned {
                token: Token::Ident(ident.to_uppercase()),
                pos,
            });
            continue;
        }

        let next = chars.get(i + 1).map(|(_, ch)| *ch);
        let (token, width) = match (c, next) {
            ('<', Some('=')) => (Token::Le, 2),
            ('<', Some('>')) => (Token::Ne, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('=', _) => (Token::Eq, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('^', _) => (Token::Caret, 1),
            ('&', _) => (Token::Ampersand, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) | (';', _) => (Token::Separator, 1),
            _ => {
                return Err(FormulaError::Syntax {
                    position: pos,
                    message: format!("unexpected character '{}'", c),
                })
            }
        };
        tokens.push(Spanned { token, pos });
        i += width;
    }

    Ok(tokens)
}

fn next_is_digit(chars: &[(usize, char)], i: usize) -> bool {
    chars.get(i + 1).map_or(false, |(_, ch)| ch.is_ascii_digit())
}
