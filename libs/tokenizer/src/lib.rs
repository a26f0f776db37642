pub mod token;

use token::{is_keyword, Kind, Token};

/// Turns source bytes into a token stream.
///
/// The tokenizer is infallible: characters that do not form a valid token
/// are emitted as `Kind::Invalid` and diagnosed by later stages, which know
/// which statement the bad token belongs to.
pub struct Tokenizer<'a> {
    source: &'a [u8],
    position: usize,
}

impl<'a> From<&'a str> for Tokenizer<'a> {
    fn from(source: &'a str) -> Self {
        Self {
            source: source.as_bytes(),
            position: 0,
        }
    }
}

impl<'a> From<&'a [u8]> for Tokenizer<'a> {
    fn from(source: &'a [u8]) -> Self {
        Self {
            source,
            position: 0,
        }
    }
}

/// Tokenizes an entire source file.
pub fn tokenize(source: &str) -> Vec<Token> {
    Tokenizer::from(source).collect()
}

impl<'a> Tokenizer<'a> {
    fn peek(&self) -> Option<u8> {
        self.source.get(self.position).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.position + offset).copied()
    }

    fn text_from(&self, start: usize) -> &'a str {
        // The tokenizer only groups ASCII bytes, so the range stays valid UTF-8.
        std::str::from_utf8(&self.source[start..self.position]).unwrap_or_default()
    }

    pub fn next_token(&mut self) -> Option<Token> {
        while let Some(c) = self.peek() {
            if c == b' ' || c == b'\t' || c == b'\r' {
                self.position += 1;
                continue;
            }

            let start = self.position;

            match c {
                b'\n' => {
                    self.position += 1;
                    return Some(Token::new(Kind::NewLine, start, "\n"));
                }
                b'/' if self.peek_at(1) == Some(b'/') => {
                    while self.peek().is_some_and(|c| c != b'\n') {
                        self.position += 1;
                    }
                    return Some(Token::new(Kind::Comment, start, self.text_from(start)));
                }
                b'"' => return Some(self.text_token(start)),
                b'0'..=b'9' => return Some(self.number_token(start)),
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    return Some(self.identifier_token(start));
                }
                _ => return Some(self.symbol_token(start)),
            }
        }

        None
    }

    fn text_token(&mut self, start: usize) -> Token {
        self.position += 1;
        let content_start = self.position;

        while let Some(c) = self.peek() {
            if c == b'"' {
                let text = self.text_from(content_start).to_string();
                self.position += 1;
                return Token::new(Kind::Text, start, text);
            }
            self.position += 1;
        }

        // Unterminated text runs to the end of the file.
        Token::new(Kind::Invalid, start, self.text_from(start))
    }

    fn number_token(&mut self, start: usize) -> Token {
        let mut digits = String::new();

        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => digits.push(c as char),
                b'_' => {}
                _ => break,
            }
            self.position += 1;
        }

        Token::new(Kind::Number, start, digits)
    }

    fn identifier_token(&mut self, start: usize) -> Token {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.position += 1;
        }

        let text = self.text_from(start);
        let kind = if is_keyword(text) {
            Kind::Keyword
        } else {
            Kind::Identifier
        };

        Token::new(kind, start, text)
    }

    fn symbol_token(&mut self, start: usize) -> Token {
        let c = self.source[self.position];
        self.position += 1;

        macro_rules! followed_by {
            ($second:literal, $kind:expr) => {
                if self.peek() == Some($second) {
                    self.position += 1;
                    return Token::new($kind, start, self.text_from(start));
                }
            };
        }

        let kind = match c {
            b'(' => Kind::GroupStart,
            b')' => Kind::GroupEnd,
            b'{' => Kind::BlockStart,
            b'}' => Kind::BlockEnd,
            b',' => Kind::Separator,
            b'+' | b'-' | b'*' | b'/' => Kind::Operator,
            b'=' => {
                followed_by!(b'=', Kind::Operator);
                Kind::Operator
            }
            b'!' => {
                followed_by!(b'=', Kind::Operator);
                Kind::Invalid
            }
            b'<' => {
                followed_by!(b'=', Kind::Operator);
                Kind::Operator
            }
            b'>' => {
                followed_by!(b'=', Kind::Operator);
                Kind::Operator
            }
            b'.' => {
                followed_by!(b'.', Kind::Operator);
                Kind::Invalid
            }
            _ => Kind::Invalid,
        };

        Token::new(kind, start, self.text_from(start))
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<Kind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn full_source() {
        let tokens = tokenize("main() {\n\tx = 2 + 3\n}\n");

        let expected = vec![
            (Kind::Identifier, "main"),
            (Kind::GroupStart, "("),
            (Kind::GroupEnd, ")"),
            (Kind::BlockStart, "{"),
            (Kind::NewLine, "\n"),
            (Kind::Identifier, "x"),
            (Kind::Operator, "="),
            (Kind::Number, "2"),
            (Kind::Operator, "+"),
            (Kind::Number, "3"),
            (Kind::NewLine, "\n"),
            (Kind::BlockEnd, "}"),
            (Kind::NewLine, "\n"),
        ];

        let actual: Vec<(Kind, &str)> = tokens.iter().map(|t| (t.kind, t.text.as_str())).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn operators() {
        let tokens = tokenize("= == != < <= > >= + - * / ..");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();

        assert_eq!(
            texts,
            vec!["=", "==", "!=", "<", "<=", ">", ">=", "+", "-", "*", "/", ".."]
        );
        assert!(tokens.iter().all(|t| t.kind == Kind::Operator));
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("let mut x loop"),
            vec![Kind::Keyword, Kind::Keyword, Kind::Identifier, Kind::Keyword]
        );
    }

    #[test]
    fn text_literal() {
        let tokens = tokenize("print(\"Hello\")");

        assert_eq!(tokens[2].kind, Kind::Text);
        assert_eq!(tokens[2].text, "Hello");
        assert_eq!(tokens[2].position, 6);
    }

    #[test]
    fn unterminated_text() {
        let tokens = tokenize("\"oops");
        assert_eq!(tokens[0].kind, Kind::Invalid);
    }

    #[test]
    fn number_with_underscore() {
        let tokens = tokenize("10_000");
        assert_eq!(tokens[0].kind, Kind::Number);
        assert_eq!(tokens[0].text, "10000");
    }

    #[test]
    fn comment_runs_to_end_of_line() {
        let tokens = tokenize("x = 1 // trailing\ny = 2");
        let comment = tokens.iter().find(|t| t.kind == Kind::Comment).unwrap();

        assert_eq!(comment.text, "// trailing");
        assert!(tokens.iter().any(|t| t.text == "y"));
    }

    #[test]
    fn positions_are_byte_offsets() {
        let tokens = tokenize("ab cd");
        assert_eq!(tokens[0].position, 0);
        assert_eq!(tokens[1].position, 3);
    }

    #[test]
    fn stray_character_is_invalid() {
        assert_eq!(
            kinds("x = @"),
            vec![Kind::Identifier, Kind::Operator, Kind::Invalid]
        );
    }
}
