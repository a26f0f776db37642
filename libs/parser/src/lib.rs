pub mod expression;

use tokenizer::token::{Kind, Token};

/// The statement-level meaning of a run of tokens inside a function body.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum InstructionKind {
    Assignment,
    Call,
    IfStart,
    IfEnd,
    ForStart,
    ForEnd,
    LoopStart,
    LoopEnd,
    Return,
    Break,
    Continue,
    Expect,
    Ensure,
    Comment,
    Invalid,
}

impl std::fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One statement instruction: a kind, the tokens that compose it and the
/// position of its first token.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub tokens: Vec<Token>,
    pub position: usize,
}

impl Instruction {
    fn new(kind: InstructionKind, tokens: &[Token]) -> Self {
        let position = tokens.first().map(|t| t.position).unwrap_or_default();
        Self {
            kind,
            tokens: tokens.to_vec(),
            position,
        }
    }

    fn block_marker(kind: InstructionKind, position: usize) -> Self {
        Self {
            kind,
            tokens: Vec::new(),
            position,
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        for token in &self.tokens {
            write!(f, " {token}")?;
        }
        Ok(())
    }
}

/// Folds the tokens of a function body into statement instructions.
///
/// Statements are delimited by newlines and braces. A statement's kind is
/// decided by the first token that identifies it: a leading keyword, an `=`
/// operator, or an identifier directly followed by `(`. Tokens that never
/// acquire a kind are emitted as `Invalid` so the emitter can attach a
/// proper diagnostic with position information.
pub fn from_tokens(tokens: &[Token]) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(tokens.len() / 2);
    let mut kind = InstructionKind::Invalid;
    let mut start = 0;
    let mut groups = 0i32;
    let mut blocks: Vec<InstructionKind> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            Kind::NewLine => {
                if start == i {
                    start = i + 1;
                    continue;
                }

                match kind {
                    InstructionKind::Comment => {
                        kind = InstructionKind::Invalid;
                        start = i + 1;
                    }
                    InstructionKind::Return
                    | InstructionKind::Expect
                    | InstructionKind::Ensure
                    | InstructionKind::Assignment
                    | InstructionKind::Break
                    | InstructionKind::Continue
                    | InstructionKind::Invalid => {
                        instructions.push(Instruction::new(kind, &tokens[start..i]));
                        kind = InstructionKind::Invalid;
                        start = i + 1;
                    }
                    _ => {}
                }
            }

            Kind::Operator => {
                if kind == InstructionKind::Invalid && token.text == "=" {
                    kind = InstructionKind::Assignment;
                }
            }

            Kind::GroupStart => {
                groups += 1;

                if groups == 1
                    && kind == InstructionKind::Invalid
                    && i > start
                    && tokens[i - 1].kind == Kind::Identifier
                {
                    kind = InstructionKind::Call;
                }
            }

            Kind::GroupEnd => {
                groups -= 1;

                if groups == 0 && kind == InstructionKind::Call {
                    instructions.push(Instruction::new(kind, &tokens[start..=i]));
                    kind = InstructionKind::Invalid;
                    start = i + 1;
                }
            }

            Kind::Keyword => {
                if kind != InstructionKind::Invalid {
                    continue;
                }

                kind = match token.text.as_str() {
                    "let" | "mut" => InstructionKind::Assignment,
                    "if" => InstructionKind::IfStart,
                    "for" => InstructionKind::ForStart,
                    "loop" => InstructionKind::LoopStart,
                    "return" => InstructionKind::Return,
                    "break" => InstructionKind::Break,
                    "continue" => InstructionKind::Continue,
                    "expect" => InstructionKind::Expect,
                    "ensure" => InstructionKind::Ensure,
                    _ => InstructionKind::Invalid,
                };
            }

            Kind::BlockStart => {
                match kind {
                    InstructionKind::IfStart
                    | InstructionKind::ForStart
                    | InstructionKind::LoopStart => {
                        blocks.push(kind);
                        instructions.push(Instruction::new(kind, &tokens[start..i]));
                    }
                    _ => {
                        instructions.push(Instruction::new(
                            InstructionKind::Invalid,
                            &tokens[start..=i],
                        ));
                    }
                }

                kind = InstructionKind::Invalid;
                start = i + 1;
            }

            Kind::BlockEnd => {
                let end_kind = match blocks.pop() {
                    Some(InstructionKind::IfStart) => InstructionKind::IfEnd,
                    Some(InstructionKind::ForStart) => InstructionKind::ForEnd,
                    Some(InstructionKind::LoopStart) => InstructionKind::LoopEnd,
                    _ => InstructionKind::Invalid,
                };

                if start != i {
                    instructions.push(Instruction::new(kind, &tokens[start..i]));
                }

                instructions.push(Instruction::block_marker(end_kind, token.position));
                kind = InstructionKind::Invalid;
                start = i + 1;
            }

            Kind::Comment => {
                kind = InstructionKind::Comment;
            }

            _ => {}
        }
    }

    if start != tokens.len() {
        instructions.push(Instruction::new(kind, &tokens[start..]));
    }

    instructions
}
