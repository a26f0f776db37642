pub mod encode;
pub mod register;

pub use register::{Condition, Register};

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Label '{0}' is defined twice")]
    DuplicateLabel(String),

    #[error("Label '{0}' is never defined")]
    UnresolvedLabel(String),

    #[error("'{0}' is not a register")]
    UnknownRegister(String),

    #[error("{0} is not a valid store width (expected 1, 2, 4 or 8)")]
    InvalidStoreWidth(u8),
}

/// Handle of an interned string, resolved to an absolute address at link time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringId(pub usize);

impl std::fmt::Display for StringId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Append-only set of interned byte strings. Duplicate insertions return
/// the existing handle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StringPool {
    strings: Vec<Vec<u8>>,
}

impl StringPool {
    pub fn add(&mut self, bytes: impl Into<Vec<u8>>) -> StringId {
        let bytes = bytes.into();

        if let Some(index) = self.strings.iter().position(|s| *s == bytes) {
            return StringId(index);
        }

        self.strings.push(bytes);
        StringId(self.strings.len() - 1)
    }

    pub fn get(&self, id: StringId) -> &[u8] {
        &self.strings[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (StringId, &[u8])> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (StringId(i), s.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// A single machine instruction in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Label(String),
    Call(String),
    Jump(String),
    JumpIf(Condition, String),
    MoveRegisterRegister(Register, Register),
    MoveRegisterNumber(Register, i64),
    MoveRegisterAddress(Register, StringId),
    AddRegisterRegister(Register, Register),
    AddRegisterNumber(Register, i32),
    SubRegisterRegister(Register, Register),
    SubRegisterNumber(Register, i32),
    MulRegisterRegister(Register, Register),
    MulRegisterNumber(Register, i32),
    CompareRegisterRegister(Register, Register),
    CompareRegisterNumber(Register, i32),
    SignExtend,
    DivRegister(Register),
    Increment(Register),
    PushRegister(Register),
    PopRegister(Register),
    StoreNumber {
        base: Register,
        offset: i32,
        width: u8,
        value: i32,
    },
    StoreRegister {
        base: Register,
        offset: i32,
        width: u8,
        source: Register,
    },
    Syscall,
    Return,
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Instruction::*;

        fn width_name(width: u8) -> &'static str {
            match width {
                1 => "byte",
                2 => "word",
                4 => "dword",
                _ => "qword",
            }
        }

        match self {
            Label(name) => write!(f, "{name}:"),
            Call(name) => write!(f, "call {name}"),
            Jump(label) => write!(f, "jmp {label}"),
            JumpIf(condition, label) => write!(f, "{condition} {label}"),
            MoveRegisterRegister(dst, src) => write!(f, "mov {dst}, {src}"),
            MoveRegisterNumber(dst, n) => write!(f, "mov {dst}, {n}"),
            MoveRegisterAddress(dst, id) => write!(f, "mov {dst}, {id}"),
            AddRegisterRegister(dst, src) => write!(f, "add {dst}, {src}"),
            AddRegisterNumber(dst, n) => write!(f, "add {dst}, {n}"),
            SubRegisterRegister(dst, src) => write!(f, "sub {dst}, {src}"),
            SubRegisterNumber(dst, n) => write!(f, "sub {dst}, {n}"),
            MulRegisterRegister(dst, src) => write!(f, "imul {dst}, {src}"),
            MulRegisterNumber(dst, n) => write!(f, "imul {dst}, {n}"),
            CompareRegisterRegister(dst, src) => write!(f, "cmp {dst}, {src}"),
            CompareRegisterNumber(dst, n) => write!(f, "cmp {dst}, {n}"),
            SignExtend => write!(f, "cqo"),
            DivRegister(src) => write!(f, "idiv {src}"),
            Increment(dst) => write!(f, "inc {dst}"),
            PushRegister(reg) => write!(f, "push {reg}"),
            PopRegister(reg) => write!(f, "pop {reg}"),
            StoreNumber {
                base,
                offset,
                width,
                value,
            } => write!(f, "mov {} [{base}+{offset}], {value}", width_name(*width)),
            StoreRegister {
                base,
                offset,
                width,
                source,
            } => write!(f, "mov {} [{base}+{offset}], {source}", width_name(*width)),
            Syscall => write!(f, "syscall"),
            Return => write!(f, "ret"),
        }
    }
}

#[derive(Debug, Clone)]
struct Line {
    instruction: Instruction,
    comment: Option<String>,
}

/// A call site inside finalized machine code: the rel32 placeholder at
/// `offset` refers to the function named `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub name: String,
    pub offset: usize,
}

/// A string reference inside finalized machine code: the abs32 placeholder
/// at `offset` refers to the interned string `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringSite {
    pub id: StringId,
    pub offset: usize,
}

/// Finalized machine code for one function, plus the symbolic references
/// the linker still has to resolve.
#[derive(Debug, Clone)]
pub struct MachineCode {
    pub name: String,
    pub code: Vec<u8>,
    pub call_sites: Vec<CallSite>,
    pub string_sites: Vec<StringSite>,
    pub strings: StringPool,
}

/// The instruction stream builder.
///
/// Instructions append in emission order; labels bind to the position of
/// the next instruction; forward jumps are backpatched when the stream is
/// finalized into machine code.
pub struct Assembler {
    pub name: String,
    lines: Vec<Line>,
    defined_labels: Vec<String>,
    strings: StringPool,
}

impl Assembler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Vec::new(),
            defined_labels: Vec::new(),
            strings: StringPool::default(),
        }
    }

    fn append(&mut self, instruction: Instruction) {
        self.lines.push(Line {
            instruction,
            comment: None,
        });
    }

    /// Attaches a listing comment to the most recently appended instruction.
    pub fn annotate(&mut self, comment: impl Into<String>) {
        if let Some(line) = self.lines.last_mut() {
            line.comment = Some(comment.into());
        }
    }

    /// Binds `name` to the current tail of the stream.
    pub fn add_label(&mut self, name: impl Into<String>) -> Result<(), Error> {
        let name = name.into();

        if self.defined_labels.contains(&name) {
            return Err(Error::DuplicateLabel(name));
        }

        self.defined_labels.push(name.clone());
        self.append(Instruction::Label(name));
        Ok(())
    }

    pub fn call(&mut self, name: impl Into<String>) {
        self.append(Instruction::Call(name.into()));
    }

    pub fn jump(&mut self, label: impl Into<String>) {
        self.append(Instruction::Jump(label.into()));
    }

    pub fn jump_if(&mut self, condition: Condition, label: impl Into<String>) {
        self.append(Instruction::JumpIf(condition, label.into()));
    }

    pub fn move_register_register(&mut self, destination: Register, source: Register) {
        self.append(Instruction::MoveRegisterRegister(destination, source));
    }

    pub fn move_register_number(&mut self, destination: Register, number: i64) {
        self.append(Instruction::MoveRegisterNumber(destination, number));
    }

    pub fn move_register_address(&mut self, destination: Register, address: StringId) {
        self.append(Instruction::MoveRegisterAddress(destination, address));
    }

    pub fn add_register_register(&mut self, destination: Register, source: Register) {
        self.append(Instruction::AddRegisterRegister(destination, source));
    }

    pub fn add_register_number(&mut self, destination: Register, number: i32) {
        self.append(Instruction::AddRegisterNumber(destination, number));
    }

    pub fn sub_register_register(&mut self, destination: Register, source: Register) {
        self.append(Instruction::SubRegisterRegister(destination, source));
    }

    pub fn sub_register_number(&mut self, destination: Register, number: i32) {
        self.append(Instruction::SubRegisterNumber(destination, number));
    }

    pub fn mul_register_register(&mut self, destination: Register, source: Register) {
        self.append(Instruction::MulRegisterRegister(destination, source));
    }

    pub fn mul_register_number(&mut self, destination: Register, number: i32) {
        self.append(Instruction::MulRegisterNumber(destination, number));
    }

    pub fn compare_register_register(&mut self, destination: Register, source: Register) {
        self.append(Instruction::CompareRegisterRegister(destination, source));
    }

    pub fn compare_register_number(&mut self, destination: Register, number: i32) {
        self.append(Instruction::CompareRegisterNumber(destination, number));
    }

    pub fn sign_extend(&mut self) {
        self.append(Instruction::SignExtend);
    }

    pub fn div_register(&mut self, divisor: Register) {
        self.append(Instruction::DivRegister(divisor));
    }

    pub fn increment(&mut self, destination: Register) {
        self.append(Instruction::Increment(destination));
    }

    pub fn push_register(&mut self, register: Register) {
        self.append(Instruction::PushRegister(register));
    }

    pub fn pop_register(&mut self, register: Register) {
        self.append(Instruction::PopRegister(register));
    }

    pub fn store_number(&mut self, base: Register, offset: i32, width: u8, value: i32) {
        self.append(Instruction::StoreNumber {
            base,
            offset,
            width,
            value,
        });
    }

    pub fn store_register(&mut self, base: Register, offset: i32, width: u8, source: Register) {
        self.append(Instruction::StoreRegister {
            base,
            offset,
            width,
            source,
        });
    }

    pub fn syscall(&mut self) {
        self.append(Instruction::Syscall);
    }

    pub fn ret(&mut self) {
        self.append(Instruction::Return);
    }

    /// Interns a string and returns its handle.
    pub fn add_string(&mut self, bytes: impl Into<Vec<u8>>) -> StringId {
        self.strings.add(bytes)
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.lines.iter().map(|line| &line.instruction)
    }

    /// Encodes the stream into machine code, resolving every intra-function
    /// jump. Calls and string references stay symbolic for the linker.
    pub fn finalize(self) -> Result<MachineCode, Error> {
        let mut code = Vec::with_capacity(self.lines.len() * 4);
        let mut labels: HashMap<String, usize> = HashMap::new();
        let mut jump_sites: Vec<(String, usize)> = Vec::new();
        let mut call_sites = Vec::new();
        let mut string_sites = Vec::new();

        for line in &self.lines {
            use Instruction::*;

            match &line.instruction {
                Label(name) => {
                    labels.insert(name.clone(), code.len());
                }
                Call(name) => {
                    let offset = encode::call(&mut code);
                    call_sites.push(CallSite {
                        name: name.clone(),
                        offset,
                    });
                }
                Jump(label) => {
                    let offset = encode::jump(&mut code);
                    jump_sites.push((label.clone(), offset));
                }
                JumpIf(condition, label) => {
                    let offset = encode::jump_if(&mut code, *condition);
                    jump_sites.push((label.clone(), offset));
                }
                MoveRegisterRegister(dst, src) => {
                    encode::move_register_register(&mut code, *dst, *src)
                }
                MoveRegisterNumber(dst, n) => encode::move_register_number(&mut code, *dst, *n),
                MoveRegisterAddress(dst, id) => {
                    let offset = encode::move_register_address(&mut code, *dst);
                    string_sites.push(StringSite { id: *id, offset });
                }
                AddRegisterRegister(dst, src) => {
                    encode::add_register_register(&mut code, *dst, *src)
                }
                AddRegisterNumber(dst, n) => encode::add_register_number(&mut code, *dst, *n),
                SubRegisterRegister(dst, src) => {
                    encode::sub_register_register(&mut code, *dst, *src)
                }
                SubRegisterNumber(dst, n) => encode::sub_register_number(&mut code, *dst, *n),
                MulRegisterRegister(dst, src) => {
                    encode::mul_register_register(&mut code, *dst, *src)
                }
                MulRegisterNumber(dst, n) => encode::mul_register_number(&mut code, *dst, *n),
                CompareRegisterRegister(dst, src) => {
                    encode::compare_register_register(&mut code, *dst, *src)
                }
                CompareRegisterNumber(dst, n) => {
                    encode::compare_register_number(&mut code, *dst, *n)
                }
                SignExtend => encode::sign_extend(&mut code),
                DivRegister(src) => encode::div_register(&mut code, *src),
                Increment(dst) => encode::increment(&mut code, *dst),
                PushRegister(reg) => encode::push_register(&mut code, *reg),
                PopRegister(reg) => encode::pop_register(&mut code, *reg),
                StoreNumber {
                    base,
                    offset,
                    width,
                    value,
                } => {
                    if !matches!(width, 1 | 2 | 4 | 8) {
                        return Err(Error::InvalidStoreWidth(*width));
                    }
                    encode::store_number(&mut code, *base, *offset, *width, *value);
                }
                StoreRegister {
                    base,
                    offset,
                    width,
                    source,
                } => {
                    if !matches!(width, 1 | 2 | 4 | 8) {
                        return Err(Error::InvalidStoreWidth(*width));
                    }
                    encode::store_register(&mut code, *base, *offset, *width, *source);
                }
                Syscall => encode::syscall(&mut code),
                Return => encode::ret(&mut code),
            }
        }

        for (label, site) in jump_sites {
            let Some(target) = labels.get(&label) else {
                return Err(Error::UnresolvedLabel(label));
            };

            let relative = *target as i64 - (site as i64 + 4);
            code[site..site + 4].copy_from_slice(&(relative as i32).to_le_bytes());
        }

        Ok(MachineCode {
            name: self.name,
            code,
            call_sites,
            string_sites,
            strings: self.strings,
        })
    }
}

impl std::fmt::Display for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            match &line.comment {
                Some(comment) => writeln!(f, "{} #{comment}", line.instruction)?,
                None => writeln!(f, "{}", line.instruction)?,
            }
        }
        Ok(())
    }
}
