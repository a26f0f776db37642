pub mod function;
pub mod register_manager;
pub mod scan;
pub mod scope;

mod expr;

#[cfg(test)]
mod test;

pub use function::{builtin_functions, Environment, Function, Parameter};
pub use scan::{scan, Program};

use asm::{Assembler, Condition, Register};
use expr::CallDestination;
use parser::expression;
use parser::{Instruction, InstructionKind};
use register_manager::{RegisterManager, RegisterUser};
use scope::{ScopeStack, Variable};
use thiserror::Error;
use tokenizer::token::{Kind, Token};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unnecessary newlines")]
    UnnecessaryNewlines { position: usize },

    #[error("Missing character '{character}'")]
    MissingCharacter { character: char, position: usize },

    #[error("Only function, struct and import declarations are allowed at the top level")]
    TopLevel { position: usize },

    #[error("Invalid instruction")]
    InvalidInstruction { position: usize },

    #[error("Unknown variable '{name}'")]
    UnknownVariable { name: String, position: usize },

    #[error("Unknown function '{name}'{}", .suggestion.as_ref().map(|s| format!(", did you mean '{s}'?")).unwrap_or_default())]
    UnknownFunction {
        name: String,
        suggestion: Option<String>,
        position: usize,
    },

    #[error("Missing function name")]
    MissingFunctionName { position: usize },

    #[error("'{function}' takes {required} arguments but {given} were given")]
    ParameterCount {
        function: String,
        given: usize,
        required: usize,
        position: usize,
    },

    #[error("'{function}' {reason}")]
    BadBuiltinArgument {
        function: String,
        reason: String,
        position: usize,
    },

    #[error("Variable '{name}' can not be modified (make it mutable via 'mut {name}' on its first assignment)")]
    ImmutableVariable { name: String, position: usize },

    #[error("Variable '{name}' has never been used")]
    UnusedVariable { name: String, position: usize },

    #[error("Division by zero")]
    DivisionByZero { position: usize },

    #[error("Exceeded maximum limit of {limit} variables")]
    ExceededMaxVariables { limit: usize, position: usize },

    #[error("Exceeded maximum number of parameters")]
    ExceededMaxParameters { position: usize },

    #[error("'{keyword}' used outside of a loop")]
    OutsideLoop {
        keyword: &'static str,
        position: usize,
    },

    #[error("'{text}' is not a valid number")]
    InvalidNumber { text: String, position: usize },

    #[error("Function calls can not be nested inside expressions")]
    NestedCall { position: usize },

    #[error("'{operator}' can only be used as a branch condition")]
    ConditionOutsideBranch { operator: String, position: usize },

    #[error(transparent)]
    Scope(#[from] scope::Error),

    #[error(transparent)]
    Register(#[from] register_manager::Error),

    #[error(transparent)]
    Assembler(#[from] asm::Error),
}

impl Error {
    /// Byte offset of the originating token, when one is known.
    pub fn position(&self) -> Option<usize> {
        use Error::*;

        match self {
            UnnecessaryNewlines { position }
            | MissingCharacter { position, .. }
            | TopLevel { position }
            | InvalidInstruction { position }
            | UnknownVariable { position, .. }
            | UnknownFunction { position, .. }
            | MissingFunctionName { position }
            | ParameterCount { position, .. }
            | BadBuiltinArgument { position, .. }
            | ImmutableVariable { position, .. }
            | UnusedVariable { position, .. }
            | DivisionByZero { position }
            | ExceededMaxVariables { position, .. }
            | ExceededMaxParameters { position }
            | OutsideLoop { position, .. }
            | InvalidNumber { position, .. }
            | NestedCall { position }
            | ConditionOutsideBranch { position, .. } => Some(*position),
            Scope(error) => Some(error.position()),
            Register(_) | Assembler(_) => None,
        }
    }
}

impl From<expression::Error> for Error {
    fn from(error: expression::Error) -> Self {
        match error {
            expression::Error::MissingCharacter(character, position) => {
                Error::MissingCharacter {
                    character,
                    position,
                }
            }
            expression::Error::MissingOperand(position) => Error::InvalidInstruction { position },
            expression::Error::UnexpectedToken(token) => Error::InvalidInstruction {
                position: token.position,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompilerConfig {
    /// Annotate the listing with the variable names behind each store.
    pub debug: bool,
}

struct LoopFrame {
    start_label: String,
    end_label: String,
    /// Name of the counter variable of a for-loop, incremented at the end
    /// of every iteration. Plain loops have none.
    counter: Option<String>,
}

/// Compiles one function body into an instruction stream.
///
/// Every compilation gets a fresh compiler; register and scope state never
/// outlives the function.
pub struct Compiler<'a> {
    pub(crate) function: &'a Function,
    pub(crate) environment: &'a Environment,
    pub(crate) config: CompilerConfig,
    pub(crate) assembler: Assembler,
    pub(crate) registers: RegisterManager,
    pub(crate) scopes: ScopeStack,
    pub(crate) token_cursor: usize,
    instr_cursor: usize,
    label_counter: usize,
    if_labels: Vec<String>,
    loop_frames: Vec<LoopFrame>,
    depth: usize,
    terminated: bool,
}

/// Compiles `function` against the read-only environment.
pub fn compile_function(
    function: &Function,
    environment: &Environment,
    config: CompilerConfig,
) -> Result<Assembler, Error> {
    Compiler::new(function, environment, config).compile()
}

impl<'a> Compiler<'a> {
    pub fn new(
        function: &'a Function,
        environment: &'a Environment,
        config: CompilerConfig,
    ) -> Self {
        Self {
            function,
            environment,
            config,
            assembler: Assembler::new(function.name.clone()),
            registers: RegisterManager::default(),
            scopes: ScopeStack::default(),
            token_cursor: 0,
            instr_cursor: 0,
            label_counter: 0,
            if_labels: Vec::new(),
            loop_frames: Vec::new(),
            depth: 0,
            terminated: false,
        }
    }

    pub fn compile(mut self) -> Result<Assembler, Error> {
        self.assembler.add_label(self.function.name.clone())?;
        self.scopes.push();
        self.declare_parameters()?;

        let function = self.function;

        for (index, instruction) in function.instructions.iter().enumerate() {
            if self.terminated {
                break;
            }

            self.instruction(instruction, index)?;
        }

        self.close_scope()?;
        self.assembler.ret();
        Ok(self.assembler)
    }

    /// Binds each parameter to its call-argument register and declares it
    /// in the function scope.
    fn declare_parameters(&mut self) -> Result<(), Error> {
        let call_registers = RegisterManager::call_registers();

        for (index, parameter) in self.function.parameters.iter().enumerate() {
            let Some(register) = call_registers.get(index).copied() else {
                return Err(Error::ExceededMaxParameters {
                    position: self.function.position,
                });
            };

            self.registers
                .use_register(register, RegisterUser::Variable(parameter.name.clone()))?;
            self.scopes.add(Variable {
                name: parameter.name.clone(),
                position: self.function.position,
                mutable: false,
                register,
                times_used: 0,
                alive_until: 0,
            })?;
        }

        Ok(())
    }

    fn instruction(&mut self, instruction: &Instruction, index: usize) -> Result<(), Error> {
        self.token_cursor = instruction.position;
        self.instr_cursor = index;

        match instruction.kind {
            InstructionKind::Assignment => self.assignment(&instruction.tokens),
            InstructionKind::Call => self.call_statement(&instruction.tokens),
            InstructionKind::IfStart => self.if_start(&instruction.tokens),
            InstructionKind::IfEnd => self.if_end(),
            InstructionKind::LoopStart => self.loop_start(),
            InstructionKind::LoopEnd => self.loop_end(),
            InstructionKind::ForStart => self.for_start(&instruction.tokens),
            InstructionKind::ForEnd => self.for_end(),
            InstructionKind::Break => self.break_statement(),
            InstructionKind::Continue => self.continue_statement(),
            InstructionKind::Return => self.return_statement(&instruction.tokens),
            InstructionKind::Expect | InstructionKind::Ensure => {
                self.contract(&instruction.tokens)
            }
            InstructionKind::Comment => Ok(()),
            InstructionKind::Invalid => self.invalid(&instruction.tokens),
        }
    }

    /// `name = expr`, `let name = expr` or `mut name = expr`.
    fn assignment(&mut self, tokens: &[Token]) -> Result<(), Error> {
        let mut tokens = tokens;
        let mut declares = false;
        let mut mutable = false;

        if let Some(first) = tokens.first() {
            if first.kind == Kind::Keyword {
                declares = true;
                mutable = first.text == "mut";
                tokens = &tokens[1..];
            }
        }

        let Some(left) = tokens.first() else {
            return Err(Error::InvalidInstruction {
                position: self.token_cursor,
            });
        };

        if left.kind != Kind::Identifier {
            return Err(Error::InvalidInstruction {
                position: left.position,
            });
        }

        match tokens.get(1) {
            Some(operator) if operator.kind == Kind::Operator && operator.text == "=" => {}
            _ => {
                return Err(Error::MissingCharacter {
                    character: '=',
                    position: left.position + left.text.len(),
                })
            }
        }

        let name = left.text.clone();
        let existing = self.scopes.get(&name).map(|v| (v.mutable, v.register));

        let register = match existing {
            Some((is_mutable, register)) if !declares => {
                if !is_mutable {
                    return Err(Error::ImmutableVariable {
                        name,
                        position: left.position,
                    });
                }

                register
            }
            _ => self.declare_variable(name.clone(), left.position, mutable)?,
        };

        let value = expression::from_tokens(&tokens[2..])?;

        match &value {
            expression::Expression::Call {
                name: callee,
                arguments,
            } => {
                self.call_expression(callee, arguments, CallDestination::Variable(name.clone()))?;
            }
            _ => self.expression_to_register(&value, register)?,
        }

        if self.config.debug {
            self.assembler.annotate(name);
        }

        Ok(())
    }

    fn declare_variable(
        &mut self,
        name: String,
        position: usize,
        mutable: bool,
    ) -> Result<Register, Error> {
        let Some(register) = self.registers.find_free() else {
            return Err(Error::ExceededMaxVariables {
                limit: RegisterManager::pool_size(),
                position,
            });
        };

        self.registers
            .use_register(register, RegisterUser::Variable(name.clone()))?;

        let added = self.scopes.add(Variable {
            name,
            position,
            mutable,
            register,
            times_used: 0,
            alive_until: self.instr_cursor,
        });

        if let Err(error) = added {
            self.registers.free(register);
            return Err(error.into());
        }

        Ok(register)
    }

    /// A call in statement position.
    fn call_statement(&mut self, tokens: &[Token]) -> Result<(), Error> {
        let Some(first) = tokens.first() else {
            return Err(Error::InvalidInstruction {
                position: self.token_cursor,
            });
        };

        if first.kind != Kind::Identifier {
            return Err(Error::MissingFunctionName {
                position: first.position,
            });
        }

        let last = tokens.last().unwrap_or(first);

        if last.kind != Kind::GroupEnd {
            return Err(Error::MissingCharacter {
                character: ')',
                position: last.position,
            });
        }

        let value = expression::from_tokens(tokens)?;

        let expression::Expression::Call { name, arguments } = value else {
            return Err(Error::InvalidInstruction {
                position: first.position,
            });
        };

        self.call_expression(&name, &arguments, CallDestination::None)
    }

    fn if_start(&mut self, tokens: &[Token]) -> Result<(), Error> {
        self.label_counter += 1;
        let end_label = format!("if_{}_end", self.label_counter);

        self.condition(&tokens[1..], &end_label)?;

        self.if_labels.push(end_label);
        self.scopes.push();
        self.depth += 1;
        Ok(())
    }

    /// Encodes `<variable> <comparison> <operand>` and the inverse jump
    /// that skips the block when the condition is false.
    fn condition(&mut self, condition: &[Token], end_label: &str) -> Result<(), Error> {
        let Some(left) = condition.first() else {
            return Err(Error::InvalidInstruction {
                position: self.token_cursor,
            });
        };

        if left.kind != Kind::Identifier {
            return Err(Error::InvalidInstruction {
                position: left.position,
            });
        }

        let register = self.use_variable(&left.text, left.position)?;

        let Some(operator) = condition.get(1).filter(|t| t.kind == Kind::Operator) else {
            return Err(Error::InvalidInstruction {
                position: left.position,
            });
        };

        // Fall-through enters the body, so the jump takes the inverse.
        let inverse = match operator.text.as_str() {
            ">=" => Condition::Less,
            ">" => Condition::LessOrEqual,
            "<=" => Condition::Greater,
            "<" => Condition::GreaterOrEqual,
            "==" => Condition::NotEqual,
            "!=" => Condition::Equal,
            _ => {
                return Err(Error::InvalidInstruction {
                    position: operator.position,
                })
            }
        };

        self.compare_register_tokens(register, &condition[2..])?;
        self.assembler.jump_if(inverse, end_label);
        Ok(())
    }

    /// Emits the compare between a register and a right-operand token run.
    fn compare_register_tokens(
        &mut self,
        register: Register,
        tokens: &[Token],
    ) -> Result<(), Error> {
        match tokens {
            [single] if single.kind == Kind::Number => {
                let number = self.parse_number(single)?;

                if let Ok(number) = i32::try_from(number) {
                    self.assembler.compare_register_number(register, number);
                } else {
                    let temporary = self.temporary_register()?;
                    self.assembler.move_register_number(temporary, number);
                    self.assembler.compare_register_register(register, temporary);
                    self.registers.free(temporary);
                }
            }
            [single] if single.kind == Kind::Identifier => {
                let other = self.use_variable(&single.text, single.position)?;
                self.assembler.compare_register_register(register, other);
            }
            _ => {
                let value = expression::from_tokens(tokens)?;
                let temporary = self.temporary_register()?;
                self.expression_to_register(&value, temporary)?;
                self.assembler.compare_register_register(register, temporary);
                self.registers.free(temporary);
            }
        }

        Ok(())
    }

    fn if_end(&mut self) -> Result<(), Error> {
        self.close_scope()?;
        self.depth = self.depth.saturating_sub(1);

        let Some(label) = self.if_labels.pop() else {
            return Err(Error::InvalidInstruction {
                position: self.token_cursor,
            });
        };

        self.assembler.add_label(label)?;
        Ok(())
    }

    fn loop_start(&mut self) -> Result<(), Error> {
        self.label_counter += 1;
        let start_label = format!("loop_{}_start", self.label_counter);
        let end_label = format!("loop_{}_end", self.label_counter);

        self.assembler.add_label(start_label.clone())?;
        self.loop_frames.push(LoopFrame {
            start_label,
            end_label,
            counter: None,
        });
        self.scopes.push();
        self.depth += 1;
        Ok(())
    }

    fn loop_end(&mut self) -> Result<(), Error> {
        self.close_scope()?;
        self.depth = self.depth.saturating_sub(1);

        let Some(frame) = self.loop_frames.pop() else {
            return Err(Error::InvalidInstruction {
                position: self.token_cursor,
            });
        };

        self.assembler.jump(frame.start_label);
        self.assembler.add_label(frame.end_label)?;
        Ok(())
    }

    /// `for v = a..b { body }`.
    fn for_start(&mut self, tokens: &[Token]) -> Result<(), Error> {
        let Some(variable) = tokens.get(1).filter(|t| t.kind == Kind::Identifier) else {
            return Err(Error::InvalidInstruction {
                position: self.token_cursor,
            });
        };

        match tokens.get(2) {
            Some(operator) if operator.kind == Kind::Operator && operator.text == "=" => {}
            _ => {
                return Err(Error::MissingCharacter {
                    character: '=',
                    position: variable.position + variable.text.len(),
                })
            }
        }

        let Some(dots) = tokens
            .iter()
            .position(|t| t.kind == Kind::Operator && t.text == "..")
        else {
            return Err(Error::InvalidInstruction {
                position: self.token_cursor,
            });
        };

        let start_tokens = &tokens[3..dots];
        let end_tokens = &tokens[dots + 1..];

        if start_tokens.is_empty() || end_tokens.is_empty() {
            return Err(Error::InvalidInstruction {
                position: tokens[dots].position,
            });
        }

        self.scopes.push();
        self.depth += 1;

        let register = self.declare_variable(variable.text.clone(), variable.position, true)?;
        let start_value = expression::from_tokens(start_tokens)?;
        self.expression_to_register(&start_value, register)?;

        if self.config.debug {
            self.assembler.annotate(variable.text.clone());
        }

        self.label_counter += 1;
        let start_label = format!("for_{}_start", self.label_counter);
        let end_label = format!("for_{}_end", self.label_counter);

        self.assembler.add_label(start_label.clone())?;

        let register = self.use_variable(&variable.text, variable.position)?;
        self.compare_register_tokens(register, end_tokens)?;
        self.assembler.jump_if(Condition::GreaterOrEqual, &end_label);

        self.loop_frames.push(LoopFrame {
            start_label,
            end_label,
            counter: Some(variable.text.clone()),
        });

        Ok(())
    }

    fn for_end(&mut self) -> Result<(), Error> {
        let Some(frame) = self.loop_frames.pop() else {
            return Err(Error::InvalidInstruction {
                position: self.token_cursor,
            });
        };

        if let Some(name) = &frame.counter {
            if let Some(variable) = self.scopes.get(name) {
                self.assembler.increment(variable.register);
            }
        }

        self.assembler.jump(frame.start_label);
        self.assembler.add_label(frame.end_label)?;

        self.close_scope()?;
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    fn break_statement(&mut self) -> Result<(), Error> {
        let Some(frame) = self.loop_frames.last() else {
            return Err(Error::OutsideLoop {
                keyword: "break",
                position: self.token_cursor,
            });
        };

        self.assembler.jump(frame.end_label.clone());
        Ok(())
    }

    fn continue_statement(&mut self) -> Result<(), Error> {
        let Some(frame) = self.loop_frames.last() else {
            return Err(Error::OutsideLoop {
                keyword: "continue",
                position: self.token_cursor,
            });
        };

        self.assembler.jump(frame.start_label.clone());
        Ok(())
    }

    fn return_statement(&mut self, tokens: &[Token]) -> Result<(), Error> {
        let value = &tokens[1..];

        if !value.is_empty() {
            let destination = RegisterManager::return_value_registers()[0];
            let value = expression::from_tokens(value)?;

            match &value {
                expression::Expression::Call { name, arguments } => {
                    self.call_expression(name, arguments, CallDestination::Register(destination))?;
                }
                _ => self.expression_to_register(&value, destination)?,
            }
        }

        if self.depth == 0 {
            self.terminated = true;
        }

        self.assembler.ret();
        Ok(())
    }

    /// `expect`/`ensure` conditions are validated and their operands count
    /// as used, but no checking code is emitted yet.
    fn contract(&mut self, tokens: &[Token]) -> Result<(), Error> {
        for token in &tokens[1..] {
            if token.kind == Kind::Identifier {
                self.use_variable(&token.text, token.position)?;
            }
        }

        Ok(())
    }

    fn invalid(&mut self, tokens: &[Token]) -> Result<(), Error> {
        let opening = tokens.iter().filter(|t| t.kind == Kind::GroupStart).count();
        let closing = tokens.iter().filter(|t| t.kind == Kind::GroupEnd).count();

        if opening < closing {
            return Err(Error::MissingCharacter {
                character: '(',
                position: self.token_cursor,
            });
        }

        if opening > closing {
            return Err(Error::MissingCharacter {
                character: ')',
                position: self.token_cursor,
            });
        }

        Err(Error::InvalidInstruction {
            position: self.token_cursor,
        })
    }

    /// Marks a read of the variable and returns its current register.
    pub(crate) fn use_variable(&mut self, name: &str, position: usize) -> Result<Register, Error> {
        let liveness = self.instr_cursor + 1;

        match self.scopes.get_mut(name) {
            Some(variable) => {
                variable.times_used += 1;
                variable.extend_liveness(liveness);
                Ok(variable.register)
            }
            None => Err(Error::UnknownVariable {
                name: name.into(),
                position,
            }),
        }
    }

    pub(crate) fn parse_number(&self, token: &Token) -> Result<i64, Error> {
        token.text.parse().map_err(|_| Error::InvalidNumber {
            text: token.text.clone(),
            position: token.position,
        })
    }

    pub(crate) fn temporary_register(&mut self) -> Result<Register, Error> {
        let Some(register) = self.registers.find_free() else {
            return Err(Error::ExceededMaxVariables {
                limit: RegisterManager::pool_size(),
                position: self.token_cursor,
            });
        };

        self.registers
            .use_register(register, RegisterUser::Temporary)?;
        Ok(register)
    }

    /// Pops the innermost scope, frees its registers and diagnoses
    /// variables that were never read.
    fn close_scope(&mut self) -> Result<(), Error> {
        let variables = self.scopes.pop();

        for variable in &variables {
            self.registers.free(variable.register);
        }

        if let Some(variable) = variables.iter().find(|v| v.times_used == 0) {
            return Err(Error::UnusedVariable {
                name: variable.name.clone(),
                position: variable.position,
            });
        }

        Ok(())
    }
}
