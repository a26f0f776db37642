//! Expression lowering: turns expression trees into register-targeted
//! instruction sequences, and drives calls including their
//! argument-register protocol.

use crate::function::{BUILTIN_PRINT, BUILTIN_STORE};
use crate::register_manager::{self, RegisterManager, RegisterUser};
use crate::{Compiler, Error};
use asm::Register;
use parser::expression::Expression;
use tokenizer::token::{Kind, Token};

/// Where a call's return value ends up.
///
/// Variables are addressed by name, not register: preparing the arguments
/// may relocate the destination variable, and the move has to target its
/// register *after* relocation.
pub(crate) enum CallDestination {
    None,
    Variable(String),
    Register(Register),
}

fn is_comparison(operator: &str) -> bool {
    matches!(operator, "==" | "!=" | "<" | "<=" | ">" | ">=")
}

impl<'a> Compiler<'a> {
    /// Deposits the value of `expression` into `destination`, drawing
    /// temporaries from the register pool as needed.
    pub(crate) fn expression_to_register(
        &mut self,
        expression: &Expression,
        destination: Register,
    ) -> Result<(), Error> {
        match expression {
            Expression::Leaf(token) => self.token_to_register(token, destination),
            Expression::Operator { token, left, right } => {
                self.operation_to_register(token, left, right, destination)
            }
            Expression::Call { .. } => Err(Error::NestedCall {
                position: expression.position(),
            }),
        }
    }

    /// Moves a single leaf token into a register.
    fn token_to_register(&mut self, token: &Token, destination: Register) -> Result<(), Error> {
        match token.kind {
            Kind::Identifier => {
                let source = self.use_variable(&token.text, token.position)?;

                // Moving a variable into its own register is pointless.
                if source != destination {
                    self.assembler.move_register_register(destination, source);
                }

                Ok(())
            }
            Kind::Number => {
                let number = self.parse_number(token)?;
                self.assembler.move_register_number(destination, number);
                Ok(())
            }
            Kind::Text => {
                let address = self.assembler.add_string(token.text.as_bytes().to_vec());
                self.assembler.move_register_address(destination, address);
                Ok(())
            }
            _ => Err(Error::InvalidInstruction {
                position: token.position,
            }),
        }
    }

    /// Lowers an operator node. The left subtree accumulates in place into
    /// the destination; the right subtree is emitted directly against an
    /// immediate or a variable register where possible, and through a
    /// temporary otherwise.
    fn operation_to_register(
        &mut self,
        operator: &Token,
        left: &Expression,
        right: &Expression,
        destination: Register,
    ) -> Result<(), Error> {
        if is_comparison(&operator.text) {
            return Err(Error::ConditionOutsideBranch {
                operator: operator.text.clone(),
                position: operator.position,
            });
        }

        self.expression_to_register(left, destination)?;

        match right {
            Expression::Leaf(token) if token.kind == Kind::Number => {
                let number = self.parse_number(token)?;

                if operator.text == "/" {
                    if number == 0 {
                        return Err(Error::DivisionByZero {
                            position: token.position,
                        });
                    }

                    // idiv has no immediate form.
                    let temporary = self.divisor_register()?;
                    self.assembler.move_register_number(temporary, number);
                    self.division(destination, temporary)?;
                    self.registers.free(temporary);
                    return Ok(());
                }

                if let Ok(small) = i32::try_from(number) {
                    match operator.text.as_str() {
                        "+" => self.assembler.add_register_number(destination, small),
                        "-" => self.assembler.sub_register_number(destination, small),
                        "*" => self.assembler.mul_register_number(destination, small),
                        _ => {
                            return Err(Error::InvalidInstruction {
                                position: operator.position,
                            })
                        }
                    }
                } else {
                    // Too wide for the immediate encoding.
                    let temporary = self.temporary_register()?;
                    self.assembler.move_register_number(temporary, number);
                    self.operation_register(operator, destination, temporary)?;
                    self.registers.free(temporary);
                }

                Ok(())
            }
            Expression::Leaf(token) if token.kind == Kind::Identifier => {
                let source = self.use_variable(&token.text, token.position)?;
                self.operation_register(operator, destination, source)
            }
            Expression::Leaf(token) => Err(Error::InvalidInstruction {
                position: token.position,
            }),
            Expression::Call { .. } => Err(Error::NestedCall {
                position: right.position(),
            }),
            Expression::Operator { .. } => {
                let temporary = if operator.text == "/" {
                    self.divisor_register()?
                } else {
                    self.temporary_register()?
                };

                self.expression_to_register(right, temporary)?;
                self.operation_register(operator, destination, temporary)?;
                self.registers.free(temporary);
                Ok(())
            }
        }
    }

    /// Emits one arithmetic operation with two register operands.
    fn operation_register(
        &mut self,
        operator: &Token,
        destination: Register,
        source: Register,
    ) -> Result<(), Error> {
        match operator.text.as_str() {
            "+" => self.assembler.add_register_register(destination, source),
            "-" => self.assembler.sub_register_register(destination, source),
            "*" => self.assembler.mul_register_register(destination, source),
            "/" => self.division(destination, source)?,
            _ => {
                return Err(Error::InvalidInstruction {
                    position: operator.position,
                })
            }
        }

        Ok(())
    }

    /// A temporary that survives the division sequence. rax and rdx are
    /// clobbered by idiv, so divisors never live there.
    fn divisor_register(&mut self) -> Result<Register, Error> {
        let Some(register) = self
            .registers
            .find_free_excluding(&[Register::Rax, Register::Rdx])
        else {
            return Err(Error::ExceededMaxVariables {
                limit: RegisterManager::pool_size(),
                position: self.token_cursor,
            });
        };

        self.registers
            .use_register(register, RegisterUser::Temporary)?;
        Ok(register)
    }

    /// Signed 64-bit division: dividend in `destination`, quotient back
    /// into `destination`. idiv computes rdx:rax / divisor, so occupants
    /// of rax and rdx are preserved around the sequence.
    fn division(&mut self, destination: Register, divisor: Register) -> Result<(), Error> {
        let mut divisor = divisor;

        let saved: Vec<Register> = [Register::Rax, Register::Rdx]
            .into_iter()
            .filter(|r| *r != destination && self.registers.user(*r).is_some())
            .collect();

        for register in &saved {
            self.assembler.push_register(*register);
        }

        // The divisor itself must not sit in a register the sequence
        // clobbers before the idiv.
        if divisor == Register::Rax || divisor == Register::Rdx {
            let Some(spare) = self
                .registers
                .find_free_excluding(&[Register::Rax, Register::Rdx])
            else {
                return Err(Error::ExceededMaxVariables {
                    limit: RegisterManager::pool_size(),
                    position: self.token_cursor,
                });
            };

            self.assembler.move_register_register(spare, divisor);
            divisor = spare;
        }

        if destination != Register::Rax {
            self.assembler
                .move_register_register(Register::Rax, destination);
        }

        self.assembler.sign_extend();
        self.assembler.div_register(divisor);

        if destination != Register::Rax {
            self.assembler
                .move_register_register(destination, Register::Rax);
        }

        for register in saved.iter().rev() {
            self.assembler.pop_register(*register);
        }

        Ok(())
    }

    /// Resolves and emits a call: user functions first, then builtins.
    pub(crate) fn call_expression(
        &mut self,
        name: &Token,
        arguments: &[Expression],
        destination: CallDestination,
    ) -> Result<(), Error> {
        let environment = self.environment;

        let Some(function) = environment.resolve(&name.text) else {
            return Err(Error::UnknownFunction {
                name: name.text.clone(),
                suggestion: environment.suggest(&name.text),
                position: name.position,
            });
        };

        // Calling a function with side effects gives this function side
        // effects as well.
        if function.side_effects() > 0 {
            self.function.add_side_effect();
        }

        if !function.no_parameter_check && arguments.len() != function.parameters.len() {
            return Err(Error::ParameterCount {
                function: function.name.clone(),
                given: arguments.len(),
                required: function.parameters.len(),
                position: name.position,
            });
        }

        if function.is_builtin {
            return match function.name.as_str() {
                BUILTIN_PRINT => self.builtin_print(arguments),
                BUILTIN_STORE => self.builtin_store(arguments),
                _ => self.builtin_syscall(name, arguments, destination),
            };
        }

        let claimed = self.prepare_arguments(arguments, RegisterManager::call_registers())?;

        self.assembler.call(name.text.clone());
        function.add_call();

        for register in claimed {
            self.registers.free(register);
        }

        self.move_return_value(destination);
        Ok(())
    }

    /// Lowers each argument into the argument register at its position,
    /// evicting current occupants. Returns the claimed registers.
    fn prepare_arguments(
        &mut self,
        arguments: &[Expression],
        registers: &'static [Register],
    ) -> Result<Vec<Register>, Error> {
        let mut claimed = Vec::with_capacity(arguments.len());

        for (index, argument) in arguments.iter().enumerate() {
            let register = registers[index];
            self.claim_register(register)?;
            claimed.push(register);
            self.expression_to_register(argument, register)?;
        }

        Ok(claimed)
    }

    /// Claims a specific register for an argument. A variable occupying it
    /// is relocated to a fresh free register; its binding follows.
    fn claim_register(&mut self, register: Register) -> Result<(), Error> {
        let Err(error) = self
            .registers
            .use_register(register, RegisterUser::Argument)
        else {
            return Ok(());
        };

        let register_manager::Error::AlreadyInUse(user) = error else {
            return Err(error.into());
        };

        let RegisterUser::Variable(occupant) = user else {
            return Err(Error::NestedCall {
                position: self.token_cursor,
            });
        };

        let Some(free) = self.registers.find_free() else {
            return Err(Error::ExceededMaxVariables {
                limit: RegisterManager::pool_size(),
                position: self.token_cursor,
            });
        };

        self.assembler.move_register_register(free, register);

        if self.config.debug {
            self.assembler.annotate(occupant.clone());
        }

        self.registers
            .use_register(free, RegisterUser::Variable(occupant.clone()))?;
        self.registers.free(register);

        if let Some(variable) = self.scopes.get_mut(&occupant) {
            variable.register = free;
        }

        self.registers
            .use_register(register, RegisterUser::Argument)?;
        Ok(())
    }

    /// Moves the return-value register into the call's destination.
    fn move_return_value(&mut self, destination: CallDestination) {
        let return_register = RegisterManager::return_value_registers()[0];

        let target = match destination {
            CallDestination::None => return,
            CallDestination::Register(register) => register,
            CallDestination::Variable(name) => match self.scopes.get(&name) {
                Some(variable) => variable.register,
                None => return,
            },
        };

        if target != return_register {
            self.assembler
                .move_register_register(target, return_register);
        }
    }

    /// `print(text)` expands inline to a write syscall of the text plus a
    /// trailing newline.
    fn builtin_print(&mut self, arguments: &[Expression]) -> Result<(), Error> {
        let Some(Expression::Leaf(parameter)) = arguments.first() else {
            return Err(Error::BadBuiltinArgument {
                function: BUILTIN_PRINT.into(),
                reason: "requires a text parameter".into(),
                position: self.token_cursor,
            });
        };

        if parameter.kind != Kind::Text {
            return Err(Error::BadBuiltinArgument {
                function: BUILTIN_PRINT.into(),
                reason: format!("requires a text parameter instead of '{}'", parameter.text),
                position: parameter.position,
            });
        }

        let mut text = parameter.text.clone().into_bytes();
        text.push(b'\n');
        let length = text.len() as i64;
        let address = self.assembler.add_string(text);

        const WRITE: i64 = 1;
        const STDOUT: i64 = 1;

        let registers = RegisterManager::syscall_registers();

        for register in &registers[..4] {
            self.claim_register(*register)?;
        }

        self.assembler.move_register_number(registers[0], WRITE);
        self.assembler.move_register_number(registers[1], STDOUT);
        self.assembler.move_register_address(registers[2], address);
        self.assembler.move_register_number(registers[3], length);
        self.assembler.syscall();

        for register in &registers[..4] {
            self.registers.free(*register);
        }

        Ok(())
    }

    /// `store(ptr, offset, byteCount, value)` writes `byteCount` bytes of
    /// `value` into memory at `ptr + offset`.
    fn builtin_store(&mut self, arguments: &[Expression]) -> Result<(), Error> {
        let bad = |reason: &str, position: usize| Error::BadBuiltinArgument {
            function: BUILTIN_STORE.into(),
            reason: reason.into(),
            position,
        };

        let Expression::Leaf(pointer) = &arguments[0] else {
            return Err(bad("requires a variable as its pointer", arguments[0].position()));
        };

        if pointer.kind != Kind::Identifier {
            return Err(bad("requires a variable as its pointer", pointer.position));
        }

        let base = self.use_variable(&pointer.text, pointer.position)?;

        let offset = self.leaf_number(&arguments[1])?;
        let offset = i32::try_from(offset)
            .map_err(|_| bad("requires a 32-bit offset", arguments[1].position()))?;

        let width = self.leaf_number(&arguments[2])?;

        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(bad(
                "requires a byte count of 1, 2, 4 or 8",
                arguments[2].position(),
            ));
        }

        match &arguments[3] {
            Expression::Leaf(token) if token.kind == Kind::Number => {
                let value = self.parse_number(token)?;
                let value = i32::try_from(value)
                    .map_err(|_| bad("requires a 32-bit value", token.position))?;
                self.assembler.store_number(base, offset, width as u8, value);
            }
            Expression::Leaf(token) if token.kind == Kind::Identifier => {
                let source = self.use_variable(&token.text, token.position)?;
                self.assembler
                    .store_register(base, offset, width as u8, source);
            }
            other => {
                return Err(bad(
                    "requires a number or a variable as its value",
                    other.position(),
                ))
            }
        }

        Ok(())
    }

    /// `syscall(number, ...)` loads up to seven argument registers and
    /// emits a raw syscall. There is no arity check.
    fn builtin_syscall(
        &mut self,
        name: &Token,
        arguments: &[Expression],
        destination: CallDestination,
    ) -> Result<(), Error> {
        let registers = RegisterManager::syscall_registers();

        if arguments.len() > registers.len() {
            return Err(Error::BadBuiltinArgument {
                function: name.text.clone(),
                reason: "accepts a syscall number and at most six arguments".into(),
                position: name.position,
            });
        }

        let claimed = self.prepare_arguments(arguments, registers)?;

        self.assembler.syscall();

        for register in claimed {
            self.registers.free(register);
        }

        self.move_return_value(destination);
        Ok(())
    }

    fn leaf_number(&self, argument: &Expression) -> Result<i64, Error> {
        match argument {
            Expression::Leaf(token) if token.kind == Kind::Number => self.parse_number(token),
            _ => Err(Error::BadBuiltinArgument {
                function: BUILTIN_STORE.into(),
                reason: "requires a number literal here".into(),
                position: argument.position(),
            }),
        }
    }
}
