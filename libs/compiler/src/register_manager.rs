// rdi - r9  : call and syscall arguments, handed out first
// r10 - rbp : plain variable storage
// rax       : syscall number and return values, handed out last

use asm::Register;
use thiserror::Error;

/// The fixed pool, in the order `find_free` searches it. Starting with the
/// argument registers means parameters land exactly where the call ABI
/// wants them.
const POOL: [Register; 15] = [
    Register::Rdi,
    Register::Rsi,
    Register::Rdx,
    Register::Rcx,
    Register::R8,
    Register::R9,
    Register::R10,
    Register::R11,
    Register::Rbx,
    Register::Rbp,
    Register::R12,
    Register::R13,
    Register::R14,
    Register::R15,
    Register::Rax,
];

/// Registers that pass arguments to the kernel, in ABI order. The first
/// entry receives the syscall number.
const SYSCALL: [Register; 7] = [
    Register::Rax,
    Register::Rdi,
    Register::Rsi,
    Register::Rdx,
    Register::R10,
    Register::R8,
    Register::R9,
];

/// Registers that pass arguments to ordinary calls, in System V order.
const CALL: [Register; 6] = [
    Register::Rdi,
    Register::Rsi,
    Register::Rdx,
    Register::Rcx,
    Register::R8,
    Register::R9,
];

/// Registers that hold return values.
const RETURN_VALUE: [Register; 1] = [Register::Rax];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Register is already in use by {0}")]
    AlreadyInUse(RegisterUser),

    #[error("'{0}' is not a register")]
    UnknownRegister(String),
}

/// Whatever currently holds a register. The register does not own its
/// user; a variable name is looked up in the scope stack when the binding
/// has to change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterUser {
    Variable(String),
    Argument,
    Temporary,
}

impl std::fmt::Display for RegisterUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterUser::Variable(name) => write!(f, "variable '{name}'"),
            RegisterUser::Argument => write!(f, "a call argument"),
            RegisterUser::Temporary => write!(f, "a temporary value"),
        }
    }
}

/// Owns the fixed register pool and tracks which register is bound to
/// which user. Iteration order is the declared pool order, which keeps
/// the emitted code reproducible.
pub struct RegisterManager {
    users: [Option<RegisterUser>; 15],
}

impl Default for RegisterManager {
    fn default() -> Self {
        Self {
            users: Default::default(),
        }
    }
}

impl RegisterManager {
    pub fn syscall_registers() -> &'static [Register] {
        &SYSCALL
    }

    pub fn call_registers() -> &'static [Register] {
        &CALL
    }

    pub fn return_value_registers() -> &'static [Register] {
        &RETURN_VALUE
    }

    pub fn pool_size() -> usize {
        POOL.len()
    }

    fn index(register: Register) -> usize {
        POOL.iter()
            .position(|r| *r == register)
            .unwrap_or_else(|| unreachable!("every register is in the pool"))
    }

    /// Returns the first free register in declared pool order.
    pub fn find_free(&self) -> Option<Register> {
        POOL.iter()
            .enumerate()
            .find(|(i, _)| self.users[*i].is_none())
            .map(|(_, register)| *register)
    }

    /// Like `find_free`, but skips the given registers even when they are
    /// free. Used by the division sequence, which clobbers rax and rdx.
    pub fn find_free_excluding(&self, excluded: &[Register]) -> Option<Register> {
        POOL.iter()
            .enumerate()
            .find(|(i, register)| self.users[*i].is_none() && !excluded.contains(register))
            .map(|(_, register)| *register)
    }

    /// Binds `register` to `user`. Fails if the register already has one,
    /// handing back the colliding user so the caller can relocate it.
    pub fn use_register(&mut self, register: Register, user: RegisterUser) -> Result<(), Error> {
        let slot = &mut self.users[Self::index(register)];

        match slot {
            Some(existing) => Err(Error::AlreadyInUse(existing.clone())),
            None => {
                *slot = Some(user);
                Ok(())
            }
        }
    }

    /// Unconditionally clears the register's user.
    pub fn free(&mut self, register: Register) {
        self.users[Self::index(register)] = None;
    }

    pub fn user(&self, register: Register) -> Option<&RegisterUser> {
        self.users[Self::index(register)].as_ref()
    }

    pub fn by_name(&self, name: &str) -> Result<Register, Error> {
        Register::by_name(name).ok_or_else(|| Error::UnknownRegister(name.into()))
    }

    pub fn in_use_count(&self) -> usize {
        self.users.iter().filter(|user| user.is_some()).count()
    }
}
