use asm::Register;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("'{name}' has already been declared in this scope")]
    Redeclared { name: String, position: usize },
}

impl Error {
    pub fn position(&self) -> usize {
        match self {
            Error::Redeclared { position, .. } => *position,
        }
    }
}

/// A local variable or function parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// Byte offset of the declaration in the source file.
    pub position: usize,
    pub mutable: bool,
    pub register: Register,
    pub times_used: usize,
    /// The instruction index beyond which the value no longer has to
    /// survive. Never decreases.
    pub alive_until: usize,
}

impl Variable {
    pub fn extend_liveness(&mut self, instruction_index: usize) {
        self.alive_until = self.alive_until.max(instruction_index);
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A stack of lexical scopes. Scopes are pushed on block entry and popped
/// on block exit; the innermost scope owns the variables declared in it.
#[derive(Default)]
pub struct ScopeStack {
    scopes: Vec<Vec<Variable>>,
}

impl ScopeStack {
    pub fn push(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Pops the innermost scope and returns its variables so the caller
    /// can free their registers and check for unused names.
    pub fn pop(&mut self) -> Vec<Variable> {
        self.scopes.pop().unwrap_or_default()
    }

    /// Inserts a variable into the innermost scope.
    pub fn add(&mut self, variable: Variable) -> Result<(), Error> {
        let Some(scope) = self.scopes.last_mut() else {
            self.scopes.push(vec![variable]);
            return Ok(());
        };

        if scope.iter().any(|existing| existing.name == variable.name) {
            return Err(Error::Redeclared {
                name: variable.name,
                position: variable.position,
            });
        }

        scope.push(variable);
        Ok(())
    }

    /// Looks a name up from the innermost scope outwards.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.iter().find(|variable| variable.name == name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.iter_mut().find(|variable| variable.name == name))
    }

    /// All variables, in any scope, that have never been read.
    pub fn unused(&self) -> impl Iterator<Item = &Variable> {
        self.scopes
            .iter()
            .flatten()
            .filter(|variable| variable.times_used == 0)
    }

    pub fn variable_count(&self) -> usize {
        self.scopes.iter().map(|scope| scope.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn variable(name: &str, register: Register) -> Variable {
        Variable {
            name: name.into(),
            position: 0,
            mutable: false,
            register,
            times_used: 0,
            alive_until: 0,
        }
    }

    #[test]
    fn lookup_searches_innermost_first() {
        let mut scopes = ScopeStack::default();
        scopes.push();
        scopes.add(variable("x", Register::Rdi)).unwrap();
        scopes.push();
        scopes.add(variable("x", Register::Rsi)).unwrap();

        assert_eq!(scopes.get("x").unwrap().register, Register::Rsi);

        scopes.pop();
        assert_eq!(scopes.get("x").unwrap().register, Register::Rdi);
    }

    #[test]
    fn duplicate_in_same_scope_is_rejected() {
        let mut scopes = ScopeStack::default();
        scopes.push();
        scopes.add(variable("x", Register::Rdi)).unwrap();

        let error = scopes.add(variable("x", Register::Rsi)).unwrap_err();
        assert!(matches!(error, Error::Redeclared { .. }));
    }

    #[test]
    fn pop_returns_only_the_popped_scope() {
        let mut scopes = ScopeStack::default();
        scopes.push();
        scopes.add(variable("outer", Register::Rdi)).unwrap();
        scopes.push();
        scopes.add(variable("inner", Register::Rsi)).unwrap();

        let popped = scopes.pop();

        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].name, "inner");
        assert_eq!(scopes.variable_count(), 1);
    }

    #[test]
    fn unused_reports_unread_variables() {
        let mut scopes = ScopeStack::default();
        scopes.push();
        scopes.add(variable("x", Register::Rdi)).unwrap();
        scopes.add(variable("y", Register::Rsi)).unwrap();
        scopes.get_mut("y").unwrap().times_used += 1;

        let unused: Vec<&str> = scopes.unused().map(|v| v.name.as_str()).collect();
        assert_eq!(unused, vec!["x"]);
    }

    #[test]
    fn liveness_never_decreases() {
        let mut v = variable("x", Register::Rdi);
        v.extend_liveness(5);
        v.extend_liveness(3);
        assert_eq!(v.alive_until, 5);
    }
}
