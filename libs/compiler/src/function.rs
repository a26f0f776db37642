use parser::Instruction;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokenizer::token::Token;

pub const BUILTIN_PRINT: &str = "print";
pub const BUILTIN_STORE: &str = "store";
pub const BUILTIN_SYSCALL: &str = "syscall";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub type_name: Option<String>,
}

impl Parameter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            type_name: None,
        }
    }

    pub fn typed(name: &str, type_name: &str) -> Self {
        Self {
            name: name.into(),
            type_name: Some(type_name.into()),
        }
    }
}

/// A compilable function: both user functions discovered by the scanner
/// and the fixed builtins.
///
/// The side-effect and call counters are updated by workers compiling
/// callers while other workers read them, so they are atomics. Relaxed
/// ordering is enough: the values only influence compile decisions after
/// the driver has joined all workers.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub position: usize,
    pub parameters: Vec<Parameter>,
    pub return_types: Vec<String>,
    pub tokens: Vec<Token>,
    pub instructions: Vec<Instruction>,
    pub is_builtin: bool,
    pub no_parameter_check: bool,
    side_effects: AtomicI32,
    call_count: AtomicI32,
}

impl Function {
    pub fn new(
        name: String,
        position: usize,
        parameters: Vec<Parameter>,
        return_types: Vec<String>,
        tokens: Vec<Token>,
    ) -> Self {
        let instructions = parser::from_tokens(&tokens);

        Self {
            name,
            position,
            parameters,
            return_types,
            tokens,
            instructions,
            is_builtin: false,
            no_parameter_check: false,
            side_effects: AtomicI32::new(0),
            call_count: AtomicI32::new(0),
        }
    }

    fn builtin(
        name: &str,
        parameters: Vec<Parameter>,
        return_types: Vec<String>,
        no_parameter_check: bool,
    ) -> Self {
        Self {
            name: name.into(),
            position: 0,
            parameters,
            return_types,
            tokens: Vec::new(),
            instructions: Vec::new(),
            is_builtin: true,
            no_parameter_check,
            // Builtins observably affect the world by definition.
            side_effects: AtomicI32::new(1),
            call_count: AtomicI32::new(0),
        }
    }

    pub fn side_effects(&self) -> i32 {
        self.side_effects.load(Ordering::Relaxed)
    }

    pub fn add_side_effect(&self) {
        self.side_effects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> i32 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn add_call(&self) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// The fixed builtin table.
pub fn builtin_functions() -> HashMap<String, Arc<Function>> {
    let mut builtins = HashMap::new();

    builtins.insert(
        BUILTIN_PRINT.to_string(),
        Arc::new(Function::builtin(
            BUILTIN_PRINT,
            vec![Parameter::typed("text", "Text")],
            Vec::new(),
            false,
        )),
    );

    builtins.insert(
        BUILTIN_STORE.to_string(),
        Arc::new(Function::builtin(
            BUILTIN_STORE,
            vec![
                Parameter::typed("ptr", "Pointer"),
                Parameter::typed("offset", "Int"),
                Parameter::typed("byteCount", "Int"),
                Parameter::typed("value", "Int"),
            ],
            Vec::new(),
            false,
        )),
    );

    builtins.insert(
        BUILTIN_SYSCALL.to_string(),
        Arc::new(Function::builtin(
            BUILTIN_SYSCALL,
            vec![
                Parameter::typed("number", "Int"),
                Parameter::new("param1"),
                Parameter::new("param2"),
                Parameter::new("param3"),
                Parameter::new("param4"),
                Parameter::new("param5"),
                Parameter::new("param6"),
            ],
            vec!["Int".into()],
            true,
        )),
    );

    builtins
}

/// The set of all compilable functions. Read-only once declaration
/// scanning completes; shared between the workers compiling functions.
pub struct Environment {
    pub functions: HashMap<String, Arc<Function>>,
    pub builtins: HashMap<String, Arc<Function>>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            functions: HashMap::new(),
            builtins: builtin_functions(),
        }
    }
}

impl Environment {
    pub fn new(functions: impl IntoIterator<Item = Arc<Function>>) -> Self {
        Self {
            functions: functions
                .into_iter()
                .map(|function| (function.name.clone(), function))
                .collect(),
            builtins: builtin_functions(),
        }
    }

    /// Resolves a callee, looking up user functions before builtins.
    pub fn resolve(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.get(name).or_else(|| self.builtins.get(name))
    }

    /// Suggests the known function name closest to `name`, if any is
    /// similar enough to be a likely typo.
    pub fn suggest(&self, name: &str) -> Option<String> {
        let mut known: Vec<&str> = self
            .functions
            .keys()
            .chain(self.builtins.keys())
            .map(|s| s.as_str())
            .collect();
        known.sort_unstable();

        let mut best: Option<(f64, &str)> = None;

        for candidate in known {
            let similarity = strsim::jaro_winkler(name, candidate);

            if best.is_none() || similarity > best.unwrap_or_default().0 {
                best = Some((similarity, candidate));
            }
        }

        match best {
            Some((similarity, candidate)) if similarity > 0.9 => Some(candidate.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtins_resolve_after_user_functions() {
        let user_print = Arc::new(Function::new(
            "print".into(),
            0,
            Vec::new(),
            Vec::new(),
            Vec::new(),
        ));
        let environment = Environment::new([user_print]);

        assert!(!environment.resolve("print").unwrap().is_builtin);
        assert!(environment.resolve("syscall").unwrap().is_builtin);
        assert!(environment.resolve("missing").is_none());
    }

    #[test]
    fn suggestion_requires_high_similarity() {
        let environment = Environment::default();

        assert_eq!(environment.suggest("prnt"), Some("print".into()));
        assert_eq!(environment.suggest("zzzzz"), None);
    }

    #[test]
    fn counters_are_shared() {
        let function = Function::new("f".into(), 0, Vec::new(), Vec::new(), Vec::new());

        assert_eq!(function.side_effects(), 0);
        function.add_side_effect();
        function.add_call();
        assert_eq!(function.side_effects(), 1);
        assert_eq!(function.call_count(), 1);
    }
}
