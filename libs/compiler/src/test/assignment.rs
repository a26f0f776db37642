use crate::Error;
use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;

#[test]
fn simple_binary_expression() -> Result<()> {
    let compiled = compile! {
        "main() {
            x = 2 + 3
            y = x + 1
            syscall(60, y)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rdi, 2
            add rdi, 3
            mov rsi, rdi
            add rsi, 1
            mov rax, 60
            mov rdx, rdi
            mov rdi, rsi
            syscall
            ret
            "
        }
        .trim_start()
    );

    Ok(())
}

#[test]
fn debug_listing_names_the_variables() -> Result<()> {
    let compiled = compile! {
        debug
        "main() {
            x = 2 + 3
            syscall(60, x)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rdi, 2
            add rdi, 3 #x
            mov rax, 60
            mov rsi, rdi #x
            mov rdi, rsi
            syscall
            ret
            "
        }
        .trim_start()
    );

    Ok(())
}

#[test]
fn redundant_move_into_own_register_is_skipped() -> Result<()> {
    let compiled = compile! {
        "main() {
            mut x = 1
            x = x + 2
            syscall(60, x)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rdi, 1
            add rdi, 2
            mov rax, 60
            mov rsi, rdi
            mov rdi, rsi
            syscall
            ret
            "
        }
        .trim_start()
    );

    Ok(())
}

#[test]
fn wide_immediates_go_through_a_scratch_register() -> Result<()> {
    let compiled = compile! {
        "main() {
            x = 1 + 8589934592
            syscall(60, x)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rdi, 1
            mov rsi, 8589934592
            add rdi, rsi
            mov rax, 60
            mov rsi, rdi
            mov rdi, rsi
            syscall
            ret
            "
        }
        .trim_start()
    );

    Ok(())
}

#[test]
fn unused_variable_is_diagnosed() {
    let errors = compile! {
        errors
        "main() {
            x = 2 + 3
        }"
    };

    assert_eq!(errors.len(), 1);
    match &errors[0] {
        Error::UnusedVariable { name, .. } => assert_eq!(name, "x"),
        other => panic!("Expected UnusedVariable, got {other:?}"),
    }
}

#[test]
fn assigning_an_immutable_variable_fails() {
    let errors = compile! {
        errors
        "main() {
            x = 1
            x = 2
            syscall(60, x)
        }"
    };

    assert_eq!(errors.len(), 1);
    match &errors[0] {
        Error::ImmutableVariable { name, .. } => assert_eq!(name, "x"),
        other => panic!("Expected ImmutableVariable, got {other:?}"),
    }
}

#[test]
fn mutable_variables_can_be_reassigned() -> Result<()> {
    let compiled = compile! {
        "main() {
            mut x = 1
            x = 2
            syscall(60, x)
        }"
    };

    assert!(compiled.starts_with("main:\nmov rdi, 1\nmov rdi, 2\n"));
    Ok(())
}

#[test]
fn redeclaring_in_the_same_scope_fails() {
    let errors = compile! {
        errors
        "main() {
            let x = 1
            let x = 2
            syscall(60, x)
        }"
    };

    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        Error::Scope(crate::scope::Error::Redeclared { .. })
    ));
}

#[test]
fn comparison_operators_are_not_values() {
    let errors = compile! {
        errors
        "main() {
            x = 1 < 2
            syscall(60, x)
        }"
    };

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::ConditionOutsideBranch { .. }));
}

#[test]
fn unknown_variable_on_the_right_side() {
    let errors = compile! {
        errors
        "main() {
            x = y + 1
            syscall(60, x)
        }"
    };

    assert_eq!(errors.len(), 1);
    match &errors[0] {
        Error::UnknownVariable { name, .. } => assert_eq!(name, "y"),
        other => panic!("Expected UnknownVariable, got {other:?}"),
    }
}
