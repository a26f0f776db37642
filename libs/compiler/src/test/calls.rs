use crate::Error;
use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;

#[test]
fn cross_function_call_moves_the_return_value() -> Result<()> {
    let compiled = compile! {
        "f(a, b) {
            return a + b
        }

        main() {
            x = f(2, 3)
            syscall(60, x)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            f:
            mov rax, rdi
            add rax, rsi
            ret
            ret
            main:
            mov rsi, rdi
            mov rdi, 2
            mov rdx, rsi
            mov rsi, 3
            call f
            mov rdx, rax
            mov rax, 60
            mov rdi, rdx
            syscall
            ret
            "
        }
        .trim_start()
    );

    Ok(())
}

#[test]
fn calls_in_statement_position_discard_the_result() -> Result<()> {
    let compiled = compile! {
        "noise() {
            print(\"hi\")
        }

        main() {
            noise()
        }"
    };

    assert!(compiled.contains("main:\ncall noise\nret"));
    Ok(())
}

#[test]
fn unknown_function_suggests_the_closest_name() {
    let errors = compile! {
        errors
        "main() { prnt(\"x\") }"
    };

    assert_eq!(errors.len(), 1);
    match &errors[0] {
        Error::UnknownFunction {
            name, suggestion, ..
        } => {
            assert_eq!(name, "prnt");
            assert_eq!(suggestion.as_deref(), Some("print"));
            assert_eq!(
                errors[0].to_string(),
                "Unknown function 'prnt', did you mean 'print'?"
            );
        }
        other => panic!("Expected UnknownFunction, got {other:?}"),
    }
}

#[test]
fn dissimilar_names_get_no_suggestion() {
    let errors = compile! {
        errors
        "main() { launch_missiles() }"
    };

    assert_eq!(errors.len(), 1);
    match &errors[0] {
        Error::UnknownFunction { suggestion, .. } => assert_eq!(*suggestion, None),
        other => panic!("Expected UnknownFunction, got {other:?}"),
    }
}

#[test]
fn wrong_argument_count_emits_nothing() {
    let errors = compile! {
        errors
        "f(a, b) {
            return a + b
        }

        main() {
            x = f(1)
            syscall(60, x)
        }"
    };

    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        Error::ParameterCount {
            given: 1,
            required: 2,
            ..
        }
    ));
}

#[test]
fn calls_can_not_nest_inside_expressions() {
    let errors = compile! {
        errors
        "f() {
            return 1
        }

        main() {
            x = 1 + f()
            syscall(60, x)
        }"
    };

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::NestedCall { .. }));
}

#[test]
fn raw_syscall_skips_the_arity_check() -> Result<()> {
    let compiled = compile! {
        "main() {
            syscall(60)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rax, 60
            syscall
            ret
            "
        }
        .trim_start()
    );

    Ok(())
}

#[test]
fn syscall_arguments_fill_the_kernel_registers() -> Result<()> {
    let compiled = compile! {
        "main() {
            syscall(1, 1, 0, 0)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rax, 1
            mov rdi, 1
            mov rsi, 0
            mov rdx, 0
            syscall
            ret
            "
        }
        .trim_start()
    );

    Ok(())
}

#[test]
fn store_writes_through_a_pointer() -> Result<()> {
    let compiled = compile! {
        "main() {
            p = 4096
            v = 7
            store(p, 8, 8, 42)
            store(p, 0, 1, v)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rdi, 4096
            mov rsi, 7
            mov qword [rdi+8], 42
            mov byte [rdi+0], rsi
            ret
            "
        }
        .trim_start()
    );

    Ok(())
}

#[test]
fn store_rejects_bad_widths() {
    let errors = compile! {
        errors
        "main() {
            p = 4096
            store(p, 0, 3, 1)
        }"
    };

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::BadBuiltinArgument { .. }));
}

#[test]
fn return_value_of_syscall_lands_in_a_variable() -> Result<()> {
    let compiled = compile! {
        "main() {
            pid = syscall(39)
            syscall(60, pid)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rax, 39
            syscall
            mov rdi, rax
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
