use crate::Error;
use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;

#[test]
fn print_expands_to_a_write_syscall() -> Result<()> {
    let compiled = compile! {
        "main() { print(\"Hello\") }"
    };

    // The string is "Hello\n", so the length is 6.
    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rax, 1
            mov rdi, 1
            mov rsi, s0
            mov rdx, 6
            syscall
            ret
            "
        }
        .trim_start()
    );

    Ok(())
}

#[test]
fn print_requires_a_text_parameter() {
    let errors = compile! {
        errors
        "main() { print(42) }"
    };

    assert_eq!(errors.len(), 1);
    match &errors[0] {
        Error::BadBuiltinArgument { function, .. } => assert_eq!(function, "print"),
        other => panic!("Expected BadBuiltinArgument, got {other:?}"),
    }
}

#[test]
fn print_requires_exactly_one_argument() {
    let errors = compile! {
        errors
        "main() { print(\"a\", \"b\") }"
    };

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::ParameterCount { given: 2, .. }));
}

#[test]
fn identical_texts_share_one_string() -> Result<()> {
    let machine_code = crate::test::compile_machine_code(
        "main() {
            print(\"same\")
            print(\"same\")
        }",
    )?;

    assert_eq!(machine_code[0].strings.len(), 1);
    assert_eq!(machine_code[0].string_sites.len(), 2);
    Ok(())
}
