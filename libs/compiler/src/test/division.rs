use crate::Error;
use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;

#[test]
fn division_goes_through_rax() -> Result<()> {
    let compiled = compile! {
        "main() {
            x = 8 / 2
            syscall(60, x)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rdi, 8
            mov rsi, 2
            mov rax, rdi
            cqo
            idiv rsi
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

#[test]
fn occupied_rdx_is_preserved_around_idiv() -> Result<()> {
    let compiled = compile! {
        "main() {
            a = 9
            b = 3
            c = 1
            x = a / b
            syscall(60, x + c)
        }"
    };

    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rdi, 9
            mov rsi, 3
            mov rdx, 1
            mov rcx, rdi
            push rdx
            mov rax, rcx
            cqo
            idiv rsi
            mov rcx, rax
            pop rdx
            mov rax, 60
            mov r8, rdi
            mov rdi, rcx
            add rdi, rdx
            syscall
            ret
            "
        }
        .trim_start()
    );

    Ok(())
}

#[test]
fn dividing_by_a_literal_zero_is_a_compile_error() {
    let errors = compile! {
        errors
        "main() {
            x = 1 / 0
            syscall(60, x)
        }"
    };

    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::DivisionByZero { .. }));
}

#[test]
fn chained_division_is_left_associative() -> Result<()> {
    let compiled = compile! {
        "main() {
            x = 64 / 4 / 2
            syscall(60, x)
        }"
    };

    // (64 / 4) first, its quotient divided by 2 next.
    assert_eq!(
        compiled,
        indoc! {
            "
            main:
            mov rdi, 64
            mov rsi, 4
            mov rax, rdi
            cqo
            idiv rsi
            mov rdi, rax
            mov rsi, 2
            mov rax, rdi
            cqo
            idiv rsi
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
