//! Top-level declaration scanner.
//!
//! Walks the token stream of one source file and collects function,
//! struct and import declarations. Function bodies are kept as raw token
//! slices; grouping them into statement instructions happens when the
//! `Function` is constructed.

use crate::function::{Function, Parameter};
use crate::Error;
use std::sync::Arc;
use tokenizer::token::{Kind, Token};

/// An imported module. Recorded for the driver; resolution is not
/// implemented yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub path: String,
    pub position: usize,
}

/// A struct declaration. Only the shape is recorded; there is no field
/// access in the language yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Struct {
    pub name: String,
    pub fields: Vec<String>,
    pub position: usize,
}

/// Everything the scanner found in one file, in source order.
#[derive(Default, Debug)]
pub struct Program {
    pub functions: Vec<Arc<Function>>,
    pub structs: Vec<Struct>,
    pub imports: Vec<Import>,
}

/// Scans the top level of a file.
pub fn scan(tokens: &[Token]) -> Result<Program, Error> {
    let mut program = Program::default();
    let mut newlines = 0;
    let mut index = 0;

    while index < tokens.len() {
        let token = &tokens[index];

        if token.kind != Kind::NewLine {
            newlines = 0;
        }

        match token.kind {
            Kind::Identifier => {
                let (function, next) = scan_function(tokens, index)?;
                program.functions.push(Arc::new(function));
                index = next;
                continue;
            }
            Kind::Keyword if token.text == "import" => {
                let (import, next) = scan_import(tokens, index)?;
                program.imports.push(import);
                index = next;
                continue;
            }
            Kind::Keyword if token.text == "struct" => {
                let (declaration, next) = scan_struct(tokens, index)?;
                program.structs.push(declaration);
                index = next;
                continue;
            }
            Kind::NewLine => {
                newlines += 1;

                if newlines == 3 {
                    return Err(Error::UnnecessaryNewlines {
                        position: token.position,
                    });
                }
            }
            Kind::Comment => {}
            _ => {
                return Err(Error::TopLevel {
                    position: token.position,
                })
            }
        }

        index += 1;
    }

    Ok(program)
}

/// Scans `name(parameters) returnTypes { body }` starting at the name.
/// Returns the function and the index after the closing brace.
fn scan_function(tokens: &[Token], index: usize) -> Result<(Function, usize), Error> {
    let name = &tokens[index];
    let mut cursor = index + 1;

    expect(tokens, cursor, Kind::GroupStart, '(')?;
    cursor += 1;

    let mut parameters = Vec::new();

    loop {
        match tokens.get(cursor) {
            Some(token) if token.kind == Kind::GroupEnd => {
                cursor += 1;
                break;
            }
            Some(token) if token.kind == Kind::Separator => {
                cursor += 1;
            }
            Some(token) if token.kind == Kind::Identifier => {
                let mut parameter = Parameter::new(&token.text);
                cursor += 1;

                // An identifier directly after the name is its type.
                if let Some(next) = tokens.get(cursor) {
                    if next.kind == Kind::Identifier {
                        parameter.type_name = Some(next.text.clone());
                        cursor += 1;
                    }
                }

                parameters.push(parameter);
            }
            _ => {
                return Err(Error::MissingCharacter {
                    character: ')',
                    position: end_position(tokens, cursor),
                })
            }
        }
    }

    // Optional return types between ')' and '{'.
    let mut return_types = Vec::new();

    while let Some(token) = tokens.get(cursor) {
        match token.kind {
            Kind::Identifier => {
                return_types.push(token.text.clone());
                cursor += 1;
            }
            Kind::Separator => cursor += 1,
            _ => break,
        }
    }

    expect(tokens, cursor, Kind::BlockStart, '{')?;
    cursor += 1;

    let body_start = cursor;
    let mut depth = 1;

    while depth > 0 {
        let Some(token) = tokens.get(cursor) else {
            return Err(Error::MissingCharacter {
                character: '}',
                position: end_position(tokens, cursor),
            });
        };

        match token.kind {
            Kind::BlockStart => depth += 1,
            Kind::BlockEnd => depth -= 1,
            _ => {}
        }

        cursor += 1;
    }

    let body = tokens[body_start..cursor - 1].to_vec();
    let function = Function::new(
        name.text.clone(),
        name.position,
        parameters,
        return_types,
        body,
    );

    Ok((function, cursor))
}

/// Scans `import path` up to the end of the line.
fn scan_import(tokens: &[Token], index: usize) -> Result<(Import, usize), Error> {
    let keyword = &tokens[index];
    let mut cursor = index + 1;
    let mut path = String::new();

    while let Some(token) = tokens.get(cursor) {
        match token.kind {
            Kind::NewLine => break,
            Kind::Identifier | Kind::Text => {
                path.push_str(&token.text);
                cursor += 1;
            }
            _ => {
                return Err(Error::TopLevel {
                    position: token.position,
                })
            }
        }
    }

    if path.is_empty() {
        return Err(Error::TopLevel {
            position: keyword.position,
        });
    }

    Ok((
        Import {
            path,
            position: keyword.position,
        },
        cursor,
    ))
}

/// Scans `struct Name { fields }`. Field types are tolerated and ignored.
fn scan_struct(tokens: &[Token], index: usize) -> Result<(Struct, usize), Error> {
    let keyword = &tokens[index];
    let mut cursor = index + 1;

    let Some(name) = tokens.get(cursor).filter(|t| t.kind == Kind::Identifier) else {
        return Err(Error::TopLevel {
            position: keyword.position,
        });
    };
    cursor += 1;

    expect(tokens, cursor, Kind::BlockStart, '{')?;
    cursor += 1;

    let mut fields = Vec::new();
    let mut last_was_name = false;

    loop {
        match tokens.get(cursor) {
            Some(token) if token.kind == Kind::BlockEnd => {
                cursor += 1;
                break;
            }
            Some(token) if token.kind == Kind::Identifier => {
                // First identifier on a line is the field, a second one is
                // its type.
                if last_was_name {
                    last_was_name = false;
                } else {
                    fields.push(token.text.clone());
                    last_was_name = true;
                }
                cursor += 1;
            }
            Some(token) if token.kind == Kind::NewLine || token.kind == Kind::Comment => {
                last_was_name = false;
                cursor += 1;
            }
            _ => {
                return Err(Error::MissingCharacter {
                    character: '}',
                    position: end_position(tokens, cursor),
                })
            }
        }
    }

    Ok((
        Struct {
            name: name.text.clone(),
            fields,
            position: keyword.position,
        },
        cursor,
    ))
}

fn expect(tokens: &[Token], index: usize, kind: Kind, character: char) -> Result<(), Error> {
    match tokens.get(index) {
        Some(token) if token.kind == kind => Ok(()),
        _ => Err(Error::MissingCharacter {
            character,
            position: end_position(tokens, index),
        }),
    }
}

fn end_position(tokens: &[Token], index: usize) -> usize {
    tokens
        .get(index)
        .or_else(|| tokens.last())
        .map(|t| t.position)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tokenizer::tokenize;

    #[test]
    fn scans_functions_in_order() -> Result<()> {
        let program = scan(&tokenize("f(a, b) {\nreturn a + b\n}\n\nmain() {\n}\n"))?;

        let names: Vec<&str> = program
            .functions
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["f", "main"]);
        assert_eq!(program.functions[0].parameters.len(), 2);
        Ok(())
    }

    #[test]
    fn typed_parameters_and_return_types() -> Result<()> {
        let program = scan(&tokenize("f(x Int, y Int) Int {\nreturn x\n}\n"))?;
        let function = &program.functions[0];

        assert_eq!(function.parameters[0].type_name.as_deref(), Some("Int"));
        assert_eq!(function.return_types, vec!["Int".to_string()]);
        Ok(())
    }

    #[test]
    fn function_body_excludes_braces() -> Result<()> {
        let program = scan(&tokenize("main() { x = 1\n}\n"))?;
        let function = &program.functions[0];

        assert!(function
            .tokens
            .iter()
            .all(|t| t.kind != Kind::BlockStart && t.kind != Kind::BlockEnd));
        assert_eq!(function.instructions.len(), 1);
        Ok(())
    }

    #[test]
    fn nested_blocks_stay_in_the_body() -> Result<()> {
        let program = scan(&tokenize("main() {\nloop {\nbreak\n}\n}\n"))?;
        assert_eq!(program.functions.len(), 1);
        Ok(())
    }

    #[test]
    fn imports_and_structs() -> Result<()> {
        let program = scan(&tokenize("import math\n\nstruct Point {\nx Int\ny Int\n}\n"))?;

        assert_eq!(program.imports[0].path, "math");
        assert_eq!(program.structs[0].name, "Point");
        assert_eq!(program.structs[0].fields, vec!["x", "y"]);
        Ok(())
    }

    #[test]
    fn three_consecutive_newlines_are_diagnosed() {
        let error = scan(&tokenize("main() {\n}\n\n\n\nf() {\n}\n")).unwrap_err();
        assert!(matches!(error, Error::UnnecessaryNewlines { .. }));
    }

    #[test]
    fn stray_tokens_at_top_level() {
        let error = scan(&tokenize("42\n")).unwrap_err();
        assert!(matches!(error, Error::TopLevel { .. }));
    }

    #[test]
    fn missing_function_brace() {
        let error = scan(&tokenize("main()\n")).unwrap_err();
        assert!(matches!(
            error,
            Error::MissingCharacter { character: '{', .. }
        ));
    }
}
