//! The built-in library: a fixed dispatch keyed by name.
//!
//! Built-ins shadow user functions of the same name. Every error message
//! names the built-in and the offending kind or count.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use rand::Rng;

use crate::diag::{Position, RuntimeError};
use crate::eval::{Machine, Unwind};
use crate::value::Value;

pub const NAMES: &[&str] = &[
    "len",
    "push",
    "pop",
    "sqrt",
    "pow",
    "abs",
    "floor",
    "ceil",
    "round",
    "min",
    "max",
    "random",
    "random_int",
    "str",
    "int",
    "float",
    "uppercase",
    "lowercase",
    "substr",
    "split",
    "join",
    "read_file",
    "write_file",
    "append_file",
    "file_exists",
    "map",
    "filter",
    "reduce",
    "typeof",
    "input",
    "gui_init",
    "gui_window",
    "gui_button",
    "gui_label",
    "gui_entry",
    "gui_box",
    "gui_add",
    "gui_set_text",
    "gui_get_text",
    "gui_on",
    "gui_show",
    "gui_run",
    "gui_quit",
    "gui_checkbox",
    "gui_textview",
    "gui_frame",
    "gui_separator",
    "gui_set_sensitive",
    "gui_get_checked",
    "gui_set_checked",
];

pub fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

/// Runs `name` as a built-in, or returns `None` so the caller can fall back
/// to the user function table.
pub fn dispatch<W: Write>(
    machine: &mut Machine<'_, W>,
    name: &str,
    args: &[Value],
    line: Position,
) -> Option<Result<Value, Unwind>> {
    if !is_builtin(name) {
        return None;
    }
    Some(call(machine, name, args, line))
}

fn error(message: String, line: Position) -> Unwind {
    RuntimeError::new(message, line).into()
}

fn require_number(value: &Value, who: &str, line: Position) -> Result<f64, Unwind> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(error(
            format!("{}() requires a number, got {}", who, other.type_name()),
            line,
        )),
    }
}

fn two_numbers(args: &[Value], who: &str, line: Position) -> Result<(f64, f64), Unwind> {
    if args.len() < 2 {
        return Err(error(
            format!("{}() expects 2 arguments, got {}", who, args.len()),
            line,
        ));
    }
    match (&args[0], &args[1]) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(error(format!("{}() requires two numbers", who), line)),
    }
}

fn one_arg<'a>(args: &'a [Value], who: &str, line: Position) -> Result<&'a Value, Unwind> {
    args.first()
        .ok_or_else(|| error(format!("{}() expects 1 argument, got 0", who), line))
}

/// `stoi`-style leading-integer parse: optional sign, then digits.
fn parse_leading_int(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok().map(|n| sign * n)
}

fn call<W: Write>(
    machine: &mut Machine<'_, W>,
    name: &str,
    args: &[Value],
    line: Position,
) -> Result<Value, Unwind> {
    match name {
        "len" => match one_arg(args, "len", line)? {
            Value::Array(items) => Ok(Value::Number(items.len() as f64)),
            Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
            other => Err(error(
                format!("len() requires array or string, got {}", other.type_name()),
                line,
            )),
        },

        "push" => {
            if args.len() < 2 {
                return Err(error(
                    format!("push() expects 2 arguments (array, value), got {}", args.len()),
                    line,
                ));
            }
            match &args[0] {
                Value::Array(items) => {
                    let mut extended = items.clone();
                    extended.push(args[1].clone());
                    Ok(Value::Array(extended))
                }
                other => Err(error(
                    format!("push() first argument must be an array, got {}", other.type_name()),
                    line,
                )),
            }
        }

        "pop" => match one_arg(args, "pop", line)? {
            Value::Array(items) => match items.last() {
                Some(last) => Ok(last.clone()),
                None => Err(error("Cannot pop from empty array".to_string(), line)),
            },
            other => Err(error(
                format!("pop() requires an array, got {}", other.type_name()),
                line,
            )),
        },

        "sqrt" => {
            let n = require_number(one_arg(args, "sqrt", line)?, "sqrt", line)?;
            if n < 0.0 {
                return Err(error("sqrt() of negative number".to_string(), line));
            }
            Ok(Value::Number(n.sqrt()))
        }

        "pow" => {
            let (a, b) = two_numbers(args, "pow", line)?;
            Ok(Value::Number(a.powf(b)))
        }

        "abs" => {
            let n = require_number(one_arg(args, "abs", line)?, "abs", line)?;
            Ok(Value::Number(n.abs()))
        }

        "floor" => {
            let n = require_number(one_arg(args, "floor", line)?, "floor", line)?;
            Ok(Value::Number(n.floor()))
        }

        "ceil" => {
            let n = require_number(one_arg(args, "ceil", line)?, "ceil", line)?;
            Ok(Value::Number(n.ceil()))
        }

        "round" => {
            let n = require_number(one_arg(args, "round", line)?, "round", line)?;
            Ok(Value::Number(n.round()))
        }

        "min" => {
            let (a, b) = two_numbers(args, "min", line)?;
            Ok(Value::Number(a.min(b)))
        }

        "max" => {
            let (a, b) = two_numbers(args, "max", line)?;
            Ok(Value::Number(a.max(b)))
        }

        "random" => Ok(Value::Number(machine.rng.gen::<f64>())),

        "random_int" => {
            let (a, b) = two_numbers(args, "random_int", line)?;
            let (low, high) = (a.trunc() as i64, b.trunc() as i64);
            if low > high {
                return Err(error(
                    "random_int(): min cannot be greater than max".to_string(),
                    line,
                ));
            }
            Ok(Value::Number(machine.rng.gen_range(low..=high) as f64))
        }

        "str" => match args.first() {
            None => Ok(Value::Str(String::new())),
            Some(value) => Ok(Value::Str(value.to_string())),
        },

        "int" => match one_arg(args, "int", line)? {
            Value::Number(n) => Ok(Value::Number(n.trunc())),
            Value::Str(s) => match parse_leading_int(s) {
                Some(n) => Ok(Value::Number(n)),
                None => Err(error(
                    format!("int(): cannot convert '{}' to integer", s),
                    line,
                )),
            },
            other => Err(error(
                format!("int() requires number or string, got {}", other.type_name()),
                line,
            )),
        },

        "float" => match one_arg(args, "float", line)? {
            Value::Number(n) => Ok(Value::Number(*n)),
            Value::Str(s) => match s.trim().parse::<f64>() {
                Ok(n) => Ok(Value::Number(n)),
                Err(_) => Err(error(
                    format!("float(): cannot convert '{}' to float", s),
                    line,
                )),
            },
            other => Err(error(
                format!("float() requires number or string, got {}", other.type_name()),
                line,
            )),
        },

        "uppercase" => match one_arg(args, "uppercase", line)? {
            Value::Str(s) => Ok(Value::Str(s.to_ascii_uppercase())),
            other => Err(error(
                format!("uppercase() requires a string, got {}", other.type_name()),
                line,
            )),
        },

        "lowercase" => match one_arg(args, "lowercase", line)? {
            Value::Str(s) => Ok(Value::Str(s.to_ascii_lowercase())),
            other => Err(error(
                format!("lowercase() requires a string, got {}", other.type_name()),
                line,
            )),
        },

        "substr" => {
            if args.len() < 3 {
                return Err(error(
                    format!(
                        "substr() expects 3 arguments (string, start, length), got {}",
                        args.len()
                    ),
                    line,
                ));
            }
            let text = match &args[0] {
                Value::Str(s) => s,
                other => {
                    return Err(error(
                        format!(
                            "substr() first argument must be a string, got {}",
                            other.type_name()
                        ),
                        line,
                    ));
                }
            };
            let (start, length) = match (&args[1], &args[2]) {
                (Value::Number(a), Value::Number(b)) => (a.trunc() as i64, b.trunc() as i64),
                _ => {
                    return Err(error(
                        "substr() start and length must be numbers".to_string(),
                        line,
                    ));
                }
            };
            let chars: Vec<char> = text.chars().collect();
            if start < 0 || start as usize >= chars.len() {
                return Err(error("substr(): start index out of bounds".to_string(), line));
            }
            let taken: String = chars[start as usize..]
                .iter()
                .take(length.max(0) as usize)
                .collect();
            Ok(Value::Str(taken))
        }

        "split" => {
            if args.len() < 2 {
                return Err(error(
                    format!(
                        "split() expects 2 arguments (string, delimiter), got {}",
                        args.len()
                    ),
                    line,
                ));
            }
            match (&args[0], &args[1]) {
                (Value::Str(text), Value::Str(delim)) => {
                    if delim.is_empty() {
                        return Err(error("split(): delimiter cannot be empty".to_string(), line));
                    }
                    let parts = text
                        .split(delim.as_str())
                        .map(|part| Value::Str(part.to_string()))
                        .collect();
                    Ok(Value::Array(parts))
                }
                _ => Err(error("split() requires two strings".to_string(), line)),
            }
        }

        "join" => {
            if args.len() < 2 {
                return Err(error(
                    format!(
                        "join() expects 2 arguments (array, separator), got {}",
                        args.len()
                    ),
                    line,
                ));
            }
            let items = match &args[0] {
                Value::Array(items) => items,
                other => {
                    return Err(error(
                        format!(
                            "join() first argument must be an array, got {}",
                            other.type_name()
                        ),
                        line,
                    ));
                }
            };
            let separator = match &args[1] {
                Value::Str(s) => s,
                other => {
                    return Err(error(
                        format!(
                            "join() second argument must be a string, got {}",
                            other.type_name()
                        ),
                        line,
                    ));
                }
            };
            let joined = items
                .iter()
                .map(|item| item.to_string())
                .collect::<Vec<_>>()
                .join(separator);
            Ok(Value::Str(joined))
        }

        "typeof" => {
            let value = one_arg(args, "typeof", line)?;
            Ok(Value::Str(value.type_name().to_string()))
        }

        "map" => {
            let (items, lambda) = array_and_lambda(args, "map", 1, line)?;
            let mut mapped = Vec::with_capacity(items.len());
            for item in items {
                mapped.push(machine.call_lambda(lambda.clone(), vec![item], line)?);
            }
            Ok(Value::Array(mapped))
        }

        "filter" => {
            let (items, lambda) = array_and_lambda(args, "filter", 1, line)?;
            let mut kept = Vec::new();
            for item in items {
                let keep = machine.call_lambda(lambda.clone(), vec![item.clone()], line)?;
                if matches!(keep, Value::Bool(true)) {
                    kept.push(item);
                }
            }
            Ok(Value::Array(kept))
        }

        "reduce" => {
            if args.len() < 3 {
                return Err(error(
                    format!(
                        "reduce() expects 3 arguments (array, initial, lambda), got {}",
                        args.len()
                    ),
                    line,
                ));
            }
            let (items, lambda) = array_and_lambda(args, "reduce", 2, line)?;
            let mut accumulator = args[1].clone();
            for item in items {
                accumulator = machine.call_lambda(lambda.clone(), vec![accumulator, item], line)?;
            }
            Ok(accumulator)
        }

        "input" => {
            if let Some(prompt) = args.first() {
                match prompt {
                    Value::Str(text) => {
                        write!(machine.output, "{}", text)
                            .and_then(|_| machine.output.flush())
                            .map_err(|e| error(format!("input(): {}", e), line))?;
                    }
                    other => {
                        return Err(error(
                            format!("input() prompt must be a string, got {}", other.type_name()),
                            line,
                        ));
                    }
                }
            }
            let mut buffer = String::new();
            match io::stdin().read_line(&mut buffer) {
                Ok(0) => Ok(Value::Str(String::new())),
                Ok(_) => {
                    while buffer.ends_with('\n') || buffer.ends_with('\r') {
                        buffer.pop();
                    }
                    Ok(Value::Str(buffer))
                }
                Err(e) => Err(error(format!("input(): {}", e), line)),
            }
        }

        "read_file" => {
            let path = string_path(args, "read_file", line)?;
            fs::read_to_string(&path)
                .map(Value::Str)
                .map_err(|_| error(format!("read_file(): cannot open file '{}'", path), line))
        }

        "write_file" => {
            let (path, content) = path_and_content(args, "write_file", line)?;
            fs::write(&path, content)
                .map(|_| Value::Bool(true))
                .map_err(|_| {
                    error(
                        format!("write_file(): cannot open file '{}' for writing", path),
                        line,
                    )
                })
        }

        "append_file" => {
            let (path, content) = path_and_content(args, "append_file", line)?;
            fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .and_then(|mut file| file.write_all(content.as_bytes()))
                .map(|_| Value::Bool(true))
                .map_err(|_| {
                    error(
                        format!("append_file(): cannot open file '{}' for appending", path),
                        line,
                    )
                })
        }

        "file_exists" => {
            let path = string_path(args, "file_exists", line)?;
            Ok(Value::Bool(Path::new(&path).exists()))
        }

        "gui_run" => {
            loop {
                let event = machine.gui.next_event(line)?;
                match event {
                    Some(event) => {
                        machine.call_function(&event.handler, event.args, line)?;
                    }
                    None => break,
                }
            }
            Ok(Value::Number(0.0))
        }

        gui_op if gui_op.starts_with("gui_") => {
            machine.gui.call(gui_op, args, line).map_err(Unwind::from)
        }

        other => Err(error(format!("Undefined function '{}'", other), line)),
    }
}

fn string_path(args: &[Value], who: &str, line: Position) -> Result<String, Unwind> {
    match args.first() {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Err(error(
            format!(
                "{}() requires a string filename, got {}",
                who,
                other.type_name()
            ),
            line,
        )),
        None => Err(error(
            format!("{}() expects 1 argument (filename), got 0", who),
            line,
        )),
    }
}

fn path_and_content(args: &[Value], who: &str, line: Position) -> Result<(String, String), Unwind> {
    if args.len() < 2 {
        return Err(error(
            format!(
                "{}() expects 2 arguments (filename, content), got {}",
                who,
                args.len()
            ),
            line,
        ));
    }
    match (&args[0], &args[1]) {
        (Value::Str(path), Value::Str(content)) => Ok((path.clone(), content.clone())),
        _ => Err(error(format!("{}() requires two strings", who), line)),
    }
}

/// Unpacks `(array, ..., lambda-at-index)` for the higher-order built-ins.
fn array_and_lambda(
    args: &[Value],
    who: &str,
    lambda_index: usize,
    line: Position,
) -> Result<(Vec<Value>, std::rc::Rc<crate::value::LambdaValue>), Unwind> {
    if args.len() < lambda_index + 1 {
        let expected = lambda_index + 1;
        return Err(error(
            format!(
                "{}() expects {} arguments (array, lambda), got {}",
                who,
                expected,
                args.len()
            ),
            line,
        ));
    }
    let items = match &args[0] {
        Value::Array(items) => items.clone(),
        other => {
            return Err(error(
                format!(
                    "{}() first argument must be an array, got {}",
                    who,
                    other.type_name()
                ),
                line,
            ));
        }
    };
    let lambda = match &args[lambda_index] {
        Value::Lambda(lambda) => lambda.clone(),
        other => {
            return Err(error(
                format!(
                    "{}() argument {} must be a lambda, got {}",
                    who,
                    lambda_index + 1,
                    other.type_name()
                ),
                line,
            ));
        }
    };
    Ok((items, lambda))
}

#[cfg(test)]
mod tests {
    use crate::interpreter::Interpreter;

    fn run(source: &str) -> Result<String, String> {
        let mut out: Vec<u8> = Vec::new();
        {
            let mut interp = Interpreter::new(&mut out);
            interp.eval(source).map_err(|e| e.to_string())?;
        }
        Ok(String::from_utf8(out).expect("output is not UTF-8"))
    }

    #[test]
    fn len_of_arrays_and_strings() {
        assert_eq!(run("puts len([1, 2, 3]);").unwrap(), "3\n");
        assert_eq!(run(r#"puts len("choco");"#).unwrap(), "5\n");
        assert!(run("puts len(5);").unwrap_err().contains("len() requires array or string, got number"));
    }

    #[test]
    fn push_returns_a_new_array() {
        let program = r#"
            let a = [1, 2];
            let b = push(a, 3);
            puts a;
            puts b;
        "#;
        assert_eq!(run(program).unwrap(), "[1, 2]\n[1, 2, 3]\n");
    }

    #[test]
    fn pop_returns_last_without_mutating() {
        let program = r#"
            let a = [1, 2, 3];
            puts pop(a);
            puts a;
        "#;
        assert_eq!(run(program).unwrap(), "3\n[1, 2, 3]\n");
        assert!(run("puts pop([]);").unwrap_err().contains("Cannot pop from empty array"));
    }

    #[test]
    fn numeric_builtins() {
        assert_eq!(run("puts sqrt(16);").unwrap(), "4\n");
        assert_eq!(run("puts pow(2, 10);").unwrap(), "1024\n");
        assert_eq!(run("puts abs(-3.5);").unwrap(), "3.5\n");
        assert_eq!(run("puts floor(2.9);").unwrap(), "2\n");
        assert_eq!(run("puts ceil(2.1);").unwrap(), "3\n");
        assert_eq!(run("puts round(2.5);").unwrap(), "3\n");
        assert_eq!(run("puts min(3, 7);").unwrap(), "3\n");
        assert_eq!(run("puts max(3, 7);").unwrap(), "7\n");
    }

    #[test]
    fn sqrt_of_negative_errors() {
        assert!(run("puts sqrt(-1);").unwrap_err().contains("sqrt() of negative number"));
    }

    #[test]
    fn numeric_builtins_reject_other_kinds() {
        assert!(run(r#"puts sqrt("x");"#).unwrap_err().contains("sqrt() requires a number, got string"));
        assert!(run("puts pow(1, true);").unwrap_err().contains("pow() requires two numbers"));
    }

    #[test]
    fn random_stays_in_range() {
        let output = run("for i in 0..20 { let r = random(); if r < 0 { puts \"low\"; } if r >= 1 { puts \"high\"; } }").unwrap();
        assert_eq!(output, "");
        let output = run("for i in 0..20 { let r = random_int(3, 5); if r < 3 { puts \"low\"; } if r > 5 { puts \"high\"; } }").unwrap();
        assert_eq!(output, "");
    }

    #[test]
    fn random_int_rejects_inverted_range() {
        assert!(run("puts random_int(5, 3);")
            .unwrap_err()
            .contains("random_int(): min cannot be greater than max"));
    }

    #[test]
    fn conversions() {
        assert_eq!(run("puts str();").unwrap(), "\n");
        assert_eq!(run("puts str(3.5) + \"!\";").unwrap(), "3.5!\n");
        assert_eq!(run("puts int(3.9);").unwrap(), "3\n");
        assert_eq!(run(r#"puts int("42");"#).unwrap(), "42\n");
        assert_eq!(run(r#"puts int("12.5");"#).unwrap(), "12\n");
        assert_eq!(run(r#"puts int("-7");"#).unwrap(), "-7\n");
        assert_eq!(run(r#"puts float("2.5");"#).unwrap(), "2.5\n");
        assert_eq!(run("puts float(2.5);").unwrap(), "2.5\n");
    }

    #[test]
    fn failed_conversions_error() {
        assert!(run(r#"puts int("abc");"#).unwrap_err().contains("int(): cannot convert 'abc' to integer"));
        assert!(run(r#"puts float("abc");"#).unwrap_err().contains("float(): cannot convert 'abc' to float"));
    }

    #[test]
    fn string_builtins() {
        assert_eq!(run(r#"puts uppercase("cHoco");"#).unwrap(), "CHOCO\n");
        assert_eq!(run(r#"puts lowercase("ChOcO");"#).unwrap(), "choco\n");
        assert_eq!(run(r#"puts substr("chocolate", 0, 5);"#).unwrap(), "choco\n");
        assert_eq!(run(r#"puts substr("choco", 3, 99);"#).unwrap(), "co\n");
        assert!(run(r#"puts substr("abc", 9, 1);"#)
            .unwrap_err()
            .contains("substr(): start index out of bounds"));
    }

    #[test]
    fn split_and_join() {
        assert_eq!(run(r#"puts split("a,b,c", ",");"#).unwrap(), "[a, b, c]\n");
        assert_eq!(run(r#"puts split("a--b", "--");"#).unwrap(), "[a, b]\n");
        assert!(run(r#"puts split("abc", "");"#)
            .unwrap_err()
            .contains("split(): delimiter cannot be empty"));
        assert_eq!(run(r#"puts join([1, 2, 3], "-");"#).unwrap(), "1-2-3\n");
        assert_eq!(run(r#"puts join([], "-");"#).unwrap(), "\n");
    }

    #[test]
    fn typeof_reports_kind_names() {
        assert_eq!(run("puts typeof(1);").unwrap(), "number\n");
        assert_eq!(run(r#"puts typeof("s");"#).unwrap(), "string\n");
        assert_eq!(run("puts typeof(true);").unwrap(), "bool\n");
        assert_eq!(run("puts typeof([1]);").unwrap(), "array\n");
        assert_eq!(run("puts typeof(|x| => { return x; });").unwrap(), "lambda\n");
        let program = r#"
            struct Point { x, y }
            puts typeof(Point { x: 1, y: 2 });
        "#;
        assert_eq!(run(program).unwrap(), "Point\n");
    }

    #[test]
    fn map_filter_reduce() {
        assert_eq!(
            run("puts map([1, 2, 3], |x| => { return x * 2; });").unwrap(),
            "[2, 4, 6]\n"
        );
        assert_eq!(
            run("puts filter([1, 2, 3, 4], |x| => { return x % 2 == 0; });").unwrap(),
            "[2, 4]\n"
        );
        assert_eq!(
            run("puts reduce([1, 2, 3, 4], 0, |a, b| => { return a + b; });").unwrap(),
            "10\n"
        );
    }

    #[test]
    fn higher_order_builtins_check_kinds() {
        assert!(run("puts map(5, |x| => { return x; });")
            .unwrap_err()
            .contains("map() first argument must be an array, got number"));
        assert!(run("puts map([1], 5);")
            .unwrap_err()
            .contains("map() argument 2 must be a lambda, got number"));
        assert!(run("puts reduce([1], 0);")
            .unwrap_err()
            .contains("reduce() expects 3 arguments"));
    }

    #[test]
    fn file_io_roundtrip() {
        let dir = std::env::temp_dir().join("chocolang-builtin-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.txt");
        let path_str = path.to_str().unwrap();

        let program = format!(
            r#"
                puts file_exists("{p}");
                write_file("{p}", "line one\n");
                append_file("{p}", "line two");
                puts file_exists("{p}");
                puts read_file("{p}");
            "#,
            p = path_str
        );
        let _ = std::fs::remove_file(&path);
        assert_eq!(run(&program).unwrap(), "false\ntrue\nline one\nline two\n");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn read_file_errors_name_the_file() {
        assert!(run(r#"puts read_file("definitely-not-here.txt");"#)
            .unwrap_err()
            .contains("read_file(): cannot open file 'definitely-not-here.txt'"));
    }

    #[test]
    fn builtins_shadow_user_functions() {
        let program = r#"
            fn len(x) { return 999; }
            puts len([1, 2]);
        "#;
        assert_eq!(run(program).unwrap(), "2\n");
    }
}
