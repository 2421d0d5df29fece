//! API to control the interpreter.

use std::error::Error;
use std::fmt;
use std::io::prelude::*;
use std::rc::Rc;

use crate::diag::{LexError, ParseError, RuntimeError};
use crate::eval::{Machine, Unwind};
use crate::gui::{GuiHost, HeadlessHost};
use crate::lexer::Lexer;
use crate::modules::{FsLoader, ModuleLoader};

/// Token-stream-walking interpreter.
///
/// Each call to [`eval`](Interpreter::eval) lexes one source unit and runs it
/// against the persistent environment, so functions defined in one call stay
/// callable from the next.
///
/// # Example
///
/// ```
/// # use chocolang::interpreter::{ChocoError, Interpreter};
/// let mut output: Vec<u8> = Vec::new();
/// let mut interp = Interpreter::new(&mut output);
///
/// let program = r#"
///     fn fact(n) {
///         if n <= 1 { return 1; }
///         return n * fact(n - 1);
///     }
/// "#;
/// interp.eval(program)?;
///
/// interp.eval("puts fact(6);")?;
/// interp.eval("puts fact(3);")?;
///
/// assert_eq!(output, b"720\n6\n");
/// # Ok::<(), ChocoError>(())
/// ```
pub struct Interpreter<'o, W: Write> {
    machine: Machine<'o, W>,
}

/// Errors the interpreter can raise, one variant per phase.
#[derive(Debug)]
pub enum ChocoError {
    /// Malformed token or unterminated string.
    Lex(LexError),

    /// A statement or expression shape the dispatcher cannot consume.
    Parse(ParseError),

    /// Type or arity mismatch, bad index, unknown name, failed I/O, or an
    /// uncaught thrown value.
    Runtime(RuntimeError),
}

impl fmt::Display for ChocoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChocoError::Lex(e) => write!(f, "{}", e),
            ChocoError::Parse(e) => write!(f, "{}", e),
            ChocoError::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl Error for ChocoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChocoError::Lex(e) => Some(e),
            ChocoError::Parse(e) => Some(e),
            ChocoError::Runtime(e) => Some(e),
        }
    }
}

impl From<LexError> for ChocoError {
    fn from(e: LexError) -> ChocoError {
        ChocoError::Lex(e)
    }
}

impl From<ParseError> for ChocoError {
    fn from(e: ParseError) -> ChocoError {
        ChocoError::Parse(e)
    }
}

impl From<RuntimeError> for ChocoError {
    fn from(e: RuntimeError) -> ChocoError {
        ChocoError::Runtime(e)
    }
}

impl<'o, W: Write> Interpreter<'o, W> {
    /// An interpreter with the default collaborators: filesystem module
    /// lookup and the headless GUI host.
    pub fn new(output: &'o mut W) -> Interpreter<'o, W> {
        Interpreter::with_parts(output, Box::new(FsLoader), Box::new(HeadlessHost::new()))
    }

    /// An interpreter with injected collaborators.
    pub fn with_parts(
        output: &'o mut W,
        loader: Box<dyn ModuleLoader>,
        gui: Box<dyn GuiHost>,
    ) -> Interpreter<'o, W> {
        Interpreter {
            machine: Machine::new(output, loader, gui),
        }
    }

    /// Lexes and executes one source unit.
    pub fn eval(&mut self, source: &str) -> Result<(), ChocoError> {
        let tokens = Lexer::new(source).tokenize()?;
        self.machine.run_chunk(Rc::new(tokens)).map_err(|e| match e {
            Unwind::Parse(e) => ChocoError::Parse(e),
            Unwind::Fatal(e) => ChocoError::Runtime(e),
            Unwind::Thrown { message, pos } => ChocoError::Runtime(RuntimeError::new(
                format!("Uncaught exception: {}", message),
                pos,
            )),
        })
    }

    /// Bindings of the outermost scope, printable form, sorted by name.
    pub fn global_bindings(&self) -> Vec<(String, String)> {
        self.machine.global_bindings()
    }

    /// `name(p1, p2)` signatures of user functions, sorted by name.
    pub fn function_signatures(&self) -> Vec<String> {
        self.machine.function_signatures()
    }
}

impl<W: Write> fmt::Debug for Interpreter<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gui::HeadlessHost;
    use crate::modules::MapLoader;

    fn interpret(source: &str) -> Result<String, ChocoError> {
        let mut raw_output: Vec<u8> = Vec::new();
        {
            let mut interp = Interpreter::new(&mut raw_output);
            interp.eval(source)?;
        }
        Ok(String::from_utf8(raw_output).expect("cannot convert output to string"))
    }

    #[test]
    fn let_and_arithmetic() -> Result<(), ChocoError> {
        assert_eq!(interpret("let x = 5; puts x + 3;")?, "8\n");
        Ok(())
    }

    #[test]
    fn recursive_factorial() -> Result<(), ChocoError> {
        let program = r#"
            fn fact(n){ if n<=1 {return 1;} return n*fact(n-1); }
            puts fact(6);
        "#;
        assert_eq!(interpret(program)?, "720\n");
        Ok(())
    }

    #[test]
    fn curried_adder_through_closures() -> Result<(), ChocoError> {
        let program = r#"
            let adder = |a| => { return |b| => { return a+b; }; };
            let inc = adder(1);
            puts inc(41);
        "#;
        assert_eq!(interpret(program)?, "42\n");
        Ok(())
    }

    #[test]
    fn reduce_sums_an_array() -> Result<(), ChocoError> {
        let program = r#"
            let xs = [1,2,3,4];
            puts reduce(xs, 0, |a,b| => { return a+b; });
        "#;
        assert_eq!(interpret(program)?, "10\n");
        Ok(())
    }

    #[test]
    fn try_catch_scenario() -> Result<(), ChocoError> {
        let program = r#"try { throw "bad"; } catch e { puts "caught:" + e; }"#;
        assert_eq!(interpret(program)?, "caught:bad\n");
        Ok(())
    }

    #[test]
    fn match_scenario() -> Result<(), ChocoError> {
        let program = r#"
            match 2 {
                case 1 => { puts "one"; }
                case 2 => { puts "two"; }
                default => { puts "other"; }
            }
        "#;
        assert_eq!(interpret(program)?, "two\n");
        Ok(())
    }

    #[test]
    fn state_persists_across_eval_calls() -> Result<(), ChocoError> {
        let mut raw_output: Vec<u8> = Vec::new();
        {
            let mut interp = Interpreter::new(&mut raw_output);
            interp.eval("let total = 0;")?;
            interp.eval("fn bump(n) { return total + n; }")?;
            interp.eval("total = bump(5);")?;
            interp.eval("puts total;")?;
        }
        assert_eq!(String::from_utf8(raw_output).unwrap(), "5\n");
        Ok(())
    }

    #[test]
    fn lambdas_survive_their_defining_eval_call() -> Result<(), ChocoError> {
        let mut raw_output: Vec<u8> = Vec::new();
        {
            let mut interp = Interpreter::new(&mut raw_output);
            interp.eval("let double = |x| => { return x * 2; };")?;
            interp.eval("puts double(21);")?;
        }
        assert_eq!(String::from_utf8(raw_output).unwrap(), "42\n");
        Ok(())
    }

    #[test]
    fn lex_errors_carry_their_category() {
        match interpret("let s = \"unterminated") {
            Err(ChocoError::Lex(e)) => {
                assert!(e.to_string().starts_with("Lexer Error [line 1]"));
            }
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn parse_errors_carry_their_category() {
        match interpret("let = 5;") {
            Err(ChocoError::Parse(e)) => {
                assert!(e.to_string().starts_with("Parse Error [line 1]"));
            }
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn runtime_errors_carry_their_category() {
        match interpret("puts nothing_here;") {
            Err(ChocoError::Runtime(e)) => {
                assert!(e.to_string().starts_with("Runtime Error [line 1]"));
                assert!(e.message.contains("Undefined variable 'nothing_here'"));
            }
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn uncaught_throw_surfaces_as_runtime_error() {
        match interpret("\n\nthrow \"kaboom\";") {
            Err(ChocoError::Runtime(e)) => {
                assert_eq!(e.pos, 3);
                assert_eq!(e.message, "Uncaught exception: kaboom");
            }
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn introspection_lists_bindings_and_functions() -> Result<(), ChocoError> {
        let mut raw_output: Vec<u8> = Vec::new();
        let mut interp = Interpreter::new(&mut raw_output);
        interp.eval("let x = 1; let name = \"choco\";")?;
        interp.eval("fn greet(who, suffix) { return \"hi \" + who + suffix; }")?;

        assert_eq!(
            interp.global_bindings(),
            vec![
                ("greet".to_string(), "greet".to_string()),
                ("name".to_string(), "choco".to_string()),
                ("x".to_string(), "1".to_string()),
            ]
        );
        assert_eq!(interp.function_signatures(), vec!["greet(who, suffix)"]);
        Ok(())
    }

    #[test]
    fn import_uses_the_injected_loader() -> Result<(), ChocoError> {
        let mut loader = MapLoader::new();
        loader.insert("greeting", r#"fn hello(name) { return "hello " + name; }"#);

        let mut raw_output: Vec<u8> = Vec::new();
        {
            let mut interp = Interpreter::with_parts(
                &mut raw_output,
                Box::new(loader),
                Box::new(HeadlessHost::new()),
            );
            interp.eval("import greeting; puts hello(\"there\");")?;
        }
        assert_eq!(String::from_utf8(raw_output).unwrap(), "hello there\n");
        Ok(())
    }

    #[test]
    fn gui_events_reenter_the_interpreter() -> Result<(), ChocoError> {
        let mut host = HeadlessHost::new();
        host.queue_event("b1", "clicked");
        host.queue_event("b1", "clicked");

        let mut raw_output: Vec<u8> = Vec::new();
        {
            let mut interp = Interpreter::with_parts(
                &mut raw_output,
                Box::new(MapLoader::new()),
                Box::new(host),
            );
            let program = r#"
                let clicks = 0;
                fn on_click() {
                    clicks = clicks + 1;
                    puts "click " + str(clicks);
                }
                gui_init();
                gui_window("Counter");
                gui_button("Go", "b1");
                gui_on("b1", "clicked", "on_click");
                gui_run();
                puts "loop done";
            "#;
            interp.eval(program)?;
        }
        assert_eq!(
            String::from_utf8(raw_output).unwrap(),
            "click 1\nclick 2\nloop done\n"
        );
        Ok(())
    }
}
