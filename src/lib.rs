//! An interpreter for ChocoLang, a small dynamically-typed scripting
//! language with first-class lambdas, structs, `match`, and `try`/`catch`.
//!
//! There is no AST: the interpreter walks the flat token vector directly.
//! Control constructs scan forward for their brace-balanced body spans and
//! execute them by repositioning a cursor; functions and lambdas keep spans
//! into the token vector they were defined in and calls swap the cursor
//! there and back.
//!
//! # Examples
//!
//! See [`crate::interpreter::Interpreter`].
//!
//! # Limitations
//!
//! - Lexing and parsing bail out on the first error; there is no recovery.
//! - Lambdas capture their environment by value, so a closure cannot mutate
//!   its creator's bindings.
//! - `impl`, `async`, `await`, and `from` are reserved words with no runtime
//!   effect.

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod diag;
pub mod gui;
pub mod interpreter;
pub mod modules;
pub mod token;
pub mod value;

mod builtins;
mod env;
mod eval;
mod lexer;
