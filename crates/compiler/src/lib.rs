//! Front end of the lunapr scripting language: lexer, parser and the syntax
//! tree the VM evaluates.

#[macro_use]
extern crate log;

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::FunctionProto;
pub use error::{CompileError, ParseErrorType};

use std::rc::Rc;

/// Compile a chunk of source text into its main function.
///
/// `source_path` names the chunk in error messages and tracebacks, so it is
/// usually a file name or a `=label`.
pub fn compile(source: &str, source_path: &str) -> Result<Rc<FunctionProto>, CompileError> {
    trace!("compiling chunk {source_path}");
    parser::parse_program(source, source_path).map(Rc::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_main_chunk() {
        let chunk = compile("local x = ...\nreturn x", "=chunk").unwrap();
        assert!(chunk.is_main_chunk());
        assert!(chunk.is_vararg);
        assert_eq!(chunk.source_path, "=chunk");
        assert_eq!(chunk.body.len(), 2);
    }

    #[test]
    fn test_compile_error_location() {
        let err = compile("local x = \n\n)", "@script.lua").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.to_string().starts_with("script.lua:3:"));
    }

    #[test]
    fn test_proto_survives_bincode() {
        let chunk = compile("return function(a, ...) return a, ... end", "=chunk").unwrap();
        let bytes = bincode::serialize(&*chunk).unwrap();
        let back: FunctionProto = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, *chunk);
    }
}
