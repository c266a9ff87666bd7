//! Compiled condition expressions.

use std::fmt;
use std::panic;

use cel_interpreter::{Context, Program, Value};

/// A condition expression compiled once and evaluated per tuple.
pub struct CompiledCondition {
    source: String,
    program: Program,
}

impl fmt::Debug for CompiledCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCondition")
            .field("source", &self.source)
            .finish()
    }
}

impl CompiledCondition {
    /// Compiles a CEL expression.
    ///
    /// The underlying parser may panic on some malformed input, so the
    /// panic is caught and reported as a compile error.
    pub fn compile(expression: &str) -> Result<Self, String> {
        let result =
            panic::catch_unwind(panic::AssertUnwindSafe(|| Program::compile(expression)));

        let program = match result {
            Ok(Ok(program)) => program,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => {
                return Err("parser encountered an internal error".to_string());
            }
        };

        Ok(Self {
            source: expression.to_string(),
            program,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Runs the expression and requires a boolean result.
    pub fn evaluate(&self, context: &Context<'_>) -> Result<bool, String> {
        match self.program.execute(context) {
            Ok(Value::Bool(met)) => Ok(met),
            Ok(other) => Err(format!("expected a bool result, got {other:?}")),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_rejects_invalid_syntax() {
        for expression in ["a ==", "(a", "&&"] {
            assert!(
                CompiledCondition::compile(expression).is_err(),
                "should reject {expression}"
            );
        }
    }

    #[test]
    fn test_evaluate_bool_expression() {
        let compiled = CompiledCondition::compile("x > 5").unwrap();
        let mut ctx = Context::default();
        ctx.add_variable_from_value("x", Value::Int(10));

        assert_eq!(compiled.evaluate(&ctx), Ok(true));
        assert_eq!(compiled.source(), "x > 5");
    }

    #[test]
    fn test_evaluate_rejects_non_bool_result() {
        let compiled = CompiledCondition::compile("x + 1").unwrap();
        let mut ctx = Context::default();
        ctx.add_variable_from_value("x", Value::Int(1));

        assert!(compiled.evaluate(&ctx).is_err());
    }
}
