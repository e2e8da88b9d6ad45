//! Arithmetic procedures exposed by the demo server

use crate::error::{ProcedureError, RegistryError};
use crate::registry::ProcedureRegistry;
use crate::value::{finite_float, Number};

pub fn add(x: Number, y: Number) -> Result<Number, ProcedureError> {
    let result = x.combine(y, "add", i64::checked_add, |a, b| a + b)?;
    tracing::debug!("add({:?}, {:?}) = {:?}", x, y, result);
    Ok(result)
}

pub fn subtract(x: Number, y: Number) -> Result<Number, ProcedureError> {
    let result = x.combine(y, "subtract", i64::checked_sub, |a, b| a - b)?;
    tracing::debug!("subtract({:?}, {:?}) = {:?}", x, y, result);
    Ok(result)
}

pub fn multiply(x: Number, y: Number) -> Result<Number, ProcedureError> {
    let result = x.combine(y, "multiply", i64::checked_mul, |a, b| a * b)?;
    tracing::debug!("multiply({:?}, {:?}) = {:?}", x, y, result);
    Ok(result)
}

/// True division; the result is always a float.
pub fn divide(x: Number, y: Number) -> Result<f64, ProcedureError> {
    if y.is_zero() {
        tracing::warn!("Division by zero attempted: {:?} / {:?}", x, y);
        return Err(ProcedureError::DivisionByZero);
    }
    let result = finite_float(x.as_f64() / y.as_f64(), "divide")?;
    tracing::debug!("divide({:?}, {:?}) = {}", x, y, result);
    Ok(result)
}

/// Register the arithmetic procedures into `registry`.
pub fn register_math(registry: &mut ProcedureRegistry) -> Result<(), RegistryError> {
    tracing::info!("Registering math procedures");
    registry
        .register("add", add)?
        .register("subtract", subtract)?
        .register("multiply", multiply)?
        .register("divide", divide)?;
    Ok(())
}

/// A fresh registry holding every procedure the demo server exposes.
pub fn default_registry() -> Result<ProcedureRegistry, RegistryError> {
    let mut registry = ProcedureRegistry::new();
    register_math(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueKind};

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(add(Number::Int(2), Number::Int(2)), Ok(Number::Int(4)));
        assert_eq!(subtract(Number::Int(2), Number::Int(5)), Ok(Number::Int(-3)));
        assert_eq!(multiply(Number::Int(3), Number::Int(5)), Ok(Number::Int(15)));
    }

    #[test]
    fn test_float_promotion() {
        assert_eq!(add(Number::Int(1), Number::Float(0.25)), Ok(Number::Float(1.25)));
        assert_eq!(divide(Number::Int(10), Number::Int(4)), Ok(2.5));
        assert_eq!(divide(Number::Int(10), Number::Int(2)), Ok(5.0));
    }

    #[test]
    fn test_divide_by_zero() {
        assert_eq!(
            divide(Number::Int(10), Number::Int(0)),
            Err(ProcedureError::DivisionByZero)
        );
        assert_eq!(
            divide(Number::Float(1.0), Number::Float(0.0)),
            Err(ProcedureError::DivisionByZero)
        );
    }

    #[test]
    fn test_overflow_is_a_fault() {
        assert_eq!(
            multiply(Number::Int(i64::MAX), Number::Int(2)),
            Err(ProcedureError::Overflow("multiply"))
        );
        assert_eq!(
            multiply(Number::Float(1e308), Number::Int(10)),
            Err(ProcedureError::Overflow("multiply"))
        );
        assert_eq!(
            add(Number::Float(-1e308), Number::Float(-1e308)),
            Err(ProcedureError::Overflow("add"))
        );
        assert_eq!(
            divide(Number::Float(1e308), Number::Float(1e-10)),
            Err(ProcedureError::Overflow("divide"))
        );
    }

    #[test]
    fn test_default_registry() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.names(), vec!["add", "divide", "multiply", "subtract"]);
        for name in registry.names() {
            assert_eq!(registry.arity(&name), Some(2));
        }

        let add = registry.resolve("add").unwrap();
        assert_eq!(add.call(&[Value::Int(2), Value::Int(2)]), Ok(Value::Int(4)));
        assert_eq!(
            add.call(&[Value::Int(2), Value::from("two")]),
            Err(ProcedureError::TypeMismatch {
                position: 2,
                expected: "a number",
                actual: ValueKind::Str,
            })
        );
    }
}
