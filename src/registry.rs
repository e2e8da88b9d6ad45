//! Procedure registry
//!
//! Maps procedure names to typed handlers. Handlers are plain Rust functions
//! whose argument types implement [`FromValue`]; the arity and argument
//! conversions are captured when the handler is registered, so the server
//! never inspects argument lists by hand.

use std::collections::HashMap;
use std::fmt;

use crate::error::{ProcedureError, RegistryError};
use crate::value::{FromValue, Value};

/// Names under this prefix belong to the server itself.
pub const RESERVED_PREFIX: &str = "system.";

/// A function that can be registered as a procedure.
///
/// Implemented for `Fn(A, ..) -> Result<R, ProcedureError>` with up to three
/// arguments, where every argument implements [`FromValue`] and `R`
/// converts into a [`Value`].
pub trait Handler<Args>: Send + Sync + 'static {
    /// Number of positional arguments the handler takes.
    const ARITY: usize;

    fn call(&self, params: &[Value]) -> Result<Value, ProcedureError>;
}

fn check_arity(expected: usize, actual: usize) -> Result<(), ProcedureError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ProcedureError::Arity { expected, actual })
    }
}

fn convert<T: FromValue>(params: &[Value], index: usize) -> Result<T, ProcedureError> {
    let value = &params[index];
    T::from_value(value).ok_or(ProcedureError::TypeMismatch {
        position: index + 1,
        expected: T::EXPECTED,
        actual: value.kind(),
    })
}

macro_rules! impl_handler {
    ($arity:expr; $($arg:ident => $idx:tt),*) => {
        impl<F, R, $($arg,)*> Handler<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Result<R, ProcedureError> + Send + Sync + 'static,
            R: Into<Value>,
            $($arg: FromValue,)*
        {
            const ARITY: usize = $arity;

            #[allow(unused_variables)]
            fn call(&self, params: &[Value]) -> Result<Value, ProcedureError> {
                check_arity(Self::ARITY, params.len())?;
                (self)($(convert::<$arg>(params, $idx)?),*).map(Into::into)
            }
        }
    };
}

impl_handler!(0;);
impl_handler!(1; A => 0);
impl_handler!(2; A => 0, B => 1);
impl_handler!(3; A => 0, B => 1, C => 2);

type BoxedHandler = Box<dyn Fn(&[Value]) -> Result<Value, ProcedureError> + Send + Sync>;

/// A registered procedure.
pub struct Procedure {
    arity: usize,
    handler: BoxedHandler,
}

impl Procedure {
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Invoke the procedure. Arity and argument types are checked before the
    /// handler body runs.
    pub fn call(&self, params: &[Value]) -> Result<Value, ProcedureError> {
        (self.handler)(params)
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Name -> procedure mapping.
///
/// Built once at startup and then shared read-only (typically behind an
/// `Arc`) by every connection the server handles.
#[derive(Debug, Default)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, Procedure>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`.
    pub fn register<H, Args>(
        &mut self,
        name: impl Into<String>,
        handler: H,
    ) -> Result<&mut Self, RegistryError>
    where
        H: Handler<Args>,
        Args: 'static,
    {
        let name = name.into();
        if name.starts_with(RESERVED_PREFIX) {
            return Err(RegistryError::ReservedName(name));
        }
        if self.procedures.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        tracing::debug!("Registering procedure {} (arity {})", name, H::ARITY);
        self.procedures.insert(
            name,
            Procedure {
                arity: H::ARITY,
                handler: Box::new(move |params| handler.call(params)),
            },
        );
        Ok(self)
    }

    pub fn resolve(&self, name: &str) -> Result<&Procedure, RegistryError> {
        self.procedures
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProcedure(name.to_string()))
    }

    pub fn arity(&self, name: &str) -> Option<usize> {
        self.procedures.get(name).map(Procedure::arity)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.procedures.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}
