//! Scalar functions a component offers to the host's relational engine.
//!
//! The host registers every [`ScalarFunction`] under its name at init and
//! calls back into the component, by name, whenever a statement uses it.

use portico_types::{FunctionFlag, ScalarFunctionDescriptor, WireValue};

use crate::error::{Error, Result};
use crate::value::{self, Value};

pub(crate) type ScalarHandlerFn = dyn Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync;

/// A registered scalar function: `(name, arity, flags, fn)`.
pub struct ScalarFunction {
    pub(crate) name: String,
    pub(crate) num_args: u32,
    pub(crate) flags: Vec<FunctionFlag>,
    pub(crate) handler: Box<ScalarHandlerFn>,
}

impl std::fmt::Debug for ScalarFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalarFunction")
            .field("name", &self.name)
            .field("num_args", &self.num_args)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

impl ScalarFunction {
    /// Function taking exactly `N` arguments.
    ///
    /// ```ignore
    /// ScalarFunction::new("is_even", &[FunctionFlag::Deterministic], |[n]: [Value; 1]| {
    ///     Ok(n.as_i64().is_some_and(|n| n % 2 == 0))
    /// })
    /// ```
    pub fn new<const N: usize, F, R>(
        name: impl Into<String>,
        flags: &[FunctionFlag],
        handler: F,
    ) -> Self
    where
        F: Fn([Value; N]) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<Value>,
    {
        Self {
            name: name.into(),
            num_args: u32::try_from(N).unwrap_or(u32::MAX),
            flags: flags.to_vec(),
            handler: Box::new(move |args: Vec<Value>| {
                let args: [Value; N] = args.try_into().map_err(|args: Vec<Value>| {
                    anyhow::anyhow!("expected {N} arguments, got {}", args.len())
                })?;
                handler(args).map(Into::into)
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn num_args(&self) -> u32 {
        self.num_args
    }

    #[must_use]
    pub fn flags(&self) -> &[FunctionFlag] {
        &self.flags
    }

    #[must_use]
    pub fn descriptor(&self) -> ScalarFunctionDescriptor {
        ScalarFunctionDescriptor {
            name: self.name.clone(),
            num_args: self.num_args,
            flags: self.flags.clone(),
        }
    }

    /// Decode the host's arguments, run the handler and encode its result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] on an arity mismatch and
    /// [`Error::Function`] when the handler fails.
    pub(crate) fn call(&self, args: Vec<WireValue>) -> Result<WireValue> {
        if u32::try_from(args.len()).ok() != Some(self.num_args) {
            return Err(Error::InvalidValue(format!(
                "{} takes {} arguments, got {}",
                self.name,
                self.num_args,
                args.len()
            )));
        }
        let args = args.into_iter().map(value::decode).collect();
        (self.handler)(args)
            .map(value::encode)
            .map_err(|err| Error::Function(format!("{}: {err:#}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concat() -> ScalarFunction {
        ScalarFunction::new(
            "concat",
            &[FunctionFlag::Deterministic],
            |[a, b]: [Value; 2]| {
                Ok(format!(
                    "{}{}",
                    a.as_str().unwrap_or_default(),
                    b.as_str().unwrap_or_default()
                ))
            },
        )
    }

    #[test]
    fn arity_comes_from_the_signature() {
        let f = concat();
        assert_eq!(f.num_args(), 2);
        assert_eq!(
            f.descriptor(),
            ScalarFunctionDescriptor {
                name: "concat".into(),
                num_args: 2,
                flags: vec![FunctionFlag::Deterministic],
            }
        );
    }

    #[test]
    fn call_decodes_and_encodes() {
        let out = concat()
            .call(vec![WireValue::Text("a".into()), WireValue::Text("b".into())])
            .unwrap();
        assert_eq!(out, WireValue::Text("ab".into()));
    }

    #[test]
    fn booleans_leave_as_integers() {
        let f = ScalarFunction::new("is_null", &[], |[v]: [Value; 1]| {
            Ok(matches!(v, Value::Null))
        });
        assert_eq!(f.call(vec![WireValue::Null]).unwrap(), WireValue::Integer(1));
    }

    #[test]
    fn wrong_arity_is_rejected_before_the_handler() {
        let err = concat().call(vec![WireValue::Null]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidValue(msg) if msg == "concat takes 2 arguments, got 1"
        ));
    }

    #[test]
    fn handler_error_names_the_function() {
        let f = ScalarFunction::new("fail", &[], |[]: [Value; 0]| {
            Err::<Value, _>(anyhow::anyhow!("division by zero"))
        });
        let err = f.call(Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "scalar function error: fail: division by zero");
    }
}
