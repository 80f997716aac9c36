//! Concrete implementation of the symbol-resolution capability: maps a
//! stored `(module, name)` reference back to an invocable function. Host
//! code populates a `Registry` before starting the Engine; the Worker holds
//! a clone (`Arc`-wrapped) and looks up every claimed task's reference.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::value::Arguments;

/// `fn(args, kwargs) -> Result<value, message>`, the invocation boundary a
/// registered function is reduced to.
pub type Handler = Arc<dyn Fn(&[serde_json::Value], &serde_json::Map<String, serde_json::Value>) -> Result<serde_json::Value, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Registry {
    handlers: HashMap<(String, String), Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { handlers: HashMap::new() }
    }

    pub fn register<F>(&mut self, module: impl Into<String>, name: impl Into<String>, handler: F)
    where
        F: Fn(&[serde_json::Value], &serde_json::Map<String, serde_json::Value>) -> Result<serde_json::Value, String>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert((module.into(), name.into()), Arc::new(handler));
    }

    pub fn get(&self, module: &str, name: &str) -> Option<Handler> {
        self.handlers.get(&(module.to_string(), name.to_string())).cloned()
    }

    /// Resolves and invokes the function for `(module, name)`. A lookup miss
    /// or a function-level panic is folded into the same `Err(String)`
    /// shape as an ordinary returned error, matching the invocation
    /// boundary's `{Ok(value), Err(string)}` contract.
    pub fn invoke(
        &self,
        module: &str,
        name: &str,
        arguments: &Arguments,
    ) -> Result<serde_json::Value, String> {
        let handler = self
            .get(module, name)
            .ok_or_else(|| format!("no function registered for {module}::{name}"))?;
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&arguments.args, &arguments.kwargs)));
        match outcome {
            Ok(result) => result,
            Err(panic) => Err(panic_message(panic)),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task function panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_and_invokes_a_registered_function() {
        let mut registry = Registry::new();
        registry.register("math", "add", |args, _kwargs| {
            let a = args[0].as_i64().unwrap_or(0);
            let b = args[1].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        });
        let arguments = Arguments::new(vec![json!(30), json!(12)], Default::default());
        let result = registry.invoke("math", "add", &arguments).unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn missing_function_is_an_error_not_a_panic() {
        let registry = Registry::new();
        let arguments = Arguments::default();
        let err = registry.invoke("missing", "fn", &arguments).unwrap_err();
        assert!(err.contains("missing"));
    }

    #[test]
    fn panicking_function_is_folded_into_an_error() {
        let mut registry = Registry::new();
        registry.register("broken", "boom", |_args, _kwargs| {
            panic!("kaboom");
        });
        let arguments = Arguments::default();
        let err = registry.invoke("broken", "boom", &arguments).unwrap_err();
        assert_eq!(err, "kaboom");
    }
}
