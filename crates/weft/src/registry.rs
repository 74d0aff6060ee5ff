use ahash::AHashMap;

use crate::{
    error::{EngineResult, Error},
    node::NodeId,
    scope::Resolver,
    value::Value,
};

/// A user-defined macro: its positional parameter names and the `def` node
/// whose `case_0` branch is the body.
#[derive(Debug)]
pub(crate) struct Macro {
    pub params: Vec<String>,
    pub node: NodeId,
}

/// Per-template macro registry. `call` targets resolve at compile time, so
/// forward references are rejected there.
#[derive(Debug, Default)]
pub(crate) struct MacroRegistry {
    map: AHashMap<String, Macro>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.map.get(name)
    }

    pub fn insert(&mut self, name: String, mac: Macro) {
        self.map.insert(name, mac);
    }
}

/// A host-registered function callable from expressions.
///
/// The resolver gives the handler the same name-resolution view the engine
/// uses, so variable-typed arguments can be inspected.
pub type NativeFunction = Box<dyn Fn(&Resolver<'_>, Value) -> EngineResult<Value>>;

/// A pure string-to-string transform registered through
/// [`Engine::register_strfunc`](crate::Engine::register_strfunc).
pub type StringFunction = Box<dyn Fn(&str) -> EngineResult<String>>;

enum FunctionImpl {
    Native(NativeFunction),
    Transform(StringFunction),
}

struct FunctionEntry {
    arity: usize,
    imp: FunctionImpl,
}

/// Registry of callable functions, shared read-only with nested engines
/// during render.
#[derive(Default)]
pub(crate) struct FunctionRegistry {
    map: AHashMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    /// Creates a registry holding the built-in functions `len` and `name`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry
            .register("len", 1, Box::new(builtin_len))
            .expect("builtin registration cannot collide");
        registry
            .register("name", 1, Box::new(builtin_name))
            .expect("builtin registration cannot collide");
        registry
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn register(&mut self, name: &str, arity: usize, function: NativeFunction) -> EngineResult<()> {
        self.insert(name, arity, FunctionImpl::Native(function))
    }

    pub fn register_str(&mut self, name: &str, function: StringFunction) -> EngineResult<()> {
        self.insert(name, 1, FunctionImpl::Transform(function))
    }

    fn insert(&mut self, name: &str, arity: usize, imp: FunctionImpl) -> EngineResult<()> {
        if arity != 1 {
            return Err(Error::assert("Currently, only 1 argument functions are supported"));
        }
        if self.map.contains_key(name) {
            return Err(Error::duplicate(format!(
                "Attempt to register duplicate function {name}"
            )));
        }
        self.map.insert(name.to_owned(), FunctionEntry { arity, imp });
        Ok(())
    }

    /// Invokes a registered function with an evaluated argument.
    pub fn call(&self, name: &str, resolver: &Resolver<'_>, arg: Value) -> EngineResult<Value> {
        let entry = self
            .map
            .get(name)
            .ok_or_else(|| Error::assert(format!("Attempt to evaluate unregistered function {name}")))?;
        debug_assert_eq!(entry.arity, 1);
        match &entry.imp {
            FunctionImpl::Native(function) => function(resolver, arg),
            FunctionImpl::Transform(function) => transform_call(function, resolver, arg),
        }
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("names", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Applies a string transform: string-domain arguments are resolved and
/// transformed, everything else passes through untouched.
fn transform_call(function: &StringFunction, resolver: &Resolver<'_>, arg: Value) -> EngineResult<Value> {
    match &arg {
        Value::Str(s) => Ok(Value::Str(function(s)?)),
        Value::Var(name) => match resolver.value_of(name) {
            Some(s) => Ok(Value::Str(function(&s)?)),
            None => Ok(Value::Str(String::new())),
        },
        Value::Num(_) | Value::VarNum(_) => Ok(arg),
    }
}

/// `len(x)`: child count of the node a variable resolves to, or the length
/// of a string.
fn builtin_len(resolver: &Resolver<'_>, arg: Value) -> EngineResult<Value> {
    let len = match &arg {
        Value::Var(name) | Value::VarNum(name) => resolver.child_count(name),
        Value::Str(s) => s.len(),
        Value::Num(_) => 0,
    };
    Ok(Value::Num(i64::try_from(len).unwrap_or(i64::MAX)))
}

/// `name(x)`: terminal name of the node a variable resolves to; identity
/// on strings.
fn builtin_name(resolver: &Resolver<'_>, arg: Value) -> EngineResult<Value> {
    let name = match &arg {
        Value::Var(name) | Value::VarNum(name) => resolver.node_name(name).unwrap_or_default(),
        Value::Str(s) => s.clone(),
        Value::Num(_) => String::new(),
    };
    Ok(Value::Str(name))
}
