use crate::dataset::Dataset;

/// What a local name is bound to.
///
/// `Node` holds the absolute dataset path the binding resolved to when it
/// was established; `Str` and `Num` hold copied values (from `loop`
/// counters and copied-in `call` arguments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BindingValue {
    Node(String),
    Str(String),
    Num(i64),
}

/// One local binding: a short name mapped to a value.
///
/// A binding's lifetime equals the render of its introducing directive
/// (`each`, `with`, `loop`, `call`).
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub name: String,
    pub value: BindingValue,
}

/// The local-binding stack. Innermost bindings are last and shadow outer
/// bindings of the same name.
#[derive(Debug, Default)]
pub(crate) struct LocalStack {
    frames: Vec<Binding>,
}

impl LocalStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stack depth, used to assert push/pop balance.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, name: &str, value: BindingValue) {
        self.frames.push(Binding {
            name: name.to_owned(),
            value,
        });
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Rebinds the innermost frame in place (loop and each iteration).
    pub fn set_top(&mut self, value: BindingValue) {
        if let Some(top) = self.frames.last_mut() {
            top.value = value;
        }
    }

    /// Swaps the whole stack for a macro-call frame, returning the caller's
    /// stack for restoration when the macro body finishes.
    pub fn replace(&mut self, frames: Vec<Binding>) -> Vec<Binding> {
        std::mem::replace(&mut self.frames, frames)
    }

    pub fn restore(&mut self, frames: Vec<Binding>) {
        self.frames = frames;
    }

    /// Finds the innermost binding whose name matches the head of `name`
    /// (the part before the first `.`), returning the binding and the
    /// remaining tail path, if any.
    pub fn lookup<'a, 'n>(&'a self, name: &'n str) -> Option<(&'a Binding, Option<&'n str>)> {
        let (head, tail) = match name.split_once('.') {
            Some((head, tail)) => (head, Some(tail)),
            None => (name, None),
        };
        self.frames
            .iter()
            .rev()
            .find(|binding| binding.name == head)
            .map(|binding| (binding, tail))
    }

    fn lookup_mut<'a, 'n>(&'a mut self, name: &'n str) -> Option<(&'a mut Binding, Option<&'n str>)> {
        let (head, tail) = match name.split_once('.') {
            Some((head, tail)) => (head, Some(tail)),
            None => (name, None),
        };
        self.frames
            .iter_mut()
            .rev()
            .find(|binding| binding.name == head)
            .map(|binding| (binding, tail))
    }
}

fn join_path(base: &str, tail: &str) -> String {
    format!("{base}.{tail}")
}

/// Read-only name resolution over the local-binding stack and the dataset.
///
/// Handed to registered functions so they can resolve variable-typed
/// arguments the same way the engine does.
pub struct Resolver<'a> {
    pub(crate) locals: &'a LocalStack,
    pub(crate) dataset: &'a Dataset,
}

impl Resolver<'_> {
    /// Resolves `name` to a string value: local bindings first (innermost
    /// outward, matching on the head segment), then the dataset root.
    /// Returns `None` for missing nodes and valueless nodes.
    #[must_use]
    pub fn value_of(&self, name: &str) -> Option<String> {
        match self.locals.lookup(name) {
            Some((binding, tail)) => match (&binding.value, tail) {
                (BindingValue::Node(path), None) => self.dataset.get_value(path).map(str::to_owned),
                (BindingValue::Node(path), Some(tail)) => {
                    self.dataset.get_value(&join_path(path, tail)).map(str::to_owned)
                }
                (BindingValue::Str(s), None) => Some(s.clone()),
                (BindingValue::Num(n), None) => Some(n.to_string()),
                (BindingValue::Str(_) | BindingValue::Num(_), Some(tail)) => {
                    warn_sub_path(tail, &binding.name);
                    None
                }
            },
            None => self.dataset.get_value(name).map(str::to_owned),
        }
    }

    /// Resolves `name` numerically: the local binding when one matches,
    /// otherwise the dataset value coerced through a base-0 prefix parse.
    #[must_use]
    pub fn num_of(&self, name: &str) -> i64 {
        if let Some((binding, None)) = self.locals.lookup(name) {
            if let BindingValue::Num(n) = binding.value {
                return n;
            }
        }
        self.value_of(name)
            .map_or(0, |s| crate::value::parse_int_prefix(&s).0)
    }

    /// Resolves `name` to the absolute dataset path of an existing node.
    ///
    /// Only node-typed local bindings participate; a string or number local
    /// of the same name falls through to the dataset root.
    #[must_use]
    pub fn node_path(&self, name: &str) -> Option<String> {
        let candidate = self.resolved_path(name);
        self.dataset.contains(&candidate).then_some(candidate)
    }

    /// The absolute dataset path `name` resolves to, whether or not a node
    /// exists there.
    #[must_use]
    pub(crate) fn resolved_path(&self, name: &str) -> String {
        match self.locals.lookup(name) {
            Some((binding, tail)) => match (&binding.value, tail) {
                (BindingValue::Node(path), None) => path.clone(),
                (BindingValue::Node(path), Some(tail)) => join_path(path, tail),
                (BindingValue::Str(_) | BindingValue::Num(_), _) => name.to_owned(),
            },
            None => name.to_owned(),
        }
    }

    /// The terminal name of the node `name` resolves to.
    #[must_use]
    pub fn node_name(&self, name: &str) -> Option<String> {
        let path = self.node_path(name)?;
        self.dataset.node_name(&path).map(str::to_owned)
    }

    /// Number of children of the node `name` resolves to; 0 when missing.
    #[must_use]
    pub fn child_count(&self, name: &str) -> usize {
        self.node_path(name)
            .map_or(0, |path| self.dataset.child_count(&path))
    }
}

/// Writes `value` at `name`, following the same local-first policy as
/// reads: a node-typed local writes through to the dataset at its path, a
/// value-typed local is replaced in place, and a miss falls through to the
/// dataset root.
pub(crate) fn set_through(
    locals: &mut LocalStack,
    dataset: &mut Dataset,
    name: &str,
    value: Option<String>,
) -> crate::error::EngineResult<()> {
    match locals.lookup_mut(name) {
        Some((binding, tail)) => match (&binding.value, tail) {
            (BindingValue::Node(path), None) => {
                let path = path.clone();
                dataset.set_opt_value(&path, value)
            }
            (BindingValue::Node(path), Some(tail)) => {
                let path = join_path(path, tail);
                dataset.set_opt_value(&path, value)
            }
            (BindingValue::Str(_) | BindingValue::Num(_), None) => {
                binding.value = BindingValue::Str(value.unwrap_or_default());
                Ok(())
            }
            (BindingValue::Str(_) | BindingValue::Num(_), Some(tail)) => {
                warn_sub_path(tail, &binding.name);
                Ok(())
            }
        },
        None => dataset.set_opt_value(name, value),
    }
}

fn warn_sub_path(sub: &str, local: &str) {
    eprintln!("warning: sub element '{sub}' of local variable '{local}' does not map to a dataset node, ignoring");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        let mut data = Dataset::new();
        data.set_value("items.0.k", "a").unwrap();
        data.set_value("items.1.k", "b").unwrap();
        data.set_value("top", "root-value").unwrap();
        data
    }

    #[test]
    fn locals_shadow_innermost_first() {
        let data = dataset();
        let mut locals = LocalStack::new();
        locals.push("x", BindingValue::Num(1));
        locals.push("x", BindingValue::Num(2));
        let resolver = Resolver {
            locals: &locals,
            dataset: &data,
        };
        assert_eq!(resolver.num_of("x"), 2);
        locals.pop();
        let resolver = Resolver {
            locals: &locals,
            dataset: &data,
        };
        assert_eq!(resolver.num_of("x"), 1);
    }

    #[test]
    fn node_binding_resolves_tail() {
        let data = dataset();
        let mut locals = LocalStack::new();
        locals.push("it", BindingValue::Node("items.1".to_owned()));
        let resolver = Resolver {
            locals: &locals,
            dataset: &data,
        };
        assert_eq!(resolver.value_of("it.k"), Some("b".to_owned()));
        assert_eq!(resolver.node_path("it"), Some("items.1".to_owned()));
        assert_eq!(resolver.node_name("it"), Some("1".to_owned()));
    }

    #[test]
    fn miss_falls_through_to_dataset() {
        let data = dataset();
        let locals = LocalStack::new();
        let resolver = Resolver {
            locals: &locals,
            dataset: &data,
        };
        assert_eq!(resolver.value_of("top"), Some("root-value".to_owned()));
        assert_eq!(resolver.value_of("nope"), None);
    }

    #[test]
    fn value_local_ignores_tail() {
        let data = dataset();
        let mut locals = LocalStack::new();
        locals.push("s", BindingValue::Str("hi".to_owned()));
        let resolver = Resolver {
            locals: &locals,
            dataset: &data,
        };
        assert_eq!(resolver.value_of("s"), Some("hi".to_owned()));
        assert_eq!(resolver.value_of("s.sub"), None);
    }

    #[test]
    fn set_through_node_local() {
        let mut data = dataset();
        let mut locals = LocalStack::new();
        locals.push("it", BindingValue::Node("items.0".to_owned()));
        set_through(&mut locals, &mut data, "it.k", Some("z".to_owned())).unwrap();
        assert_eq!(data.get_value("items.0.k"), Some("z"));
    }

    #[test]
    fn set_through_value_local_replaces_in_place() {
        let mut data = dataset();
        let mut locals = LocalStack::new();
        locals.push("n", BindingValue::Num(3));
        set_through(&mut locals, &mut data, "n", Some("9".to_owned())).unwrap();
        assert_eq!(locals.lookup("n").unwrap().0.value, BindingValue::Str("9".to_owned()));
        assert_eq!(data.get_value("n"), None);
    }

    #[test]
    fn set_through_miss_writes_dataset() {
        let mut data = dataset();
        let mut locals = LocalStack::new();
        set_through(&mut locals, &mut data, "fresh.key", Some("v".to_owned())).unwrap();
        assert_eq!(data.get_value("fresh.key"), Some("v"));
    }
}
