use crate::{
    compile::{Template, compile_file, compile_fragment},
    dataset::Dataset,
    directive::Directive,
    error::{EngineResult, Error, ErrorKind},
    eval::EvalCtx,
    expr::Expr,
    node::{Node, NodeId, Tree},
    output::OutputSink,
    registry::{FunctionRegistry, MacroRegistry},
    scope::{Binding, BindingValue, LocalStack, Resolver, set_through},
    value::Value,
};

/// Render context: one render invocation owns it end to end. Nested
/// renders (`lvar`, `linclude`) reborrow the dataset, function registry,
/// and sink, but get their own tree, macros, and local-binding stack.
pub(crate) struct Renderer<'a> {
    pub dataset: &'a mut Dataset,
    pub functions: &'a FunctionRegistry,
    pub macros: &'a MacroRegistry,
    pub sink: &'a mut dyn OutputSink,
    pub locals: LocalStack,
    pub tag: &'a str,
}

impl Renderer<'_> {
    fn ctx(&self) -> EvalCtx<'_> {
        EvalCtx {
            locals: &self.locals,
            dataset: self.dataset,
            functions: self.functions,
        }
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver {
            locals: &self.locals,
            dataset: self.dataset,
        }
    }

    /// Renders the whole tree to the sink.
    pub fn render(&mut self, tree: &Tree) -> EngineResult<()> {
        let depth = self.locals.depth();
        let result = self.render_node(tree, Some(tree.root()));
        debug_assert_eq!(self.locals.depth(), depth, "local bindings must balance across render");
        result
    }

    /// Walks a sibling chain; each handler returns where to continue.
    fn render_node(&mut self, tree: &Tree, start: Option<NodeId>) -> EngineResult<()> {
        let mut cursor = start;
        while let Some(id) = cursor {
            cursor = self.eval_node(tree, id)?;
        }
        Ok(())
    }

    fn eval_node(&mut self, tree: &Tree, id: NodeId) -> EngineResult<Option<NodeId>> {
        let node = tree.node(id);
        match node.directive {
            Directive::Literal => {
                if let Some(Expr::Str(text)) = &node.arg1 {
                    self.sink.write(text)?;
                }
            }
            Directive::Name => self.name_eval(node)?,
            Directive::Var => {
                let value = self.ctx().eval(arg1(node)?)?;
                self.emit_value(&value, node.required)?;
            }
            Directive::Lvar => self.lvar_eval(node)?,
            Directive::Linclude => self.linclude_eval(node)?,
            Directive::If => {
                let truthy = {
                    let ctx = self.ctx();
                    let value = ctx.eval(arg1(node)?)?;
                    ctx.as_bool(&value) != 0
                };
                if truthy {
                    self.render_node(tree, node.case_0)?;
                } else {
                    self.render_node(tree, node.case_1)?;
                }
            }
            Directive::Each => self.each_eval(tree, node)?,
            Directive::With => self.with_eval(tree, node)?,
            Directive::Loop => self.loop_eval(tree, node)?,
            Directive::Call => self.call_eval(tree, node)?,
            Directive::Set => self.set_eval(node)?,
            Directive::Alt => self.alt_eval(tree, node)?,
            // compile-time directives have nothing to do at render
            Directive::Evar | Directive::Include | Directive::Def => {}
            // closers never become tree nodes
            Directive::Else
            | Directive::Elif
            | Directive::EndIf
            | Directive::EndEach
            | Directive::EndWith
            | Directive::EndDef
            | Directive::EndLoop
            | Directive::EndAlt => {}
        }
        Ok(node.next)
    }

    /// Emits an evaluated value: integers decimalized, strings verbatim.
    /// A missing variable emits nothing unless the directive was required.
    fn emit_value(&mut self, value: &Value, required: bool) -> EngineResult<()> {
        if value.is_numeric() {
            let n = self.ctx().as_num(value);
            return self.sink.write(&n.to_string());
        }
        let resolved = self.ctx().as_string(value);
        match resolved {
            Some(s) => self.sink.write(&s),
            None => {
                if required {
                    let name = match value {
                        Value::Var(name) | Value::VarNum(name) => name.as_str(),
                        _ => "",
                    };
                    return Err(Error::new(
                        ErrorKind::NotFound,
                        None,
                        format!("Unable to resolve required variable {name}"),
                    ));
                }
                Ok(())
            }
        }
    }

    fn name_eval(&mut self, node: &Node) -> EngineResult<()> {
        let Some(Expr::Var(name)) = &node.arg1 else {
            return Ok(());
        };
        let resolved = self.resolver().node_name(name);
        match resolved {
            Some(terminal) => self.sink.write(&terminal),
            None => {
                if node.required {
                    return Err(Error::new(
                        ErrorKind::NotFound,
                        None,
                        format!("Unable to resolve required name {name}"),
                    ));
                }
                Ok(())
            }
        }
    }

    /// `lvar`: evaluates to a string, then compiles and renders that
    /// string as a nested template against the same dataset and function
    /// registry.
    fn lvar_eval(&mut self, node: &Node) -> EngineResult<()> {
        let value = self.ctx().eval(arg1(node)?)?;
        if value.is_numeric() {
            let n = self.ctx().as_num(&value);
            return self.sink.write(&n.to_string());
        }
        let source = self.ctx().as_string(&value);
        if let Some(source) = source {
            let sub = compile_fragment(&source, self.tag, self.functions, self.dataset)?;
            self.render_template(&sub)?;
        }
        Ok(())
    }

    /// `linclude`: like `lvar` with the string taken as a file path. A
    /// missing file is only an error for the required form.
    fn linclude_eval(&mut self, node: &Node) -> EngineResult<()> {
        let value = self.ctx().eval(arg1(node)?)?;
        if value.is_numeric() {
            let n = self.ctx().as_num(&value);
            return self.sink.write(&n.to_string());
        }
        let path = self.ctx().as_string(&value);
        if let Some(path) = path {
            match compile_file(&path, self.tag, self.functions, self.dataset) {
                Ok(sub) => self.render_template(&sub)?,
                Err(err) if !node.required && err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn render_template(&mut self, template: &Template) -> EngineResult<()> {
        let mut nested = Renderer {
            dataset: &mut *self.dataset,
            functions: self.functions,
            macros: &template.macros,
            sink: &mut *self.sink,
            locals: LocalStack::new(),
            tag: self.tag,
        };
        nested.render(&template.tree)
    }

    /// `each`: binds the variable to successive children of the resolved
    /// node. Anything but a variable-typed result is a no-op.
    fn each_eval(&mut self, tree: &Tree, node: &Node) -> EngineResult<()> {
        let Some(Expr::Var(bind_name)) = &node.arg1 else {
            return Err(Error::assert("each node carries no binding name"));
        };
        let value = self.ctx().eval(arg2(node)?)?;
        let Value::Var(path) = value else {
            return Ok(());
        };
        let Some(base) = self.resolver().node_path(&path) else {
            return Ok(());
        };
        let children = self.dataset.child_names(&base);
        self.locals.push(bind_name, BindingValue::Num(0));
        let mut result = Ok(());
        for child in children {
            self.locals
                .set_top(BindingValue::Node(format!("{base}.{child}")));
            result = self.render_node(tree, node.case_0);
            if result.is_err() {
                break;
            }
        }
        self.locals.pop();
        result
    }

    /// `with`: binds the variable once to the resolved node.
    fn with_eval(&mut self, tree: &Tree, node: &Node) -> EngineResult<()> {
        let Some(Expr::Var(bind_name)) = &node.arg1 else {
            return Err(Error::assert("with node carries no binding name"));
        };
        let value = self.ctx().eval(arg2(node)?)?;
        let Value::Var(path) = value else {
            return Ok(());
        };
        let Some(base) = self.resolver().node_path(&path) else {
            return Ok(());
        };
        self.locals.push(bind_name, BindingValue::Node(base));
        let result = self.render_node(tree, node.case_0);
        self.locals.pop();
        result
    }

    /// `loop`: iterates the variable over an arithmetic progression.
    /// A zero step or a step whose sign disagrees with the range yields
    /// zero iterations; otherwise the bounds are inclusive.
    fn loop_eval(&mut self, tree: &Tree, node: &Node) -> EngineResult<()> {
        let Some(Expr::Var(bind_name)) = &node.arg1 else {
            return Err(Error::assert("loop node carries no binding name"));
        };
        if node.vargs.is_empty() {
            return Err(Error::assert("loop node carries no arguments"));
        }
        let mut bounds = [0i64; 3];
        for (slot, expr) in bounds.iter_mut().zip(&node.vargs) {
            let ctx = self.ctx();
            let value = ctx.eval(expr)?;
            *slot = ctx.as_num(&value);
        }
        let (start, end, step) = match node.vargs.len() {
            1 => (0, bounds[0], 1),
            2 => (bounds[0], bounds[1], 1),
            _ => (bounds[0], bounds[1], bounds[2]),
        };
        let iterations = if step == 0 || (step < 0 && start < end) || (step > 0 && end < start) {
            0
        } else {
            (end.wrapping_sub(start)) / step + 1
        };
        if iterations == 0 {
            return Ok(());
        }

        self.locals.push(bind_name, BindingValue::Num(start));
        let mut result = Ok(());
        let mut var = start;
        for _ in 0..iterations {
            self.locals.set_top(BindingValue::Num(var));
            result = self.render_node(tree, node.case_0);
            if result.is_err() {
                break;
            }
            var = var.wrapping_add(step);
        }
        self.locals.pop();
        result
    }

    /// `call`: evaluates each argument in the caller's scope, then renders
    /// the macro body with a fresh frame that replaces the caller's
    /// locals. Variable arguments bind the resolved dataset subtree;
    /// value-typed locals copy in.
    fn call_eval(&mut self, tree: &Tree, node: &Node) -> EngineResult<()> {
        let Some(name) = &node.macro_name else {
            return Err(Error::assert("call node carries no macro name"));
        };
        let macros = self.macros;
        let Some(mac) = macros.get(name) else {
            return Err(Error::assert(format!("Undefined macro called: {name}")));
        };
        let body = tree.node(mac.node).case_0;

        let mut frame = Vec::with_capacity(mac.params.len());
        for (param, expr) in mac.params.iter().zip(&node.vargs) {
            let value = self.ctx().eval(expr)?;
            let bound = match value {
                Value::Str(s) => BindingValue::Str(s),
                Value::Num(n) => BindingValue::Num(n),
                Value::Var(path) | Value::VarNum(path) => match self.locals.lookup(&path) {
                    Some((binding, _)) if !matches!(binding.value, BindingValue::Node(_)) => {
                        binding.value.clone()
                    }
                    _ => BindingValue::Node(self.resolver().resolved_path(&path)),
                },
            };
            frame.push(Binding {
                name: param.clone(),
                value: bound,
            });
        }

        if frame.is_empty() {
            // a zero-argument call has no frame to swap in; the body sees
            // the caller's locals
            return self.render_node(tree, body);
        }
        let saved = self.locals.replace(frame);
        let result = self.render_node(tree, body);
        self.locals.restore(saved);
        result
    }

    /// `set`: writes the evaluated right side at the lvalue's terminal
    /// string, through the local-binding write rules.
    fn set_eval(&mut self, node: &Node) -> EngineResult<()> {
        let lval = self.ctx().eval(arg1(node)?)?;
        let rhs = self.ctx().eval(arg2(node)?)?;
        let target = match &lval {
            Value::Str(s) | Value::Var(s) | Value::VarNum(s) => s.clone(),
            // a purely numeric lvalue names nothing; nothing to write
            Value::Num(_) => return Ok(()),
        };
        let value = if rhs.is_numeric() {
            Some(self.ctx().as_num(&rhs).to_string())
        } else {
            self.ctx().as_string(&rhs)
        };
        if target.is_empty() {
            return Err(Error::assert(format!(
                "lvalue is empty in attempt to evaluate set to '{}'",
                value.unwrap_or_default()
            )));
        }
        set_through(&mut self.locals, self.dataset, &target, value)
    }

    /// `alt`: emits the value when truthy, otherwise renders the
    /// alternate branch.
    fn alt_eval(&mut self, tree: &Tree, node: &Node) -> EngineResult<()> {
        let value = self.ctx().eval(arg1(node)?)?;
        let truthy = self.ctx().as_bool(&value) != 0;
        if truthy {
            self.emit_value(&value, false)
        } else {
            self.render_node(tree, node.case_0)
        }
    }
}

fn arg1(node: &Node) -> EngineResult<&Expr> {
    node.arg1
        .as_ref()
        .ok_or_else(|| Error::assert("directive node carries no expression"))
}

fn arg2(node: &Node) -> EngineResult<&Expr> {
    node.arg2
        .as_ref()
        .ok_or_else(|| Error::assert("directive node carries no expression"))
}
