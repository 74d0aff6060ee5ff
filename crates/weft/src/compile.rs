use std::fs;

use crate::{
    dataset::Dataset,
    directive::{COMMANDS, Directive, ParseState, directive_name},
    error::{EngineResult, Error, ErrorKind},
    expr::{Expr, parse_expr},
    node::{Node, NodeId, Slot, Tree},
    registry::{FunctionRegistry, Macro, MacroRegistry},
    token::SEPARATORS,
};

/// One parse-state stack frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    pub state: ParseState,
    /// The tree node this frame's directive opened.
    pub tree: NodeId,
    /// Continuation node used by `elseif` so `/if` resolves to the
    /// outermost `if` of the chain.
    pub next_tree: Option<NodeId>,
    /// Source offset just past the opening directive, for diagnostics.
    pub location: usize,
}

/// A compiled template: the syntax-tree arena and the macros defined in it.
#[derive(Debug)]
pub(crate) struct Template {
    pub tree: Tree,
    pub macros: MacroRegistry,
}

impl Template {
    pub fn new() -> Self {
        Self {
            tree: Tree::new(),
            macros: MacroRegistry::new(),
        }
    }
}

/// The initial parse stack: a GLOBAL frame that is never popped.
pub(crate) fn initial_stack(tree: &Tree) -> Vec<Frame> {
    vec![Frame {
        state: ParseState::Global,
        tree: tree.root(),
        next_tree: None,
        location: 0,
    }]
}

/// The template scanner. Borrows the template under construction; the
/// insertion cursor lives on the tree so repeated `parse_string` calls
/// keep appending where the previous call left off.
pub(crate) struct Compiler<'a> {
    pub template: &'a mut Template,
    pub stack: &'a mut Vec<Frame>,
    pub functions: &'a FunctionRegistry,
    pub dataset: &'a Dataset,
    pub tag: &'a str,
    /// Name used in error contexts: the file path or the evar name.
    pub context: Option<String>,
    pub in_file: bool,
}

/// Compiles a string fragment into a fresh template, for render-time
/// re-entry (`lvar`).
pub(crate) fn compile_fragment(
    src: &str,
    tag: &str,
    functions: &FunctionRegistry,
    dataset: &Dataset,
) -> EngineResult<Template> {
    let mut template = Template::new();
    let mut stack = initial_stack(&template.tree);
    Compiler {
        template: &mut template,
        stack: &mut stack,
        functions,
        dataset,
        tag,
        context: None,
        in_file: false,
    }
    .parse_string(src)?;
    Ok(template)
}

/// Compiles a file into a fresh template, for render-time re-entry
/// (`linclude`).
pub(crate) fn compile_file(
    path: &str,
    tag: &str,
    functions: &FunctionRegistry,
    dataset: &Dataset,
) -> EngineResult<Template> {
    let mut template = Template::new();
    let mut stack = initial_stack(&template.tree);
    Compiler {
        template: &mut template,
        stack: &mut stack,
        functions,
        dataset,
        tag,
        context: None,
        in_file: false,
    }
    .parse_file(path)?;
    Ok(template)
}

impl Compiler<'_> {
    /// Source-location context for diagnostics: `[file:42]`, `[name:~3]`,
    /// or `[lineno:~3]`.
    fn ctx(&self, src: &str, offset: usize) -> String {
        let upto = offset.min(src.len());
        let line = src.as_bytes()[..upto].iter().filter(|&&b| b == b'\n').count() + 1;
        match (&self.context, self.in_file) {
            (Some(name), true) => format!("[{name}:{line}]"),
            (Some(name), false) => format!("[{name}:~{line}]"),
            (None, _) => format!("[lineno:~{line}]"),
        }
    }

    /// Finds the next `<?tag` opener followed by whitespace, matching the
    /// tag case-insensitively.
    fn find_open_delim(&self, src: &str, mut from: usize) -> Option<usize> {
        let bytes = src.as_bytes();
        let taglen = self.tag.len();
        while let Some(pos) = src[from..].find('<').map(|found| found + from) {
            let ws_index = pos + 2 + taglen;
            if bytes.get(pos + 1) == Some(&b'?')
                && ws_index < bytes.len()
                && bytes[pos + 2..ws_index].eq_ignore_ascii_case(self.tag.as_bytes())
                && matches!(bytes[ws_index], b' ' | b'\n' | b'\t' | b'\r')
            {
                return Some(pos);
            }
            from = pos + 1;
        }
        None
    }

    /// Scans `src`, appending to the template. May be invoked repeatedly;
    /// every call must leave the parse stack at the depth it found it, or
    /// an unterminated construct is reported.
    pub fn parse_string(&mut self, src: &str) -> EngineResult<()> {
        let initial_depth = self.stack.len();
        let mut offset = 0usize;
        loop {
            let Some(start) = self.find_open_delim(src, offset) else {
                self.literal(&src[offset..]);
                break;
            };
            self.literal(&src[offset..start]);

            let mut body_start = start + 3 + self.tag.len();
            while body_start < src.len() && src.as_bytes()[body_start].is_ascii_whitespace() {
                body_start += 1;
            }
            let Some(close) = src[body_start..].find("?>").map(|found| found + body_start) else {
                return Err(Error::parse(
                    self.ctx(src, start),
                    format!("Missing end ?> at {}", &src[start..]),
                ));
            };
            let body = &src[body_start..close];
            if body.contains("<?") {
                return Err(Error::parse(
                    self.ctx(src, start),
                    format!("Missing end ?> at {body}"),
                ));
            }
            offset = close + 2;
            if body.starts_with('#') {
                continue;
            }
            self.directive(body, src, offset)?;
        }

        if self.stack.len() > initial_depth {
            let frame = self.stack.pop().expect("stack depth checked above");
            return Err(Error::parse(
                self.ctx(src, frame.location),
                format!("Non-terminated {} clause", frame.state),
            ));
        }
        Ok(())
    }

    /// Matches a directive body against the table and runs its handler
    /// plus the next-state policy.
    fn directive(&mut self, body: &str, src: &str, offset: usize) -> EngineResult<()> {
        for command in &COMMANDS[1..] {
            let n = command.name.len();
            if body.len() < n || !body.as_bytes()[..n].eq_ignore_ascii_case(command.name.as_bytes()) {
                continue;
            }
            let follow = body.as_bytes().get(n).copied();
            let arg_intro = command.has_arg && matches!(follow, Some(b':' | b'!'));
            let plain = matches!(follow, None | Some(b' ' | b'\r' | b'\n'));
            if !arg_intro && !plain {
                continue;
            }

            let state = self.stack.last().expect("global frame is never popped").state;
            if command.allowed & state.bit() == 0 {
                return Err(Error::parse(
                    self.ctx(src, offset),
                    format!("Command {} not allowed in {state}", command.name),
                ));
            }
            let arg = &body[n..];
            let ctx = self.ctx(src, offset);
            self.dispatch(command.directive, arg, &ctx)?;
            if command.pop {
                let frame = self.stack.pop().expect("allowed-state mask protects the global frame");
                self.template.tree.current = frame.next_tree.unwrap_or(frame.tree);
            }
            if let Some(push) = command.push {
                let current = self.template.tree.current;
                self.stack.push(Frame {
                    state: push,
                    tree: current,
                    next_tree: None,
                    location: offset,
                });
            }
            return Ok(());
        }
        Err(Error::parse(
            self.ctx(src, offset),
            format!("Unknown command {body}"),
        ))
    }

    fn dispatch(&mut self, directive: Directive, arg: &str, ctx: &str) -> EngineResult<()> {
        match directive {
            Directive::Literal => unreachable!("literal is not matchable from source"),
            Directive::Name => self.name_parse(arg, ctx),
            Directive::Var => self.expr_directive(Directive::Var, arg, ctx),
            Directive::Evar => self.evar_parse(arg, ctx),
            Directive::Lvar => self.expr_directive(Directive::Lvar, arg, ctx),
            Directive::If => self.if_parse(arg, ctx),
            Directive::Else => self.else_parse(),
            Directive::Elif => self.elif_parse(arg, ctx),
            Directive::EndIf => self.endif_parse(),
            Directive::Each => self.each_with_parse(Directive::Each, arg, ctx),
            Directive::With => self.each_with_parse(Directive::With, arg, ctx),
            Directive::Include => self.include_parse(arg, ctx),
            Directive::Linclude => self.expr_directive(Directive::Linclude, arg, ctx),
            Directive::Def => self.def_parse(arg, ctx),
            Directive::Call => self.call_parse(arg, ctx),
            Directive::Set => self.set_parse(arg, ctx),
            Directive::Loop => self.loop_parse(arg, ctx),
            Directive::Alt => self.alt_parse(arg, ctx),
            Directive::EndEach
            | Directive::EndWith
            | Directive::EndDef
            | Directive::EndLoop
            | Directive::EndAlt => self.end_parse(),
        }
    }

    fn literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut node = Node::new(Directive::Literal);
        node.arg1 = Some(Expr::Str(text.to_owned()));
        self.template.tree.append(node, Slot::Next);
    }

    fn name_parse(&mut self, arg: &str, ctx: &str) -> EngineResult<()> {
        let (required, rest) = flag_and_rest(arg);
        let name = rest.trim();
        validate_var_name(name, ctx)?;
        let mut node = Node::new(Directive::Name);
        node.required = required;
        node.arg1 = Some(Expr::Var(name.to_owned()));
        self.template.tree.append(node, Slot::Next);
        Ok(())
    }

    /// Shared parse for `var`, `lvar`, and `linclude`: a required flag and
    /// one expression argument.
    fn expr_directive(&mut self, directive: Directive, arg: &str, ctx: &str) -> EngineResult<()> {
        let (required, rest) = flag_and_rest(arg);
        let expr = parse_expr(rest, false, self.functions, ctx)?;
        let mut node = Node::new(directive);
        node.required = required;
        node.arg1 = Some(expr);
        self.template.tree.append(node, Slot::Next);
        Ok(())
    }

    fn alt_parse(&mut self, arg: &str, ctx: &str) -> EngineResult<()> {
        let (required, rest) = flag_and_rest(arg);
        let expr = parse_expr(rest, false, self.functions, ctx)?;
        let mut node = Node::new(Directive::Alt);
        node.required = required;
        node.arg1 = Some(expr);
        self.template.tree.append(node, Slot::Case0);
        Ok(())
    }

    /// `evar` embeds the dataset value at compile time: the value text is
    /// scanned as if it appeared in place of the directive.
    fn evar_parse(&mut self, arg: &str, ctx: &str) -> EngineResult<()> {
        let (required, rest) = flag_and_rest(arg);
        let name = rest.trim();
        validate_var_name(name, ctx)?;
        let value = self.dataset.get_value(name).map(str::to_owned);
        if required && value.is_none() {
            return Err(Error::not_found(
                ctx,
                format!("Unable to evar empty variable {name}"),
            ));
        }
        let mut node = Node::new(Directive::Evar);
        node.required = required;
        node.arg1 = Some(Expr::Var(name.to_owned()));
        self.template.tree.append(node, Slot::Next);

        if let Some(value) = value {
            let saved_context = self.context.replace(name.to_owned());
            let saved_in_file = std::mem::replace(&mut self.in_file, false);
            let result = self.parse_string(&value);
            self.context = saved_context;
            self.in_file = saved_in_file;
            result?;
        }
        Ok(())
    }

    fn if_parse(&mut self, arg: &str, ctx: &str) -> EngineResult<()> {
        let (_, rest) = flag_and_rest(arg);
        let expr = parse_expr(rest, false, self.functions, ctx)?;
        let mut node = Node::new(Directive::If);
        node.arg1 = Some(expr);
        self.template.tree.append(node, Slot::Case0);
        Ok(())
    }

    /// `elseif` splices a fresh `if` node into the open if's false branch
    /// and rethreads the frame so `/if` still resolves to the outermost.
    fn elif_parse(&mut self, arg: &str, ctx: &str) -> EngineResult<()> {
        let top = self.stack.last_mut().expect("elif only legal inside if");
        if top.next_tree.is_none() {
            top.next_tree = Some(top.tree);
        }
        let anchor = top.tree;
        self.template.tree.slot = Slot::Case1(anchor);
        self.if_parse(arg, ctx)?;
        let current = self.template.tree.current;
        self.stack.last_mut().expect("elif only legal inside if").tree = current;
        Ok(())
    }

    fn else_parse(&mut self) -> EngineResult<()> {
        let top = self.stack.last().expect("else only legal inside if");
        let anchor = top.tree;
        self.template.tree.slot = Slot::Case1(anchor);
        self.template.tree.current = anchor;
        Ok(())
    }

    fn endif_parse(&mut self) -> EngineResult<()> {
        let top = self.stack.last().expect("/if only legal inside if/else");
        let resume = top.next_tree.unwrap_or(top.tree);
        self.template.tree.slot = Slot::Next(resume);
        self.template.tree.current = top.tree;
        Ok(())
    }

    /// Closer for `each`, `with`, `def`, `loop`, and `alt`: the opener's
    /// `next` link becomes the insertion point again.
    fn end_parse(&mut self) -> EngineResult<()> {
        let top = self.stack.last().expect("closers are only legal inside their construct");
        self.template.tree.slot = Slot::Next(top.tree);
        self.template.tree.current = top.tree;
        Ok(())
    }

    fn each_with_parse(&mut self, directive: Directive, arg: &str, ctx: &str) -> EngineResult<()> {
        let (required, rest) = flag_and_rest(arg);
        let spec = rest.trim();
        let bad = || {
            Error::parse(
                ctx,
                format!(
                    "Improperly formatted {} directive: {spec}",
                    directive_name(directive)
                ),
            )
        };
        let (var, expr_src) = split_binding(spec).ok_or_else(bad)?;
        if expr_src.is_empty() {
            return Err(bad());
        }
        let expr = parse_expr(expr_src, false, self.functions, ctx)?;
        let mut node = Node::new(directive);
        node.required = required;
        node.arg1 = Some(Expr::Var(var.to_owned()));
        node.arg2 = Some(expr);
        self.template.tree.append(node, Slot::Case0);
        Ok(())
    }

    /// `include` resolves and scans the target file at compile time. A
    /// bare-identifier argument names a dataset variable holding the path;
    /// its absence is always an error, while a missing file is only an
    /// error for the `!` form.
    fn include_parse(&mut self, arg: &str, ctx: &str) -> EngineResult<()> {
        let (required, rest) = flag_and_rest(arg);
        let mut target = rest.trim();
        if let Some(c) = target.bytes().find(|b| b"# <>".contains(b)) {
            return Err(Error::parse(
                ctx,
                format!(
                    "Invalid character in include argument {target}: {}",
                    c as char
                ),
            ));
        }
        let mut node = Node::new(Directive::Include);
        node.required = required;
        let path: String;
        if let Some(stripped) = target.strip_prefix('"') {
            target = stripped.strip_suffix('"').unwrap_or(stripped);
            path = target.to_owned();
            node.arg1 = Some(Expr::Str(target.to_owned()));
        } else {
            let Some(value) = self.dataset.get_value(target) else {
                return Err(Error::not_found(
                    ctx,
                    format!("Unable to include empty variable {target}"),
                ));
            };
            path = value.to_owned();
            node.arg1 = Some(Expr::Var(target.to_owned()));
        }
        self.template.tree.append(node, Slot::Next);

        match self.parse_file(&path) {
            Err(err) if !required && err.kind() == ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }

    /// Resolves `path` (through the dataset search path unless absolute),
    /// reads it, and scans the contents.
    pub fn parse_file(&mut self, path: &str) -> EngineResult<()> {
        let resolved = if path.starts_with('/') {
            std::path::PathBuf::from(path)
        } else {
            self.dataset.search_path(path)?
        };
        let contents = match fs::read_to_string(&resolved) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::new(
                    ErrorKind::NotFound,
                    None,
                    format!("Unable to open file {path}"),
                ));
            }
            Err(err) => return Err(Error::system(format!("Unable to read file {path}: {err}"))),
        };
        let saved_context = self.context.replace(resolved.display().to_string());
        let saved_in_file = std::mem::replace(&mut self.in_file, true);
        let result = self.parse_string(&contents);
        self.context = saved_context;
        self.in_file = saved_in_file;
        result
    }

    fn def_parse(&mut self, arg: &str, ctx: &str) -> EngineResult<()> {
        let (_, rest) = flag_and_rest(arg);
        let rest = rest.trim_start();
        let name_end = rest
            .bytes()
            .position(|b| b == b' ' || b == b'#' || b == b'(')
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        let after_name = rest[name_end..].trim_start();
        let Some(params_src) = after_name.strip_prefix('(') else {
            return Err(Error::parse(
                ctx,
                format!("Missing left paren in macro def {rest}"),
            ));
        };
        if self.template.macros.contains(name) {
            return Err(Error::parse(ctx, format!("Duplicate macro def for {rest}")));
        }

        let mut params = Vec::new();
        let mut s = params_src;
        loop {
            s = s.trim_start();
            let Some(pos) = s.find([',', ')']) else {
                return Err(Error::parse(
                    ctx,
                    format!("Missing right paren in def {rest}"),
                ));
            };
            let last = s.as_bytes()[pos] == b')';
            let word = s[..pos].split_whitespace().next().unwrap_or("");
            if let Some(c) = word.bytes().find(|b| SEPARATORS.contains(b)) {
                return Err(Error::parse(
                    ctx,
                    format!("Invalid character in def {rest} argument: {}", c as char),
                ));
            }
            if word.is_empty() {
                if params.is_empty() && last {
                    break;
                }
                return Err(Error::parse(
                    ctx,
                    format!("Missing argument name or extra comma in def {rest}"),
                ));
            }
            params.push(word.to_owned());
            if last {
                break;
            }
            s = &s[pos + 1..];
        }

        let node = Node::new(Directive::Def);
        let id = self.template.tree.append(node, Slot::Case0);
        self.template
            .macros
            .insert(name.to_owned(), Macro { params, node: id });
        Ok(())
    }

    fn call_parse(&mut self, arg: &str, ctx: &str) -> EngineResult<()> {
        let (_, rest) = flag_and_rest(arg);
        let rest = rest.trim_start();
        let name_end = rest
            .bytes()
            .position(|b| b == b' ' || b == b'#' || b == b'(')
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        let after_name = rest[name_end..].trim_start();
        let Some(args_src) = after_name.strip_prefix('(') else {
            return Err(Error::parse(ctx, format!("Missing left paren in call {rest}")));
        };
        let Some(arity) = self.template.macros.get(name).map(|mac| mac.params.len()) else {
            return Err(Error::parse(ctx, format!("Undefined macro called: {rest}")));
        };
        let Some(close) = args_src.rfind(')') else {
            return Err(Error::parse(ctx, format!("Missing right paren in call {rest}")));
        };
        let inner = &args_src[..close];

        let mut vargs = Vec::new();
        if !inner.trim().is_empty() {
            for part in split_call_args(inner) {
                vargs.push(parse_expr(part, false, self.functions, ctx)?);
            }
        }
        if vargs.len() != arity {
            return Err(Error::parse(
                ctx,
                format!(
                    "Incorrect number of arguments, expected {arity}, got {} in call to macro {name}: {rest}",
                    vargs.len()
                ),
            ));
        }

        let mut node = Node::new(Directive::Call);
        node.macro_name = Some(name.to_owned());
        node.vargs = vargs;
        self.template.tree.append(node, Slot::Next);
        Ok(())
    }

    fn set_parse(&mut self, arg: &str, ctx: &str) -> EngineResult<()> {
        let (_, rest) = flag_and_rest(arg);
        let Some((lhs, rhs)) = rest.split_once('=') else {
            return Err(Error::parse(ctx, format!("Missing equals in set {rest}")));
        };
        let mut node = Node::new(Directive::Set);
        node.arg1 = Some(parse_expr(lhs, true, self.functions, ctx)?);
        node.arg2 = Some(parse_expr(rhs, false, self.functions, ctx)?);
        self.template.tree.append(node, Slot::Next);
        Ok(())
    }

    fn loop_parse(&mut self, arg: &str, ctx: &str) -> EngineResult<()> {
        let (required, rest) = flag_and_rest(arg);
        let spec = rest.trim();
        let bad = || Error::parse(ctx, format!("Improperly formatted loop directive: {spec}"));
        let (var, args_src) = split_binding(spec).ok_or_else(bad)?;
        if args_src.is_empty() {
            return Err(bad());
        }

        let mut vargs = Vec::new();
        for part in args_src.split(',') {
            vargs.push(parse_expr(part, false, self.functions, ctx)?);
        }
        if vargs.is_empty() || vargs.len() > 3 {
            return Err(Error::parse(
                ctx,
                format!(
                    "Incorrect number of arguments, expected 1, 2, or 3 got {} in loop: {spec}",
                    vargs.len()
                ),
            ));
        }

        let mut node = Node::new(Directive::Loop);
        node.required = required;
        node.arg1 = Some(Expr::Var(var.to_owned()));
        node.vargs = vargs;
        self.template.tree.append(node, Slot::Case0);
        Ok(())
    }
}

/// Splits a `!`/`:` argument introducer off the directive argument,
/// reporting whether it was the required form.
fn flag_and_rest(arg: &str) -> (bool, &str) {
    match arg.as_bytes().first() {
        Some(b'!') => (true, &arg[1..]),
        Some(_) => (false, &arg[1..]),
        None => (false, ""),
    }
}

/// Splits a `var = expr` binding spec into the variable name and the
/// expression source. The name ends at the first whitespace or `=`.
fn split_binding(spec: &str) -> Option<(&str, &str)> {
    let end = spec.find(|c: char| c.is_whitespace() || c == '=')?;
    let var = &spec[..end];
    let rest = &spec[end..];
    let eq = rest.find('=')?;
    Some((var, rest[eq + 1..].trim_start()))
}

/// Splits call arguments on top-level commas; double-quoted spans shield
/// the commas inside them.
fn split_call_args(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, b) in inner.bytes().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);
    parts
}

/// Variable-name arguments (`name`, `evar`) reject expression syntax.
fn validate_var_name(name: &str, ctx: &str) -> EngineResult<()> {
    if let Some(c) = name.bytes().find(|b| b"#\" <>".contains(b)) {
        return Err(Error::parse(
            ctx,
            format!("Invalid character in var name {name}: {}", c as char),
        ));
    }
    Ok(())
}
