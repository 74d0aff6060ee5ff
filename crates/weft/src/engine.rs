use crate::{
    compile::{Compiler, Frame, Template, initial_stack},
    dataset::Dataset,
    dump::dump_tree,
    error::EngineResult,
    output::OutputSink,
    registry::{FunctionRegistry, NativeFunction, StringFunction},
    render::Renderer,
    scope::LocalStack,
};

/// Dataset key holding the directive tag identifier.
const TAG_CONFIG_KEY: &str = "Config.TagStart";

/// Default directive tag: directives look like `<?cs … ?>`.
const DEFAULT_TAG: &str = "cs";

/// The template engine.
///
/// An engine owns the compiled template, the macros it defines, and the
/// function registry. The dataset is borrowed per call: shared for
/// compilation (`evar` and `include` read it), exclusive for rendering
/// (`set` writes through it).
///
/// Functions must be registered before the templates that call them are
/// parsed, because function names are resolved at parse time.
///
/// ```
/// use weft::{CollectString, Dataset, Engine};
///
/// let mut data = Dataset::new();
/// data.set_value("name", "Ada")?;
/// let mut engine = Engine::new(&data);
/// engine.parse_string(&data, "Hi <?cs var:name ?>!")?;
/// let mut out = CollectString::new();
/// engine.render(&mut data, &mut out)?;
/// assert_eq!(out.output(), "Hi Ada!");
/// # Ok::<(), weft::Error>(())
/// ```
#[derive(Debug)]
pub struct Engine {
    tag: String,
    functions: FunctionRegistry,
    template: Template,
    stack: Vec<Frame>,
}

impl Engine {
    /// Creates an engine configured from the dataset: the directive tag is
    /// read once from `Config.TagStart` (default `cs`), and the built-in
    /// functions `len` and `name` are registered.
    #[must_use]
    pub fn new(dataset: &Dataset) -> Self {
        let tag = dataset
            .get_value(TAG_CONFIG_KEY)
            .unwrap_or(DEFAULT_TAG)
            .to_owned();
        let template = Template::new();
        let stack = initial_stack(&template.tree);
        Self {
            tag,
            functions: FunctionRegistry::with_builtins(),
            template,
            stack,
        }
    }

    /// Compiles template text, appending to the engine's tree. May be
    /// called repeatedly; each call continues where the previous one left
    /// off.
    pub fn parse_string(&mut self, dataset: &Dataset, src: &str) -> EngineResult<()> {
        self.compiler(dataset).parse_string(src)
    }

    /// Compiles a template file. Non-absolute paths resolve through the
    /// dataset search path (`hdf.loadpaths`).
    pub fn parse_file(&mut self, dataset: &Dataset, path: &str) -> EngineResult<()> {
        self.compiler(dataset).parse_file(path)
    }

    fn compiler<'a>(&'a mut self, dataset: &'a Dataset) -> Compiler<'a> {
        Compiler {
            template: &mut self.template,
            stack: &mut self.stack,
            functions: &self.functions,
            dataset,
            tag: &self.tag,
            context: None,
            in_file: false,
        }
    }

    /// Renders the compiled template against the dataset, emitting
    /// fragments to the sink in render order.
    pub fn render(&self, dataset: &mut Dataset, sink: &mut dyn OutputSink) -> EngineResult<()> {
        let mut renderer = Renderer {
            dataset,
            functions: &self.functions,
            macros: &self.template.macros,
            sink,
            locals: LocalStack::new(),
            tag: &self.tag,
        };
        renderer.render(&self.template.tree)
    }

    /// Registers a callable function. `arity` must currently be 1.
    /// Registering a name twice is a `Duplicate` error.
    pub fn register_function(&mut self, name: &str, arity: usize, function: NativeFunction) -> EngineResult<()> {
        self.functions.register(name, arity, function)
    }

    /// Registers a pure string-to-string transform as a function. Numeric
    /// arguments pass through the transform untouched.
    pub fn register_strfunc(&mut self, name: &str, function: StringFunction) -> EngineResult<()> {
        self.functions.register_str(name, function)
    }

    /// Writes a plain-text dump of the parse tree, for debugging.
    pub fn dump(&self, sink: &mut dyn OutputSink) -> EngineResult<()> {
        dump_tree(&self.template.tree, sink)
    }
}
