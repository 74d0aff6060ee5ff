use strum::Display;

/// Parse states driven by the composite directives.
///
/// The scanner keeps a stack of these; a directive is only legal inside
/// the states its table entry allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub(crate) enum ParseState {
    Global,
    If,
    Else,
    Each,
    With,
    Def,
    Loop,
    Alt,
}

impl ParseState {
    pub(crate) const fn bit(self) -> u16 {
        match self {
            Self::Global => 1 << 0,
            Self::If => 1 << 1,
            Self::Else => 1 << 2,
            Self::Each => 1 << 3,
            Self::With => 1 << 4,
            Self::Def => 1 << 5,
            Self::Loop => 1 << 6,
            Self::Alt => 1 << 7,
        }
    }
}

/// Union of every non-terminal state; directives legal anywhere use this.
pub(crate) const ANYWHERE: u16 = ParseState::Global.bit()
    | ParseState::If.bit()
    | ParseState::Else.bit()
    | ParseState::Each.bit()
    | ParseState::With.bit()
    | ParseState::Def.bit()
    | ParseState::Loop.bit()
    | ParseState::Alt.bit();

/// Directive codes carried by syntax-tree nodes and dispatched on by the
/// compiler and the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Directive {
    Literal,
    Name,
    Var,
    Evar,
    Lvar,
    If,
    Else,
    Elif,
    EndIf,
    Each,
    EndEach,
    With,
    EndWith,
    Include,
    Linclude,
    Def,
    EndDef,
    Call,
    Set,
    Loop,
    EndLoop,
    Alt,
    EndAlt,
}

/// One directive-table entry.
pub(crate) struct Command {
    /// Directive name, matched as a case-insensitive prefix.
    pub name: &'static str,
    pub directive: Directive,
    /// Bitmask of states this directive may appear in.
    pub allowed: u16,
    /// Whether the scanner pops a parse-stack frame after the handler.
    pub pop: bool,
    /// State pushed (with a fresh frame) after the handler, if any.
    pub push: Option<ParseState>,
    /// Whether the directive takes an argument introduced by `:` or `!`.
    pub has_arg: bool,
}

/// The directive table. Entry 0 is the literal pseudo-directive the
/// scanner uses for text runs; it is not matchable from template source.
pub(crate) const COMMANDS: &[Command] = &[
    cmd("literal", Directive::Literal, ANYWHERE, false, None, false),
    cmd("name", Directive::Name, ANYWHERE, false, None, true),
    cmd("var", Directive::Var, ANYWHERE, false, None, true),
    cmd("evar", Directive::Evar, ANYWHERE, false, None, true),
    cmd("lvar", Directive::Lvar, ANYWHERE, false, None, true),
    cmd("if", Directive::If, ANYWHERE, false, Some(ParseState::If), true),
    cmd("else", Directive::Else, ParseState::If.bit(), true, Some(ParseState::Else), false),
    cmd("elseif", Directive::Elif, ParseState::If.bit(), false, None, true),
    cmd("elif", Directive::Elif, ParseState::If.bit(), false, None, true),
    cmd(
        "/if",
        Directive::EndIf,
        ParseState::If.bit() | ParseState::Else.bit(),
        true,
        None,
        false,
    ),
    cmd("each", Directive::Each, ANYWHERE, false, Some(ParseState::Each), true),
    cmd("/each", Directive::EndEach, ParseState::Each.bit(), true, None, false),
    cmd("with", Directive::With, ANYWHERE, false, Some(ParseState::With), true),
    cmd("/with", Directive::EndWith, ParseState::With.bit(), true, None, false),
    cmd("include", Directive::Include, ANYWHERE, false, None, true),
    cmd("linclude", Directive::Linclude, ANYWHERE, false, None, true),
    cmd("def", Directive::Def, ANYWHERE, false, Some(ParseState::Def), true),
    cmd("/def", Directive::EndDef, ParseState::Def.bit(), true, None, false),
    cmd("call", Directive::Call, ANYWHERE, false, None, true),
    cmd("set", Directive::Set, ANYWHERE, false, None, true),
    cmd("loop", Directive::Loop, ANYWHERE, false, Some(ParseState::Loop), true),
    cmd("/loop", Directive::EndLoop, ParseState::Loop.bit(), true, None, true),
    cmd("alt", Directive::Alt, ANYWHERE, false, Some(ParseState::Alt), true),
    cmd("/alt", Directive::EndAlt, ParseState::Alt.bit(), true, None, true),
];

const fn cmd(
    name: &'static str,
    directive: Directive,
    allowed: u16,
    pop: bool,
    push: Option<ParseState>,
    has_arg: bool,
) -> Command {
    Command {
        name,
        directive,
        allowed,
        pop,
        push,
        has_arg,
    }
}

/// Name of the table entry for a directive code (first match wins, so
/// `Elif` reports as `elseif`).
pub(crate) fn directive_name(directive: Directive) -> &'static str {
    COMMANDS
        .iter()
        .find(|command| command.directive == directive)
        .map_or("?", |command| command.name)
}
