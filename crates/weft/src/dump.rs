use crate::{
    directive::{Directive, directive_name},
    error::EngineResult,
    node::{NodeId, Tree},
    output::OutputSink,
};

/// Writes a human-readable tree dump: one line per node with its
/// directive and re-displayed arguments, branches indented under
/// `Case 0` / `Case 1` markers.
pub(crate) fn dump_tree(tree: &Tree, sink: &mut dyn OutputSink) -> EngineResult<()> {
    dump_node(tree, Some(tree.root()), 0, sink)
}

fn dump_node(tree: &Tree, start: Option<NodeId>, depth: usize, sink: &mut dyn OutputSink) -> EngineResult<()> {
    let mut cursor = start;
    while let Some(id) = cursor {
        let node = tree.node(id);
        sink.write(&format!(
            "{:depth$} {} ",
            "",
            directive_name(node.directive)
        ))?;
        if node.directive != Directive::Literal {
            if let Some(name) = &node.macro_name {
                sink.write(&format!("{name} "))?;
            } else if let Some(arg1) = &node.arg1 {
                sink.write(&format!("{arg1} "))?;
            }
            if let Some(arg2) = &node.arg2 {
                sink.write(&format!("{arg2}"))?;
            }
            for varg in &node.vargs {
                sink.write(&format!("{varg} "))?;
            }
        }
        sink.write("\n")?;
        if node.case_0.is_some() {
            sink.write(&format!("{:depth$} Case 0\n", ""))?;
            dump_node(tree, node.case_0, depth + 1, sink)?;
        }
        if node.case_1.is_some() {
            sink.write(&format!("{:depth$} Case 1\n", ""))?;
            dump_node(tree, node.case_1, depth + 1, sink)?;
        }
        cursor = node.next;
    }
    Ok(())
}
