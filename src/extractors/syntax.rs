//! Syntax-tree extractor - structural matching of builder calls

use super::{is_builder_name, ExtractionError, SourceFile, Strategy, TopologyExtractor};
use crate::graph::{Graph, GraphError, NodeKind};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};
use tree_sitter::{Node, Parser, Tree};

/// Upper bound on routers synthesized from one counted loop
const MAX_LOOP_ROUTERS: i64 = 4096;

/// Parse Python source, `None` if the grammar cannot be loaded
pub(crate) fn parse_python(text: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .ok()?;
    parser.parse(text, None)
}

pub(crate) fn node_text<'a>(node: Node, src: &'a str) -> &'a str {
    node.utf8_text(src.as_bytes()).unwrap_or("")
}

/// Named children without comments
pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .collect()
}

/// Value of a plain string literal, `None` for f-strings with placeholders
fn string_literal(node: Node, src: &str) -> Option<String> {
    if node.kind() != "string" || named_children(node).iter().any(|c| c.kind() == "interpolation") {
        return None;
    }
    Some(strip_quotes(node_text(node, src)).to_string())
}

fn strip_quotes(raw: &str) -> &str {
    let body = raw.trim_start_matches(|c: char| "rRbBuUfF".contains(c));
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= 2 * quote.len() && body.starts_with(quote) && body.ends_with(quote) {
            return &body[quote.len()..body.len() - quote.len()];
        }
    }
    body
}

/// Structural extractor over the tree-sitter Python grammar
///
/// Recognizes the same idioms as [`super::TextExtractor`], but on call
/// expressions, so formatting and comments do not matter. Links are tied to
/// the switch their receiver variable is bound to, or failing that to the
/// most recently created switch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntaxExtractor;

impl SyntaxExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a graph; `None` for unparseable text or no builder function
    pub fn extract_source(&self, text: &str) -> Option<Graph> {
        self.try_extract(text).ok()
    }

    fn try_extract(&self, text: &str) -> Result<Graph, ExtractionError> {
        let tree = parse_python(text).ok_or(ExtractionError::Unparseable)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(ExtractionError::Unparseable);
        }
        let builder = find_builder(root, text).ok_or(ExtractionError::NoBuilderFunction)?;

        let mut walk = Walk::new(text);
        if let Some(body) = builder.child_by_field_name("body") {
            walk.visit(body);
        }
        let graph = walk.into_graph()?;
        debug!(
            routers = graph.router_count(),
            switches = graph.switch_count(),
            links = graph.links().len(),
            "Syntax extraction finished"
        );
        Ok(graph)
    }
}

impl TopologyExtractor for SyntaxExtractor {
    fn strategy(&self) -> Strategy {
        Strategy::Syntax
    }

    fn extract(&self, source: &SourceFile) -> Result<Graph, ExtractionError> {
        self.try_extract(&source.text)
    }
}

fn find_builder<'t>(node: Node<'t>, src: &str) -> Option<Node<'t>> {
    if node.kind() == "function_definition" {
        let named = node
            .child_by_field_name("name")
            .map(|n| is_builder_name(node_text(n, src)))
            .unwrap_or(false);
        if named {
            return Some(node);
        }
    }
    named_children(node)
        .into_iter()
        .find_map(|child| find_builder(child, src))
}

struct Walk<'s> {
    src: &'s str,
    routers: BTreeSet<String>,
    switches: BTreeSet<String>,
    /// Variable name to the node it was assigned from
    bindings: HashMap<String, String>,
    /// Call node id to the node that call created
    created: HashMap<usize, String>,
    current_switch: Option<String>,
    links: Vec<(String, String)>,
}

impl<'s> Walk<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            routers: BTreeSet::new(),
            switches: BTreeSet::new(),
            bindings: HashMap::new(),
            created: HashMap::new(),
            current_switch: None,
            links: Vec::new(),
        }
    }

    fn visit(&mut self, node: Node) {
        match node.kind() {
            "comment" => return,
            "call" => self.visit_call(node),
            "for_statement" => self.visit_loop(node),
            _ => {}
        }
        for child in named_children(node) {
            self.visit(child);
        }
        if node.kind() == "assignment" {
            self.bind(node);
        }
    }

    fn bind(&mut self, assignment: Node) {
        let (Some(left), Some(right)) = (
            assignment.child_by_field_name("left"),
            assignment.child_by_field_name("right"),
        ) else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        let name = node_text(left, self.src).to_string();
        match self.created.get(&right.id()).cloned() {
            Some(node) => {
                self.bindings.insert(name, node);
            }
            None => {
                // rebinding to something unknown hides the old node
                self.bindings.remove(&name);
            }
        }
    }

    fn visit_call(&mut self, call: Node) {
        let Some((method, receiver)) = method_call(call, self.src) else {
            return;
        };
        let (positional, keywords) = call_arguments(call, self.src);

        match method {
            "add_router" => {
                let arg = positional.first().copied().or_else(|| keywords.get("name").copied());
                if let Some(name) = arg.and_then(|a| string_literal(a, self.src)) {
                    self.routers.insert(name.clone());
                    self.created.insert(call.id(), name);
                }
            }
            "add_switch" => {
                let arg = positional.first().copied().or_else(|| keywords.get("name").copied());
                if let Some(name) = arg.and_then(|a| string_literal(a, self.src)) {
                    self.switches.insert(name.clone());
                    self.current_switch = Some(name.clone());
                    self.created.insert(call.id(), name);
                }
            }
            "add_link" => self.record_link(receiver, &positional),
            _ => {}
        }
    }

    fn record_link(&mut self, receiver: Node, positional: &[Node]) {
        let peers: Vec<Option<String>> = positional.iter().take(2).map(|a| self.resolve(*a)).collect();
        let link = match (self.resolve(receiver), peers.as_slice()) {
            (Some(owner), [Some(peer), ..]) => Some((owner, peer.clone())),
            (None, [Some(a), Some(b)]) => Some((a.clone(), b.clone())),
            (None, [Some(peer), ..]) => self
                .current_switch
                .clone()
                .map(|switch| (switch, peer.clone())),
            _ => None,
        };
        match link {
            Some(link) => self.links.push(link),
            None => trace!(
                call = node_text(receiver, self.src),
                "Dropping link without resolvable endpoints"
            ),
        }
    }

    /// Node name an expression refers to: `gears["r1"]` or a bound variable
    fn resolve(&self, expr: Node) -> Option<String> {
        match expr.kind() {
            "subscript" => expr
                .child_by_field_name("subscript")
                .and_then(|key| string_literal(key, self.src)),
            "identifier" => self.bindings.get(node_text(expr, self.src)).cloned(),
            "call" => self.created.get(&expr.id()).cloned(),
            "parenthesized_expression" => named_children(expr).first().and_then(|e| self.resolve(*e)),
            _ => None,
        }
    }

    fn visit_loop(&mut self, node: Node) {
        let (Some(right), Some(body)) = (
            node.child_by_field_name("right"),
            node.child_by_field_name("body"),
        ) else {
            return;
        };
        let Some(router_call) = find_router_call(body, self.src) else {
            return;
        };

        match right.kind() {
            "call" => {
                let Some((start, end)) = range_bounds(right, self.src) else {
                    return;
                };
                let prefix = name_prefix(router_call, self.src);
                let end = end.min(start.saturating_add(MAX_LOOP_ROUTERS));
                for i in start..end {
                    self.routers.insert(format!("{}{}", prefix, i));
                }
            }
            "list" | "tuple" => {
                for element in named_children(right) {
                    if let Some(name) = string_literal(element, self.src) {
                        self.routers.insert(name);
                    }
                }
            }
            _ => {}
        }
    }

    fn into_graph(self) -> Result<Graph, GraphError> {
        let mut graph = Graph::new();
        for router in &self.routers {
            graph.add_node(router, NodeKind::Router)?;
        }
        for switch in &self.switches {
            if !graph.contains(switch) {
                graph.add_node(switch, NodeKind::Switch)?;
            }
        }
        for (a, b) in &self.links {
            if a == b {
                continue;
            }
            for end in [a, b] {
                if !graph.contains(end) {
                    graph.add_node(end, NodeKind::Router)?;
                }
            }
            if let Err(e) = graph.connect(a, b) {
                trace!(a = %a, b = %b, error = %e, "Skipping link");
            }
        }
        Ok(graph)
    }
}

/// `(method name, receiver)` of a `receiver.method(...)` call
fn method_call<'t, 's>(call: Node<'t>, src: &'s str) -> Option<(&'s str, Node<'t>)> {
    let function = call.child_by_field_name("function")?;
    if function.kind() != "attribute" {
        return None;
    }
    let method = node_text(function.child_by_field_name("attribute")?, src);
    Some((method, function.child_by_field_name("object")?))
}

fn call_arguments<'t, 's>(call: Node<'t>, src: &'s str) -> (Vec<Node<'t>>, HashMap<&'s str, Node<'t>>) {
    let mut positional = Vec::new();
    let mut keywords = HashMap::new();
    let Some(args) = call.child_by_field_name("arguments") else {
        return (positional, keywords);
    };
    for arg in named_children(args) {
        if arg.kind() == "keyword_argument" {
            if let (Some(name), Some(value)) = (
                arg.child_by_field_name("name"),
                arg.child_by_field_name("value"),
            ) {
                keywords.insert(node_text(name, src), value);
            }
        } else {
            positional.push(arg);
        }
    }
    (positional, keywords)
}

fn find_router_call<'t>(node: Node<'t>, src: &str) -> Option<Node<'t>> {
    if node.kind() == "call" && matches!(method_call(node, src), Some(("add_router", _))) {
        return Some(node);
    }
    named_children(node)
        .into_iter()
        .find_map(|child| find_router_call(child, src))
}

/// Bounds of a two-argument `range(start, end)` call with integer literals
fn range_bounds(call: Node, src: &str) -> Option<(i64, i64)> {
    let function = call.child_by_field_name("function")?;
    if function.kind() != "identifier" || node_text(function, src) != "range" {
        return None;
    }
    let (positional, keywords) = call_arguments(call, src);
    if positional.len() != 2 || !keywords.is_empty() {
        return None;
    }
    let start = integer_literal(positional[0], src)?;
    let end = integer_literal(positional[1], src)?;
    Some((start, end))
}

fn integer_literal(node: Node, src: &str) -> Option<i64> {
    match node.kind() {
        "integer" => node_text(node, src).replace('_', "").parse().ok(),
        "unary_operator" => {
            let operand = node.child_by_field_name("argument")?;
            let value = integer_literal(operand, src)?;
            match node.child_by_field_name("operator").map(|o| node_text(o, src)) {
                Some("-") => Some(-value),
                Some("+") => Some(value),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Literal text before the placeholder in a generated router name, default `r`
fn name_prefix(router_call: Node, src: &str) -> String {
    let (positional, keywords) = call_arguments(router_call, src);
    let arg = positional.first().copied().or_else(|| keywords.get("name").copied());
    arg.and_then(first_string)
        .map(|s| {
            let inner = strip_quotes(node_text(s, src));
            inner
                .split(|c| c == '{' || c == '%')
                .next()
                .unwrap_or("")
                .to_string()
        })
        .filter(|p| !p.is_empty() && p.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or_else(|| "r".to_string())
}

fn first_string(node: Node) -> Option<Node> {
    if node.kind() == "string" {
        return Some(node);
    }
    named_children(node).into_iter().find_map(first_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_names(graph: &Graph) -> Vec<String> {
        graph.routers().map(|n| n.name.clone()).collect()
    }

    fn peers(graph: &Graph, node: &str) -> Vec<String> {
        graph
            .node(node)
            .unwrap()
            .interfaces()
            .values()
            .map(|e| e.node.clone())
            .collect()
    }

    #[test]
    fn test_unparseable_source() {
        let text = "def build_topo(tgen):\n    tgen.add_router(\"r1\"\n";
        assert!(SyntaxExtractor::new().extract_source(text).is_none());
        let source = SourceFile::new("/t/test_bad.py", text);
        assert_eq!(
            SyntaxExtractor::new().extract(&source),
            Err(ExtractionError::Unparseable)
        );
    }

    #[test]
    fn test_no_builder_function() {
        let source = SourceFile::new("/t/test_none.py", "def helper():\n    return 1\n");
        assert_eq!(
            SyntaxExtractor::new().extract(&source),
            Err(ExtractionError::NoBuilderFunction)
        );
    }

    #[test]
    fn test_literal_calls_and_switch_scope() {
        let text = r#"
def build_topo(tgen):
    tgen.add_router("r1")
    tgen.add_router(name="r2")

    switch = tgen.add_switch("s1")
    # comments do not break the scope
    switch.add_link(tgen.gears["r1"])
    switch.add_link(tgen.gears["r2"])
"#;
        let graph = SyntaxExtractor::new().extract_source(text).unwrap();
        assert_eq!(router_names(&graph), vec!["r1", "r2"]);
        assert_eq!(peers(&graph, "s1"), vec!["r1", "r2"]);
    }

    #[test]
    fn test_receiver_binding_beats_current_switch() {
        let text = r#"
def build_topo(tgen):
    s1 = tgen.add_switch("s1")
    s2 = tgen.add_switch("s2")
    s1.add_link(tgen.gears["r1"])
    s2.add_link(tgen.gears["r2"])
"#;
        let graph = SyntaxExtractor::new().extract_source(text).unwrap();
        assert_eq!(peers(&graph, "s1"), vec!["r1"]);
        assert_eq!(peers(&graph, "s2"), vec!["r2"]);
    }

    #[test]
    fn test_gear_to_gear_and_two_argument_links() {
        let text = r#"
def build_topo(tgen):
    r1 = tgen.add_router("r1")
    tgen.add_router("r2")
    tgen.add_router("r3")
    tgen.gears["r1"].add_link(tgen.gears["r2"])
    tgen.add_link(r1, tgen.gears["r3"])
"#;
        let graph = SyntaxExtractor::new().extract_source(text).unwrap();
        assert_eq!(peers(&graph, "r1"), vec!["r2", "r3"]);
        assert_eq!(graph.switch_count(), 0);
    }

    #[test]
    fn test_link_before_any_switch_is_dropped() {
        let text = r#"
def build_topo(tgen):
    tgen.add_router("r1")
    sw.add_link(tgen.gears["r1"])
"#;
        let graph = SyntaxExtractor::new().extract_source(text).unwrap();
        assert!(graph.links().is_empty());
    }

    #[test]
    fn test_range_loop() {
        let text = r#"
def build_topo(tgen):
    for routern in range(1, 4):
        tgen.add_router("r{}".format(routern))
"#;
        let graph = SyntaxExtractor::new().extract_source(text).unwrap();
        assert_eq!(router_names(&graph), vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_range_loop_f_string_prefix() {
        let text = "def build_topo(tgen):\n    for i in range(0, 2):\n        tgen.add_router(f\"pe{i}\")\n";
        let graph = SyntaxExtractor::new().extract_source(text).unwrap();
        assert_eq!(router_names(&graph), vec!["pe0", "pe1"]);
    }

    #[test]
    fn test_list_loop() {
        let text = r#"
def build_topo(tgen):
    for rname in ["ce1", "ce2"]:
        tgen.add_router(rname)
"#;
        let graph = SyntaxExtractor::new().extract_source(text).unwrap();
        assert_eq!(router_names(&graph), vec!["ce1", "ce2"]);
    }

    #[test]
    fn test_nested_builder_is_found() {
        let text = r#"
class Template:
    def build_topology(self, tgen):
        tgen.add_router("r1")
"#;
        let graph = SyntaxExtractor::new().extract_source(text).unwrap();
        assert_eq!(router_names(&graph), vec!["r1"]);
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"r1\""), "r1");
        assert_eq!(strip_quotes("'''s1'''"), "s1");
        assert_eq!(strip_quotes("f\"r{i}\""), "r{i}");
    }
}
