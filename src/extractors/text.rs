//! Text extractor - regex matching of builder idioms in raw source

use super::{is_builder_name, ExtractionError, SourceFile, Strategy, TopologyExtractor};
use crate::graph::{Graph, NodeKind};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::{debug, trace};

/// How far past a loop header to look for router creation
const LOOKAHEAD: usize = 200;

/// Upper bound on routers synthesized from one counted loop
const MAX_LOOP_ROUTERS: i64 = 4096;

fn def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+(\w+)[ \t]*\(").expect("valid regex"))
}

fn top_level_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:async[ \t]+def[ \t]|def[ \t]|class[ \t]|@|if[ \t]+__name__)")
            .expect("valid regex")
    })
}

fn router_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"add_router\(\s*(?:name\s*=\s*)?["']([A-Za-z0-9_-]+)["']"#).expect("valid regex")
    })
}

fn range_loop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"for\s+(\w+)\s+in\s+range\(\s*(-?\d+)\s*,\s*(-?\d+)\s*\)\s*:").expect("valid regex")
    })
}

fn list_loop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"for\s+\w+\s+in\s+\[([^\]]*)\]\s*:").expect("valid regex"))
}

fn name_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"add_router\(\s*(?:name\s*=\s*)?f?["']([A-Za-z_-]*)(?:\{|%)"#).expect("valid regex")
    })
}

fn literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"["']([A-Za-z0-9_-]+)["']"#).expect("valid regex"))
}

fn switch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"add_switch\(\s*(?:name\s*=\s*)?["']([A-Za-z0-9_-]+)["']"#).expect("valid regex")
    })
}

fn gear_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"add_link\s*\(\s*\w+\.gears\s*\[\s*["']([A-Za-z0-9_-]+)["']\s*\]"#)
            .expect("valid regex")
    })
}

/// Best-effort extractor working on source text alone
///
/// Recognized idioms inside the builder function:
/// - `add_router("r1")` with a literal name
/// - `for i in range(a, b):` followed by router creation, naming `r<i>`
/// - `for n in ["r1", "r2"]:` followed by router creation
/// - `sw = tgen.add_switch("s1")` followed by `sw.add_link(tgen.gears["r1"])`
///   calls up to the next switch
#[derive(Debug, Default, Clone, Copy)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a graph from the builder function in `text`
    pub fn extract_text(&self, text: &str) -> Result<Graph, ExtractionError> {
        let body = builder_span(text).ok_or(ExtractionError::NoBuilderFunction)?;
        let mut graph = Graph::new();

        let mut routers = BTreeSet::new();
        routers.extend(direct_routers(body));
        routers.extend(range_loop_routers(body));
        routers.extend(list_loop_routers(body));
        for name in &routers {
            graph.ensure_node(name, NodeKind::Router)?;
        }

        let blocks = switch_blocks(body);
        for (switch, _) in &blocks {
            if !graph.contains(switch) {
                graph.add_node(switch, NodeKind::Switch)?;
            }
        }
        for (switch, block) in &blocks {
            for cap in gear_link_re().captures_iter(block) {
                let peer = &cap[1];
                if !graph.contains(peer) {
                    graph.add_node(peer, NodeKind::Router)?;
                }
                if let Err(e) = graph.connect(switch, peer) {
                    trace!(switch = %switch, peer, error = %e, "Skipping link");
                }
            }
        }

        debug!(
            routers = graph.router_count(),
            switches = graph.switch_count(),
            links = graph.links().len(),
            "Text extraction finished"
        );
        Ok(graph)
    }
}

impl TopologyExtractor for TextExtractor {
    fn strategy(&self) -> Strategy {
        Strategy::Text
    }

    fn extract(&self, source: &SourceFile) -> Result<Graph, ExtractionError> {
        self.extract_text(&source.text)
    }
}

/// Text from the builder `def` up to the next top-level statement
fn builder_span(text: &str) -> Option<&str> {
    let (start, header_end) = def_re()
        .captures_iter(text)
        .filter(|c| is_builder_name(&c[1]))
        .find_map(|c| c.get(0).map(|m| (m.start(), m.end())))?;

    let end = top_level_re()
        .find_iter(&text[header_end..])
        .map(|m| header_end + m.start())
        .find(|pos| *pos > start)
        .unwrap_or(text.len());
    Some(&text[start..end])
}

fn direct_routers(body: &str) -> Vec<String> {
    router_re()
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .collect()
}

fn range_loop_routers(body: &str) -> Vec<String> {
    let mut routers = Vec::new();
    for cap in range_loop_re().captures_iter(body) {
        let Some(header) = cap.get(0) else { continue };
        let window = lookahead(body, header.end());
        if !window.contains("add_router") {
            continue;
        }
        let (Ok(start), Ok(end)) = (cap[2].parse::<i64>(), cap[3].parse::<i64>()) else {
            continue;
        };
        let prefix = name_prefix_re()
            .captures(window)
            .map(|c| c[1].to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "r".to_string());
        let end = end.min(start.saturating_add(MAX_LOOP_ROUTERS));
        routers.extend((start..end).map(|i| format!("{}{}", prefix, i)));
    }
    routers
}

fn list_loop_routers(body: &str) -> Vec<String> {
    let mut routers = Vec::new();
    for cap in list_loop_re().captures_iter(body) {
        let Some(header) = cap.get(0) else { continue };
        if !lookahead(body, header.end()).contains("add_router") {
            continue;
        }
        routers.extend(
            literal_re()
                .captures_iter(&cap[1])
                .map(|c| c[1].to_string()),
        );
    }
    routers
}

/// Each literal switch with the text up to the next switch creation
fn switch_blocks(body: &str) -> Vec<(String, &str)> {
    let matches: Vec<_> = switch_re()
        .captures_iter(body)
        .filter_map(|c| Some((c[1].to_string(), c.get(0)?.start(), c.get(0)?.end())))
        .collect();
    matches
        .iter()
        .enumerate()
        .map(|(i, (name, _, end))| {
            let block_end = matches.get(i + 1).map(|m| m.1).unwrap_or(body.len());
            (name.clone(), &body[*end..block_end])
        })
        .collect()
}

fn lookahead(text: &str, from: usize) -> &str {
    let mut end = (from + LOOKAHEAD).min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[from..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn router_names(graph: &Graph) -> Vec<String> {
        graph.routers().map(|n| n.name.clone()).collect()
    }

    #[test]
    fn test_no_builder_function() {
        let text = "def setup_module(mod):\n    pass\n";
        assert_eq!(
            TextExtractor::new().extract_text(text),
            Err(ExtractionError::NoBuilderFunction)
        );
    }

    #[test]
    fn test_direct_routers() {
        let text = r#"
def build_topo(tgen):
    tgen.add_router("r2")
    tgen.add_router('r1')
"#;
        let graph = TextExtractor::new().extract_text(text).unwrap();
        assert_eq!(router_names(&graph), vec!["r1", "r2"]);
    }

    #[test]
    fn test_range_loop_end_exclusive() {
        let text = r#"
def build_topo(tgen):
    for routern in range(1, 4):
        tgen.add_router("r{}".format(routern))
"#;
        let graph = TextExtractor::new().extract_text(text).unwrap();
        assert_eq!(router_names(&graph), vec!["r1", "r2", "r3"]);
    }

    #[parameterized(
        format_call = { r#"tgen.add_router("rt{}".format(i))"#, "rt" },
        f_string = { r#"tgen.add_router(f"ce{i}")"#, "ce" },
        percent = { r#"tgen.add_router("pe%d" % i)"#, "pe" },
        variable = { r#"tgen.add_router(name)"#, "r" },
    )]
    fn test_range_loop_prefix(call: &str, prefix: &str) {
        let text = format!("def build_topo(tgen):\n    for i in range(1, 3):\n        {}\n", call);
        let graph = TextExtractor::new().extract_text(&text).unwrap();
        assert_eq!(
            router_names(&graph),
            vec![format!("{}1", prefix), format!("{}2", prefix)]
        );
    }

    #[test]
    fn test_range_loop_without_router_evidence() {
        let text = r#"
def build_topo(tgen):
    for i in range(1, 4):
        print(i)
"#;
        let graph = TextExtractor::new().extract_text(text).unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn test_list_loop() {
        let text = r#"
def build_topo(tgen):
    for rname in ["ce1", "pe1"]:
        tgen.add_router(rname)
"#;
        let graph = TextExtractor::new().extract_text(text).unwrap();
        assert_eq!(router_names(&graph), vec!["ce1", "pe1"]);
    }

    #[test]
    fn test_switch_blocks_link_routers() {
        let text = r#"
def build_topo(tgen):
    for routern in range(1, 3):
        tgen.add_router("r{}".format(routern))

    switch = tgen.add_switch("s1")
    switch.add_link(tgen.gears["r1"])
    switch.add_link(tgen.gears["r2"])

    switch = tgen.add_switch("s2")
    switch.add_link(tgen.gears["r2"])
    switch.add_link(tgen.gears["r3"])
"#;
        let graph = TextExtractor::new().extract_text(text).unwrap();
        assert_eq!(router_names(&graph), vec!["r1", "r2", "r3"]);
        assert_eq!(graph.switch_count(), 2);
        assert_eq!(graph.links().len(), 4);

        let s2_peers: Vec<&str> = graph
            .node("s2")
            .unwrap()
            .interfaces()
            .values()
            .map(|e| e.node.as_str())
            .collect();
        assert_eq!(s2_peers, vec!["r2", "r3"]);
    }

    #[test]
    fn test_span_stops_at_next_top_level_def() {
        let text = r#"
def build_topo(tgen):
    tgen.add_router("r1")


def setup_module(mod):
    tgen.add_router("r9")
"#;
        let graph = TextExtractor::new().extract_text(text).unwrap();
        assert_eq!(router_names(&graph), vec!["r1"]);
    }

    #[test]
    fn test_switch_to_switch_reference_keeps_switch_kind() {
        let text = r#"
def build_topo(tgen):
    sw = tgen.add_switch("s1")
    sw.add_link(tgen.gears["s2"])
    sw = tgen.add_switch("s2")
"#;
        let graph = TextExtractor::new().extract_text(text).unwrap();
        assert_eq!(graph.switch_count(), 2);
        assert_eq!(graph.router_count(), 0);
        assert_eq!(graph.links().len(), 1);
    }

    #[test]
    fn test_trait_reports_missing_builder() {
        let source = SourceFile::new("/t/test_x.py", "x = 1\n");
        assert_eq!(
            TextExtractor::new().extract(&source),
            Err(ExtractionError::NoBuilderFunction)
        );
    }

    #[test]
    fn test_lookahead_respects_char_boundaries() {
        let text = format!("{}é", "a".repeat(LOOKAHEAD - 1));
        assert_eq!(lookahead(&text, 0).len(), LOOKAHEAD - 1);
    }
}
