//! Lowering of tree-sitter Python trees into the owned AST

use super::ast::*;
use crate::extractors::syntax::{named_children, node_text, parse_python};
use std::fmt;
use std::rc::Rc;
use tree_sitter::Node;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyntaxError: {} (line {})", self.message, self.line)
    }
}

/// Parse a module and lower it, rejecting sources with syntax errors
pub fn parse_module(text: &str) -> Result<Module, ParseFailure> {
    let tree = parse_python(text).ok_or_else(|| ParseFailure {
        line: 0,
        message: "python grammar unavailable".to_string(),
    })?;
    let root = tree.root_node();
    if root.has_error() {
        let line = first_error(root).map(|n| n.start_position().row + 1).unwrap_or(1);
        return Err(ParseFailure {
            line,
            message: "invalid syntax".to_string(),
        });
    }
    let mut lowerer = Lowerer {
        src: text,
        generator_flags: Vec::new(),
    };
    Ok(Module {
        body: lowerer.block(root),
    })
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}

struct Lowerer<'s> {
    src: &'s str,
    /// One entry per function being lowered: whether a `yield` was seen
    generator_flags: Vec<bool>,
}

impl<'s> Lowerer<'s> {
    fn text(&self, node: Node) -> &'s str {
        node_text(node, self.src)
    }

    fn line(node: Node) -> usize {
        node.start_position().row + 1
    }

    fn field<'t>(node: Node<'t>, name: &str) -> Option<Node<'t>> {
        node.child_by_field_name(name)
    }

    fn block(&mut self, node: Node) -> Block {
        named_children(node)
            .into_iter()
            .map(|child| self.stmt(child))
            .collect()
    }

    fn body(&mut self, node: Node, field: &str) -> Block {
        match Self::field(node, field) {
            Some(body) => self.block(body),
            None => match named_children(node).into_iter().find(|c| c.kind() == "block") {
                Some(body) => self.block(body),
                None => Vec::new(),
            },
        }
    }

    fn stmt(&mut self, node: Node) -> Stmt {
        let line = Self::line(node);
        let kind = self.stmt_kind(node);
        Stmt { line, kind }
    }

    fn stmt_kind(&mut self, node: Node) -> StmtKind {
        match node.kind() {
            "expression_statement" => {
                let children = named_children(node);
                match children.as_slice() {
                    [single] if single.kind() == "assignment" => self.assignment(*single),
                    [single] if single.kind() == "augmented_assignment" => self.aug_assignment(*single),
                    [single] => StmtKind::Expr(self.expr(*single)),
                    many => StmtKind::Expr(Expr::Tuple(many.iter().map(|c| self.expr(*c)).collect())),
                }
            }
            "return_statement" => StmtKind::Return(named_children(node).first().map(|c| self.expr(*c))),
            "pass_statement" => StmtKind::Pass,
            "break_statement" => StmtKind::Break,
            "continue_statement" => StmtKind::Continue,
            "if_statement" => self.if_statement(node),
            "for_statement" => self.for_statement(node),
            "while_statement" => StmtKind::While {
                test: self.field_expr(node, "condition"),
                body: self.body(node, "body"),
                orelse: Self::field(node, "alternative").map(|alt| self.body(alt, "body")),
            },
            "try_statement" => self.try_statement(node),
            "with_statement" => self.with_statement(node),
            "function_definition" => StmtKind::FunctionDef(Rc::new(self.function(node, Vec::new()))),
            "class_definition" => StmtKind::ClassDef(Rc::new(self.class(node, Vec::new()))),
            "decorated_definition" => self.decorated(node),
            "import_statement" => self.import(node),
            "import_from_statement" => self.import_from(node),
            "future_import_statement" => StmtKind::Pass,
            "global_statement" => StmtKind::Global(self.identifiers(node)),
            "nonlocal_statement" => StmtKind::Nonlocal(self.identifiers(node)),
            "raise_statement" => {
                let cause = Self::field(node, "cause");
                let exc = named_children(node)
                    .into_iter()
                    .find(|c| Some(c.id()) != cause.map(|n| n.id()));
                StmtKind::Raise {
                    exc: exc.map(|e| self.expr(e)),
                    cause: cause.map(|c| self.expr(c)),
                }
            }
            "assert_statement" => {
                let children = named_children(node);
                match children.first() {
                    Some(test) => StmtKind::Assert {
                        test: self.expr(*test),
                        msg: children.get(1).map(|m| self.expr(*m)),
                    },
                    None => StmtKind::Pass,
                }
            }
            "delete_statement" => StmtKind::Delete(
                named_children(node)
                    .into_iter()
                    .flat_map(|c| match c.kind() {
                        "expression_list" => named_children(c),
                        _ => vec![c],
                    })
                    .map(|c| self.target(c))
                    .collect(),
            ),
            other => StmtKind::Unsupported(other.to_string()),
        }
    }

    fn field_expr(&mut self, node: Node, field: &str) -> Expr {
        match Self::field(node, field) {
            Some(child) => self.expr(child),
            None => Expr::Unsupported(format!("{} without {}", node.kind(), field)),
        }
    }

    fn identifiers(&self, node: Node) -> Vec<String> {
        named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "identifier")
            .map(|c| self.text(c).to_string())
            .collect()
    }

    fn assignment(&mut self, node: Node) -> StmtKind {
        let mut targets = Vec::new();
        let mut current = node;
        loop {
            if let Some(left) = Self::field(current, "left") {
                targets.push(self.target(left));
            }
            match Self::field(current, "right") {
                Some(right) if right.kind() == "assignment" => current = right,
                Some(right) => {
                    return StmtKind::Assign {
                        targets,
                        value: self.expr(right),
                    }
                }
                // annotation only: `x: int`
                None => return StmtKind::Pass,
            }
        }
    }

    fn aug_assignment(&mut self, node: Node) -> StmtKind {
        let op = Self::field(node, "operator")
            .map(|o| self.text(o).trim_end_matches('='))
            .and_then(bin_op);
        match (Self::field(node, "left"), op, Self::field(node, "right")) {
            (Some(left), Some(op), Some(right)) => StmtKind::AugAssign {
                target: self.target(left),
                op,
                value: self.expr(right),
            },
            _ => StmtKind::Unsupported("augmented_assignment".to_string()),
        }
    }

    fn if_statement(&mut self, node: Node) -> StmtKind {
        let mut branches = vec![(self.field_expr(node, "condition"), self.body(node, "consequence"))];
        let mut orelse = None;
        let mut cursor = node.walk();
        let alternatives: Vec<Node> = node.children_by_field_name("alternative", &mut cursor).collect();
        for alt in alternatives {
            match alt.kind() {
                "elif_clause" => {
                    branches.push((self.field_expr(alt, "condition"), self.body(alt, "consequence")))
                }
                "else_clause" => orelse = Some(self.body(alt, "body")),
                _ => {}
            }
        }
        StmtKind::If { branches, orelse }
    }

    fn for_statement(&mut self, node: Node) -> StmtKind {
        let target = match Self::field(node, "left") {
            Some(left) => self.target(left),
            None => Target::Name("_".to_string()),
        };
        StmtKind::For {
            target,
            iter: self.field_expr(node, "right"),
            body: self.body(node, "body"),
            orelse: Self::field(node, "alternative").map(|alt| self.body(alt, "body")),
        }
    }

    fn try_statement(&mut self, node: Node) -> StmtKind {
        let body = self.body(node, "body");
        let mut handlers = Vec::new();
        let mut orelse = None;
        let mut finally = None;
        for child in named_children(node) {
            match child.kind() {
                "except_clause" | "except_group_clause" => handlers.push(self.handler(child)),
                "else_clause" => orelse = Some(self.body(child, "body")),
                "finally_clause" => finally = Some(self.body(child, "body")),
                _ => {}
            }
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finally,
        }
    }

    fn handler(&mut self, node: Node) -> Handler {
        let parts: Vec<Node> = named_children(node)
            .into_iter()
            .filter(|c| c.kind() != "block")
            .collect();
        let (kind, name) = match parts.as_slice() {
            [] => (None, None),
            [pattern, ..] if pattern.kind() == "as_pattern" => {
                let kind = named_children(*pattern).first().map(|e| self.expr(*e));
                let name = Self::field(*pattern, "alias").map(|a| self.alias_name(a));
                (kind, name)
            }
            [kind, rest @ ..] => (
                Some(self.expr(*kind)),
                rest.first().map(|n| self.alias_name(*n)),
            ),
        };
        Handler {
            kind,
            name,
            body: self.body(node, "body"),
        }
    }

    fn alias_name(&self, node: Node) -> String {
        match node.kind() {
            "as_pattern_target" => named_children(node)
                .first()
                .map(|n| self.text(*n).to_string())
                .unwrap_or_else(|| self.text(node).to_string()),
            _ => self.text(node).to_string(),
        }
    }

    fn with_statement(&mut self, node: Node) -> StmtKind {
        let mut items = Vec::new();
        let clauses = named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "with_clause");
        for clause in clauses {
            for item in named_children(clause).into_iter().filter(|c| c.kind() == "with_item") {
                let Some(value) = Self::field(item, "value") else {
                    continue;
                };
                if value.kind() == "as_pattern" {
                    let expr = named_children(value)
                        .first()
                        .map(|e| self.expr(*e))
                        .unwrap_or(Expr::Const(Const::None));
                    let target = Self::field(value, "alias").map(|alias| {
                        let inner = named_children(alias).first().copied().unwrap_or(alias);
                        self.target(inner)
                    });
                    items.push((expr, target));
                } else {
                    items.push((self.expr(value), None));
                }
            }
        }
        StmtKind::With {
            items,
            body: self.body(node, "body"),
        }
    }

    fn decorated(&mut self, node: Node) -> StmtKind {
        let decorators: Vec<Expr> = named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "decorator")
            .filter_map(|d| named_children(d).first().copied())
            .map(|e| self.expr(e))
            .collect();
        match Self::field(node, "definition") {
            Some(def) if def.kind() == "function_definition" => {
                StmtKind::FunctionDef(Rc::new(self.function(def, decorators)))
            }
            Some(def) if def.kind() == "class_definition" => {
                StmtKind::ClassDef(Rc::new(self.class(def, decorators)))
            }
            _ => StmtKind::Unsupported("decorated_definition".to_string()),
        }
    }

    fn function(&mut self, node: Node, decorators: Vec<Expr>) -> FunctionDef {
        let name = Self::field(node, "name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        let params = Self::field(node, "parameters")
            .map(|p| self.params(p))
            .unwrap_or_default();
        self.generator_flags.push(false);
        let body = self.body(node, "body");
        let is_generator = self.generator_flags.pop().unwrap_or(false);
        FunctionDef {
            name,
            params,
            body,
            decorators,
            is_generator,
        }
    }

    fn class(&mut self, node: Node, decorators: Vec<Expr>) -> ClassDef {
        let name = Self::field(node, "name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        let bases = Self::field(node, "superclasses")
            .map(|args| {
                named_children(args)
                    .into_iter()
                    .filter(|a| a.kind() != "keyword_argument")
                    .map(|a| self.expr(a))
                    .collect()
            })
            .unwrap_or_default();
        ClassDef {
            name,
            bases,
            body: self.body(node, "body"),
            decorators,
        }
    }

    fn params(&mut self, node: Node) -> Params {
        let mut params = Params::default();
        let mut keyword_only = false;
        for child in named_children(node) {
            let (name, default) = match child.kind() {
                "identifier" => (self.text(child).to_string(), None),
                "default_parameter" | "typed_default_parameter" => {
                    let name = Self::field(child, "name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default();
                    (name, Self::field(child, "value").map(|v| self.expr(v)))
                }
                "typed_parameter" => {
                    let Some(inner) = named_children(child).first().copied() else {
                        continue;
                    };
                    match inner.kind() {
                        "list_splat_pattern" => {
                            params.vararg = self.splat_name(inner);
                            keyword_only = true;
                            continue;
                        }
                        "dictionary_splat_pattern" => {
                            params.kwarg = self.splat_name(inner);
                            continue;
                        }
                        _ => (self.text(inner).to_string(), None),
                    }
                }
                "list_splat_pattern" => {
                    params.vararg = self.splat_name(child);
                    keyword_only = true;
                    continue;
                }
                "dictionary_splat_pattern" => {
                    params.kwarg = self.splat_name(child);
                    continue;
                }
                "keyword_separator" => {
                    keyword_only = true;
                    continue;
                }
                _ => continue,
            };
            let param = Param { name, default };
            if keyword_only {
                params.kwonly.push(param);
            } else {
                params.positional.push(param);
            }
        }
        params
    }

    fn splat_name(&self, node: Node) -> Option<String> {
        named_children(node)
            .first()
            .map(|n| self.text(*n).to_string())
    }

    fn import(&mut self, node: Node) -> StmtKind {
        let mut names = Vec::new();
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
        for child in children {
            names.push(match child.kind() {
                "aliased_import" => ImportName {
                    module: Self::field(child, "name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default(),
                    alias: Self::field(child, "alias").map(|a| self.text(a).to_string()),
                },
                _ => ImportName {
                    module: self.text(child).to_string(),
                    alias: None,
                },
            });
        }
        StmtKind::Import(names)
    }

    fn import_from(&mut self, node: Node) -> StmtKind {
        let (module, level) = match Self::field(node, "module_name") {
            Some(m) if m.kind() == "relative_import" => {
                let text = self.text(m);
                let level = text.chars().take_while(|c| *c == '.').count();
                (text[level..].trim().to_string(), level)
            }
            Some(m) => (self.text(m).to_string(), 0),
            None => (String::new(), 0),
        };
        if named_children(node).iter().any(|c| c.kind() == "wildcard_import") {
            return StmtKind::ImportFrom {
                module,
                level,
                names: None,
            };
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
        let names = children
            .into_iter()
            .map(|child| match child.kind() {
                "aliased_import" => (
                    Self::field(child, "name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default(),
                    Self::field(child, "alias").map(|a| self.text(a).to_string()),
                ),
                _ => (self.text(child).to_string(), None),
            })
            .collect();
        StmtKind::ImportFrom {
            module,
            level,
            names: Some(names),
        }
    }

    fn target(&mut self, node: Node) -> Target {
        match node.kind() {
            "identifier" => Target::Name(self.text(node).to_string()),
            "attribute" => {
                let object = self.field_expr(node, "object");
                let attr = Self::field(node, "attribute")
                    .map(|a| self.text(a).to_string())
                    .unwrap_or_default();
                Target::Attribute(object, attr)
            }
            "subscript" => {
                let value = self.field_expr(node, "value");
                Target::Subscript(value, self.subscript_index(node))
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list" | "expression_list" => {
                Target::Tuple(named_children(node).into_iter().map(|c| self.target(c)).collect())
            }
            "list_splat_pattern" | "list_splat" => match named_children(node).first() {
                Some(inner) => Target::Starred(Box::new(self.target(*inner))),
                None => Target::Name("_".to_string()),
            },
            "parenthesized_expression" => match named_children(node).first() {
                Some(inner) => self.target(*inner),
                None => Target::Tuple(Vec::new()),
            },
            _ => Target::Name(self.text(node).to_string()),
        }
    }

    fn subscript_index(&mut self, node: Node) -> Expr {
        let mut cursor = node.walk();
        let indices: Vec<Node> = node.children_by_field_name("subscript", &mut cursor).collect();
        match indices.as_slice() {
            [single] => self.expr(*single),
            many => Expr::Tuple(many.iter().map(|i| self.expr(*i)).collect()),
        }
    }

    fn expr(&mut self, node: Node) -> Expr {
        match node.kind() {
            "identifier" => Expr::Name(self.text(node).to_string()),
            "integer" => self.integer(node),
            "float" => {
                let text = self.text(node).replace('_', "");
                match text.parse::<f64>() {
                    Ok(v) => Expr::Const(Const::Float(v)),
                    Err(_) => Expr::Unsupported(format!("number literal {}", text)),
                }
            }
            "true" => Expr::Const(Const::Bool(true)),
            "false" => Expr::Const(Const::Bool(false)),
            "none" => Expr::Const(Const::None),
            "ellipsis" => Expr::Const(Const::Ellipsis),
            "string" => self.string(node),
            "concatenated_string" => self.concatenated(node),
            "list" => Expr::List(self.elements(node)),
            "tuple" | "expression_list" => Expr::Tuple(self.elements(node)),
            "set" => Expr::Set(self.elements(node)),
            "parenthesized_expression" => match named_children(node).first() {
                Some(inner) => self.expr(*inner),
                None => Expr::Tuple(Vec::new()),
            },
            "dictionary" => {
                let mut entries = Vec::new();
                for child in named_children(node) {
                    match child.kind() {
                        "pair" => {
                            let key = self.field_expr(child, "key");
                            let value = self.field_expr(child, "value");
                            entries.push((Some(key), value));
                        }
                        "dictionary_splat" => {
                            if let Some(inner) = named_children(child).first() {
                                entries.push((None, self.expr(*inner)));
                            }
                        }
                        _ => {}
                    }
                }
                Expr::Dict(entries)
            }
            "attribute" => {
                let object = self.field_expr(node, "object");
                let attr = Self::field(node, "attribute")
                    .map(|a| self.text(a).to_string())
                    .unwrap_or_default();
                Expr::Attribute(Box::new(object), attr)
            }
            "subscript" => {
                let value = self.field_expr(node, "value");
                Expr::Subscript(Box::new(value), Box::new(self.subscript_index(node)))
            }
            "slice" => self.slice(node),
            "call" => self.call(node),
            "binary_operator" => {
                let op = Self::field(node, "operator").and_then(|o| bin_op(self.text(o)));
                match op {
                    Some(op) => Expr::BinOp(
                        Box::new(self.field_expr(node, "left")),
                        op,
                        Box::new(self.field_expr(node, "right")),
                    ),
                    None => Expr::Unsupported("binary operator".to_string()),
                }
            }
            "unary_operator" => {
                let op = match Self::field(node, "operator").map(|o| self.text(o)) {
                    Some("-") => UnaryOp::Neg,
                    Some("+") => UnaryOp::Pos,
                    Some("~") => UnaryOp::Invert,
                    _ => return Expr::Unsupported("unary operator".to_string()),
                };
                let argument = Self::field(node, "argument");
                if let (UnaryOp::Neg, Some(literal)) = (op, argument) {
                    if literal.kind() == "integer" {
                        return self.integer_with_sign(literal, true);
                    }
                }
                Expr::UnaryOp(op, Box::new(self.field_expr(node, "argument")))
            }
            "not_operator" => Expr::UnaryOp(UnaryOp::Not, Box::new(self.field_expr(node, "argument"))),
            "boolean_operator" => {
                let op = match Self::field(node, "operator").map(|o| self.text(o)) {
                    Some("and") => BoolOp::And,
                    _ => BoolOp::Or,
                };
                Expr::BoolOp(
                    op,
                    Box::new(self.field_expr(node, "left")),
                    Box::new(self.field_expr(node, "right")),
                )
            }
            "comparison_operator" => self.comparison(node),
            "conditional_expression" => {
                let parts = named_children(node);
                match parts.as_slice() {
                    [body, test, orelse] => Expr::IfExp {
                        body: Box::new(self.expr(*body)),
                        test: Box::new(self.expr(*test)),
                        orelse: Box::new(self.expr(*orelse)),
                    },
                    _ => Expr::Unsupported("conditional expression".to_string()),
                }
            }
            "lambda" => {
                let params = Self::field(node, "parameters")
                    .map(|p| self.params(p))
                    .unwrap_or_default();
                self.generator_flags.push(false);
                let body = self.field_expr(node, "body");
                let is_generator = self.generator_flags.pop().unwrap_or(false);
                Expr::Lambda(Rc::new(FunctionDef {
                    name: "<lambda>".to_string(),
                    params,
                    body: vec![Stmt {
                        line: Self::line(node),
                        kind: StmtKind::Return(Some(body)),
                    }],
                    decorators: Vec::new(),
                    is_generator,
                }))
            }
            "list_comprehension" | "generator_expression" => {
                let (elt, generators) = self.comprehension(node);
                Expr::ListComp {
                    elt: Box::new(elt),
                    generators,
                }
            }
            "set_comprehension" => {
                let (elt, generators) = self.comprehension(node);
                Expr::SetComp {
                    elt: Box::new(elt),
                    generators,
                }
            }
            "dictionary_comprehension" => {
                let body = Self::field(node, "body");
                let (key, value) = match body {
                    Some(pair) => (self.field_expr(pair, "key"), self.field_expr(pair, "value")),
                    None => return Expr::Unsupported("dictionary comprehension".to_string()),
                };
                let generators = self.generators(node);
                Expr::DictComp {
                    key: Box::new(key),
                    value: Box::new(value),
                    generators,
                }
            }
            "list_splat" => match named_children(node).first() {
                Some(inner) => Expr::Starred(Box::new(self.expr(*inner))),
                None => Expr::Unsupported("list splat".to_string()),
            },
            "yield" => {
                if let Some(flag) = self.generator_flags.last_mut() {
                    *flag = true;
                }
                let mut cursor = node.walk();
                let delegated = node.children(&mut cursor).any(|c| c.kind() == "from");
                if delegated {
                    return Expr::Unsupported("yield from".to_string());
                }
                Expr::Yield(named_children(node).first().map(|v| Box::new(self.expr(*v))))
            }
            "named_expression" => {
                let name = Self::field(node, "name")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_default();
                Expr::NamedExpr(name, Box::new(self.field_expr(node, "value")))
            }
            other => Expr::Unsupported(other.to_string()),
        }
    }

    fn elements(&mut self, node: Node) -> Vec<Expr> {
        named_children(node).into_iter().map(|c| self.expr(c)).collect()
    }

    fn integer(&self, node: Node) -> Expr {
        self.integer_with_sign(node, false)
    }

    /// Integer literal, negated before range checking so `-9223372036854775808` fits
    fn integer_with_sign(&self, node: Node, negative: bool) -> Expr {
        let text = self.text(node).replace('_', "");
        let lower = text.to_lowercase();
        let (digits, radix) = if let Some(hex) = lower.strip_prefix("0x") {
            (hex, 16)
        } else if let Some(oct) = lower.strip_prefix("0o") {
            (oct, 8)
        } else if let Some(bin) = lower.strip_prefix("0b") {
            (bin, 2)
        } else {
            (lower.trim_end_matches('l'), 10)
        };
        let signed = if negative {
            format!("-{}", digits)
        } else {
            digits.to_string()
        };
        if let Ok(v) = i64::from_str_radix(&signed, radix) {
            return Expr::Const(Const::Int(v));
        }
        let literal = if negative { format!("-{}", text) } else { text.clone() };
        let well_formed = !digits.is_empty() && digits.chars().all(|c| c.is_digit(radix));
        if well_formed {
            Expr::IntOverflow(literal)
        } else {
            Expr::Unsupported(format!("number literal {}", literal))
        }
    }

    fn slice(&mut self, node: Node) -> Expr {
        let mut parts: [Option<Box<Expr>>; 3] = [None, None, None];
        let mut index = 0;
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            if child.kind() == ":" {
                index += 1;
            } else if child.is_named() && child.kind() != "comment" && index < 3 {
                parts[index] = Some(Box::new(self.expr(child)));
            }
        }
        let [start, stop, step] = parts;
        Expr::Slice(start, stop, step)
    }

    fn call(&mut self, node: Node) -> Expr {
        let func = self.field_expr(node, "function");
        let mut args = Vec::new();
        if let Some(arguments) = Self::field(node, "arguments") {
            if arguments.kind() == "generator_expression" {
                args.push(Arg::Positional(self.expr(arguments)));
            } else {
                for arg in named_children(arguments) {
                    args.push(match arg.kind() {
                        "keyword_argument" => {
                            let name = Self::field(arg, "name")
                                .map(|n| self.text(n).to_string())
                                .unwrap_or_default();
                            Arg::Keyword(name, self.field_expr(arg, "value"))
                        }
                        "list_splat" => match named_children(arg).first() {
                            Some(inner) => Arg::Star(self.expr(*inner)),
                            None => continue,
                        },
                        "dictionary_splat" => match named_children(arg).first() {
                            Some(inner) => Arg::DoubleStar(self.expr(*inner)),
                            None => continue,
                        },
                        _ => Arg::Positional(self.expr(arg)),
                    });
                }
            }
        }
        Expr::Call {
            func: Box::new(func),
            args,
        }
    }

    fn comparison(&mut self, node: Node) -> Expr {
        let mut operands = Vec::new();
        let mut ops = Vec::new();
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        let mut pending_not = false;
        for child in children {
            if child.kind() == "comment" {
                continue;
            }
            if child.is_named() {
                operands.push(self.expr(child));
                continue;
            }
            let op = match (child.kind(), pending_not) {
                ("not", _) => {
                    pending_not = true;
                    continue;
                }
                ("in", true) | ("not in", _) => CmpOp::NotIn,
                ("is", _) if self.text(child).contains("not") => CmpOp::IsNot,
                ("is not", _) => CmpOp::IsNot,
                ("==", _) => CmpOp::Eq,
                ("!=", _) | ("<>", _) => CmpOp::NotEq,
                ("<", _) => CmpOp::Lt,
                ("<=", _) => CmpOp::LtE,
                (">", _) => CmpOp::Gt,
                (">=", _) => CmpOp::GtE,
                ("in", false) => CmpOp::In,
                ("is", false) => CmpOp::Is,
                ("is", true) => CmpOp::IsNot,
                _ => return Expr::Unsupported(format!("comparison {}", child.kind())),
            };
            pending_not = false;
            ops.push(op);
        }
        let mut operands = operands.into_iter();
        let Some(first) = operands.next() else {
            return Expr::Unsupported("comparison".to_string());
        };
        let rest: Vec<(CmpOp, Expr)> = ops.into_iter().zip(operands).collect();
        Expr::Compare(Box::new(first), rest)
    }

    fn comprehension(&mut self, node: Node) -> (Expr, Vec<Comprehension>) {
        let elt = self.field_expr(node, "body");
        (elt, self.generators(node))
    }

    fn generators(&mut self, node: Node) -> Vec<Comprehension> {
        let mut generators: Vec<Comprehension> = Vec::new();
        for child in named_children(node) {
            match child.kind() {
                "for_in_clause" => {
                    let target = match Self::field(child, "left") {
                        Some(left) => self.target(left),
                        None => Target::Name("_".to_string()),
                    };
                    let mut cursor = child.walk();
                    let rights: Vec<Node> = child.children_by_field_name("right", &mut cursor).collect();
                    let iter = match rights.as_slice() {
                        [single] => self.expr(*single),
                        many => Expr::Tuple(many.iter().map(|r| self.expr(*r)).collect()),
                    };
                    generators.push(Comprehension {
                        target,
                        iter,
                        ifs: Vec::new(),
                    });
                }
                "if_clause" => {
                    let condition = named_children(child).first().map(|c| self.expr(*c));
                    if let (Some(condition), Some(last)) = (condition, generators.last_mut()) {
                        last.ifs.push(condition);
                    }
                }
                _ => {}
            }
        }
        generators
    }

    fn concatenated(&mut self, node: Node) -> Expr {
        let mut parts = Vec::new();
        for child in named_children(node) {
            match self.string(child) {
                Expr::Const(Const::Str(s)) => parts.push(FPart::Lit(s)),
                Expr::FString(more) => parts.extend(more),
                other => return other,
            }
        }
        collapse_parts(parts)
    }

    fn string(&mut self, node: Node) -> Expr {
        let raw = self.text(node);
        let prefix_len = raw.find(|c| c == '"' || c == '\'').unwrap_or(0);
        let prefix = raw[..prefix_len].to_lowercase();
        let is_raw = prefix.contains('r');
        let is_format = prefix.contains('f');

        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        let start = children
            .iter()
            .find(|c| c.kind() == "string_start")
            .map(|c| c.end_byte())
            .unwrap_or_else(|| node.start_byte() + prefix_len + quote_len(&raw[prefix_len..]));
        let end = children
            .iter()
            .rev()
            .find(|c| c.kind() == "string_end")
            .map(|c| c.start_byte())
            .unwrap_or_else(|| node.end_byte().saturating_sub(quote_len(&raw[prefix_len..])));

        let src = self.src;
        let literal = move |from: usize, to: usize| -> String {
            let text = src.get(from..to).unwrap_or("");
            let text = if is_raw { text.to_string() } else { unescape(text) };
            if is_format {
                text.replace("{{", "{").replace("}}", "}")
            } else {
                text
            }
        };

        let mut parts = Vec::new();
        let mut cursor_pos = start;
        let interpolations: Vec<Node> = children
            .iter()
            .copied()
            .filter(|c| c.kind() == "interpolation")
            .collect();
        for interp in interpolations {
            if interp.start_byte() > cursor_pos {
                parts.push(FPart::Lit(literal(cursor_pos, interp.start_byte())));
            }
            parts.push(self.interpolation(interp));
            cursor_pos = interp.end_byte();
        }
        if end > cursor_pos {
            parts.push(FPart::Lit(literal(cursor_pos, end)));
        }
        collapse_parts(parts)
    }

    fn interpolation(&mut self, node: Node) -> FPart {
        let expr = match Self::field(node, "expression") {
            Some(e) => self.expr(e),
            None => match named_children(node).first() {
                Some(e) => self.expr(*e),
                None => Expr::Const(Const::Str(String::new())),
            },
        };
        let mut conversion = None;
        let mut spec = None;
        for child in named_children(node) {
            match child.kind() {
                "type_conversion" => conversion = self.text(child).trim_start_matches('!').chars().next(),
                "format_specifier" => spec = Some(self.text(child).trim_start_matches(':').to_string()),
                _ => {}
            }
        }
        FPart::Expr {
            expr,
            conversion,
            spec,
        }
    }
}

fn collapse_parts(parts: Vec<FPart>) -> Expr {
    if parts.iter().all(|p| matches!(p, FPart::Lit(_))) {
        let joined: String = parts
            .into_iter()
            .map(|p| match p {
                FPart::Lit(s) => s,
                FPart::Expr { .. } => String::new(),
            })
            .collect();
        Expr::Const(Const::Str(joined))
    } else {
        Expr::FString(parts)
    }
}

fn quote_len(quoted: &str) -> usize {
    if quoted.starts_with("\"\"\"") || quoted.starts_with("'''") {
        3
    } else {
        1
    }
}

fn bin_op(op: &str) -> Option<BinOp> {
    Some(match op.trim() {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "//" => BinOp::FloorDiv,
        "%" => BinOp::Mod,
        "**" => BinOp::Pow,
        "|" => BinOp::BitOr,
        "&" => BinOp::BitAnd,
        "^" => BinOp::BitXor,
        "<<" => BinOp::LShift,
        ">>" => BinOp::RShift,
        "@" => BinOp::MatMul,
        _ => return None,
    })
}

/// Resolve backslash escapes of a non-raw string literal
pub(crate) fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\u{7}'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some(kind @ ('x' | 'u' | 'U')) => {
                let width = match kind {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push('\\');
                        out.push(kind);
                        out.push_str(&digits);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
