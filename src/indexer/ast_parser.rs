use super::language::{DeclKind, Language};
use crate::types::SymbolKind;
use tree_sitter::{Node, Parser};

/// A declaration found in the syntax tree, with the declarations one
/// nesting level below it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: DeclKind,
    pub symbol_kind: SymbolKind,
    pub node_kind: String,
    pub name: Option<String>,
    /// 1-based, inclusive
    pub start_line: usize,
    /// 1-based, inclusive
    pub end_line: usize,
    pub children: Vec<Declaration>,
}

/// Why structural parsing could not produce an outline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// The grammar could not be loaded into the parser
    Grammar(String),
    /// Tree-sitter gave up on the input
    NoTree,
    /// The tree contains error or missing nodes
    SyntaxErrors,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseFailure::Grammar(e) => write!(f, "failed to set parser language: {}", e),
            ParseFailure::NoTree => write!(f, "parser produced no tree"),
            ParseFailure::SyntaxErrors => write!(f, "source contains syntax errors"),
        }
    }
}

/// AST parser for extracting the declaration outline of a file
pub struct AstParser {
    parser: Parser,
    language: Language,
}

impl AstParser {
    /// Create a new AST parser for the given language
    pub fn new(language: Language) -> Result<Self, ParseFailure> {
        let mut parser = Parser::new();
        parser
            .set_language(&language.grammar())
            .map_err(|e| ParseFailure::Grammar(e.to_string()))?;

        Ok(Self { parser, language })
    }

    /// Parse source code and return its outermost declarations in source order
    pub fn parse(&mut self, source_code: &str) -> Result<Vec<Declaration>, ParseFailure> {
        let tree = self
            .parser
            .parse(source_code, None)
            .ok_or(ParseFailure::NoTree)?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(ParseFailure::SyntaxErrors);
        }

        let mut declarations = Vec::new();
        self.collect_children(root, source_code, None, &mut declarations);
        Ok(declarations)
    }

    /// Get the language this parser was built for
    pub fn language(&self) -> Language {
        self.language
    }

    // Walks below `node` and records the first declaration on every path,
    // without descending into it; its own nested declarations are collected
    // recursively into `Declaration::children`.
    fn collect_children(
        &self,
        node: Node,
        source: &str,
        enclosing: Option<DeclKind>,
        out: &mut Vec<Declaration>,
    ) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match self.language.classify(child.kind()) {
                Some(kind) => out.push(self.declaration(child, kind, source, enclosing)),
                None => self.collect_children(child, source, enclosing, out),
            }
        }
    }

    fn declaration(
        &self,
        node: Node,
        kind: DeclKind,
        source: &str,
        enclosing: Option<DeclKind>,
    ) -> Declaration {
        let symbol_kind = match kind {
            DeclKind::Callable
                if enclosing == Some(DeclKind::Container)
                    || self.language.is_receiver_method(node.kind()) =>
            {
                SymbolKind::Method
            }
            DeclKind::Callable => SymbolKind::Function,
            DeclKind::Container => SymbolKind::Class,
            DeclKind::Namespace => SymbolKind::Module,
        };

        let mut children = Vec::new();
        self.collect_children(node, source, Some(kind), &mut children);

        let (start_line, end_line) = line_span(&node);

        Declaration {
            kind,
            symbol_kind,
            node_kind: node.kind().to_string(),
            name: declaration_name(&node, source),
            start_line,
            end_line,
            children,
        }
    }
}

/// 1-based inclusive line span of a node. A node that ends at column 0 ends
/// on the previous line.
fn line_span(node: &Node) -> (usize, usize) {
    let start = node.start_position();
    let end = node.end_position();
    let start_line = start.row + 1;
    let end_line = if end.column == 0 && end.row > start.row {
        end.row
    } else {
        end.row + 1
    };
    (start_line, end_line.max(start_line))
}

fn node_text<'a>(node: &Node, source: &'a str) -> Option<&'a str> {
    node.utf8_text(source.as_bytes()).ok()
}

/// Best-effort symbol name for a declaration node
fn declaration_name(node: &Node, source: &str) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return node_text(&name, source).map(str::to_string);
    }

    // C/C++ functions: follow the declarator chain down to the identifier
    if let Some(mut declarator) = node.child_by_field_name("declarator") {
        while let Some(inner) = declarator.child_by_field_name("declarator") {
            declarator = inner;
        }
        return node_text(&declarator, source).map(str::to_string);
    }

    // Rust impl blocks are named after their type
    if let Some(ty) = node.child_by_field_name("type") {
        return node_text(&ty, source).map(|t| format!("impl {}", t));
    }

    // Go `type X struct {}` keeps the name on the nested type_spec
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "type_spec"
            && let Some(name) = child.child_by_field_name("name")
        {
            return node_text(&name, source).map(str::to_string);
        }
    }

    // Anonymous functions take the name they are bound to
    let parent = node.parent()?;
    let binding = match parent.kind() {
        "variable_declarator" => parent.child_by_field_name("name"),
        "assignment_expression" => parent.child_by_field_name("left"),
        "pair" => parent.child_by_field_name("key"),
        "public_field_definition" | "field_definition" => parent.child_by_field_name("property"),
        _ => None,
    }?;
    node_text(&binding, source).map(str::to_string)
}
