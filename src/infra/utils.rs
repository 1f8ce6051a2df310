//! Small shared helpers for tree-sitter node handling.
//!
//! All functions are associated fns on a unit struct to keep call sites
//! ergonomic, testable, and discoverable.

use tree_sitter::Node;

/// Common Tree-sitter node helpers
pub struct TsNodeUtils;

impl TsNodeUtils {
    /// Extract the UTF-8 text of a node, empty on invalid ranges.
    pub fn text<'a>(node: Node, bytes: &'a [u8]) -> &'a str {
        node.utf8_text(bytes).unwrap_or_default()
    }

    /// Find the first direct child with the given kind.
    pub fn child_by_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
        for i in 0..node.child_count() {
            if let Some(c) = node.child(i)
                && c.kind() == kind
            {
                return Some(c);
            }
        }
        None
    }

    /// Extract text of a child field if present.
    pub fn field_text<'a>(node: Node, field: &str, bytes: &'a [u8]) -> Option<&'a str> {
        let child = node.child_by_field_name(field)?;
        child.utf8_text(bytes).ok()
    }

    /// Check if `node` has an ancestor of the given kind.
    pub fn has_ancestor(mut node: Node, kind: &str) -> bool {
        while let Some(p) = node.parent() {
            if p.kind() == kind {
                return true;
            }
            node = p;
        }
        false
    }

    /// Pre-order walk over every node in the tree.
    ///
    /// Iterative cursor walk so deeply nested sources cannot blow the stack.
    pub fn walk(root: Node, f: &mut impl FnMut(Node)) {
        let mut cursor = root.walk();
        let mut done = false;
        while !done {
            f(cursor.node());

            if cursor.goto_first_child() {
                continue;
            }
            loop {
                if cursor.goto_next_sibling() {
                    break;
                }
                if !cursor.goto_parent() {
                    done = true;
                    break;
                }
            }
        }
    }

    /// 1-based line of a node, offset by the caller's base line.
    pub fn line(node: Node, base_line: usize) -> usize {
        base_line + node.start_position().row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn parse_go(code: &str) -> tree_sitter::Tree {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .expect("go grammar");
        parser.parse(code, None).expect("parse")
    }

    #[test]
    fn walk_visits_every_named_node() {
        let tree = parse_go("package a\nfunc F() {}\n");
        let mut kinds = Vec::new();
        TsNodeUtils::walk(tree.root_node(), &mut |n| {
            if n.is_named() {
                kinds.push(n.kind().to_string());
            }
        });
        assert!(kinds.iter().any(|k| k == "function_declaration"));
        assert!(kinds.iter().any(|k| k == "identifier"));
    }

    #[test]
    fn child_by_kind_finds_direct_children_only() {
        let code = "package a\nfunc F() {}\n";
        let tree = parse_go(code);
        let root = tree.root_node();
        assert!(TsNodeUtils::child_by_kind(root, "function_declaration").is_some());
        // identifier is nested below function_declaration, not direct
        assert!(TsNodeUtils::child_by_kind(root, "identifier").is_none());
    }
}
