//! Python symbol extraction with tree-sitter.
//!
//! Definitions come from `def` (method when nested in a class), `class`,
//! and module-level UPPER_CASE assignments. Usages come from attribute
//! access on imported modules, type annotations, and direct references to
//! imported names outside declaration contexts.

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashSet;
use tree_sitter::{Node, Parser};

use crate::core::model::{Symbol, SymbolKind, SymbolRole};
use crate::core::symbols::Extraction;
use crate::infra::utils::TsNodeUtils;

pub fn extract(code: &str, file: &str, base_line: usize) -> Result<Extraction> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .context("load Python grammar")?;

    let tree = parser
        .parse(code, None)
        .ok_or_else(|| anyhow!("failed to parse Python source"))?;
    let bytes = code.as_bytes();
    let root = tree.root_node();

    let imports = collect_imports(root, bytes);
    let definitions = collect_definitions(root, bytes, file, base_line);
    let usages = collect_usages(root, bytes, file, base_line, &imports, &definitions);

    Ok(Extraction {
        definitions,
        usages,
        imports,
    })
}

/// Record `alias -> fully.qualified.path` for both import variants.
fn collect_imports(root: Node, bytes: &[u8]) -> IndexMap<String, String> {
    let mut imports = IndexMap::new();

    TsNodeUtils::walk(root, &mut |node| match node.kind() {
        // import module [as alias]
        "import_statement" => {
            for i in 0..node.child_count() {
                let Some(child) = node.child(i) else { continue };
                match child.kind() {
                    "dotted_name" => {
                        let module = TsNodeUtils::text(child, bytes).to_string();
                        let alias = module.rsplit('.').next().unwrap_or(&module).to_string();
                        imports.insert(alias, module);
                    }
                    "aliased_import" => {
                        let name = TsNodeUtils::child_by_kind(child, "dotted_name");
                        let alias = TsNodeUtils::child_by_kind(child, "identifier");
                        if let (Some(name), Some(alias)) = (name, alias) {
                            imports.insert(
                                TsNodeUtils::text(alias, bytes).to_string(),
                                TsNodeUtils::text(name, bytes).to_string(),
                            );
                        }
                    }
                    _ => {}
                }
            }
        }
        // from module import name [as alias], ...
        "import_from_statement" => {
            let Some(module_node) = node.child_by_field_name("module_name") else {
                return;
            };
            let module = TsNodeUtils::text(module_node, bytes).to_string();

            for i in 0..node.child_count() {
                let Some(child) = node.child(i) else { continue };
                if child.id() == module_node.id() {
                    continue;
                }
                match child.kind() {
                    "dotted_name" | "identifier" => {
                        let name = TsNodeUtils::text(child, bytes);
                        if !matches!(name, "import" | "from" | "as") && !name.is_empty() {
                            imports.insert(name.to_string(), format!("{module}.{name}"));
                        }
                    }
                    "aliased_import" => {
                        let name = TsNodeUtils::child_by_kind(child, "dotted_name")
                            .or_else(|| TsNodeUtils::child_by_kind(child, "identifier"));
                        if let Some(name_node) = name {
                            let name = TsNodeUtils::text(name_node, bytes).to_string();
                            let alias = (0..child.child_count())
                                .filter_map(|j| child.child(j))
                                .filter(|n| {
                                    n.kind() == "identifier" && n.id() != name_node.id()
                                })
                                .next_back()
                                .map(|n| TsNodeUtils::text(n, bytes).to_string())
                                .unwrap_or_else(|| name.clone());
                            imports.insert(alias, format!("{module}.{name}"));
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    });

    imports
}

/// Name of the nearest enclosing class, if any.
fn enclosing_class(node: Node, bytes: &[u8]) -> Option<String> {
    let mut cur = node;
    while let Some(p) = cur.parent() {
        if p.kind() == "class_definition" {
            return TsNodeUtils::field_text(p, "name", bytes).map(str::to_string);
        }
        cur = p;
    }
    None
}

fn in_callable(node: Node) -> bool {
    TsNodeUtils::has_ancestor(node, "function_definition")
        || TsNodeUtils::has_ancestor(node, "class_definition")
}

fn collect_definitions(root: Node, bytes: &[u8], file: &str, base_line: usize) -> Vec<Symbol> {
    let mut definitions = Vec::new();

    TsNodeUtils::walk(root, &mut |node| match node.kind() {
        "function_definition" => {
            if let Some(name) = TsNodeUtils::field_text(node, "name", bytes) {
                let scope = enclosing_class(node, bytes);
                let kind = if scope.is_some() {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                let mut sym =
                    Symbol::definition(name, kind, file, TsNodeUtils::line(node, base_line));
                sym.scope = scope;
                definitions.push(sym);
            }
        }
        "class_definition" => {
            if let Some(name) = TsNodeUtils::field_text(node, "name", bytes) {
                definitions.push(Symbol::definition(
                    name,
                    SymbolKind::Class,
                    file,
                    TsNodeUtils::line(node, base_line),
                ));
            }
        }
        // Module-level constants: UPPER_CASE assignments only
        "assignment" => {
            if in_callable(node) {
                return;
            }
            if let Some(left) = node.child_by_field_name("left")
                && left.kind() == "identifier"
            {
                let name = TsNodeUtils::text(left, bytes);
                let is_const = !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit());
                if is_const {
                    definitions.push(Symbol::definition(
                        name,
                        SymbolKind::Variable,
                        file,
                        TsNodeUtils::line(node, base_line),
                    ));
                }
            }
        }
        _ => {}
    });

    definitions
}

fn collect_usages(
    root: Node,
    bytes: &[u8],
    file: &str,
    base_line: usize,
    imports: &IndexMap<String, String>,
    definitions: &[Symbol],
) -> Vec<Symbol> {
    let mut usages = Vec::new();
    let mut seen: HashSet<(String, usize)> = HashSet::new();
    let defined: HashSet<&str> = definitions.iter().map(|d| d.name.as_str()).collect();
    let annotation_head = Regex::new(r"^([A-Z][a-zA-Z0-9_]*)").expect("static pattern");

    TsNodeUtils::walk(root, &mut |node| match node.kind() {
        // module.symbol attribute access
        "attribute" => {
            let obj = node.child_by_field_name("object");
            let attr = node.child_by_field_name("attribute");
            if let (Some(obj), Some(attr)) = (obj, attr)
                && obj.kind() == "identifier"
            {
                let obj_name = TsNodeUtils::text(obj, bytes);
                let attr_name = TsNodeUtils::text(attr, bytes);
                if imports.contains_key(obj_name) {
                    let qualified = format!("{obj_name}.{attr_name}");
                    let line = TsNodeUtils::line(node, base_line);
                    if seen.insert((qualified.clone(), line)) {
                        let is_call = node.parent().is_some_and(|p| p.kind() == "call");
                        let kind = if is_call || !attr_name.starts_with(char::is_uppercase) {
                            SymbolKind::Function
                        } else {
                            SymbolKind::Class
                        };
                        usages.push(Symbol {
                            name: attr_name.to_string(),
                            kind,
                            file: file.to_string(),
                            line,
                            role: SymbolRole::Usage,
                            package: Some(obj_name.to_string()),
                            qualified_name: Some(qualified),
                            scope: None,
                        });
                    }
                }
            }
        }
        // Annotations: name: Type / -> Type
        "type" => {
            let text = TsNodeUtils::text(node, bytes);
            if let Some(cap) = annotation_head.captures(text) {
                let type_name = &cap[1];
                if !defined.contains(type_name)
                    && let Some(qualified) = imports.get(type_name)
                {
                    let line = TsNodeUtils::line(node, base_line);
                    if seen.insert((qualified.clone(), line)) {
                        usages.push(Symbol {
                            name: type_name.to_string(),
                            kind: SymbolKind::Class,
                            file: file.to_string(),
                            line,
                            role: SymbolRole::Usage,
                            package: qualified.rsplit_once('.').map(|(p, _)| p.to_string()),
                            qualified_name: Some(qualified.clone()),
                            scope: None,
                        });
                    }
                }
            }
        }
        // Direct reference to a `from x import Name` binding
        "identifier" => {
            let name = TsNodeUtils::text(node, bytes);
            if !imports.contains_key(name) || defined.contains(name) {
                return;
            }
            let skip = node.parent().is_some_and(|p| {
                matches!(
                    p.kind(),
                    "import_statement"
                        | "import_from_statement"
                        | "function_definition"
                        | "class_definition"
                        | "aliased_import"
                        | "dotted_name"
                        | "attribute"
                        | "decorator"
                )
            });
            if skip {
                return;
            }
            let qualified = imports[name].clone();
            let line = TsNodeUtils::line(node, base_line);
            if seen.insert((qualified.clone(), line)) {
                let is_call = node.parent().is_some_and(|p| p.kind() == "call");
                let kind = if is_call || !name.starts_with(char::is_uppercase) {
                    SymbolKind::Function
                } else {
                    SymbolKind::Class
                };
                usages.push(Symbol {
                    name: name.to_string(),
                    kind,
                    file: file.to_string(),
                    line,
                    role: SymbolRole::Usage,
                    package: qualified.rsplit_once('.').map(|(p, _)| p.to_string()),
                    qualified_name: Some(qualified),
                    scope: None,
                });
            }
        }
        _ => {}
    });

    usages
}
