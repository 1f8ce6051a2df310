//! Java symbol extraction with tree-sitter.
//!
//! Definitions cover classes, interfaces, enums, methods, constructors, and
//! fields (scoped to their enclosing class). Usages come from imported type
//! references, static calls on uppercase receivers, scoped identifiers, and
//! object creation expressions. Imports register `SimpleName -> fully.qualified`.

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use std::collections::HashSet;
use tree_sitter::{Node, Parser};

use crate::core::model::{Symbol, SymbolKind, SymbolRole};
use crate::core::symbols::Extraction;
use crate::infra::utils::TsNodeUtils;

pub fn extract(code: &str, file: &str, base_line: usize) -> Result<Extraction> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_java::LANGUAGE.into())
        .context("load Java grammar")?;

    let tree = parser
        .parse(code, None)
        .ok_or_else(|| anyhow!("failed to parse Java source"))?;
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

fn collect_imports(root: Node, bytes: &[u8]) -> IndexMap<String, String> {
    let mut imports = IndexMap::new();

    TsNodeUtils::walk(root, &mut |node| {
        if node.kind() != "import_declaration" {
            return;
        }
        for i in 0..node.child_count() {
            let Some(child) = node.child(i) else { continue };
            match child.kind() {
                "scoped_identifier" => {
                    let full = TsNodeUtils::text(child, bytes).to_string();
                    let simple = full.rsplit('.').next().unwrap_or(&full);
                    if simple != "*" {
                        imports.insert(simple.to_string(), full.clone());
                    }
                }
                "identifier" => {
                    let name = TsNodeUtils::text(child, bytes).to_string();
                    imports.insert(name.clone(), name);
                }
                _ => {}
            }
        }
    });

    imports
}

fn enclosing_class(node: Node, bytes: &[u8]) -> Option<String> {
    let mut cur = node;
    while let Some(p) = cur.parent() {
        if matches!(p.kind(), "class_declaration" | "enum_declaration") {
            return TsNodeUtils::field_text(p, "name", bytes).map(str::to_string);
        }
        cur = p;
    }
    None
}

fn collect_definitions(root: Node, bytes: &[u8], file: &str, base_line: usize) -> Vec<Symbol> {
    let mut definitions = Vec::new();

    TsNodeUtils::walk(root, &mut |node| match node.kind() {
        "class_declaration" => {
            if let Some(name) = TsNodeUtils::field_text(node, "name", bytes) {
                definitions.push(Symbol::definition(
                    name,
                    SymbolKind::Class,
                    file,
                    TsNodeUtils::line(node, base_line),
                ));
            }
        }
        "interface_declaration" => {
            if let Some(name) = TsNodeUtils::field_text(node, "name", bytes) {
                definitions.push(Symbol::definition(
                    name,
                    SymbolKind::Interface,
                    file,
                    TsNodeUtils::line(node, base_line),
                ));
            }
        }
        "enum_declaration" => {
            if let Some(name) = TsNodeUtils::field_text(node, "name", bytes) {
                definitions.push(Symbol::definition(
                    name,
                    SymbolKind::Type,
                    file,
                    TsNodeUtils::line(node, base_line),
                ));
            }
        }
        "method_declaration" | "constructor_declaration" => {
            if let Some(name) = TsNodeUtils::field_text(node, "name", bytes) {
                let mut sym = Symbol::definition(
                    name,
                    SymbolKind::Method,
                    file,
                    TsNodeUtils::line(node, base_line),
                );
                sym.scope = enclosing_class(node, bytes);
                definitions.push(sym);
            }
        }
        "field_declaration" => {
            let Some(scope) = enclosing_class(node, bytes) else {
                return;
            };
            for i in 0..node.child_count() {
                let Some(child) = node.child(i) else { continue };
                if child.kind() != "variable_declarator" {
                    continue;
                }
                if let Some(name) = TsNodeUtils::field_text(child, "name", bytes) {
                    let mut sym = Symbol::definition(
                        name,
                        SymbolKind::Field,
                        file,
                        TsNodeUtils::line(node, base_line),
                    );
                    sym.scope = Some(scope.clone());
                    definitions.push(sym);
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

    TsNodeUtils::walk(root, &mut |node| match node.kind() {
        // Type position: fields, parameters, returns, generics
        "type_identifier" => {
            let name = TsNodeUtils::text(node, bytes);
            if defined.contains(name) {
                return;
            }
            let Some(full) = imports.get(name) else { return };
            let declaring = node.parent().is_some_and(|p| {
                matches!(
                    p.kind(),
                    "class_declaration" | "interface_declaration" | "enum_declaration"
                )
            });
            if declaring {
                return;
            }
            let line = TsNodeUtils::line(node, base_line);
            if seen.insert((full.clone(), line)) {
                usages.push(Symbol {
                    name: name.to_string(),
                    kind: SymbolKind::Class,
                    file: file.to_string(),
                    line,
                    role: SymbolRole::Usage,
                    package: full.rsplit_once('.').map(|(p, _)| p.to_string()),
                    qualified_name: Some(full.clone()),
                    scope: None,
                });
            }
        }
        // Static call on an imported class: ClassName.method()
        "method_invocation" => {
            let obj = node.child_by_field_name("object");
            let name = node.child_by_field_name("name");
            if let (Some(obj), Some(name)) = (obj, name)
                && obj.kind() == "identifier"
            {
                let obj_name = TsNodeUtils::text(obj, bytes);
                if imports.contains_key(obj_name) && obj_name.starts_with(char::is_uppercase) {
                    let method = TsNodeUtils::text(name, bytes);
                    let qualified = format!("{obj_name}.{method}");
                    let line = TsNodeUtils::line(node, base_line);
                    if seen.insert((qualified.clone(), line)) {
                        usages.push(Symbol {
                            name: method.to_string(),
                            kind: SymbolKind::Function,
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
        // package.Class or Class.STATIC_FIELD, outside import declarations
        "scoped_identifier" => {
            if TsNodeUtils::has_ancestor(node, "import_declaration") {
                return;
            }
            let text = TsNodeUtils::text(node, bytes);
            let parts: Vec<&str> = text.split('.').collect();
            if parts.len() < 2 {
                return;
            }
            let first = parts[0];
            let last = parts[parts.len() - 1];
            if imports.contains_key(first) || first.starts_with(char::is_uppercase) {
                let line = TsNodeUtils::line(node, base_line);
                if seen.insert((text.to_string(), line)) {
                    let kind = if last.starts_with(char::is_uppercase) {
                        SymbolKind::Class
                    } else {
                        SymbolKind::Function
                    };
                    usages.push(Symbol {
                        name: last.to_string(),
                        kind,
                        file: file.to_string(),
                        line,
                        role: SymbolRole::Usage,
                        package: Some(parts[..parts.len() - 1].join(".")),
                        qualified_name: Some(text.to_string()),
                        scope: None,
                    });
                }
            }
        }
        // new ClassName()
        "object_creation_expression" => {
            let Some(ty) = TsNodeUtils::child_by_kind(node, "type_identifier") else {
                return;
            };
            let type_name = TsNodeUtils::text(ty, bytes);
            if defined.contains(type_name) {
                return;
            }
            let Some(full) = imports.get(type_name) else { return };
            let line = TsNodeUtils::line(node, base_line);
            if seen.insert((full.clone(), line)) {
                usages.push(Symbol {
                    name: type_name.to_string(),
                    kind: SymbolKind::Class,
                    file: file.to_string(),
                    line,
                    role: SymbolRole::Usage,
                    package: full.rsplit_once('.').map(|(p, _)| p.to_string()),
                    qualified_name: Some(full.clone()),
                    scope: None,
                });
            }
        }
        _ => {}
    });

    usages
}
