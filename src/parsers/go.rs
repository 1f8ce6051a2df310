//! Go symbol extraction with tree-sitter.
//!
//! Captures function/method/type/const/var definitions, an import map with
//! aliased, blank, and dot imports, and qualified usages of the forms
//! `pkg.Symbol`, `*pkg.Type`, and `receiver.Type.Method()`.

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
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .context("load Go grammar")?;

    let tree = parser
        .parse(code, None)
        .ok_or_else(|| anyhow!("failed to parse Go source"))?;
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

/// Build alias -> import path, handling plain, aliased, blank, and dot forms.
fn collect_imports(root: Node, bytes: &[u8]) -> IndexMap<String, String> {
    let mut imports = IndexMap::new();

    TsNodeUtils::walk(root, &mut |node| {
        if node.kind() != "import_spec" {
            return;
        }

        let mut alias: Option<String> = None;
        let mut path: Option<String> = None;

        for i in 0..node.child_count() {
            let Some(child) = node.child(i) else { continue };
            match child.kind() {
                "package_identifier" => {
                    alias = Some(TsNodeUtils::text(child, bytes).to_string());
                }
                "interpreted_string_literal" => {
                    path = Some(TsNodeUtils::text(child, bytes).trim_matches('"').to_string());
                }
                "blank_identifier" => alias = Some("_".to_string()),
                "dot" => alias = Some(".".to_string()),
                _ => {}
            }
        }

        if let Some(path) = path {
            let alias = alias.unwrap_or_else(|| {
                path.rsplit('/').next().unwrap_or(path.as_str()).to_string()
            });
            imports.insert(alias, path);
        }
    });

    imports
}

fn collect_definitions(root: Node, bytes: &[u8], file: &str, base_line: usize) -> Vec<Symbol> {
    let mut definitions = Vec::new();

    TsNodeUtils::walk(root, &mut |node| match node.kind() {
        "function_declaration" => {
            if let Some(name) = TsNodeUtils::field_text(node, "name", bytes) {
                definitions.push(Symbol::definition(
                    name,
                    SymbolKind::Function,
                    file,
                    TsNodeUtils::line(node, base_line),
                ));
            }
        }
        "method_declaration" => {
            if let Some(name) = TsNodeUtils::field_text(node, "name", bytes) {
                let mut sym = Symbol::definition(
                    name,
                    SymbolKind::Method,
                    file,
                    TsNodeUtils::line(node, base_line),
                );
                sym.scope = receiver_type(node, bytes);
                definitions.push(sym);
            }
        }
        "type_spec" => {
            if let Some(name_node) = TsNodeUtils::child_by_kind(node, "type_identifier") {
                let kind = if TsNodeUtils::child_by_kind(node, "interface_type").is_some() {
                    SymbolKind::Interface
                } else {
                    SymbolKind::Type
                };
                definitions.push(Symbol::definition(
                    TsNodeUtils::text(name_node, bytes),
                    kind,
                    file,
                    TsNodeUtils::line(node, base_line),
                ));
            }
        }
        "const_spec" | "var_spec" => {
            if let Some(name_node) = TsNodeUtils::child_by_kind(node, "identifier") {
                definitions.push(Symbol::definition(
                    TsNodeUtils::text(name_node, bytes),
                    SymbolKind::Variable,
                    file,
                    TsNodeUtils::line(node, base_line),
                ));
            }
        }
        _ => {}
    });

    definitions
}

/// Receiver type for a method declaration, unwrapping pointer receivers.
fn receiver_type(method: Node, bytes: &[u8]) -> Option<String> {
    let receiver = TsNodeUtils::child_by_kind(method, "parameter_list")?;
    let param = TsNodeUtils::child_by_kind(receiver, "parameter_declaration")?;

    if let Some(t) = TsNodeUtils::child_by_kind(param, "type_identifier") {
        return Some(TsNodeUtils::text(t, bytes).to_string());
    }
    if let Some(ptr) = TsNodeUtils::child_by_kind(param, "pointer_type")
        && let Some(t) = TsNodeUtils::child_by_kind(ptr, "type_identifier")
    {
        return Some(TsNodeUtils::text(t, bytes).to_string());
    }
    None
}

/// The identifier chain of a (possibly nested) selector expression:
/// `t.CodeGraph.Update` -> ["t", "CodeGraph", "Update"].
fn selector_chain(node: Node, bytes: &[u8]) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = Some(node);

    while let Some(cur) = current {
        match cur.kind() {
            "selector_expression" => {
                if let Some(field) = TsNodeUtils::child_by_kind(cur, "field_identifier") {
                    chain.insert(0, TsNodeUtils::text(field, bytes).to_string());
                }
                current = (0..cur.child_count())
                    .filter_map(|i| cur.child(i))
                    .find(|c| matches!(c.kind(), "identifier" | "selector_expression"));
            }
            "identifier" => {
                chain.insert(0, TsNodeUtils::text(cur, bytes).to_string());
                break;
            }
            _ => break,
        }
    }

    chain
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

    TsNodeUtils::walk(root, &mut |node| {
        match node.kind() {
            "selector_expression" => {
                let chain = selector_chain(node, bytes);
                if chain.len() < 2 {
                    return;
                }
                let first = &chain[0];
                let last = &chain[chain.len() - 1];
                let line = TsNodeUtils::line(node, base_line);
                let is_call = node.parent().is_some_and(|p| p.kind() == "call_expression");

                if imports.contains_key(first) {
                    // Direct pkg.Symbol reference
                    if chain.len() == 2 {
                        let qualified = format!("{first}.{last}");
                        if seen.insert((qualified.clone(), line)) {
                            let kind = if is_call {
                                SymbolKind::Function
                            } else if last.starts_with(char::is_uppercase) {
                                SymbolKind::Type
                            } else {
                                SymbolKind::Function
                            };
                            usages.push(Symbol {
                                name: last.clone(),
                                kind,
                                file: file.to_string(),
                                line,
                                role: SymbolRole::Usage,
                                package: Some(first.clone()),
                                qualified_name: Some(qualified),
                                scope: None,
                            });
                        }
                    }
                } else if is_call && !defined.contains(last.as_str()) {
                    // Method call through a receiver chain; the uppercase
                    // segment before the method acts as a Type.Method hint
                    let hint = &chain[chain.len() - 2];
                    let qualified = if hint.starts_with(char::is_uppercase) {
                        format!("{hint}.{last}")
                    } else {
                        last.clone()
                    };
                    if seen.insert((qualified.clone(), line)) {
                        usages.push(Symbol {
                            name: last.clone(),
                            kind: SymbolKind::Method,
                            file: file.to_string(),
                            line,
                            role: SymbolRole::Usage,
                            package: hint
                                .starts_with(char::is_uppercase)
                                .then(|| hint.clone()),
                            qualified_name: Some(qualified),
                            scope: None,
                        });
                    }
                }
            }
            "qualified_type" => {
                // Type position: *pkg.Type, fields, params, returns
                let pkg = TsNodeUtils::child_by_kind(node, "package_identifier");
                let ty = TsNodeUtils::child_by_kind(node, "type_identifier");
                if let (Some(pkg), Some(ty)) = (pkg, ty) {
                    let alias = TsNodeUtils::text(pkg, bytes);
                    let type_name = TsNodeUtils::text(ty, bytes);
                    if imports.contains_key(alias) {
                        let qualified = format!("{alias}.{type_name}");
                        let line = TsNodeUtils::line(node, base_line);
                        if seen.insert((qualified.clone(), line)) {
                            usages.push(Symbol {
                                name: type_name.to_string(),
                                kind: SymbolKind::Type,
                                file: file.to_string(),
                                line,
                                role: SymbolRole::Usage,
                                package: Some(alias.to_string()),
                                qualified_name: Some(qualified),
                                scope: None,
                            });
                        }
                    }
                }
            }
            _ => {}
        }
    });

    usages
}
