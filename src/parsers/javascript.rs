//! JavaScript / TypeScript symbol extraction with tree-sitter.
//!
//! One extractor covers both languages: the TypeScript grammar is a
//! superset, so TS-only node kinds (interfaces, type aliases, type
//! identifiers) simply never match when parsing plain JavaScript.

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use std::collections::HashSet;
use tree_sitter::{Node, Parser};

use crate::core::model::{Symbol, SymbolKind, SymbolRole};
use crate::core::symbols::Extraction;
use crate::infra::utils::TsNodeUtils;

/// Extract from JS (`typescript=false`) or TS/TSX source.
pub fn extract(code: &str, file: &str, base_line: usize, tsx: bool) -> Result<Extraction> {
    let language: tree_sitter::Language = if file.ends_with(".ts") || file.ends_with(".tsx") {
        if tsx {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        } else {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        }
    } else {
        tree_sitter_javascript::LANGUAGE.into()
    };

    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .context("load JS/TS grammar")?;

    let tree = parser
        .parse(code, None)
        .ok_or_else(|| anyhow!("failed to parse JS/TS source"))?;
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

/// Default, named, and namespace import forms.
fn collect_imports(root: Node, bytes: &[u8]) -> IndexMap<String, String> {
    let mut imports = IndexMap::new();

    TsNodeUtils::walk(root, &mut |node| {
        if node.kind() != "import_statement" {
            return;
        }
        let Some(source) = node.child_by_field_name("source") else {
            return;
        };
        let module = TsNodeUtils::text(source, bytes)
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();

        let Some(clause) = TsNodeUtils::child_by_kind(node, "import_clause") else {
            return;
        };

        for i in 0..clause.child_count() {
            let Some(child) = clause.child(i) else { continue };
            match child.kind() {
                // import Foo from 'module'
                "identifier" => {
                    imports.insert(TsNodeUtils::text(child, bytes).to_string(), module.clone());
                }
                // import { Foo, Bar as Baz } from 'module'
                "named_imports" => {
                    for j in 0..child.child_count() {
                        let Some(spec) = child.child(j) else { continue };
                        if spec.kind() != "import_specifier" {
                            continue;
                        }
                        let bound = spec
                            .child_by_field_name("alias")
                            .or_else(|| spec.child_by_field_name("name"));
                        if let Some(bound) = bound {
                            imports.insert(
                                TsNodeUtils::text(bound, bytes).to_string(),
                                module.clone(),
                            );
                        }
                    }
                }
                // import * as Foo from 'module'
                "namespace_import" => {
                    if let Some(id) = TsNodeUtils::child_by_kind(child, "identifier") {
                        imports
                            .insert(TsNodeUtils::text(id, bytes).to_string(), module.clone());
                    }
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
        if p.kind() == "class_declaration" {
            return TsNodeUtils::field_text(p, "name", bytes).map(str::to_string);
        }
        cur = p;
    }
    None
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
        "method_definition" => {
            if let Some(scope) = enclosing_class(node, bytes)
                && let Some(name) = TsNodeUtils::field_text(node, "name", bytes)
            {
                let mut sym = Symbol::definition(
                    name,
                    SymbolKind::Method,
                    file,
                    TsNodeUtils::line(node, base_line),
                );
                sym.scope = Some(scope);
                definitions.push(sym);
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
        "type_alias_declaration" => {
            if let Some(name) = TsNodeUtils::field_text(node, "name", bytes) {
                definitions.push(Symbol::definition(
                    name,
                    SymbolKind::Type,
                    file,
                    TsNodeUtils::line(node, base_line),
                ));
            }
        }
        // const foo = () => {}, const Foo = class {}
        "variable_declarator" => {
            let name = node.child_by_field_name("name");
            let value = node.child_by_field_name("value");
            if let (Some(name), Some(value)) = (name, value)
                && name.kind() == "identifier"
            {
                let kind = match value.kind() {
                    "arrow_function" | "function_expression" | "function" => {
                        Some(SymbolKind::Function)
                    }
                    "class" => Some(SymbolKind::Class),
                    _ => None,
                };
                if let Some(kind) = kind {
                    definitions.push(Symbol::definition(
                        TsNodeUtils::text(name, bytes),
                        kind,
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

    TsNodeUtils::walk(root, &mut |node| match node.kind() {
        // module.symbol member access
        "member_expression" => {
            let obj = node.child_by_field_name("object");
            let prop = node.child_by_field_name("property");
            if let (Some(obj), Some(prop)) = (obj, prop)
                && obj.kind() == "identifier"
            {
                let obj_name = TsNodeUtils::text(obj, bytes);
                let prop_name = TsNodeUtils::text(prop, bytes);
                if imports.contains_key(obj_name) {
                    let qualified = format!("{obj_name}.{prop_name}");
                    let line = TsNodeUtils::line(node, base_line);
                    if seen.insert((qualified.clone(), line)) {
                        let is_call =
                            node.parent().is_some_and(|p| p.kind() == "call_expression");
                        let kind = if is_call || !prop_name.starts_with(char::is_uppercase) {
                            SymbolKind::Function
                        } else {
                            SymbolKind::Class
                        };
                        usages.push(Symbol {
                            name: prop_name.to_string(),
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
        // Direct reference to an imported binding
        "identifier" => {
            let name = TsNodeUtils::text(node, bytes);
            if !imports.contains_key(name) || defined.contains(name) {
                return;
            }
            let skip = node.parent().is_some_and(|p| {
                matches!(
                    p.kind(),
                    "import_statement"
                        | "import_specifier"
                        | "import_clause"
                        | "function_declaration"
                        | "class_declaration"
                        | "variable_declarator"
                        | "member_expression"
                        | "namespace_import"
                )
            });
            if skip {
                return;
            }
            let module = &imports[name];
            let qualified = format!("{module}.{name}");
            let line = TsNodeUtils::line(node, base_line);
            if seen.insert((qualified.clone(), line)) {
                let is_call = node.parent().is_some_and(|p| p.kind() == "call_expression");
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
                    package: Some(module.clone()),
                    qualified_name: Some(qualified),
                    scope: None,
                });
            }
        }
        // TypeScript type references
        "type_identifier" => {
            let name = TsNodeUtils::text(node, bytes);
            if !imports.contains_key(name) || defined.contains(name) {
                return;
            }
            let skip = node.parent().is_some_and(|p| {
                matches!(
                    p.kind(),
                    "interface_declaration" | "type_alias_declaration" | "class_declaration"
                )
            });
            if skip {
                return;
            }
            let module = &imports[name];
            let qualified = format!("{module}.{name}");
            let line = TsNodeUtils::line(node, base_line);
            if seen.insert((qualified.clone(), line)) {
                usages.push(Symbol {
                    name: name.to_string(),
                    kind: SymbolKind::Type,
                    file: file.to_string(),
                    line,
                    role: SymbolRole::Usage,
                    package: Some(module.clone()),
                    qualified_name: Some(qualified),
                    scope: None,
                });
            }
        }
        _ => {}
    });

    usages
}
