//! Language dispatch for symbol extraction.
//!
//! Each supported language gets an AST-backed extractor under
//! `crate::parsers`; everything else goes through a conservative regex
//! fallback that may miss usages but never fabricates qualified names.

use indexmap::IndexMap;
use regex::Regex;
use tracing::warn;

use crate::core::model::{Symbol, SymbolKind, SymbolRole};
use crate::parsers::{go, java, javascript, python};

/// One extraction pass over a hunk's added lines.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Symbols declared by this code
    pub definitions: Vec<Symbol>,

    /// Qualified references to external symbols
    pub usages: Vec<Symbol>,

    /// Import alias -> full module/package path
    pub imports: IndexMap<String, String>,
}

impl Extraction {
    /// Drop duplicate symbols within this pass, keyed on
    /// (name, kind, role, package).
    pub fn dedup(mut self) -> Self {
        let mut seen = std::collections::HashSet::new();
        self.definitions.retain(|s| seen.insert(s.dedup_key()));
        let mut seen = std::collections::HashSet::new();
        self.usages.retain(|s| seen.insert(s.dedup_key()));
        self
    }
}

/// Language tag resolved from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Go,
    Python,
    Javascript,
    Typescript,
    Java,
    Rust,
    C,
    Cpp,
    Unknown,
}

impl Language {
    /// Map a file path to a language via the fixed extension table.
    pub fn from_path(path: &str) -> Self {
        let ext = match path.rsplit('.').next() {
            Some(e) if path.contains('.') => e,
            _ => return Self::Unknown,
        };
        match ext {
            "py" => Self::Python,
            "go" => Self::Go,
            "ts" | "tsx" => Self::Typescript,
            "js" | "jsx" => Self::Javascript,
            "java" => Self::Java,
            "rs" => Self::Rust,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "hpp" => Self::Cpp,
            _ => Self::Unknown,
        }
    }

    /// Canonical lowercase label, matching the metadata vocabulary.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Go => "go",
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Java => "java",
            Self::Rust => "rust",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Unknown => "unknown",
        }
    }

    /// Extract definitions, usages, and the import map from `code`.
    ///
    /// AST extraction failures degrade to the per-language regex fallback;
    /// languages without AST rules use regex from the start.
    pub fn extract_all(self, code: &str, file: &str, base_line: usize) -> Extraction {
        let attempted = match self {
            Self::Go => go::extract(code, file, base_line),
            Self::Python => python::extract(code, file, base_line),
            Self::Javascript => javascript::extract(code, file, base_line, false),
            Self::Typescript => {
                let tsx = file.ends_with(".tsx");
                javascript::extract(code, file, base_line, tsx)
            }
            Self::Java => java::extract(code, file, base_line),
            Self::Rust | Self::C | Self::Cpp | Self::Unknown => {
                return regex_fallback(self, code, file, base_line).dedup();
            }
        };

        match attempted {
            Ok(extraction) => extraction.dedup(),
            Err(err) => {
                warn!(language = self.as_str(), file, %err, "AST extraction failed, using regex fallback");
                regex_fallback(self, code, file, base_line).dedup()
            }
        }
    }
}

/// Conservative per-language regex patterns for definitions and imports.
///
/// Usages are only claimed for aliases the same pass registered as imports.
pub fn regex_fallback(language: Language, code: &str, file: &str, base_line: usize) -> Extraction {
    let mut out = Extraction::default();

    let patterns: &[(&str, SymbolKind)] = match language {
        Language::Python => &[
            (r"^\s*def\s+([a-zA-Z_][a-zA-Z0-9_]*)", SymbolKind::Function),
            (r"^\s*class\s+([a-zA-Z_][a-zA-Z0-9_]*)", SymbolKind::Class),
        ],
        Language::Go => &[
            (r"^\s*func\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(", SymbolKind::Function),
            (r"^\s*type\s+([A-Za-z_][A-Za-z0-9_]*)\s+struct", SymbolKind::Type),
            (
                r"^\s*type\s+([A-Za-z_][A-Za-z0-9_]*)\s+interface",
                SymbolKind::Interface,
            ),
        ],
        Language::Javascript => &[
            (
                r"^\s*(?:export\s+)?(?:async\s+)?function\s+([a-zA-Z_][a-zA-Z0-9_]*)",
                SymbolKind::Function,
            ),
            (r"^\s*(?:export\s+)?class\s+([a-zA-Z_][a-zA-Z0-9_]*)", SymbolKind::Class),
        ],
        Language::Typescript => &[
            (
                r"^\s*(?:export\s+)?(?:async\s+)?function\s+([a-zA-Z_][a-zA-Z0-9_]*)",
                SymbolKind::Function,
            ),
            (r"^\s*(?:export\s+)?class\s+([a-zA-Z_][a-zA-Z0-9_]*)", SymbolKind::Class),
            (
                r"^\s*(?:export\s+)?interface\s+([a-zA-Z_][a-zA-Z0-9_]*)",
                SymbolKind::Interface,
            ),
            (r"^\s*(?:export\s+)?type\s+([a-zA-Z_][a-zA-Z0-9_]*)", SymbolKind::Type),
        ],
        Language::Java => &[
            (
                r"^\s*(?:public\s+)?(?:abstract\s+)?(?:final\s+)?class\s+([a-zA-Z_][a-zA-Z0-9_]*)",
                SymbolKind::Class,
            ),
            (
                r"^\s*(?:public\s+)?interface\s+([a-zA-Z_][a-zA-Z0-9_]*)",
                SymbolKind::Interface,
            ),
        ],
        Language::Rust => &[
            (r"^\s*(?:pub\s+)?fn\s+([a-zA-Z_][a-zA-Z0-9_]*)", SymbolKind::Function),
            (r"^\s*(?:pub\s+)?struct\s+([a-zA-Z_][a-zA-Z0-9_]*)", SymbolKind::Type),
            (r"^\s*(?:pub\s+)?enum\s+([a-zA-Z_][a-zA-Z0-9_]*)", SymbolKind::Type),
            (r"^\s*(?:pub\s+)?trait\s+([a-zA-Z_][a-zA-Z0-9_]*)", SymbolKind::Interface),
        ],
        Language::C | Language::Cpp | Language::Unknown => &[],
    };

    let compiled: Vec<(Regex, SymbolKind)> = patterns
        .iter()
        .filter_map(|(pat, kind)| Regex::new(pat).ok().map(|re| (re, *kind)))
        .collect();

    let import_re = import_pattern(language);

    for (i, line) in code.lines().enumerate() {
        let line_num = base_line + i;

        for (re, kind) in &compiled {
            if let Some(cap) = re.captures(line)
                && let Some(name) = cap.get(1)
            {
                out.definitions
                    .push(Symbol::definition(name.as_str(), *kind, file, line_num));
            }
        }

        if let Some(re) = &import_re
            && let Some(cap) = re.captures(line)
            && let Some(path) = cap.get(1)
        {
            let path = path.as_str();
            let alias = path
                .rsplit(['.', '/', ':'])
                .next()
                .unwrap_or(path)
                .to_string();
            if !alias.is_empty() {
                out.imports.insert(alias, path.to_string());
            }
        }
    }

    // Qualified usages only for aliases seen in this same pass
    if !out.imports.is_empty() {
        let usage_re = Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\s*\.\s*([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static usage pattern");
        for (i, line) in code.lines().enumerate() {
            let line_num = base_line + i;
            for cap in usage_re.captures_iter(line) {
                let alias = &cap[1];
                let member = &cap[2];
                if out.imports.contains_key(alias) {
                    let kind = if member.starts_with(char::is_uppercase) {
                        SymbolKind::Type
                    } else {
                        SymbolKind::Function
                    };
                    out.usages.push(Symbol {
                        name: member.to_string(),
                        kind,
                        file: file.to_string(),
                        line: line_num,
                        role: SymbolRole::Usage,
                        package: Some(alias.to_string()),
                        qualified_name: Some(format!("{alias}.{member}")),
                        scope: None,
                    });
                }
            }
        }
    }

    out
}

fn import_pattern(language: Language) -> Option<Regex> {
    let pat = match language {
        Language::Python => r"^\s*(?:from|import)\s+([a-zA-Z_][a-zA-Z0-9_.]*)",
        Language::Go => r#"^\s*(?:import\s+)?"([^"]+)"\s*$"#,
        Language::Javascript | Language::Typescript => {
            r#"^\s*import\s+.*from\s+['"]([^'"]+)['"]"#
        }
        Language::Java => r"^\s*import\s+(?:static\s+)?([a-zA-Z_][a-zA-Z0-9_.]*)\s*;",
        Language::Rust => r"^\s*use\s+([a-zA-Z_][a-zA-Z0-9_:]*)",
        Language::C | Language::Cpp | Language::Unknown => return None,
    };
    Regex::new(pat).ok()
}
