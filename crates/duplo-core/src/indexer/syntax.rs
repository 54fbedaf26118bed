//! Symbol extraction from tree-sitter syntax trees.
//!
//! Python, Java, Go and TypeScript are parsed with their native grammars;
//! JavaScript and JSX go through the TSX grammar. Working on the tree means
//! declarations whose signatures or imports span several lines are found
//! like any other. Languages without a grammar, and sources the parser
//! cannot make sense of, yield `None` so the caller can fall back to line
//! scanning.

use tracing::debug;
use tree_sitter::{Language, Node, Parser, Tree};

use crate::indexer::symbols::{normalize_type_name, value_kind, SymbolBuilder};
use crate::models::{Parameter, Symbol, SymbolKind};

const SKIPPED_PARAMETERS: &[&str] = &["self", "cls", "this"];

/// Statement kinds whose children may still declare module-level symbols.
const PY_CONTAINERS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "else_clause",
    "try_statement",
    "except_clause",
    "finally_clause",
    "with_statement",
    "block",
];

/// Grammar for `language`, or `None` when only line scanning is available.
pub fn grammar_for(language: &str, file_path: &str) -> Option<Language> {
    let jsx = file_path.ends_with(".tsx") || file_path.ends_with(".jsx");
    let grammar = match language {
        "python" => tree_sitter_python::LANGUAGE,
        "java" => tree_sitter_java::LANGUAGE,
        "go" => tree_sitter_go::LANGUAGE,
        "typescript" if !jsx => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
        "typescript" | "javascript" => tree_sitter_typescript::LANGUAGE_TSX,
        _ => return None,
    };
    Some(grammar.into())
}

pub fn parse(source: &str, file_path: &str, language: &str) -> Option<Tree> {
    let grammar = grammar_for(language, file_path)?;
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&grammar) {
        debug!(language, error = %e, "grammar rejected by the parser");
        return None;
    }
    parser.parse(source, None)
}

/// Extract symbols from a syntax tree of `source`.
///
/// `None` when `language` has no grammar, parsing fails, or the tree is
/// broken and yielded nothing.
pub fn extract(source: &str, file_path: &str, language: &str) -> Option<Vec<Symbol>> {
    let tree = parse(source, file_path, language)?;
    let root = tree.root_node();
    let lines: Vec<&str> = source.lines().collect();
    let mut walker = Walker {
        src: source.as_bytes(),
        builder: SymbolBuilder::new(&lines, file_path),
    };
    match language {
        "python" => walker.python(root, None, true),
        "java" => walker.java(root, None),
        "go" => walker.go(root),
        _ => walker.typescript(root, None, true),
    }
    let symbols = walker.builder.finish();
    if symbols.is_empty() && root.has_error() {
        debug!(file = file_path, "syntax errors and no symbols; falling back to line scanning");
        return None;
    }
    Some(symbols)
}

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

/// First and last 0-based line of `node`. A node that ends at column 0 ends
/// on the line before.
fn rows(node: Node<'_>) -> (usize, usize) {
    let start = node.start_position().row;
    let end = node.end_position();
    let last = if end.column == 0 && end.row > start {
        end.row - 1
    } else {
        end.row
    };
    (start, last)
}

fn type_text(raw: &str) -> Option<String> {
    normalize_type_name(Some(raw.trim_start().trim_start_matches(':')))
}

fn unquote(raw: &str) -> &str {
    raw.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

struct Walker<'a> {
    src: &'a [u8],
    builder: SymbolBuilder<'a>,
}

impl<'a> Walker<'a> {
    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.src).unwrap_or("")
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<&'a str> {
        node.child_by_field_name(field)
            .map(|n| self.text(n))
            .filter(|t| !t.is_empty())
    }

    /// Push a function or method named by the node's `name` field.
    fn callable(
        &mut self,
        node: Node<'_>,
        kind: SymbolKind,
        scope: Option<&str>,
        return_field: &str,
    ) {
        let Some(name) = self.field_text(node, "name") else {
            return;
        };
        let parameters = self.parameters(node.child_by_field_name("parameters"));
        let return_type = self.field_text(node, return_field).and_then(type_text);
        let (start, end) = rows(node);
        let symbol = self.builder.push(name, kind, start, end);
        symbol.parameters = parameters;
        symbol.return_type = return_type;
        symbol.scope = scope.map(str::to_string);
    }

    fn parameters(&self, list: Option<Node<'_>>) -> Vec<Parameter> {
        let mut parameters = Vec::new();
        let Some(list) = list else {
            return parameters;
        };
        // A bare arrow-function parameter is the list itself.
        let entries = if list.kind() == "identifier" {
            vec![list]
        } else {
            children(list)
        };
        for param in entries {
            let type_ = self.field_text(param, "type").and_then(type_text);
            for name in self.parameter_names(param) {
                let name = name.trim_start_matches(['*', '&', '.']);
                // Destructuring patterns have no single name.
                let plain = name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$');
                if name.is_empty() || !plain || SKIPPED_PARAMETERS.contains(&name) {
                    continue;
                }
                let position = parameters.len() as i64;
                parameters.push(Parameter {
                    name: name.to_string(),
                    type_: type_.clone(),
                    position,
                });
            }
        }
        parameters
    }

    fn parameter_names(&self, param: Node<'_>) -> Vec<&'a str> {
        match param.kind() {
            "identifier" => return vec![self.text(param)],
            "comment" => return Vec::new(),
            _ => {}
        }
        let named: Vec<&'a str> = field_children(param, "name")
            .into_iter()
            .map(|n| self.text(n))
            .collect();
        if !named.is_empty() {
            return named;
        }
        if let Some(pattern) = param.child_by_field_name("pattern") {
            return vec![self.text(pattern)];
        }
        children(param)
            .into_iter()
            .find_map(|child| match child.kind() {
                "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    Some(self.text(child))
                }
                "variable_declarator" => self.field_text(child, "name"),
                _ => None,
            })
            .into_iter()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Python
    // -----------------------------------------------------------------------

    fn python(&mut self, node: Node<'_>, class: Option<&'a str>, top_level: bool) {
        for child in children(node) {
            match child.kind() {
                "import_statement" => self.python_import(child),
                "import_from_statement" => self.python_from_import(child),
                "decorated_definition" => self.python(child, class, top_level),
                "class_definition" => {
                    let Some(name) = self.field_text(child, "name") else {
                        continue;
                    };
                    let bases: Vec<String> = child
                        .child_by_field_name("superclasses")
                        .map(children)
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|b| !matches!(b.kind(), "keyword_argument" | "comment"))
                        .map(|b| {
                            let text = self.text(b);
                            match text.split_once('[') {
                                Some((head, _)) => match head.rsplit_once('.') {
                                    Some((_, last)) => text[head.len() - last.len()..].to_string(),
                                    None => text.to_string(),
                                },
                                None => text.rsplit('.').next().unwrap_or(text).to_string(),
                            }
                        })
                        .filter(|b| !b.is_empty() && b != "object")
                        .collect();
                    let (start, end) = rows(child);
                    let symbol = self.builder.push(name, SymbolKind::Class, start, end);
                    symbol.bases = bases;
                    symbol.scope = class.map(str::to_string);
                    if let Some(body) = child.child_by_field_name("body") {
                        self.python(body, Some(name), false);
                    }
                }
                "function_definition" => {
                    let kind = if class.is_some() {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    };
                    self.callable(child, kind, class, "return_type");
                    if let Some(body) = child.child_by_field_name("body") {
                        self.python(body, None, false);
                    }
                }
                "expression_statement" if top_level => {
                    let assignments = children(child)
                        .into_iter()
                        .filter(|s| s.kind() == "assignment");
                    for assignment in assignments {
                        let Some(left) = assignment
                            .child_by_field_name("left")
                            .filter(|l| l.kind() == "identifier")
                        else {
                            continue;
                        };
                        let name = self.text(left);
                        let (start, end) = rows(child);
                        self.builder.push(name, value_kind(name), start, end);
                    }
                }
                kind if PY_CONTAINERS.contains(&kind) => self.python(child, class, top_level),
                _ => {}
            }
        }
    }

    fn python_import(&mut self, node: Node<'_>) {
        for name in field_children(node, "name") {
            let module = if name.kind() == "aliased_import" {
                self.field_text(name, "name")
            } else {
                Some(self.text(name))
            };
            if let Some(module) = module.filter(|m| !m.is_empty()) {
                self.builder.push_import(module, module, rows(name).0);
            }
        }
    }

    fn python_from_import(&mut self, node: Node<'_>) {
        let Some(module) = self
            .field_text(node, "module_name")
            .map(|m| m.trim_start_matches('.'))
        else {
            return;
        };
        for name in field_children(node, "name") {
            let local = if name.kind() == "aliased_import" {
                self.field_text(name, "alias")
            } else {
                Some(self.text(name))
            };
            if let Some(local) = local.filter(|l| !l.is_empty()) {
                self.builder.push_import(local, module, rows(name).0);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Java
    // -----------------------------------------------------------------------

    fn java(&mut self, node: Node<'_>, class: Option<&'a str>) {
        for child in children(node) {
            match child.kind() {
                "import_declaration" => {
                    let parts = children(child);
                    if parts.iter().any(|p| p.kind() == "asterisk") {
                        continue;
                    }
                    let Some(path) = parts
                        .iter()
                        .find(|p| matches!(p.kind(), "scoped_identifier" | "identifier"))
                        .map(|p| self.text(*p))
                    else {
                        continue;
                    };
                    let name = path.rsplit('.').next().unwrap_or(path);
                    self.builder.push_import(name, path, rows(child).0);
                }
                "class_declaration" | "interface_declaration" | "enum_declaration"
                | "record_declaration" => {
                    let Some(name) = self.field_text(child, "name") else {
                        continue;
                    };
                    let kind = if child.kind() == "interface_declaration" {
                        SymbolKind::Interface
                    } else {
                        SymbolKind::Class
                    };
                    let bases = child
                        .child_by_field_name("superclass")
                        .and_then(|s| s.named_child(0))
                        .map(|t| vec![self.text(t).to_string()])
                        .unwrap_or_default();
                    let (start, end) = rows(child);
                    let symbol = self.builder.push(name, kind, start, end);
                    symbol.bases = bases;
                    symbol.scope = class.map(str::to_string);
                    if let Some(body) = child.child_by_field_name("body") {
                        self.java(body, Some(name));
                    }
                }
                "enum_body_declarations" => self.java(child, class),
                "method_declaration" | "constructor_declaration" if class.is_some() => {
                    self.callable(child, SymbolKind::Method, class, "type");
                }
                "field_declaration" => {
                    let modifiers = children(child)
                        .into_iter()
                        .find(|c| c.kind() == "modifiers")
                        .map(|m| self.text(m))
                        .unwrap_or("");
                    if !(modifiers.contains("static") && modifiers.contains("final")) {
                        continue;
                    }
                    for declarator in field_children(child, "declarator") {
                        let Some(name) = self
                            .field_text(declarator, "name")
                            .filter(|n| value_kind(n) == SymbolKind::Constant)
                        else {
                            continue;
                        };
                        let row = rows(declarator).0;
                        self.builder.push(name, SymbolKind::Constant, row, row);
                    }
                }
                _ => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // TypeScript / JavaScript
    // -----------------------------------------------------------------------

    fn typescript(&mut self, node: Node<'_>, class: Option<&'a str>, top_level: bool) {
        for child in children(node) {
            match child.kind() {
                "import_statement" => self.typescript_import(child),
                "export_statement" => self.typescript(child, class, top_level),
                "class_declaration" | "abstract_class_declaration" => {
                    let Some(name) = self.field_text(child, "name") else {
                        continue;
                    };
                    let bases: Vec<String> = children(child)
                        .into_iter()
                        .filter(|c| c.kind() == "class_heritage")
                        .flat_map(children)
                        .filter(|c| c.kind() == "extends_clause")
                        .flat_map(|c| field_children(c, "value"))
                        .map(|v| self.text(v).to_string())
                        .collect();
                    let (start, end) = rows(child);
                    let symbol = self.builder.push(name, SymbolKind::Class, start, end);
                    symbol.bases = bases;
                    if let Some(body) = child.child_by_field_name("body") {
                        self.typescript(body, Some(name), false);
                    }
                }
                "interface_declaration" | "type_alias_declaration" => {
                    let Some(name) = self.field_text(child, "name") else {
                        continue;
                    };
                    let kind = if child.kind() == "interface_declaration" {
                        SymbolKind::Interface
                    } else {
                        SymbolKind::Type
                    };
                    let (start, end) = rows(child);
                    self.builder.push(name, kind, start, end);
                }
                "function_declaration" | "generator_function_declaration" => {
                    self.callable(child, SymbolKind::Function, None, "return_type");
                }
                "method_definition" if class.is_some() => {
                    self.callable(child, SymbolKind::Method, class, "return_type");
                }
                "lexical_declaration" | "variable_declaration" if top_level => {
                    self.typescript_declarators(child);
                }
                _ => {}
            }
        }
    }

    fn typescript_declarators(&mut self, declaration: Node<'_>) {
        let (start, end) = rows(declaration);
        for declarator in children(declaration)
            .into_iter()
            .filter(|d| d.kind() == "variable_declarator")
        {
            let Some(name) = declarator
                .child_by_field_name("name")
                .filter(|n| n.kind() == "identifier")
                .map(|n| self.text(n))
            else {
                continue;
            };
            match declarator.child_by_field_name("value") {
                Some(value)
                    if matches!(
                        value.kind(),
                        "arrow_function" | "function_expression" | "function" | "generator_function"
                    ) =>
                {
                    let list = value
                        .child_by_field_name("parameters")
                        .or_else(|| value.child_by_field_name("parameter"));
                    let parameters = self.parameters(list);
                    let return_type = self.field_text(value, "return_type").and_then(type_text);
                    let symbol = self.builder.push(name, SymbolKind::Function, start, end);
                    symbol.parameters = parameters;
                    symbol.return_type = return_type;
                }
                _ => {
                    self.builder.push(name, value_kind(name), start, end);
                }
            }
        }
    }

    fn typescript_import(&mut self, node: Node<'_>) {
        let Some(source) = self.field_text(node, "source").map(unquote) else {
            return;
        };
        for clause in children(node).into_iter().filter(|c| c.kind() == "import_clause") {
            for part in children(clause) {
                match part.kind() {
                    "identifier" => {
                        let local = self.text(part);
                        self.builder.push_import(local, source, rows(part).0);
                    }
                    "namespace_import" => {
                        let alias = children(part)
                            .into_iter()
                            .find(|c| c.kind() == "identifier");
                        if let Some(alias) = alias {
                            let local = self.text(alias);
                            self.builder.push_import(local, source, rows(alias).0);
                        }
                    }
                    "named_imports" => {
                        let specs = children(part)
                            .into_iter()
                            .filter(|s| s.kind() == "import_specifier");
                        for spec in specs {
                            let local = self
                                .field_text(spec, "alias")
                                .or_else(|| self.field_text(spec, "name"));
                            if let Some(local) = local {
                                self.builder.push_import(local, source, rows(spec).0);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Go
    // -----------------------------------------------------------------------

    fn go(&mut self, node: Node<'_>) {
        for child in children(node) {
            match child.kind() {
                "import_declaration" => self.go_imports(child),
                "function_declaration" => {
                    self.callable(child, SymbolKind::Function, None, "result");
                }
                "method_declaration" => {
                    let receiver = child
                        .child_by_field_name("receiver")
                        .and_then(|r| {
                            children(r)
                                .into_iter()
                                .find(|p| p.kind() == "parameter_declaration")
                        })
                        .and_then(|p| self.field_text(p, "type"))
                        .map(|t| t.trim_start_matches('*').split('[').next().unwrap_or("").trim())
                        .filter(|t| !t.is_empty());
                    self.callable(child, SymbolKind::Method, receiver, "result");
                }
                "type_declaration" => {
                    for spec in children(child)
                        .into_iter()
                        .filter(|s| matches!(s.kind(), "type_spec" | "type_alias"))
                    {
                        let Some(name) = self.field_text(spec, "name") else {
                            continue;
                        };
                        let kind = match spec.child_by_field_name("type").map(|t| t.kind()) {
                            Some("interface_type") => SymbolKind::Interface,
                            Some("struct_type") => SymbolKind::Class,
                            _ => SymbolKind::Type,
                        };
                        let (start, end) = rows(spec);
                        self.builder.push(name, kind, start, end);
                    }
                }
                "const_declaration" => {
                    for spec in children(child).into_iter().filter(|s| s.kind() == "const_spec") {
                        let row = rows(spec).0;
                        for name in field_children(spec, "name") {
                            let name = self.text(name);
                            self.builder.push(name, SymbolKind::Constant, row, row);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn go_imports(&mut self, declaration: Node<'_>) {
        let mut specs = Vec::new();
        for child in children(declaration) {
            match child.kind() {
                "import_spec" => specs.push(child),
                "import_spec_list" => specs.extend(
                    children(child)
                        .into_iter()
                        .filter(|s| s.kind() == "import_spec"),
                ),
                _ => {}
            }
        }
        for spec in specs {
            let Some(path) = self.field_text(spec, "path").map(unquote) else {
                continue;
            };
            let name = self
                .field_text(spec, "name")
                .filter(|alias| !matches!(*alias, "_" | "."))
                .unwrap_or_else(|| path.rsplit('/').next().unwrap_or(path));
            self.builder.push_import(name, path, rows(spec).0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(symbols: &'a [Symbol], name: &str) -> &'a Symbol {
        symbols
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("symbol {} not extracted", name))
    }

    #[test]
    fn test_grammar_coverage() {
        for language in ["python", "java", "go", "typescript", "javascript"] {
            assert!(grammar_for(language, "x").is_some(), "{language}");
        }
        assert!(grammar_for("rust", "lib.rs").is_none());
        assert!(extract("fn main() {}", "main.rs", "rust").is_none());
    }

    #[test]
    fn test_python_multiline_signature() {
        let src = "def validate_email(\n    address,\n    strict=False,\n):\n    ...\n";
        let symbols = extract(src, "a.py", "python").unwrap();
        let func = find(&symbols, "validate_email");
        assert_eq!(func.kind, SymbolKind::Function);
        assert_eq!((func.line, func.end_line), (1, 5));
        let names: Vec<&str> = func.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["address", "strict"]);
    }

    #[test]
    fn test_python_black_style_method_and_imports() {
        let src = "\
from app.models import (
    Account,
    Ledger as Book,
)


class Service(base.Handler, Generic[K, V], metaclass=Meta):
    @cached
    async def reconcile(
        self,
        account: Account,
        *entries: Book,
        limit: int = 10,
    ) -> Report:
        for entry in entries:
            if entry.ok:
                continue
        return Report()
";
        let symbols = extract(src, "svc/service.py", "python").unwrap();
        let book = find(&symbols, "Book");
        assert!(book.is_import);
        assert_eq!(book.import_source.as_deref(), Some("app.models"));
        assert_eq!(book.line, 3);
        assert_eq!(find(&symbols, "Account").line, 2);

        let service = find(&symbols, "Service");
        assert_eq!(service.bases, vec!["Handler".to_string(), "Generic[K, V]".to_string()]);

        let reconcile = find(&symbols, "reconcile");
        assert_eq!(reconcile.kind, SymbolKind::Method);
        assert_eq!(reconcile.scope.as_deref(), Some("Service"));
        assert_eq!((reconcile.line, reconcile.end_line), (9, 18));
        assert_eq!(reconcile.return_type.as_deref(), Some("Report"));
        let params: Vec<(&str, Option<&str>)> = reconcile
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.type_.as_deref()))
            .collect();
        assert_eq!(
            params,
            vec![("account", Some("Account")), ("entries", Some("Book")), ("limit", Some("int"))]
        );
        assert_eq!(reconcile.complexity, 3);
    }

    #[test]
    fn test_java_multiline_method() {
        let src = "\
import java.util.*;
import com.acme.Ledger;

public class Billing extends Base {
    public Invoice charge(
            Account account,
            int cents) {
        return new Invoice(account, cents);
    }
}
";
        let symbols = extract(src, "Billing.java", "java").unwrap();
        assert!(symbols.iter().all(|s| s.name != "*"));
        assert_eq!(find(&symbols, "Ledger").import_source.as_deref(), Some("com.acme.Ledger"));
        let charge = find(&symbols, "charge");
        assert_eq!(charge.scope.as_deref(), Some("Billing"));
        assert_eq!((charge.line, charge.end_line), (5, 9));
        assert_eq!(charge.return_type.as_deref(), Some("Invoice"));
        assert_eq!(charge.parameters.len(), 2);
        assert_eq!(charge.parameters[1].type_.as_deref(), Some("int"));
    }

    #[test]
    fn test_go_multiline_function_and_aliases() {
        let src = "\
package main

import (
    log \"github.com/acme/logging\"
    _ \"embed\"
)

func (s *Store[T]) Load(
    ctx context.Context,
    key, fallback string,
) (T, error) {
    return s.items[key], nil
}
";
        let symbols = extract(src, "store.go", "go").unwrap();
        assert_eq!(find(&symbols, "log").import_source.as_deref(), Some("github.com/acme/logging"));
        assert_eq!(find(&symbols, "embed").kind, SymbolKind::Import);
        let load = find(&symbols, "Load");
        assert_eq!(load.scope.as_deref(), Some("Store"));
        assert_eq!((load.line, load.end_line), (8, 13));
        let names: Vec<&str> = load.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["ctx", "key", "fallback"]);
        assert_eq!(load.return_type.as_deref(), Some("(T, error)"));
    }

    #[test]
    fn test_typescript_multiline_and_jsx() {
        let src = "\
import Default, * as ns from \"./lib\";

export async function fetchAll(
  client: Client,
  ids: string[],
): Promise<Item[]> {
  const label = \"}\";
  return client.get(ids);
}
";
        let symbols = extract(src, "api.ts", "typescript").unwrap();
        assert_eq!(find(&symbols, "Default").import_source.as_deref(), Some("./lib"));
        assert_eq!(find(&symbols, "ns").kind, SymbolKind::Import);
        let fetch = find(&symbols, "fetchAll");
        assert_eq!((fetch.line, fetch.end_line), (3, 9));
        assert_eq!(fetch.parameters[0].type_.as_deref(), Some("Client"));
        assert_eq!(fetch.return_type.as_deref(), Some("Promise<Item[]>"));

        let jsx = "export const Badge = ({ label }) => <span>{label}</span>;\n";
        let symbols = extract(jsx, "badge.jsx", "javascript").unwrap();
        assert_eq!(find(&symbols, "Badge").kind, SymbolKind::Function);
    }
}
