// driver.rs — Public parse+check entry points
//
// Four entry points drive parse → build → check over a buffer or a file,
// in the classic textual syntax or the markup (JSON) form. Each returns
// true iff no error-severity diagnostic was emitted. The `newxta` flag
// selects the newer dialect and is passed through to the parser unchanged.
//
// Preconditions: none.
// Postconditions: the system and type table are replaced by the built
//   model; all diagnostics are in the sink.
// Failure modes: I/O errors from the file variants; everything else is a
//   diagnostic.
// Side effects: reads files (file variants only).

use std::io;
use std::path::Path;

use chumsky::span::SimpleSpan;
use serde::Deserialize;

use crate::ast::{self, Ident};
use crate::builder;
use crate::check;
use crate::diag::{Diagnostic, ErrorSink};
use crate::ir::{synth_span, System, TypeMap};
use crate::lexer::Token;
use crate::parser;

// ── Classic syntax ──────────────────────────────────────────────────────────

/// Parse and check a classic-syntax model from a buffer.
pub fn parse_xta_str(
    source: &str,
    system: &mut System,
    types: &mut TypeMap,
    sink: &mut ErrorSink,
    newxta: bool,
) -> bool {
    let parsed = parser::parse_document(source, newxta);
    report_parse_errors(parsed.errors, sink, None);
    if let Some(doc) = parsed.output {
        let result = builder::build(&doc);
        *system = result.system;
        *types = result.types;
        for diag in result.diagnostics {
            sink.push(diag);
        }
        check::check(system, types, sink);
    }
    !sink.has_errors()
}

/// Parse and check a classic-syntax model file.
pub fn parse_xta_file(
    path: &Path,
    system: &mut System,
    types: &mut TypeMap,
    sink: &mut ErrorSink,
    newxta: bool,
) -> io::Result<bool> {
    let source = std::fs::read_to_string(path)?;
    Ok(parse_xta_str(&source, system, types, sink, newxta))
}

// ── Markup form ─────────────────────────────────────────────────────────────
//
// A JSON document mirroring the markup layout of model files: template
// structure is explicit, while declarations, parameters, invariants and
// labels are embedded classic-syntax fragments.

#[derive(Debug, Deserialize)]
pub struct ModelDoc {
    /// Global declarations fragment.
    #[serde(default)]
    pub declaration: String,
    #[serde(default)]
    pub templates: Vec<TemplateDoc>,
    /// Instantiations and the `system` line.
    #[serde(default)]
    pub system: String,
    /// Query lines.
    #[serde(default)]
    pub queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateDoc {
    pub name: String,
    /// Parameter-list fragment, e.g. `int[0,10] &x, const bool b`.
    #[serde(default)]
    pub parameter: String,
    /// Template-local declarations fragment.
    #[serde(default)]
    pub declaration: String,
    #[serde(default)]
    pub locations: Vec<LocationDoc>,
    #[serde(default)]
    pub init: Option<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionDoc>,
}

#[derive(Debug, Deserialize)]
pub struct LocationDoc {
    pub name: String,
    #[serde(default)]
    pub invariant: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionDoc {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub sync: Option<String>,
    #[serde(default)]
    pub assign: Option<String>,
}

/// Parse and check a markup-form model from a buffer.
pub fn parse_model_str(
    json: &str,
    system: &mut System,
    types: &mut TypeMap,
    sink: &mut ErrorSink,
    newxta: bool,
) -> bool {
    let doc: ModelDoc = match serde_json::from_str(json) {
        Ok(doc) => doc,
        Err(e) => {
            sink.error(synth_span(), format!("invalid model document: {e}"));
            return false;
        }
    };

    let (ast_doc, queries) = assemble(&doc, sink, newxta);
    let result = builder::build(&ast_doc);
    *system = result.system;
    *types = result.types;
    for diag in result.diagnostics {
        sink.push(diag);
    }
    for diag in builder::add_queries(system, types, &queries) {
        sink.push(diag);
    }
    check::check(system, types, sink);
    !sink.has_errors()
}

/// Parse and check a markup-form model file.
pub fn parse_model_file(
    path: &Path,
    system: &mut System,
    types: &mut TypeMap,
    sink: &mut ErrorSink,
    newxta: bool,
) -> io::Result<bool> {
    let json = std::fs::read_to_string(path)?;
    Ok(parse_model_str(&json, system, types, sink, newxta))
}

// ── Queries ─────────────────────────────────────────────────────────────────

/// Parse and check a query buffer (one query per line, `//` comments)
/// against an already-built system.
pub fn check_queries_str(
    source: &str,
    system: &mut System,
    types: &mut TypeMap,
    sink: &mut ErrorSink,
) -> bool {
    let mut queries = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }
        let parsed = parser::parse_query(trimmed);
        report_parse_errors(parsed.errors, sink, None);
        if let Some(query) = parsed.output {
            queries.push(query);
        }
    }

    let start = system.queries.len();
    for diag in builder::add_queries(system, types, &queries) {
        sink.push(diag);
    }
    check::check_queries(system, types, sink, start);
    !sink.has_errors()
}

// ── Fragment assembly ───────────────────────────────────────────────────────

fn ident(name: &str) -> Ident {
    Ident {
        name: name.to_string(),
        span: synth_span(),
    }
}

fn report_parse_errors(
    errors: Vec<chumsky::error::Rich<'static, Token, SimpleSpan>>,
    sink: &mut ErrorSink,
    label: Option<&str>,
) {
    for error in errors {
        let mut diag = Diagnostic::error(*error.span(), format!("syntax error: {error}"));
        if let Some(label) = label {
            diag = diag.with_hint(label.to_string());
        }
        sink.push(diag);
    }
}

fn fragment_decls(
    text: &str,
    newxta: bool,
    sink: &mut ErrorSink,
    label: &str,
) -> Vec<ast::Decl> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let parsed = parser::parse_declarations(text, newxta);
    report_parse_errors(parsed.errors, sink, Some(label));
    parsed.output.unwrap_or_default()
}

fn fragment_expr(text: &str, sink: &mut ErrorSink, label: &str) -> Option<ast::Expr> {
    let parsed = parser::parse_expression(text);
    report_parse_errors(parsed.errors, sink, Some(label));
    parsed.output
}

fn assemble(
    doc: &ModelDoc,
    sink: &mut ErrorSink,
    newxta: bool,
) -> (ast::Document, Vec<ast::QueryDecl>) {
    let mut decls = fragment_decls(&doc.declaration, newxta, sink, "in global declarations");

    for template in &doc.templates {
        let label = format!("in template '{}'", template.name);

        let params = if template.parameter.trim().is_empty() {
            Vec::new()
        } else {
            let parsed = parser::parse_parameters(&template.parameter);
            report_parse_errors(parsed.errors, sink, Some(&label));
            parsed.output.unwrap_or_default()
        };

        let local_decls = fragment_decls(&template.declaration, newxta, sink, &label);

        let states = template
            .locations
            .iter()
            .map(|location| ast::LocationDecl {
                name: ident(&location.name),
                invariant: location
                    .invariant
                    .as_ref()
                    .and_then(|text| fragment_expr(text, sink, &label)),
            })
            .collect();

        let transitions = template
            .transitions
            .iter()
            .map(|trans| {
                let sync = trans.sync.as_ref().and_then(|text| {
                    let parsed = parser::parse_sync(text);
                    report_parse_errors(parsed.errors, sink, Some(&label));
                    parsed.output
                });
                let assign = trans.assign.as_ref().and_then(|text| {
                    let parsed = parser::parse_assignment_list(text);
                    report_parse_errors(parsed.errors, sink, Some(&label));
                    parsed.output
                });
                ast::TransitionDecl {
                    source: ident(&trans.source),
                    target: ident(&trans.target),
                    guard: trans
                        .guard
                        .as_ref()
                        .and_then(|text| fragment_expr(text, sink, &label)),
                    sync,
                    assign,
                    span: synth_span(),
                }
            })
            .collect();

        decls.push(ast::Decl::Template(ast::TemplateDecl {
            name: ident(&template.name),
            params,
            decls: local_decls,
            states,
            init: template.init.as_ref().map(|name| ident(name)),
            transitions,
            span: synth_span(),
        }));
    }

    decls.extend(fragment_decls(&doc.system, newxta, sink, "in system declarations"));

    let mut queries = Vec::new();
    for text in &doc.queries {
        let parsed = parser::parse_query(text);
        report_parse_errors(parsed.errors, sink, Some("in query"));
        if let Some(query) = parsed.output {
            queries.push(query);
        }
    }

    let document = ast::Document {
        decls,
        span: synth_span(),
    };
    (document, queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (System, TypeMap, ErrorSink) {
        (System::new(), TypeMap::new(), ErrorSink::new())
    }

    #[test]
    fn xta_roundtrip_ok() {
        let (mut system, mut types, mut sink) = fresh();
        let ok = parse_xta_str(
            "clock c;\n\
             chan a;\n\
             process P() {\n\
               state s0 { c <= 3 }, s1;\n\
               init s0;\n\
               trans s0 -> s1 { guard c >= 1; sync a!; assign c := 0; };\n\
             }\n\
             P1 := P();\n\
             system P1;",
            &mut system,
            &mut types,
            &mut sink,
            true,
        );
        assert!(ok, "diagnostics: {:?}", sink.diagnostics());
        assert_eq!(system.templates.len(), 1);
    }

    #[test]
    fn xta_syntax_error_fails() {
        let (mut system, mut types, mut sink) = fresh();
        let ok = parse_xta_str("int x = ;", &mut system, &mut types, &mut sink, true);
        assert!(!ok);
        assert!(sink.has_errors());
    }

    #[test]
    fn model_doc_roundtrip() {
        let json = r#"{
            "declaration": "clock c; urgent chan a;",
            "templates": [{
                "name": "P",
                "locations": [
                    { "name": "s0", "invariant": "c <= 5" },
                    { "name": "s1" }
                ],
                "init": "s0",
                "transitions": [
                    { "source": "s0", "target": "s1", "guard": "c > 2", "sync": "a!" }
                ]
            }],
            "system": "P1 := P(); system P1;",
            "queries": ["A[] c <= 5"]
        }"#;
        let (mut system, mut types, mut sink) = fresh();
        let ok = parse_model_str(json, &mut system, &mut types, &mut sink, true);
        // The urgent channel with a clock guard must be rejected.
        assert!(!ok);
        assert!(sink
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("urgent transitions")));
    }

    #[test]
    fn invalid_json_is_a_diagnostic() {
        let (mut system, mut types, mut sink) = fresh();
        let ok = parse_model_str("{ not json", &mut system, &mut types, &mut sink, true);
        assert!(!ok);
        assert!(sink.diagnostics()[0]
            .message
            .contains("invalid model document"));
    }

    #[test]
    fn query_buffer_checks_against_system() {
        let (mut system, mut types, mut sink) = fresh();
        assert!(parse_xta_str(
            "int x;",
            &mut system,
            &mut types,
            &mut sink,
            true
        ));
        let ok = check_queries_str(
            "// reachability\nA[] x < 5\n",
            &mut system,
            &mut types,
            &mut sink,
        );
        assert!(ok, "diagnostics: {:?}", sink.diagnostics());
        assert_eq!(system.queries.len(), 1);
    }
}
