//! Regex-based Python extraction. The upstream tool walks a full `ast`
//! tree; this extracts the same categories (imports, defs, classes, calls,
//! attribute accesses, inheritance, type references, decorators, exceptions,
//! with-contexts) from source text directly, trading exhaustiveness for no
//! parser dependency.

use lazy_static::lazy_static;
use regex::Regex;

use super::{DecoratorUsage, FileAnalysis, ImportRef, LanguageAnalyzer, TargetKind};

lazy_static! {
    static ref IMPORT_FROM: Regex =
        Regex::new(r"(?m)^[ \t]*from[ \t]+(\.*)([\w.]*)[ \t]+import[ \t]+(?:\(|\*|([\w, \t]+))").unwrap();
    static ref IMPORT_MODULE: Regex =
        Regex::new(r"(?m)^[ \t]*import[ \t]+([\w.]+(?:[ \t]*,[ \t]*[\w.]+)*)").unwrap();
    static ref DEF_FUNC: Regex =
        Regex::new(r"(?m)^([ \t]*)(?:async[ \t]+)?def[ \t]+([a-zA-Z_][\w]*)[ \t]*\(").unwrap();
    static ref DEF_CLASS: Regex =
        Regex::new(r"(?m)^([ \t]*)class[ \t]+([a-zA-Z_][\w]*)[ \t]*(?:\(([^)]*)\))?[ \t]*:").unwrap();
    static ref DECORATOR: Regex = Regex::new(r"(?m)^([ \t]*)@([\w.]+)").unwrap();
    static ref CALL: Regex = Regex::new(r"\b([a-zA-Z_][\w]*(?:\.[a-zA-Z_][\w]*)*)[ \t]*\(").unwrap();
    static ref ATTRIBUTE: Regex = Regex::new(r"\b([a-zA-Z_][\w]*(?:\.[a-zA-Z_][\w]*)*)\.([a-zA-Z_][\w]*)\b").unwrap();
    static ref EXCEPT: Regex = Regex::new(r"(?m)^[ \t]*except[ \t]+([\w.]+(?:[ \t]*,[ \t]*[\w.]+)*)?[ \t]*(?:as[ \t]+\w+)?[ \t]*:").unwrap();
    static ref WITH: Regex = Regex::new(r"(?m)^[ \t]*(?:async[ \t]+)?with[ \t]+([\w.]+(?:\([^)]*\))?)").unwrap();
    static ref GLOBAL_ASSIGN: Regex = Regex::new(r"(?m)^([A-Za-z_][\w]*)[ \t]*(?::[^=]+)?=[ \t]*[^=]").unwrap();
    static ref RETURN_ANNOTATION: Regex =
        Regex::new(r"->\s*([A-Za-z_][\w.]*(?:\[[^\]\n]*\])?(?:\s*\|\s*[A-Za-z_][\w.]*(?:\[[^\]\n]*\])?)*)").unwrap();
    static ref PARAM_ANNOTATION: Regex =
        Regex::new(r#"[(,]\s*[A-Za-z_][\w]*\s*:\s*([A-Za-z_"'][\w."']*(?:\[[^\]\n]*\])?(?:\s*\|\s*[A-Za-z_][\w.]*(?:\[[^\]\n]*\])?)*)"#).unwrap();
    static ref VAR_ANNOTATION: Regex =
        Regex::new(r#"(?m)^[ \t]*[A-Za-z_][\w]*\s*:\s*([A-Za-z_"'][\w."']*(?:\[[^\]\n]*\])?(?:\s*\|\s*[A-Za-z_][\w.]*(?:\[[^\]\n]*\])?)*)\s*(?:=|$)"#).unwrap();
    static ref TYPE_TOKEN: Regex = Regex::new(r#"[A-Za-z_][\w.]*|"[A-Za-z_][\w.]*"|'[A-Za-z_][\w.]*'"#).unwrap();
}

/// Pull individual type names out of a captured annotation expression:
/// `List[Foo]` yields `List`, `Foo`; `"Foo"` (a string forward reference)
/// yields `Foo`; `Foo | Bar` yields both.
fn extract_type_names(expr: &str) -> Vec<String> {
    TYPE_TOKEN
        .find_iter(expr)
        .map(|m| m.as_str().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|t| !matches!(t.as_str(), "None" | "True" | "False"))
        .collect()
}

/// Indentation depth in columns; used to tell a top-level `def`/`class` from
/// one nested inside another (methods, nested functions/classes).
fn indent_of(prefix: &str) -> usize {
    prefix.chars().count()
}

pub struct PythonAnalyzer;

impl LanguageAnalyzer for PythonAnalyzer {
    fn analyze(&self, content: &str, file_path: &str) -> FileAnalysis {
        let mut a = FileAnalysis {
            file_path: file_path.to_string(),
            file_type: "py".to_string(),
            ..Default::default()
        };

        for caps in IMPORT_MODULE.captures_iter(content) {
            for module in caps[1].split(',') {
                let module = module.trim();
                if module.is_empty() {
                    continue;
                }
                a.imports.push(ImportRef {
                    local_name: module.rsplit('.').next().unwrap_or(module).to_string(),
                    module: module.to_string(),
                    level: 0,
                });
            }
        }
        for caps in IMPORT_FROM.captures_iter(content) {
            let level = caps[1].len() as u32;
            let module = caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
            if let Some(names) = caps.get(3) {
                for name in names.as_str().split(',') {
                    let name = name.trim();
                    if name.is_empty() {
                        continue;
                    }
                    let local = name.split(" as ").last().unwrap_or(name).trim();
                    a.imports.push(ImportRef {
                        local_name: local.to_string(),
                        module: module.clone(),
                        level,
                    });
                }
            } else {
                a.imports.push(ImportRef {
                    local_name: module.clone(),
                    module,
                    level,
                });
            }
        }

        // Collect every class/def opening in document order so enclosing
        // scope can be determined by a stack replay rather than indent
        // alone — indent only says "nested", not "nested in what".
        enum ScopeOpen {
            Class { start: usize, indent: usize, name: String, bases: Option<String> },
            Def { start: usize, indent: usize, name: String },
        }

        let mut opens: Vec<ScopeOpen> = Vec::new();
        for caps in DEF_CLASS.captures_iter(content) {
            let m = caps.get(0).unwrap();
            opens.push(ScopeOpen::Class {
                start: m.start(),
                indent: indent_of(&caps[1]),
                name: caps[2].to_string(),
                bases: caps.get(3).map(|b| b.as_str().to_string()),
            });
        }
        for caps in DEF_FUNC.captures_iter(content) {
            let m = caps.get(0).unwrap();
            opens.push(ScopeOpen::Def {
                start: m.start(),
                indent: indent_of(&caps[1]),
                name: caps[2].to_string(),
            });
        }
        opens.sort_by_key(|o| match o {
            ScopeOpen::Class { start, .. } | ScopeOpen::Def { start, .. } => *start,
        });

        // Stack of (indent, is_class, name) for scopes still open at the
        // current replay position; used both to classify each opening and
        // to look up a decorator's target by its start offset afterward.
        let mut stack: Vec<(usize, bool, String)> = Vec::new();
        let mut kind_by_start: std::collections::HashMap<usize, TargetKind> = std::collections::HashMap::new();

        for open in &opens {
            let (start, indent, is_class) = match open {
                ScopeOpen::Class { start, indent, .. } => (*start, *indent, true),
                ScopeOpen::Def { start, indent, .. } => (*start, *indent, false),
            };
            stack.retain(|(i, _, _)| *i < indent);
            let enclosing = stack.last().cloned();
            let kind = match (is_class, &enclosing) {
                (true, None) => TargetKind::Class,
                (true, Some(_)) => TargetKind::NestedClass,
                (false, None) => TargetKind::Function,
                (false, Some((_, true, _))) => TargetKind::Method,
                (false, Some((_, false, _))) => TargetKind::NestedFunction,
            };
            kind_by_start.insert(start, kind);

            match open {
                ScopeOpen::Class { name, bases, .. } => {
                    a.classes.push(name.clone());
                    if let Some(bases) = bases {
                        for base in bases.split(',') {
                            let base = base.trim();
                            if !base.is_empty() && !base.contains('=') {
                                a.inheritance.push((name.clone(), base.to_string()));
                            }
                        }
                    }
                }
                ScopeOpen::Def { name, .. } => match kind {
                    TargetKind::Method | TargetKind::NestedFunction => {
                        let owner = enclosing.as_ref().map(|(_, _, n)| n.as_str()).unwrap_or("");
                        a.functions.push(format!("{owner}.{name}"));
                    }
                    _ => a.functions.push(name.clone()),
                },
            }
            stack.push((indent, is_class, match open {
                ScopeOpen::Class { name, .. } | ScopeOpen::Def { name, .. } => name.clone(),
            }));
        }

        for caps in DECORATOR.captures_iter(content) {
            let m = caps.get(0).unwrap();
            let name = caps[2].to_string();
            // The decorated definition is the next non-decorator, non-blank line;
            // whichever of def/class matches first (closest to the decorator) wins.
            let rest = &content[m.end()..];
            let func_match = DEF_FUNC.captures(rest).map(|c| (m.end() + c.get(0).unwrap().start(), c[2].to_string()));
            let class_match = DEF_CLASS.captures(rest).map(|c| (m.end() + c.get(0).unwrap().start(), c[2].to_string()));
            let chosen = match (func_match, class_match) {
                (Some(f), Some(c)) if f.0 <= c.0 => Some(f),
                (Some(_), Some(c)) => Some(c),
                (Some(f), None) => Some(f),
                (None, Some(c)) => Some(c),
                (None, None) => None,
            };
            let Some((abs_start, target_name)) = chosen else { continue };
            let target_kind = kind_by_start.get(&abs_start).copied().unwrap_or(TargetKind::Function);
            a.decorators_used.push(DecoratorUsage {
                name,
                target_kind,
                target_name,
            });
        }

        for caps in RETURN_ANNOTATION.captures_iter(content) {
            a.type_references.extend(extract_type_names(&caps[1]));
        }
        for caps in PARAM_ANNOTATION.captures_iter(content) {
            a.type_references.extend(extract_type_names(&caps[1]));
        }
        for caps in VAR_ANNOTATION.captures_iter(content) {
            a.type_references.extend(extract_type_names(&caps[1]));
        }

        for caps in CALL.captures_iter(content) {
            a.calls.push(caps[1].to_string());
        }
        for caps in ATTRIBUTE.captures_iter(content) {
            // Store the full `source.attr` expression (not just the attribute
            // name) so a resolver can recover the leading name to look up.
            a.attribute_accesses.push(caps.get(0).unwrap().as_str().to_string());
        }
        for caps in EXCEPT.captures_iter(content) {
            if let Some(types) = caps.get(1) {
                for t in types.as_str().split(',') {
                    let t = t.trim();
                    if !t.is_empty() {
                        a.exceptions_handled.push(t.to_string());
                    }
                }
            }
        }
        for caps in WITH.captures_iter(content) {
            a.with_contexts_used.push(caps[1].to_string());
        }
        for caps in GLOBAL_ASSIGN.captures_iter(content) {
            a.globals_defined.push(caps[1].to_string());
        }

        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_imports_functions_classes_and_inheritance() {
        let src = "import os\nfrom pkg.sub import thing as t\n\nclass Base:\n    pass\n\nclass Child(Base):\n    def method(self):\n        pass\n\ndef top_level():\n    pass\n";
        let a = PythonAnalyzer.analyze(src, "mod.py");
        assert!(a.imports.iter().any(|i| i.module == "os"));
        assert!(a.imports.iter().any(|i| i.module == "pkg.sub" && i.local_name == "t"));
        assert!(a.classes.contains(&"Base".to_string()));
        assert!(a.classes.contains(&"Child".to_string()));
        assert!(a.inheritance.contains(&("Child".to_string(), "Base".to_string())));
        assert!(a.functions.iter().any(|f| f == "top_level"));
    }

    #[test]
    fn decorator_on_top_level_function_is_classified_correctly() {
        let src = "@app.route('/x')\ndef handler():\n    pass\n";
        let a = PythonAnalyzer.analyze(src, "app.py");
        assert_eq!(a.decorators_used.len(), 1);
        assert_eq!(a.decorators_used[0].name, "app.route");
        assert_eq!(a.decorators_used[0].target_kind, TargetKind::Function);
        assert_eq!(a.decorators_used[0].target_name, "handler");
    }

    #[test]
    fn relative_import_level_counts_leading_dots() {
        let src = "from ..pkg import thing\n";
        let a = PythonAnalyzer.analyze(src, "mod.py");
        assert_eq!(a.imports[0].level, 2);
        assert_eq!(a.imports[0].module, "pkg");
    }

    #[test]
    fn decorator_inside_class_is_a_method_and_inside_function_is_nested() {
        let src = "class Widget:\n    @staticmethod\n    def build():\n        pass\n\ndef outer():\n    @wraps\n    def inner():\n        pass\n";
        let a = PythonAnalyzer.analyze(src, "mod.py");
        let method = a.decorators_used.iter().find(|d| d.target_name == "build").unwrap();
        assert_eq!(method.target_kind, TargetKind::Method);
        let nested = a.decorators_used.iter().find(|d| d.target_name == "inner").unwrap();
        assert_eq!(nested.target_kind, TargetKind::NestedFunction);
    }

    #[test]
    fn type_references_pick_up_annotations_generics_and_forward_refs() {
        let src = "from typing import List, Optional\n\ndef f(items: List[Foo], other: \"Bar\") -> Optional[Baz]:\n    pass\n\nx: Qux | None = None\n";
        let a = PythonAnalyzer.analyze(src, "mod.py");
        for expected in ["Foo", "Bar", "Baz", "Qux"] {
            assert!(a.type_references.iter().any(|t| t == expected), "missing {expected} in {:?}", a.type_references);
        }
    }
}
