//! Recognised data-fetch forms and key resolution.
//!
//! Three call forms are recognised, each with single and double quotes:
//! - fetch-style: `fetch("data/x.json")`, `window.fetch('x.json', opts)`
//! - load-style: `d3.json("x.json")`, `$.getJSON('x.json', cb)`, `loadJSON("x.json")`
//! - source attribute: `src="x.json"`
//!
//! The `regex` crate has no back-references, so every form is compiled once
//! per quote character.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    Fetch,
    Load,
    SrcAttr,
}

impl CallKind {
    pub const ALL: [CallKind; 3] = [CallKind::Fetch, CallKind::Load, CallKind::SrcAttr];

    /// Pattern up to and including the closing quote; `path` is a named group.
    fn template(self) -> &'static str {
        match self {
            CallKind::Fetch => r"(?:[A-Za-z_$][\w$]*\.)*\bfetch\s*\(\s*{q}(?P<path>{path}){q}",
            CallKind::Load => {
                r"(?:[A-Za-z_$][\w$]*\.)*\b(?:loadJSON|loadJson|getJSON|json|load)\s*\(\s*{q}(?P<path>{path}){q}"
            }
            CallKind::SrcAttr => r"\bsrc\s*=\s*{q}(?P<path>{path}){q}",
        }
    }
}

const QUOTES: [char; 2] = ['"', '\''];

/// A data reference found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRef {
    pub kind: CallKind,
    pub path: String,
}

fn build(kind: CallKind, quote: char, path: &str) -> Result<Regex, regex::Error> {
    let pattern = kind
        .template()
        .replace("{q}", &quote.to_string())
        .replace("{path}", path);
    Regex::new(&pattern)
}

fn scanners() -> &'static [(CallKind, Regex)] {
    static SCANNERS: OnceLock<Vec<(CallKind, Regex)>> = OnceLock::new();
    SCANNERS.get_or_init(|| {
        let mut out = Vec::new();
        for kind in CallKind::ALL {
            for quote in QUOTES {
                let path = format!(r"[^{quote}\r\n]+?\.json");
                let re = build(kind, quote, &path).expect("static data-ref pattern compiles");
                out.push((kind, re));
            }
        }
        out
    })
}

/// Every recognised data reference, in document order per form.
pub fn scan(html: &str) -> Vec<DataRef> {
    let mut refs = Vec::new();
    for (kind, re) in scanners() {
        for caps in re.captures_iter(html) {
            if let Some(path) = caps.name("path") {
                refs.push(DataRef {
                    kind: *kind,
                    path: path.as_str().to_string(),
                });
            }
        }
    }
    refs
}

/// Regexes matching any reference whose path ends in `file_name`,
/// whatever directory precedes it.
pub fn filename_matchers(file_name: &str) -> Result<Vec<(CallKind, Regex)>, regex::Error> {
    let escaped = regex::escape(file_name);
    let mut out = Vec::new();
    for kind in CallKind::ALL {
        for quote in QUOTES {
            let path = format!(r"(?:[^{quote}\r\n]*/)?{escaped}");
            out.push((kind, build(kind, quote, &path)?));
        }
    }
    Ok(out)
}

/// Resolve a referenced path against the document's directory.
///
/// A leading `/` is relative to the bucket root; anything else (`./x`, `x`,
/// `../x`) is relative to `doc_dir`. Absolute URLs and paths escaping the
/// bucket resolve to `None`.
pub fn resolve_key(doc_dir: &str, path: &str) -> Option<String> {
    let lowered = path.to_ascii_lowercase();
    if path.starts_with("//")
        || lowered.starts_with("http:")
        || lowered.starts_with("https:")
        || lowered.starts_with("data:")
    {
        return None;
    }
    let joined = match path.strip_prefix('/') {
        Some(rooted) => rooted.to_string(),
        None => format!("{doc_dir}{path}"),
    };
    let mut segments: Vec<&str> = Vec::new();
    for seg in joined.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_all_forms_and_quotes() {
        let html = r#"
            fetch("data/a.json").then(r => r.json());
            window.fetch('widgets/b.json', {cache: "no-store"});
            d3.json("c.json");
            $.getJSON('./d.json', cb);
            <script src="e.json"></script>
            fetch("app.js");
        "#;
        let refs = scan(html);
        let paths: Vec<_> = refs.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(refs.len(), 5, "{paths:?}");
        for expected in ["data/a.json", "widgets/b.json", "c.json", "./d.json", "e.json"] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
        assert!(refs.iter().any(|r| r.kind == CallKind::SrcAttr && r.path == "e.json"));
    }

    #[test]
    fn prefetch_is_not_fetch() {
        assert!(scan(r#"prefetch("a.json")"#).is_empty());
    }

    #[test]
    fn resolution_rules() {
        let dir = "R/2024-05-01/run-07/allure-report/";
        assert_eq!(
            resolve_key(dir, "data/a.json").as_deref(),
            Some("R/2024-05-01/run-07/allure-report/data/a.json")
        );
        assert_eq!(
            resolve_key(dir, "./data/a.json").as_deref(),
            Some("R/2024-05-01/run-07/allure-report/data/a.json")
        );
        assert_eq!(
            resolve_key(dir, "../shared/x.json").as_deref(),
            Some("R/2024-05-01/run-07/shared/x.json")
        );
        assert_eq!(resolve_key(dir, "/top/x.json").as_deref(), Some("top/x.json"));
        assert_eq!(resolve_key("", "a.json").as_deref(), Some("a.json"));
        assert_eq!(resolve_key("", "../a.json"), None);
        assert_eq!(resolve_key(dir, "https://cdn/x.json"), None);
        assert_eq!(resolve_key(dir, "//cdn/x.json"), None);
    }

    #[test]
    fn filename_matchers_ignore_directory() {
        let matchers = filename_matchers("a.json").unwrap();
        let hits = |s: &str| matchers.iter().filter(|(_, re)| re.is_match(s)).count();
        assert_eq!(hits(r#"fetch("data/a.json")"#), 1);
        assert_eq!(hits(r#"fetch('./a.json')"#), 1);
        assert_eq!(hits(r#"fetch("/x/y/a.json")"#), 1);
        assert_eq!(hits(r#"fetch("data/xa.json")"#), 0);
    }
}
