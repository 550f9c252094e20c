//! Self-containment transform for report pages.
//!
//! Rewrites a report's HTML so data files it would fetch at runtime are
//! embedded as literals, letting the report open straight from the bucket.
//! The rewrite is in place and irreversible.
//!
//! Per document:
//! 1. Read the page as UTF-8
//! 2. Scan for fetch-style, load-style and `src=` references to `*.json`
//! 3. Resolve each to a key (leading `/` = bucket root, else page directory)
//! 4. Load and parse each distinct key; a bad or missing file skips only that reference
//! 5. Replace every call naming that file (matched by file name) with inline data
//! 6. Write the page back if anything changed

pub mod patterns;

use crate::domain::ENTRY_PAGE;
use crate::store::{
    ensure_trailing_slash, file_name, parent_prefix, ObjectStore, StoreError,
};
use base64::Engine;
use patterns::{filename_matchers, resolve_key, scan, CallKind};
use std::collections::BTreeSet;
use thiserror::Error;

/// Document-level failures. The document is left untouched.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("document {key} is not valid UTF-8")]
    NotUtf8 { key: String },
}

/// A reference that was left as a live fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedReference {
    pub key: String,
    pub reason: String,
}

/// What happened to one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutcome {
    pub key: String,
    /// Distinct data files embedded.
    pub inlined: usize,
    /// Call sites rewritten.
    pub replaced: usize,
    pub skipped: Vec<SkippedReference>,
    pub written: bool,
}

/// Outcome for every page under a report prefix.
#[derive(Debug, Default)]
pub struct FolderTransformReport {
    pub documents: Vec<TransformOutcome>,
    pub failures: Vec<(String, TransformError)>,
}

impl FolderTransformReport {
    pub fn inlined_documents(&self) -> usize {
        self.documents.iter().filter(|d| d.written).count()
    }
}

pub struct HtmlInliner<'a> {
    store: &'a dyn ObjectStore,
    bucket: &'a str,
}

impl<'a> HtmlInliner<'a> {
    pub fn new(store: &'a dyn ObjectStore, bucket: &'a str) -> Self {
        Self { store, bucket }
    }

    /// Transform one page in place.
    pub fn transform(&self, html_key: &str) -> Result<TransformOutcome, TransformError> {
        let bytes = self.store.get_object(self.bucket, html_key)?;
        let html = String::from_utf8(bytes).map_err(|_| TransformError::NotUtf8 {
            key: html_key.to_string(),
        })?;

        let doc_dir = parent_prefix(html_key);
        let keys: BTreeSet<String> = scan(&html)
            .iter()
            .filter_map(|r| resolve_key(doc_dir, &r.path))
            .collect();

        let mut outcome = TransformOutcome {
            key: html_key.to_string(),
            ..TransformOutcome::default()
        };
        let mut loaded = Vec::new();
        for key in keys {
            match self.load_json(&key) {
                Ok(value) => loaded.push((key, value)),
                Err(reason) => {
                    tracing::warn!(document = html_key, data = %key, %reason, "reference left as live fetch");
                    outcome.skipped.push(SkippedReference { key, reason });
                }
            }
        }

        // Every edit is located in the page as read, then applied once, so
        // embedded data is never rescanned.
        let mut edits = Vec::new();
        for (key, value) in &loaded {
            if let Err(e) = call_edits(&html, file_name(key), value, key, &mut edits) {
                outcome.skipped.push(SkippedReference {
                    key: key.clone(),
                    reason: e.to_string(),
                });
            }
        }
        let (body, applied) = splice(&html, edits);
        outcome.replaced = applied.len();
        outcome.inlined = applied.iter().collect::<BTreeSet<_>>().len();

        if outcome.replaced > 0 {
            self.store.put_object(
                self.bucket,
                html_key,
                body.as_bytes(),
                Some("text/html; charset=utf-8"),
            )?;
            outcome.written = true;
            tracing::info!(
                document = html_key,
                inlined = outcome.inlined,
                replaced = outcome.replaced,
                "document made self-contained"
            );
        }
        Ok(outcome)
    }

    /// Transform every entry page under `report_prefix` and the other pages
    /// sharing a directory with one.
    pub fn process_report_folder(&self, report_prefix: &str) -> Result<FolderTransformReport, StoreError> {
        let prefix = ensure_trailing_slash(report_prefix);
        let listing = self.store.list(self.bucket, &prefix, None)?;

        let entry_dirs: BTreeSet<&str> = listing
            .files()
            .filter(|o| file_name(&o.key) == ENTRY_PAGE)
            .map(|o| parent_prefix(&o.key))
            .collect();

        let mut report = FolderTransformReport::default();
        for obj in listing.files() {
            let name = file_name(&obj.key).to_ascii_lowercase();
            let is_html = name.ends_with(".html") || name.ends_with(".htm");
            if !is_html || !entry_dirs.contains(parent_prefix(&obj.key)) {
                continue;
            }
            match self.transform(&obj.key) {
                Ok(outcome) => report.documents.push(outcome),
                Err(e) => {
                    tracing::warn!(document = %obj.key, error = %e, "document transform abandoned");
                    report.failures.push((obj.key.clone(), e));
                }
            }
        }
        Ok(report)
    }

    fn load_json(&self, key: &str) -> Result<serde_json::Value, String> {
        let bytes = self
            .store
            .get_object(self.bucket, key)
            .map_err(|e| e.to_string())?;
        serde_json::from_slice(&bytes).map_err(|e| format!("parse error: {e}"))
    }
}

/// Replace every reference to `file` in `html` with `value`, returning the
/// new text and the number of call sites replaced.
pub fn inline_file(
    html: &str,
    file: &str,
    value: &serde_json::Value,
) -> Result<(String, usize), regex::Error> {
    let mut edits = Vec::new();
    call_edits(html, file, value, file, &mut edits)?;
    let (body, applied) = splice(html, edits);
    Ok((body, applied.len()))
}

/// A matched call head and the text replacing it.
struct Edit<'k> {
    start: usize,
    end: usize,
    text: String,
    data_key: &'k str,
}

/// Locate every call naming `file` in `html`, tagging each with `data_key`.
fn call_edits<'k>(
    html: &str,
    file: &str,
    value: &serde_json::Value,
    data_key: &'k str,
    edits: &mut Vec<Edit<'k>>,
) -> Result<(), regex::Error> {
    let matchers = filename_matchers(file)?;
    let literal = script_literal(value);
    for (kind, re) in matchers {
        let mut replacement: Option<String> = None;
        for m in re.find_iter(html) {
            let text = replacement
                .get_or_insert_with(|| replacement_for(kind, &literal, value))
                .clone();
            edits.push(Edit {
                start: m.start(),
                end: m.end(),
                text,
                data_key,
            });
        }
    }
    Ok(())
}

/// Apply non-overlapping edits in document order. On overlap the edit found
/// first wins. Returns the new text and the data key of each applied edit.
fn splice<'k>(html: &str, mut edits: Vec<Edit<'k>>) -> (String, Vec<&'k str>) {
    edits.sort_by_key(|e| e.start);
    let mut out = String::with_capacity(html.len());
    let mut applied = Vec::new();
    let mut cursor = 0;
    for edit in edits {
        if edit.start < cursor {
            continue;
        }
        out.push_str(&html[cursor..edit.start]);
        out.push_str(&edit.text);
        cursor = edit.end;
        applied.push(edit.data_key);
    }
    out.push_str(&html[cursor..]);
    (out, applied)
}

/// The text standing in for a matched call head.
///
/// The matched span ends at the closing quote, so the caller's argument list
/// tail (`)` or `, opts)`) stays in place and becomes the tail of an
/// immediately invoked arrow function that ignores extra arguments.
fn replacement_for(kind: CallKind, literal: &str, value: &serde_json::Value) -> String {
    match kind {
        CallKind::Fetch => format!(
            "((d) => Promise.resolve(new Response(JSON.stringify(d), \
             {{ status: 200, headers: {{ \"Content-Type\": \"application/json\" }} }})))({literal}"
        ),
        CallKind::Load => format!(
            "((d, cb) => {{ if (typeof cb === \"function\") cb(d); return Promise.resolve(d); }})({literal}"
        ),
        CallKind::SrcAttr => {
            let compact = serde_json::to_string(value).unwrap_or_default();
            let encoded = base64::engine::general_purpose::STANDARD.encode(compact);
            format!("src=\"data:application/json;base64,{encoded}\"")
        }
    }
}

/// JSON rendered safely for embedding inside a `<script>` block.
fn script_literal(value: &serde_json::Value) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace("</", "<\\/")
        .replace('\'', "\\u0027")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}
