//! Stub rendering for files replaced by consolidation or plan apply.
//!
//! One [`StubRenderer`] per [`ArtifactKind`]; [`renderer_for`] picks it.

use std::path::Path;

use serde_json::json;

use super::similarity::{CommentStyle, comment_style};

/// Marker present in every generated shim; used to skip already-shimmed files.
pub const SHIM_MARKER: &str = "AUTO-GENERATED SHIM";

/// File families with a dedicated pointer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Python,
    Markdown,
    Json,
    Csv,
    /// Anything else; rendered as a comment block in the file's own syntax.
    Other,
}

impl ArtifactKind {
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "py" => Self::Python,
            "md" | "markdown" => Self::Markdown,
            "json" => Self::Json,
            "csv" | "tsv" => Self::Csv,
            _ => Self::Other,
        }
    }
}

/// What a shim needs to know about the replacement.
#[derive(Debug, Clone, Copy)]
pub struct ShimContext<'a> {
    /// Root-relative path of the file being replaced.
    pub duplicate: &'a str,
    /// Root-relative path of the canonical file.
    pub canonical: &'a str,
    /// Tombstone holding the replaced content.
    pub tombstone: &'a str,
}

pub trait StubRenderer: Send + Sync {
    fn kind(&self) -> ArtifactKind;

    fn render(&self, ctx: &ShimContext<'_>) -> String;
}

/// Re-exports the canonical module and emits a `DeprecationWarning`.
#[derive(Debug, Default)]
pub struct PythonShim;

impl StubRenderer for PythonShim {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Python
    }

    fn render(&self, ctx: &ShimContext<'_>) -> String {
        let module = python_import_path(ctx.canonical);
        format!(
            "\"\"\"{SHIM_MARKER}: consolidated into {canonical}.\n\
             \n\
             Original content archived as tombstone {tombstone}.\n\
             \"\"\"\n\
             import warnings\n\
             \n\
             warnings.warn(\n\
             \x20   \"{duplicate} is deprecated; import from {module} instead\",\n\
             \x20   DeprecationWarning,\n\
             \x20   stacklevel=2,\n\
             )\n\
             \n\
             from {module} import *  # noqa: F401,F403\n",
            canonical = ctx.canonical,
            tombstone = ctx.tombstone,
            duplicate = ctx.duplicate,
        )
    }
}

#[derive(Debug, Default)]
pub struct MarkdownPointer;

impl StubRenderer for MarkdownPointer {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Markdown
    }

    fn render(&self, ctx: &ShimContext<'_>) -> String {
        format!(
            "<!-- {SHIM_MARKER} (tombstone {}) -->\n\n\
             This document has been consolidated. See canonical: {}\n",
            ctx.tombstone, ctx.canonical
        )
    }
}

/// `{"$ref": "<canonical>"}`; JSON has no comments, so the marker rides in `$comment`.
#[derive(Debug, Default)]
pub struct JsonPointer;

impl StubRenderer for JsonPointer {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Json
    }

    fn render(&self, ctx: &ShimContext<'_>) -> String {
        let value = json!({
            "$ref": ctx.canonical,
            "$comment": format!("{SHIM_MARKER} (tombstone {})", ctx.tombstone),
        });
        let mut text = serde_json::to_string_pretty(&value).unwrap_or_default();
        text.push('\n');
        text
    }
}

#[derive(Debug, Default)]
pub struct CsvPointer;

impl StubRenderer for CsvPointer {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Csv
    }

    fn render(&self, ctx: &ShimContext<'_>) -> String {
        format!(
            "# {SHIM_MARKER}: consolidated into {} (tombstone {})\n",
            ctx.canonical, ctx.tombstone
        )
    }
}

/// Comment block in the duplicate's own syntax.
#[derive(Debug, Default)]
pub struct CommentPointer;

impl StubRenderer for CommentPointer {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Other
    }

    fn render(&self, ctx: &ShimContext<'_>) -> String {
        comment_block(
            ctx.duplicate,
            &[
                format!("{SHIM_MARKER}: consolidated into {}", ctx.canonical),
                format!("Tombstone: {}", ctx.tombstone),
            ],
        )
    }
}

static PYTHON: PythonShim = PythonShim;
static MARKDOWN: MarkdownPointer = MarkdownPointer;
static JSON: JsonPointer = JsonPointer;
static CSV: CsvPointer = CsvPointer;
static OTHER: CommentPointer = CommentPointer;

#[must_use]
pub fn renderer_for(kind: ArtifactKind) -> &'static dyn StubRenderer {
    match kind {
        ArtifactKind::Python => &PYTHON,
        ArtifactKind::Markdown => &MARKDOWN,
        ArtifactKind::Json => &JSON,
        ArtifactKind::Csv => &CSV,
        ArtifactKind::Other => &OTHER,
    }
}

/// Render the consolidation shim for `ctx.duplicate`.
#[must_use]
pub fn render_shim(ctx: &ShimContext<'_>) -> String {
    renderer_for(ArtifactKind::from_path(ctx.duplicate)).render(ctx)
}

/// Dotted module path for a Python file: `src/codex/mod/foo.py` → `codex.mod.foo`.
#[must_use]
pub fn python_import_path(rel: &str) -> String {
    let rel = rel.trim_start_matches("./");
    let rel = rel.strip_prefix("src/").unwrap_or(rel);
    let rel = rel.strip_suffix(".py").unwrap_or(rel);
    let rel = rel.strip_suffix("/__init__").unwrap_or(rel);
    rel.replace('/', ".")
}

/// Details written into a stub left behind by plan apply.
#[derive(Debug, Clone, Copy)]
pub struct TombstoneStub<'a> {
    pub path: &'a str,
    pub tombstone: &'a str,
    pub sha256: &'a str,
    pub reason: &'a str,
    pub actor: &'a str,
    pub commit: Option<&'a str>,
}

/// Stub naming the tombstone and how to restore it, in the file's comment syntax.
#[must_use]
pub fn tombstone_stub(stub: &TombstoneStub<'_>) -> String {
    let mut lines = vec![
        "ARCHIVED: this file's content lives in the codex archive.".to_string(),
        format!("Tombstone: {}", stub.tombstone),
        format!("SHA256: {}", stub.sha256),
        format!("Reason: {}", stub.reason),
        format!("Archived-By: {}", stub.actor),
    ];
    if let Some(commit) = stub.commit {
        lines.push(format!("Commit: {commit}"));
    }
    lines.push(format!(
        "Restore: codex archive restore {} --out {}",
        stub.tombstone, stub.path
    ));
    comment_block(stub.path, &lines)
}

fn comment_block(path: &str, lines: &[String]) -> String {
    let ext = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if matches!(ext.as_str(), "md" | "markdown" | "html" | "htm" | "xml") {
        let mut out = String::from("<!--\n");
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("-->\n");
        return out;
    }
    let prefix = match comment_style(&ext) {
        Some(CommentStyle::Slash) => "//",
        Some(CommentStyle::DoubleDash) => "--",
        Some(CommentStyle::Hash) | None => "#",
    };
    lines
        .iter()
        .map(|line| format!("{prefix} {line}\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(duplicate: &'a str, canonical: &'a str) -> ShimContext<'a> {
        ShimContext {
            duplicate,
            canonical,
            tombstone: "t-1",
        }
    }

    #[test]
    fn import_path_strips_src_and_extension() {
        assert_eq!(python_import_path("src/codex/mod/foo.py"), "codex.mod.foo");
        assert_eq!(python_import_path("pkg/__init__.py"), "pkg");
        assert_eq!(python_import_path("tools/run.py"), "tools.run");
    }

    #[test]
    fn python_shim_reexports_and_warns() {
        let text = render_shim(&ctx("src/codex/mod/foo_old.py", "src/codex/mod/foo.py"));
        assert!(text.contains(SHIM_MARKER));
        assert!(text.contains("from codex.mod.foo import *"));
        assert!(text.contains("DeprecationWarning"));
        assert!(text.contains("t-1"));
    }

    #[test]
    fn markdown_pointer_names_canonical() {
        let text = render_shim(&ctx("docs/old.md", "docs/guide.md"));
        assert!(text.contains("This document has been consolidated. See canonical: docs/guide.md"));
    }

    #[test]
    fn json_pointer_is_valid_json() {
        let text = render_shim(&ctx("a/old.json", "a/new.json"));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["$ref"], "a/new.json");
    }

    #[test]
    fn csv_and_other_kinds_use_comments() {
        assert!(render_shim(&ctx("old.csv", "new.csv")).starts_with("# AUTO-GENERATED SHIM"));
        assert!(render_shim(&ctx("old.rs", "new.rs")).starts_with("// AUTO-GENERATED SHIM"));
        assert_eq!(renderer_for(ArtifactKind::Other).kind(), ArtifactKind::Other);
    }

    #[test]
    fn tombstone_stub_lines() {
        let text = tombstone_stub(&TombstoneStub {
            path: "legacy_module.py",
            tombstone: "abc",
            sha256: "deadbeef",
            reason: "cleanup",
            actor: "cli-test",
            commit: Some("HEAD"),
        });
        assert!(text.contains("# Tombstone: abc\n"));
        assert!(text.contains("# SHA256: deadbeef\n"));
        assert!(text.contains("# Restore: codex archive restore abc --out legacy_module.py"));

        let md = tombstone_stub(&TombstoneStub {
            path: "notes.md",
            tombstone: "abc",
            sha256: "deadbeef",
            reason: "cleanup",
            actor: "a",
            commit: None,
        });
        assert!(md.starts_with("<!--\n"));
        assert!(!md.contains("Commit:"));
    }
}
