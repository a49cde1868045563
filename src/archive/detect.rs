//! MIME type and language detection from file names.

use std::path::Path;

/// Extension to language name.
const LANGUAGES: &[(&str, &str)] = &[
    ("py", "python"),
    ("rs", "rust"),
    ("js", "javascript"),
    ("mjs", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("go", "go"),
    ("java", "java"),
    ("rb", "ruby"),
    ("sh", "shell"),
    ("bash", "shell"),
    ("sql", "sql"),
    ("md", "markdown"),
    ("txt", "text"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("toml", "toml"),
    ("csv", "csv"),
    ("html", "html"),
    ("css", "css"),
];

#[must_use]
pub fn guess_mime(path: &Path) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

#[must_use]
pub fn detect_lang(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    LANGUAGES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, lang)| (*lang).to_string())
}
