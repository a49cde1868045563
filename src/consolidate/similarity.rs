//! Near-duplicate detection kernels.
//!
//! Three signals are combined by [`SimilarityPolicy`]:
//!
//! 1. **Structural equality** for code: token streams equal once comments are
//!    stripped.
//! 2. **Shingle Jaccard**: overlap of k-token shingles.
//! 3. **Simhash distance** for prose (`.md` / `.txt`).

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Characters that separate tokens.
const SPLIT: &[char] = &[
    ' ', '\t', '\r', '\n', ',', '.', ';', ':', '(', ')', '[', ']', '{', '}', '<', '>', '+', '-',
    '=', '*', '/', '\\', '|', '!', '@', '#', '$', '%', '^', '&', '~', '`', '\'', '"',
];

const PROSE_EXTENSIONS: &[&str] = &["md", "txt"];

/// Thresholds for calling two files near-duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityPolicy {
    /// Minimum shingle Jaccard to count as duplicate
    /// Default: 0.92
    #[serde(default = "default_jaccard_min")]
    pub jaccard_min: f64,

    /// Maximum simhash Hamming distance for prose
    /// Default: 3
    #[serde(default = "default_hd_max")]
    pub hd_max: u32,

    /// Tokens per shingle
    /// Default: 5
    #[serde(default = "default_shingle_size")]
    pub shingle_size: usize,

    /// Files larger than this are never compared
    /// Default: 1 MiB
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_jaccard_min() -> f64 {
    0.92
}

fn default_hd_max() -> u32 {
    3
}

fn default_shingle_size() -> usize {
    5
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

impl Default for SimilarityPolicy {
    fn default() -> Self {
        Self {
            jaccard_min: default_jaccard_min(),
            hd_max: default_hd_max(),
            shingle_size: default_shingle_size(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

/// Why a pair was judged near-duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    Structural,
    Jaccard,
    Simhash,
}

impl MatchReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Jaccard => "jaccard",
            Self::Simhash => "simhash",
        }
    }
}

/// Pairwise similarity measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Similarity {
    /// Shingle Jaccard, rounded to 4 places.
    pub jaccard: f64,
    /// Simhash Hamming distance; 64 when either side is not prose.
    pub doc_hd: u32,
    pub structural_equal: bool,
}

/// Precomputed per-file features so pairwise comparison stays cheap.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    extension: String,
    code_tokens: Option<Vec<String>>,
    shingles: HashSet<String>,
    simhash: Option<u64>,
    token_count: usize,
}

impl Fingerprint {
    #[must_use]
    pub fn new(path: &Path, text: &str, policy: &SimilarityPolicy) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let token_list = tokens(text);
        let code_tokens = comment_style(&extension).map(|style| {
            tokens(&strip_comments(text, style))
                .into_iter()
                .map(str::to_string)
                .collect()
        });
        let simhash = PROSE_EXTENSIONS
            .contains(&extension.as_str())
            .then(|| simhash64(&token_list));
        Self {
            shingles: shingles(&token_list, policy.shingle_size),
            token_count: token_list.len(),
            extension,
            code_tokens,
            simhash,
        }
    }

    /// Files without tokens never match anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.token_count == 0
    }

    #[must_use]
    pub fn compare(&self, other: &Self) -> Similarity {
        let structural_equal = self.extension == other.extension
            && match (&self.code_tokens, &other.code_tokens) {
                (Some(a), Some(b)) => !a.is_empty() && a == b,
                _ => false,
            };
        let doc_hd = match (self.simhash, other.simhash) {
            (Some(a), Some(b)) => hamming64(a, b),
            _ => 64,
        };
        Similarity {
            jaccard: round4(jaccard(&self.shingles, &other.shingles)),
            doc_hd,
            structural_equal,
        }
    }
}

impl SimilarityPolicy {
    /// The first signal that makes the pair a near-duplicate, if any.
    #[must_use]
    pub fn near_duplicate(
        &self,
        a: &Fingerprint,
        b: &Fingerprint,
        similarity: &Similarity,
    ) -> Option<MatchReason> {
        if a.is_empty() || b.is_empty() {
            return None;
        }
        if similarity.structural_equal {
            return Some(MatchReason::Structural);
        }
        if similarity.jaccard >= self.jaccard_min {
            return Some(MatchReason::Jaccard);
        }
        if a.simhash.is_some() && b.simhash.is_some() && similarity.doc_hd <= self.hd_max {
            return Some(MatchReason::Simhash);
        }
        None
    }
}

/// Line comment markers understood by [`strip_comments`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    /// `# ...`
    Hash,
    /// `// ...` and `/* ... */`
    Slash,
    /// `-- ...`
    DoubleDash,
}

/// Comment syntax for a source extension; `None` for non-code files.
#[must_use]
pub fn comment_style(extension: &str) -> Option<CommentStyle> {
    match extension {
        "py" | "sh" | "bash" | "rb" | "pl" | "r" | "yaml" | "yml" | "toml" => {
            Some(CommentStyle::Hash)
        }
        "rs" | "js" | "mjs" | "ts" | "tsx" | "jsx" | "go" | "java" | "c" | "h" | "cc" | "cpp"
        | "hpp" | "cs" | "kt" | "swift" | "scala" => Some(CommentStyle::Slash),
        "sql" | "lua" => Some(CommentStyle::DoubleDash),
        _ => None,
    }
}

/// Remove comments, ignoring markers inside string literals.
#[must_use]
pub fn strip_comments(text: &str, style: CommentStyle) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if ch == q || ch == '\n' {
                quote = None;
            }
            continue;
        }

        let line_comment = match style {
            CommentStyle::Hash => ch == '#',
            CommentStyle::Slash => ch == '/' && chars.peek() == Some(&'/'),
            CommentStyle::DoubleDash => ch == '-' && chars.peek() == Some(&'-'),
        };
        if line_comment {
            for rest in chars.by_ref() {
                if rest == '\n' {
                    out.push('\n');
                    break;
                }
            }
            continue;
        }

        if style == CommentStyle::Slash && ch == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = '\0';
            for rest in chars.by_ref() {
                if prev == '*' && rest == '/' {
                    break;
                }
                prev = rest;
            }
            out.push(' ');
            continue;
        }

        if ch == '"' || ch == '\'' {
            quote = Some(ch);
        }
        out.push(ch);
    }
    out
}

#[must_use]
pub fn tokens(text: &str) -> Vec<&str> {
    text.split(SPLIT).filter(|token| !token.is_empty()).collect()
}

/// Contiguous `k`-token windows. Fewer than `k` tokens form one shingle.
#[must_use]
pub fn shingles(tokens: &[&str], k: usize) -> HashSet<String> {
    if tokens.is_empty() {
        return HashSet::new();
    }
    let k = k.max(1);
    if tokens.len() < k {
        return HashSet::from([tokens.join(" ")]);
    }
    tokens.windows(k).map(|window| window.join(" ")).collect()
}

#[must_use]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// 64-bit simhash over token hashes.
#[must_use]
pub fn simhash64(tokens: &[&str]) -> u64 {
    let mut weights = [0i64; 64];
    for token in tokens {
        let digest = Sha256::digest(token.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let hashed = u64::from_le_bytes(prefix);
        for (bit, weight) in weights.iter_mut().enumerate() {
            if (hashed >> bit) & 1 == 1 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }
    weights
        .iter()
        .enumerate()
        .filter(|(_, weight)| **weight >= 0)
        .fold(0u64, |acc, (bit, _)| acc | (1 << bit))
}

#[must_use]
pub const fn hamming64(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
