//! Release manifest model, validation and locking.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::archive::sha256_hex;
use crate::error::{ArchiveError, Result};
use crate::utils::fs::safe_relative_path;

/// Key under `checks` holding the manifest hash.
pub const SHA256_KEY: &str = "sha256_manifest";

/// Name of the locked manifest inside a bundle.
pub const LOCKED_MANIFEST_NAME: &str = "release.manifest.lock.json";

static RELEASE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z0-9][a-z0-9._-]{2,}$").expect("release id pattern is valid")
});

fn default_mode() -> String {
    "0644".to_string()
}

fn default_kind() -> String {
    "file".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(default)]
    pub tombstone: String,
    #[serde(default)]
    pub dest_path: String,
    /// Octal permission string.
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// `{{key}}` placeholders substituted at unpack time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_vars: Option<BTreeMap<String, Value>>,
}

impl Component {
    /// Parsed permission bits.
    pub fn mode_bits(&self) -> Result<u32> {
        parse_mode(&self.mode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symlink {
    #[serde(default)]
    pub link_path: String,
    #[serde(default)]
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub release_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub actor: String,
    #[serde(default)]
    pub target: Value,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub symlinks: Vec<Symlink>,
    #[serde(default)]
    pub post_unpack_commands: Vec<String>,
    #[serde(default)]
    pub checks: Map<String, Value>,
}

impl Manifest {
    /// The locked hash, if this manifest has been packed.
    #[must_use]
    pub fn sha256_manifest(&self) -> Option<&str> {
        self.checks.get(SHA256_KEY).and_then(Value::as_str)
    }
}

fn parse_mode(raw: &str) -> Result<u32> {
    let digits = raw.trim().trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(bits) if !digits.is_empty() && bits <= 0o7777 => Ok(bits),
        _ => Err(ArchiveError::Validation(format!(
            "invalid octal mode: {raw:?}"
        ))),
    }
}

fn require(ok: bool, message: impl Into<String>) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(ArchiveError::Validation(message.into()))
    }
}

/// Check every invariant of a manifest.
///
/// Path-traversal problems surface as [`ArchiveError::UnsafePath`]; everything
/// else as [`ArchiveError::Validation`].
pub fn validate_manifest(manifest: &Manifest) -> Result<()> {
    require(
        RELEASE_ID.is_match(&manifest.release_id),
        format!("invalid or missing release_id: {:?}", manifest.release_id),
    )?;
    require(!manifest.version.trim().is_empty(), "missing version")?;
    require(!manifest.created_at.trim().is_empty(), "missing created_at")?;
    require(!manifest.actor.trim().is_empty(), "missing actor")?;
    require(!manifest.components.is_empty(), "missing components[]")?;

    for component in &manifest.components {
        require(
            !component.tombstone.trim().is_empty(),
            "component missing tombstone",
        )?;
        require(
            !component.dest_path.trim().is_empty(),
            "component missing dest_path",
        )?;
        safe_relative_path(&component.dest_path)?;
        component.mode_bits()?;
        require(
            component.kind == "file",
            format!(
                "unsupported component type {:?} for {}",
                component.kind, component.dest_path
            ),
        )?;
    }
    for link in &manifest.symlinks {
        require(!link.link_path.trim().is_empty(), "symlink missing link_path")?;
        require(!link.target.trim().is_empty(), "symlink missing target")?;
        safe_relative_path(&link.link_path)?;
    }
    Ok(())
}

/// Read and validate a manifest file.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ArchiveError::NotFound(format!("manifest not found: {}", path.display()))
        } else {
            ArchiveError::Io(err)
        }
    })?;
    parse_manifest(&raw)
}

pub fn parse_manifest(raw: &str) -> Result<Manifest> {
    let value: Value = serde_json::from_str(raw)?;
    manifest_from_value(&value)
}

pub(crate) fn manifest_from_value(value: &Value) -> Result<Manifest> {
    if !value.is_object() {
        return Err(ArchiveError::Validation(
            "manifest must be a JSON object".to_string(),
        ));
    }
    let manifest: Manifest = serde_json::from_value(value.clone())?;
    validate_manifest(&manifest)?;
    Ok(manifest)
}

/// SHA-256 over the manifest's canonical JSON, excluding the hash itself.
///
/// Canonical form: keys sorted (serde_json maps are ordered), compact
/// separators, `checks.sha256_manifest` removed and `checks` dropped when that
/// leaves it empty.
pub fn canonical_manifest_hash(manifest: &Value) -> Result<String> {
    let mut for_hash = manifest.clone();
    if let Value::Object(root) = &mut for_hash {
        let drop_checks = match root.get_mut("checks") {
            Some(Value::Object(checks)) => {
                checks.remove(SHA256_KEY);
                checks.is_empty()
            }
            _ => false,
        };
        if drop_checks {
            root.remove("checks");
        }
    }
    let canonical = serde_json::to_string(&for_hash)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Copy of `manifest` with `checks.sha256_manifest` filled in.
pub fn lock_manifest(manifest: &Value) -> Result<(Value, String)> {
    let sha = canonical_manifest_hash(manifest)?;
    let mut locked = manifest.clone();
    let Value::Object(root) = &mut locked else {
        return Err(ArchiveError::Validation(
            "manifest must be a JSON object".to_string(),
        ));
    };
    let checks = root
        .entry("checks")
        .or_insert_with(|| Value::Object(Map::new()));
    if !checks.is_object() {
        *checks = Value::Object(Map::new());
    }
    if let Value::Object(checks) = checks {
        checks.insert(SHA256_KEY.to_string(), Value::String(sha.clone()));
    }
    Ok((locked, sha))
}

/// Starter manifest for `release init-manifest`.
pub fn init_manifest(release_id: &str, version: &str, actor: &str) -> Result<Value> {
    require(
        RELEASE_ID.is_match(release_id),
        format!("invalid release_id: {release_id:?}"),
    )?;
    require(!version.trim().is_empty(), "missing version")?;
    Ok(json!({
        "release_id": release_id,
        "version": version,
        "created_at": Utc::now().to_rfc3339(),
        "actor": actor,
        "target": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "components": [
            {
                "tombstone": "<tombstone-id>",
                "dest_path": "bin/app",
                "mode": "0755",
                "type": "file",
            }
        ],
        "symlinks": [],
        "post_unpack_commands": [],
        "checks": {},
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Value {
        json!({
            "release_id": "codex-app",
            "version": "1.0.0",
            "created_at": "2025-01-01T00:00:00Z",
            "actor": "release-bot",
            "target": {"os": "linux"},
            "components": [
                {"tombstone": "t1", "dest_path": "bin/app", "mode": "0755"},
                {"tombstone": "t2", "dest_path": "etc/app.json", "template_vars": {"app": "codex"}}
            ],
            "symlinks": [{"link_path": "current", "target": "bin/app"}],
        })
    }

    fn with(mut value: Value, key: &str, field: Value) -> Value {
        value[key] = field;
        value
    }

    // ===== validation =====

    #[test]
    fn valid_manifest_loads_with_defaults() {
        let manifest = manifest_from_value(&valid()).unwrap();
        assert_eq!(manifest.components.len(), 2);
        assert_eq!(manifest.components[1].mode, "0644");
        assert_eq!(manifest.components[1].kind, "file");
        assert_eq!(manifest.components[0].mode_bits().unwrap(), 0o755);
        assert_eq!(manifest.sha256_manifest(), None);
    }

    #[test]
    fn missing_components_is_validation_error() {
        let mut value = valid();
        value.as_object_mut().unwrap().remove("components");
        let err = manifest_from_value(&value).unwrap_err();
        assert!(matches!(err, ArchiveError::Validation(_)));
        assert!(err.to_string().contains("components"));

        let err = manifest_from_value(&with(valid(), "components", json!([]))).unwrap_err();
        assert!(matches!(err, ArchiveError::Validation(_)));
    }

    #[test]
    fn release_id_pattern() {
        for bad in ["ab", "-abc", "has space", ""] {
            assert!(manifest_from_value(&with(valid(), "release_id", json!(bad))).is_err());
        }
        for good in ["abc", "Codex.App_1-2", "0ab"] {
            assert!(manifest_from_value(&with(valid(), "release_id", json!(good))).is_ok());
        }
    }

    #[test]
    fn unsafe_paths_rejected() {
        let bad_dest = with(
            valid(),
            "components",
            json!([{"tombstone": "t", "dest_path": "../etc/passwd"}]),
        );
        assert!(matches!(
            manifest_from_value(&bad_dest).unwrap_err(),
            ArchiveError::UnsafePath(_)
        ));
        let abs_dest = with(
            valid(),
            "components",
            json!([{"tombstone": "t", "dest_path": "/etc/passwd"}]),
        );
        assert!(manifest_from_value(&abs_dest).is_err());
        let bad_link = with(
            valid(),
            "symlinks",
            json!([{"link_path": "a/../../x", "target": "y"}]),
        );
        assert!(manifest_from_value(&bad_link).is_err());
    }

    #[test]
    fn bad_mode_and_type_rejected() {
        let bad_mode = with(
            valid(),
            "components",
            json!([{"tombstone": "t", "dest_path": "a", "mode": "0999"}]),
        );
        assert!(manifest_from_value(&bad_mode).is_err());
        let bad_type = with(
            valid(),
            "components",
            json!([{"tombstone": "t", "dest_path": "a", "type": "dir"}]),
        );
        assert!(manifest_from_value(&bad_type).is_err());
    }

    #[test]
    fn empty_required_strings_rejected() {
        for key in ["version", "created_at", "actor"] {
            let err = manifest_from_value(&with(valid(), key, json!(""))).unwrap_err();
            assert!(err.to_string().contains(key), "{key}");
        }
    }

    // ===== hashing =====

    #[test]
    fn lock_hash_ignores_its_own_field() {
        let (locked, sha) = lock_manifest(&valid()).unwrap();
        assert_eq!(locked["checks"][SHA256_KEY], sha);
        assert_eq!(canonical_manifest_hash(&locked).unwrap(), sha);
        assert_eq!(canonical_manifest_hash(&valid()).unwrap(), sha);
    }

    #[test]
    fn hash_is_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":3,"y":2},"b":1}"#).unwrap();
        assert_eq!(
            canonical_manifest_hash(&a).unwrap(),
            canonical_manifest_hash(&b).unwrap()
        );
    }

    #[test]
    fn other_checks_are_hashed() {
        let plain = canonical_manifest_hash(&valid()).unwrap();
        let extra = canonical_manifest_hash(&with(valid(), "checks", json!({"signed": true})))
            .unwrap();
        assert_ne!(plain, extra);
    }

    #[test]
    fn init_template_is_loadable() {
        let template = init_manifest("codex-app", "0.1.0", "me").unwrap();
        let manifest = manifest_from_value(&template).unwrap();
        assert_eq!(manifest.components[0].mode_bits().unwrap(), 0o755);
        assert!(init_manifest("x", "1", "me").is_err());
    }
}
