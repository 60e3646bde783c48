//! Stable annotation keys derived from image paths.
//!
//! An [`AnnotationKey`] is the path of an image relative to its workspace
//! root, with `/` as the only separator. It never encodes listing order or
//! an enumeration index, so adding, removing or renaming sibling files
//! cannot change the key of an unrelated image.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::path::{Component, Path};

use crate::error::AnnostoreError;

/// Canonical separator inside an [`AnnotationKey`].
pub const KEY_SEPARATOR: char = '/';

/// Stable identifier of one image's annotation record.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AnnotationKey(String);

impl AnnotationKey {
    /// Parses an existing key string, rejecting anything non-canonical.
    ///
    /// # Errors
    /// Returns [`AnnostoreError::InvalidPath`] when the key is empty, absolute,
    /// contains a backslash, NUL, drive prefix, or an empty/`.`/`..` segment.
    pub fn parse(key: impl Into<String>) -> Result<Self, AnnostoreError> {
        let key = key.into();
        if let Err(reason) = check_key(&key) {
            return Err(AnnostoreError::InvalidPath { path: key, reason });
        }
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path segment (the image file name).
    pub fn file_name(&self) -> &str {
        self.0
            .rsplit_once(KEY_SEPARATOR)
            .map_or(self.0.as_str(), |(_, name)| name)
    }

    /// The folder part of the key, if the image lives in a subfolder.
    pub fn parent(&self) -> Option<&str> {
        self.0.rsplit_once(KEY_SEPARATOR).map(|(dir, _)| dir)
    }

    /// Returns true if the image lives directly under the workspace root.
    pub fn is_flat(&self) -> bool {
        !self.0.contains(KEY_SEPARATOR)
    }

    /// Number of path segments in the key.
    pub fn depth(&self) -> usize {
        self.0.split(KEY_SEPARATOR).count()
    }
}

fn check_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("key is empty".to_string());
    }
    if key.starts_with(KEY_SEPARATOR) {
        return Err("key must be relative".to_string());
    }
    if key.contains('\\') {
        return Err("key contains a backslash; '/' is the only separator".to_string());
    }
    if key.contains('\0') {
        return Err("key contains a NUL byte".to_string());
    }
    let first = key.split(KEY_SEPARATOR).next().unwrap_or_default();
    let bytes = first.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err("key starts with a drive prefix".to_string());
    }
    for segment in key.split(KEY_SEPARATOR) {
        match segment {
            "" => return Err("key contains an empty segment".to_string()),
            "." | ".." => return Err(format!("key contains a '{}' segment", segment)),
            _ => {}
        }
    }
    Ok(())
}

impl TryFrom<String> for AnnotationKey {
    type Error = AnnostoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for AnnotationKey {
    type Error = AnnostoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AnnotationKey> for String {
    fn from(key: AnnotationKey) -> Self {
        key.0
    }
}

impl Borrow<str> for AnnotationKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AnnotationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AnnotationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnnotationKey({:?})", self.0)
    }
}

impl fmt::Display for AnnotationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the stable key of an image from its path.
///
/// `image_path` is normally absolute; a relative path is taken relative to
/// `root_dir`. Both paths are normalized lexically (`.` dropped, `..`
/// applied) without touching the filesystem, so symlinks are not resolved.
///
/// # Errors
/// Returns [`AnnostoreError::InvalidPath`] if the image resolves outside
/// `root_dir`, names `root_dir` itself, or has a segment that is not valid
/// UTF-8 or not allowed in a key.
pub fn derive_key(root_dir: &Path, image_path: &Path) -> Result<AnnotationKey, AnnostoreError> {
    let invalid = |reason: &str| AnnostoreError::InvalidPath {
        path: image_path.display().to_string(),
        reason: reason.to_string(),
    };

    let joined = root_dir.join(image_path);
    let root = normalize_lexically(root_dir);
    let full = normalize_lexically(&joined);

    if !full.starts_with(&root) {
        return Err(invalid(&format!(
            "resolves outside the workspace root '{}'",
            root_dir.display()
        )));
    }

    let relative = &full[root.len()..];
    if relative.is_empty() {
        return Err(invalid("names the workspace root itself"));
    }

    let mut segments = Vec::with_capacity(relative.len());
    for component in relative {
        match component {
            Component::Normal(segment) => {
                let segment = segment
                    .to_str()
                    .ok_or_else(|| invalid("contains a segment that is not valid UTF-8"))?;
                segments.push(segment);
            }
            _ => return Err(invalid("resolves outside the workspace root")),
        }
    }

    AnnotationKey::parse(segments.join("/")).map_err(|err| match err {
        AnnostoreError::InvalidPath { reason, .. } => invalid(&reason),
        other => other,
    })
}

/// Resolves `.` and `..` without consulting the filesystem.
fn normalize_lexically(path: &Path) -> Vec<Component<'_>> {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // The parent of a filesystem root is the root itself.
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(Component::ParentDir),
            },
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn root() -> PathBuf {
        PathBuf::from("/data/images")
    }

    #[test]
    fn test_flat_key() {
        let key = derive_key(&root(), Path::new("/data/images/photo.jpg")).unwrap();
        assert_eq!(key.as_str(), "photo.jpg");
        assert!(key.is_flat());
    }

    #[test]
    fn test_subfolder_key_preserves_case() {
        let key = derive_key(&root(), Path::new("/data/images/Batch_A/IMG_01.JPG")).unwrap();
        assert_eq!(key.as_str(), "Batch_A/IMG_01.JPG");
        assert_eq!(key.file_name(), "IMG_01.JPG");
        assert_eq!(key.parent(), Some("Batch_A"));
        assert_eq!(key.depth(), 2);
    }

    #[test]
    fn test_trailing_separator_on_root_is_ignored() {
        let key = derive_key(Path::new("/data/images/"), Path::new("/data/images/a.png")).unwrap();
        assert_eq!(key.as_str(), "a.png");
    }

    #[test]
    fn test_dot_segments_are_resolved() {
        let key = derive_key(&root(), Path::new("/data/images/./x/../y/b.jpg")).unwrap();
        assert_eq!(key.as_str(), "y/b.jpg");
    }

    #[test]
    fn test_relative_image_path_is_taken_from_root() {
        let key = derive_key(&root(), Path::new("sub/c.jpg")).unwrap();
        assert_eq!(key.as_str(), "sub/c.jpg");
    }

    #[test]
    fn test_traversal_outside_root_is_rejected() {
        let err = derive_key(&root(), Path::new("/data/images/../secret.jpg")).unwrap_err();
        assert!(matches!(err, AnnostoreError::InvalidPath { .. }));

        let err = derive_key(&root(), Path::new("../../etc/passwd")).unwrap_err();
        assert!(matches!(err, AnnostoreError::InvalidPath { .. }));
    }

    #[test]
    fn test_sibling_directory_with_common_prefix_is_rejected() {
        let err = derive_key(&root(), Path::new("/data/images2/a.jpg")).unwrap_err();
        assert!(matches!(err, AnnostoreError::InvalidPath { .. }));
    }

    #[test]
    fn test_root_itself_is_rejected() {
        assert!(derive_key(&root(), Path::new("/data/images")).is_err());
        assert!(derive_key(&root(), Path::new("/data/images/sub/..")).is_err());
    }

    #[test]
    fn test_parse_rejects_non_canonical_keys() {
        for bad in [
            "",
            "/abs.jpg",
            "a\\b.jpg",
            "a//b.jpg",
            "./a.jpg",
            "a/../b.jpg",
            "C:/x.jpg",
            "dir/",
        ] {
            assert!(AnnotationKey::parse(bad).is_err(), "accepted {:?}", bad);
        }
        assert!(AnnotationKey::parse("0001_a.jpg").is_ok());
        assert!(AnnotationKey::parse("a b/c.d.jpg").is_ok());
    }

    #[test]
    fn test_key_deserialization_validates() {
        let key: AnnotationKey = serde_json::from_str("\"sub/a.jpg\"").unwrap();
        assert_eq!(key.as_str(), "sub/a.jpg");
        assert!(serde_json::from_str::<AnnotationKey>("\"../a.jpg\"").is_err());
    }

    #[test]
    fn test_borrow_allows_str_lookup() {
        use std::collections::BTreeMap;
        let mut map = BTreeMap::new();
        map.insert(AnnotationKey::parse("a.jpg").unwrap(), 1);
        assert_eq!(map.get("a.jpg"), Some(&1));
    }
}
