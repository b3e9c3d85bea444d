//! Controller <-> worker path translation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Pure, invertible translation between controller and worker paths.
pub trait PathMapper: Send + Sync {
    fn local_to_remote(&self, path: &Path) -> Result<PathBuf, RemoteError>;

    fn remote_to_local(&self, path: &Path) -> Result<PathBuf, RemoteError>;
}

/// Paths are identical on both sides.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPathMapper;

impl PathMapper for IdentityPathMapper {
    fn local_to_remote(&self, path: &Path) -> Result<PathBuf, RemoteError> {
        Ok(path.to_path_buf())
    }

    fn remote_to_local(&self, path: &Path) -> Result<PathBuf, RemoteError> {
        Ok(path.to_path_buf())
    }
}

/// One `local prefix <-> remote prefix` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMapping {
    pub local_prefix: PathBuf,
    pub remote_prefix: PathBuf,
}

impl PathMapping {
    pub fn new(local_prefix: impl Into<PathBuf>, remote_prefix: impl Into<PathBuf>) -> Self {
        Self {
            local_prefix: local_prefix.into(),
            remote_prefix: remote_prefix.into(),
        }
    }
}

/// Prefix substitution; the longest matching prefix wins. Paths under no
/// prefix cannot be translated.
#[derive(Debug, Clone)]
pub struct PrefixPathMapper {
    mappings: Vec<PathMapping>,
}

impl PrefixPathMapper {
    /// Each side's prefixes must be distinct. A remote prefix nested under
    /// another one must mirror that nesting on the local side, otherwise a
    /// translated path could come back under the wrong local prefix.
    pub fn new(mappings: Vec<PathMapping>) -> Result<Self, RemoteError> {
        for (i, a) in mappings.iter().enumerate() {
            for b in &mappings[i + 1..] {
                if a.local_prefix == b.local_prefix || a.remote_prefix == b.remote_prefix {
                    return Err(RemoteError::PathMapping {
                        path: a.local_prefix.display().to_string(),
                        reason: "prefix is mapped more than once".to_string(),
                    });
                }
            }
        }
        for outer in &mappings {
            for inner in &mappings {
                let Ok(suffix) = inner.remote_prefix.strip_prefix(&outer.remote_prefix) else {
                    continue;
                };
                if suffix.as_os_str().is_empty() || inner.local_prefix == outer.local_prefix.join(suffix) {
                    continue;
                }
                return Err(RemoteError::PathMapping {
                    path: inner.remote_prefix.display().to_string(),
                    reason: format!(
                        "nested under {} but {} is not {}",
                        outer.remote_prefix.display(),
                        inner.local_prefix.display(),
                        outer.local_prefix.join(suffix).display()
                    ),
                });
            }
        }
        Ok(Self { mappings })
    }

    pub fn mappings(&self) -> &[PathMapping] {
        &self.mappings
    }

    fn translate(
        &self,
        path: &Path,
        from: impl Fn(&PathMapping) -> &Path,
        to: impl Fn(&PathMapping) -> &Path,
    ) -> Result<PathBuf, RemoteError> {
        let best = self
            .mappings
            .iter()
            .filter(|m| path.starts_with(from(m)))
            .max_by_key(|m| from(m).components().count())
            .ok_or_else(|| RemoteError::PathMapping {
                path: path.display().to_string(),
                reason: "no matching prefix".to_string(),
            })?;
        let rest = path
            .strip_prefix(from(best))
            .map_err(|e| RemoteError::PathMapping {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(if rest.as_os_str().is_empty() {
            to(best).to_path_buf()
        } else {
            to(best).join(rest)
        })
    }
}

impl PathMapper for PrefixPathMapper {
    fn local_to_remote(&self, path: &Path) -> Result<PathBuf, RemoteError> {
        self.translate(path, |m| &m.local_prefix, |m| &m.remote_prefix)
    }

    fn remote_to_local(&self, path: &Path) -> Result<PathBuf, RemoteError> {
        self.translate(path, |m| &m.remote_prefix, |m| &m.local_prefix)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn mapper() -> PrefixPathMapper {
        PrefixPathMapper::new(vec![
            PathMapping::new("/data", "/mnt/data"),
            PathMapping::new("/data/scratch", "/scratch"),
        ])
        .unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let m = mapper();
        assert_eq!(
            m.local_to_remote(Path::new("/data/scratch/a.raw")).unwrap(),
            PathBuf::from("/scratch/a.raw")
        );
        assert_eq!(
            m.local_to_remote(Path::new("/data/b.raw")).unwrap(),
            PathBuf::from("/mnt/data/b.raw")
        );
    }

    #[test]
    fn translation_is_invertible() {
        let m = mapper();
        for p in ["/data/x/y.txt", "/data/scratch/z", "/data"] {
            let remote = m.local_to_remote(Path::new(p)).unwrap();
            assert_eq!(m.remote_to_local(&remote).unwrap(), PathBuf::from(p));
        }
    }

    #[test]
    fn prefix_matches_whole_components() {
        let m = mapper();
        assert_matches!(
            m.local_to_remote(Path::new("/database/x")),
            Err(RemoteError::PathMapping { .. })
        );
    }

    #[test]
    fn unmapped_path_is_an_error() {
        assert_matches!(
            mapper().remote_to_local(Path::new("/elsewhere/x")),
            Err(RemoteError::PathMapping { .. })
        );
    }

    #[test]
    fn duplicate_prefixes_are_rejected() {
        assert_matches!(
            PrefixPathMapper::new(vec![
                PathMapping::new("/a", "/x"),
                PathMapping::new("/b", "/x"),
            ]),
            Err(RemoteError::PathMapping { .. })
        );
    }

    #[test]
    fn remote_prefix_nested_differently_is_rejected() {
        // /a/s/f.raw would go out as /r/s/f.raw and come back as /b/f.raw.
        assert_matches!(
            PrefixPathMapper::new(vec![
                PathMapping::new("/a", "/r"),
                PathMapping::new("/b", "/r/s"),
            ]),
            Err(RemoteError::PathMapping { .. })
        );
    }

    #[test]
    fn mirrored_nesting_round_trips() {
        let m = PrefixPathMapper::new(vec![
            PathMapping::new("/a", "/r"),
            PathMapping::new("/a/s", "/r/s"),
        ])
        .unwrap();
        for p in ["/a/s/f.raw", "/a/t/f.raw", "/a/s", "/a"] {
            let remote = m.local_to_remote(Path::new(p)).unwrap();
            assert_eq!(m.remote_to_local(&remote).unwrap(), PathBuf::from(p));
        }
    }

    #[test]
    fn identity_is_a_no_op() {
        let p = Path::new("/any/where");
        assert_eq!(IdentityPathMapper.local_to_remote(p).unwrap(), p);
    }
}
