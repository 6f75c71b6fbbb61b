//! On-disk artifact layout.
//!
//! ```text
//! <output_root>/
//!   partial/<segment-id>_<hash12>.<ext>   # one per cached segment
//!   preview/<segment-id>_<hash12>.<ext>   # throwaway previews
//!   output/<name>.<ext>                   # combined artifacts
//! ```
//!
//! The filename IS the manifest: an artifact is valid iff its name embeds
//! the segment's current content hash and the file is nonempty. A single
//! engine instance owns the partial directory.

use std::fs;
use std::path::{Path, PathBuf};

use reel_core::{ContentHash, Segment, SegmentId};

/// Resolves artifact paths under one output root.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    output_root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        ArtifactLayout {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn partial_dir(&self) -> PathBuf {
        self.output_root.join("partial")
    }

    pub fn preview_dir(&self) -> PathBuf {
        self.output_root.join("preview")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_root.join("output")
    }

    /// Creates the partial and output directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.partial_dir())?;
        fs::create_dir_all(self.output_dir())
    }

    /// `partial/<id>_<hash>.<ext>`, the canonical cached-artifact path.
    pub fn partial_path(&self, id: &SegmentId, hash: &ContentHash, ext: &str) -> PathBuf {
        self.partial_dir().join(format!("{}_{}.{}", id, hash, ext))
    }

    /// `preview/<id>_<hash>.<ext>`.
    pub fn preview_path(&self, id: &SegmentId, hash: &ContentHash, ext: &str) -> PathBuf {
        self.preview_dir().join(format!("{}_{}.{}", id, hash, ext))
    }

    /// Sibling temp path used for write-then-rename publication.
    pub fn tmp_path(&self, final_path: &Path) -> PathBuf {
        let mut name = final_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        final_path.with_file_name(name)
    }

    /// True iff the segment's recorded artifact exists, is nonempty, and
    /// its filename embeds the segment's current content hash.
    pub fn is_valid_artifact(&self, segment: &Segment) -> bool {
        let Some(path) = segment.artifact_path() else {
            return false;
        };
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let expected = format!("{}_{}", segment.id(), segment.content_hash());
        if !name.starts_with(&expected) {
            return false;
        }
        fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::{Construct, Metadata, Segment};
    use tempfile::tempdir;

    fn sid(s: &str) -> SegmentId {
        SegmentId::new(s).unwrap()
    }

    #[test]
    fn paths_follow_the_naming_convention() {
        let layout = ArtifactLayout::new("/renders");
        let seg = Segment::create(
            sid("intro"),
            Construct::noop("intro-v1"),
            vec![],
            Metadata::new(),
        )
        .unwrap();
        let path = layout.partial_path(seg.id(), seg.content_hash(), "mp4");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("intro_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(path.parent().unwrap(), Path::new("/renders/partial"));
    }

    #[test]
    fn tmp_path_appends_suffix() {
        let layout = ArtifactLayout::new("/renders");
        let tmp = layout.tmp_path(Path::new("/renders/partial/a_123.mp4"));
        assert_eq!(tmp, Path::new("/renders/partial/a_123.mp4.tmp"));
    }

    #[test]
    fn artifact_validity_checks_hash_and_size() {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        layout.ensure_dirs().unwrap();

        let seg = Segment::create(
            sid("intro"),
            Construct::noop("intro-v1"),
            vec![],
            Metadata::new(),
        )
        .unwrap();
        let path = layout.partial_path(seg.id(), seg.content_hash(), "mp4");

        // Not cached yet: no artifact path recorded.
        assert!(!layout.is_valid_artifact(&seg));

        let cached = seg
            .mark_rendering()
            .unwrap()
            .mark_cached(path.clone())
            .unwrap();
        // File missing.
        assert!(!layout.is_valid_artifact(&cached));
        // Empty file.
        fs::write(&path, b"").unwrap();
        assert!(!layout.is_valid_artifact(&cached));
        // Real content.
        fs::write(&path, b"frames").unwrap();
        assert!(layout.is_valid_artifact(&cached));

        // Hash mismatch in the recorded filename is rejected.
        let stale = layout.partial_path(cached.id(), &ContentHash::placeholder(), "mp4");
        fs::write(&stale, b"frames").unwrap();
        let mismarked = cached
            .mark_dirty()
            .mark_rendering()
            .unwrap()
            .mark_cached(stale)
            .unwrap();
        // mark_dirty changed nothing about the hash, but the recorded file
        // embeds the placeholder hash, which no longer matches.
        assert!(!layout.is_valid_artifact(&mismarked));
    }
}
