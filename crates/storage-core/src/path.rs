use crate::error::{PathError, Result, StorageError};

/// A relative path split into directory segments and the final file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelativePath<'a> {
    pub dirs: Vec<&'a str>,
    pub file_name: &'a str,
}

/// Split `a/b/c.txt` into `["a", "b"]` and `c.txt`.
///
/// A leading separator is ignored. Empty paths, a trailing separator,
/// consecutive separators and `.`/`..` segments are rejected.
pub(crate) fn split_relative_path(path: &str) -> Result<RelativePath<'_>> {
    let invalid = |reason| StorageError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(invalid(PathError::Empty));
    }
    if trimmed.ends_with('/') {
        return Err(invalid(PathError::DoesNotContainFileName));
    }
    if trimmed.contains("//") {
        return Err(invalid(PathError::ConsecutiveSeparator));
    }

    let mut segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(invalid(PathError::DotSegment));
    }
    let file_name = segments.pop().ok_or_else(|| invalid(PathError::DoesNotContainFileName))?;

    Ok(RelativePath {
        dirs: segments,
        file_name,
    })
}

/// `report.txt` with n = 2 becomes `report(2).txt`; the counter goes before the extension
pub(crate) fn numbered_name(file_name: &str, n: u64) -> String {
    match file_name.rfind('.') {
        Some(i) if i > 0 => format!("{}({}){}", &file_name[..i], n, &file_name[i..]),
        _ => format!("{}({})", file_name, n),
    }
}

/// MIME type from the file extension, or `fallback`
pub(crate) fn guess_mime_type(file_name: &str, fallback: &str) -> String {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(path: &str) -> PathError {
        match split_relative_path(path) {
            Err(StorageError::InvalidPath { reason, .. }) => reason,
            other => panic!("expected InvalidPath for {:?}, got {:?}", path, other),
        }
    }

    #[test]
    fn test_split_nested() {
        let rel = split_relative_path("/a/b/c.txt").unwrap();
        assert_eq!(rel.dirs, vec!["a", "b"]);
        assert_eq!(rel.file_name, "c.txt");

        let rel = split_relative_path("c.txt").unwrap();
        assert!(rel.dirs.is_empty());
        assert_eq!(rel.file_name, "c.txt");
    }

    #[test]
    fn test_split_rejections() {
        assert_eq!(reason(""), PathError::Empty);
        assert_eq!(reason("///"), PathError::Empty);
        assert_eq!(reason("a/"), PathError::DoesNotContainFileName);
        assert_eq!(reason("a//b.txt"), PathError::ConsecutiveSeparator);
        assert_eq!(reason("../b.txt"), PathError::DotSegment);
        assert_eq!(reason("a/./b.txt"), PathError::DotSegment);
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("report.txt", 1), "report(1).txt");
        assert_eq!(numbered_name("archive.tar.gz", 3), "archive.tar(3).gz");
        assert_eq!(numbered_name("Makefile", 2), "Makefile(2)");
        assert_eq!(numbered_name(".profile", 1), ".profile(1)");
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type("a.png", "application/octet-stream"), "image/png");
        assert_eq!(
            guess_mime_type("a.unknownext", "application/octet-stream"),
            "application/octet-stream"
        );
    }
}
