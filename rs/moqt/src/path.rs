//! Helpers for hierarchical broadcast paths.
//!
//! A broadcast path is absolute, starting with "/". A prefix additionally
//! ends with "/", and a suffix never starts with "/"; the full path is the
//! prefix concatenated with the suffix.

/// Returns true if the string is a valid broadcast path.
pub fn is_valid(path: &str) -> bool {
	path.starts_with('/')
}

/// Returns true if the string is a valid announcement prefix.
pub fn is_valid_prefix(prefix: &str) -> bool {
	prefix.starts_with('/') && prefix.ends_with('/')
}

/// The suffix of a path relative to a prefix, or None if the path does not
/// start with the prefix.
pub fn suffix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
	path.strip_prefix(prefix)
}

/// Join a prefix and a suffix back into a full path.
pub fn join(prefix: &str, suffix: &str) -> String {
	format!("{prefix}{suffix}")
}

/// The non-empty segments of a path, in order.
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
	path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn validation() {
		assert!(is_valid("/a/b"));
		assert!(is_valid("/"));
		assert!(!is_valid("a/b"));
		assert!(!is_valid(""));

		assert!(is_valid_prefix("/a/"));
		assert!(is_valid_prefix("/"));
		assert!(!is_valid_prefix("/a"));
		assert!(!is_valid_prefix("a/"));
	}

	#[test]
	fn prefix_suffix() {
		assert_eq!(suffix("/live/alice", "/live/"), Some("alice"));
		assert_eq!(suffix("/live/alice", "/vod/"), None);
		assert_eq!(join("/live/", "alice"), "/live/alice");
	}

	#[test]
	fn segmentation() {
		let segs: Vec<_> = segments("/a/b/c").collect();
		assert_eq!(segs, ["a", "b", "c"]);

		assert_eq!(segments("/").count(), 0);
	}
}
