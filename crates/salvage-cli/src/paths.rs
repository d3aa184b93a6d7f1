//! Normalization of volume paths typed by the user

/// Resolve `arg` against the working directory `cwd`.
///
/// Absolute arguments replace `cwd`; `./x` and `x` are relative to it and each
/// `..` moves up one level, never above `/`. The result always ends in `/`.
/// Returns `None` when the result would not be shorter than `max_len`.
pub fn resolve(cwd: &str, arg: &str, max_len: usize) -> Option<String> {
	let mut components: Vec<&str> = if arg.starts_with('/') {
		Vec::new()
	} else {
		cwd.split('/').filter(|c| !c.is_empty()).collect()
	};

	for component in arg.split('/') {
		match component {
			"" | "." => {}
			".." => {
				components.pop();
			}
			name => components.push(name),
		}
	}

	let mut path = String::from("/");
	for component in components {
		path.push_str(component);
		path.push('/');
	}
	(path.len() < max_len).then_some(path)
}

/// Last component of a volume path, or an empty string for the root
pub fn base_name(path: &str) -> &str {
	path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_relative_paths() {
		assert_eq!(resolve("/", "docs", 1024).as_deref(), Some("/docs/"));
		assert_eq!(resolve("/docs/", "./2015", 1024).as_deref(), Some("/docs/2015/"));
		assert_eq!(resolve("/docs/", "2015/", 1024).as_deref(), Some("/docs/2015/"));
	}

	#[test]
	fn test_absolute_paths() {
		assert_eq!(resolve("/docs/", "/photos", 1024).as_deref(), Some("/photos/"));
		assert_eq!(resolve("/docs/", "/", 1024).as_deref(), Some("/"));
	}

	#[test]
	fn test_parent_paths() {
		assert_eq!(resolve("/a/b/", "../c", 1024).as_deref(), Some("/a/c/"));
		assert_eq!(resolve("/a/b/", "../../", 1024).as_deref(), Some("/"));
		// never above the root
		assert_eq!(resolve("/a/", "../../../x", 1024).as_deref(), Some("/x/"));
	}

	#[test]
	fn test_length_limit() {
		assert_eq!(resolve("/", "abc", 5).as_deref(), None);
		assert_eq!(resolve("/", "abc", 6).as_deref(), Some("/abc/"));
	}

	#[test]
	fn test_base_name() {
		assert_eq!(base_name("/docs/2015/"), "2015");
		assert_eq!(base_name("/docs"), "docs");
		assert_eq!(base_name("/"), "");
	}
}
