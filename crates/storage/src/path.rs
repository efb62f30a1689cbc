//! Path normalization and root/relative conversion.
//!
//! Backend paths are plain strings, not [`std::path::Path`]: a remote SFTP
//! path is not a local OS path, and trailing separators carry meaning here
//! (a relative path computed from `dir/` keeps its trailing `/`). Every
//! function is pure and normalizes both `/` and `\` to `/` first.

/// Separators recognized by [`normalize`].
pub const SEPARATORS: [char; 2] = ['/', '\\'];
/// The separator every normalized path uses.
pub const SEPARATOR: char = '/';

/// Replace every character in `separators` with `target`.
///
/// ```
/// use chainbak_storage::path::correct_separators;
/// assert_eq!(correct_separators("a\\b/c", &['/', '\\'], '/'), "a/b/c");
/// ```
pub fn correct_separators(path: &str, separators: &[char], target: char) -> String {
    path.chars().map(|c| if separators.contains(&c) { target } else { c }).collect()
}

/// Normalize all recognized separators to `/`.
pub fn normalize(path: &str) -> String {
    correct_separators(path, &SEPARATORS, SEPARATOR)
}

/// Express `absolute` relative to `root`.
///
/// Trailing separators on `root` are ignored, leading separators on the
/// result are trimmed and trailing separators on `absolute` are kept. The
/// root must match on a component boundary; when it doesn't occur in
/// `absolute` at all, the normalized `absolute` is returned as-is.
///
/// ```
/// use chainbak_storage::path::relative_path;
/// assert_eq!(relative_path("/home", "/home/user/documents/files"), "user/documents/files");
/// assert_eq!(relative_path("/", "/usr/lib"), "usr/lib");
/// ```
pub fn relative_path(root: &str, absolute: &str) -> String {
    let root = normalize(root);
    let root = root.trim_end_matches(SEPARATOR);
    let absolute = normalize(absolute);

    let on_boundary = |rest: &str| rest.is_empty() || rest.starts_with(SEPARATOR) || root.is_empty();
    let remainder = absolute
        .match_indices(root)
        .map(|(index, _)| &absolute[index + root.len()..])
        .find(|rest| on_boundary(rest));
    match remainder {
        Some(rest) => rest.trim_start_matches(SEPARATOR).to_string(),
        None => absolute,
    }
}

/// Parent directory of `path`, ignoring any trailing separator.
///
/// The parent of a top-level absolute entry is `/` (or the drive root), the
/// parent of a bare name is the empty string.
pub fn parent(path: &str) -> String {
    let path = normalize(path);
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(0) => SEPARATOR.to_string(),
        Some(index) if is_drive(&trimmed[..index]) => format!("{}{SEPARATOR}", &trimmed[..index]),
        Some(index) => trimmed[..index].to_string(),
        None => String::new(),
    }
}

/// Join `relative` onto `root` with exactly one separator between them.
pub fn combine(root: &str, relative: &str) -> String {
    let root = normalize(root);
    let relative = normalize(relative);
    if relative.is_empty() {
        return root;
    }
    if root.is_empty() {
        return relative;
    }
    format!("{}{SEPARATOR}{}", root.trim_end_matches(SEPARATOR), relative.trim_start_matches(SEPARATOR))
}

/// Last component of `path`, ignoring any trailing separator.
pub fn file_name(path: &str) -> String {
    let path = normalize(path);
    path.trim_end_matches(SEPARATOR).rsplit(SEPARATOR).next().unwrap_or_default().to_string()
}

/// `true` for the filesystem root (`/`, `""` or a drive root like `C:/`).
///
/// Creating or deleting the root is a silent no-op on every backend.
pub fn is_root(path: &str) -> bool {
    let path = normalize(path);
    let trimmed = path.trim_end_matches(SEPARATOR);
    trimmed.is_empty() || is_drive(trimmed)
}

fn is_drive(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!((chars.next(), chars.next(), chars.next()), (Some(letter), Some(':'), None) if letter.is_ascii_alphabetic())
}
