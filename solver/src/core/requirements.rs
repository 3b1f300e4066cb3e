//! Package specifier normalization for manifest comparison.

use std::collections::HashSet;

/// Version operators that terminate the package name.
const VERSION_OPERATORS: [&str; 6] = ["==", ">=", "<=", ">", "<", "~="];

/// Package name of a specifier: text before the earliest version operator,
/// trimmed and lowercased.
///
/// `"NumPy==1.24.3"` and `"numpy >= 1.0"` both normalize to `"numpy"`.
pub fn normalize_name(spec: &str) -> String {
    let cut = VERSION_OPERATORS
        .iter()
        .filter_map(|op| spec.find(op))
        .min()
        .unwrap_or(spec.len());
    spec[..cut].trim().to_lowercase()
}

/// Normalized names of every entry in manifest text.
///
/// Blank lines and `#` comments are ignored.
pub fn manifest_names(contents: &str) -> HashSet<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(normalize_name)
        .collect()
}

/// Requested entries whose normalized name is not in `known`, in request order.
pub fn missing_from(requested: &[String], known: &HashSet<String>) -> Vec<String> {
    requested
        .iter()
        .filter(|spec| !known.contains(&normalize_name(spec)))
        .cloned()
        .collect()
}

/// Like [`missing_from`], but also drops later entries that repeat a name
/// already selected, so each name is chosen once.
pub fn unique_missing(requested: &[String], known: &HashSet<String>) -> Vec<String> {
    let mut seen = known.clone();
    requested
        .iter()
        .filter(|spec| seen.insert(normalize_name(spec)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalize_strips_every_operator() {
        assert_eq!(normalize_name("numpy==1.24.3"), "numpy");
        assert_eq!(normalize_name("requests>=2.28.0"), "requests");
        assert_eq!(normalize_name("flask<=2.3"), "flask");
        assert_eq!(normalize_name("pandas>1"), "pandas");
        assert_eq!(normalize_name("scipy<2"), "scipy");
        assert_eq!(normalize_name("attrs~=23.1"), "attrs");
        assert_eq!(normalize_name("  Python-Dotenv  "), "python-dotenv");
    }

    #[test]
    fn normalize_cuts_at_earliest_operator() {
        assert_eq!(normalize_name("pkg<3,>=1"), "pkg");
        assert_eq!(normalize_name("Pkg >= 1, != 1.5"), "pkg");
    }

    #[test]
    fn manifest_names_skip_comments_and_blanks() {
        let names = manifest_names("# pinned\nNumPy==1.0\n\n  requests  \n");
        assert_eq!(names.len(), 2);
        assert!(names.contains("numpy"));
        assert!(names.contains("requests"));
    }

    #[test]
    fn missing_keeps_original_strings_and_order() {
        let known = manifest_names("numpy\n");
        let requested = strings(&["Flask==2.3.2", "NUMPY>=1", "rich"]);
        assert_eq!(missing_from(&requested, &known), strings(&["Flask==2.3.2", "rich"]));
    }

    #[test]
    fn unique_missing_dedups_within_batch() {
        let known = manifest_names("");
        let requested = strings(&["numpy==1.0", "NumPy", "rich", "numpy"]);
        assert_eq!(
            unique_missing(&requested, &known),
            strings(&["numpy==1.0", "rich"])
        );
    }
}
