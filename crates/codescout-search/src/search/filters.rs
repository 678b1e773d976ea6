//! Post-filters applied to raw vector hits
//!
//! Directory filters are a prefix on `/`-separated segments; language
//! filters go through a fixed language-name to extension map, with a
//! direct extension match taking precedence.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Fixed language-name to file-extension map.
///
/// Keys are lowercase language names as users type them; a language
/// missing here can still be filtered by passing the extension itself.
static LANGUAGE_EXTENSIONS: Lazy<HashMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| {
        let mut map: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        map.insert("typescript", &["ts", "tsx"]);
        map.insert("javascript", &["js", "jsx", "mjs", "cjs"]);
        map.insert("python", &["py", "pyw"]);
        map.insert("go", &["go"]);
        map.insert("golang", &["go"]);
        map.insert("rust", &["rs"]);
        map.insert("java", &["java"]);
        map.insert("csharp", &["cs"]);
        map.insert("c#", &["cs"]);
        map.insert("c", &["c", "h"]);
        map.insert("cpp", &["cpp", "cc", "cxx", "hpp", "hh"]);
        map.insert("c++", &["cpp", "cc", "cxx", "hpp", "hh"]);
        map.insert("ruby", &["rb"]);
        map.insert("php", &["php"]);
        map.insert("swift", &["swift"]);
        map.insert("kotlin", &["kt", "kts"]);
        map.insert("scala", &["scala"]);
        map.insert("shell", &["sh", "bash"]);
        map.insert("bash", &["sh", "bash"]);
        map.insert("html", &["html", "htm"]);
        map.insert("css", &["css", "scss", "less"]);
        map.insert("markdown", &["md", "markdown"]);
        map.insert("json", &["json"]);
        map.insert("yaml", &["yml", "yaml"]);
        map.insert("toml", &["toml"]);
        map.insert("sql", &["sql"]);
        map
    });

/// Extensions mapped to a language name, if the name is known
pub fn language_extensions(language: &str) -> Option<&'static [&'static str]> {
    LANGUAGE_EXTENSIONS
        .get(language.trim().to_lowercase().as_str())
        .copied()
}

fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() { None } else { Some(ext) }
}

/// Whether a path survives a language filter.
///
/// A direct extension match (`"ts"` matching `a.ts`) works even for
/// languages missing from the map; otherwise the filter value is treated
/// as a language name and resolved through the map. An unknown name with
/// no direct match drops the path.
pub fn matches_language(path: &str, language: &str) -> bool {
    let wanted = language.trim().to_lowercase();
    if wanted.is_empty() {
        return true;
    }
    let Some(ext) = extension_of(path) else {
        return false;
    };
    let ext = ext.to_lowercase();
    if ext == wanted {
        return true;
    }
    language_extensions(&wanted).is_some_and(|exts| exts.contains(&ext.as_str()))
}

/// Normalize a directory filter: trim, backslash to slash, strip
/// leading/trailing slashes. Empty output means "keep everything".
pub fn normalize_directory(filter: &str) -> String {
    filter
        .trim()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Whether a path is the directory itself or below it.
///
/// The match is per `/`-segment: `"a/b"` matches `a/b` and `a/b/c.ts`,
/// never `a/bc.ts`.
pub fn matches_directory(path: &str, normalized_dir: &str) -> bool {
    if normalized_dir.is_empty() {
        return true;
    }
    path == normalized_dir || path.starts_with(&format!("{normalized_dir}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_map_typescript_and_python() {
        assert!(matches_language("src/app.ts", "typescript"));
        assert!(matches_language("src/app.tsx", "typescript"));
        assert!(matches_language("tool.py", "python"));
        assert!(matches_language("tool.pyw", "python"));
        assert!(!matches_language("main.go", "typescript"));
    }

    #[test]
    fn test_golang_aliases() {
        assert!(matches_language("main.go", "go"));
        assert!(matches_language("main.go", "golang"));
    }

    #[test]
    fn test_direct_extension_match_without_map_entry() {
        // "ts" is not a language name in the map, but matches .ts directly
        assert!(matches_language("src/app.ts", "ts"));
        assert!(matches_language("src/query.sql", "sql"));
    }

    #[test]
    fn test_unknown_language_drops() {
        assert!(!matches_language("src/app.ts", "cobol"));
    }

    #[test]
    fn test_no_extension_drops() {
        assert!(!matches_language("Makefile", "python"));
    }

    #[test]
    fn test_normalize_directory() {
        assert_eq!(normalize_directory("  /a/b/ "), "a/b");
        assert_eq!(normalize_directory("a\\b\\c"), "a/b/c");
        assert_eq!(normalize_directory("/"), "");
        assert_eq!(normalize_directory(""), "");
    }

    #[test]
    fn test_directory_is_segment_prefix() {
        assert!(matches_directory("a/b", "a/b"));
        assert!(matches_directory("a/b/c.ts", "a/b"));
        assert!(!matches_directory("a/bc.ts", "a/b"));
        assert!(matches_directory("anything.rs", ""));
    }
}
