//! SQL identifier quoting.

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use relmodel_core::quote_ident;
///
/// assert_eq!(quote_ident("student"), "\"student\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a dotted path such as `schema.table.column`, one segment at a time.
pub fn quote_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|segment| quote_ident(segment))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_simple() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident(""), "\"\"");
    }

    #[test]
    fn test_quote_ident_embedded_quote() {
        assert_eq!(quote_ident("a\"b\"c"), "\"a\"\"b\"\"c\"");
    }

    #[test]
    fn test_quote_ident_keeps_dots() {
        // An alias such as `teachers.id` is a single identifier.
        assert_eq!(quote_ident("teachers.id"), "\"teachers.id\"");
    }

    #[test]
    fn test_quote_path() {
        assert_eq!(
            quote_path(&["public", "student", "id"]),
            "\"public\".\"student\".\"id\""
        );
    }
}
