//! SQL identifier quoting.

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
/// Safe against SQL injection for any input string.
///
/// # Examples
///
/// ```
/// use stratum_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// assert_eq!(quote_ident("select"), "\"select\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple() {
        assert_eq!(quote_ident("users"), "\"users\"");
    }

    #[test]
    fn embedded_quote() {
        assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
    }

    #[test]
    fn sql_keyword() {
        assert_eq!(quote_ident("where"), "\"where\"");
    }

    #[test]
    fn injection_attempt() {
        let quoted = quote_ident("users\"; DROP TABLE secrets; --");
        assert_eq!(quoted, "\"users\"\"; DROP TABLE secrets; --\"");
    }
}
