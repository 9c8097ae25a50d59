//! Search filter composition
//!
//! Values substituted into a filter come from the caller (the username) or
//! from the directory (the user DN). They are escaped byte by byte as an
//! RFC 4515 assertion value, so they can never change the filter structure.

/// Escape a value for use on the right-hand side of an equality assertion.
///
/// `\`, `*`, `(`, `)`, NUL and every non-ASCII byte become `\xx`.
pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for &byte in value.as_bytes() {
        match byte {
            b'\\' | b'*' | b'(' | b')' | 0 | 0x80..=0xff => {
                escaped.push_str(&format!("\\{:02x}", byte));
            }
            _ => escaped.push(byte as char),
        }
    }
    escaped
}

/// `(&<base>(<attribute>=<escaped value>))`
pub fn and_equals(base_filter: &str, attribute: &str, value: &str) -> String {
    format!("(&{}({}={}))", base_filter, attribute, escape_value(value))
}

/// Check that a configured filter is parenthesized, balanced and parses
pub fn is_well_formed(filter: &str) -> bool {
    if !filter.starts_with('(') || !filter.ends_with(')') {
        return false;
    }

    // Literal parentheses inside values must be written as \28 and \29
    let mut depth: i32 = 0;
    for (i, c) in filter.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 || (depth == 0 && i + 1 < filter.len()) {
            return false;
        }
    }

    depth == 0 && ldap3::parse_filter(filter).is_ok()
}
