//! Helpers for `${...}` expression strings.
//!
//! The templating engine itself lives outside the core; these helpers only
//! detect leftovers after rendering and split rendered lists.

/// True when the string still carries an unresolved `${...}` expression
pub fn contains_expression(value: &str) -> bool {
    match value.find("${") {
        Some(start) => value[start + 2..].contains('}'),
        None => false,
    }
}

/// Split a rendered comma-separated list into trimmed, non-empty entries
pub fn split_list(rendered: &str) -> Vec<String> {
    rendered
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Substitute `${name}` occurrences using `lookup`; unknown names are left in place
pub fn substitute<F>(raw: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = after[..end].trim();
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
