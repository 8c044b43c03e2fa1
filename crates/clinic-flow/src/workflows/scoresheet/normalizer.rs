/// Canonical score code: invisible characters dropped, inner whitespace
/// joined with `_`, upper case.
pub(crate) fn normalize_code(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    joined.to_ascii_uppercase()
}

#[cfg(test)]
pub(crate) fn normalize_for_tests(value: &str) -> String {
    normalize_code(value)
}
