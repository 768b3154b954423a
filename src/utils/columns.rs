//! Column name helpers

/// Rename repeated names so every name in the result is distinct.
///
/// The first occurrence keeps its name; later occurrences get the smallest
/// `_<n>` suffix that does not collide with a name already emitted.
pub fn column_uniquify<S: AsRef<str>>(column_names: &[S]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(column_names.len());
    for item in column_names {
        let item = item.as_ref();
        let mut counter = 0;
        let mut candidate = item.to_string();
        while unique.contains(&candidate) {
            counter += 1;
            candidate = format!("{}_{}", item, counter);
        }
        unique.push(candidate);
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniquify_repeated() {
        assert_eq!(column_uniquify(&["a", "a", "a"]), vec!["a", "a_1", "a_2"]);
    }

    #[test]
    fn test_uniquify_skips_taken_suffix() {
        assert_eq!(column_uniquify(&["a_1", "a", "a"]), vec!["a_1", "a", "a_2"]);
    }

    #[test]
    fn test_uniquify_distinct_untouched() {
        let names = vec!["x".to_string(), "y".to_string()];
        assert_eq!(column_uniquify(&names), names);
    }
}
