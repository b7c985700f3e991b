//! Identifier generation

use uuid::Uuid;

/// Generate a prefixed short id, e.g. `del-3fa9c1d2e4b5`.
///
/// Twelve hex characters of a v4 UUID keep ids readable in logs while
/// staying collision-safe at the scale a single Hopper deployment sees.
#[must_use]
pub fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_has_prefix_and_length() {
        let id = short_id("ep");
        assert!(id.starts_with("ep-"));
        assert_eq!(id.len(), "ep-".len() + 12);
    }

    #[test]
    fn short_ids_are_unique() {
        let a = short_id("task");
        let b = short_id("task");
        assert_ne!(a, b);
    }
}
