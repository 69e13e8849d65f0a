//! Shared domain model.

pub mod types;

pub use types::*;

/// Collapse a display name to a lookup slug: lowercase, alphanumerics only.
///
/// Regulators rarely agree on punctuation or casing ("CET1/RWA", "cet1 rwa",
/// "Cet1-Rwa"), so every name-based join in the pipeline goes through this.
pub fn slugify(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn slugify_strips_punctuation_and_case() {
        assert_eq!(slugify("CET1/RWA"), "cet1rwa");
        assert_eq!(slugify("Banco G&T Continental, S.A."), "bancogtcontinentalsa");
        assert_eq!(slugify("  Loans / Deposits "), "loansdeposits");
    }
}
