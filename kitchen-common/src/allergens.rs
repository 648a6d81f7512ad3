//! Allergen code registry
//!
//! Canonical enumeration of regulated allergen codes plus the consolidation
//! table that folds legacy and alias spellings into canonical codes.
//!
//! Every component consolidates before it stores or compares allergen sets,
//! so codes entered at different times compare equal afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Canonical allergen code
///
/// Declaration order is the canonical order used by [`AllergenSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllergenCode {
    Gluten,
    Crustacean,
    Egg,
    Fish,
    Peanut,
    Soy,
    Milk,
    TreeNut,
    Celery,
    Mustard,
    Sesame,
    Sulphite,
    Lupin,
    Mollusc,
}

/// Consolidated, deduplicated, canonically ordered allergen set
pub type AllergenSet = BTreeSet<AllergenCode>;

impl AllergenCode {
    /// All canonical codes in canonical order
    pub const ALL: [AllergenCode; 14] = [
        AllergenCode::Gluten,
        AllergenCode::Crustacean,
        AllergenCode::Egg,
        AllergenCode::Fish,
        AllergenCode::Peanut,
        AllergenCode::Soy,
        AllergenCode::Milk,
        AllergenCode::TreeNut,
        AllergenCode::Celery,
        AllergenCode::Mustard,
        AllergenCode::Sesame,
        AllergenCode::Sulphite,
        AllergenCode::Lupin,
        AllergenCode::Mollusc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AllergenCode::Gluten => "gluten",
            AllergenCode::Crustacean => "crustacean",
            AllergenCode::Egg => "egg",
            AllergenCode::Fish => "fish",
            AllergenCode::Peanut => "peanut",
            AllergenCode::Soy => "soy",
            AllergenCode::Milk => "milk",
            AllergenCode::TreeNut => "tree_nut",
            AllergenCode::Celery => "celery",
            AllergenCode::Mustard => "mustard",
            AllergenCode::Sesame => "sesame",
            AllergenCode::Sulphite => "sulphite",
            AllergenCode::Lupin => "lupin",
            AllergenCode::Mollusc => "mollusc",
        }
    }

    /// Human readable label for menus and labels
    pub fn label(&self) -> &'static str {
        match self {
            AllergenCode::Gluten => "Cereals containing gluten",
            AllergenCode::Crustacean => "Crustaceans",
            AllergenCode::Egg => "Eggs",
            AllergenCode::Fish => "Fish",
            AllergenCode::Peanut => "Peanuts",
            AllergenCode::Soy => "Soybeans",
            AllergenCode::Milk => "Milk",
            AllergenCode::TreeNut => "Tree nuts",
            AllergenCode::Celery => "Celery",
            AllergenCode::Mustard => "Mustard",
            AllergenCode::Sesame => "Sesame seeds",
            AllergenCode::Sulphite => "Sulphur dioxide and sulphites",
            AllergenCode::Lupin => "Lupin",
            AllergenCode::Mollusc => "Molluscs",
        }
    }
}

impl fmt::Display for AllergenCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllergenCode {
    type Err = String;

    /// Parses canonical codes and known aliases
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        lookup(&normalize(raw)).ok_or_else(|| raw.to_string())
    }
}

/// Lowercase, trim, and fold `-` and whitespace runs into `_`
fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch == '-' || ch == '_' || ch.is_whitespace() {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.extend(ch.to_lowercase());
    }
    out
}

/// Consolidation map: canonical codes map to themselves, aliases to their canonical code
fn lookup(code: &str) -> Option<AllergenCode> {
    use AllergenCode::*;
    let canonical = match code {
        "gluten" | "wheat" | "cereals_containing_gluten" | "cereals" | "barley" | "rye" | "oats" => Gluten,
        "crustacean" | "crustaceans" | "shellfish" => Crustacean,
        "egg" | "eggs" => Egg,
        "fish" => Fish,
        "peanut" | "peanuts" | "groundnut" | "groundnuts" => Peanut,
        "soy" | "soya" | "soybean" | "soybeans" => Soy,
        "milk" | "dairy" | "lactose" => Milk,
        "tree_nut" | "tree_nuts" | "treenut" | "treenuts" | "nuts" | "nut" => TreeNut,
        "celery" | "celeriac" => Celery,
        "mustard" => Mustard,
        "sesame" | "sesame_seeds" | "sesame_seed" => Sesame,
        "sulphite" | "sulphites" | "sulfite" | "sulfites" | "so2" | "sulphur_dioxide" | "sulfur_dioxide" => Sulphite,
        "lupin" | "lupine" | "lupins" => Lupin,
        "mollusc" | "molluscs" | "mollusk" | "mollusks" => Mollusc,
        _ => return None,
    };
    Some(canonical)
}

/// Consolidate raw codes into a canonical set, dropping unrecognized codes
///
/// Unrecognized codes are logged at WARN and never fail the call.
pub fn consolidate<I, S>(codes: I) -> AllergenSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    consolidate_with_misses(codes).0
}

/// Same as [`consolidate`], also returning the raw codes that were dropped
pub fn consolidate_with_misses<I, S>(codes: I) -> (AllergenSet, Vec<String>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = AllergenSet::new();
    let mut misses = Vec::new();

    for raw in codes {
        let raw = raw.as_ref();
        match lookup(&normalize(raw)) {
            Some(code) => {
                set.insert(code);
            }
            None => {
                tracing::warn!(code = %raw, "Dropping unrecognized allergen code");
                misses.push(raw.to_string());
            }
        }
    }

    (set, misses)
}

/// Canonical string form of a set, in canonical order
pub fn to_codes(set: &AllergenSet) -> Vec<String> {
    set.iter().map(|c| c.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_fold_to_canonical() {
        let set = consolidate(["Eggs", "dairy", "Tree-Nuts", "soya", "SO2"]);
        let expected: AllergenSet = [
            AllergenCode::Egg,
            AllergenCode::Soy,
            AllergenCode::Milk,
            AllergenCode::TreeNut,
            AllergenCode::Sulphite,
        ]
        .into_iter()
        .collect();
        assert_eq!(set, expected);
    }

    #[test]
    fn test_unrecognized_codes_are_dropped_and_reported() {
        let (set, misses) = consolidate_with_misses(["milk", "unicorn", "  "]);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&AllergenCode::Milk));
        assert_eq!(misses, vec!["unicorn".to_string(), "  ".to_string()]);
    }

    #[test]
    fn test_legacy_and_canonical_compare_equal() {
        assert_eq!(consolidate(["crustaceans", "sulfites"]), consolidate(["crustacean", "sulphite"]));
    }

    #[test]
    fn test_consolidation_is_idempotent() {
        let inputs: Vec<Vec<&str>> = vec![
            vec![],
            vec!["milk", "milk", "dairy"],
            vec!["nuts", "peanuts", "sesame seeds", "garbage"],
            vec!["GLUTEN", "wheat", "Mollusks", "lupine", "celeriac", "mustard", "fish"],
        ];
        for input in inputs {
            let once = consolidate(&input);
            let twice = consolidate(to_codes(&once));
            assert_eq!(once, twice, "consolidate must be idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_canonical_order_follows_declaration() {
        let set = consolidate(["mollusc", "gluten", "milk"]);
        assert_eq!(to_codes(&set), vec!["gluten", "milk", "mollusc"]);
    }

    #[test]
    fn test_every_canonical_code_round_trips_through_from_str() {
        for code in AllergenCode::ALL {
            assert_eq!(code.as_str().parse::<AllergenCode>(), Ok(code));
        }
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&AllergenCode::TreeNut).unwrap();
        assert_eq!(json, "\"tree_nut\"");
    }
}
