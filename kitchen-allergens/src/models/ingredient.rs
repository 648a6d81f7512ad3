//! Ingredient model and allergen provenance

use serde::{Deserialize, Serialize};

/// Provenance tag of an ingredient's allergen set
///
/// `Manual` is terminal for automated processes: nothing but a user edit
/// may overwrite or downgrade it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Manual,
    Inferred,
    Unset,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Manual => "manual",
            Provenance::Inferred => "inferred",
            Provenance::Unset => "unset",
        }
    }
}

/// Persisted `allergen_source` column: `{"manual": bool, "ai": bool}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllergenSourceFlags {
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub ai: bool,
}

impl AllergenSourceFlags {
    /// Manual wins over ai when both flags are set
    pub fn provenance(&self) -> Provenance {
        if self.manual {
            Provenance::Manual
        } else if self.ai {
            Provenance::Inferred
        } else {
            Provenance::Unset
        }
    }

    pub fn inferred() -> Self {
        Self { manual: false, ai: true }
    }
}

/// Ingredient row as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    pub brand: Option<String>,
    /// Raw stored codes; may contain legacy aliases
    pub allergens: Vec<String>,
    pub source: AllergenSourceFlags,
    /// Bumped on every allergen write
    pub generation: i64,
}

impl Ingredient {
    pub fn provenance(&self) -> Provenance {
        self.source.provenance()
    }
}

/// Fields needed to create an ingredient
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewIngredient {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub allergens: Vec<String>,
    #[serde(default)]
    pub source: AllergenSourceFlags,
}

impl NewIngredient {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    /// Allergens entered by a person
    pub fn manual<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allergens = codes.into_iter().map(Into::into).collect();
        self.source = AllergenSourceFlags { manual: true, ai: false };
        self
    }

    /// Allergens previously produced by inference
    pub fn inferred<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allergens = codes.into_iter().map(Into::into).collect();
        self.source = AllergenSourceFlags::inferred();
        self
    }
}
