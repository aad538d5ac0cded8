//! The closed subject taxonomy used to validate plan subject tags.
//!
//! Subjects come in two granularities: coarse categories ("Tech.") and
//! fine entries in "Coarse/fine" form ("Tech./Coding"). The membership is
//! supplied at construction time; the built-in default ships a
//! representative set for development and tests, not a contract.

use std::collections::BTreeSet;

/// The six coarse categories of the default taxonomy.
const DEFAULT_COARSE: &[&str] = &[
    "Art & Sports",
    "Culture",
    "HASS",
    "Science",
    "Social Intelligence",
    "Tech.",
];

/// A representative fine-grained subset for the default taxonomy.
const DEFAULT_FINE: &[&str] = &[
    "Art & Sports/Literature",
    "Art & Sports/Music",
    "Art & Sports/Sports",
    "Culture/Daily Life",
    "Culture/Food",
    "Culture/Tradition",
    "HASS/Economics",
    "HASS/Geography",
    "HASS/History",
    "HASS/Law",
    "HASS/Politics",
    "Science/Astronomy",
    "Science/Biology",
    "Science/Chemistry",
    "Science/Math",
    "Science/Physics",
    "Social Intelligence/Bias",
    "Social Intelligence/Commonsense",
    "Social Intelligence/Norms",
    "Tech./AI",
    "Tech./Coding",
    "Tech./Electrical Eng.",
    "Tech./IT",
    "Tech./Mechanics",
];

/// A closed set of valid subject tags.
///
/// The validator rejects any subject tag not in this set. Membership is
/// an input supplied at construction, so deployments can swap in their
/// own taxonomy without touching the engine.
#[derive(Debug, Clone)]
pub struct SubjectTaxonomy {
    entries: BTreeSet<String>,
}

impl SubjectTaxonomy {
    /// Builds a taxonomy from an explicit set of entries.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the built-in default taxonomy (coarse + representative
    /// fine entries).
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_entries(DEFAULT_COARSE.iter().chain(DEFAULT_FINE.iter()).copied())
    }

    /// Returns true if `tag` is a member of the taxonomy.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains(tag)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the taxonomy has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the entries in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl Default for SubjectTaxonomy {
    fn default() -> Self {
        Self::builtin()
    }
}
