//! Canonical trivia categories.
//!
//! The question provider labels its output with a drifting vocabulary
//! ("film_and_tv", "Science - Computers", "celebrities", ...). Every label is
//! folded onto one of a fixed set of canonical categories; anything unknown
//! lands in the default bucket instead of being rejected.

use std::collections::HashMap;

use serde::Serialize;

/// Canonical id of the bucket unknown aliases resolve to.
pub const DEFAULT_CATEGORY_ID: &str = "general-knowledge";

/// A canonical trivia topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Category {
    /// Stable identifier (kebab-case slug)
    pub id: &'static str,
    /// Display label, also used as the deck title
    pub label: &'static str,
    /// Icon token shown by the apps
    pub icon: &'static str,
    /// Provider labels known to mean this category
    pub aliases: &'static [&'static str],
}

const CANONICAL: [Category; 20] = [
    Category {
        id: "science-and-nature",
        label: "Science & Nature",
        icon: "atom",
        aliases: &["science", "science & nature", "nature", "animals"],
    },
    Category {
        id: "technology",
        label: "Technology",
        icon: "desktopcomputer",
        aliases: &["science - computers", "science - gadgets", "technology"],
    },
    Category {
        id: "mathematics",
        label: "Mathematics",
        icon: "number",
        aliases: &["mathematics", "science - mathematics"],
    },
    Category {
        id: "history",
        label: "History",
        icon: "clock",
        aliases: &["history"],
    },
    Category {
        id: "geography",
        label: "Geography",
        icon: "globe.americas",
        aliases: &["geography"],
    },
    Category {
        id: "politics",
        label: "Politics",
        icon: "building.columns",
        aliases: &["politics"],
    },
    Category {
        id: "sports",
        label: "Sports",
        icon: "sportscourt",
        aliases: &["sports", "sport_and_leisure"],
    },
    Category {
        id: "music",
        label: "Music",
        icon: "music.note",
        aliases: &["music", "musicals & theatres"],
    },
    Category {
        id: "literature",
        label: "Literature",
        icon: "book",
        aliases: &["literature", "books"],
    },
    Category {
        id: "arts-and-literature",
        label: "Arts & Literature",
        icon: "paintbrush",
        aliases: &["arts_and_literature", "arts and literature", "art"],
    },
    Category {
        id: "film-and-tv",
        label: "Film & TV",
        icon: "film",
        aliases: &[
            "movies",
            "film",
            "film_and_tv",
            "television",
            "cartoon & animations",
            "japanese anime & manga",
        ],
    },
    Category {
        id: "video-games",
        label: "Video Games",
        icon: "gamecontroller",
        aliases: &["video games"],
    },
    Category {
        id: "board-games",
        label: "Board Games",
        icon: "gamecontroller",
        aliases: &["board games"],
    },
    Category {
        id: "comics",
        label: "Comics",
        icon: "text.bubble",
        aliases: &["comics"],
    },
    Category {
        id: "food-and-drink",
        label: "Food & Drink",
        icon: "fork.knife",
        aliases: &["food & drink", "food_and_drink"],
    },
    Category {
        id: "pop-culture",
        label: "Pop Culture",
        icon: "star",
        aliases: &["pop culture", "celebrities"],
    },
    Category {
        id: "mythology",
        label: "Mythology",
        icon: "sparkles",
        aliases: &["mythology"],
    },
    Category {
        id: "society-and-culture",
        label: "Society & Culture",
        icon: "person.3",
        aliases: &["society_and_culture", "society and culture"],
    },
    Category {
        id: DEFAULT_CATEGORY_ID,
        label: "General Knowledge",
        icon: "questionmark.circle",
        aliases: &["general_knowledge", "general knowledge"],
    },
    Category {
        id: "vehicles",
        label: "Vehicles",
        icon: "car",
        aliases: &["vehicles"],
    },
];

/// Alias → canonical category lookup.
///
/// Built once at daemon start and immutable afterwards.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    categories: Vec<Category>,
    index: HashMap<String, usize>,
    default_idx: usize,
}

impl CategoryTable {
    /// Build the table from the built-in canonical categories.
    pub fn new() -> Self {
        Self::from_categories(CANONICAL.to_vec(), DEFAULT_CATEGORY_ID)
    }

    /// Build a table from an explicit category list.
    ///
    /// Falls back to the first category when `default_id` is not present,
    /// and to the built-in table when `categories` is empty.
    pub fn from_categories(categories: Vec<Category>, default_id: &str) -> Self {
        if categories.is_empty() {
            return Self::new();
        }

        let mut index = HashMap::new();

        for (idx, category) in categories.iter().enumerate() {
            index.insert(fold(category.id), idx);
            index.insert(fold(category.label), idx);
            for alias in category.aliases {
                index.insert(fold(alias), idx);
            }
        }

        let default_idx = categories
            .iter()
            .position(|c| c.id == default_id)
            .unwrap_or(0);

        Self {
            categories,
            index,
            default_idx,
        }
    }

    /// Resolve any provider label to its canonical category.
    ///
    /// Never fails: unknown, empty or garbage input resolves to the default
    /// category.
    pub fn resolve(&self, alias: &str) -> &Category {
        let idx = self
            .index
            .get(&fold(alias))
            .copied()
            .unwrap_or(self.default_idx);
        &self.categories[idx]
    }

    /// Whether `alias` maps to a category without falling back.
    pub fn is_known(&self, alias: &str) -> bool {
        self.index.contains_key(&fold(alias))
    }

    /// The fallback category.
    pub fn default_category(&self) -> &Category {
        &self.categories[self.default_idx]
    }

    /// All canonical categories in table order.
    pub fn all(&self) -> &[Category] {
        &self.categories
    }

    /// Number of canonical categories.
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Check if the table has no categories.
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::new()
    }
}

fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_table_shape() {
        let table = CategoryTable::new();
        assert_eq!(table.len(), 20);

        let ids: HashSet<_> = table.all().iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 20, "category ids must be unique");

        let alias_count: usize = table.all().iter().map(|c| c.aliases.len()).sum();
        assert_eq!(alias_count, 40);
    }

    #[test]
    fn test_resolve_aliases() {
        let table = CategoryTable::new();

        assert_eq!(table.resolve("science - computers").id, "technology");
        assert_eq!(table.resolve("film_and_tv").label, "Film & TV");
        assert_eq!(table.resolve("celebrities").id, "pop-culture");
        assert_eq!(table.resolve("Animals").id, "science-and-nature");
        assert_eq!(table.resolve("  Japanese Anime & Manga ").id, "film-and-tv");
    }

    #[test]
    fn test_resolve_canonical_forms() {
        let table = CategoryTable::new();

        for category in table.all() {
            assert_eq!(table.resolve(category.label).id, category.id);
            assert_eq!(table.resolve(category.id).id, category.id);
        }
    }

    #[test]
    fn test_resolve_is_total() {
        let table = CategoryTable::new();

        for junk in ["", "   ", "quantum basket weaving", "🦀", "\0", "NULL"] {
            let category = table.resolve(junk);
            assert_eq!(category.id, DEFAULT_CATEGORY_ID);
            assert!(!table.is_known(junk));
        }
    }

    #[test]
    fn test_icons() {
        let table = CategoryTable::new();
        assert_eq!(table.resolve("history").icon, "clock");
        assert_eq!(table.resolve("unknown thing").icon, "questionmark.circle");
    }

    #[test]
    fn test_custom_default_falls_back_to_first() {
        let table = CategoryTable::from_categories(CANONICAL[..3].to_vec(), "nope");
        assert_eq!(table.default_category().id, "science-and-nature");
        assert_eq!(table.resolve("vehicles").id, "science-and-nature");
    }
}
