//! Deterministic keyword tagger.
//!
//! Pure, stateless classification of prompt text against four fixed tables.
//! Table declaration order is load-bearing: the color and mood caps keep the
//! *first* matches in table order, and the primary-category tie-break walks
//! a fixed priority list. Everything here must stay reproducible across
//! runs, so no sets are iterated where order matters.
//!
//! Matching is case-insensitive whole-word substring matching: a keyword
//! matches when it appears in the text with non-alphanumeric characters (or
//! the text edge) on both sides. Multi-word keywords ("science fiction",
//! "oil painting") are matched as whole phrases.

use std::collections::BTreeSet;

use crate::llm::PromptAnalysis;
use crate::memory::record::UNCATEGORIZED;

/// Category vocabulary with associated keywords, in declaration order.
const CATEGORIES: &[(&str, &[&str])] = &[
    ("landscape", &[
        "landscape", "mountain", "forest", "beach", "ocean", "sea", "lake", "river", "waterfall",
        "sunset", "sunrise", "sky", "clouds", "nature", "outdoor", "scenery", "vista", "panorama",
    ]),
    ("character", &[
        "character", "person", "man", "woman", "boy", "girl", "hero", "villain", "warrior",
        "wizard", "knight", "princess", "king", "queen", "figure", "human", "face", "portrait",
    ]),
    ("animal", &[
        "animal", "dog", "cat", "bird", "fish", "lion", "tiger", "bear", "wolf", "fox", "horse",
        "elephant", "monkey", "pet", "creature", "wildlife",
    ]),
    ("fantasy", &[
        "fantasy", "dragon", "unicorn", "magic", "magical", "mythical", "myth", "legend",
        "fairy", "elf", "dwarf", "orc", "goblin", "wizard", "sorcerer", "spell", "enchanted",
    ]),
    ("sci-fi", &[
        "sci-fi", "science fiction", "futuristic", "space", "spaceship", "robot", "android",
        "cyborg", "alien", "planet", "star", "galaxy", "cosmic", "future", "technology", "tech",
    ]),
    ("abstract", &[
        "abstract", "geometric", "pattern", "shapes", "colorful", "vibrant", "surreal",
        "psychedelic", "non-representational", "expressionist", "minimalist",
    ]),
    ("architecture", &[
        "architecture", "building", "house", "castle", "palace", "temple", "church",
        "cathedral", "skyscraper", "tower", "bridge", "structure", "city", "urban",
    ]),
    ("vehicle", &[
        "vehicle", "car", "truck", "motorcycle", "bike", "bicycle", "boat", "ship",
        "aircraft", "plane", "spaceship", "rocket", "submarine", "train",
    ]),
    ("object", &[
        "object", "furniture", "chair", "table", "weapon", "sword", "gun", "artifact",
        "tool", "instrument", "device", "gadget", "machine", "mechanism",
    ]),
    ("food", &[
        "food", "fruit", "vegetable", "meat", "dessert", "cake", "cookie", "pie",
        "meal", "dish", "cuisine", "drink", "beverage",
    ]),
];

const STYLES: &[&str] = &[
    "realistic", "photorealistic", "cartoon", "anime", "manga", "pixel art", "8-bit", "16-bit",
    "3d", "2d", "watercolor", "oil painting", "sketch", "drawing", "digital art", "concept art",
    "illustration", "minimalist", "abstract", "surreal", "impressionist", "expressionist",
    "cyberpunk", "steampunk", "fantasy", "sci-fi", "horror", "gothic", "vintage", "retro",
    "modern", "futuristic", "medieval", "ancient", "victorian", "art deco", "art nouveau",
];

const COLORS: &[&str] = &[
    "red", "blue", "green", "yellow", "orange", "purple", "pink", "brown", "black", "white",
    "gray", "grey", "gold", "silver", "bronze", "copper", "turquoise", "teal", "cyan", "magenta",
    "violet", "indigo", "maroon", "navy", "olive", "lime", "aqua", "azure", "beige", "coral",
    "crimson", "fuchsia", "lavender", "khaki", "ivory", "amber", "emerald", "ruby", "sapphire",
];

const MOODS: &[&str] = &[
    "happy", "sad", "angry", "peaceful", "calm", "serene", "chaotic", "mysterious", "magical",
    "dark", "light", "bright", "gloomy", "melancholic", "nostalgic", "romantic", "dramatic",
    "epic", "heroic", "whimsical", "playful", "serious", "intense", "relaxed", "energetic",
    "dynamic", "static", "ethereal", "dreamy", "nightmarish", "surreal", "realistic", "abstract",
];

/// Tie-break order for the primary category. First match in the matched set wins.
const PRIMARY_PRIORITY: &[&str] = &[
    "character", "animal", "fantasy", "sci-fi", "landscape",
    "architecture", "vehicle", "object", "food", "abstract",
];

/// Colors kept in the classification, first matches in table order.
const COLOR_CAP: usize = 3;
/// Moods kept in the classification, first matches in table order.
const MOOD_CAP: usize = 2;

/// Full classifier output for one text.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Union of categories, styles, capped colors, capped moods, and
    /// non-sentinel analysis subject/setting. Sorted, deduplicated.
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub primary_category: String,
    pub styles: Vec<String>,
    /// At most [`COLOR_CAP`] entries, in table-declaration order.
    pub colors: Vec<String>,
    /// At most [`MOOD_CAP`] entries, in table-declaration order.
    pub moods: Vec<String>,
}

/// Keyword tagger over the fixed tables above.
#[derive(Debug, Clone, Default)]
pub struct Tagger;

impl Tagger {
    pub fn new() -> Self {
        Self
    }

    /// Classify `prompt` (and `expanded_prompt`, when present) against the
    /// keyword tables, folding in the analysis subject and setting.
    pub fn analyze(
        &self,
        prompt: &str,
        expanded_prompt: Option<&str>,
        analysis: Option<&PromptAnalysis>,
    ) -> Classification {
        let text = match expanded_prompt {
            Some(expanded) if !expanded.is_empty() => format!("{prompt} {expanded}"),
            _ => prompt.to_string(),
        };
        let text = text.to_lowercase();

        let categories: Vec<String> = CATEGORIES
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| contains_word(&text, k)))
            .map(|(name, _)| name.to_string())
            .collect();

        let styles: Vec<String> = STYLES
            .iter()
            .filter(|s| contains_word(&text, s))
            .map(|s| s.to_string())
            .collect();

        let colors: Vec<String> = COLORS
            .iter()
            .filter(|c| contains_word(&text, c))
            .take(COLOR_CAP)
            .map(|c| c.to_string())
            .collect();

        let moods: Vec<String> = MOODS
            .iter()
            .filter(|m| contains_word(&text, m))
            .take(MOOD_CAP)
            .map(|m| m.to_string())
            .collect();

        let primary_category = PRIMARY_PRIORITY
            .iter()
            .find(|c| categories.iter().any(|m| m == *c))
            .map(|c| c.to_string())
            .unwrap_or_else(|| UNCATEGORIZED.to_string());

        let mut tags: BTreeSet<String> = BTreeSet::new();
        tags.extend(categories.iter().cloned());
        tags.extend(styles.iter().cloned());
        tags.extend(colors.iter().cloned());
        tags.extend(moods.iter().cloned());
        if let Some(analysis) = analysis {
            if analysis.subject != "unknown" {
                tags.insert(analysis.subject.clone());
            }
            if analysis.setting != "unspecified" {
                tags.insert(analysis.setting.clone());
            }
        }

        Classification {
            tags: tags.into_iter().collect(),
            categories,
            primary_category,
            styles,
            colors,
            moods,
        }
    }

    /// Suggest up to `n` tags for a raw prompt.
    pub fn suggest_tags(&self, prompt: &str, n: usize) -> Vec<String> {
        let mut tags = self.analyze(prompt, None, None).tags;
        tags.truncate(n);
        tags
    }

    /// Primary category for a raw prompt.
    pub fn categorize(&self, prompt: &str) -> String {
        self.analyze(prompt, None, None).primary_category
    }
}

/// Whole-word (or whole-phrase) case-sensitive containment.
/// `text` must already be lowercased; the table keywords are lowercase.
fn contains_word(text: &str, keyword: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = text[start..].find(keyword) {
        let at = start + pos;
        let end = at + keyword.len();
        let left_ok = at == 0
            || !text[..at].chars().next_back().is_some_and(|c| c.is_alphanumeric());
        let right_ok = end == text.len()
            || !text[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if left_ok && right_ok {
            return true;
        }
        start = at + 1;
    }
    false
}
