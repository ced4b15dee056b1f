use std::collections::HashSet;

use rand::seq::IndexedRandom;

/// One drawable word with its category label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordEntry {
    pub word: &'static str,
    pub category: &'static str,
}

const fn w(word: &'static str, category: &'static str) -> WordEntry {
    WordEntry { word, category }
}

/// Fixed categorized vocabulary.
pub const WORDS: &[WordEntry] = &[
    // animals
    w("cat", "animals"),
    w("octopus", "animals"),
    w("penguin", "animals"),
    w("giraffe", "animals"),
    w("hedgehog", "animals"),
    w("flamingo", "animals"),
    w("jellyfish", "animals"),
    w("crocodile", "animals"),
    w("owl", "animals"),
    w("panda", "animals"),
    // food
    w("pizza", "food"),
    w("ice cream", "food"),
    w("spaghetti", "food"),
    w("watermelon", "food"),
    w("pancake", "food"),
    w("croissant", "food"),
    w("dumpling", "food"),
    w("hot dog", "food"),
    w("avocado", "food"),
    w("popcorn", "food"),
    // objects
    w("umbrella", "objects"),
    w("lighthouse", "objects"),
    w("telescope", "objects"),
    w("skateboard", "objects"),
    w("typewriter", "objects"),
    w("hourglass", "objects"),
    w("accordion", "objects"),
    w("paper plane", "objects"),
    w("anchor", "objects"),
    w("candle", "objects"),
    // nature
    w("volcano", "nature"),
    w("rainbow", "nature"),
    w("waterfall", "nature"),
    w("tornado", "nature"),
    w("iceberg", "nature"),
    w("cactus", "nature"),
    w("lightning", "nature"),
    w("island", "nature"),
    w("sunflower", "nature"),
    w("mushroom", "nature"),
];

/// Pick a random word, avoiding already-used ones where possible.
pub fn pick_word(used: &HashSet<&'static str>) -> WordEntry {
    let mut rng = rand::rng();
    let fresh: Vec<&WordEntry> = WORDS.iter().filter(|e| !used.contains(e.word)).collect();
    if let Some(&entry) = fresh.choose(&mut rng) {
        return *entry;
    }
    // Vocabulary exhausted: reuse is better than stalling the round.
    *WORDS.choose(&mut rng).expect("vocabulary is non-empty")
}

/// Mask a word for guessers: letters become placeholders, whitespace is
/// preserved, and the masked characters are space-separated.
pub fn mask_word(word: &str) -> String {
    let masked: Vec<String> = word
        .chars()
        .map(|c| {
            if c.is_whitespace() {
                c.to_string()
            } else {
                "_".to_string()
            }
        })
        .collect();
    masked.join(" ")
}

/// Guesses compare case-insensitively with surrounding whitespace ignored.
pub fn normalize_guess(s: &str) -> String {
    s.trim().to_lowercase()
}
