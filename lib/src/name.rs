//! Mnemonic transfer-name generation.
//!
//! Names are short hyphen-joined phrases, easy to read over the phone
//! and to retype. They are only unique within the relay's active rooms;
//! the sender retries with a fresh name if the relay reports a clash.
use rand::seq::SliceRandom;

/// Number of words in a generated name.
pub const DEFAULT_WORDS: usize = 3;

static ADJECTIVES: &[&str] = &[
    "able", "amber", "ancient", "bold", "brave", "bright", "brisk", "calm",
    "clever", "cold", "cosmic", "crimson", "daring", "deep", "dusty", "eager",
    "early", "fierce", "fleet", "fond", "gentle", "glad", "golden", "grand",
    "happy", "hardy", "hollow", "humble", "ivory", "jolly", "keen", "kind",
    "late", "lively", "lucky", "mellow", "merry", "misty", "noble", "pale",
    "proud", "quiet", "rapid", "royal", "rustic", "silent", "swift", "wild",
];

static NOUNS: &[&str] = &[
    "acorn", "anchor", "aspen", "badger", "bay", "beacon", "birch", "bison",
    "canyon", "cedar", "cliff", "comet", "coral", "crane", "creek", "delta",
    "ember", "falcon", "fern", "fjord", "gale", "glade", "grove", "harbor",
    "hawk", "heron", "lagoon", "lark", "lime", "marble", "meadow", "oak",
    "orbit", "otter", "pebble", "pine", "prairie", "raven", "reef", "ridge",
    "river", "sparrow", "summit", "thistle", "tide", "walnut", "willow", "wren",
];

/// Generate a transfer name of `words` hyphen-joined words: one
/// adjective followed by nouns, e.g. `brave-otter-lime`.
pub fn gen_name(words: usize) -> String {
    let mut rng = rand::thread_rng();
    let count = words.max(2);

    let mut parts = Vec::with_capacity(count);
    // Unwraps would need an empty wordlist; both lists are static.
    if let Some(adjective) = ADJECTIVES.choose(&mut rng) {
        parts.push(*adjective);
    }
    while parts.len() < count {
        if let Some(noun) = NOUNS.choose(&mut rng) {
            parts.push(*noun);
        }
    }
    parts.join("-")
}
