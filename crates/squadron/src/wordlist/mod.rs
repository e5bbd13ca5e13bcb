//! Word lists for generating human-readable agent names.
//! Format: adjective-noun slug (e.g. "brisk-otter"), title-cased for the
//! display name ("Brisk Otter").

use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "able", "agile", "amber", "ample", "arid", "avid", "bold", "brave", "brisk", "calm",
    "candid", "chill", "civil", "clever", "coral", "cosmic", "crisp", "daring", "deft", "dusty",
    "eager", "early", "earnest", "fabled", "fair", "fleet", "frank", "gentle", "glad", "golden",
    "grand", "handy", "hardy", "hazel", "humble", "ideal", "jolly", "keen", "kind", "lively",
    "loyal", "lucid", "lunar", "mellow", "merry", "mighty", "modest", "nimble", "noble", "novel",
    "patient", "placid", "plucky", "polar", "prime", "proud", "quick", "quiet", "rapid", "rustic",
    "sage", "sharp", "shrewd", "silent", "sleek", "solid", "stable", "steady", "stout", "sturdy",
    "sunny", "swift", "tidy", "trusty", "upbeat", "valiant", "vivid", "wise", "witty", "zesty",
];

const NOUNS: &[&str] = &[
    "badger", "beacon", "bison", "bobcat", "buffalo", "caracal", "cardinal", "cedar", "cheetah",
    "cobalt", "comet", "condor", "cougar", "coyote", "crane", "cricket", "dingo", "dolphin",
    "eagle", "ember", "falcon", "ferret", "finch", "fjord", "fox", "gannet", "gazelle", "gecko",
    "gibbon", "glacier", "grouse", "harbor", "hawk", "heron", "hornet", "husky", "ibex", "ibis",
    "jackal", "jaguar", "kestrel", "kite", "lark", "lemur", "linnet", "lynx", "magpie", "marlin",
    "marmot", "marten", "meadow", "merlin", "mink", "moose", "narwhal", "nebula", "ocelot",
    "onyx", "oriole", "osprey", "otter", "owl", "panther", "pelican", "pika", "plover", "prairie",
    "puffin", "quail", "quartz", "raven", "ridge", "robin", "saber", "sable", "salmon", "sparrow",
    "stoat", "summit", "swallow", "swift", "tanager", "tapir", "tern", "thrush", "tundra",
    "vole", "walrus", "weasel", "willow", "wolf", "wren", "zephyr",
];

/// Generate a random adjective-noun slug.
pub fn readable_slug() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    format!("{}-{}", adjective, noun)
}

/// Title-case a slug into a display name: "brisk-otter" -> "Brisk Otter".
pub fn display_name(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase-hyphenate a display name into a slug: "Brisk Otter" -> "brisk-otter".
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_slug_shape() {
        for _ in 0..32 {
            let slug = readable_slug();
            let parts: Vec<&str> = slug.split('-').collect();
            assert_eq!(parts.len(), 2, "slug {} should be adjective-noun", slug);
            assert!(ADJECTIVES.contains(&parts[0]));
            assert!(NOUNS.contains(&parts[1]));
        }
    }

    #[test]
    fn test_display_name_round_trip() {
        assert_eq!(display_name("brisk-otter"), "Brisk Otter");
        assert_eq!(slugify("Brisk Otter"), "brisk-otter");
        assert_eq!(slugify("  Spaced   Out!  "), "spaced-out");
    }
}
