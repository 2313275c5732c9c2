//! Rendezvous code generation.
//!
//! Codes are short sequences of animal words, pronounceable enough to read
//! over the phone. Uniqueness is only enforced by the relay: minting retries
//! with a fresh sample when the relay reports a collision.

use rand::seq::IndexedRandom;

/// Words per generated code.
pub const WORDS_PER_CODE: usize = 3;

/// Upper bound on register attempts before giving up with `CodeExhausted`.
pub const MAX_MINT_ATTEMPTS: usize = 16;

const ANIMALS: &[&str] = &[
    "aardvark", "aardwolf", "anteater", "antelope", "ape", "armadillo", "badger", "bat", "bear",
    "beaver", "bison", "bluejay", "bobcat", "buffalo", "cardinal", "caribou", "cat", "cheetah",
    "chicken", "chimpanzee", "chipmunk", "cougar", "cow", "crow", "deer", "dingo", "dog", "duck",
    "eagle", "elephant", "falcon", "ferret", "fox", "gazelle", "giraffe", "goat", "goose",
    "gorilla", "hawk", "hedgehog", "horse", "hummingbird", "hyena", "ibex", "jaguar", "jay",
    "kangaroo", "koala", "lemur", "leopard", "lion", "lynx", "magpie", "meerkat", "mink",
    "mongoose", "monkey", "moose", "muskox", "opossum", "orangutan", "ostrich", "otter", "owl",
    "panda", "pangolin", "panther", "parrot", "peacock", "penguin", "pig", "platypus", "porcupine",
    "rabbit", "raccoon", "raven", "reindeer", "robin", "sheep", "skunk", "sloth", "sparrow",
    "squirrel", "stoat", "swan", "tiger", "turkey", "wallaby", "weasel", "wolf", "wolverine",
    "wombat", "woodpecker", "yak", "zebra",
];

/// Generate a fresh rendezvous code from distinct random words.
pub fn generate() -> String {
    let mut rng = rand::rng();
    ANIMALS
        .choose_multiple(&mut rng, WORDS_PER_CODE)
        .copied()
        .collect::<Vec<_>>()
        .join("-")
}

/// Codes are compared case-insensitively; normalize before use.
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_lowercase()
}
