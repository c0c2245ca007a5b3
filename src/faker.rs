//! Synthetic replacement values for redacted columns.
//!
//! Each configured column gets a [`FakerSpec`] resolved at config time;
//! generation is driven by an injected RNG so the engine owns the only
//! source of randomness.

use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::config::FakerConfig;
use crate::error::{DumpError, Result};

const TLDS: &[&str] = &["com", "net", "org", "gov"];
const DEFAULT_HASH_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePart {
    First,
    Last,
    Full,
}

/// A validated faker rule for a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakerSpec {
    /// Pattern where every `*` becomes a random digit and every other
    /// character passes through.
    Phone { pattern: String },
    /// `first.last@xxxxx.tld`
    Email,
    Name { part: NamePart },
    /// Lowercase alphabetic string of the given length.
    Hash { length: usize },
}

impl FakerSpec {
    /// Resolve a raw config rule. Unknown types are a configuration error.
    pub fn parse(config: &FakerConfig) -> Result<Self> {
        match config.kind.as_str() {
            "phone" => Ok(FakerSpec::Phone {
                pattern: config.pattern.clone().unwrap_or_default(),
            }),
            "email" => Ok(FakerSpec::Email),
            "name" => {
                let part = match config.part.as_deref() {
                    Some("first") => NamePart::First,
                    Some("last") => NamePart::Last,
                    Some("full") | None => NamePart::Full,
                    Some(other) => {
                        return Err(DumpError::Config(format!("unknown name part {other:?}")))
                    }
                };
                Ok(FakerSpec::Name { part })
            }
            "hash" => Ok(FakerSpec::Hash {
                length: config.length.unwrap_or(DEFAULT_HASH_LENGTH),
            }),
            other => Err(DumpError::Config(format!("unknown faker type {other:?}"))),
        }
    }

    pub fn generate(&self, rng: &mut dyn RngCore) -> String {
        let mut rng = seeded_from(rng);

        match self {
            FakerSpec::Phone { pattern } => pattern
                .chars()
                .map(|c| {
                    if c == '*' {
                        char::from(b'0' + rng.random_range(0..10u8))
                    } else {
                        c
                    }
                })
                .collect(),
            FakerSpec::Email => {
                let first = ascii_lower(FirstName().fake_with_rng::<String, _>(&mut rng));
                let last = ascii_lower(LastName().fake_with_rng::<String, _>(&mut rng));
                let domain = random_letters(&mut rng, 5);
                let tld = TLDS[rng.random_range(0..TLDS.len())];
                format!("{first}.{last}@{domain}.{tld}")
            }
            FakerSpec::Name { part } => match part {
                NamePart::First => FirstName().fake_with_rng(&mut rng),
                NamePart::Last => LastName().fake_with_rng(&mut rng),
                NamePart::Full => {
                    let first: String = FirstName().fake_with_rng(&mut rng);
                    let last: String = LastName().fake_with_rng(&mut rng);
                    format!("{first} {last}")
                }
            },
            FakerSpec::Hash { length } => random_letters(&mut rng, *length),
        }
    }
}

// The fake crate needs a sized Rng; reseed a StdRng from the caller's.
fn seeded_from(rng: &mut dyn RngCore) -> StdRng {
    let mut seed = [0u8; 32];
    rng.fill_bytes(&mut seed);
    StdRng::from_seed(seed)
}

fn random_letters(rng: &mut StdRng, length: usize) -> String {
    (0..length)
        .map(|_| char::from(b'a' + rng.random_range(0..26u8)))
        .collect()
}

fn ascii_lower(text: String) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    if lowered.is_empty() {
        "user".to_string()
    } else {
        lowered
    }
}
