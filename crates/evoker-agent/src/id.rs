use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error produced when parsing a [`Family`] or an [`AgentId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum IdParseError {
    /// The family tag is not a single ascii lowercase letter.
    #[display("invalid family tag {tag:?}: expected one ascii lowercase letter")]
    InvalidFamily { tag: String },
    /// The name does not follow the `dmk<loop><family><cix>_<age>[_ref]` shape.
    #[display("malformed agent name {name:?}")]
    MalformedName { name: String },
}

/// Categorical tag partitioning agents into comparable sub-populations.
///
/// Families are single ascii lowercase letters, so `"ab"` configures two
/// families `a` and `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Family(char);

impl Family {
    /// Creates a family from its tag letter.
    pub fn new(tag: char) -> Result<Self, IdParseError> {
        if tag.is_ascii_lowercase() {
            Ok(Self(tag))
        } else {
            Err(IdParseError::InvalidFamily {
                tag: tag.to_string(),
            })
        }
    }

    /// Returns the tag letter.
    #[must_use]
    pub const fn tag(self) -> char {
        self.0
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Family {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(tag), None) => Self::new(tag),
            _ => Err(IdParseError::InvalidFamily { tag: s.to_owned() }),
        }
    }
}

impl Serialize for Family {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Family {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Structured identity of one agent.
///
/// The display name is derived deterministically from the fields:
/// `dmk{loop:02}{family}{cix:02}_{age:02}`, with a `_ref` suffix for
/// reference-pool members. `dmk05b03_02_ref` is the reference twin of the
/// third agent created in loop 5, family `b`, at age 2.
///
/// Within one run, `(loop_ix, family, cix)` uniquely identifies a lineage
/// line; aging and reference tagging derive new ids from it, so full ids
/// stay unique for as long as names are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentId {
    loop_ix: u32,
    family: Family,
    cix: u32,
    age: u32,
    reference: bool,
}

impl AgentId {
    /// Creates the id of a freshly created learner: age 0, not a reference.
    #[must_use]
    pub const fn fresh(loop_ix: u32, family: Family, cix: u32) -> Self {
        Self {
            loop_ix,
            family,
            cix,
            age: 0,
            reference: false,
        }
    }

    /// Loop number in which this agent was created.
    #[must_use]
    pub const fn loop_ix(self) -> u32 {
        self.loop_ix
    }

    #[must_use]
    pub const fn family(self) -> Family {
        self.family
    }

    /// Creation index within the agent's creation loop.
    #[must_use]
    pub const fn cix(self) -> u32 {
        self.cix
    }

    /// Generations survived so far.
    #[must_use]
    pub const fn age(self) -> u32 {
        self.age
    }

    #[must_use]
    pub const fn is_reference(self) -> bool {
        self.reference
    }

    /// Returns the id of the next-generation copy (age incremented).
    #[must_use]
    pub const fn aged(self) -> Self {
        Self {
            age: self.age + 1,
            ..self
        }
    }

    /// Returns the reference-pool twin of this id.
    #[must_use]
    pub const fn as_reference(self) -> Self {
        Self {
            reference: true,
            ..self
        }
    }

    /// Returns the learner-shaped twin of this id (reference flag cleared).
    #[must_use]
    pub const fn as_learner(self) -> Self {
        Self {
            reference: false,
            ..self
        }
    }

    /// Returns `true` when both ids belong to the same lineage line,
    /// ignoring age and the reference flag.
    #[must_use]
    pub const fn same_slot(self, other: Self) -> bool {
        self.loop_ix == other.loop_ix
            && self.family.0 == other.family.0
            && self.cix == other.cix
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dmk{:02}{}{:02}_{:02}",
            self.loop_ix, self.family, self.cix, self.age
        )?;
        if self.reference {
            write!(f, "_ref")?;
        }
        Ok(())
    }
}

fn parse_digits(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl FromStr for AgentId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || IdParseError::MalformedName { name: s.to_owned() };
        let rest = s.strip_prefix("dmk").ok_or_else(malformed)?;
        let family_at = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(malformed)?;
        let (loop_digits, rest) = rest.split_at(family_at);
        let loop_ix = parse_digits(loop_digits).ok_or_else(malformed)?;
        let mut chars = rest.chars();
        let family = Family::new(chars.next().ok_or_else(malformed)?)?;
        let (cix_digits, rest) = chars.as_str().split_once('_').ok_or_else(malformed)?;
        let cix = parse_digits(cix_digits).ok_or_else(malformed)?;
        let (age_digits, reference) = match rest.strip_suffix("_ref") {
            Some(age_digits) => (age_digits, true),
            None => (rest, false),
        };
        let age = parse_digits(age_digits).ok_or_else(malformed)?;
        Ok(Self {
            loop_ix,
            family,
            cix,
            age,
            reference,
        })
    }
}

impl Serialize for AgentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
