use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Outcome of one generation for a learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    /// Separated from the previous generation and improved (`+`).
    Improved,
    /// Separated from the previous generation and worsened (`-`).
    Worsened,
    /// Not statistically separated (`|`).
    Inconclusive,
}

impl Mark {
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Improved => '+',
            Self::Worsened => '-',
            Self::Inconclusive => '|',
        }
    }

    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Improved),
            '-' => Some(Self::Worsened),
            '|' => Some(Self::Inconclusive),
            _ => None,
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Error produced when parsing a [`Lifemark`] from text.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("invalid lifemark character in {text:?}")]
pub struct ParseLifemarkError {
    text: String,
}

/// Append-only per-generation outcome history of a learner.
///
/// One mark is appended per survived generation, so the full string is an
/// audit trail of the agent's life. Pruning decisions never rescan the
/// whole history, they read only the bounded trailing window selected by
/// the configured [`RemoveKey`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lifemark(String);

impl Lifemark {
    #[must_use]
    pub const fn new() -> Self {
        Self(String::new())
    }

    /// Appends the outcome of the latest generation.
    pub fn push(&mut self, mark: Mark) {
        self.0.push(mark.as_char());
    }

    /// Returns the number of recorded generations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the trailing window of at most `n` marks.
    #[must_use]
    pub fn tail(&self, n: usize) -> &str {
        // Marks are single-byte ascii, so byte slicing is safe.
        &self.0[self.0.len().saturating_sub(n)..]
    }

    /// Returns `true` when the removal rule fires for this history.
    ///
    /// The rule inspects the trailing window of `key.window()` marks:
    /// removal is due when at least `key.threshold()` of them are setbacks
    /// (`-` or `|`) and the newest mark is not an improvement.
    ///
    /// # Examples
    ///
    /// ```
    /// use evoker_agent::lifemark::{Lifemark, RemoveKey};
    ///
    /// let key = RemoveKey(2, 1);
    /// assert!("--|".parse::<Lifemark>().unwrap().removal_due(key));
    /// assert!(!"--+".parse::<Lifemark>().unwrap().removal_due(key));
    /// ```
    #[must_use]
    pub fn removal_due(&self, key: RemoveKey) -> bool {
        let setbacks = self
            .tail(key.window())
            .chars()
            .filter(|&c| c != Mark::Improved.as_char())
            .count();
        setbacks >= key.threshold() && !self.0.ends_with(Mark::Improved.as_char())
    }
}

impl fmt::Display for Lifemark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Lifemark {
    type Err = ParseLifemarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.chars().any(|c| Mark::from_char(c).is_none()) {
            return Err(ParseLifemarkError { text: s.to_owned() });
        }
        Ok(Self(s.to_owned()))
    }
}

impl Serialize for Lifemark {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Lifemark {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Removal thresholds `(threshold, slack)` for the lifemark rule.
///
/// Serialized as a two-element array, e.g. `[4, 1]`: inspect the last
/// `4 + 1` marks and remove once at least `4` are setbacks, unless the
/// newest mark is an improvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveKey(pub usize, pub usize);

impl RemoveKey {
    /// Minimum number of setbacks in the window that triggers removal.
    #[must_use]
    pub const fn threshold(self) -> usize {
        self.0
    }

    /// Size of the inspected trailing window.
    #[must_use]
    pub const fn window(self) -> usize {
        self.0 + self.1
    }
}
