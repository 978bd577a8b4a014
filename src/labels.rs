//! Emotion label table.
//!
//! The integer ids are part of the persisted model format and must stay
//! stable between training and inference.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("Unknown emotion label: {0}")]
    UnknownLabel(String),

    #[error("Unknown emotion id: {0}")]
    UnknownId(usize),
}

/// Closed set of emotions in the corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Anger,
    Surprise,
    Happiness,
    Sadness,
    Neutral,
    Fear,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Anger,
        Emotion::Surprise,
        Emotion::Happiness,
        Emotion::Sadness,
        Emotion::Neutral,
        Emotion::Fear,
    ];

    pub fn id(&self) -> usize {
        match self {
            Self::Anger => 0,
            Self::Surprise => 1,
            Self::Happiness => 2,
            Self::Sadness => 3,
            Self::Neutral => 4,
            Self::Fear => 5,
        }
    }

    pub fn from_id(id: usize) -> Result<Self, LabelError> {
        Self::ALL
            .get(id)
            .copied()
            .ok_or(LabelError::UnknownId(id))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anger => "anger",
            Self::Surprise => "surprise",
            Self::Happiness => "happiness",
            Self::Sadness => "sadness",
            Self::Neutral => "neutral",
            Self::Fear => "fear",
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Emotion {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anger" => Ok(Self::Anger),
            "surprise" => Ok(Self::Surprise),
            "happiness" => Ok(Self::Happiness),
            "sadness" => Ok(Self::Sadness),
            "neutral" => Ok(Self::Neutral),
            "fear" => Ok(Self::Fear),
            _ => Err(LabelError::UnknownLabel(s.to_string())),
        }
    }
}

/// Encode a label string into its emotion
pub fn encode(label: &str) -> Result<Emotion, LabelError> {
    label.parse()
}

/// Decode an integer id back into its emotion
pub fn decode(id: usize) -> Result<Emotion, LabelError> {
    Emotion::from_id(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ids_are_stable() {
        assert_eq!(Emotion::Anger.id(), 0);
        assert_eq!(Emotion::Surprise.id(), 1);
        assert_eq!(Emotion::Happiness.id(), 2);
        assert_eq!(Emotion::Sadness.id(), 3);
        assert_eq!(Emotion::Neutral.id(), 4);
        assert_eq!(Emotion::Fear.id(), 5);
    }

    #[test]
    fn test_unknown_label() {
        assert_eq!(
            encode("boredom"),
            Err(LabelError::UnknownLabel("boredom".to_string()))
        );
        assert_eq!(decode(6), Err(LabelError::UnknownId(6)));
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Emotion::Happiness).unwrap();
        assert_eq!(json, "\"happiness\"");
        let back: Emotion = serde_json::from_str("\"sadness\"").unwrap();
        assert_eq!(back, Emotion::Sadness);
    }

    proptest! {
        #[test]
        fn prop_encode_decode_bijection(idx in 0usize..6) {
            let emotion = Emotion::ALL[idx];
            prop_assert_eq!(encode(emotion.as_str()).unwrap(), emotion);
            prop_assert_eq!(decode(emotion.id()).unwrap(), emotion);
            prop_assert_eq!(emotion.id(), idx);
        }
    }
}
