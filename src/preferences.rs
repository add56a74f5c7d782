//! Preference values, the ordered preference mapping, and the canonical
//! text block produced for a finished extraction.
//!
//! Keys are free-form and keep the order the extraction step returned them
//! in, so two renderings of the same mapping are byte-identical.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::session::Participant;

// ---------------------------------------------------------------------------
// PreferenceValue
// ---------------------------------------------------------------------------

/// A single preference value as returned by the extraction service.
///
/// `Unspecified` means the preference was mentioned without a concrete value.
/// Lists and objects are kept as JSON so they survive the hand-off and the
/// negotiation frame unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PreferenceValue {
    Number(f64),
    Text(String),
    Flag(bool),
    Structured(serde_json::Value),
    Unspecified,
}

impl From<serde_json::Value> for PreferenceValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => PreferenceValue::Unspecified,
            Value::Bool(b) => PreferenceValue::Flag(b),
            Value::Number(n) => n
                .as_f64()
                .map(PreferenceValue::Number)
                .unwrap_or_else(|| PreferenceValue::Text(n.to_string())),
            Value::String(s) => PreferenceValue::Text(s),
            other => PreferenceValue::Structured(other),
        }
    }
}

impl<'de> Deserialize<'de> for PreferenceValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(PreferenceValue::from)
    }
}

impl fmt::Display for PreferenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferenceValue::Number(n) => f.write_str(&float_repr(*n)),
            PreferenceValue::Text(s) => write!(f, "{s}"),
            PreferenceValue::Flag(b) => write!(f, "{b}"),
            PreferenceValue::Structured(v) => write!(f, "{v}"),
            PreferenceValue::Unspecified => write!(f, "None"),
        }
    }
}

/// Shortest round-trip float text with a decimal point and a signed,
/// two-digit exponent: `250000.0`, `85.5`, `1e+16`, `2.5e-05`.
fn float_repr(n: f64) -> String {
    let text = format!("{n:?}");
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

// ---------------------------------------------------------------------------
// PreferenceMapping
// ---------------------------------------------------------------------------

/// Insertion-ordered map from preference key to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceMapping {
    entries: Vec<(String, PreferenceValue)>,
}

impl PreferenceMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite in place. Returns the previous value for `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: PreferenceValue) -> Option<PreferenceValue> {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&PreferenceValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PreferenceValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl<K: Into<String>> FromIterator<(K, PreferenceValue)> for PreferenceMapping {
    fn from_iter<I: IntoIterator<Item = (K, PreferenceValue)>>(iter: I) -> Self {
        let mut mapping = PreferenceMapping::new();
        for (k, v) in iter {
            mapping.insert(k, v);
        }
        mapping
    }
}

impl Serialize for PreferenceMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct MappingVisitor;

impl<'de> Visitor<'de> for MappingVisitor {
    type Value = PreferenceMapping;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of preference keys to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut mapping = PreferenceMapping::new();
        while let Some((key, value)) = access.next_entry::<String, PreferenceValue>()? {
            mapping.insert(key, value);
        }
        Ok(mapping)
    }
}

impl<'de> Deserialize<'de> for PreferenceMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(MappingVisitor)
    }
}

// ---------------------------------------------------------------------------
// Participant-level results
// ---------------------------------------------------------------------------

/// One participant's extracted preferences.
///
/// This is also the initiating frame of the negotiation channel and the
/// payload carried by a handoff blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantPreferences {
    pub participant_name: String,
    pub role: String,
    #[serde(default)]
    pub preferences: PreferenceMapping,
}

/// The bundle sent to open a negotiation.
pub type PreferenceBundle = ParticipantPreferences;

impl ParticipantPreferences {
    pub fn new(participant: &Participant, preferences: PreferenceMapping) -> Self {
        Self {
            participant_name: participant.name.clone(),
            role: participant.role.clone(),
            preferences,
        }
    }

    /// The degraded result: identity with no preferences.
    pub fn empty(participant: &Participant) -> Self {
        Self::new(participant, PreferenceMapping::new())
    }
}

/// Extraction output: one entry per participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesOutput {
    pub participants: Vec<ParticipantPreferences>,
}

/// Shapes the extraction endpoints have been observed to return.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExtractionShape {
    Wrapped { participants: Vec<ParticipantPreferences> },
    Flat(ParticipantPreferences),
    Bare { preferences: PreferenceMapping },
}

impl PreferencesOutput {
    pub fn single(preferences: ParticipantPreferences) -> Self {
        Self {
            participants: vec![preferences],
        }
    }

    /// Normalise any accepted response shape. A bare `{preferences}` body is
    /// attributed to `participant`.
    pub fn from_remote(value: serde_json::Value, participant: &Participant) -> Result<Self, String> {
        match serde_json::from_value::<ExtractionShape>(value) {
            Ok(ExtractionShape::Wrapped { participants }) => Ok(Self { participants }),
            Ok(ExtractionShape::Flat(p)) => Ok(Self::single(p)),
            Ok(ExtractionShape::Bare { preferences }) => {
                Ok(Self::single(ParticipantPreferences::new(participant, preferences)))
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// The entry for `participant`, falling back to the first entry.
    pub fn primary_for(&self, participant: &Participant) -> Option<&ParticipantPreferences> {
        self.participants
            .iter()
            .find(|p| p.participant_name == participant.name)
            .or_else(|| self.participants.first())
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Render the canonical human-readable block:
///
/// ```text
/// PARTICIPANTS:
///
/// Alice (neighbor):
///   - max_noise_db: 60.0
///   - quiet_hours: None
/// ```
pub fn format_output(output: &PreferencesOutput) -> String {
    let mut lines = vec!["PARTICIPANTS:".to_string()];
    for participant in &output.participants {
        lines.push(String::new());
        lines.push(format!("{} ({}):", participant.participant_name, participant.role));
        for (key, value) in participant.preferences.iter() {
            lines.push(format!("  - {key}: {value}"));
        }
    }
    lines.join("\n")
}
