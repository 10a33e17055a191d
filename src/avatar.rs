//! Character configuration and its validation.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Art style of the generated character.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Style {
    Genshin,
    Honkai,
    Retro90s,
    Pixel,
    Jjk,
    Ghibli,
    Shinkai,
    Persona5,
}

impl Style {
    /// Wire name of the style.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Genshin => "genshin",
            Self::Honkai => "honkai",
            Self::Retro90s => "retro90s",
            Self::Pixel => "pixel",
            Self::Jjk => "jjk",
            Self::Ghibli => "ghibli",
            Self::Shinkai => "shinkai",
            Self::Persona5 => "persona5",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Character gender.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Gender {
    Male,
    Female,
}

/// Hair style.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum HairStyle {
    Long,
    Short,
    Ponytail,
    Twintails,
    Braid,
}

impl HairStyle {
    /// Wire name of the hair style.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
            Self::Ponytail => "ponytail",
            Self::Twintails => "twintails",
            Self::Braid => "braid",
        }
    }
}

/// Hair color.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum HairColor {
    Black,
    Brown,
    Blonde,
    Silver,
    White,
    Red,
    Pink,
    Blue,
    Purple,
    Green,
}

/// Eye color.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum EyeColor {
    Blue,
    Green,
    Brown,
    Red,
    Purple,
    Gold,
    Pink,
}

/// Optional visual trait.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[allow(missing_docs)]
pub enum Trait {
    Glasses,
    Eyepatch,
    ElfEars,
    Horns,
    Wings,
    CatEars,
}

impl Trait {
    /// Wire name of the trait, eg `cat-ears`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Glasses => "glasses",
            Self::Eyepatch => "eyepatch",
            Self::ElfEars => "elf-ears",
            Self::Horns => "horns",
            Self::Wings => "wings",
            Self::CatEars => "cat-ears",
        }
    }
}

/// Facial expression variant. Ordering is the canonical generation order.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    /// Neutral base portrait, always generated first.
    Avatar,
    #[allow(missing_docs)]
    Happy,
    #[allow(missing_docs)]
    Angry,
    #[allow(missing_docs)]
    Sad,
    #[allow(missing_docs)]
    Smug,
}

impl Mood {
    /// Every mood in generation order.
    pub const ALL: [Mood; 5] = [Mood::Avatar, Mood::Happy, Mood::Angry, Mood::Sad, Mood::Smug];

    /// Wire name of the mood, also used in storage paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::Happy => "happy",
            Self::Angry => "angry",
            Self::Sad => "sad",
            Self::Smug => "smug",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated character configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarConfig {
    /// Art style
    pub style: Style,
    /// Gender
    pub gender: Gender,
    /// Hair style
    pub hair_style: HairStyle,
    /// Hair color
    pub hair_color: HairColor,
    /// Eye color
    pub eye_color: EyeColor,
    /// Distinct traits, in request order
    pub traits: Vec<Trait>,
    /// Distinct moods, in request order
    pub moods: Vec<Mood>,
}

impl AvatarConfig {
    /// The requested moods in generation order; an empty request means every mood.
    pub fn moods_in_order(&self) -> Vec<Mood> {
        if self.moods.is_empty() {
            return Mood::ALL.to_vec();
        }
        let mut moods = self.moods.clone();
        moods.sort();
        moods.dedup();
        moods
    }
}

/// Configuration exactly as a client sent it. Nothing is trusted until [validate_config].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAvatarConfig {
    /// Art style
    #[serde(default)]
    pub style: Option<Value>,
    /// Gender
    #[serde(default)]
    pub gender: Option<Value>,
    /// Hair style
    #[serde(default)]
    pub hair_style: Option<Value>,
    /// Hair color
    #[serde(default)]
    pub hair_color: Option<Value>,
    /// Eye color
    #[serde(default)]
    pub eye_color: Option<Value>,
    /// Traits, must be an array
    #[serde(default)]
    pub traits: Option<Value>,
    /// Moods, must be an array
    #[serde(default)]
    pub moods: Option<Value>,
}

/// Every problem found in a configuration.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("Invalid configuration: {}", errors.join("; "))]
pub struct InvalidConfig {
    /// Human readable violations, one per field problem
    pub errors: Vec<String>,
}

/// Checks every field of `raw` and returns the typed config, or all the violations found.
pub fn validate_config(raw: &RawAvatarConfig) -> Result<AvatarConfig, InvalidConfig> {
    let mut errors = Vec::new();

    let style = required::<Style>(raw.style.as_ref(), "Style", &mut errors);
    let gender = required::<Gender>(raw.gender.as_ref(), "Gender", &mut errors);
    let hair_style = required::<HairStyle>(raw.hair_style.as_ref(), "Hair style", &mut errors);
    let hair_color = required::<HairColor>(raw.hair_color.as_ref(), "Hair color", &mut errors);
    let eye_color = required::<EyeColor>(raw.eye_color.as_ref(), "Eye color", &mut errors);
    let traits = set_of::<Trait>(raw.traits.as_ref(), "Traits", &mut errors);
    let moods = set_of::<Mood>(raw.moods.as_ref(), "Moods", &mut errors);

    match (style, gender, hair_style, hair_color, eye_color, traits, moods) {
        (
            Some(style),
            Some(gender),
            Some(hair_style),
            Some(hair_color),
            Some(eye_color),
            Some(traits),
            Some(moods),
        ) if errors.is_empty() => Ok(AvatarConfig {
            style,
            gender,
            hair_style,
            hair_color,
            eye_color,
            traits,
            moods,
        }),
        _ => Err(InvalidConfig { errors }),
    }
}

fn required<T: DeserializeOwned>(
    value: Option<&Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<T> {
    match value {
        None | Some(Value::Null) => {
            errors.push(format!("{field} is required"));
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            errors.push(format!("{field} is required"));
            None
        }
        Some(value) => parse_member(value, field, errors),
    }
}

fn set_of<T: DeserializeOwned + Eq + Hash + Copy>(
    value: Option<&Value>,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<Vec<T>> {
    let Some(Value::Array(items)) = value else {
        errors.push(format!("{field} must be an array"));
        return None;
    };

    let mut parsed = Vec::with_capacity(items.len());
    let mut seen = HashSet::new();
    let mut duplicated = false;
    let mut all_valid = true;
    for item in items {
        match parse_member::<T>(item, field, errors) {
            Some(member) => {
                if !seen.insert(member) {
                    duplicated = true;
                }
                parsed.push(member);
            }
            None => all_valid = false,
        }
    }
    if duplicated {
        errors.push(format!("{field} must not contain duplicates"));
        return None;
    }
    all_valid.then_some(parsed)
}

fn parse_member<T: DeserializeOwned>(
    value: &Value,
    field: &str,
    errors: &mut Vec<String>,
) -> Option<T> {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            let shown = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            errors.push(format!("{field} '{shown}' is not a valid option"));
            None
        }
    }
}
