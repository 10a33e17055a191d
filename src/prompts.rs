//! Prompt templates for the text-to-image model.
//!
//! Every clause that describes the character is repeated verbatim in every mood's prompt, so
//! independently generated images keep the same identity.

use std::collections::BTreeMap;

use crate::avatar::{AvatarConfig, EyeColor, Gender, HairColor, HairStyle, Mood, Style, Trait};

const CLAUSE_SEPARATOR: &str = ", ";

const CONSISTENCY: &str = "same character, consistent character design, character reference sheet style, single character focus";
const GENSHIN_CONSISTENCY: &str =
    "official character splash art, character profile illustration";
const NEUTRAL_PORTRAIT: &str = "neutral expression, calm and confident, front-facing portrait, direct eye contact with viewer";
const SAME_FACE: &str = "same face and features, consistent facial structure";
const COMPOSITION: [&str; 2] = [
    "bust shot, from chest up, centered composition, simple background",
    "front view, looking at viewer, clear facial features, symmetrical face",
];
const QUALITY: [&str; 2] = [
    "masterpiece, best quality, highly detailed, sharp focus, 4k quality",
    "consistent lighting, professional character design, clean rendering",
];
const GENSHIN_QUALITY: &str =
    "official art quality, HoYoverse standard, premium game character illustration";

const NEGATIVE_PROMPT: &str = "low quality, blurry, distorted, deformed, watermark, text, signature, username, multiple characters, nsfw, nude, full body, multiple heads, extra limbs, bad anatomy, disfigured, mutation, mutated, extra fingers, poorly drawn hands, poorly drawn face, bad proportions, gross proportions, malformed limbs, missing arms, missing legs, extra arms, extra legs, fused fingers, too many fingers, long neck, cropped, worst quality, low resolution, jpeg artifacts, duplicate, morbid, mutilated, out of frame, bad art, bad colors, unnatural colors, oversaturated, undersaturated";

fn style_clause(style: Style) -> &'static str {
    match style {
        Style::Genshin => {
            "Genshin Impact official art style, miHoYo character design, anime cel-shaded illustration, vibrant saturated colors, clean line art, soft gradient shading, gacha game character portrait, detailed costume design, fantasy RPG aesthetic, Teyvat character style, professional game illustration quality, smooth anime rendering"
        }
        Style::Honkai => {
            "Honkai Star Rail style, sci-fi anime aesthetic, Hoyoverse art style, detailed character portrait, premium game artwork"
        }
        Style::Retro90s => {
            "1990s retro anime style, vintage cel animation, classic shoujo/shounen aesthetic, nostalgic 90s color palette"
        }
        Style::Pixel => {
            "32-bit pixel art style, detailed pixel character sprite, retro game aesthetic, clean pixel art, vibrant pixel colors"
        }
        Style::Jjk => {
            "Jujutsu Kaisen anime style, MAPPA studio quality, modern shounen aesthetic, detailed linework, dynamic character design"
        }
        Style::Ghibli => {
            "Studio Ghibli style, Hayao Miyazaki aesthetic, hand-drawn animation quality, soft watercolor tones, whimsical character design"
        }
        Style::Shinkai => {
            "Makoto Shinkai style, detailed digital painting, cinematic lighting, photorealistic anime aesthetic, Your Name quality"
        }
        Style::Persona5 => {
            "Persona 5 style, stylized character portrait, bold red and black color scheme, Shigenori Soejima art style, high contrast"
        }
    }
}

fn gender_clause(gender: Gender) -> &'static str {
    match gender {
        Gender::Male => "male character, masculine features",
        Gender::Female => "female character, feminine features",
    }
}

fn hair_style_clause(hair_style: HairStyle) -> &'static str {
    match hair_style {
        HairStyle::Long => "long flowing hair",
        HairStyle::Short => "short hair",
        HairStyle::Ponytail => "hair in ponytail",
        HairStyle::Twintails => "twin tails hairstyle",
        HairStyle::Braid => "braided hair",
    }
}

fn hair_color_clause(hair_color: HairColor) -> &'static str {
    match hair_color {
        HairColor::Black => "black hair",
        HairColor::Brown => "brown hair",
        HairColor::Blonde => "blonde hair",
        HairColor::Silver => "silver hair",
        HairColor::White => "white hair",
        HairColor::Red => "red hair",
        HairColor::Pink => "pink hair",
        HairColor::Blue => "blue hair",
        HairColor::Purple => "purple hair",
        HairColor::Green => "green hair",
    }
}

fn eye_color_clause(eye_color: EyeColor) -> &'static str {
    match eye_color {
        EyeColor::Blue => "blue eyes",
        EyeColor::Green => "green eyes",
        EyeColor::Brown => "brown eyes",
        EyeColor::Red => "red eyes",
        EyeColor::Purple => "purple eyes",
        EyeColor::Gold => "golden eyes",
        EyeColor::Pink => "pink eyes",
    }
}

fn trait_clause(value: Trait) -> &'static str {
    match value {
        Trait::Glasses => "wearing glasses",
        Trait::Eyepatch => "wearing eyepatch",
        Trait::ElfEars => "elf ears, pointed ears",
        Trait::Horns => "demon horns, fantasy horns",
        Trait::Wings => "angel wings, feathered wings",
        Trait::CatEars => "cat ears, neko features",
    }
}

fn mood_clause(mood: Mood) -> &'static str {
    match mood {
        Mood::Avatar => "neutral expression, confident pose, character portrait",
        Mood::Happy => "happy expression, cheerful smile, joyful mood",
        Mood::Angry => "angry expression, fierce look, determined eyes",
        Mood::Sad => "sad expression, melancholic mood, gentle tears",
        Mood::Smug => "smug expression, confident smirk, playful attitude",
    }
}

/// Builds the positive prompt for one mood of a character.
pub fn compose(config: &AvatarConfig, mood: Mood) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(16);

    // style leads, the model weights early tokens most
    parts.push(style_clause(config.style).to_string());
    parts.push(CONSISTENCY.to_string());
    if config.style == Style::Genshin {
        parts.push(GENSHIN_CONSISTENCY.to_string());
    }

    match mood {
        Mood::Avatar => parts.push(NEUTRAL_PORTRAIT.to_string()),
        other => parts.push(format!("{}, {SAME_FACE}", mood_clause(other))),
    }

    parts.push(gender_clause(config.gender).to_string());
    parts.push(format!(
        "{} {}",
        hair_color_clause(config.hair_color),
        hair_style_clause(config.hair_style)
    ));
    if matches!(config.hair_style, HairStyle::Twintails | HairStyle::Ponytail) {
        parts.push(format!("distinctive {}", config.hair_style.as_str()));
    }

    parts.push(format!(
        "{}, expressive eyes",
        eye_color_clause(config.eye_color)
    ));

    if !config.traits.is_empty() {
        let described: Vec<&str> = config.traits.iter().map(|t| trait_clause(*t)).collect();
        parts.push(described.join(CLAUSE_SEPARATOR));
        let emphasis: Vec<String> = config
            .traits
            .iter()
            .map(|t| t.as_str().replacen('-', " ", 1))
            .collect();
        parts.push(format!("always with {}", emphasis.join(" and ")));
    }

    parts.extend(COMPOSITION.iter().map(|clause| clause.to_string()));
    parts.extend(QUALITY.iter().map(|clause| clause.to_string()));
    if config.style == Style::Genshin {
        parts.push(GENSHIN_QUALITY.to_string());
    }

    parts.join(CLAUSE_SEPARATOR)
}

/// Exclusions sent alongside every prompt; independent of the character.
pub fn negative_prompt() -> &'static str {
    NEGATIVE_PROMPT
}

/// Prompts for every mood of a character.
pub fn compose_all(config: &AvatarConfig) -> BTreeMap<Mood, String> {
    Mood::ALL
        .iter()
        .map(|mood| (*mood, compose(config, *mood)))
        .collect()
}
