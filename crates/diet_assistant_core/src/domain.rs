//! crates/diet_assistant_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Title given to a chat session when the caller does not pick one.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// What the message store keeps in place of an image part. Images cannot be
/// restored from storage; replaying history after a restart yields this text.
pub const IMAGE_PLACEHOLDER: &str = "[Image in base64]";

//=========================================================================================
// Health Profile
//=========================================================================================

/// Self-reported physical activity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityLevel {
    Sedentary,
    Moderate,
    Active,
    VeryActive,
}

impl ActivityLevel {
    pub const ALL: [ActivityLevel; 4] = [
        ActivityLevel::Sedentary,
        ActivityLevel::Moderate,
        ActivityLevel::Active,
        ActivityLevel::VeryActive,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ActivityLevel::Sedentary => "Sedentary",
            ActivityLevel::Moderate => "Moderate",
            ActivityLevel::Active => "Active",
            ActivityLevel::VeryActive => "Very Active",
        }
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ActivityLevel {
    type Err = String;

    /// Accepts the canonical labels plus the Portuguese labels written by the
    /// first version of the app, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sedentary" | "sedentário" | "sedentario" => Ok(ActivityLevel::Sedentary),
            "moderate" | "moderado" => Ok(ActivityLevel::Moderate),
            "active" | "ativo" => Ok(ActivityLevel::Active),
            "very active" | "very_active" | "muito ativo" => Ok(ActivityLevel::VeryActive),
            other => Err(format!("unknown activity level: '{}'", other)),
        }
    }
}

/// A dietary restriction or health condition the assistant must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DietaryRestriction {
    Diabetes,
    Hypertension,
    FoodAllergies,
    CeliacDisease,
    Vegetarian,
    Vegan,
    LowCarb,
    Keto,
}

impl DietaryRestriction {
    pub const ALL: [DietaryRestriction; 8] = [
        DietaryRestriction::Diabetes,
        DietaryRestriction::Hypertension,
        DietaryRestriction::FoodAllergies,
        DietaryRestriction::CeliacDisease,
        DietaryRestriction::Vegetarian,
        DietaryRestriction::Vegan,
        DietaryRestriction::LowCarb,
        DietaryRestriction::Keto,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DietaryRestriction::Diabetes => "Diabetes",
            DietaryRestriction::Hypertension => "Hypertension",
            DietaryRestriction::FoodAllergies => "Food Allergies",
            DietaryRestriction::CeliacDisease => "Celiac Disease",
            DietaryRestriction::Vegetarian => "Vegetarian",
            DietaryRestriction::Vegan => "Vegan",
            DietaryRestriction::LowCarb => "Low Carb",
            DietaryRestriction::Keto => "Keto",
        }
    }
}

impl fmt::Display for DietaryRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DietaryRestriction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "diabetes" => Ok(DietaryRestriction::Diabetes),
            "hypertension" | "hipertensão" | "hipertensao" => Ok(DietaryRestriction::Hypertension),
            "food allergies" | "alergias alimentares" => Ok(DietaryRestriction::FoodAllergies),
            "celiac disease" | "doenças celíacas" | "doencas celiacas" => {
                Ok(DietaryRestriction::CeliacDisease)
            }
            "vegetarian" | "vegetariano" => Ok(DietaryRestriction::Vegetarian),
            "vegan" | "vegano" => Ok(DietaryRestriction::Vegan),
            "low carb" | "low_carb" | "lowcarb" => Ok(DietaryRestriction::LowCarb),
            "keto" => Ok(DietaryRestriction::Keto),
            other => Err(format!("unknown dietary restriction: '{}'", other)),
        }
    }
}

/// Serializes a restriction set into the comma-joined column format.
/// The set is ordered, so the output is canonical.
pub fn restrictions_to_csv(restrictions: &BTreeSet<DietaryRestriction>) -> String {
    restrictions
        .iter()
        .map(DietaryRestriction::label)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses the comma-joined column format. An empty string is the empty set.
pub fn restrictions_from_csv(csv: &str) -> Result<BTreeSet<DietaryRestriction>, String> {
    csv.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(DietaryRestriction::from_str)
        .collect()
}

/// The health attributes the prompts are personalised with.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthProfile {
    pub age: u32,
    pub weight_kg: f64,
    pub height_m: f64,
    pub activity_level: ActivityLevel,
    pub dietary_restrictions: BTreeSet<DietaryRestriction>,
}

impl Default for HealthProfile {
    fn default() -> Self {
        Self {
            age: 25,
            weight_kg: 70.0,
            height_m: 1.75,
            activity_level: ActivityLevel::Moderate,
            dietary_restrictions: BTreeSet::new(),
        }
    }
}

impl HealthProfile {
    /// Body-mass index rounded to two decimals, `None` without a usable height.
    pub fn bmi(&self) -> Option<f64> {
        if self.height_m <= 0.0 {
            return None;
        }
        let bmi = self.weight_kg / (self.height_m * self.height_m);
        Some((bmi * 100.0).round() / 100.0)
    }

    /// Human-readable restriction list, or "None".
    pub fn restrictions_label(&self) -> String {
        if self.dietary_restrictions.is_empty() {
            return "None".to_string();
        }
        self.dietary_restrictions
            .iter()
            .map(DietaryRestriction::label)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

//=========================================================================================
// Users and Sessions
//=========================================================================================

/// A registered user as seen by the rest of the app. The credential secret
/// never leaves the profile store.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub api_key: Option<String>,
    pub health: HealthProfile,
}

/// A conversation thread owned by one user.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Turns
//=========================================================================================

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: '{}'", other)),
        }
    }
}

/// The `url` of an image part: a `data:<mime>;base64,<payload>` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One atomic piece of a turn's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn image(data_uri: impl Into<String>) -> Self {
        Part::ImageUrl {
            image_url: ImageUrl {
                url: data_uri.into(),
            },
        }
    }
}

/// A turn in the in-memory conversation view, with its full part structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    /// The text the message store persists for this turn: text parts joined
    /// by newlines, every image replaced by [`IMAGE_PLACEHOLDER`].
    pub fn flatten(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Text { text } => text.as_str(),
                Part::ImageUrl { .. } => IMAGE_PLACEHOLDER,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A turn as the message store returns it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTurn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// External Model Types
//=========================================================================================

/// Role names understood by the external model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    User,
    Model,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::User => "user",
            ModelRole::Model => "model",
        }
    }
}

impl From<Role> for ModelRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Assistant => ModelRole::Model,
            _ => ModelRole::User,
        }
    }
}

/// Image bytes decoded from a data URI, with the MIME type sniffed from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelPart {
    Text(String),
    Image(DecodedImage),
}

/// One turn in the consolidated sequence sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTurn {
    pub role: ModelRole,
    pub parts: Vec<ModelPart>,
}

impl ModelTurn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: ModelRole::User,
            parts: vec![ModelPart::Text(text.into())],
        }
    }
}

/// Model identifier and sampling temperature for one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
}

impl ModelConfig {
    pub const CHAT_MODEL: &'static str = "gemini-2.0-flash";
    pub const REALTIME_MODEL: &'static str = "gemini-2.0-flash-exp";
    pub const DEFAULT_TEMPERATURE: f32 = 0.3;

    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
        }
    }

    /// Normal text/image chat.
    pub fn chat() -> Self {
        Self::new(Self::CHAT_MODEL, Self::DEFAULT_TEMPERATURE)
    }

    /// The realtime multimodal model, which may answer with inline media.
    pub fn realtime() -> Self {
        Self::new(Self::REALTIME_MODEL, Self::DEFAULT_TEMPERATURE)
    }
}

/// Everything one streaming call to the model needs.
#[derive(Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub temperature: f32,
    pub api_key: String,
    pub contents: Vec<ModelTurn>,
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("api_key", &"[REDACTED]")
            .field("contents", &self.contents.len())
            .finish()
    }
}

/// Typed binary payload the model may stream instead of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineData {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One inbound piece of a streamed model response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelChunk {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

impl ModelChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_restrictions_round_trip_to_empty_set() {
        let csv = restrictions_to_csv(&BTreeSet::new());
        assert_eq!(csv, "");
        assert!(restrictions_from_csv(&csv).unwrap().is_empty());
    }

    #[test]
    fn restrictions_round_trip_regardless_of_order() {
        let set: BTreeSet<_> = [DietaryRestriction::Vegan, DietaryRestriction::LowCarb]
            .into_iter()
            .collect();
        let csv = restrictions_to_csv(&set);
        assert_eq!(restrictions_from_csv(&csv).unwrap(), set);
        assert_eq!(restrictions_from_csv("Low Carb, Vegan").unwrap(), set);
        assert_eq!(restrictions_from_csv("Vegan,Low Carb").unwrap(), set);
    }

    #[test]
    fn legacy_labels_are_accepted() {
        let set = restrictions_from_csv("Vegano,Doenças Celíacas").unwrap();
        assert!(set.contains(&DietaryRestriction::Vegan));
        assert!(set.contains(&DietaryRestriction::CeliacDisease));
        assert_eq!("Muito Ativo".parse::<ActivityLevel>(), Ok(ActivityLevel::VeryActive));
        assert_eq!("Sedentário".parse::<ActivityLevel>(), Ok(ActivityLevel::Sedentary));
    }

    #[test]
    fn unknown_restriction_is_rejected() {
        assert!(restrictions_from_csv("Vegan,Carnivore").is_err());
    }

    #[test]
    fn bmi_is_rounded_and_needs_height() {
        let mut profile = HealthProfile {
            weight_kg: 70.0,
            height_m: 1.75,
            ..HealthProfile::default()
        };
        assert_eq!(profile.bmi(), Some(22.86));
        profile.height_m = 0.0;
        assert_eq!(profile.bmi(), None);
    }

    #[test]
    fn flatten_replaces_images_with_placeholder() {
        let turn = Turn::new(
            Role::User,
            vec![Part::image("data:image/png;base64,AAAA"), Part::text("what is this?")],
        );
        assert_eq!(turn.flatten(), format!("{}\nwhat is this?", IMAGE_PLACEHOLDER));
    }

    #[test]
    fn part_serializes_with_type_tag() {
        let json = serde_json::to_value(Part::image("data:image/png;base64,AAAA")).unwrap();
        assert_eq!(json["type"], "image_url");
        assert_eq!(json["image_url"]["url"], "data:image/png;base64,AAAA");

        let part: Part = serde_json::from_str(r#"{"type":"text","text":"hi"}"#).unwrap();
        assert_eq!(part, Part::text("hi"));
    }

    #[test]
    fn generation_request_debug_redacts_key() {
        let request = GenerationRequest {
            model: ModelConfig::CHAT_MODEL.to_string(),
            temperature: 0.3,
            api_key: "secret-key".to_string(),
            contents: vec![],
        };
        assert!(!format!("{:?}", request).contains("secret-key"));
    }
}
