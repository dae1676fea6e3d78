//! crates/diet_assistant_core/src/prompts.rs
//!
//! Prompt templates for the guided diet features. Each one is personalised
//! with the user's health profile.

use crate::domain::HealthProfile;

const DISH_CALORIES_TEMPLATE: &str = "Act as a nutritionist. Here is some information to help estimate \
the calories of the dish: age {age}, weight {weight} kg, height {height} m, BMI {bmi} and physical \
activity level {activity}. Please provide a calorie estimate for this dish based on the information provided.";

const RECIPES_FROM_INGREDIENTS_TEMPLATE: &str = "Based on the ingredients in the image and on the \
following dietary restrictions: {restrictions}, recommend healthy recipes for the user's profile.";

const SHOPPING_LIST_REQUEST_TEMPLATE: &str =
    "Generate recipes based on the shopping list: {items} for {days} days.";

const SHOPPING_LIST_PROMPT_TEMPLATE: &str = "You are a nutritionist. I have the following shopping \
list: {items}. I need recipes for the next {days} days. Consider my health data: {health} and my \
dietary restrictions: {restrictions}. Please put together one balanced recipe for each day, using \
only my shopping list.";

/// Sent after a photo of a dish.
pub fn dish_calories_prompt(health: &HealthProfile) -> String {
    // BMI reads as 0 when no height is known.
    let bmi = health.bmi().unwrap_or(0.0);
    DISH_CALORIES_TEMPLATE
        .replace("{age}", &health.age.to_string())
        .replace("{weight}", &health.weight_kg.to_string())
        .replace("{height}", &health.height_m.to_string())
        .replace("{bmi}", &bmi.to_string())
        .replace("{activity}", health.activity_level.label())
}

/// Sent after a photo of ingredients.
pub fn recipes_from_ingredients_prompt(health: &HealthProfile) -> String {
    RECIPES_FROM_INGREDIENTS_TEMPLATE.replace("{restrictions}", &health.restrictions_label())
}

/// The short user turn recorded in the conversation for a shopping-list request.
pub fn shopping_list_request(items: &str, days: u32) -> String {
    // User text goes in last so braces inside it are never substituted.
    SHOPPING_LIST_REQUEST_TEMPLATE
        .replace("{days}", &days.to_string())
        .replace("{items}", items.trim())
}

/// The one-shot prompt actually sent to the model for a shopping-list request.
pub fn shopping_list_prompt(items: &str, days: u32, health: &HealthProfile) -> String {
    SHOPPING_LIST_PROMPT_TEMPLATE
        .replace("{days}", &days.to_string())
        .replace("{health}", &health_summary(health))
        .replace("{restrictions}", &health.restrictions_label())
        .replace("{items}", items.trim())
}

fn health_summary(health: &HealthProfile) -> String {
    format!(
        "age {}, weight {} kg, height {} m, physical activity level {}",
        health.age,
        health.weight_kg,
        health.height_m,
        health.activity_level.label()
    )
}
