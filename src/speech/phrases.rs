//! Spoken phrases for stabilized results

use crate::dispatch::CommandId;
use crate::perception::{CLEAR_PATH, Position, QueryType};
use crate::stabilizer::StabilizedResult;

/// Banknote label meaning "no banknote in view"
const NO_MONEY: &str = "no-money";

/// Sentence for an announceable result
#[must_use]
pub fn describe(result: &StabilizedResult) -> String {
    match result.query {
        QueryType::Identify => identify(result),
        QueryType::Count => count(result),
        QueryType::Obstacle => obstacle(&result.label),
        QueryType::Banknote => banknote(&result.label),
        QueryType::Price => price(&result.label),
        QueryType::Text => result.label.clone(),
    }
}

/// One sentence for the item in view, with its count and price when those are known
///
/// Count and price are only mentioned when their results are announceable.
#[must_use]
pub fn full(identify: &StabilizedResult, count: &StabilizedResult, price: &StabilizedResult) -> String {
    let mut parts = vec![speakable(&identify.label)];
    if count.is_announceable() {
        parts.push(match count.count.unwrap_or(0) {
            1 => "one piece".to_string(),
            n => format!("{n} pieces"),
        });
    }
    if price.is_announceable() {
        parts.push(self::price(&price.label));
    }
    format!("{}.", parts.join(", "))
}

/// Said when a decision is not stable enough
#[must_use]
pub const fn uncertain(command: CommandId) -> &'static str {
    match command {
        CommandId::Identify => "Not sure what this is. Please hold it steady.",
        CommandId::Count => "Not sure how many. Please hold steady.",
        CommandId::Obstacle => "Not sure about the path ahead.",
        CommandId::Banknote => "Banknote not recognized. Please hold it closer.",
        CommandId::Price => "Price not recognized. Please hold the tag close and steady.",
        CommandId::Text => "No text recognized. Please move closer and hold steady.",
        CommandId::Full => "Not sure what this is. Please hold it steady.",
    }
}

/// Said when the backend for a command is missing
#[must_use]
pub const fn unavailable(command: CommandId) -> &'static str {
    match command {
        CommandId::Identify => "Object recognition is not available.",
        CommandId::Count => "Counting is not available.",
        CommandId::Obstacle => "Obstacle detection is not available.",
        CommandId::Banknote => "Banknote recognition is not available.",
        CommandId::Price => "Price reading is not available.",
        CommandId::Text => "Text reading is not available.",
        CommandId::Full => "Object recognition is not available.",
    }
}

fn speakable(label: &str) -> String {
    label.replace(['_', '-'], " ")
}

fn identify(result: &StabilizedResult) -> String {
    let item = speakable(&result.label);
    match result.bbox.map(|b| b.position()) {
        Some(Position::Left) => format!("{item} on the left"),
        Some(Position::Right) => format!("{item} on the right"),
        Some(Position::Center) => format!("{item} ahead"),
        None => item,
    }
}

fn count(result: &StabilizedResult) -> String {
    let n = result.count.unwrap_or(0);
    let item = result
        .subject
        .as_deref()
        .map_or_else(|| "item".to_string(), speakable);
    match n {
        0 => format!("No {}", plural(&item)),
        1 => format!("One {item}"),
        _ => format!("{n} {}", plural(&item)),
    }
}

fn plural(item: &str) -> String {
    if item.ends_with('s') {
        item.to_string()
    } else {
        format!("{item}s")
    }
}

fn obstacle(label: &str) -> String {
    if label == CLEAR_PATH {
        return "Path is clear.".to_string();
    }

    let mut parts = label.split(':').skip(1);
    let distance = match parts.next() {
        Some("very-close") => "Stop. Obstacle very close",
        Some("near") => "Obstacle close",
        _ => "Obstacle ahead",
    };
    match parts.next() {
        Some("left") => format!("{distance} on the left."),
        Some("right") => format!("{distance} on the right."),
        _ => format!("{distance}."),
    }
}

fn banknote(label: &str) -> String {
    if label == NO_MONEY {
        return "No banknote recognized.".to_string();
    }
    if label.chars().all(|c| c.is_ascii_digit()) {
        return format!("{label} euro");
    }
    speakable(label)
}

fn price(label: &str) -> String {
    let Some((euros, cents)) = label.split_once('.') else {
        return format!("Price {label} euro");
    };
    let cents = cents.trim_start_matches('0');
    match (euros, cents) {
        ("0", "") => "Price 0 euro".to_string(),
        ("0", c) => format!("Price {c} cent"),
        (e, "") => format!("Price {e} euro"),
        (e, c) => format!("Price {e} euro {c}"),
    }
}
