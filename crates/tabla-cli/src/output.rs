use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabla_client::geo::format_distance;
use tabla_client::models::{Restaurant, Review, TimeSlot};
use tabla_client::restaurants::NearbyRestaurant;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_field(name: &str, value: impl std::fmt::Display) {
    println!("{}: {}", name.cyan(), value);
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}

fn heart(liked: bool) -> &'static str {
    if liked { "♥" } else { "" }
}

/// `liked` is the effective flag for each row, in order.
pub fn print_restaurants(
    restaurants: &[Restaurant],
    liked: &[bool],
    count: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    if let OutputFormat::Json = format {
        return print_json(&restaurants);
    }
    if restaurants.is_empty() {
        println!("No restaurants found.");
        return Ok(());
    }
    let mut builder = Builder::default();
    builder.push_record(["ID", "Name", "Cuisine", "City", "Rating", "Liked"]);
    for (r, liked) in restaurants.iter().zip(liked) {
        builder.push_record([
            r.id.to_string(),
            r.name.clone(),
            opt(&r.cuisine),
            opt(&r.city),
            r.rating.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".into()),
            heart(*liked).to_string(),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
    if let Some(count) = count {
        println!("Total: {count}");
    }
    Ok(())
}

pub fn print_nearby(nearby: &[NearbyRestaurant], format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        let rows: Vec<_> = nearby
            .iter()
            .map(|n| serde_json::json!({"restaurant": n.restaurant, "distance_km": n.distance_km}))
            .collect();
        return print_json(&rows);
    }
    if nearby.is_empty() {
        println!("No restaurants with a known location.");
        return Ok(());
    }
    let mut builder = Builder::default();
    builder.push_record(["ID", "Name", "Cuisine", "Distance"]);
    for n in nearby {
        builder.push_record([
            n.restaurant.id.to_string(),
            n.restaurant.name.clone(),
            opt(&n.restaurant.cuisine),
            format_distance(n.distance_km),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
    Ok(())
}

pub fn print_restaurant(restaurant: &Restaurant, liked: bool, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        return print_json(restaurant);
    }
    println!("{} {}", restaurant.name.bold(), heart(liked).red());
    print_field("ID", &restaurant.id);
    if let Some(cuisine) = &restaurant.cuisine {
        print_field("Cuisine", cuisine);
    }
    if let Some(address) = &restaurant.address {
        print_field("Address", address);
    }
    if let Some(city) = &restaurant.city {
        print_field("City", city);
    }
    if let Some(rating) = restaurant.rating {
        print_field("Rating", format!("{rating:.1}"));
    }
    if let Some(price) = restaurant.price_level {
        print_field("Price", "€".repeat(price as usize));
    }
    print_field("Likes", restaurant.likes_count);
    Ok(())
}

pub fn print_reviews(reviews: &[Review], format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        return print_json(&reviews);
    }
    if reviews.is_empty() {
        println!("No reviews yet.");
        return Ok(());
    }
    let mut builder = Builder::default();
    builder.push_record(["Restaurant", "Rating", "Comment"]);
    for r in reviews {
        builder.push_record([
            r.restaurant_name
                .clone()
                .unwrap_or_else(|| r.restaurant_id.to_string()),
            "★".repeat(r.rating as usize),
            opt(&r.comment),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
    Ok(())
}

pub fn print_slots(slots: &[TimeSlot], format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        return print_json(&slots);
    }
    if slots.is_empty() {
        println!("No available time slots.");
        return Ok(());
    }
    let times: Vec<&str> = slots.iter().map(|s| s.time.as_str()).collect();
    println!("{}", times.join("  "));
    Ok(())
}
