use anyhow::{Context, Result};
use colored::Colorize;
use tabla_client::AppContext;
use tabla_client::models::{Id, RestaurantFilters};

use crate::cli::{IdArgs, OutputFormat, RestaurantsArgs, SlotsArgs};
use crate::output::{
    print_nearby, print_restaurant, print_restaurants, print_reviews, print_slots, print_success,
};

pub async fn list(ctx: &AppContext, args: &RestaurantsArgs, format: OutputFormat) -> Result<()> {
    let filters = RestaurantFilters {
        city: args.city.clone(),
        cuisine: args.cuisine.clone(),
        search: args.search.clone(),
        page: args.page,
    };
    let service = ctx.restaurants();

    let origin = match args.near {
        Some(origin) => Some(origin),
        None if args.nearby => Some(
            ctx.geolocation()
                .position()
                .map(|p| p.coordinates())
                .context("No location remembered. Set one with: tabla locate --at LAT,LON")?,
        ),
        None => None,
    };
    if let Some(origin) = origin {
        let nearby = service.nearby(&filters, origin).await?;
        return print_nearby(&nearby, format);
    }

    let list = service.list_restaurants(&filters).await?;
    let liked: Vec<bool> = list.results.iter().map(|r| service.is_liked(r)).collect();
    print_restaurants(&list.results, &liked, list.count, format)
}

pub async fn show(ctx: &AppContext, args: &IdArgs, format: OutputFormat) -> Result<()> {
    let service = ctx.restaurants();
    let restaurant = service.get_restaurant(&Id::from(args.id.as_str())).await?;
    print_restaurant(&restaurant, service.is_liked(&restaurant), format)
}

pub async fn like(ctx: &AppContext, args: &IdArgs) -> Result<()> {
    let id = Id::from(args.id.as_str());
    let liked = ctx.restaurants().toggle_like(&id).await?;
    let verb = if liked { "Liked" } else { "Unliked" };
    print_success(&format!("{verb} restaurant {}", id.to_string().cyan()));
    Ok(())
}

pub async fn reviews(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let reviews = ctx.restaurants().user_reviews().await?;
    print_reviews(&reviews.results, format)
}

pub async fn slots(ctx: &AppContext, args: &SlotsArgs, format: OutputFormat) -> Result<()> {
    let slots = ctx
        .restaurants()
        .time_slots(&Id::from(args.id.as_str()), args.date, args.party_size)
        .await?;
    print_slots(&slots, format)
}
