use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tabla_client::ThemePreference;
use tabla_client::geo::Coordinates;
use time::Date;
use time::macros::format_description;

#[derive(Parser)]
#[command(name = "tabla")]
#[command(about = "Tabla CLI: find restaurants, manage likes and check availability")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a config file (defaults to ./tabla.toml when present)
    #[arg(short, long, global = true, env = "TABLA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login(LoginArgs),
    /// Create an account and sign in
    Register(RegisterArgs),
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List restaurants
    Restaurants(RestaurantsArgs),
    /// Show one restaurant
    Show(IdArgs),
    /// Like or unlike a restaurant
    Like(IdArgs),
    /// List your reviews
    Reviews,
    /// Show available time slots
    Slots(SlotsArgs),
    /// Set, show or clear the remembered location
    Locate(LocateArgs),
    /// Show or set the theme preference
    Theme(ThemeArgs),
    /// Inspect the effective configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct LoginArgs {
    /// Account email
    #[arg(short, long)]
    pub email: String,
    /// Password
    #[arg(long, env = "TABLA_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(clap::Args)]
pub struct RegisterArgs {
    /// Display name
    #[arg(short, long)]
    pub name: String,
    /// Account email
    #[arg(short, long)]
    pub email: String,
    /// Password
    #[arg(long, env = "TABLA_PASSWORD", hide_env_values = true)]
    pub password: String,
    /// Phone number
    #[arg(long)]
    pub phone: Option<String>,
}

#[derive(clap::Args)]
pub struct RestaurantsArgs {
    /// Filter by city
    #[arg(long)]
    pub city: Option<String>,
    /// Filter by cuisine
    #[arg(long)]
    pub cuisine: Option<String>,
    /// Free-text search
    #[arg(short, long)]
    pub search: Option<String>,
    /// Result page
    #[arg(long)]
    pub page: Option<u32>,
    /// Sort by distance from LAT,LON
    #[arg(long, value_parser = parse_coordinates, conflicts_with = "nearby")]
    pub near: Option<Coordinates>,
    /// Sort by distance from the remembered location
    #[arg(long)]
    pub nearby: bool,
}

#[derive(clap::Args)]
pub struct IdArgs {
    /// Restaurant id
    pub id: String,
}

#[derive(clap::Args)]
pub struct SlotsArgs {
    /// Restaurant id
    pub id: String,
    /// Date (YYYY-MM-DD)
    #[arg(short, long, value_parser = parse_date)]
    pub date: Date,
    /// Number of guests
    #[arg(short, long, default_value_t = 2)]
    pub party_size: u32,
}

#[derive(clap::Args)]
pub struct LocateArgs {
    /// Remember this position (LAT,LON)
    #[arg(long, value_parser = parse_coordinates, conflicts_with = "clear")]
    pub at: Option<Coordinates>,
    /// Forget the remembered position
    #[arg(long)]
    pub clear: bool,
}

#[derive(clap::Args)]
pub struct ThemeArgs {
    /// New preference (light, dark, system); shows the current one if omitted
    pub preference: Option<ThemePreference>,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the merged configuration
    Show,
}

pub fn parse_coordinates(s: &str) -> Result<Coordinates, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got \"{s}\""))?;
    let latitude: f64 = lat
        .trim()
        .parse()
        .map_err(|e| format!("invalid latitude \"{lat}\": {e}"))?;
    let longitude: f64 = lon
        .trim()
        .parse()
        .map_err(|e| format!("invalid longitude \"{lon}\": {e}"))?;
    let coordinates = Coordinates::new(latitude, longitude);
    if !coordinates.is_valid() {
        return Err(format!("coordinates out of range: {s}"));
    }
    Ok(coordinates)
}

pub fn parse_date(s: &str) -> Result<Date, String> {
    Date::parse(s, format_description!("[year]-[month]-[day]"))
        .map_err(|e| format!("invalid date \"{s}\": {e}"))
}
