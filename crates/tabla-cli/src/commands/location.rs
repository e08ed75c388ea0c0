use std::time::Duration;

use anyhow::Result;
use tabla_client::AppContext;
use tabla_client::geo::{Position, PositionOptions};

use crate::cli::{LocateArgs, OutputFormat};
use crate::output::{print_field, print_json, print_success};

pub async fn run(ctx: &AppContext, args: &LocateArgs, format: OutputFormat) -> Result<()> {
    let geo = ctx.geolocation();
    if args.clear {
        geo.clear_stored_location();
        print_success("Location forgotten");
        return Ok(());
    }
    if args.at.is_some() {
        let options = PositionOptions::from_config(&ctx.config().geolocation)
            .with_maximum_age(Duration::ZERO);
        let position = geo.get_current_position(options).await?;
        print_success("Location saved");
        return print_position(&position, format);
    }
    match geo.position() {
        Some(position) => print_position(&position, format),
        None => {
            println!("No location remembered. Set one with: tabla locate --at LAT,LON");
            Ok(())
        }
    }
}

fn print_position(position: &Position, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        return print_json(position);
    }
    print_field("Latitude", format!("{:.5}", position.latitude));
    print_field("Longitude", format!("{:.5}", position.longitude));
    if let Some(accuracy) = position.accuracy {
        print_field("Accuracy", format!("{accuracy:.0} m"));
    }
    print_field("Recorded", position.timestamp);
    Ok(())
}
