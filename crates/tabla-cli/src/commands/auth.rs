use anyhow::Result;
use colored::Colorize;
use tabla_client::AppContext;
use tabla_client::models::{Credentials, Registration};

use crate::cli::{LoginArgs, OutputFormat, RegisterArgs};
use crate::output::{print_error, print_field, print_json, print_success};

pub async fn login(ctx: &AppContext, args: &LoginArgs) -> Result<()> {
    let user = ctx
        .login(&Credentials::new(args.email.clone(), args.password.clone()))
        .await?;
    print_success(&format!("Signed in as {}", user.display_name().cyan()));
    Ok(())
}

pub async fn register(ctx: &AppContext, args: &RegisterArgs) -> Result<()> {
    let registration = Registration {
        name: args.name.clone(),
        email: args.email.clone(),
        password: args.password.clone(),
        phone: args.phone.clone(),
    };
    let user = ctx.register(&registration).await?;
    print_success(&format!("Welcome, {}", user.display_name().cyan()));
    Ok(())
}

pub async fn logout(ctx: &AppContext) -> Result<()> {
    if !ctx.session()?.is_authenticated() {
        println!("Not signed in");
        return Ok(());
    }
    ctx.logout().await?;
    print_success("Signed out");
    Ok(())
}

pub async fn whoami(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let session = ctx.session()?;
    if !session.is_authenticated() {
        print_error("Not signed in");
        return Ok(());
    }
    // Refresh a near-expiry token before the profile call.
    if !session.ensure_valid_token().await {
        print_error("Session expired, please sign in again");
        return Ok(());
    }
    let user = match session.refresh_profile().await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(error = %e, "Profile refresh failed, showing stored profile");
            match session.current_user() {
                Some(user) => user,
                None => return Err(e.into()),
            }
        }
    };

    if let OutputFormat::Json = format {
        return print_json(&user);
    }
    print_field("Name", user.display_name());
    print_field("Email", &user.email);
    if let Some(phone) = &user.phone {
        print_field("Phone", phone);
    }
    if let Some(expires_at) = session.token_store().load()?.and_then(|t| t.expires_at) {
        print_field("Token expires", expires_at);
    }
    Ok(())
}
