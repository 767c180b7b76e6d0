use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings, Settings},
    BackendClient, IdentityGateway, ProfileGateway, SessionStore, SwipeSession,
};
use shared::{
    domain::FederatedProvider,
    protocol::{AuthSession, ProfileUpdate},
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod password;
mod render;
mod swipe;

#[derive(Parser, Debug)]
#[command(name = "petmatch", about = "Swipe through adoptable animals")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account and its profile.
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// Visible in shell history and process listings; omit it to be prompted instead.
        #[arg(long)]
        password: Option<String>,
    },
    Login {
        #[arg(long)]
        email: String,
        /// Visible in shell history and process listings; omit it to be prompted instead.
        #[arg(long)]
        password: Option<String>,
    },
    /// Print the Google sign-in URL. Finish with `petmatch callback <url>`.
    LoginGoogle {
        #[arg(long)]
        redirect_to: Option<String>,
    },
    /// Complete a federated sign-in from the URL the provider redirected to.
    Callback { url: String },
    Logout,
    Whoami,
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    /// Upload an avatar image and set it on the profile.
    Avatar { path: PathBuf },
    /// Browse the feed interactively.
    Swipe,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    Show {
        #[arg(long)]
        json: bool,
    },
    Update {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        avatar_url: Option<String>,
    },
}

struct App {
    settings: Settings,
    client: Arc<BackendClient>,
    store: SessionStore,
}

impl App {
    fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let client = Arc::new(BackendClient::new(&settings)?);
        let store = SessionStore::from_settings(&settings)?;
        Ok(Self {
            settings,
            client,
            store,
        })
    }

    async fn require_session(&self) -> Result<AuthSession> {
        self.store
            .current_session(self.client.as_ref())
            .await?
            .ok_or_else(|| anyhow!("not signed in; run `petmatch login` or `petmatch signup` first"))
    }
}

async fn read_password(given: Option<String>) -> Result<String> {
    match given {
        Some(password) => {
            warn!("password passed on the command line; it may be kept in shell history");
            Ok(password)
        }
        None => password::prompt("Password: ").await,
    }
}

async fn upload_avatar(app: &App, identity: &AuthSession, path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("'{}' has no usable file name", path.display()))?;

    let url = app.client.upload_avatar(identity, file_name, bytes).await?;
    let update = ProfileUpdate {
        avatar_url: Some(url.clone()),
        ..ProfileUpdate::default()
    };
    app.client
        .update_profile(identity, identity.user_id(), &update)
        .await?;
    Ok(url)
}

async fn run(app: App, command: Command) -> Result<()> {
    match command {
        Command::Signup {
            email,
            name,
            password,
        } => {
            let password = read_password(password).await?;
            let account = app
                .client
                .register(&email, &password, &name)
                .await
                .map_err(|err| anyhow!("Could not create account: {}", err.user_message()))?;
            match account.session {
                Some(session) => {
                    app.store.save(&session).await?;
                    println!("Account created! Signed in as {email}.");
                }
                None => println!("Account created! Check your e-mail to confirm it, then log in."),
            }
        }
        Command::Login { email, password } => {
            let password = read_password(password).await?;
            let session = app
                .client
                .authenticate(&email, &password)
                .await
                .map_err(|err| anyhow!("Could not sign in: {}", err.user_message()))?;
            app.store.save(&session).await?;
            println!("Signed in as {email}.");
        }
        Command::LoginGoogle { redirect_to } => {
            let redirect_to = redirect_to.unwrap_or_else(|| app.settings.redirect_url.clone());
            let url = app
                .client
                .federated_authorize_url(FederatedProvider::Google, &redirect_to)?;
            println!("Open this URL to sign in with Google:\n{url}");
            println!("Then run: petmatch callback '<the URL you were redirected to>'");
        }
        Command::Callback { url } => {
            let session = app
                .client
                .complete_federated(&url)
                .await
                .map_err(|err| anyhow!("Could not sign in with Google: {}", err.user_message()))?;
            app.store.save(&session).await?;
            println!(
                "Signed in as {}.",
                session.user.email.as_deref().unwrap_or("your account")
            );
        }
        Command::Logout => {
            if let Some(session) = app.store.load().await? {
                if let Err(err) = app.client.end_session(&session).await {
                    warn!(error = %err, "backend logout failed; clearing local session anyway");
                }
            }
            app.store.clear().await?;
            println!("Signed out.");
        }
        Command::Whoami => match app.store.current_session(app.client.as_ref()).await? {
            Some(session) => println!(
                "{} ({})",
                session.user.email.as_deref().unwrap_or("<no e-mail>"),
                session.user.id
            ),
            None => println!("Not signed in."),
        },
        Command::Profile { command } => {
            let identity = app.require_session().await?;
            let profile = match command {
                ProfileCommand::Show { json } => {
                    let profile = app
                        .client
                        .get_profile(&identity, identity.user_id())
                        .await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&profile)?);
                        return Ok(());
                    }
                    profile
                }
                ProfileCommand::Update {
                    name,
                    bio,
                    location,
                    avatar_url,
                } => {
                    let update = ProfileUpdate {
                        name,
                        bio,
                        avatar_url,
                        location,
                    };
                    if update.is_empty() {
                        return Err(anyhow!("nothing to update; pass at least one field"));
                    }
                    app.client
                        .update_profile(&identity, identity.user_id(), &update)
                        .await?
                }
            };
            print!("{}", render::profile(&profile));
        }
        Command::Avatar { path } => {
            let identity = app.require_session().await?;
            let url = upload_avatar(&app, &identity, &path).await?;
            println!("Avatar updated: {url}");
        }
        Command::Swipe => {
            let identity = app.require_session().await?;
            let feed = SwipeSession::new(app.client.clone(), app.settings.page_size);
            swipe::run(feed, &identity).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let app = App::new(load_settings())?;
    run(app, cli.command).await
}
