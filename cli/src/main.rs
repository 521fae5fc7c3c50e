use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use lana::api::{AuthApiError, NewAccount, ProfileUpdate};
use lana::app::AppContext;
use lana::config::{ClientConfig, ConfigError};
use lana::flows::{self, FlowError};
use lana::gate::{NavigationError, NavigationGate, NavigationHistory, Route, Stack};
use lana::profile::{Profile, Role};
use lana::session::Durability;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("api error: {0}")]
    Api(#[from] AuthApiError),
    #[error("{0}")]
    Flow(#[from] FlowError),
    #[error("navigation error: {0}")]
    Navigation(#[from] NavigationError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl CliError {
    fn user_message(&self) -> String {
        match self {
            Self::Api(e) => e.user_message(),
            Self::Flow(e) => e.user_message(),
            Self::Navigation(NavigationError::WrongStack { active: Stack::Main, .. }) => {
                "Ya iniciaste sesión. Ejecuta `lana logout` primero.".to_owned()
            }
            Self::Navigation(NavigationError::WrongStack { .. }) => {
                "Inicia sesión para continuar (`lana login`).".to_owned()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "lana", about = "Lana personal-finance client")]
struct Cli {
    #[arg(long, env = "LANA_API_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "LANA_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current session and which screen stack it routes to.
    Status,
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "LANA_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register(RegisterArgs),
    Logout,
    /// Check the stored token with the backend; ends the session if rejected.
    Verify,
    Profile(ProfileCommand),
    ForgotPassword {
        #[arg(long)]
        email: String,
    },
    ResetPassword {
        #[arg(long)]
        token: String,
        #[arg(long, env = "LANA_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "LANA_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, default_value_t = false)]
    admin: bool,
    /// Create the account without signing in afterwards.
    #[arg(long, default_value_t = false)]
    no_login: bool,
}

#[derive(Args, Debug)]
struct ProfileCommand {
    #[command(subcommand)]
    command: ProfileSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfileSubcommand {
    Show {
        /// Fetch the profile from the backend before printing it.
        #[arg(long, default_value_t = false)]
        refresh: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    Update {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, env = "LANA_NEW_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let base_url = cli.base_url.clone();
    let config = ClientConfig::from_lookup_with_session_file(
        |key| match key {
            "LANA_API_BASE_URL" => base_url.clone(),
            _ => std::env::var(key).ok(),
        },
        cli.session_file.clone(),
    )?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let ctx = AppContext::from_config(load_config(&cli)?)?;
    let mut gate = NavigationGate::new(NavigationHistory::new());
    gate.apply(&ctx.session.snapshot());

    ctx.start().await;
    gate.apply(&ctx.session.snapshot());

    match cli.command {
        Command::Status => {
            print_status(&ctx, &gate);
            Ok(())
        }
        Command::Login { email, password } => {
            gate.navigator_mut().push(Route::Login)?;
            let outcome = flows::sign_in(ctx.api.as_ref(), &ctx.session, &email, &password).await?;
            gate.apply(&outcome.value);
            println!("Bienvenido, {}", display_name(outcome.value.user(), &email));
            warn_if_memory_only(outcome.durability);
            Ok(())
        }
        Command::Register(args) => run_register(&ctx, &mut gate, args).await,
        Command::Logout => {
            if !ctx.session.snapshot().is_authenticated() {
                println!("No hay una sesión activa.");
                return Ok(());
            }
            flows::sign_out(ctx.api.as_ref(), &ctx.session).await?;
            gate.apply(&ctx.session.snapshot());
            println!("Sesión cerrada.");
            Ok(())
        }
        Command::Verify => {
            if flows::verify_session(ctx.api.as_ref(), &ctx.session).await? {
                println!("Sesión válida.");
            } else {
                println!("Sin sesión válida.");
            }
            gate.apply(&ctx.session.snapshot());
            Ok(())
        }
        Command::Profile(profile) => {
            gate.navigator_mut().push(Route::Profile)?;
            run_profile(&ctx, profile).await
        }
        Command::ForgotPassword { email } => {
            gate.navigator_mut().push(Route::ForgotPassword)?;
            let issued = ctx.api.forgot_password(&email).await?;
            println!("{}", issued.message);
            if let Some(token) = issued.token {
                println!("token: {token}");
            }
            Ok(())
        }
        Command::ResetPassword { token, new_password } => {
            gate.navigator_mut().push(Route::ForgotPassword)?;
            let message = ctx.api.reset_password(&token, &new_password).await?;
            println!("{message}");
            Ok(())
        }
    }
}

async fn run_register(
    ctx: &AppContext,
    gate: &mut NavigationGate<NavigationHistory>,
    args: RegisterArgs,
) -> Result<(), CliError> {
    gate.navigator_mut().push(Route::Register)?;
    let account = NewAccount {
        name: args.name,
        email: args.email,
        password: args.password,
        role: args.admin.then_some(Role::Admin),
    };
    let signed_up = flows::sign_up(ctx.api.as_ref(), &ctx.session, &account, !args.no_login).await?;
    match signed_up.registered.user_id {
        Some(id) => println!("{} (id {id})", signed_up.registered.message),
        None => println!("{}", signed_up.registered.message),
    }

    if let Some(session) = signed_up.session {
        gate.apply(&session.value);
        println!("Sesión iniciada.");
        warn_if_memory_only(session.durability);
    }
    Ok(())
}

async fn run_profile(ctx: &AppContext, profile: ProfileCommand) -> Result<(), CliError> {
    match profile.command {
        ProfileSubcommand::Show { refresh, json } => {
            let user = if refresh {
                let outcome = flows::refresh_profile(ctx.api.as_ref(), &ctx.session).await?;
                warn_if_memory_only(outcome.durability);
                Some(outcome.value)
            } else {
                ctx.session.snapshot().user().cloned()
            };
            let Some(user) = user else {
                println!("Perfil no disponible; usa --refresh.");
                return Ok(());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&user)?);
            } else {
                print_profile(&user);
            }
            Ok(())
        }
        ProfileSubcommand::Update { name, email, password } => {
            let update = ProfileUpdate { name, email, password };
            let outcome = flows::update_profile(ctx.api.as_ref(), &ctx.session, &update).await?;
            println!("Perfil actualizado.");
            warn_if_memory_only(outcome.durability);
            print_profile(&outcome.value);
            Ok(())
        }
    }
}

fn print_status(ctx: &AppContext, gate: &NavigationGate<NavigationHistory>) {
    let session = ctx.session.snapshot();
    if let Some(state) = gate.state() {
        println!("state: {state:?}");
    }
    println!("screen: {:?}", gate.navigator().current());
    if session.is_authenticated() {
        match session.user() {
            Some(user) => println!("signed in as {}", display_name(Some(user), "?")),
            None => println!("signed in (profile unavailable)"),
        }
    } else {
        println!("signed out");
    }
    println!("session file: {}", ctx.config.session_file.display());
}

fn print_profile(user: &Profile) {
    if let Some(id) = user.id {
        println!("id: {id}");
    }
    if let Some(name) = &user.name {
        println!("nombre: {name}");
    }
    if let Some(email) = &user.email {
        println!("correo: {email}");
    }
    if let Some(role) = user.role {
        println!("rol: {role:?}");
    }
}

fn warn_if_memory_only(durability: Durability) {
    if durability == Durability::MemoryOnly {
        eprintln!("aviso: no se pudo guardar la sesión; el cambio solo dura esta ejecución.");
    }
}

fn display_name<'a>(user: Option<&'a Profile>, fallback: &'a str) -> &'a str {
    user.and_then(|u| u.name.as_deref().or(u.email.as_deref())).unwrap_or(fallback)
}
