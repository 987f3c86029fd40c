mod auth;
mod binding;
mod config;
mod credentials;
mod dashboard;
mod error;
mod gate;
mod gateway;
mod logging;
mod reconcile;
mod session;
mod task;
mod tui;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::mpsc;

use config::{ConfigFile, ResolvedConfig};
use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use dashboard::{Dashboard, NoticeLevel, SyncEvent};
use gateway::HttpGateway;
use session::SessionResolver;

#[derive(Parser, Debug)]
#[command(
    name = "todosync",
    about = "Personal task list synced with a todo server",
    version,
    long_about = None,
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Profile to use from config file
    #[arg(short, long, global = true, env = "TODOSYNC_PROFILE")]
    profile: Option<String>,

    /// Override the server base URL
    #[arg(long, global = true, env = "TODOSYNC_ENDPOINT")]
    endpoint: Option<String>,

    /// Keep the auth token in memory only (nothing is written to disk)
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Write a default config file to ~/.config/todosync/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and exit
    #[arg(long)]
    profiles: bool,

    /// Generate shell completions and print to stdout
    #[arg(long, value_name = "SHELL")]
    completions: Option<clap_complete::Shell>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in with an email or username
    Login {
        identifier: String,
        /// Read from stdin when omitted
        #[arg(long, env = "TODOSYNC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account and log in
    Register {
        username: String,
        email: String,
        /// Read (twice) from stdin when omitted
        #[arg(long, env = "TODOSYNC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored token
    Logout,
    /// Show who the stored token belongs to
    Whoami,
    /// Print the task list
    List,
    /// Add a task
    Add {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Flip a task between open and done
    Toggle { id: String },
    /// Change a task's title or description
    Edit {
        id: String,
        #[arg(short, long)]
        title: Option<String>,
        /// An empty string clears the description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a task
    Delete { id: String },
}

// ── Wiring ────────────────────────────────────────────────────────────────────

/// Everything a front end needs to talk to the server.
pub struct Services {
    pub store: Arc<dyn CredentialStore>,
    pub gateway: Arc<HttpGateway>,
    pub resolver: Arc<SessionResolver<HttpGateway>>,
}

impl Services {
    fn connect(resolved: &ResolvedConfig, ephemeral: bool) -> Result<Self> {
        let store: Arc<dyn CredentialStore> = if ephemeral {
            Arc::new(MemoryCredentialStore::default())
        } else {
            Arc::new(FileCredentialStore::new(resolved.credentials_path.clone()))
        };
        let gateway = Arc::new(
            HttpGateway::new(resolved.endpoint.clone(), resolved.request_timeout)
                .context("Failed to build HTTP client")?,
        );
        let resolver = Arc::new(SessionResolver::new(store.clone(), gateway.clone()));
        Ok(Self {
            store,
            gateway,
            resolver,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: todosync login <email>");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell) = args.completions {
        let mut cmd = Args::command();
        clap_complete::generate(shell, &mut cmd, "todosync", &mut io::stdout());
        return Ok(());
    }

    let file = ConfigFile::load()?;

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let resolved = ResolvedConfig::resolve(
        &file,
        args.profile.as_deref(),
        args.endpoint.as_deref(),
    );

    let log_path = logging::init(&config::data_dir());
    tracing::info!(
        profile = %resolved.profile_name,
        endpoint = %resolved.endpoint,
        ephemeral = args.ephemeral,
        "starting"
    );

    let services = Services::connect(&resolved, args.ephemeral)?;

    match args.command {
        None => tui::run(resolved, services, log_path).await,
        Some(command) => run_command(command, &resolved, services).await,
    }
}

// ── One-shot commands (plain stdout, no TUI) ──────────────────────────────────

async fn run_command(command: Command, resolved: &ResolvedConfig, services: Services) -> Result<()> {
    match command {
        Command::Login { identifier, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt_line("password: ")?,
            };
            let signed_in =
                auth::login(&*services.gateway, services.store.as_ref(), &identifier, &password)
                    .await?;
            services.resolver.establish(signed_in.auth);
            println!(
                "  ✓ logged in as {} ({})",
                display_name(&signed_in.identity),
                signed_in.identity.id
            );
            Ok(())
        }
        Command::Register { username, email, password } => {
            let (password, confirm) = match password {
                Some(p) => (p.clone(), p),
                None => (prompt_line("password: ")?, prompt_line("confirm password: ")?),
            };
            let signed_in = auth::register(
                &*services.gateway,
                services.store.as_ref(),
                &username,
                &email,
                &password,
                &confirm,
            )
            .await?;
            services.resolver.establish(signed_in.auth);
            println!("  ✓ registered and logged in as {}", display_name(&signed_in.identity));
            Ok(())
        }
        Command::Logout => {
            services.resolver.logout().context("Failed to clear stored credential")?;
            println!("  ✓ logged out");
            Ok(())
        }
        Command::Whoami => {
            let session = services.resolver.resolve().await;
            println!("  {}  ·  {}", session.label(), resolved.endpoint);
            Ok(())
        }
        Command::List => {
            let (dash, _rx) = open_dashboard(resolved, &services).await?;
            print_tasks(&dash);
            Ok(())
        }
        Command::Add { title, description } => {
            mutate(resolved, &services, |dash| {
                dash.add_task(&title, description.as_deref())
            })
            .await
        }
        Command::Toggle { id } => mutate(resolved, &services, |dash| dash.toggle_task(&id)).await,
        Command::Edit { id, title, description } => {
            if title.is_none() && description.is_none() {
                bail!("nothing to change: pass --title and/or --description");
            }
            mutate(resolved, &services, |dash| {
                dash.edit_task(&id, title.as_deref(), description.as_deref())
            })
            .await
        }
        Command::Delete { id } => mutate(resolved, &services, |dash| dash.delete_task(&id)).await,
    }
}

type Events = mpsc::UnboundedReceiver<SyncEvent>;

/// Resolve the session and wait for the first task list.
async fn open_dashboard(
    resolved: &ResolvedConfig,
    services: &Services,
) -> Result<(Dashboard<HttpGateway>, Events)> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut dash = Dashboard::new(services.gateway.clone(), resolved.policies, tx);

    let session = services.resolver.resolve().await;
    dash.on_session(session);
    if dash.take_login_redirect() {
        bail!("not logged in (run `todosync login <email>`)");
    }

    while dash.is_loading() {
        let ev = rx.recv().await.context("sync channel closed while loading")?;
        dash.apply_event(ev);
    }
    if let Some(notice) = dash.last_notice().filter(|n| n.level == NoticeLevel::Error) {
        bail!("{}", notice.text);
    }
    Ok((dash, rx))
}

/// Run one mutation: show the optimistic list, then the settled one.
async fn mutate<F>(resolved: &ResolvedConfig, services: &Services, propose: F) -> Result<()>
where
    F: FnOnce(&mut Dashboard<HttpGateway>) -> std::result::Result<reconcile::MutationId, error::SyncError>,
{
    let (mut dash, mut rx) = open_dashboard(resolved, services).await?;
    let mut seen = dash.notices().len();

    propose(&mut dash)?;
    println!("  … sending");
    print_tasks(&dash);

    while dash.pending_mutations() > 0 {
        let ev = rx.recv().await.context("sync channel closed before settlement")?;
        dash.apply_event(ev);
    }
    println!();
    if print_new_notices(&dash, &mut seen) {
        println!("  (server state may differ; run `todosync list` to check)");
    } else {
        println!("  ✓ saved");
    }
    print_tasks(&dash);
    Ok(())
}

// ── Plain output ──────────────────────────────────────────────────────────────

fn print_tasks(dash: &Dashboard<HttpGateway>) {
    let tasks = dash.visible();
    println!();
    if tasks.is_empty() {
        println!("  No tasks yet.");
    }
    for t in &tasks {
        let check = if t.completed { "[x]" } else { "[ ]" };
        let id = if t.is_placeholder() { "pending".to_string() } else { t.id.clone() };
        match &t.description {
            Some(d) => println!("  {check} {}  ·  {d}  ({id})", t.title),
            None => println!("  {check} {}  ({id})", t.title),
        }
    }
    println!();
}

/// Print notices past `seen`. Returns true if any of them was an error.
fn print_new_notices(dash: &Dashboard<HttpGateway>, seen: &mut usize) -> bool {
    let mut had_error = false;
    for n in dash.notices().iter().skip(*seen) {
        let glyph = match n.level {
            NoticeLevel::Info => "·",
            NoticeLevel::Error => {
                had_error = true;
                "✗"
            }
        };
        println!("  {glyph} {}", n.text);
    }
    *seen = dash.notices().len();
    had_error
}

fn display_name(identity: &session::Identity) -> &str {
    if identity.user_name.is_empty() {
        &identity.email
    } else {
        &identity.user_name
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

// ── Profiles listing (non-TUI) ────────────────────────────────────────────────

fn print_profiles(file: &ConfigFile) {
    let mut entries: Vec<_> = file.profiles.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    println!();
    println!("  Profiles");
    if entries.is_empty() {
        println!("  (none; built-in defaults apply; run `todosync --init`)");
    }
    for (name, p) in &entries {
        let marker = if **name == file.default_profile { " ←" } else { "" };
        println!("  {name}{marker}");
        println!("    endpoint  {}", p.endpoint);
        println!("    timeout   {}s", p.request_timeout_secs);
        println!(
            "    failures  update={:?} delete={:?}",
            p.on_update_failure, p.on_delete_failure
        );
        println!();
    }
}
