//! sharex-user-adder - Provision an upload account
//!
//! Creates a user with an Argon2id-hashed password and issues its first
//! authorization token. The server holds a lock on the database file, so run
//! this while the server is stopped.
//!
//! Usage:
//!   sharex-user-adder --username alice --password hunter2 --data-dir ./data

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sharex_server::storage::Database;
use sharex_server::users::{UserManager, DEFAULT_AUTHORIZATION_TOKEN_LENGTH};

#[derive(Parser, Debug)]
#[command(name = "sharex-user-adder")]
#[command(about = "Create a sharex-server user and print its authorization token")]
#[command(version)]
struct Args {
    /// Name of the new user
    #[arg(long)]
    username: String,

    /// Password of the new user
    #[arg(long, env = "SHAREX_PASSWORD", hide_env_values = true)]
    password: String,

    /// Directory holding the server database
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: String,

    /// Number of random bytes in the authorization token
    #[arg(long, env = "AUTHORIZATION_TOKEN_LENGTH", default_value_t = DEFAULT_AUTHORIZATION_TOKEN_LENGTH)]
    auth_token_length: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if args.auth_token_length == 0 {
        anyhow::bail!("--auth-token-length must be greater than 0");
    }

    let db = Database::open(&args.data_dir)?;
    let users = UserManager::new(db);
    users.initialize()?;

    let user = users.create_user(&args.username, &args.password)?;
    let token = users.regenerate_authorization_token(&user.uuid, args.auth_token_length)?;

    let token = token.to_string();
    let uuid = user.uuid.to_string();
    let rows = [
        ("Username", user.username.as_str()),
        ("UUID", uuid.as_str()),
        ("Authorization token", token.as_str()),
    ];
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in rows {
        println!("{label:<width$}  {value}");
    }

    Ok(())
}
