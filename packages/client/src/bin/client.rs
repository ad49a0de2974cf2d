//! Madang chat client.
//!
//! Opens rooms, shows their history and live messages, and prints
//! notifications from other rooms while you chat.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin madang-client -- --user-id 1 --login-id alice --name Alice --token <jwt>
//! MADANG_TOKEN=<jwt> cargo run --bin madang-client -- -u 2 -l bob -n Bob --room 5
//! ```

use std::time::Duration;

use clap::Parser;

use madang_client::{
    client::{
        ClientConfig,
        config::{DEFAULT_API_URL, DEFAULT_WS_URL},
        store::DuplicatePolicy,
    },
    domain::{Identity, LoginId, RoomId, UserId},
    ui::run_client,
};
use madang_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "madang-client")]
#[command(about = "Real-time chat client with room history, live rooms and notifications", long_about = None)]
struct Args {
    /// Numeric user id
    #[arg(short = 'u', long, env = "MADANG_USER_ID")]
    user_id: i64,

    /// Login id (unique user handle)
    #[arg(short = 'l', long, env = "MADANG_LOGIN_ID")]
    login_id: String,

    /// Display name
    #[arg(short = 'n', long, env = "MADANG_NAME")]
    name: String,

    /// Avatar reference shown to others
    #[arg(long, env = "MADANG_AVATAR")]
    avatar: Option<String>,

    /// Bearer token for the REST API and the broker
    #[arg(short = 't', long, env = "MADANG_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// REST API base URL
    #[arg(long, env = "MADANG_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// WebSocket broker URL
    #[arg(long, env = "MADANG_WS_URL", default_value = DEFAULT_WS_URL)]
    ws_url: String,

    /// Room to open at start
    #[arg(short = 'r', long)]
    room: Option<RoomId>,

    /// Drop live messages whose id is already in the room log
    #[arg(long)]
    dedup_by_id: bool,

    /// Seconds to wait for the broker handshake
    #[arg(long, default_value_t = 10)]
    handshake_timeout: u64,

    /// Seconds before a REST request is abandoned
    #[arg(long, default_value_t = 30)]
    request_timeout: u64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let login_id = match LoginId::new(args.login_id) {
        Ok(login_id) => login_id,
        Err(e) => {
            tracing::error!("Invalid --login-id: {}", e);
            std::process::exit(2);
        }
    };
    let mut identity = Identity::new(UserId::new(args.user_id), login_id, args.name);
    if let Some(avatar) = args.avatar {
        identity = identity.with_avatar(avatar);
    }

    let config = ClientConfig {
        api_url: args.api_url,
        ws_url: args.ws_url,
        handshake_timeout: Duration::from_secs(args.handshake_timeout),
        request_timeout: Duration::from_secs(args.request_timeout),
        duplicate_policy: if args.dedup_by_id {
            DuplicatePolicy::DropKnownIds
        } else {
            DuplicatePolicy::Preserve
        },
        initial_room: args.room,
    };

    if let Err(e) = run_client(config, identity, args.token).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
