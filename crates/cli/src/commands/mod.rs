// CLI subcommand dispatch.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use nomad_common::identity::SessionProfile;
use nomad_common::types::Feed;
use nomad_sync::connection::ConnectionState;
use nomad_sync::{SyncConfig, ViewState};

use crate::output::{self, OutputFormat};

pub mod chat;
pub mod config;
pub mod incidents;

#[derive(Subcommand)]
pub enum Command {
    /// Join a city or meetup chat room
    Chat(chat::ChatArgs),
    /// Follow the live incident feed
    Incidents(incidents::IncidentsArgs),
    /// Show or initialize the client configuration
    Config(config::ConfigArgs),
}

/// Options shared by every subcommand.
pub struct Context {
    pub format: OutputFormat,
    pub config_path: Option<PathBuf>,
}

impl Context {
    /// Explicit `--config` must load; the default location falls back to defaults.
    pub fn load_config(&self) -> Result<SyncConfig> {
        match &self.config_path {
            Some(path) => SyncConfig::load_from(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => Ok(SyncConfig::load()),
        }
    }
}

pub async fn run(cmd: Command, context: &Context) -> Result<()> {
    match cmd {
        Command::Chat(args) => chat::run(args, context).await,
        Command::Incidents(args) => incidents::run(args, context).await,
        Command::Config(args) => config::run(args, context),
    }
}

/// Session fields normally supplied by the sign-in flow.
#[derive(Debug, Default, Args)]
pub struct SessionArgs {
    /// Given name of the signed-in user
    #[arg(long)]
    pub given_name: Option<String>,
    /// Family name of the signed-in user
    #[arg(long)]
    pub family_name: Option<String>,
    /// Email of the signed-in user
    #[arg(long)]
    pub email: Option<String>,
    /// Authenticated subject id
    #[arg(long)]
    pub sub: Option<String>,
    /// Bearer token for history requests
    #[arg(long)]
    pub token: Option<String>,
}

impl SessionArgs {
    /// `None` when nothing was passed, i.e. an anonymous guest.
    pub fn profile(self) -> Option<SessionProfile> {
        let profile = SessionProfile {
            sub: self.sub,
            given_name: self.given_name,
            family_name: self.family_name,
            email: self.email,
            access_token: self.token,
        };
        (profile != SessionProfile::default()).then_some(profile)
    }
}

/// Overrides applied on top of the loaded config.
#[derive(Debug, Default, Args)]
pub struct EndpointArgs {
    /// Override the REST base URL for history
    #[arg(long, value_name = "URL")]
    pub api_base_url: Option<String>,
    /// Override the live channel endpoint
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,
}

impl EndpointArgs {
    pub fn apply(self, config: &mut SyncConfig, feed: Feed) {
        if let Some(url) = self.api_base_url {
            config.api_base_url = url;
        }
        if let Some(url) = self.endpoint {
            let slot = match feed {
                Feed::CityChat => &mut config.endpoints.city_chat,
                Feed::MeetupChat => &mut config.endpoints.meetup_chat,
                Feed::Incidents => &mut config.endpoints.incidents,
            };
            *slot = url;
        }
    }
}

/// Reports connection and history transitions on stderr.
#[derive(Debug, Default)]
pub struct StatusReporter {
    connection: Option<ConnectionState>,
    connection_error: Option<String>,
    history_loading: bool,
}

impl StatusReporter {
    pub fn report(&mut self, format: OutputFormat, view: &ViewState) {
        if self.connection != Some(view.connection) {
            self.connection = Some(view.connection);
            let room = view.room_id.as_ref().map(|room| room.as_str()).unwrap_or("-");
            let message = match view.connection {
                ConnectionState::Idle => None,
                ConnectionState::Connecting => Some(format!("connecting to {room}...")),
                ConnectionState::Open => Some(format!("connected to {room}")),
                ConnectionState::Closing | ConnectionState::Closed => {
                    Some("disconnected, retrying".to_string())
                }
            };
            if let Some(message) = message {
                output::print_status(format, view.connection.to_string().as_str(), &message);
            }
        }

        if self.connection_error != view.connection_error {
            self.connection_error = view.connection_error.clone();
            if let Some(error) = &view.connection_error {
                output::print_warning(format, "CONNECTION_ERROR", error);
            }
        }

        if self.history_loading && !view.history_loading {
            let count = view.entries.len();
            output::print_status(format, "history", &format!("{count} entries loaded"));
        }
        self.history_loading = view.history_loading;
    }
}
