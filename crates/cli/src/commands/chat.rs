use std::ops::ControlFlow;

use anyhow::{Context as _, Result};
use clap::{ArgGroup, Args};
use nomad_common::types::{Feed, RoomId};
use nomad_sync::connection::SendError;
use nomad_sync::RoomSession;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use super::{Context, EndpointArgs, SessionArgs, StatusReporter};
use crate::output::{self, EntryPrinter};

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("room").required(true).args(["city", "meetup"])))]
pub struct ChatArgs {
    /// City whose community chat to join
    #[arg(long, value_name = "CITY_ID")]
    pub city: Option<String>,
    /// Meetup whose event chat to join
    #[arg(long, value_name = "MEETUP_ID")]
    pub meetup: Option<String>,
    #[command(flatten)]
    pub session: SessionArgs,
    #[command(flatten)]
    pub endpoints: EndpointArgs,
}

impl ChatArgs {
    fn room(&self) -> Result<(Feed, RoomId)> {
        match (&self.city, &self.meetup) {
            (Some(city), _) => Ok((Feed::CityChat, RoomId::new(city.as_str()))),
            (None, Some(meetup)) => Ok((Feed::MeetupChat, RoomId::new(meetup.as_str()))),
            (None, None) => anyhow::bail!("pass --city or --meetup"),
        }
    }
}

/// One line typed by the user.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Message(String),
    SwitchRoom(RoomId),
    MissingRoom,
    Quit,
    Nothing,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Nothing;
    }
    if line == "/quit" {
        return Input::Quit;
    }
    if line == "/room" {
        return Input::MissingRoom;
    }
    if let Some(room) = line.strip_prefix("/room ") {
        return Input::SwitchRoom(RoomId::new(room.trim()));
    }
    Input::Message(line.to_string())
}

pub async fn run(args: ChatArgs, context: &Context) -> Result<()> {
    let (feed, room_id) = args.room()?;
    let mut config = context.load_config()?;
    args.endpoints.apply(&mut config, feed);

    let session = RoomSession::mount(&config, feed, room_id, args.session.profile())
        .context("failed to open chat room")?;
    let result = chat_loop(&session, context).await;
    session.unmount().await;
    result
}

async fn chat_loop(session: &RoomSession, context: &Context) -> Result<()> {
    let mut view = session.subscribe_view();
    let mut printer = EntryPrinter::new(context.format);
    let mut status = StatusReporter::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = view.borrow_and_update().clone();
                status.report(context.format, &state);
                printer.enter_room(state.room_id.as_ref());
                printer.print_new(&state.entries).context("failed to write entries")?;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    return Ok(());
                };
                if handle_input(session, context, &line).await.is_break() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn handle_input(session: &RoomSession, context: &Context, line: &str) -> ControlFlow<()> {
    match parse_input(line) {
        Input::Quit => return ControlFlow::Break(()),
        Input::Nothing => {}
        Input::MissingRoom => {
            output::print_warning(context.format, "USAGE", "usage: /room <ROOM_ID>")
        }
        Input::SwitchRoom(room_id) => {
            info!(%room_id, "switching room");
            session.change_room(room_id);
        }
        Input::Message(text) => match session.send(text).await {
            Ok(()) | Err(SendError::EmptyMessage) => {}
            Err(SendError::NotOpen(state)) => output::print_warning(
                context.format,
                "NOT_CONNECTED",
                &format!("message not sent: connection is {state}"),
            ),
            Err(error) => {
                output::print_warning(context.format, "SEND_FAILED", &error.to_string())
            }
        },
    }
    ControlFlow::Continue(())
}
