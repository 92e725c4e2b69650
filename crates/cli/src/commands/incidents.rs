use anyhow::{Context as _, Result};
use clap::Args;
use nomad_common::types::{Feed, IncidentTally, IncidentType, RoomId};
use nomad_sync::{RoomSession, ViewState};

use super::{Context, EndpointArgs, SessionArgs, StatusReporter};
use crate::output::{self, incident_label, EntryPrinter};

/// Logical room name the incident feed joins.
const INCIDENT_ROOM: &str = "incidents";

#[derive(Debug, Args)]
pub struct IncidentsArgs {
    /// Print today's per-type counts once history has loaded, then exit
    #[arg(long)]
    pub summary: bool,
    #[command(flatten)]
    pub session: SessionArgs,
    #[command(flatten)]
    pub endpoints: EndpointArgs,
}

pub async fn run(args: IncidentsArgs, context: &Context) -> Result<()> {
    let mut config = context.load_config()?;
    args.endpoints.apply(&mut config, Feed::Incidents);

    let session = RoomSession::mount(
        &config,
        Feed::Incidents,
        RoomId::new(INCIDENT_ROOM),
        args.session.profile(),
    )
    .context("failed to open incident feed")?;

    let result = if args.summary {
        summarize(&session, context).await
    } else {
        follow(&session, context).await
    };
    session.unmount().await;
    result
}

async fn follow(session: &RoomSession, context: &Context) -> Result<()> {
    let mut view = session.subscribe_view();
    let mut printer = EntryPrinter::new(context.format);
    let mut status = StatusReporter::default();

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = view.borrow_and_update().clone();
                status.report(context.format, &state);
                printer.enter_room(state.room_id.as_ref());
                printer.print_new(&state.entries).context("failed to write incidents")?;
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn summarize(session: &RoomSession, context: &Context) -> Result<()> {
    let mut view = session.subscribe_view();
    let state = view
        .wait_for(|state| !state.history_loading)
        .await
        .context("incident feed stopped before history loaded")?
        .clone();

    let tally = tally_today(&state);
    output::print_output(context.format, &tally, render_tally)
        .context("failed to write summary")?;
    Ok(())
}

fn tally_today(state: &ViewState) -> IncidentTally {
    IncidentTally::today(state.entries.iter().filter_map(|entry| entry.as_incident()))
}

fn render_tally(tally: &IncidentTally) -> String {
    let rows = [
        (IncidentType::PowerCut, tally.power_cut),
        (IncidentType::TrafficJam, tally.traffic_jam),
        (IncidentType::SafetyIssue, tally.safety_issue),
        (IncidentType::Other, tally.other),
    ];
    let mut lines: Vec<String> = rows
        .iter()
        .map(|(incident_type, count)| format!("{:<13} {count}", incident_label(*incident_type)))
        .collect();
    lines.push(format!("{:<13} {}", "TOTAL", tally.total()));
    lines.join("\n")
}
