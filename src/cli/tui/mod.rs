//! Interactive flashing screen.
//!
//! One tokio channel carries every [`AppEvent`]: key presses from a blocking
//! reader task, snapshots from device discovery and results of mount and copy
//! tasks. The loop below is the only place the coordinator is touched.

mod input;
mod ui;

use std::io::{self, stdout};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossterm::{
    event, execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::context::AppContext;
use crate::core::{AppEvent, Coordinator, DeviceDiscovery, ExitReason, FlashPlan, TaskRunner};

const EVENT_QUEUE_DEPTH: usize = 64;
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run the flashing screen until the operator quits or discovery fails.
pub async fn run(ctx: AppContext, plan: FlashPlan) -> Result<ExitReason> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("Failed to create terminal")?;

    let result = run_app(&mut terminal, ctx, plan).await;

    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ctx: AppContext,
    plan: FlashPlan,
) -> Result<ExitReason> {
    let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let cancel = CancellationToken::new();

    let discovery = DeviceDiscovery::new().spawn(
        ctx.provider.clone(),
        ctx.config.poll_interval(),
        tx.clone(),
        cancel.clone(),
    );
    let keys = spawn_input_reader(tx.clone(), cancel.clone());
    let runner = TaskRunner::new(ctx.provider.clone(), tx);

    let mut coordinator = Coordinator::new(plan);
    info!(dry_run = coordinator.dry_run(), "Flashing session started");

    let outcome = loop {
        terminal.draw(|frame| ui::render(frame, &coordinator))?;

        let Some(event) = rx.recv().await else {
            break Err(anyhow!("Event queue closed unexpectedly"));
        };

        for effect in coordinator.handle(event) {
            runner.spawn(effect);
        }

        if let Some(reason) = coordinator.exit() {
            break Ok(reason.clone());
        }
    };

    // In-flight mounts and copies keep running; their events are dropped.
    cancel.cancel();
    drop(rx);
    let _ = discovery.await;
    let _ = keys.await;

    outcome
}

/// Read terminal events on the blocking pool and forward decoded actions.
fn spawn_input_reader(events: mpsc::Sender<AppEvent>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = read_keys(&events, &cancel) {
            error!(error = %e, "Reading terminal input failed");
            let _ = events.blocking_send(AppEvent::InputFailed(e.to_string()));
        }
    })
}

fn read_keys(events: &mpsc::Sender<AppEvent>, cancel: &CancellationToken) -> io::Result<()> {
    while !cancel.is_cancelled() {
        if !event::poll(INPUT_POLL_INTERVAL)? {
            continue;
        }

        if let Some(action) = input::handle_event(event::read()?) {
            debug!(?action, "Key pressed");
            if events.blocking_send(AppEvent::Key(action)).is_err() {
                break;
            }
        }
    }
    Ok(())
}
