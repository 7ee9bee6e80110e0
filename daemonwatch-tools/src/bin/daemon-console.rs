// daemon-console
//
// Live console of one daemon instance: history plus live lines, filters and
// command input.
//
// Build: cargo run --bin daemon-console -- -t <instance-uuid> [options]
// Keys:  F1/F2/F3 toggle player/system/output, PgUp/PgDn scroll,
//        Enter sends the typed command, Esc / Ctrl-C quits.

use chrono::{DateTime, Local};
use clap::Parser;
use crossbeam::channel;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::{cursor, style, terminal, QueueableCommand};
use daemonwatch::data::{Classification, MessageKind, PlayerChat, StreamEvent};
use daemonwatch::net::{BackfillFetcher, CommandSender};
use daemonwatch::stream::{ConsoleSubscription, NoticeKind, SubscriptionNotice};
use daemonwatch::{ConnectionState, ConsoleSession, SessionItem};
use daemonwatch_tools::{clip, DaemonOpts, Tui};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use std::collections::VecDeque;
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::{Duration, SystemTime};

#[derive(Parser, Debug)]
#[command(
    name = "daemon-console",
    version,
    about = "Live console of a daemon-managed instance"
)]
struct Cli {
    #[command(flatten)]
    daemon: DaemonOpts,

    /// UI refresh rate
    #[arg(long, default_value_t = 10)]
    fps: u64,

    /// Recent notices kept below the console
    #[arg(long = "notice-log-size", default_value_t = 3)]
    notice_log_size: usize,
}

struct LoggedNotice {
    timestamp: SystemTime,
    text: String,
    color: Color,
}

struct View {
    input: String,
    scroll: usize,
    notices: VecDeque<LoggedNotice>,
    notice_log_size: usize,
}

impl View {
    fn note(&mut self, text: String, color: Color) {
        self.notices.push_front(LoggedNotice {
            timestamp: SystemTime::now(),
            text,
            color,
        });
        if self.notices.len() > self.notice_log_size {
            self.notices.pop_back();
        }
    }
}

fn format_notice(notice: &SubscriptionNotice) -> (String, Color) {
    match &notice.kind {
        NoticeKind::BackfillFailed(reason) => {
            (format!("HISTORY UNAVAILABLE: {}", reason), Color::Yellow)
        }
        NoticeKind::MalformedMessage(reason) => {
            (format!("MESSAGE DROPPED: {}", reason), Color::DarkYellow)
        }
    }
}

fn line_style(event: &StreamEvent) -> (String, Color) {
    let class = Classification::of(&event.message);
    match class.kind() {
        MessageKind::PlayerMessage => match PlayerChat::parse(&event.message) {
            Some(chat) => (format!("<{}> {}", chat.name, chat.text), Color::Cyan),
            None => (event.message.clone(), Color::Cyan),
        },
        MessageKind::SystemMessage => (event.message.clone(), Color::Yellow),
        MessageKind::Unclassified => (event.message.clone(), Color::White),
    }
}

fn flag(on: bool) -> Color {
    if on {
        Color::Green
    } else {
        Color::DarkGrey
    }
}

fn draw(tui: &mut Tui, session: &ConsoleSession, view: &View, header: &str) -> io::Result<()> {
    let (cols, rows) = terminal::size()?;
    let width = cols as usize;
    let sub = session.subscription();
    let state = sub.state();
    let out = &mut tui.stdout;

    out.queue(cursor::MoveTo(0, 0))?;
    out.queue(terminal::Clear(terminal::ClearType::All))?;

    out.queue(SetAttribute(Attribute::Bold))?;
    out.queue(style::Print(clip(header, width)))?;
    out.queue(SetAttribute(Attribute::Reset))?;
    out.queue(cursor::MoveToNextLine(1))?;

    out.queue(SetForegroundColor(state.color()))?;
    out.queue(style::Print(state.label()))?;
    out.queue(ResetColor)?;
    let filter = sub.filter();
    for (name, on) in [
        ("player", filter.player),
        ("system", filter.system),
        ("output", filter.output),
    ] {
        out.queue(style::Print("  "))?;
        out.queue(SetForegroundColor(flag(on)))?;
        out.queue(style::Print(name))?;
        out.queue(ResetColor)?;
    }
    out.queue(style::Print(format!(
        "  lines={} dropped={}",
        sub.log().len(),
        sub.malformed_count()
    )))?;
    out.queue(cursor::MoveToNextLine(2))?;

    // header(2) + blank + notices + blank + input + footer
    let reserved = 6 + view.notices.len();
    let body = (rows as usize).saturating_sub(reserved);

    if state == ConnectionState::NoPermission {
        out.queue(SetForegroundColor(Color::Red))?;
        out.queue(style::Print("You do not have access to this console."))?;
        out.queue(ResetColor)?;
        out.queue(cursor::MoveToNextLine(1))?;
    } else {
        let visible: Vec<&StreamEvent> = sub.visible().rev().skip(view.scroll).take(body).collect();
        for event in visible.into_iter().rev() {
            let stamp: DateTime<Local> = event.timestamp().into();
            let (text, color) = line_style(event);
            out.queue(SetForegroundColor(Color::DarkGrey))?;
            out.queue(style::Print(format!("[{}] ", stamp.format("%H:%M:%S"))))?;
            out.queue(SetForegroundColor(color))?;
            out.queue(style::Print(clip(&text, width.saturating_sub(11))))?;
            out.queue(ResetColor)?;
            out.queue(cursor::MoveToNextLine(1))?;
        }
    }

    out.queue(cursor::MoveTo(0, (rows as usize).saturating_sub(3 + view.notices.len()) as u16))?;
    for notice in &view.notices {
        let datetime: DateTime<Local> = notice.timestamp.into();
        out.queue(SetForegroundColor(notice.color))?;
        out.queue(style::Print(clip(
            &format!("[{}] {}", datetime.format("%H:%M:%S%.3f"), notice.text),
            width,
        )))?;
        out.queue(ResetColor)?;
        out.queue(cursor::MoveToNextLine(1))?;
    }

    out.queue(cursor::MoveToNextLine(1))?;
    out.queue(style::Print(clip(&format!("> {}", view.input), width)))?;
    out.queue(cursor::MoveToNextLine(1))?;
    out.queue(SetForegroundColor(Color::DarkGrey))?;
    out.queue(style::Print(clip(
        "F1 player  F2 system  F3 output  PgUp/PgDn scroll  Enter send  Esc quit",
        width,
    )))?;
    out.queue(ResetColor)?;

    out.flush()
}

enum KeyAction {
    Quit,
    Send(String),
    Continue,
}

fn handle_key(key: KeyEvent, session: &mut ConsoleSession, view: &mut View) -> KeyAction {
    if key.kind == KeyEventKind::Release {
        return KeyAction::Continue;
    }
    match key.code {
        KeyCode::Esc => return KeyAction::Quit,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            return KeyAction::Quit
        }
        KeyCode::F(1) => session.subscription_mut().filter_mut().toggle(MessageKind::PlayerMessage),
        KeyCode::F(2) => session.subscription_mut().filter_mut().toggle(MessageKind::SystemMessage),
        KeyCode::F(3) => session.subscription_mut().filter_mut().toggle(MessageKind::Unclassified),
        KeyCode::PageUp => view.scroll += 10,
        KeyCode::PageDown => view.scroll = view.scroll.saturating_sub(10),
        KeyCode::End => view.scroll = 0,
        KeyCode::Backspace => {
            view.input.pop();
        }
        KeyCode::Enter => {
            let command = std::mem::take(&mut view.input);
            if !command.trim().is_empty() {
                return KeyAction::Send(command);
            }
        }
        KeyCode::Char(c) => view.input.push(c),
        _ => {}
    }
    KeyAction::Continue
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = cli.daemon.load_config().map_err(|e| e.to_string())?;
    let target = cli.daemon.target;
    let client = reqwest::Client::new();

    let endpoint = config.endpoint();
    let stream_url = endpoint.console_stream(target).map_err(|e| e.to_string())?;
    let (notice_tx, notice_rx) = channel::unbounded();
    let subscription = ConsoleSubscription::new(target, cli.daemon.has_permission())
        .with_history_limit(config.console.history_limit)
        .with_filter(config.console.filter)
        .with_notices(notice_tx);
    let mut session = ConsoleSession::spawn(
        subscription,
        BackfillFetcher::new(client.clone(), endpoint.clone()),
        stream_url,
        config.connect_timeout(),
    );
    let commands = CommandSender::new(client, endpoint);
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<(String, Result<(), String>)>();

    let header = format!(
        "daemon-console  {}  {}:{}  fps={}",
        target, config.host, config.port, cli.fps
    );
    let mut view = View {
        input: String::new(),
        scroll: 0,
        notices: VecDeque::new(),
        notice_log_size: cli.notice_log_size,
    };

    let mut tui = Tui::setup().map_err(|e| e.to_string())?;
    Tui::install_panic_hook();

    let mut reader = EventStream::new();
    let mut tick = tokio::time::interval(Duration::from_millis(1000 / cli.fps.max(1)));
    let mut stream_open = true;

    let result = loop {
        tokio::select! {
            item = session.next_item(), if stream_open => match item {
                Some(SessionItem::State(state)) => {
                    info!("{}: {}", target, state);
                    view.note(state.label().to_string(), state.color());
                }
                Some(_) => {}
                None => stream_open = false,
            },

            ev = reader.next() => match ev {
                Some(Ok(Event::Key(key))) => match handle_key(key, &mut session, &mut view) {
                    KeyAction::Quit => break Ok(()),
                    KeyAction::Send(command) => {
                        if session.subscription().state() == ConnectionState::NoPermission {
                            view.note("not permitted to send commands".into(), Color::Red);
                        } else {
                            let commands = commands.clone();
                            let reply_tx = reply_tx.clone();
                            tokio::spawn(async move {
                                let res = commands.send(target, &command).await.map_err(|e| e.to_string());
                                let _ = reply_tx.send((command, res));
                            });
                        }
                    }
                    KeyAction::Continue => {}
                },
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.to_string()),
                None => break Ok(()),
            },

            Some((command, res)) = reply_rx.recv() => {
                match res {
                    Ok(()) => view.note(format!("sent: {}", command), Color::Green),
                    Err(e) => {
                        warn!("command '{}' failed: {}", command, e);
                        view.note(format!("COMMAND FAILED: {}", e), Color::Red);
                    }
                }
            }

            _ = tick.tick() => {
                while let Ok(notice) = notice_rx.try_recv() {
                    let (text, color) = format_notice(&notice);
                    view.note(text, color);
                }
                if let Err(e) = draw(&mut tui, &session, &view, &header) {
                    break Err(e.to_string());
                }
            }
        }
    };

    session.close().await;
    tui.teardown();
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = cli.daemon.init_logging() {
        eprintln!("Failed to open log file: {}", e);
        return ExitCode::FAILURE;
    }
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("daemon-console: {}", e);
            ExitCode::FAILURE
        }
    }
}
