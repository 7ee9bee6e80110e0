// daemon-perf
//
// Live cpu, memory and disk usage of one daemon instance over a rolling
// sample window.
//
// Build: cargo run --bin daemon-perf -- -t <instance-uuid> [options]
// Quit:  q / Esc / Ctrl-C

use chrono::{DateTime, Local, Utc};
use clap::Parser;
use crossbeam::channel;
use crossterm::event::{Event, EventStream, KeyCode, KeyModifiers};
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::{cursor, style, terminal, QueueableCommand};
use daemonwatch::data::Metric;
use daemonwatch::stream::{NoticeKind, PerformanceSubscription, TelemetrySampler};
use daemonwatch::{ConnectionState, PerformanceSession, SessionItem};
use daemonwatch_tools::{clip, format_bytes, format_uptime, DaemonOpts, Tui};
use futures::StreamExt;
use tracing::info;

use std::collections::VecDeque;
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::{Duration, Instant, SystemTime};

const EVENT_LOG_SIZE: usize = 5;
const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Parser, Debug)]
#[command(
    name = "daemon-perf",
    version,
    about = "Live resource usage of a daemon-managed instance"
)]
struct Cli {
    #[command(flatten)]
    daemon: DaemonOpts,

    /// UI refresh rate
    #[arg(long, default_value_t = 4)]
    fps: u64,

    /// Grey the readings after this many ms without a sample (overrides the config file)
    #[arg(long = "stale-ms")]
    stale_ms: Option<u64>,

    /// Suppress footer hint
    #[arg(long)]
    quiet: bool,
}

struct LoggedEvent {
    timestamp: SystemTime,
    text: String,
    color: Color,
}

fn log_event(events: &mut VecDeque<LoggedEvent>, text: String, color: Color) {
    events.push_front(LoggedEvent {
        timestamp: SystemTime::now(),
        text,
        color,
    });
    events.truncate(EVENT_LOG_SIZE);
}

fn format_value(metric: Metric, value: Option<f64>) -> String {
    match (metric, value) {
        (_, None) => "-".to_string(),
        (Metric::Cpu, Some(v)) => format!("{:.1} %", v),
        (Metric::Memory | Metric::Disk, Some(v)) => format_bytes(v),
    }
}

/// One bar per window slot, scaled against `scale`; gaps stay blank.
fn sparkline(series: &[Option<f64>], scale: f64, width: usize) -> String {
    let skip = series.len().saturating_sub(width);
    series[skip..]
        .iter()
        .map(|v| match v {
            None => ' ',
            Some(v) => {
                let frac = (v / scale).clamp(0.0, 1.0);
                BARS[((frac * (BARS.len() - 1) as f64).round()) as usize]
            }
        })
        .collect()
}

fn draw(
    tui: &mut Tui,
    header: &str,
    state: ConnectionState,
    sampler: &TelemetrySampler,
    stale_after: Duration,
    events: &VecDeque<LoggedEvent>,
    quiet: bool,
) -> io::Result<()> {
    let (cols, _) = terminal::size()?;
    let width = cols as usize;
    let now = Instant::now();
    let stale = sampler.is_stale(now, stale_after);
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
    let latency = match sampler.latency(now) {
        Some(l) => format!("{:.1}s ago", l.as_secs_f64()),
        None => "never".to_string(),
    };
    let uptime = sampler
        .latest()
        .and_then(|s| s.uptime(Utc::now()))
        .map(format_uptime)
        .unwrap_or_else(|| "-".to_string());
    out.queue(style::Print(format!(
        "  samples={}  last={}  uptime={}",
        sampler.received(),
        latency,
        uptime
    )))?;
    if stale && state.is_live() {
        out.queue(SetForegroundColor(Color::DarkGrey))?;
        out.queue(style::Print("  STALLED"))?;
        out.queue(ResetColor)?;
    }
    out.queue(cursor::MoveToNextLine(2))?;

    out.queue(SetAttribute(Attribute::Bold))?;
    out.queue(style::Print(format!(
        "{:<8} {:>12}  {:>12}  {:>12}  {}",
        "metric", "current", "peak", "scale", "history"
    )))?;
    out.queue(SetAttribute(Attribute::Reset))?;
    out.queue(cursor::MoveToNextLine(1))?;

    let chart_width = width.saturating_sub(8 + 1 + 12 + 2 + 12 + 2 + 12 + 2);
    for metric in Metric::ALL {
        let color = if stale { Color::DarkGrey } else { Color::White };
        let scale = sampler.scale_max(metric);
        out.queue(SetForegroundColor(color))?;
        out.queue(style::Print(format!(
            "{:<8} {:>12}  {:>12}  {:>12}  ",
            metric.name(),
            format_value(metric, sampler.current(metric)),
            format_value(metric, sampler.peak(metric)),
            format_value(metric, Some(scale)),
        )))?;
        if !stale {
            out.queue(SetForegroundColor(Color::Green))?;
        }
        out.queue(style::Print(sparkline(
            &sampler.series(metric),
            scale,
            chart_width,
        )))?;
        out.queue(ResetColor)?;
        out.queue(cursor::MoveToNextLine(1))?;
    }

    if !events.is_empty() {
        out.queue(cursor::MoveToNextLine(1))?;
        out.queue(SetAttribute(Attribute::Bold))?;
        out.queue(style::Print("Recent Events:"))?;
        out.queue(SetAttribute(Attribute::Reset))?;
        out.queue(cursor::MoveToNextLine(1))?;
        for logged in events {
            let datetime: DateTime<Local> = logged.timestamp.into();
            out.queue(SetForegroundColor(logged.color))?;
            out.queue(style::Print(clip(
                &format!("[{}] {}", datetime.format("%H:%M:%S%.3f"), logged.text),
                width,
            )))?;
            out.queue(ResetColor)?;
            out.queue(cursor::MoveToNextLine(1))?;
        }
    }

    if !quiet {
        out.queue(cursor::MoveToNextLine(1))?;
        out.queue(style::Print("q/Esc to quit"))?;
    }

    out.flush()
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = cli.daemon.load_config().map_err(|e| e.to_string())?;
    let target = cli.daemon.target;
    let stale_after = cli
        .stale_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.perf.stale_after());

    let monitor_url = config.endpoint().monitor(target).map_err(|e| e.to_string())?;
    let (notice_tx, notice_rx) = channel::unbounded();
    let subscription =
        PerformanceSubscription::new(target, cli.daemon.has_permission(), config.perf.capacity)
            .with_notices(notice_tx);
    let mut session = PerformanceSession::spawn(subscription, monitor_url, config.connect_timeout());

    let header = format!(
        "daemon-perf  {}  {}:{}  window={}  stale={}ms",
        target,
        config.host,
        config.port,
        config.perf.capacity,
        stale_after.as_millis()
    );
    let mut events: VecDeque<LoggedEvent> = VecDeque::new();

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
                    log_event(&mut events, state.label().to_string(), state.color());
                }
                Some(_) => {}
                None => stream_open = false,
            },

            ev = reader.next() => match ev {
                Some(Ok(Event::Key(k))) => {
                    let quit = k.code == KeyCode::Char('q')
                        || k.code == KeyCode::Esc
                        || (k.code == KeyCode::Char('c') && k.modifiers == KeyModifiers::CONTROL);
                    if quit {
                        break Ok(());
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.to_string()),
                None => break Ok(()),
            },

            _ = tick.tick() => {
                while let Ok(notice) = notice_rx.try_recv() {
                    if let NoticeKind::MalformedMessage(reason) = notice.kind {
                        log_event(&mut events, format!("SAMPLE DROPPED: {}", reason), Color::Yellow);
                    }
                }
                let sub = session.subscription();
                let drawn = draw(
                    &mut tui,
                    &header,
                    sub.state(),
                    sub.sampler(),
                    stale_after,
                    &events,
                    cli.quiet,
                );
                if let Err(e) = drawn {
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
            eprintln!("daemon-perf: {}", e);
            ExitCode::FAILURE
        }
    }
}
