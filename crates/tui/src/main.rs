//! vidsplit job monitor
//!
//! Terminal interface for watching split/merge jobs and aggregate stats.
//! Polls `/api/jobs` and `/api/stats` on the service at `VIDSPLIT_URL`
//! (default http://127.0.0.1:5000).

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, Gauge, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    io::{self, Stdout},
    time::{Duration, Instant},
};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
const POLL_INTERVAL_MS: u64 = 1000;
const MAX_HISTORY_POINTS: usize = 60;
const MAX_EVENT_LOG_ENTRIES: usize = 100;

// ============================================================================
// Data Models (mirroring the service's JSON)
// ============================================================================

/// Job as returned by `/api/jobs`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub progress: u8,
    pub created_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub outputs: Option<Vec<String>>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobView {
    fn is_active(&self) -> bool {
        self.status == "pending" || self.status == "processing"
    }

    /// Short description of what the job produced or why it failed
    fn result_summary(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        if let Some(outputs) = &self.outputs {
            return format!("{} segments", outputs.len());
        }
        self.output.clone().unwrap_or_else(|| "-".to_string())
    }
}

/// Aggregate counters from `/api/stats`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    pub total_videos_split: u64,
    pub total_segments_created: u64,
    pub total_videos_merged: u64,
    pub total_time_saved: f64,
    #[serde(default)]
    pub total_downloads: u64,
}

/// Log lines describing what changed between two job listings
///
/// New jobs and status changes are reported; progress-only changes are not.
pub fn job_events(old: &[JobView], new: &[JobView]) -> Vec<String> {
    let previous: HashMap<&str, &JobView> = old.iter().map(|j| (j.id.as_str(), j)).collect();
    let mut events = Vec::new();
    // listings are newest first; report oldest first
    for job in new.iter().rev() {
        let id = short_id(&job.id);
        match previous.get(job.id.as_str()) {
            None => events.push(format!("{} job {} {}", job.kind, id, job.status)),
            Some(before) if before.status != job.status => {
                let line = match job.status.as_str() {
                    "completed" => format!("{} job {} completed: {}", job.kind, id, job.result_summary()),
                    "error" => format!("{} job {} failed: {}", job.kind, id, job.result_summary()),
                    status => format!("{} job {} {}", job.kind, id, status),
                };
                events.push(line);
            }
            Some(_) => {}
        }
    }
    events
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

// ============================================================================
// App State
// ============================================================================

/// Main application state for the monitor
pub struct App {
    pub base_url: String,
    pub jobs: Vec<JobView>,
    pub stats: Option<StatsView>,
    /// Event log with recent job events
    pub event_log: VecDeque<String>,
    /// Segments created over time (elapsed secs, total)
    pub segment_history: VecDeque<(f64, f64)>,
    pub connected: bool,
    client: reqwest::Client,
    start_time: Instant,
}

impl App {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            jobs: Vec::new(),
            stats: None,
            event_log: VecDeque::with_capacity(MAX_EVENT_LOG_ENTRIES),
            segment_history: VecDeque::with_capacity(MAX_HISTORY_POINTS),
            connected: false,
            client: reqwest::Client::new(),
            start_time: Instant::now(),
        }
    }

    /// Add an event to the log
    pub fn log_event(&mut self, event: String) {
        if self.event_log.len() >= MAX_EVENT_LOG_ENTRIES {
            self.event_log.pop_front();
        }
        self.event_log.push_back(event);
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        response.json::<T>().await.map_err(|e| format!("JSON parse error: {}", e))
    }

    /// Fetch jobs and stats from the service
    pub async fn refresh(&mut self) {
        let jobs = self.get_json::<Vec<JobView>>("/api/jobs").await;
        let stats = self.get_json::<StatsView>("/api/stats").await;
        match (jobs, stats) {
            (Ok(jobs), Ok(stats)) => {
                if !self.connected {
                    self.log_event(format!("Connected to {}", self.base_url));
                }
                for line in job_events(&self.jobs, &jobs) {
                    self.log_event(line);
                }
                self.jobs = jobs;
                self.update_history(&stats);
                self.stats = Some(stats);
                self.connected = true;
            }
            (Err(e), _) | (_, Err(e)) => {
                if self.connected {
                    self.log_event(format!("Connection lost: {}", e));
                }
                self.connected = false;
            }
        }
    }

    fn update_history(&mut self, stats: &StatsView) {
        let elapsed_secs = self.start_time.elapsed().as_secs_f64();
        if self.segment_history.len() >= MAX_HISTORY_POINTS {
            self.segment_history.pop_front();
        }
        self.segment_history
            .push_back((elapsed_secs, stats.total_segments_created as f64));
    }

    fn active_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_active()).count()
    }
}

// ============================================================================
// Terminal Setup/Teardown
// ============================================================================

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

// ============================================================================
// Widget Rendering
// ============================================================================

fn status_color(status: &str) -> Color {
    match status {
        "completed" => Color::Green,
        "error" => Color::Red,
        "processing" => Color::Cyan,
        _ => Color::Gray,
    }
}

/// Render the job table
fn render_jobs_table(f: &mut Frame, area: Rect, app: &App) {
    let header_cells = ["ID", "Type", "Status", "Progress", "Took", "Result"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = app
        .jobs
        .iter()
        .map(|job| {
            let took = job
                .completed_at
                .map(|done| format_duration(((done - job.created_at).max(0) / 1000) as u64))
                .unwrap_or_else(|| "-".to_string());
            Row::new(vec![
                Cell::from(short_id(&job.id).to_string()),
                Cell::from(job.kind.clone()),
                Cell::from(job.status.clone()).style(Style::default().fg(status_color(&job.status))),
                Cell::from(format!("{}%", job.progress)),
                Cell::from(took),
                Cell::from(job.result_summary()),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(10),
        Constraint::Length(7),
        Constraint::Length(12),
        Constraint::Length(9),
        Constraint::Length(8),
        Constraint::Min(10),
    ];

    let title = if app.connected {
        " Jobs "
    } else {
        " Jobs (Disconnected) "
    };

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(table, area);
}

/// Render a gauge for the oldest job still running
fn render_active_gauge(f: &mut Frame, area: Rect, app: &App) {
    let active = app.jobs.iter().rev().find(|j| j.is_active());
    let (ratio, label, title) = match active {
        Some(job) => (
            job.progress as f64 / 100.0,
            format!("{}%", job.progress),
            format!(" {} {} ", job.kind, short_id(&job.id)),
        ),
        None => (0.0, "idle".to_string(), " Active Job ".to_string()),
    };

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(title))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label);

    f.render_widget(gauge, area);
}

/// Render the aggregate stats table
fn render_stats(f: &mut Frame, area: Rect, app: &App) {
    let stats = app.stats.clone().unwrap_or_default();
    let rows = vec![
        Row::new(vec![Cell::from("Videos split"), Cell::from(stats.total_videos_split.to_string())]),
        Row::new(vec![Cell::from("Segments"), Cell::from(stats.total_segments_created.to_string())]),
        Row::new(vec![Cell::from("Videos merged"), Cell::from(stats.total_videos_merged.to_string())]),
        Row::new(vec![Cell::from("Downloads"), Cell::from(stats.total_downloads.to_string())]),
        Row::new(vec![
            Cell::from("Time processed"),
            Cell::from(format_duration(stats.total_time_saved as u64)),
        ]),
    ];

    let widths = [Constraint::Length(15), Constraint::Min(8)];
    let table = Table::new(rows, widths).block(Block::default().borders(Borders::ALL).title(" Stats "));

    f.render_widget(table, area);
}

/// Render segments created over time
fn render_segment_chart(f: &mut Frame, area: Rect, app: &App) {
    let data: Vec<(f64, f64)> = app.segment_history.iter().cloned().collect();

    if data.is_empty() {
        let block = Block::default().borders(Borders::ALL).title(" Segments ");
        f.render_widget(block, area);
        return;
    }

    let min_x = data.first().map(|(x, _)| *x).unwrap_or(0.0);
    let max_x = data.last().map(|(x, _)| *x).unwrap_or(60.0).max(min_x + 1.0);
    let max_y = data.iter().map(|(_, y)| *y).fold(0.0f64, f64::max).max(1.0);

    let datasets = vec![Dataset::default()
        .name("segments")
        .marker(symbols::Marker::Braille)
        .style(Style::default().fg(Color::Green))
        .data(&data)];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(" Segments "))
        .x_axis(
            Axis::default()
                .title("Time (s)")
                .style(Style::default().fg(Color::Gray))
                .bounds([min_x, max_x])
                .labels(vec![
                    Span::raw(format!("{:.0}", min_x)),
                    Span::raw(format!("{:.0}", max_x)),
                ]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, max_y])
                .labels(vec![Span::raw("0"), Span::raw(format!("{:.0}", max_y))]),
        );

    f.render_widget(chart, area);
}

/// Render event log showing recent job events
fn render_event_log(f: &mut Frame, area: Rect, app: &App) {
    let events: Vec<Line> = app
        .event_log
        .iter()
        .rev()
        .take((area.height as usize).saturating_sub(2))
        .map(|e| Line::from(e.as_str()))
        .collect();

    let paragraph = Paragraph::new(events)
        .block(Block::default().borders(Borders::ALL).title(" Event Log "))
        .wrap(Wrap { trim: true });

    f.render_widget(paragraph, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let status = if app.connected {
        format!(
            " {} | Jobs: {} | Active: {} | Press 'q' to quit ",
            app.base_url,
            app.jobs.len(),
            app.active_jobs()
        )
    } else {
        format!(" Connecting to {}... | Press 'q' to quit ", app.base_url)
    };

    let paragraph = Paragraph::new(status).style(Style::default().fg(Color::White).bg(Color::DarkGray));

    f.render_widget(paragraph, area);
}

/// Format a duration in seconds
fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

// ============================================================================
// Main UI Layout
// ============================================================================

fn ui(f: &mut Frame, app: &App) {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(f.area());

    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(main_chunks[0]);

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(content_chunks[0]);

    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // active job gauge
            Constraint::Length(7), // stats
            Constraint::Min(0),    // segment chart
        ])
        .split(content_chunks[1]);

    render_jobs_table(f, left_chunks[0], app);
    render_event_log(f, left_chunks[1], app);
    render_active_gauge(f, right_chunks[0], app);
    render_stats(f, right_chunks[1], app);
    render_segment_chart(f, right_chunks[2], app);
    render_status_bar(f, main_chunks[1], app);
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("VIDSPLIT_URL")
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

    let mut terminal = setup_terminal()?;

    let mut app = App::new(base_url);
    app.log_event("vidsplit monitor started".to_string());

    let result = run_app(&mut terminal, &mut app).await;

    restore_terminal(&mut terminal)?;

    result
}

async fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> io::Result<()> {
    let poll_interval = Duration::from_millis(POLL_INTERVAL_MS);
    let mut last_fetch: Option<Instant> = None;

    loop {
        if last_fetch.map_or(true, |t| t.elapsed() >= poll_interval) {
            app.refresh().await;
            last_fetch = Some(Instant::now());
        }

        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return Ok(()),
                        _ => {}
                    }
                }
            }
        }
    }
}
