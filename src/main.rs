mod ui;

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    event::{KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use log::{debug, info};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use runoverlay::{
    app_dirs::AppDirs,
    config::{Config, ConfigStore, FileConfigStore},
    controller::SessionController,
    error::OverlayError,
    integrator::IntegratorSettings,
    overlay::Overlay,
    runtime::{Clock, OverlayEvent, SystemClock, TerminalEvents},
    session::RunStatus,
    store::{SessionStore, SqliteStore},
};
use std::{error::Error, io, path::PathBuf, sync::Arc, thread};

/// livestream run overlay: a shared treadmill session and its live display
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Operator commands and a live overlay sharing one treadmill session record. Every instance pointed at the same store sees the same run."
)]
pub struct Cli {
    /// session store database
    #[clap(long)]
    store: Option<PathBuf>,

    /// record key inside the store
    #[clap(long)]
    key: Option<String>,

    /// config file
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    /// create the default record if none exists
    Init,
    /// print the current record as JSON
    Status,
    /// set the session plan
    Apply {
        /// planned distance in miles
        #[clap(long, default_value_t = 4.0)]
        miles: f64,
        /// planned duration in minutes
        #[clap(long, default_value_t = 40.0)]
        minutes: f64,
    },
    /// start a new run
    Start,
    /// pause the running run
    Pause,
    /// resume the paused run
    Resume,
    /// return to ready and clear totals
    Reset,
    /// mark the run complete
    Finish,
    /// set treadmill speed in mph
    Speed {
        #[clap(allow_negative_numbers = true)]
        value: f64,
        /// add to the current value instead of replacing it
        #[clap(short, long)]
        relative: bool,
    },
    /// set treadmill incline in percent
    Incline {
        #[clap(allow_negative_numbers = true)]
        value: f64,
        /// add to the current value instead of replacing it
        #[clap(short, long)]
        relative: bool,
    },
    /// print the effective config and where it is read from
    Config {
        /// write the built-in defaults to the config file first
        #[clap(long)]
        write_default: bool,
    },
    /// show the live overlay (default)
    Overlay {
        /// print one line per second instead of drawing a TUI
        #[clap(long)]
        plain: bool,
        /// exit after this many frames
        #[clap(long)]
        frames: Option<u64>,
    },
}

impl Cli {
    fn config_store(&self) -> FileConfigStore {
        match &self.config {
            Some(path) => FileConfigStore::with_path(path),
            None => FileConfigStore::new(),
        }
    }

    fn load_config(&self) -> Config {
        let mut cfg = self.config_store().load();
        if let Some(key) = &self.key {
            cfg.store_key = key.clone();
        }
        cfg
    }

    fn store_path(&self) -> Option<PathBuf> {
        self.store.clone().or_else(AppDirs::state_db_path)
    }
}

/// Interactive overlay plus an operator controller on the same store
pub struct App<S: SessionStore, C: Clock> {
    pub overlay: Overlay<S, C>,
    pub control: SessionController<S, C>,
    pub notice: Option<String>,
}

impl<S: SessionStore + Clone, C: Clock + Clone> App<S, C> {
    pub fn new(store: S, clock: C, cfg: &Config) -> Self {
        Self {
            overlay: Overlay::new(store.clone(), clock.clone(), IntegratorSettings::from(cfg))
                .with_frame_interval(cfg.frame_interval()),
            control: SessionController::with_config(store, clock, cfg),
            notice: None,
        }
    }
}

impl<S: SessionStore, C: Clock> App<S, C> {
    pub fn attach(&mut self) -> Result<(), OverlayError> {
        self.control.attach()?;
        self.overlay.attach()
    }

    /// Space bar: start, pause or resume depending on the current status
    fn toggle(&mut self) -> Result<(), OverlayError> {
        let status = self
            .control
            .last_known()
            .map_or(RunStatus::Ready, |s| s.status);
        match status {
            RunStatus::Ready | RunStatus::Complete => self.control.start_run().map(|_| ()),
            RunStatus::Running => self.control.pause_run(),
            RunStatus::Paused => self.control.resume_run(),
        }
    }

    /// Returns false when the key asks to quit.
    pub fn on_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return false;
        }
        if let Err(e) = self.control.sync() {
            self.notice = Some(e.to_string());
        }
        let result = match key.code {
            KeyCode::Esc | KeyCode::Char('q') => return false,
            KeyCode::Char(' ') => self.toggle(),
            KeyCode::Char('r') => self.control.reset_run(),
            KeyCode::Char('f') => self.control.finish_run(),
            KeyCode::Up => self.control.step_speed(1).map(|_| ()),
            KeyCode::Down => self.control.step_speed(-1).map(|_| ()),
            KeyCode::Right => self.control.step_incline(1).map(|_| ()),
            KeyCode::Left => self.control.step_incline(-1).map(|_| ()),
            _ => Ok(()),
        };
        self.notice = result.err().map(|e| e.to_string());
        true
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    if let Some(Command::Config { write_default }) = cli.command.as_ref() {
        return show_config(&cli, *write_default);
    }
    let cfg = cli.load_config();
    let Some(path) = cli.store_path() else {
        let mut cmd = Cli::command();
        cmd.error(
            ErrorKind::MissingRequiredArgument,
            "no default store location, pass --store",
        )
        .exit();
    };
    let store = Arc::new(SqliteStore::open(&path, cfg.store_key.clone())?);
    debug!("using store {} key {}", store.path().display(), store.key());

    let command = cli.command.clone().unwrap_or(Command::Overlay {
        plain: false,
        frames: None,
    });
    if let Command::Overlay { plain, frames } = command {
        return run_overlay(store, &cfg, plain, frames);
    }

    let mut control = SessionController::with_config(Arc::clone(&store), SystemClock, &cfg);
    control.refresh()?;
    if let Err(e) = run_command(&mut control, &command) {
        eprintln!("{command} failed: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run_command<S: SessionStore, C: Clock>(
    control: &mut SessionController<S, C>,
    command: &Command,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Init | Command::Status => {}
        Command::Apply { miles, minutes } => {
            let plan = control.apply_plan(*miles, *minutes)?;
            println!(
                "plan set: {:.1} mi in {} min",
                plan.distance_miles, plan.duration_minutes
            );
        }
        Command::Start => {
            let run_id = control.start_run()?;
            println!("run {run_id} started");
        }
        Command::Pause => control.pause_run()?,
        Command::Resume => control.resume_run()?,
        Command::Reset => control.reset_run()?,
        Command::Finish => control.finish_run()?,
        Command::Speed { value, relative } => {
            let mph = if *relative {
                control.adjust_speed(*value)?
            } else {
                control.set_speed(*value)?
            };
            println!("speed {mph:.1} mph");
        }
        Command::Incline { value, relative } => {
            let pct = if *relative {
                control.adjust_incline(*value)?
            } else {
                control.set_incline(*value)?
            };
            println!("incline {pct:.1} %");
        }
        Command::Config { .. } | Command::Overlay { .. } => {}
    }

    if let Some(state) = control.last_known() {
        if matches!(command, Command::Status | Command::Init) {
            println!("{}", serde_json::to_string_pretty(state)?);
        }
    }
    Ok(())
}

fn show_config(cli: &Cli, write_default: bool) -> Result<(), Box<dyn Error>> {
    let store = cli.config_store();
    if write_default {
        store.save(&Config::default())?;
        info!("wrote default config to {}", store.path().display());
    }
    println!("# {}", store.path().display());
    println!("{}", serde_json::to_string_pretty(&cli.load_config())?);
    Ok(())
}

fn run_overlay(
    store: Arc<SqliteStore>,
    cfg: &Config,
    plain: bool,
    frames: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let mut app = App::new(store, SystemClock, cfg);
    app.attach()?;

    if plain {
        return run_plain(&mut app, frames);
    }

    if !io::stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty, use --plain")
            .exit();
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = start_tui(&mut terminal, &mut app, frames);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    app.overlay.detach();

    result
}

fn start_tui<B: Backend, S: SessionStore, C: Clock>(
    terminal: &mut Terminal<B>,
    app: &mut App<S, C>,
    frames: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let mut events = TerminalEvents;
    let mut drawn = 0u64;

    loop {
        match app.overlay.frames().pace(&mut events)? {
            OverlayEvent::Key(key) => {
                if !app.on_key(key) {
                    break;
                }
            }
            OverlayEvent::Resize => {}
            OverlayEvent::Frame => {
                let outcome = app.overlay.step();
                if outcome.completed {
                    info!("goal reached");
                }
                drawn += 1;
            }
        }
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;

        if frames.is_some_and(|n| drawn >= n) {
            break;
        }
    }
    Ok(())
}

fn run_plain<S: SessionStore, C: Clock>(
    app: &mut App<S, C>,
    frames: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let interval = app.overlay.frames().interval();
    let per_line = (1000 / interval.as_millis().max(1)).max(1) as u64;
    let mut n = 0u64;

    loop {
        app.overlay.step();
        if n % per_line == 0 {
            println!("{}", plain_line(&app.overlay.view()));
        }
        n += 1;
        if frames.is_some_and(|max| n >= max) {
            break;
        }
        thread::sleep(interval);
    }
    app.overlay.detach();
    Ok(())
}

fn plain_line(view: &runoverlay::display::OverlayView) -> String {
    let mut line = format!(
        "{} {} {:>5.1}% {} {} {} {} cal {} {}",
        view.run_id.unwrap_or(0),
        view.status,
        view.progress * 100.0,
        view.elapsed,
        view.pace,
        view.distance,
        view.calories,
        view.speed,
        view.incline,
    );
    if let Some(msg) = &view.message {
        line.push_str(&format!(" [{msg}]"));
    }
    line
}
