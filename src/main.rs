use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use seatwatch_core::config::RunConfig;
use seatwatch_core::notify::telegram;
use seatwatch_core::runtime::Runtime;
use seatwatch_core::{logger, region};

/// Watch a booking page and grab the first seat that opens up.
#[derive(Parser, Debug)]
#[command(name = "seatwatch", version, about)]
struct Args {
    /// Use the stub backend (no screen or browser access)
    #[arg(long)]
    stub: bool,

    /// Settings file
    #[arg(long, default_value = "settings.json")]
    config: PathBuf,

    /// Template directory, overrides `targets_dir`
    #[arg(long, value_name = "DIR")]
    targets: Option<PathBuf>,

    /// Print the Telegram chats the bot has seen and exit
    #[arg(long)]
    list_chats: bool,

    /// Write the result region file and exit
    #[arg(long, value_name = "X,Y,W,H")]
    save_region: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let logs_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join("logs");
    if let Err(e) = logger::init(&logs_dir) {
        eprintln!("warning: file logging disabled: {}", e);
    }

    let mut config = match RunConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(dir) = &args.targets {
        config.targets_dir = dir.clone();
    }

    let result = if let Some(spec) = &args.save_region {
        save_region(&config, spec)
    } else if args.list_chats {
        list_chats(&config)
    } else {
        run(config, args.stub)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger::error(&format!("{:#}", e));
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn save_region(config: &RunConfig, spec: &str) -> Result<()> {
    let region = region::parse_spec(spec)?;
    region::save(&config.region_file, region)
        .with_context(|| format!("writing {}", config.region_file.display()))?;
    println!(
        "saved region {},{} {}x{} to {}",
        region.x,
        region.y,
        region.width,
        region.height,
        config.region_file.display()
    );
    Ok(())
}

fn list_chats(config: &RunConfig) -> Result<()> {
    let token = config
        .telegram_bot_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .context("telegram_bot_token is not set")?;
    let chats = telegram::list_chats(token, config.request_timeout()).context("fetching updates")?;
    if chats.is_empty() {
        println!("no chats yet; send the bot a message and try again");
    }
    for (id, title) in chats {
        println!("{}\t{}", id, title);
    }
    Ok(())
}

fn run(config: RunConfig, force_stub: bool) -> Result<()> {
    let mut runtime = Runtime::from_config(config, force_stub)?;

    let (log_tx, log_rx) = mpsc::channel::<String>();
    logger::set_tui_sender(log_tx);
    logger::info("seatwatch started");
    runtime.announce();

    runtime.spawn_controller();
    runtime.start_hotkeys();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = seatwatch_tui::App::new(
        runtime.status.clone(),
        runtime.trigger.clone(),
        runtime.gate.clone(),
        log_rx,
    );

    // TUI on the main thread until quit
    let result = seatwatch_tui::event::run(&mut terminal, &mut app);

    runtime.shutdown();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}
