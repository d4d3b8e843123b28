//! term-runner: headless runner for one county governance term.
//!
//! Usage:
//!   term-runner --seed 12345 --months 36 --peers 3 --db run.db
//!   term-runner --seed 12345 --ipc-mode

use anyhow::Result;
use county_core::{
    command::PlayerCommand,
    config::EngineConfig,
    engine::{CommandOutcome, TermEngine},
    investment::{self, InvestmentAction},
    negotiation::NegotiationEventType,
    promise::PromiseTerms,
    settlement::SettlementReport,
    store::SimStore,
    summary::TermSummary,
    territory::SpeakerRole,
    types::Month,
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Advance {
        #[serde(default = "one_month")]
        months: Month,
    },
    Invest {
        action: InvestmentAction,
        #[serde(default)]
        target_village: Option<String>,
    },
    SetTax {
        rate: f64,
    },
    Negotiate {
        session_id: String,
        utterance: String,
        #[serde(default)]
        speaker: Option<String>,
        #[serde(default)]
        promises: Vec<PromiseTerms>,
    },
    Quit,
}

fn one_month() -> Month {
    1
}

#[derive(serde::Serialize)]
struct SessionView {
    session_id: String,
    counterpart: String,
    event_type: NegotiationEventType,
    round: u32,
    max_rounds: u32,
}

#[derive(serde::Serialize)]
struct UiState {
    month: Month,
    term_months: Month,
    term_over: bool,
    county_name: String,
    treasury: f64,
    morale: f64,
    security: f64,
    commercial: f64,
    education: f64,
    tax_rate: f64,
    integrity: i32,
    pending_promises: usize,
    population: i64,
    farmland: i64,
    available_actions: Vec<InvestmentAction>,
    active_sessions: Vec<SessionView>,
    last_report: Option<SettlementReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<CommandOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<TermSummary>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let months = parse_arg(&args, "--months", 36 as Month);
    let peers = parse_arg(&args, "--peers", 3usize);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str())
        .unwrap_or("./data");

    if !ipc_mode {
        println!("County term runner");
        println!("  seed:      {seed}");
        println!("  months:    {months}");
        println!("  peers:     {peers}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let mut config = match EngineConfig::load(data_dir) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{e}; using built-in defaults");
            EngineConfig::default()
        }
    };
    config.runtime.peer_count = peers;

    let store = if db == ":memory:" { SimStore::in_memory()? } else { SimStore::open(db)? };
    store.migrate()?;

    let run_id = format!("run-{seed}-{}", chrono::Utc::now().timestamp());
    store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"))?;

    let mut engine = TermEngine::new(run_id.clone(), seed, store, config)?;

    if ipc_mode {
        run_ipc_loop(&mut engine)?;
    } else {
        engine.run_months(months)?;
        print_summary(&engine, &run_id);
    }

    Ok(())
}

fn run_ipc_loop(engine: &mut TermEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                write_error(&mut stdout, &e.to_string())?;
                continue;
            }
        };

        if matches!(cmd, IpcCommand::Quit) {
            break;
        }
        match handle_command(engine, cmd) {
            Ok(state) => writeln!(stdout, "{}", serde_json::to_string(&state)?)?,
            Err(e) => write_error(&mut stdout, &e.to_string())?,
        }
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &mut TermEngine, cmd: IpcCommand) -> Result<UiState> {
    let command = match cmd {
        IpcCommand::GetState | IpcCommand::Quit => None,
        IpcCommand::Advance { months } => Some(PlayerCommand::Advance { months }),
        IpcCommand::Invest { action, target_village } => Some(PlayerCommand::Invest { action, target_village }),
        IpcCommand::SetTax { rate } => Some(PlayerCommand::SetTax { rate }),
        IpcCommand::Negotiate { session_id, utterance, speaker, promises } => Some(PlayerCommand::Negotiate {
            session_id,
            utterance,
            speaker: speaker.as_deref().map(SpeakerRole::parse).unwrap_or(SpeakerRole::Player),
            promises,
        }),
    };
    let outcome = match command {
        Some(command) => Some(engine.apply_command(command)?),
        None => None,
    };
    let mut state = build_ui_state(engine);
    state.outcome = outcome;
    Ok(state)
}

fn build_ui_state(engine: &TermEngine) -> UiState {
    let player = engine.player();
    let county = &player.county;
    let active_sessions = engine
        .book()
        .active_for(&player.id)
        .into_iter()
        .map(|s| SessionView {
            session_id: s.id.clone(),
            counterpart: s.counterpart.clone(),
            event_type: s.event_type,
            round: s.current_round,
            max_rounds: s.max_rounds,
        })
        .collect();
    let term_over = engine.clock.is_over();
    UiState {
        month: engine.clock.current_month,
        term_months: engine.clock.term_months,
        term_over,
        county_name: player.name.clone(),
        treasury: county.treasury,
        morale: county.morale,
        security: county.security,
        commercial: county.commercial,
        education: county.education,
        tax_rate: county.tax_rate,
        integrity: county.integrity,
        pending_promises: county.promises.iter().filter(|p| p.is_pending()).count(),
        population: county.total_population(),
        farmland: county.total_farmland(),
        available_actions: investment::available_actions(county),
        active_sessions,
        last_report: player.last_report.clone(),
        outcome: None,
        summary: term_over.then(|| engine.summary()),
    }
}

fn write_error(stdout: &mut io::Stdout, message: &str) -> Result<()> {
    let err_json = serde_json::json!({ "error": message });
    writeln!(stdout, "{}", err_json)?;
    stdout.flush()?;
    Ok(())
}

fn print_summary(engine: &TermEngine, run_id: &str) {
    let summary = engine.summary();
    println!("=== TERM SUMMARY ===");
    println!("  run_id:         {run_id}");
    println!("  months settled: {}", summary.months_completed);
    println!(
        "  sessions:       {} opened, {} still open",
        engine.book().sessions().count(),
        engine.book().sessions().filter(|s| s.is_active()).count()
    );
    println!();
    for t in &summary.territories {
        let marker = if t.is_player { "*" } else { " " };
        println!(
            "{marker} {:<16} pop {:>6} -> {:>6} ({:+.1}%) | treasury {:>7.1} | morale {:>5.1} | score {:>5.1} ({})",
            t.name,
            t.population_initial,
            t.population_final,
            t.population_change_pct.unwrap_or(0.0),
            t.treasury.last,
            t.morale.last,
            t.overall,
            t.grade.label(),
        );
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
