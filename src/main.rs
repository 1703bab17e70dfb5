//! Process entry point (C13/C14 wiring): parse the outer CLI, assemble the full `key=value`
//! token set (script file, then command line, later wins), build and validate a `Config`,
//! start the job, and drive the line-mode command prompt until the job reaches a terminal
//! state.
//!
//! Grounded on `main.rs`'s CLI→config→engine→report flow, narrowed to dt's token language
//! and job/thread model and stripped of the distributed-mode wiring, which has no counterpart
//! here.

use dt::app::Application;
use dt::cli::Cli;
use dt::config::build::{build_config, RECOGNIZED_KEYS};
use dt::config::tokens::TokenSet;
use dt::config::validate::validate;
use dt::job::JobSelector;
use dt::logger::Logger;
use dt::stats::report;
use std::process::ExitCode;
use std::sync::Arc;

/// Reserved for the internal end-of-file sentinel some retry paths use internally; never
/// returned as a real process exit code.
const EOF_SENTINEL_CODE: u8 = 254;
const FATAL_CODE: u8 = 255;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let mut tokens = TokenSet::parse(cli.tokens.iter().map(String::as_str));
    if let Some(script_path) = &cli.script {
        match std::fs::read_to_string(script_path) {
            Ok(body) => tokens = tokens.merge_script(&body),
            Err(e) => {
                eprintln!("FATAL: reading script {}: {e}", script_path.display());
                return ExitCode::from(FATAL_CODE);
            }
        }
    }

    for key in tokens.keys() {
        if !RECOGNIZED_KEYS.contains(&key) {
            eprintln!("FATAL: unrecognized option {key:?}");
            return ExitCode::from(FATAL_CODE);
        }
    }

    let cfg = match build_config(&tokens) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: {e}");
            return ExitCode::from(FATAL_CODE);
        }
    };

    if let Err(errors) = validate(&cfg) {
        eprintln!("FATAL: {errors}");
        return ExitCode::from(FATAL_CODE);
    }

    if cli.debug {
        eprintln!("debug: resolved config: {cfg:#?}");
    }

    let logger = match Logger::new(cfg.joblog.as_deref(), cfg.errorfile.as_deref(), cfg.logprefix.clone()) {
        Ok(logger) => Arc::new(logger),
        Err(e) => {
            eprintln!("FATAL: opening log files: {e}");
            return ExitCode::from(FATAL_CODE);
        }
    };

    let app = Application::new(logger);
    let tag = cfg.tag.clone().unwrap_or_default();
    let report_level = cfg.report_level;

    let job_id = match app.submit(Arc::new(cfg)) {
        Ok(id) => id,
        Err(e) => {
            app.logger.error(format!("starting job: {e}"));
            return ExitCode::from(FATAL_CODE);
        }
    };

    install_sigint_handler(&app);

    let stdin = std::io::stdin();
    app.run_command_prompt(stdin.lock());

    app.jobs.wait(&JobSelector::ById(job_id));

    let report_data = match app.jobs.query(&JobSelector::ById(job_id)).into_iter().next() {
        Some(r) => r,
        None => {
            app.logger.error(format!("job {job_id} vanished before final report"));
            return ExitCode::from(EOF_SENTINEL_CODE);
        }
    };

    let elapsed = report_data
        .finished_at
        .and_then(|end| end.duration_since(report_data.started_at).ok());
    let text = report::render(report_level, &tag, &report_data.stats, None, elapsed);
    if !text.is_empty() {
        println!("{text}");
    }

    const MAX_ERROR_EXIT_CODE: u32 = (EOF_SENTINEL_CODE - 1) as u32;
    let error_count = report_data.error_count.min(MAX_ERROR_EXIT_CODE) as u8;
    ExitCode::from(error_count)
}

/// Install a SIGINT handler that cancels every running job, so the command loop's blocking
/// `stdin` read is abandoned in favor of `Job::wait` returning once workers see the shared
/// cancel flag (spec §4.16: "on EOF/SIGINT it waits for the job to reach a terminal state").
fn install_sigint_handler(app: &Application) {
    use std::sync::OnceLock;
    static APP_PTR: OnceLock<usize> = OnceLock::new();
    let _ = APP_PTR.set(app as *const Application as usize);

    extern "C" fn handler(_sig: libc::c_int) {
        if let Some(&ptr) = APP_PTR.get() {
            // Safety: `app` lives in `main`'s stack frame for the whole process lifetime, so
            // the address stashed here for the handler stays valid for every signal delivered
            // while it remains installed.
            let app = unsafe { &*(ptr as *const Application) };
            app.request_termination();
        }
    }

    unsafe {
        libc::signal(libc::SIGINT, handler as usize);
    }
}
