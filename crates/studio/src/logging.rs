use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Log to stderr; used for one-shot runs
pub fn setup_logging(verbose_level: u8) {
    setup_logging_with_file(verbose_level, None);
}

/// Log to a file so log lines never interleave with the chat transcript
pub fn setup_logging_for_repl(verbose_level: u8) {
    let log_file_path = log_file_path();
    if let Some(parent) = log_file_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    setup_logging_with_file(verbose_level, Some(log_file_path));
}

pub fn log_file_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("code-studio")
        .join("studio.log")
}

fn filter_for(verbose_level: u8) -> &'static str {
    match verbose_level {
        0 => "warn,code_studio=info,llm=info",
        1 => "info,code_studio=debug,llm=debug",
        _ => "debug,code_studio=trace,llm=trace",
    }
}

fn setup_logging_with_file(verbose_level: u8, log_file: Option<PathBuf>) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_for(verbose_level))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    let file = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!(
                    "Warning: Could not open log file {}: {e}, falling back to stderr",
                    path.display()
                );
                None
            }
        }
    });

    match file {
        Some(file) => subscriber
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => subscriber.with_writer(std::io::stderr).init(),
    }
}
