//! Process-wide logging setup, mirroring the reference application's own
//! `init_logging`: a terminal logger for interactive feedback, layered with
//! a file logger under the platform data directory, falling back to
//! terminal-only if the log file can't be created.

use std::path::PathBuf;

use app_dirs2::{AppDataType, AppInfo};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, TermLogger, TerminalMode, WriteLogger,
};

const APP_INFO: AppInfo = AppInfo {
    name: "surround-view",
    author: "surround-view",
};

/// Resolves (and creates) the directory this binary writes logs and
/// generated calibration artifacts into.
pub fn data_dir() -> PathBuf {
    app_dirs2::get_app_root(AppDataType::UserData, &APP_INFO)
        .unwrap_or_else(|_| std::env::temp_dir().join("surround-view"))
}

/// Initializes the combined terminal + file logger. `verbose` raises the
/// terminal level from `Info` to `Debug`; the file logger always runs at
/// `Debug` so a report after the fact isn't missing anything the terminal
/// chose not to show.
pub fn init_logging(verbose: bool) {
    let term_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let term_config = ConfigBuilder::new().build();
    let file_config = ConfigBuilder::new().build();

    let dir = data_dir();
    let log_path = dir.join("surround-view.log");

    let file_logger = std::fs::create_dir_all(&dir)
        .ok()
        .and_then(|_| std::fs::File::create(&log_path).ok());

    match file_logger {
        Some(file) => {
            let _ = CombinedLogger::init(vec![
                TermLogger::new(term_level, term_config, TerminalMode::Mixed, ColorChoice::Auto),
                WriteLogger::new(LevelFilter::Debug, file_config, file),
            ]);
        }
        None => {
            let _ = TermLogger::init(term_level, term_config, TerminalMode::Mixed, ColorChoice::Auto);
        }
    }
}
