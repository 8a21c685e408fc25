//! Logging setup and the experiment-level log levels used by `Window::log_on_flip`.
//!
//! Everything goes through the `log` facade. Experiment messages are emitted under
//! their own targets so they can be filtered separately, e.g.
//! `RUST_LOG=psywin::exp=info,psywin::data=info`.

use strum::{Display, EnumString};

/// Target used for messages at the `Exp` level.
pub const EXP_TARGET: &str = "psywin::exp";
/// Target used for messages at the `Data` level.
pub const DATA_TARGET: &str = "psywin::data";

/// Experiment log levels. `Data` and `Exp` sit between `Warning` and `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum LogLevel {
    #[strum(serialize = "CRITICAL")]
    Critical,
    #[strum(serialize = "ERROR")]
    Error,
    #[strum(to_string = "WARNING", serialize = "WARN")]
    Warning,
    #[strum(serialize = "DATA")]
    Data,
    #[strum(serialize = "EXP")]
    Exp,
    #[strum(serialize = "INFO")]
    Info,
    #[strum(serialize = "DEBUG")]
    Debug,
}

impl LogLevel {
    pub fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Critical | LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Data | LogLevel::Exp | LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }

    pub fn target(self) -> &'static str {
        match self {
            LogLevel::Data => DATA_TARGET,
            LogLevel::Exp => EXP_TARGET,
            _ => module_path!(),
        }
    }
}

/// Emit `msg` stamped with the session time `t`.
pub fn log_at(level: LogLevel, t: f64, msg: &str) {
    log::log!(
        target: level.target(),
        level.as_log_level(),
        "{:.4} \t{} \t{}",
        t,
        level,
        msg
    );
}

/// Install `env_logger` with `info` as the default filter. Calling this twice is harmless.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_level_names_case_insensitively() {
        assert_eq!(LogLevel::from_str("exp").unwrap(), LogLevel::Exp);
        assert_eq!(LogLevel::from_str("WARN").unwrap(), LogLevel::Warning);
        assert!(LogLevel::from_str("verbose").is_err());
    }

    #[test]
    fn experiment_levels_have_their_own_targets() {
        assert_eq!(LogLevel::Exp.target(), EXP_TARGET);
        assert_eq!(LogLevel::Data.as_log_level(), log::Level::Info);
        assert_eq!(LogLevel::Critical.as_log_level(), log::Level::Error);
    }
}
