use std::fmt::Display;

use colored::Colorize;
use log::Level;
use watchroom_collab::RuntimeConfig;

/// External crates only need to log warnings and errors.
const ALLOWED_EXTERNAL_LEVELS: [Level; 2] = [Level::Warn, Level::Error];

pub fn init_logger(config: &RuntimeConfig) {
    let level = config.log_level.parse().unwrap_or(log::LevelFilter::Info);
    let mut dispatch = fern::Dispatch::new().level(level);

    dispatch = if config.is_production() {
        dispatch.format(move |out, message, record| {
            let target = Target::from_str(record.target());
            let entry = serde_json::json!({
                "level": record.level().to_string(),
                "target": target.name(),
                "message": message.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });

            out.finish(format_args!("{entry}"))
        })
    } else {
        dispatch.format(move |out, message, record| {
            let target = Target::from_str(record.target());
            let now = chrono::Local::now();

            out.finish(format_args!(
                "{:^5} {} {:^8} {}",
                level_to_string(&record.level()),
                now.format("%H:%M:%S").to_string().bright_black(),
                target,
                message
            ))
        })
    };

    dispatch = dispatch.filter(|meta| {
        let target = Target::from_str(meta.target());
        let is_severe = ALLOWED_EXTERNAL_LEVELS.contains(&meta.level());

        target.is_local() || is_severe
    });

    dispatch = dispatch.chain(std::io::stdout());

    if config.log_to_files {
        if let Some(path) = &config.combined_log_path {
            if let Ok(file) = fern::log_file(path) {
                dispatch = dispatch.chain(file);
            }
        }

        if let Some(path) = &config.error_log_path {
            if let Ok(file) = fern::log_file(path) {
                dispatch = dispatch.chain(
                    fern::Dispatch::new()
                        .level(log::LevelFilter::Warn)
                        .chain(file),
                );
            }
        }
    }

    dispatch.apply().expect("logging is initialized")
}

enum Target {
    External(String),
    Server,
    Collab,
    Store,
    Core,
}

impl Target {
    fn from_str(str: &str) -> Self {
        let mut split = str.split("::");
        let module = split.next().unwrap();

        match module {
            "watchroom_core" => Self::Core,
            "watchroom_store" => Self::Store,
            "watchroom_collab" => Self::Collab,
            "watchroom_server" => Self::Server,
            other => Target::External(other.to_string()),
        }
    }

    fn is_local(&self) -> bool {
        !matches!(self, Self::External(_))
    }

    fn name(&self) -> &str {
        match self {
            Target::External(x) => x.as_str(),
            Target::Server => "SERVER",
            Target::Collab => "COLLAB",
            Target::Store => "STORE",
            Target::Core => "CORE",
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            Target::External(x) => x.as_str().clear(),
            Target::Server => "SERVER".bright_green(),
            Target::Collab => "COLLAB".bright_purple(),
            Target::Store => "STORE".cyan(),
            Target::Core => "CORE".blue(),
        };

        Display::fmt(&result, f)
    }
}

fn level_to_string(level: &Level) -> String {
    match level {
        Level::Error => " ERR ".black().on_red().bold().to_string(),
        Level::Warn => " WRN ".black().on_yellow().bold().to_string(),
        Level::Info => " INF ".black().on_blue().bold().to_string(),
        Level::Debug => " DBG ".white().on_black().to_string(),
        Level::Trace => " TRC ".to_string(),
    }
}
