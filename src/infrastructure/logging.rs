use crate::domain::settings::LogSettings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub struct LoggingGuard {
    // Dropping the guard flushes the file writer
    _guards: Vec<WorkerGuard>,
}

/// Map the configured rotation name; unknown names rotate daily
pub fn parse_rotation(rotation: &str) -> Rotation {
    match rotation.trim().to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// Tracing target for raw bytes exchanged with the mount
pub const WIRE_TARGET: &str = "star_tracker::wire";

/// Filter directives for the configured levels.
///
/// Wire traffic stays off unless `wire_level` is set, so a global `trace`
/// level does not dump every position report.
pub fn filter_directives(settings: &LogSettings) -> String {
    let level = match settings.level.trim() {
        "" => "info",
        level => level,
    };
    let wire = settings
        .wire_level
        .as_deref()
        .map(str::trim)
        .filter(|wire| !wire.is_empty())
        .unwrap_or("off");
    format!("{level},{WIRE_TARGET}={wire}")
}

/// Level filter: `RUST_LOG` wins over the configured levels
fn level_filter(settings: &LogSettings) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directives = filter_directives(settings);
    EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("Invalid log levels {:?}: {}", directives, e);
        EnvFilter::new(format!("info,{WIRE_TARGET}=off"))
    })
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    // Console layer
    let console_layer = if settings.console_logging_enabled {
        Some(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target)
                .with_ansi(settings.ansi_colors),
        )
    } else {
        None
    };

    // File layer
    let file_layer = if settings.file_logging_enabled {
        let file_appender = tracing_appender::rolling::RollingFileAppender::new(
            parse_rotation(&settings.rotation),
            &settings.log_dir,
            &settings.file_name_prefix,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter(settings))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging initialized (level={}, wire={}, file={})",
        settings.level,
        settings.wire_level.as_deref().unwrap_or("off"),
        settings.file_logging_enabled
    );

    Ok(LoggingGuard { _guards: guards })
}
