use std::sync::Mutex;
use std::time::Instant;

use crate::routines::output::OutputFile;
use crate::routines::settings::Settings;
use eyre::{Result, WrapErr};
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Setup logging for a run
///
/// The level is taken from `log.level` and accepts anything [EnvFilter] does,
/// e.g. `debug` or `eivboot=trace`. Messages always go to `log.file` inside the
/// output folder, and to stdout as well unless `log.stdout` is `false`.
///
/// Fails if a global subscriber was already installed.
pub fn setup_log(settings: &Settings) -> Result<()> {
    let env_filter = EnvFilter::try_new(settings.log.level.as_str())
        .wrap_err_with(|| format!("Invalid log level: {}", settings.log.level))?;

    let timestamper = CompactTimestamp {
        start: Instant::now(),
    };

    let subscriber = Registry::default().with(env_filter);

    let outputfile = OutputFile::new(&settings.output.path, &settings.log.file)?;
    let file = outputfile
        .file()
        .try_clone()
        .wrap_err("Failed to open the log file")?;

    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_timer(timestamper.clone());

    let stdout_layer = settings.log.stdout.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(false)
            .with_timer(timestamper.clone())
    });

    subscriber
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .wrap_err("Failed to install the log subscriber")?;

    tracing::debug!("Logging to {:?}", outputfile.relative_path());
    Ok(())
}

/// Elapsed time since logging started, as `00h 00m 00s`
#[derive(Clone)]
struct CompactTimestamp {
    start: Instant,
}

impl FormatTime for CompactTimestamp {
    fn format_time(
        &self,
        w: &mut tracing_subscriber::fmt::format::Writer<'_>,
    ) -> Result<(), std::fmt::Error> {
        write!(w, "{}", compact(self.start.elapsed().as_secs()))
    }
}

fn compact(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{:02}h {:02}m {:02}s", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::compact;

    #[test]
    fn test_compact_timestamp() {
        assert_eq!(compact(0), "00h 00m 00s");
        assert_eq!(compact(3725), "01h 02m 05s");
    }
}
