use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;

/// Writes `[LEVEL] target: message` lines to stderr.
pub struct StderrLogger {
    max_level: LevelFilter,
}

impl StderrLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Maps the number of `-v` flags to a level, starting at warnings.
    #[must_use]
    pub const fn from_verbosity(verbose: u8) -> Self {
        let max_level = match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };
        Self::new(max_level)
    }

    /// Installs the logger. Call once, before any log output.
    pub fn init(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // A failed write to stderr drops the line.
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn verbosity_levels() {
        assert_eq!(StderrLogger::from_verbosity(0).max_level, LevelFilter::Warn);
        assert_eq!(StderrLogger::from_verbosity(2).max_level, LevelFilter::Debug);
        assert_eq!(StderrLogger::from_verbosity(9).max_level, LevelFilter::Trace);
    }

    #[test]
    fn filters_by_level() {
        let logger = StderrLogger::new(LevelFilter::Info);
        let info = Metadata::builder().level(Level::Info).build();
        let debug = Metadata::builder().level(Level::Debug).build();
        assert!(logger.enabled(&info));
        assert!(!logger.enabled(&debug));
    }
}
