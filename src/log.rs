use ::log::{LevelFilter, Log, Metadata, Record};
use std::io::Write;

/// Writes every enabled record to stderr as `[LEVEL target] message`.
pub struct StderrLogger(LevelFilter);

impl StderrLogger {
    /// Installs the logger once for the process.
    pub fn init(level: LevelFilter) -> Result<(), ::log::SetLoggerError> {
        ::log::set_boxed_logger(Box::new(Self(level)))?;
        ::log::set_max_level(level);
        Ok(())
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.0
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = write_record(&mut std::io::stderr().lock(), record);
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn write_record(to: &mut impl Write, record: &Record) -> std::io::Result<()> {
    writeln!(
        to,
        "[{:<5} {}] {}",
        record.level(),
        record.target(),
        record.args()
    )
}

/// Maps `-v`/`-q` counts onto a level, starting from `Info`.
pub fn level_from_verbosity(verbose: u8, quiet: u8) -> LevelFilter {
    const LEVELS: [LevelFilter; 6] = [
        LevelFilter::Off,
        LevelFilter::Error,
        LevelFilter::Warn,
        LevelFilter::Info,
        LevelFilter::Debug,
        LevelFilter::Trace,
    ];
    let i = (3 + verbose as isize - quiet as isize).clamp(0, LEVELS.len() as isize - 1);
    LEVELS[i as usize]
}

#[test]
fn test_write_record() {
    let mut buf = Vec::new();
    write_record(
        &mut buf,
        &Record::builder()
            .level(::log::Level::Warn)
            .target("bert_transfer::convert")
            .args(format_args!("bert-base-uncased failed"))
            .build(),
    )
    .unwrap();
    assert_eq!(
        String::from_utf8(buf).unwrap(),
        "[WARN  bert_transfer::convert] bert-base-uncased failed\n"
    );
}

#[test]
fn test_init_once() {
    assert!(StderrLogger::init(LevelFilter::Warn).is_ok());
    assert_eq!(::log::max_level(), LevelFilter::Warn);
    assert!(StderrLogger::init(LevelFilter::Info).is_err());
}

#[test]
fn test_level_from_verbosity() {
    assert_eq!(level_from_verbosity(0, 0), LevelFilter::Info);
    assert_eq!(level_from_verbosity(1, 0), LevelFilter::Debug);
    assert_eq!(level_from_verbosity(9, 0), LevelFilter::Trace);
    assert_eq!(level_from_verbosity(0, 2), LevelFilter::Error);
    assert_eq!(level_from_verbosity(0, 9), LevelFilter::Off);
}
