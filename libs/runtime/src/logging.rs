//! Global `tracing` setup: console output, optional rotating JSON log file and
//! a level that can be changed after startup.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use parking_lot::Mutex;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::settings::{LogFormat, LogSettings};

type FilterLayer = reload::Layer<EnvFilter, Registry>;
type Filtered = tracing_subscriber::layer::Layered<FilterLayer, Registry>;
type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync + 'static>;

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

const MIB: u64 = 1024 * 1024;

/// Plain levels (`debug`) and full directives (`info,sqlx=warn`) are both
/// accepted; anything unparsable falls back to `info`.
fn build_filter(level: &str) -> EnvFilter {
    let level = level.trim();
    let directive = match level.to_ascii_lowercase().as_str() {
        "" => "info".to_string(),
        "none" => "off".to_string(),
        "warning" => "warn".to_string(),
        _ => level.to_string(),
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|_| {
        eprintln!("invalid log level '{level}', falling back to 'info'");
        EnvFilter::new("info")
    })
}

/// Size-rotated log file shared by every event writer.
struct RotatingFile(Mutex<FileRotate<AppendTimestamp>>);

impl RotatingFile {
    fn open(path: &Path, max_bytes: usize, max_backups: usize) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let rotate = FileRotate::new(
            path,
            AppendTimestamp::default(FileLimit::MaxFiles(max_backups.max(1))),
            ContentLimit::BytesSurpassed(max_bytes),
            Compression::None,
            #[cfg(unix)]
            None,
        );
        Ok(Self(Mutex::new(rotate)))
    }
}

impl Write for &RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for RotatingFile {
    type Writer = &'a RotatingFile;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    let layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    match format {
        LogFormat::Text => layer.with_ansi(io::stdout().is_terminal()).boxed(),
        LogFormat::Json => layer.json().with_ansi(false).boxed(),
    }
}

/// JSON lines into `log.file`, or nothing when no file is configured or it
/// cannot be opened.
fn file_layer(settings: &LogSettings, base_dir: &Path) -> Option<BoxedLayer> {
    let file = settings.file.trim();
    if file.is_empty() {
        return None;
    }

    let path = resolve_log_path(file, base_dir);
    let max_bytes = usize::try_from(settings.max_size_mb.max(1).saturating_mul(MIB)).unwrap_or(usize::MAX);
    match RotatingFile::open(&path, max_bytes, settings.max_backups) {
        Ok(writer) => Some(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(writer)
                .boxed(),
        ),
        Err(e) => {
            eprintln!("cannot open log file '{}': {e}; logging to console only", path.display());
            None
        }
    }
}

/// Install the global subscriber from `settings`.
///
/// Only the first call builds the subscriber; later calls just re-apply the
/// level, since a process has a single global dispatcher. Relative log file
/// paths are resolved against `base_dir`.
pub fn init_logging(settings: &LogSettings, base_dir: &Path) {
    if FILTER.get().is_some() {
        set_log_level(&settings.level);
        return;
    }

    // Bridge `log` records from dependencies into tracing
    let _ = tracing_log::LogTracer::init();

    let (filter, handle) = reload::Layer::new(build_filter(&settings.level));
    let layers: Vec<BoxedLayer> = std::iter::once(console_layer(settings.format))
        .chain(file_layer(settings, base_dir))
        .collect();

    if Registry::default().with(filter).with(layers).try_init().is_ok() {
        let _ = FILTER.set(handle);
    }
}

/// Change the global level at runtime. No-op until [`init_logging`] has run.
pub fn set_log_level(level: &str) {
    let Some(handle) = FILTER.get() else {
        return;
    };
    if let Err(e) = handle.reload(build_filter(level)) {
        tracing::warn!(error = %e, level, "failed to update log level");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn filter_accepts_levels_and_directives() {
        assert_eq!(build_filter("debug").to_string(), "debug");
        assert_eq!(build_filter("").to_string(), "info");
        assert_eq!(build_filter("none").to_string(), "off");
        assert_eq!(build_filter("warning").to_string(), "warn");
        assert!(build_filter("info,sqlx=warn").to_string().contains("sqlx=warn"));
    }

    #[test]
    fn relative_log_paths_resolve_against_base_dir() {
        let tmp = tempdir().unwrap();
        let resolved = resolve_log_path("logs/test.log", tmp.path());
        assert!(resolved.starts_with(tmp.path()));
        assert!(resolved.ends_with("logs/test.log"));

        let abs = tmp.path().join("abs.log");
        assert_eq!(resolve_log_path(abs.to_str().unwrap(), Path::new("/elsewhere")), abs);
    }

    #[test]
    fn rotating_file_creates_parent_and_accepts_writes() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested/dir/app.log");

        let file = RotatingFile::open(&path, 128 * 1024, 3).unwrap();
        let mut writer = fmt::MakeWriter::make_writer(&file);
        writer.write_all(b"{\"msg\":\"hi\"}\n").unwrap();
        writer.flush().unwrap();

        assert!(std::fs::read_to_string(&path).unwrap().contains("hi"));
    }

    #[test]
    fn file_layer_only_when_configured() {
        let tmp = tempdir().unwrap();
        assert!(file_layer(&LogSettings::default(), tmp.path()).is_none());

        let settings = LogSettings {
            file: "logs/app.log".into(),
            ..Default::default()
        };
        assert!(file_layer(&settings, tmp.path()).is_some());
        assert!(tmp.path().join("logs").is_dir());
    }
}
