use std::fs::{File, OpenOptions};
use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

use crate::core::config::Settings;
use crate::platform::{NativePlatform, Platform};

/// Writes every formatted line to stdout and, optionally, a log file.
#[derive(Clone)]
pub(crate) struct TeeMakeWriter {
    pub file: Option<Arc<Mutex<File>>>,
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            file: self.file.clone(),
        }
    }
}

pub(crate) struct TeeWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl std::io::Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = file.write_all(buf); // Ignored on failure, stdout still gets the line
        }
        std::io::stdout().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap_or_else(|e| e.into_inner()).flush();
        }
        std::io::stdout().flush()
    }
}

fn open_log_file(settings: &Settings) -> Option<Arc<Mutex<File>>> {
    let path = settings.log_file();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok()?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
    NativePlatform::restrict_file_permissions(&path);
    Some(Arc::new(Mutex::new(file)))
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init(settings: &Settings) {
    let level = Level::from_str(&settings.log_level).unwrap_or(Level::INFO);
    let file = if settings.log_to_file {
        open_log_file(settings)
    } else {
        None
    };
    let make_writer = TeeMakeWriter { file: file.clone() };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(file.is_none())
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
