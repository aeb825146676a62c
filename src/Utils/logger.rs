//! Logging setup, statistics files and metric tables.
use chrono::Local;
use csv::{Writer, WriterBuilder};
use log::info;
use simplelog::*;
use std::fs::{File, OpenOptions, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};
use tabled::{builder::Builder, settings::Style};

/// Where log messages go. Initialising twice is silently ignored by `simplelog`.
#[derive(Debug, Clone)]
pub struct LoggerSettings {
    pub log_level: Option<LevelFilter>,
    pub log_to_file: Option<String>,
    pub log_to_console: bool,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        LoggerSettings { log_level: Some(LevelFilter::Info), log_to_file: None, log_to_console: true }
    }
}

impl LoggerSettings {
    pub fn set_log_level(&mut self, level: LevelFilter) {
        self.log_level = Some(level);
        self.init_logger();
    }

    /// Enable logging to file
    pub fn set_log_file(&mut self, filename: String) {
        self.log_to_file = Some(filename);
        self.init_logger();
    }

    /// Log file with a time stamp in its name, placed in `dir`.
    pub fn set_log_dir(&mut self, dir: &Path) {
        let date_and_time = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let name = dir.join(format!("log_{}.txt", date_and_time));
        self.set_log_file(name.to_string_lossy().into_owned());
    }

    /// Enable/disable console logging
    pub fn set_console_logging(&mut self, enabled: bool) {
        self.log_to_console = enabled;
        self.init_logger();
    }

    pub fn init_logger(&self) {
        let level = self.log_level.unwrap_or(LevelFilter::Info);
        let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
        if self.log_to_console {
            loggers.push(TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto));
        }
        if let Some(ref filename) = self.log_to_file {
            if let Ok(file) = File::create(filename) {
                loggers.push(WriteLogger::new(level, Config::default(), file));
            }
        }
        if !loggers.is_empty() {
            let _ = CombinedLogger::init(loggers);
        }
    }
}

/// Tab separated statistics file, one row per call of `write_row`.
pub struct StatisticsWriter {
    path: PathBuf,
    writer: Writer<File>,
}

impl StatisticsWriter {
    /// Creates `dir/file_name` and writes the header; on restart the file is opened for appending
    /// and no header is written.
    pub fn create(dir: &Path, file_name: &str, header: &[&str], restart: bool) -> io::Result<Self> {
        create_dir_all(dir)?;
        let path = dir.join(file_name);
        let file = if restart {
            OpenOptions::new().create(true).append(true).open(&path)?
        } else {
            File::create(&path)?
        };
        let mut writer = WriterBuilder::new().delimiter(b'\t').has_headers(false).from_writer(file);
        if !restart {
            writer.write_record(header).map_err(io::Error::other)?;
            writer.flush()?;
        }
        Ok(StatisticsWriter { path, writer })
    }

    pub fn write_row(&mut self, row: &[String]) -> io::Result<()> {
        self.writer.write_record(row).map_err(io::Error::other)?;
        self.writer.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for StatisticsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StatisticsWriter({})", self.path.display())
    }
}

/// Time values with four decimals, step sizes switch to scientific notation below 1e-5.
pub fn format_time(t: f64) -> String {
    format!("{:.4}", t)
}

pub fn format_step_size(dt: f64) -> String {
    if dt < 1e-5 { format!("{:.8e}", dt) } else { format!("{:.6}", dt) }
}

/// Logs the metrics as a table and returns them as `key=value` lines.
pub fn log_metrics(title: &str, metrics: &[(&str, String)]) -> Vec<String> {
    let mut builder = Builder::default();
    builder.push_record(["Metric", "Value"]);
    for (key, value) in metrics {
        builder.push_record([key.to_string(), value.clone()]);
    }
    let mut table = builder.build();
    table.with(Style::modern_rounded());
    info!("\n \n {} \n \n {}", title, table);
    metrics.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::read_to_string;

    #[test]
    fn statistics_file_appends_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut w = StatisticsWriter::create(dir.path(), "stats.tsv", &["Time [s]", "Steps"], false).unwrap();
            w.write_row(&[format_time(1.0), "3".to_string()]).unwrap();
        }
        {
            let mut w = StatisticsWriter::create(dir.path(), "stats.tsv", &["Time [s]", "Steps"], true).unwrap();
            w.write_row(&[format_time(2.0), "7".to_string()]).unwrap();
        }
        let text = read_to_string(dir.path().join("stats.tsv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["Time [s]\tSteps", "1.0000\t3", "2.0000\t7"]);
    }

    #[test]
    fn metrics_lines() {
        let lines = log_metrics("METRICS", &[("IntegratorSteps", "12".to_string())]);
        assert_eq!(lines, vec!["IntegratorSteps=12".to_string()]);
        assert_eq!(format_step_size(1e-6), "1.00000000e-6");
        assert_eq!(format_step_size(0.5), "0.500000");
    }
}
