use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use usr_dataset::Timestamp;

/// Writes everything to stdout and, when set, to a log file.
struct TeeWriter {
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// `YY-MM-DD HH:MM:SS.mmm : message`
pub fn format_line(stamp: &Timestamp, message: &dyn std::fmt::Display) -> String {
    format!("{} : {message}", stamp.log_stamp())
}

/// Log to stdout and `<log_dir>/<logger_name>.log`. Defaults to the `info` level,
/// `RUST_LOG` overrides it.
///
/// Returns the log file path.
pub fn init_logger(log_dir: Option<&Path>, logger_name: &str) -> anyhow::Result<Option<PathBuf>> {
    let log_file = log_dir
        .map(|dir| -> anyhow::Result<_> {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let path = dir.join(format!("{logger_name}.log"));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Ok((path, file))
        })
        .transpose()?;
    let (path, file) = log_file.unzip();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(TeeWriter { file })))
        .format(|buf, record| writeln!(buf, "{}", format_line(&Timestamp::now(), record.args())))
        .try_init()
        .context("Logger was already initialized")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::format_line;
    use usr_dataset::Timestamp;

    #[test]
    fn lines_carry_a_short_timestamp() {
        let stamp = Timestamp::from_system_time(std::time::SystemTime::UNIX_EPOCH);
        assert_eq!(format_line(&stamp, &"hello"), "70-01-01 00:00:00.000 : hello");
    }
}
