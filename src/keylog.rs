//! TLS key logging for packet capture analysis
//!
//! Writes secrets in the NSS key log format understood by Wireshark.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use parking_lot::Mutex;
use tracing::warn;

/// Appends `LABEL <client_random> <secret>` lines to a file.
#[derive(Debug)]
pub struct KeyLogFile {
    file: Mutex<File>,
}

impl KeyLogFile {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

impl rustls::KeyLog for KeyLogFile {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        let line = format!("{} {} {}\n", label, hex(client_random), hex(secret));
        if let Err(e) = self.file.lock().write_all(line.as_bytes()) {
            warn!("Failed to write key log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::KeyLog;
    use tempfile::tempdir;

    #[test]
    fn test_nss_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys").join("sslkeys.log");
        let log = KeyLogFile::open(&path).unwrap();

        log.log("CLIENT_TRAFFIC_SECRET_0", &[0xab, 0x01], &[0xff]);
        log.log("SERVER_TRAFFIC_SECRET_0", &[0x00], &[0x10, 0x20]);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "CLIENT_TRAFFIC_SECRET_0 ab01 ff");
        assert_eq!(lines[1], "SERVER_TRAFFIC_SECRET_0 00 1020");
    }
}
