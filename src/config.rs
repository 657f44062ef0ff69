//! Loads Internet Archive S3-like API credentials from `~/.ia`, the same INI file and
//! `[s3]` section used by the official `ia` command-line tool.

use crate::{Error, Result};
use ini::Ini;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub access: String,
    pub secret: String,
}

impl Credentials {
    /// Renders the `Authorization` header value for every request against the service.
    pub fn auth_header(&self) -> String {
        format!("LOW {}:{}", self.access, self.secret)
    }

    pub fn load_default() -> Result<Self> {
        let path = dirs::home_dir()
            .ok_or(Error::MissingCredentials)?
            .join(".ia");
        Self::load_from(&path)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let conf = Ini::load_from_file(path).map_err(|_| Error::MissingCredentials)?;
        let section = conf.section(Some("s3")).ok_or(Error::MissingCredentials)?;
        let access = section.get("access").ok_or(Error::MissingCredentials)?;
        let secret = section.get("secret").ok_or(Error::MissingCredentials)?;
        Ok(Self {
            access: access.to_string(),
            secret: secret.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_valid_credentials() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[s3]\naccess = abc\nsecret = def\n").unwrap();
        let creds = Credentials::load_from(&file.path().to_path_buf()).unwrap();
        assert_eq!(creds.access, "abc");
        assert_eq!(creds.secret, "def");
        assert_eq!(creds.auth_header(), "LOW abc:def");
    }

    #[test]
    fn missing_section_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[other]\nfoo = bar\n").unwrap();
        assert!(Credentials::load_from(&file.path().to_path_buf()).is_err());
    }
}
