//! Username/password records and their on-disk form.
//!
//! Passwords are stored exactly as given; callers encrypt them first. The
//! file is a bincode stream: a header (tag, format version, record count)
//! followed by that many `AccountDetails` records.

use bincode::Options;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::{AccountDetails, AuthStatus};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const ACCOUNTS_TAG: &str = "NSACCOUNTS";
pub const ACCOUNTS_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed account file: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("not an account file (tag {0:?})")]
    BadTag(String),
    #[error("account file version {found}, expected {expected}")]
    VersionMismatch { expected: u32, found: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct FileHeader {
    tag: String,
    version: u32,
    count: u32,
}

fn file_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: Vec<AccountDetails>,
    dirty: bool,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.find(username).is_some()
    }

    /// True when the store changed since it was last saved or loaded.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn find(&self, username: &str) -> Option<&AccountDetails> {
        self.accounts.iter().find(|a| a.username == username)
    }

    fn validate(username: &str, password: &str) -> Option<AuthStatus> {
        if username.is_empty() {
            Some(AuthStatus::InvalidUsername)
        } else if password.is_empty() {
            Some(AuthStatus::InvalidPassword)
        } else {
            None
        }
    }

    pub fn add_account(&mut self, username: &str, password: &str) -> AuthStatus {
        if let Some(status) = Self::validate(username, password) {
            return status;
        }
        if self.contains(username) {
            return AuthStatus::AlreadyExists;
        }

        self.accounts.push(AccountDetails::new(username, password));
        self.dirty = true;
        AuthStatus::Good
    }

    /// Removes an account. Both fields must match.
    pub fn remove_account(&mut self, username: &str, password: &str) -> AuthStatus {
        let status = self.authenticate(username, password);
        if status == AuthStatus::Good {
            self.accounts.retain(|a| a.username != username);
            self.dirty = true;
        }
        status
    }

    pub fn authenticate(&self, username: &str, password: &str) -> AuthStatus {
        if let Some(status) = Self::validate(username, password) {
            return status;
        }
        match self.find(username) {
            None => AuthStatus::InvalidUsername,
            Some(account) if account.password != password => AuthStatus::InvalidPassword,
            Some(_) => AuthStatus::Good,
        }
    }

    pub fn save(&mut self, path: &Path) -> Result<(), StoreError> {
        let mut writer = BufWriter::new(File::create(path)?);
        let header = FileHeader {
            tag: ACCOUNTS_TAG.to_string(),
            version: ACCOUNTS_FORMAT_VERSION,
            count: self.accounts.len() as u32,
        };
        file_options().serialize_into(&mut writer, &header)?;
        for account in &self.accounts {
            file_options().serialize_into(&mut writer, account)?;
        }
        writer.flush()?;

        self.dirty = false;
        debug!("Saved {} accounts to {}", self.accounts.len(), path.display());
        Ok(())
    }

    /// Replaces the store with the file's contents. A missing file is first
    /// created empty. On any error the store is left empty.
    pub fn load(&mut self, path: &Path) -> Result<(), StoreError> {
        self.accounts.clear();
        self.dirty = false;

        if !path.exists() {
            info!("No account file at {}; creating one", path.display());
            self.save(path)?;
        }

        let accounts = Self::read(path)?;
        for account in accounts {
            if self.contains(&account.username) {
                warn!("Skipping duplicate account {}", account.username);
                continue;
            }
            self.accounts.push(account);
        }
        debug!("Loaded {} accounts from {}", self.accounts.len(), path.display());
        Ok(())
    }

    fn read(path: &Path) -> Result<Vec<AccountDetails>, StoreError> {
        let file = File::open(path)?;
        // No single value can be longer than the file holding it.
        let limit = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let header: FileHeader = file_options()
            .with_limit(limit)
            .deserialize_from(&mut reader)?;
        if header.tag != ACCOUNTS_TAG {
            return Err(StoreError::BadTag(header.tag));
        }
        if header.version != ACCOUNTS_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: ACCOUNTS_FORMAT_VERSION,
                found: header.version,
            });
        }

        (0..header.count)
            .map(|_| {
                file_options()
                    .with_limit(limit)
                    .deserialize_from(&mut reader)
                    .map_err(StoreError::from)
            })
            .collect()
    }
}
