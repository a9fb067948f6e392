use nanoid::nanoid;

use crate::{
    config::KeysConfig,
    errors::{AppError, AppResult},
    models::StoredFile,
    repository::RecordStore,
};

/// Issues download keys and delete keys from a configured alphabet.
///
/// nanoid draws with a bit mask and rejects out-of-range bytes, so every
/// character of the alphabet is equally likely.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    alphabet: Vec<char>,
    key_length: usize,
    delete_key_length: usize,
    max_attempts: u32,
}

impl KeyGenerator {
    pub fn new(cfg: &KeysConfig) -> Self {
        Self {
            alphabet: cfg.alphabet.chars().collect(),
            key_length: cfg.key_length,
            delete_key_length: cfg.delete_key_length,
            max_attempts: cfg.max_attempts,
        }
    }

    fn candidate(&self, len: usize) -> String {
        nanoid!(len, &self.alphabet)
    }

    pub fn new_delete_key(&self) -> String {
        self.candidate(self.delete_key_length)
    }

    /// Picks an unused key and reserves it by inserting `template` under it.
    ///
    /// The existence check and the write are one statement, two concurrent
    /// uploads can never end up with the same key.
    pub async fn new_key(&self, records: &RecordStore, template: &StoredFile) -> AppResult<String> {
        for attempt in 1..=self.max_attempts {
            let key = self.candidate(self.key_length);
            let reservation = StoredFile {
                key: key.clone(),
                ..template.clone()
            };

            if records.insert_if_absent(&reservation).await? {
                return Ok(key);
            }
            tracing::warn!(attempt, "generated key collided with an existing record");
        }

        Err(AppError::KeySpaceExhausted {
            attempts: self.max_attempts,
        })
    }
}

pub fn request_id() -> String {
    nanoid!(10)
}
