#![allow(dead_code)]

use lockbox_datastore::{ApplicationKey, Entry, InitializeOptions, ItemDraft, LoginEntry};

pub const APP_KEY: &str = "test application key";
pub const SALT: &[u8] = b"test salt value";

pub fn app_key() -> ApplicationKey {
    ApplicationKey::from(APP_KEY)
}

pub fn initialize_options() -> InitializeOptions {
    InitializeOptions::new(APP_KEY).salt(SALT)
}

pub fn login_draft(title: &str, username: &str, password: &str) -> ItemDraft {
    ItemDraft::new(title, Entry::login(username, password))
}

pub fn sample_draft() -> ItemDraft {
    login_draft("My Item", "foo", "bar")
}

pub fn login_with_notes(notes: &str) -> Entry {
    Entry::Login(LoginEntry {
        username: "foo".to_string(),
        password: "bar".to_string(),
        notes: notes.to_string(),
    })
}
