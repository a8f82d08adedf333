// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use std::{
    collections::HashMap,
    sync::RwLock,
};

/// Thread-safe credential store for `HELLO` and `AUTH` commands.
pub struct AuthStore {
    /// Store state.
    inner: RwLock<AuthStoreInner>,
}

struct AuthStoreInner {
    /// Username to password.
    users: HashMap<String, String>,

    /// Whether authentication is required for new connections.
    required: bool,
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStore {
    /// Create new, empty [`AuthStore`] with authentication disabled.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AuthStoreInner {
                users: HashMap::new(),
                required: false,
            }),
        }
    }

    /// Whether authentication is required.
    pub fn is_enabled(&self) -> bool {
        self.inner.read().expect("lock poisoned").required
    }

    /// Enable or disable required authentication.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.write().expect("lock poisoned").required = enabled;
    }

    /// Add or replace a user.
    ///
    /// Fails on an empty username.
    pub fn add_user(&self, username: &str, password: &str) -> Result<(), ()> {
        if username.is_empty() {
            return Err(());
        }

        self.inner
            .write()
            .expect("lock poisoned")
            .users
            .insert(username.to_string(), password.to_string());

        Ok(())
    }

    /// Remove a user.
    ///
    /// Fails if the user does not exist.
    pub fn remove_user(&self, username: &str) -> Result<(), ()> {
        self.inner
            .write()
            .expect("lock poisoned")
            .users
            .remove(username)
            .map(|_| ())
            .ok_or(())
    }

    /// Whether a user exists.
    pub fn has_user(&self, username: &str) -> bool {
        self.inner.read().expect("lock poisoned").users.contains_key(username)
    }

    /// Sorted usernames, without passwords.
    pub fn list_users(&self) -> Vec<String> {
        let mut users = self
            .inner
            .read()
            .expect("lock poisoned")
            .users
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        users.sort();
        users
    }

    /// Check a password against the stored one, in constant time.
    pub fn check_password(&self, username: &str, password: &str) -> bool {
        let inner = self.inner.read().expect("lock poisoned");

        match inner.users.get(username) {
            Some(stored) => constant_time_eq(stored.as_bytes(), password.as_bytes()),
            None => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
