//! The two-step `getnonce` / `authenticate` handshake (MongoDB-CR).

use bson::doc;
use md5::{Digest, Md5};

use crate::command::true1;
use crate::errors::DbError;
use crate::session::Session;

/// Digest of the user's password as the server stores it.
#[must_use]
pub fn pw_hash(user: &str, password: &str) -> String {
    hex::encode(Md5::digest(format!("{user}:mongo:{password}")))
}

/// Digest for one authenticate exchange, salted with the server's nonce.
#[must_use]
pub fn pw_key(nonce: &str, user: &str, password: &str) -> String {
    hex::encode(Md5::digest(format!("{nonce}{user}{}", pw_hash(user, password))))
}

impl Session {
    /// Authenticate against the ambient database.
    ///
    /// Authentication is per connection; a reconnect must authenticate
    /// again.
    pub fn auth(&self, user: &str, password: &str) -> Result<bool, DbError> {
        let nonce = self
            .run_command1("getnonce")?
            .get_str("nonce")
            .expect("getnonce reply carried no nonce")
            .to_string();
        let reply = self.run_command(doc! {
            "authenticate": 1,
            "user": user,
            "nonce": nonce.clone(),
            "key": pw_key(&nonce, user, password),
        })?;
        Ok(true1(&reply, "ok"))
    }
}
