use crate::{Enctype, Keyblock, Kvno, Principal};

/// The outcome of a kpasswd exchange: the RFC 3244 protocol result code,
/// its short string form, and the extended human-readable status Active
/// Directory attaches.
#[derive(Debug, Clone)]
pub struct PasswordOutcome {
    pub code: i32,
    pub code_string: String,
    pub message: Option<String>,
}

impl PasswordOutcome {
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }

    pub fn describe(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {}", self.code_string, message),
            None => self.code_string.clone(),
        }
    }
}

/// The narrow surface the engine consumes from the realm library. The
/// connection supplies an implementation bound to its Kerberos context
/// and credentials; errors are transport or library failures, while
/// protocol-level refusals come back inside [`PasswordOutcome`] or as
/// `Ok(false)` from the ticket probe.
pub trait KdcClient {
    /// Derives a key for `enctype` from a password and salt.
    fn string_to_key(
        &mut self,
        enctype: Enctype,
        password: &[u8],
        salt: &[u8],
    ) -> anyhow::Result<Keyblock>;

    /// Performs an AS-REQ as `principal`, answering preauthentication
    /// with `key` at version `kvno`. `Ok(true)` means the realm accepted
    /// the key; `Ok(false)` means it was rejected.
    fn request_initial_ticket(
        &mut self,
        principal: &Principal,
        kvno: Kvno,
        key: &Keyblock,
    ) -> anyhow::Result<bool>;

    /// kpasswd set-password on `target`, authenticated by the login
    /// credential cache.
    fn set_password(
        &mut self,
        target: &Principal,
        new_password: &[u8],
    ) -> anyhow::Result<PasswordOutcome>;

    /// kpasswd change-password for `target`, authenticated by a
    /// `kadmin/changepw` ticket obtained with the account's current
    /// credentials.
    fn change_password(
        &mut self,
        target: &Principal,
        new_password: &[u8],
    ) -> anyhow::Result<PasswordOutcome>;
}
