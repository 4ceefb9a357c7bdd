use super::Enrollment;
use crate::{connection::LoginType, error::ErrorKind};

impl Enrollment {
    /// Sets the account password in the realm over kpasswd. An admin
    /// login uses set-password on the computer principal; a computer
    /// login changes its own password with a `kadmin/changepw` ticket.
    pub(super) fn set_account_password(&mut self) -> anyhow::Result<()> {
        let principal = match &self.computer_principal {
            Some(principal) => principal.clone(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No computer account principal derived".to_owned(),
                ))
            }
        };
        let sam = self.computer_sam.clone().unwrap_or_default();
        let login = self.conn.login_type();

        let result = {
            let password = match self.computer_password.value() {
                Some(password) => password,
                None => {
                    return Err(self.fail(
                        ErrorKind::Unexpected,
                        "No computer account password derived".to_owned(),
                    ))
                }
            };
            let mut kdc = self
                .conn
                .kdc()
                .lock()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            match login {
                LoginType::ComputerAccount => {
                    kdc.change_password(&principal, password.as_bytes())
                }
                LoginType::UserAccount => kdc.set_password(&principal, password.as_bytes()),
            }
        };

        let verb = match login {
            LoginType::ComputerAccount => "change",
            LoginType::UserAccount => "set",
        };

        match result {
            Err(err) => Err(self.fail(
                ErrorKind::Directory,
                format!(
                    "Couldn't {} password for computer account: {}: {}",
                    verb, sam, err
                ),
            )),
            Ok(outcome) if !outcome.succeeded() => Err(self.fail(
                ErrorKind::Credentials,
                format!(
                    "Cannot {} computer password: {}",
                    verb,
                    outcome.describe()
                ),
            )),
            Ok(_) => {
                log::info!("Set password for computer account: {}", sam);
                Ok(())
            }
        }
    }
}
