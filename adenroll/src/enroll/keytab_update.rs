use super::Enrollment;
use crate::{
    error::ErrorKind,
    keytab::{KeytabEntry, Kvno},
    principal::{w2k3_machine_salt, Principal},
    Enctype, Timestamp,
};
use chrono::Utc;
use std::sync::Arc;

impl Enrollment {
    /// Rewrites the keytab for the account principal and every service
    /// principal: stale versions go away, and fresh keys are derived
    /// from the new password with the salt the realm actually uses.
    pub(super) fn update_keytab_for_principals(&mut self) -> anyhow::Result<()> {
        let principals = self.keytab_principals.clone();
        if principals.is_empty() {
            return Err(self.fail(
                ErrorKind::Unexpected,
                "No principals prepared for the keytab".to_owned(),
            ));
        }

        // AD derives every key of an account with the same salt, so one
        // discovery pass serves all principals.
        let mut selected_salt: Option<Vec<u8>> = None;
        for principal in &principals {
            let name = principal.unparse_name().unwrap_or_default();
            self.add_principal_to_keytab(principal, &name, &mut selected_salt)?;
        }
        Ok(())
    }

    fn add_principal_to_keytab(
        &mut self,
        principal: &Principal,
        principal_name: &str,
        selected_salt: &mut Option<Vec<u8>>,
    ) -> anyhow::Result<()> {
        let kvno = self.kvno();
        let keytab_name = self.keytab_name.clone().unwrap_or_default();
        let keytab = match &self.keytab {
            Some(keytab) => Arc::clone(keytab),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No keytab opened for the enrollment".to_owned(),
                ))
            }
        };

        // Keep entries one version behind the new kvno so sessions
        // authenticated with the previous key outlive the join.
        let removed = {
            let keytab = keytab.lock().map_err(|e| anyhow::anyhow!("{}", e));
            match keytab {
                Ok(mut keytab) => keytab.remove_entries(&|entry| {
                    entry.principal.matches(principal) && entry.vno + 1 != kvno
                }),
                Err(err) => Err(err),
            }
        };
        match removed {
            Ok(count) if count > 0 => {
                log::info!("Cleared old entries from keytab: {}", keytab_name)
            }
            Ok(_) => (),
            Err(err) => {
                return Err(self.fail(
                    ErrorKind::Fail,
                    format!("Couldn't update keytab: {}: {}", keytab_name, err),
                ))
            }
        }

        let password = match self.computer_password.value() {
            Some(password) => password.as_bytes().to_vec(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No computer account password derived".to_owned(),
                ))
            }
        };
        let enctypes = self.keytab_enctypes().to_vec();

        if selected_salt.is_none() {
            let salts = self.build_principal_salts(principal);
            let salt =
                self.discover_salt(principal, principal_name, kvno, &password, &enctypes, salts)?;
            log::info!("Discovered which keytab salt to use");
            *selected_salt = Some(salt);
        }
        let salt = selected_salt.clone().unwrap_or_default();

        let timestamp = Utc::now().timestamp() as Timestamp;
        for &enctype in &enctypes {
            let key = {
                let kdc = self.conn.kdc().lock().map_err(|e| anyhow::anyhow!("{}", e));
                match kdc {
                    Ok(mut kdc) => kdc.string_to_key(enctype, &password, &salt),
                    Err(err) => Err(err),
                }
            };
            let key = match key {
                Ok(key) => key,
                Err(err) => {
                    return Err(self.fail(
                        ErrorKind::Fail,
                        format!("Couldn't add keytab entries: {}: {}", keytab_name, err),
                    ))
                }
            };

            let entry = KeytabEntry {
                principal: principal.clone(),
                timestamp,
                vno: kvno,
                key,
            };
            let written = {
                let keytab = keytab.lock().map_err(|e| anyhow::anyhow!("{}", e));
                match keytab {
                    Ok(mut keytab) => keytab.add_entry(&entry),
                    Err(err) => Err(err),
                }
            };
            if let Err(err) = written {
                return Err(self.fail(
                    ErrorKind::Fail,
                    format!("Couldn't add keytab entries: {}: {}", keytab_name, err),
                ));
            }
        }

        log::info!(
            "Added the entries to the keytab: {}: {}",
            principal_name,
            keytab_name
        );
        Ok(())
    }

    /// The candidates a domain may have salted the account keys with:
    /// the standard Kerberos salt, the Windows 2003 machine salt, and
    /// no salt at all, in the order they are worth trying.
    fn build_principal_salts(&self, principal: &Principal) -> Vec<Vec<u8>> {
        let computer_name = self.computer_name.value().map(String::as_str).unwrap_or("");
        vec![
            principal.canonical_salt(),
            w2k3_machine_salt(self.conn.domain_realm(), computer_name),
            vec![],
        ]
    }

    // Which salt the realm uses is not advertised anywhere; the only way
    // to find out is to derive a key per candidate and authenticate with
    // it. As a side effect this proves the new password works.
    fn discover_salt(
        &self,
        principal: &Principal,
        principal_name: &str,
        kvno: Kvno,
        password: &[u8],
        enctypes: &[Enctype],
        salts: Vec<Vec<u8>>,
    ) -> anyhow::Result<Vec<u8>> {
        for salt in salts {
            for &enctype in enctypes {
                let attempt = {
                    let mut kdc = self
                        .conn
                        .kdc()
                        .lock()
                        .map_err(|e| anyhow::anyhow!("{}", e))?;
                    match kdc.string_to_key(enctype, password, &salt) {
                        Ok(key) => kdc.request_initial_ticket(principal, kvno, &key),
                        Err(err) => Err(err),
                    }
                };
                match attempt {
                    Ok(true) => return Ok(salt),
                    Ok(false) => (),
                    Err(err) => {
                        return Err(self.fail(
                            ErrorKind::Directory,
                            format!(
                                "Couldn't authenticate with the new password while discovering the keytab salt: {}: {}",
                                principal_name, err
                            ),
                        ))
                    }
                }
            }
        }
        Err(self.fail(
            ErrorKind::Directory,
            format!(
                "Couldn't authenticate with the new password while discovering the keytab salt: {}",
                principal_name
            ),
        ))
    }
}
