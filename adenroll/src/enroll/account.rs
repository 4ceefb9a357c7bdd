use super::Enrollment;
use crate::{
    directory::{AttrMod, Entry, ResultCode, Scope},
    error::ErrorKind,
};

const CREATE_ATTRS: [&str; 3] = ["objectClass", "sAMAccountName", "userAccountControl"];

// WORKSTATION_TRUST_ACCOUNT | DONT_EXPIRE_PASSWD
const CREATE_USER_ACCOUNT_CONTROL: &str = "69632";

impl Enrollment {
    pub(super) fn create_or_update_computer_account(
        &mut self,
        allow_overwrite: bool,
    ) -> anyhow::Result<()> {
        let dn = match self.computer_dn.value() {
            Some(dn) => dn.clone(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No computer account location computed".to_owned(),
                ))
            }
        };
        let sam = match &self.computer_sam {
            Some(sam) => sam.clone(),
            None => {
                return Err(self.fail(
                    ErrorKind::Unexpected,
                    "No account name derived for the computer account".to_owned(),
                ))
            }
        };

        let mods = vec![
            AttrMod::new("objectClass", &["computer"]),
            AttrMod {
                attr: "sAMAccountName".to_owned(),
                values: vec![sam],
            },
            AttrMod::new("userAccountControl", &[CREATE_USER_ACCOUNT_CONTROL]),
        ];

        let result = {
            let mut directory = self
                .conn
                .directory()
                .lock()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            directory.search(&dn, Scope::Base, "(objectClass=*)", &CREATE_ATTRS)
        };

        match result {
            // No computer account, create a new one
            Err(err) if err.code == ResultCode::NO_SUCH_OBJECT => {
                self.create_computer_account(&dn, mods)
            }
            // Have a computer account, figure out what to update
            Ok(entries) => {
                if !allow_overwrite {
                    let name = self
                        .computer_name
                        .value()
                        .map(String::as_str)
                        .unwrap_or("")
                        .to_owned();
                    return Err(self.config_failure(format!(
                        "The computer account {} already exists",
                        name
                    )));
                }
                let mods = filter_necessary_mods(entries.first(), mods);
                if mods.is_empty() {
                    return Ok(());
                }
                self.modify_computer_account(&dn, mods)
            }
            Err(err) => Err(self.directory_failure(
                "Couldn't lookup computer account",
                Some(&dn),
                &err,
                ErrorKind::Directory,
            )),
        }
    }

    fn create_computer_account(&mut self, dn: &str, mods: Vec<AttrMod>) -> anyhow::Result<()> {
        // Don't set blank attributes
        let mods: Vec<AttrMod> = mods
            .into_iter()
            .filter(|m| m.values.iter().any(|value| !value.is_empty()))
            .collect();

        log::info!(
            "Creating computer account with attributes: {}",
            concat_mod_attr_types(&mods)
        );

        let result = {
            let mut directory = self
                .conn
                .directory()
                .lock()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            directory.add(dn, &mods)
        };

        match result {
            // AD answers OBJECT_CLASS_VIOLATION when the login cannot
            // materialize the server-generated attributes of a computer
            // object, so treat it as a permission problem.
            Err(err)
                if err.code == ResultCode::INSUFFICIENT_ACCESS
                    || err.code == ResultCode::OBJECT_CLASS_VIOLATION =>
            {
                Err(self.directory_failure(
                    "Insufficient permissions to modify computer account",
                    Some(dn),
                    &err,
                    ErrorKind::Credentials,
                ))
            }
            Err(err) => Err(self.directory_failure(
                "Couldn't create computer account",
                Some(dn),
                &err,
                ErrorKind::Directory,
            )),
            Ok(()) => {
                log::info!("Created computer account: {}", dn);
                Ok(())
            }
        }
    }

    fn modify_computer_account(&mut self, dn: &str, mods: Vec<AttrMod>) -> anyhow::Result<()> {
        log::info!(
            "Modifying computer account attributes: {}",
            concat_mod_attr_types(&mods)
        );

        let result = {
            let mut directory = self
                .conn
                .directory()
                .lock()
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            directory.modify(dn, &mods)
        };

        match result {
            Err(err) if err.code == ResultCode::INSUFFICIENT_ACCESS => {
                Err(self.directory_failure(
                    "Insufficient permissions to modify computer account",
                    Some(dn),
                    &err,
                    ErrorKind::Credentials,
                ))
            }
            Err(err) => Err(self.directory_failure(
                "Couldn't modify computer account",
                Some(dn),
                &err,
                ErrorKind::Directory,
            )),
            Ok(()) => {
                log::info!("Updated existing computer account: {}", dn);
                Ok(())
            }
        }
    }
}

fn concat_mod_attr_types(mods: &[AttrMod]) -> String {
    mods.iter()
        .map(|m| m.attr.as_str())
        .collect::<Vec<&str>>()
        .join(", ")
}

/// Keeps only the mods whose values the entry does not already carry.
/// With no entry there is nothing to filter against.
pub(super) fn filter_necessary_mods(entry: Option<&Entry>, mods: Vec<AttrMod>) -> Vec<AttrMod> {
    mods.into_iter()
        .filter(|m| match entry.and_then(|entry| entry.values(&m.attr)) {
            Some(existing) => !m.matches_values(existing),
            None => true,
        })
        .collect()
}
