use super::{AttrMod, Directory, DirectoryError, Entry, ResultCode, Scope};
use ldap3::{LdapConn, LdapError, SearchEntry};
use std::collections::HashSet;

impl From<Scope> for ldap3::Scope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::OneLevel => ldap3::Scope::OneLevel,
            Scope::Subtree => ldap3::Scope::Subtree,
        }
    }
}

fn connection_error(err: LdapError) -> DirectoryError {
    match err {
        LdapError::LdapResult { result } => {
            DirectoryError::new(ResultCode(result.rc), result.text)
        }
        other => DirectoryError::new(ResultCode::SERVER_DOWN, other.to_string()),
    }
}

fn value_sets(mods: &[AttrMod]) -> Vec<(String, HashSet<String>)> {
    mods.iter()
        .map(|m| (m.attr.clone(), m.values.iter().cloned().collect()))
        .collect()
}

/// A bound synchronous `ldap3` connection is the production directory
/// backend.
impl Directory for LdapConn {
    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError> {
        let result =
            LdapConn::search(self, base, scope.into(), filter, attrs).map_err(connection_error)?;
        if result.1.rc != ResultCode::SUCCESS.0 {
            return Err(DirectoryError::new(ResultCode(result.1.rc), result.1.text));
        }
        Ok(result
            .0
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| Entry {
                dn: entry.dn,
                attrs: entry.attrs,
            })
            .collect())
    }

    fn compare(&mut self, dn: &str, attr: &str, value: &str) -> Result<bool, DirectoryError> {
        let result = LdapConn::compare(self, dn, attr, value).map_err(connection_error)?;
        match ResultCode(result.0.rc) {
            ResultCode::COMPARE_TRUE => Ok(true),
            ResultCode::COMPARE_FALSE => Ok(false),
            code => Err(DirectoryError::new(code, result.0.text)),
        }
    }

    fn add(&mut self, dn: &str, mods: &[AttrMod]) -> Result<(), DirectoryError> {
        let result = LdapConn::add(self, dn, value_sets(mods)).map_err(connection_error)?;
        match ResultCode(result.rc) {
            ResultCode::SUCCESS => Ok(()),
            code => Err(DirectoryError::new(code, result.text)),
        }
    }

    fn modify(&mut self, dn: &str, mods: &[AttrMod]) -> Result<(), DirectoryError> {
        let mods: Vec<ldap3::Mod<String>> = mods
            .iter()
            .map(|m| ldap3::Mod::Replace(m.attr.clone(), m.values.iter().cloned().collect()))
            .collect();
        let result = LdapConn::modify(self, dn, mods).map_err(connection_error)?;
        match ResultCode(result.rc) {
            ResultCode::SUCCESS => Ok(()),
            code => Err(DirectoryError::new(code, result.text)),
        }
    }
}
