mod ldap_conn;

use std::collections::HashMap;

/// LDAP result codes the enrollment engine branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCode(pub u32);

macro_rules! result_code {
    ($code:ident, $int:expr) => {
        pub const $code: ResultCode = ResultCode($int);
    };
}

impl ResultCode {
    result_code!(SUCCESS, 0);
    result_code!(COMPARE_FALSE, 5);
    result_code!(COMPARE_TRUE, 6);
    result_code!(NO_SUCH_OBJECT, 32);
    result_code!(INSUFFICIENT_ACCESS, 50);
    result_code!(OBJECT_CLASS_VIOLATION, 65);
    // Client-side code used for transport failures
    result_code!(SERVER_DOWN, 81);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
}

/// One directory entry, as returned from a search.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

impl Entry {
    pub fn value(&self, attr: &str) -> Option<&str> {
        self.attrs
            .get(attr)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn values(&self, attr: &str) -> Option<&[String]> {
        self.attrs.get(attr).map(Vec::as_slice)
    }
}

/// An attribute write. Adds send these as-is; modifies replace the
/// attribute with the listed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrMod {
    pub attr: String,
    pub values: Vec<String>,
}

impl AttrMod {
    pub fn new(attr: &str, values: &[&str]) -> Self {
        Self {
            attr: attr.to_owned(),
            values: values.iter().map(|v| (*v).to_owned()).collect(),
        }
    }

    /// Whether the attribute already carries exactly these values,
    /// disregarding order.
    pub fn matches_values(&self, existing: &[String]) -> bool {
        self.values.len() == existing.len()
            && self.values.iter().all(|value| existing.contains(value))
    }
}

#[derive(Debug)]
pub struct DirectoryError {
    pub code: ResultCode,
    pub message: String,
}

impl DirectoryError {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "ldap result code {}", self.code.0)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for DirectoryError {}

/// The narrow surface the engine consumes from an open, bound LDAP
/// connection. Searches yield entries only on a success result; every
/// other outcome surfaces its result code so callers can branch on
/// `NO_SUCH_OBJECT` or `INSUFFICIENT_ACCESS`.
pub trait Directory {
    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<Entry>, DirectoryError>;

    fn compare(&mut self, dn: &str, attr: &str, value: &str) -> Result<bool, DirectoryError>;

    fn add(&mut self, dn: &str, mods: &[AttrMod]) -> Result<(), DirectoryError>;

    fn modify(&mut self, dn: &str, mods: &[AttrMod]) -> Result<(), DirectoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mod_value_matching_ignores_order() {
        let spn = AttrMod::new("servicePrincipalName", &["HOST/a", "HOST/b"]);
        let same = vec!["HOST/b".to_owned(), "HOST/a".to_owned()];
        let fewer = vec!["HOST/a".to_owned()];
        assert!(spn.matches_values(&same));
        assert!(!spn.matches_values(&fewer));
    }
}
