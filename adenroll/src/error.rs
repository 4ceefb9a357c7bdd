#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A contract violation or other condition that indicates a bug.
    Unexpected,
    /// A generic unrecoverable local failure, such as a keytab that
    /// cannot be opened.
    Fail,
    /// An LDAP or kpasswd transport or server failure.
    Directory,
    /// Inconsistent caller input.
    Config,
    /// Authentication or authorization was refused.
    Credentials,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unexpected => "unexpected failure",
            Self::Fail => "failure",
            Self::Directory => "directory failure",
            Self::Config => "configuration problem",
            Self::Credentials => "credentials refused",
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

macro_rules! constructor {
    ($fn:ident, $kind:ident) => {
        pub fn $fn(message: impl Into<String>) -> Self {
            Self {
                kind: ErrorKind::$kind,
                message: message.into(),
            }
        }
    };
}

impl Error {
    constructor!(unexpected, Unexpected);
    constructor!(fail, Fail);
    constructor!(directory, Directory);
    constructor!(config, Config);
    constructor!(credentials, Credentials);
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

/// The enrollment taxonomy kind of `err`, when it carries one.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<Error>().map(|e| e.kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_recoverable_through_anyhow() {
        let err: anyhow::Error = Error::config("bad input").into();
        assert_eq!(error_kind(&err), Some(ErrorKind::Config));
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn foreign_errors_carry_no_kind() {
        let err = anyhow::anyhow!("plain");
        assert_eq!(error_kind(&err), None);
    }
}
