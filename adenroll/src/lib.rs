mod connection;
mod crypto;
mod directory;
mod enroll;
mod error;
mod kdc;
mod keytab;
mod principal;
mod profile;
#[cfg(test)]
mod test_support;

pub use self::{
    connection::{Connection, Domain, LoginType},
    crypto::{format_supported_enctypes, parse_supported_enctypes, Enctype, Keyblock},
    directory::{AttrMod, Directory, DirectoryError, Entry, ResultCode, Scope},
    enroll::{
        Enrollment, HostPassword, JoinFlags, Setting, JOIN_ALLOW_OVERWRITE, JOIN_NO_KEYTAB,
    },
    error::{error_kind, Error, ErrorKind},
    kdc::{KdcClient, PasswordOutcome},
    keytab::{Keytab, KeytabEntry, Kvno},
    principal::{w2k3_machine_salt, NameType, Principal},
};
use std::process::ExitCode;

pub const BUFSIZ: usize = 1024;

pub type Flags = i32;
pub type Timestamp = u32;

pub fn prefix_progname_to_error_if_needed(
    progname: &str,
    result: anyhow::Result<()>,
    status_only: bool,
) -> ExitCode {
    match (result, status_only) {
        (Ok(_), _) => ExitCode::SUCCESS,
        (Err(_), true) => ExitCode::FAILURE,
        (Err(err), false) if err.to_string().is_empty() => ExitCode::FAILURE,
        (Err(err), false) if err.to_string().starts_with(&format!("Usage: {}", progname)) => {
            eprintln!("{:?}", err);
            ExitCode::FAILURE
        }
        (Err(err), false) => {
            eprintln!("{}: {:?}", progname, err);
            ExitCode::FAILURE
        }
    }
}
