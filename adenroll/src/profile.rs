use config::{Config, File, FileFormat};
use nix::unistd::{Uid, User};
use std::env;

const DEFAULT_PROFILE_PATH: &str = "/etc/krb5.conf";

/// The krb5.conf profile chain, resolved from `KRB5_CONFIG` the way the
/// realm libraries do. Only lookups the enrollment engine needs are
/// exposed.
#[derive(Debug)]
pub struct Profile {
    files: Vec<ProfileFile>,
}

impl Profile {
    pub fn new() -> anyhow::Result<Self> {
        let filepath = env::var("KRB5_CONFIG").unwrap_or(DEFAULT_PROFILE_PATH.to_owned());
        let mut files = vec![];
        for file in filepath.split(':') {
            files.push(ProfileFile::new(file)?);
        }
        Ok(Self { files })
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        for file in &self.files {
            if let Ok(value) = file.config.get_string(key) {
                return Some(value);
            }
        }
        None
    }

    /// Expands `%{token}` residency tokens in profile-supplied paths.
    pub fn expand_path_tokens(path: &str) -> anyhow::Result<String> {
        let mut buf = vec![];
        let mut path_remained = &path[0..];
        while !path_remained.is_empty() {
            let token_begin = match path_remained.find("%{") {
                Some(token_begin) => {
                    buf.append(&mut path_remained[..token_begin].as_bytes().to_vec());
                    token_begin
                }
                None => {
                    buf.append(&mut path_remained.as_bytes().to_vec());
                    break;
                }
            };
            let token_end = match path_remained[token_begin..].find('}') {
                Some(token_end) => token_begin + token_end,
                None => Err(anyhow::anyhow!("Invalid argument"))?,
            };
            let token_value = Self::expand_token(&path_remained[token_begin + 2..token_end])?;
            buf.append(&mut token_value.as_bytes().to_vec());
            path_remained = &path_remained[token_end + 1..];
        }
        Ok(String::from_utf8(buf)?)
    }

    fn expand_token(token: &str) -> anyhow::Result<String> {
        let token_value = match token {
            "euid" => Uid::effective().to_string(),
            "username" => User::from_uid(Uid::effective())?
                .map(|u| u.name)
                .unwrap_or_else(|| Uid::effective().to_string()),
            "uid" | "USERID" => Uid::current().to_string(),
            _ => Err(anyhow::anyhow!("Invalid argument"))?,
        };
        Ok(token_value)
    }
}

#[derive(Debug)]
struct ProfileFile {
    config: Config,
}

impl ProfileFile {
    fn new(filename: &str) -> anyhow::Result<Self> {
        let expanded_filename = match (filename.starts_with("~/"), env::var("HOME")) {
            (true, Ok(home_env)) => format!("{}{}", home_env, &filename[1..]),
            _ => filename.to_owned(),
        };
        let config = Config::builder()
            .add_source(
                File::with_name(&expanded_filename)
                    .format(FileFormat::Ini)
                    .required(false),
            )
            .build()?;
        Ok(Self { config })
    }
}
