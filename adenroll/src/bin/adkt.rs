use adenroll::{prefix_progname_to_error_if_needed, Enctype, Keytab, BUFSIZ};
use chrono::{DateTime, TimeZone, Utc};
use clap::Parser;
use once_cell::sync::Lazy;
use std::process::ExitCode;

const PROGNAME: &str = "adkt";

static ARGS: Lazy<Args> = Lazy::new(Args::parse);
static NOW: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);
static TIMESTAMP_WIDTH: Lazy<usize> = Lazy::new(|| timestamp_string(*NOW).len());

/// Lists the entries of a host keytab, the way an enrollment leaves
/// them behind.
#[derive(Parser)]
#[command(name = PROGNAME, version)]
struct Args {
    /// shows keytab entry timestamps
    #[arg(short = 't', default_value_t = false)]
    show_time: bool,
    /// shows the encryption type of each key
    #[arg(short = 'e', default_value_t = false)]
    show_etype: bool,
    /// shows keytab entry keys
    #[arg(short = 'K', default_value_t = false)]
    show_keys: bool,
    /// only lists entries for this principal
    #[arg(short = 'p', long = "principal")]
    principal: Option<String>,

    name: Option<String>,
}

fn main() -> ExitCode {
    prefix_progname_to_error_if_needed(PROGNAME, run(), false)
}

fn run() -> anyhow::Result<()> {
    // Forces the evaluation of lazy static value `NOW` to use current time
    let _ = *NOW;

    let keytab = match &ARGS.name {
        Some(name) => Keytab::resolve(name)
            .map_err(|e| anyhow::anyhow!("{} while resolving keytab {}", e, name))?,
        None => {
            Keytab::default().map_err(|e| anyhow::anyhow!("{} while getting default keytab", e))?
        }
    };
    let mut keytab = keytab.lock().map_err(|e| anyhow::anyhow!("{}", e))?;

    let name = keytab
        .get_name(BUFSIZ)
        .map_err(|e| anyhow::anyhow!("{} while getting keytab name", e))?;
    println!("Keytab name: {}", name);

    let mut entries_iter = keytab
        .entries_iter()
        .map_err(|e| anyhow::anyhow!("{} while starting keytab scan", e))?;

    if ARGS.show_time {
        println!(
            "KVNO Timestamp{} Principal",
            vec![" "; *TIMESTAMP_WIDTH - "Timestamp".len()].join("")
        );
        println!(
            "{} {} {}",
            ["-"; 4].join(""),
            vec!["-"; *TIMESTAMP_WIDTH].join(""),
            vec!["-"; 73 - *TIMESTAMP_WIDTH].join("")
        );
    } else {
        println!("KVNO Principal");
        println!("{} {}", ["-"; 4].join(""), ["-"; 74].join(""));
    }

    while let Some(entry) = entries_iter
        .next()
        .transpose()
        .map_err(|e| anyhow::anyhow!("{} while scanning keytab", e))?
    {
        let pname = entry
            .principal
            .unparse_name()
            .map_err(|e| anyhow::anyhow!("{} while unparsing principal name", e))?;
        if !principal_selected(&pname) {
            continue;
        }
        print!("{:>4} ", entry.vno);
        if ARGS.show_time {
            let timestamp = Utc.timestamp_opt(entry.timestamp.into(), 0).unwrap();
            print!("{} ", timestamp_string(timestamp));
        }
        print!("{}", pname);
        if ARGS.show_etype {
            print!(" ({}) ", etype_string(entry.key.enctype));
        }
        if ARGS.show_keys {
            let key = entry
                .key
                .contents
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<String>>()
                .join("");
            print!(" (0x{})", key);
        }
        println!();
    }

    Ok(())
}

// With no realm in the filter, entries of any realm match on the name
// part alone.
fn principal_selected(unparsed: &str) -> bool {
    let filter = match &ARGS.principal {
        Some(filter) => filter,
        None => return true,
    };
    if filter.contains('@') {
        return unparsed == filter;
    }
    match unparsed.rsplit_once('@') {
        Some((name, _realm)) => name == filter,
        None => unparsed == filter,
    }
}

fn timestamp_string(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%x %X").to_string()
}

fn etype_string(enctype: Enctype) -> String {
    enctype
        .deprecated_name()
        .unwrap_or_else(|_| format!("etype {}", enctype.0))
}
