//! Log output: human-readable events on stderr, and optionally an append-only
//! copy in a file (without colours) for the record of a long migration.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Used when `RUST_LOG` is unset or unparsable.
const DEFAULT_FILTER: &str = "info,sqlx=warn,aws_config=warn,aws_smithy_runtime=warn";

pub fn init(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path).or_raise(|| ErrorKind::Setup("log file"))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        },
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file)
        .try_init()
        .or_raise(|| ErrorKind::Setup("logging"))
}
