use smithay::utils::Transform;
use tracing::debug;

use crate::error::{FbdevError, FbdevResult};

/// Options found on the command line. Anything not recognised is left for the
/// rest of the program.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Options {
    pub tty: Option<u32>,
    pub device: Option<String>,
    pub seat: Option<String>,
    pub transform: Option<Transform>,
    pub query: bool,
}

pub fn parse_tty(value: &str) -> FbdevResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| FbdevError::Config(format!("invalid tty '{value}'")))
}

pub fn parse_transform(value: &str) -> FbdevResult<Transform> {
    match value.trim() {
        "normal" | "0" => Ok(Transform::Normal),
        "90" => Ok(Transform::_90),
        "180" => Ok(Transform::_180),
        "270" => Ok(Transform::_270),
        other => Err(FbdevError::Config(format!(
            "invalid transform '{other}', expected normal, 90, 180 or 270"
        ))),
    }
}

/// Parse `--name=value` and `--name value` forms.
pub fn parse_args<I>(args: I) -> FbdevResult<Options>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let (name, inline) = match arg.split_once('=') {
            Some((name, value)) => (name.to_owned(), Some(value.to_owned())),
            None => (arg.clone(), None),
        };

        if name == "--query" {
            options.query = true;
            continue;
        }
        if !matches!(name.as_str(), "--tty" | "--device" | "--seat" | "--transform") {
            debug!(%arg, "Ignoring unknown argument");
            continue;
        }

        let value = match inline {
            Some(value) => value,
            None => args
                .next()
                .ok_or_else(|| FbdevError::Config(format!("{name} needs a value")))?,
        };

        match name.as_str() {
            "--tty" => options.tty = Some(parse_tty(&value)?),
            "--device" => options.device = Some(value),
            "--seat" => options.seat = Some(value),
            "--transform" => options.transform = Some(parse_transform(&value)?),
            _ => unreachable!(),
        }
    }

    Ok(options)
}
