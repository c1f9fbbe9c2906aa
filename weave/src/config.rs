use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Loads a `T` from a TOML file, panicking with a descriptive message on failure.
/// Every config struct in the workspace (runtime config, service configs) goes
/// through this so the failure mode for a malformed config file is consistent.
pub fn load_toml<T, P>(path: P) -> T
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    serdeconv::from_toml_file(path.as_ref()).unwrap_or_else(|err| {
        panic!(
            "error loading config file `{}`: {}",
            path.as_ref().display(),
            err
        )
    })
}

/// Renders `T` back out as a TOML string, used by the `*-gen-config` style
/// binaries to print a starting point config file.
pub fn to_toml_string<T: Serialize>(value: &T) -> String {
    serdeconv::to_toml_string(value).expect("failed to render config as toml")
}
