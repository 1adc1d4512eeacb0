use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::process::Command;

use crate::process::{check_file, run_checked};

const SS58_PREFIX: &str = "SS58 Address:";

/// Derives account ids from seed phrases with `<binary> key inspect <phrase>`.
///
/// The result keeps the order of `phrases`. A phrase whose output carries no address maps to
/// `None`.
pub async fn generate_keys<S: AsRef<str>>(
    binary: impl AsRef<Path>,
    phrases: &[S],
) -> Result<Vec<(String, Option<String>)>> {
    let binary = check_file(binary.as_ref())?;

    let mut keys = Vec::with_capacity(phrases.len());
    for phrase in phrases {
        let phrase = phrase.as_ref();
        let mut command = Command::new(&binary);
        command.arg("key").arg("inspect").arg(phrase);
        let output = run_checked(&mut command)
            .await
            .with_context(|| format!("Inspecting key `{}`", phrase))?;

        let address = parse_ss58_address(&String::from_utf8_lossy(&output.stdout));
        match &address {
            Some(address) => debug!("{} -> {}", phrase, address),
            None => warn!("No SS58 address in `key inspect` output for `{}`", phrase),
        }
        keys.push((phrase.to_string(), address));
    }
    Ok(keys)
}

/// First `SS58 Address: <addr>` line of `key inspect` output.
pub fn parse_ss58_address(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix(SS58_PREFIX)?;
        let address = rest.trim();
        let is_word = !address.is_empty()
            && address.chars().all(|c| c.is_alphanumeric() || c == '_');
        is_word.then(|| address.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ss58_address() {
        let output = "Secret Key URI `//Alice` is account:\n  \
                      Network ID:        substrate\n  \
                      Public key (hex):  0xd43593c715fdd31c\n  \
                      SS58 Address:      5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY\n";
        assert_eq!(
            parse_ss58_address(output).as_deref(),
            Some("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY")
        );
    }

    #[test]
    fn test_parse_ss58_address_missing() {
        assert_eq!(parse_ss58_address("Invalid phrase/URI given"), None);
        assert_eq!(parse_ss58_address("SS58 Address:\n"), None);
        assert_eq!(parse_ss58_address("SS58 Address: two words"), None);
    }
}
