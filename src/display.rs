//! Human readable output of restic calls.

use std::fmt::Display;

use log::info;

/// Long options start a new line once the current line exceeds this length.
const OPTION_WRAP: usize = 40;
/// Any part starts a new line once the current line exceeds this length.
const LINE_WRAP: usize = 80;

/// Log a banner line marking a phase of the run.
pub fn banner(message: impl Display) {
    info!("*************** {message}");
}

/// Format a command line for the log, wrapped with shell line continuations.
///
/// Parts containing spaces and exclude patterns are double quoted.
pub fn format_command<S: AsRef<str>>(parts: &[S]) -> String {
    let mut result = String::new();
    let mut length = 0;
    let mut last_part = "";
    for part in parts.iter().map(AsRef::as_ref) {
        let new_length = length + part.len();
        if (part.starts_with("--") && new_length > OPTION_WRAP) || new_length > LINE_WRAP {
            length = 0;
            result.push_str("\\\n\t");
        }
        if part.contains(' ') || last_part == "--exclude" {
            result.push('"');
            result.push_str(part);
            result.push('"');
        } else {
            result.push_str(part);
        }
        result.push(' ');
        length += part.len();
        last_part = part;
    }
    _ = result.pop();
    result
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(&[], "")]
    #[case(&["restic", "snapshots"], "restic snapshots")]
    #[case(&["backup", "--exclude", "*.tmp", "/etc"], r#"backup --exclude "*.tmp" /etc"#)]
    #[case(&["ls", "--long", "my snapshot"], r#"ls --long "my snapshot""#)]
    #[case(
        &["restic", "--repo", "sftp:user@host:/srv/restic-repo", "--verbose"],
        "restic --repo sftp:user@host:/srv/restic-repo \\\n\t--verbose"
    )]
    fn format_command_cases(#[case] parts: &[&str], #[case] expected: &str) {
        assert_eq!(format_command(parts), expected);
    }

    #[test]
    fn long_parts_wrap() {
        let long = "x".repeat(50);
        let formatted = format_command(&[long.as_str(), long.as_str()]);
        assert_eq!(formatted, format!("{long} \\\n\t{long}"));
    }
}
