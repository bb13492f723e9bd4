use std::path::PathBuf;
use std::str::FromStr;

pub const USAGE: &str = "\
Available commands:
  load <file>                   - share a file with other peers
  download <filename> [output]  - download a file from the neighbors
  status                        - show how much of every file is held
  quit                          - exit";

/// Commands accepted by the interactive shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Load(PathBuf),
    Download { filename: String, output: Option<PathBuf> },
    Status,
    Quit,
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidCommand;

impl FromStr for Command {
    type Err = InvalidCommand;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts = line.split_whitespace().collect::<Vec<_>>();

        Ok(match parts.as_slice() {
            ["load", path] => Command::Load(PathBuf::from(path)),
            ["download", filename] => Command::Download {
                filename: filename.to_string(),
                output: None,
            },
            ["download", filename, output] => Command::Download {
                filename: filename.to_string(),
                output: Some(PathBuf::from(output)),
            },
            ["status"] => Command::Status,
            ["quit"] => Command::Quit,
            _ => return Err(InvalidCommand),
        })
    }
}
