use std::io::{BufRead as _, Write as _};
use std::path::Path;

/// A reader for JSON Lines (jsonl) files.
#[derive(Debug, Default)]
pub struct JsonlReader {
    /// Whether to skip entries that fail to deserialize instead of failing the whole read.
    pub allow_invalid_entries: bool,
}

impl JsonlReader {
    /// Parses JSON Lines from the given reader into a vector of type `T`.
    pub fn parse<R, T>(&self, reader: R) -> Result<Vec<T>, JsonlError>
    where
        R: std::io::Read,
        T: serde::de::DeserializeOwned,
    {
        let mut results = Vec::new();
        for line in std::io::BufReader::new(reader).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(value) => results.push(value),
                Err(e) if self.allow_invalid_entries => {
                    log::trace!("Skipping invalid entry: {e}");
                    continue;
                }
                Err(e) => return Err(JsonlError::Serde(e)),
            }
        }
        Ok(results)
    }

    /// Parses a JSON Lines file from the specified path into a vector of type `T`.
    pub fn parse_from_file<P, T>(&self, path: P) -> Result<Vec<T>, JsonlError>
    where
        P: AsRef<Path>,
        T: serde::de::DeserializeOwned,
    {
        let file = std::fs::File::open(path)?;
        self.parse(file)
    }
}

/// Append a value to a JSON Lines file as a single line, creating the file if needed.
pub fn append_jsonl<T, P>(value: &T, path: P) -> Result<(), JsonlError>
where
    T: serde::Serialize,
    P: AsRef<Path>,
{
    // Serialize first so that a failure never leaves a partial line behind.
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    file.write_all(&line)?;
    Ok(())
}

/// An error type for [`JsonlReader::parse`] and [`append_jsonl`].
#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serde JSON error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        value: u32,
    }

    #[test]
    fn test_should_parse_jsonl_skipping_blank_lines() {
        let input = "{\"value\":1}\n\n{\"value\":2}\n";
        let result: Vec<Entry> = JsonlReader::default().parse(input.as_bytes()).unwrap();
        assert_eq!(result, vec![Entry { value: 1 }, Entry { value: 2 }]);
    }

    #[test]
    fn test_should_fail_parsing_on_invalid_jsonl() {
        let input = "{\"value\":1}\nnot json\n";
        let result: Result<Vec<Entry>, JsonlError> = JsonlReader::default().parse(input.as_bytes());
        assert!(matches!(result, Err(JsonlError::Serde(_))));
    }

    #[test]
    fn test_should_skip_invalid_entries_when_allowed() {
        let input = "{\"value\":1}\nnot json\n{\"value\":3}\n";
        let reader = JsonlReader {
            allow_invalid_entries: true,
        };
        let result: Vec<Entry> = reader.parse(input.as_bytes()).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_should_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.jsonl");
        append_jsonl(&Entry { value: 10 }, &path).unwrap();
        append_jsonl(&Entry { value: 11 }, &path).unwrap();

        let result: Vec<Entry> = JsonlReader::default().parse_from_file(&path).unwrap();
        assert_eq!(result, vec![Entry { value: 10 }, Entry { value: 11 }]);
    }
}
