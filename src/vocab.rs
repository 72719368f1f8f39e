use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Class id reserved for "no content"; never rendered as text.
pub const BLANK_ID: i32 = 0;

/// Largest token id a vocabulary file may declare.
pub const MAX_TOKEN_ID: usize = 1 << 20;

#[derive(Error, Debug)]
pub enum VocabError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed vocabulary line {line}: '{content}'")]
    Malformed { line: usize, content: String },
    #[error("Vocabulary line {line} declares id {id}, above the limit of {max}")]
    IdOutOfRange { line: usize, id: usize, max: usize },
    #[error("Vocabulary is empty")]
    Empty,
}

pub trait Vocabulary: Send + Sync {
    fn token(&self, id: i32) -> Option<&str>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: Vec<String>,
}

impl TokenTable {
    pub fn new(tokens: Vec<String>) -> Self {
        Self { tokens }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, VocabError> {
        let content = fs::read_to_string(path.as_ref())?;
        let table = Self::parse(&content)?;
        log::info!(
            "Loaded vocabulary with {} tokens from {}",
            table.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    /// Accepts `token id` lines, or bare tokens numbered by line.
    pub fn parse(content: &str) -> Result<Self, VocabError> {
        let mut entries = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let entry = match line.rsplit_once(char::is_whitespace) {
                Some((token, id)) if !token.trim().is_empty() => {
                    let id = id.parse::<usize>().map_err(|_| VocabError::Malformed {
                        line: line_no + 1,
                        content: line.to_string(),
                    })?;
                    if id > MAX_TOKEN_ID {
                        return Err(VocabError::IdOutOfRange {
                            line: line_no + 1,
                            id,
                            max: MAX_TOKEN_ID,
                        });
                    }
                    (token.trim().to_string(), id)
                }
                _ => (line.trim().to_string(), entries.len()),
            };
            entries.push(entry);
        }

        let max_id = entries
            .iter()
            .map(|(_, id)| *id)
            .max()
            .ok_or(VocabError::Empty)?;
        let len = max_id.checked_add(1).ok_or(VocabError::Empty)?;
        let mut tokens = vec![String::new(); len];
        for (token, id) in entries {
            tokens[id] = token.replace('\u{2581}', " ");
        }
        Ok(Self { tokens })
    }
}

impl Vocabulary for TokenTable {
    fn token(&self, id: i32) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.tokens.get(i))
            .map(String::as_str)
    }

    fn len(&self) -> usize {
        self.tokens.len()
    }
}

static DECODE_SPACE_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\A\s|\s\B|(\s)\b"));

/// Joins word-piece tokens and normalizes the word-boundary spaces they carry.
pub fn render_text<S: AsRef<str>>(tokens: &[S]) -> String {
    let joined: String = tokens.iter().map(AsRef::as_ref).collect();
    match &*DECODE_SPACE_RE {
        Ok(re) => re
            .replace_all(&joined, |c: &regex::Captures| {
                if c.get(1).is_some() {
                    " "
                } else {
                    ""
                }
            })
            .to_string(),
        Err(_) => joined,
    }
}
